use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::domain::models::OutboundNotification;

const WEBHOOK_TIMEOUT_SECONDS: u64 = 10;

/// Delivers one queued notification to whatever sends the actual email.
pub trait NotificationTransport: Send + Sync + 'static {
    fn deliver(&self, notification: &OutboundNotification) -> Result<(), TransportError>;
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("webhook request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("webhook rejected notification with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload<'a> {
    doctor_email: &'a str,
    subject: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

/// POSTs `{doctorEmail, subject, body}` as JSON; the session id also travels as an
/// `X-Session-ID` header so replies can be correlated with their round.
#[derive(Debug, Clone)]
pub struct WebhookTransport {
    url: String,
    client: reqwest::blocking::Client,
}

impl WebhookTransport {
    pub fn new(url: &str) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(WEBHOOK_TIMEOUT_SECONDS))
            .build()
            .map_err(TransportError::Client)?;

        Ok(Self {
            url: url.trim().to_string(),
            client,
        })
    }
}

impl NotificationTransport for WebhookTransport {
    fn deliver(&self, notification: &OutboundNotification) -> Result<(), TransportError> {
        let payload = WebhookPayload {
            doctor_email: &notification.doctor_email,
            subject: &notification.subject,
            body: &notification.body,
            session_id: notification.session_id.as_deref(),
        };

        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(session_id) = &notification.session_id {
            request = request.header("X-Session-ID", session_id);
        }

        let response = request.send().map_err(TransportError::Request)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}
