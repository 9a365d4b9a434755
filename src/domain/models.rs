use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};

use crate::domain::negotiation::RoundState;
use crate::domain::slots::Slot;

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSession {
    pub id: i64,
    pub session_name: String,
    pub doctor_name: String,
    pub doctor_email: String,
    pub date: NaiveDate,
    pub time_range_text: String,
    pub location: String,
    pub students_text: String,
    pub change_type: Option<String>,
    pub original_time: Option<String>,
    pub change_reason: Option<String>,
    pub is_read: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewScheduledSession {
    pub session_name: String,
    pub doctor_name: String,
    pub doctor_email: String,
    pub date: NaiveDate,
    pub time_range_text: String,
    pub location: String,
    pub students_text: String,
    pub change_type: Option<String>,
    pub original_time: Option<String>,
    pub change_reason: Option<String>,
}

impl From<&ScheduledSession> for NewScheduledSession {
    fn from(session: &ScheduledSession) -> Self {
        Self {
            session_name: session.session_name.clone(),
            doctor_name: session.doctor_name.clone(),
            doctor_email: session.doctor_email.clone(),
            date: session.date,
            time_range_text: session.time_range_text.clone(),
            location: session.location.clone(),
            students_text: session.students_text.clone(),
            change_type: session.change_type.clone(),
            original_time: session.original_time.clone(),
            change_reason: session.change_reason.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Student {
    pub id: i64,
    pub name: String,
    pub school: Option<String>,
    pub year_of_study: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStudent {
    pub name: String,
    pub school: Option<String>,
    pub year_of_study: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Doctor {
    pub mcr_number: String,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationKind {
    Availability,
    ChangeRequest,
}

impl NegotiationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Availability => "availability",
            Self::ChangeRequest => "change_request",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "availability" => Some(Self::Availability),
            "change_request" => Some(Self::ChangeRequest),
            _ => None,
        }
    }
}

/// A doctor's reply, as written by the email intake or the booking page.
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiationRecord {
    pub id: i64,
    pub kind: NegotiationKind,
    pub session_name: String,
    pub from_name: String,
    pub from_email: String,
    pub to_email: Option<String>,
    pub original_session: Option<String>,
    pub new_session: Option<String>,
    pub reason: Option<String>,
    pub students_text: String,
    pub available_slots: Vec<String>,
    pub session_id: Option<String>,
    pub received_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNegotiationRecord {
    pub kind: NegotiationKind,
    pub session_name: String,
    pub from_name: String,
    pub from_email: String,
    pub to_email: Option<String>,
    pub original_session: Option<String>,
    pub new_session: Option<String>,
    pub reason: Option<String>,
    pub students_text: String,
    pub available_slots: Vec<String>,
    pub session_id: Option<String>,
}

/// One negotiation round, keyed by the session id sent out with the request email.
#[derive(Debug, Clone, PartialEq)]
pub struct EmailSessionRequest {
    pub session_id: String,
    pub session_name: String,
    pub session_count: u32,
    pub doctor_mcrs: BTreeSet<String>,
    pub student_ids: BTreeSet<i64>,
    pub candidate_slots: Vec<Slot>,
    pub location: Option<String>,
    pub state: RoundState,
    pub previous_session_id: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutboundNotification {
    pub id: i64,
    pub doctor_email: String,
    pub subject: String,
    pub body: String,
    pub session_id: Option<String>,
    pub created_at: String,
    pub delivered_at: Option<String>,
    pub attempts: i64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNotification {
    pub doctor_email: String,
    pub subject: String,
    pub body: String,
    pub session_id: Option<String>,
}
