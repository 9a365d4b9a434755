use std::fmt;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use crate::domain::models::EmailSessionRequest;

/// Source of "now" for expiry checks and timestamps; tests pin it.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Life cycle of one negotiation round. `Committed` and `Expired` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundState {
    OpenAvailabilityRequest,
    AvailabilitySubmitted,
    ChangeRequested,
    Accepted,
    Committed,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundEvent {
    SubmitAvailability,
    Expire,
    Accept,
    RequestChange,
    Reopen,
    Commit,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("round cannot go from {from} on {event:?}")]
pub struct InvalidTransition {
    pub from: RoundState,
    pub event: RoundEvent,
}

impl RoundState {
    pub fn apply(self, event: RoundEvent) -> Result<RoundState, InvalidTransition> {
        use RoundEvent as E;
        use RoundState as S;

        match (self, event) {
            (S::OpenAvailabilityRequest, E::SubmitAvailability) => Ok(S::AvailabilitySubmitted),
            (S::OpenAvailabilityRequest, E::Expire) => Ok(S::Expired),
            (S::AvailabilitySubmitted, E::Accept) => Ok(S::Accepted),
            (S::AvailabilitySubmitted, E::RequestChange) => Ok(S::ChangeRequested),
            // The reopened round carries a fresh session id; the old row keeps ChangeRequested.
            (S::ChangeRequested, E::Reopen) => Ok(S::OpenAvailabilityRequest),
            (S::Accepted, E::Commit) => Ok(S::Committed),
            (from, event) => Err(InvalidTransition { from, event }),
        }
    }

    pub fn is_open(self) -> bool {
        self == Self::OpenAvailabilityRequest
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAvailabilityRequest => "open_availability_request",
            Self::AvailabilitySubmitted => "availability_submitted",
            Self::ChangeRequested => "change_requested",
            Self::Accepted => "accepted",
            Self::Committed => "committed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open_availability_request" => Some(Self::OpenAvailabilityRequest),
            "availability_submitted" => Some(Self::AvailabilitySubmitted),
            "change_requested" => Some(Self::ChangeRequested),
            "accepted" => Some(Self::Accepted),
            "committed" => Some(Self::Committed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmissionRejection {
    #[error("no scheduling round with session id {0}")]
    NotFound(String),
    #[error("doctor {mcr_number} is not invited to round {session_id}")]
    Unauthorized {
        session_id: String,
        mcr_number: String,
    },
    #[error("availability for round {0} has already been submitted")]
    StaleRound(String),
    #[error("round {0} has expired")]
    Expired(String),
}

/// How long an open round may wait for an answer. `None` keeps rounds open until
/// answered or closed by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExpiryPolicy {
    pub ttl: Option<Duration>,
}

impl ExpiryPolicy {
    pub fn from_hours(hours: Option<u32>) -> Self {
        Self {
            ttl: hours.map(|hours| Duration::hours(i64::from(hours))),
        }
    }

    pub fn is_overdue(&self, opened_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.ttl.is_some_and(|ttl| now - opened_at >= ttl)
    }
}

/// Decides whether `mcr_number` may submit availability for `round`.
///
/// Checks run in order: existence, invitation, expiry, then staleness. An open
/// round past its TTL counts as expired even before the sweep has marked it.
pub fn check_submission<'a>(
    session_id: &str,
    round: Option<&'a EmailSessionRequest>,
    mcr_number: &str,
    policy: &ExpiryPolicy,
    now: DateTime<Utc>,
) -> Result<&'a EmailSessionRequest, SubmissionRejection> {
    let Some(round) = round else {
        return Err(SubmissionRejection::NotFound(session_id.to_string()));
    };

    if !round.doctor_mcrs.contains(mcr_number.trim()) {
        return Err(SubmissionRejection::Unauthorized {
            session_id: round.session_id.clone(),
            mcr_number: mcr_number.trim().to_string(),
        });
    }

    if round.state == RoundState::Expired
        || (round.state.is_open() && policy.is_overdue(round.opened_at, now))
    {
        return Err(SubmissionRejection::Expired(round.session_id.clone()));
    }

    if !round.state.is_open() {
        return Err(SubmissionRejection::StaleRound(round.session_id.clone()));
    }

    Ok(round)
}
