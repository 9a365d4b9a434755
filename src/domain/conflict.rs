use serde::Serialize;
use thiserror::Error;

use crate::domain::models::ScheduledSession;
use crate::domain::time_range::{TimeInterval, TimeRangeError, parse_time_range};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConflict {
    pub session_id: i64,
    pub session_name: String,
    pub time_range_text: String,
    pub location: String,
}

/// Advisory result of a double-booking check. Sessions whose stored time could not be
/// parsed are listed in `skipped_session_ids` and never counted as conflicts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub conflicts: Vec<SessionConflict>,
    pub skipped_session_ids: Vec<i64>,
}

impl ConflictReport {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConflictError {
    #[error("cannot evaluate conflicts for candidate time: {0}")]
    CandidateUnparsable(#[source] TimeRangeError),
}

/// Checks a candidate time against a doctor's sessions on the same date.
///
/// `existing` is expected to be pre-filtered by doctor and date by the caller.
pub fn detect_conflicts(
    candidate_time_text: &str,
    existing: &[ScheduledSession],
) -> Result<ConflictReport, ConflictError> {
    let candidate =
        parse_time_range(candidate_time_text).map_err(ConflictError::CandidateUnparsable)?;

    Ok(check_interval(&candidate, existing))
}

pub fn check_interval(candidate: &TimeInterval, existing: &[ScheduledSession]) -> ConflictReport {
    let mut report = ConflictReport::default();

    for session in existing {
        let interval = match parse_time_range(&session.time_range_text) {
            Ok(interval) => interval,
            Err(error) => {
                tracing::warn!(
                    session_id = session.id,
                    time_range = %session.time_range_text,
                    error = %error,
                    "existing session time is unparsable; skipped in conflict check"
                );
                report.skipped_session_ids.push(session.id);
                continue;
            }
        };

        if candidate.overlaps(&interval) {
            report.conflicts.push(SessionConflict {
                session_id: session.id,
                session_name: session.session_name.clone(),
                time_range_text: session.time_range_text.clone(),
                location: session.location.clone(),
            });
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{ConflictError, SessionConflict, detect_conflicts};
    use crate::domain::models::ScheduledSession;
    use crate::domain::time_range::TimeRangeError;

    fn session(id: i64, name: &str, time: &str) -> ScheduledSession {
        ScheduledSession {
            id,
            session_name: name.to_string(),
            doctor_name: "Dr Lim".to_string(),
            doctor_email: "lim@example.org".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 6, 12).expect("date"),
            time_range_text: time.to_string(),
            location: "Clinic B".to_string(),
            students_text: String::new(),
            change_type: None,
            original_time: None,
            change_reason: None,
            is_read: false,
            created_at: "2025-06-01T00:00:00.000Z".to_string(),
            updated_at: "2025-06-01T00:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn reports_overlapping_session_details() {
        let existing = [session(1, "Bedside teaching", "2:30pm-3:30pm")];

        let report = detect_conflicts("2pm-3pm", &existing).expect("candidate parses");

        assert_eq!(
            report.conflicts,
            vec![SessionConflict {
                session_id: 1,
                session_name: "Bedside teaching".to_string(),
                time_range_text: "2:30pm-3:30pm".to_string(),
                location: "Clinic B".to_string(),
            }]
        );
        assert!(report.has_conflicts());
    }

    #[test]
    fn back_to_back_sessions_do_not_conflict() {
        let existing = [
            session(1, "Morning ward round", "1pm-2pm"),
            session(2, "Tutorial", "3pm\u{2013}4pm"),
        ];

        let report = detect_conflicts("2pm-3pm", &existing).expect("candidate parses");

        assert!(!report.has_conflicts());
        assert!(report.skipped_session_ids.is_empty());
    }

    #[test]
    fn skips_existing_sessions_with_unparsable_time() {
        let existing = [
            session(1, "Legacy row", "TBC"),
            session(2, "Tutorial", "2pm-4pm"),
        ];

        let report = detect_conflicts("3pm-5pm", &existing).expect("candidate parses");

        assert_eq!(report.skipped_session_ids, vec![1]);
        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(report.conflicts[0].session_id, 2);
    }

    #[test]
    fn unparsable_candidate_cannot_be_evaluated() {
        let result = detect_conflicts("after lunch", &[session(1, "Tutorial", "2pm-3pm")]);

        assert_eq!(
            result,
            Err(ConflictError::CandidateUnparsable(
                TimeRangeError::MissingSeparator("after lunch".to_string())
            ))
        );
    }
}
