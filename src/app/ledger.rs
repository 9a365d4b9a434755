use std::collections::BTreeSet;

use rusqlite::Connection;
use uuid::Uuid;

use crate::adapters::db;
use crate::app::services::{CommittedSession, ServiceError, SqliteSessionService, unparsable};
use crate::domain::models::{
    Doctor, EmailSessionRequest, NegotiationKind, NegotiationRecord, NewNegotiationRecord,
    NewScheduledSession, ScheduledSession, Student,
};
use crate::domain::negotiation::{RoundEvent, RoundState, check_submission};
use crate::domain::notifications;
use crate::domain::slots::{
    Slot, derive_slot_from_change, normalize_slot_entries, parse_display_slot,
};
use crate::domain::time_range::{TimeInterval, parse_time_range, strip_enclosing_parentheses};

#[derive(Debug, Clone, PartialEq)]
pub struct NewRound {
    pub session_name: String,
    pub session_count: u32,
    pub doctor_mcrs: Vec<String>,
    pub student_ids: Vec<i64>,
    pub candidate_slots: Vec<Slot>,
    pub location: Option<String>,
}

/// An open round with the directory rows the booking page shows next to it.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundView {
    pub round: EmailSessionRequest,
    pub doctors: Vec<Doctor>,
    pub students: Vec<Student>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilitySubmission {
    pub mcr_number: String,
    pub selected_slots: Vec<Slot>,
    pub students_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcceptDecision {
    pub slot_index: Option<usize>,
    pub location: Option<String>,
    pub override_conflicts: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRequest {
    pub candidate_slots: Vec<Slot>,
    pub reason: Option<String>,
}

pub trait SchedulingLedger {
    fn open_round(&self, new_round: &NewRound) -> Result<EmailSessionRequest, ServiceError>;
    fn get_round(&self, session_id: &str) -> Result<RoundView, ServiceError>;
    fn submit_availability(
        &self,
        session_id: &str,
        submission: &AvailabilitySubmission,
    ) -> Result<NegotiationRecord, ServiceError>;
    fn ingest_record(&self, record: &NewNegotiationRecord)
    -> Result<NegotiationRecord, ServiceError>;
    fn accept(
        &self,
        record_id: i64,
        decision: &AcceptDecision,
    ) -> Result<CommittedSession, ServiceError>;
    fn request_change(
        &self,
        record_id: i64,
        change: &ChangeRequest,
    ) -> Result<EmailSessionRequest, ServiceError>;
    fn decline(&self, record_id: i64, reason: Option<&str>) -> Result<(), ServiceError>;
    fn close_round(&self, session_id: &str) -> Result<EmailSessionRequest, ServiceError>;
    fn expire_overdue_rounds(&self) -> Result<Vec<String>, ServiceError>;
    fn list_records(&self) -> Result<Vec<NegotiationRecord>, ServiceError>;
}

impl SchedulingLedger for SqliteSessionService {
    fn open_round(&self, new_round: &NewRound) -> Result<EmailSessionRequest, ServiceError> {
        let session_name = new_round.session_name.trim();
        if session_name.is_empty() {
            return Err(ServiceError::Validation("sessionName is required".to_string()));
        }
        if new_round.session_count == 0 {
            return Err(ServiceError::Validation(
                "sessionCount must be at least 1".to_string(),
            ));
        }
        let doctor_mcrs: BTreeSet<String> = new_round
            .doctor_mcrs
            .iter()
            .map(|mcr| mcr.trim().to_string())
            .filter(|mcr| !mcr.is_empty())
            .collect();
        if doctor_mcrs.is_empty() {
            return Err(ServiceError::Validation(
                "at least one doctor must be invited".to_string(),
            ));
        }
        validate_candidate_slots(&new_round.candidate_slots)?;

        let now = self.now();
        let round = EmailSessionRequest {
            session_id: Uuid::new_v4().to_string(),
            session_name: session_name.to_string(),
            session_count: new_round.session_count,
            doctor_mcrs,
            student_ids: new_round.student_ids.iter().copied().collect(),
            candidate_slots: new_round.candidate_slots.clone(),
            location: non_blank(new_round.location.as_deref()),
            state: RoundState::OpenAvailabilityRequest,
            previous_session_id: None,
            opened_at: now,
            updated_at: now,
        };

        self.with_transaction(|connection| {
            let doctors = invited_doctors(connection, &round.doctor_mcrs)?;
            db::insert_round(connection, &round)?;

            for doctor in &doctors {
                let invitation = notifications::round_invitation(
                    doctor,
                    &round,
                    &self.settings().booking_link_base,
                );
                self.queue_notification(connection, &invitation)?;
            }

            Ok(())
        })?;

        tracing::info!(
            session_id = %round.session_id,
            session_name = %round.session_name,
            doctors = round.doctor_mcrs.len(),
            candidate_slots = round.candidate_slots.len(),
            "scheduling round opened"
        );

        Ok(round)
    }

    fn get_round(&self, session_id: &str) -> Result<RoundView, ServiceError> {
        let now = self.now();
        let expiry = self.settings().expiry;

        self.with_transaction(|connection| {
            let round = require_round(connection, session_id)?;

            match round.state {
                RoundState::Expired => {
                    return Err(ServiceError::Expired(format!(
                        "round {session_id} has expired"
                    )));
                }
                RoundState::OpenAvailabilityRequest => {
                    if expiry.is_overdue(round.opened_at, now) {
                        return Err(ServiceError::Expired(format!(
                            "round {session_id} has expired"
                        )));
                    }
                }
                _ => {
                    return Err(ServiceError::StaleRound(format!(
                        "availability for round {session_id} has already been submitted"
                    )));
                }
            }

            let mut doctors = Vec::with_capacity(round.doctor_mcrs.len());
            for mcr in &round.doctor_mcrs {
                if let Some(doctor) = db::get_doctor(connection, mcr)? {
                    doctors.push(doctor);
                }
            }
            let students = db::get_students_by_ids(connection, &round.student_ids)?;

            Ok(RoundView {
                round,
                doctors,
                students,
            })
        })
    }

    fn submit_availability(
        &self,
        session_id: &str,
        submission: &AvailabilitySubmission,
    ) -> Result<NegotiationRecord, ServiceError> {
        let now = self.now();
        let now_text = self.now_text();
        let expiry = self.settings().expiry;

        let record = self.with_transaction(|connection| {
            let stored = db::get_round(connection, session_id)?;
            let round = check_submission(
                session_id,
                stored.as_ref(),
                &submission.mcr_number,
                &expiry,
                now,
            )?;
            let next = round.state.apply(RoundEvent::SubmitAvailability)?;

            if submission.selected_slots.is_empty() {
                return Err(ServiceError::Validation(
                    "at least one slot must be selected".to_string(),
                ));
            }
            for selected in &submission.selected_slots {
                if selected.interval().is_none() {
                    return Err(ServiceError::Validation(format!(
                        "slot {} must end after it starts",
                        selected.display_text()
                    )));
                }
                if !round
                    .candidate_slots
                    .iter()
                    .any(|candidate| candidate.contains(selected))
                {
                    return Err(ServiceError::Validation(format!(
                        "slot {} is outside the offered slots",
                        selected.display_text()
                    )));
                }
            }

            let doctor = db::get_doctor(connection, &submission.mcr_number)?.ok_or_else(|| {
                ServiceError::Validation(format!(
                    "doctor {} is missing from the directory",
                    submission.mcr_number.trim()
                ))
            })?;

            let students_text = match non_blank(submission.students_text.as_deref()) {
                Some(text) => text,
                None => db::get_students_by_ids(connection, &round.student_ids)?
                    .into_iter()
                    .map(|student| student.name)
                    .collect::<Vec<_>>()
                    .join(", "),
            };

            let new_record = NewNegotiationRecord {
                kind: NegotiationKind::Availability,
                session_name: round.session_name.clone(),
                from_name: doctor.name,
                from_email: doctor.email,
                to_email: None,
                original_session: None,
                new_session: None,
                reason: None,
                students_text,
                available_slots: submission
                    .selected_slots
                    .iter()
                    .map(Slot::display_text)
                    .collect(),
                session_id: Some(round.session_id.clone()),
            };

            store_availability(connection, &new_record, &round.session_id, next, &now_text)
        })?;

        tracing::info!(
            session_id,
            record_id = record.id,
            slots = record.available_slots.len(),
            "availability submitted"
        );

        Ok(record)
    }

    fn ingest_record(
        &self,
        record: &NewNegotiationRecord,
    ) -> Result<NegotiationRecord, ServiceError> {
        if record.from_email.trim().is_empty() {
            return Err(ServiceError::Validation("fromEmail is required".to_string()));
        }

        let mut record = record.clone();
        record.available_slots = normalize_slot_entries(&record.available_slots);
        if record.available_slots.is_empty()
            && let (Some(original), Some(new_time)) =
                (&record.original_session, &record.new_session)
            && let Some(derived) = derive_slot_from_change(original, new_time)
        {
            tracing::debug!(slot = %derived, "slot derived from original session and new time");
            record.available_slots = vec![derived];
        }
        record.session_id = non_blank(record.session_id.as_deref());

        let now = self.now();
        let now_text = self.now_text();
        let expiry = self.settings().expiry;

        let stored = self.with_transaction(|connection| {
            let Some(session_id) = record
                .session_id
                .clone()
                .filter(|_| record.kind == NegotiationKind::Availability)
            else {
                let id = db::insert_negotiation_record(connection, &record, &now_text)?;
                return require_record(connection, id);
            };

            let sender = db::find_doctor_by_email(connection, &record.from_email)?;
            let mcr_number = sender.map(|doctor| doctor.mcr_number).unwrap_or_default();
            let round = db::get_round(connection, &session_id)?;
            let round = check_submission(&session_id, round.as_ref(), &mcr_number, &expiry, now)?;
            let next = round.state.apply(RoundEvent::SubmitAvailability)?;

            store_availability(connection, &record, &session_id, next, &now_text)
        })?;

        tracing::info!(
            record_id = stored.id,
            kind = stored.kind.as_str(),
            from_email = %stored.from_email,
            session_id = ?stored.session_id,
            slots = stored.available_slots.len(),
            "negotiation record stored"
        );

        Ok(stored)
    }

    fn accept(
        &self,
        record_id: i64,
        decision: &AcceptDecision,
    ) -> Result<CommittedSession, ServiceError> {
        let year = self.current_year();
        let now_text = self.now_text();

        self.with_transaction(|connection| {
            let record = require_record(connection, record_id)?;

            let committed = match record.kind {
                NegotiationKind::Availability => {
                    let round = match &record.session_id {
                        Some(session_id) => Some(require_round(connection, session_id)?),
                        None => None,
                    };
                    let committed_state = match &round {
                        Some(round) => Some(
                            round
                                .state
                                .apply(RoundEvent::Accept)?
                                .apply(RoundEvent::Commit)?,
                        ),
                        None => None,
                    };

                    let session = availability_session(&record, round.as_ref(), decision, year)?;
                    let committed = self.commit_session(
                        connection,
                        None,
                        &session,
                        decision.override_conflicts,
                    )?;

                    if let (Some(round), Some(state)) = (&round, committed_state) {
                        db::update_round_state(connection, &round.session_id, state, &now_text)?;
                    }

                    let confirmation = notifications::session_confirmed(
                        &committed.session,
                        record.session_id.as_deref(),
                    );
                    self.queue_notification(connection, &confirmation)?;
                    committed
                }
                NegotiationKind::ChangeRequest => {
                    let existing = session_to_change(connection, &record, year)?;
                    let changes = rescheduled_session(&existing, &record, decision, year)?;
                    let committed = self.commit_session(
                        connection,
                        Some(existing.id),
                        &changes,
                        decision.override_conflicts,
                    )?;

                    self.queue_notification(
                        connection,
                        &notifications::change_accepted(&committed.session),
                    )?;
                    committed
                }
            };

            db::delete_negotiation_record(connection, record.id)?;

            tracing::info!(
                record_id,
                kind = record.kind.as_str(),
                scheduled_session_id = committed.session.id,
                "negotiation record accepted"
            );

            Ok(committed)
        })
    }

    fn request_change(
        &self,
        record_id: i64,
        change: &ChangeRequest,
    ) -> Result<EmailSessionRequest, ServiceError> {
        validate_candidate_slots(&change.candidate_slots)?;
        let now = self.now();
        let now_text = self.now_text();

        self.with_transaction(|connection| {
            let record = require_record(connection, record_id)?;
            if record.kind != NegotiationKind::Availability {
                return Err(ServiceError::Validation(
                    "only availability replies can be answered with new timings".to_string(),
                ));
            }

            let doctor = db::find_doctor_by_email(connection, &record.from_email)?;
            let previous = match &record.session_id {
                Some(session_id) => Some(require_round(connection, session_id)?),
                None => None,
            };

            let new_round = match &previous {
                Some(previous) => {
                    let changed = previous.state.apply(RoundEvent::RequestChange)?;
                    let reopened = changed.apply(RoundEvent::Reopen)?;
                    db::update_round_state(connection, &previous.session_id, changed, &now_text)?;

                    EmailSessionRequest {
                        session_id: Uuid::new_v4().to_string(),
                        candidate_slots: change.candidate_slots.clone(),
                        state: reopened,
                        previous_session_id: Some(previous.session_id.clone()),
                        opened_at: now,
                        updated_at: now,
                        ..previous.clone()
                    }
                }
                None => {
                    let doctor = doctor.as_ref().ok_or_else(|| {
                        ServiceError::Validation(format!(
                            "{} is not in the doctor directory",
                            record.from_email
                        ))
                    })?;

                    EmailSessionRequest {
                        session_id: Uuid::new_v4().to_string(),
                        session_name: record.session_name.clone(),
                        session_count: 1,
                        doctor_mcrs: BTreeSet::from([doctor.mcr_number.clone()]),
                        student_ids: BTreeSet::new(),
                        candidate_slots: change.candidate_slots.clone(),
                        location: None,
                        state: RoundState::OpenAvailabilityRequest,
                        previous_session_id: None,
                        opened_at: now,
                        updated_at: now,
                    }
                }
            };

            db::insert_round(connection, &new_round)?;
            db::delete_negotiation_record(connection, record.id)?;

            let recipient = doctor.unwrap_or_else(|| Doctor {
                mcr_number: String::new(),
                name: record.from_name.clone(),
                email: record.from_email.clone(),
            });
            let notification = notifications::new_timing_requested(
                &recipient,
                &new_round,
                change.reason.as_deref(),
                &self.settings().booking_link_base,
            );
            self.queue_notification(connection, &notification)?;

            tracing::info!(
                record_id,
                previous_session_id = ?new_round.previous_session_id,
                session_id = %new_round.session_id,
                "new timing requested"
            );

            Ok(new_round)
        })
    }

    fn decline(&self, record_id: i64, reason: Option<&str>) -> Result<(), ServiceError> {
        self.with_transaction(|connection| {
            let record = require_record(connection, record_id)?;
            if record.kind != NegotiationKind::ChangeRequest {
                return Err(ServiceError::Validation(
                    "only change requests can be declined".to_string(),
                ));
            }

            db::delete_negotiation_record(connection, record.id)?;
            let notification = notifications::change_declined(
                &record.from_name,
                &record.from_email,
                &record.session_name,
                reason,
            );
            self.queue_notification(connection, &notification)?;

            tracing::info!(record_id, from_email = %record.from_email, "change request declined");
            Ok(())
        })
    }

    fn close_round(&self, session_id: &str) -> Result<EmailSessionRequest, ServiceError> {
        let now = self.now();
        let now_text = self.now_text();

        self.with_transaction(|connection| {
            let mut round = require_round(connection, session_id)?;
            round.state = round.state.apply(RoundEvent::Expire)?;
            round.updated_at = now;
            db::update_round_state(connection, session_id, round.state, &now_text)?;

            tracing::info!(session_id, "scheduling round closed");
            Ok(round)
        })
    }

    fn expire_overdue_rounds(&self) -> Result<Vec<String>, ServiceError> {
        let expiry = self.settings().expiry;
        if expiry.ttl.is_none() {
            return Ok(Vec::new());
        }

        let now = self.now();
        let now_text = self.now_text();

        let expired = self.with_transaction(|connection| {
            let mut expired = Vec::new();
            for round in db::list_rounds_in_state(connection, RoundState::OpenAvailabilityRequest)? {
                if !expiry.is_overdue(round.opened_at, now) {
                    continue;
                }

                let next = round.state.apply(RoundEvent::Expire)?;
                db::update_round_state(connection, &round.session_id, next, &now_text)?;
                expired.push(round.session_id);
            }
            Ok(expired)
        })?;

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "overdue rounds expired");
        }

        Ok(expired)
    }

    fn list_records(&self) -> Result<Vec<NegotiationRecord>, ServiceError> {
        self.with_transaction(|connection| Ok(db::list_negotiation_records(connection)?))
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn validate_candidate_slots(slots: &[Slot]) -> Result<(), ServiceError> {
    if slots.is_empty() {
        return Err(ServiceError::Validation(
            "at least one candidate slot is required".to_string(),
        ));
    }

    match slots.iter().find(|slot| slot.interval().is_none()) {
        Some(slot) => Err(ServiceError::Validation(format!(
            "slot on {} must end after it starts",
            slot.date
        ))),
        None => Ok(()),
    }
}

fn invited_doctors(
    connection: &Connection,
    doctor_mcrs: &BTreeSet<String>,
) -> Result<Vec<Doctor>, ServiceError> {
    let mut doctors = Vec::with_capacity(doctor_mcrs.len());
    for mcr in doctor_mcrs {
        let doctor = db::get_doctor(connection, mcr)?
            .ok_or_else(|| ServiceError::Validation(format!("unknown doctor MCR number {mcr}")))?;
        doctors.push(doctor);
    }

    Ok(doctors)
}

fn require_round(
    connection: &Connection,
    session_id: &str,
) -> Result<EmailSessionRequest, ServiceError> {
    db::get_round(connection, session_id)?
        .ok_or_else(|| ServiceError::NotFound(format!("scheduling round {session_id}")))
}

fn require_record(connection: &Connection, id: i64) -> Result<NegotiationRecord, ServiceError> {
    db::get_negotiation_record(connection, id)?
        .ok_or_else(|| ServiceError::NotFound(format!("negotiation record {id}")))
}

/// Writes the round's single availability record and moves the round to `next`.
fn store_availability(
    connection: &Connection,
    record: &NewNegotiationRecord,
    session_id: &str,
    next: RoundState,
    now_text: &str,
) -> Result<NegotiationRecord, ServiceError> {
    let id = match db::insert_negotiation_record(connection, record, now_text) {
        Ok(id) => id,
        Err(error) if error.is_unique_violation() => {
            return Err(ServiceError::StaleRound(format!(
                "availability for round {session_id} has already been submitted"
            )));
        }
        Err(error) => return Err(error.into()),
    };
    db::update_round_state(connection, session_id, next, now_text)?;

    require_record(connection, id)
}

fn availability_session(
    record: &NegotiationRecord,
    round: Option<&EmailSessionRequest>,
    decision: &AcceptDecision,
    year: i32,
) -> Result<NewScheduledSession, ServiceError> {
    let index = decision.slot_index.unwrap_or(0);
    let slot_text = record.available_slots.get(index).ok_or_else(|| {
        ServiceError::Validation(format!(
            "slot {index} does not exist; the reply offers {} slot(s)",
            record.available_slots.len()
        ))
    })?;
    let slot = Slot::from_display(slot_text, year).map_err(|error| {
        ServiceError::Unparsable(format!("cannot read slot {slot_text:?}: {error}"))
    })?;

    let location = non_blank(decision.location.as_deref())
        .or_else(|| round.and_then(|round| round.location.clone()))
        .ok_or_else(|| ServiceError::Validation("location is required".to_string()))?;

    Ok(NewScheduledSession {
        session_name: record.session_name.clone(),
        doctor_name: record.from_name.clone(),
        doctor_email: record.from_email.clone(),
        date: slot.date,
        time_range_text: slot.time_range_text(),
        location,
        students_text: record.students_text.clone(),
        change_type: None,
        original_time: None,
        change_reason: None,
    })
}

/// Picks the doctor's session a change request refers to, preferring the one whose
/// date and time match `originalSession`.
fn session_to_change(
    connection: &Connection,
    record: &NegotiationRecord,
    year: i32,
) -> Result<ScheduledSession, ServiceError> {
    let candidates =
        db::find_sessions_by_doctor_and_name(connection, &record.from_email, &record.session_name)?;
    let original = record
        .original_session
        .as_deref()
        .and_then(|text| parse_display_slot(text, year).ok());

    let chosen = match &original {
        Some(original) => {
            let original_window = original.time.as_deref().and_then(TimeInterval::parse);
            candidates
                .iter()
                .find(|session| {
                    session.date == original.date
                        && original_window
                            .as_ref()
                            .zip(TimeInterval::parse(&session.time_range_text))
                            .is_some_and(|(wanted, actual)| {
                                wanted.start_minutes == actual.start_minutes
                                    && wanted.end_minutes == actual.end_minutes
                            })
                })
                .or_else(|| {
                    candidates
                        .iter()
                        .find(|session| session.date == original.date)
                })
        }
        None => candidates.first(),
    };

    chosen.cloned().ok_or_else(|| {
        ServiceError::NotFound(format!(
            "scheduled session {:?} for {}",
            record.session_name, record.from_email
        ))
    })
}

fn rescheduled_session(
    existing: &ScheduledSession,
    record: &NegotiationRecord,
    decision: &AcceptDecision,
    year: i32,
) -> Result<NewScheduledSession, ServiceError> {
    let requested = non_blank(record.new_session.as_deref())
        .ok_or_else(|| ServiceError::Validation("change request has no new timing".to_string()))?;

    let (date, time_text) = match parse_display_slot(&requested, year) {
        Ok(display) => (
            display.date,
            display.time.unwrap_or_else(|| existing.time_range_text.clone()),
        ),
        Err(_) => (
            existing.date,
            strip_enclosing_parentheses(&requested).to_string(),
        ),
    };
    let interval = parse_time_range(&time_text).map_err(|error| unparsable(&time_text, error))?;

    Ok(NewScheduledSession {
        date,
        time_range_text: interval.display_text(),
        location: non_blank(decision.location.as_deref())
            .unwrap_or_else(|| existing.location.clone()),
        change_type: Some("rescheduled".to_string()),
        original_time: Some(existing.time_range_text.clone()),
        change_reason: non_blank(record.reason.as_deref()),
        ..NewScheduledSession::from(existing)
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};

    use super::{
        AcceptDecision, AvailabilitySubmission, ChangeRequest, NewRound, SchedulingLedger,
    };
    use crate::adapters::db::{
        SessionFilter, get_round, insert_student, list_pending_notifications, upsert_doctor,
    };
    use crate::app::services::{
        ServiceError, ServiceSettings, SessionCommandHandler, SessionQueryHandler,
        SqliteSessionService,
    };
    use crate::domain::models::{
        Doctor, NegotiationKind, NewNegotiationRecord, NewScheduledSession, NewStudent,
    };
    use crate::domain::negotiation::{ExpiryPolicy, RoundState};
    use crate::domain::slots::Slot;
    use crate::test_support::{FixedClock, open_test_connection};

    struct Harness {
        service: SqliteSessionService,
        connection: Arc<Mutex<rusqlite::Connection>>,
        clock: Arc<FixedClock>,
        john: i64,
    }

    fn harness(name: &str, ttl_hours: Option<u32>) -> Harness {
        let connection = open_test_connection(name);
        upsert_doctor(
            &connection,
            &Doctor {
                mcr_number: "M12345A".to_string(),
                name: "Dr Lim".to_string(),
                email: "lim@example.org".to_string(),
            },
        )
        .expect("doctor insert should succeed");
        let john = insert_student(
            &connection,
            &NewStudent {
                name: "John Tan".to_string(),
                school: Some("NUS".to_string()),
                year_of_study: None,
            },
        )
        .expect("student insert should succeed");

        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0)
                .single()
                .expect("timestamp"),
        ));
        let connection = Arc::new(Mutex::new(connection));
        let service = SqliteSessionService::new(
            Arc::clone(&connection),
            clock.clone(),
            ServiceSettings {
                expiry: ExpiryPolicy::from_hours(ttl_hours),
                booking_link_base: "http://host/book".to_string(),
            },
        );

        Harness {
            service,
            connection,
            clock,
            john,
        }
    }

    fn slot(day: u32, start: u32, end: u32) -> Slot {
        Slot::new(
            NaiveDate::from_ymd_opt(2025, 6, day).expect("date"),
            NaiveTime::from_hms_opt(start, 0, 0).expect("time"),
            NaiveTime::from_hms_opt(end, 0, 0).expect("time"),
        )
        .expect("slot")
    }

    fn open(harness: &Harness) -> String {
        harness
            .service
            .open_round(&NewRound {
                session_name: "Bedside teaching".to_string(),
                session_count: 1,
                doctor_mcrs: vec!["M12345A".to_string()],
                student_ids: vec![harness.john],
                candidate_slots: vec![slot(12, 9, 12), slot(13, 14, 17)],
                location: Some("Ward 5".to_string()),
            })
            .expect("round should open")
            .session_id
    }

    fn submission(selected: Vec<Slot>) -> AvailabilitySubmission {
        AvailabilitySubmission {
            mcr_number: "M12345A".to_string(),
            selected_slots: selected,
            students_text: None,
        }
    }

    fn pending_subjects(harness: &Harness) -> Vec<String> {
        let connection = harness.connection.lock().expect("lock should be available");
        list_pending_notifications(&connection, 100)
            .expect("query should succeed")
            .into_iter()
            .map(|notification| notification.subject)
            .collect()
    }

    fn round_state(harness: &Harness, session_id: &str) -> RoundState {
        let connection = harness.connection.lock().expect("lock should be available");
        get_round(&connection, session_id)
            .expect("query should succeed")
            .expect("round should exist")
            .state
    }

    #[test]
    fn opening_a_round_queues_invitations() {
        let harness = harness("ledger-open", None);

        let session_id = open(&harness);

        let view = harness
            .service
            .get_round(&session_id)
            .expect("round should be readable");
        assert_eq!(view.round.candidate_slots.len(), 2);
        assert_eq!(view.students[0].name, "John Tan");
        assert_eq!(view.doctors[0].email, "lim@example.org");
        assert_eq!(
            pending_subjects(&harness),
            vec!["Availability request: Bedside teaching"]
        );
    }

    #[test]
    fn unknown_doctor_cannot_be_invited() {
        let harness = harness("ledger-unknown-doctor", None);

        let result = harness.service.open_round(&NewRound {
            session_name: "Tutorial".to_string(),
            session_count: 1,
            doctor_mcrs: vec!["M00000X".to_string()],
            student_ids: Vec::new(),
            candidate_slots: vec![slot(12, 9, 10)],
            location: None,
        });

        assert!(matches!(result, Err(ServiceError::Validation(_))));
    }

    #[test]
    fn full_negotiation_commits_session() {
        let harness = harness("ledger-accept", None);
        let session_id = open(&harness);

        let record = harness
            .service
            .submit_availability(&session_id, &submission(vec![slot(12, 10, 11)]))
            .expect("submission should succeed");
        assert_eq!(record.available_slots, vec!["12 June 2025 10am-11am"]);
        assert_eq!(record.students_text, "John Tan");
        assert_eq!(
            round_state(&harness, &session_id),
            RoundState::AvailabilitySubmitted
        );

        let committed = harness
            .service
            .accept(record.id, &AcceptDecision::default())
            .expect("accept should succeed");

        assert_eq!(committed.session.time_range_text, "10am-11am");
        assert_eq!(committed.session.location, "Ward 5");
        assert_eq!(committed.students.student_ids(), vec![harness.john]);
        assert_eq!(round_state(&harness, &session_id), RoundState::Committed);
        assert!(
            harness
                .service
                .list_records()
                .expect("list should succeed")
                .is_empty()
        );
        assert!(pending_subjects(&harness).contains(&"Session confirmed: Bedside teaching".to_string()));
    }

    #[test]
    fn submission_for_unknown_round_is_not_found() {
        let harness = harness("ledger-not-found", None);

        let result = harness
            .service
            .submit_availability("no-such-round", &submission(vec![slot(12, 10, 11)]));

        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[test]
    fn second_submission_is_stale() {
        let harness = harness("ledger-stale", None);
        let session_id = open(&harness);
        harness
            .service
            .submit_availability(&session_id, &submission(vec![slot(12, 10, 11)]))
            .expect("first submission should succeed");

        let second = harness
            .service
            .submit_availability(&session_id, &submission(vec![slot(13, 14, 15)]));

        assert!(matches!(second, Err(ServiceError::StaleRound(_))));
        assert!(matches!(
            harness.service.get_round(&session_id),
            Err(ServiceError::StaleRound(_))
        ));
    }

    #[test]
    fn uninvited_doctor_is_unauthorized() {
        let harness = harness("ledger-unauthorized", None);
        let session_id = open(&harness);

        let result = harness.service.submit_availability(
            &session_id,
            &AvailabilitySubmission {
                mcr_number: "M99999Z".to_string(),
                ..submission(vec![slot(12, 10, 11)])
            },
        );

        assert!(matches!(result, Err(ServiceError::Unauthorized(_))));
    }

    #[test]
    fn selected_slot_must_lie_inside_an_offer() {
        let harness = harness("ledger-outside", None);
        let session_id = open(&harness);

        let result = harness
            .service
            .submit_availability(&session_id, &submission(vec![slot(12, 11, 13)]));

        assert!(matches!(result, Err(ServiceError::Validation(_))));
        assert_eq!(
            round_state(&harness, &session_id),
            RoundState::OpenAvailabilityRequest
        );
    }

    #[test]
    fn conflicting_accept_changes_nothing() {
        let harness = harness("ledger-conflict", None);
        harness
            .service
            .create_session(
                &NewScheduledSession {
                    session_name: "Ward round".to_string(),
                    doctor_name: "Dr Lim".to_string(),
                    doctor_email: "lim@example.org".to_string(),
                    date: NaiveDate::from_ymd_opt(2025, 6, 12).expect("date"),
                    time_range_text: "10:30am-11:30am".to_string(),
                    location: "Ward 2".to_string(),
                    students_text: String::new(),
                    change_type: None,
                    original_time: None,
                    change_reason: None,
                },
                false,
            )
            .expect("existing session should be created");
        let session_id = open(&harness);
        let record = harness
            .service
            .submit_availability(&session_id, &submission(vec![slot(12, 10, 11)]))
            .expect("submission should succeed");

        let result = harness.service.accept(record.id, &AcceptDecision::default());

        assert!(matches!(result, Err(ServiceError::Conflict(_))));
        assert_eq!(
            round_state(&harness, &session_id),
            RoundState::AvailabilitySubmitted
        );
        assert_eq!(
            harness.service.list_records().expect("list should succeed").len(),
            1
        );

        let forced = harness.service.accept(
            record.id,
            &AcceptDecision {
                override_conflicts: true,
                ..AcceptDecision::default()
            },
        );
        assert!(forced.is_ok());
    }

    #[test]
    fn request_change_opens_follow_up_round() {
        let harness = harness("ledger-change", None);
        let session_id = open(&harness);
        let record = harness
            .service
            .submit_availability(&session_id, &submission(vec![slot(12, 10, 11)]))
            .expect("submission should succeed");

        let follow_up = harness
            .service
            .request_change(
                record.id,
                &ChangeRequest {
                    candidate_slots: vec![slot(20, 9, 10)],
                    reason: Some("ward closed".to_string()),
                },
            )
            .expect("change request should succeed");

        assert_ne!(follow_up.session_id, session_id);
        assert_eq!(follow_up.previous_session_id.as_deref(), Some(session_id.as_str()));
        assert_eq!(follow_up.state, RoundState::OpenAvailabilityRequest);
        assert_eq!(round_state(&harness, &session_id), RoundState::ChangeRequested);
        assert!(
            pending_subjects(&harness)
                .contains(&"New timing requested: Bedside teaching".to_string())
        );

        harness
            .service
            .submit_availability(&follow_up.session_id, &submission(vec![slot(20, 9, 10)]))
            .expect("follow-up submission should succeed");
    }

    #[test]
    fn closed_round_rejects_submissions_as_expired() {
        let harness = harness("ledger-close", None);
        let session_id = open(&harness);

        harness
            .service
            .close_round(&session_id)
            .expect("close should succeed");

        let result = harness
            .service
            .submit_availability(&session_id, &submission(vec![slot(12, 10, 11)]));
        assert!(matches!(result, Err(ServiceError::Expired(_))));
        assert!(matches!(
            harness.service.close_round(&session_id),
            Err(ServiceError::InvalidTransition(_))
        ));
    }

    #[test]
    fn overdue_rounds_expire_only_with_a_ttl() {
        let with_ttl = harness("ledger-ttl", Some(48));
        let session_id = open(&with_ttl);
        with_ttl.clock.advance(Duration::hours(49));

        assert_eq!(
            with_ttl
                .service
                .expire_overdue_rounds()
                .expect("sweep should succeed"),
            vec![session_id.clone()]
        );
        assert_eq!(round_state(&with_ttl, &session_id), RoundState::Expired);

        let without_ttl = harness("ledger-no-ttl", None);
        let open_id = open(&without_ttl);
        without_ttl.clock.advance(Duration::days(30));
        assert!(
            without_ttl
                .service
                .expire_overdue_rounds()
                .expect("sweep should succeed")
                .is_empty()
        );
        assert_eq!(
            round_state(&without_ttl, &open_id),
            RoundState::OpenAvailabilityRequest
        );
    }

    #[test]
    fn ingested_reply_carries_times_onto_dates() {
        let harness = harness("ledger-ingest", None);

        let stored = harness
            .service
            .ingest_record(&NewNegotiationRecord {
                kind: NegotiationKind::Availability,
                session_name: "Tutorial".to_string(),
                from_name: "Dr Lim".to_string(),
                from_email: "lim@example.org".to_string(),
                to_email: None,
                original_session: None,
                new_session: None,
                reason: None,
                students_text: "John Tan (NUS)".to_string(),
                available_slots: vec![
                    "2pm-3pm".to_string(),
                    "9 Aug".to_string(),
                    "12 Aug".to_string(),
                ],
                session_id: None,
            })
            .expect("ingest should succeed");

        assert_eq!(stored.available_slots, vec!["9 Aug 2pm-3pm", "12 Aug 2pm-3pm"]);

        let committed = harness
            .service
            .accept(
                stored.id,
                &AcceptDecision {
                    slot_index: Some(1),
                    location: Some("Seminar room".to_string()),
                    override_conflicts: false,
                },
            )
            .expect("accept should succeed");
        assert_eq!(
            committed.session.date,
            NaiveDate::from_ymd_opt(2025, 8, 12).expect("date")
        );
    }

    #[test]
    fn ingested_reply_for_a_round_is_guarded() {
        let harness = harness("ledger-ingest-round", None);
        let session_id = open(&harness);
        let reply = NewNegotiationRecord {
            kind: NegotiationKind::Availability,
            session_name: "Bedside teaching".to_string(),
            from_name: "Dr Lim".to_string(),
            from_email: "LIM@example.org".to_string(),
            to_email: None,
            original_session: None,
            new_session: None,
            reason: None,
            students_text: String::new(),
            available_slots: vec!["12 June 2025 10am-11am".to_string()],
            session_id: Some(session_id.clone()),
        };

        harness
            .service
            .ingest_record(&reply)
            .expect("first reply should be stored");
        assert!(matches!(
            harness.service.ingest_record(&reply),
            Err(ServiceError::StaleRound(_))
        ));

        let stranger = NewNegotiationRecord {
            from_email: "someone@example.org".to_string(),
            session_id: Some(open(&harness)),
            ..reply
        };
        assert!(matches!(
            harness.service.ingest_record(&stranger),
            Err(ServiceError::Unauthorized(_))
        ));
    }

    #[test]
    fn accepted_change_request_reschedules_session() {
        let harness = harness("ledger-reschedule", None);
        let existing = harness
            .service
            .create_session(
                &NewScheduledSession {
                    session_name: "Tutorial".to_string(),
                    doctor_name: "Dr Lim".to_string(),
                    doctor_email: "lim@example.org".to_string(),
                    date: NaiveDate::from_ymd_opt(2025, 6, 12).expect("date"),
                    time_range_text: "2pm-3pm".to_string(),
                    location: "Seminar room".to_string(),
                    students_text: "John Tan".to_string(),
                    change_type: None,
                    original_time: None,
                    change_reason: None,
                },
                false,
            )
            .expect("session should be created");
        let record = harness
            .service
            .ingest_record(&NewNegotiationRecord {
                kind: NegotiationKind::ChangeRequest,
                session_name: "Tutorial".to_string(),
                from_name: "Dr Lim".to_string(),
                from_email: "lim@example.org".to_string(),
                to_email: None,
                original_session: Some("12 June 2025 (2pm \u{2013} 3pm)".to_string()),
                new_session: Some("4pm-5pm".to_string()),
                reason: Some("clinic overrun".to_string()),
                students_text: String::new(),
                available_slots: Vec::new(),
                session_id: None,
            })
            .expect("ingest should succeed");

        let committed = harness
            .service
            .accept(record.id, &AcceptDecision::default())
            .expect("accept should succeed");

        assert_eq!(committed.session.id, existing.session.id);
        assert_eq!(committed.session.time_range_text, "4pm-5pm");
        assert_eq!(committed.session.change_type.as_deref(), Some("rescheduled"));
        assert_eq!(committed.session.original_time.as_deref(), Some("2pm-3pm"));
        assert_eq!(
            committed.session.change_reason.as_deref(),
            Some("clinic overrun")
        );
        let sessions = harness
            .service
            .list_sessions(&SessionFilter::default())
            .expect("list should succeed");
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn only_change_requests_can_be_declined() {
        let harness = harness("ledger-decline", None);
        let session_id = open(&harness);
        let availability = harness
            .service
            .submit_availability(&session_id, &submission(vec![slot(12, 10, 11)]))
            .expect("submission should succeed");

        assert!(matches!(
            harness.service.decline(availability.id, None),
            Err(ServiceError::Validation(_))
        ));

        let change = harness
            .service
            .ingest_record(&NewNegotiationRecord {
                kind: NegotiationKind::ChangeRequest,
                session_name: "Tutorial".to_string(),
                from_name: "Dr Lim".to_string(),
                from_email: "lim@example.org".to_string(),
                to_email: None,
                original_session: None,
                new_session: Some("4pm-5pm".to_string()),
                reason: None,
                students_text: String::new(),
                available_slots: Vec::new(),
                session_id: None,
            })
            .expect("ingest should succeed");

        harness
            .service
            .decline(change.id, Some("no rooms"))
            .expect("decline should succeed");
        assert!(
            pending_subjects(&harness).contains(&"Change request declined: Tutorial".to_string())
        );
        assert_eq!(
            harness.service.list_records().expect("list should succeed").len(),
            1
        );
    }
}
