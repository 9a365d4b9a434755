use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rusqlite::Connection;
use thiserror::Error;

use crate::adapters::db;
use crate::adapters::db::{DbError, SessionFilter};
use crate::domain::conflict::{ConflictReport, SessionConflict, check_interval};
use crate::domain::models::{
    NewNotification, NewScheduledSession, OutboundNotification, ScheduledSession, Student,
};
use crate::domain::negotiation::{Clock, ExpiryPolicy, InvalidTransition, SubmissionRejection};
use crate::domain::students::{StudentResolution, resolve_students};
use crate::domain::time_range::{TimeRangeError, parse_time_range};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    StaleRound(String),
    #[error("{0}")]
    Expired(String),
    #[error("session overlaps {} existing session(s)", .0.conflicts.len())]
    Conflict(ConflictReport),
    #[error("{0}")]
    Unparsable(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error("database lock poisoned")]
    DbLockPoisoned,
    #[error("database operation failed: {0}")]
    Database(#[from] DbError),
}

impl From<SubmissionRejection> for ServiceError {
    fn from(rejection: SubmissionRejection) -> Self {
        let message = rejection.to_string();
        match rejection {
            SubmissionRejection::NotFound(session_id) => {
                Self::NotFound(format!("scheduling round {session_id}"))
            }
            SubmissionRejection::Unauthorized { .. } => Self::Unauthorized(message),
            SubmissionRejection::StaleRound(_) => Self::StaleRound(message),
            SubmissionRejection::Expired(_) => Self::Expired(message),
        }
    }
}

impl From<rusqlite::Error> for ServiceError {
    fn from(error: rusqlite::Error) -> Self {
        Self::Database(DbError::from(error))
    }
}

pub(crate) fn unparsable(text: &str, error: TimeRangeError) -> ServiceError {
    ServiceError::Unparsable(format!("cannot read time range {text:?}: {error}"))
}

/// A session as written, with the roster resolution and any conflicts it was forced past.
#[derive(Debug, Clone, PartialEq)]
pub struct CommittedSession {
    pub session: ScheduledSession,
    pub students: StudentResolution,
    pub overridden_conflicts: Vec<SessionConflict>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConflictQuery {
    pub doctor_email: String,
    pub date: NaiveDate,
    pub time_range_text: String,
    pub exclude_session_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub expiry: ExpiryPolicy,
    pub booking_link_base: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            expiry: ExpiryPolicy::default(),
            booking_link_base: "http://localhost:3000/doctor-session-booking".to_string(),
        }
    }
}

pub trait SessionQueryHandler {
    fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<ScheduledSession>, ServiceError>;
    fn get_session(&self, id: i64) -> Result<ScheduledSession, ServiceError>;
    fn session_students(&self, id: i64) -> Result<Vec<Student>, ServiceError>;
    fn check_conflicts(&self, query: &ConflictQuery) -> Result<ConflictReport, ServiceError>;
    fn pending_notifications(&self, limit: u32) -> Result<Vec<OutboundNotification>, ServiceError>;
    fn get_schema_version(&self) -> Result<u32, ServiceError>;
}

pub trait SessionCommandHandler {
    fn create_session(
        &self,
        new_session: &NewScheduledSession,
        override_conflicts: bool,
    ) -> Result<CommittedSession, ServiceError>;
    fn update_session(
        &self,
        id: i64,
        changes: &NewScheduledSession,
        override_conflicts: bool,
    ) -> Result<CommittedSession, ServiceError>;
    fn set_session_read(&self, id: i64, is_read: bool) -> Result<ScheduledSession, ServiceError>;
    fn delete_session(&self, id: i64) -> Result<(), ServiceError>;
    fn resolve_session_students(&self, id: i64) -> Result<StudentResolution, ServiceError>;
}

#[derive(Clone)]
pub struct SqliteSessionService {
    connection: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock + Send + Sync>,
    settings: ServiceSettings,
}

impl SqliteSessionService {
    pub fn new(
        connection: Arc<Mutex<Connection>>,
        clock: Arc<dyn Clock + Send + Sync>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            connection,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Year assumed for slot text that omits one.
    pub fn current_year(&self) -> i32 {
        self.clock.now().year()
    }

    pub(crate) fn now_text(&self) -> String {
        db::format_timestamp(self.clock.now())
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, DbError>,
    ) -> Result<T, ServiceError> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| ServiceError::DbLockPoisoned)?;
        op(&connection).map_err(ServiceError::from)
    }

    /// Runs `op` in one transaction; any error rolls every write back.
    pub(crate) fn with_transaction<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let mut connection = self
            .connection
            .lock()
            .map_err(|_| ServiceError::DbLockPoisoned)?;
        let transaction = connection.transaction()?;
        let value = op(&transaction)?;
        transaction.commit()?;
        Ok(value)
    }

    /// Conflict-checks, writes and re-links one session inside the caller's transaction.
    pub(crate) fn commit_session(
        &self,
        connection: &Connection,
        existing_id: Option<i64>,
        session: &NewScheduledSession,
        override_conflicts: bool,
    ) -> Result<CommittedSession, ServiceError> {
        validate_session(session)?;

        let interval = parse_time_range(&session.time_range_text)
            .map_err(|error| unparsable(&session.time_range_text, error))?;
        let same_day =
            db::sessions_for_doctor_on(connection, &session.doctor_email, session.date, existing_id)?;
        let report = check_interval(&interval, &same_day);

        if report.has_conflicts() {
            if !override_conflicts {
                tracing::info!(
                    doctor_email = %session.doctor_email,
                    date = %session.date,
                    time_range = %session.time_range_text,
                    conflicts = report.conflicts.len(),
                    "session rejected due to conflicts"
                );
                return Err(ServiceError::Conflict(report));
            }

            tracing::warn!(
                doctor_email = %session.doctor_email,
                date = %session.date,
                time_range = %session.time_range_text,
                conflicts = report.conflicts.len(),
                "committing session despite conflicts"
            );
        }

        let now = self.now_text();
        let id = match existing_id {
            Some(id) => {
                if !db::update_scheduled_session(connection, id, session, &now)? {
                    return Err(ServiceError::NotFound(format!("scheduled session {id}")));
                }
                id
            }
            None => db::insert_scheduled_session(connection, session, &now)?,
        };

        let students = link_students(connection, id, &session.students_text)?;
        let stored = db::get_scheduled_session(connection, id)?
            .ok_or_else(|| ServiceError::NotFound(format!("scheduled session {id}")))?;

        tracing::info!(
            session_id = id,
            session_name = %stored.session_name,
            doctor_email = %stored.doctor_email,
            date = %stored.date,
            linked_students = students.linked.len(),
            unmatched_students = students.unmatched.len(),
            "scheduled session committed"
        );

        Ok(CommittedSession {
            session: stored,
            students,
            overridden_conflicts: report.conflicts,
        })
    }

    pub(crate) fn queue_notification(
        &self,
        connection: &Connection,
        notification: &NewNotification,
    ) -> Result<i64, ServiceError> {
        let id = db::insert_notification(connection, notification, &self.now_text())?;

        tracing::info!(
            notification_id = id,
            doctor_email = %notification.doctor_email,
            subject = %notification.subject,
            "notification queued"
        );

        Ok(id)
    }
}

fn link_students(
    connection: &Connection,
    scheduled_session_id: i64,
    students_text: &str,
) -> Result<StudentResolution, ServiceError> {
    let directory = db::student_directory(connection)?;
    let resolution = resolve_students(students_text, &directory);
    db::replace_session_students(connection, scheduled_session_id, &resolution.student_ids())?;

    if !resolution.unmatched.is_empty() {
        tracing::warn!(
            scheduled_session_id,
            unmatched = ?resolution.unmatched,
            "students not found in directory"
        );
    }

    Ok(resolution)
}

fn validate_session(session: &NewScheduledSession) -> Result<(), ServiceError> {
    let required = [
        ("sessionName", &session.session_name),
        ("doctorName", &session.doctor_name),
        ("doctorEmail", &session.doctor_email),
        ("timeRangeText", &session.time_range_text),
    ];

    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(ServiceError::Validation(format!("{field} is required")));
        }
    }

    Ok(())
}

impl SessionQueryHandler for SqliteSessionService {
    fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<ScheduledSession>, ServiceError> {
        self.with_connection(|connection| db::list_scheduled_sessions(connection, filter))
    }

    fn get_session(&self, id: i64) -> Result<ScheduledSession, ServiceError> {
        self.with_connection(|connection| db::get_scheduled_session(connection, id))?
            .ok_or_else(|| ServiceError::NotFound(format!("scheduled session {id}")))
    }

    fn session_students(&self, id: i64) -> Result<Vec<Student>, ServiceError> {
        self.with_connection(|connection| db::list_session_students(connection, id))
    }

    fn check_conflicts(&self, query: &ConflictQuery) -> Result<ConflictReport, ServiceError> {
        let candidate = parse_time_range(&query.time_range_text)
            .map_err(|error| unparsable(&query.time_range_text, error))?;
        let same_day = self.with_connection(|connection| {
            db::sessions_for_doctor_on(
                connection,
                &query.doctor_email,
                query.date,
                query.exclude_session_id,
            )
        })?;

        Ok(check_interval(&candidate, &same_day))
    }

    fn pending_notifications(&self, limit: u32) -> Result<Vec<OutboundNotification>, ServiceError> {
        self.with_connection(|connection| db::list_pending_notifications(connection, limit))
    }

    fn get_schema_version(&self) -> Result<u32, ServiceError> {
        self.with_connection(db::schema_version)
    }
}

impl SessionCommandHandler for SqliteSessionService {
    fn create_session(
        &self,
        new_session: &NewScheduledSession,
        override_conflicts: bool,
    ) -> Result<CommittedSession, ServiceError> {
        self.with_transaction(|connection| {
            self.commit_session(connection, None, new_session, override_conflicts)
        })
    }

    fn update_session(
        &self,
        id: i64,
        changes: &NewScheduledSession,
        override_conflicts: bool,
    ) -> Result<CommittedSession, ServiceError> {
        self.with_transaction(|connection| {
            self.commit_session(connection, Some(id), changes, override_conflicts)
        })
    }

    fn set_session_read(&self, id: i64, is_read: bool) -> Result<ScheduledSession, ServiceError> {
        let now = self.now_text();
        self.with_transaction(|connection| {
            if !db::set_session_read(connection, id, is_read, &now)? {
                return Err(ServiceError::NotFound(format!("scheduled session {id}")));
            }

            db::get_scheduled_session(connection, id)?
                .ok_or_else(|| ServiceError::NotFound(format!("scheduled session {id}")))
        })
    }

    fn delete_session(&self, id: i64) -> Result<(), ServiceError> {
        let deleted =
            self.with_connection(|connection| db::delete_scheduled_session(connection, id))?;
        if !deleted {
            return Err(ServiceError::NotFound(format!("scheduled session {id}")));
        }

        tracing::info!(session_id = id, "scheduled session deleted");
        Ok(())
    }

    fn resolve_session_students(&self, id: i64) -> Result<StudentResolution, ServiceError> {
        self.with_transaction(|connection| {
            let session = db::get_scheduled_session(connection, id)?
                .ok_or_else(|| ServiceError::NotFound(format!("scheduled session {id}")))?;
            link_students(connection, id, &session.students_text)
        })
    }
}
