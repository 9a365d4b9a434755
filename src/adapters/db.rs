use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use thiserror::Error;

use crate::domain::models::{
    Doctor, EmailSessionRequest, NegotiationKind, NegotiationRecord, NewNegotiationRecord,
    NewNotification, NewScheduledSession, NewStudent, OutboundNotification, ScheduledSession,
    Student,
};
use crate::domain::negotiation::RoundState;
use crate::domain::slots::Slot;

pub const LATEST_SCHEMA_VERSION: u32 = 3;

const MIGRATIONS: &[(u32, &str)] = &[
    (
        1,
        r#"
CREATE TABLE IF NOT EXISTS students (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    school TEXT,
    year_of_study TEXT
);

CREATE TABLE IF NOT EXISTS doctors (
    mcr_number TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_doctors_email
ON doctors (email);

CREATE TABLE IF NOT EXISTS scheduled_sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_name TEXT NOT NULL,
    doctor_name TEXT NOT NULL,
    doctor_email TEXT NOT NULL,
    date TEXT NOT NULL,
    time_range_text TEXT NOT NULL,
    location TEXT NOT NULL,
    students_text TEXT NOT NULL DEFAULT '',
    change_type TEXT,
    original_time TEXT,
    change_reason TEXT,
    is_read INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scheduled_sessions_doctor_date
ON scheduled_sessions (doctor_email, date);

CREATE TABLE IF NOT EXISTS session_students (
    scheduled_session_id INTEGER NOT NULL REFERENCES scheduled_sessions (id) ON DELETE CASCADE,
    student_id INTEGER NOT NULL REFERENCES students (id) ON DELETE CASCADE,
    PRIMARY KEY (scheduled_session_id, student_id)
);
"#,
    ),
    (
        2,
        r#"
CREATE TABLE IF NOT EXISTS email_session_requests (
    session_id TEXT PRIMARY KEY,
    session_name TEXT NOT NULL,
    session_count INTEGER NOT NULL DEFAULT 1,
    doctor_mcrs TEXT NOT NULL,
    student_ids TEXT NOT NULL,
    candidate_slots TEXT NOT NULL,
    location TEXT,
    state TEXT NOT NULL,
    previous_session_id TEXT,
    opened_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_email_session_requests_state_opened_at
ON email_session_requests (state, opened_at);

CREATE TABLE IF NOT EXISTS negotiation_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    session_name TEXT NOT NULL,
    from_name TEXT NOT NULL,
    from_email TEXT NOT NULL,
    to_email TEXT,
    original_session TEXT,
    new_session TEXT,
    reason TEXT,
    students_text TEXT NOT NULL DEFAULT '',
    available_slots TEXT NOT NULL DEFAULT '[]',
    session_id TEXT,
    received_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_negotiation_records_availability_session
ON negotiation_records (session_id)
WHERE kind = 'availability' AND session_id IS NOT NULL;
"#,
    ),
    (
        3,
        r#"
CREATE TABLE IF NOT EXISTS outbound_notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    doctor_email TEXT NOT NULL,
    subject TEXT NOT NULL,
    body TEXT NOT NULL,
    session_id TEXT,
    created_at TEXT NOT NULL,
    delivered_at TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT
);

CREATE INDEX IF NOT EXISTS idx_outbound_notifications_pending
ON outbound_notifications (delivered_at, id);
"#,
    ),
];

const SESSION_COLUMNS: &str = "id, session_name, doctor_name, doctor_email, date, time_range_text, \
     location, students_text, change_type, original_time, change_reason, is_read, created_at, updated_at";

const RECORD_COLUMNS: &str = "id, kind, session_name, from_name, from_email, to_email, \
     original_session, new_session, reason, students_text, available_slots, session_id, received_at";

const ROUND_COLUMNS: &str = "session_id, session_name, session_count, doctor_mcrs, student_ids, \
     candidate_slots, location, state, previous_session_id, opened_at, updated_at";

const NOTIFICATION_COLUMNS: &str =
    "id, doctor_email, subject, body, session_id, created_at, delivered_at, attempts, last_error";

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("failed to encode json column: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported schema version {current}; latest supported is {latest}")]
    UnsupportedSchemaVersion { current: u32, latest: u32 },
}

impl DbError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(rusqlite::Error::SqliteFailure(failure, _))
                if failure.code == ErrorCode::ConstraintViolation
        )
    }
}

#[derive(Debug, Error)]
#[error("invalid stored value {value:?} in column {column}")]
struct InvalidColumnValue {
    column: &'static str,
    value: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionFilter {
    pub date: Option<NaiveDate>,
    pub doctor_email: Option<String>,
}

pub fn open_connection(path: &str) -> Result<Connection, DbError> {
    let connection = Connection::open(path)?;
    connection.pragma_update(None, "foreign_keys", true)?;
    Ok(connection)
}

pub fn run_migrations(connection: &mut Connection) -> Result<(), DbError> {
    let current_version = schema_version(connection)?;

    if current_version > LATEST_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            current: current_version,
            latest: LATEST_SCHEMA_VERSION,
        });
    }

    let transaction = connection.transaction()?;

    for (version, sql) in MIGRATIONS {
        if *version > current_version {
            transaction.execute_batch(sql)?;
            transaction.pragma_update(None, "user_version", version)?;
        }
    }

    transaction.commit()?;

    Ok(())
}

pub fn schema_version(connection: &Connection) -> Result<u32, DbError> {
    let version = connection.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn insert_student(connection: &Connection, student: &NewStudent) -> Result<i64, DbError> {
    connection.execute(
        "INSERT INTO students (name, school, year_of_study) VALUES (?1, ?2, ?3)",
        params![student.name.trim(), student.school, student.year_of_study],
    )?;

    Ok(connection.last_insert_rowid())
}

/// Canonical name → id map used for roster resolution.
pub fn student_directory(connection: &Connection) -> Result<HashMap<String, i64>, DbError> {
    let mut statement = connection.prepare("SELECT name, id FROM students")?;
    let rows = statement.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

    let mut directory = HashMap::new();
    for row in rows {
        let (name, id): (String, i64) = row?;
        directory.insert(name, id);
    }

    Ok(directory)
}

pub fn get_students_by_ids(
    connection: &Connection,
    student_ids: &BTreeSet<i64>,
) -> Result<Vec<Student>, DbError> {
    let ids = serde_json::to_string(student_ids)?;
    let mut statement = connection.prepare(
        "SELECT id, name, school, year_of_study
         FROM students
         WHERE id IN (SELECT value FROM json_each(?1))
         ORDER BY name, id",
    )?;
    let rows = statement.query_map(params![ids], student_from_row)?;

    collect_rows(rows)
}

pub fn upsert_doctor(connection: &Connection, doctor: &Doctor) -> Result<(), DbError> {
    connection.execute(
        "INSERT INTO doctors (mcr_number, name, email) VALUES (?1, ?2, ?3)
         ON CONFLICT (mcr_number) DO UPDATE SET name = excluded.name, email = excluded.email",
        params![doctor.mcr_number.trim(), doctor.name, doctor.email.trim()],
    )?;

    Ok(())
}

pub fn get_doctor(connection: &Connection, mcr_number: &str) -> Result<Option<Doctor>, DbError> {
    let doctor = connection
        .query_row(
            "SELECT mcr_number, name, email FROM doctors WHERE mcr_number = ?1",
            params![mcr_number.trim()],
            doctor_from_row,
        )
        .optional()?;

    Ok(doctor)
}

pub fn find_doctor_by_email(connection: &Connection, email: &str) -> Result<Option<Doctor>, DbError> {
    let doctor = connection
        .query_row(
            "SELECT mcr_number, name, email FROM doctors
             WHERE lower(email) = lower(?1)
             ORDER BY mcr_number
             LIMIT 1",
            params![email.trim()],
            doctor_from_row,
        )
        .optional()?;

    Ok(doctor)
}

pub fn insert_scheduled_session(
    connection: &Connection,
    session: &NewScheduledSession,
    now: &str,
) -> Result<i64, DbError> {
    connection.execute(
        "INSERT INTO scheduled_sessions (
            session_name, doctor_name, doctor_email, date, time_range_text, location,
            students_text, change_type, original_time, change_reason, is_read, created_at, updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?11)",
        params![
            session.session_name,
            session.doctor_name,
            session.doctor_email,
            session.date.format(DATE_FORMAT).to_string(),
            session.time_range_text,
            session.location,
            session.students_text,
            session.change_type,
            session.original_time,
            session.change_reason,
            now,
        ],
    )?;

    Ok(connection.last_insert_rowid())
}

/// Overwrites the editable fields; `is_read` and `created_at` are left alone.
pub fn update_scheduled_session(
    connection: &Connection,
    id: i64,
    session: &NewScheduledSession,
    now: &str,
) -> Result<bool, DbError> {
    let changed = connection.execute(
        "UPDATE scheduled_sessions SET
            session_name = ?2, doctor_name = ?3, doctor_email = ?4, date = ?5,
            time_range_text = ?6, location = ?7, students_text = ?8, change_type = ?9,
            original_time = ?10, change_reason = ?11, updated_at = ?12
         WHERE id = ?1",
        params![
            id,
            session.session_name,
            session.doctor_name,
            session.doctor_email,
            session.date.format(DATE_FORMAT).to_string(),
            session.time_range_text,
            session.location,
            session.students_text,
            session.change_type,
            session.original_time,
            session.change_reason,
            now,
        ],
    )?;

    Ok(changed > 0)
}

pub fn get_scheduled_session(
    connection: &Connection,
    id: i64,
) -> Result<Option<ScheduledSession>, DbError> {
    let session = connection
        .query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM scheduled_sessions WHERE id = ?1"),
            params![id],
            session_from_row,
        )
        .optional()?;

    Ok(session)
}

pub fn list_scheduled_sessions(
    connection: &Connection,
    filter: &SessionFilter,
) -> Result<Vec<ScheduledSession>, DbError> {
    let date = filter
        .date
        .map(|date| date.format(DATE_FORMAT).to_string());
    let mut statement = connection.prepare(&format!(
        "SELECT {SESSION_COLUMNS}
         FROM scheduled_sessions
         WHERE (?1 IS NULL OR date = ?1)
           AND (?2 IS NULL OR lower(doctor_email) = lower(?2))
         ORDER BY date, time_range_text, id"
    ))?;
    let rows = statement.query_map(params![date, filter.doctor_email], session_from_row)?;

    collect_rows(rows)
}

/// Sessions booked for one doctor on one date, the input set for a conflict check.
pub fn sessions_for_doctor_on(
    connection: &Connection,
    doctor_email: &str,
    date: NaiveDate,
    exclude_id: Option<i64>,
) -> Result<Vec<ScheduledSession>, DbError> {
    let mut statement = connection.prepare(&format!(
        "SELECT {SESSION_COLUMNS}
         FROM scheduled_sessions
         WHERE lower(doctor_email) = lower(?1)
           AND date = ?2
           AND (?3 IS NULL OR id <> ?3)
         ORDER BY id"
    ))?;
    let rows = statement.query_map(
        params![
            doctor_email.trim(),
            date.format(DATE_FORMAT).to_string(),
            exclude_id
        ],
        session_from_row,
    )?;

    collect_rows(rows)
}

pub fn find_sessions_by_doctor_and_name(
    connection: &Connection,
    doctor_email: &str,
    session_name: &str,
) -> Result<Vec<ScheduledSession>, DbError> {
    let mut statement = connection.prepare(&format!(
        "SELECT {SESSION_COLUMNS}
         FROM scheduled_sessions
         WHERE lower(doctor_email) = lower(?1)
           AND lower(session_name) = lower(?2)
         ORDER BY date DESC, id DESC"
    ))?;
    let rows = statement.query_map(
        params![doctor_email.trim(), session_name.trim()],
        session_from_row,
    )?;

    collect_rows(rows)
}

pub fn set_session_read(
    connection: &Connection,
    id: i64,
    is_read: bool,
    now: &str,
) -> Result<bool, DbError> {
    let changed = connection.execute(
        "UPDATE scheduled_sessions SET is_read = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, is_read, now],
    )?;

    Ok(changed > 0)
}

pub fn delete_scheduled_session(connection: &Connection, id: i64) -> Result<bool, DbError> {
    let deleted = connection.execute("DELETE FROM scheduled_sessions WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

/// Drops every link of the session and inserts `student_ids`. Callers wrap this in a
/// transaction so the swap is atomic.
pub fn replace_session_students(
    connection: &Connection,
    scheduled_session_id: i64,
    student_ids: &[i64],
) -> Result<(), DbError> {
    connection.execute(
        "DELETE FROM session_students WHERE scheduled_session_id = ?1",
        params![scheduled_session_id],
    )?;

    let mut statement = connection.prepare(
        "INSERT OR IGNORE INTO session_students (scheduled_session_id, student_id) VALUES (?1, ?2)",
    )?;
    for student_id in student_ids {
        statement.execute(params![scheduled_session_id, student_id])?;
    }

    Ok(())
}

pub fn list_session_students(
    connection: &Connection,
    scheduled_session_id: i64,
) -> Result<Vec<Student>, DbError> {
    let mut statement = connection.prepare(
        "SELECT s.id, s.name, s.school, s.year_of_study
         FROM session_students ss
         JOIN students s ON s.id = ss.student_id
         WHERE ss.scheduled_session_id = ?1
         ORDER BY s.name, s.id",
    )?;
    let rows = statement.query_map(params![scheduled_session_id], student_from_row)?;

    collect_rows(rows)
}

pub fn insert_round(connection: &Connection, round: &EmailSessionRequest) -> Result<(), DbError> {
    connection.execute(
        &format!(
            "INSERT INTO email_session_requests ({ROUND_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
        ),
        params![
            round.session_id,
            round.session_name,
            round.session_count,
            serde_json::to_string(&round.doctor_mcrs)?,
            serde_json::to_string(&round.student_ids)?,
            serde_json::to_string(&round.candidate_slots)?,
            round.location,
            round.state.as_str(),
            round.previous_session_id,
            format_timestamp(round.opened_at),
            format_timestamp(round.updated_at),
        ],
    )?;

    Ok(())
}

pub fn get_round(
    connection: &Connection,
    session_id: &str,
) -> Result<Option<EmailSessionRequest>, DbError> {
    let round = connection
        .query_row(
            &format!("SELECT {ROUND_COLUMNS} FROM email_session_requests WHERE session_id = ?1"),
            params![session_id.trim()],
            round_from_row,
        )
        .optional()?;

    Ok(round)
}

pub fn list_rounds_in_state(
    connection: &Connection,
    state: RoundState,
) -> Result<Vec<EmailSessionRequest>, DbError> {
    let mut statement = connection.prepare(&format!(
        "SELECT {ROUND_COLUMNS}
         FROM email_session_requests
         WHERE state = ?1
         ORDER BY opened_at, session_id"
    ))?;
    let rows = statement.query_map(params![state.as_str()], round_from_row)?;

    collect_rows(rows)
}

pub fn update_round_state(
    connection: &Connection,
    session_id: &str,
    state: RoundState,
    now: &str,
) -> Result<bool, DbError> {
    let changed = connection.execute(
        "UPDATE email_session_requests SET state = ?2, updated_at = ?3 WHERE session_id = ?1",
        params![session_id, state.as_str(), now],
    )?;

    Ok(changed > 0)
}

pub fn insert_negotiation_record(
    connection: &Connection,
    record: &NewNegotiationRecord,
    received_at: &str,
) -> Result<i64, DbError> {
    connection.execute(
        "INSERT INTO negotiation_records (
            kind, session_name, from_name, from_email, to_email, original_session,
            new_session, reason, students_text, available_slots, session_id, received_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            record.kind.as_str(),
            record.session_name,
            record.from_name,
            record.from_email,
            record.to_email,
            record.original_session,
            record.new_session,
            record.reason,
            record.students_text,
            serde_json::to_string(&record.available_slots)?,
            record.session_id,
            received_at,
        ],
    )?;

    Ok(connection.last_insert_rowid())
}

pub fn get_negotiation_record(
    connection: &Connection,
    id: i64,
) -> Result<Option<NegotiationRecord>, DbError> {
    let record = connection
        .query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM negotiation_records WHERE id = ?1"),
            params![id],
            record_from_row,
        )
        .optional()?;

    Ok(record)
}

pub fn list_negotiation_records(connection: &Connection) -> Result<Vec<NegotiationRecord>, DbError> {
    let mut statement = connection.prepare(&format!(
        "SELECT {RECORD_COLUMNS} FROM negotiation_records ORDER BY received_at DESC, id DESC"
    ))?;
    let rows = statement.query_map([], record_from_row)?;

    collect_rows(rows)
}

pub fn delete_negotiation_record(connection: &Connection, id: i64) -> Result<bool, DbError> {
    let deleted =
        connection.execute("DELETE FROM negotiation_records WHERE id = ?1", params![id])?;
    Ok(deleted > 0)
}

pub fn insert_notification(
    connection: &Connection,
    notification: &NewNotification,
    created_at: &str,
) -> Result<i64, DbError> {
    connection.execute(
        "INSERT INTO outbound_notifications (doctor_email, subject, body, session_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            notification.doctor_email,
            notification.subject,
            notification.body,
            notification.session_id,
            created_at,
        ],
    )?;

    Ok(connection.last_insert_rowid())
}

pub fn list_pending_notifications(
    connection: &Connection,
    limit: u32,
) -> Result<Vec<OutboundNotification>, DbError> {
    let mut statement = connection.prepare(&format!(
        "SELECT {NOTIFICATION_COLUMNS}
         FROM outbound_notifications
         WHERE delivered_at IS NULL
         ORDER BY id
         LIMIT ?1"
    ))?;
    let rows = statement.query_map(params![i64::from(limit)], notification_from_row)?;

    collect_rows(rows)
}

pub fn mark_notification_delivered(
    connection: &Connection,
    id: i64,
    delivered_at: &str,
) -> Result<bool, DbError> {
    let changed = connection.execute(
        "UPDATE outbound_notifications
         SET delivered_at = ?2, attempts = attempts + 1, last_error = NULL
         WHERE id = ?1",
        params![id, delivered_at],
    )?;

    Ok(changed > 0)
}

pub fn record_notification_failure(
    connection: &Connection,
    id: i64,
    error: &str,
) -> Result<bool, DbError> {
    let changed = connection.execute(
        "UPDATE outbound_notifications SET attempts = attempts + 1, last_error = ?2 WHERE id = ?1",
        params![id, error],
    )?;

    Ok(changed > 0)
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>, DbError> {
    let mut items = Vec::new();
    for row in rows {
        items.push(row?);
    }

    Ok(items)
}

fn student_from_row(row: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        name: row.get(1)?,
        school: row.get(2)?,
        year_of_study: row.get(3)?,
    })
}

fn doctor_from_row(row: &Row<'_>) -> rusqlite::Result<Doctor> {
    Ok(Doctor {
        mcr_number: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduledSession> {
    let date: String = row.get(4)?;

    Ok(ScheduledSession {
        id: row.get(0)?,
        session_name: row.get(1)?,
        doctor_name: row.get(2)?,
        doctor_email: row.get(3)?,
        date: NaiveDate::parse_from_str(&date, DATE_FORMAT)
            .map_err(|error| conversion_failure(4, error))?,
        time_range_text: row.get(5)?,
        location: row.get(6)?,
        students_text: row.get(7)?,
        change_type: row.get(8)?,
        original_time: row.get(9)?,
        change_reason: row.get(10)?,
        is_read: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<NegotiationRecord> {
    let kind: String = row.get(1)?;
    let available_slots: String = row.get(10)?;

    Ok(NegotiationRecord {
        id: row.get(0)?,
        kind: NegotiationKind::parse(&kind).ok_or_else(|| {
            conversion_failure(
                1,
                InvalidColumnValue {
                    column: "kind",
                    value: kind.clone(),
                },
            )
        })?,
        session_name: row.get(2)?,
        from_name: row.get(3)?,
        from_email: row.get(4)?,
        to_email: row.get(5)?,
        original_session: row.get(6)?,
        new_session: row.get(7)?,
        reason: row.get(8)?,
        students_text: row.get(9)?,
        available_slots: serde_json::from_str(&available_slots)
            .map_err(|error| conversion_failure(10, error))?,
        session_id: row.get(11)?,
        received_at: row.get(12)?,
    })
}

fn round_from_row(row: &Row<'_>) -> rusqlite::Result<EmailSessionRequest> {
    let doctor_mcrs: String = row.get(3)?;
    let student_ids: String = row.get(4)?;
    let candidate_slots: String = row.get(5)?;
    let state: String = row.get(7)?;
    let opened_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;

    Ok(EmailSessionRequest {
        session_id: row.get(0)?,
        session_name: row.get(1)?,
        session_count: row.get(2)?,
        doctor_mcrs: serde_json::from_str(&doctor_mcrs)
            .map_err(|error| conversion_failure(3, error))?,
        student_ids: serde_json::from_str(&student_ids)
            .map_err(|error| conversion_failure(4, error))?,
        candidate_slots: serde_json::from_str::<Vec<Slot>>(&candidate_slots)
            .map_err(|error| conversion_failure(5, error))?,
        location: row.get(6)?,
        state: RoundState::parse(&state).ok_or_else(|| {
            conversion_failure(
                7,
                InvalidColumnValue {
                    column: "state",
                    value: state.clone(),
                },
            )
        })?,
        previous_session_id: row.get(8)?,
        opened_at: parse_timestamp(9, &opened_at)?,
        updated_at: parse_timestamp(10, &updated_at)?,
    })
}

fn notification_from_row(row: &Row<'_>) -> rusqlite::Result<OutboundNotification> {
    Ok(OutboundNotification {
        id: row.get(0)?,
        doctor_email: row.get(1)?,
        subject: row.get(2)?,
        body: row.get(3)?,
        session_id: row.get(4)?,
        created_at: row.get(5)?,
        delivered_at: row.get(6)?,
        attempts: row.get(7)?,
        last_error: row.get(8)?,
    })
}

fn parse_timestamp(index: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|error| conversion_failure(index, error))
}

fn conversion_failure<E>(index: usize, error: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
    use rusqlite::params;

    use super::{
        LATEST_SCHEMA_VERSION, SessionFilter, delete_negotiation_record, delete_scheduled_session,
        find_doctor_by_email, get_round, get_scheduled_session, insert_negotiation_record,
        insert_notification, insert_round, insert_scheduled_session, insert_student,
        list_negotiation_records, list_pending_notifications, list_scheduled_sessions,
        list_session_students, mark_notification_delivered, open_connection,
        record_notification_failure, replace_session_students, run_migrations, schema_version,
        sessions_for_doctor_on, student_directory, update_round_state, upsert_doctor,
    };
    use crate::domain::models::{
        Doctor, EmailSessionRequest, NegotiationKind, NewNegotiationRecord, NewNotification,
        NewScheduledSession, NewStudent,
    };
    use crate::domain::negotiation::RoundState;
    use crate::domain::slots::Slot;

    const NOW: &str = "2025-06-01T09:00:00.000Z";

    fn temp_db_path(name: &str) -> PathBuf {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join(name);
        std::mem::forget(dir);
        path
    }

    fn migrated(name: &str) -> rusqlite::Connection {
        let db_path = temp_db_path(name);
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");
        run_migrations(&mut connection).expect("migrations should succeed");
        connection
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).expect("valid date")
    }

    fn new_session(day: u32, time: &str) -> NewScheduledSession {
        NewScheduledSession {
            session_name: "Bedside teaching".to_string(),
            doctor_name: "Dr Lim".to_string(),
            doctor_email: "lim@example.org".to_string(),
            date: date(day),
            time_range_text: time.to_string(),
            location: "Ward 5".to_string(),
            students_text: "John Tan (NUS)".to_string(),
            change_type: None,
            original_time: None,
            change_reason: None,
        }
    }

    fn availability(session_id: &str) -> NewNegotiationRecord {
        NewNegotiationRecord {
            kind: NegotiationKind::Availability,
            session_name: "Bedside teaching".to_string(),
            from_name: "Dr Lim".to_string(),
            from_email: "lim@example.org".to_string(),
            to_email: None,
            original_session: None,
            new_session: None,
            reason: None,
            students_text: "John Tan".to_string(),
            available_slots: vec!["12 June 2025 2pm-3pm".to_string()],
            session_id: Some(session_id.to_string()),
        }
    }

    #[test]
    fn migrates_fresh_database_to_latest_version() {
        let connection = migrated("fresh.sqlite");

        let version = schema_version(&connection).expect("schema version should be queryable");
        assert_eq!(version, LATEST_SCHEMA_VERSION);

        for table in [
            "students",
            "doctors",
            "scheduled_sessions",
            "session_students",
            "email_session_requests",
            "negotiation_records",
            "outbound_notifications",
        ] {
            let table_exists: i64 = connection
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    params![table],
                    |row| row.get(0),
                )
                .expect("table check should work");
            assert_eq!(table_exists, 1, "missing table {table}");
        }
    }

    #[test]
    fn migrations_are_idempotent() {
        let db_path = temp_db_path("idempotent.sqlite");
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");

        run_migrations(&mut connection).expect("first migration run should succeed");
        insert_student(
            &connection,
            &NewStudent {
                name: "John Tan".to_string(),
                school: Some("NUS".to_string()),
                year_of_study: None,
            },
        )
        .expect("insert should succeed");
        run_migrations(&mut connection).expect("second migration run should succeed");

        let version = schema_version(&connection).expect("schema version should be queryable");
        assert_eq!(version, LATEST_SCHEMA_VERSION);
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM students", [], |row| row.get(0))
            .expect("count query should succeed");
        assert_eq!(count, 1);
    }

    #[test]
    fn rejects_newer_schema_versions() {
        let db_path = temp_db_path("future.sqlite");
        let mut connection =
            open_connection(db_path.to_string_lossy().as_ref()).expect("db connection should open");
        connection
            .pragma_update(None, "user_version", LATEST_SCHEMA_VERSION + 1)
            .expect("pragma should update");

        assert!(run_migrations(&mut connection).is_err());
    }

    #[test]
    fn filters_sessions_by_date_and_doctor() {
        let connection = migrated("sessions-filter.sqlite");
        insert_scheduled_session(&connection, &new_session(12, "2pm-3pm"), NOW)
            .expect("insert should succeed");
        insert_scheduled_session(&connection, &new_session(13, "2pm-3pm"), NOW)
            .expect("insert should succeed");
        let mut other_doctor = new_session(12, "9am-10am");
        other_doctor.doctor_email = "tan@example.org".to_string();
        insert_scheduled_session(&connection, &other_doctor, NOW).expect("insert should succeed");

        let on_date = list_scheduled_sessions(
            &connection,
            &SessionFilter {
                date: Some(date(12)),
                doctor_email: None,
            },
        )
        .expect("query should succeed");
        let for_doctor = list_scheduled_sessions(
            &connection,
            &SessionFilter {
                date: None,
                doctor_email: Some("LIM@example.org".to_string()),
            },
        )
        .expect("query should succeed");

        assert_eq!(on_date.len(), 2);
        assert_eq!(for_doctor.len(), 2);
        assert!(for_doctor.iter().all(|s| s.doctor_email == "lim@example.org"));
    }

    #[test]
    fn conflict_candidates_exclude_the_edited_session() {
        let connection = migrated("sessions-doctor-day.sqlite");
        let first = insert_scheduled_session(&connection, &new_session(12, "2pm-3pm"), NOW)
            .expect("insert should succeed");
        let second = insert_scheduled_session(&connection, &new_session(12, "4pm-5pm"), NOW)
            .expect("insert should succeed");

        let sessions = sessions_for_doctor_on(&connection, "lim@example.org", date(12), Some(first))
            .expect("query should succeed");

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].id, second);
        assert_eq!(sessions[0].date, date(12));
    }

    #[test]
    fn replacing_session_students_is_idempotent() {
        let connection = migrated("session-students.sqlite");
        let session_id = insert_scheduled_session(&connection, &new_session(12, "2pm-3pm"), NOW)
            .expect("insert should succeed");
        let john = insert_student(
            &connection,
            &NewStudent {
                name: "John Tan".to_string(),
                school: None,
                year_of_study: None,
            },
        )
        .expect("insert should succeed");
        let siti = insert_student(
            &connection,
            &NewStudent {
                name: "Siti".to_string(),
                school: None,
                year_of_study: None,
            },
        )
        .expect("insert should succeed");

        replace_session_students(&connection, session_id, &[john, siti])
            .expect("replace should succeed");
        replace_session_students(&connection, session_id, &[john])
            .expect("replace should succeed");
        replace_session_students(&connection, session_id, &[john])
            .expect("replace should succeed");

        let linked = list_session_students(&connection, session_id).expect("query should work");
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].name, "John Tan");

        let directory = student_directory(&connection).expect("directory should load");
        assert_eq!(directory.get("Siti"), Some(&siti));
    }

    #[test]
    fn deleting_a_session_cascades_to_links() {
        let connection = migrated("session-delete.sqlite");
        let session_id = insert_scheduled_session(&connection, &new_session(12, "2pm-3pm"), NOW)
            .expect("insert should succeed");
        let john = insert_student(
            &connection,
            &NewStudent {
                name: "John Tan".to_string(),
                school: None,
                year_of_study: None,
            },
        )
        .expect("insert should succeed");
        replace_session_students(&connection, session_id, &[john]).expect("link should succeed");

        assert!(delete_scheduled_session(&connection, session_id).expect("delete should work"));
        assert_eq!(
            get_scheduled_session(&connection, session_id).expect("query should work"),
            None
        );
        let links: i64 = connection
            .query_row("SELECT COUNT(*) FROM session_students", [], |row| row.get(0))
            .expect("count should work");
        assert_eq!(links, 0);
    }

    #[test]
    fn stores_and_reads_rounds() {
        let connection = migrated("rounds.sqlite");
        let opened_at = Utc
            .with_ymd_and_hms(2025, 6, 1, 9, 0, 0)
            .single()
            .expect("timestamp");
        let slot = Slot::new(
            date(12),
            NaiveTime::from_hms_opt(14, 0, 0).expect("time"),
            NaiveTime::from_hms_opt(15, 0, 0).expect("time"),
        )
        .expect("slot");
        let round = EmailSessionRequest {
            session_id: "round-1".to_string(),
            session_name: "Bedside teaching".to_string(),
            session_count: 2,
            doctor_mcrs: BTreeSet::from(["M12345A".to_string()]),
            student_ids: BTreeSet::from([3, 7]),
            candidate_slots: vec![slot],
            location: Some("Ward 5".to_string()),
            state: RoundState::OpenAvailabilityRequest,
            previous_session_id: None,
            opened_at,
            updated_at: opened_at,
        };

        insert_round(&connection, &round).expect("insert should succeed");
        assert_eq!(
            get_round(&connection, "round-1").expect("query should work"),
            Some(round.clone())
        );

        update_round_state(
            &connection,
            "round-1",
            RoundState::AvailabilitySubmitted,
            "2025-06-02T09:00:00.000Z",
        )
        .expect("update should work");
        let updated = get_round(&connection, "round-1")
            .expect("query should work")
            .expect("round should exist");
        assert_eq!(updated.state, RoundState::AvailabilitySubmitted);
        assert_eq!(get_round(&connection, "missing").expect("query"), None);
    }

    #[test]
    fn allows_one_availability_record_per_round() {
        let connection = migrated("records.sqlite");

        let id = insert_negotiation_record(&connection, &availability("round-1"), NOW)
            .expect("first insert should succeed");
        let duplicate = insert_negotiation_record(&connection, &availability("round-1"), NOW)
            .expect_err("second insert should violate the unique index");
        assert!(duplicate.is_unique_violation());

        let mut change = availability("round-1");
        change.kind = NegotiationKind::ChangeRequest;
        insert_negotiation_record(&connection, &change, NOW)
            .expect("change requests are not limited");

        let records = list_negotiation_records(&connection).expect("query should work");
        assert_eq!(records.len(), 2);
        let stored = records
            .iter()
            .find(|record| record.kind == NegotiationKind::Availability)
            .expect("availability record should exist");
        assert_eq!(stored.id, id);
        assert_eq!(stored.available_slots, vec!["12 June 2025 2pm-3pm"]);

        assert!(delete_negotiation_record(&connection, id).expect("delete should work"));
        insert_negotiation_record(&connection, &availability("round-1"), NOW)
            .expect("insert after delete should succeed");
    }

    #[test]
    fn finds_doctor_by_email_case_insensitively() {
        let connection = migrated("doctors.sqlite");
        upsert_doctor(
            &connection,
            &Doctor {
                mcr_number: "M12345A".to_string(),
                name: "Dr Lim".to_string(),
                email: "Lim@Example.org".to_string(),
            },
        )
        .expect("upsert should work");

        let doctor = find_doctor_by_email(&connection, "lim@example.org")
            .expect("query should work")
            .expect("doctor should exist");
        assert_eq!(doctor.mcr_number, "M12345A");
    }

    #[test]
    fn tracks_notification_delivery() {
        let connection = migrated("outbox.sqlite");
        let notification = NewNotification {
            doctor_email: "lim@example.org".to_string(),
            subject: "Session confirmed".to_string(),
            body: "See you".to_string(),
            session_id: None,
        };
        let first = insert_notification(&connection, &notification, NOW).expect("insert");
        let second = insert_notification(&connection, &notification, NOW).expect("insert");

        record_notification_failure(&connection, first, "timeout").expect("update");
        mark_notification_delivered(&connection, second, NOW).expect("update");

        let pending = list_pending_notifications(&connection, 10).expect("query should work");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, first);
        assert_eq!(pending[0].attempts, 1);
        assert_eq!(pending[0].last_error.as_deref(), Some("timeout"));
    }
}
