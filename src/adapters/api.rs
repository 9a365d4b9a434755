use std::collections::BTreeSet;

use actix_web::{HttpResponse, Responder, delete, get, patch, post, put, web};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::adapters::db::SessionFilter;
use crate::app::ledger::{
    AcceptDecision, AvailabilitySubmission, ChangeRequest, NewRound, RoundView, SchedulingLedger,
};
use crate::app::services::{
    CommittedSession, ConflictQuery, ServiceError, SessionCommandHandler, SessionQueryHandler,
    SqliteSessionService,
};
use crate::domain::conflict::SessionConflict;
use crate::domain::models::{
    Doctor, EmailSessionRequest, NegotiationKind, NegotiationRecord, NewNegotiationRecord,
    NewScheduledSession, OutboundNotification, ScheduledSession, Student,
};
use crate::domain::notifications::booking_link;
use crate::domain::slots::{Slot, normalize_slot_entries, parse_display_slot};
use crate::domain::students::StudentResolution;
use crate::domain::time_range::parse_time_range;

#[derive(Clone)]
pub struct ApiState {
    pub service: SqliteSessionService,
}

#[derive(Debug, Deserialize)]
pub struct TimeRangeRequest {
    pub text: String,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeRangeResponse {
    pub start_minutes: u16,
    pub end_minutes: u16,
    pub source_text: String,
    pub display_text: String,
}

#[derive(Debug, Deserialize)]
pub struct NormalizeSlotsRequest {
    pub entries: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ParseDisplayRequest {
    pub tokens: Vec<String>,
    pub year: Option<i32>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct DisplaySlotResult {
    pub token: String,
    pub date: Option<NaiveDate>,
    pub time: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListQuery {
    pub date: Option<NaiveDate>,
    pub doctor_email: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub session_name: String,
    pub doctor_name: String,
    pub doctor_email: String,
    pub date: NaiveDate,
    pub time_range_text: String,
    pub location: String,
    #[serde(default)]
    pub students_text: String,
    pub change_type: Option<String>,
    pub original_time: Option<String>,
    pub change_reason: Option<String>,
    #[serde(default)]
    pub override_conflicts: bool,
}

impl From<&SessionRequest> for NewScheduledSession {
    fn from(request: &SessionRequest) -> Self {
        Self {
            session_name: request.session_name.trim().to_string(),
            doctor_name: request.doctor_name.trim().to_string(),
            doctor_email: request.doctor_email.trim().to_string(),
            date: request.date,
            time_range_text: request.time_range_text.trim().to_string(),
            location: request.location.trim().to_string(),
            students_text: request.students_text.clone(),
            change_type: request.change_type.clone(),
            original_time: request.original_time.clone(),
            change_reason: request.change_reason.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadFlagRequest {
    pub is_read: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckConflictsRequest {
    pub doctor_email: String,
    pub date: NaiveDate,
    pub time_range_text: String,
    pub exclude_session_id: Option<i64>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledSessionResponse {
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

impl From<ScheduledSession> for ScheduledSessionResponse {
    fn from(session: ScheduledSession) -> Self {
        Self {
            id: session.id,
            session_name: session.session_name,
            doctor_name: session.doctor_name,
            doctor_email: session.doctor_email,
            date: session.date,
            time_range_text: session.time_range_text,
            location: session.location,
            students_text: session.students_text,
            change_type: session.change_type,
            original_time: session.original_time,
            change_reason: session.change_reason,
            is_read: session.is_read,
            created_at: session.created_at,
            updated_at: session.updated_at,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudentResponse {
    pub id: i64,
    pub name: String,
    pub school: Option<String>,
    pub year_of_study: Option<String>,
}

impl From<Student> for StudentResponse {
    fn from(student: Student) -> Self {
        Self {
            id: student.id,
            name: student.name,
            school: student.school,
            year_of_study: student.year_of_study,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DoctorResponse {
    pub mcr_number: String,
    pub name: String,
    pub email: String,
}

impl From<Doctor> for DoctorResponse {
    fn from(doctor: Doctor) -> Self {
        Self {
            mcr_number: doctor.mcr_number,
            name: doctor.name,
            email: doctor.email,
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetailResponse {
    #[serde(flatten)]
    pub session: ScheduledSessionResponse,
    pub students: Vec<StudentResponse>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommittedSessionResponse {
    pub session: ScheduledSessionResponse,
    pub students: StudentResolution,
    pub overridden_conflicts: Vec<SessionConflict>,
}

impl From<CommittedSession> for CommittedSessionResponse {
    fn from(committed: CommittedSession) -> Self {
        Self {
            session: committed.session.into(),
            students: committed.students,
            overridden_conflicts: committed.overridden_conflicts,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenRoundRequest {
    pub session_name: String,
    #[serde(default = "default_session_count")]
    pub session_count: u32,
    pub doctor_mcrs: Vec<String>,
    #[serde(default)]
    pub student_ids: Vec<i64>,
    pub candidate_slots: Vec<Slot>,
    pub location: Option<String>,
}

fn default_session_count() -> u32 {
    1
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoundResponse {
    pub session_id: String,
    pub session_name: String,
    pub session_count: u32,
    pub doctor_mcrs: BTreeSet<String>,
    pub student_ids: BTreeSet<i64>,
    pub candidate_slots: Vec<Slot>,
    pub location: Option<String>,
    pub state: &'static str,
    pub previous_session_id: Option<String>,
    pub opened_at: String,
    pub updated_at: String,
    pub booking_link: String,
}

impl RoundResponse {
    fn new(round: EmailSessionRequest, link_base: &str) -> Self {
        Self {
            booking_link: booking_link(link_base, &round.session_id),
            session_id: round.session_id,
            session_name: round.session_name,
            session_count: round.session_count,
            doctor_mcrs: round.doctor_mcrs,
            student_ids: round.student_ids,
            candidate_slots: round.candidate_slots,
            location: round.location,
            state: round.state.as_str(),
            previous_session_id: round.previous_session_id,
            opened_at: timestamp(round.opened_at),
            updated_at: timestamp(round.updated_at),
        }
    }
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoundViewResponse {
    #[serde(flatten)]
    pub round: RoundResponse,
    pub doctors: Vec<DoctorResponse>,
    pub students: Vec<StudentResponse>,
}

impl RoundViewResponse {
    fn new(view: RoundView, link_base: &str) -> Self {
        Self {
            round: RoundResponse::new(view.round, link_base),
            doctors: view.doctors.into_iter().map(Into::into).collect(),
            students: view.students.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityRequest {
    pub mcr_number: String,
    pub selected_slots: Vec<Slot>,
    pub students_text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedEmailRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub session_name: String,
    #[serde(default)]
    pub from_name: String,
    pub from_email: String,
    pub to_email: Option<String>,
    pub original_session: Option<String>,
    pub new_session: Option<String>,
    pub reason: Option<String>,
    #[serde(default)]
    pub students_text: String,
    #[serde(default)]
    pub available_slots: Vec<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationRecordResponse {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: &'static str,
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

impl From<NegotiationRecord> for NegotiationRecordResponse {
    fn from(record: NegotiationRecord) -> Self {
        Self {
            id: record.id,
            kind: record.kind.as_str(),
            session_name: record.session_name,
            from_name: record.from_name,
            from_email: record.from_email,
            to_email: record.to_email,
            original_session: record.original_session,
            new_session: record.new_session,
            reason: record.reason,
            students_text: record.students_text,
            available_slots: record.available_slots,
            session_id: record.session_id,
            received_at: record.received_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptRequest {
    pub slot_index: Option<usize>,
    pub location: Option<String>,
    #[serde(default)]
    pub override_conflicts: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRequestBody {
    pub candidate_slots: Vec<Slot>,
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeclineRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationResponse {
    pub id: i64,
    pub doctor_email: String,
    pub subject: String,
    pub body: String,
    pub session_id: Option<String>,
    pub created_at: String,
    pub attempts: i64,
    pub last_error: Option<String>,
}

impl From<OutboundNotification> for NotificationResponse {
    fn from(notification: OutboundNotification) -> Self {
        Self {
            id: notification.id,
            doctor_email: notification.doctor_email,
            subject: notification.subject,
            body: notification.body,
            session_id: notification.session_id,
            created_at: notification.created_at,
            attempts: notification.attempts,
            last_error: notification.last_error,
        }
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(parse_time_range_endpoint)
        .service(normalize_slots_endpoint)
        .service(parse_display_slots_endpoint)
        .service(check_conflicts_endpoint)
        .service(list_sessions_endpoint)
        .service(create_session_endpoint)
        .service(get_session_endpoint)
        .service(update_session_endpoint)
        .service(set_session_read_endpoint)
        .service(delete_session_endpoint)
        .service(resolve_students_endpoint)
        .service(expire_overdue_endpoint)
        .service(open_round_endpoint)
        .service(get_round_endpoint)
        .service(close_round_endpoint)
        .service(update_availability_endpoint)
        .service(ingest_record_endpoint)
        .service(list_records_endpoint)
        .service(accept_record_endpoint)
        .service(request_change_endpoint)
        .service(decline_record_endpoint)
        .service(pending_notifications_endpoint);
}

#[get("/health")]
async fn health(state: web::Data<ApiState>) -> impl Responder {
    match state.service.get_schema_version() {
        Ok(schema_version) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "schemaVersion": schema_version
        })),
        Err(error) => service_error_response(error),
    }
}

#[post("/api/time-ranges/parse")]
async fn parse_time_range_endpoint(body: web::Json<TimeRangeRequest>) -> impl Responder {
    match parse_time_range(&body.text) {
        Ok(interval) => HttpResponse::Ok().json(TimeRangeResponse {
            start_minutes: interval.start_minutes,
            end_minutes: interval.end_minutes,
            display_text: interval.display_text(),
            source_text: interval.source_text,
        }),
        Err(error) => HttpResponse::UnprocessableEntity().json(serde_json::json!({
            "error": error.to_string()
        })),
    }
}

#[post("/api/slots/normalize")]
async fn normalize_slots_endpoint(body: web::Json<NormalizeSlotsRequest>) -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "slots": normalize_slot_entries(&body.entries)
    }))
}

#[post("/api/slots/parse-display")]
async fn parse_display_slots_endpoint(
    state: web::Data<ApiState>,
    body: web::Json<ParseDisplayRequest>,
) -> impl Responder {
    let year = body.year.unwrap_or_else(|| state.service.current_year());

    let results: Vec<DisplaySlotResult> = body
        .tokens
        .iter()
        .map(|token| match parse_display_slot(token, year) {
            Ok(display) => DisplaySlotResult {
                token: token.clone(),
                date: Some(display.date),
                time: display.time,
                error: None,
            },
            Err(error) => {
                tracing::debug!(token = %token, error = %error, "display slot skipped");
                DisplaySlotResult {
                    token: token.clone(),
                    date: None,
                    time: None,
                    error: Some(error.to_string()),
                }
            }
        })
        .collect();

    HttpResponse::Ok().json(results)
}

#[post("/api/scheduled-sessions/check-conflicts")]
async fn check_conflicts_endpoint(
    state: web::Data<ApiState>,
    body: web::Json<CheckConflictsRequest>,
) -> impl Responder {
    let body = body.into_inner();
    let query = ConflictQuery {
        doctor_email: body.doctor_email,
        date: body.date,
        time_range_text: body.time_range_text,
        exclude_session_id: body.exclude_session_id,
    };

    match state.service.check_conflicts(&query) {
        Ok(report) => HttpResponse::Ok().json(serde_json::json!({
            "hasConflicts": report.has_conflicts(),
            "conflicts": report.conflicts,
            "skippedSessionIds": report.skipped_session_ids
        })),
        Err(error) => service_error_response(error),
    }
}

#[get("/api/scheduled-sessions")]
async fn list_sessions_endpoint(
    state: web::Data<ApiState>,
    query: web::Query<SessionListQuery>,
) -> impl Responder {
    let query = query.into_inner();
    let filter = SessionFilter {
        date: query.date,
        doctor_email: query
            .doctor_email
            .map(|email| email.trim().to_string())
            .filter(|email| !email.is_empty()),
    };

    match state.service.list_sessions(&filter) {
        Ok(sessions) => {
            let mapped: Vec<ScheduledSessionResponse> =
                sessions.into_iter().map(Into::into).collect();
            HttpResponse::Ok().json(mapped)
        }
        Err(error) => service_error_response(error),
    }
}

#[post("/api/scheduled-sessions")]
async fn create_session_endpoint(
    state: web::Data<ApiState>,
    body: web::Json<SessionRequest>,
) -> impl Responder {
    let new_session = NewScheduledSession::from(&*body);

    match state
        .service
        .create_session(&new_session, body.override_conflicts)
    {
        Ok(committed) => HttpResponse::Created().json(CommittedSessionResponse::from(committed)),
        Err(error) => service_error_response(error),
    }
}

#[get("/api/scheduled-sessions/{id}")]
async fn get_session_endpoint(state: web::Data<ApiState>, path: web::Path<i64>) -> impl Responder {
    let id = path.into_inner();

    let session = match state.service.get_session(id) {
        Ok(session) => session,
        Err(error) => return service_error_response(error),
    };
    let students = match state.service.session_students(id) {
        Ok(students) => students,
        Err(error) => return service_error_response(error),
    };

    HttpResponse::Ok().json(SessionDetailResponse {
        session: session.into(),
        students: students.into_iter().map(Into::into).collect(),
    })
}

#[put("/api/scheduled-sessions/{id}")]
async fn update_session_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<i64>,
    body: web::Json<SessionRequest>,
) -> impl Responder {
    let changes = NewScheduledSession::from(&*body);

    match state
        .service
        .update_session(path.into_inner(), &changes, body.override_conflicts)
    {
        Ok(committed) => HttpResponse::Ok().json(CommittedSessionResponse::from(committed)),
        Err(error) => service_error_response(error),
    }
}

#[patch("/api/scheduled-sessions/{id}/read")]
async fn set_session_read_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<i64>,
    body: web::Json<ReadFlagRequest>,
) -> impl Responder {
    match state.service.set_session_read(path.into_inner(), body.is_read) {
        Ok(session) => HttpResponse::Ok().json(ScheduledSessionResponse::from(session)),
        Err(error) => service_error_response(error),
    }
}

#[delete("/api/scheduled-sessions/{id}")]
async fn delete_session_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<i64>,
) -> impl Responder {
    match state.service.delete_session(path.into_inner()) {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(error) => service_error_response(error),
    }
}

#[post("/api/scheduled-sessions/{id}/students/resolve")]
async fn resolve_students_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<i64>,
) -> impl Responder {
    match state.service.resolve_session_students(path.into_inner()) {
        Ok(resolution) => HttpResponse::Ok().json(resolution),
        Err(error) => service_error_response(error),
    }
}

#[post("/api/email-sessions/expire-overdue")]
async fn expire_overdue_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match state.service.expire_overdue_rounds() {
        Ok(expired) => HttpResponse::Ok().json(serde_json::json!({ "expired": expired })),
        Err(error) => service_error_response(error),
    }
}

#[post("/api/email-sessions")]
async fn open_round_endpoint(
    state: web::Data<ApiState>,
    body: web::Json<OpenRoundRequest>,
) -> impl Responder {
    let body = body.into_inner();
    let new_round = NewRound {
        session_name: body.session_name,
        session_count: body.session_count,
        doctor_mcrs: body.doctor_mcrs,
        student_ids: body.student_ids,
        candidate_slots: body.candidate_slots,
        location: body.location,
    };

    match state.service.open_round(&new_round) {
        Ok(round) => HttpResponse::Created().json(RoundResponse::new(
            round,
            &state.service.settings().booking_link_base,
        )),
        Err(error) => service_error_response(error),
    }
}

#[get("/api/email-sessions/{session_id}")]
async fn get_round_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> impl Responder {
    match state.service.get_round(&path.into_inner()) {
        Ok(view) => HttpResponse::Ok().json(RoundViewResponse::new(
            view,
            &state.service.settings().booking_link_base,
        )),
        Err(error) => service_error_response(error),
    }
}

#[post("/api/email-sessions/{session_id}/close")]
async fn close_round_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
) -> impl Responder {
    match state.service.close_round(&path.into_inner()) {
        Ok(round) => HttpResponse::Ok().json(RoundResponse::new(
            round,
            &state.service.settings().booking_link_base,
        )),
        Err(error) => service_error_response(error),
    }
}

#[patch("/api/scheduling/parsed-email/{session_id}/update-availability")]
async fn update_availability_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<String>,
    body: web::Json<AvailabilityRequest>,
) -> impl Responder {
    let body = body.into_inner();
    let submission = AvailabilitySubmission {
        mcr_number: body.mcr_number,
        selected_slots: body.selected_slots,
        students_text: body.students_text,
    };

    match state
        .service
        .submit_availability(&path.into_inner(), &submission)
    {
        Ok(record) => HttpResponse::Ok().json(NegotiationRecordResponse::from(record)),
        Err(error) => service_error_response(error),
    }
}

#[post("/api/scheduling/parsed-email")]
async fn ingest_record_endpoint(
    state: web::Data<ApiState>,
    body: web::Json<ParsedEmailRequest>,
) -> impl Responder {
    let body = body.into_inner();
    let Some(kind) = NegotiationKind::parse(&body.kind) else {
        return HttpResponse::UnprocessableEntity().json(serde_json::json!({
            "error": format!("unknown record type {:?}", body.kind)
        }));
    };

    let record = NewNegotiationRecord {
        kind,
        session_name: body.session_name,
        from_name: body.from_name,
        from_email: body.from_email,
        to_email: body.to_email,
        original_session: body.original_session,
        new_session: body.new_session,
        reason: body.reason,
        students_text: body.students_text,
        available_slots: body.available_slots,
        session_id: body.session_id,
    };

    match state.service.ingest_record(&record) {
        Ok(stored) => HttpResponse::Created().json(NegotiationRecordResponse::from(stored)),
        Err(error) => service_error_response(error),
    }
}

#[get("/api/scheduling/parsed-email")]
async fn list_records_endpoint(state: web::Data<ApiState>) -> impl Responder {
    match state.service.list_records() {
        Ok(records) => {
            let mapped: Vec<NegotiationRecordResponse> =
                records.into_iter().map(Into::into).collect();
            HttpResponse::Ok().json(mapped)
        }
        Err(error) => service_error_response(error),
    }
}

#[post("/api/scheduling/parsed-email/{id}/accept")]
async fn accept_record_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<i64>,
    body: Option<web::Json<AcceptRequest>>,
) -> impl Responder {
    let body = body.map(web::Json::into_inner).unwrap_or_default();
    let decision = AcceptDecision {
        slot_index: body.slot_index,
        location: body.location,
        override_conflicts: body.override_conflicts,
    };

    match state.service.accept(path.into_inner(), &decision) {
        Ok(committed) => HttpResponse::Ok().json(CommittedSessionResponse::from(committed)),
        Err(error) => service_error_response(error),
    }
}

#[post("/api/scheduling/parsed-email/{id}/request-change")]
async fn request_change_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<i64>,
    body: web::Json<ChangeRequestBody>,
) -> impl Responder {
    let body = body.into_inner();
    let change = ChangeRequest {
        candidate_slots: body.candidate_slots,
        reason: body.reason,
    };

    match state.service.request_change(path.into_inner(), &change) {
        Ok(round) => HttpResponse::Created().json(RoundResponse::new(
            round,
            &state.service.settings().booking_link_base,
        )),
        Err(error) => service_error_response(error),
    }
}

#[post("/api/scheduling/parsed-email/{id}/decline")]
async fn decline_record_endpoint(
    state: web::Data<ApiState>,
    path: web::Path<i64>,
    body: Option<web::Json<DeclineRequest>>,
) -> impl Responder {
    let body = body.map(web::Json::into_inner).unwrap_or_default();

    match state
        .service
        .decline(path.into_inner(), body.reason.as_deref())
    {
        Ok(()) => HttpResponse::NoContent().finish(),
        Err(error) => service_error_response(error),
    }
}

#[get("/api/notifications/pending")]
async fn pending_notifications_endpoint(
    state: web::Data<ApiState>,
    query: web::Query<PendingQuery>,
) -> impl Responder {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);

    match state.service.pending_notifications(limit) {
        Ok(notifications) => {
            let mapped: Vec<NotificationResponse> =
                notifications.into_iter().map(Into::into).collect();
            HttpResponse::Ok().json(mapped)
        }
        Err(error) => service_error_response(error),
    }
}

fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn service_error_response(error: ServiceError) -> HttpResponse {
    let message = error.to_string();

    match error {
        ServiceError::NotFound(_) => {
            HttpResponse::NotFound().json(serde_json::json!({ "error": message }))
        }
        ServiceError::Unauthorized(_) => {
            HttpResponse::Forbidden().json(serde_json::json!({ "error": message }))
        }
        ServiceError::StaleRound(_) => HttpResponse::Forbidden().json(serde_json::json!({
            "error": message,
            "code": "already_submitted"
        })),
        ServiceError::Expired(_) => {
            HttpResponse::Gone().json(serde_json::json!({ "error": message }))
        }
        ServiceError::Conflict(report) => HttpResponse::Conflict().json(serde_json::json!({
            "error": message,
            "conflicts": report.conflicts,
            "skippedSessionIds": report.skipped_session_ids
        })),
        ServiceError::Unparsable(_) | ServiceError::Validation(_) => {
            HttpResponse::UnprocessableEntity().json(serde_json::json!({ "error": message }))
        }
        ServiceError::InvalidTransition(_) => {
            HttpResponse::Conflict().json(serde_json::json!({ "error": message }))
        }
        ServiceError::DbLockPoisoned | ServiceError::Database(_) => {
            tracing::error!(error = %message, "request failed on storage");
            HttpResponse::InternalServerError().json(serde_json::json!({ "error": message }))
        }
    }
}
