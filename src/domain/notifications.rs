use crate::domain::models::{Doctor, EmailSessionRequest, NewNotification, ScheduledSession};
use crate::domain::time_range::format_display_date;

pub fn booking_link(link_base: &str, session_id: &str) -> String {
    format!("{}?session_id={session_id}", link_base.trim_end_matches('/'))
}

/// Invitation sent to every doctor on a freshly opened round.
pub fn round_invitation(
    doctor: &Doctor,
    round: &EmailSessionRequest,
    link_base: &str,
) -> NewNotification {
    let mut body = format!(
        "Dear {},\n\nWe are arranging {} session(s) of \"{}\" and would like your availability.\n",
        doctor.name, round.session_count, round.session_name
    );

    if let Some(location) = &round.location {
        body.push_str(&format!("Location: {location}\n"));
    }

    if !round.candidate_slots.is_empty() {
        body.push_str("\nProposed slots:\n");
        for slot in &round.candidate_slots {
            body.push_str(&format!("- {}\n", slot.display_text()));
        }
    }

    body.push_str(&format!(
        "\nPlease choose your slots here: {}\n\nSession ID: {}\n",
        booking_link(link_base, &round.session_id),
        round.session_id
    ));

    NewNotification {
        doctor_email: doctor.email.clone(),
        subject: format!("Availability request: {}", round.session_name),
        body,
        session_id: Some(round.session_id.clone()),
    }
}

pub fn session_confirmed(session: &ScheduledSession, session_id: Option<&str>) -> NewNotification {
    let mut body = format!(
        "Dear {},\n\nYour session \"{}\" is confirmed for {}, {} at {}.\n",
        session.doctor_name,
        session.session_name,
        format_display_date(session.date),
        session.time_range_text,
        session.location
    );

    if !session.students_text.trim().is_empty() {
        body.push_str(&format!("Students: {}\n", session.students_text));
    }

    NewNotification {
        doctor_email: session.doctor_email.clone(),
        subject: format!("Session confirmed: {}", session.session_name),
        body,
        session_id: session_id.map(str::to_string),
    }
}

/// Sent when the scheduler answers a submission with a new set of candidate slots.
pub fn new_timing_requested(
    doctor: &Doctor,
    round: &EmailSessionRequest,
    reason: Option<&str>,
    link_base: &str,
) -> NewNotification {
    let mut body = format!(
        "Dear {},\n\nThe times you submitted for \"{}\" could not be arranged.\n",
        doctor.name, round.session_name
    );

    if let Some(reason) = reason.map(str::trim).filter(|reason| !reason.is_empty()) {
        body.push_str(&format!("Reason: {reason}\n"));
    }

    body.push_str("\nPlease pick from these new slots:\n");
    for slot in &round.candidate_slots {
        body.push_str(&format!("- {}\n", slot.display_text()));
    }

    body.push_str(&format!(
        "\n{}\n\nSession ID: {}\n",
        booking_link(link_base, &round.session_id),
        round.session_id
    ));

    NewNotification {
        doctor_email: doctor.email.clone(),
        subject: format!("New timing requested: {}", round.session_name),
        body,
        session_id: Some(round.session_id.clone()),
    }
}

pub fn change_accepted(session: &ScheduledSession) -> NewNotification {
    let previous = session
        .original_time
        .as_deref()
        .map(|time| format!(" (previously {time})"))
        .unwrap_or_default();

    NewNotification {
        doctor_email: session.doctor_email.clone(),
        subject: format!("Change accepted: {}", session.session_name),
        body: format!(
            "Dear {},\n\nYour requested change to \"{}\" has been accepted. \
             The session now runs on {}, {}{previous} at {}.\n",
            session.doctor_name,
            session.session_name,
            format_display_date(session.date),
            session.time_range_text,
            session.location
        ),
        session_id: None,
    }
}

pub fn change_declined(
    doctor_name: &str,
    doctor_email: &str,
    session_name: &str,
    reason: Option<&str>,
) -> NewNotification {
    let mut body = format!(
        "Dear {doctor_name},\n\nYour requested change to \"{session_name}\" could not be accommodated. \
         The session stays as originally scheduled.\n"
    );

    if let Some(reason) = reason.map(str::trim).filter(|reason| !reason.is_empty()) {
        body.push_str(&format!("Reason: {reason}\n"));
    }

    NewNotification {
        doctor_email: doctor_email.to_string(),
        subject: format!("Change request declined: {session_name}"),
        body,
        session_id: None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

    use super::{
        booking_link, change_accepted, change_declined, new_timing_requested, round_invitation,
        session_confirmed,
    };
    use crate::domain::models::{Doctor, EmailSessionRequest, ScheduledSession};
    use crate::domain::negotiation::RoundState;
    use crate::domain::slots::Slot;

    fn doctor() -> Doctor {
        Doctor {
            mcr_number: "M12345A".to_string(),
            name: "Dr Lim".to_string(),
            email: "lim@example.org".to_string(),
        }
    }

    fn round() -> EmailSessionRequest {
        let opened_at = Utc
            .with_ymd_and_hms(2025, 6, 1, 9, 0, 0)
            .single()
            .expect("timestamp");
        let slot = Slot::new(
            NaiveDate::from_ymd_opt(2025, 6, 12).expect("date"),
            NaiveTime::from_hms_opt(14, 0, 0).expect("time"),
            NaiveTime::from_hms_opt(15, 0, 0).expect("time"),
        )
        .expect("slot");

        EmailSessionRequest {
            session_id: "abc-123".to_string(),
            session_name: "Bedside teaching".to_string(),
            session_count: 2,
            doctor_mcrs: BTreeSet::from(["M12345A".to_string()]),
            student_ids: BTreeSet::new(),
            candidate_slots: vec![slot],
            location: Some("Ward 5".to_string()),
            state: RoundState::OpenAvailabilityRequest,
            previous_session_id: None,
            opened_at,
            updated_at: opened_at,
        }
    }

    fn scheduled_session() -> ScheduledSession {
        ScheduledSession {
            id: 7,
            session_name: "Bedside teaching".to_string(),
            doctor_name: "Dr Lim".to_string(),
            doctor_email: "lim@example.org".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 6, 12).expect("date"),
            time_range_text: "2:30pm-4pm".to_string(),
            location: "Ward 5".to_string(),
            students_text: "Alice Tan, Bob Lee".to_string(),
            change_type: None,
            original_time: None,
            change_reason: None,
            is_read: false,
            created_at: "2025-06-01T09:00:00.000Z".to_string(),
            updated_at: "2025-06-01T09:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn booking_link_carries_session_id() {
        assert_eq!(
            booking_link("http://localhost:3000/doctor-session-booking/", "abc"),
            "http://localhost:3000/doctor-session-booking?session_id=abc"
        );
    }

    #[test]
    fn invitation_lists_slots_and_link() {
        let notification = round_invitation(&doctor(), &round(), "http://host/book");

        assert_eq!(notification.doctor_email, "lim@example.org");
        assert_eq!(notification.subject, "Availability request: Bedside teaching");
        assert_eq!(notification.session_id.as_deref(), Some("abc-123"));
        assert!(notification.body.contains("- 12 June 2025 2pm-3pm"));
        assert!(notification.body.contains("http://host/book?session_id=abc-123"));
        assert!(notification.body.contains("Location: Ward 5"));
    }

    #[test]
    fn new_timing_includes_reason_when_given() {
        let with_reason =
            new_timing_requested(&doctor(), &round(), Some("clinic closed"), "http://host/book");
        let without_reason = new_timing_requested(&doctor(), &round(), Some("  "), "http://host");

        assert!(with_reason.body.contains("Reason: clinic closed"));
        assert!(!without_reason.body.contains("Reason:"));
    }

    #[test]
    fn decline_is_addressed_to_requesting_doctor() {
        let notification =
            change_declined("Dr Lim", "lim@example.org", "Tutorial", Some("no rooms"));

        assert_eq!(notification.doctor_email, "lim@example.org");
        assert_eq!(notification.subject, "Change request declined: Tutorial");
        assert!(notification.body.contains("Reason: no rooms"));
        assert_eq!(notification.session_id, None);
    }

    #[test]
    fn confirmation_spells_out_date_time_and_students() {
        let notification = session_confirmed(&scheduled_session(), Some("abc-123"));

        assert_eq!(notification.doctor_email, "lim@example.org");
        assert_eq!(notification.subject, "Session confirmed: Bedside teaching");
        assert_eq!(notification.session_id.as_deref(), Some("abc-123"));
        assert!(
            notification
                .body
                .contains("is confirmed for 12 June 2025, 2:30pm-4pm at Ward 5.")
        );
        assert!(notification.body.contains("Students: Alice Tan, Bob Lee"));
    }

    #[test]
    fn accepted_change_mentions_previous_time() {
        let mut session = scheduled_session();
        session.original_time = Some("9am-10am".to_string());

        let notification = change_accepted(&session);

        assert_eq!(notification.subject, "Change accepted: Bedside teaching");
        assert_eq!(notification.session_id, None);
        assert!(
            notification
                .body
                .contains("now runs on 12 June 2025, 2:30pm-4pm (previously 9am-10am) at Ward 5.")
        );
    }
}
