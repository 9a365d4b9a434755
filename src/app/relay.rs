use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::adapters::db;
use crate::adapters::webhook::NotificationTransport;
use crate::app::error::AppError;
use crate::app::ledger::SchedulingLedger;
use crate::app::services::{ServiceError, SqliteSessionService};

const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_BATCH_SIZE: u32 = 25;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Sends up to `batch_size` queued notifications. A failed delivery is recorded on its
/// row and stays pending for the next cycle; it never blocks the rest of the batch.
pub fn deliver_pending(
    service: &SqliteSessionService,
    transport: &dyn NotificationTransport,
    batch_size: u32,
) -> Result<RelayReport, ServiceError> {
    let pending = service.with_transaction(|connection| {
        Ok(db::list_pending_notifications(connection, batch_size)?)
    })?;
    let mut report = RelayReport::default();

    for notification in pending {
        match transport.deliver(&notification) {
            Ok(()) => {
                let delivered_at = service.now_text();
                service.with_transaction(|connection| {
                    Ok(db::mark_notification_delivered(
                        connection,
                        notification.id,
                        &delivered_at,
                    )?)
                })?;
                report.delivered += 1;

                tracing::info!(
                    notification_id = notification.id,
                    doctor_email = %notification.doctor_email,
                    "notification delivered"
                );
            }
            Err(error) => {
                let message = error.to_string();
                service.with_transaction(|connection| {
                    Ok(db::record_notification_failure(
                        connection,
                        notification.id,
                        &message,
                    )?)
                })?;
                report.failed += 1;

                tracing::warn!(
                    notification_id = notification.id,
                    attempts = notification.attempts + 1,
                    error = %error,
                    "notification delivery failed"
                );
            }
        }
    }

    Ok(report)
}

/// Background worker that expires overdue rounds and drains the outbox.
pub struct NotificationRelay {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl NotificationRelay {
    pub fn start(
        service: SqliteSessionService,
        transport: Option<Arc<dyn NotificationTransport>>,
        interval: Duration,
        batch_size: u32,
    ) -> Result<Self, AppError> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let thread_stop_flag = Arc::clone(&stop_flag);

        let handle = std::thread::Builder::new()
            .name("notification-relay".to_string())
            .spawn(move || {
                while !thread_stop_flag.load(Ordering::Relaxed) {
                    run_cycle(&service, transport.as_deref(), batch_size);
                    sleep_unless_stopped(interval, &thread_stop_flag);
                }
            })
            .map_err(AppError::runtime)?;

        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            batch_size,
            "notification relay started"
        );

        Ok(Self {
            stop_flag,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn stop(self) -> Result<(), AppError> {
        self.stop_flag.store(true, Ordering::Relaxed);
        self.join()?;
        tracing::info!("notification relay stopped");
        Ok(())
    }

    /// Blocks on the relay thread without asking it to stop.
    pub fn wait(self) -> Result<(), AppError> {
        self.join()
    }

    fn join(mut self) -> Result<(), AppError> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| AppError::runtime("notification relay thread panicked")),
            None => Ok(()),
        }
    }
}

impl Drop for NotificationRelay {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }
}

fn run_cycle(
    service: &SqliteSessionService,
    transport: Option<&dyn NotificationTransport>,
    batch_size: u32,
) {
    if let Err(error) = service.expire_overdue_rounds() {
        tracing::warn!(error = %error, "round expiry sweep failed");
    }

    let Some(transport) = transport else {
        return;
    };

    match deliver_pending(service, transport, batch_size) {
        Ok(report) if report.failed > 0 => {
            tracing::warn!(
                delivered = report.delivered,
                failed = report.failed,
                "relay cycle finished with failures"
            );
        }
        Ok(_) => {}
        Err(error) => tracing::warn!(error = %error, "relay cycle failed"),
    }
}

fn sleep_unless_stopped(interval: Duration, stop_flag: &AtomicBool) {
    let deadline = Instant::now() + interval;

    while !stop_flag.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        std::thread::sleep(STOP_CHECK_INTERVAL.min(deadline - now));
    }
}
