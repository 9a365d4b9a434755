use std::sync::{Arc, Mutex};
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{App, HttpServer, web};
use chrono::{DateTime, Utc};

use crate::adapters::api::{ApiState, configure_routes};
use crate::adapters::db::{open_connection, run_migrations};
use crate::adapters::webhook::{NotificationTransport, WebhookTransport};
use crate::app::config::AppConfig;
use crate::app::error::AppError;
use crate::app::relay::{DEFAULT_BATCH_SIZE, NotificationRelay};
use crate::app::services::{ServiceSettings, SqliteSessionService};
use crate::domain::negotiation::{Clock, ExpiryPolicy};

#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// HTTP API plus, when there is work for it, the notification relay.
pub fn run(config: AppConfig) -> Result<(), AppError> {
    let service = build_service(&config)?;

    let relay = if config.notify_webhook_url.is_some() || config.round_ttl_hours.is_some() {
        Some(start_relay(&config, service.clone())?)
    } else {
        tracing::info!("no webhook or round ttl configured; notifications stay in the outbox");
        None
    };

    let server_result = serve_http(&config, service);

    if let Some(relay) = relay {
        relay.stop()?;
    }

    server_result
}

pub fn run_api(config: AppConfig) -> Result<(), AppError> {
    let service = build_service(&config)?;
    serve_http(&config, service)
}

/// Runs the relay in the foreground until its thread exits.
pub fn run_relay(config: AppConfig) -> Result<(), AppError> {
    if config.notify_webhook_url.is_none() {
        tracing::warn!("NOTIFY_WEBHOOK_URL is not set; the relay will only expire overdue rounds");
    }

    let service = build_service(&config)?;
    start_relay(&config, service)?.wait()
}

fn build_service(config: &AppConfig) -> Result<SqliteSessionService, AppError> {
    if let Some(parent) = std::path::Path::new(&config.db_path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(AppError::database_init)?;
    }

    let mut connection = open_connection(&config.db_path).map_err(AppError::database_init)?;
    run_migrations(&mut connection).map_err(AppError::database_init)?;

    Ok(SqliteSessionService::new(
        Arc::new(Mutex::new(connection)),
        Arc::new(SystemClock),
        ServiceSettings {
            expiry: ExpiryPolicy::from_hours(config.round_ttl_hours),
            booking_link_base: config.booking_link_base.clone(),
        },
    ))
}

fn start_relay(
    config: &AppConfig,
    service: SqliteSessionService,
) -> Result<NotificationRelay, AppError> {
    let transport = match &config.notify_webhook_url {
        Some(url) => Some(
            Arc::new(WebhookTransport::new(url).map_err(AppError::runtime)?)
                as Arc<dyn NotificationTransport>,
        ),
        None => None,
    };

    NotificationRelay::start(
        service,
        transport,
        Duration::from_millis(config.relay_interval_ms),
        DEFAULT_BATCH_SIZE,
    )
}

fn serve_http(config: &AppConfig, service: SqliteSessionService) -> Result<(), AppError> {
    let api_state = ApiState { service };
    let allowed_origin = config.cors_allowed_origin.clone();
    let bind = config.http_bind.clone();

    tracing::info!(bind = %bind, "http server starting");

    actix_web::rt::System::new()
        .block_on(async move {
            HttpServer::new(move || {
                App::new()
                    .wrap(build_cors(allowed_origin.as_deref()))
                    .app_data(web::Data::new(api_state.clone()))
                    .configure(configure_routes)
            })
            .bind(&bind)?
            .run()
            .await
        })
        .map_err(AppError::runtime)
}

fn build_cors(allowed_origin: Option<&str>) -> Cors {
    match allowed_origin {
        Some(origin) => Cors::default()
            .allowed_origin(origin)
            .allow_any_method()
            .allow_any_header()
            .max_age(3600),
        None => Cors::permissive(),
    }
}
