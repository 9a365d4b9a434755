mod config;
mod error;
pub mod ledger;
mod logging;
pub mod relay;
mod runtime;
pub mod services;

pub use error::AppError;
pub use runtime::SystemClock;

fn bootstrap(component: &str) -> Result<config::AppConfig, AppError> {
    logging::init()?;

    let config = config::AppConfig::from_env()?;

    tracing::info!(
        component,
        db_path = %config.db_path,
        http_bind = %config.http_bind,
        relay_interval_ms = config.relay_interval_ms,
        webhook_configured = config.notify_webhook_url.is_some(),
        round_ttl_hours = ?config.round_ttl_hours,
        booking_link_base = %config.booking_link_base,
        cors_allowed_origin = ?config.cors_allowed_origin,
        "application bootstrap initialized"
    );

    Ok(config)
}

pub fn run() -> Result<(), AppError> {
    let config = bootstrap("scheduling")?;
    runtime::run(config)
}

pub fn run_api() -> Result<(), AppError> {
    let config = bootstrap("scheduling-api")?;
    runtime::run_api(config)
}

pub fn run_relay() -> Result<(), AppError> {
    let config = bootstrap("scheduling-relay")?;
    runtime::run_relay(config)
}
