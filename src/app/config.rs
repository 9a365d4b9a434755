use crate::app::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: String,
    pub http_bind: String,
    pub relay_interval_ms: u64,
    pub notify_webhook_url: Option<String>,
    pub round_ttl_hours: Option<u32>,
    pub booking_link_base: String,
    pub cors_allowed_origin: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        if let Err(error) = dotenvy::dotenv()
            && !error.not_found()
        {
            return Err(AppError::config(format!("failed to read .env file: {error}")));
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let relay_interval_ms = parse_or_default(&lookup, "RELAY_INTERVAL_MS", 5000_u64)?;
        if relay_interval_ms == 0 {
            return Err(AppError::config("RELAY_INTERVAL_MS must be greater than zero"));
        }

        let round_ttl_hours = match non_empty(&lookup, "ROUND_TTL_HOURS") {
            Some(raw) => Some(
                raw.parse::<u32>()
                    .ok()
                    .filter(|hours| *hours > 0)
                    .ok_or_else(|| {
                        AppError::config("ROUND_TTL_HOURS must be a positive number of hours")
                    })?,
            ),
            None => None,
        };

        let notify_webhook_url = non_empty(&lookup, "NOTIFY_WEBHOOK_URL");
        if let Some(url) = &notify_webhook_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(AppError::config(
                "NOTIFY_WEBHOOK_URL must be an http(s) url",
            ));
        }

        Ok(Self {
            db_path: non_empty(&lookup, "DB_PATH")
                .unwrap_or_else(|| "./data/scheduling.db".to_string()),
            http_bind: non_empty(&lookup, "HTTP_BIND").unwrap_or_else(|| "0.0.0.0:3001".to_string()),
            relay_interval_ms,
            notify_webhook_url,
            round_ttl_hours,
            booking_link_base: non_empty(&lookup, "BOOKING_LINK_BASE")
                .unwrap_or_else(|| "http://localhost:3000/doctor-session-booking".to_string()),
            cors_allowed_origin: non_empty(&lookup, "CORS_ALLOWED_ORIGIN"),
        })
    }
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{key} must be a valid number"))),
        None => Ok(default),
    }
}
