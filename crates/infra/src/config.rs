//! Environment-driven settings shared by the API and the stage processes.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

pub const DEFAULT_RAW_QUEUE: &str = "scout:raw_tasks";
pub const DEFAULT_COMPLETED_QUEUE: &str = "scout:completed_tasks";
pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Notification channel settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TelegramSettings {
    pub bot_token: Option<String>,
    /// Destination chat. Without it notifications are only logged.
    pub chat_id: Option<String>,
    pub api_base: String,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl Default for TelegramSettings {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            api_base: DEFAULT_TELEGRAM_API_BASE.to_string(),
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub redis_url: String,
    pub raw_queue: String,
    pub completed_queue: String,
    pub consumer_group: String,
    /// Consumer slots per stage.
    pub worker_prefetch: usize,
    pub visibility_timeout: Duration,
    /// Upper bound on a single broker round trip.
    pub transport_timeout: Duration,
    pub telegram: TelegramSettings,
    pub bind_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            use_persistent_stores: false,
            database_url: None,
            database_max_connections: 5,
            redis_url: "redis://localhost:6379".to_string(),
            raw_queue: DEFAULT_RAW_QUEUE.to_string(),
            completed_queue: DEFAULT_COMPLETED_QUEUE.to_string(),
            consumer_group: "scout".to_string(),
            worker_prefetch: 1,
            visibility_timeout: Duration::from_millis(60_000),
            transport_timeout: Duration::from_millis(5_000),
            telegram: TelegramSettings::default(),
            bind_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup (the process environment in
    /// production, a map in tests).
    ///
    /// Unparseable numbers fall back to their defaults with a warning, with one
    /// exception: a zero `WORKER_PREFETCH` is refused.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let use_persistent_stores = get("USE_PERSISTENT_STORES")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let database_url = get("DATABASE_URL");
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let worker_prefetch = parse_or("WORKER_PREFETCH", get("WORKER_PREFETCH"), defaults.worker_prefetch);
        if worker_prefetch == 0 {
            return Err(ConfigError::Invalid {
                var: "WORKER_PREFETCH",
                value: "0".to_string(),
                reason: "at least one consumer slot is required".to_string(),
            });
        }

        let telegram_defaults = TelegramSettings::default();
        let telegram = TelegramSettings {
            bot_token: get("TELEGRAM_BOT_TOKEN"),
            chat_id: get("TELEGRAM_CHAT_ID"),
            api_base: get("TELEGRAM_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(telegram_defaults.api_base),
            max_attempts: parse_or(
                "TELEGRAM_MAX_RETRIES",
                get("TELEGRAM_MAX_RETRIES"),
                telegram_defaults.max_attempts,
            )
            .max(1),
            retry_delay: seconds_or(
                "TELEGRAM_RETRY_DELAY",
                get("TELEGRAM_RETRY_DELAY"),
                telegram_defaults.retry_delay,
            ),
            timeout: seconds_or("TELEGRAM_TIMEOUT", get("TELEGRAM_TIMEOUT"), telegram_defaults.timeout),
        };

        Ok(Self {
            use_persistent_stores,
            database_url,
            database_max_connections: parse_or(
                "DATABASE_MAX_CONNECTIONS",
                get("DATABASE_MAX_CONNECTIONS"),
                defaults.database_max_connections,
            ),
            redis_url: get("REDIS_URL").unwrap_or(defaults.redis_url),
            raw_queue: get("RAW_QUEUE").unwrap_or(defaults.raw_queue),
            completed_queue: get("COMPLETED_QUEUE").unwrap_or(defaults.completed_queue),
            consumer_group: get("CONSUMER_GROUP").unwrap_or(defaults.consumer_group),
            worker_prefetch,
            visibility_timeout: Duration::from_millis(parse_or(
                "VISIBILITY_TIMEOUT_MS",
                get("VISIBILITY_TIMEOUT_MS"),
                defaults.visibility_timeout.as_millis() as u64,
            )),
            transport_timeout: Duration::from_millis(
                parse_or(
                    "TRANSPORT_TIMEOUT_MS",
                    get("TRANSPORT_TIMEOUT_MS"),
                    defaults.transport_timeout.as_millis() as u64,
                )
                .max(1),
            ),
            telegram,
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
        })
    }
}

fn parse_or<T>(var: &'static str, raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + Copy + std::fmt::Debug,
{
    match raw {
        None => default,
        Some(value) => value.parse().unwrap_or_else(|_| {
            warn!(var, value = %value, default = ?default, "invalid setting, using default");
            default
        }),
    }
}

fn seconds_or(var: &'static str, raw: Option<String>, default: Duration) -> Duration {
    match raw {
        None => default,
        Some(value) => match value.parse::<f64>() {
            Ok(secs) if secs.is_finite() && secs >= 0.0 => Duration::from_secs_f64(secs),
            _ => {
                warn!(var, value = %value, default_secs = default.as_secs_f64(), "invalid setting, using default");
                default
            }
        },
    }
}
