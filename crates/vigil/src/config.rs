//! Environment-driven configuration.
//!
//! All knobs come from environment variables and are validated once at
//! startup; a process that gets past [`Config::from_env`] has a usable
//! monitoring setup. At least one trigger (scheduled check or forced
//! restart) must be configured, and a scheduled check requires a memory
//! ceiling to compare against.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use guard::GuardConfig;
use thiserror::Error;

use crate::platform::PlatformConfig;

const DEFAULT_PLATFORM_API_URL: &str = "https://api.platform.internal/v1";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid value {value:?} for {name}")]
    InvalidVar { name: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
    #[error("at least one of CHECK_INTERVAL_SECS or FORCED_RESTART_INTERVAL_SECS must be set")]
    NoTriggersConfigured,
    #[error("MEMORY_LIMIT_GB is required when CHECK_INTERVAL_SECS is set")]
    MissingMemoryLimit,
}

/// The monitored service+environment identity this process is scoped to.
#[derive(Debug, Clone)]
pub struct Target {
    /// Used for metric resolution and deployment resolution.
    pub service_id: String,
    /// Used for alert matching.
    pub service_name: String,
    /// Used for deployment resolution and alert matching.
    pub environment_id: String,
    /// Used for metric resolution.
    pub environment_name: String,
    /// Memory ceiling in GB; present whenever scheduled checks run.
    pub memory_limit_gb: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub platform: PlatformConfig,
    pub target: Target,
    /// Scheduled-check period, when that trigger is enabled.
    pub check_interval: Option<Duration>,
    /// Forced-restart period, when that trigger is enabled.
    pub forced_restart_interval: Option<Duration>,
    pub guard: GuardConfig,
    pub event_log_capacity: usize,
    /// Whether a matching webhook alert triggers a restart or is only
    /// logged.
    pub auto_restart_on_alert: bool,
    pub port: u16,
    /// When set, `/api` routes require this value in `X-API-Key`.
    pub api_key: Option<String>,
}

impl Config {
    /// Reads and validates the full configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the first missing, malformed, or
    /// inconsistent variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let platform = PlatformConfig {
            base_url: optional("PLATFORM_API_URL")
                .unwrap_or_else(|| DEFAULT_PLATFORM_API_URL.to_string()),
            api_token: require("PLATFORM_API_TOKEN")?,
            project_id: require("PLATFORM_PROJECT_ID")?,
            request_timeout: Duration::from_secs(
                parse_var("REQUEST_TIMEOUT_SECS")?.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
        };

        let target = Target {
            service_id: require("TARGET_SERVICE_ID")?,
            service_name: require("TARGET_SERVICE_NAME")?,
            environment_id: require("TARGET_ENVIRONMENT_ID")?,
            environment_name: require("TARGET_ENVIRONMENT_NAME")?,
            memory_limit_gb: parse_var("MEMORY_LIMIT_GB")?,
        };

        let check_interval = interval_var("CHECK_INTERVAL_SECS")?;
        let forced_restart_interval = interval_var("FORCED_RESTART_INTERVAL_SECS")?;
        if check_interval.is_none() && forced_restart_interval.is_none() {
            return Err(ConfigError::NoTriggersConfigured);
        }
        if check_interval.is_some() && target.memory_limit_gb.is_none() {
            return Err(ConfigError::MissingMemoryLimit);
        }

        let defaults = GuardConfig::default();
        let guard = GuardConfig {
            failure_threshold: parse_var("GUARD_FAILURE_THRESHOLD")?
                .unwrap_or(defaults.failure_threshold),
            reset_timeout: parse_var("GUARD_RESET_TIMEOUT_MS")?
                .map_or(defaults.reset_timeout, Duration::from_millis),
        };

        Ok(Self {
            platform,
            target,
            check_interval,
            forced_restart_interval,
            guard,
            event_log_capacity: parse_var("EVENT_LOG_CAPACITY")?
                .unwrap_or(crate::events::DEFAULT_CAPACITY),
            auto_restart_on_alert: optional("AUTO_RESTART_ON_ALERT")
                .map_or(true, |v| v == "true" || v == "1"),
            port: parse_var("PORT")?.unwrap_or(DEFAULT_PORT),
            api_key: optional("API_KEY"),
        })
    }
}

/// Empty values are treated the same as unset ones.
fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::MissingVar(name))
}

fn parse_var<T: FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match optional(name) {
        None => Ok(None),
        Some(raw) => match raw.parse() {
            Ok(value) => Ok(Some(value)),
            Err(_) => Err(ConfigError::InvalidVar { name, value: raw }),
        },
    }
}

fn interval_var(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    match parse_var::<u64>(name)? {
        None => Ok(None),
        Some(0) => Err(ConfigError::ZeroInterval(name)),
        Some(secs) => Ok(Some(Duration::from_secs(secs))),
    }
}
