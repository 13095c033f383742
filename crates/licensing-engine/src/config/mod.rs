use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub licensing: LicensingConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            licensing: LicensingConfig::from_env()?,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// How a multi-channel alert send treats a failing channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlertDeliveryMode {
    /// Attempt every channel and record each outcome.
    #[default]
    PerChannel,
    /// Abort on the first failing channel and fail the whole alert.
    FailFast,
}

impl AlertDeliveryMode {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "per_channel" | "per-channel" => Ok(Self::PerChannel),
            "fail_fast" | "fail-fast" => Ok(Self::FailFast),
            other => Err(ConfigError::InvalidDeliveryMode(other.to_string())),
        }
    }
}

/// Business knobs of the workflow and payment engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicensingConfig {
    /// Days added to the last payment date to derive the next due date.
    pub due_window_days: i64,
    /// `applicationStatus` written once an applicant's dues are fully paid.
    pub paid_status_label: String,
    /// Duration stamped on licenses issued by the workflow trigger.
    pub license_duration: String,
    pub alert_delivery: AlertDeliveryMode,
}

impl Default for LicensingConfig {
    fn default() -> Self {
        Self {
            due_window_days: 30,
            paid_status_label: "Submitted".to_string(),
            license_duration: "3 Years".to_string(),
            alert_delivery: AlertDeliveryMode::PerChannel,
        }
    }
}

impl LicensingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let due_window_days = match env::var("LICENSING_DUE_WINDOW_DAYS") {
            Ok(raw) => raw
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|days| *days > 0)
                .ok_or(ConfigError::InvalidDueWindow)?,
            Err(_) => defaults.due_window_days,
        };
        let paid_status_label =
            env::var("LICENSING_PAID_STATUS_LABEL").unwrap_or(defaults.paid_status_label);
        let license_duration =
            env::var("LICENSING_LICENSE_DURATION").unwrap_or(defaults.license_duration);
        let alert_delivery = match env::var("ALERT_DELIVERY_MODE") {
            Ok(raw) => AlertDeliveryMode::parse(&raw)?,
            Err(_) => defaults.alert_delivery,
        };

        Ok(Self {
            due_window_days,
            paid_status_label,
            license_duration,
            alert_delivery,
        })
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidDueWindow,
    InvalidDeliveryMode(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidDueWindow => {
                write!(f, "LICENSING_DUE_WINDOW_DAYS must be a positive integer")
            }
            ConfigError::InvalidDeliveryMode(value) => write!(
                f,
                "ALERT_DELIVERY_MODE must be 'per_channel' or 'fail_fast' (found '{value}')"
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidDueWindow
            | ConfigError::InvalidDeliveryMode(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for key in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "LICENSING_DUE_WINDOW_DAYS",
            "LICENSING_PAID_STATUS_LABEL",
            "LICENSING_LICENSE_DURATION",
            "ALERT_DELIVERY_MODE",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.licensing, LicensingConfig::default());
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
        reset_env();
    }

    #[test]
    fn licensing_overrides_are_read() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("LICENSING_DUE_WINDOW_DAYS", "45");
        env::set_var("LICENSING_PAID_STATUS_LABEL", "Paid");
        env::set_var("ALERT_DELIVERY_MODE", "fail-fast");
        let config = LicensingConfig::from_env().expect("overrides parse");
        assert_eq!(config.due_window_days, 45);
        assert_eq!(config.paid_status_label, "Paid");
        assert_eq!(config.license_duration, "3 Years");
        assert_eq!(config.alert_delivery, AlertDeliveryMode::FailFast);
        reset_env();
    }

    #[test]
    fn rejects_invalid_licensing_values() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("LICENSING_DUE_WINDOW_DAYS", "0");
        assert!(matches!(
            LicensingConfig::from_env(),
            Err(ConfigError::InvalidDueWindow)
        ));
        reset_env();
        env::set_var("ALERT_DELIVERY_MODE", "broadcast");
        assert!(matches!(
            LicensingConfig::from_env(),
            Err(ConfigError::InvalidDeliveryMode(_))
        ));
        reset_env();
    }
}
