use std::{env, fmt::Display, net::SocketAddr, path::PathBuf, str::FromStr};

use axum::http::HeaderValue;
use thiserror::Error;
use tracing::info;

/// bcrypt accepts costs in this range.
pub const MIN_BCRYPT_COST: u32 = 4;
pub const MAX_BCRYPT_COST: u32 = 31;

/// Longest accepted session lifetime (ten years).
pub const MAX_SESSION_TTL_SECS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid {key} value `{value}`: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format `{other}`, expected text or json")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub session_ttl_secs: i64,
    pub cookie_secure: bool,
    pub cors_origin: Option<HeaderValue>,
    pub log_dir: Option<PathBuf>,
    pub log_format: LogFormat,
    pub bcrypt_cost: u32,
    /// Keys that were unset and fell back to their defaults.
    pub defaulted: Vec<&'static str>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: "barangay_data".to_string(),
            session_ttl_secs: 86_400,
            cookie_secure: false,
            cors_origin: None,
            log_dir: None,
            log_format: LogFormat::Text,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            defaulted: vec![],
        }
    }
}

impl Config {
    /// Reads the process environment (after `.env` has been loaded).
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let mut defaulted = vec![];

        let session_ttl_secs = try_load(
            &lookup,
            "SESSION_TTL_SECS",
            defaults.session_ttl_secs,
            &mut defaulted,
        )?;
        if !(1..=MAX_SESSION_TTL_SECS).contains(&session_ttl_secs) {
            return Err(ConfigError::Invalid {
                key: "SESSION_TTL_SECS",
                value: session_ttl_secs.to_string(),
                reason: format!("must be between 1 and {MAX_SESSION_TTL_SECS}"),
            });
        }

        let bcrypt_cost = try_load(&lookup, "BCRYPT_COST", defaults.bcrypt_cost, &mut defaulted)?;
        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&bcrypt_cost) {
            return Err(ConfigError::Invalid {
                key: "BCRYPT_COST",
                value: bcrypt_cost.to_string(),
                reason: format!("must be between {MIN_BCRYPT_COST} and {MAX_BCRYPT_COST}"),
            });
        }

        let cors_origin = match lookup("CORS_ORIGIN").filter(|v| !v.trim().is_empty()) {
            Some(origin) => Some(HeaderValue::from_str(origin.trim()).map_err(|e| {
                ConfigError::Invalid {
                    key: "CORS_ORIGIN",
                    value: origin.clone(),
                    reason: e.to_string(),
                }
            })?),
            None => None,
        };

        let bind_addr = try_load(&lookup, "BIND_ADDR", defaults.bind_addr, &mut defaulted)?;
        let database_url = try_load(&lookup, "DATABASE_URL", defaults.database_url, &mut defaulted)?;
        let cookie_secure =
            try_load(&lookup, "COOKIE_SECURE", defaults.cookie_secure, &mut defaulted)?;
        let log_format = try_load(&lookup, "LOG_FORMAT", defaults.log_format, &mut defaulted)?;

        Ok(Self {
            bind_addr,
            database_url,
            session_ttl_secs,
            cookie_secure,
            cors_origin,
            log_dir: lookup("LOG_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            log_format,
            bcrypt_cost,
            defaulted,
        })
    }

    /// Logs the effective settings. Loading happens before the subscriber is
    /// installed, so the server calls this once logging is up.
    pub fn log_summary(&self) {
        for key in &self.defaulted {
            info!("{key} not set, using default");
        }
        info!(
            bind_addr = %self.bind_addr,
            database_url = %self.database_url,
            session_ttl_secs = self.session_ttl_secs,
            cookie_secure = self.cookie_secure,
            cors_origin = ?self.cors_origin,
            log_dir = ?self.log_dir,
            log_format = %self.log_format,
            bcrypt_cost = self.bcrypt_cost,
            "configuration loaded"
        );
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_ttl_secs)
    }
}

fn try_load<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
    defaulted: &mut Vec<&'static str>,
) -> Result<T, ConfigError>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
        None => {
            defaulted.push(key);
            Ok(default)
        }
    }
}

impl Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing::{Event, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    struct CountingLayer {
        count: Arc<AtomicUsize>,
    }

    impl<S: Subscriber> Layer<S> for CountingLayer {
        fn on_event(&self, _event: &Event<'_>, _ctx: Context<'_, S>) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.database_url, "barangay_data");
        assert_eq!(config.session_ttl_secs, 86_400);
        assert!(!config.cookie_secure);
        assert!(config.cors_origin.is_none());
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn values_are_read_from_the_environment() {
        let config = load(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("DATABASE_URL", "/var/lib/barangay"),
            ("SESSION_TTL_SECS", "600"),
            ("COOKIE_SECURE", "true"),
            ("CORS_ORIGIN", "https://transparency.example.ph"),
            ("LOG_FORMAT", "JSON"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.database_url, "/var/lib/barangay");
        assert_eq!(config.session_ttl(), chrono::Duration::minutes(10));
        assert!(config.cookie_secure);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.cors_origin.is_some());
    }

    #[test]
    fn invalid_values_fail_startup() {
        assert!(load(&[("BIND_ADDR", "nowhere")]).is_err());
        assert!(load(&[("SESSION_TTL_SECS", "0")]).is_err());
        assert!(load(&[("SESSION_TTL_SECS", "10000000000000")]).is_err());
        assert!(load(&[("SESSION_TTL_SECS", i64::MAX.to_string().as_str())]).is_err());
        assert!(load(&[("COOKIE_SECURE", "maybe")]).is_err());
        assert!(load(&[("LOG_FORMAT", "xml")]).is_err());
        assert!(load(&[("BCRYPT_COST", "99")]).is_err());
        assert!(load(&[("BCRYPT_COST", "3")]).is_err());
    }

    #[test]
    fn longest_session_ttl_is_accepted() {
        let ttl = MAX_SESSION_TTL_SECS.to_string();
        let config = load(&[("SESSION_TTL_SECS", ttl.as_str()), ("BCRYPT_COST", "4")]).unwrap();
        assert_eq!(config.session_ttl().num_seconds(), MAX_SESSION_TTL_SECS);
        assert_eq!(config.bcrypt_cost, MIN_BCRYPT_COST);
    }

    #[test]
    fn unset_keys_are_reported_once_logging_is_up() {
        let config = load(&[("DATABASE_URL", "/tmp/barangay")]).unwrap();
        assert!(config.defaulted.contains(&"SESSION_TTL_SECS"));
        assert!(!config.defaulted.contains(&"DATABASE_URL"));

        let count = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(CountingLayer {
            count: count.clone(),
        });
        tracing::subscriber::with_default(subscriber, || config.log_summary());
        assert_eq!(count.load(Ordering::SeqCst), config.defaulted.len() + 1);
    }
}
