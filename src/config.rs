use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub coordinate_queue_size: usize,
    pub batch_interval: Duration,
    pub ingest_timeout: Duration,
    /// `None` leaves dispatch to explicit triggers only.
    pub matching_interval: Option<Duration>,
    pub notification_retry_ms: u64,
    pub event_buffer_size: usize,
    pub fixture_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            coordinate_queue_size: 10_000,
            batch_interval: Duration::from_millis(100),
            ingest_timeout: Duration::from_millis(5_000),
            matching_interval: None,
            notification_retry_ms: 500,
            event_buffer_size: 1024,
            fixture_path: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            Some("compact") | None => LogFormat::Compact,
            Some(other) => {
                return Err(AppError::Internal(format!(
                    "invalid LOG_FORMAT: {other}, expected compact or json"
                )))
            }
        };

        let coordinate_queue_size: usize = positive(
            &lookup,
            "COORDINATE_QUEUE_SIZE",
            defaults.coordinate_queue_size,
        )?;
        let batch_interval_ms: u64 = positive(&lookup, "BATCH_INTERVAL_MS", 100)?;
        let ingest_timeout_ms: u64 = positive(&lookup, "INGEST_TIMEOUT_MS", 5_000)?;
        let event_buffer_size: usize =
            positive(&lookup, "EVENT_BUFFER_SIZE", defaults.event_buffer_size)?;
        let matching_interval_ms: u64 = parse_or_default(&lookup, "MATCHING_INTERVAL_MS", 0)?;

        Ok(Self {
            http_port: parse_or_default(&lookup, "HTTP_PORT", defaults.http_port)?,
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format,
            coordinate_queue_size,
            batch_interval: Duration::from_millis(batch_interval_ms),
            ingest_timeout: Duration::from_millis(ingest_timeout_ms),
            matching_interval: (matching_interval_ms > 0)
                .then(|| Duration::from_millis(matching_interval_ms)),
            notification_retry_ms: parse_or_default(
                &lookup,
                "NOTIFICATION_RETRY_MS",
                defaults.notification_retry_ms,
            )?,
            event_buffer_size,
            fixture_path: lookup("FIXTURE_PATH").map(PathBuf::from),
        })
    }
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        None => Ok(default),
    }
}

/// Like `parse_or_default`, but zero is refused.
fn positive<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + PartialEq + Default,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let value = parse_or_default(lookup, key, default)?;
    if value == T::default() {
        return Err(AppError::Internal(format!("invalid {key}: must be > 0")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use super::{Config, LogFormat};
    use crate::error::AppError;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, AppError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_yields_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.log_format, LogFormat::Compact);
        assert_eq!(config.batch_interval, Duration::from_millis(100));
        assert_eq!(config.ingest_timeout, Duration::from_millis(5_000));
        assert_eq!(config.event_buffer_size, 1024);
        assert!(config.matching_interval.is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config_from(&[
            ("LOG_FORMAT", "json"),
            ("MATCHING_INTERVAL_MS", "250"),
            ("EVENT_BUFFER_SIZE", "16"),
        ])
        .unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.matching_interval, Some(Duration::from_millis(250)));
        assert_eq!(config.event_buffer_size, 16);
    }

    #[test]
    fn zero_sizes_and_durations_fail_startup() {
        for key in [
            "COORDINATE_QUEUE_SIZE",
            "BATCH_INTERVAL_MS",
            "INGEST_TIMEOUT_MS",
            "EVENT_BUFFER_SIZE",
        ] {
            match config_from(&[(key, "0")]) {
                Err(AppError::Internal(message)) => assert!(message.contains(key), "{message}"),
                other => panic!("{key}=0 was accepted: {other:?}"),
            }
        }
    }

    #[test]
    fn unparsable_values_are_reported() {
        assert!(matches!(
            config_from(&[("HTTP_PORT", "eighty")]),
            Err(AppError::Internal(_))
        ));
        assert!(matches!(
            config_from(&[("LOG_FORMAT", "xml")]),
            Err(AppError::Internal(_))
        ));
    }
}
