//! Environment-driven configuration for the telemetry sidecar
//!
//! Recognized variables:
//! - `INTERNAL_SERVER_LISTEN_ADDR` - listen address (default `:28080`, `:0` for any free port)
//! - `INTERNAL_SERVER_WAIT_ENABLE_HEALTH_CHECK_DURATION` - readiness enable timeout (default `1m`)
//! - `INTERNAL_SERVER_HEALTH_CHECK_POLL_INTERVAL` - readiness poll interval (default `15s`)
//! - `OTEL_SERVICE_NAME` / `OTEL_SERVICE_VERSION` - service identity for `/` and `target_info`

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

pub const LISTEN_ADDR_ENV: &str = "INTERNAL_SERVER_LISTEN_ADDR";
pub const READINESS_TIMEOUT_ENV: &str = "INTERNAL_SERVER_WAIT_ENABLE_HEALTH_CHECK_DURATION";
pub const READINESS_POLL_INTERVAL_ENV: &str = "INTERNAL_SERVER_HEALTH_CHECK_POLL_INTERVAL";
pub const SERVICE_NAME_ENV: &str = "OTEL_SERVICE_NAME";
pub const SERVICE_VERSION_ENV: &str = "OTEL_SERVICE_VERSION";

/// Default listen address (all interfaces, well-known port)
pub const DEFAULT_LISTEN_ADDRESS: &str = ":28080";

/// Default time the application has to enable readiness after start
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(60);

/// Default readiness watcher polling cadence
pub const DEFAULT_READINESS_POLL_INTERVAL: Duration = Duration::from_secs(15);

/// Longest accepted duration (`i64::MAX` nanoseconds, about 292 years)
pub const MAX_DURATION: Duration = Duration::from_nanos(i64::MAX as u64);

const UNKNOWN_SERVICE_NAME: &str = "unknown-service";
const UNKNOWN_SERVICE_VERSION: &str = "unknown-version";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid duration for {var}: {value:?}")]
    InvalidDuration { var: &'static str, value: String },

    #[error("{var} must be greater than zero")]
    ZeroDuration { var: &'static str },

    #[error("{var} exceeds the maximum duration of {max:?}")]
    DurationOutOfRange { var: &'static str, max: Duration },

    #[error("INTERNAL_SERVER_LISTEN_ADDR must not be empty")]
    EmptyListenAddress,
}

/// Telemetry server settings
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub listen_address: String,
    pub readiness_timeout: Duration,
    pub readiness_poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: DEFAULT_LISTEN_ADDRESS.to_string(),
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            readiness_poll_interval: DEFAULT_READINESS_POLL_INTERVAL,
        }
    }
}

impl ServerConfig {
    /// Load configuration from the process environment
    ///
    /// Unset variables fall back to defaults. Set but malformed values are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup
    ///
    /// Tests use this to avoid mutating the shared process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let listen_address = match lookup(LISTEN_ADDR_ENV) {
            Some(value) if value.trim().is_empty() => return Err(ConfigError::EmptyListenAddress),
            Some(value) => value.trim().to_string(),
            None => defaults.listen_address,
        };

        let readiness_timeout =
            duration_var(&lookup, READINESS_TIMEOUT_ENV)?.unwrap_or(defaults.readiness_timeout);
        let readiness_poll_interval = duration_var(&lookup, READINESS_POLL_INTERVAL_ENV)?
            .unwrap_or(defaults.readiness_poll_interval);

        let config = Self {
            listen_address,
            readiness_timeout,
            readiness_poll_interval,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the readiness watcher cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_address.trim().is_empty() {
            return Err(ConfigError::EmptyListenAddress);
        }
        if self.readiness_poll_interval.is_zero() {
            return Err(ConfigError::ZeroDuration {
                var: READINESS_POLL_INTERVAL_ENV,
            });
        }
        for (var, value) in [
            (READINESS_TIMEOUT_ENV, self.readiness_timeout),
            (READINESS_POLL_INTERVAL_ENV, self.readiness_poll_interval),
        ] {
            if value > MAX_DURATION {
                return Err(ConfigError::DurationOutOfRange {
                    var,
                    max: MAX_DURATION,
                });
            }
        }
        Ok(())
    }
}

fn duration_var<F>(lookup: &F, var: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => parse_duration(&value)
            .map(Some)
            .ok_or(ConfigError::InvalidDuration { var, value }),
    }
}

/// Parse a duration string like "1m", "250ms", "1.5s" or "1h15m30s"
///
/// Accepts the Go `time.ParseDuration` format: a sequence of decimal numbers,
/// each with an optional fraction and a unit suffix (`ns`, `us`/`µs`, `ms`,
/// `s`, `m`, `h`), an optional leading `+`, and a bare `0`. Negative values,
/// unknown units and anything beyond [`MAX_DURATION`] are rejected.
pub fn parse_duration(duration_str: &str) -> Option<Duration> {
    let trimmed = duration_str.trim();
    let mut rest = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if rest == "0" {
        return Some(Duration::ZERO);
    }
    if rest.is_empty() {
        return None;
    }

    let mut total_nanos: u128 = 0;
    while !rest.is_empty() {
        let (whole, after) = split_digits(rest);
        let (fraction, after) = match after.strip_prefix('.') {
            Some(after_dot) => split_digits(after_dot),
            None => ("", after),
        };
        if whole.is_empty() && fraction.is_empty() {
            return None;
        }

        let unit_len = after
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after.len());
        let (unit, after) = after.split_at(unit_len);
        let unit_nanos: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60_000_000_000,
            "h" => 3_600_000_000_000,
            _ => return None,
        };

        let mut segment = if whole.is_empty() {
            0
        } else {
            whole.parse::<u128>().ok()?.checked_mul(unit_nanos)?
        };
        if !fraction.is_empty() {
            // Digits past 20 cannot change the nanosecond result
            let fraction = &fraction[..fraction.len().min(20)];
            let scale = 10u128.pow(fraction.len() as u32);
            segment = segment.checked_add(fraction.parse::<u128>().ok()? * unit_nanos / scale)?;
        }

        total_nanos = total_nanos.checked_add(segment)?;
        rest = after;
    }

    let nanos = u64::try_from(total_nanos).ok()?;
    let total = Duration::from_nanos(nanos);
    (total <= MAX_DURATION).then_some(total)
}

fn split_digits(s: &str) -> (&str, &str) {
    let len = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    s.split_at(len)
}

/// Identity reported on the index endpoint and in `target_info`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    #[serde(rename = "service")]
    pub name: String,
    pub version: String,
}

impl ServiceInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Read service identity from the OpenTelemetry environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            name: non_empty(SERVICE_NAME_ENV).unwrap_or_else(|| UNKNOWN_SERVICE_NAME.to_string()),
            version: non_empty(SERVICE_VERSION_ENV)
                .unwrap_or_else(|| UNKNOWN_SERVICE_VERSION.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = ServerConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.listen_address, ":28080");
        assert_eq!(config.readiness_timeout, Duration::from_secs(60));
        assert_eq!(config.readiness_poll_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_reads_all_variables() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            (LISTEN_ADDR_ENV, ":0"),
            (READINESS_TIMEOUT_ENV, "5s"),
            (READINESS_POLL_INTERVAL_ENV, "250ms"),
        ]))
        .unwrap();

        assert_eq!(config.listen_address, ":0");
        assert_eq!(config.readiness_timeout, Duration::from_secs(5));
        assert_eq!(config.readiness_poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_malformed_duration_is_error() {
        let err = ServerConfig::from_lookup(lookup_from(&[(READINESS_TIMEOUT_ENV, "soon")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidDuration {
                var: READINESS_TIMEOUT_ENV,
                value: "soon".to_string()
            }
        );
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = ServerConfig::from_lookup(lookup_from(&[(READINESS_POLL_INTERVAL_ENV, "0s")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDuration { .. }));
    }

    #[test]
    fn test_empty_listen_address_rejected() {
        let err = ServerConfig::from_lookup(lookup_from(&[(LISTEN_ADDR_ENV, "  ")])).unwrap_err();
        assert_eq!(err, ConfigError::EmptyListenAddress);
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("1m"), Some(Duration::from_secs(60)));
        assert_eq!(parse_duration("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration(" 15s "), Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_parse_duration_compound() {
        assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_duration("1h1m1s"), Some(Duration::from_secs(3661)));
        assert_eq!(parse_duration("1s500ms"), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_parse_duration_fractions_and_small_units() {
        assert_eq!(parse_duration("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_duration(".5m"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("2.h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("500us"), Some(Duration::from_micros(500)));
        assert_eq!(parse_duration("500µs"), Some(Duration::from_micros(500)));
        assert_eq!(parse_duration("10ns"), Some(Duration::from_nanos(10)));
        assert_eq!(
            parse_duration("1h15m30.918273645s"),
            Some(Duration::new(4530, 918_273_645))
        );
    }

    #[test]
    fn test_parse_duration_zero_and_sign() {
        assert_eq!(parse_duration("0"), Some(Duration::ZERO));
        assert_eq!(parse_duration("+0"), Some(Duration::ZERO));
        assert_eq!(parse_duration("0s"), Some(Duration::ZERO));
        assert_eq!(parse_duration("+5s"), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("10"), None);
        assert_eq!(parse_duration("s"), None);
        assert_eq!(parse_duration(".s"), None);
        assert_eq!(parse_duration("5d"), None);
        assert_eq!(parse_duration("-5s"), None);
        assert_eq!(parse_duration("1.5.5s"), None);
    }

    #[test]
    fn test_parse_duration_range() {
        assert_eq!(parse_duration("2562047h47m16.854775807s"), Some(MAX_DURATION));
        assert_eq!(parse_duration("2562047h47m16.854775808s"), None);
        assert_eq!(parse_duration("3000000000000000h"), None);
    }

    #[test]
    fn test_oversized_timeout_rejected() {
        let err = ServerConfig::from_lookup(lookup_from(&[(
            READINESS_TIMEOUT_ENV,
            "3000000000000000h",
        )]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration { .. }));

        let config = ServerConfig {
            readiness_timeout: Duration::MAX,
            ..ServerConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::DurationOutOfRange {
                var: READINESS_TIMEOUT_ENV,
                max: MAX_DURATION
            })
        );

        let config = ServerConfig {
            readiness_poll_interval: Duration::MAX,
            ..ServerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DurationOutOfRange { .. })
        ));
    }

    #[test]
    fn test_service_info_serializes_as_service_and_version() {
        let json = serde_json::to_value(ServiceInfo::new("checkout", "1.2.3")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "service": "checkout", "version": "1.2.3" })
        );
    }

    #[test]
    fn test_service_info_fallbacks() {
        let info = ServiceInfo::from_lookup(lookup_from(&[]));
        assert_eq!(info.name, "unknown-service");
        assert_eq!(info.version, "unknown-version");

        let info = ServiceInfo::from_lookup(lookup_from(&[
            (SERVICE_NAME_ENV, "checkout"),
            (SERVICE_VERSION_ENV, "1.2.3"),
        ]));
        assert_eq!(info, ServiceInfo::new("checkout", "1.2.3"));
    }
}
