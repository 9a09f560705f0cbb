//! Configuration for the RESQ session service.
//!
//! All configuration is loaded from environment variables.
//! Nothing personal is read from or written to the environment.

use resq_core::{AlertConfig, Coordinates, DEFAULT_ARMING_SECONDS, DEFAULT_LONG_PRESS};
use std::path::PathBuf;
use std::time::Duration;

/// Default upper bound on a single position request.
pub const DEFAULT_LOCATION_TIMEOUT_SECS: u64 = 10;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address
    pub bind_addr: String,

    /// Server port
    pub port: u16,

    // === Storage ===
    /// Directory of JSON records; in-memory storage when unset
    pub data_dir: Option<PathBuf>,

    // === Location ===
    /// Timeout applied to every position request (default: 10 seconds)
    pub location_timeout: Duration,

    /// Position reported by the fixed provider; no location capability when unset
    pub fixed_location: Option<Coordinates>,

    // === Alert lifecycle ===
    /// Countdown length after a tap (default: 3)
    pub arming_seconds: u8,

    /// Hold duration for the instant trigger (default: 1500 ms)
    pub long_press: Duration,

    /// Record a `cancelled` event when an armed countdown is cancelled
    pub audit_cancelled_arming: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let fixed_lat = env_parse::<f64>("RESQ_FIXED_LAT");
        let fixed_lng = env_parse::<f64>("RESQ_FIXED_LNG");

        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_parse("PORT").unwrap_or(8080),

            data_dir: std::env::var("RESQ_DATA_DIR")
                .ok()
                .filter(|d| !d.is_empty())
                .map(PathBuf::from),

            location_timeout: Duration::from_secs(
                env_parse("LOCATION_TIMEOUT_SECS").unwrap_or(DEFAULT_LOCATION_TIMEOUT_SECS),
            ),
            // Both halves or nothing
            fixed_location: fixed_lat
                .zip(fixed_lng)
                .map(|(lat, lng)| Coordinates::new(lat, lng)),

            arming_seconds: env_parse("ARMING_SECONDS").unwrap_or(DEFAULT_ARMING_SECONDS),
            long_press: env_parse("LONG_PRESS_MS")
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_LONG_PRESS),
            audit_cancelled_arming: std::env::var("AUDIT_CANCELLED_ARMING")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Alert machine tunables derived from this configuration
    pub fn alert(&self) -> AlertConfig {
        AlertConfig {
            arming_seconds: self.arming_seconds,
            long_press: self.long_press,
            audit_cancelled_arming: self.audit_cancelled_arming,
        }
    }

    /// Storage backend name for startup logging
    pub fn storage_kind(&self) -> &'static str {
        if self.data_dir.is_some() {
            "file"
        } else {
            "memory"
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alert_config_follows_fields() {
        let config = Config {
            bind_addr: "127.0.0.1".into(),
            port: 0,
            data_dir: None,
            location_timeout: Duration::from_secs(1),
            fixed_location: None,
            arming_seconds: 5,
            long_press: Duration::from_millis(800),
            audit_cancelled_arming: true,
        };

        let alert = config.alert();
        assert_eq!(alert.arming_seconds, 5);
        assert_eq!(alert.long_press, Duration::from_millis(800));
        assert!(alert.audit_cancelled_arming);
        assert_eq!(config.storage_kind(), "memory");
    }
}
