//! Configuration module for StationWatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use chrono::Duration as ChronoDuration;
use std::env;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "stationwatch.db")
    pub db_path: String,
    /// Mail relay endpoint; alerts are only logged when unset.
    pub mail_endpoint: Option<String>,
    /// Sender address for alert emails.
    pub mail_from: String,
    pub monitor: MonitorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "stationwatch.db".to_string(),
            mail_endpoint: None,
            mail_from: "alerts@stationwatch.local".to_string(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `STATIONWATCH_HTTP_PORT`: HTTP port (default: 8080)
    /// - `STATIONWATCH_DB_PATH`: Database file path (default: "stationwatch.db")
    /// - `STATIONWATCH_TICK_SECONDS`: Monitor cadence in seconds (default: 60)
    /// - `STATIONWATCH_MAIL_ENDPOINT`: Mail relay URL (default: unset)
    /// - `STATIONWATCH_MAIL_FROM`: Sender address (default: "alerts@stationwatch.local")
    pub fn load() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(port) = lookup("STATIONWATCH_HTTP_PORT").and_then(|s| s.parse().ok()) {
            cfg.http_port = port;
        }

        if let Some(db_path) = lookup("STATIONWATCH_DB_PATH") {
            cfg.db_path = db_path;
        }

        let tick_secs = lookup("STATIONWATCH_TICK_SECONDS").and_then(|s| s.parse::<u64>().ok());
        if let Some(secs) = tick_secs {
            if secs > 0 {
                cfg.monitor.tick_interval = Duration::from_secs(secs);
            }
        }

        cfg.mail_endpoint = lookup("STATIONWATCH_MAIL_ENDPOINT").filter(|s| !s.trim().is_empty());

        if let Some(from) = lookup("STATIONWATCH_MAIL_FROM") {
            cfg.mail_from = from;
        }

        cfg
    }
}

/// Timing parameters of the monitoring engine.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How often the scheduler evaluates all stations.
    pub tick_interval: Duration,
    /// Repeat `station_down` alerts for the same threshold are suppressed this long.
    pub down_dedup_window: ChronoDuration,
    /// Repeat `station_online` alerts are suppressed this long.
    pub online_dedup_window: ChronoDuration,
    /// Repeat `station_low_uptime` alerts for the same threshold are suppressed this long.
    pub low_uptime_dedup_window: ChronoDuration,
    /// Lookback used for the `low_uptime` percentage.
    pub uptime_window: ChronoDuration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            down_dedup_window: ChronoDuration::hours(1),
            online_dedup_window: ChronoDuration::hours(1),
            low_uptime_dedup_window: ChronoDuration::hours(24),
            uptime_window: ChronoDuration::hours(24),
        }
    }
}
