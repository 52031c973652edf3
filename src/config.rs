//! Configuration module for uptrail.
//!
//! Loads configuration from environment variables with sensible defaults.

use chrono::{FixedOffset, Offset, Utc};
use std::env;
use std::str::FromStr;

/// Smallest and largest number of archive days that may be retained.
pub const MIN_RETENTION_DAYS: u32 = 30;
pub const MAX_RETENTION_DAYS: u32 = 365;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "uptrail.db")
    pub db_path: String,
    /// Maximum pending jobs kept in the remote queue, 0 = unlimited (default: 200)
    pub queue_max_size: usize,
    /// Seconds a job may sit past its schedule before expiring, 0 = unlimited (default: 86400)
    pub queue_ttl_secs: i64,
    /// Calendar days of archive kept, clamped to 30..=365 (default: 90)
    pub retention_days: u32,
    /// Latency above this many seconds is a policy violation, 0 = disabled
    pub latency_threshold_secs: f64,
    /// Consecutive failures before a streak escalates to ALERT (default: 3)
    pub failure_alert_threshold: u32,
    /// Default seconds between scheduled checks per agent (default: 300)
    pub probe_interval_secs: u64,
    /// Default probe timeout in seconds (default: 10)
    pub probe_timeout_secs: f64,
    /// URL probed when neither the job nor the agent names one
    pub target_url: Option<String>,
    /// Site timezone as minutes east of UTC (default: 0)
    pub utc_offset_minutes: i32,
    /// Optional JSON file with the agent list
    pub agents_file: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "uptrail.db".to_string(),
            queue_max_size: 200,
            queue_ttl_secs: 86_400,
            retention_days: 90,
            latency_threshold_secs: 0.0,
            failure_alert_threshold: 3,
            probe_interval_secs: 300,
            probe_timeout_secs: 10.0,
            target_url: None,
            utc_offset_minutes: 0,
            agents_file: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables (all prefixed with `UPTRAIL_`):
    /// - `HTTP_PORT`, `DB_PATH`
    /// - `QUEUE_MAX_SIZE`, `QUEUE_TTL_SECS`
    /// - `RETENTION_DAYS`, `LATENCY_THRESHOLD_SECS`, `FAILURE_ALERT_THRESHOLD`
    /// - `PROBE_INTERVAL_SECS`, `PROBE_TIMEOUT_SECS`, `TARGET_URL`
    /// - `UTC_OFFSET_MINUTES`, `AGENTS_FILE`
    ///
    /// Values that fail to parse keep their default.
    pub fn load() -> Self {
        let mut cfg = Self::default();

        set_parsed("UPTRAIL_HTTP_PORT", &mut cfg.http_port);
        if let Ok(db_path) = env::var("UPTRAIL_DB_PATH") {
            cfg.db_path = db_path;
        }

        set_parsed("UPTRAIL_QUEUE_MAX_SIZE", &mut cfg.queue_max_size);
        set_parsed("UPTRAIL_QUEUE_TTL_SECS", &mut cfg.queue_ttl_secs);
        set_parsed("UPTRAIL_RETENTION_DAYS", &mut cfg.retention_days);
        set_parsed("UPTRAIL_LATENCY_THRESHOLD_SECS", &mut cfg.latency_threshold_secs);
        set_parsed("UPTRAIL_FAILURE_ALERT_THRESHOLD", &mut cfg.failure_alert_threshold);
        set_parsed("UPTRAIL_PROBE_INTERVAL_SECS", &mut cfg.probe_interval_secs);
        set_parsed("UPTRAIL_PROBE_TIMEOUT_SECS", &mut cfg.probe_timeout_secs);
        set_parsed("UPTRAIL_UTC_OFFSET_MINUTES", &mut cfg.utc_offset_minutes);

        if let Ok(url) = env::var("UPTRAIL_TARGET_URL") {
            if !url.trim().is_empty() {
                cfg.target_url = Some(url);
            }
        }
        if let Ok(path) = env::var("UPTRAIL_AGENTS_FILE") {
            if !path.trim().is_empty() {
                cfg.agents_file = Some(path);
            }
        }

        cfg.normalize()
    }

    /// Clamp values into their supported ranges.
    pub fn normalize(mut self) -> Self {
        self.retention_days = clamp_retention_days(self.retention_days);
        if self.queue_ttl_secs < 0 {
            self.queue_ttl_secs = 0;
        }
        if !self.latency_threshold_secs.is_finite() || self.latency_threshold_secs < 0.0 {
            self.latency_threshold_secs = 0.0;
        }
        if self.failure_alert_threshold == 0 {
            self.failure_alert_threshold = 1;
        }
        if self.probe_interval_secs == 0 {
            self.probe_interval_secs = 300;
        }
        if !self.probe_timeout_secs.is_finite() || self.probe_timeout_secs <= 0.0 {
            self.probe_timeout_secs = 10.0;
        }
        self
    }

    /// The site timezone used for calendar-day bucketing and window wall-clock times.
    pub fn site_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }
}

pub fn clamp_retention_days(days: u32) -> u32 {
    days.clamp(MIN_RETENTION_DAYS, MAX_RETENTION_DAYS)
}

fn set_parsed<T: FromStr>(key: &str, slot: &mut T) {
    if let Ok(raw) = env::var(key) {
        if let Ok(value) = raw.trim().parse() {
            *slot = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.http_port, 8080);
        assert_eq!(cfg.db_path, "uptrail.db");
        assert_eq!(cfg.queue_max_size, 200);
        assert_eq!(cfg.queue_ttl_secs, 86_400);
        assert_eq!(cfg.retention_days, 90);
    }

    #[test]
    fn test_normalize_clamps_ranges() {
        let cfg = ServerConfig {
            retention_days: 5,
            queue_ttl_secs: -10,
            latency_threshold_secs: f64::NAN,
            failure_alert_threshold: 0,
            ..Default::default()
        }
        .normalize();
        assert_eq!(cfg.retention_days, 30);
        assert_eq!(cfg.queue_ttl_secs, 0);
        assert_eq!(cfg.latency_threshold_secs, 0.0);
        assert_eq!(cfg.failure_alert_threshold, 1);

        assert_eq!(clamp_retention_days(1000), 365);
    }

    #[test]
    fn test_site_offset() {
        let cfg = ServerConfig {
            utc_offset_minutes: 120,
            ..Default::default()
        };
        assert_eq!(cfg.site_offset().local_minus_utc(), 7200);

        let bogus = ServerConfig {
            utc_offset_minutes: 100_000,
            ..Default::default()
        };
        assert_eq!(bogus.site_offset().local_minus_utc(), 0);
    }
}
