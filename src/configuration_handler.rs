use crate::configuration::Configuration;
use chrono::Duration as ChronoDuration;
use clap::Parser;
use std::{path::PathBuf, time::Duration};

/// Availability manager: schedules, conflicts, bulk changes and time off for a barber team.
#[derive(Parser, Debug, Clone)]
#[command(name = "availability_manager", version, about)]
pub struct ConfigurationHandler {
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Base URL of the availability service. Schedules are kept in memory when omitted.
    #[arg(long, env = "AVAILABILITY_SERVICE_URL")]
    availability_service_url: Option<String>,

    /// JSON file with initial slots, templates, time off and appointments for the in-memory store.
    #[arg(long, env = "SEED_FILE")]
    seed_file: Option<PathBuf>,

    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 10)]
    request_timeout_secs: u64,

    #[arg(long, env = "BATCH_SIZE", default_value_t = 5)]
    batch_size: usize,

    #[arg(long, env = "MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,

    #[arg(long, env = "BACKOFF_BASE_MS", default_value_t = 200)]
    backoff_base_ms: u64,

    #[arg(long, env = "BULK_RETENTION_SECS", default_value_t = 3600)]
    bulk_retention_secs: u64,

    /// Chairs assumed at a location that does not publish its capacity.
    #[arg(long, env = "DEFAULT_CHAIRS", default_value_t = 4)]
    default_chairs: u32,

    #[arg(long, env = "TIME_OFF_CRITICAL_HOURS", default_value_t = 48)]
    time_off_critical_hours: i64,

    #[arg(long, env = "SUGGESTION_STEP_MINUTES", default_value_t = 15)]
    suggestion_step_minutes: i64,

    #[arg(long, env = "DETECTION_HORIZON_WEEKS", default_value_t = 8)]
    detection_horizon_weeks: i64,

    #[arg(long, env = "REVENUE_FLOOR", default_value_t = 60.0)]
    revenue_floor: f64,

    #[arg(long, env = "UTILIZATION_FLOOR", default_value_t = 60.0)]
    utilization_floor: f64,

    #[arg(long, env = "UTILIZATION_HIGH", default_value_t = 85.0)]
    utilization_high: f64,

    #[arg(long, env = "MONITOR_INTERVAL_SECS", default_value_t = 30)]
    monitor_interval_secs: u64,

    #[arg(long, env = "MONITOR_TTL_SECS", default_value_t = 3600)]
    monitor_ttl_secs: u64,
}

impl ConfigurationHandler {
    /// Reads command line arguments, falling back to the environment and a `.env` file.
    pub fn parse_arguments() -> Self {
        dotenvy::dotenv().ok();
        Self::parse()
    }
}

impl Configuration for ConfigurationHandler {
    fn port(&self) -> u16 {
        self.port
    }

    fn availability_service_url(&self) -> Option<String> {
        self.availability_service_url.clone()
    }

    fn seed_file(&self) -> Option<PathBuf> {
        self.seed_file.clone()
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    fn bulk_retention(&self) -> Duration {
        Duration::from_secs(self.bulk_retention_secs)
    }

    fn default_chairs(&self) -> u32 {
        self.default_chairs
    }

    fn time_off_critical_window(&self) -> ChronoDuration {
        ChronoDuration::hours(self.time_off_critical_hours)
    }

    fn suggestion_step_minutes(&self) -> i64 {
        self.suggestion_step_minutes
    }

    fn detection_horizon_weeks(&self) -> i64 {
        self.detection_horizon_weeks
    }

    fn revenue_floor(&self) -> f64 {
        self.revenue_floor
    }

    fn utilization_floor(&self) -> f64 {
        self.utilization_floor
    }

    fn utilization_high(&self) -> f64 {
        self.utilization_high
    }

    fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    fn monitor_ttl(&self) -> Duration {
        Duration::from_secs(self.monitor_ttl_secs)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let configuration = ConfigurationHandler::parse_from(["availability_manager"]);
        let bulk = configuration.bulk_settings();
        assert_eq!(bulk.batch_size, 5);
        assert_eq!(bulk.retry.max_attempts, 3);
        assert_eq!(bulk.retry.base_delay, Duration::from_millis(200));
        assert_eq!(bulk.retention, Duration::from_secs(3600));
        assert_eq!(configuration.monitor_ttl(), Duration::from_secs(3600));

        let detection = configuration.detection_settings();
        assert_eq!(detection.time_off_critical_window, ChronoDuration::hours(48));
        assert_eq!(detection.default_chairs, 4);
        assert_eq!(detection.horizon_weeks, 8);

        let thresholds = configuration.thresholds();
        assert_eq!(thresholds.revenue_floor, 60.0);
        assert_eq!(thresholds.utilization_high, 85.0);
    }

    #[test]
    fn test_arguments_override_defaults() {
        let configuration = ConfigurationHandler::parse_from([
            "availability_manager",
            "--port",
            "8080",
            "--availability-service-url",
            "http://scheduling.internal/api",
            "--batch-size",
            "2",
            "--max-attempts",
            "0",
            "--suggestion-step-minutes",
            "30",
        ]);
        assert_eq!(configuration.port(), 8080);
        assert_eq!(
            configuration.availability_service_url().as_deref(),
            Some("http://scheduling.internal/api")
        );
        assert_eq!(configuration.bulk_settings().batch_size, 2);
        // A policy always makes at least one attempt.
        assert_eq!(configuration.bulk_settings().retry.max_attempts, 1);
        assert_eq!(configuration.detection_settings().suggestion_step_minutes, 30);
    }

    #[test]
    fn test_rejects_malformed_numbers() {
        let result = ConfigurationHandler::try_parse_from(["availability_manager", "--port", "eighty"]);
        assert!(result.is_err());
    }
}
