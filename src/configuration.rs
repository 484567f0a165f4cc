use crate::{
    analytics::Thresholds, bulk_coordinator::BulkSettings, conflict_detector::DetectionSettings,
    retry::RetryPolicy,
};
use chrono::Duration as ChronoDuration;
use std::{path::PathBuf, time::Duration};

pub trait Configuration: Clone + Send + Sync + 'static {
    fn port(&self) -> u16;
    /// Base URL of the availability service, in-memory storage when absent.
    fn availability_service_url(&self) -> Option<String>;
    fn seed_file(&self) -> Option<PathBuf>;
    fn request_timeout(&self) -> Duration;

    fn batch_size(&self) -> usize;
    fn max_attempts(&self) -> u32;
    fn backoff_base(&self) -> Duration;
    /// How long finished bulk operations stay queryable.
    fn bulk_retention(&self) -> Duration;

    fn default_chairs(&self) -> u32;
    fn time_off_critical_window(&self) -> ChronoDuration;
    fn suggestion_step_minutes(&self) -> i64;
    fn detection_horizon_weeks(&self) -> i64;

    fn revenue_floor(&self) -> f64;
    fn utilization_floor(&self) -> f64;
    fn utilization_high(&self) -> f64;

    fn monitor_interval(&self) -> Duration;
    /// Age after which a conflict monitor is stopped and forgotten.
    fn monitor_ttl(&self) -> Duration;

    fn bulk_settings(&self) -> BulkSettings {
        BulkSettings {
            batch_size: self.batch_size(),
            retry: RetryPolicy::default()
                .with_max_attempts(self.max_attempts())
                .with_base_delay(self.backoff_base()),
            retention: self.bulk_retention(),
        }
    }

    fn detection_settings(&self) -> DetectionSettings {
        DetectionSettings {
            horizon_weeks: self.detection_horizon_weeks(),
            default_chairs: self.default_chairs(),
            time_off_critical_window: self.time_off_critical_window(),
            suggestion_step_minutes: self.suggestion_step_minutes(),
        }
    }

    fn thresholds(&self) -> Thresholds {
        Thresholds {
            revenue_floor: self.revenue_floor(),
            utilization_floor: self.utilization_floor(),
            utilization_high: self.utilization_high(),
        }
    }
}
