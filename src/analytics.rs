//! Read-only utilization and revenue reporting over a schedule snapshot.

use crate::{
    backend::AvailabilityService,
    error::Result,
    schedule_model::{Interval, ScheduleSnapshot},
    types::{DateRange, ProviderId},
};
use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Revenue per booked hour below this suggests a pricing review.
    pub revenue_floor: f64,
    /// Utilization percentage below this suggests trimming hours.
    pub utilization_floor: f64,
    /// Utilization percentage above this suggests adding capacity.
    pub utilization_high: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            revenue_floor: 60.0,
            utilization_floor: 60.0,
            utilization_high: 85.0,
        }
    }
}

impl Thresholds {
    /// Hours busier than this are not counted as low demand.
    fn low_demand(&self) -> f64 {
        self.utilization_floor / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    Pricing,
    ScheduleOptimization,
    CapacityExpansion,
}

/// Advisory output; nothing acts on it automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub message: String,
    pub metric: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationReport {
    pub provider_id: ProviderId,
    pub period: DateRange,
    pub booked_hours: f64,
    pub available_hours: f64,
    /// Percentage in [0, 100].
    pub utilization_rate: f64,
    pub revenue: f64,
    pub revenue_per_hour: f64,
    pub appointments: usize,
    /// Hours of the day (0-23) booked at or above the high band.
    pub peak_hours: Vec<u32>,
    /// Hours of the day with availability but little demand.
    pub low_demand_hours: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_quality_warning: Option<String>,
    pub recommendations: Vec<Recommendation>,
}

fn minute_of_day(time: NaiveTime) -> i64 {
    i64::from(time.num_seconds_from_midnight() / 60)
}

/// Adds the minutes of `interval` falling into each hour of the day.
fn spread_over_hours(buckets: &mut [i64; 24], interval: &Interval) {
    let (start, end) = (minute_of_day(interval.start), minute_of_day(interval.end));
    for (hour, bucket) in buckets.iter_mut().enumerate() {
        let hour_start = hour as i64 * 60;
        let overlap = end.min(hour_start + 60) - start.max(hour_start);
        if overlap > 0 {
            *bucket += overlap;
        }
    }
}

fn percentage(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 {
        0.0
    } else {
        part / whole * 100.0
    }
}

pub fn utilization(
    provider_id: ProviderId,
    period: DateRange,
    snapshot: &ScheduleSnapshot,
    thresholds: &Thresholds,
) -> UtilizationReport {
    let mut available = [0i64; 24];
    let mut booked = [0i64; 24];
    let mut revenue = 0.0;
    let mut appointments = 0;

    for date in period.days() {
        for window in snapshot.available_windows(date) {
            spread_over_hours(&mut available, &window);
        }
        for appointment in snapshot
            .committed_appointments_on(date)
            .filter(|appointment| appointment.provider_id == provider_id)
        {
            spread_over_hours(&mut booked, &Interval::of_appointment(appointment));
            revenue += appointment.price;
            appointments += 1;
        }
    }

    let booked_hours = booked.iter().sum::<i64>() as f64 / 60.0;
    let available_hours = available.iter().sum::<i64>() as f64 / 60.0;
    let raw_rate = percentage(booked_hours, available_hours);
    let data_quality_warning = (raw_rate > 100.0 || (available_hours == 0.0 && booked_hours > 0.0)).then(|| {
        format!("{booked_hours:.1} booked hours exceed {available_hours:.1} available hours; some appointments lie outside availability")
    });
    let utilization_rate = raw_rate.clamp(0.0, 100.0);
    let revenue_per_hour = if booked_hours > 0.0 { revenue / booked_hours } else { 0.0 };

    let open_hours: Vec<(u32, f64)> = (0..24)
        .filter(|hour| available[*hour] > 0)
        .map(|hour| (hour as u32, percentage(booked[hour] as f64, available[hour] as f64)))
        .collect();
    let peak_hours = open_hours
        .iter()
        .filter(|(_, rate)| *rate >= thresholds.utilization_high)
        .map(|(hour, _)| *hour)
        .collect();
    let low_demand_hours = open_hours
        .iter()
        .filter(|(_, rate)| *rate < thresholds.low_demand())
        .map(|(hour, _)| *hour)
        .collect();

    let mut recommendations = Vec::new();
    if booked_hours > 0.0 && revenue_per_hour < thresholds.revenue_floor {
        recommendations.push(Recommendation {
            kind: RecommendationKind::Pricing,
            message: format!(
                "Revenue of {revenue_per_hour:.2} per booked hour is below {:.2}; review service prices",
                thresholds.revenue_floor
            ),
            metric: revenue_per_hour,
            threshold: thresholds.revenue_floor,
        });
    }
    if available_hours > 0.0 && utilization_rate < thresholds.utilization_floor {
        recommendations.push(Recommendation {
            kind: RecommendationKind::ScheduleOptimization,
            message: format!(
                "Only {utilization_rate:.0}% of available hours are booked; consider trimming low-demand hours"
            ),
            metric: utilization_rate,
            threshold: thresholds.utilization_floor,
        });
    }
    if available_hours > 0.0 && utilization_rate > thresholds.utilization_high {
        recommendations.push(Recommendation {
            kind: RecommendationKind::CapacityExpansion,
            message: format!("{utilization_rate:.0}% of available hours are booked; consider opening more hours"),
            metric: utilization_rate,
            threshold: thresholds.utilization_high,
        });
    }

    UtilizationReport {
        provider_id,
        period,
        booked_hours,
        available_hours,
        utilization_rate,
        revenue,
        revenue_per_hour,
        appointments,
        peak_hours,
        low_demand_hours,
        data_quality_warning,
        recommendations,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSummary {
    pub providers: usize,
    pub total_booked_hours: f64,
    pub total_available_hours: f64,
    pub average_utilization: f64,
    pub average_revenue_per_hour: f64,
    pub underutilized: Vec<ProviderId>,
    pub at_capacity: Vec<ProviderId>,
}

pub fn team_summary(reports: &[UtilizationReport], thresholds: &Thresholds) -> TeamSummary {
    let providers = reports.len();
    let average = |metric: &dyn Fn(&UtilizationReport) -> f64| {
        if providers == 0 {
            0.0
        } else {
            reports.iter().map(metric).sum::<f64>() / providers as f64
        }
    };
    TeamSummary {
        providers,
        total_booked_hours: reports.iter().map(|r| r.booked_hours).sum(),
        total_available_hours: reports.iter().map(|r| r.available_hours).sum(),
        average_utilization: average(&|r: &UtilizationReport| r.utilization_rate),
        average_revenue_per_hour: average(&|r: &UtilizationReport| r.revenue_per_hour),
        underutilized: reports
            .iter()
            .filter(|r| r.available_hours > 0.0 && r.utilization_rate < thresholds.utilization_floor)
            .map(|r| r.provider_id)
            .collect(),
        at_capacity: reports
            .iter()
            .filter(|r| r.utilization_rate > thresholds.utilization_high)
            .map(|r| r.provider_id)
            .collect(),
    }
}

/// Loads snapshots from the service and reports on them.
pub struct AnalyticsAggregator<S: ?Sized> {
    service: Arc<S>,
    thresholds: Thresholds,
}

impl<S: ?Sized> Clone for AnalyticsAggregator<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            thresholds: self.thresholds,
        }
    }
}

impl<S: AvailabilityService + ?Sized> AnalyticsAggregator<S> {
    pub fn new(service: Arc<S>, thresholds: Thresholds) -> Self {
        Self { service, thresholds }
    }

    pub async fn utilization(&self, provider_id: ProviderId, period: DateRange) -> Result<UtilizationReport> {
        let snapshot = ScheduleSnapshot::load(self.service.as_ref(), provider_id).await?;
        let report = utilization(provider_id, period, &snapshot, &self.thresholds);
        debug!(
            %provider_id,
            rate = report.utilization_rate,
            recommendations = report.recommendations.len(),
            "Utilization computed"
        );
        Ok(report)
    }

    pub async fn team_summary(&self, providers: &[ProviderId], period: DateRange) -> Result<TeamSummary> {
        let mut reports = Vec::with_capacity(providers.len());
        for provider_id in providers {
            reports.push(self.utilization(*provider_id, period).await?);
        }
        Ok(team_summary(&reports, &self.thresholds))
    }
}
