//! Lifecycle of time-off requests and the manager-side triage views.

use crate::{
    backend::AvailabilityService,
    error::{CoreError, Result},
    locks::KeyedLocks,
    schedule_model::validate_time_off,
    types::{DateRange, ProviderId, TimeOffRequest, TimeOffStatus},
};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Who asks for a cancellation; the allowed transitions depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Canceller {
    Requester(Uuid),
    Administrator(Uuid),
}

impl Canceller {
    fn id(&self) -> Uuid {
        match self {
            Canceller::Requester(id) | Canceller::Administrator(id) => *id,
        }
    }
}

fn invalid(request: &TimeOffRequest, to: TimeOffStatus, reason: impl Into<String>) -> CoreError {
    CoreError::InvalidStateTransition {
        from: request.status,
        to,
        reason: reason.into(),
    }
}

fn decide(
    request: &TimeOffRequest,
    to: TimeOffStatus,
    actor_id: Uuid,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> Result<TimeOffRequest> {
    if request.status != TimeOffStatus::Requested {
        return Err(invalid(request, to, "only requested time off can be decided"));
    }
    Ok(TimeOffRequest {
        status: to,
        decided_at: Some(now),
        decided_by: Some(actor_id),
        decision_notes: notes,
        ..request.clone()
    })
}

pub fn approve(
    request: &TimeOffRequest,
    actor_id: Uuid,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> Result<TimeOffRequest> {
    decide(request, TimeOffStatus::Approved, actor_id, notes, now)
}

pub fn deny(
    request: &TimeOffRequest,
    actor_id: Uuid,
    reason: String,
    now: DateTime<Utc>,
) -> Result<TimeOffRequest> {
    decide(request, TimeOffStatus::Denied, actor_id, Some(reason), now)
}

/// A pending request may be withdrawn by its requester; an approved one only
/// revoked by an administrator.
pub fn cancel(request: &TimeOffRequest, canceller: Canceller, now: DateTime<Utc>) -> Result<TimeOffRequest> {
    match (request.status, canceller) {
        (TimeOffStatus::Requested, Canceller::Requester(id)) if id != request.provider_id => Err(invalid(
            request,
            TimeOffStatus::Cancelled,
            "only the requester can withdraw a pending request",
        )),
        (TimeOffStatus::Requested, Canceller::Requester(_))
        | (TimeOffStatus::Approved, Canceller::Administrator(_)) => Ok(TimeOffRequest {
            status: TimeOffStatus::Cancelled,
            decided_at: Some(now),
            decided_by: Some(canceller.id()),
            ..request.clone()
        }),
        (TimeOffStatus::Requested, Canceller::Administrator(_)) => Err(invalid(
            request,
            TimeOffStatus::Cancelled,
            "a pending request is denied, not cancelled, by an administrator",
        )),
        (TimeOffStatus::Approved, Canceller::Requester(_)) => Err(invalid(
            request,
            TimeOffStatus::Cancelled,
            "approved time off can only be revoked by an administrator",
        )),
        (TimeOffStatus::Denied | TimeOffStatus::Cancelled, _) => {
            Err(invalid(request, TimeOffStatus::Cancelled, "request is already closed"))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Urgent,
}

/// Triage priority from the days left until the request starts.
pub fn urgency(start_date: NaiveDate, today: NaiveDate) -> Urgency {
    match (start_date - today).num_days() {
        i64::MIN..=3 => Urgency::Urgent,
        4..=7 => Urgency::High,
        8..=14 => Urgency::Medium,
        _ => Urgency::Low,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "period", rename_all = "snake_case")]
pub enum PeriodFilter {
    /// Starting today or later.
    Upcoming,
    /// Overlapping the current calendar month.
    ThisPeriod,
    NextPeriod,
    Range { start: NaiveDate, end: NaiveDate },
}

fn month_of(date: NaiveDate) -> DateRange {
    let first = date.with_day(1).unwrap_or(date);
    let next = first
        .checked_add_months(chrono::Months::new(1))
        .unwrap_or(first);
    DateRange::new(first, next - Duration::days(1))
}

impl PeriodFilter {
    fn matches(&self, request: &TimeOffRequest, today: NaiveDate) -> bool {
        match self {
            PeriodFilter::Upcoming => request.start_date >= today,
            PeriodFilter::ThisPeriod => month_of(today).overlaps(&request.dates()),
            PeriodFilter::NextPeriod => {
                let next_month = month_of(today).end + Duration::days(1);
                month_of(next_month).overlaps(&request.dates())
            }
            PeriodFilter::Range { start, end } => DateRange::new(*start, *end).overlaps(&request.dates()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOffFilter {
    #[serde(default)]
    pub status: Option<TimeOffStatus>,
    #[serde(default)]
    pub provider_id: Option<ProviderId>,
    #[serde(flatten)]
    pub period: Option<PeriodFilter>,
    #[serde(default)]
    pub search: Option<String>,
}

impl TimeOffFilter {
    pub fn matches(&self, request: &TimeOffRequest, today: NaiveDate) -> bool {
        if self.status.is_some_and(|status| status != request.status) {
            return false;
        }
        if self.provider_id.is_some_and(|provider| provider != request.provider_id) {
            return false;
        }
        if self.period.is_some_and(|period| !period.matches(request, today)) {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => {
                let term = term.to_lowercase();
                [&request.reason, &request.notes, &request.provider_name]
                    .iter()
                    .any(|field| field.to_lowercase().contains(&term))
            }
            _ => true,
        }
    }
}

/// Applies `filter` and orders pending requests first, then by start date.
pub fn filter_requests(
    requests: impl IntoIterator<Item = TimeOffRequest>,
    filter: &TimeOffFilter,
    today: NaiveDate,
) -> Vec<TimeOffRequest> {
    let mut matching: Vec<TimeOffRequest> = requests
        .into_iter()
        .filter(|request| filter.matches(request, today))
        .collect();
    matching.sort_by_key(|request| {
        (
            request.status != TimeOffStatus::Requested,
            request.start_date,
            request.created_at,
        )
    });
    matching
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageEntry {
    pub urgency: Urgency,
    pub days_until_start: i64,
    #[serde(flatten)]
    pub request: TimeOffRequest,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOffSummary {
    pub requested: usize,
    pub approved: usize,
    pub denied: usize,
    pub cancelled: usize,
    pub urgent_pending: usize,
}

pub fn summarize(requests: &[TimeOffRequest], today: NaiveDate) -> TimeOffSummary {
    requests.iter().fold(TimeOffSummary::default(), |mut summary, request| {
        match request.status {
            TimeOffStatus::Requested => {
                summary.requested += 1;
                if urgency(request.start_date, today) == Urgency::Urgent {
                    summary.urgent_pending += 1;
                }
            }
            TimeOffStatus::Approved => summary.approved += 1,
            TimeOffStatus::Denied => summary.denied += 1,
            TimeOffStatus::Cancelled => summary.cancelled += 1,
        }
        summary
    })
}

/// Transitions stored requests; transitions on one request never interleave.
pub struct ApprovalWorkflow<S: ?Sized> {
    service: Arc<S>,
    locks: KeyedLocks,
}

impl<S: ?Sized> Clone for ApprovalWorkflow<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            locks: self.locks.clone(),
        }
    }
}

impl<S: AvailabilityService + ?Sized> ApprovalWorkflow<S> {
    pub fn new(service: Arc<S>) -> Self {
        Self {
            service,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn submit(&self, mut request: TimeOffRequest) -> Result<TimeOffRequest> {
        request.status = TimeOffStatus::Requested;
        request.decided_at = None;
        request.decided_by = None;
        request.decision_notes = None;
        validate_time_off(&request)?;

        let _guard = self.locks.acquire(request.id).await;
        match self.service.time_off_request(request.id).await {
            Ok(existing) => {
                warn!(id = %request.id, status = %existing.status, "Time-off request submitted twice");
                return Err(CoreError::InvalidStateTransition {
                    from: existing.status,
                    to: TimeOffStatus::Requested,
                    reason: "request already exists".into(),
                });
            }
            Err(CoreError::NotFound { .. }) => {}
            Err(err) => return Err(err),
        }
        self.service.write_time_off(request.clone()).await?;
        info!(id = %request.id, provider_id = %request.provider_id, start = %request.start_date, end = %request.end_date, "Time off requested");
        Ok(request)
    }

    pub async fn approve(&self, id: Uuid, actor_id: Uuid, notes: Option<String>) -> Result<TimeOffRequest> {
        self.transition(id, |request| approve(request, actor_id, notes, Utc::now()))
            .await
    }

    pub async fn deny(&self, id: Uuid, actor_id: Uuid, reason: String) -> Result<TimeOffRequest> {
        self.transition(id, |request| deny(request, actor_id, reason, Utc::now()))
            .await
    }

    pub async fn cancel(&self, id: Uuid, canceller: Canceller) -> Result<TimeOffRequest> {
        self.transition(id, |request| cancel(request, canceller, Utc::now()))
            .await
    }

    async fn transition<F>(&self, id: Uuid, apply: F) -> Result<TimeOffRequest>
    where
        F: FnOnce(&TimeOffRequest) -> Result<TimeOffRequest>,
    {
        let _guard = self.locks.acquire(id).await;
        let current = self.service.time_off_request(id).await?;
        let updated = match apply(&current) {
            Ok(updated) => updated,
            Err(err) => {
                warn!(%id, %err, "Rejected time-off transition");
                return Err(err);
            }
        };
        self.service.write_time_off(updated.clone()).await?;
        info!(%id, from = %current.status, to = %updated.status, actor = ?updated.decided_by, "Time-off transition");
        Ok(updated)
    }

    pub async fn list(&self, filter: &TimeOffFilter, today: NaiveDate) -> Result<Vec<TimeOffRequest>> {
        let requests = self.service.time_off_requests(filter.provider_id).await?;
        Ok(filter_requests(requests, filter, today))
    }

    /// Pending requests with their urgency, most urgent first.
    pub async fn triage(&self, today: NaiveDate) -> Result<Vec<TriageEntry>> {
        let filter = TimeOffFilter {
            status: Some(TimeOffStatus::Requested),
            ..Default::default()
        };
        let mut entries: Vec<TriageEntry> = self
            .list(&filter, today)
            .await?
            .into_iter()
            .map(|request| TriageEntry {
                urgency: urgency(request.start_date, today),
                days_until_start: (request.start_date - today).num_days(),
                request,
            })
            .collect();
        entries.sort_by(|a, b| {
            b.urgency
                .cmp(&a.urgency)
                .then_with(|| a.request.start_date.cmp(&b.request.start_date))
        });
        Ok(entries)
    }

    pub async fn summary(&self, provider_id: Option<ProviderId>, today: NaiveDate) -> Result<TimeOffSummary> {
        let requests = self.service.time_off_requests(provider_id).await?;
        Ok(summarize(&requests, today))
    }
}
