use crate::{
    analytics::{AnalyticsAggregator, TeamSummary, UtilizationReport},
    approval_workflow::{
        ApprovalWorkflow, Canceller, TimeOffFilter, TimeOffSummary, TriageEntry,
    },
    backend::AvailabilityService,
    bulk_coordinator::{BulkCoordinator, BulkOperation, BulkRequest},
    configuration::Configuration,
    conflict_detector::{self, DetectionSettings, ScheduleConflict},
    conflict_monitor::ConflictMonitor,
    error::{CoreError, ValidationError},
    schedule_model::{validate_slot, ScheduleSnapshot},
    types::{AvailabilitySlot, DateRange, ProviderId, TimeOffRequest},
    wire::parse_time,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_valid::Valid;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use uuid::Uuid;
use validator::Validate;

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug)]
pub struct AppError(CoreError);

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            CoreError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_FAILED"),
            CoreError::InvalidStateTransition { .. } => (StatusCode::CONFLICT, "INVALID_TRANSITION"),
            CoreError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            CoreError::Network(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_UNAVAILABLE"),
            CoreError::Serialization(_) | CoreError::Io(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };
        if status.is_server_error() {
            error!(%status, err = %self.0, "Request failed");
        }
        (status, Json(ApiError::new(code, self.0.to_string()))).into_response()
    }
}

type ApiResult<T> = Result<T, AppError>;

pub struct AppState<S: ?Sized> {
    service: Arc<S>,
    bulk: BulkCoordinator<S>,
    approvals: ApprovalWorkflow<S>,
    analytics: AnalyticsAggregator<S>,
    detection: DetectionSettings,
    monitors: Arc<Mutex<HashMap<Uuid, ConflictMonitor>>>,
    monitor_interval: Duration,
    monitor_ttl: Duration,
}

impl<S: ?Sized> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            bulk: self.bulk.clone(),
            approvals: self.approvals.clone(),
            analytics: self.analytics.clone(),
            detection: self.detection,
            monitors: self.monitors.clone(),
            monitor_interval: self.monitor_interval,
            monitor_ttl: self.monitor_ttl,
        }
    }
}

impl<S: AvailabilityService> AppState<S> {
    pub fn new<C: Configuration>(service: S, configuration: &C) -> Self {
        let service = Arc::new(service);
        Self {
            bulk: BulkCoordinator::new(service.clone(), configuration.bulk_settings()),
            approvals: ApprovalWorkflow::new(service.clone()),
            analytics: AnalyticsAggregator::new(service.clone(), configuration.thresholds()),
            detection: configuration.detection_settings(),
            monitors: Arc::default(),
            monitor_interval: configuration.monitor_interval(),
            monitor_ttl: configuration.monitor_ttl(),
            service,
        }
    }

    fn monitors(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, ConflictMonitor>> {
        self.monitors.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub fn create_app<S: AvailabilityService, C: Configuration>(service: S, configuration: C) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let schedules = Router::new()
        .route("/providers/{id}/slots", get(get_slots))
        .route("/providers/{id}/conflicts", post(check_conflicts))
        .route("/providers/{id}/utilization", get(get_utilization))
        .route("/providers/{id}/monitor", post(start_monitor))
        .route("/monitors/{id}", get(get_monitor).delete(stop_monitor))
        .route("/team/utilization", post(team_utilization));

    let bulk = Router::new()
        .route("/bulk", post(submit_bulk))
        .route("/bulk/{id}", get(get_bulk))
        .route("/bulk/{id}/retry", post(retry_bulk));

    let time_off = Router::new()
        .route("/time-off", get(list_time_off).post(submit_time_off))
        .route("/time-off/triage", get(triage_time_off))
        .route("/time-off/summary", get(time_off_summary))
        .route("/time-off/{id}/approve", post(approve_time_off))
        .route("/time-off/{id}/deny", post(deny_time_off))
        .route("/time-off/{id}/cancel", post(cancel_time_off));

    Router::new()
        .merge(schedules)
        .merge(bulk)
        .merge(time_off)
        .with_state(AppState::new(service, &configuration))
        .layer(cors)
}

fn active() -> bool {
    true
}

/// A slot as sent by a client: the provider comes from the path.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct SlotRequest {
    location_id: Uuid,
    #[validate(range(max = 6))]
    day_of_week: u8,
    #[validate(custom(function = "crate::wire::validate_hhmm"))]
    start_time: String,
    #[validate(custom(function = "crate::wire::validate_hhmm"))]
    end_time: String,
    #[serde(default = "active")]
    is_active: bool,
    #[serde(default)]
    effective: Option<DateRange>,
}

impl SlotRequest {
    fn into_slot(self, provider_id: ProviderId) -> Result<AvailabilitySlot, ValidationError> {
        let mut slot = AvailabilitySlot::new(
            provider_id,
            self.location_id,
            self.day_of_week,
            parse_time(&self.start_time)?,
            parse_time(&self.end_time)?,
        );
        slot.is_active = self.is_active;
        slot.effective = self.effective;
        validate_slot(&slot)?;
        Ok(slot)
    }
}

fn into_slots(
    requests: Vec<SlotRequest>,
    provider_id: ProviderId,
) -> Result<Vec<AvailabilitySlot>, ValidationError> {
    requests
        .into_iter()
        .map(|request| request.into_slot(provider_id))
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct ConflictCheckRequest {
    #[validate(nested)]
    proposed: Vec<SlotRequest>,
    /// Dates to check, the configured horizon from today when absent.
    #[serde(default)]
    horizon: Option<DateRange>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct MonitorRequest {
    #[validate(nested)]
    proposed: Vec<SlotRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MonitorStarted {
    id: Uuid,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct PeriodQuery {
    start: NaiveDate,
    end: NaiveDate,
}

impl PeriodQuery {
    fn range(self) -> Result<DateRange, ValidationError> {
        if self.start > self.end {
            return Err(ValidationError::InvalidDateRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(DateRange::new(self.start, self.end))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct TeamUtilizationRequest {
    #[validate(length(min = 1))]
    providers: Vec<ProviderId>,
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct TimeOffSubmission {
    provider_id: ProviderId,
    #[serde(default)]
    provider_name: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    #[serde(default)]
    #[validate(custom(function = "crate::wire::validate_hhmm"))]
    start_time: Option<String>,
    #[serde(default)]
    #[validate(custom(function = "crate::wire::validate_hhmm"))]
    end_time: Option<String>,
    #[validate(length(min = 1))]
    reason: String,
    #[serde(default)]
    notes: String,
}

impl TimeOffSubmission {
    fn into_request(self) -> Result<TimeOffRequest, ValidationError> {
        let mut request = TimeOffRequest::new(
            self.provider_id,
            self.provider_name,
            self.start_date,
            self.end_date,
            self.reason,
        );
        request.start_time = self.start_time.as_deref().map(parse_time).transpose()?;
        request.end_time = self.end_time.as_deref().map(parse_time).transpose()?;
        request.notes = self.notes;
        Ok(request)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ApproveRequest {
    actor_id: Uuid,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
struct DenyRequest {
    actor_id: Uuid,
    #[validate(length(min = 1))]
    reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SummaryQuery {
    #[serde(default)]
    provider_id: Option<ProviderId>,
}

async fn get_slots<S: AvailabilityService>(
    State(state): State<AppState<S>>,
    Path(provider_id): Path<ProviderId>,
) -> ApiResult<Json<Vec<AvailabilitySlot>>> {
    let slots = state.service.weekly_slots(provider_id).await?;
    Ok(Json(slots.into_iter().filter(AvailabilitySlot::is_live).collect()))
}

async fn check_conflicts<S: AvailabilityService>(
    State(state): State<AppState<S>>,
    Path(provider_id): Path<ProviderId>,
    Valid(Json(check)): Valid<Json<ConflictCheckRequest>>,
) -> ApiResult<Json<Vec<ScheduleConflict>>> {
    let proposed = into_slots(check.proposed, provider_id)?;
    let snapshot =
        ScheduleSnapshot::load_for_proposal(state.service.as_ref(), provider_id, &proposed).await?;

    let mut options = state.detection.options(Utc::now());
    if let Some(horizon) = check.horizon {
        options = options.with_horizon(horizon);
    }
    Ok(Json(conflict_detector::detect(
        provider_id,
        &proposed,
        &snapshot,
        &options,
    )))
}

async fn get_utilization<S: AvailabilityService>(
    State(state): State<AppState<S>>,
    Path(provider_id): Path<ProviderId>,
    Query(period): Query<PeriodQuery>,
) -> ApiResult<Json<UtilizationReport>> {
    let report = state.analytics.utilization(provider_id, period.range()?).await?;
    Ok(Json(report))
}

async fn team_utilization<S: AvailabilityService>(
    State(state): State<AppState<S>>,
    Valid(Json(request)): Valid<Json<TeamUtilizationRequest>>,
) -> ApiResult<Json<TeamSummary>> {
    let period = PeriodQuery {
        start: request.start,
        end: request.end,
    }
    .range()?;
    let summary = state.analytics.team_summary(&request.providers, period).await?;
    Ok(Json(summary))
}

async fn start_monitor<S: AvailabilityService>(
    State(state): State<AppState<S>>,
    Path(provider_id): Path<ProviderId>,
    Valid(Json(request)): Valid<Json<MonitorRequest>>,
) -> ApiResult<(StatusCode, Json<MonitorStarted>)> {
    let proposed = into_slots(request.proposed, provider_id)?;
    let monitor = ConflictMonitor::spawn(
        state.service.clone(),
        provider_id,
        proposed,
        state.detection,
        state.monitor_interval,
    );
    let id = Uuid::new_v4();
    {
        let mut monitors = state.monitors();
        monitors.retain(|monitor_id, running| {
            let keep = running.age() < state.monitor_ttl;
            if !keep {
                info!(id = %monitor_id, "Conflict monitor expired");
            }
            keep
        });
        monitors.insert(id, monitor);
    }
    info!(%id, %provider_id, "Conflict monitor started");
    Ok((StatusCode::CREATED, Json(MonitorStarted { id })))
}

async fn get_monitor<S: AvailabilityService>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<ScheduleConflict>>> {
    let monitors = state.monitors();
    let monitor = monitors
        .get(&id)
        .ok_or_else(|| CoreError::not_found("monitor", id))?;
    Ok(Json(monitor.latest()))
}

async fn stop_monitor<S: AvailabilityService>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    // Dropping the monitor stops its task.
    let removed = state.monitors().remove(&id);
    match removed {
        Some(_) => {
            info!(%id, "Conflict monitor stopped");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(CoreError::not_found("monitor", id).into()),
    }
}

async fn submit_bulk<S: AvailabilityService>(
    State(state): State<AppState<S>>,
    Json(request): Json<BulkRequest>,
) -> ApiResult<(StatusCode, Json<BulkOperation>)> {
    let operation = state.bulk.submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(operation)))
}

async fn get_bulk<S: AvailabilityService>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<BulkOperation>> {
    Ok(Json(state.bulk.operation(id)?))
}

async fn retry_bulk<S: AvailabilityService>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<BulkOperation>)> {
    let operation = state.bulk.retry_failed(id).await?;
    Ok((StatusCode::ACCEPTED, Json(operation)))
}

async fn list_time_off<S: AvailabilityService>(
    State(state): State<AppState<S>>,
    Query(filter): Query<TimeOffFilter>,
) -> ApiResult<Json<Vec<TimeOffRequest>>> {
    let today = Utc::now().date_naive();
    Ok(Json(state.approvals.list(&filter, today).await?))
}

async fn triage_time_off<S: AvailabilityService>(
    State(state): State<AppState<S>>,
) -> ApiResult<Json<Vec<TriageEntry>>> {
    let today = Utc::now().date_naive();
    Ok(Json(state.approvals.triage(today).await?))
}

async fn time_off_summary<S: AvailabilityService>(
    State(state): State<AppState<S>>,
    Query(query): Query<SummaryQuery>,
) -> ApiResult<Json<TimeOffSummary>> {
    let today = Utc::now().date_naive();
    Ok(Json(state.approvals.summary(query.provider_id, today).await?))
}

async fn submit_time_off<S: AvailabilityService>(
    State(state): State<AppState<S>>,
    Valid(Json(submission)): Valid<Json<TimeOffSubmission>>,
) -> ApiResult<(StatusCode, Json<TimeOffRequest>)> {
    let request = state.approvals.submit(submission.into_request()?).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn approve_time_off<S: AvailabilityService>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
    Json(decision): Json<ApproveRequest>,
) -> ApiResult<Json<TimeOffRequest>> {
    let request = state
        .approvals
        .approve(id, decision.actor_id, decision.notes)
        .await?;
    Ok(Json(request))
}

async fn deny_time_off<S: AvailabilityService>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
    Valid(Json(decision)): Valid<Json<DenyRequest>>,
) -> ApiResult<Json<TimeOffRequest>> {
    let request = state
        .approvals
        .deny(id, decision.actor_id, decision.reason)
        .await?;
    Ok(Json(request))
}

async fn cancel_time_off<S: AvailabilityService>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
    Json(canceller): Json<Canceller>,
) -> ApiResult<Json<TimeOffRequest>> {
    Ok(Json(state.approvals.cancel(id, canceller).await?))
}
