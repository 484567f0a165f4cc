//! Applies one schedule change to many providers in bounded batches.
//!
//! A submitted request is expanded into units of work that drain in
//! sequential batches on a background task. Units inside a batch run
//! concurrently, each under its provider's advisory lock and with its own
//! retry budget. Progress is published on a watch channel per operation.

use crate::{
    backend::AvailabilityService,
    error::{CoreError, Result, ValidationError},
    locks::KeyedLocks,
    retry::{with_retry, Attempted, RetryPolicy},
    schedule_model::{self, validate_slot, validate_time_off},
    types::{
        AvailabilitySlot, DateRange, LocationId, ProviderId, TemplateSlot, TimeOffRequest,
        TimeOffStatus,
    },
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkKind {
    UpdateSchedule,
    CopySchedule,
    ApplyTemplate,
    MassTimeOff,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BulkPayload {
    /// Writes the same window on the given days of every target.
    UpdateSchedule {
        location_id: LocationId,
        days: Vec<u8>,
        #[serde(with = "crate::wire::hhmm")]
        start_time: NaiveTime,
        #[serde(with = "crate::wire::hhmm")]
        end_time: NaiveTime,
        #[serde(default = "default_true")]
        is_active: bool,
        #[serde(default)]
        effective: Option<DateRange>,
    },
    /// Clones the live weekly template of one provider onto the targets.
    CopySchedule {
        source_provider_id: ProviderId,
        #[serde(default)]
        overwrite: bool,
    },
    ApplyTemplate {
        template_id: Uuid,
        location_id: LocationId,
    },
    MassTimeOff {
        start_date: NaiveDate,
        end_date: NaiveDate,
        #[serde(default, with = "crate::wire::hhmm::option")]
        start_time: Option<NaiveTime>,
        #[serde(default, with = "crate::wire::hhmm::option")]
        end_time: Option<NaiveTime>,
        reason: String,
        #[serde(default)]
        notes: String,
        /// Manager who approves all created requests up front.
        #[serde(default)]
        pre_approved_by: Option<Uuid>,
        #[serde(default)]
        provider_names: HashMap<ProviderId, String>,
    },
}

fn default_true() -> bool {
    true
}

impl BulkPayload {
    pub fn kind(&self) -> BulkKind {
        match self {
            BulkPayload::UpdateSchedule { .. } => BulkKind::UpdateSchedule,
            BulkPayload::CopySchedule { .. } => BulkKind::CopySchedule,
            BulkPayload::ApplyTemplate { .. } => BulkKind::ApplyTemplate,
            BulkPayload::MassTimeOff { .. } => BulkKind::MassTimeOff,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkRequest {
    pub targets: Vec<ProviderId>,
    #[serde(flatten)]
    pub payload: BulkPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl BulkStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BulkStatus::Completed | BulkStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkUnitError {
    pub provider_id: ProviderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<u8>,
    pub attempts: u32,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOperation {
    pub id: Uuid,
    pub kind: BulkKind,
    pub targets: Vec<ProviderId>,
    pub status: BulkStatus,
    /// Percentage of attempted units.
    pub progress: u8,
    pub total_units: usize,
    pub attempted_units: usize,
    pub completed_units: usize,
    pub errors: Vec<BulkUnitError>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<Uuid>,
}

impl BulkOperation {
    fn new(kind: BulkKind, targets: Vec<ProviderId>, total_units: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            targets,
            status: BulkStatus::Pending,
            progress: 0,
            total_units,
            attempted_units: 0,
            completed_units: 0,
            errors: Vec::new(),
            created_at: Utc::now(),
            finished_at: None,
            retry_of: None,
        }
    }

    fn record_progress(&mut self) {
        self.progress = if self.total_units == 0 {
            100
        } else {
            (self.attempted_units * 100 / self.total_units) as u8
        };
    }
}

#[derive(Debug, Clone)]
enum UnitWork {
    WriteSlot(AvailabilitySlot),
    ReplaceWeek {
        slots: Vec<AvailabilitySlot>,
        keep_existing_days: bool,
    },
    CreateTimeOff(TimeOffRequest),
}

/// Smallest independently retried piece of a bulk operation.
#[derive(Debug, Clone)]
pub struct WorkUnit {
    provider_id: ProviderId,
    day_of_week: Option<u8>,
    work: UnitWork,
}

/// Splits `units` into consecutive batches of at most `batch_size`.
pub fn plan_batches<T>(units: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(units.len().div_ceil(batch_size));
    let mut units = units.into_iter().peekable();
    while units.peek().is_some() {
        batches.push(units.by_ref().take(batch_size).collect());
    }
    batches
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkSettings {
    pub batch_size: usize,
    pub retry: RetryPolicy,
    /// How long a finished operation stays queryable.
    pub retention: Duration,
}

impl Default for BulkSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            retry: RetryPolicy::default(),
            retention: Duration::from_secs(60 * 60),
        }
    }
}

struct Tracked {
    sender: Arc<watch::Sender<BulkOperation>>,
    failed_units: Vec<WorkUnit>,
}

impl Tracked {
    fn expired(&self, retention: Duration, now: DateTime<Utc>) -> bool {
        let finished_at = self.sender.borrow().finished_at;
        finished_at.is_some_and(|finished_at| {
            (now - finished_at)
                .to_std()
                .is_ok_and(|age| age >= retention)
        })
    }
}

pub struct BulkCoordinator<S: ?Sized> {
    service: Arc<S>,
    settings: BulkSettings,
    locks: KeyedLocks,
    operations: Arc<Mutex<HashMap<Uuid, Tracked>>>,
}

impl<S: ?Sized> Clone for BulkCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            settings: self.settings,
            locks: self.locks.clone(),
            operations: self.operations.clone(),
        }
    }
}

impl<S: AvailabilityService + ?Sized> BulkCoordinator<S> {
    pub fn new(service: Arc<S>, settings: BulkSettings) -> Self {
        Self::with_locks(service, settings, KeyedLocks::new())
    }

    /// Shares provider locks with other writers of the same service.
    pub fn with_locks(service: Arc<S>, settings: BulkSettings, locks: KeyedLocks) -> Self {
        Self {
            service,
            settings,
            locks,
            operations: Arc::default(),
        }
    }

    fn operations(&self) -> MutexGuard<'_, HashMap<Uuid, Tracked>> {
        self.operations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validates and expands `request`, then starts draining it in the background.
    pub async fn submit(&self, request: BulkRequest) -> Result<BulkOperation> {
        let targets = dedup_targets(&request.targets);
        if targets.is_empty() {
            return Err(ValidationError::InvalidBulkRequest("no target providers".into()).into());
        }
        let units = self.expand(&targets, &request.payload).await?;
        Ok(self.start(BulkOperation::new(request.payload.kind(), targets, units.len()), units))
    }

    /// Resubmits the failed units of a finished operation as a new operation.
    pub async fn retry_failed(&self, id: Uuid) -> Result<BulkOperation> {
        let (previous, units) = {
            let operations = self.operations();
            let tracked = operations
                .get(&id)
                .ok_or_else(|| CoreError::not_found("bulk operation", id))?;
            let previous = tracked.sender.borrow().clone();
            (previous, tracked.failed_units.clone())
        };
        if !previous.status.is_terminal() {
            return Err(ValidationError::InvalidBulkRequest(format!("operation {id} is still running")).into());
        }
        if units.is_empty() {
            return Err(ValidationError::InvalidBulkRequest(format!("operation {id} has no failed units")).into());
        }

        let targets = dedup_targets(&units.iter().map(|unit| unit.provider_id).collect::<Vec<_>>());
        let mut operation = BulkOperation::new(previous.kind, targets, units.len());
        operation.retry_of = Some(id);
        Ok(self.start(operation, units))
    }

    pub fn operation(&self, id: Uuid) -> Result<BulkOperation> {
        self.operations()
            .get(&id)
            .map(|tracked| tracked.sender.borrow().clone())
            .ok_or_else(|| CoreError::not_found("bulk operation", id))
    }

    pub fn subscribe(&self, id: Uuid) -> Result<WatchStream<BulkOperation>> {
        self.operations()
            .get(&id)
            .map(|tracked| WatchStream::new(tracked.sender.subscribe()))
            .ok_or_else(|| CoreError::not_found("bulk operation", id))
    }

    /// Resolves once the operation reached a terminal status.
    pub async fn finished(&self, id: Uuid) -> Result<BulkOperation> {
        let mut receiver = self
            .operations()
            .get(&id)
            .map(|tracked| tracked.sender.subscribe())
            .ok_or_else(|| CoreError::not_found("bulk operation", id))?;
        let operation = receiver
            .wait_for(|operation| operation.status.is_terminal())
            .await
            .map_err(|_| CoreError::not_found("bulk operation", id))?;
        Ok(operation.clone())
    }

    fn start(&self, mut operation: BulkOperation, units: Vec<WorkUnit>) -> BulkOperation {
        operation.status = BulkStatus::Running;
        let (sender, _) = watch::channel(operation.clone());
        let sender = Arc::new(sender);
        {
            let mut operations = self.operations();
            let now = Utc::now();
            let before = operations.len();
            operations.retain(|_, tracked| !tracked.expired(self.settings.retention, now));
            if operations.len() < before {
                debug!(evicted = before - operations.len(), "Dropped finished bulk operations");
            }
            operations.insert(
                operation.id,
                Tracked {
                    sender: sender.clone(),
                    failed_units: Vec::new(),
                },
            );
        }
        info!(
            id = %operation.id,
            kind = ?operation.kind,
            targets = operation.targets.len(),
            units = operation.total_units,
            retry_of = ?operation.retry_of,
            "Bulk operation started"
        );

        let coordinator = self.clone();
        let id = operation.id;
        tokio::spawn(async move {
            coordinator.drain(id, sender, units).await;
        });
        operation
    }

    async fn drain(&self, id: Uuid, sender: Arc<watch::Sender<BulkOperation>>, units: Vec<WorkUnit>) {
        let mut failed_units = Vec::new();
        let batches = plan_batches(units, self.settings.batch_size);
        let batch_count = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            let outcomes = join_all(batch.into_iter().map(|unit| self.run_unit(unit))).await;

            sender.send_modify(|operation| {
                for (unit, attempted) in &outcomes {
                    operation.attempted_units += 1;
                    match &attempted.result {
                        Ok(()) => operation.completed_units += 1,
                        Err(err) => operation.errors.push(BulkUnitError {
                            provider_id: unit.provider_id,
                            day_of_week: unit.day_of_week,
                            attempts: attempted.attempts,
                            message: err.to_string(),
                        }),
                    }
                }
                operation.record_progress();
            });
            debug!(%id, batch = index + 1, of = batch_count, progress = sender.borrow().progress, "Batch finished");

            failed_units.extend(
                outcomes
                    .into_iter()
                    .filter(|(_, attempted)| attempted.result.is_err())
                    .map(|(unit, _)| unit),
            );
        }

        if let Some(tracked) = self.operations().get_mut(&id) {
            tracked.failed_units = failed_units;
        }
        sender.send_modify(|operation| {
            operation.status = if operation.errors.is_empty() {
                BulkStatus::Completed
            } else {
                BulkStatus::Failed
            };
            operation.finished_at = Some(Utc::now());
            operation.record_progress();
        });

        let operation = sender.borrow().clone();
        if operation.status == BulkStatus::Failed {
            warn!(
                %id,
                failed = operation.errors.len(),
                completed = operation.completed_units,
                "Bulk operation finished with failures"
            );
        } else {
            info!(%id, completed = operation.completed_units, "Bulk operation completed");
        }
    }

    async fn run_unit(&self, unit: WorkUnit) -> (WorkUnit, Attempted<()>) {
        let _guard = self.locks.acquire(unit.provider_id).await;
        let (coordinator, work) = (self, &unit);
        let attempted = self
            .settings
            .retry
            .run(move || coordinator.execute(work))
            .await;
        if let Err(err) = &attempted.result {
            warn!(
                provider_id = %unit.provider_id,
                day = ?unit.day_of_week,
                attempts = attempted.attempts,
                %err,
                "Bulk unit failed"
            );
        }
        (unit, attempted)
    }

    async fn execute(&self, unit: &WorkUnit) -> Result<()> {
        match &unit.work {
            UnitWork::WriteSlot(slot) => self.service.write_slot(slot.clone()).await,
            UnitWork::ReplaceWeek {
                slots,
                keep_existing_days,
            } => {
                let mut slots = slots.clone();
                if *keep_existing_days {
                    let existing = schedule_model::weekly_template(
                        unit.provider_id,
                        &self.service.weekly_slots(unit.provider_id).await?,
                    );
                    let kept_days: HashSet<u8> = existing.iter().map(|slot| slot.day_of_week).collect();
                    slots.retain(|slot| !kept_days.contains(&slot.day_of_week));
                    slots.extend(existing.into_iter().map(|slot| AvailabilitySlot {
                        id: Uuid::new_v4(),
                        superseded_at: None,
                        ..slot
                    }));
                }
                self.service.replace_weekly_slots(unit.provider_id, slots).await
            }
            UnitWork::CreateTimeOff(request) => self.service.write_time_off(request.clone()).await,
        }
    }

    /// Turns a payload into units. Nothing is written before every unit validated.
    async fn expand(&self, targets: &[ProviderId], payload: &BulkPayload) -> Result<Vec<WorkUnit>> {
        match payload {
            BulkPayload::UpdateSchedule {
                location_id,
                days,
                start_time,
                end_time,
                is_active,
                effective,
            } => {
                if days.is_empty() {
                    return Err(ValidationError::InvalidBulkRequest("no days selected".into()).into());
                }
                let days: Vec<u8> = {
                    let mut seen = HashSet::new();
                    days.iter().copied().filter(|day| seen.insert(*day)).collect()
                };
                let mut units = Vec::with_capacity(targets.len() * days.len());
                for provider_id in targets {
                    for day in &days {
                        let mut slot =
                            AvailabilitySlot::new(*provider_id, *location_id, *day, *start_time, *end_time);
                        slot.is_active = *is_active;
                        slot.effective = *effective;
                        validate_slot(&slot)?;
                        units.push(WorkUnit {
                            provider_id: *provider_id,
                            day_of_week: Some(*day),
                            work: UnitWork::WriteSlot(slot),
                        });
                    }
                }
                Ok(units)
            }
            BulkPayload::CopySchedule {
                source_provider_id,
                overwrite,
            } => {
                let source = with_retry(&self.settings.retry, || self.service.weekly_slots(*source_provider_id)).await?;
                let template = schedule_model::weekly_template(*source_provider_id, &source);
                if template.is_empty() {
                    return Err(ValidationError::InvalidBulkRequest(format!(
                        "provider {source_provider_id} has no weekly schedule to copy"
                    ))
                    .into());
                }
                Ok(targets
                    .iter()
                    .filter(|target| *target != source_provider_id)
                    .map(|target| WorkUnit {
                        provider_id: *target,
                        day_of_week: None,
                        work: UnitWork::ReplaceWeek {
                            slots: template
                                .iter()
                                .map(|slot| TemplateSlot::from(slot).to_slot(*target, slot.location_id))
                                .collect(),
                            keep_existing_days: !overwrite,
                        },
                    })
                    .collect())
            }
            BulkPayload::ApplyTemplate {
                template_id,
                location_id,
            } => {
                let template = with_retry(&self.settings.retry, || self.service.template(*template_id)).await?;
                if template.slots.is_empty() {
                    return Err(ValidationError::InvalidBulkRequest(format!(
                        "template {} has no slots",
                        template.name
                    ))
                    .into());
                }
                let mut units = Vec::with_capacity(targets.len());
                for target in targets {
                    let slots: Vec<AvailabilitySlot> = template
                        .slots
                        .iter()
                        .map(|slot| slot.to_slot(*target, *location_id))
                        .collect();
                    for slot in &slots {
                        validate_slot(slot)?;
                    }
                    units.push(WorkUnit {
                        provider_id: *target,
                        day_of_week: None,
                        work: UnitWork::ReplaceWeek {
                            slots,
                            keep_existing_days: false,
                        },
                    });
                }
                Ok(units)
            }
            BulkPayload::MassTimeOff {
                start_date,
                end_date,
                start_time,
                end_time,
                reason,
                notes,
                pre_approved_by,
                provider_names,
            } => {
                let mut units = Vec::with_capacity(targets.len());
                for target in targets {
                    let mut request = TimeOffRequest::new(
                        *target,
                        provider_names.get(target).cloned().unwrap_or_default(),
                        *start_date,
                        *end_date,
                        reason.clone(),
                    );
                    request.start_time = *start_time;
                    request.end_time = *end_time;
                    request.notes = notes.clone();
                    if let Some(manager) = pre_approved_by {
                        request.status = TimeOffStatus::Approved;
                        request.decided_at = Some(request.created_at);
                        request.decided_by = Some(*manager);
                        request.decision_notes = Some("Approved in bulk".into());
                    }
                    validate_time_off(&request)?;
                    units.push(WorkUnit {
                        provider_id: *target,
                        day_of_week: None,
                        work: UnitWork::CreateTimeOff(request),
                    });
                }
                Ok(units)
            }
        }
    }
}

fn dedup_targets(targets: &[ProviderId]) -> Vec<ProviderId> {
    let mut seen = HashSet::new();
    targets.iter().copied().filter(|target| seen.insert(*target)).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        local_availability::LocalAvailability,
        testutils::{date, read_from_stream, time, MockAvailability},
        types::ScheduleTemplate,
    };
    use std::{sync::atomic::Ordering, time::Duration};
    use test_case::test_case;

    fn settings() -> BulkSettings {
        BulkSettings {
            batch_size: 5,
            retry: RetryPolicy::default().with_base_delay(Duration::from_millis(1)),
            ..BulkSettings::default()
        }
    }

    fn weekday_template() -> ScheduleTemplate {
        ScheduleTemplate {
            id: Uuid::new_v4(),
            name: "Weekdays 9-5".into(),
            slots: (1..=5)
                .map(|day| TemplateSlot {
                    day_of_week: day,
                    start_time: time(9, 0),
                    end_time: time(17, 0),
                    is_active: true,
                })
                .collect(),
        }
    }

    fn providers(count: usize) -> Vec<ProviderId> {
        (0..count).map(|_| Uuid::new_v4()).collect()
    }

    #[test_case(12, 5, vec![5, 5, 2])]
    #[test_case(10, 5, vec![5, 5])]
    #[test_case(3, 5, vec![3])]
    #[test_case(0, 5, vec![])]
    #[test_case(4, 0, vec![1, 1, 1, 1] ; "zero batch size means one")]
    fn test_plan_batches(units: usize, batch_size: usize, expected: Vec<usize>) {
        let batches = plan_batches((0..units).collect::<Vec<_>>(), batch_size);
        assert_eq!(batches.iter().map(Vec::len).collect::<Vec<_>>(), expected);
    }

    #[tokio::test]
    async fn test_template_to_twelve_providers_with_one_failure() {
        let template = weekday_template();
        let store = LocalAvailability::default();
        store.add_template(template.clone());
        let mock = MockAvailability::with_store(store.clone());
        let targets = providers(12);
        mock.fail_provider(targets[6]);

        let coordinator = BulkCoordinator::new(Arc::new(mock.clone()), settings());
        let submitted = coordinator
            .submit(BulkRequest {
                targets: targets.clone(),
                payload: BulkPayload::ApplyTemplate {
                    template_id: template.id,
                    location_id: Uuid::nil(),
                },
            })
            .await
            .unwrap();
        assert_eq!(submitted.status, BulkStatus::Running);
        assert_eq!(submitted.total_units, 12);

        let finished = coordinator.finished(submitted.id).await.unwrap();
        assert_eq!(finished.status, BulkStatus::Failed);
        assert_eq!(finished.progress, 100);
        assert_eq!(finished.attempted_units, 12);
        assert_eq!(finished.completed_units, 11);
        assert_eq!(finished.errors.len(), 1);
        assert_eq!(finished.errors[0].provider_id, targets[6]);
        assert_eq!(finished.errors[0].attempts, 3);
        assert!(finished.finished_at.is_some());

        // 11 successes plus three attempts for the failing provider.
        assert_eq!(mock.0.calls_to_replace_weekly_slots.load(Ordering::SeqCst), 14);
        assert!(mock.max_in_flight() <= 5);
        for (index, target) in targets.iter().enumerate() {
            let week = schedule_model::weekly_template(*target, &store.weekly_slots(*target).await.unwrap());
            assert_eq!(week.len(), if index == 6 { 0 } else { 5 });
        }
    }

    #[tokio::test]
    async fn test_retry_failed_resubmits_only_failed_units() {
        let template = weekday_template();
        let store = LocalAvailability::default();
        store.add_template(template.clone());
        let mock = MockAvailability::with_store(store.clone());
        let targets = providers(6);
        mock.fail_provider(targets[2]);

        let coordinator = BulkCoordinator::new(Arc::new(mock.clone()), settings());
        let first = coordinator
            .submit(BulkRequest {
                targets: targets.clone(),
                payload: BulkPayload::ApplyTemplate {
                    template_id: template.id,
                    location_id: Uuid::nil(),
                },
            })
            .await
            .unwrap();
        assert_eq!(coordinator.finished(first.id).await.unwrap().status, BulkStatus::Failed);

        mock.heal_provider(targets[2]);
        let retry = coordinator.retry_failed(first.id).await.unwrap();
        assert_eq!(retry.retry_of, Some(first.id));
        assert_eq!(retry.targets, vec![targets[2]]);
        assert_eq!(retry.total_units, 1);

        let finished = coordinator.finished(retry.id).await.unwrap();
        assert_eq!(finished.status, BulkStatus::Completed);
        assert!(finished.errors.is_empty());
        assert_eq!(
            schedule_model::weekly_template(targets[2], &store.weekly_slots(targets[2]).await.unwrap()).len(),
            5
        );

        let err = coordinator.retry_failed(retry.id).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn test_finished_operations_expire_after_retention() {
        let template = weekday_template();
        let store = LocalAvailability::default();
        store.add_template(template.clone());
        let short_lived = BulkSettings {
            retention: Duration::ZERO,
            ..settings()
        };
        let coordinator = BulkCoordinator::new(Arc::new(store), short_lived);
        let request = || BulkRequest {
            targets: providers(1),
            payload: BulkPayload::ApplyTemplate {
                template_id: template.id,
                location_id: Uuid::nil(),
            },
        };

        let first = coordinator.submit(request()).await.unwrap();
        coordinator.finished(first.id).await.unwrap();
        assert!(coordinator.operation(first.id).is_ok());

        let second = coordinator.submit(request()).await.unwrap();
        assert!(matches!(
            coordinator.operation(first.id),
            Err(CoreError::NotFound { .. })
        ));
        assert_eq!(coordinator.operation(second.id).unwrap().id, second.id);
        assert_eq!(coordinator.finished(second.id).await.unwrap().completed_units, 1);
    }

    #[tokio::test]
    async fn test_update_schedule_is_one_unit_per_provider_day() {
        let store = LocalAvailability::default();
        let mock = MockAvailability::with_store(store.clone());
        let targets = providers(3);
        let coordinator = BulkCoordinator::new(Arc::new(mock.clone()), settings());

        let submitted = coordinator
            .submit(BulkRequest {
                targets: targets.clone(),
                payload: BulkPayload::UpdateSchedule {
                    location_id: Uuid::nil(),
                    days: vec![1, 2, 3, 4, 5, 5],
                    start_time: time(10, 0),
                    end_time: time(18, 0),
                    is_active: true,
                    effective: None,
                },
            })
            .await
            .unwrap();
        assert_eq!(submitted.total_units, 15);

        let finished = coordinator.finished(submitted.id).await.unwrap();
        assert_eq!(finished.status, BulkStatus::Completed);
        assert_eq!(finished.completed_units, 15);
        assert_eq!(mock.0.calls_to_write_slot.load(Ordering::SeqCst), 15);
        for target in targets {
            let week = schedule_model::weekly_template(target, &store.weekly_slots(target).await.unwrap());
            assert_eq!(week.len(), 5);
            assert!(week.iter().all(|slot| slot.start_time == time(10, 0)));
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let mock = MockAvailability::new();
        mock.0.transient_failures.store(2, Ordering::SeqCst);
        let coordinator = BulkCoordinator::new(Arc::new(mock.clone()), settings());

        let submitted = coordinator
            .submit(BulkRequest {
                targets: providers(1),
                payload: BulkPayload::UpdateSchedule {
                    location_id: Uuid::nil(),
                    days: vec![1],
                    start_time: time(9, 0),
                    end_time: time(17, 0),
                    is_active: true,
                    effective: None,
                },
            })
            .await
            .unwrap();
        let finished = coordinator.finished(submitted.id).await.unwrap();
        assert_eq!(finished.status, BulkStatus::Completed);
        assert_eq!(mock.0.calls_to_write_slot.load(Ordering::SeqCst), 3);
    }

    #[test_case(vec![], time(9, 0), time(17, 0) ; "no days")]
    #[test_case(vec![1, 7], time(9, 0), time(17, 0) ; "day out of range")]
    #[test_case(vec![1], time(17, 0), time(9, 0) ; "inverted window")]
    #[tokio::test]
    async fn test_invalid_update_writes_nothing(days: Vec<u8>, start: NaiveTime, end: NaiveTime) {
        let mock = MockAvailability::new();
        let coordinator = BulkCoordinator::new(Arc::new(mock.clone()), settings());
        let err = coordinator
            .submit(BulkRequest {
                targets: providers(3),
                payload: BulkPayload::UpdateSchedule {
                    location_id: Uuid::nil(),
                    days,
                    start_time: start,
                    end_time: end,
                    is_active: true,
                    effective: None,
                },
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert_eq!(mock.0.calls_to_write_slot.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_template_is_not_found() {
        let coordinator = BulkCoordinator::new(Arc::new(MockAvailability::new()), settings());
        let err = coordinator
            .submit(BulkRequest {
                targets: providers(2),
                payload: BulkPayload::ApplyTemplate {
                    template_id: Uuid::new_v4(),
                    location_id: Uuid::nil(),
                },
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_copy_schedule_keeps_existing_days_unless_overwriting() {
        let store = LocalAvailability::default();
        let source = Uuid::new_v4();
        let target = Uuid::new_v4();
        for day in [1, 2] {
            store
                .write_slot(AvailabilitySlot::new(source, Uuid::nil(), day, time(9, 0), time(17, 0)))
                .await
                .unwrap();
        }
        store
            .write_slot(AvailabilitySlot::new(target, Uuid::nil(), 2, time(12, 0), time(20, 0)))
            .await
            .unwrap();
        let coordinator = BulkCoordinator::new(Arc::new(store.clone()), settings());

        let copy = |overwrite| BulkRequest {
            targets: vec![source, target],
            payload: BulkPayload::CopySchedule {
                source_provider_id: source,
                overwrite,
            },
        };

        let submitted = coordinator.submit(copy(false)).await.unwrap();
        assert_eq!(submitted.total_units, 1);
        coordinator.finished(submitted.id).await.unwrap();
        let week = schedule_model::weekly_template(target, &store.weekly_slots(target).await.unwrap());
        assert_eq!(
            week.iter().map(|s| (s.day_of_week, s.start_time)).collect::<Vec<_>>(),
            vec![(1, time(9, 0)), (2, time(12, 0))]
        );

        let submitted = coordinator.submit(copy(true)).await.unwrap();
        coordinator.finished(submitted.id).await.unwrap();
        let week = schedule_model::weekly_template(target, &store.weekly_slots(target).await.unwrap());
        assert_eq!(
            week.iter().map(|s| (s.day_of_week, s.start_time)).collect::<Vec<_>>(),
            vec![(1, time(9, 0)), (2, time(9, 0))]
        );
    }

    #[tokio::test]
    async fn test_mass_time_off_can_be_pre_approved() {
        let store = LocalAvailability::default();
        let coordinator = BulkCoordinator::new(Arc::new(store.clone()), settings());
        let manager = Uuid::new_v4();
        let targets = providers(4);

        let submitted = coordinator
            .submit(BulkRequest {
                targets: targets.clone(),
                payload: BulkPayload::MassTimeOff {
                    start_date: date(2026, 12, 24),
                    end_date: date(2026, 12, 26),
                    start_time: None,
                    end_time: None,
                    reason: "Holidays".into(),
                    notes: String::new(),
                    pre_approved_by: Some(manager),
                    provider_names: HashMap::from([(targets[0], "Alex".to_string())]),
                },
            })
            .await
            .unwrap();
        assert_eq!(submitted.kind, BulkKind::MassTimeOff);
        assert_eq!(coordinator.finished(submitted.id).await.unwrap().status, BulkStatus::Completed);

        let requests = store.time_off_requests(None).await.unwrap();
        assert_eq!(requests.len(), 4);
        assert!(requests
            .iter()
            .all(|r| r.status == TimeOffStatus::Approved && r.decided_by == Some(manager)));
        assert!(requests.iter().any(|r| r.provider_name == "Alex"));
    }

    #[tokio::test]
    async fn test_operations_on_same_provider_serialize() {
        let mock = MockAvailability::new();
        let coordinator = BulkCoordinator::new(Arc::new(mock.clone()), settings());
        let provider = Uuid::new_v4();
        let update = |day| BulkRequest {
            targets: vec![provider],
            payload: BulkPayload::UpdateSchedule {
                location_id: Uuid::nil(),
                days: vec![day],
                start_time: time(9, 0),
                end_time: time(17, 0),
                is_active: true,
                effective: None,
            },
        };

        let first = coordinator.submit(update(1)).await.unwrap();
        let second = coordinator.submit(update(2)).await.unwrap();
        coordinator.finished(first.id).await.unwrap();
        coordinator.finished(second.id).await.unwrap();
        assert_eq!(mock.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_progress_is_streamed() {
        let mock = MockAvailability::new();
        let coordinator = BulkCoordinator::new(Arc::new(mock), settings());
        let submitted = coordinator
            .submit(BulkRequest {
                targets: providers(2),
                payload: BulkPayload::UpdateSchedule {
                    location_id: Uuid::nil(),
                    days: vec![0, 1, 2, 3, 4, 5, 6],
                    start_time: time(9, 0),
                    end_time: time(17, 0),
                    is_active: true,
                    effective: None,
                },
            })
            .await
            .unwrap();

        let mut stream = coordinator.subscribe(submitted.id).unwrap();
        let mut last_progress = 0;
        loop {
            let operation = read_from_stream(&mut stream).await;
            assert!(operation.progress >= last_progress);
            last_progress = operation.progress;
            if operation.status.is_terminal() {
                assert_eq!(operation.status, BulkStatus::Completed);
                break;
            }
        }
        assert_eq!(last_progress, 100);
        assert_eq!(coordinator.operation(submitted.id).unwrap().completed_units, 14);
        assert!(coordinator.operation(Uuid::new_v4()).is_err());
    }

    #[test]
    fn test_request_wire_shape() {
        let request: BulkRequest = serde_json::from_value(serde_json::json!({
            "targets": [Uuid::nil()],
            "kind": "update_schedule",
            "location_id": Uuid::nil(),
            "days": [1, 2],
            "start_time": "09:00",
            "end_time": "17:30"
        }))
        .unwrap();
        assert_eq!(request.payload.kind(), BulkKind::UpdateSchedule);
        assert!(matches!(
            request.payload,
            BulkPayload::UpdateSchedule { is_active: true, end_time, .. } if end_time == time(17, 30)
        ));
    }
}
