use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use tokio_stream::{wrappers::WatchStream, StreamExt};
use uuid::Uuid;

use crate::{
    backend::AvailabilityService,
    error::{CoreError, Result},
    local_availability::LocalAvailability,
    types::{
        Appointment, AppointmentStatus, AvailabilitySlot, LocationId, ProviderId, ScheduleTemplate,
        TimeOffRequest,
    },
};

pub struct MockAvailabilityInner {
    pub calls_to_write_slot: AtomicU64,
    pub calls_to_replace_weekly_slots: AtomicU64,
    pub calls_to_write_time_off: AtomicU64,
    pub calls_to_reads: AtomicU64,
    /// Writes for these providers always fail with a network error.
    pub failing_providers: Mutex<HashSet<Uuid>>,
    /// The next N writes fail with a network error, whoever they target.
    pub transient_failures: AtomicU64,
    pub in_flight: AtomicU64,
    pub max_in_flight: AtomicU64,
    pub write_delay: Duration,
    pub store: LocalAvailability,
}

#[derive(Clone)]
pub struct MockAvailability(pub Arc<MockAvailabilityInner>);

impl MockAvailabilityInner {
    fn new(store: LocalAvailability) -> Self {
        Self {
            calls_to_write_slot: AtomicU64::default(),
            calls_to_replace_weekly_slots: AtomicU64::default(),
            calls_to_write_time_off: AtomicU64::default(),
            calls_to_reads: AtomicU64::default(),
            failing_providers: Mutex::default(),
            transient_failures: AtomicU64::default(),
            in_flight: AtomicU64::default(),
            max_in_flight: AtomicU64::default(),
            write_delay: Duration::from_millis(5),
            store,
        }
    }
}

impl MockAvailability {
    pub fn new() -> Self {
        Self::with_store(LocalAvailability::default())
    }

    pub fn with_store(store: LocalAvailability) -> Self {
        Self(Arc::new(MockAvailabilityInner::new(store)))
    }

    pub fn fail_provider(&self, provider_id: Uuid) {
        self.0.failing_providers.lock().unwrap().insert(provider_id);
    }

    pub fn heal_provider(&self, provider_id: Uuid) {
        self.0.failing_providers.lock().unwrap().remove(&provider_id);
    }

    pub fn max_in_flight(&self) -> u64 {
        self.0.max_in_flight.load(Ordering::SeqCst)
    }

    async fn write(&self, provider_id: Uuid) -> Result<()> {
        let in_flight = self.0.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        tokio::time::sleep(self.0.write_delay).await;
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);

        let transient = self
            .0
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if transient || self.0.failing_providers.lock().unwrap().contains(&provider_id) {
            return Err(CoreError::Network("Supposed to fail".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AvailabilityService for MockAvailability {
    async fn weekly_slots(&self, provider_id: ProviderId) -> Result<Vec<AvailabilitySlot>> {
        self.0.calls_to_reads.fetch_add(1, Ordering::SeqCst);
        self.0.store.weekly_slots(provider_id).await
    }

    async fn location_slots(&self, location_id: LocationId) -> Result<Vec<AvailabilitySlot>> {
        self.0.calls_to_reads.fetch_add(1, Ordering::SeqCst);
        self.0.store.location_slots(location_id).await
    }

    async fn location_capacity(&self, location_id: LocationId) -> Result<Option<u32>> {
        self.0.calls_to_reads.fetch_add(1, Ordering::SeqCst);
        self.0.store.location_capacity(location_id).await
    }

    async fn write_slot(&self, slot: AvailabilitySlot) -> Result<()> {
        self.0.calls_to_write_slot.fetch_add(1, Ordering::SeqCst);
        self.write(slot.provider_id).await?;
        self.0.store.write_slot(slot).await
    }

    async fn replace_weekly_slots(
        &self,
        provider_id: ProviderId,
        slots: Vec<AvailabilitySlot>,
    ) -> Result<()> {
        self.0
            .calls_to_replace_weekly_slots
            .fetch_add(1, Ordering::SeqCst);
        self.write(provider_id).await?;
        self.0.store.replace_weekly_slots(provider_id, slots).await
    }

    async fn remove_slot(&self, slot_id: Uuid) -> Result<()> {
        self.0.store.remove_slot(slot_id).await
    }

    async fn time_off_requests(&self, provider_id: Option<ProviderId>) -> Result<Vec<TimeOffRequest>> {
        self.0.calls_to_reads.fetch_add(1, Ordering::SeqCst);
        self.0.store.time_off_requests(provider_id).await
    }

    async fn time_off_request(&self, id: Uuid) -> Result<TimeOffRequest> {
        self.0.calls_to_reads.fetch_add(1, Ordering::SeqCst);
        self.0.store.time_off_request(id).await
    }

    async fn write_time_off(&self, request: TimeOffRequest) -> Result<()> {
        self.0.calls_to_write_time_off.fetch_add(1, Ordering::SeqCst);
        self.write(request.provider_id).await?;
        self.0.store.write_time_off(request).await
    }

    async fn templates(&self) -> Result<Vec<ScheduleTemplate>> {
        self.0.store.templates().await
    }

    async fn template(&self, id: Uuid) -> Result<ScheduleTemplate> {
        self.0.store.template(id).await
    }

    async fn appointments(&self, provider_id: ProviderId) -> Result<Vec<Appointment>> {
        self.0.calls_to_reads.fetch_add(1, Ordering::SeqCst);
        self.0.store.appointments(provider_id).await
    }
}

pub async fn read_from_stream<T>(stream: &mut WatchStream<T>) -> T
where
    T: Clone + Send + Sync + 'static,
{
    tokio::time::timeout(Duration::from_secs(1), stream.next())
        .await
        .expect("stream produced no value in time")
        .expect("stream closed")
}

pub fn time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn appointment(
    provider_id: ProviderId,
    location_id: LocationId,
    date: NaiveDate,
    start: (u32, u32),
    end: (u32, u32),
) -> Appointment {
    Appointment {
        id: Uuid::new_v4(),
        provider_id,
        location_id,
        date,
        start_time: time(start.0, start.1),
        end_time: time(end.0, end.1),
        status: AppointmentStatus::Booked,
        movable: true,
        price: 40.0,
    }
}
