use crate::{
    backend::AvailabilityService,
    error::{CoreError, Result},
    schedule_model,
    types::{
        Appointment, AvailabilitySlot, LocationId, ProviderId, ScheduleTemplate, TimeOffRequest,
    },
};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::sync::watch::{self, Sender};
use tokio_stream::wrappers::WatchStream;
use tracing::{error, info};
use uuid::Uuid;

/// Records a development instance starts with, read from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedData {
    pub slots: Vec<AvailabilitySlot>,
    pub time_off: Vec<TimeOffRequest>,
    pub templates: Vec<ScheduleTemplate>,
    pub appointments: Vec<Appointment>,
    /// Chairs per location.
    pub location_capacity: HashMap<LocationId, u32>,
}

#[derive(Debug, Default)]
struct Records {
    slots: Vec<AvailabilitySlot>,
    time_off: HashMap<Uuid, TimeOffRequest>,
    templates: HashMap<Uuid, ScheduleTemplate>,
    appointments: Vec<Appointment>,
    location_capacity: HashMap<LocationId, u32>,
}

/// In-memory availability service used when no remote service is configured.
#[derive(Debug, Clone)]
pub struct LocalAvailability {
    records: Arc<Mutex<Records>>,
    sender: Sender<Vec<AvailabilitySlot>>,
}

impl Default for LocalAvailability {
    fn default() -> Self {
        let (sender, _) = watch::channel(vec![]);
        Self {
            records: Arc::new(Mutex::default()),
            sender,
        }
    }
}

impl LocalAvailability {
    pub fn from_seed(seed: SeedData) -> Self {
        let local = Self::default();
        {
            let mut records = local.records();
            records.slots = seed.slots;
            records.time_off = seed.time_off.into_iter().map(|r| (r.id, r)).collect();
            records.templates = seed.templates.into_iter().map(|t| (t.id, t)).collect();
            records.appointments = seed.appointments;
            records.location_capacity = seed.location_capacity;
        }
        local
    }

    pub fn from_seed_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let seed: SeedData = serde_json::from_str(&content)?;
        info!(
            path = %path.as_ref().display(),
            slots = seed.slots.len(),
            time_off = seed.time_off.len(),
            templates = seed.templates.len(),
            appointments = seed.appointments.len(),
            "Loaded seed data"
        );
        Ok(Self::from_seed(seed))
    }

    fn records(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_template(&self, template: ScheduleTemplate) {
        self.records().templates.insert(template.id, template);
    }

    pub fn add_appointment(&self, appointment: Appointment) {
        self.records().appointments.push(appointment);
    }

    pub fn set_location_capacity(&self, location_id: LocationId, chairs: u32) {
        self.records().location_capacity.insert(location_id, chairs);
    }

    /// Live slots, streamed again after every slot change.
    pub fn slot_stream(&self) -> WatchStream<Vec<AvailabilitySlot>> {
        let stream = WatchStream::new(self.sender.subscribe());
        self.send_slots();
        stream
    }

    fn live_slots(&self) -> Vec<AvailabilitySlot> {
        let mut slots: Vec<AvailabilitySlot> = self
            .records()
            .slots
            .iter()
            .filter(|slot| slot.is_live())
            .cloned()
            .collect();
        slots.sort_unstable_by_key(|slot| (slot.provider_id, slot.day_of_week, slot.start_time));
        slots
    }

    fn send_slots(&self) {
        let slots = self.live_slots();

        if let Err(err) = self.sender.send(slots) {
            // No subscriber yet, nothing to notify.
            tracing::trace!(?err, "No slot stream subscribers");
        }
    }
}

#[async_trait]
impl AvailabilityService for LocalAvailability {
    async fn weekly_slots(&self, provider_id: ProviderId) -> Result<Vec<AvailabilitySlot>> {
        Ok(self
            .records()
            .slots
            .iter()
            .filter(|slot| slot.provider_id == provider_id)
            .cloned()
            .collect())
    }

    async fn location_slots(&self, location_id: LocationId) -> Result<Vec<AvailabilitySlot>> {
        Ok(self
            .records()
            .slots
            .iter()
            .filter(|slot| slot.location_id == location_id && slot.is_live())
            .cloned()
            .collect())
    }

    async fn location_capacity(&self, location_id: LocationId) -> Result<Option<u32>> {
        Ok(self.records().location_capacity.get(&location_id).copied())
    }

    async fn write_slot(&self, slot: AvailabilitySlot) -> Result<()> {
        if let Err(err) = schedule_model::apply_slot(&mut self.records().slots, slot, Utc::now()) {
            error!(%err, "Slot can't be written");
            return Err(err.into());
        }
        self.send_slots();
        Ok(())
    }

    async fn replace_weekly_slots(
        &self,
        provider_id: ProviderId,
        slots: Vec<AvailabilitySlot>,
    ) -> Result<()> {
        for slot in &slots {
            schedule_model::validate_slot(slot)?;
        }
        let now = Utc::now();
        {
            let mut records = self.records();
            for existing in records.slots.iter_mut().filter(|existing| {
                existing.provider_id == provider_id && existing.is_live() && existing.is_canonical()
            }) {
                existing.superseded_at = Some(now);
            }
            for slot in slots {
                schedule_model::apply_slot(&mut records.slots, slot, now)?;
            }
        }
        self.send_slots();
        Ok(())
    }

    async fn remove_slot(&self, slot_id: Uuid) -> Result<()> {
        if !schedule_model::remove_slot(&mut self.records().slots, slot_id) {
            let err = CoreError::not_found("slot", slot_id);
            error!(%err, "Slot does not exist and can therefore not be removed");
            return Err(err);
        }
        self.send_slots();
        Ok(())
    }

    async fn time_off_requests(&self, provider_id: Option<ProviderId>) -> Result<Vec<TimeOffRequest>> {
        let mut requests: Vec<TimeOffRequest> = self
            .records()
            .time_off
            .values()
            .filter(|request| provider_id.map_or(true, |id| request.provider_id == id))
            .cloned()
            .collect();
        requests.sort_unstable_by_key(|request| (request.start_date, request.created_at));
        Ok(requests)
    }

    async fn time_off_request(&self, id: Uuid) -> Result<TimeOffRequest> {
        self.records()
            .time_off
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("time-off request", id))
    }

    async fn write_time_off(&self, request: TimeOffRequest) -> Result<()> {
        schedule_model::validate_time_off(&request)?;
        self.records().time_off.insert(request.id, request);
        Ok(())
    }

    async fn templates(&self) -> Result<Vec<ScheduleTemplate>> {
        let mut templates: Vec<ScheduleTemplate> = self.records().templates.values().cloned().collect();
        templates.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }

    async fn template(&self, id: Uuid) -> Result<ScheduleTemplate> {
        self.records()
            .templates
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("template", id))
    }

    async fn appointments(&self, provider_id: ProviderId) -> Result<Vec<Appointment>> {
        Ok(self
            .records()
            .appointments
            .iter()
            .filter(|appointment| appointment.provider_id == provider_id)
            .cloned()
            .collect())
    }
}
