use crate::{
    error::Result,
    types::{
        Appointment, AvailabilitySlot, LocationId, ProviderId, ScheduleTemplate, TimeOffRequest,
    },
};
use async_trait::async_trait;
use uuid::Uuid;

/// Request/response collaborator that owns persisted availability records.
///
/// Every call may fail with [`crate::error::CoreError::Network`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AvailabilityService: Send + Sync + 'static {
    /// All slots of a provider, superseded history included.
    async fn weekly_slots(&self, provider_id: ProviderId) -> Result<Vec<AvailabilitySlot>>;
    async fn location_slots(&self, location_id: LocationId) -> Result<Vec<AvailabilitySlot>>;
    /// Chairs a location publishes, `None` when it publishes none.
    async fn location_capacity(&self, location_id: LocationId) -> Result<Option<u32>>;
    /// Stores a slot, superseding the entry it replaces.
    async fn write_slot(&self, slot: AvailabilitySlot) -> Result<()>;
    /// Replaces the canonical weekly template of a provider in one write.
    async fn replace_weekly_slots(
        &self,
        provider_id: ProviderId,
        slots: Vec<AvailabilitySlot>,
    ) -> Result<()>;
    async fn remove_slot(&self, slot_id: Uuid) -> Result<()>;
    async fn time_off_requests(&self, provider_id: Option<ProviderId>) -> Result<Vec<TimeOffRequest>>;
    async fn time_off_request(&self, id: Uuid) -> Result<TimeOffRequest>;
    async fn write_time_off(&self, request: TimeOffRequest) -> Result<()>;
    async fn templates(&self) -> Result<Vec<ScheduleTemplate>>;
    async fn template(&self, id: Uuid) -> Result<ScheduleTemplate>;
    async fn appointments(&self, provider_id: ProviderId) -> Result<Vec<Appointment>>;
}
