use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ProviderId = Uuid;
pub type LocationId = Uuid;

/// Sunday = 0 ... Saturday = 6, matching the persisted representation.
pub fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Inclusive range of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn single(date: NaiveDate) -> Self {
        Self::new(date, date)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Number of days covered, 0 for an inverted range.
    pub fn len_days(&self) -> i64 {
        ((self.end - self.start).num_days() + 1).max(0)
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |date| *date <= end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilitySlot {
    pub id: Uuid,
    pub provider_id: ProviderId,
    pub location_id: LocationId,
    pub day_of_week: u8,
    #[serde(with = "crate::wire::hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "crate::wire::hhmm")]
    pub end_time: NaiveTime,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective: Option<DateRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub superseded_at: Option<DateTime<Utc>>,
}

impl AvailabilitySlot {
    pub fn new(
        provider_id: ProviderId,
        location_id: LocationId,
        day_of_week: u8,
        start_time: NaiveTime,
        end_time: NaiveTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_id,
            location_id,
            day_of_week,
            start_time,
            end_time,
            is_active: true,
            effective: None,
            superseded_at: None,
        }
    }

    pub fn with_effective(mut self, range: DateRange) -> Self {
        self.effective = Some(range);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// The weekly template entry for its day, as opposed to a date-ranged override.
    pub fn is_canonical(&self) -> bool {
        self.effective.is_none()
    }

    pub fn is_live(&self) -> bool {
        self.superseded_at.is_none()
    }

    /// Whether this slot governs the given calendar date.
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        day_of_week(date) == self.day_of_week
            && self.effective.map_or(true, |range| range.contains(date))
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes().max(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOffStatus {
    Requested,
    Approved,
    Denied,
    Cancelled,
}

impl TimeOffStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TimeOffStatus::Denied | TimeOffStatus::Cancelled)
    }
}

impl std::fmt::Display for TimeOffStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TimeOffStatus::Requested => "requested",
            TimeOffStatus::Approved => "approved",
            TimeOffStatus::Denied => "denied",
            TimeOffStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOffRequest {
    pub id: Uuid,
    pub provider_id: ProviderId,
    #[serde(default)]
    pub provider_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default, with = "crate::wire::hhmm::option")]
    pub start_time: Option<NaiveTime>,
    #[serde(default, with = "crate::wire::hhmm::option")]
    pub end_time: Option<NaiveTime>,
    pub reason: String,
    #[serde(default)]
    pub notes: String,
    pub status: TimeOffStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub decided_by: Option<Uuid>,
    #[serde(default)]
    pub decision_notes: Option<String>,
}

impl TimeOffRequest {
    pub fn new(
        provider_id: ProviderId,
        provider_name: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider_id,
            provider_name: provider_name.into(),
            start_date,
            end_date,
            start_time: None,
            end_time: None,
            reason: reason.into(),
            notes: String::new(),
            status: TimeOffStatus::Requested,
            created_at: Utc::now(),
            decided_at: None,
            decided_by: None,
            decision_notes: None,
        }
    }

    pub fn partial_day(mut self, start_time: NaiveTime, end_time: NaiveTime) -> Self {
        self.start_time = Some(start_time);
        self.end_time = Some(end_time);
        self
    }

    pub fn dates(&self) -> DateRange {
        DateRange::new(self.start_date, self.end_date)
    }

    pub fn is_partial_day(&self) -> bool {
        self.start_time.is_some() && self.end_time.is_some()
    }

    /// Time-of-day window blocked on `date`, `None` when the request does not cover it.
    pub fn blocked_window_on(&self, date: NaiveDate) -> Option<(NaiveTime, NaiveTime)> {
        if !self.dates().contains(date) {
            return None;
        }
        let day_start = NaiveTime::MIN;
        let day_end = NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::MIN);
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => {
                // Partial-day times bound the first and last day; days in between are fully blocked.
                let from = if date == self.start_date { start } else { day_start };
                let to = if date == self.end_date { end } else { day_end };
                Some((from, to))
            }
            _ => Some((day_start, day_end)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Booked,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub provider_id: ProviderId,
    pub location_id: LocationId,
    pub date: NaiveDate,
    #[serde(with = "crate::wire::hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "crate::wire::hhmm")]
    pub end_time: NaiveTime,
    pub status: AppointmentStatus,
    #[serde(default = "default_movable")]
    pub movable: bool,
    #[serde(default)]
    pub price: f64,
}

fn default_movable() -> bool {
    true
}

impl Appointment {
    pub fn is_committed(&self) -> bool {
        self.status != AppointmentStatus::Cancelled
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes().max(0)
    }
}

/// One entry of a reusable weekly template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSlot {
    pub day_of_week: u8,
    #[serde(with = "crate::wire::hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "crate::wire::hhmm")]
    pub end_time: NaiveTime,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl TemplateSlot {
    pub fn to_slot(&self, provider_id: ProviderId, location_id: LocationId) -> AvailabilitySlot {
        let slot = AvailabilitySlot::new(
            provider_id,
            location_id,
            self.day_of_week,
            self.start_time,
            self.end_time,
        );
        if self.is_active {
            slot
        } else {
            slot.inactive()
        }
    }
}

impl From<&AvailabilitySlot> for TemplateSlot {
    fn from(slot: &AvailabilitySlot) -> Self {
        Self {
            day_of_week: slot.day_of_week,
            start_time: slot.start_time,
            end_time: slot.end_time,
            is_active: slot.is_active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleTemplate {
    pub id: Uuid,
    pub name: String,
    pub slots: Vec<TemplateSlot>,
}
