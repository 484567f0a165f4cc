//! Weekly slots, time-off windows and the invariants between them.
//!
//! Everything here is a pure function over a supplied snapshot; reading the
//! snapshot from the availability service is the only async entry point.

use crate::{
    backend::AvailabilityService,
    error::{Result, ValidationError},
    types::{
        Appointment, AvailabilitySlot, LocationId, ProviderId, TimeOffRequest, TimeOffStatus,
    },
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use std::collections::{HashMap, HashSet};

/// Half-open time-of-day window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Interval {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Interval {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn of_slot(slot: &AvailabilitySlot) -> Self {
        Self::new(slot.start_time, slot.end_time)
    }

    pub fn of_appointment(appointment: &Appointment) -> Self {
        Self::new(appointment.start_time, appointment.end_time)
    }

    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes().max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, other: &Interval) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    pub fn contains_time(&self, time: NaiveTime) -> bool {
        self.start <= time && time < self.end
    }

    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        let intersection = Interval::new(self.start.max(other.start), self.end.min(other.end));
        (!intersection.is_empty()).then_some(intersection)
    }

    /// Parts of `self` not covered by `other`, at most two.
    pub fn subtract(&self, other: &Interval) -> Vec<Interval> {
        if !self.overlaps(other) {
            return vec![*self];
        }
        [
            Interval::new(self.start, other.start),
            Interval::new(other.end, self.end),
        ]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect()
    }
}

pub fn validate_slot(slot: &AvailabilitySlot) -> std::result::Result<(), ValidationError> {
    if slot.day_of_week > 6 {
        return Err(ValidationError::InvalidDayOfWeek(slot.day_of_week));
    }
    if slot.start_time >= slot.end_time {
        return Err(ValidationError::EmptyWindow {
            start: slot.start_time,
            end: slot.end_time,
        });
    }
    if let Some(range) = slot.effective {
        if range.start > range.end {
            return Err(ValidationError::InvalidDateRange {
                start: range.start,
                end: range.end,
            });
        }
    }
    Ok(())
}

pub fn validate_time_off(request: &TimeOffRequest) -> std::result::Result<(), ValidationError> {
    if request.start_date > request.end_date {
        return Err(ValidationError::InvalidDateRange {
            start: request.start_date,
            end: request.end_date,
        });
    }
    match (request.start_time, request.end_time) {
        (Some(start), Some(end)) if request.start_date == request.end_date && start >= end => {
            return Err(ValidationError::EmptyWindow { start, end });
        }
        (Some(_), None) | (None, Some(_)) => return Err(ValidationError::IncompletePartialDay),
        _ => {}
    }
    if request.reason.trim().is_empty() {
        return Err(ValidationError::MissingField("reason"));
    }
    Ok(())
}

/// Resolves which of two slots governs the dates they share.
///
/// A date-ranged override always wins over the canonical weekly entry. Between
/// two canonical entries the incoming one is the newer template. Between two
/// overrides the narrower range is the more specific one, the incoming slot
/// winning ties.
pub fn merge_slot(existing: &AvailabilitySlot, incoming: &AvailabilitySlot) -> AvailabilitySlot {
    match (existing.effective, incoming.effective) {
        (Some(_), None) => existing.clone(),
        (None, Some(_)) | (None, None) => incoming.clone(),
        (Some(current), Some(new)) => {
            if current.len_days() < new.len_days() {
                existing.clone()
            } else {
                incoming.clone()
            }
        }
    }
}

/// The slot that governs `provider` on `date`, if any.
pub fn effective_slot(
    slots: &[AvailabilitySlot],
    provider_id: ProviderId,
    date: NaiveDate,
) -> Option<AvailabilitySlot> {
    slots
        .iter()
        .filter(|slot| slot.provider_id == provider_id && slot.is_live() && slot.applies_on(date))
        .fold(None, |current: Option<AvailabilitySlot>, slot| match current {
            Some(current) => Some(merge_slot(&current, slot)),
            None => Some(slot.clone()),
        })
}

/// Sum of the live, active weekly template of a provider.
pub fn weekly_hours(provider_id: ProviderId, slots: &[AvailabilitySlot]) -> Duration {
    let minutes = slots
        .iter()
        .filter(|slot| {
            slot.provider_id == provider_id && slot.is_live() && slot.is_active && slot.is_canonical()
        })
        .map(AvailabilitySlot::duration_minutes)
        .sum();
    Duration::minutes(minutes)
}

/// Stores `incoming`, superseding the entry it replaces instead of deleting it.
pub fn apply_slot(
    slots: &mut Vec<AvailabilitySlot>,
    mut incoming: AvailabilitySlot,
    now: DateTime<Utc>,
) -> std::result::Result<(), ValidationError> {
    validate_slot(&incoming)?;
    for slot in slots.iter_mut().filter(|slot| {
        slot.is_live()
            && slot.provider_id == incoming.provider_id
            && slot.day_of_week == incoming.day_of_week
            && slot.effective == incoming.effective
    }) {
        slot.superseded_at = Some(now);
    }
    incoming.superseded_at = None;
    slots.push(incoming);
    Ok(())
}

/// Hard delete. Returns whether a slot was removed.
pub fn remove_slot(slots: &mut Vec<AvailabilitySlot>, slot_id: uuid::Uuid) -> bool {
    let before = slots.len();
    slots.retain(|slot| slot.id != slot_id);
    slots.len() != before
}

/// Live canonical template of a provider, one entry per day at most.
pub fn weekly_template(provider_id: ProviderId, slots: &[AvailabilitySlot]) -> Vec<AvailabilitySlot> {
    let mut template: Vec<AvailabilitySlot> = slots
        .iter()
        .filter(|slot| slot.provider_id == provider_id && slot.is_live() && slot.is_canonical())
        .cloned()
        .collect();
    template.sort_by_key(|slot| slot.day_of_week);
    template
}

/// Consistent copy of one provider's commitments, taken before deciding on a change.
#[derive(Debug, Clone, Default)]
pub struct ScheduleSnapshot {
    pub provider_id: ProviderId,
    pub slots: Vec<AvailabilitySlot>,
    pub appointments: Vec<Appointment>,
    pub time_off: Vec<TimeOffRequest>,
    /// Slots of other providers sharing this provider's locations.
    pub location_slots: Vec<AvailabilitySlot>,
    /// Chair capacity per location; locations missing here use the configured default.
    pub location_capacity: HashMap<LocationId, u32>,
}

impl ScheduleSnapshot {
    pub fn new(provider_id: ProviderId) -> Self {
        Self {
            provider_id,
            ..Default::default()
        }
    }

    pub async fn load<S: AvailabilityService + ?Sized>(
        service: &S,
        provider_id: ProviderId,
    ) -> Result<Self> {
        Self::load_for_proposal(service, provider_id, &[]).await
    }

    /// Like [`ScheduleSnapshot::load`], also covering the locations `proposed` slots move to.
    pub async fn load_for_proposal<S: AvailabilityService + ?Sized>(
        service: &S,
        provider_id: ProviderId,
        proposed: &[AvailabilitySlot],
    ) -> Result<Self> {
        let slots = service.weekly_slots(provider_id).await?;
        let appointments = service.appointments(provider_id).await?;
        let time_off = service.time_off_requests(Some(provider_id)).await?;

        let locations: HashSet<LocationId> = slots
            .iter()
            .chain(proposed)
            .map(|slot| slot.location_id)
            .collect();
        let mut location_slots = Vec::new();
        let mut location_capacity = HashMap::new();
        for location_id in locations {
            location_slots.extend(
                service
                    .location_slots(location_id)
                    .await?
                    .into_iter()
                    .filter(|slot| slot.provider_id != provider_id),
            );
            if let Some(chairs) = service.location_capacity(location_id).await? {
                location_capacity.insert(location_id, chairs);
            }
        }

        Ok(Self {
            provider_id,
            slots,
            appointments,
            time_off,
            location_slots,
            location_capacity,
        })
    }

    pub fn apply_slot(
        &mut self,
        incoming: AvailabilitySlot,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), ValidationError> {
        apply_slot(&mut self.slots, incoming, now)
    }

    pub fn effective_slot(&self, date: NaiveDate) -> Option<AvailabilitySlot> {
        effective_slot(&self.slots, self.provider_id, date)
    }

    pub fn weekly_hours(&self) -> Duration {
        weekly_hours(self.provider_id, &self.slots)
    }

    pub fn committed_appointments_on(&self, date: NaiveDate) -> impl Iterator<Item = &Appointment> {
        let provider_id = self.provider_id;
        self.appointments.iter().filter(move |appointment| {
            appointment.provider_id == provider_id && appointment.date == date && appointment.is_committed()
        })
    }

    pub fn approved_time_off(&self) -> impl Iterator<Item = &TimeOffRequest> {
        let provider_id = self.provider_id;
        self.time_off.iter().filter(move |request| {
            request.provider_id == provider_id && request.status == TimeOffStatus::Approved
        })
    }

    /// Bookable windows on `date`: the effective window minus approved time off.
    pub fn available_windows(&self, date: NaiveDate) -> Vec<Interval> {
        let Some(slot) = self.effective_slot(date).filter(|slot| slot.is_active) else {
            return Vec::new();
        };
        let mut open = vec![Interval::of_slot(&slot)];
        for request in self.approved_time_off() {
            if let Some((start, end)) = request.blocked_window_on(date) {
                let blocked = Interval::new(start, end);
                open = open.iter().flat_map(|part| part.subtract(&blocked)).collect();
            }
        }
        open
    }

    pub fn available_minutes(&self, date: NaiveDate) -> i64 {
        self.available_windows(date).iter().map(Interval::minutes).sum()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::DateRange;
    use test_case::test_case;
    use uuid::Uuid;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn slot(provider: Uuid, day: u8, start: (u32, u32), end: (u32, u32)) -> AvailabilitySlot {
        AvailabilitySlot::new(provider, Uuid::nil(), day, time(start.0, start.1), time(end.0, end.1))
    }

    #[test_case(1, (9, 0), (17, 0), true ; "regular day")]
    #[test_case(0, (0, 0), (23, 59), true ; "sunday full day")]
    #[test_case(6, (9, 0), (9, 1), true ; "one minute")]
    #[test_case(7, (9, 0), (17, 0), false ; "day out of range")]
    #[test_case(1, (17, 0), (9, 0), false ; "inverted window")]
    #[test_case(1, (9, 0), (9, 0), false ; "empty window")]
    fn test_validate_slot(day: u8, start: (u32, u32), end: (u32, u32), valid: bool) {
        let result = validate_slot(&slot(Uuid::new_v4(), day, start, end));
        assert_eq!(result.is_ok(), valid);
    }

    #[test]
    fn test_invalid_slot_is_never_stored() {
        let mut slots = Vec::new();
        let err = apply_slot(&mut slots, slot(Uuid::new_v4(), 1, (17, 0), (9, 0)), Utc::now()).unwrap_err();
        assert!(matches!(err, ValidationError::EmptyWindow { .. }));
        assert!(slots.is_empty());
    }

    #[test]
    fn test_validate_time_off() {
        let provider = Uuid::new_v4();
        let valid = TimeOffRequest::new(provider, "Alex", date(2026, 11, 2), date(2026, 11, 4), "vacation");
        assert!(validate_time_off(&valid).is_ok());

        let inverted = TimeOffRequest::new(provider, "Alex", date(2026, 11, 4), date(2026, 11, 2), "vacation");
        assert!(matches!(
            validate_time_off(&inverted),
            Err(ValidationError::InvalidDateRange { .. })
        ));

        let same_day = TimeOffRequest::new(provider, "Alex", date(2026, 11, 2), date(2026, 11, 2), "doctor")
            .partial_day(time(14, 0), time(10, 0));
        assert!(matches!(validate_time_off(&same_day), Err(ValidationError::EmptyWindow { .. })));

        let mut half = valid.clone();
        half.start_time = Some(time(9, 0));
        assert_eq!(validate_time_off(&half), Err(ValidationError::IncompletePartialDay));

        let no_reason = TimeOffRequest::new(provider, "Alex", date(2026, 11, 2), date(2026, 11, 2), "  ");
        assert_eq!(validate_time_off(&no_reason), Err(ValidationError::MissingField("reason")));
    }

    #[test]
    fn test_override_wins_inside_its_range() {
        let provider = Uuid::new_v4();
        let canonical = slot(provider, 1, (9, 0), (17, 0));
        let holiday_hours = slot(provider, 1, (10, 0), (14, 0))
            .with_effective(DateRange::new(date(2026, 12, 21), date(2026, 12, 28)));

        assert_eq!(merge_slot(&canonical, &holiday_hours), holiday_hours);
        assert_eq!(merge_slot(&holiday_hours, &canonical), holiday_hours);

        let slots = vec![canonical.clone(), holiday_hours.clone()];
        assert_eq!(effective_slot(&slots, provider, date(2026, 12, 21)), Some(holiday_hours));
        assert_eq!(effective_slot(&slots, provider, date(2026, 12, 14)), Some(canonical));
        assert_eq!(effective_slot(&slots, provider, date(2026, 12, 15)), None);
    }

    #[test]
    fn test_narrower_override_wins() {
        let provider = Uuid::new_v4();
        let month = slot(provider, 1, (10, 0), (16, 0))
            .with_effective(DateRange::new(date(2026, 12, 1), date(2026, 12, 31)));
        let week = slot(provider, 1, (12, 0), (13, 0))
            .with_effective(DateRange::new(date(2026, 12, 21), date(2026, 12, 27)));
        assert_eq!(merge_slot(&week, &month), week);
        assert_eq!(merge_slot(&month, &week), week);
    }

    #[test]
    fn test_apply_slot_supersedes_previous_canonical() {
        let provider = Uuid::new_v4();
        let mut slots = Vec::new();
        let now = Utc::now();
        apply_slot(&mut slots, slot(provider, 1, (9, 0), (17, 0)), now).unwrap();
        apply_slot(&mut slots, slot(provider, 1, (10, 0), (18, 0)), now).unwrap();
        apply_slot(
            &mut slots,
            slot(provider, 1, (11, 0), (12, 0)).with_effective(DateRange::single(date(2026, 12, 21))),
            now,
        )
        .unwrap();

        assert_eq!(slots.len(), 3);
        assert_eq!(slots[0].superseded_at, Some(now));
        let live_canonical: Vec<_> = slots.iter().filter(|s| s.is_live() && s.is_canonical()).collect();
        assert_eq!(live_canonical.len(), 1);
        assert_eq!(live_canonical[0].start_time, time(10, 0));
        assert!(slots[2].is_live());
    }

    #[test]
    fn test_weekly_hours_counts_live_active_template_only() {
        let provider = Uuid::new_v4();
        let mut superseded = slot(provider, 2, (9, 0), (17, 0));
        superseded.superseded_at = Some(Utc::now());
        let slots = vec![
            slot(provider, 1, (9, 0), (17, 0)),
            slot(provider, 3, (9, 0), (12, 30)),
            slot(provider, 4, (9, 0), (17, 0)).inactive(),
            slot(provider, 5, (9, 0), (17, 0)).with_effective(DateRange::single(date(2026, 12, 25))),
            slot(Uuid::new_v4(), 1, (9, 0), (17, 0)),
            superseded,
        ];
        assert_eq!(weekly_hours(provider, &slots), Duration::minutes(8 * 60 + 210));
    }

    #[test]
    fn test_remove_slot_is_hard_delete() {
        let provider = Uuid::new_v4();
        let first = slot(provider, 1, (9, 0), (17, 0));
        let mut slots = vec![first.clone()];
        assert!(remove_slot(&mut slots, first.id));
        assert!(!remove_slot(&mut slots, first.id));
        assert!(slots.is_empty());
    }

    #[test]
    fn test_interval_subtract() {
        let day = Interval::new(time(9, 0), time(17, 0));
        assert_eq!(
            day.subtract(&Interval::new(time(12, 0), time(13, 0))),
            vec![Interval::new(time(9, 0), time(12, 0)), Interval::new(time(13, 0), time(17, 0))]
        );
        assert_eq!(
            day.subtract(&Interval::new(time(9, 0), time(15, 30))),
            vec![Interval::new(time(15, 30), time(17, 0))]
        );
        assert!(day.subtract(&Interval::new(time(8, 0), time(18, 0))).is_empty());
        assert_eq!(day.subtract(&Interval::new(time(18, 0), time(19, 0))), vec![day]);
    }

    #[test]
    fn test_available_minutes_excludes_approved_time_off() {
        let provider = Uuid::new_v4();
        let monday = date(2026, 10, 19);
        let mut snapshot = ScheduleSnapshot::new(provider);
        snapshot.slots.push(slot(provider, 1, (9, 0), (17, 0)));
        assert_eq!(snapshot.available_minutes(monday), 480);

        let mut appointment = TimeOffRequest::new(provider, "Jo", monday, monday, "doctor")
            .partial_day(time(9, 0), time(11, 0));
        appointment.status = TimeOffStatus::Approved;
        snapshot.time_off.push(appointment);

        let mut pending = TimeOffRequest::new(provider, "Jo", monday, monday, "errand")
            .partial_day(time(15, 0), time(17, 0));
        pending.status = TimeOffStatus::Requested;
        snapshot.time_off.push(pending);

        assert_eq!(snapshot.available_minutes(monday), 360);
        assert_eq!(snapshot.available_minutes(date(2026, 10, 20)), 0);
    }
}
