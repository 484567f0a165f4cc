//! Classifies what a proposed schedule change would break.
//!
//! Detection is a pure function of the proposal and a [`ScheduleSnapshot`]:
//! calling it twice on the same input yields the same conflicts, ids
//! included. Resolution is a separate, explicit step that mutates the
//! snapshot and the proposal.

use crate::{
    error::{CoreError, Result},
    schedule_model::{self, Interval, ScheduleSnapshot},
    types::{Appointment, AppointmentStatus, AvailabilitySlot, DateRange, ProviderId, TimeOffRequest},
};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    AppointmentOverlap,
    AvailabilityGap,
    TimeOffConflict,
    CapacityExceeded,
}

impl ConflictType {
    fn as_str(&self) -> &'static str {
        match self {
            ConflictType::AppointmentOverlap => "appointment_overlap",
            ConflictType::AvailabilityGap => "availability_gap",
            ConflictType::TimeOffConflict => "time_off_conflict",
            ConflictType::CapacityExceeded => "capacity_exceeded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Concrete change a suggestion would make when applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolutionAction {
    Reschedule {
        appointment_id: Uuid,
        date: NaiveDate,
        #[serde(with = "crate::wire::hhmm")]
        start_time: NaiveTime,
        #[serde(with = "crate::wire::hhmm")]
        end_time: NaiveTime,
    },
    ExtendHours {
        slot_id: Uuid,
        #[serde(with = "crate::wire::hhmm")]
        start_time: NaiveTime,
        #[serde(with = "crate::wire::hhmm")]
        end_time: NaiveTime,
    },
    ReduceCapacity {
        slot_id: Uuid,
        #[serde(with = "crate::wire::hhmm")]
        start_time: NaiveTime,
        #[serde(with = "crate::wire::hhmm")]
        end_time: NaiveTime,
    },
    CancelAppointment {
        appointment_id: Uuid,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSuggestion {
    pub action: ResolutionAction,
    pub description: String,
    pub estimated_impact: String,
    /// 0..=100
    pub confidence: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConflict {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub conflict_type: ConflictType,
    pub severity: Severity,
    /// Proposed slot that causes the conflict.
    pub slot_id: Uuid,
    pub affected_dates: Vec<NaiveDate>,
    pub affected_appointments: Vec<Uuid>,
    pub message: String,
    pub suggestions: Vec<ConflictSuggestion>,
    pub auto_resolvable: bool,
}

#[derive(Debug, Clone)]
pub struct DetectionOptions {
    pub now: DateTime<Utc>,
    /// Dates checked for recurring slots.
    pub horizon: DateRange,
    pub default_chairs: u32,
    /// Approved time off starting within this window of `now` is critical.
    pub time_off_critical_window: Duration,
    pub suggestion_step_minutes: i64,
    pub max_suggestions: usize,
    pub auto_resolve_confidence: u8,
}

impl DetectionOptions {
    pub fn new(now: DateTime<Utc>) -> Self {
        let today = now.date_naive();
        Self {
            now,
            horizon: DateRange::new(today, today + Duration::weeks(8)),
            default_chairs: 4,
            time_off_critical_window: Duration::hours(48),
            suggestion_step_minutes: 15,
            max_suggestions: 3,
            auto_resolve_confidence: 70,
        }
    }

    pub fn with_horizon(mut self, horizon: DateRange) -> Self {
        self.horizon = horizon;
        self
    }

    pub fn with_default_chairs(mut self, chairs: u32) -> Self {
        self.default_chairs = chairs;
        self
    }
}

/// Configured part of [`DetectionOptions`]; `now` and the horizon start are taken per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionSettings {
    pub horizon_weeks: i64,
    pub default_chairs: u32,
    pub time_off_critical_window: Duration,
    pub suggestion_step_minutes: i64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            horizon_weeks: 8,
            default_chairs: 4,
            time_off_critical_window: Duration::hours(48),
            suggestion_step_minutes: 15,
        }
    }
}

impl DetectionSettings {
    pub fn options(&self, now: DateTime<Utc>) -> DetectionOptions {
        let today = now.date_naive();
        DetectionOptions {
            horizon: DateRange::new(today, today + Duration::weeks(self.horizon_weeks)),
            default_chairs: self.default_chairs,
            time_off_critical_window: self.time_off_critical_window,
            suggestion_step_minutes: self.suggestion_step_minutes,
            ..DetectionOptions::new(now)
        }
    }
}

fn minute_of_day(time: NaiveTime) -> i64 {
    i64::from(time.num_seconds_from_midnight() / 60)
}

fn time_of_minute(minute: i64) -> NaiveTime {
    NaiveTime::from_num_seconds_from_midnight_opt((minute.clamp(0, 24 * 60 - 1) * 60) as u32, 0)
        .unwrap_or(NaiveTime::MIN)
}

/// Confidence of moving an appointment by `minutes_moved`: 100 − hours moved, within [30, 95].
pub fn reschedule_confidence(minutes_moved: i64) -> u8 {
    let confidence = 100.0 - minutes_moved.abs() as f64 / 60.0;
    confidence.round().clamp(30.0, 95.0) as u8
}

fn overlap_severity(affected: usize, critical: bool) -> Severity {
    if critical {
        Severity::Critical
    } else if affected >= 3 {
        Severity::High
    } else {
        Severity::Medium
    }
}

fn capacity_severity(peak: u32, capacity: u32) -> Severity {
    if capacity == 0 {
        return Severity::Critical;
    }
    let overage = f64::from(peak.saturating_sub(capacity)) / f64::from(capacity);
    if overage <= 0.25 {
        Severity::Low
    } else if overage <= 0.5 {
        Severity::Medium
    } else if overage <= 1.0 {
        Severity::High
    } else {
        Severity::Critical
    }
}

fn conflict_id(provider_id: ProviderId, conflict_type: ConflictType, slot_id: Uuid, subject: &str) -> Uuid {
    let name = format!("{provider_id}:{}:{slot_id}:{subject}", conflict_type.as_str());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

struct ConflictDetector<'a> {
    provider_id: ProviderId,
    snapshot: &'a ScheduleSnapshot,
    options: &'a DetectionOptions,
}

/// Evaluates `proposed` against the provider's commitments in `snapshot`.
///
/// An empty proposal never conflicts.
pub fn detect(
    provider_id: ProviderId,
    proposed: &[AvailabilitySlot],
    snapshot: &ScheduleSnapshot,
    options: &DetectionOptions,
) -> Vec<ScheduleConflict> {
    ConflictDetector {
        provider_id,
        snapshot,
        options,
    }
    .detect(proposed)
}

impl<'a> ConflictDetector<'a> {
    fn detect(&self, proposed: &[AvailabilitySlot]) -> Vec<ScheduleConflict> {
        let mut conflicts = Vec::new();
        for slot in proposed.iter().filter(|slot| slot.provider_id == self.provider_id) {
            if slot.is_active {
                conflicts.extend(self.appointment_overlap(slot));
                conflicts.extend(self.time_off_conflicts(slot));
                conflicts.extend(self.capacity_exceeded(slot));
            } else {
                conflicts.extend(self.availability_gap(slot));
            }
        }
        conflicts.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.affected_dates.first().cmp(&b.affected_dates.first()))
        });
        conflicts
    }

    /// Dates `slot` would govern once written: the horizon plus the slot's own
    /// effective range, never before the horizon starts.
    fn governed_dates(&self, slot: &AvailabilitySlot) -> Vec<NaiveDate> {
        let mut dates: BTreeSet<NaiveDate> = self.options.horizon.days().collect();
        if let Some(range) = slot.effective {
            dates.extend(range.days().filter(|date| *date >= self.options.horizon.start));
        }
        dates.into_iter().filter(|date| self.governs(slot, *date)).collect()
    }

    fn governs(&self, slot: &AvailabilitySlot, date: NaiveDate) -> bool {
        slot.applies_on(date) && (!slot.is_canonical() || !self.has_override_on(date))
    }

    /// Windows on `date` covered by approved time off.
    fn blocked_on(&self, date: NaiveDate) -> impl Iterator<Item = Interval> + '_ {
        self.snapshot
            .approved_time_off()
            .filter_map(move |request| request.blocked_window_on(date))
            .map(|(start, end)| Interval::new(start, end))
    }

    fn has_override_on(&self, date: NaiveDate) -> bool {
        self.snapshot.slots.iter().any(|existing| {
            existing.provider_id == self.provider_id
                && existing.is_live()
                && !existing.is_canonical()
                && existing.applies_on(date)
        })
    }

    fn committed_on(&self, date: NaiveDate) -> Vec<&'a Appointment> {
        self.snapshot
            .appointments
            .iter()
            .filter(|appointment| {
                appointment.provider_id == self.provider_id
                    && appointment.date == date
                    && appointment.is_committed()
            })
            .collect()
    }

    fn appointment_overlap(&self, slot: &AvailabilitySlot) -> Option<ScheduleConflict> {
        let window = Interval::of_slot(slot);
        let mut affected: Vec<&Appointment> = Vec::new();
        let mut critical = false;
        let mut suggestions = Vec::new();
        let mut every_appointment_movable = true;

        for date in self.governed_dates(slot) {
            let on_date = self.committed_on(date);
            let (outside, inside): (Vec<&Appointment>, Vec<&Appointment>) = on_date
                .into_iter()
                .partition(|appointment| !window.contains(&Interval::of_appointment(appointment)));
            if outside.is_empty() {
                continue;
            }

            let removed: Vec<Interval> = self
                .snapshot
                .effective_slot(date)
                .filter(|previous| previous.is_active)
                .map(|previous| Interval::of_slot(&previous).subtract(&window))
                .unwrap_or_default();

            let mut busy: Vec<Interval> = inside.iter().map(|a| Interval::of_appointment(a)).collect();
            busy.extend(self.blocked_on(date));
            for appointment in outside {
                if !appointment.movable
                    && removed.iter().any(|part| part.contains_time(appointment.start_time))
                {
                    critical = true;
                }

                let candidates = self.reschedule_candidates(appointment, &window, &busy);
                if let Some(best) = candidates.first() {
                    // Later appointments must not be offered the same time.
                    busy.push(best.0);
                }
                if candidates
                    .first()
                    .map_or(true, |(_, confidence)| *confidence < self.options.auto_resolve_confidence)
                {
                    every_appointment_movable = false;
                }
                suggestions.extend(candidates.into_iter().map(|(candidate, confidence)| {
                    ConflictSuggestion {
                        action: ResolutionAction::Reschedule {
                            appointment_id: appointment.id,
                            date,
                            start_time: candidate.start,
                            end_time: candidate.end,
                        },
                        description: format!(
                            "Move appointment on {date} from {} to {}",
                            appointment.start_time.format("%H:%M"),
                            candidate.start.format("%H:%M")
                        ),
                        estimated_impact: "1 client needs to confirm the new time".into(),
                        confidence,
                    }
                }));
                affected.push(appointment);
            }
        }

        if affected.is_empty() {
            return None;
        }

        let affected_dates: BTreeSet<NaiveDate> = affected.iter().map(|a| a.date).collect();
        Some(ScheduleConflict {
            id: conflict_id(self.provider_id, ConflictType::AppointmentOverlap, slot.id, ""),
            conflict_type: ConflictType::AppointmentOverlap,
            severity: overlap_severity(affected.len(), critical),
            slot_id: slot.id,
            affected_dates: affected_dates.into_iter().collect(),
            affected_appointments: affected.iter().map(|a| a.id).collect(),
            message: format!(
                "{} booked appointment(s) fall outside {}-{}",
                affected.len(),
                slot.start_time.format("%H:%M"),
                slot.end_time.format("%H:%M")
            ),
            suggestions,
            auto_resolvable: every_appointment_movable,
        })
    }

    /// Free windows of the same length inside `window`, closest to the original start first.
    fn reschedule_candidates(
        &self,
        appointment: &Appointment,
        window: &Interval,
        busy: &[Interval],
    ) -> Vec<(Interval, u8)> {
        let duration = appointment.duration_minutes();
        let original = minute_of_day(appointment.start_time);
        let step = self.options.suggestion_step_minutes.max(1);
        let (first, last) = (minute_of_day(window.start), minute_of_day(window.end));

        let mut candidates: Vec<(Interval, i64)> = (first..=last - duration)
            .step_by(step as usize)
            .map(|start| Interval::new(time_of_minute(start), time_of_minute(start + duration)))
            .filter(|candidate| !busy.iter().any(|taken| taken.overlaps(candidate)))
            .map(|candidate| {
                let moved = (minute_of_day(candidate.start) - original).abs();
                (candidate, moved)
            })
            .collect();
        candidates.sort_by_key(|(candidate, moved)| (*moved, candidate.start));
        candidates
            .into_iter()
            .take(self.options.max_suggestions)
            .map(|(candidate, moved)| (candidate, reschedule_confidence(moved)))
            .collect()
    }

    fn availability_gap(&self, slot: &AvailabilitySlot) -> Option<ScheduleConflict> {
        let affected: Vec<&Appointment> = self
            .governed_dates(slot)
            .into_iter()
            .flat_map(|date| self.committed_on(date))
            .collect();
        if affected.is_empty() {
            return None;
        }

        let start = affected.iter().map(|a| a.start_time).min().unwrap_or(slot.start_time);
        let end = affected.iter().map(|a| a.end_time).max().unwrap_or(slot.end_time);
        let affected_dates: BTreeSet<NaiveDate> = affected.iter().map(|a| a.date).collect();

        Some(ScheduleConflict {
            id: conflict_id(self.provider_id, ConflictType::AvailabilityGap, slot.id, ""),
            conflict_type: ConflictType::AvailabilityGap,
            severity: Severity::High,
            slot_id: slot.id,
            affected_dates: affected_dates.into_iter().collect(),
            affected_appointments: affected.iter().map(|a| a.id).collect(),
            message: format!(
                "No availability on day {} but {} appointment(s) are booked",
                slot.day_of_week,
                affected.len()
            ),
            suggestions: vec![ConflictSuggestion {
                action: ResolutionAction::ExtendHours {
                    slot_id: slot.id,
                    start_time: start,
                    end_time: end,
                },
                description: format!(
                    "Keep working {}-{} to cover booked appointments",
                    start.format("%H:%M"),
                    end.format("%H:%M")
                ),
                estimated_impact: format!("{} appointment(s) kept", affected.len()),
                confidence: 60,
            }],
            auto_resolvable: is_auto_resolvable(ConflictType::AvailabilityGap, affected.len(), true),
        })
    }

    fn time_off_conflicts(&self, slot: &AvailabilitySlot) -> Vec<ScheduleConflict> {
        let window = Interval::of_slot(slot);
        self.snapshot
            .approved_time_off()
            .filter(|request| request.provider_id == self.provider_id)
            .filter_map(|request| {
                // Walks the request's own dates so leave beyond the horizon still counts.
                let dates: Vec<NaiveDate> = request
                    .dates()
                    .days()
                    .filter(|date| *date >= self.options.horizon.start && self.governs(slot, *date))
                    .filter(|date| {
                        request
                            .blocked_window_on(*date)
                            .is_some_and(|(start, end)| Interval::new(start, end).overlaps(&window))
                    })
                    .collect();
                if dates.is_empty() {
                    return None;
                }
                let affected: Vec<Uuid> = dates
                    .iter()
                    .flat_map(|date| self.committed_on(*date))
                    .filter(|appointment| window.overlaps(&Interval::of_appointment(appointment)))
                    .map(|appointment| appointment.id)
                    .collect();
                Some(ScheduleConflict {
                    id: conflict_id(
                        self.provider_id,
                        ConflictType::TimeOffConflict,
                        slot.id,
                        &request.id.to_string(),
                    ),
                    conflict_type: ConflictType::TimeOffConflict,
                    severity: self.time_off_severity(request),
                    slot_id: slot.id,
                    affected_dates: dates,
                    affected_appointments: affected,
                    message: format!(
                        "Slot overlaps approved time off ({}) from {} to {}",
                        request.reason, request.start_date, request.end_date
                    ),
                    suggestions: Vec::new(),
                    auto_resolvable: false,
                })
            })
            .collect()
    }

    fn time_off_severity(&self, request: &TimeOffRequest) -> Severity {
        let starts_at = request
            .start_date
            .and_time(request.start_time.unwrap_or(NaiveTime::MIN))
            .and_utc();
        if starts_at <= self.options.now + self.options.time_off_critical_window {
            Severity::Critical
        } else {
            Severity::High
        }
    }

    fn capacity_exceeded(&self, slot: &AvailabilitySlot) -> Option<ScheduleConflict> {
        let window = Interval::of_slot(slot);
        let capacity = self
            .snapshot
            .location_capacity
            .get(&slot.location_id)
            .copied()
            .unwrap_or(self.options.default_chairs);

        let mut worst_peak = 0;
        let mut peak_window: Option<Interval> = None;
        let mut dates = Vec::new();
        for date in self.governed_dates(slot) {
            let mut windows = vec![window];
            windows.extend(self.colleague_windows(slot, date).into_iter().filter(|w| w.overlaps(&window)));
            let (peak, busiest) = peak_concurrency(&windows);
            if peak > capacity {
                dates.push(date);
                if peak > worst_peak {
                    worst_peak = peak;
                    peak_window = busiest.and_then(|busiest| busiest.intersect(&window));
                }
            }
        }
        let peak_window = peak_window?;

        let affected: Vec<&Appointment> = dates
            .iter()
            .flat_map(|date| self.committed_on(*date))
            .filter(|appointment| peak_window.overlaps(&Interval::of_appointment(appointment)))
            .collect();

        let mut suggestions = Vec::new();
        if let Some(trimmed) = window
            .subtract(&peak_window)
            .into_iter()
            .max_by_key(Interval::minutes)
        {
            suggestions.push(ConflictSuggestion {
                action: ResolutionAction::ReduceCapacity {
                    slot_id: slot.id,
                    start_time: trimmed.start,
                    end_time: trimmed.end,
                },
                description: format!(
                    "Shorten the slot to {}-{} to stay out of the busiest window",
                    trimmed.start.format("%H:%M"),
                    trimmed.end.format("%H:%M")
                ),
                estimated_impact: format!("{} fewer bookable minutes per day", window.minutes() - trimmed.minutes()),
                confidence: 60,
            });
        }
        if let Some(cheapest) = affected
            .iter()
            .min_by(|a, b| a.price.total_cmp(&b.price))
        {
            suggestions.push(ConflictSuggestion {
                action: ResolutionAction::CancelAppointment {
                    appointment_id: cheapest.id,
                },
                description: format!(
                    "Cancel the lowest-value appointment on {} at {}",
                    cheapest.date,
                    cheapest.start_time.format("%H:%M")
                ),
                estimated_impact: format!("{:.2} revenue lost", cheapest.price),
                confidence: 40,
            });
        }

        Some(ScheduleConflict {
            id: conflict_id(self.provider_id, ConflictType::CapacityExceeded, slot.id, ""),
            conflict_type: ConflictType::CapacityExceeded,
            severity: capacity_severity(worst_peak, capacity),
            slot_id: slot.id,
            affected_dates: dates,
            affected_appointments: affected.iter().map(|a| a.id).collect(),
            message: format!(
                "{worst_peak} providers would be bookable at once with only {capacity} chair(s)"
            ),
            suggestions,
            auto_resolvable: false,
        })
    }

    /// Windows of other providers working at the slot's location on `date`.
    fn colleague_windows(&self, slot: &AvailabilitySlot, date: NaiveDate) -> Vec<Interval> {
        let colleagues: BTreeSet<ProviderId> = self
            .snapshot
            .location_slots
            .iter()
            .filter(|other| other.provider_id != self.provider_id && other.location_id == slot.location_id)
            .map(|other| other.provider_id)
            .collect();
        colleagues
            .into_iter()
            .filter_map(|colleague| {
                schedule_model::effective_slot(&self.snapshot.location_slots, colleague, date)
            })
            .filter(|other| other.is_active && other.location_id == slot.location_id)
            .map(|other| Interval::of_slot(&other))
            .collect()
    }
}

/// Maximum number of overlapping windows and the first window where it is reached.
fn peak_concurrency(windows: &[Interval]) -> (u32, Option<Interval>) {
    let mut events: Vec<(NaiveTime, i32)> = windows
        .iter()
        .flat_map(|window| [(window.start, 1), (window.end, -1)])
        .collect();
    // Ends sort before starts at the same instant: back-to-back windows do not overlap.
    events.sort();

    let mut current = 0;
    let mut peak = 0;
    let mut busiest = None;
    for (index, (time, delta)) in events.iter().enumerate() {
        current += delta;
        if current > peak {
            peak = current;
            let until = events.get(index + 1).map_or(*time, |(next, _)| *next);
            busiest = Some(Interval::new(*time, until));
        }
    }
    (peak.max(0) as u32, busiest)
}

/// Gaps without appointments and overlaps where every appointment can be
/// moved confidently need no human confirmation.
pub fn is_auto_resolvable(
    conflict_type: ConflictType,
    affected_appointments: usize,
    every_appointment_movable: bool,
) -> bool {
    match conflict_type {
        ConflictType::AvailabilityGap => affected_appointments == 0,
        ConflictType::AppointmentOverlap => every_appointment_movable,
        ConflictType::TimeOffConflict | ConflictType::CapacityExceeded => false,
    }
}

/// Applies one suggestion to the snapshot or the proposal.
pub fn apply_suggestion(
    suggestion: &ConflictSuggestion,
    snapshot: &mut ScheduleSnapshot,
    proposed: &mut [AvailabilitySlot],
) -> Result<()> {
    match &suggestion.action {
        ResolutionAction::Reschedule {
            appointment_id,
            date,
            start_time,
            end_time,
        } => {
            let appointment = find_appointment(snapshot, *appointment_id)?;
            appointment.date = *date;
            appointment.start_time = *start_time;
            appointment.end_time = *end_time;
        }
        ResolutionAction::ExtendHours {
            slot_id,
            start_time,
            end_time,
        }
        | ResolutionAction::ReduceCapacity {
            slot_id,
            start_time,
            end_time,
        } => {
            let slot = proposed
                .iter_mut()
                .find(|slot| slot.id == *slot_id)
                .ok_or_else(|| CoreError::not_found("proposed slot", *slot_id))?;
            let mut updated = slot.clone();
            updated.start_time = *start_time;
            updated.end_time = *end_time;
            updated.is_active = true;
            schedule_model::validate_slot(&updated)?;
            *slot = updated;
        }
        ResolutionAction::CancelAppointment { appointment_id } => {
            find_appointment(snapshot, *appointment_id)?.status = AppointmentStatus::Cancelled;
        }
    }
    Ok(())
}

fn find_appointment(snapshot: &mut ScheduleSnapshot, id: Uuid) -> Result<&mut Appointment> {
    snapshot
        .appointments
        .iter_mut()
        .find(|appointment| appointment.id == id)
        .ok_or_else(|| CoreError::not_found("appointment", id))
}

/// Applies the closest reschedule for every affected appointment of an
/// auto-resolvable conflict. Returns `false` when the conflict needs a human.
pub fn auto_resolve(
    conflict: &ScheduleConflict,
    snapshot: &mut ScheduleSnapshot,
    proposed: &mut [AvailabilitySlot],
) -> Result<bool> {
    if !conflict.auto_resolvable {
        return Ok(false);
    }
    let mut chosen = Vec::with_capacity(conflict.affected_appointments.len());
    for appointment_id in &conflict.affected_appointments {
        // Suggestions are ordered closest first; the first one per appointment
        // is the one detection reserved for it.
        let Some(best) = conflict.suggestions.iter().find(|suggestion| {
            matches!(suggestion.action, ResolutionAction::Reschedule { appointment_id: id, .. } if id == *appointment_id)
        }) else {
            return Ok(false);
        };
        chosen.push(best);
    }
    for suggestion in chosen {
        apply_suggestion(suggestion, snapshot, proposed)?;
    }
    Ok(true)
}
