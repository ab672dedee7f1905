//! Availability-slot classification, filtering and ordering.
//!
//! Everything here works on rows that were already loaded and takes `now`
//! explicitly, so the same predicates drive the admin slot table, the
//! customer slot picker and the reschedule dialog.

use std::cmp::Ordering;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::models::{AppointmentRow, AppointmentStatus, SlotRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SlotState {
    Available,
    Booked,
    Expired,
}

impl SlotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotState::Available => "available",
            SlotState::Booked => "booked",
            SlotState::Expired => "expired",
        }
    }
}

pub fn classify(slot: &SlotRow, now: NaiveDateTime) -> SlotState {
    if slot.is_booked {
        SlotState::Booked
    } else if slot.start_time <= now {
        SlotState::Expired
    } else {
        SlotState::Available
    }
}

pub fn is_bookable(slot: &SlotRow, now: NaiveDateTime) -> bool {
    classify(slot, now) == SlotState::Available
}

fn newest_first(a: &SlotRow, b: &SlotRow) -> Ordering {
    b.start_time
        .cmp(&a.start_time)
        .then_with(|| a.id.cmp(&b.id))
}

fn oldest_first(a: &SlotRow, b: &SlotRow) -> Ordering {
    a.start_time
        .cmp(&b.start_time)
        .then_with(|| a.id.cmp(&b.id))
}

pub fn sort_newest_first(slots: &mut [SlotRow]) {
    slots.sort_by(newest_first);
}

pub fn bookable_for_service(
    slots: Vec<SlotRow>,
    service_id: &str,
    now: NaiveDateTime,
) -> Vec<SlotRow> {
    let mut slots: Vec<SlotRow> = slots
        .into_iter()
        .filter(|slot| slot.service_id == service_id && is_bookable(slot, now))
        .collect();
    slots.sort_by(oldest_first);
    slots
}

/// Slots an existing appointment may move to: same service, still bookable,
/// never the slot it already holds.
pub fn reschedule_candidates(
    slots: Vec<SlotRow>,
    service_id: &str,
    current_slot_id: Option<&str>,
    now: NaiveDateTime,
) -> Vec<SlotRow> {
    bookable_for_service(slots, service_id, now)
        .into_iter()
        .filter(|slot| Some(slot.id.as_str()) != current_slot_id)
        .collect()
}

pub fn in_window(slots: Vec<SlotRow>, from: NaiveDateTime, to: NaiveDateTime) -> Vec<SlotRow> {
    slots
        .into_iter()
        .filter(|slot| slot.start_time >= from && slot.start_time <= to)
        .collect()
}

pub fn validate_window(
    start: NaiveDateTime,
    end: NaiveDateTime,
    now: NaiveDateTime,
) -> Result<(), &'static str> {
    if start >= end {
        return Err("Start time must be before end time");
    }
    if start < now {
        return Err("Cannot create slots in the past");
    }
    Ok(())
}

pub fn overlaps(
    a_start: NaiveDateTime,
    a_end: NaiveDateTime,
    b_start: NaiveDateTime,
    b_end: NaiveDateTime,
) -> bool {
    a_start < b_end && a_end > b_start
}

pub fn find_overlap<'a>(
    start: NaiveDateTime,
    end: NaiveDateTime,
    existing: &'a [SlotRow],
    exclude_id: Option<&str>,
) -> Option<&'a SlotRow> {
    existing.iter().find(|slot| {
        Some(slot.id.as_str()) != exclude_id
            && overlaps(start, end, slot.start_time, slot.end_time)
    })
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SlotSummary {
    pub available: usize,
    pub booked: usize,
    pub expired: usize,
}

pub fn summarize(slots: &[SlotRow], now: NaiveDateTime) -> SlotSummary {
    slots
        .iter()
        .fold(SlotSummary::default(), |mut summary, slot| {
            match classify(slot, now) {
                SlotState::Available => summary.available += 1,
                SlotState::Booked => summary.booked += 1,
                SlotState::Expired => summary.expired += 1,
            }
            summary
        })
}

fn is_past_status(row: &AppointmentRow) -> bool {
    row.status().map(|status| status.is_closed()).unwrap_or(false)
}

fn appointment_order(a: &AppointmentRow, b: &AppointmentRow) -> Ordering {
    a.scheduled_at
        .cmp(&b.scheduled_at)
        .then_with(|| a.slot_start.cmp(&b.slot_start))
        .then_with(|| a.id.cmp(&b.id))
}

/// Upcoming appointments soonest first, finished ones most recent first.
pub fn split_upcoming_past(
    appointments: Vec<AppointmentRow>,
) -> (Vec<AppointmentRow>, Vec<AppointmentRow>) {
    let (mut past, mut upcoming): (Vec<_>, Vec<_>) =
        appointments.into_iter().partition(is_past_status);
    upcoming.sort_by(appointment_order);
    past.sort_by(|a, b| appointment_order(b, a));
    (upcoming, past)
}

pub fn filter_by_status(appointments: Vec<AppointmentRow>, filter: &str) -> Vec<AppointmentRow> {
    let filter = filter.trim();
    if filter.is_empty() || filter.eq_ignore_ascii_case("all") {
        return appointments;
    }
    let wanted = AppointmentStatus::parse(filter);
    appointments
        .into_iter()
        .filter(|row| match wanted {
            Some(status) => row.status() == Some(status),
            None => row.status.eq_ignore_ascii_case(filter),
        })
        .collect()
}
