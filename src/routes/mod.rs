pub mod account;
pub mod admin;
pub mod api;
pub mod events;
pub mod public;

use chrono::NaiveDateTime;

use crate::{
    error::ApiError,
    filters,
    models::{AppointmentRow, ServiceRow, SlotRow},
    slots,
};

/// Appointment as listed on console pages.
#[derive(Clone, Debug)]
pub(crate) struct AppointmentView {
    pub id: String,
    pub user_name: String,
    pub user_email: String,
    pub service_name: String,
    pub price_cents: i64,
    pub status: String,
    pub location: String,
    pub when: String,
    pub description: String,
    pub has_description: bool,
    pub can_change: bool,
}

impl From<AppointmentRow> for AppointmentView {
    fn from(row: AppointmentRow) -> Self {
        let when = match row.slot_start.as_ref() {
            Some(start) => filters::when(start),
            None => filters::day(&row.scheduled_at),
        }
        .unwrap_or_default();
        let can_change = !row.status().is_some_and(|status| status.is_closed());
        let description = row.description.unwrap_or_default();
        Self {
            id: row.id,
            user_name: row.user_name,
            user_email: row.user_email,
            service_name: row.service_name,
            price_cents: row.service_price_cents,
            status: row.status,
            location: row.location,
            when,
            has_description: !description.trim().is_empty(),
            description,
            can_change,
        }
    }
}

impl AppointmentView {
    pub fn is_status(&self, status: &str) -> bool {
        self.status.eq_ignore_ascii_case(status)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct SlotView {
    pub id: String,
    pub service_name: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub state: &'static str,
    pub selected: bool,
}

impl SlotView {
    pub fn new(row: SlotRow, now: NaiveDateTime) -> Self {
        let state = slots::classify(&row, now).as_str();
        Self {
            id: row.id,
            service_name: row.service_name,
            start: row.start_time,
            end: row.end_time,
            state,
            selected: false,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct ServiceOption {
    pub id: String,
    pub name: String,
    pub description: String,
    pub duration_min: i64,
    pub price_cents: i64,
    pub selected: bool,
}

impl From<ServiceRow> for ServiceOption {
    fn from(row: ServiceRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            duration_min: row.duration_min,
            price_cents: row.price_cents,
            selected: false,
        }
    }
}

/// Client-side problems become form messages; anything else is a 500.
pub(crate) fn form_messages(err: ApiError) -> actix_web::Result<Vec<String>> {
    match err {
        ApiError::Internal(detail) => {
            log::error!("Console action failed: {detail}");
            Err(actix_web::error::ErrorInternalServerError("Something went wrong"))
        }
        other => Ok(other.to_string().split("; ").map(str::to_string).collect()),
    }
}
