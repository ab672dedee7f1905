use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

pub const ROLE_ADMIN: &str = "ROLE_ADMIN";
pub const ROLE_USER: &str = "ROLE_USER";

/// Storage and form format for slot times (naive local time).
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn fmt_time(value: &NaiveDateTime) -> String {
    value.format(TIME_FORMAT).to_string()
}

pub fn fmt_date(value: &NaiveDate) -> String {
    value.format(DATE_FORMAT).to_string()
}

/// Accepts `2025-03-01T10:00:00`, `2025-03-01T10:00` and the space-separated
/// variants browsers and clients send.
pub fn parse_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 4] = [
        AppointmentStatus::Pending,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "PENDING",
            AppointmentStatus::Confirmed => "CONFIRMED",
            AppointmentStatus::Cancelled => "CANCELLED",
            AppointmentStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(raw))
    }

    /// Cancelled and completed appointments can no longer change slots.
    pub fn is_closed(&self) -> bool {
        matches!(self, AppointmentStatus::Cancelled | AppointmentStatus::Completed)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub surname: String,
    pub email: String,
    pub phone_num: String,
    pub password_hash: String,
    pub role: String,
    pub enabled: bool,
    pub verification_code: Option<String>,
    pub verification_expires_at: Option<String>,
    pub reset_code: Option<String>,
    pub reset_expires_at: Option<String>,
    pub created_at: String,
}

impl UserRow {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.name, self.surname).trim().to_string()
    }

    pub fn is_admin(&self) -> bool {
        self.role.eq_ignore_ascii_case(ROLE_ADMIN)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ServiceRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub duration_min: i64,
    pub price_cents: i64,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SlotRow {
    pub id: String,
    pub owner_id: String,
    pub service_id: String,
    pub service_name: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub is_booked: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppointmentRow {
    pub id: String,
    pub slot_id: Option<String>,
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub service_id: String,
    pub service_name: String,
    pub service_description: String,
    pub service_duration_min: i64,
    pub service_price_cents: i64,
    pub status: String,
    pub location: String,
    pub scheduled_at: NaiveDate,
    pub description: Option<String>,
    pub slot_start: Option<NaiveDateTime>,
    pub slot_end: Option<NaiveDateTime>,
}

impl AppointmentRow {
    pub fn status(&self) -> Option<AppointmentStatus> {
        AppointmentStatus::parse(&self.status)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActivityRow {
    pub message: String,
    pub created_at: String,
}

pub fn cents_to_price(cents: i64) -> f64 {
    cents as f64 / 100.0
}

pub fn price_to_cents(price: f64) -> i64 {
    (price * 100.0).round() as i64
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceResponse {
    pub service_id: String,
    pub name: String,
    pub description: String,
    pub min_duration: i64,
    pub price: f64,
}

impl From<ServiceRow> for ServiceResponse {
    fn from(row: ServiceRow) -> Self {
        Self {
            service_id: row.id,
            name: row.name,
            description: row.description,
            min_duration: row.duration_min,
            price: cents_to_price(row.price_cents),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotResponse {
    pub slot_id: String,
    pub service_id: String,
    pub service_name: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub is_booked: bool,
    pub state: crate::slots::SlotState,
}

impl SlotResponse {
    pub fn from_row(row: SlotRow, now: NaiveDateTime) -> Self {
        let state = crate::slots::classify(&row, now);
        Self {
            slot_id: row.id,
            service_id: row.service_id,
            service_name: row.service_name,
            start_time: row.start_time,
            end_time: row.end_time,
            is_booked: row.is_booked,
            state,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentResponse {
    pub appointment_id: String,
    pub user_id: String,
    pub user_name: String,
    pub service_id: String,
    pub service_name: String,
    pub service_description: String,
    pub service_duration_min: i64,
    pub service_price: f64,
    pub status: String,
    pub location: String,
    pub scheduled_at: NaiveDate,
    pub description: Option<String>,
    pub slot_id: Option<String>,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
}

impl From<AppointmentRow> for AppointmentResponse {
    fn from(row: AppointmentRow) -> Self {
        Self {
            appointment_id: row.id,
            user_id: row.user_id,
            user_name: row.user_name,
            service_id: row.service_id,
            service_name: row.service_name,
            service_description: row.service_description,
            service_duration_min: row.service_duration_min,
            service_price: cents_to_price(row.service_price_cents),
            status: row.status,
            location: row.location,
            scheduled_at: row.scheduled_at,
            description: row.description,
            slot_id: row.slot_id,
            start_time: row.slot_start,
            end_time: row.slot_end,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub name: String,
    pub surname: String,
    pub email: String,
    pub phone_num: String,
}

impl From<UserRow> for UserProfile {
    fn from(row: UserRow) -> Self {
        Self {
            name: row.name,
            surname: row.surname,
            email: row.email,
            phone_num: row.phone_num,
        }
    }
}
