use std::sync::Arc;

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::{
    auth::TokenKeys, calendar::CalendarClient, identity::IdentityProvider,
    models::AppointmentRow,
};

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub events: broadcast::Sender<ServerEvent>,
    pub push: PushConfig,
    pub tokens: TokenKeys,
    pub identity: Arc<dyn IdentityProvider>,
    pub calendar: Arc<dyn CalendarClient>,
}

#[derive(Clone, Debug)]
pub struct PushConfig {
    pub public_key: String,
    pub private_key: String,
    pub subject: String,
}

impl PushConfig {
    pub fn enabled(&self) -> bool {
        !(self.public_key.trim().is_empty() || self.private_key.trim().is_empty())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ServerEvent {
    pub kind: String,
    pub appointment_id: Option<String>,
    pub slot_id: Option<String>,
    pub status: Option<String>,
    pub user_name: Option<String>,
    pub service: Option<String>,
    pub location: Option<String>,
    pub scheduled_at: Option<String>,
    pub start_time: Option<String>,
}

impl ServerEvent {
    pub fn from_row(kind: &str, row: AppointmentRow) -> Self {
        Self {
            kind: kind.to_string(),
            appointment_id: Some(row.id),
            slot_id: row.slot_id,
            status: Some(row.status),
            user_name: Some(row.user_name),
            service: Some(row.service_name),
            location: Some(row.location),
            scheduled_at: Some(crate::models::fmt_date(&row.scheduled_at)),
            start_time: row.slot_start.as_ref().map(crate::models::fmt_time),
        }
    }

    pub fn slot_changed(kind: &str, slot_id: &str) -> Self {
        Self {
            kind: kind.to_string(),
            appointment_id: None,
            slot_id: Some(slot_id.to_string()),
            status: None,
            user_name: None,
            service: None,
            location: None,
            scheduled_at: None,
            start_time: None,
        }
    }
}
