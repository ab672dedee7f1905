//! Salonbook: a booking console and JSON API for a mobile makeup business.
//!
//! Customers browse services, pick an open availability slot and book it;
//! admins publish slots, manage the catalog and move appointments through
//! their statuses. Server-rendered pages live under `/`, `/account` and
//! `/admin`; the JSON API lives under `/api`.

pub mod accounts;
pub mod auth;
pub mod availability;
pub mod booking;
pub mod calendar;
pub mod catalog;
pub mod config;
pub mod db;
pub mod error;
pub mod filters;
pub mod identity;
pub mod models;
pub mod push;
pub mod reminders;
pub mod routes;
pub mod slots;
pub mod state;
pub mod templates;

use std::sync::Arc;

use actix_web::web;
use sqlx::SqlitePool;
use tokio::sync::broadcast;

use crate::{
    auth::TokenKeys,
    calendar::CalendarClient,
    config::Config,
    identity::IdentityProvider,
    state::AppState,
};

pub fn build_state(
    db: SqlitePool,
    config: &Config,
    identity: Arc<dyn IdentityProvider>,
    calendar: Arc<dyn CalendarClient>,
) -> AppState {
    let (events, _) = broadcast::channel(100);
    AppState {
        db,
        events,
        push: config.push.clone(),
        tokens: TokenKeys::new(&config.jwt_secret, config.jwt_ttl_minutes),
        identity,
        calendar,
    }
}

/// Registers every route. The API goes first so `/api/...` never falls
/// through to the console pages.
pub fn configure_app(cfg: &mut web::ServiceConfig) {
    cfg.configure(routes::api::configure)
        .configure(routes::public::configure)
        .configure(routes::account::configure)
        .configure(routes::admin::configure)
        .configure(routes::events::configure);
}
