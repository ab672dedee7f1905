//! JSON API under `/api`. Callers authenticate with a bearer token issued by
//! `/api/auth/login`; errors come back as `{ "timestamp", "message" }`.

use actix_web::{error::JsonPayloadError, web, HttpRequest};

use crate::error::ApiError;

mod appointments;
mod auth;
mod availability;
mod calendar;
mod services;
mod users;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .app_data(web::JsonConfig::default().error_handler(json_error))
            .app_data(web::QueryConfig::default().error_handler(|err, _| {
                ApiError::bad_request(format!("Invalid query: {err}")).into()
            }))
            .configure(auth::configure)
            .configure(users::configure)
            .configure(services::configure)
            .configure(availability::configure)
            .configure(appointments::configure)
            .configure(calendar::configure),
    );
}

fn json_error(err: JsonPayloadError, _: &HttpRequest) -> actix_web::Error {
    ApiError::bad_request(format!("Invalid request body: {err}")).into()
}
