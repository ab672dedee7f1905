use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::{auth::ApiUser, calendar, error::ApiResult, state::AppState};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/calendar")
            .route("/google/status", web::get().to(status))
            .route("/google/disconnect", web::delete().to(disconnect))
            .route("/sync-status/{appointment_id}", web::get().to(sync_status))
            .route("/sync-existing-appointments", web::post().to(sync_existing)),
    );
}

async fn status(state: web::Data<AppState>, user: ApiUser) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(calendar::status(&state.db, &user.0.id).await?))
}

async fn disconnect(state: web::Data<AppState>, user: ApiUser) -> ApiResult<HttpResponse> {
    calendar::disconnect(&state.db, &user.0.id).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Google Calendar disconnected" })))
}

async fn sync_status(
    state: web::Data<AppState>,
    user: ApiUser,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let status = calendar::sync_status(&state.db, &user.0.id, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(status))
}

async fn sync_existing(state: web::Data<AppState>, user: ApiUser) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(calendar::sync_all(&state, &user.0).await?))
}
