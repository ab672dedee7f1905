use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::{
    accounts::{self, ProfileUpdate},
    auth::ApiUser,
    calendar::{self, TokenInput},
    error::{ApiError, ApiResult},
    state::AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/me", web::get().to(me))
        .service(
            web::resource("/users/profile")
                .route(web::get().to(profile))
                .route(web::put().to(update_profile)),
        )
        .route("/users/google-calendar/token", web::post().to(save_calendar_token))
        .route("/users/google-calendar/status", web::get().to(calendar_status))
        .route("/users/google-calendar/sync", web::delete().to(disable_calendar_sync));
}

async fn me(state: web::Data<AppState>, user: ApiUser) -> ApiResult<HttpResponse> {
    let row = accounts::find_by_id(&state.db, &user.0.id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    Ok(HttpResponse::Ok().json(json!({
        "id": row.id,
        "name": row.name,
        "surname": row.surname,
        "email": row.email,
        "phoneNum": row.phone_num,
        "role": row.role,
        "enabled": row.enabled,
    })))
}

async fn profile(state: web::Data<AppState>, user: ApiUser) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(accounts::profile(&state.db, &user.0.id).await?))
}

async fn update_profile(
    state: web::Data<AppState>,
    user: ApiUser,
    body: web::Json<ProfileUpdate>,
) -> ApiResult<HttpResponse> {
    let updated = accounts::update_profile(&state.db, &user.0.id, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(updated))
}

async fn save_calendar_token(
    state: web::Data<AppState>,
    user: ApiUser,
    body: web::Json<TokenInput>,
) -> ApiResult<HttpResponse> {
    let status = calendar::save_token(&state, &user.0, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(status))
}

async fn calendar_status(state: web::Data<AppState>, user: ApiUser) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(calendar::status(&state.db, &user.0.id).await?))
}

async fn disable_calendar_sync(state: web::Data<AppState>, user: ApiUser) -> ApiResult<HttpResponse> {
    calendar::disconnect(&state.db, &user.0.id).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Successfully disconnected from Google Calendar" })))
}
