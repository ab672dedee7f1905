use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::{
    auth::{ApiAdmin, ApiUser},
    booking::{self, BookingInput, RescheduleInput},
    calendar,
    db::local_now,
    error::ApiResult,
    models::{AppointmentResponse, AppointmentRow},
    state::AppState,
};

#[derive(Deserialize)]
struct StatusBody {
    status: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/appointments")
            .route(web::get().to(list_all))
            .route(web::post().to(book)),
    )
    .route("/appointments/my", web::get().to(mine))
    .route("/appointments/sync-all-to-calendar", web::post().to(sync_all))
    .route("/appointments/{id}", web::get().to(get))
    .route("/appointments/{id}/reschedule", web::put().to(reschedule))
    .route("/appointments/{id}/cancel", web::put().to(cancel))
    .route("/appointments/{id}/status", web::put().to(update_status))
    .route("/appointments/{id}/sync-to-calendar", web::post().to(sync_one));
}

fn respond(rows: Vec<AppointmentRow>) -> HttpResponse {
    let body: Vec<AppointmentResponse> = rows.into_iter().map(AppointmentResponse::from).collect();
    HttpResponse::Ok().json(body)
}

async fn book(
    state: web::Data<AppState>,
    user: ApiUser,
    body: web::Json<BookingInput>,
) -> ApiResult<HttpResponse> {
    let row = booking::book(&state, &user.0, body.into_inner(), local_now()).await?;
    Ok(HttpResponse::Created().json(AppointmentResponse::from(row)))
}

async fn list_all(state: web::Data<AppState>, _admin: ApiAdmin) -> ApiResult<HttpResponse> {
    Ok(respond(booking::list_all(&state.db).await?))
}

async fn mine(state: web::Data<AppState>, user: ApiUser) -> ApiResult<HttpResponse> {
    Ok(respond(booking::list_for_user(&state.db, &user.0.id).await?))
}

async fn get(state: web::Data<AppState>, user: ApiUser, path: web::Path<String>) -> ApiResult<HttpResponse> {
    let row = booking::get(&state.db, &user.0, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(AppointmentResponse::from(row)))
}

async fn reschedule(
    state: web::Data<AppState>,
    user: ApiUser,
    path: web::Path<String>,
    body: web::Json<RescheduleInput>,
) -> ApiResult<HttpResponse> {
    let row = booking::reschedule(&state, &user.0, &path.into_inner(), body.into_inner(), local_now()).await?;
    Ok(HttpResponse::Ok().json(AppointmentResponse::from(row)))
}

async fn cancel(state: web::Data<AppState>, user: ApiUser, path: web::Path<String>) -> ApiResult<HttpResponse> {
    booking::cancel(&state, &user.0, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().finish())
}

async fn update_status(
    state: web::Data<AppState>,
    admin: ApiAdmin,
    path: web::Path<String>,
    body: web::Json<StatusBody>,
) -> ApiResult<HttpResponse> {
    let row = booking::update_status(&state, &admin.0, &path.into_inner(), &body.status).await?;
    Ok(HttpResponse::Ok().json(AppointmentResponse::from(row)))
}

async fn sync_one(state: web::Data<AppState>, user: ApiUser, path: web::Path<String>) -> ApiResult<HttpResponse> {
    let result = calendar::sync_appointment(&state, &user.0, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(result))
}

async fn sync_all(state: web::Data<AppState>, user: ApiUser) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(calendar::sync_all(&state, &user.0).await?))
}
