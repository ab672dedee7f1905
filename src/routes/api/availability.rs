use actix_web::{web, HttpResponse};

use crate::{
    auth::ApiAdmin,
    availability::{self, AvailableQuery, SlotInput},
    db::local_now,
    error::ApiResult,
    models::{SlotResponse, SlotRow},
    state::AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/availability")
            .route(web::get().to(available))
            .route(web::post().to(create)),
    )
    .route("/availability/all", web::get().to(all))
    .route("/availability/service/{service_id}", web::get().to(by_service))
    .route("/availability/{slot_id}/check", web::get().to(check))
    .route("/availability/{slot_id}/book", web::put().to(mark_booked))
    .route("/availability/{slot_id}/release", web::put().to(release))
    .service(
        web::resource("/availability/{slot_id}")
            .route(web::put().to(update))
            .route(web::delete().to(delete)),
    );
}

fn respond(rows: Vec<SlotRow>) -> HttpResponse {
    let now = local_now();
    let body: Vec<SlotResponse> = rows
        .into_iter()
        .map(|row| SlotResponse::from_row(row, now))
        .collect();
    HttpResponse::Ok().json(body)
}

async fn available(state: web::Data<AppState>, query: web::Query<AvailableQuery>) -> ApiResult<HttpResponse> {
    let query = query.into_inner();
    let rows = availability::list_available(
        &state.db,
        query.service_id.as_deref(),
        query.start_time,
        query.end_time,
        local_now(),
    )
    .await?;
    Ok(respond(rows))
}

async fn all(state: web::Data<AppState>, _admin: ApiAdmin) -> ApiResult<HttpResponse> {
    Ok(respond(availability::list_all(&state.db).await?))
}

async fn by_service(state: web::Data<AppState>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    Ok(respond(availability::list_by_service(&state.db, &path.into_inner()).await?))
}

async fn check(state: web::Data<AppState>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    Ok(HttpResponse::Ok().json(availability::check(&state.db, &path.into_inner()).await?))
}

async fn create(
    state: web::Data<AppState>,
    admin: ApiAdmin,
    body: web::Json<SlotInput>,
) -> ApiResult<HttpResponse> {
    let slot = availability::create(&state, &admin.0, body.into_inner(), local_now()).await?;
    Ok(HttpResponse::Created().json(SlotResponse::from_row(slot, local_now())))
}

async fn update(
    state: web::Data<AppState>,
    admin: ApiAdmin,
    path: web::Path<String>,
    body: web::Json<SlotInput>,
) -> ApiResult<HttpResponse> {
    let slot = availability::update(&state, &admin.0, &path.into_inner(), body.into_inner(), local_now()).await?;
    Ok(HttpResponse::Ok().json(SlotResponse::from_row(slot, local_now())))
}

async fn mark_booked(
    state: web::Data<AppState>,
    _admin: ApiAdmin,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    availability::mark_booked(&state, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().finish())
}

async fn release(
    state: web::Data<AppState>,
    admin: ApiAdmin,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    availability::release(&state, &admin.0, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().finish())
}

async fn delete(
    state: web::Data<AppState>,
    admin: ApiAdmin,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    availability::delete(&state, &admin.0, &path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}
