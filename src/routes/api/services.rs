use actix_web::{web, HttpResponse};

use crate::{
    auth::ApiAdmin,
    catalog::{self, ServiceInput},
    db::log_activity,
    error::ApiResult,
    models::ServiceResponse,
    state::AppState,
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/services")
            .route(web::get().to(list))
            .route(web::post().to(create)),
    )
    .service(
        web::resource("/services/{id}")
            .route(web::get().to(get))
            .route(web::put().to(update))
            .route(web::delete().to(delete)),
    );
}

async fn list(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let services: Vec<ServiceResponse> = catalog::list(&state.db)
        .await?
        .into_iter()
        .map(ServiceResponse::from)
        .collect();
    Ok(HttpResponse::Ok().json(services))
}

async fn get(state: web::Data<AppState>, path: web::Path<String>) -> ApiResult<HttpResponse> {
    let service = catalog::get(&state.db, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ServiceResponse::from(service)))
}

async fn create(
    state: web::Data<AppState>,
    admin: ApiAdmin,
    body: web::Json<ServiceInput>,
) -> ApiResult<HttpResponse> {
    let service = catalog::create(&state.db, body.into_inner()).await?;
    log_activity(
        &state.db,
        "service_created",
        &format!("{} added the service {}.", admin.0.display_name, service.name),
        Some(&admin.0.id),
        None,
    )
    .await;
    Ok(HttpResponse::Created().json(ServiceResponse::from(service)))
}

async fn update(
    state: web::Data<AppState>,
    admin: ApiAdmin,
    path: web::Path<String>,
    body: web::Json<ServiceInput>,
) -> ApiResult<HttpResponse> {
    let service = catalog::update(&state.db, &path.into_inner(), body.into_inner()).await?;
    log_activity(
        &state.db,
        "service_updated",
        &format!("{} updated the service {}.", admin.0.display_name, service.name),
        Some(&admin.0.id),
        None,
    )
    .await;
    Ok(HttpResponse::Ok().json(ServiceResponse::from(service)))
}

async fn delete(
    state: web::Data<AppState>,
    admin: ApiAdmin,
    path: web::Path<String>,
) -> ApiResult<HttpResponse> {
    let service_id = path.into_inner();
    catalog::delete(&state.db, &service_id).await?;
    log_activity(
        &state.db,
        "service_deleted",
        &format!("{} removed service {}.", admin.0.display_name, service_id),
        Some(&admin.0.id),
        None,
    )
    .await;
    Ok(HttpResponse::NoContent().finish())
}
