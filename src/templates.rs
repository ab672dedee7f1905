use actix_web::{http::header, HttpResponse};
use askama::Template;

/// Renders a console page. Pages carry per-user data, so they are never cached.
pub fn render<T: Template>(template: T) -> HttpResponse {
    match template.render() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/html; charset=utf-8")
            .insert_header((header::CACHE_CONTROL, "no-store"))
            .body(body),
        Err(err) => {
            log::error!("Failed to render {}: {err}", std::any::type_name::<T>());
            HttpResponse::InternalServerError().finish()
        }
    }
}
