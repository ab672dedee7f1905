use actix_files::NamedFile;
use actix_web::{http::header, middleware::from_fn, web, HttpResponse, Result};
use actix_web_httpauth::middleware::HttpAuthentication;
use serde::Serialize;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::{
    auth::{admin_validator, logout_guard},
    state::{AppState, ServerEvent},
};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/events")
            .wrap(HttpAuthentication::basic(admin_validator))
            .wrap(from_fn(logout_guard))
            .route(web::get().to(stream_events)),
    )
    .service(
        web::resource("/appointments/{id}/events").route(web::get().to(stream_appointment_events)),
    )
    .service(web::resource("/sw.js").route(web::get().to(service_worker)));
}

async fn service_worker() -> Result<NamedFile> {
    Ok(NamedFile::open("./static/sw.js")?)
}

fn sse_frame<T: Serialize>(event: &T) -> web::Bytes {
    let payload = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    web::Bytes::from(format!("event: update\ndata: {}\n\n", payload))
}

fn sse_response<S>(stream: S) -> HttpResponse
where
    S: Stream<Item = Result<web::Bytes, actix_web::Error>> + 'static,
{
    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(stream)
}

/// Every change, for the admin dashboard.
async fn stream_events(state: web::Data<AppState>) -> HttpResponse {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(event) => Some(Ok::<web::Bytes, actix_web::Error>(sse_frame(&event))),
        Err(_) => None,
    });
    sse_response(stream)
}

/// What a customer may see about their own appointment. Names and
/// locations stay off this unauthenticated stream.
#[derive(Debug, Serialize, PartialEq)]
struct AppointmentUpdate {
    appointment_id: Option<String>,
    status: Option<String>,
    service: Option<String>,
    scheduled_at: Option<String>,
    start_time: Option<String>,
}

fn public_update(event: ServerEvent, appointment_id: &str) -> Option<AppointmentUpdate> {
    if event.appointment_id.as_deref() != Some(appointment_id) {
        return None;
    }
    Some(AppointmentUpdate {
        appointment_id: event.appointment_id,
        status: event.status,
        service: event.service,
        scheduled_at: event.scheduled_at,
        start_time: event.start_time,
    })
}

async fn stream_appointment_events(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    let appointment_id = path.into_inner();
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let event = result.ok()?;
        let update = public_update(event, &appointment_id)?;
        Some(Ok::<web::Bytes, actix_web::Error>(sse_frame(&update)))
    });
    sse_response(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(appointment_id: &str) -> ServerEvent {
        ServerEvent {
            kind: "appointment_booked".to_string(),
            appointment_id: Some(appointment_id.to_string()),
            slot_id: Some("slot-1".to_string()),
            status: Some("CONFIRMED".to_string()),
            user_name: Some("Ada Lovelace".to_string()),
            service: Some("Evening makeup".to_string()),
            location: Some("12 Baker Street".to_string()),
            scheduled_at: Some("2030-06-03".to_string()),
            start_time: Some("2030-06-03T10:00:00".to_string()),
        }
    }

    #[test]
    fn public_updates_only_match_their_appointment() {
        assert_eq!(public_update(event("a-2"), "a-1"), None);
        assert_eq!(public_update(ServerEvent::slot_changed("slot_created", "slot-1"), "a-1"), None);

        let update = public_update(event("a-1"), "a-1").expect("matching event");
        assert_eq!(update.status.as_deref(), Some("CONFIRMED"));
        assert_eq!(update.start_time.as_deref(), Some("2030-06-03T10:00:00"));
    }

    #[test]
    fn frames_follow_the_event_stream_format() {
        let frame = sse_frame(&public_update(event("a-1"), "a-1"));
        let text = String::from_utf8(frame.to_vec()).expect("utf8");
        assert!(text.starts_with("event: update\ndata: {"));
        assert!(text.ends_with("}\n\n"));
        assert!(!text.contains("Baker Street"));
    }
}
