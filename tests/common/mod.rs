#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use actix_web::{
    body::MessageBody,
    dev::{Service, ServiceResponse},
    test,
};
use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime};
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;

use salonbook::{
    build_state,
    calendar::{CalendarClient, CalendarError, CalendarEvent, RefreshedToken},
    config::Config,
    db,
    identity::HttpIdentityProvider,
    models::fmt_time,
    state::AppState,
};

pub const ADMIN_EMAIL: &str = "admin@salonbook.local";
pub const ADMIN_PASSWORD: &str = "admin-password";

/// Calendar double that remembers every call.
#[derive(Default)]
pub struct RecordingCalendar {
    pub calls: Mutex<Vec<String>>,
}

impl RecordingCalendar {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait]
impl CalendarClient for RecordingCalendar {
    async fn create_event(&self, _access_token: &str, event: &CalendarEvent) -> Result<String, CalendarError> {
        let id = format!("evt-{}", self.calls().len() + 1);
        self.record(format!("create {} {}", event.summary, id));
        Ok(id)
    }

    async fn update_event(
        &self,
        _access_token: &str,
        event_id: &str,
        event: &CalendarEvent,
    ) -> Result<(), CalendarError> {
        self.record(format!("update {} {}", event.summary, event_id));
        Ok(())
    }

    async fn delete_event(&self, _access_token: &str, event_id: &str) -> Result<(), CalendarError> {
        self.record(format!("delete {event_id}"));
        Ok(())
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<RefreshedToken, CalendarError> {
        self.record(format!("refresh {refresh_token}"));
        Ok(RefreshedToken {
            access_token: format!("fresh-{refresh_token}"),
            expires_in: Some(3600),
            refresh_token: None,
        })
    }
}

pub struct TestContext {
    pub state: AppState,
    pub calendar: Arc<RecordingCalendar>,
}

pub async fn context() -> TestContext {
    context_with_identity("http://127.0.0.1:9").await
}

/// Fresh in-memory database with the admin seeded. Identity lookups go to
/// `identity_base`, normally a wiremock server.
pub async fn context_with_identity(identity_base: &str) -> TestContext {
    let config = Config::for_tests();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect(&config.database_url)
        .await
        .expect("in-memory database");
    db::run_migrations(&pool).await.expect("migrations");
    db::seed_defaults(&pool, &config).await.expect("seed");

    let calendar = Arc::new(RecordingCalendar::default());
    let identity = Arc::new(HttpIdentityProvider::new(
        format!("{identity_base}/userinfo"),
        identity_base.to_string(),
    ));
    let state = build_state(pool, &config, identity, calendar.clone());
    TestContext { state, calendar }
}

/// Builds the full application around `state`.
macro_rules! init_app {
    ($state:expr) => {
        actix_web::test::init_service(
            actix_web::App::new()
                .app_data(actix_web::web::Data::new($state.clone()))
                .configure(salonbook::configure_app),
        )
        .await
    };
}

pub fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {token}"))
}

/// Slot time `days` from now at `hour`:00, always in the future.
pub fn future(days: i64, hour: u32) -> NaiveDateTime {
    let day = db::local_now().date() + Duration::days(days);
    day.and_hms_opt(hour, 0, 0).expect("valid hour")
}

pub fn slot_body(service_id: &str, start: NaiveDateTime, minutes: i64) -> Value {
    json!({
        "serviceId": service_id,
        "startTime": fmt_time(&start),
        "endTime": fmt_time(&(start + Duration::minutes(minutes))),
    })
}

pub async fn call_json<S, B>(app: &S, req: test::TestRequest) -> (u16, Value)
where
    S: Service<actix_http::Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let res = test::call_service(app, req.to_request()).await;
    let status = res.status().as_u16();
    let bytes = test::read_body(res).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

pub async fn login<S, B>(app: &S, email: &str, password: &str) -> String
where
    S: Service<actix_http::Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let (status, body) = call_json(
        app,
        test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "email": email, "password": password })),
    )
    .await;
    assert_eq!(status, 200, "login failed for {email}: {body}");
    body["token"].as_str().expect("token").to_string()
}

pub async fn admin_token<S, B>(app: &S) -> String
where
    S: Service<actix_http::Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    login(app, ADMIN_EMAIL, ADMIN_PASSWORD).await
}

/// Signs a customer up, verifies the account and returns a bearer token.
pub async fn customer_token<S, B>(app: &S, email: &str) -> String
where
    S: Service<actix_http::Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let (status, created) = call_json(
        app,
        test::TestRequest::post().uri("/api/auth/signup").set_json(json!({
            "name": "Ada",
            "surname": "Lovelace",
            "email": email,
            "phoneNum": "+48123456789",
            "password": "analytical-engine",
        })),
    )
    .await;
    assert_eq!(status, 200, "signup failed: {created}");

    let (status, _) = call_json(
        app,
        test::TestRequest::post().uri("/api/auth/verify").set_json(json!({
            "email": email,
            "verificationCode": created["code"],
        })),
    )
    .await;
    assert_eq!(status, 200);

    login(app, email, "analytical-engine").await
}

pub async fn create_service<S, B>(app: &S, admin: &str, name: &str) -> String
where
    S: Service<actix_http::Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let (status, body) = call_json(
        app,
        test::TestRequest::post()
            .uri("/api/services")
            .insert_header(bearer(admin))
            .set_json(json!({
                "name": name,
                "description": "On-location makeup",
                "minDuration": 60,
                "price": 180.0,
            })),
    )
    .await;
    assert_eq!(status, 201, "service create failed: {body}");
    body["serviceId"].as_str().expect("service id").to_string()
}

pub async fn create_slot<S, B>(app: &S, admin: &str, service_id: &str, start: NaiveDateTime) -> String
where
    S: Service<actix_http::Request, Response = ServiceResponse<B>, Error = actix_web::Error>,
    B: MessageBody,
{
    let (status, body) = call_json(
        app,
        test::TestRequest::post()
            .uri("/api/availability")
            .insert_header(bearer(admin))
            .set_json(slot_body(service_id, start, 60)),
    )
    .await;
    assert_eq!(status, 201, "slot create failed: {body}");
    body["slotId"].as_str().expect("slot id").to_string()
}
