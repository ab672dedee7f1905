use actix_web::http::header::Header;
use actix_web::{http::header, web, HttpRequest, HttpResponse, Result};
use actix_web_httpauth::headers::authorization::{Authorization, Basic};
use askama::Template;
use chrono::Duration;
use serde::Deserialize;
use serde_json::json;

use crate::{
    accounts::{self, SignupRequest},
    auth::{authenticate_credentials, clear_logout_cookie, logout_cookie, AUTH_REALM},
    availability, catalog,
    db::{fetch_appointment, local_now},
    error::ApiError,
    filters,
    push::{self, PushMessage},
    routes::{form_messages, ServiceOption, SlotView},
    state::AppState,
    templates::render,
};

/// How far ahead the service page lists open slots.
const BOOKING_HORIZON_DAYS: i64 = 30;

#[derive(Template)]
#[template(path = "catalog.html")]
struct CatalogTemplate {
    services: Vec<ServiceOption>,
}

#[derive(Template)]
#[template(path = "service_detail.html")]
struct ServiceDetailTemplate {
    service: ServiceOption,
    slots: Vec<SlotView>,
}

#[derive(Clone, Debug, Default)]
struct SignupView {
    name: String,
    surname: String,
    email: String,
    phone_num: String,
}

#[derive(Template)]
#[template(path = "signup.html")]
struct SignupTemplate {
    form: SignupView,
    errors: Vec<String>,
}

#[derive(Template)]
#[template(path = "verify.html")]
struct VerifyTemplate {
    email: String,
    errors: Vec<String>,
    notice: String,
    verified: bool,
}

#[derive(Deserialize)]
struct SignupForm {
    name: String,
    surname: String,
    email: String,
    phone_num: Option<String>,
    password: String,
}

#[derive(Deserialize)]
struct VerifyQuery {
    email: Option<String>,
}

#[derive(Deserialize)]
struct VerifyForm {
    email: String,
    code: String,
}

#[derive(Deserialize)]
struct LoginQuery {
    next: Option<String>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(home)))
        .service(web::resource("/services/{id}").route(web::get().to(service_detail)))
        .service(
            web::resource("/signup")
                .route(web::get().to(show_signup))
                .route(web::post().to(signup)),
        )
        .service(
            web::resource("/verify")
                .route(web::get().to(show_verify))
                .route(web::post().to(verify)),
        )
        .service(web::resource("/appointments/{id}/subscribe").route(web::post().to(subscribe_notifications)))
        .service(web::resource("/login").route(web::get().to(login)))
        .service(web::resource("/logout").route(web::get().to(logout)))
        .service(web::resource("/health").route(web::get().to(health)));
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

async fn logout(req: HttpRequest) -> HttpResponse {
    HttpResponse::SeeOther()
        .append_header((header::LOCATION, "/"))
        .cookie(logout_cookie(&req))
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .finish()
}

async fn login(
    state: web::Data<AppState>,
    req: HttpRequest,
    query: web::Query<LoginQuery>,
) -> HttpResponse {
    let auth = match Authorization::<Basic>::parse(&req) {
        Ok(auth) => auth,
        Err(_) => return auth_challenge(),
    };
    let credentials = auth.into_scheme();
    let email = credentials.user_id();
    let password = credentials.password().unwrap_or_default();

    let user = match authenticate_credentials(&state, email, password).await {
        Some(user) => user,
        None => return auth_challenge(),
    };

    let requested = query.next.as_deref().unwrap_or("");
    let requested = if requested.starts_with('/') && !requested.starts_with("//") {
        requested
    } else {
        ""
    };

    let redirect = if user.is_admin() {
        if requested.starts_with("/admin") {
            requested
        } else {
            "/admin/dashboard"
        }
    } else if requested.starts_with("/account") {
        requested
    } else {
        "/account"
    };

    HttpResponse::SeeOther()
        .append_header((header::LOCATION, redirect))
        .cookie(clear_logout_cookie(&req))
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .finish()
}

fn auth_challenge() -> HttpResponse {
    HttpResponse::Unauthorized()
        .insert_header((header::WWW_AUTHENTICATE, format!("Basic realm=\"{}\"", AUTH_REALM)))
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .finish()
}

async fn home(state: web::Data<AppState>) -> Result<HttpResponse> {
    let services = catalog::list(&state.db)
        .await
        .unwrap_or_default()
        .into_iter()
        .map(ServiceOption::from)
        .collect();
    Ok(render(CatalogTemplate { services }))
}

async fn service_detail(state: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse> {
    let service_id = path.into_inner();
    let service = match catalog::find(&state.db, &service_id).await {
        Ok(Some(service)) => service,
        Ok(None) => return Ok(HttpResponse::NotFound().body("Service not found")),
        Err(err) => return Err(actix_web::error::ErrorInternalServerError(err)),
    };

    let now = local_now();
    let slots = availability::list_available(
        &state.db,
        Some(&service_id),
        now,
        now + Duration::days(BOOKING_HORIZON_DAYS),
        now,
    )
    .await
    .unwrap_or_default()
    .into_iter()
    .map(|row| SlotView::new(row, now))
    .collect();

    Ok(render(ServiceDetailTemplate {
        service: ServiceOption::from(service),
        slots,
    }))
}

async fn show_signup() -> HttpResponse {
    render(SignupTemplate {
        form: SignupView::default(),
        errors: Vec::new(),
    })
}

async fn signup(state: web::Data<AppState>, form: web::Form<SignupForm>) -> Result<HttpResponse> {
    let form = form.into_inner();
    let request = SignupRequest {
        name: form.name.clone(),
        surname: form.surname.clone(),
        email: form.email.clone(),
        phone_num: form.phone_num.clone().unwrap_or_default(),
        password: form.password,
    };

    match accounts::signup(&state.db, request).await {
        Ok(created) => Ok(render(VerifyTemplate {
            email: created.email,
            errors: Vec::new(),
            notice: "We issued a six-digit verification code for your account.".to_string(),
            verified: false,
        })),
        Err(err) => {
            let errors = form_messages(err)?;
            Ok(render(SignupTemplate {
                form: SignupView {
                    name: form.name,
                    surname: form.surname,
                    email: form.email,
                    phone_num: form.phone_num.unwrap_or_default(),
                },
                errors,
            }))
        }
    }
}

async fn show_verify(query: web::Query<VerifyQuery>) -> HttpResponse {
    render(VerifyTemplate {
        email: query.email.clone().unwrap_or_default(),
        errors: Vec::new(),
        notice: String::new(),
        verified: false,
    })
}

async fn verify(state: web::Data<AppState>, form: web::Form<VerifyForm>) -> Result<HttpResponse> {
    let form = form.into_inner();
    let result = accounts::verify(&state.db, &form.email, &form.code).await;
    let (errors, verified) = match result {
        Ok(()) => (Vec::new(), true),
        Err(err) => (form_messages(err)?, false),
    };
    Ok(render(VerifyTemplate {
        email: form.email,
        errors,
        notice: String::new(),
        verified,
    }))
}

async fn subscribe_notifications(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse> {
    let appointment_id = path.into_inner();
    match fetch_appointment(&state.db, &appointment_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return Ok(HttpResponse::NotFound().finish()),
        Err(err) => return Err(ApiError::from(err).into()),
    }

    let raw = String::from_utf8(body.to_vec()).unwrap_or_default();
    if raw.trim().is_empty() {
        return Ok(HttpResponse::BadRequest().finish());
    }

    let stored = push::store_subscription(&state.db, &appointment_id, &raw)
        .await
        .map_err(ApiError::from)?;
    if !stored {
        return Ok(HttpResponse::BadRequest().finish());
    }

    push::notify_appointment(
        &state,
        &appointment_id,
        &PushMessage {
            title: "Notifications enabled".to_string(),
            body: "You'll receive updates about your appointment.".to_string(),
            url: "/account".to_string(),
        },
    )
    .await;

    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}
