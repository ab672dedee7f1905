use actix_web::{http::header, middleware::from_fn, web, HttpResponse, Result};
use actix_web_httpauth::middleware::HttpAuthentication;
use askama::Template;
use serde::Deserialize;

use crate::{
    accounts::{self, ProfileUpdate},
    auth::{basic_validator, logout_guard, AuthUser},
    availability,
    booking::{self, BookingInput, RescheduleInput},
    catalog,
    db::local_now,
    error::ApiError,
    filters,
    models::{AppointmentRow, UserProfile},
    routes::{form_messages, AppointmentView, ServiceOption, SlotView},
    slots,
    state::AppState,
    templates::render,
};

#[derive(Template)]
#[template(path = "account.html")]
struct AccountTemplate {
    user_name: String,
    upcoming: Vec<AppointmentView>,
    past: Vec<AppointmentView>,
    errors: Vec<String>,
    vapid_public_key: String,
}

#[derive(Template)]
#[template(path = "book.html")]
struct BookTemplate {
    services: Vec<ServiceOption>,
    service_id: String,
    has_service: bool,
    slots: Vec<SlotView>,
    location: String,
    description: String,
    errors: Vec<String>,
}

#[derive(Template)]
#[template(path = "reschedule.html")]
struct RescheduleTemplate {
    appointment: AppointmentView,
    slots: Vec<SlotView>,
    errors: Vec<String>,
}

#[derive(Template)]
#[template(path = "profile.html")]
struct ProfileTemplate {
    profile: UserProfile,
    errors: Vec<String>,
    saved: bool,
}

#[derive(Deserialize)]
struct BookQuery {
    service: Option<String>,
    slot: Option<String>,
}

#[derive(Deserialize)]
struct BookForm {
    service_id: String,
    slot_id: Option<String>,
    location: String,
    description: Option<String>,
}

#[derive(Deserialize)]
struct RescheduleForm {
    slot_id: Option<String>,
}

#[derive(Deserialize)]
struct ProfileForm {
    name: String,
    surname: String,
    email: String,
    phone_num: Option<String>,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/account")
            .wrap(HttpAuthentication::basic(basic_validator))
            .wrap(from_fn(logout_guard))
            .service(web::resource("").route(web::get().to(dashboard)))
            .service(web::resource("/").route(web::get().to(dashboard)))
            .service(
                web::resource("/book")
                    .route(web::get().to(show_book))
                    .route(web::post().to(book)),
            )
            .service(
                web::resource("/appointments/{id}/reschedule")
                    .route(web::get().to(show_reschedule))
                    .route(web::post().to(reschedule)),
            )
            .service(web::resource("/appointments/{id}/cancel").route(web::post().to(cancel)))
            .service(
                web::resource("/profile")
                    .route(web::get().to(show_profile))
                    .route(web::post().to(update_profile)),
            ),
    );
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::SeeOther()
        .append_header((header::LOCATION, location))
        .finish()
}

async fn render_dashboard(
    state: &AppState,
    auth: &AuthUser,
    errors: Vec<String>,
) -> Result<HttpResponse> {
    let rows = booking::list_for_user(&state.db, &auth.id).await?;
    let (upcoming, past) = slots::split_upcoming_past(rows);
    Ok(render(AccountTemplate {
        user_name: auth.display_name.clone(),
        upcoming: upcoming.into_iter().map(AppointmentView::from).collect(),
        past: past.into_iter().map(AppointmentView::from).collect(),
        errors,
        vapid_public_key: if state.push.enabled() {
            state.push.public_key.clone()
        } else {
            String::new()
        },
    }))
}

async fn dashboard(state: web::Data<AppState>, auth: web::ReqData<AuthUser>) -> Result<HttpResponse> {
    render_dashboard(&state, &auth, Vec::new()).await
}

/// Open slots for the chosen service, soonest first, with `selected` marking the pick.
async fn slot_choices(
    state: &AppState,
    service_id: &str,
    current_slot_id: Option<&str>,
    selected: Option<&str>,
) -> Result<Vec<SlotView>, ApiError> {
    if service_id.is_empty() {
        return Ok(Vec::new());
    }
    let now = local_now();
    let rows = availability::list_by_service(&state.db, service_id).await?;
    Ok(slots::reschedule_candidates(rows, service_id, current_slot_id, now)
        .into_iter()
        .map(|row| {
            let mut view = SlotView::new(row, now);
            view.selected = selected == Some(view.id.as_str());
            view
        })
        .collect())
}

async fn service_choices(state: &AppState, selected: &str) -> Result<Vec<ServiceOption>, ApiError> {
    Ok(catalog::list(&state.db)
        .await?
        .into_iter()
        .map(|row| {
            let mut option = ServiceOption::from(row);
            option.selected = option.id == selected;
            option
        })
        .collect())
}

async fn show_book(state: web::Data<AppState>, query: web::Query<BookQuery>) -> Result<HttpResponse> {
    let query = query.into_inner();
    let service_id = query.service.unwrap_or_default().trim().to_string();
    let services = service_choices(&state, &service_id).await?;
    let has_service = services.iter().any(|service| service.selected);
    let slots = if has_service {
        slot_choices(&state, &service_id, None, query.slot.as_deref()).await?
    } else {
        Vec::new()
    };

    Ok(render(BookTemplate {
        services,
        service_id,
        has_service,
        slots,
        location: String::new(),
        description: String::new(),
        errors: Vec::new(),
    }))
}

async fn book(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    form: web::Form<BookForm>,
) -> Result<HttpResponse> {
    let form = form.into_inner();
    let input = BookingInput {
        slot_id: form.slot_id.clone().unwrap_or_default(),
        service_id: form.service_id.clone(),
        location: form.location.clone(),
        description: form
            .description
            .clone()
            .filter(|description| !description.trim().is_empty()),
    };

    let problems = input.problems();
    let errors = if problems.is_empty() {
        match booking::book(&state, &auth, input, local_now()).await {
            Ok(_) => return Ok(redirect("/account")),
            Err(err) => form_messages(err)?,
        }
    } else {
        problems
    };

    let services = service_choices(&state, &form.service_id).await?;
    let has_service = services.iter().any(|service| service.selected);
    let slots = slot_choices(&state, &form.service_id, None, form.slot_id.as_deref()).await?;
    Ok(render(BookTemplate {
        services,
        service_id: form.service_id,
        has_service,
        slots,
        location: form.location,
        description: form.description.unwrap_or_default(),
        errors,
    }))
}

async fn reschedule_page(
    state: &AppState,
    row: AppointmentRow,
    selected: Option<&str>,
    errors: Vec<String>,
) -> Result<HttpResponse> {
    let slots = slot_choices(state, &row.service_id, row.slot_id.as_deref(), selected).await?;
    Ok(render(RescheduleTemplate {
        appointment: AppointmentView::from(row),
        slots,
        errors,
    }))
}

async fn owned_appointment(state: &AppState, auth: &AuthUser, appointment_id: &str) -> Result<Option<AppointmentRow>> {
    match booking::find(&state.db, appointment_id).await {
        Ok(row) if row.user_id == auth.id => Ok(Some(row)),
        Ok(_) | Err(ApiError::NotFound(_)) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

async fn show_reschedule(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    match owned_appointment(&state, &auth, &path.into_inner()).await? {
        Some(row) => reschedule_page(&state, row, None, Vec::new()).await,
        None => Ok(HttpResponse::NotFound().body("Appointment not found")),
    }
}

async fn reschedule(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Form<RescheduleForm>,
) -> Result<HttpResponse> {
    let appointment_id = path.into_inner();
    let row = match owned_appointment(&state, &auth, &appointment_id).await? {
        Some(row) => row,
        None => return Ok(HttpResponse::NotFound().body("Appointment not found")),
    };

    let new_slot_id = form.slot_id.clone().unwrap_or_default();
    if new_slot_id.trim().is_empty() {
        return reschedule_page(&state, row, None, vec!["Please pick a time slot".to_string()]).await;
    }

    let input = RescheduleInput {
        new_slot_id: new_slot_id.clone(),
        service_id: row.service_id.clone(),
    };
    match booking::reschedule(&state, &auth, &appointment_id, input, local_now()).await {
        Ok(_) => Ok(redirect("/account")),
        Err(err) => {
            let errors = form_messages(err)?;
            reschedule_page(&state, row, Some(&new_slot_id), errors).await
        }
    }
}

async fn cancel(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    match booking::cancel(&state, &auth, &path.into_inner()).await {
        Ok(()) => Ok(redirect("/account")),
        Err(err) => {
            let errors = form_messages(err)?;
            render_dashboard(&state, &auth, errors).await
        }
    }
}

async fn show_profile(state: web::Data<AppState>, auth: web::ReqData<AuthUser>) -> Result<HttpResponse> {
    let profile = accounts::profile(&state.db, &auth.id).await?;
    Ok(render(ProfileTemplate {
        profile,
        errors: Vec::new(),
        saved: false,
    }))
}

async fn update_profile(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    form: web::Form<ProfileForm>,
) -> Result<HttpResponse> {
    let form = form.into_inner();
    let update = ProfileUpdate {
        name: form.name.clone(),
        surname: form.surname.clone(),
        email: form.email.clone(),
        phone_num: form.phone_num.clone().unwrap_or_default(),
    };

    match accounts::update_profile(&state.db, &auth.id, update).await {
        Ok(profile) => Ok(render(ProfileTemplate {
            profile,
            errors: Vec::new(),
            saved: true,
        })),
        Err(err) => {
            let errors = form_messages(err)?;
            let mut profile = accounts::profile(&state.db, &auth.id).await?;
            profile.name = form.name;
            profile.surname = form.surname;
            profile.email = form.email;
            profile.phone_num = form.phone_num.unwrap_or_default();
            Ok(render(ProfileTemplate {
                profile,
                errors,
                saved: false,
            }))
        }
    }
}
