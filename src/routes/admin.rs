use actix_web::{http::header, middleware::from_fn, web, HttpResponse, Result};
use actix_web_httpauth::middleware::HttpAuthentication;
use askama::Template;
use serde::Deserialize;

use crate::{
    auth::{admin_validator, logout_guard, AuthUser},
    availability::{self, SlotInput},
    booking,
    catalog::{self, ServiceInput},
    db::{local_now, log_activity},
    error::ApiError,
    filters,
    models::{parse_time, ActivityRow, AppointmentRow, AppointmentStatus},
    routes::{form_messages, AppointmentView, ServiceOption, SlotView},
    slots,
    state::AppState,
    templates::render,
};

#[derive(Clone, Debug)]
struct StatCard {
    label: String,
    value: usize,
}

#[derive(Clone, Debug)]
struct StatusOption {
    value: &'static str,
    label: &'static str,
    selected: bool,
}

#[derive(Template)]
#[template(path = "admin_dashboard.html")]
struct AdminDashboardTemplate {
    admin_name: String,
    stats: Vec<StatCard>,
    status_options: Vec<StatusOption>,
    appointments: Vec<AppointmentView>,
    statuses: Vec<&'static str>,
    activities: Vec<ActivityRow>,
    errors: Vec<String>,
}

#[derive(Clone, Debug, Default)]
struct SlotFormView {
    service_id: String,
    start_time: String,
    end_time: String,
}

#[derive(Template)]
#[template(path = "admin_slots.html")]
struct AdminSlotsTemplate {
    slots: Vec<SlotView>,
    services: Vec<ServiceOption>,
    form: SlotFormView,
    errors: Vec<String>,
}

#[derive(Clone, Debug, Default)]
struct ServiceFormView {
    name: String,
    description: String,
    duration: String,
    price: String,
}

#[derive(Template)]
#[template(path = "admin_services.html")]
struct AdminServicesTemplate {
    services: Vec<ServiceOption>,
    form: ServiceFormView,
    errors: Vec<String>,
    success: String,
    has_success: bool,
}

#[derive(Deserialize)]
struct DashboardQuery {
    status: Option<String>,
}

#[derive(Deserialize)]
struct StatusForm {
    status: String,
}

#[derive(Deserialize)]
struct SlotForm {
    service_id: String,
    start_time: String,
    end_time: String,
}

#[derive(Deserialize)]
struct ServiceForm {
    name: String,
    description: Option<String>,
    duration: String,
    price: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin")
            .wrap(HttpAuthentication::basic(admin_validator))
            .wrap(from_fn(logout_guard))
            .service(web::resource("").route(web::get().to(index)))
            .service(web::resource("/").route(web::get().to(index)))
            .service(web::resource("/dashboard").route(web::get().to(dashboard)))
            .service(web::resource("/appointments/{id}/status").route(web::post().to(update_status)))
            .service(
                web::resource("/slots")
                    .route(web::get().to(list_slots))
                    .route(web::post().to(create_slot)),
            )
            .service(web::resource("/slots/{id}/release").route(web::post().to(release_slot)))
            .service(web::resource("/slots/{id}/delete").route(web::post().to(delete_slot)))
            .service(
                web::resource("/services")
                    .route(web::get().to(list_services))
                    .route(web::post().to(create_service)),
            )
            .service(web::resource("/services/{id}").route(web::post().to(update_service)))
            .service(web::resource("/services/{id}/delete").route(web::post().to(delete_service))),
    );
}

async fn index() -> HttpResponse {
    HttpResponse::Found()
        .append_header((header::LOCATION, "/admin/dashboard"))
        .finish()
}

fn redirect(location: &str) -> HttpResponse {
    HttpResponse::SeeOther()
        .append_header((header::LOCATION, location))
        .finish()
}

fn status_count(rows: &[AppointmentRow], status: AppointmentStatus) -> usize {
    rows.iter().filter(|row| row.status() == Some(status)).count()
}

fn status_filters(current: &str) -> Vec<StatusOption> {
    let current = current.trim();
    let all_selected = current.is_empty() || current.eq_ignore_ascii_case("all");
    let mut options = vec![StatusOption {
        value: "all",
        label: "All",
        selected: all_selected,
    }];
    options.extend(AppointmentStatus::ALL.into_iter().map(|status| StatusOption {
        value: status.as_str(),
        label: status.as_str(),
        selected: status.as_str().eq_ignore_ascii_case(current),
    }));
    options
}

async fn render_dashboard(
    state: &AppState,
    auth: &AuthUser,
    status_filter: &str,
    errors: Vec<String>,
) -> Result<HttpResponse> {
    let now = local_now();
    let rows = booking::list_all(&state.db).await?;
    let summary = slots::summarize(&availability::list_all(&state.db).await?, now);

    let stats = vec![
        StatCard {
            label: "Appointments".to_string(),
            value: rows.len(),
        },
        StatCard {
            label: "Confirmed".to_string(),
            value: status_count(&rows, AppointmentStatus::Confirmed),
        },
        StatCard {
            label: "Cancelled".to_string(),
            value: status_count(&rows, AppointmentStatus::Cancelled),
        },
        StatCard {
            label: "Completed".to_string(),
            value: status_count(&rows, AppointmentStatus::Completed),
        },
        StatCard {
            label: "Open slots".to_string(),
            value: summary.available,
        },
        StatCard {
            label: "Booked slots".to_string(),
            value: summary.booked,
        },
        StatCard {
            label: "Expired slots".to_string(),
            value: summary.expired,
        },
    ];

    let appointments = slots::filter_by_status(rows, status_filter)
        .into_iter()
        .map(AppointmentView::from)
        .collect();

    let activities = sqlx::query_as::<_, ActivityRow>(
        "SELECT message, created_at FROM activities ORDER BY created_at DESC LIMIT 10",
    )
    .fetch_all(&state.db)
    .await
    .unwrap_or_default();

    Ok(render(AdminDashboardTemplate {
        admin_name: auth.display_name.clone(),
        stats,
        status_options: status_filters(status_filter),
        appointments,
        statuses: AppointmentStatus::ALL.iter().map(|status| status.as_str()).collect(),
        activities,
        errors,
    }))
}

async fn dashboard(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    query: web::Query<DashboardQuery>,
) -> Result<HttpResponse> {
    let status_filter = query.status.clone().unwrap_or_default();
    render_dashboard(&state, &auth, &status_filter, Vec::new()).await
}

async fn update_status(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Form<StatusForm>,
) -> Result<HttpResponse> {
    match booking::update_status(&state, &auth, &path.into_inner(), &form.status).await {
        Ok(_) => Ok(redirect("/admin/dashboard")),
        Err(err) => {
            let errors = form_messages(err)?;
            render_dashboard(&state, &auth, "", errors).await
        }
    }
}

async fn service_options(state: &AppState, selected: &str) -> Result<Vec<ServiceOption>, ApiError> {
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

async fn render_slots(state: &AppState, form: SlotFormView, errors: Vec<String>) -> Result<HttpResponse> {
    let now = local_now();
    let mut rows = availability::list_all(&state.db).await?;
    slots::sort_newest_first(&mut rows);
    let services = service_options(state, &form.service_id).await?;
    Ok(render(AdminSlotsTemplate {
        slots: rows.into_iter().map(|row| SlotView::new(row, now)).collect(),
        services,
        form,
        errors,
    }))
}

async fn list_slots(state: web::Data<AppState>) -> Result<HttpResponse> {
    render_slots(&state, SlotFormView::default(), Vec::new()).await
}

async fn create_slot(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    form: web::Form<SlotForm>,
) -> Result<HttpResponse> {
    let form = form.into_inner();
    let mut errors = Vec::new();
    if form.service_id.trim().is_empty() {
        errors.push("Please choose a service".to_string());
    }
    let start = parse_time(&form.start_time);
    let end = parse_time(&form.end_time);
    if start.is_none() {
        errors.push("Start time is not a valid date and time".to_string());
    }
    if end.is_none() {
        errors.push("End time is not a valid date and time".to_string());
    }

    if let (true, Some(start_time), Some(end_time)) = (errors.is_empty(), start, end) {
        let input = SlotInput {
            service_id: form.service_id.trim().to_string(),
            start_time,
            end_time,
        };
        match availability::create(&state, &auth, input, local_now()).await {
            Ok(_) => return Ok(redirect("/admin/slots")),
            Err(err) => errors = form_messages(err)?,
        }
    }

    let view = SlotFormView {
        service_id: form.service_id,
        start_time: form.start_time,
        end_time: form.end_time,
    };
    render_slots(&state, view, errors).await
}

async fn release_slot(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    match availability::release(&state, &auth, &path.into_inner()).await {
        Ok(()) => Ok(redirect("/admin/slots")),
        Err(err) => {
            let errors = form_messages(err)?;
            render_slots(&state, SlotFormView::default(), errors).await
        }
    }
}

async fn delete_slot(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    match availability::delete(&state, &auth, &path.into_inner()).await {
        Ok(()) => Ok(redirect("/admin/slots")),
        Err(err) => {
            let errors = form_messages(err)?;
            render_slots(&state, SlotFormView::default(), errors).await
        }
    }
}

async fn render_services(
    state: &AppState,
    form: ServiceFormView,
    errors: Vec<String>,
    success: &str,
) -> Result<HttpResponse> {
    let services = service_options(state, "").await?;
    Ok(render(AdminServicesTemplate {
        services,
        form,
        errors,
        success: success.to_string(),
        has_success: !success.is_empty(),
    }))
}

async fn list_services(state: web::Data<AppState>) -> Result<HttpResponse> {
    render_services(&state, ServiceFormView::default(), Vec::new(), "").await
}

/// Form fields arrive as text; numbers that fail to parse are reported
/// alongside the catalog's own checks.
fn service_input(form: &ServiceForm) -> Result<ServiceInput, Vec<String>> {
    let mut errors = Vec::new();
    let min_duration = form.duration.trim().parse::<i64>().unwrap_or_else(|_| {
        errors.push("Duration must be a whole number of minutes".to_string());
        0
    });
    let price = form.price.trim().replace(',', ".").parse::<f64>().unwrap_or_else(|_| {
        errors.push("Price must be a number".to_string());
        0.0
    });
    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(ServiceInput {
        name: form.name.clone(),
        description: form.description.clone().unwrap_or_default(),
        min_duration,
        price,
    })
}

fn service_form_view(form: ServiceForm) -> ServiceFormView {
    ServiceFormView {
        name: form.name,
        description: form.description.unwrap_or_default(),
        duration: form.duration,
        price: form.price,
    }
}

async fn create_service(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    form: web::Form<ServiceForm>,
) -> Result<HttpResponse> {
    let form = form.into_inner();
    let input = match service_input(&form) {
        Ok(input) => input,
        Err(errors) => return render_services(&state, service_form_view(form), errors, "").await,
    };

    match catalog::create(&state.db, input).await {
        Ok(service) => {
            log_activity(
                &state.db,
                "service_created",
                &format!("{} added the service {}.", auth.display_name, service.name),
                Some(&auth.id),
                None,
            )
            .await;
            render_services(&state, ServiceFormView::default(), Vec::new(), "Service created.").await
        }
        Err(err) => {
            let errors = form_messages(err)?;
            render_services(&state, service_form_view(form), errors, "").await
        }
    }
}

async fn update_service(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
    form: web::Form<ServiceForm>,
) -> Result<HttpResponse> {
    let service_id = path.into_inner();
    let form = form.into_inner();
    let input = match service_input(&form) {
        Ok(input) => input,
        Err(errors) => return render_services(&state, ServiceFormView::default(), errors, "").await,
    };

    match catalog::update(&state.db, &service_id, input).await {
        Ok(service) => {
            log_activity(
                &state.db,
                "service_updated",
                &format!("{} updated the service {}.", auth.display_name, service.name),
                Some(&auth.id),
                None,
            )
            .await;
            render_services(&state, ServiceFormView::default(), Vec::new(), "Service updated.").await
        }
        Err(err) => {
            let errors = form_messages(err)?;
            render_services(&state, ServiceFormView::default(), errors, "").await
        }
    }
}

async fn delete_service(
    state: web::Data<AppState>,
    auth: web::ReqData<AuthUser>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let service_id = path.into_inner();
    match catalog::delete(&state.db, &service_id).await {
        Ok(()) => {
            log_activity(
                &state.db,
                "service_deleted",
                &format!("{} removed service {}.", auth.display_name, service_id),
                Some(&auth.id),
                None,
            )
            .await;
            Ok(redirect("/admin/services"))
        }
        Err(err) => {
            let errors = form_messages(err)?;
            render_services(&state, ServiceFormView::default(), errors, "").await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(duration: &str, price: &str) -> ServiceForm {
        ServiceForm {
            name: "Bridal makeup".to_string(),
            description: None,
            duration: duration.to_string(),
            price: price.to_string(),
        }
    }

    #[test]
    fn service_form_accepts_comma_prices() {
        let input = service_input(&form("90", "249,50")).expect("valid form");
        assert_eq!(input.min_duration, 90);
        assert_eq!(input.price, 249.5);
        assert_eq!(input.description, "");
    }

    #[test]
    fn service_form_reports_unparseable_numbers() {
        let errors = service_input(&form("ninety", "cheap")).expect_err("invalid form");
        assert_eq!(
            errors,
            vec![
                "Duration must be a whole number of minutes".to_string(),
                "Price must be a number".to_string(),
            ]
        );
    }

    #[test]
    fn status_filter_marks_the_current_choice() {
        let options = status_filters("cancelled");
        assert_eq!(options.len(), 5);
        assert!(!options[0].selected);
        let selected: Vec<_> = options.iter().filter(|option| option.selected).map(|option| option.value).collect();
        assert_eq!(selected, vec!["CANCELLED"]);

        assert!(status_filters("")[0].selected);
        assert!(status_filters("ALL")[0].selected);
    }
}
