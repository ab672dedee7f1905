use chrono::{NaiveDateTime, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{
    auth::{new_id, AuthUser},
    calendar::{self, CalendarChange},
    db::{fetch_appointment, fetch_slot, log_activity, APPOINTMENT_SELECT},
    error::{ApiError, ApiResult},
    models::{fmt_date, fmt_time, AppointmentRow, AppointmentStatus},
    push::{self, PushMessage},
    slots,
    state::{AppState, ServerEvent},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingInput {
    pub slot_id: String,
    pub service_id: String,
    pub location: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl BookingInput {
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let location = self.location.trim().chars().count();
        if location == 0 {
            problems.push("Location is required".to_string());
        } else if location > 200 {
            problems.push("Location cannot exceed 200 characters".to_string());
        }
        if self
            .description
            .as_deref()
            .is_some_and(|description| description.trim().chars().count() > 500)
        {
            problems.push("Description cannot exceed 500 characters".to_string());
        }
        if self.slot_id.trim().is_empty() {
            problems.push("Please pick a time slot".to_string());
        }
        problems
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleInput {
    pub new_slot_id: String,
    pub service_id: String,
}

/// Side effects fired after a booking change has been committed.
pub struct Notice {
    pub kind: &'static str,
    pub title: &'static str,
    pub body: String,
    pub calendar: CalendarChange,
}

pub(crate) async fn announce(
    state: &AppState,
    row: AppointmentRow,
    actor: Option<&AuthUser>,
    notice: Notice,
) {
    let when = row
        .slot_start
        .as_ref()
        .map(fmt_time)
        .unwrap_or_else(|| fmt_date(&row.scheduled_at));
    let actor_name = actor
        .map(|user| user.display_name.clone())
        .unwrap_or_else(|| row.user_name.clone());
    log_activity(
        &state.db,
        notice.kind,
        &format!(
            "{}: {} for {} ({}), by {}.",
            notice.title, row.service_name, row.user_name, when, actor_name
        ),
        actor.map(|user| user.id.as_str()),
        Some(&row.id),
    )
    .await;

    push::notify_appointment(
        state,
        &row.id,
        &PushMessage {
            title: notice.title.to_string(),
            body: notice.body,
            url: "/account".to_string(),
        },
    )
    .await;

    calendar::reflect(state, &row, notice.calendar).await;

    let _ = state.events.send(ServerEvent::from_row(notice.kind, row));
}

fn not_found(appointment_id: &str) -> ApiError {
    ApiError::not_found(format!("Appointment with ID {appointment_id} not found"))
}

pub async fn find(pool: &SqlitePool, appointment_id: &str) -> ApiResult<AppointmentRow> {
    fetch_appointment(pool, appointment_id)
        .await?
        .ok_or_else(|| not_found(appointment_id))
}

/// Owners see their own appointments, admins see every appointment.
pub async fn get(pool: &SqlitePool, user: &AuthUser, appointment_id: &str) -> ApiResult<AppointmentRow> {
    let row = find(pool, appointment_id).await?;
    if row.user_id != user.id && !user.is_admin() {
        return Err(ApiError::forbidden("You can only view your own appointments"));
    }
    Ok(row)
}

pub async fn list_for_user(pool: &SqlitePool, user_id: &str) -> ApiResult<Vec<AppointmentRow>> {
    let query = format!("{APPOINTMENT_SELECT} WHERE a.user_id = ? ORDER BY a.scheduled_at, sl.start_time");
    Ok(sqlx::query_as::<_, AppointmentRow>(&query)
        .bind(user_id)
        .fetch_all(pool)
        .await?)
}

/// Every appointment, most recently created first.
pub async fn list_all(pool: &SqlitePool) -> ApiResult<Vec<AppointmentRow>> {
    let query = format!("{APPOINTMENT_SELECT} ORDER BY a.created_at DESC, a.id");
    Ok(sqlx::query_as::<_, AppointmentRow>(&query)
        .fetch_all(pool)
        .await?)
}

pub async fn book(
    state: &AppState,
    user: &AuthUser,
    input: BookingInput,
    now: NaiveDateTime,
) -> ApiResult<AppointmentRow> {
    let problems = input.problems();
    if !problems.is_empty() {
        return Err(ApiError::bad_request(problems.join("; ")));
    }

    let mut tx = state.db.begin().await?;
    let slot = fetch_slot(&mut *tx, &input.slot_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Availability slot with ID {} not found", input.slot_id)))?;
    if !slots::is_bookable(&slot, now) {
        return Err(ApiError::bad_request("Slot is not available for booking"));
    }
    if slot.service_id != input.service_id {
        return Err(ApiError::bad_request("Service mismatch with selected slot"));
    }

    let claimed = sqlx::query("UPDATE availability_slots SET is_booked = 1 WHERE id = ? AND is_booked = 0")
        .bind(&slot.id)
        .execute(&mut *tx)
        .await?;
    if claimed.rows_affected() == 0 {
        return Err(ApiError::conflict("Slot is not available for booking"));
    }

    let appointment_id = new_id();
    let stamp = Utc::now().to_rfc3339();
    let description = input
        .description
        .as_deref()
        .map(str::trim)
        .filter(|description| !description.is_empty());
    sqlx::query(
        r#"INSERT INTO appointments
           (id, slot_id, user_id, service_id, status, location, scheduled_at, description, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&appointment_id)
    .bind(&slot.id)
    .bind(&user.id)
    .bind(&slot.service_id)
    .bind(AppointmentStatus::Confirmed.as_str())
    .bind(input.location.trim())
    .bind(fmt_date(&slot.start_time.date()))
    .bind(description)
    .bind(&stamp)
    .bind(&stamp)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    let row = find(&state.db, &appointment_id).await?;
    announce(
        state,
        row.clone(),
        Some(user),
        Notice {
            kind: "appointment_booked",
            title: "Appointment confirmed",
            body: format!("{} on {}.", row.service_name, fmt_time(&slot.start_time)),
            calendar: CalendarChange::Upsert,
        },
    )
    .await;
    Ok(row)
}

pub async fn reschedule(
    state: &AppState,
    user: &AuthUser,
    appointment_id: &str,
    input: RescheduleInput,
    now: NaiveDateTime,
) -> ApiResult<AppointmentRow> {
    let row = find(&state.db, appointment_id).await?;
    if row.user_id != user.id {
        return Err(ApiError::forbidden("You can only reschedule your own appointments"));
    }
    match row.status() {
        Some(AppointmentStatus::Cancelled) => {
            return Err(ApiError::bad_request("Cannot reschedule a cancelled appointment"))
        }
        Some(AppointmentStatus::Completed) => {
            return Err(ApiError::bad_request("Cannot reschedule a completed appointment"))
        }
        _ => {}
    }

    let mut tx = state.db.begin().await?;
    let slot = fetch_slot(&mut *tx, &input.new_slot_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Availability slot with ID {} not found", input.new_slot_id)))?;
    if !slots::is_bookable(&slot, now) {
        return Err(ApiError::bad_request("Selected slot is not available"));
    }
    if slot.service_id != row.service_id || input.service_id != row.service_id {
        return Err(ApiError::bad_request("Service mismatch"));
    }

    if let Some(old_slot) = row.slot_id.as_deref() {
        sqlx::query("UPDATE availability_slots SET is_booked = 0 WHERE id = ?")
            .bind(old_slot)
            .execute(&mut *tx)
            .await?;
    }
    let claimed = sqlx::query("UPDATE availability_slots SET is_booked = 1 WHERE id = ? AND is_booked = 0")
        .bind(&slot.id)
        .execute(&mut *tx)
        .await?;
    if claimed.rows_affected() == 0 {
        return Err(ApiError::conflict("Selected slot is not available"));
    }
    sqlx::query("UPDATE appointments SET slot_id = ?, scheduled_at = ?, updated_at = ? WHERE id = ?")
        .bind(&slot.id)
        .bind(fmt_date(&slot.start_time.date()))
        .bind(Utc::now().to_rfc3339())
        .bind(appointment_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    let updated = find(&state.db, appointment_id).await?;
    announce(
        state,
        updated.clone(),
        Some(user),
        Notice {
            kind: "appointment_rescheduled",
            title: "Appointment rescheduled",
            body: format!("{} moved to {}.", updated.service_name, fmt_time(&slot.start_time)),
            calendar: CalendarChange::Upsert,
        },
    )
    .await;
    Ok(updated)
}

pub async fn cancel(state: &AppState, user: &AuthUser, appointment_id: &str) -> ApiResult<()> {
    let row = find(&state.db, appointment_id).await?;
    if row.user_id != user.id && !user.is_admin() {
        return Err(ApiError::forbidden("You can only cancel your own appointments"));
    }
    match row.status() {
        Some(AppointmentStatus::Cancelled) => {
            return Err(ApiError::bad_request("Appointment is already cancelled"))
        }
        Some(AppointmentStatus::Completed) => {
            return Err(ApiError::bad_request("Cannot cancel a completed appointment"))
        }
        _ => {}
    }

    let mut tx = state.db.begin().await?;
    sqlx::query("UPDATE appointments SET status = ?, updated_at = ? WHERE id = ?")
        .bind(AppointmentStatus::Cancelled.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(appointment_id)
        .execute(&mut *tx)
        .await?;
    if let Some(slot_id) = row.slot_id.as_deref() {
        sqlx::query("UPDATE availability_slots SET is_booked = 0 WHERE id = ?")
            .bind(slot_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    let updated = find(&state.db, appointment_id).await?;
    announce(
        state,
        updated,
        Some(user),
        Notice {
            kind: "appointment_cancelled",
            title: "Appointment cancelled",
            body: format!("{} on {} was cancelled.", row.service_name, fmt_date(&row.scheduled_at)),
            calendar: CalendarChange::Remove,
        },
    )
    .await;
    Ok(())
}

pub async fn update_status(
    state: &AppState,
    admin: &AuthUser,
    appointment_id: &str,
    raw_status: &str,
) -> ApiResult<AppointmentRow> {
    let status = AppointmentStatus::parse(raw_status).ok_or_else(|| {
        ApiError::bad_request(format!("Status '{}' not found", raw_status.trim().to_uppercase()))
    })?;
    let row = find(&state.db, appointment_id).await?;
    let current = row.status();
    // A cancelled appointment no longer holds its slot, which may have been
    // booked again since.
    if current == Some(AppointmentStatus::Cancelled) && status != AppointmentStatus::Cancelled {
        return Err(ApiError::bad_request("Cannot reopen a cancelled appointment"));
    }
    let releases_slot =
        status == AppointmentStatus::Cancelled && !current.is_some_and(|status| status.is_closed());

    let mut tx = state.db.begin().await?;
    sqlx::query("UPDATE appointments SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(appointment_id)
        .execute(&mut *tx)
        .await?;
    if releases_slot {
        if let Some(slot_id) = row.slot_id.as_deref() {
            sqlx::query("UPDATE availability_slots SET is_booked = 0 WHERE id = ?")
                .bind(slot_id)
                .execute(&mut *tx)
                .await?;
        }
    }
    tx.commit().await?;

    let updated = find(&state.db, appointment_id).await?;
    let calendar = if status == AppointmentStatus::Cancelled {
        CalendarChange::Remove
    } else {
        CalendarChange::Upsert
    };
    announce(
        state,
        updated.clone(),
        Some(admin),
        Notice {
            kind: "appointment_updated",
            title: "Appointment updated",
            body: format!("Status changed to {}.", status.as_str()),
            calendar,
        },
    )
    .await;
    Ok(updated)
}
