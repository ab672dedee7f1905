use chrono::{NaiveDateTime, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{
    auth::{new_id, AuthUser},
    booking::{self, Notice},
    calendar::CalendarChange,
    catalog,
    db::{fetch_appointment, fetch_slot, log_activity, SLOT_SELECT},
    error::{ApiError, ApiResult},
    models::{fmt_time, AppointmentStatus, SlotRow},
    slots,
    state::{AppState, ServerEvent},
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotInput {
    pub service_id: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableQuery {
    pub service_id: Option<String>,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
}

fn not_found(slot_id: &str) -> ApiError {
    ApiError::not_found(format!("Availability slot with ID {slot_id} not found"))
}

pub async fn get(pool: &SqlitePool, slot_id: &str) -> ApiResult<SlotRow> {
    fetch_slot(pool, slot_id)
        .await?
        .ok_or_else(|| not_found(slot_id))
}

async fn owned_by(pool: &SqlitePool, owner_id: &str) -> Result<Vec<SlotRow>, sqlx::Error> {
    let query = format!("{SLOT_SELECT} WHERE sl.owner_id = ?");
    sqlx::query_as::<_, SlotRow>(&query)
        .bind(owner_id)
        .fetch_all(pool)
        .await
}

/// Window, service and overlap checks shared by create and update.
async fn check_input(
    pool: &SqlitePool,
    owner_id: &str,
    input: &SlotInput,
    exclude_id: Option<&str>,
    now: NaiveDateTime,
) -> ApiResult<()> {
    slots::validate_window(input.start_time, input.end_time, now).map_err(ApiError::bad_request)?;
    catalog::get(pool, &input.service_id).await?;

    let existing = owned_by(pool, owner_id).await?;
    if slots::find_overlap(input.start_time, input.end_time, &existing, exclude_id).is_some() {
        return Err(ApiError::conflict("Time slot overlaps with existing availability"));
    }
    Ok(())
}

pub async fn create(
    state: &AppState,
    admin: &AuthUser,
    input: SlotInput,
    now: NaiveDateTime,
) -> ApiResult<SlotRow> {
    check_input(&state.db, &admin.id, &input, None, now).await?;

    let slot_id = new_id();
    sqlx::query(
        r#"INSERT INTO availability_slots (id, owner_id, service_id, start_time, end_time, is_booked, created_at)
           VALUES (?, ?, ?, ?, ?, 0, ?)"#,
    )
    .bind(&slot_id)
    .bind(&admin.id)
    .bind(&input.service_id)
    .bind(fmt_time(&input.start_time))
    .bind(fmt_time(&input.end_time))
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db)
    .await?;

    let slot = get(&state.db, &slot_id).await?;
    log_activity(
        &state.db,
        "slot_created",
        &format!(
            "{} opened a {} slot at {}.",
            admin.display_name,
            slot.service_name,
            fmt_time(&slot.start_time)
        ),
        Some(&admin.id),
        None,
    )
    .await;
    let _ = state.events.send(ServerEvent::slot_changed("slot_created", &slot.id));
    Ok(slot)
}

/// Every slot, newest first.
pub async fn list_all(pool: &SqlitePool) -> ApiResult<Vec<SlotRow>> {
    let mut rows = sqlx::query_as::<_, SlotRow>(SLOT_SELECT)
        .fetch_all(pool)
        .await?;
    slots::sort_newest_first(&mut rows);
    Ok(rows)
}

/// Unbooked future slots starting inside `[from, to]`, soonest first.
pub async fn list_available(
    pool: &SqlitePool,
    service_id: Option<&str>,
    from: NaiveDateTime,
    to: NaiveDateTime,
    now: NaiveDateTime,
) -> ApiResult<Vec<SlotRow>> {
    let service_id = service_id.map(str::trim).filter(|id| !id.is_empty());
    if let Some(service_id) = service_id {
        catalog::get(pool, service_id).await?;
    }

    let query = format!("{SLOT_SELECT} WHERE sl.is_booked = 0 AND sl.start_time >= ? AND sl.start_time <= ?");
    let rows = sqlx::query_as::<_, SlotRow>(&query)
        .bind(fmt_time(&from))
        .bind(fmt_time(&to))
        .fetch_all(pool)
        .await?;
    let rows = slots::in_window(rows, from, to);

    Ok(match service_id {
        Some(service_id) => slots::bookable_for_service(rows, service_id, now),
        None => {
            let mut rows: Vec<SlotRow> = rows
                .into_iter()
                .filter(|slot| slots::is_bookable(slot, now))
                .collect();
            rows.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
            rows
        }
    })
}

pub async fn list_by_service(pool: &SqlitePool, service_id: &str) -> ApiResult<Vec<SlotRow>> {
    catalog::get(pool, service_id).await?;
    let query = format!("{SLOT_SELECT} WHERE sl.service_id = ? ORDER BY sl.start_time, sl.id");
    Ok(sqlx::query_as::<_, SlotRow>(&query)
        .bind(service_id)
        .fetch_all(pool)
        .await?)
}

/// `true` when the slot exists and nobody holds it.
pub async fn check(pool: &SqlitePool, slot_id: &str) -> ApiResult<bool> {
    Ok(fetch_slot(pool, slot_id)
        .await?
        .is_some_and(|slot| !slot.is_booked))
}

pub async fn update(
    state: &AppState,
    admin: &AuthUser,
    slot_id: &str,
    input: SlotInput,
    now: NaiveDateTime,
) -> ApiResult<SlotRow> {
    let current = get(&state.db, slot_id).await?;
    if current.is_booked {
        return Err(ApiError::bad_request("Cannot update a booked slot"));
    }
    check_input(&state.db, &current.owner_id, &input, Some(slot_id), now).await?;

    let result = sqlx::query(
        r#"UPDATE availability_slots SET service_id = ?, start_time = ?, end_time = ?
           WHERE id = ? AND is_booked = 0"#,
    )
    .bind(&input.service_id)
    .bind(fmt_time(&input.start_time))
    .bind(fmt_time(&input.end_time))
    .bind(slot_id)
    .execute(&state.db)
    .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::bad_request("Cannot update a booked slot"));
    }

    log_activity(
        &state.db,
        "slot_updated",
        &format!("{} moved slot {} to {}.", admin.display_name, slot_id, fmt_time(&input.start_time)),
        Some(&admin.id),
        None,
    )
    .await;
    let _ = state.events.send(ServerEvent::slot_changed("slot_updated", slot_id));
    get(&state.db, slot_id).await
}

pub async fn mark_booked(state: &AppState, slot_id: &str) -> ApiResult<()> {
    get(&state.db, slot_id).await?;
    let result = sqlx::query("UPDATE availability_slots SET is_booked = 1 WHERE id = ? AND is_booked = 0")
        .bind(slot_id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::bad_request("Slot is already booked"));
    }
    let _ = state.events.send(ServerEvent::slot_changed("slot_booked", slot_id));
    Ok(())
}

/// Frees the slot. An active appointment holding it is cancelled first.
pub async fn release(state: &AppState, admin: &AuthUser, slot_id: &str) -> ApiResult<()> {
    get(&state.db, slot_id).await?;

    let mut tx = state.db.begin().await?;
    let holder = sqlx::query_scalar::<_, String>(
        r#"SELECT id FROM appointments
           WHERE slot_id = ? AND status NOT IN (?, ?)
           LIMIT 1"#,
    )
    .bind(slot_id)
    .bind(AppointmentStatus::Cancelled.as_str())
    .bind(AppointmentStatus::Completed.as_str())
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(appointment_id) = holder.as_deref() {
        sqlx::query("UPDATE appointments SET status = ?, updated_at = ? WHERE id = ?")
            .bind(AppointmentStatus::Cancelled.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(appointment_id)
            .execute(&mut *tx)
            .await?;
    }
    sqlx::query("UPDATE availability_slots SET is_booked = 0 WHERE id = ?")
        .bind(slot_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    if let Some(appointment_id) = holder {
        if let Some(row) = fetch_appointment(&state.db, &appointment_id).await? {
            booking::announce(
                state,
                row,
                Some(admin),
                Notice {
                    kind: "appointment_cancelled",
                    title: "Appointment cancelled",
                    body: "Your appointment was cancelled because the slot was released.".to_string(),
                    calendar: CalendarChange::Remove,
                },
            )
            .await;
        }
    }

    log_activity(
        &state.db,
        "slot_released",
        &format!("{} released slot {}.", admin.display_name, slot_id),
        Some(&admin.id),
        None,
    )
    .await;
    let _ = state.events.send(ServerEvent::slot_changed("slot_released", slot_id));
    Ok(())
}

pub async fn delete(state: &AppState, admin: &AuthUser, slot_id: &str) -> ApiResult<()> {
    let slot = get(&state.db, slot_id).await?;
    if slot.is_booked {
        return Err(ApiError::bad_request("Cannot delete a booked slot"));
    }

    let result = sqlx::query("DELETE FROM availability_slots WHERE id = ? AND is_booked = 0")
        .bind(slot_id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::bad_request("Cannot delete a booked slot"));
    }

    log_activity(
        &state.db,
        "slot_deleted",
        &format!(
            "{} removed the {} slot at {}.",
            admin.display_name,
            slot.service_name,
            fmt_time(&slot.start_time)
        ),
        Some(&admin.id),
        None,
    )
    .await;
    let _ = state.events.send(ServerEvent::slot_changed("slot_deleted", slot_id));
    Ok(())
}
