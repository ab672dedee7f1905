use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use sqlx::SqlitePool;

use crate::{
    calendar,
    db::{local_now, log_activity, APPOINTMENT_SELECT},
    models::{fmt_date, fmt_time, AppointmentRow, AppointmentStatus},
    push::{self, PushMessage},
    state::AppState,
};

/// Time left until the next `hour:00` strictly after `now`.
pub fn until_next_run(now: NaiveDateTime, hour: u32) -> StdDuration {
    let at = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or_default();
    let mut next = now.date().and_time(at);
    if next <= now {
        next += Duration::days(1);
    }
    (next - now).to_std().unwrap_or(StdDuration::from_secs(60))
}

/// Time left until the top of the next hour.
pub fn until_next_hour(now: NaiveDateTime) -> StdDuration {
    let top = now
        .date()
        .and_hms_opt(now.hour(), 0, 0)
        .unwrap_or(now);
    (top + Duration::hours(1) - now)
        .to_std()
        .unwrap_or(StdDuration::from_secs(60))
}

pub async fn due_tomorrow(pool: &SqlitePool, today: NaiveDate) -> Result<Vec<AppointmentRow>, sqlx::Error> {
    let tomorrow = today + Duration::days(1);
    let query = format!("{APPOINTMENT_SELECT} WHERE a.status = ? AND a.scheduled_at = ? ORDER BY sl.start_time");
    sqlx::query_as::<_, AppointmentRow>(&query)
        .bind(AppointmentStatus::Confirmed.as_str())
        .bind(fmt_date(&tomorrow))
        .fetch_all(pool)
        .await
}

/// Reminds every confirmed appointment scheduled for the day after `today`.
/// Returns how many appointments were reminded.
pub async fn send_reminders(state: &AppState, today: NaiveDate) -> usize {
    let rows = match due_tomorrow(&state.db, today).await {
        Ok(rows) => rows,
        Err(err) => {
            log::error!("Reminder lookup failed: {err}");
            return 0;
        }
    };

    for row in &rows {
        let when = row
            .slot_start
            .as_ref()
            .map(fmt_time)
            .unwrap_or_else(|| fmt_date(&row.scheduled_at));
        let message = PushMessage {
            title: "Appointment tomorrow".to_string(),
            body: format!("{} at {} ({}).", row.service_name, when, row.location),
            url: "/account".to_string(),
        };
        push::notify_appointment(state, &row.id, &message).await;
        log_activity(
            &state.db,
            "reminder_sent",
            &format!("Reminder sent to {} for {}.", row.user_name, row.service_name),
            None,
            Some(&row.id),
        )
        .await;
    }

    log::info!("Sent {} appointment reminder(s) for {}", rows.len(), fmt_date(&(today + Duration::days(1))));
    rows.len()
}

/// Runs the reminder job every day at `hour` local time.
pub fn spawn(state: AppState, hour: u32) {
    actix_web::rt::spawn(async move {
        loop {
            let wait = until_next_run(local_now(), hour);
            log::debug!("Next reminder run in {}s", wait.as_secs());
            tokio::time::sleep(wait).await;
            send_reminders(&state, local_now().date()).await;
        }
    });
}

/// Local hour at which expired calendar tokens are purged.
const TOKEN_CLEANUP_HOUR: u32 = 2;

/// Keeps calendar tokens alive: refreshes the ones expiring soon every hour
/// and purges expired ones once a night.
pub fn spawn_calendar_upkeep(state: AppState) {
    actix_web::rt::spawn(async move {
        loop {
            tokio::time::sleep(until_next_hour(local_now())).await;

            match calendar::refresh_expiring(&state.db, state.calendar.as_ref(), Utc::now()).await {
                Ok(summary) if summary.refreshed + summary.failed > 0 => log::info!(
                    "Calendar tokens refreshed: {}, not refreshed: {}",
                    summary.refreshed,
                    summary.failed
                ),
                Ok(_) => log::debug!("No calendar tokens due for refresh"),
                Err(err) => log::error!("Calendar token refresh failed: {err}"),
            }

            if local_now().hour() == TOKEN_CLEANUP_HOUR {
                match calendar::cleanup_expired(&state.db, Utc::now()).await {
                    Ok(removed) => log::info!("Removed {removed} expired calendar token(s)"),
                    Err(err) => log::error!("Calendar token cleanup failed: {err}"),
                }
            }
        }
    });
}
