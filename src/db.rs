use std::{fs, path::Path};

use chrono::{Local, NaiveDateTime, Utc};
use sqlx::{Sqlite, SqlitePool};

use crate::{
    auth::{hash_password, new_id},
    config::Config,
    models::{AppointmentRow, SlotRow, ROLE_ADMIN},
};

pub const APPOINTMENT_SELECT: &str = r#"SELECT a.id, a.slot_id, a.user_id,
       TRIM(u.name || ' ' || u.surname) AS user_name,
       u.email AS user_email,
       a.service_id, s.name AS service_name, s.description AS service_description,
       s.duration_min AS service_duration_min, s.price_cents AS service_price_cents,
       a.status, a.location, a.scheduled_at, a.description,
       sl.start_time AS slot_start, sl.end_time AS slot_end
FROM appointments a
JOIN users u ON a.user_id = u.id
JOIN services s ON a.service_id = s.id
LEFT JOIN availability_slots sl ON a.slot_id = sl.id"#;

pub const SLOT_SELECT: &str = r#"SELECT sl.id, sl.owner_id, sl.service_id, s.name AS service_name,
       sl.start_time, sl.end_time, sl.is_booked
FROM availability_slots sl
JOIN services s ON sl.service_id = s.id"#;

/// Wall clock used for slot expiry. Slot times are stored as naive local time.
pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

pub fn ensure_sqlite_dir(db_url: &str) -> std::io::Result<()> {
    let path = if let Some(path) = db_url.strip_prefix("sqlite://") {
        Some(path)
    } else {
        db_url.strip_prefix("sqlite:")
    };

    let Some(path) = path else {
        return Ok(());
    };

    let path = path.split('?').next().unwrap_or(path);
    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = path.strip_prefix("file:").unwrap_or(path);
    let db_path = Path::new(path);
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub async fn seed_defaults(pool: &SqlitePool, config: &Config) -> Result<(), sqlx::Error> {
    seed_admin(pool, config).await?;
    if config.seed_services {
        seed_services(pool).await?;
    }
    Ok(())
}

pub async fn log_activity(
    pool: &SqlitePool,
    kind: &str,
    message: &str,
    user_id: Option<&str>,
    appointment_id: Option<&str>,
) {
    let result = sqlx::query(
        r#"INSERT INTO activities (id, kind, message, created_at, user_id, appointment_id)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(new_id())
    .bind(kind)
    .bind(message)
    .bind(Utc::now().to_rfc3339())
    .bind(user_id)
    .bind(appointment_id)
    .execute(pool)
    .await;

    if let Err(err) = result {
        log::warn!("Failed to record activity {kind}: {err}");
    }
}

pub async fn fetch_appointment<'e, E>(
    executor: E,
    appointment_id: &str,
) -> Result<Option<AppointmentRow>, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let query = format!("{APPOINTMENT_SELECT} WHERE a.id = ? LIMIT 1");
    sqlx::query_as::<_, AppointmentRow>(&query)
        .bind(appointment_id)
        .fetch_optional(executor)
        .await
}

pub async fn fetch_slot<'e, E>(executor: E, slot_id: &str) -> Result<Option<SlotRow>, sqlx::Error>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let query = format!("{SLOT_SELECT} WHERE sl.id = ? LIMIT 1");
    sqlx::query_as::<_, SlotRow>(&query)
        .bind(slot_id)
        .fetch_optional(executor)
        .await
}

async fn seed_admin(pool: &SqlitePool, config: &Config) -> Result<(), sqlx::Error> {
    let existing = sqlx::query_as::<_, (String,)>("SELECT id FROM users WHERE role = ? LIMIT 1")
        .bind(ROLE_ADMIN)
        .fetch_optional(pool)
        .await?;

    if existing.is_some() {
        return Ok(());
    }

    let seed = &config.admin;
    if seed.password == "admin" {
        log::warn!("ADMIN_PASSWORD not set. Using default password 'admin'. Set ADMIN_PASSWORD in production.");
    }

    let password_hash = hash_password(&seed.password)
        .map_err(|_| sqlx::Error::Protocol("password hash failed".into()))?;
    let (name, surname) = split_name(&seed.name);

    sqlx::query(
        r#"INSERT INTO users (id, name, surname, email, phone_num, password_hash, role, enabled, created_at)
           VALUES (?, ?, ?, ?, '', ?, ?, 1, ?)"#,
    )
    .bind(new_id())
    .bind(name)
    .bind(surname)
    .bind(seed.email.trim().to_lowercase())
    .bind(password_hash)
    .bind(ROLE_ADMIN)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    log::info!("Seeded admin account {}", seed.email);
    Ok(())
}

async fn seed_services(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM services")
        .fetch_one(pool)
        .await?;
    if count > 0 {
        return Ok(());
    }

    let services = [
        ("Bridal Makeup", "Long-wear makeup with a trial consultation.", 120, 45000),
        ("Evening Makeup", "Full glam for events and photo shoots.", 75, 22000),
        ("Brow Shaping", "Mapping, shaping and tint.", 30, 8000),
        ("Lash Lift", "Lift and tint for natural lashes.", 60, 15000),
    ];

    for (name, description, duration, price_cents) in services {
        sqlx::query(
            r#"INSERT INTO services (id, name, description, duration_min, price_cents, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(new_id())
        .bind(name)
        .bind(description)
        .bind(duration)
        .bind(price_cents)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Splits "First Last Name" into ("First", "Last Name").
pub fn split_name(full: &str) -> (String, String) {
    let mut parts = full.trim().splitn(2, ' ');
    let first = parts.next().unwrap_or_default().to_string();
    let rest = parts.next().unwrap_or_default().trim().to_string();
    (first, rest)
}

/// In-memory database fixtures for unit tests.
#[cfg(test)]
pub(crate) mod fixtures {
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;
    use crate::models::{fmt_date, fmt_time};

    pub async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory database");
        run_migrations(&pool).await.expect("migrations");
        pool
    }

    pub async fn user(pool: &SqlitePool, id: &str) {
        sqlx::query(
            r#"INSERT INTO users (id, name, surname, email, phone_num, password_hash, role, enabled, created_at)
               VALUES (?, 'Ada', 'Lovelace', ?, '', 'x', 'ROLE_USER', 1, ?)"#,
        )
        .bind(id)
        .bind(format!("{id}@example.com"))
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await
        .expect("user");
    }

    pub async fn service(pool: &SqlitePool, id: &str) {
        sqlx::query(
            r#"INSERT INTO services (id, name, description, duration_min, price_cents, created_at)
               VALUES (?, 'Lash Lift', '', 60, 15000, ?)"#,
        )
        .bind(id)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await
        .expect("service");
    }

    /// One-hour slot starting at `start`, owned by `owner_id`.
    pub async fn slot(pool: &SqlitePool, id: &str, owner_id: &str, service_id: &str, start: NaiveDateTime) {
        sqlx::query(
            r#"INSERT INTO availability_slots (id, owner_id, service_id, start_time, end_time, is_booked, created_at)
               VALUES (?, ?, ?, ?, ?, 1, ?)"#,
        )
        .bind(id)
        .bind(owner_id)
        .bind(service_id)
        .bind(fmt_time(&start))
        .bind(fmt_time(&(start + chrono::Duration::hours(1))))
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await
        .expect("slot");
    }

    pub async fn appointment(pool: &SqlitePool, id: &str, slot_id: &str, user_id: &str, service_id: &str, status: &str) {
        let scheduled = fetch_slot(pool, slot_id)
            .await
            .expect("slot lookup")
            .expect("slot exists")
            .start_time
            .date();
        sqlx::query(
            r#"INSERT INTO appointments
               (id, slot_id, user_id, service_id, status, location, scheduled_at, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, 'Studio', ?, ?, ?)"#,
        )
        .bind(id)
        .bind(slot_id)
        .bind(user_id)
        .bind(service_id)
        .bind(status)
        .bind(fmt_date(&scheduled))
        .bind(Utc::now().to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await
        .expect("appointment");
    }
}
