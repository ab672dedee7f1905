use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{
    auth::new_id,
    error::{ApiError, ApiResult},
    models::{price_to_cents, ServiceRow},
};

const SERVICE_COLUMNS: &str = "id, name, description, duration_min, price_cents";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub min_duration: i64,
    pub price: f64,
}

impl ServiceInput {
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let name_length = self.name.trim().chars().count();
        if name_length == 0 {
            problems.push("Service name is required".to_string());
        } else if name_length > 100 {
            problems.push("Service name cannot exceed 100 characters".to_string());
        }
        if self.description.trim().chars().count() > 500 {
            problems.push("Description cannot exceed 500 characters".to_string());
        }
        if self.min_duration <= 0 {
            problems.push("Duration must be a positive number of minutes".to_string());
        }
        if !self.price.is_finite() || self.price < 0.01 {
            problems.push("Price must be at least 0.01".to_string());
        }
        problems
    }
}

fn not_found(service_id: &str) -> ApiError {
    ApiError::not_found(format!("Service with ID {service_id} not found"))
}

pub async fn list(pool: &SqlitePool) -> ApiResult<Vec<ServiceRow>> {
    let query = format!("SELECT {SERVICE_COLUMNS} FROM services ORDER BY name");
    Ok(sqlx::query_as::<_, ServiceRow>(&query).fetch_all(pool).await?)
}

pub async fn find(pool: &SqlitePool, service_id: &str) -> Result<Option<ServiceRow>, sqlx::Error> {
    let query = format!("SELECT {SERVICE_COLUMNS} FROM services WHERE id = ?");
    sqlx::query_as::<_, ServiceRow>(&query)
        .bind(service_id)
        .fetch_optional(pool)
        .await
}

pub async fn get(pool: &SqlitePool, service_id: &str) -> ApiResult<ServiceRow> {
    find(pool, service_id)
        .await?
        .ok_or_else(|| not_found(service_id))
}

pub async fn create(pool: &SqlitePool, input: ServiceInput) -> ApiResult<ServiceRow> {
    let problems = input.problems();
    if !problems.is_empty() {
        return Err(ApiError::bad_request(problems.join("; ")));
    }

    let service_id = new_id();
    sqlx::query(
        r#"INSERT INTO services (id, name, description, duration_min, price_cents, created_at)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(&service_id)
    .bind(input.name.trim())
    .bind(input.description.trim())
    .bind(input.min_duration)
    .bind(price_to_cents(input.price))
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    get(pool, &service_id).await
}

pub async fn update(pool: &SqlitePool, service_id: &str, input: ServiceInput) -> ApiResult<ServiceRow> {
    let problems = input.problems();
    if !problems.is_empty() {
        return Err(ApiError::bad_request(problems.join("; ")));
    }

    let result = sqlx::query(
        "UPDATE services SET name = ?, description = ?, duration_min = ?, price_cents = ? WHERE id = ?",
    )
    .bind(input.name.trim())
    .bind(input.description.trim())
    .bind(input.min_duration)
    .bind(price_to_cents(input.price))
    .bind(service_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(not_found(service_id));
    }
    get(pool, service_id).await
}

/// Services still referenced by slots or appointments stay in place.
pub async fn delete(pool: &SqlitePool, service_id: &str) -> ApiResult<()> {
    get(pool, service_id).await?;

    let references = sqlx::query_scalar::<_, i64>(
        r#"SELECT (SELECT COUNT(*) FROM availability_slots WHERE service_id = ?)
                + (SELECT COUNT(*) FROM appointments WHERE service_id = ?)"#,
    )
    .bind(service_id)
    .bind(service_id)
    .fetch_one(pool)
    .await?;
    if references > 0 {
        return Err(ApiError::conflict(
            "Service is still used by availability slots or appointments",
        ));
    }

    sqlx::query("DELETE FROM services WHERE id = ?")
        .bind(service_id)
        .execute(pool)
        .await?;
    Ok(())
}
