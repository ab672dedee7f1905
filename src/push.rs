use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use web_push::{
    ContentEncoding, IsahcWebPushClient, SubscriptionInfo, VapidSignatureBuilder, WebPushClient,
    WebPushError, WebPushMessageBuilder, URL_SAFE_NO_PAD,
};

use crate::{
    auth::new_id,
    state::{AppState, PushConfig},
};

#[derive(Debug, Deserialize)]
pub struct SubscriptionInput {
    pub endpoint: String,
    pub keys: SubscriptionKeys,
}

#[derive(Debug, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub url: String,
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    endpoint: String,
    p256dh: String,
    auth: String,
}

/// Saves a browser subscription for an appointment. Returns `false` when the
/// payload is not a push subscription.
pub async fn store_subscription(
    pool: &SqlitePool,
    appointment_id: &str,
    raw_subscription: &str,
) -> Result<bool, sqlx::Error> {
    let subscription: SubscriptionInput = match serde_json::from_str(raw_subscription) {
        Ok(value) => value,
        Err(err) => {
            log::warn!("Invalid push subscription payload: {err}");
            return Ok(false);
        }
    };
    if subscription.endpoint.trim().is_empty() {
        return Ok(false);
    }

    sqlx::query(
        r#"INSERT INTO push_subscriptions (id, appointment_id, endpoint, p256dh, auth, created_at)
           VALUES (?, ?, ?, ?, ?, ?)
           ON CONFLICT(appointment_id, endpoint) DO UPDATE SET
             p256dh = excluded.p256dh,
             auth = excluded.auth"#,
    )
    .bind(new_id())
    .bind(appointment_id)
    .bind(subscription.endpoint.trim())
    .bind(subscription.keys.p256dh)
    .bind(subscription.keys.auth)
    .bind(chrono::Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    Ok(true)
}

/// Sends `message` to every browser subscribed to the appointment.
/// Returns how many deliveries succeeded.
pub async fn notify_appointment(state: &AppState, appointment_id: &str, message: &PushMessage) -> usize {
    if !state.push.enabled() {
        log::debug!("Push disabled, skipping '{}' for {appointment_id}", message.title);
        return 0;
    }

    let rows = match sqlx::query_as::<_, SubscriptionRow>(
        "SELECT endpoint, p256dh, auth FROM push_subscriptions WHERE appointment_id = ?",
    )
    .bind(appointment_id)
    .fetch_all(&state.db)
    .await
    {
        Ok(rows) => rows,
        Err(err) => {
            log::warn!("Push subscription lookup failed: {err}");
            return 0;
        }
    };

    if rows.is_empty() {
        return 0;
    }

    let payload = match serde_json::to_string(message) {
        Ok(payload) => payload,
        Err(err) => {
            log::warn!("Push payload encoding failed: {err}");
            return 0;
        }
    };

    let client = match IsahcWebPushClient::new() {
        Ok(client) => client,
        Err(err) => {
            log::warn!("Push client unavailable: {err}");
            return 0;
        }
    };

    let mut delivered = 0;
    for row in rows {
        match send_push(&client, &state.push, row, &payload).await {
            Ok(()) => delivered += 1,
            Err(err) => log::warn!("Push send failed: {err}"),
        }
    }
    delivered
}

async fn send_push(
    client: &IsahcWebPushClient,
    config: &PushConfig,
    row: SubscriptionRow,
    payload: &str,
) -> Result<(), WebPushError> {
    let subscription = SubscriptionInfo::new(row.endpoint, row.p256dh, row.auth);
    let mut builder = WebPushMessageBuilder::new(&subscription);
    builder.set_payload(ContentEncoding::Aes128Gcm, payload.as_bytes());

    let mut vapid_builder =
        VapidSignatureBuilder::from_base64(&config.private_key, URL_SAFE_NO_PAD, &subscription)?;
    vapid_builder.add_claim("sub", config.subject.clone());

    builder.set_vapid_signature(vapid_builder.build()?);
    client.send(builder.build()?).await?;
    Ok(())
}
