use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;

use crate::{
    auth::AuthUser,
    db::{fetch_appointment, APPOINTMENT_SELECT},
    error::{ApiError, ApiResult},
    identity::Provider,
    models::{AppointmentRow, AppointmentStatus},
    state::AppState,
};

pub const GOOGLE_PROVIDER: &str = "google";
const PRIMARY_CALENDAR: &str = "primary";
/// Lifetime assumed for access tokens that arrive without `expiresIn`.
const DEFAULT_TOKEN_TTL_SECONDS: i64 = 3600;
/// Tokens this close to expiry are refreshed before use.
const REFRESH_MARGIN_MINUTES: i64 = 5;
/// The hourly job refreshes tokens expiring inside this window.
pub const REFRESH_WINDOW_HOURS: i64 = 2;
const TOKEN_COLUMNS: &str = "user_id, provider, access_token, refresh_token, expires_at, account_email";

/// Event body pushed to the external calendar.
#[derive(Debug, Clone, PartialEq)]
pub struct CalendarEvent {
    pub summary: String,
    pub description: String,
    pub location: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl CalendarEvent {
    pub fn from_appointment(row: &AppointmentRow) -> Self {
        let start = row.slot_start.unwrap_or_else(|| {
            row.scheduled_at
                .and_hms_opt(9, 0, 0)
                .unwrap_or_default()
        });
        let end = row
            .slot_end
            .unwrap_or_else(|| start + Duration::minutes(row.service_duration_min.max(1)));
        let mut description = format!("{} ({} min)", row.service_name, row.service_duration_min);
        if let Some(notes) = row.description.as_deref().filter(|notes| !notes.trim().is_empty()) {
            description.push_str("\n\n");
            description.push_str(notes.trim());
        }
        Self {
            summary: format!("{} appointment", row.service_name),
            description,
            location: row.location.clone(),
            start,
            end,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("calendar access was revoked or expired")]
    Unauthorized,
    #[error("calendar event not found")]
    NotFound,
    #[error("calendar API returned {0}: {1}")]
    Api(u16, String),
    #[error("calendar request failed: {0}")]
    Transport(String),
    #[error("token refresh is not configured")]
    RefreshUnavailable,
}

/// New access token handed out by the OAuth token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RefreshedToken {
    pub access_token: String,
    /// Seconds until the new access token expires.
    pub expires_in: Option<i64>,
    /// Set when the provider rotated the refresh token.
    pub refresh_token: Option<String>,
}

#[async_trait]
pub trait CalendarClient: Send + Sync {
    /// Creates the event and returns its external id.
    async fn create_event(&self, access_token: &str, event: &CalendarEvent) -> Result<String, CalendarError>;

    async fn update_event(
        &self,
        access_token: &str,
        event_id: &str,
        event: &CalendarEvent,
    ) -> Result<(), CalendarError>;

    async fn delete_event(&self, access_token: &str, event_id: &str) -> Result<(), CalendarError>;

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<RefreshedToken, CalendarError>;
}

/// OAuth client used for the `refresh_token` grant.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
}

pub struct GoogleCalendarClient {
    client: Client,
    api_base: String,
    oauth: Option<OAuthClient>,
}

impl GoogleCalendarClient {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            oauth: None,
        }
    }

    /// Enables token refresh. Without a client id tokens are used until they expire.
    pub fn with_oauth_client(mut self, oauth: OAuthClient) -> Self {
        self.oauth = Some(oauth).filter(|oauth| !oauth.client_id.trim().is_empty());
        self
    }

    fn events_url(&self) -> String {
        format!("{}/calendar/v3/calendars/{PRIMARY_CALENDAR}/events", self.api_base)
    }
}

#[derive(Deserialize)]
struct CreatedEvent {
    id: String,
}

/// Google wants an RFC 3339 instant; slot times are naive local time.
fn to_rfc3339(value: NaiveDateTime) -> String {
    match Local.from_local_datetime(&value).earliest() {
        Some(local) => local.to_rfc3339(),
        None => value.and_utc().to_rfc3339(),
    }
}

fn event_body(event: &CalendarEvent) -> serde_json::Value {
    json!({
        "summary": event.summary,
        "description": event.description,
        "location": event.location,
        "start": { "dateTime": to_rfc3339(event.start) },
        "end": { "dateTime": to_rfc3339(event.end) },
    })
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, CalendarError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(CalendarError::Unauthorized),
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(CalendarError::NotFound),
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(CalendarError::Api(status.as_u16(), body))
        }
    }
}

#[async_trait]
impl CalendarClient for GoogleCalendarClient {
    async fn create_event(&self, access_token: &str, event: &CalendarEvent) -> Result<String, CalendarError> {
        let response = self
            .client
            .post(self.events_url())
            .bearer_auth(access_token)
            .json(&event_body(event))
            .send()
            .await
            .map_err(|err| CalendarError::Transport(err.to_string()))?;
        let created: CreatedEvent = check(response)
            .await?
            .json()
            .await
            .map_err(|err| CalendarError::Transport(err.to_string()))?;
        Ok(created.id)
    }

    async fn update_event(
        &self,
        access_token: &str,
        event_id: &str,
        event: &CalendarEvent,
    ) -> Result<(), CalendarError> {
        let response = self
            .client
            .put(format!("{}/{event_id}", self.events_url()))
            .bearer_auth(access_token)
            .json(&event_body(event))
            .send()
            .await
            .map_err(|err| CalendarError::Transport(err.to_string()))?;
        check(response).await?;
        Ok(())
    }

    async fn delete_event(&self, access_token: &str, event_id: &str) -> Result<(), CalendarError> {
        let response = self
            .client
            .delete(format!("{}/{event_id}", self.events_url()))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| CalendarError::Transport(err.to_string()))?;
        check(response).await?;
        Ok(())
    }

    async fn refresh_access_token(&self, refresh_token: &str) -> Result<RefreshedToken, CalendarError> {
        let oauth = self.oauth.as_ref().ok_or(CalendarError::RefreshUnavailable)?;
        let response = self
            .client
            .post(&oauth.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", oauth.client_id.as_str()),
                ("client_secret", oauth.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|err| CalendarError::Transport(err.to_string()))?;
        check(response)
            .await?
            .json()
            .await
            .map_err(|err| CalendarError::Transport(err.to_string()))
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CalendarTokenRow {
    pub user_id: String,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<String>,
    pub account_email: Option<String>,
}

impl CalendarTokenRow {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|expires| expires.with_timezone(&Utc))
    }

    /// Tokens without a readable expiry count as already expired.
    pub fn expires_before(&self, at: DateTime<Utc>) -> bool {
        self.expires_at().map_or(true, |expires| expires <= at)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_before(Utc::now())
    }

    fn can_refresh(&self) -> bool {
        self.refresh_token
            .as_deref()
            .is_some_and(|token| !token.trim().is_empty())
    }
}

fn expiry_after(seconds: Option<i64>) -> String {
    let seconds = seconds
        .filter(|seconds| *seconds > 0)
        .unwrap_or(DEFAULT_TOKEN_TTL_SECONDS);
    (Utc::now() + Duration::seconds(seconds)).to_rfc3339()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenInput {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires. One hour when absent.
    pub expires_in: Option<i64>,
    /// Used only when the provider cannot be asked for the account email.
    pub account_email: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub is_connected: bool,
    pub provider: Option<String>,
    pub account_email: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    pub message: String,
    pub appointment_id: String,
    pub event_id: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncAllResult {
    pub success: bool,
    pub message: String,
    pub synced: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub appointment_id: String,
    pub is_synced: bool,
    pub is_connected: bool,
}

/// Stores the user's calendar token. The account email comes from the
/// provider's userinfo endpoint, falling back to the given one and then to
/// the user's own address.
pub async fn save_token(state: &AppState, user: &AuthUser, input: TokenInput) -> ApiResult<ConnectionStatus> {
    let access_token = input.access_token.trim();
    if access_token.is_empty() {
        return Err(ApiError::bad_request("Access token is required"));
    }
    let expires_at = expiry_after(input.expires_in);
    let account_email = match state.identity.fetch_profile(Provider::Google, access_token).await {
        Ok(profile) => profile.email,
        Err(err) => {
            log::warn!("Could not read the calendar account email for user {}: {err}", user.id);
            input
                .account_email
                .filter(|email| !email.trim().is_empty())
                .unwrap_or_else(|| user.email.clone())
        }
    };

    sqlx::query(
        r#"INSERT INTO calendar_tokens (user_id, provider, access_token, refresh_token, expires_at, account_email, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?)
           ON CONFLICT(user_id) DO UPDATE SET
             provider = excluded.provider,
             access_token = excluded.access_token,
             refresh_token = COALESCE(excluded.refresh_token, calendar_tokens.refresh_token),
             expires_at = excluded.expires_at,
             account_email = excluded.account_email"#,
    )
    .bind(&user.id)
    .bind(GOOGLE_PROVIDER)
    .bind(access_token)
    .bind(input.refresh_token.filter(|token| !token.trim().is_empty()))
    .bind(expires_at)
    .bind(account_email)
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db)
    .await?;

    log::info!("Calendar connected for user {}", user.id);
    status(&state.db, &user.id).await
}

pub async fn find_token(pool: &SqlitePool, user_id: &str) -> Result<Option<CalendarTokenRow>, sqlx::Error> {
    let query = format!("SELECT {TOKEN_COLUMNS} FROM calendar_tokens WHERE user_id = ?");
    sqlx::query_as::<_, CalendarTokenRow>(&query)
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

async fn delete_token(pool: &SqlitePool, user_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM calendar_tokens WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Swaps the stored access token for a fresh one. A token the provider
/// refuses to refresh is deleted, so the user has to reconnect.
async fn refresh(
    pool: &SqlitePool,
    client: &dyn CalendarClient,
    token: &CalendarTokenRow,
) -> Result<Option<CalendarTokenRow>, sqlx::Error> {
    let Some(refresh_token) = token.refresh_token.as_deref().filter(|_| token.can_refresh()) else {
        return Ok(None);
    };
    match client.refresh_access_token(refresh_token).await {
        Ok(fresh) => {
            sqlx::query(
                r#"UPDATE calendar_tokens
                   SET access_token = ?, expires_at = ?, refresh_token = COALESCE(?, refresh_token)
                   WHERE user_id = ?"#,
            )
            .bind(&fresh.access_token)
            .bind(expiry_after(fresh.expires_in))
            .bind(fresh.refresh_token)
            .bind(&token.user_id)
            .execute(pool)
            .await?;
            log::info!("Refreshed calendar token for user {}", token.user_id);
            find_token(pool, &token.user_id).await
        }
        Err(CalendarError::RefreshUnavailable) => Ok(None),
        Err(err) => {
            log::error!("Calendar token refresh failed for user {}: {err}", token.user_id);
            delete_token(pool, &token.user_id).await?;
            Ok(None)
        }
    }
}

/// Counts from one pass of the hourly refresh job.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub refreshed: usize,
    pub failed: usize,
}

/// Refreshes every refreshable token expiring before `now` plus
/// [`REFRESH_WINDOW_HOURS`].
pub async fn refresh_expiring(
    pool: &SqlitePool,
    client: &dyn CalendarClient,
    now: DateTime<Utc>,
) -> Result<RefreshSummary, sqlx::Error> {
    let threshold = now + Duration::hours(REFRESH_WINDOW_HOURS);
    let query = format!("SELECT {TOKEN_COLUMNS} FROM calendar_tokens WHERE provider = ?");
    let tokens = sqlx::query_as::<_, CalendarTokenRow>(&query)
        .bind(GOOGLE_PROVIDER)
        .fetch_all(pool)
        .await?;

    let mut summary = RefreshSummary::default();
    for token in tokens
        .iter()
        .filter(|token| token.can_refresh() && token.expires_before(threshold))
    {
        match refresh(pool, client, token).await? {
            Some(_) => summary.refreshed += 1,
            None => summary.failed += 1,
        }
    }
    Ok(summary)
}

/// Deletes tokens that expired before `now`. Event mappings stay, so a
/// reconnect keeps updating the same calendar events.
pub async fn cleanup_expired(pool: &SqlitePool, now: DateTime<Utc>) -> Result<usize, sqlx::Error> {
    let query = format!("SELECT {TOKEN_COLUMNS} FROM calendar_tokens");
    let tokens = sqlx::query_as::<_, CalendarTokenRow>(&query)
        .fetch_all(pool)
        .await?;

    let mut removed = 0;
    for token in tokens.iter().filter(|token| token.expires_before(now)) {
        delete_token(pool, &token.user_id).await?;
        log::info!("Removed expired calendar token for user {}", token.user_id);
        removed += 1;
    }
    Ok(removed)
}

pub async fn status(pool: &SqlitePool, user_id: &str) -> ApiResult<ConnectionStatus> {
    let token = find_token(pool, user_id).await?;
    Ok(match token {
        Some(token) if !token.is_expired() => ConnectionStatus {
            is_connected: true,
            provider: Some(token.provider),
            account_email: token.account_email,
        },
        _ => ConnectionStatus {
            is_connected: false,
            provider: None,
            account_email: None,
        },
    })
}

pub async fn disconnect(pool: &SqlitePool, user_id: &str) -> ApiResult<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM calendar_events WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM calendar_tokens WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    log::info!("Calendar disconnected for user {user_id}");
    Ok(())
}

async fn live_token(pool: &SqlitePool, user_id: &str) -> Result<Option<CalendarTokenRow>, sqlx::Error> {
    Ok(find_token(pool, user_id)
        .await?
        .filter(|token| !token.is_expired()))
}

/// The user's token, refreshed first when it is about to expire.
async fn usable_token(state: &AppState, user_id: &str) -> Result<Option<CalendarTokenRow>, sqlx::Error> {
    let Some(token) = find_token(&state.db, user_id).await? else {
        return Ok(None);
    };
    if token.can_refresh() && token.expires_before(Utc::now() + Duration::minutes(REFRESH_MARGIN_MINUTES)) {
        return refresh(&state.db, state.calendar.as_ref(), &token).await;
    }
    Ok(Some(token).filter(|token| !token.is_expired()))
}

async fn event_id_for(pool: &SqlitePool, appointment_id: &str) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT external_event_id FROM calendar_events WHERE appointment_id = ?",
    )
    .bind(appointment_id)
    .fetch_optional(pool)
    .await
}

async fn record_event(
    pool: &SqlitePool,
    row: &AppointmentRow,
    event_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO calendar_events (appointment_id, user_id, provider, external_event_id, calendar_id, synced, updated_at)
           VALUES (?, ?, ?, ?, ?, 1, ?)
           ON CONFLICT(appointment_id) DO UPDATE SET
             external_event_id = excluded.external_event_id,
             synced = 1,
             updated_at = excluded.updated_at"#,
    )
    .bind(&row.id)
    .bind(&row.user_id)
    .bind(GOOGLE_PROVIDER)
    .bind(event_id)
    .bind(PRIMARY_CALENDAR)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

async fn forget_event(pool: &SqlitePool, appointment_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM calendar_events WHERE appointment_id = ?")
        .bind(appointment_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
enum SyncError {
    #[error(transparent)]
    Calendar(#[from] CalendarError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Creates the external event, or updates the one already mapped to the
/// appointment. An event deleted on the calendar side is recreated.
async fn push_event(
    state: &AppState,
    token: &CalendarTokenRow,
    row: &AppointmentRow,
) -> Result<String, SyncError> {
    let event = CalendarEvent::from_appointment(row);
    if let Some(event_id) = event_id_for(&state.db, &row.id).await? {
        match state
            .calendar
            .update_event(&token.access_token, &event_id, &event)
            .await
        {
            Ok(()) => {
                record_event(&state.db, row, &event_id).await?;
                return Ok(event_id);
            }
            Err(CalendarError::NotFound) => {
                log::info!("Calendar event {event_id} vanished, recreating");
            }
            Err(err) => return Err(err.into()),
        }
    }

    let event_id = state
        .calendar
        .create_event(&token.access_token, &event)
        .await?;
    record_event(&state.db, row, &event_id).await?;
    Ok(event_id)
}

pub async fn sync_appointment(
    state: &AppState,
    user: &AuthUser,
    appointment_id: &str,
) -> ApiResult<SyncResult> {
    let Some(token) = usable_token(state, &user.id).await? else {
        return Ok(SyncResult {
            success: false,
            message: "Calendar not connected".to_string(),
            appointment_id: appointment_id.to_string(),
            event_id: None,
        });
    };

    let row = fetch_appointment(&state.db, appointment_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Appointment with ID {appointment_id} not found")))?;
    if row.user_id != user.id {
        return Err(ApiError::forbidden("You can only sync your own appointments"));
    }
    if row.status() == Some(AppointmentStatus::Cancelled) {
        return Err(ApiError::bad_request("Cannot sync a cancelled appointment"));
    }

    match push_event(state, &token, &row).await {
        Ok(event_id) => Ok(SyncResult {
            success: true,
            message: "Appointment synced to calendar".to_string(),
            appointment_id: row.id,
            event_id: Some(event_id),
        }),
        Err(err) => {
            log::warn!("Calendar sync failed for appointment {}: {err}", row.id);
            Ok(SyncResult {
                success: false,
                message: format!("Calendar sync failed: {err}"),
                appointment_id: row.id,
                event_id: None,
            })
        }
    }
}

pub async fn sync_all(state: &AppState, user: &AuthUser) -> ApiResult<SyncAllResult> {
    let Some(token) = usable_token(state, &user.id).await? else {
        return Ok(SyncAllResult {
            success: false,
            message: "Calendar not connected".to_string(),
            synced: 0,
            failed: 0,
        });
    };

    let query = format!("{APPOINTMENT_SELECT} WHERE a.user_id = ? AND a.status <> ? ORDER BY a.scheduled_at");
    let rows = sqlx::query_as::<_, AppointmentRow>(&query)
        .bind(&user.id)
        .bind(AppointmentStatus::Cancelled.as_str())
        .fetch_all(&state.db)
        .await?;

    let mut synced = 0;
    let mut failed = 0;
    for row in &rows {
        match push_event(state, &token, row).await {
            Ok(_) => synced += 1,
            Err(err) => {
                log::warn!("Calendar sync failed for appointment {}: {err}", row.id);
                failed += 1;
            }
        }
    }

    Ok(SyncAllResult {
        success: failed == 0,
        message: format!("Synced {synced} appointment(s), {failed} failed"),
        synced,
        failed,
    })
}

pub async fn sync_status(pool: &SqlitePool, user_id: &str, appointment_id: &str) -> ApiResult<SyncStatus> {
    let is_connected = live_token(pool, user_id).await?.is_some();
    let is_synced = sqlx::query_scalar::<_, bool>(
        "SELECT synced FROM calendar_events WHERE appointment_id = ? AND user_id = ?",
    )
    .bind(appointment_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .unwrap_or(false);

    Ok(SyncStatus {
        appointment_id: appointment_id.to_string(),
        is_synced,
        is_connected,
    })
}

/// What happened to an appointment, from the calendar's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarChange {
    Upsert,
    Remove,
}

/// Mirrors a booking change into the owner's calendar. Failures are logged
/// and never surface to the booking flow.
pub async fn reflect(state: &AppState, row: &AppointmentRow, change: CalendarChange) {
    let token = match usable_token(state, &row.user_id).await {
        Ok(Some(token)) => token,
        Ok(None) => return,
        Err(err) => {
            log::warn!("Calendar token lookup failed: {err}");
            return;
        }
    };

    let result = match change {
        CalendarChange::Upsert => push_event(state, &token, row).await.map(|_| ()),
        CalendarChange::Remove => remove_event(state, &token, &row.id).await,
    };

    if let Err(err) = result {
        log::warn!("Calendar update for appointment {} failed: {err}", row.id);
    }
}

async fn remove_event(
    state: &AppState,
    token: &CalendarTokenRow,
    appointment_id: &str,
) -> Result<(), SyncError> {
    let Some(event_id) = event_id_for(&state.db, appointment_id).await? else {
        return Ok(());
    };
    match state.calendar.delete_event(&token.access_token, &event_id).await {
        Ok(()) | Err(CalendarError::NotFound) => {}
        Err(err) => return Err(err.into()),
    }
    forget_event(&state.db, appointment_id).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures;
    use chrono::NaiveDate;
    use std::sync::Mutex;
    use wiremock::{
        matchers::{body_string_contains, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn appointment() -> AppointmentRow {
        let start = NaiveDate::from_ymd_opt(2030, 3, 4)
            .and_then(|date| date.and_hms_opt(15, 0, 0))
            .expect("start");
        AppointmentRow {
            id: "a-1".to_string(),
            slot_id: Some("s-1".to_string()),
            user_id: "u-1".to_string(),
            user_name: "Ada Lovelace".to_string(),
            user_email: "ada@example.com".to_string(),
            service_id: "svc".to_string(),
            service_name: "Lash Lift".to_string(),
            service_description: String::new(),
            service_duration_min: 60,
            service_price_cents: 15000,
            status: "CONFIRMED".to_string(),
            location: "Studio 2".to_string(),
            scheduled_at: start.date(),
            description: Some("  sensitive eyes ".to_string()),
            slot_start: Some(start),
            slot_end: None,
        }
    }

    #[test]
    fn event_uses_slot_times_and_notes() {
        let event = CalendarEvent::from_appointment(&appointment());
        assert_eq!(event.summary, "Lash Lift appointment");
        assert_eq!(event.description, "Lash Lift (60 min)\n\nsensitive eyes");
        assert_eq!(event.location, "Studio 2");
        assert_eq!(event.end - event.start, Duration::minutes(60));
    }

    #[test]
    fn token_expiry() {
        let mut token = CalendarTokenRow {
            user_id: "u-1".to_string(),
            provider: GOOGLE_PROVIDER.to_string(),
            access_token: "t".to_string(),
            refresh_token: None,
            expires_at: None,
            account_email: None,
        };
        assert!(token.is_expired());
        token.expires_at = Some((Utc::now() - Duration::minutes(1)).to_rfc3339());
        assert!(token.is_expired());
        token.expires_at = Some((Utc::now() + Duration::minutes(30)).to_rfc3339());
        assert!(!token.is_expired());
    }

    #[actix_web::test]
    async fn google_client_creates_and_deletes_events() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calendar/v3/calendars/primary/events"))
            .and(header("authorization", "Bearer cal-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "evt-42" })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/calendar/v3/calendars/primary/events/evt-gone"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/calendar/v3/calendars/primary/events/evt-42"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = GoogleCalendarClient::new(server.uri());
        let event = CalendarEvent::from_appointment(&appointment());

        let id = client.create_event("cal-token", &event).await.expect("created");
        assert_eq!(id, "evt-42");
        assert!(matches!(
            client.delete_event("cal-token", "evt-gone").await,
            Err(CalendarError::NotFound)
        ));
        assert!(matches!(
            client.update_event("cal-token", "evt-42", &event).await,
            Err(CalendarError::Unauthorized)
        ));
    }

    /// Refreshes succeed for `good-refresh` and fail for anything else.
    #[derive(Default)]
    struct RefreshingCalendar {
        refreshed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CalendarClient for RefreshingCalendar {
        async fn create_event(&self, _: &str, _: &CalendarEvent) -> Result<String, CalendarError> {
            Ok("evt".to_string())
        }

        async fn update_event(&self, _: &str, _: &str, _: &CalendarEvent) -> Result<(), CalendarError> {
            Ok(())
        }

        async fn delete_event(&self, _: &str, _: &str) -> Result<(), CalendarError> {
            Ok(())
        }

        async fn refresh_access_token(&self, refresh_token: &str) -> Result<RefreshedToken, CalendarError> {
            if let Ok(mut refreshed) = self.refreshed.lock() {
                refreshed.push(refresh_token.to_string());
            }
            if refresh_token == "good-refresh" {
                Ok(RefreshedToken {
                    access_token: "fresh-access".to_string(),
                    expires_in: Some(3600),
                    refresh_token: None,
                })
            } else {
                Err(CalendarError::Unauthorized)
            }
        }
    }

    async fn store_token(pool: &SqlitePool, user_id: &str, refresh_token: Option<&str>, expires_in: Duration) {
        fixtures::user(pool, user_id).await;
        sqlx::query(
            r#"INSERT INTO calendar_tokens (user_id, provider, access_token, refresh_token, expires_at, account_email, created_at)
               VALUES (?, 'google', 'old-access', ?, ?, NULL, ?)"#,
        )
        .bind(user_id)
        .bind(refresh_token)
        .bind((Utc::now() + expires_in).to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await
        .expect("token");
    }

    #[test]
    fn missing_expiry_defaults_to_one_hour() {
        let token = CalendarTokenRow {
            user_id: "u-1".to_string(),
            provider: GOOGLE_PROVIDER.to_string(),
            access_token: "t".to_string(),
            refresh_token: None,
            expires_at: Some(expiry_after(None)),
            account_email: None,
        };
        assert!(!token.expires_before(Utc::now() + Duration::minutes(59)));
        assert!(token.expires_before(Utc::now() + Duration::minutes(61)));

        let zero = CalendarTokenRow {
            expires_at: Some(expiry_after(Some(0))),
            ..token
        };
        assert!(!zero.expires_before(Utc::now() + Duration::minutes(59)));
    }

    #[actix_web::test]
    async fn hourly_refresh_renews_tokens_close_to_expiry() {
        let pool = fixtures::pool().await;
        store_token(&pool, "soon", Some("good-refresh"), Duration::minutes(90)).await;
        store_token(&pool, "later", Some("good-refresh"), Duration::hours(5)).await;
        store_token(&pool, "revoked", Some("bad-refresh"), Duration::minutes(30)).await;
        store_token(&pool, "implicit", None, Duration::minutes(30)).await;
        let client = RefreshingCalendar::default();

        let summary = refresh_expiring(&pool, &client, Utc::now()).await.expect("refresh");
        assert_eq!(summary, RefreshSummary { refreshed: 1, failed: 1 });

        let soon = find_token(&pool, "soon").await.expect("query").expect("kept");
        assert_eq!(soon.access_token, "fresh-access");
        assert_eq!(soon.refresh_token.as_deref(), Some("good-refresh"));
        assert!(!soon.expires_before(Utc::now() + Duration::minutes(59)));

        let later = find_token(&pool, "later").await.expect("query").expect("kept");
        assert_eq!(later.access_token, "old-access");
        assert!(find_token(&pool, "revoked").await.expect("query").is_none());
        assert!(find_token(&pool, "implicit").await.expect("query").is_some());
    }

    #[actix_web::test]
    async fn cleanup_drops_only_expired_tokens() {
        let pool = fixtures::pool().await;
        store_token(&pool, "stale", None, Duration::minutes(-10)).await;
        store_token(&pool, "live", None, Duration::minutes(10)).await;

        assert_eq!(cleanup_expired(&pool, Utc::now()).await.expect("cleanup"), 1);
        assert!(find_token(&pool, "stale").await.expect("query").is_none());
        assert!(find_token(&pool, "live").await.expect("query").is_some());
    }

    #[actix_web::test]
    async fn google_client_refreshes_with_the_oauth_client() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new-access",
                "expires_in": 3599,
                "token_type": "Bearer",
            })))
            .mount(&server)
            .await;

        let unconfigured = GoogleCalendarClient::new(server.uri());
        assert!(matches!(
            unconfigured.refresh_access_token("r-1").await,
            Err(CalendarError::RefreshUnavailable)
        ));

        let client = GoogleCalendarClient::new(server.uri()).with_oauth_client(OAuthClient {
            token_url: format!("{}/token", server.uri()),
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
        });
        let fresh = client.refresh_access_token("r-1").await.expect("refreshed");
        assert_eq!(fresh.access_token, "new-access");
        assert_eq!(fresh.expires_in, Some(3599));
        assert_eq!(fresh.refresh_token, None);
    }
}
