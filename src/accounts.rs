use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{
    auth::{generate_code, hash_password, new_id, verify_password},
    error::{ApiError, ApiResult},
    identity::Provider,
    models::{UserProfile, UserRow, ROLE_USER},
    state::AppState,
};

const CODE_TTL_MINUTES: i64 = 15;

const USER_COLUMNS: &str = r#"id, name, surname, email, phone_num, password_hash, role, enabled,
       verification_code, verification_expires_at, reset_code, reset_expires_at, created_at"#;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub name: String,
    pub surname: String,
    pub email: String,
    #[serde(default)]
    pub phone_num: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupResponse {
    pub user_id: String,
    pub name: String,
    pub surname: String,
    pub email: String,
    pub phone_num: String,
    pub role: String,
    /// Verification code for password signups, reset code for OAuth signups.
    pub code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub name: String,
    pub surname: String,
    pub email: String,
    #[serde(default)]
    pub phone_num: String,
}

fn pattern(cell: &'static OnceLock<Option<Regex>>, source: &str, value: &str) -> bool {
    cell.get_or_init(|| Regex::new(source).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(value))
}

fn valid_name(value: &str) -> bool {
    static NAME: OnceLock<Option<Regex>> = OnceLock::new();
    pattern(&NAME, r"^[\p{L}][\p{L} '\-]{0,49}$", value)
}

fn valid_email(value: &str) -> bool {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    value.len() <= 100 && pattern(&EMAIL, r"^[^\s@]+@[^\s@]+\.[^\s@]+$", value)
}

fn valid_phone(value: &str) -> bool {
    static PHONE: OnceLock<Option<Regex>> = OnceLock::new();
    pattern(&PHONE, r"^\+?[0-9]{7,15}$", value)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn password_problem(password: &str) -> Option<&'static str> {
    let length = password.chars().count();
    if length < 8 {
        Some("Password must be at least 8 characters")
    } else if length > 100 {
        Some("Password cannot exceed 100 characters")
    } else {
        None
    }
}

/// Field problems for a profile, in form order. Empty phone numbers are
/// allowed because OAuth accounts start without one.
pub fn profile_problems(name: &str, surname: &str, email: &str, phone_num: &str) -> Vec<String> {
    let mut problems = Vec::new();
    if !valid_name(name.trim()) {
        problems.push("Name may only contain letters, spaces, hyphens and apostrophes (max 50)".to_string());
    }
    if !valid_name(surname.trim()) {
        problems.push("Surname may only contain letters, spaces, hyphens and apostrophes (max 50)".to_string());
    }
    if !valid_email(email.trim()) {
        problems.push("Email must be a valid address".to_string());
    }
    let phone = phone_num.trim();
    if !phone.is_empty() && !valid_phone(phone) {
        problems.push("Phone number must contain 7 to 15 digits".to_string());
    }
    problems
}

/// Like [`profile_problems`], except that a password signup must give a phone number.
pub fn signup_problems(request: &SignupRequest) -> Vec<String> {
    let mut problems = profile_problems(
        &request.name,
        &request.surname,
        &request.email,
        &request.phone_num,
    );
    if request.phone_num.trim().is_empty() {
        problems.push("Phone number is required".to_string());
    }
    if let Some(problem) = password_problem(&request.password) {
        problems.push(problem.to_string());
    }
    problems
}

fn expiry_from_now() -> String {
    (Utc::now() + Duration::minutes(CODE_TTL_MINUTES)).to_rfc3339()
}

fn has_expired(expires_at: Option<&str>) -> bool {
    match expires_at.and_then(|raw| DateTime::parse_from_rfc3339(raw).ok()) {
        Some(expires) => expires.with_timezone(&Utc) < Utc::now(),
        None => true,
    }
}

pub async fn find_by_email(pool: &SqlitePool, email: &str) -> Result<Option<UserRow>, sqlx::Error> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ? LIMIT 1");
    sqlx::query_as::<_, UserRow>(&query)
        .bind(normalize_email(email))
        .fetch_optional(pool)
        .await
}

pub async fn find_by_id(pool: &SqlitePool, user_id: &str) -> Result<Option<UserRow>, sqlx::Error> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ? LIMIT 1");
    sqlx::query_as::<_, UserRow>(&query)
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

async fn require_user(pool: &SqlitePool, email: &str) -> ApiResult<UserRow> {
    find_by_email(pool, email)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))
}

async fn ensure_email_free(pool: &SqlitePool, email: &str) -> ApiResult<()> {
    if find_by_email(pool, email).await?.is_some() {
        return Err(ApiError::conflict(format!("Email '{email}' is already registered")));
    }
    Ok(())
}

pub async fn signup(pool: &SqlitePool, request: SignupRequest) -> ApiResult<SignupResponse> {
    let problems = signup_problems(&request);
    if !problems.is_empty() {
        return Err(ApiError::bad_request(problems.join("; ")));
    }

    let email = normalize_email(&request.email);
    ensure_email_free(pool, &email).await?;

    let password_hash = hash_password(&request.password)
        .map_err(|err| ApiError::Internal(format!("password hash failed: {err}")))?;
    let user_id = new_id();
    let code = generate_code();

    sqlx::query(
        r#"INSERT INTO users (id, name, surname, email, phone_num, password_hash, role, enabled,
                              verification_code, verification_expires_at, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)"#,
    )
    .bind(&user_id)
    .bind(request.name.trim())
    .bind(request.surname.trim())
    .bind(&email)
    .bind(request.phone_num.trim())
    .bind(password_hash)
    .bind(ROLE_USER)
    .bind(&code)
    .bind(expiry_from_now())
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    log::info!("Verification code for {email}: {code}");

    Ok(SignupResponse {
        user_id,
        name: request.name.trim().to_string(),
        surname: request.surname.trim().to_string(),
        email,
        phone_num: request.phone_num.trim().to_string(),
        role: ROLE_USER.to_string(),
        code,
    })
}

pub async fn verify(pool: &SqlitePool, email: &str, code: &str) -> ApiResult<()> {
    let user = require_user(pool, email).await?;
    if has_expired(user.verification_expires_at.as_deref()) {
        return Err(ApiError::bad_request("Verification code has expired"));
    }
    if user.verification_code.as_deref() != Some(code.trim()) {
        return Err(ApiError::bad_request("Invalid verification code"));
    }

    sqlx::query(
        r#"UPDATE users SET enabled = 1, verification_code = NULL, verification_expires_at = NULL
           WHERE id = ?"#,
    )
    .bind(&user.id)
    .execute(pool)
    .await?;

    log::info!("Account {} verified", user.email);
    Ok(())
}

/// Issues a fresh verification code and returns it.
pub async fn resend_verification(pool: &SqlitePool, email: &str) -> ApiResult<String> {
    let user = require_user(pool, email).await?;
    if user.enabled {
        return Err(ApiError::bad_request("Account is already verified"));
    }

    let code = generate_code();
    sqlx::query("UPDATE users SET verification_code = ?, verification_expires_at = ? WHERE id = ?")
        .bind(&code)
        .bind(expiry_from_now())
        .bind(&user.id)
        .execute(pool)
        .await?;

    log::info!("Verification code for {}: {code}", user.email);
    Ok(code)
}

pub async fn login(state: &AppState, email: &str, password: &str) -> ApiResult<LoginResponse> {
    let user = find_by_email(&state.db, email)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid email or password"))?;
    if !user.enabled {
        return Err(ApiError::bad_request("Account not verified. Please verify your account"));
    }
    if !verify_password(password, &user.password_hash) {
        return Err(ApiError::unauthorized("Invalid email or password"));
    }
    issue_session(state, &user)
}

fn issue_session(state: &AppState, user: &UserRow) -> ApiResult<LoginResponse> {
    Ok(LoginResponse {
        token: state.tokens.issue(user)?,
        expires_in: state.tokens.expires_in_ms(),
    })
}

fn parse_provider(raw: &str) -> ApiResult<Provider> {
    Provider::parse(raw).ok_or_else(|| ApiError::bad_request("Invalid provider"))
}

/// Creates an enabled account from an identity-provider profile. The random
/// password is never shown; the returned reset code lets the user set one.
pub async fn oauth_signup(state: &AppState, provider: &str, access_token: &str) -> ApiResult<SignupResponse> {
    let provider = parse_provider(provider)?;
    let profile = state.identity.fetch_profile(provider, access_token).await?;

    let email = normalize_email(&profile.email);
    ensure_email_free(&state.db, &email).await?;

    let password_hash = hash_password(&new_id())
        .map_err(|err| ApiError::Internal(format!("password hash failed: {err}")))?;
    let user_id = new_id();
    let reset_code = generate_code();

    sqlx::query(
        r#"INSERT INTO users (id, name, surname, email, phone_num, password_hash, role, enabled,
                              reset_code, reset_expires_at, created_at)
           VALUES (?, ?, ?, ?, '', ?, ?, 1, ?, ?, ?)"#,
    )
    .bind(&user_id)
    .bind(profile.given_name.trim())
    .bind(profile.family_name.trim())
    .bind(&email)
    .bind(password_hash)
    .bind(ROLE_USER)
    .bind(&reset_code)
    .bind(expiry_from_now())
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db)
    .await?;

    log::info!("Created {} account for {email}", provider.as_str());

    Ok(SignupResponse {
        user_id,
        name: profile.given_name.trim().to_string(),
        surname: profile.family_name.trim().to_string(),
        email,
        phone_num: String::new(),
        role: ROLE_USER.to_string(),
        code: reset_code,
    })
}

pub async fn oauth_authenticate(state: &AppState, provider: &str, access_token: &str) -> ApiResult<LoginResponse> {
    let provider = parse_provider(provider)?;
    let profile = state.identity.fetch_profile(provider, access_token).await?;
    let user = find_by_email(&state.db, &profile.email)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found. Please sign up first."))?;
    if !user.enabled {
        return Err(ApiError::bad_request("Account not verified. Please verify your account"));
    }
    issue_session(state, &user)
}

/// Signs in with a provider token, creating the account on first use.
pub async fn oauth_continue(state: &AppState, provider: &str, access_token: &str) -> ApiResult<LoginResponse> {
    match oauth_authenticate(state, provider, access_token).await {
        Err(ApiError::NotFound(_)) => {
            oauth_signup(state, provider, access_token).await?;
            oauth_authenticate(state, provider, access_token).await
        }
        other => other,
    }
}

/// Stores a reset code. There is no outbound mail, so the code goes to the log.
pub async fn request_password_reset(pool: &SqlitePool, email: &str) -> ApiResult<()> {
    let user = require_user(pool, email).await?;
    let code = generate_code();
    sqlx::query("UPDATE users SET reset_code = ?, reset_expires_at = ? WHERE id = ?")
        .bind(&code)
        .bind(expiry_from_now())
        .bind(&user.id)
        .execute(pool)
        .await?;
    log::info!("Password reset code for {}: {code}", user.email);
    Ok(())
}

pub async fn reset_password(pool: &SqlitePool, email: &str, code: &str, new_password: &str) -> ApiResult<()> {
    let user = require_user(pool, email).await?;
    if has_expired(user.reset_expires_at.as_deref()) {
        return Err(ApiError::bad_request("Reset code has expired"));
    }
    if user.reset_code.as_deref() != Some(code.trim()) {
        return Err(ApiError::bad_request("Invalid reset code"));
    }
    if let Some(problem) = password_problem(new_password) {
        return Err(ApiError::bad_request(problem));
    }

    let password_hash = hash_password(new_password)
        .map_err(|err| ApiError::Internal(format!("password hash failed: {err}")))?;
    sqlx::query(
        r#"UPDATE users SET password_hash = ?, reset_code = NULL, reset_expires_at = NULL, enabled = 1
           WHERE id = ?"#,
    )
    .bind(password_hash)
    .bind(&user.id)
    .execute(pool)
    .await?;

    log::info!("Password reset for {}", user.email);
    Ok(())
}

pub async fn profile(pool: &SqlitePool, user_id: &str) -> ApiResult<UserProfile> {
    find_by_id(pool, user_id)
        .await?
        .map(UserProfile::from)
        .ok_or_else(|| ApiError::not_found("User not found"))
}

pub async fn update_profile(pool: &SqlitePool, user_id: &str, update: ProfileUpdate) -> ApiResult<UserProfile> {
    let problems = profile_problems(&update.name, &update.surname, &update.email, &update.phone_num);
    if !problems.is_empty() {
        return Err(ApiError::bad_request(problems.join("; ")));
    }

    let current = find_by_id(pool, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    let email = normalize_email(&update.email);
    if email != current.email {
        ensure_email_free(pool, &email).await?;
    }

    sqlx::query("UPDATE users SET name = ?, surname = ?, email = ?, phone_num = ? WHERE id = ?")
        .bind(update.name.trim())
        .bind(update.surname.trim())
        .bind(&email)
        .bind(update.phone_num.trim())
        .bind(user_id)
        .execute(pool)
        .await?;

    profile(pool, user_id).await
}
