use std::{
    future::{ready, Ready},
    sync::Arc,
};

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::{
    body::BoxBody,
    dev::{Payload, ServiceRequest, ServiceResponse},
    error::ErrorUnauthorized,
    http::header::{self, Header},
    middleware::Next,
    web, Error, FromRequest, HttpMessage, HttpRequest, HttpResponse,
};
use actix_web_httpauth::{
    extractors::basic::BasicAuth,
    headers::authorization::{Authorization, Bearer},
};
use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header as JwtHeader, Validation};
use rand::Rng;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    models::{UserRow, ROLE_ADMIN},
    state::AppState,
};

pub const AUTH_REALM: &str = "Salonbook";
const LOGOUT_COOKIE: &str = "salonbook_logged_out";

#[derive(Clone, Debug)]
pub struct AuthUser {
    pub id: String,
    pub display_name: String,
    pub email: String,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role.eq_ignore_ascii_case(ROLE_ADMIN)
    }
}

impl From<&UserRow> for AuthUser {
    fn from(user: &UserRow) -> Self {
        Self {
            id: user.id.clone(),
            display_name: user.full_name(),
            email: user.email.clone(),
            role: user.role.clone(),
        }
    }
}

pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let parsed_hash = PasswordHash::new(password_hash);
    match parsed_hash {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Six-digit code used for account verification and password resets.
pub fn generate_code() -> String {
    rand::rngs::OsRng.gen_range(100_000..1_000_000).to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub name: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Clone)]
pub struct TokenKeys {
    inner: Arc<TokenKeysInner>,
}

struct TokenKeysInner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenKeys {
    pub fn new(secret: &str, ttl_minutes: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        Self {
            inner: Arc::new(TokenKeysInner {
                encoding: EncodingKey::from_secret(secret.as_bytes()),
                decoding: DecodingKey::from_secret(secret.as_bytes()),
                validation,
                ttl: Duration::minutes(ttl_minutes.max(1)),
            }),
        }
    }

    /// Token lifetime in milliseconds, as reported to clients in `expiresIn`.
    pub fn expires_in_ms(&self) -> i64 {
        self.inner.ttl.num_milliseconds()
    }

    pub fn issue(&self, user: &UserRow) -> Result<String, ApiError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user.id.clone(),
            email: user.email.clone(),
            name: user.full_name(),
            role: user.role.clone(),
            iat: now.timestamp(),
            exp: (now + self.inner.ttl).timestamp(),
        };
        encode(&JwtHeader::new(Algorithm::HS256), &claims, &self.inner.encoding)
            .map_err(|err| ApiError::Internal(format!("token generation failed: {err}")))
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.inner.decoding, &self.inner.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    ApiError::unauthorized("Session expired. Please log in again.")
                }
                _ => ApiError::unauthorized("Invalid token"),
            })
    }
}

fn bearer_user(req: &HttpRequest) -> Result<AuthUser, ApiError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| ApiError::Internal("application state missing".to_string()))?;
    let auth = Authorization::<Bearer>::parse(req)
        .map_err(|_| ApiError::unauthorized("Missing bearer token"))?;
    let bearer = auth.into_scheme();
    let claims = state.tokens.verify(bearer.token())?;
    Ok(AuthUser {
        id: claims.sub,
        display_name: claims.name,
        email: claims.email,
        role: claims.role,
    })
}

/// Any signed-in API caller.
pub struct ApiUser(pub AuthUser);

impl FromRequest for ApiUser {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(bearer_user(req).map(ApiUser))
    }
}

/// An API caller holding the admin role.
pub struct ApiAdmin(pub AuthUser);

impl FromRequest for ApiAdmin {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(bearer_user(req).and_then(|user| {
            if user.is_admin() {
                Ok(ApiAdmin(user))
            } else {
                Err(ApiError::forbidden("Admin access required"))
            }
        }))
    }
}

async fn authenticate(req: &ServiceRequest, credentials: &BasicAuth) -> Result<AuthUser, Error> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| ErrorUnauthorized("Unauthorized"))?;
    let email = credentials.user_id();
    let password = credentials.password().unwrap_or_default();
    authenticate_credentials(state, email, password)
        .await
        .map(|user| AuthUser::from(&user))
        .ok_or_else(|| ErrorUnauthorized("Unauthorized"))
}

/// Looks the user up by email and checks the password. Accounts that were
/// never verified cannot sign in.
pub async fn authenticate_credentials(
    state: &AppState,
    email: &str,
    password: &str,
) -> Option<UserRow> {
    let user = crate::accounts::find_by_email(&state.db, email)
        .await
        .ok()
        .flatten()?;

    if !user.enabled || !verify_password(password, &user.password_hash) {
        return None;
    }

    Some(user)
}

pub async fn basic_validator(
    req: ServiceRequest,
    credentials: BasicAuth,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    match authenticate(&req, &credentials).await {
        Ok(user) => {
            req.extensions_mut().insert(user);
            Ok(req)
        }
        Err(err) => Err((err, req)),
    }
}

pub async fn admin_validator(
    req: ServiceRequest,
    credentials: BasicAuth,
) -> Result<ServiceRequest, (Error, ServiceRequest)> {
    match authenticate(&req, &credentials).await {
        Ok(user) => {
            if !user.is_admin() {
                return Err((ErrorUnauthorized("Admin access required"), req));
            }
            req.extensions_mut().insert(user);
            Ok(req)
        }
        Err(err) => Err((err, req)),
    }
}

pub fn logout_cookie(req: &HttpRequest) -> Cookie<'static> {
    let mut builder = Cookie::build(LOGOUT_COOKIE, "1")
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::days(365));
    if req.connection_info().scheme() == "https" {
        builder = builder.secure(true);
    }
    builder.finish()
}

pub fn clear_logout_cookie(req: &HttpRequest) -> Cookie<'static> {
    let mut builder = Cookie::build(LOGOUT_COOKIE, "")
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::seconds(0));
    if req.connection_info().scheme() == "https" {
        builder = builder.secure(true);
    }
    builder.finish()
}

pub fn is_logged_out(req: &HttpRequest) -> bool {
    req.cookie(LOGOUT_COOKIE).is_some()
}

/// Browsers keep replaying Basic credentials; after `/logout` the cookie makes
/// protected pages answer 401 until the user logs in again.
pub async fn logout_guard<B>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<BoxBody>, Error>
where
    B: actix_web::body::MessageBody + 'static,
{
    if is_logged_out(req.request()) {
        let login_target = if req.path().starts_with("/admin") {
            "/admin/dashboard"
        } else {
            "/account"
        };
        let body = format!(
            r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Logged out</title>
    <link rel="stylesheet" href="/static/app.css" />
  </head>
  <body>
    <main class="card narrow">
      <h1>You're logged out</h1>
      <p>Your session has been closed.</p>
      <p><a href="/login?next={login_target}">Log in again</a> or <a href="/">return to the services</a>.</p>
    </main>
  </body>
</html>"#
        );
        let response = HttpResponse::Unauthorized()
            .insert_header((header::CACHE_CONTROL, "no-store"))
            .content_type("text/html; charset=utf-8")
            .body(body);
        return Ok(req.into_response(response));
    }

    let res = next.call(req).await?;
    Ok(res.map_into_boxed_body())
}
