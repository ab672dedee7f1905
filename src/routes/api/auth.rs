use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::{
    accounts::{self, SignupRequest},
    auth::ApiUser,
    error::ApiResult,
    state::AppState,
};

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenBody {
    access_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OAuthBody {
    provider: String,
    access_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyBody {
    email: String,
    verification_code: String,
}

#[derive(Deserialize)]
struct EmailQuery {
    email: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResetBody {
    email: String,
    code: String,
    new_password: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/auth")
            .route("/signup", web::post().to(signup))
            .route("/signup/google", web::post().to(signup_google))
            .route("/signup/facebook", web::post().to(signup_facebook))
            .route("/login", web::post().to(login))
            .route("/oauth/authenticate", web::post().to(oauth_authenticate))
            .route("/facebook", web::post().to(facebook))
            .route("/verify", web::post().to(verify))
            .route("/resend", web::post().to(resend))
            .route("/pwdresetmail", web::post().to(request_reset))
            .route("/pwdreset", web::post().to(reset))
            .route("/session", web::get().to(session)),
    );
}

async fn signup(state: web::Data<AppState>, body: web::Json<SignupRequest>) -> ApiResult<HttpResponse> {
    let created = accounts::signup(&state.db, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(created))
}

async fn signup_google(state: web::Data<AppState>, body: web::Json<TokenBody>) -> ApiResult<HttpResponse> {
    let created = accounts::oauth_signup(&state, "google", &body.access_token).await?;
    Ok(HttpResponse::Created().json(created))
}

async fn signup_facebook(state: web::Data<AppState>, body: web::Json<TokenBody>) -> ApiResult<HttpResponse> {
    let created = accounts::oauth_signup(&state, "facebook", &body.access_token).await?;
    Ok(HttpResponse::Created().json(created))
}

async fn login(state: web::Data<AppState>, body: web::Json<LoginBody>) -> ApiResult<HttpResponse> {
    let session = accounts::login(&state, &body.email, &body.password).await?;
    Ok(HttpResponse::Ok().json(session))
}

async fn oauth_authenticate(state: web::Data<AppState>, body: web::Json<OAuthBody>) -> ApiResult<HttpResponse> {
    let session = accounts::oauth_authenticate(&state, &body.provider, &body.access_token).await?;
    Ok(HttpResponse::Ok().json(session))
}

async fn facebook(state: web::Data<AppState>, body: web::Json<TokenBody>) -> ApiResult<HttpResponse> {
    let session = accounts::oauth_continue(&state, "facebook", &body.access_token).await?;
    Ok(HttpResponse::Ok().json(session))
}

async fn verify(state: web::Data<AppState>, body: web::Json<VerifyBody>) -> ApiResult<HttpResponse> {
    accounts::verify(&state.db, &body.email, &body.verification_code).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Account verified successfully" })))
}

async fn resend(state: web::Data<AppState>, query: web::Query<EmailQuery>) -> ApiResult<HttpResponse> {
    accounts::resend_verification(&state.db, &query.email).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Verification code sent" })))
}

async fn request_reset(state: web::Data<AppState>, query: web::Query<EmailQuery>) -> ApiResult<HttpResponse> {
    accounts::request_password_reset(&state.db, &query.email).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Password reset code has been issued" })))
}

async fn reset(state: web::Data<AppState>, body: web::Json<ResetBody>) -> ApiResult<HttpResponse> {
    accounts::reset_password(&state.db, &body.email, &body.code, &body.new_password).await?;
    Ok(HttpResponse::Ok().json(json!({ "message": "Password has been set successfully" })))
}

/// Answers 200 while the bearer token is present, well-formed and unexpired.
async fn session(user: ApiUser) -> HttpResponse {
    let user = user.0;
    HttpResponse::Ok().json(json!({
        "valid": true,
        "userId": user.id,
        "email": user.email,
        "name": user.display_name,
        "role": user.role,
    }))
}
