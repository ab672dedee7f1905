use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::{db::split_name, error::ApiError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Google,
    Facebook,
}

impl Provider {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "google" => Some(Provider::Google),
            "facebook" => Some(Provider::Facebook),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Facebook => "facebook",
        }
    }
}

/// Profile fields the account flows need from an identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityProfile {
    pub email: String,
    pub given_name: String,
    pub family_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Invalid or expired access token")]
    InvalidToken,
    #[error("The identity provider did not share an email address")]
    MissingEmail,
    #[error("identity provider request failed: {0}")]
    Transport(String),
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::InvalidToken => ApiError::unauthorized(err.to_string()),
            IdentityError::MissingEmail => ApiError::bad_request(err.to_string()),
            IdentityError::Transport(detail) => {
                log::error!("Identity provider unavailable: {detail}");
                ApiError::Internal(detail)
            }
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Validates `access_token` with the provider and returns the profile it
    /// belongs to.
    async fn fetch_profile(
        &self,
        provider: Provider,
        access_token: &str,
    ) -> Result<IdentityProfile, IdentityError>;
}

pub struct HttpIdentityProvider {
    client: Client,
    google_userinfo_url: String,
    facebook_graph_base: String,
}

impl HttpIdentityProvider {
    pub fn new(google_userinfo_url: impl Into<String>, facebook_graph_base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            google_userinfo_url: google_userinfo_url.into(),
            facebook_graph_base: facebook_graph_base.into().trim_end_matches('/').to_string(),
        }
    }

    async fn google(&self, access_token: &str) -> Result<IdentityProfile, IdentityError> {
        let response = self
            .client
            .get(&self.google_userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|err| IdentityError::Transport(err.to_string()))?;

        let info: GoogleUserInfo = read_json(response).await?;
        let email = info.email.filter(|email| !email.trim().is_empty());
        let Some(email) = email else {
            return Err(IdentityError::MissingEmail);
        };

        let (fallback_given, fallback_family) = split_name(info.name.as_deref().unwrap_or_default());
        Ok(IdentityProfile {
            email,
            given_name: info.given_name.unwrap_or(fallback_given),
            family_name: info.family_name.unwrap_or(fallback_family),
        })
    }

    async fn facebook(&self, access_token: &str) -> Result<IdentityProfile, IdentityError> {
        let url = format!("{}/me", self.facebook_graph_base);
        let response = self
            .client
            .get(url)
            .query(&[
                ("fields", "id,name,first_name,last_name,email"),
                ("access_token", access_token),
            ])
            .send()
            .await
            .map_err(|err| IdentityError::Transport(err.to_string()))?;

        let info: FacebookProfile = read_json(response).await?;
        let email = info.email.filter(|email| !email.trim().is_empty());
        let Some(email) = email else {
            return Err(IdentityError::MissingEmail);
        };

        let (fallback_given, fallback_family) = split_name(info.name.as_deref().unwrap_or_default());
        Ok(IdentityProfile {
            email,
            given_name: info.first_name.unwrap_or(fallback_given),
            family_name: info.last_name.unwrap_or(fallback_family),
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn fetch_profile(
        &self,
        provider: Provider,
        access_token: &str,
    ) -> Result<IdentityProfile, IdentityError> {
        if access_token.trim().is_empty() {
            return Err(IdentityError::InvalidToken);
        }
        match provider {
            Provider::Google => self.google(access_token).await,
            Provider::Facebook => self.facebook(access_token).await,
        }
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, IdentityError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::BAD_REQUEST || status == StatusCode::FORBIDDEN {
        return Err(IdentityError::InvalidToken);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(IdentityError::Transport(format!("status {status}: {body}")));
    }
    response
        .json::<T>()
        .await
        .map_err(|err| IdentityError::Transport(format!("unreadable profile: {err}")))
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    email: Option<String>,
    name: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FacebookProfile {
    email: Option<String>,
    name: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
}
