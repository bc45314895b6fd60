use async_trait::async_trait;
use log::{ info, warn };
use reqwest::StatusCode;
use serde::{ Deserialize, Serialize };
use thiserror::Error;

use crate::models::user::User;

pub const DEFAULT_IDENTITY_BASE_URL: &str = "https://identitytoolkit.googleapis.com";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Identity provider is not configured")]
    NotConfigured,

    #[error("Invalid identity token: {0}")]
    InvalidToken(String),

    #[error("Identity provider request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Identity provider returned {status}: {message}")]
    Upstream { status: StatusCode, message: String },
}

/// Exchanges a client-obtained ID token for the user's profile.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, id_token: &str) -> Result<User, IdentityError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest<'a> {
    id_token: &'a str,
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<FirebaseUser>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FirebaseUser {
    local_id: String,
    display_name: Option<String>,
    photo_url: Option<String>,
}

#[derive(Deserialize)]
struct FirebaseErrorEnvelope {
    error: FirebaseErrorBody,
}

#[derive(Deserialize)]
struct FirebaseErrorBody {
    message: String,
}

/// Firebase Authentication `accounts:lookup`, which validates the ID token server side.
pub struct FirebaseIdentityProvider {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl FirebaseIdentityProvider {
    pub fn new(api_key: Option<String>, base_url: Option<String>) -> Self {
        let api_key = api_key.filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!("FIREBASE_API_KEY is not set. Sign-in will be rejected.");
        }
        let base_url = base_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_IDENTITY_BASE_URL.to_string());
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl IdentityProvider for FirebaseIdentityProvider {
    async fn verify(&self, id_token: &str) -> Result<User, IdentityError> {
        let api_key = self.api_key.as_deref().ok_or(IdentityError::NotConfigured)?;
        if id_token.trim().is_empty() {
            return Err(IdentityError::InvalidToken("token is empty".into()));
        }

        let url = format!("{}/v1/accounts:lookup", self.base_url);
        let resp = self.http
            .post(&url)
            .query(&[("key", api_key)])
            .json(&(LookupRequest { id_token }))
            .send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = serde_json
                ::from_str::<FirebaseErrorEnvelope>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            if status == StatusCode::BAD_REQUEST {
                return Err(IdentityError::InvalidToken(message));
            }
            return Err(IdentityError::Upstream { status, message });
        }

        let lookup: LookupResponse = resp.json().await?;
        let user = lookup.users
            .into_iter()
            .next()
            .ok_or_else(|| IdentityError::InvalidToken("no account for token".into()))?;

        info!("Identity verified for user {}", user.local_id);
        Ok(User {
            id: user.local_id,
            display_name: user.display_name,
            avatar_url: user.photo_url,
        })
    }
}
