pub mod identity;

use axum::extract::{ FromRef, FromRequestParts };
use axum::http::{ header, request::Parts, HeaderMap };
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{ decode, encode, DecodingKey, EncodingKey, Header, Validation };
use log::debug;
use serde::{ Deserialize, Serialize };
use thiserror::Error;

use crate::errors::Error;
use crate::models::user::User;

pub const SESSION_COOKIE: &str = "ukoro_session";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session token is malformed: {0}")]
    Malformed(jsonwebtoken::errors::Error),

    #[error("Session token signature does not match")]
    BadSignature,

    #[error("Session token has expired")]
    Expired,

    #[error("Session token could not be signed: {0}")]
    Signing(jsonwebtoken::errors::Error),
}

impl From<jsonwebtoken::errors::Error> for SessionError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => SessionError::Expired,
            ErrorKind::InvalidSignature => SessionError::BadSignature,
            _ => SessionError::Malformed(err),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    sub: String,
    user: User,
    exp: i64,
    iat: i64,
}

/// Issues and checks HS256 session JWTs.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl_secs: i64,
    cookie_secure: bool,
}

impl SessionKeys {
    pub fn new(secret: impl AsRef<[u8]>, ttl_secs: u64, cookie_secure: bool) -> Self {
        let mut validation = Validation::default();
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret.as_ref()),
            decoding: DecodingKey::from_secret(secret.as_ref()),
            validation,
            ttl_secs: i64::try_from(ttl_secs).unwrap_or(i64::MAX),
            cookie_secure,
        }
    }

    pub fn issue(&self, user: &User) -> Result<String, SessionError> {
        let exp = Utc::now().timestamp().saturating_add(self.ttl_secs);
        self.issue_until(user, exp)
    }

    fn issue_until(&self, user: &User, exp: i64) -> Result<String, SessionError> {
        let claims = SessionClaims {
            sub: user.id.clone(),
            user: user.clone(),
            exp,
            iat: Utc::now().timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding).map_err(SessionError::Signing)
    }

    pub fn verify(&self, token: &str) -> Result<SessionContext, SessionError> {
        let data = decode::<SessionClaims>(token, &self.decoding, &self.validation)?;
        Ok(SessionContext {
            user: data.claims.user,
            expires_at: data.claims.exp,
        })
    }

    pub fn cookie(&self, token: &str) -> String {
        format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
            SESSION_COOKIE,
            token,
            self.ttl_secs,
            if self.cookie_secure { "; Secure" } else { "" }
        )
    }

    pub fn clear_cookie(&self) -> String {
        format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE)
    }
}

/// The signed-in user, extracted per request. Handlers that need identity take this
/// as an argument; requests without a valid session are answered with 401.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user: User,
    /// Unix seconds after which the session, and everything held for it, is gone.
    pub expires_at: i64,
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

fn cookie_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|c| c.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value)
}

/// Bearer token first, then the session cookie. Invalid or expired tokens count as absent.
pub fn session_from_headers(headers: &HeaderMap, keys: &SessionKeys) -> Option<SessionContext> {
    let token = bearer_token(headers).or_else(|| cookie_token(headers))?;
    match keys.verify(token) {
        Ok(session) => Some(session),
        Err(e) => {
            debug!("Ignoring session token: {}", e);
            None
        }
    }
}

impl<S> FromRequestParts<S> for SessionContext where S: Send + Sync, SessionKeys: FromRef<S> {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = SessionKeys::from_ref(state);
        session_from_headers(&parts.headers, &keys).ok_or(Error::Unauthenticated)
    }
}
