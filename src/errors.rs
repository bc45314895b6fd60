use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{ IntoResponse, Response },
    Json,
};
use log::error;
use serde::{ Deserialize, Serialize };
use thiserror::Error as ThisError;

use crate::analyzer::AnalysisError;
use crate::config::tools::ToolError;
use crate::models::media::MediaError;
use crate::session::identity::IdentityError;
use crate::workspace::WorkspaceError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// No valid session on a gated route
    #[error("Sign in required")]
    Unauthenticated,

    #[error("{message}")]
    BadRequest { message: String },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("{message}")]
    Conflict { message: String },

    #[error("{message}")]
    PayloadTooLarge { message: String },

    #[error("Too many requests, try again shortly")]
    RateLimited,

    /// Remote analysis failed; detail is logged, never returned
    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("Failed to {operation}")]
    Internal { operation: String },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl From<ToolError> for Error {
    fn from(err: ToolError) -> Self {
        match err {
            ToolError::UnknownTool(name) => Error::NotFound { resource: format!("Tool '{}'", name) },
            other => {
                error!("Tool registry error: {}", other);
                Error::Internal { operation: "load tool configuration".into() }
            }
        }
    }
}

impl From<JsonRejection> for Error {
    fn from(rejection: JsonRejection) -> Self {
        Error::BadRequest { message: rejection.body_text() }
    }
}

impl From<MediaError> for Error {
    fn from(err: MediaError) -> Self {
        Error::BadRequest { message: err.to_string() }
    }
}

impl From<WorkspaceError> for Error {
    fn from(err: WorkspaceError) -> Self {
        Error::Conflict { message: err.to_string() }
    }
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated => StatusCode::UNAUTHORIZED,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Error::Analysis(e) =>
                match e {
                    AnalysisError::InvalidMedia(_) | AnalysisError::InvalidInput(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    _ => StatusCode::BAD_GATEWAY,
                }
            Error::Identity(e) =>
                match e {
                    IdentityError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
                    IdentityError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::BAD_GATEWAY,
                }
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a user-safe error message, without leaking remote or internal details
    pub fn user_message(&self) -> String {
        match self {
            Error::Analysis(AnalysisError::InvalidMedia(e)) => e.to_string(),
            Error::Analysis(AnalysisError::InvalidInput(message)) => message.clone(),
            Error::Analysis(_) => "Analysis failed".to_string(),
            Error::Identity(IdentityError::InvalidToken(_)) => "Sign-in failed".to_string(),
            Error::Identity(_) => "Sign-in is unavailable".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed with {}: {}", status, self);
        }
        (status, Json(ErrorBody { error: self.user_message() })).into_response()
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
