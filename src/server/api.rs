use axum::{
    extract::{ rejection::JsonRejection, DefaultBodyLimit, FromRef, Multipart, Path, State },
    http::{ header, HeaderMap, StatusCode },
    response::{ IntoResponse, Response },
    routing::{ get, post },
    Json,
    Router,
};
use governor::{ clock::DefaultClock, state::{ InMemoryState, NotKeyed }, Quota, RateLimiter };
use log::{ error, info, warn };
use serde::{ Deserialize, Serialize };
use std::num::NonZeroU32;
use std::sync::Arc;
use tower_http::cors::{ Any, CorsLayer };
use uuid::Uuid;

use crate::analyzer::Analyzer;
use crate::config::tools::{ ToolConfig, ToolKind, ToolRegistry };
use crate::errors::{ Error, Result };
use crate::models::analysis::QueryExchange;
use crate::models::media::{ MediaKind, UploadedMedia };
use crate::models::user::User;
use crate::session::identity::IdentityProvider;
use crate::session::{ session_from_headers, SessionContext, SessionKeys };
use crate::workspace::{ WorkspaceKey, WorkspaceSnapshot, WorkspaceStore };

/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Clone)]
pub struct AppState {
    pub analyzer: Analyzer,
    pub tools: Arc<ToolRegistry>,
    pub workspaces: Arc<WorkspaceStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub session_keys: SessionKeys,
    limiter: Arc<Limiter>,
    max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        analyzer: Analyzer,
        tools: Arc<ToolRegistry>,
        identity: Arc<dyn IdentityProvider>,
        session_keys: SessionKeys,
        rate_limit: NonZeroU32,
        max_upload_bytes: usize
    ) -> Self {
        Self {
            analyzer,
            tools,
            workspaces: Arc::new(WorkspaceStore::new()),
            identity,
            session_keys,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(rate_limit))),
            max_upload_bytes,
        }
    }

    fn tool(&self, name: &str) -> Result<Arc<ToolConfig>> {
        let kind: ToolKind = name.parse()?;
        Ok(self.tools.get(kind)?)
    }

    fn check_rate_limit(&self) -> Result<()> {
        if self.limiter.check().is_err() {
            warn!("Model request rate limit exceeded. Rejecting request.");
            return Err(Error::RateLimited);
        }
        Ok(())
    }
}

impl FromRef<AppState> for SessionKeys {
    fn from_ref(state: &AppState) -> Self {
        state.session_keys.clone()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolSummary {
    name: ToolKind,
    title: String,
    media_kind: MediaKind,
    follow_up: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInRequest {
    pub id_token: String,
}

#[derive(Serialize, Deserialize)]
pub struct SessionResponse {
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpRequest {
    pub analysis_id: Uuid,
    pub question: String,
}

#[derive(Serialize)]
struct FollowUpResponse {
    question: String,
    answer: String,
    exchange: Vec<QueryExchange>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let body_limit = state.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route("/api/tools", get(list_tools))
        .route("/api/session", get(current_session).post(sign_in).delete(sign_out))
        .route("/api/tools/{tool}", get(get_workspace))
        .route("/api/tools/{tool}/analyze", post(analyze))
        .route("/api/tools/{tool}/media", get(get_media))
        .route("/api/tools/{tool}/follow-up", post(follow_up))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

async fn list_tools(State(state): State<AppState>) -> Json<Vec<ToolSummary>> {
    Json(
        state.tools
            .iter()
            .map(|t| ToolSummary {
                name: t.kind,
                title: t.title.clone(),
                media_kind: t.media_kind,
                follow_up: t.follow_up.is_some(),
            })
            .collect()
    )
}

async fn sign_in(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SignInRequest>, JsonRejection>
) -> Result<impl IntoResponse> {
    let Json(req) = payload?;
    let user = state.identity.verify(&req.id_token).await.map_err(|e| {
        warn!("Sign-in rejected: {}", e);
        e
    })?;
    let token = state.session_keys.issue(&user).map_err(|e| {
        error!("Failed to issue session token for {}: {}", user.id, e);
        Error::Internal { operation: "start session".into() }
    })?;
    info!("User {} signed in", user.id);

    let cookie = state.session_keys.cookie(&token);
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(SessionResponse {
            user: Some(user),
            token: Some(token),
        }),
    ))
}

async fn current_session(State(state): State<AppState>, headers: HeaderMap) -> Json<SessionResponse> {
    let user = session_from_headers(&headers, &state.session_keys).map(|s| s.user);
    Json(SessionResponse { user, token: None })
}

async fn sign_out(State(state): State<AppState>, session: SessionContext) -> impl IntoResponse {
    state.workspaces.clear_user(&session.user.id).await;
    info!("User {} signed out", session.user.id);
    (StatusCode::NO_CONTENT, [(header::SET_COOKIE, state.session_keys.clear_cookie())])
}

async fn get_workspace(
    State(state): State<AppState>,
    session: SessionContext,
    Path(tool): Path<String>
) -> Result<Json<WorkspaceSnapshot>> {
    let tool = state.tool(&tool)?;
    let key = WorkspaceKey::new(&session.user.id, tool.kind);
    let snapshot = state.workspaces.with(&key, session.expires_at, |ws| ws.snapshot(&tool)).await;
    Ok(Json(snapshot))
}

async fn get_media(
    State(state): State<AppState>,
    session: SessionContext,
    Path(tool): Path<String>
) -> Result<Response> {
    let tool = state.tool(&tool)?;
    let key = WorkspaceKey::new(&session.user.id, tool.kind);
    let media = state.workspaces
        .with(&key, session.expires_at, |ws| ws.media().cloned()).await
        .ok_or_else(|| Error::NotFound { resource: "Uploaded media".into() })?;

    Ok(([(header::CONTENT_TYPE, media.mime_type().to_string())], media.bytes().clone()).into_response())
}

async fn read_upload(mut multipart: Multipart, max_bytes: usize) -> Result<UploadedMedia> {
    let multipart_error = |e: axum::extract::multipart::MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Error::PayloadTooLarge {
                message: format!("File exceeds the maximum size of {} bytes", max_bytes),
            }
        } else {
            Error::BadRequest { message: format!("Failed to parse multipart data: {}", e) }
        }
    };

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);

        let mut data = Vec::new();
        while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
            if data.len() + chunk.len() > max_bytes {
                warn!(
                    "Upload {:?} exceeds size limit ({} > {})",
                    file_name,
                    data.len() + chunk.len(),
                    max_bytes
                );
                return Err(Error::PayloadTooLarge {
                    message: format!("File exceeds the maximum size of {} bytes", max_bytes),
                });
            }
            data.extend_from_slice(&chunk);
        }

        return Ok(UploadedMedia::new(data, content_type.as_deref(), file_name.as_deref())?);
    }

    Err(Error::BadRequest { message: "Missing multipart field 'file'".into() })
}

async fn analyze(
    State(state): State<AppState>,
    session: SessionContext,
    Path(tool): Path<String>,
    multipart: Multipart
) -> Result<Response> {
    let tool = state.tool(&tool)?;
    let media = read_upload(multipart, state.max_upload_bytes).await?;
    media.ensure_kind(tool.media_kind)?;
    state.check_rate_limit()?;

    let key = WorkspaceKey::new(&session.user.id, tool.kind);
    let expires_at = session.expires_at;
    state.workspaces.with(&key, expires_at, |ws| ws.begin(media.clone())).await?;

    // Detached so a dropped client does not abandon the workspace in `verifying`.
    let task = {
        let analyzer = state.analyzer.clone();
        let workspaces = Arc::clone(&state.workspaces);
        let tool = Arc::clone(&tool);
        let key = key.clone();
        let user_id = session.user.id.clone();
        tokio::spawn(async move {
            let outcome = analyzer.analyze(&tool, &media).await;
            let succeeded = outcome.is_ok();
            match &outcome {
                Ok(result) => info!("Analysis {} for user {} succeeded", result.id, user_id),
                Err(e) => warn!("Analysis with tool '{}' for user {} failed: {}", tool.kind, user_id, e),
            }
            let snapshot = workspaces
                .with(&key, expires_at, |ws| {
                    ws.finish(outcome.ok());
                    ws.snapshot(&tool)
                }).await;
            (succeeded, snapshot)
        })
    };

    let (succeeded, snapshot) = match task.await {
        Ok(done) => done,
        Err(e) => {
            error!("Analysis task failed to complete: {}", e);
            state.workspaces.with(&key, expires_at, |ws| ws.finish(None)).await;
            return Err(Error::Internal { operation: "run analysis".into() });
        }
    };

    let status = if succeeded { StatusCode::OK } else { StatusCode::BAD_GATEWAY };
    Ok((status, Json(snapshot)).into_response())
}

async fn follow_up(
    State(state): State<AppState>,
    session: SessionContext,
    Path(tool): Path<String>,
    payload: std::result::Result<Json<FollowUpRequest>, JsonRejection>
) -> Result<Json<FollowUpResponse>> {
    let Json(req) = payload?;
    let tool = state.tool(&tool)?;
    let key = WorkspaceKey::new(&session.user.id, tool.kind);
    let prior = state.workspaces
        .with(&key, session.expires_at, |ws| ws.current_result(req.analysis_id).cloned()).await?;
    Analyzer::validate_follow_up(&tool, &prior, &req.question)?;
    state.check_rate_limit()?;

    let answer = state.analyzer.follow_up(&tool, &prior, &req.question).await?;
    let question = req.question.trim().to_string();

    let exchange = state.workspaces
        .with(&key, session.expires_at, |ws| {
            ws.record_follow_up(req.analysis_id, question.clone(), answer.clone()).map(|e|
                e.entries().to_vec()
            )
        }).await?;

    Ok(Json(FollowUpResponse { question, answer, exchange }))
}
