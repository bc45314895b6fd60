use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;
use log::{ debug, info };

use crate::config::tools::{ ToolConfig, ToolKind };
use crate::models::analysis::{
    AnalysisResult,
    AnalysisStatus,
    FollowUpExchange,
    QueryExchange,
    RenderedSection,
};
use crate::models::media::{ MediaKind, UploadedMedia };

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkspaceError {
    #[error("An analysis is already in progress")]
    Busy,

    #[error("There is no completed analysis to ask about")]
    NoResult,

    #[error("Analysis {0} is no longer the current one")]
    Stale(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspaceKey {
    pub user_id: String,
    pub tool: ToolKind,
}

impl WorkspaceKey {
    pub fn new(user_id: &str, tool: ToolKind) -> Self {
        Self { user_id: user_id.to_string(), tool }
    }
}

/// The single media/result slot of one tool for one user. Each submission
/// overwrites it.
#[derive(Debug, Default)]
pub struct Workspace {
    status: AnalysisStatus,
    media: Option<UploadedMedia>,
    result: Option<AnalysisResult>,
    exchange: Option<FollowUpExchange>,
    /// Latest expiry of any session that touched this slot, in unix seconds.
    expires_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub file_name: Option<String>,
    pub mime_type: String,
    pub kind: MediaKind,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSnapshot {
    pub tool: ToolKind,
    pub status: AnalysisStatus,
    pub media: Option<MediaInfo>,
    pub result: Option<AnalysisResult>,
    pub sections: Vec<RenderedSection>,
    pub exchange: Vec<QueryExchange>,
}

impl Workspace {
    pub fn status(&self) -> AnalysisStatus {
        self.status
    }

    pub fn media(&self) -> Option<&UploadedMedia> {
        self.media.as_ref()
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        self.result.as_ref()
    }

    /// `idle | success | failure → verifying`. The previous result and its
    /// exchange are dropped.
    pub fn begin(&mut self, media: UploadedMedia) -> Result<(), WorkspaceError> {
        if self.status == AnalysisStatus::Verifying {
            return Err(WorkspaceError::Busy);
        }
        self.status = AnalysisStatus::Verifying;
        self.media = Some(media);
        self.result = None;
        self.exchange = None;
        Ok(())
    }

    /// `verifying → success` with a result, `verifying → failure` without one.
    pub fn finish(&mut self, result: Option<AnalysisResult>) {
        match result {
            Some(result) => {
                self.exchange = Some(FollowUpExchange::new(result.id));
                self.result = Some(result);
                self.status = AnalysisStatus::Success;
            }
            None => {
                self.result = None;
                self.exchange = None;
                self.status = AnalysisStatus::Failure;
            }
        }
    }

    pub fn current_result(&self, analysis_id: Uuid) -> Result<&AnalysisResult, WorkspaceError> {
        let result = self.result.as_ref().ok_or(WorkspaceError::NoResult)?;
        if result.id != analysis_id {
            return Err(WorkspaceError::Stale(analysis_id));
        }
        Ok(result)
    }

    /// Appends one answered question, provided the analysis it belongs to is still current.
    pub fn record_follow_up(
        &mut self,
        analysis_id: Uuid,
        question: String,
        answer: String
    ) -> Result<&FollowUpExchange, WorkspaceError> {
        self.current_result(analysis_id)?;
        let exchange = self.exchange
            .as_mut()
            .filter(|e| e.analysis_id == analysis_id)
            .ok_or(WorkspaceError::Stale(analysis_id))?;
        exchange.push(question, answer);
        Ok(exchange)
    }

    pub fn snapshot(&self, tool: &ToolConfig) -> WorkspaceSnapshot {
        WorkspaceSnapshot {
            tool: tool.kind,
            status: self.status,
            media: self.media.as_ref().map(|m| MediaInfo {
                file_name: m.file_name().map(str::to_string),
                mime_type: m.mime_type().to_string(),
                kind: m.kind(),
                size: m.len(),
            }),
            result: self.result.clone(),
            sections: self.result
                .as_ref()
                .map(|r| r.sections(&tool.sections))
                .unwrap_or_default(),
            exchange: self.exchange
                .as_ref()
                .map(|e| e.entries().to_vec())
                .unwrap_or_default(),
        }
    }
}

/// In-memory workspaces. A slot lives as long as the session that last touched it,
/// and nothing here outlives the process.
#[derive(Default)]
pub struct WorkspaceStore {
    workspaces: Mutex<HashMap<WorkspaceKey, Workspace>>,
}

fn evict(workspaces: &mut HashMap<WorkspaceKey, Workspace>, now: i64) -> usize {
    let before = workspaces.len();
    workspaces.retain(|_, ws| ws.expires_at >= now);
    before - workspaces.len()
}

impl WorkspaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` on the workspace under the lock, extending its lifetime to
    /// `expires_at`. Slots of ended sessions are dropped first. `f` is synchronous
    /// so the lock is never held across a remote call.
    pub async fn with<R>(
        &self,
        key: &WorkspaceKey,
        expires_at: i64,
        f: impl FnOnce(&mut Workspace) -> R
    ) -> R {
        let mut workspaces = self.workspaces.lock().await;
        let evicted = evict(&mut workspaces, Utc::now().timestamp());
        if evicted > 0 {
            debug!("Evicted {} workspace(s) of ended sessions", evicted);
        }
        let workspace = workspaces.entry(key.clone()).or_default();
        workspace.expires_at = workspace.expires_at.max(expires_at);
        f(workspace)
    }

    /// Drops every slot whose session has ended. Returns how many were removed.
    pub async fn evict_expired(&self) -> usize {
        let mut workspaces = self.workspaces.lock().await;
        evict(&mut workspaces, Utc::now().timestamp())
    }

    /// Periodically evicts slots of ended sessions, so idle memory is released
    /// even when no request touches the store.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let evicted = self.evict_expired().await;
                if evicted > 0 {
                    info!("Swept {} workspace(s) of ended sessions", evicted);
                }
            }
        })
    }

    pub async fn slot_count(&self) -> usize {
        self.workspaces.lock().await.len()
    }

    pub async fn clear_user(&self, user_id: &str) {
        let mut workspaces = self.workspaces.lock().await;
        let before = workspaces.len();
        workspaces.retain(|key, _| key.user_id != user_id);
        info!("Discarded {} workspace(s) for user {}", before - workspaces.len(), user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::tool;
    use serde_json::{ json, Map };

    fn png() -> UploadedMedia {
        UploadedMedia::new(vec![1u8, 2, 3], Some("image/png"), Some("a.png")).unwrap()
    }

    fn result() -> AnalysisResult {
        let fields: Map<String, serde_json::Value> = json!({
            "title": "T",
            "shortDescription": "S",
            "summary": "Su",
            "transcription": "Tr"
        })
            .as_object()
            .cloned()
            .unwrap();
        AnalysisResult::new(ToolKind::VideoTranscriber, fields)
    }

    #[test]
    fn verifying_is_exclusive() {
        let mut ws = Workspace::default();
        assert_eq!(ws.status(), AnalysisStatus::Idle);
        ws.begin(png()).unwrap();
        assert_eq!(ws.status(), AnalysisStatus::Verifying);
        assert_eq!(ws.begin(png()), Err(WorkspaceError::Busy));

        ws.finish(None);
        assert_eq!(ws.status(), AnalysisStatus::Failure);
        assert!(ws.result().is_none());
        ws.begin(png()).unwrap();
    }

    #[test]
    fn follow_up_appends_only_to_the_current_analysis() {
        let mut ws = Workspace::default();
        ws.begin(png()).unwrap();
        let first = result();
        let first_id = first.id;
        ws.finish(Some(first));

        let exchange = ws.record_follow_up(first_id, "q1".into(), "a1".into()).unwrap();
        assert_eq!(exchange.len(), 1);

        let other = Uuid::new_v4();
        assert_eq!(
            ws.record_follow_up(other, "q".into(), "a".into()).unwrap_err(),
            WorkspaceError::Stale(other)
        );
        let exchange = ws.record_follow_up(first_id, "q2".into(), "a2".into()).unwrap();
        assert_eq!(exchange.len(), 2);
        assert_eq!(exchange.entries()[1].question, "q2");
    }

    #[test]
    fn new_submission_clears_result_and_exchange() {
        let mut ws = Workspace::default();
        ws.begin(png()).unwrap();
        let first = result();
        let first_id = first.id;
        ws.finish(Some(first));
        ws.record_follow_up(first_id, "q1".into(), "a1".into()).unwrap();

        ws.begin(png()).unwrap();
        assert!(ws.result().is_none());
        assert_eq!(
            ws.record_follow_up(first_id, "q2".into(), "a2".into()).unwrap_err(),
            WorkspaceError::NoResult
        );

        let second = result();
        let second_id = second.id;
        ws.finish(Some(second));
        assert_eq!(
            ws.record_follow_up(first_id, "q2".into(), "a2".into()).unwrap_err(),
            WorkspaceError::Stale(first_id)
        );
        let snapshot = ws.snapshot(&tool(ToolKind::VideoTranscriber));
        assert!(snapshot.exchange.is_empty());
        assert_eq!(snapshot.result.unwrap().id, second_id);
    }

    #[test]
    fn snapshot_renders_sections_and_media_info() {
        let mut ws = Workspace::default();
        ws.begin(png()).unwrap();
        ws.finish(Some(result()));

        let snapshot = ws.snapshot(&tool(ToolKind::VideoTranscriber));
        assert_eq!(snapshot.status, AnalysisStatus::Success);
        assert_eq!(snapshot.sections.len(), 4);
        assert_eq!(snapshot.sections[0].label, "Suggested Title");
        let media = snapshot.media.unwrap();
        assert_eq!(media.size, 3);
        assert_eq!(media.file_name.as_deref(), Some("a.png"));
    }

    fn later() -> i64 {
        Utc::now().timestamp() + 3600
    }

    #[tokio::test]
    async fn store_keeps_users_apart_and_clears_per_user() {
        let store = WorkspaceStore::new();
        let ada = WorkspaceKey::new("ada", ToolKind::XrayScanner);
        let bob = WorkspaceKey::new("bob", ToolKind::XrayScanner);

        store.with(&ada, later(), |ws| ws.begin(png())).await.unwrap();
        assert_eq!(store.with(&bob, later(), |ws| ws.status()).await, AnalysisStatus::Idle);

        store.clear_user("ada").await;
        assert_eq!(store.with(&ada, later(), |ws| ws.status()).await, AnalysisStatus::Idle);
    }

    #[tokio::test]
    async fn slots_of_ended_sessions_are_evicted() {
        let store = WorkspaceStore::new();
        let ada = WorkspaceKey::new("ada", ToolKind::XrayScanner);
        let bob = WorkspaceKey::new("bob", ToolKind::XrayScanner);
        let ended = Utc::now().timestamp() - 1;

        store.with(&ada, ended, |ws| ws.begin(png())).await.unwrap();
        store.with(&bob, later(), |ws| ws.begin(png())).await.unwrap();
        assert_eq!(store.slot_count().await, 1);

        store.with(&ada, ended, |ws| ws.begin(png())).await.unwrap();
        assert_eq!(store.evict_expired().await, 1);
        assert_eq!(store.slot_count().await, 1);
        assert!(store.with(&bob, later(), |ws| ws.media().is_some()).await);
    }

    #[tokio::test]
    async fn sweeper_releases_idle_slots() {
        let store = Arc::new(WorkspaceStore::new());
        let ada = WorkspaceKey::new("ada", ToolKind::XrayScanner);
        store.with(&ada, Utc::now().timestamp() - 1, |ws| ws.begin(png())).await.unwrap();

        let sweeper = Arc::clone(&store).spawn_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        sweeper.abort();
        assert_eq!(store.slot_count().await, 0);
    }

    #[tokio::test]
    async fn a_newer_session_extends_the_slot() {
        let store = WorkspaceStore::new();
        let ada = WorkspaceKey::new("ada", ToolKind::VideoTranscriber);

        store.with(&ada, later(), |ws| ws.begin(png())).await.unwrap();
        store.with(&ada, Utc::now().timestamp() - 1, |ws| ws.status()).await;
        assert_eq!(store.evict_expired().await, 0);
        assert_eq!(store.with(&ada, later(), |ws| ws.status()).await, AnalysisStatus::Verifying);
    }
}
