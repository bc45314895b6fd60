use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::sync::{ Arc, Mutex };

use crate::config::tools::{ ToolKind, ToolRegistry };
use crate::llm::chat::{ ChatClient, CompletionResponse, InlineMedia };
use crate::llm::LlmError;
use crate::models::user::User;
use crate::session::identity::{ IdentityError, IdentityProvider };

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub model: String,
    pub prompt: String,
    pub media: Vec<InlineMedia>,
}

enum Scripted {
    Reply(String),
    Fail(StatusCode),
    Panic,
}

/// Chat client that replays queued replies in order and records every call.
#[derive(Default)]
pub struct ScriptedChatClient {
    replies: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedChatClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, text: &str) {
        self.replies.lock().unwrap().push_back(Scripted::Reply(text.to_string()));
    }

    pub fn fail(&self, status: StatusCode) {
        self.replies.lock().unwrap().push_back(Scripted::Fail(status));
    }

    pub fn panic_next(&self) {
        self.replies.lock().unwrap().push_back(Scripted::Panic);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatClient for ScriptedChatClient {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        media: &[InlineMedia]
    ) -> Result<CompletionResponse, LlmError> {
        self.calls.lock().unwrap().push(RecordedCall {
            model: model.to_string(),
            prompt: prompt.to_string(),
            media: media.to_vec(),
        });
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Reply(response)) => Ok(CompletionResponse { response }),
            Some(Scripted::Panic) => panic!("scripted panic"),
            Some(Scripted::Fail(status)) =>
                Err(LlmError::Status {
                    status,
                    message: "scripted failure".into(),
                }),
            None => Err(LlmError::EmptyResponse("no scripted reply left".into())),
        }
    }

    fn get_model(&self, requested: &str) -> String {
        requested.to_string()
    }

    fn get_base_url(&self) -> String {
        "scripted://".into()
    }
}

/// Accepts any token of the form `valid:<uid>`.
pub struct StaticIdentityProvider;

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn verify(&self, id_token: &str) -> Result<User, IdentityError> {
        match id_token.strip_prefix("valid:") {
            Some(uid) if !uid.is_empty() =>
                Ok(User {
                    id: uid.to_string(),
                    display_name: Some(format!("User {}", uid)),
                    avatar_url: None,
                }),
            _ => Err(IdentityError::InvalidToken("token rejected".into())),
        }
    }
}

pub fn registry() -> Arc<ToolRegistry> {
    Arc::new(ToolRegistry::builtin().unwrap())
}

pub fn tool(kind: ToolKind) -> Arc<crate::config::tools::ToolConfig> {
    registry().get(kind).unwrap()
}
