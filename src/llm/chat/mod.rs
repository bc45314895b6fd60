pub mod gemini;

use async_trait::async_trait;
use serde::{ Deserialize, Serialize };
use std::sync::Arc;
use super::{ LlmConfig, LlmError };
use self::gemini::GeminiChatClient;

/// A binary payload sent alongside the prompt, already base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineMedia {
    pub mime_type: String,
    pub data: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CompletionResponse {
    pub response: String,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Sends the prompt followed by the inline payloads and returns the model's text.
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        media: &[InlineMedia]
    ) -> Result<CompletionResponse, LlmError>;

    async fn complete(&self, model: &str, prompt: &str) -> Result<CompletionResponse, LlmError> {
        self.generate(model, prompt, &[]).await
    }

    fn get_model(&self, requested: &str) -> String;
    fn get_base_url(&self) -> String;
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, LlmError> {
    let client = GeminiChatClient::from_config(config)?;
    Ok(Arc::new(client))
}
