use log::{ error, info, warn };
use serde_json::{ Map, Value as JsonValue };
use std::sync::Arc;
use thiserror::Error;

use crate::config::tools::{ FollowUpConfig, ToolConfig };
use crate::llm::chat::ChatClient;
use crate::llm::LlmError;
use crate::models::analysis::AnalysisResult;
use crate::models::media::{ MediaError, UploadedMedia };

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Remote call failed: {0}")]
    RemoteCallFailed(#[from] LlmError),

    #[error("Response is not valid JSON: {source}")]
    MalformedResponse {
        #[source]
        source: serde_json::Error,
        raw: String,
    },

    #[error("Response is missing required fields: {}", missing.join(", "))]
    InvalidResponseShape {
        missing: Vec<String>,
    },

    #[error(transparent)]
    InvalidMedia(#[from] MediaError),

    #[error("{0}")]
    InvalidInput(String),
}

/// Removes markdown code-fence markers the model sometimes wraps JSON in.
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "").replace("```", "").trim().to_string()
}

/// Mirrors a truthiness check: absent, null, false, 0 and "" all count as missing.
fn is_present(value: Option<&JsonValue>) -> bool {
    match value {
        None | Some(JsonValue::Null) => false,
        Some(JsonValue::Bool(b)) => *b,
        Some(JsonValue::Number(n)) => n.as_f64() != Some(0.0),
        Some(JsonValue::String(s)) => !s.is_empty(),
        Some(JsonValue::Array(_)) | Some(JsonValue::Object(_)) => true,
    }
}

/// Parses the model's text and checks that every required top-level key is present.
/// Nested structure is not inspected.
pub fn parse_response(
    text: &str,
    required_fields: &[String]
) -> Result<Map<String, JsonValue>, AnalysisError> {
    let cleaned = strip_code_fences(text);
    let value: JsonValue = serde_json
        ::from_str(&cleaned)
        .map_err(|source| AnalysisError::MalformedResponse { source, raw: cleaned.clone() })?;

    let JsonValue::Object(fields) = value else {
        return Err(AnalysisError::InvalidResponseShape {
            missing: required_fields.to_vec(),
        });
    };

    let missing: Vec<String> = required_fields
        .iter()
        .filter(|name| !is_present(fields.get(name.as_str())))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(AnalysisError::InvalidResponseShape { missing });
    }
    Ok(fields)
}

/// Turns one media blob plus a tool's instruction into a validated result.
/// Holds no per-call state.
#[derive(Clone)]
pub struct Analyzer {
    chat_client: Arc<dyn ChatClient>,
}

impl Analyzer {
    pub fn new(chat_client: Arc<dyn ChatClient>) -> Self {
        Self { chat_client }
    }

    pub async fn analyze(
        &self,
        tool: &ToolConfig,
        media: &UploadedMedia
    ) -> Result<AnalysisResult, AnalysisError> {
        if media.is_empty() {
            return Err(MediaError::Empty.into());
        }
        media.ensure_kind(tool.media_kind)?;

        info!(
            "Analyzing {} ({} bytes, {}) with tool '{}' on model {}",
            media.file_name().unwrap_or("upload"),
            media.len(),
            media.mime_type(),
            tool.kind,
            self.chat_client.get_model(&tool.model)
        );

        let resp = self.chat_client
            .generate(&tool.model, &tool.instruction, &[media.to_inline()]).await
            .map_err(|e| {
                error!("Error analyzing media with tool '{}': {}", tool.kind, e);
                AnalysisError::from(e)
            })?;

        let fields = parse_response(&resp.response, &tool.required_fields).map_err(|e| {
            match &e {
                AnalysisError::MalformedResponse { raw, .. } =>
                    error!("Failed to parse response of tool '{}' as JSON: {} | raw: {}", tool.kind, e, raw),
                _ => warn!("Invalid result from tool '{}': {}", tool.kind, e),
            }
            e
        })?;

        Ok(AnalysisResult::new(tool.kind, fields))
    }

    /// Checks a follow-up request without calling out: the tool must take follow-up
    /// questions, the result must be its own, and the question must not be blank.
    pub fn validate_follow_up<'a>(
        tool: &'a ToolConfig,
        prior: &AnalysisResult,
        question: &str
    ) -> Result<&'a FollowUpConfig, AnalysisError> {
        let follow_up = tool.follow_up
            .as_ref()
            .ok_or_else(||
                AnalysisError::InvalidInput(format!("Tool '{}' does not take follow-up questions", tool.kind))
            )?;
        if prior.tool != tool.kind {
            return Err(
                AnalysisError::InvalidInput(
                    format!("Result {} was produced by '{}', not '{}'", prior.id, prior.tool, tool.kind)
                )
            );
        }
        if question.trim().is_empty() {
            return Err(AnalysisError::InvalidInput("Question must not be empty".into()));
        }
        Ok(follow_up)
    }

    /// Answers a free-text question about a previous result. Returns the raw model text.
    pub async fn follow_up(
        &self,
        tool: &ToolConfig,
        prior: &AnalysisResult,
        question: &str
    ) -> Result<String, AnalysisError> {
        let follow_up = Self::validate_follow_up(tool, prior, question)?;
        let question = question.trim();

        let prompt = follow_up.render(&prior.fields, question);
        info!("Follow-up on analysis {} with model {}", prior.id, follow_up.model);

        let resp = self.chat_client.complete(&follow_up.model, &prompt).await.map_err(|e| {
            error!("Error sending follow-up for analysis {}: {}", prior.id, e);
            AnalysisError::from(e)
        })?;
        Ok(resp.response)
    }
}
