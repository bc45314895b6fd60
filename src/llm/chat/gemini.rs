use async_trait::async_trait;
use serde::{ Deserialize, Serialize };
use log::{ info, warn };
use url::Url;

use super::{ ChatClient, CompletionResponse, InlineMedia };
use crate::llm::{ LlmConfig, LlmError, DEFAULT_GEMINI_BASE_URL };

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: &'static str,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiBlob,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiBlob {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleResponse {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
    prompt_feedback: Option<GooglePromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleCandidate {
    content: Option<GoogleContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GoogleContent {
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Deserialize)]
struct GooglePart {
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GooglePromptFeedback {
    block_reason: Option<String>,
}

#[derive(Deserialize)]
struct GoogleErrorEnvelope {
    error: GoogleErrorBody,
}

#[derive(Deserialize)]
struct GoogleErrorBody {
    message: String,
    status: Option<String>,
}

fn error_message(body: &str) -> String {
    match serde_json::from_str::<GoogleErrorEnvelope>(body) {
        Ok(envelope) =>
            match envelope.error.status {
                Some(status) => format!("{} ({})", envelope.error.message, status),
                None => envelope.error.message,
            }
        Err(_) => body.trim().to_string(),
    }
}

fn extract_text(response: GoogleResponse) -> Result<String, LlmError> {
    let reason = response.prompt_feedback
        .and_then(|f| f.block_reason)
        .map(|r| format!("prompt blocked: {}", r));

    let Some(candidate) = response.candidates.into_iter().next() else {
        return Err(LlmError::EmptyResponse(reason.unwrap_or_else(|| "no candidates".into())));
    };

    let text: String = candidate.content
        .map(|c| c.parts)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| p.text)
        .collect();

    if text.is_empty() {
        let why = reason
            .or_else(|| candidate.finish_reason.map(|r| format!("finish reason: {}", r)))
            .unwrap_or_else(|| "candidate had no text parts".into());
        return Err(LlmError::EmptyResponse(why));
    }
    Ok(text)
}

pub struct GeminiChatClient {
    http: reqwest::Client,
    api_key: Option<String>,
    model_override: Option<String>,
    base_url: String,
}

impl GeminiChatClient {
    pub fn new(
        api_key: Option<String>,
        model_override: Option<String>,
        base_url: Option<String>,
        timeout: Option<std::time::Duration>
    ) -> Result<Self, LlmError> {
        let base_url = base_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string());
        Url::parse(&base_url).map_err(|source| LlmError::InvalidBaseUrl {
            url: base_url.clone(),
            source,
        })?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        let api_key = api_key.filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!("Gemini API key is not set. Every analysis request will fail until it is configured.");
        }

        Ok(Self {
            http,
            api_key,
            model_override: model_override.filter(|m| !m.trim().is_empty()),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        Self::new(
            config.api_key.clone(),
            config.model_override.clone(),
            config.base_url.clone(),
            config.timeout
        )
    }
}

#[async_trait]
impl ChatClient for GeminiChatClient {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        media: &[InlineMedia]
    ) -> Result<CompletionResponse, LlmError> {
        let api_key = self.api_key.as_deref().ok_or(LlmError::MissingApiKey)?;
        let model = self.get_model(model);

        let mut parts = vec![GeminiPart::Text { text: prompt.to_string() }];
        parts.extend(
            media.iter().map(|m| GeminiPart::InlineData {
                inline_data: GeminiBlob {
                    mime_type: m.mime_type.clone(),
                    data: m.data.clone(),
                },
            })
        );
        let payload = GeminiRequest {
            contents: vec![GeminiContent { role: "user", parts }],
        };

        let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);
        info!(
            "GeminiChatClient::generate() → model={} inline_parts={} base_url={}",
            model,
            media.len(),
            self.base_url
        );

        let resp = self.http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&payload)
            .send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status,
                message: error_message(&body),
            });
        }

        let body: GoogleResponse = resp.json().await?;
        let text = extract_text(body)?;
        Ok(CompletionResponse { response: text })
    }

    fn get_model(&self, requested: &str) -> String {
        self.model_override.clone().unwrap_or_else(|| requested.to_string())
    }

    fn get_base_url(&self) -> String {
        self.base_url.clone()
    }
}
