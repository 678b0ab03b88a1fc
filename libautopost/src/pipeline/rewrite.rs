//! Transform stage

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::RewriteSection;
use crate::error::RewriteError;
use crate::types::RewriteConfig;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// External generative rewrite
#[async_trait]
pub trait RewriteService: Send + Sync {
    fn name(&self) -> &str;

    async fn rewrite(
        &self,
        text: &str,
        config: &RewriteConfig,
    ) -> std::result::Result<String, RewriteError>;
}

/// Returns the input unchanged; used when no rewrite service is configured
pub struct PassthroughRewriter;

#[async_trait]
impl RewriteService for PassthroughRewriter {
    fn name(&self) -> &str {
        "passthrough"
    }

    async fn rewrite(
        &self,
        text: &str,
        _config: &RewriteConfig,
    ) -> std::result::Result<String, RewriteError> {
        Ok(text.to_string())
    }
}

/// Gemini `generateContent` client
pub struct GeminiRewriter {
    client: Client,
    base_url: String,
    model: String,
    api_key: SecretString,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

impl GeminiRewriter {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Result<Self, RewriteError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| RewriteError::NotConfigured(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: GEMINI_BASE_URL.to_string(),
            model: model.into(),
            api_key,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build from `[rewrite]`, reading the key from `api_key_env`
    pub fn from_section(section: &RewriteSection) -> Result<Self, RewriteError> {
        let key = std::env::var(&section.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                RewriteError::NotConfigured(format!("{} is not set", section.api_key_env))
            })?;
        Self::new(SecretString::from(key), section.model.clone())
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

/// Instruction text sent along with the source
pub fn build_prompt(text: &str, config: &RewriteConfig) -> String {
    format!(
        "Rewrite the following post for a social feed.\n\
         Style: {}\n\
         Language: {}\n\
         Creativity: {}/10 (0 stays close to the source, 10 takes liberties).\n\
         Keep the facts, sound natural, and reply with the rewritten post only.\n\n\
         Source:\n{}",
        config.tone().description(),
        config.language(),
        config.creativity(),
        text
    )
}

#[async_trait]
impl RewriteService for GeminiRewriter {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn rewrite(
        &self,
        text: &str,
        config: &RewriteConfig,
    ) -> std::result::Result<String, RewriteError> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": build_prompt(text, config) }] }],
            "generationConfig": { "temperature": config.temperature() },
        });

        debug!(model = %self.model, temperature = config.temperature(), "Requesting rewrite");

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| RewriteError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RewriteError::Request(format!(
                "HTTP {}: {}",
                status.as_u16(),
                detail.chars().take(200).collect::<String>()
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| RewriteError::Request(format!("Malformed response: {}", e)))?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(RewriteError::EmptyResponse);
        }
        Ok(trimmed.to_string())
    }
}

/// Outcome of the transform stage
#[derive(Debug, Clone)]
pub enum Transformed {
    Rewritten(String),
    /// Rewrite failed; carries the acquired text verbatim
    Fallback { text: String, error: RewriteError },
}

impl Transformed {
    pub fn text(&self) -> &str {
        match self {
            Transformed::Rewritten(text) => text,
            Transformed::Fallback { text, .. } => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Transformed::Rewritten(text) => text,
            Transformed::Fallback { text, .. } => text,
        }
    }
}

/// Transform stage: degrade, don't abort
pub struct Transformer {
    service: Arc<dyn RewriteService>,
}

impl Transformer {
    pub fn new(service: Arc<dyn RewriteService>) -> Self {
        Self { service }
    }

    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    pub async fn transform(&self, text: &str, config: &RewriteConfig) -> Transformed {
        match self.service.rewrite(text, config).await {
            Ok(rewritten) if !rewritten.trim().is_empty() => Transformed::Rewritten(rewritten),
            Ok(_) => Transformed::Fallback {
                text: text.to_string(),
                error: RewriteError::EmptyResponse,
            },
            Err(error) => {
                warn!(service = self.service.name(), %error, "Rewrite failed, using source text");
                Transformed::Fallback {
                    text: text.to_string(),
                    error,
                }
            }
        }
    }
}
