//! Semantic Classifier Client
//!
//! OpenAI-compatible chat-completions client used by Level 2 to classify
//! skill intent. The trait boundary lets tests substitute a deterministic
//! classifier; the HTTP implementation retries with bounded exponential
//! backoff and never retries a definitive rejection.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;

const SYSTEM_PROMPT: &str = "You are a security analyst reviewing agent skills before they \
are admitted to a runtime. Classify the skill's intent. Respond with JSON only, no prose: \
{\"labels\": [{\"label\": \"<intent>\", \"confidence\": <0.0-1.0>}], \"summary\": \"<one line>\"}. \
Known labels: benign, data_collection, code_execution, shell_execution, prompt_injection, \
credential_theft, exfiltration, sabotage. Report every label that applies.";

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier is not configured")]
    NotConfigured,
    #[error("classifier request timed out after {0:?}")]
    Timeout(Duration),
    #[error("classifier unavailable: {0}")]
    Unavailable(String),
    #[error("classifier rejected the request: {status} {body}")]
    Rejected { status: u16, body: String },
    #[error("classifier returned malformed output: {0}")]
    MalformedOutput(String),
}

impl ClassifierError {
    /// Transient failures are worth a retry; a definitive rejection is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClassifierError::Timeout(_) | ClassifierError::Unavailable(_))
    }
}

/// One intent label with its confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentLabel {
    pub label: String,
    pub confidence: f64,
}

/// Structured classifier verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentReport {
    pub labels: Vec<IntentLabel>,
    #[serde(default)]
    pub summary: String,
}

/// Capability interface for intent classification
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<IntentReport, ClassifierError>;
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Classifier over an OpenAI-compatible /chat/completions endpoint
#[derive(Clone)]
pub struct HttpClassifier {
    client: Client,
    api_url: Option<String>,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
    max_retries: u32,
}

impl HttpClassifier {
    pub fn from_config(config: &Config) -> Self {
        Self {
            client: Client::new(),
            api_url: config.classifier_api_url.clone(),
            api_key: config.classifier_api_key.clone(),
            model: config.classifier_model.clone(),
            timeout: config.classifier_timeout,
            max_retries: config.classifier_max_retries,
        }
    }

    pub fn is_available(&self) -> bool {
        self.api_url.is_some()
    }

    async fn request_once(&self, url: &str, text: &str) -> Result<IntentReport, ClassifierError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: text.to_string(),
                },
            ],
            temperature: 0.0,
        };

        let mut builder = self.client.post(url).timeout(self.timeout).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ClassifierError::Timeout(self.timeout)
            } else {
                ClassifierError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                return Err(ClassifierError::Rejected {
                    status: status.as_u16(),
                    body,
                });
            }
            return Err(ClassifierError::Unavailable(format!("{status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::MalformedOutput(e.to_string()))?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| ClassifierError::MalformedOutput("empty choices".to_string()))?;

        parse_verdict(content)
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, text: &str) -> Result<IntentReport, ClassifierError> {
        let url = self
            .api_url
            .as_deref()
            .ok_or(ClassifierError::NotConfigured)?;
        let url = format!("{}/chat/completions", url.trim_end_matches('/'));

        let mut attempt: u32 = 0;
        loop {
            match self.request_once(&url, text).await {
                Ok(report) => {
                    debug!(labels = report.labels.len(), "classifier verdict received");
                    return Ok(report);
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(attempt, error = %e, "classifier request failed, retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Parse the model's JSON verdict, tolerating markdown code fences
fn parse_verdict(content: &str) -> Result<IntentReport, ClassifierError> {
    let trimmed = content.trim();
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let mut report: IntentReport = serde_json::from_str(stripped)
        .map_err(|e| ClassifierError::MalformedOutput(format!("{e}: {stripped}")))?;

    for label in &mut report.labels {
        label.confidence = label.confidence.clamp(0.0, 1.0);
    }
    Ok(report)
}
