//! AI consumption report via the Gemini `generateContent` API.
//!
//! Never fails outward: a missing key or any upstream problem turns into the
//! static fallback text.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::InsightConfig;
use crate::errors::AppError;
use crate::models::LogEntry;

pub const FALLBACK_TEXT: &str = "AI Analysis is only available when a valid Gemini API Key is provided in the environment settings.";

const REQUEST_TIMEOUT_SECS: u64 = 60;
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Generated report, or the fallback text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Insight {
    pub text: String,
    pub fallback: bool,
}

impl Insight {
    fn fallback() -> Self {
        Self {
            text: FALLBACK_TEXT.to_string(),
            fallback: true,
        }
    }
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

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

pub struct InsightClient {
    http: reqwest::Client,
    config: InsightConfig,
}

impl InsightClient {
    pub fn new(config: InsightConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    pub fn has_key(&self) -> bool {
        self.config.api_key.is_some()
    }

    /// Ask the model about `logs`, given newest first.
    pub async fn generate(&self, logs: &[LogEntry]) -> Insight {
        let Some(api_key) = self.config.api_key.as_deref() else {
            tracing::debug!("No insight API key configured");
            return Insight::fallback();
        };

        let prompt = build_prompt(&self.config.subject, logs);
        match self.request(api_key, &prompt).await {
            Ok(text) => Insight {
                text,
                fallback: false,
            },
            Err(e) => {
                tracing::warn!("Insight generation failed: {}", e);
                Insight::fallback()
            }
        }
    }

    async fn request(&self, api_key: &str, prompt: &str) -> Result<String, AppError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );
        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });

        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Remote(format!(
                "Insight API answered {}: {}",
                status, body
            )));
        }

        let parsed: GenerateResponse = response.json().await?;
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(AppError::Remote("Insight API returned no text".to_string()));
        }
        Ok(text.trim().to_string())
    }
}

/// Prompt listing every logged flavor.
pub fn build_prompt(subject: &str, logs: &[LogEntry]) -> String {
    let history = logs
        .iter()
        .map(|l| l.flavor.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Act as a humorous caffeine-obsessed nutritionist. Analyze {subject}'s consumption history: {history}. \
         Give them a persona name based on these habits and a 2-sentence witty analysis of their health. \
         Keep it brief and fun."
    )
}
