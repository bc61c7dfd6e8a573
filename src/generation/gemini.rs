//! Gemini REST client
//!
//! Calls `models/{model}:generateContent` directly. When web search is
//! requested the `google_search` tool is attached and grounded references are
//! read back from the candidate's grounding metadata.

use super::{
    Generation, GenerateOptions, GenerationClient, GenerationError, GenerationErrorKind,
    SourceCitation,
};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Client for the Gemini HTTP API
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    timeout: Option<Duration>,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: None,
        }
    }

    /// Overrides the model name
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Points the client at another endpoint (proxies, test servers)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Transport-level timeout for each request
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[async_trait]
impl GenerationClient for GeminiClient {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<Generation, GenerationError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: prompt }],
            }],
            tools: if options.web_search {
                vec![Tool::default()]
            } else {
                Vec::new()
            },
        };

        let mut builder = self
            .client
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .json(&request);
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|err| {
            let kind = if err.is_timeout() {
                GenerationErrorKind::Timeout
            } else {
                GenerationErrorKind::Network
            };
            // reqwest includes the full URL, which carries the key
            GenerationError::new(
                kind,
                format!("Gemini request failed: {}", err.without_url()),
            )
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read Gemini error body".to_string());
            return Err(map_http_error(status, &body));
        }

        let payload: Value = response.json().await.map_err(|err| {
            GenerationError::new(
                GenerationErrorKind::InvalidResponse,
                format!("Failed to parse Gemini response: {err}"),
            )
        })?;

        log::debug!(
            "Gemini {} answered (web_search: {})",
            self.model,
            options.web_search
        );

        Ok(Generation {
            text: extract_text(&payload),
            sources: extract_sources(&payload),
        })
    }
}

#[derive(Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize, Default)]
struct Tool {
    google_search: GoogleSearchConfig,
}

#[derive(Serialize, Default)]
struct GoogleSearchConfig {}

/// Concatenate every text part of the first candidate. Empty when the model
/// produced nothing (blocked prompt, empty answer).
fn extract_text(root: &Value) -> String {
    let parts = root
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(|parts| parts.as_array());

    let Some(parts) = parts else {
        return String::new();
    };

    parts
        .iter()
        .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("")
        .trim()
        .to_string()
}

/// Grounding references of all candidates, deduplicated by URL
fn extract_sources(root: &Value) -> Vec<SourceCitation> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();

    let Some(candidates) = root.get("candidates").and_then(|c| c.as_array()) else {
        return sources;
    };

    for candidate in candidates {
        let Some(chunks) = candidate
            .get("groundingMetadata")
            .and_then(|meta| meta.get("groundingChunks"))
            .and_then(|chunks| chunks.as_array())
        else {
            continue;
        };

        for chunk in chunks {
            let Some(web) = chunk.get("web") else {
                continue;
            };
            let Some(url) = web.get("uri").and_then(|u| u.as_str()) else {
                continue;
            };
            if !seen.insert(url.to_string()) {
                continue;
            }
            let title = web
                .get("title")
                .and_then(|t| t.as_str())
                .unwrap_or(url)
                .to_string();
            sources.push(SourceCitation {
                title,
                url: url.to_string(),
            });
        }
    }

    sources
}

/// Classify an error response from the Google API
fn map_http_error(status: StatusCode, body: &str) -> GenerationError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));

    let google_status = error
        .and_then(|e| e.get("status"))
        .and_then(|s| s.as_str())
        .unwrap_or_default();
    let raw_message = error
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or(body);
    let message = if google_status.is_empty() {
        raw_message.to_string()
    } else {
        format!("{google_status}: {raw_message}")
    };

    let details = error
        .and_then(|e| e.get("details"))
        .and_then(|d| d.as_array())
        .cloned()
        .unwrap_or_default();
    let reasons: Vec<&str> = details
        .iter()
        .filter_map(|d| d.get("reason").and_then(|r| r.as_str()))
        .collect();

    let lowered = raw_message.to_lowercase();
    if reasons.contains(&"SERVICE_DISABLED")
        || lowered.contains("has not been used")
        || lowered.contains("is disabled")
    {
        let err = GenerationError::new(GenerationErrorKind::ServiceDisabled, message);
        return match activation_url(&details, raw_message) {
            Some(url) => err.with_details(url),
            None => err,
        };
    }

    let kind = if google_status == "UNAUTHENTICATED"
        || google_status == "PERMISSION_DENIED"
        || reasons.contains(&"API_KEY_INVALID")
        || matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
    {
        GenerationErrorKind::Auth
    } else if google_status == "RESOURCE_EXHAUSTED" || status == StatusCode::TOO_MANY_REQUESTS {
        GenerationErrorKind::Quota
    } else if status == StatusCode::GATEWAY_TIMEOUT {
        GenerationErrorKind::Timeout
    } else if status.is_server_error() {
        GenerationErrorKind::Network
    } else {
        GenerationErrorKind::Unknown
    };

    GenerationError::new(kind, message)
}

/// Console link to enable the API: ErrorInfo metadata, then Help links, then
/// the first URL mentioned in the message
fn activation_url(details: &[Value], message: &str) -> Option<String> {
    let from_metadata = details.iter().find_map(|d| {
        d.get("metadata")
            .and_then(|m| m.get("activationUrl"))
            .and_then(|u| u.as_str())
    });
    if let Some(url) = from_metadata {
        return Some(url.to_string());
    }

    let from_links = details.iter().find_map(|d| {
        d.get("links")
            .and_then(|l| l.as_array())
            .and_then(|links| links.first())
            .and_then(|link| link.get("url"))
            .and_then(|u| u.as_str())
    });
    if let Some(url) = from_links {
        return Some(url.to_string());
    }

    message
        .split_whitespace()
        .find(|word| word.starts_with("https://"))
        .map(|word| word.trim_end_matches(['.', ',', ')']).to_string())
}
