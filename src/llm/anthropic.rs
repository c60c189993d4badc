//! Anthropic messages-API implementation of the [`ReviewLlm`] trait.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::types::LlmOutcome;

use super::{parse_review_output, LlmError, ReviewLlm, ReviewRequest};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

/// System prompt pinning the reviewer to the structured output contract.
const SYSTEM_PROMPT: &str = "You are a strict code reviewer in an automated merge pipeline. \
Review the supplied diff against the stated goal. Respond with a single JSON object and \
nothing else: {\"pass\": bool, \"confidence\": number 0..1, \"reasons\": [string], \
\"suggestions\": [string], \"code_issues\": [{\"severity\": \"info\"|\"warning\"|\"error\", \
\"category\": string, \"message\": string, \"file\": string?, \"line\": number?, \
\"suggestion\": string?}]}. Report only issues you are confident about; an empty \
code_issues list with pass=false means you could not complete the review.";

/// Anthropic-backed reviewer.
#[derive(Debug, Clone)]
pub struct AnthropicReviewer {
    model: String,
    api_key: String,
    api_base: String,
    client: reqwest::Client,
}

impl AnthropicReviewer {
    /// Create a reviewer for the given model.
    pub fn new(model: String, api_key: String) -> Self {
        Self {
            model,
            api_key,
            api_base: ANTHROPIC_API_BASE.to_owned(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the reviewer at a different API base (test servers).
    #[must_use]
    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.to_owned();
        self
    }

    fn build_body(&self, request: &ReviewRequest) -> Value {
        let mut user_content = format!("Task goal: {}\n\n{}", request.goal, request.prompt);
        if let Some(path) = &request.instructions_path {
            match std::fs::read_to_string(path) {
                Ok(instructions) => {
                    user_content =
                        format!("Reviewer instructions:\n{instructions}\n\n{user_content}");
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e,
                        "could not read reviewer instructions, continuing without");
                }
            }
        }
        json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "system": SYSTEM_PROMPT,
            "messages": [{ "role": "user", "content": user_content }],
        })
    }
}

#[async_trait]
impl ReviewLlm for AnthropicReviewer {
    async fn review(&self, request: ReviewRequest) -> Result<LlmOutcome, LlmError> {
        let body = self.build_body(&request);

        let send = self
            .client
            .post(&self.api_base)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send();

        let response = tokio::time::timeout(request.timeout, send)
            .await
            .map_err(|_| LlmError::Timeout(request.timeout))??;

        let status = response.status();
        let payload = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                message: payload.chars().take(300).collect(),
            });
        }

        let parsed: Value = serde_json::from_str(&payload)
            .map_err(|e| LlmError::Parse(format!("response body was not JSON: {e}")))?;
        let text = completion_text(&parsed);
        parse_review_output(&text)
    }
}

/// Join all text blocks from a messages-API response.
fn completion_text(value: &Value) -> String {
    let Some(content) = value.get("content").and_then(Value::as_array) else {
        return String::new();
    };
    let mut text = String::new();
    for item in content {
        if item.get("type").and_then(Value::as_str) == Some("text") {
            text.push_str(item.get("text").and_then(Value::as_str).unwrap_or_default());
        }
    }
    text
}
