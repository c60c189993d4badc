//! Review-LLM abstraction.
//!
//! Defines the [`ReviewLlm`] trait and the structured-output parsing shared
//! by implementations. One implementation is provided:
//! [`anthropic::AnthropicReviewer`] over the Anthropic `/v1/messages` API.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::types::{CodeIssue, IssueSeverity, LlmOutcome};

pub mod anthropic;

/// LLM operation errors.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Transport-level failure.
    #[error("llm http error: {0}")]
    Http(#[from] reqwest::Error),
    /// The API answered with a non-success status.
    #[error("llm api error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or status text.
        message: String,
    },
    /// The completion did not contain a parseable review.
    #[error("llm parse error: {0}")]
    Parse(String),
    /// The call exceeded its deadline.
    #[error("llm call timed out after {0:?}")]
    Timeout(Duration),
}

/// One review request.
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    /// Full prompt, including the diff under review.
    pub prompt: String,
    /// The task goal, for context.
    pub goal: String,
    /// Optional path to repo-specific reviewer instructions.
    pub instructions_path: Option<PathBuf>,
    /// Call deadline.
    pub timeout: Duration,
}

/// A reviewer that turns a prompt+diff into structured findings.
#[async_trait]
pub trait ReviewLlm: Send + Sync {
    /// Run one review.
    async fn review(&self, request: ReviewRequest) -> Result<LlmOutcome, LlmError>;
}

// ---------------------------------------------------------------------------
// Structured-output parsing
// ---------------------------------------------------------------------------

/// Wire shape the reviewer is instructed to emit.
#[derive(Debug, Deserialize)]
struct RawReview {
    pass: bool,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reasons: Vec<String>,
    #[serde(default)]
    suggestions: Vec<String>,
    #[serde(default)]
    code_issues: Vec<RawIssue>,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    #[serde(default)]
    severity: String,
    #[serde(default)]
    category: String,
    message: String,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    suggestion: Option<String>,
}

/// Extract the review JSON object from a model completion.
///
/// Accepts raw JSON, a fenced ```json block, or JSON embedded in prose; the
/// first brace-balanced object is taken.
///
/// # Errors
///
/// Returns [`LlmError::Parse`] when no valid object is found.
pub fn parse_review_output(text: &str) -> Result<LlmOutcome, LlmError> {
    let candidate = extract_json_object(text)
        .ok_or_else(|| LlmError::Parse("no JSON object in completion".to_owned()))?;
    let raw: RawReview = serde_json::from_str(candidate)
        .map_err(|e| LlmError::Parse(format!("review JSON did not validate: {e}")))?;

    let code_issues = raw
        .code_issues
        .into_iter()
        .map(|issue| CodeIssue {
            severity: match issue.severity.as_str() {
                "error" => IssueSeverity::Error,
                "warning" => IssueSeverity::Warning,
                _ => IssueSeverity::Info,
            },
            category: if issue.category.is_empty() {
                "general".to_owned()
            } else {
                issue.category
            },
            message: issue.message,
            file: issue.file,
            line: issue.line,
            suggestion: issue.suggestion,
        })
        .collect();

    Ok(LlmOutcome {
        pass: raw.pass,
        confidence: raw.confidence.clamp(0.0, 1.0),
        reasons: raw.reasons,
        suggestions: raw.suggestions,
        code_issues,
    })
}

/// Find the first brace-balanced JSON object in `text`.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth = depth.saturating_add(1),
            '}' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return text.get(start..start.saturating_add(offset).saturating_add(1));
                }
            }
            _ => {}
        }
    }
    None
}
