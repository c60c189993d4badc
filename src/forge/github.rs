//! GitHub REST implementation of the [`Forge`] trait.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::types::ChangedFile;

use super::{
    CheckContext, CombinedStatus, Forge, ForgeError, MergeMethod, MergeOutcome, PrInfo,
    ReviewEvent,
};

const GITHUB_API_BASE: &str = "https://api.github.com";
const GITHUB_API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("armitage/", env!("CARGO_PKG_VERSION"));

/// GitHub REST forge adapter, scoped to one repository.
#[derive(Debug, Clone)]
pub struct GithubForge {
    owner: String,
    repo: String,
    token: String,
    api_base: String,
    client: reqwest::Client,
}

impl GithubForge {
    /// Create an adapter for `owner/repo` with a token.
    ///
    /// # Errors
    ///
    /// Returns an error if `repo` is not of the form `owner/name`.
    pub fn new(repo: &str, token: String) -> Result<Self, ForgeError> {
        let (owner, name) = repo
            .split_once('/')
            .filter(|(o, n)| !o.is_empty() && !n.is_empty())
            .ok_or_else(|| {
                ForgeError::Decode(format!("invalid repo '{repo}', expected 'owner/name'"))
            })?;
        Ok(Self {
            owner: owner.to_owned(),
            repo: name.to_owned(),
            token,
            api_base: GITHUB_API_BASE.to_owned(),
            client: reqwest::Client::new(),
        })
    }

    /// Point the adapter at a different API base (test servers).
    #[must_use]
    pub fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.trim_end_matches('/').to_owned();
        self
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{path}",
            self.api_base, self.owner, self.repo
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.request_with_accept(method, url, "application/vnd.github+json")
    }

    fn request_with_accept(
        &self,
        method: reqwest::Method,
        url: &str,
        accept: &str,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
            .header("accept", accept)
            .header("x-github-api-version", GITHUB_API_VERSION)
            .header("user-agent", USER_AGENT)
    }

    /// Send a request, mapping non-success statuses to [`ForgeError::Api`].
    async fn send_checked(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, ForgeError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ForgeError::Api {
            status: status.as_u16(),
            message: extract_api_message(&message),
        })
    }

    async fn get_json(&self, url: &str) -> Result<Value, ForgeError> {
        let response = self
            .send_checked(self.request(reqwest::Method::GET, url))
            .await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| ForgeError::Decode(e.to_string()))
    }
}

/// Pull the `message` field out of a GitHub error body, falling back to the
/// raw text.
fn extract_api_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
        })
        .unwrap_or_else(|| body.chars().take(300).collect())
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

#[async_trait]
impl Forge for GithubForge {
    async fn get_pr(&self, number: i64) -> Result<PrInfo, ForgeError> {
        let value = self.get_json(&self.repo_url(&format!("pulls/{number}"))).await?;
        let head = value.get("head").cloned().unwrap_or(Value::Null);
        let base = value.get("base").cloned().unwrap_or(Value::Null);
        Ok(PrInfo {
            number: value.get("number").and_then(Value::as_i64).unwrap_or(number),
            title: str_field(&value, "title"),
            author: value
                .get("user")
                .map(|u| str_field(u, "login"))
                .unwrap_or_default(),
            head_ref: str_field(&head, "ref"),
            head_sha: str_field(&head, "sha"),
            base_ref: str_field(&base, "ref"),
            state: str_field(&value, "state"),
            merged: value.get("merged").and_then(Value::as_bool).unwrap_or(false),
            mergeable: value.get("mergeable").and_then(Value::as_bool),
            mergeable_state: value
                .get("mergeable_state")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
            url: str_field(&value, "html_url"),
        })
    }

    async fn list_pr_files(&self, number: i64) -> Result<Vec<ChangedFile>, ForgeError> {
        let value = self
            .get_json(&self.repo_url(&format!("pulls/{number}/files?per_page=100")))
            .await?;
        let Some(entries) = value.as_array() else {
            return Err(ForgeError::Decode("expected a file array".to_owned()));
        };
        Ok(entries
            .iter()
            .map(|entry| ChangedFile {
                path: str_field(entry, "filename"),
                additions: entry.get("additions").and_then(Value::as_u64).unwrap_or(0),
                deletions: entry.get("deletions").and_then(Value::as_u64).unwrap_or(0),
            })
            .collect())
    }

    async fn pr_diff(&self, number: i64) -> Result<String, ForgeError> {
        let response = self
            .send_checked(self.request_with_accept(
                reqwest::Method::GET,
                &self.repo_url(&format!("pulls/{number}")),
                "application/vnd.github.v3.diff",
            ))
            .await?;
        response
            .text()
            .await
            .map_err(|e| ForgeError::Decode(e.to_string()))
    }

    async fn combined_status(&self, sha: &str) -> Result<CombinedStatus, ForgeError> {
        let value = self
            .get_json(&self.repo_url(&format!("commits/{sha}/status")))
            .await?;
        let contexts = value
            .get("statuses")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| CheckContext {
                        context: str_field(entry, "context"),
                        state: str_field(entry, "state"),
                        description: entry
                            .get("description")
                            .and_then(Value::as_str)
                            .map(ToOwned::to_owned),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(CombinedStatus {
            state: str_field(&value, "state"),
            total_count: value
                .get("total_count")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            contexts,
        })
    }

    async fn add_pr_comment(&self, number: i64, body: &str) -> Result<(), ForgeError> {
        self.send_checked(
            self.request(
                reqwest::Method::POST,
                &self.repo_url(&format!("issues/{number}/comments")),
            )
            .json(&json!({ "body": body })),
        )
        .await?;
        Ok(())
    }

    async fn create_review(
        &self,
        number: i64,
        event: ReviewEvent,
        body: &str,
    ) -> Result<(), ForgeError> {
        let event_str = match event {
            ReviewEvent::Approve => "APPROVE",
            ReviewEvent::RequestChanges => "REQUEST_CHANGES",
        };
        self.send_checked(
            self.request(
                reqwest::Method::POST,
                &self.repo_url(&format!("pulls/{number}/reviews")),
            )
            .json(&json!({ "event": event_str, "body": body })),
        )
        .await?;
        Ok(())
    }

    async fn merge_pr(&self, number: i64, method: MergeMethod) -> Result<MergeOutcome, ForgeError> {
        let result = self
            .send_checked(
                self.request(
                    reqwest::Method::PUT,
                    &self.repo_url(&format!("pulls/{number}/merge")),
                )
                .json(&json!({ "merge_method": method.as_str() })),
            )
            .await;
        match result {
            Ok(response) => {
                let value = response
                    .json::<Value>()
                    .await
                    .map_err(|e| ForgeError::Decode(e.to_string()))?;
                Ok(MergeOutcome {
                    merged: value.get("merged").and_then(Value::as_bool).unwrap_or(false),
                    message: str_field(&value, "message"),
                })
            }
            // 405/409/422 carry a merge-refusal reason rather than an outage;
            // surface them as a failed outcome so the caller can interpret.
            Err(ForgeError::Api { status, message })
                if status == 405 || status == 409 || status == 422 =>
            {
                Ok(MergeOutcome {
                    merged: false,
                    message,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn update_branch(&self, number: i64) -> Result<(), ForgeError> {
        self.send_checked(
            self.request(
                reqwest::Method::PUT,
                &self.repo_url(&format!("pulls/{number}/update-branch")),
            )
            .json(&json!({})),
        )
        .await?;
        Ok(())
    }

    async fn authenticated_user(&self) -> Result<String, ForgeError> {
        let value = self
            .get_json(&format!("{}/user", self.api_base))
            .await?;
        let login = str_field(&value, "login");
        if login.is_empty() {
            return Err(ForgeError::Decode("user response missing login".to_owned()));
        }
        Ok(login)
    }

    async fn close_pr(&self, number: i64) -> Result<(), ForgeError> {
        self.send_checked(
            self.request(
                reqwest::Method::PATCH,
                &self.repo_url(&format!("pulls/{number}")),
            )
            .json(&json!({ "state": "closed" })),
        )
        .await?;
        Ok(())
    }
}
