// Requests short-lived runner registration and removal tokens for the
// organization or repository a registration URL points at.

use crate::github_client::ActionsApi;
use chrono::{DateTime, Utc};
use runner_common::constants::{endpoints, host};
use runner_sdk::RunnerError;
use serde::Deserialize;
use std::sync::Arc;

/// A one-shot secret returned by the token endpoints.
#[derive(Clone, Deserialize)]
pub struct RunnerToken {
    /// Value passed to config.sh as `--token`.
    pub token: String,
    /// When GitHub stops accepting the token, if reported.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for RunnerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerToken")
            .field("token", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

pub type RegistrationToken = RunnerToken;
pub type RemoveToken = RunnerToken;

/// Requests runner tokens scoped to one organization or repository.
pub struct TokenProvider {
    base_path: String,
    client: Arc<dyn ActionsApi>,
}

impl std::fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenProvider")
            .field("base_path", &self.base_path)
            .finish_non_exhaustive()
    }
}

impl TokenProvider {
    /// `https://github.com/<owner>` scopes tokens to an organization,
    /// `https://github.com/<owner>/<repo>` to a repository.
    pub fn new(url: &str, client: Arc<dyn ActionsApi>) -> Result<Self, RunnerError> {
        if url.is_empty() {
            return Err(RunnerError::MissingParameter("url is missing".into()));
        }

        let base_path = match split_url(url)? {
            (owner, None) => format!("/orgs/{owner}"),
            (owner, Some(repo)) => format!("/repos/{owner}/{repo}"),
        };

        Ok(Self { base_path, client })
    }

    /// `/orgs/<owner>` or `/repos/<owner>/<repo>`.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// A token for `config.sh --token` during registration.
    pub async fn create_registration_token(&self) -> Result<RegistrationToken, RunnerError> {
        self.create_token(endpoints::REGISTRATION_TOKEN).await
    }

    /// A token for `config.sh remove --token`.
    pub async fn create_remove_token(&self) -> Result<RemoveToken, RunnerError> {
        self.create_token(endpoints::REMOVE_TOKEN).await
    }

    async fn create_token(&self, endpoint: &str) -> Result<RunnerToken, RunnerError> {
        let endpoint = format!("{}/{}", self.base_path, endpoint);

        let response = self
            .client
            .post(&endpoint)
            .await
            .map_err(|source| RunnerError::Transport {
                endpoint: endpoint.clone(),
                source,
            })?;

        if response.status != 201 {
            return Err(RunnerError::RequestFailed {
                endpoint,
                status: response.status,
            });
        }

        serde_json::from_str(&response.body)
            .map_err(|source| RunnerError::Decode { endpoint, source })
    }
}

/// Split a registration URL into owner and optional repository.
fn split_url(url: &str) -> Result<(&str, Option<&str>), RunnerError> {
    let path = url
        .strip_prefix(host::URL_PREFIX)
        .ok_or_else(|| RunnerError::InvalidParameter(format!("invalid url: '{url}'")))?;

    if path.contains(|c: char| c == '?' || c == '#') {
        return Err(RunnerError::InvalidParameter(format!(
            "url must not carry a query or fragment: '{url}'"
        )));
    }

    let chunks: Vec<&str> = path.split('/').collect();

    // A trailing slash leaves an empty last chunk and is rejected with the rest.
    if chunks.iter().any(|c| c.is_empty()) {
        return Err(RunnerError::InvalidParameter(format!(
            "invalid url path: '{path}'"
        )));
    }

    match chunks.as_slice() {
        [owner] => Ok((*owner, None)),
        [owner, repo] => Ok((*owner, Some(*repo))),
        _ => Err(RunnerError::InvalidParameter(format!(
            "invalid url path: '{path}'"
        ))),
    }
}
