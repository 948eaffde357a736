// Authenticated access to the GitHub REST API.
// Personal access tokens are sent as-is; GitHub App credentials are turned
// into a short-lived installation token through a signed JWT.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use reqwest::header::CONTENT_LENGTH;
use reqwest::StatusCode;
use runner_common::constants::endpoints;
use runner_common::{HttpClientFactory, Tracing};
use runner_sdk::{BoxError, RunnerError, TraceWriter};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Installation tokens are refreshed this long before GitHub expires them.
const INSTALLATION_TOKEN_LEEWAY_SECS: i64 = 60;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Status and raw body of an API response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body, undecoded.
    pub body: String,
}

/// The slice of the GitHub API the token provider needs.
#[async_trait]
pub trait ActionsApi: Send + Sync {
    /// Authenticated POST with an empty body. `path` is relative to the API
    /// root, e.g. `/orgs/acme/actions/runners/registration-token`.
    async fn post(&self, path: &str) -> Result<ApiResponse, BoxError>;
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// How the client authenticates against the API.
pub enum Credentials {
    /// Personal access token.
    AccessToken(String),
    /// GitHub App installation.
    App {
        /// App id, the `iss` claim of the app JWT.
        app_id: i64,
        /// Installation the access token is minted for.
        installation_id: i64,
        /// RSA key the app JWT is signed with.
        private_key: EncodingKey,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::AccessToken(_) => f.write_str("AccessToken(***)"),
            Credentials::App {
                app_id,
                installation_id,
                ..
            } => f
                .debug_struct("App")
                .field("app_id", app_id)
                .field("installation_id", installation_id)
                .finish_non_exhaustive(),
        }
    }
}

impl Credentials {
    /// Pick credentials from the supplied settings.
    ///
    /// A non-empty access token wins. Otherwise a non-zero app id requires an
    /// installation id and a readable RSA private key.
    pub fn from_settings(
        access_token: Option<&str>,
        app_id: Option<i64>,
        installation_id: Option<i64>,
        private_key_path: Option<&Path>,
    ) -> Result<Self, RunnerError> {
        if let Some(token) = access_token.filter(|t| !t.is_empty()) {
            return Ok(Credentials::AccessToken(token.to_string()));
        }

        let Some(app_id) = app_id.filter(|id| *id != 0) else {
            return Err(RunnerError::MissingParameter(
                "please provide personal access token or github application credentials".into(),
            ));
        };

        let installation_id = installation_id.filter(|id| *id != 0).ok_or_else(|| {
            RunnerError::MissingParameter("missing application installation id".into())
        })?;

        let path = private_key_path
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| {
                RunnerError::MissingParameter("missing application private key path".into())
            })?;

        let pem = std::fs::read(path).map_err(|e| {
            RunnerError::InvalidParameter(format!(
                "failed to read private key '{}': {e}",
                path.display()
            ))
        })?;

        let private_key = EncodingKey::from_rsa_pem(&pem).map_err(|e| {
            RunnerError::InvalidParameter(format!(
                "invalid private key '{}': {e}",
                path.display()
            ))
        })?;

        Ok(Credentials::App {
            app_id,
            installation_id,
            private_key,
        })
    }
}

// ---------------------------------------------------------------------------
// GitHubClient
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Clone, Deserialize)]
struct InstallationToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// `reqwest` backed [`ActionsApi`].
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: Url,
    credentials: Credentials,
    installation_token: Mutex<Option<InstallationToken>>,
    trace: Tracing,
}

impl GitHubClient {
    /// Create a client for `api_base` (e.g. `https://api.github.com`).
    pub fn new(credentials: Credentials, api_base: &str, trace: Tracing) -> Result<Self> {
        let http = HttpClientFactory::create_client().context("Failed to build HTTP client")?;
        Self::with_http_client(http, credentials, api_base, trace)
    }

    /// Like [`GitHubClient::new`], with a caller-built HTTP client.
    pub fn with_http_client(
        http: reqwest::Client,
        credentials: Credentials,
        api_base: &str,
        trace: Tracing,
    ) -> Result<Self> {
        let mut api_base =
            Url::parse(api_base).with_context(|| format!("Invalid API URL '{api_base}'"))?;

        // Url::join replaces the last segment unless the base ends in '/'.
        if !api_base.path().ends_with('/') {
            let path = format!("{}/", api_base.path());
            api_base.set_path(&path);
        }

        Ok(Self {
            http,
            api_base,
            credentials,
            installation_token: Mutex::new(None),
            trace,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.api_base.join(path.trim_start_matches('/'))
    }

    /// The bearer token for the next request.
    async fn access_token(&self) -> Result<String, BoxError> {
        let (app_id, installation_id, private_key) = match &self.credentials {
            Credentials::AccessToken(token) => return Ok(token.clone()),
            Credentials::App {
                app_id,
                installation_id,
                private_key,
            } => (*app_id, *installation_id, private_key),
        };

        let refresh_after = Utc::now() + Duration::seconds(INSTALLATION_TOKEN_LEEWAY_SECS);
        let cached = self
            .installation_token
            .lock()
            .as_ref()
            .filter(|t| t.expires_at > refresh_after)
            .map(|t| t.token.clone());
        if let Some(token) = cached {
            return Ok(token);
        }

        let token = self
            .create_installation_token(app_id, installation_id, private_key)
            .await?;
        let value = token.token.clone();
        *self.installation_token.lock() = Some(token);
        Ok(value)
    }

    async fn create_installation_token(
        &self,
        app_id: i64,
        installation_id: i64,
        private_key: &EncodingKey,
    ) -> Result<InstallationToken, BoxError> {
        let jwt = app_jwt(app_id, private_key, Utc::now())?;
        let url = self.endpoint(&endpoints::installation_access_token(installation_id))?;

        self.trace.info(&format!(
            "Requesting installation token for app {app_id}, installation {installation_id}"
        ));

        let response = self
            .http
            .post(url)
            .bearer_auth(jwt)
            .header(CONTENT_LENGTH, 0)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::CREATED {
            let body = response.text().await.unwrap_or_default();
            return Err(format!(
                "installation token request failed with HTTP {}: {}",
                status.as_u16(),
                body
            )
            .into());
        }

        Ok(response.json::<InstallationToken>().await?)
    }
}

#[async_trait]
impl ActionsApi for GitHubClient {
    async fn post(&self, path: &str) -> Result<ApiResponse, BoxError> {
        let url = self.endpoint(path)?;
        let token = self.access_token().await?;

        self.trace.verbose(&format!("POST {url}"));

        let response = self
            .http
            .post(url)
            .bearer_auth(token)
            .header(CONTENT_LENGTH, 0)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        self.trace.verbose(&format!("POST {path} returned HTTP {status}"));

        Ok(ApiResponse { status, body })
    }
}

/// RS256 JWT identifying the app, backdated a minute to absorb clock drift.
fn app_jwt(
    app_id: i64,
    private_key: &EncodingKey,
    now: DateTime<Utc>,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = AppClaims {
        iat: (now - Duration::seconds(60)).timestamp(),
        exp: (now + Duration::minutes(9)).timestamp(),
        iss: app_id.to_string(),
    };
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, private_key)
}
