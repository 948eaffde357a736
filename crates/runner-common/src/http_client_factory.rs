// Builds the HTTP client used for every GitHub API call.

use crate::constants::{host, variables};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;
use runner_sdk::build_constants::RunnerPackage;
use runner_sdk::StringUtil;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(100);

/// Builds `reqwest` clients configured for the GitHub REST API.
pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Create a `reqwest::Client` for the GitHub REST API.
    ///
    /// - Proxies come from `HTTP_PROXY` / `HTTPS_PROXY` / `NO_PROXY`, which
    ///   reqwest honours on its own.
    /// - If `GITHUB_ACTIONS_RUNNER_TLS_NO_VERIFY` is truthy, TLS certificate
    ///   verification is disabled.
    pub fn create_client() -> reqwest::Result<Client> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(host::ACCEPT));
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static(host::API_VERSION),
        );

        let mut builder = Client::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(Self::user_agent());

        if Self::tls_no_verify() {
            tracing::warn!("TLS certificate verification is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        builder.build()
    }

    /// `runner-supervisor/<version>`.
    pub fn user_agent() -> String {
        format!(
            "{}/{}",
            RunnerPackage::PACKAGE_NAME,
            RunnerPackage::VERSION
        )
    }

    fn tls_no_verify() -> bool {
        std::env::var(variables::TLS_NO_VERIFY)
            .ok()
            .and_then(|v| StringUtil::convert_to_bool(&v))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_names_package_and_version() {
        let ua = HttpClientFactory::user_agent();
        assert!(ua.starts_with("runner-supervisor/"));
        assert!(ua.ends_with(RunnerPackage::VERSION));
    }

    #[test]
    fn builds_client() {
        assert!(HttpClientFactory::create_client().is_ok());
    }
}
