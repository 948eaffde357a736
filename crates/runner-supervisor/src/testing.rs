// In-memory stand-in for the GitHub API, shared by the unit tests.

use crate::github_client::{ActionsApi, ApiResponse};
use async_trait::async_trait;
use parking_lot::Mutex;
use runner_sdk::BoxError;

pub const REGISTRATION_TOKEN: &str = "REGTOKEN";
pub const REMOVE_TOKEN: &str = "REMOVETOKEN";

/// Answers registration and remove token requests, recording every path.
pub struct FakeApi {
    pub(crate) calls: Mutex<Vec<String>>,
    pub registration_status: u16,
    pub remove_status: u16,
    pub transport_error: bool,
}

impl Default for FakeApi {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            registration_status: 201,
            remove_status: 201,
            transport_error: false,
        }
    }
}

impl FakeApi {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count_ending_with(&self, suffix: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.ends_with(suffix)).count()
    }
}

#[async_trait]
impl ActionsApi for FakeApi {
    async fn post(&self, path: &str) -> Result<ApiResponse, BoxError> {
        self.calls.lock().push(path.to_string());

        if self.transport_error {
            return Err("connection refused".into());
        }

        let (status, token) = if path.ends_with("registration-token") {
            (self.registration_status, REGISTRATION_TOKEN)
        } else {
            (self.remove_status, REMOVE_TOKEN)
        };

        Ok(ApiResponse {
            status,
            body: format!(r#"{{"token":"{token}","expires_at":"2026-10-16T12:00:00Z"}}"#),
        })
    }
}
