// runner-supervisor: Registers a self-hosted Actions runner with GitHub, runs
// it, and removes the registration when it stops.
// Depends on `runner-sdk` and `runner-common`.

pub mod cli;
pub mod github_client;
pub mod runner;
pub mod token_provider;

#[cfg(test)]
mod testing;

pub use github_client::{ActionsApi, ApiResponse, Credentials, GitHubClient};
pub use runner::{exit_code_for, LifecycleError, Runner, RunnerConfig};
pub use token_provider::{RegistrationToken, RemoveToken, RunnerToken, TokenProvider};
