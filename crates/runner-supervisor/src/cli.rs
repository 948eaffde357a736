// Command-line surface of the supervisor. Every setting can also come from the
// environment so the binary runs unchanged inside a container.

use clap::{ArgAction, Parser, ValueEnum};
use runner_common::constants::{host, variables};
use runner_sdk::{RunnerError, StringUtil};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::github_client::Credentials;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "runner-supervisor",
    about = "Registers a self-hosted Actions runner, runs it, and removes it on exit",
    disable_version_flag = true
)]
pub struct Cli {
    /// Personal access token used to request runner tokens
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// GitHub App id, used when no access token is given
    #[arg(long, env = "GITHUB_APP_ID")]
    pub github_app_id: Option<i64>,

    /// Installation id of the GitHub App
    #[arg(long, env = "GITHUB_APP_INSTALLATION_ID")]
    pub github_app_installation_id: Option<i64>,

    /// Path to the GitHub App's PEM encoded private key
    #[arg(long, env = "GITHUB_APP_PRIVATE_KEY_PATH")]
    pub github_app_private_key: Option<PathBuf>,

    /// Replace an existing runner with the same name
    #[arg(
        long,
        action = ArgAction::Set,
        num_args = 0..=1,
        default_value_t = true,
        default_missing_value = "true"
    )]
    pub replace: bool,

    /// Exit after a single job
    #[arg(long)]
    pub once: bool,

    /// Organization or repository URL, e.g. https://github.com/acme/widgets
    #[arg(long, env = "REG_URL", required_unless_present = "version")]
    pub url: Option<String>,

    /// Runner installation directory containing config.sh and run.sh
    #[arg(long, env = "RUNNER_PATH", default_value = "/runner")]
    pub runner_path: PathBuf,

    /// Directory jobs run in
    #[arg(long, env = "RUNNER_WORKDIR", default_value = "/_work")]
    pub work_dir: String,

    /// Runner name, defaults to the host name
    #[arg(long, env = "RUNNER_NAME")]
    pub name: Option<String>,

    /// Extra runner label, may be repeated; merged with RUNNER_LABELS
    #[arg(short = 'l', long = "labels")]
    pub labels: Vec<String>,

    /// GitHub REST API root, e.g. https://ghe.example.com/api/v3
    #[arg(long, env = "GITHUB_API_URL", default_value = host::DEFAULT_API_URL)]
    pub api_url: String,

    /// Log output format
    #[arg(long, env = "RUNNER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Print version information and exit
    #[arg(long)]
    pub version: bool,
}

impl Cli {
    /// The registration URL, empty when only `--version` was given.
    pub fn url(&self) -> &str {
        self.url.as_deref().unwrap_or_default()
    }

    /// Labels from the command line followed by those in `RUNNER_LABELS`.
    pub fn labels(&self) -> Vec<String> {
        let from_env = std::env::var(variables::RUNNER_LABELS).ok();
        merge_labels(&self.labels, from_env.as_deref())
    }

    /// The configured name, else the host name, else `runner-<unix nanos>`.
    pub fn runner_name(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }

        match hostname::get().ok().and_then(|h| h.into_string().ok()) {
            Some(host) if !host.is_empty() => host,
            _ => fallback_name(),
        }
    }

    /// Credentials for the GitHub client; an access token wins over app settings.
    pub fn credentials(&self) -> Result<Credentials, RunnerError> {
        Credentials::from_settings(
            self.github_token.as_deref(),
            self.github_app_id,
            self.github_app_installation_id,
            self.github_app_private_key.as_deref(),
        )
    }

    /// Default level for the log filter, raised by each `-v`.
    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

fn merge_labels(flags: &[String], env: Option<&str>) -> Vec<String> {
    let mut labels: Vec<String> = flags
        .iter()
        .flat_map(|l| StringUtil::split_list(l))
        .collect();

    if let Some(env) = env {
        for label in StringUtil::split_list(env) {
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
    }

    labels
}

fn fallback_name() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("runner-{nanos}")
}
