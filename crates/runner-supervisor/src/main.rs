// Entry point for the runner supervisor.
//
// Parses settings, builds the GitHub client and token provider, then hands
// control to the lifecycle controller until run.sh exits or a shutdown signal
// arrives. The exit code tells the container orchestrator whether the runner
// was left registered.

use anyhow::{Context, Result};
use clap::Parser;
use runner_common::constants::return_code;
use runner_common::TraceManager;
use runner_sdk::build_constants::{RunnerPackage, Source};
use runner_sdk::TraceWriter;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use runner_supervisor::cli::{Cli, LogFormat};
use runner_supervisor::{
    exit_code_for, Credentials, GitHubClient, LifecycleError, Runner, RunnerConfig,
    TokenProvider,
};

fn main() {
    let cli = Cli::parse();

    if cli.version {
        println!(
            "{} {} (commit {}, built {})",
            RunnerPackage::PACKAGE_NAME,
            RunnerPackage::VERSION,
            Source::COMMIT_HASH,
            Source::BUILD_DATE
        );
        return;
    }

    init_tracing(&cli);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to build Tokio runtime: {}", e);
            std::process::exit(return_code::TERMINATED_ERROR);
        }
    };

    let exit_code = runtime.block_on(async move {
        match run(cli).await {
            Ok(code) => code,
            Err(e) => {
                tracing::error!("Runner supervisor failed: {:#}", e);
                return_code::TERMINATED_ERROR
            }
        }
    });

    tracing::info!("Runner supervisor exiting with code {}", exit_code);
    std::process::exit(exit_code);
}

fn init_tracing(cli: &Cli) {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(cli.log_level().into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match cli.log_format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

async fn run(cli: Cli) -> Result<i32> {
    tracing::info!("Runner supervisor starting.");
    tracing::info!("  Version = {}", RunnerPackage::VERSION);
    tracing::info!("  Commit  = {}", Source::COMMIT_HASH);

    let traces = TraceManager::default();

    let credentials = cli.credentials().context("invalid github credentials")?;
    if let Credentials::AccessToken(token) = &credentials {
        traces.secret_masker().add_value(token);
    }

    let client = GitHubClient::new(credentials, &cli.api_url, traces.get("GitHubClient"))
        .context("failed to create github client")?;
    let token_provider = TokenProvider::new(cli.url(), Arc::new(client))
        .context("failed to create token provider")?;
    tracing::info!("  Scope   = {}", token_provider.base_path());

    let config = RunnerConfig {
        replace: cli.replace,
        once: cli.once,
        url: cli.url().to_string(),
        path: cli.runner_path.clone(),
        work_dir: cli.work_dir.clone(),
        name: cli.runner_name(),
        labels: cli.labels(),
        token_provider: Arc::new(token_provider),
    };

    let mut runner = Runner::new(config, &traces).context("failed to create runner")?;

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let trace = traces.get("Supervisor");
    let result = runner.start(cancel.clone()).await;
    if let Err(e) = &result {
        if cancel.is_cancelled() {
            trace.info("Runner stopped by shutdown signal");
        }
        if e.is_fatal() {
            trace.error("Fatal: runner is still registered with github");
        }
        trace.error_err(e);
        if let LifecycleError::FatalShutdown { run: Some(run), .. } = e {
            trace.error_err(run);
        }
    }

    Ok(exit_code_for(&result))
}

/// Cancel `cancel` on Ctrl-C or SIGTERM.
fn spawn_signal_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("Shutdown signal received, stopping runner");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("Unable to listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
