// Runner lifecycle: register with GitHub, run jobs, remove the registration.
//
//   Unregistered --register--> Registered --run.sh--> (Running) --remove--> Unregistered
//
// Register and remove run under their own never-cancelled token so a shutdown
// signal cannot leave a half-registered runner behind; only run.sh sees the
// caller's cancellation.

use crate::token_provider::TokenProvider;
use futures::FutureExt;
use runner_common::constants::{command_line, return_code, WellKnownConfigFile, WellKnownScript};
use runner_common::{SecretMasker, TraceManager, Tracing};
use runner_sdk::{OutputSink, ProcessInvoker, RunnerError, TraceWriter};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything needed to register and run one runner. Never mutated after construction.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Pass `--replace` to config.sh.
    pub replace: bool,
    /// Pass `--once` to run.sh.
    pub once: bool,
    /// Organization or repository registration URL.
    pub url: String,
    /// Runner installation directory holding config.sh and run.sh.
    pub path: PathBuf,
    /// Work directory for jobs; omitted from registration when empty.
    pub work_dir: String,
    /// Display name the runner registers under.
    pub name: String,
    /// Custom labels, joined with commas for `--labels`.
    pub labels: Vec<String>,
    /// Source of registration and removal tokens.
    pub token_provider: Arc<TokenProvider>,
}

/// Outcome of [`Runner::start`] when something went wrong.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    /// Registration or the run step failed. The runner is not left registered
    /// by this process.
    #[error(transparent)]
    Failed(#[from] RunnerError),

    /// Removal failed after the run step finished, so the runner is still
    /// registered on the host. `run` carries the run step's own error, if any.
    #[error("failed to remove runner from github: {removal}")]
    FatalShutdown {
        removal: RunnerError,
        run: Option<RunnerError>,
    },
}

impl LifecycleError {
    /// `true` when the runner was left registered on GitHub.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LifecycleError::FatalShutdown { .. })
    }

    /// The supervisor's process exit code for this outcome.
    pub fn return_code(&self) -> i32 {
        match self {
            LifecycleError::Failed(_) => return_code::TERMINATED_ERROR,
            LifecycleError::FatalShutdown { .. } => return_code::REMOVAL_FAILED,
        }
    }
}

/// Drives one runner install through register, run and remove.
///
/// `registered` mirrors the host-side state: it starts from the marker probe
/// and only flips after a successful config.sh call.
pub struct Runner {
    registered: bool,
    config: RunnerConfig,
    run_cmd: ProcessInvoker,
    config_cmd: ProcessInvoker,
    secret_masker: Arc<SecretMasker>,
    trace: Tracing,
}

impl Runner {
    /// Bind to the scripts under `config.path`, forwarding their output to
    /// this process's stdout and stderr.
    pub fn new(config: RunnerConfig, traces: &TraceManager) -> Result<Self, RunnerError> {
        Self::with_output(config, traces, OutputSink::Inherit, OutputSink::Inherit)
    }

    /// Like [`Runner::new`], with explicit sinks for the scripts' output.
    pub fn with_output(
        config: RunnerConfig,
        traces: &TraceManager,
        stdout: OutputSink,
        stderr: OutputSink,
    ) -> Result<Self, RunnerError> {
        let invoker_trace: Arc<dyn TraceWriter> = Arc::new(traces.get("ProcessInvoker"));

        let run_cmd = ProcessInvoker::new(
            config.path.join(WellKnownScript::Run.file_name()),
            stdout.clone(),
            stderr.clone(),
            invoker_trace.clone(),
        )?;
        let config_cmd = ProcessInvoker::new(
            config.path.join(WellKnownScript::Config.file_name()),
            stdout,
            stderr,
            invoker_trace,
        )?;

        let registered = is_registered_at(&config.path);
        let trace = traces.get("Runner");
        trace.info(&format!(
            "Runner '{}' at '{}' is {}",
            config.name,
            config.path.display(),
            if registered { "already registered" } else { "not registered" }
        ));

        Ok(Self {
            registered,
            config,
            run_cmd,
            config_cmd,
            secret_masker: traces.secret_masker().clone(),
            trace,
        })
    }

    /// Whether this install is currently registered with GitHub.
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Register if needed, run jobs until run.sh exits or `cancel` fires,
    /// then remove the registration whatever happened in between.
    pub async fn start(&mut self, cancel: CancellationToken) -> Result<(), LifecycleError> {
        self.register().await?;

        let args = self.run_args();
        self.trace
            .info(&format!("Starting runner '{}'", self.run_cmd.path().display()));
        let run = AssertUnwindSafe(self.run_cmd.run(cancel, &args))
            .catch_unwind()
            .await;

        let removal = self.remove().await;

        let run = match run {
            Ok(result) => result.err(),
            Err(panic) => {
                if let Err(removal) = &removal {
                    self.trace
                        .error(&format!("failed to remove runner from github: {removal}"));
                }
                std::panic::resume_unwind(panic);
            }
        };

        match (removal, run) {
            (Err(removal), run) => Err(LifecycleError::FatalShutdown { removal, run }),
            (Ok(()), Some(err)) => Err(LifecycleError::Failed(err)),
            (Ok(()), None) => Ok(()),
        }
    }

    async fn register(&mut self) -> Result<(), RunnerError> {
        if self.registered {
            self.trace.info("Runner already registered, skipping registration");
            return Ok(());
        }

        let mut args = self.registration_args();

        let token = self
            .config
            .token_provider
            .create_registration_token()
            .await?;
        self.secret_masker.add_value(&token.token);
        args.push(command_line::args::TOKEN.to_string());
        args.push(token.token);

        self.trace.info(&format!(
            "Registering runner '{}' with {}",
            self.config.name, self.config.url
        ));

        self.config_cmd
            .run(CancellationToken::new(), &args)
            .await?;

        self.registered = true;
        self.trace.info("Runner registered");
        Ok(())
    }

    async fn remove(&mut self) -> Result<(), RunnerError> {
        if !self.registered {
            return Ok(());
        }

        let token = self.config.token_provider.create_remove_token().await?;
        self.secret_masker.add_value(&token.token);

        let args = vec![
            command_line::commands::REMOVE.to_string(),
            command_line::args::TOKEN.to_string(),
            token.token,
        ];

        self.trace
            .info(&format!("Removing runner '{}'", self.config.name));

        self.config_cmd
            .run(CancellationToken::new(), &args)
            .await
            .map_err(|e| e.context("failed to remove runner"))?;

        self.registered = false;
        self.trace.info("Runner removed");
        Ok(())
    }

    /// config.sh arguments, without the token.
    fn registration_args(&self) -> Vec<String> {
        let config = &self.config;
        let mut args = vec![
            command_line::flags::UNATTENDED.to_string(),
            command_line::args::URL.to_string(),
            config.url.clone(),
            command_line::args::NAME.to_string(),
            config.name.clone(),
        ];

        if !config.work_dir.is_empty() {
            args.push(command_line::args::WORK.to_string());
            args.push(config.work_dir.clone());
        }

        if config.replace {
            args.push(command_line::flags::REPLACE.to_string());
        }

        if !config.labels.is_empty() {
            args.push(command_line::args::LABELS.to_string());
            args.push(config.labels.join(","));
        }

        args
    }

    fn run_args(&self) -> Vec<String> {
        if self.config.once {
            vec![command_line::flags::ONCE.to_string()]
        } else {
            Vec::new()
        }
    }
}

/// Process exit code for the outcome of [`Runner::start`].
///
/// A run stopped by cancellation is still a failed run. Removal failure wins
/// over any run error because the registration leaked.
pub fn exit_code_for(result: &Result<(), LifecycleError>) -> i32 {
    match result {
        Ok(()) => return_code::SUCCESS,
        Err(e) => e.return_code(),
    }
}

/// Both installer markers present means a previous process registered this install.
pub fn is_registered_at(path: &Path) -> bool {
    path.join(WellKnownConfigFile::Credentials.file_name()).exists()
        && path.join(WellKnownConfigFile::Runner.file_name()).exists()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::{FakeApi, REGISTRATION_TOKEN, REMOVE_TOKEN};
    use runner_sdk::ErrorKind;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;
    use tempfile::TempDir;

    const REG_PATH: &str = "/repos/acme/widgets/actions/runners/registration-token";
    const REMOVE_PATH: &str = "/repos/acme/widgets/actions/runners/remove-token";

    /// An install directory whose scripts append `<script> <args>` to calls.log.
    struct Install {
        dir: TempDir,
    }

    impl Install {
        fn new() -> Self {
            Self::with_scripts("exit 0", "exit 0")
        }

        /// `config_tail` and `run_tail` run after the call has been logged.
        fn with_scripts(config_tail: &str, run_tail: &str) -> Self {
            let install = Self {
                dir: tempfile::tempdir().unwrap(),
            };
            install.script("config.sh", "config", config_tail);
            install.script("run.sh", "run", run_tail);
            install
        }

        fn script(&self, file: &str, label: &str, tail: &str) {
            let path = self.dir.path().join(file);
            let body = format!(
                "#!/bin/sh\necho \"{label} $*\" >> '{}'\n{tail}\n",
                self.log().display()
            );
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        fn mark_registered(&self) {
            std::fs::write(self.dir.path().join(".credentials"), "{}").unwrap();
            std::fs::write(self.dir.path().join(".runner"), "{}").unwrap();
        }

        fn log(&self) -> PathBuf {
            self.dir.path().join("calls.log")
        }

        fn calls(&self) -> Vec<String> {
            std::fs::read_to_string(self.log())
                .unwrap_or_default()
                .lines()
                .map(|l| l.trim_end().to_string())
                .collect()
        }

        fn config(&self, api: Arc<FakeApi>) -> RunnerConfig {
            RunnerConfig {
                replace: true,
                once: true,
                url: "https://github.com/acme/widgets".into(),
                path: self.dir.path().to_path_buf(),
                work_dir: String::new(),
                name: "ci-1".into(),
                labels: vec!["linux".into(), "x64".into()],
                token_provider: Arc::new(
                    TokenProvider::new("https://github.com/acme/widgets", api).unwrap(),
                ),
            }
        }

        fn runner(&self, api: Arc<FakeApi>) -> Runner {
            Runner::with_output(
                self.config(api),
                &TraceManager::default(),
                OutputSink::Null,
                OutputSink::Null,
            )
            .unwrap()
        }
    }

    #[test]
    fn probe_without_markers() {
        let install = Install::new();
        let runner = install.runner(Arc::new(FakeApi::default()));
        assert!(!runner.is_registered());
    }

    #[test]
    fn probe_with_both_markers() {
        let install = Install::new();
        install.mark_registered();
        let runner = install.runner(Arc::new(FakeApi::default()));
        assert!(runner.is_registered());
    }

    #[test]
    fn probe_with_one_marker() {
        let install = Install::new();
        std::fs::write(install.dir.path().join(".runner"), "{}").unwrap();
        assert!(!install.runner(Arc::new(FakeApi::default())).is_registered());

        let install = Install::new();
        std::fs::write(install.dir.path().join(".credentials"), "{}").unwrap();
        assert!(!install.runner(Arc::new(FakeApi::default())).is_registered());
    }

    #[test]
    fn missing_scripts_fail_construction() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(FakeApi::default());
        let config = RunnerConfig {
            replace: true,
            once: false,
            url: "https://github.com/acme".into(),
            path: dir.path().to_path_buf(),
            work_dir: String::new(),
            name: "ci-1".into(),
            labels: Vec::new(),
            token_provider: Arc::new(TokenProvider::new("https://github.com/acme", api).unwrap()),
        };

        let err = Runner::new(config, &TraceManager::default()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Executable);
    }

    #[test]
    fn registration_args_optional_parts() {
        let install = Install::new();
        let api = Arc::new(FakeApi::default());
        let mut config = install.config(api);
        config.work_dir = "/_work".into();
        config.replace = false;
        config.labels.clear();
        let runner = Runner::with_output(
            config,
            &TraceManager::default(),
            OutputSink::Null,
            OutputSink::Null,
        )
        .unwrap();

        assert_eq!(
            runner.registration_args(),
            vec![
                "--unattended",
                "--url",
                "https://github.com/acme/widgets",
                "--name",
                "ci-1",
                "--work",
                "/_work",
            ]
        );
        assert_eq!(runner.run_args(), vec!["--once"]);
    }

    #[tokio::test]
    async fn register_twice_is_one_request_and_one_invocation() {
        let install = Install::new();
        let api = Arc::new(FakeApi::default());
        let mut runner = install.runner(api.clone());

        runner.register().await.unwrap();
        runner.register().await.unwrap();

        assert!(runner.is_registered());
        assert_eq!(api.calls(), vec![REG_PATH]);
        assert_eq!(install.calls().len(), 1);
    }

    #[tokio::test]
    async fn remove_when_unregistered_does_nothing() {
        let install = Install::new();
        let api = Arc::new(FakeApi::default());
        let mut runner = install.runner(api.clone());

        runner.remove().await.unwrap();

        assert!(api.calls().is_empty());
        assert!(install.calls().is_empty());
    }

    #[tokio::test]
    async fn start_registers_runs_and_removes() {
        let install = Install::new();
        let api = Arc::new(FakeApi::default());
        let traces = TraceManager::default();
        let mut runner = Runner::with_output(
            install.config(api.clone()),
            &traces,
            OutputSink::Null,
            OutputSink::Null,
        )
        .unwrap();

        runner.start(CancellationToken::new()).await.unwrap();

        assert_eq!(
            install.calls(),
            vec![
                format!(
                    "config --unattended --url https://github.com/acme/widgets --name ci-1 --replace --labels linux,x64 --token {REGISTRATION_TOKEN}"
                ),
                "run --once".to_string(),
                format!("config remove --token {REMOVE_TOKEN}"),
            ]
        );
        assert_eq!(api.calls(), vec![REG_PATH, REMOVE_PATH]);
        assert!(!runner.is_registered());

        let masker = traces.secret_masker();
        assert_eq!(masker.mask_secrets(REGISTRATION_TOKEN), "***");
        assert_eq!(masker.mask_secrets(REMOVE_TOKEN), "***");
    }

    #[tokio::test]
    async fn start_when_already_registered_skips_registration() {
        let install = Install::new();
        install.mark_registered();
        let api = Arc::new(FakeApi::default());
        let mut runner = install.runner(api.clone());

        runner.start(CancellationToken::new()).await.unwrap();

        assert_eq!(api.calls(), vec![REMOVE_PATH]);
        assert_eq!(
            install.calls(),
            vec![
                "run --once".to_string(),
                format!("config remove --token {REMOVE_TOKEN}")
            ]
        );
    }

    #[tokio::test]
    async fn cancellation_still_removes_once() {
        let install = Install::with_scripts("exit 0", "exec sleep 30");
        let api = Arc::new(FakeApi::default());
        let mut runner = install.runner(api.clone());
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            canceller.cancel();
        });

        let err = runner.start(cancel).await.unwrap_err();

        match err {
            LifecycleError::Failed(ref e) => assert!(e.is_cancelled()),
            ref other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(api.count_ending_with("remove-token"), 1);
        assert_eq!(
            install
                .calls()
                .iter()
                .filter(|c| c.starts_with("config remove"))
                .count(),
            1
        );
        assert!(!runner.is_registered());
    }

    #[tokio::test]
    async fn registration_token_failure_runs_nothing() {
        let install = Install::new();
        let api = Arc::new(FakeApi {
            registration_status: 403,
            ..FakeApi::default()
        });
        let mut runner = install.runner(api.clone());

        let err = runner.start(CancellationToken::new()).await.unwrap_err();

        assert!(!err.is_fatal());
        assert_eq!(err.return_code(), return_code::TERMINATED_ERROR);
        match err {
            LifecycleError::Failed(e) => assert_eq!(e.kind(), ErrorKind::TokenRequest),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(install.calls().is_empty());
        assert_eq!(api.calls(), vec![REG_PATH]);
        assert!(!runner.is_registered());
    }

    #[tokio::test]
    async fn registration_process_failure_runs_nothing() {
        let install = Install::with_scripts("exit 1", "exit 0");
        let api = Arc::new(FakeApi::default());
        let mut runner = install.runner(api.clone());

        let err = runner.start(CancellationToken::new()).await.unwrap_err();

        match err {
            LifecycleError::Failed(e) => {
                assert_eq!(e.kind(), ErrorKind::Process);
                assert_eq!(e.exit_code(), Some(1));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(install.calls().len(), 1);
        assert_eq!(api.calls(), vec![REG_PATH]);
        assert!(!runner.is_registered());
    }

    #[tokio::test]
    async fn run_failure_is_returned_after_removal() {
        let install = Install::with_scripts("exit 0", "exit 1");
        let api = Arc::new(FakeApi::default());
        let mut runner = install.runner(api.clone());

        let err = runner.start(CancellationToken::new()).await.unwrap_err();

        match err {
            LifecycleError::Failed(e) => assert_eq!(e.exit_code(), Some(1)),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(api.calls(), vec![REG_PATH, REMOVE_PATH]);
        assert!(!runner.is_registered());
    }

    #[tokio::test]
    async fn remove_token_failure_is_fatal() {
        let install = Install::new();
        let api = Arc::new(FakeApi {
            remove_status: 500,
            ..FakeApi::default()
        });
        let mut runner = install.runner(api.clone());

        let err = runner.start(CancellationToken::new()).await.unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(err.return_code(), return_code::REMOVAL_FAILED);
        match err {
            LifecycleError::FatalShutdown { removal, run } => {
                assert_eq!(removal.kind(), ErrorKind::TokenRequest);
                assert!(run.is_none());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(runner.is_registered());
    }

    #[tokio::test]
    async fn remove_process_failure_is_fatal_with_context() {
        let install = Install::with_scripts("if [ \"$1\" = remove ]; then exit 2; fi", "exit 0");
        let api = Arc::new(FakeApi::default());
        let mut runner = install.runner(api);

        let err = runner.start(CancellationToken::new()).await.unwrap_err();

        match err {
            LifecycleError::FatalShutdown { removal, .. } => {
                assert_eq!(removal.kind(), ErrorKind::Process);
                assert!(removal.to_string().starts_with("failed to remove runner"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(runner.is_registered());
    }

    fn exit_code_error(code: i32) -> RunnerError {
        RunnerError::ExitCode {
            exit_code: code,
            path: PathBuf::from("/runner/run.sh"),
            arguments: "--once".into(),
        }
    }

    #[test]
    fn exit_code_for_success() {
        assert_eq!(exit_code_for(&Ok(())), return_code::SUCCESS);
    }

    #[test]
    fn exit_code_for_run_failure() {
        let result = Err(LifecycleError::Failed(exit_code_error(1)));
        assert_eq!(exit_code_for(&result), return_code::TERMINATED_ERROR);
    }

    #[test]
    fn exit_code_for_cancelled_run_is_failure() {
        let result = Err(LifecycleError::Failed(RunnerError::Cancelled {
            path: PathBuf::from("/runner/run.sh"),
        }));
        assert_eq!(exit_code_for(&result), return_code::TERMINATED_ERROR);
    }

    #[test]
    fn exit_code_for_removal_failure_is_fatal() {
        let removal = RunnerError::RequestFailed {
            endpoint: REMOVE_PATH.into(),
            status: 500,
        };
        let result = Err(LifecycleError::FatalShutdown {
            removal,
            run: Some(exit_code_error(1)),
        });
        assert_eq!(exit_code_for(&result), return_code::REMOVAL_FAILED);

        let result = Err(LifecycleError::FatalShutdown {
            removal: exit_code_error(2).context("failed to remove runner"),
            run: None,
        });
        assert_eq!(exit_code_for(&result), return_code::REMOVAL_FAILED);
    }
}
