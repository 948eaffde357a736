use crate::error::RunnerError;
use crate::trace::TraceWriter;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Exit code the runner agent uses to say "I replaced myself, launch me again".
pub const AUTO_UPDATE_EXIT_CODE: i32 = 3;

/// The duration to wait after sending SIGINT before escalating to SIGTERM.
const SIGINT_TIMEOUT: Duration = Duration::from_millis(7500);
/// The duration to wait after sending SIGTERM before escalating to SIGKILL.
const SIGTERM_TIMEOUT: Duration = Duration::from_millis(2500);

/// How many times a spawn hitting ETXTBSY is attempted.
const SPAWN_ATTEMPTS: u32 = 3;
const SPAWN_RETRY_DELAY: Duration = Duration::from_millis(50);

/// A line received from the child's stdout or stderr.
#[derive(Debug, Clone)]
pub struct ProcessDataReceivedEventArgs {
    /// The line, without its terminator.
    pub data: String,
}

/// Where a child's output stream goes.
#[derive(Debug, Clone, Default)]
pub enum OutputSink {
    /// Share this process's own stdout/stderr.
    #[default]
    Inherit,
    /// Discard the stream.
    Null,
    /// Read line by line and send each line on the channel.
    Channel(mpsc::UnboundedSender<ProcessDataReceivedEventArgs>),
}

impl OutputSink {
    fn stdio(&self) -> Stdio {
        match self {
            OutputSink::Inherit => Stdio::inherit(),
            OutputSink::Null => Stdio::null(),
            OutputSink::Channel(_) => Stdio::piped(),
        }
    }
}

/// Launches one fixed executable, relaunching it for as long as it asks to
/// be restarted after a self-update.
///
/// The child gets this process's environment unmodified. Cancellation stops
/// the child gracefully (SIGINT → SIGTERM → SIGKILL) and is reported as a
/// process error.
pub struct ProcessInvoker {
    path: PathBuf,
    stdout: OutputSink,
    stderr: OutputSink,
    trace: Arc<dyn TraceWriter>,
}

impl std::fmt::Debug for ProcessInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessInvoker")
            .field("path", &self.path)
            .field("stdout", &self.stdout)
            .field("stderr", &self.stderr)
            .finish()
    }
}

impl ProcessInvoker {
    /// Bind an invoker to `path`.
    ///
    /// Fails with `ExecutableNotFound` when nothing exists at `path`, with
    /// `Inaccessible` when it cannot be inspected, and with `NotExecutable`
    /// when it is not a file carrying any execute bit.
    pub fn new(
        path: impl Into<PathBuf>,
        stdout: OutputSink,
        stderr: OutputSink,
        trace: Arc<dyn TraceWriter>,
    ) -> Result<Self, RunnerError> {
        let path = path.into();

        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RunnerError::ExecutableNotFound { path })
            }
            Err(source) => return Err(RunnerError::Inaccessible { path, source }),
        };

        if !metadata.is_file() || !is_exec_any(&metadata) {
            return Err(RunnerError::NotExecutable { path });
        }

        Ok(Self {
            path,
            stdout,
            stderr,
            trace,
        })
    }

    /// The executable this invoker launches.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run the executable to completion with `args`.
    ///
    /// Exit code 0 is success. [`AUTO_UPDATE_EXIT_CODE`] relaunches with the
    /// same arguments, without limit. Anything else is an `ExitCode` error.
    pub async fn run(&self, cancel: CancellationToken, args: &[String]) -> Result<(), RunnerError> {
        let arguments = args.join(" ");

        loop {
            if cancel.is_cancelled() {
                return Err(RunnerError::Cancelled {
                    path: self.path.clone(),
                });
            }

            match self.run_once(&cancel, args, &arguments).await? {
                0 => return Ok(()),
                AUTO_UPDATE_EXIT_CODE => {
                    self.trace.warning(&format!(
                        "!!!! Runner Auto Upgrade !!!! '{}' exited with code {}, relaunching with the same arguments.",
                        self.path.display(),
                        AUTO_UPDATE_EXIT_CODE
                    ));
                }
                exit_code => {
                    return Err(RunnerError::ExitCode {
                        exit_code,
                        path: self.path.clone(),
                        arguments,
                    });
                }
            }
        }
    }

    /// One launch of the child. Returns its exit code (-1 when killed by a signal).
    async fn run_once(
        &self,
        cancel: &CancellationToken,
        args: &[String],
        arguments: &str,
    ) -> Result<i32, RunnerError> {
        self.trace.info("Starting process:");
        self.trace
            .info(&format!("  File name: '{}'", self.path.display()));
        self.trace.info(&format!("  Arguments: '{arguments}'"));

        let start = Instant::now();
        let mut child = self.spawn(args).await?;

        let pid = child.id().unwrap_or(0);
        self.trace.info(&format!(
            "Process started with process id {pid}, waiting for process exit."
        ));

        let stdout_task = forward_lines(child.stdout.take(), &self.stdout);
        let stderr_task = forward_lines(child.stderr.take(), &self.stderr);

        let exit_code: i32;
        let was_cancelled;

        tokio::select! {
            status = child.wait() => {
                was_cancelled = false;
                exit_code = status
                    .map_err(|source| RunnerError::Launch { path: self.path.clone(), source })?
                    .code()
                    .unwrap_or(-1);
            }
            _ = cancel.cancelled() => {
                was_cancelled = true;
                self.trace.info("Cancellation requested.");
                exit_code = self.cancel_and_kill_process(&mut child).await;
            }
        }

        for task in [stdout_task, stderr_task].into_iter().flatten() {
            let _ = task.await;
        }

        let elapsed = start.elapsed();
        self.trace.info(&format!(
            "Finished process {pid} with exit code {exit_code}, and elapsed time {elapsed:.2?}."
        ));

        if was_cancelled {
            return Err(RunnerError::Cancelled {
                path: self.path.clone(),
            });
        }

        Ok(exit_code)
    }

    /// Spawn the child, retrying briefly while the file is still open for
    /// writing elsewhere (ETXTBSY), which happens right after a self-update.
    async fn spawn(&self, args: &[String]) -> Result<Child, RunnerError> {
        let mut attempt = 1;
        loop {
            let mut cmd = Command::new(&self.path);
            cmd.args(args)
                .stdin(Stdio::null())
                .stdout(self.stdout.stdio())
                .stderr(self.stderr.stdio())
                .kill_on_drop(true);

            match cmd.spawn() {
                Ok(child) => return Ok(child),
                Err(e) if is_text_file_busy(&e) && attempt < SPAWN_ATTEMPTS => {
                    self.trace.verbose(&format!(
                        "'{}' is busy, retrying spawn (attempt {attempt}).",
                        self.path.display()
                    ));
                    attempt += 1;
                    tokio::time::sleep(SPAWN_RETRY_DELAY).await;
                }
                Err(source) => {
                    return Err(RunnerError::Launch {
                        path: self.path.clone(),
                        source,
                    })
                }
            }
        }
    }

    /// SIGINT, then SIGTERM, then kill. Returns the exit code observed.
    async fn cancel_and_kill_process(&self, child: &mut Child) -> i32 {
        if self.send_signal_and_wait(child, Signal::Int, SIGINT_TIMEOUT).await {
            self.trace
                .info("Process cancelled successfully through SIGINT.");
            return exit_code_of(child).await;
        }

        if self.send_signal_and_wait(child, Signal::Term, SIGTERM_TIMEOUT).await {
            self.trace
                .info("Process terminated successfully through SIGTERM.");
            return exit_code_of(child).await;
        }

        self.trace
            .info("Kill process since both cancel and terminate signals have been ignored.");
        let _ = child.kill().await;
        exit_code_of(child).await
    }

    /// Send `signal` and wait up to `timeout`. `true` when the child exited in time.
    #[cfg(unix)]
    async fn send_signal_and_wait(
        &self,
        child: &mut Child,
        signal: Signal,
        timeout: Duration,
    ) -> bool {
        let pid = match child.id() {
            Some(id) => id,
            // Already reaped.
            None => return true,
        };

        let sig = match signal {
            Signal::Int => nix::sys::signal::Signal::SIGINT,
            Signal::Term => nix::sys::signal::Signal::SIGTERM,
        };

        self.trace.info(&format!("Sending {sig:?} to process {pid}."));

        if nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), sig).is_err() {
            self.trace
                .info(&format!("{sig:?} signal failed to send to process {pid}."));
            return false;
        }

        tokio::select! {
            result = child.wait() => result.is_ok(),
            _ = tokio::time::sleep(timeout) => {
                self.trace.info(&format!(
                    "Process did not honor {sig:?} within {:.1}s.",
                    timeout.as_secs_f64()
                ));
                false
            }
        }
    }

    #[cfg(not(unix))]
    async fn send_signal_and_wait(
        &self,
        child: &mut Child,
        _signal: Signal,
        timeout: Duration,
    ) -> bool {
        tokio::select! {
            result = child.wait() => result.is_ok(),
            _ = tokio::time::sleep(timeout) => false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Int,
    Term,
}

async fn exit_code_of(child: &mut Child) -> i32 {
    child
        .wait()
        .await
        .map(|s| s.code().unwrap_or(-1))
        .unwrap_or(-1)
}

fn forward_lines<R>(stream: Option<R>, sink: &OutputSink) -> Option<JoinHandle<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (Some(stream), OutputSink::Channel(tx)) = (stream, sink) else {
        return None;
    };

    let tx = tx.clone();
    Some(tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let _ = tx.send(ProcessDataReceivedEventArgs { data: line });
        }
    }))
}

#[cfg(unix)]
fn is_exec_any(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_exec_any(_metadata: &std::fs::Metadata) -> bool {
    true
}

#[cfg(unix)]
fn is_text_file_busy(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(nix::errno::Errno::ETXTBSY as i32)
}

#[cfg(not(unix))]
fn is_text_file_busy(_e: &std::io::Error) -> bool {
    false
}
