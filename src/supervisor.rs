/// Supervised sqlmap run: spawn the subprocess, poll it on a fixed cadence,
/// drain its merged stdout/stderr, and stop it on timeout, stall, or interrupt.
///
/// Everything that decides the outcome happens in one polling loop. stdout and
/// stderr share a single pipe, so lines keep the order the process wrote them.
/// One reader task turns that pipe into a line channel that only the loop
/// consumes, so a silent process never blocks a check.
use crate::classifier::OutputClassifier;
use crate::command::{build_args, Invocation, RunConfig};
use crate::config::SupervisorConfig;
use crate::notify::Notifier;
use crate::signals::InterruptFlag;
use crate::terminate::{terminate_tree, Termination, TreeKill};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Timers and thresholds for one supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub poll_interval: Duration,
    pub spinner_interval: Duration,
    /// Identical progress messages tolerated before a loop is suspected.
    pub loop_repeat_threshold: u32,
    pub grace_period: Duration,
    pub kill_wait: Duration,
    /// Grace period (and post-kill wait) after a user interrupt.
    pub interrupt_grace: Duration,
    /// Upper bound on waiting for the output pipes to close after exit.
    pub drain_timeout: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from(&SupervisorConfig::default())
    }
}

impl From<&SupervisorConfig> for SupervisorSettings {
    fn from(config: &SupervisorConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            spinner_interval: config.spinner_interval(),
            loop_repeat_threshold: config.loop_repeat_threshold,
            grace_period: config.grace_period(),
            kill_wait: config.kill_wait(),
            interrupt_grace: config.interrupt_grace(),
            drain_timeout: config.drain_timeout(),
        }
    }
}

/// Why the polling loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    Exited,
    Timeout,
    /// No output for longer than the stall timeout, or a progress loop.
    Stalled,
    Interrupted,
}

/// Everything the result builder needs from a finished run.
#[derive(Debug)]
pub struct RunOutcome {
    /// Raw lines in emission order, line endings included.
    pub lines: Vec<String>,
    pub reason: TerminationReason,
    /// `None` when killed by a signal.
    pub exit_code: Option<i32>,
    pub pid: u32,
    pub elapsed: Duration,
    /// Set when the supervisor had to stop the process itself.
    pub termination: Option<Termination>,
}

impl RunOutcome {
    /// Full captured output.
    pub fn output(&self) -> String {
        self.lines.concat()
    }
}

/// Errors that prevent a run from producing an outcome.
#[derive(Debug)]
pub enum SupervisorError {
    /// The sqlmap entry script does not exist.
    MissingScript { path: PathBuf },
    /// Failed to spawn the subprocess.
    Spawn {
        program: String,
        source: std::io::Error,
    },
    /// Failed to poll the subprocess for exit.
    Wait { source: std::io::Error },
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorError::MissingScript { path } => {
                write!(f, "sqlmap.py not found at {}", path.display())
            }
            SupervisorError::Spawn { program, source } => {
                write!(f, "failed to spawn {}: {}", program, source)
            }
            SupervisorError::Wait { source } => {
                write!(f, "failed to poll sqlmap process: {}", source)
            }
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SupervisorError::MissingScript { .. } => None,
            SupervisorError::Spawn { source, .. } => Some(source),
            SupervisorError::Wait { source } => Some(source),
        }
    }
}

/// Mutable per-run state, owned by the polling loop.
struct RunState {
    start: Instant,
    last_output: Instant,
    last_tick: Instant,
    classifier: OutputClassifier,
    lines: Vec<String>,
    exit_code: Option<i32>,
}

pub struct Supervisor {
    settings: SupervisorSettings,
    tree_kill: TreeKill,
    notifier: Arc<dyn Notifier>,
}

impl Supervisor {
    pub fn new(
        settings: SupervisorSettings,
        tree_kill: TreeKill,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            settings,
            tree_kill,
            notifier,
        }
    }

    /// Launch sqlmap for `config` and supervise it until it exits, times out,
    /// stalls, or `interrupt` is raised.
    ///
    /// Only launch failures and OS errors while polling are returned as
    /// errors; every other way a run can end is a [`RunOutcome`].
    pub async fn run(
        &self,
        invocation: &Invocation,
        config: &RunConfig,
        interrupt: &InterruptFlag,
    ) -> Result<RunOutcome, SupervisorError> {
        let args = build_args(invocation, config);
        self.notifier.info(&format!(
            "Executing SQLMap command: {}",
            invocation.display(&args)
        ));
        self.notifier.info(&format!(
            "Timeout set to {} seconds. Press Ctrl+C to cancel.",
            config.timeout.as_secs()
        ));

        let spawn_error = |source: std::io::Error| SupervisorError::Spawn {
            program: invocation.program.clone(),
            source,
        };
        // Both streams write into the same pipe
        let (output_reader, stdout_writer) = std::io::pipe().map_err(spawn_error)?;
        let stderr_writer = stdout_writer.try_clone().map_err(spawn_error)?;
        let output = async_output_reader(output_reader).map_err(spawn_error)?;

        let mut command = Command::new(&invocation.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(stdout_writer)
            .stderr(stderr_writer)
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0); // New process group for clean kill

        let spawned = command.spawn();
        // Close our copies of the write end, or the reader never sees EOF
        drop(command);
        let mut child = spawned.map_err(spawn_error)?;
        let pid = child.id().unwrap_or(0);
        tracing::info!(
            pid,
            url = %config.target,
            timeout_secs = config.timeout.as_secs_f64(),
            stall_timeout_secs = config.stall_timeout.as_secs_f64(),
            "sqlmap subprocess started"
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let reader = spawn_line_reader(output, tx);

        self.notifier.info("Starting SQLMap scan...");
        let start = Instant::now();
        let mut state = RunState {
            start,
            last_output: start,
            last_tick: start,
            classifier: OutputClassifier::new(
                self.settings.loop_repeat_threshold,
                config.stall_timeout,
                start,
            ),
            lines: Vec::new(),
            exit_code: None,
        };

        let reason = self
            .poll_loop(&mut child, &mut rx, config, interrupt, &mut state)
            .await?;

        let termination = match reason {
            TerminationReason::Exited => None,
            TerminationReason::Timeout | TerminationReason::Stalled => {
                let why = if reason == TerminationReason::Timeout {
                    "timeout"
                } else {
                    "stalled process"
                };
                self.notifier
                    .warning(&format!("Terminating SQLMap process due to {why}"));
                Some(
                    terminate_tree(
                        &mut child,
                        self.tree_kill,
                        self.settings.grace_period,
                        self.settings.kill_wait,
                        self.notifier.as_ref(),
                    )
                    .await,
                )
            }
            TerminationReason::Interrupted => {
                self.notifier.warning("Process interrupted by user");
                Some(
                    terminate_tree(
                        &mut child,
                        self.tree_kill,
                        self.settings.interrupt_grace,
                        self.settings.interrupt_grace,
                        self.notifier.as_ref(),
                    )
                    .await,
                )
            }
        };
        if termination.is_some() {
            if let Ok(Some(status)) = child.try_wait() {
                state.exit_code = status.code();
            }
        }

        self.final_drain(reader, &mut rx, config, &mut state).await;

        let elapsed = state.start.elapsed();
        tracing::info!(
            pid,
            ?reason,
            exit_code = ?state.exit_code,
            lines = state.lines.len(),
            elapsed_secs = elapsed.as_secs_f64(),
            "sqlmap run finished"
        );

        Ok(RunOutcome {
            lines: state.lines,
            reason,
            exit_code: state.exit_code,
            pid,
            elapsed,
            termination,
        })
    }

    async fn poll_loop(
        &self,
        child: &mut Child,
        rx: &mut mpsc::UnboundedReceiver<String>,
        config: &RunConfig,
        interrupt: &InterruptFlag,
        state: &mut RunState,
    ) -> Result<TerminationReason, SupervisorError> {
        let poll_interval = self.settings.poll_interval;
        loop {
            let iteration_start = Instant::now();

            if interrupt.is_raised() {
                return Ok(TerminationReason::Interrupted);
            }

            match child.try_wait() {
                Ok(Some(status)) => {
                    state.exit_code = status.code();
                    return Ok(TerminationReason::Exited);
                }
                Ok(None) => {}
                Err(e) => return Err(SupervisorError::Wait { source: e }),
            }

            let now = Instant::now();
            if now.duration_since(state.last_tick) >= self.settings.spinner_interval {
                self.notifier.tick();
                state.last_tick = now;
            }

            let elapsed = now.duration_since(state.start);
            if elapsed > config.timeout {
                self.notifier.warning(&format!(
                    "SQLMap command timeout after {:.1} seconds",
                    elapsed.as_secs_f64()
                ));
                return Ok(TerminationReason::Timeout);
            }

            let idle = now.duration_since(state.last_output);
            if idle > config.stall_timeout {
                self.notifier.warning(&format!(
                    "No output for {:.1} seconds. Process may be stalled.",
                    idle.as_secs_f64()
                ));
                return Ok(TerminationReason::Stalled);
            }

            // Drain what is already buffered, without overrunning the poll interval
            while iteration_start.elapsed() < poll_interval {
                let line = match rx.try_recv() {
                    Ok(line) => line,
                    Err(_) => break,
                };
                let now = Instant::now();
                state.last_output = now;

                let classification = state.classifier.classify(&line, now);
                if config.interactive {
                    self.notifier.echo(&line);
                } else if let Some(event) = &classification.progress {
                    if event.is_displayable() {
                        self.notifier.progress(event);
                    }
                }
                state.lines.push(line);

                if classification.looping {
                    self.notifier.warning("SQLMap appears to be stuck in a loop.");
                    return Ok(TerminationReason::Stalled);
                }
            }

            tokio::time::sleep(poll_interval.saturating_sub(iteration_start.elapsed())).await;
        }
    }

    /// Collect whatever output is still in flight once the process is gone.
    async fn final_drain(
        &self,
        mut reader: JoinHandle<()>,
        rx: &mut mpsc::UnboundedReceiver<String>,
        config: &RunConfig,
        state: &mut RunState,
    ) {
        let closed = tokio::time::timeout(self.settings.drain_timeout, &mut reader).await;
        if closed.is_err() {
            tracing::warn!("output pipe still open after process exit, abandoning reader");
            reader.abort();
        }

        while let Ok(line) = rx.try_recv() {
            if config.interactive {
                self.notifier.echo(&line);
            }
            state.lines.push(line);
        }
    }
}

/// Async read end of the shared output pipe.
#[cfg(unix)]
fn async_output_reader(
    reader: std::io::PipeReader,
) -> std::io::Result<tokio::net::unix::pipe::Receiver> {
    tokio::net::unix::pipe::Receiver::from_owned_fd(std::os::fd::OwnedFd::from(reader))
}

/// Async read end of the shared output pipe. Reads run on the blocking pool.
#[cfg(windows)]
fn async_output_reader(reader: std::io::PipeReader) -> std::io::Result<tokio::fs::File> {
    let handle = std::os::windows::io::OwnedHandle::from(reader);
    Ok(tokio::fs::File::from_std(std::fs::File::from(handle)))
}

/// Forward each line of `stream` (newline included) into `tx` until EOF.
fn spawn_line_reader<R>(stream: R, tx: mpsc::UnboundedSender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, "output stream read failed");
                    break;
                }
            }
        }
    })
}
