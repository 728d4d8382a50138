/// Graceful-then-forceful teardown of a supervised process tree.
///
/// Children are spawned in their own process group, so on POSIX both stages
/// signal the whole group. On Windows the tree is torn down with `taskkill /T`.
use crate::notify::Notifier;
use std::time::Duration;
use tokio::process::Child;

/// How long `taskkill` itself may run before we give up on it.
const TASKKILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Strategy for killing a process and everything it spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeKill {
    /// Signal the POSIX process group (pgid == child pid).
    ProcessGroup,
    /// Shell out to `taskkill /T`.
    TaskKill,
}

impl TreeKill {
    /// Pick the strategy for the platform we were built for.
    pub fn detect() -> Self {
        if cfg!(windows) {
            TreeKill::TaskKill
        } else {
            TreeKill::ProcessGroup
        }
    }

    /// Ask the tree to exit.
    async fn request_stop(self, child: &mut Child, pid: u32) {
        match self {
            TreeKill::ProcessGroup => {
                #[cfg(unix)]
                {
                    if let Err(e) = signal_group(pid, nix::sys::signal::Signal::SIGTERM) {
                        tracing::debug!(pid, error = %e, "SIGTERM failed");
                        let _ = child.start_kill();
                    }
                }
                #[cfg(not(unix))]
                {
                    let _ = pid;
                    let _ = child.start_kill();
                }
            }
            TreeKill::TaskKill => {
                if !run_taskkill(pid, false).await {
                    let _ = child.start_kill();
                }
            }
        }
    }

    /// Kill the tree outright, falling back to killing just the child.
    async fn force_kill(self, child: &mut Child, pid: u32) {
        match self {
            TreeKill::ProcessGroup => {
                #[cfg(unix)]
                {
                    if let Err(e) = signal_group(pid, nix::sys::signal::Signal::SIGKILL) {
                        tracing::debug!(pid, error = %e, "SIGKILL to process group failed");
                        let _ = child.start_kill();
                    }
                }
                #[cfg(not(unix))]
                {
                    let _ = pid;
                    let _ = child.start_kill();
                }
            }
            TreeKill::TaskKill => {
                if !run_taskkill(pid, true).await {
                    let _ = child.start_kill();
                }
            }
        }
    }
}

/// Signal the process group led by `pid`, or just `pid` if it leads none.
#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) -> nix::Result<()> {
    use nix::sys::signal::{kill, killpg};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(pid as i32);
    killpg(pid, signal).or_else(|_| kill(pid, signal))
}

/// Returns `true` if taskkill ran and reported success.
async fn run_taskkill(pid: u32, force: bool) -> bool {
    let pid_arg = pid.to_string();
    let mut args = vec!["/T", "/PID", pid_arg.as_str()];
    if force {
        args.insert(0, "/F");
    }
    let status = tokio::process::Command::new("taskkill")
        .args(&args)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();
    match tokio::time::timeout(TASKKILL_TIMEOUT, status).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            tracing::debug!(pid, error = %e, "taskkill could not be run");
            false
        }
        Err(_) => {
            tracing::warn!(pid, "taskkill timed out");
            false
        }
    }
}

/// What happened while tearing a process down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Termination {
    /// Exited within the grace period after the stop request.
    pub graceful: bool,
    /// A forceful kill was sent.
    pub forced: bool,
    /// Still alive after the forceful kill and wait.
    pub survived: bool,
}

/// Stop request, wait `grace`, force kill, wait `kill_wait`.
///
/// Never fails: anything that goes wrong is reported through `notifier` and
/// logged, and a survivor is recorded in the returned [`Termination`].
pub async fn terminate_tree(
    child: &mut Child,
    strategy: TreeKill,
    grace: Duration,
    kill_wait: Duration,
    notifier: &dyn Notifier,
) -> Termination {
    let mut outcome = Termination::default();

    let pid = match child.id() {
        Some(pid) => pid,
        // Already reaped
        None => {
            outcome.graceful = true;
            return outcome;
        }
    };
    if let Ok(Some(_)) = child.try_wait() {
        outcome.graceful = true;
        return outcome;
    }

    tracing::info!(pid, ?strategy, "requesting process exit");
    strategy.request_stop(child, pid).await;
    if wait_for_exit(child, grace).await {
        outcome.graceful = true;
        return outcome;
    }

    notifier.warning("Process did not terminate gracefully, forcing kill");
    tracing::warn!(pid, "process ignored stop request, killing");
    outcome.forced = true;
    strategy.force_kill(child, pid).await;

    if !wait_for_exit(child, kill_wait).await {
        outcome.survived = true;
        tracing::error!(pid, "process survived forced kill");
        notifier.error("Failed to kill process - might need manual termination");
    }
    outcome
}

/// Wait up to `limit` for the child to exit. Returns `true` if it did.
async fn wait_for_exit(child: &mut Child, limit: Duration) -> bool {
    match tokio::time::timeout(limit, child.wait()).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "failed waiting for process exit");
            false
        }
        Err(_) => false,
    }
}
