/// Ties a located sqlmap install to the supervisor and result builder.
use crate::command::{build_args, Invocation, RunConfig};
use crate::config::{HarnessConfig, SupervisorConfig};
use crate::extract::{InfoExtractor, SqlmapInfoExtractor};
use crate::notify::Notifier;
use crate::result::{build_result, ScanResult};
use crate::signals::InterruptFlag;
use crate::supervisor::{Supervisor, SupervisorError, SupervisorSettings};
use crate::terminate::TreeKill;
use std::sync::Arc;
use std::time::Duration;

pub struct ScanRunner {
    invocation: Invocation,
    supervisor: Supervisor,
    extractor: Box<dyn InfoExtractor>,
    notifier: Arc<dyn Notifier>,
    interrupt: InterruptFlag,
    stall_fraction: f64,
    stall_cap: Duration,
    tail_lines: usize,
}

impl ScanRunner {
    pub fn new(
        invocation: Invocation,
        supervisor_config: &SupervisorConfig,
        notifier: Arc<dyn Notifier>,
        interrupt: InterruptFlag,
    ) -> Self {
        let supervisor = Supervisor::new(
            SupervisorSettings::from(supervisor_config),
            TreeKill::detect(),
            notifier.clone(),
        );
        Self {
            invocation,
            supervisor,
            extractor: Box::new(SqlmapInfoExtractor::new()),
            notifier,
            interrupt,
            stall_fraction: supervisor_config.stall_fraction,
            stall_cap: supervisor_config.stall_cap(),
            tail_lines: 20,
        }
    }

    /// Build a runner for the sqlmap install named in `config`.
    ///
    /// Fails with [`SupervisorError::MissingScript`] before anything runs if
    /// the sqlmap script is not where the config says.
    pub fn from_config(
        config: &HarnessConfig,
        notifier: Arc<dyn Notifier>,
        interrupt: InterruptFlag,
    ) -> Result<Self, SupervisorError> {
        let script = &config.sqlmap.script;
        if !script.is_file() {
            let dir = script
                .parent()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            notifier.error(&format!(
                "sqlmap.py not found in {dir}. Make sure sqlmap is in the correct directory."
            ));
            return Err(SupervisorError::MissingScript {
                path: script.clone(),
            });
        }

        let mut invocation = Invocation::new(
            config.sqlmap.python.clone(),
            vec![script.display().to_string()],
        );
        invocation.verbosity = config.sqlmap.verbosity;
        invocation.default_threads = config.sqlmap.default_threads;

        Ok(Self::new(invocation, &config.supervisor, notifier, interrupt)
            .with_tail_lines(config.output.tail_lines))
    }

    pub fn with_tail_lines(mut self, tail_lines: usize) -> Self {
        self.tail_lines = tail_lines;
        self
    }

    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    /// Run config with the stall policy from harness.toml applied.
    pub fn run_config(
        &self,
        target: &str,
        options: Vec<String>,
        timeout: Duration,
        interactive: bool,
    ) -> RunConfig {
        RunConfig::new(target, options, timeout, interactive)
            .with_stall_policy(self.stall_fraction, self.stall_cap)
    }

    /// The command line a run of `config` would execute.
    pub fn command_line(&self, config: &RunConfig) -> String {
        self.invocation
            .display(&build_args(&self.invocation, config))
    }

    /// Run sqlmap once and classify the result.
    pub async fn run_sqlmap(
        &self,
        target: &str,
        options: Vec<String>,
        timeout: Duration,
        interactive: bool,
    ) -> Result<ScanResult, SupervisorError> {
        let config = self.run_config(target, options, timeout, interactive);
        self.run(&config).await
    }

    pub async fn run(&self, config: &RunConfig) -> Result<ScanResult, SupervisorError> {
        let outcome = self
            .supervisor
            .run(&self.invocation, config, &self.interrupt)
            .await?;
        if let Some(termination) = outcome.termination {
            tracing::debug!(
                pid = outcome.pid,
                graceful = termination.graceful,
                forced = termination.forced,
                survived = termination.survived,
                elapsed_secs = outcome.elapsed.as_secs_f64(),
                "sqlmap stopped by supervisor"
            );
        }
        let result = build_result(&outcome, self.extractor.as_ref(), self.notifier.as_ref());

        if !config.interactive && result.has_output() && self.tail_lines > 0 {
            let skip = outcome.lines.len().saturating_sub(self.tail_lines);
            for line in &outcome.lines[skip..] {
                self.notifier.echo(line);
            }
            self.notifier.info(&format!(
                "Showing last {} lines of output. Full results will be analyzed.",
                self.tail_lines
            ));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingNotifier;

    fn fast_config() -> SupervisorConfig {
        SupervisorConfig {
            poll_interval_ms: 20,
            spinner_interval_ms: 50,
            grace_period_ms: 300,
            interrupt_grace_ms: 300,
            drain_timeout_ms: 500,
            ..Default::default()
        }
    }

    fn sh_runner(body: &str, notifier: &Arc<RecordingNotifier>) -> ScanRunner {
        let invocation = Invocation::new(
            "sh",
            vec!["-c".to_string(), body.to_string(), "sqlmap".to_string()],
        );
        ScanRunner::new(invocation, &fast_config(), notifier.clone(), InterruptFlag::new())
    }

    #[test]
    fn test_from_config_missing_script() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = HarnessConfig::default();
        config.sqlmap.script = dir.path().join("sqlmap").join("sqlmap.py");
        let notifier = Arc::new(RecordingNotifier::new());

        let err = ScanRunner::from_config(&config, notifier.clone(), InterruptFlag::new())
            .err()
            .unwrap();
        assert!(matches!(err, SupervisorError::MissingScript { .. }));
        assert!(notifier.has_error("sqlmap.py not found"));
    }

    #[test]
    fn test_from_config_builds_invocation() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("sqlmap.py");
        std::fs::write(&script, "print('sqlmap')\n").unwrap();

        let mut config = HarnessConfig::default();
        config.sqlmap.script = script.clone();
        config.sqlmap.default_threads = 3;
        let notifier = Arc::new(RecordingNotifier::new());

        let runner =
            ScanRunner::from_config(&config, notifier, InterruptFlag::new()).unwrap();
        let run = runner.run_config("http://t/?id=1", vec![], Duration::from_secs(100), false);
        assert_eq!(run.stall_timeout, Duration::from_secs(30));
        assert_eq!(
            runner.command_line(&run),
            format!(
                "python3 {} --url http://t/?id=1 -v 1 --threads=3 --batch",
                script.display()
            )
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_successful_run_shows_tail() {
        let notifier = Arc::new(RecordingNotifier::new());
        let runner = sh_runner("for i in 1 2 3 4 5; do echo \"line $i\"; done", &notifier)
            .with_tail_lines(2);

        let result = runner
            .run_sqlmap("http://t/?id=1", vec![], Duration::from_secs(10), false)
            .await
            .unwrap();

        assert_eq!(
            result.to_string(),
            "line 1\nline 2\nline 3\nline 4\nline 5\n"
        );
        assert_eq!(notifier.echoed(), vec!["line 4\n", "line 5\n"]);
        assert!(notifier
            .notices()
            .iter()
            .any(|n| matches!(n, crate::notify::Notice::Info(m) if m.contains("last 2 lines"))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_known_error_skips_tail() {
        let notifier = Arc::new(RecordingNotifier::new());
        let runner = sh_runner("echo 'Connection refused'; exit 1", &notifier);

        let result = runner
            .run_sqlmap("http://t/?id=1", vec![], Duration::from_secs(10), false)
            .await
            .unwrap();

        assert_eq!(
            result.to_string(),
            "ERROR: Connection refused - Target may not be reachable"
        );
        assert!(notifier.echoed().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_without_partial_data() {
        let notifier = Arc::new(RecordingNotifier::new());
        let runner = sh_runner(
            "i=0; while true; do echo \"[INFO] testing payload $i\"; i=$((i+1)); sleep 0.02; done",
            &notifier,
        );

        let result = runner
            .run_sqlmap("http://t/?id=1", vec![], Duration::from_millis(400), false)
            .await
            .unwrap();

        assert_eq!(
            result.to_string(),
            "TIMEOUT: Command execution exceeded time limit"
        );
    }
}
