/// Run configuration and command-line assembly for a supervised sqlmap run.
use std::time::Duration;

pub const BATCH_FLAG: &str = "--batch";
pub const THREADS_PREFIX: &str = "--threads=";

/// Stall timeout is this fraction of the run timeout...
pub const DEFAULT_STALL_FRACTION: f64 = 0.3;
/// ...but never longer than this.
pub const DEFAULT_STALL_CAP: Duration = Duration::from_secs(60);

/// Inputs for one supervised run. Read-only to the supervisor.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Target URL passed with `--url`.
    pub target: String,
    /// Caller options in order, before filtering.
    pub options: Vec<String>,
    pub timeout: Duration,
    pub stall_timeout: Duration,
    /// Echo raw lines live and skip the implied `--batch`. The process still
    /// gets no input stream, so a prompt reads EOF and takes sqlmap's default.
    pub interactive: bool,
}

impl RunConfig {
    pub fn new(
        target: impl Into<String>,
        options: Vec<String>,
        timeout: Duration,
        interactive: bool,
    ) -> Self {
        Self {
            target: target.into(),
            options,
            timeout,
            stall_timeout: stall_timeout_for(timeout, DEFAULT_STALL_FRACTION, DEFAULT_STALL_CAP),
            interactive,
        }
    }

    /// Re-derive the stall timeout from a configured fraction and cap.
    pub fn with_stall_policy(mut self, fraction: f64, cap: Duration) -> Self {
        self.stall_timeout = stall_timeout_for(self.timeout, fraction, cap);
        self
    }

    /// Override the stall timeout directly.
    #[cfg(test)]
    pub fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }
}

/// `min(timeout * fraction, cap)`, with `fraction` clamped to `0.0..=1.0`.
///
/// A NaN fraction falls back to [`DEFAULT_STALL_FRACTION`].
pub fn stall_timeout_for(timeout: Duration, fraction: f64, cap: Duration) -> Duration {
    let fraction = if fraction.is_nan() {
        DEFAULT_STALL_FRACTION
    } else {
        fraction.clamp(0.0, 1.0)
    };
    Duration::try_from_secs_f64(timeout.as_secs_f64() * fraction)
        .unwrap_or(cap)
        .min(cap)
}

/// Split a single options string the way a shell-less caller would.
pub fn split_options(options: &str) -> Vec<String> {
    options.split_whitespace().map(str::to_string).collect()
}

/// Program and leading arguments that launch sqlmap, e.g. `python3 sqlmap/sqlmap.py`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub base_args: Vec<String>,
    /// Value passed with the fixed `-v` flag.
    pub verbosity: u8,
    /// Thread count injected when the caller supplies none.
    pub default_threads: u32,
}

impl Invocation {
    pub fn new(program: impl Into<String>, base_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            base_args,
            verbosity: 1,
            default_threads: 5,
        }
    }

    /// Render the full command line for display.
    pub fn display(&self, args: &[String]) -> String {
        std::iter::once(self.program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Build the argument list (everything after the program) for a run.
///
/// Keeps at most one `--batch` and at most one `--threads=` token (first one
/// wins), appends the fixed verbosity flag, then injects `--threads=<default>`
/// when the caller gave none and `--batch` when the run is non-interactive.
pub fn build_args(invocation: &Invocation, config: &RunConfig) -> Vec<String> {
    let mut args = invocation.base_args.clone();
    args.push("--url".to_string());
    args.push(config.target.clone());

    let mut has_batch = false;
    let mut has_threads = false;
    for opt in &config.options {
        if opt == BATCH_FLAG {
            if has_batch {
                continue;
            }
            has_batch = true;
        } else if opt.starts_with(THREADS_PREFIX) {
            if has_threads {
                tracing::debug!(option = %opt, "dropping duplicate thread-count option");
                continue;
            }
            has_threads = true;
        }
        args.push(opt.clone());
    }

    args.push("-v".to_string());
    args.push(invocation.verbosity.to_string());

    if !has_threads {
        args.push(format!("{}{}", THREADS_PREFIX, invocation.default_threads));
    }
    if !config.interactive && !has_batch {
        args.push(BATCH_FLAG.to_string());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation() -> Invocation {
        Invocation::new("python3", vec!["sqlmap/sqlmap.py".to_string()])
    }

    fn config(options: &[&str], interactive: bool) -> RunConfig {
        RunConfig::new(
            "http://target/?id=1",
            options.iter().map(|s| s.to_string()).collect(),
            Duration::from_secs(120),
            interactive,
        )
    }

    fn count(args: &[String], pred: impl Fn(&str) -> bool) -> usize {
        args.iter().filter(|a| pred(a)).count()
    }

    #[test]
    fn test_build_args_layout() {
        let args = build_args(&invocation(), &config(&["--dbs"], false));
        assert_eq!(
            args,
            vec![
                "sqlmap/sqlmap.py",
                "--url",
                "http://target/?id=1",
                "--dbs",
                "-v",
                "1",
                "--threads=5",
                "--batch"
            ]
        );
    }

    #[test]
    fn test_duplicate_batch_collapsed() {
        let args = build_args(
            &invocation(),
            &config(&["--batch", "--dbs", "--batch", "--batch"], false),
        );
        assert_eq!(count(&args, |a| a == BATCH_FLAG), 1);
        // The caller's token keeps its position
        assert_eq!(args[3], "--batch");
        assert_eq!(args[4], "--dbs");
    }

    #[test]
    fn test_default_threads_injected_once() {
        let args = build_args(&invocation(), &config(&["--fingerprint"], false));
        assert_eq!(count(&args, |a| a.starts_with(THREADS_PREFIX)), 1);
        assert!(args.contains(&"--threads=5".to_string()));
    }

    #[test]
    fn test_caller_threads_preserved() {
        let args = build_args(&invocation(), &config(&["--threads=8", "--dbs"], false));
        assert_eq!(count(&args, |a| a.starts_with(THREADS_PREFIX)), 1);
        assert!(args.contains(&"--threads=8".to_string()));
        assert!(!args.contains(&"--threads=5".to_string()));
    }

    #[test]
    fn test_duplicate_threads_keeps_first() {
        let args = build_args(&invocation(), &config(&["--threads=8", "--threads=2"], false));
        assert_eq!(count(&args, |a| a.starts_with(THREADS_PREFIX)), 1);
        assert!(args.contains(&"--threads=8".to_string()));
    }

    #[test]
    fn test_interactive_omits_batch() {
        let args = build_args(&invocation(), &config(&["--dbs"], true));
        assert_eq!(count(&args, |a| a == BATCH_FLAG), 0);
    }

    #[test]
    fn test_interactive_keeps_explicit_batch() {
        let args = build_args(&invocation(), &config(&["--batch"], true));
        assert_eq!(count(&args, |a| a == BATCH_FLAG), 1);
    }

    #[test]
    fn test_verbosity_and_threads_from_invocation() {
        let mut inv = invocation();
        inv.verbosity = 3;
        inv.default_threads = 2;
        let args = build_args(&inv, &config(&[], false));
        let v = args.iter().position(|a| a == "-v").unwrap();
        assert_eq!(args[v + 1], "3");
        assert!(args.contains(&"--threads=2".to_string()));
    }

    #[test]
    fn test_stall_timeout_fraction_and_cap() {
        assert_eq!(
            RunConfig::new("u", vec![], Duration::from_secs(100), false).stall_timeout,
            Duration::from_secs(30)
        );
        assert_eq!(
            RunConfig::new("u", vec![], Duration::from_secs(600), false).stall_timeout,
            Duration::from_secs(60)
        );
        let custom = RunConfig::new("u", vec![], Duration::from_secs(10), false)
            .with_stall_policy(0.5, Duration::from_secs(3));
        assert_eq!(custom.stall_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_stall_fraction_out_of_range_is_clamped() {
        let timeout = Duration::from_secs(100);
        let cap = Duration::from_secs(600);
        assert_eq!(stall_timeout_for(timeout, f64::INFINITY, cap), timeout);
        assert_eq!(stall_timeout_for(timeout, 1e300, cap), timeout);
        assert_eq!(stall_timeout_for(Duration::MAX, 1.0, cap), cap);
        assert_eq!(stall_timeout_for(timeout, -2.0, cap), Duration::ZERO);
        assert_eq!(stall_timeout_for(timeout, f64::NEG_INFINITY, cap), Duration::ZERO);
        assert_eq!(
            stall_timeout_for(timeout, f64::NAN, cap),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_split_options() {
        assert_eq!(
            split_options("  --dbs   --threads=3 --batch "),
            vec!["--dbs", "--threads=3", "--batch"]
        );
        assert!(split_options("   ").is_empty());
    }

    #[test]
    fn test_display_joins_program_and_args() {
        let inv = invocation();
        let args = vec!["a".to_string(), "b".to_string()];
        assert_eq!(inv.display(&args), "python3 a b");
    }
}
