/// Named option bundles for the two scans callers usually want.
use crate::result::ScanResult;
use crate::runner::ScanRunner;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanProfile {
    /// Fingerprint the back end and list databases.
    Baseline,
    /// Boolean/time-based only, low level and risk, short timeouts.
    FastFallback,
}

impl ScanProfile {
    pub fn options(self) -> Vec<String> {
        let options: &[&str] = match self {
            ScanProfile::Baseline => &["--fingerprint", "--dbs", "--threads=5"],
            ScanProfile::FastFallback => &[
                "--technique=BT",
                "--level=1",
                "--risk=1",
                "--time-sec=1",
                "--timeout=10",
                "--retries=1",
                "--threads=8",
                "--dbs",
            ],
        };
        options.iter().map(|s| s.to_string()).collect()
    }

    pub fn name(self) -> &'static str {
        match self {
            ScanProfile::Baseline => "baseline",
            ScanProfile::FastFallback => "fast-fallback",
        }
    }
}

/// Baseline fingerprint and database enumeration.
///
/// Returns `None` if the run could not be supervised at all.
pub async fn gather_info(
    runner: &ScanRunner,
    target: &str,
    timeout: Duration,
    interactive: bool,
) -> Option<ScanResult> {
    let notifier = runner.notifier();
    notifier.info("Running basic fingerprinting and database enumeration...");
    notifier.info("This will identify the database type and list available databases.");
    notifier.info("If scan takes too long, you can press Ctrl+C to interrupt it");

    run_profile(runner, ScanProfile::Baseline, target, timeout, interactive, "basic scan").await
}

/// Faster, narrower scan for targets where the baseline timed out. Never interactive.
pub async fn fallback_for_timeout(
    runner: &ScanRunner,
    target: &str,
    timeout: Duration,
) -> Option<ScanResult> {
    let notifier = runner.notifier();
    notifier.info("Original scan timed out. Running with more focused options...");
    notifier.info("This will attempt a faster scan with fewer test vectors.");

    run_profile(runner, ScanProfile::FastFallback, target, timeout, false, "fallback scan").await
}

async fn run_profile(
    runner: &ScanRunner,
    profile: ScanProfile,
    target: &str,
    timeout: Duration,
    interactive: bool,
    label: &str,
) -> Option<ScanResult> {
    tracing::info!(profile = profile.name(), url = target, "running scan profile");
    match runner
        .run_sqlmap(target, profile.options(), timeout, interactive)
        .await
    {
        Ok(result) => Some(result),
        Err(e) => {
            tracing::error!(profile = profile.name(), error = %e, "scan profile failed");
            runner.notifier().error(&format!("Error running {label}: {e}"));
            None
        }
    }
}
