/// Turns a finished run into the single tagged result string callers consume.
use crate::extract::{has_partial_data, InfoExtractor};
use crate::notify::Notifier;
use crate::supervisor::{RunOutcome, TerminationReason};

pub const TIMEOUT_MESSAGE: &str = "Command execution exceeded time limit";
pub const INTERRUPTED_MESSAGE: &str = "Process was stopped by user";

/// Final classification of a run. `Display` renders the tagged string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResult {
    /// Untagged payload. `with_warnings` is set when sqlmap exited non-zero
    /// without a recognized error message.
    Success { output: String, with_warnings: bool },
    TimeoutWithPartialData(String),
    Timeout,
    Stalled(String),
    Interrupted,
    Error(&'static str),
    Warning(&'static str),
}

impl ScanResult {
    /// Tag prefix, or `None` for a success payload.
    pub fn tag(&self) -> Option<&'static str> {
        match self {
            ScanResult::Success { .. } => None,
            ScanResult::TimeoutWithPartialData(_) => Some("TIMEOUT_WITH_PARTIAL_DATA"),
            ScanResult::Timeout => Some("TIMEOUT"),
            ScanResult::Stalled(_) => Some("STALLED"),
            ScanResult::Interrupted => Some("INTERRUPTED"),
            ScanResult::Error(_) => Some("ERROR"),
            ScanResult::Warning(_) => Some("WARNING"),
        }
    }

    pub fn with_warnings(&self) -> bool {
        matches!(
            self,
            ScanResult::Success {
                with_warnings: true,
                ..
            }
        )
    }

    /// Whether the run produced output worth showing a tail of.
    pub fn has_output(&self) -> bool {
        matches!(
            self,
            ScanResult::Success { .. }
                | ScanResult::TimeoutWithPartialData(_)
                | ScanResult::Timeout
                | ScanResult::Stalled(_)
        )
    }
}

impl std::fmt::Display for ScanResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanResult::Success { output, .. } => f.write_str(output),
            ScanResult::TimeoutWithPartialData(output) => {
                write!(f, "TIMEOUT_WITH_PARTIAL_DATA: {output}")
            }
            ScanResult::Timeout => write!(f, "TIMEOUT: {TIMEOUT_MESSAGE}"),
            ScanResult::Stalled(output) => write!(f, "STALLED: {output}"),
            ScanResult::Interrupted => write!(f, "INTERRUPTED: {INTERRUPTED_MESSAGE}"),
            ScanResult::Error(message) => write!(f, "ERROR: {message}"),
            ScanResult::Warning(message) => write!(f, "WARNING: {message}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Severity {
    Error,
    Warning,
}

/// A known sqlmap failure message and how to report it.
struct ExitDiagnosis {
    needle: &'static str,
    severity: Severity,
    notice: &'static str,
    message: &'static str,
}

/// Checked in order; the first match wins.
static EXIT_DIAGNOSES: [ExitDiagnosis; 4] = [
    ExitDiagnosis {
        needle: "Connection refused",
        severity: Severity::Error,
        notice: "Connection refused - Target may not be reachable",
        message: "Connection refused - Target may not be reachable",
    },
    ExitDiagnosis {
        needle: "unable to connect to the target URL",
        severity: Severity::Error,
        notice: "Unable to connect to the target URL",
        message: "Unable to connect to the target URL",
    },
    ExitDiagnosis {
        needle: "problem occurred while parsing an URL",
        severity: Severity::Error,
        notice: "Problem parsing URL - Make sure URL format is correct",
        message: "Problem parsing URL - Make sure URL format is correct",
    },
    ExitDiagnosis {
        needle: "No parameter(s) found for testing",
        severity: Severity::Warning,
        notice: "No parameters found for testing in the URL",
        message: "No parameter(s) found for testing in the URL",
    },
];

/// Classify a finished run, reporting each decision through `notifier`.
pub fn build_result(
    outcome: &RunOutcome,
    extractor: &dyn InfoExtractor,
    notifier: &dyn Notifier,
) -> ScanResult {
    let output = outcome.output();

    match outcome.reason {
        TerminationReason::Timeout => {
            if has_partial_data(&extractor.extract(&output)) {
                notifier.warning("Scan timed out, but some useful information was collected.");
                ScanResult::TimeoutWithPartialData(output)
            } else {
                ScanResult::Timeout
            }
        }
        TerminationReason::Stalled => {
            notifier.warning("SQLMap appeared to be stalled or in a loop.");
            ScanResult::Stalled(output)
        }
        TerminationReason::Interrupted => ScanResult::Interrupted,
        TerminationReason::Exited => {
            // Killed by a signal counts as a failure too
            let failed = outcome.exit_code != Some(0);
            if failed {
                let code = outcome
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "(signal)".to_string());
                notifier.warning(&format!(
                    "SQLMap command completed with non-zero return code {code}"
                ));

                if let Some(diagnosis) = EXIT_DIAGNOSES
                    .iter()
                    .find(|d| output.contains(d.needle))
                {
                    return match diagnosis.severity {
                        Severity::Error => {
                            notifier.error(diagnosis.notice);
                            ScanResult::Error(diagnosis.message)
                        }
                        Severity::Warning => {
                            notifier.warning(diagnosis.notice);
                            ScanResult::Warning(diagnosis.message)
                        }
                    };
                }
                notifier.warning("Command failed but analysis will proceed with available output");
            }

            notifier.success(if failed {
                "SQLMap execution completed with warnings"
            } else {
                "SQLMap execution completed"
            });
            ScanResult::Success {
                output,
                with_warnings: failed,
            }
        }
    }
}
