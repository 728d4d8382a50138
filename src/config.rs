use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from harness.toml.
#[derive(Debug, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct HarnessConfig {
    pub sqlmap: SqlmapConfig,
    pub supervisor: SupervisorConfig,
    pub profiles: ProfilesConfig,
    pub output: OutputConfig,
}

/// Where sqlmap lives and how it is invoked.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SqlmapConfig {
    /// Interpreter used to launch the sqlmap script.
    pub python: String,
    /// Path to `sqlmap.py`.
    pub script: PathBuf,
    /// Value passed with the fixed `-v` flag.
    pub verbosity: u8,
    /// Thread count injected when the caller supplies none.
    pub default_threads: u32,
}

/// Timers and thresholds for the polling loop.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub poll_interval_ms: u64,
    pub spinner_interval_ms: u64,
    /// Stall timeout as a fraction of the run timeout...
    pub stall_fraction: f64,
    /// ...capped at this many seconds.
    pub stall_cap_secs: u64,
    pub loop_repeat_threshold: u32,
    pub grace_period_ms: u64,
    pub kill_wait_ms: u64,
    pub interrupt_grace_ms: u64,
    pub drain_timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProfilesConfig {
    pub default_timeout_secs: u64,
    pub baseline_timeout_secs: u64,
    pub fallback_timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Lines of output shown after a non-interactive run.
    pub tail_lines: usize,
}

/// Errors that can occur while loading harness.toml.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

impl HarnessConfig {
    /// Load config from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

impl SupervisorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn spinner_interval(&self) -> Duration {
        Duration::from_millis(self.spinner_interval_ms)
    }

    pub fn stall_cap(&self) -> Duration {
        Duration::from_secs(self.stall_cap_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn kill_wait(&self) -> Duration {
        Duration::from_millis(self.kill_wait_ms)
    }

    pub fn interrupt_grace(&self) -> Duration {
        Duration::from_millis(self.interrupt_grace_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

// --- Default implementations ---

impl Default for SqlmapConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            script: PathBuf::from("sqlmap/sqlmap.py"),
            verbosity: 1,
            default_threads: 5,
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            spinner_interval_ms: 200,
            stall_fraction: 0.3,
            stall_cap_secs: 60,
            loop_repeat_threshold: 10,
            grace_period_ms: 500,
            kill_wait_ms: 1000,
            interrupt_grace_ms: 500,
            drain_timeout_ms: 1000,
        }
    }
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 180,
            baseline_timeout_secs: 120,
            fallback_timeout_secs: 90,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { tail_lines: 20 }
    }
}
