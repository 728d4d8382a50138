mod classifier;
mod command;
mod config;
mod extract;
mod notify;
mod profiles;
mod result;
mod runner;
mod signals;
mod supervisor;
mod terminate;

use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Runs sqlmap as a supervised subprocess: streams and classifies its
/// output, stops it on timeout, stall, or loop, and prints one tagged result.
#[derive(Parser, Debug)]
#[command(name = "sqlmap-harness", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "harness.toml", global = true)]
    config: PathBuf,

    /// Path to sqlmap.py (overrides config)
    #[arg(long, global = true)]
    sqlmap: Option<PathBuf>,

    /// Python interpreter (overrides config)
    #[arg(long, global = true)]
    python: Option<String>,

    /// Print the resolved sqlmap command line, don't run
    #[arg(long, global = true)]
    dry_run: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only warnings and errors in the log
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// One supervised run with explicit sqlmap options
    Run {
        /// Target URL
        url: String,

        /// Timeout in seconds (default: from config)
        #[arg(long)]
        timeout: Option<u64>,

        /// Echo sqlmap output live and drop the implied --batch
        #[arg(long)]
        interactive: bool,

        /// sqlmap options, e.g. `-- --dbs --level=2`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        options: Vec<String>,
    },
    /// Fingerprint the back end and list databases
    Gather {
        /// Target URL
        url: String,

        /// Timeout in seconds (default: from config)
        #[arg(long)]
        timeout: Option<u64>,

        /// Echo sqlmap output live and drop the implied --batch
        #[arg(long)]
        interactive: bool,
    },
    /// Faster, narrower scan for targets where `gather` timed out
    Fallback {
        /// Target URL
        url: String,
    },
}

fn init_logging(verbose: bool, quiet: bool) {
    let default_filter = if verbose {
        "sqlmap_harness=debug"
    } else if quiet {
        "sqlmap_harness=warn"
    } else {
        "sqlmap_harness=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Result and dry-run output. A closed stdout is not an error worth a panic.
fn print_line(line: &str) {
    notify::write_line(std::io::stdout().lock(), line);
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = match config::HarnessConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            notify::write_line(std::io::stderr().lock(), &format!("error: {e}"));
            std::process::exit(2);
        }
    };
    if let Some(script) = &cli.sqlmap {
        config.sqlmap.script = script.clone();
    }
    if let Some(python) = &cli.python {
        config.sqlmap.python = python.clone();
    }

    let notifier: Arc<dyn notify::Notifier> =
        Arc::new(notify::ConsoleNotifier::new(std::io::stdout().is_terminal()));
    let interrupt = signals::InterruptFlag::install_ctrl_c();

    let runner = match runner::ScanRunner::from_config(&config, notifier, interrupt) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(error = %e, "cannot start sqlmap");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run {
            url,
            timeout,
            interactive,
            options,
        } => {
            let timeout = timeout.unwrap_or(config.profiles.default_timeout_secs);
            let options: Vec<String> = options
                .iter()
                .flat_map(|o| command::split_options(o))
                .collect();
            let run = runner.run_config(&url, options, Duration::from_secs(timeout), interactive);
            if cli.dry_run {
                print_line(&runner.command_line(&run));
                return;
            }
            match runner.run(&run).await {
                Ok(result) => Some(result),
                Err(e) => {
                    runner
                        .notifier()
                        .error(&format!("Failed to execute SQLMap: {e}"));
                    None
                }
            }
        }
        Commands::Gather {
            url,
            timeout,
            interactive,
        } => {
            let timeout =
                Duration::from_secs(timeout.unwrap_or(config.profiles.baseline_timeout_secs));
            if cli.dry_run {
                let run = runner.run_config(
                    &url,
                    profiles::ScanProfile::Baseline.options(),
                    timeout,
                    interactive,
                );
                print_line(&runner.command_line(&run));
                return;
            }
            profiles::gather_info(&runner, &url, timeout, interactive).await
        }
        Commands::Fallback { url } => {
            let timeout = Duration::from_secs(config.profiles.fallback_timeout_secs);
            if cli.dry_run {
                let run = runner.run_config(
                    &url,
                    profiles::ScanProfile::FastFallback.options(),
                    timeout,
                    false,
                );
                print_line(&runner.command_line(&run));
                return;
            }
            profiles::fallback_for_timeout(&runner, &url, timeout).await
        }
    };

    match result {
        Some(result) => {
            tracing::debug!(tag = ?result.tag(), warnings = result.with_warnings(), "scan finished");
            print_line(&result.to_string());
        }
        None => std::process::exit(1),
    }
}
