//! CLI command definitions for the `iflow` binary.
//!
//! Uses clap derive macros for argument parsing. Commands follow a noun-verb
//! pattern (e.g., `iflow templates list`, `iflow run conversion_analysis`).

pub mod run;
pub mod templates;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Run multi-step analytical workflows.
#[derive(Parser)]
#[command(name = "iflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit log lines as JSON objects.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    /// Engine configuration file (TOML).
    #[arg(long, global = true, env = "INSIGHTFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect the workflow template catalog.
    #[command(alias = "t")]
    Templates {
        #[command(subcommand)]
        action: templates::TemplatesCommand,
    },

    /// Create and run an execution against the sample collaborators.
    Run {
        /// Template ID (see `iflow templates list`).
        template: String,

        /// Override a step parameter: `step.key=value`. Values are parsed as
        /// JSON when possible, otherwise taken as strings. Repeatable.
        #[arg(long = "set", value_name = "STEP.KEY=VALUE")]
        overrides: Vec<String>,

        /// Make a query step fail, to see how dependents are blocked. Repeatable.
        #[arg(long = "fail-step", value_name = "STEP")]
        fail_steps: Vec<String>,
    },

    /// Start the REST API server.
    Serve {
        /// Port to listen on.
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}
