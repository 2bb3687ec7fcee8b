//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::graph::ExecutionMode;
use crate::recovery::RecoveryAction;

/// stepweave - plan-execute orchestration for tool-call plans
#[derive(Parser)]
#[command(
    name = "sw",
    about = "Validate, order and dry-run LLM-authored tool-call plans",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check a plan file and print the validation report
    Validate {
        /// Plan JSON file (`{"steps": [...]}` or a bare array)
        plan: PathBuf,

        /// Tool descriptors JSON file; enables the unknown-tool check
        #[arg(short, long)]
        tools: Option<PathBuf>,
    },

    /// Print the order (or parallel layers) a plan would run in
    Order {
        /// Plan JSON file
        plan: PathBuf,

        /// Scheduling mode; defaults to the configured mode
        #[arg(short, long)]
        mode: Option<ExecutionMode>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Execute a plan against stub tools built from its output schemas
    Simulate {
        /// Plan JSON file
        plan: PathBuf,

        /// Scheduling mode; defaults to the configured mode
        #[arg(short, long)]
        mode: Option<ExecutionMode>,

        /// Goal recorded for the run
        #[arg(short, long, default_value = "dry run")]
        goal: String,

        /// Make every call to this tool fail (repeatable)
        #[arg(long = "fail-tool", value_name = "NAME")]
        fail_tools: Vec<String>,

        /// Decision applied to every failed step
        #[arg(long = "on-failure", default_value = "skip")]
        on_failure: FailurePolicy,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Decision the dry run applies to failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    Skip,
    /// Reject the failure and halt the run
    Abort,
}

impl FailurePolicy {
    /// The recovery action this policy answers with; `None` rejects
    pub fn action(self) -> Option<RecoveryAction> {
        match self {
            Self::Skip => Some(RecoveryAction::Skip),
            Self::Abort => None,
        }
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "FailurePolicy::from_str: called");
        match s.to_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "abort" | "halt" => Ok(Self::Abort),
            _ => Err(format!("Unknown failure policy: {}. Use: skip or abort", s)),
        }
    }
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stepweave")
        .join("logs")
        .join("stepweave.log");
    debug!(?path, "get_log_path: returning path");
    path
}

/// Generate the after_help text with config and log locations
pub fn generate_after_help() -> String {
    debug!("generate_after_help: called");
    let mut help = String::new();

    help.push_str("Config files (first found wins):\n");
    help.push_str("  --config <PATH>\n");
    help.push_str("  ./.stepweave.yml\n");
    if let Some(config_dir) = dirs::config_dir() {
        help.push_str(&format!(
            "  {}\n",
            config_dir.join("stepweave").join("stepweave.yml").display()
        ));
    }

    help.push('\n');
    help.push_str(&format!("Logs are written to: {}\n", get_log_path().display()));
    help
}

/// Output format for order/simulate reports
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => {
                debug!(%s, "OutputFormat::from_str: unknown format");
                Err(format!("Unknown format: {}. Use: text or json", s))
            }
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}
