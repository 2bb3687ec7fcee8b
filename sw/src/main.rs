//! stepweave - plan-execute orchestration
//!
//! CLI entry point for validating, ordering and dry-running plans.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, FromArgMatches};
use colored::Colorize;
use eyre::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stepweave::cli::{Cli, Command, FailurePolicy, OutputFormat, generate_after_help};
use stepweave::config::Config;
use stepweave::domain::Plan;
use stepweave::events::FixedDecisionSink;
use stepweave::graph::{DependencyGraph, ExecutionMode, ExecutionOrder};
use stepweave::orchestrator::{Orchestrator, RunOutcome, RunStatus};
use stepweave::simulate::SchemaStubRegistry;
use stepweave::tools::ToolDescriptor;
use stepweave::tracker::TaskStatus;
use stepweave::validation::{PlanValidator, ValidationReport};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stepweave")
        .join("logs");

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    let log_file = fs::create_dir_all(&log_dir).and_then(|_| fs::File::create(log_dir.join("stepweave.log")));
    match log_file {
        Ok(file) => tracing_subscriber::fmt()
            .with_writer(file)
            .with_ansi(false)
            .with_env_filter(filter)
            .init(),
        Err(e) => {
            eprintln!("Warning: cannot open log file in {}: {}; logging to stderr", log_dir.display(), e);
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(filter)
                .init()
        }
    }

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    // Load configuration first so its log level can apply
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref()).context("Failed to setup logging")?;
    config.validate().context("Invalid configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    let success = match cli.command {
        Command::Validate { plan, tools } => cmd_validate(&plan, tools.as_deref())?,
        Command::Order { plan, mode, format } => cmd_order(&config, &plan, mode, format)?,
        Command::Simulate {
            plan,
            mode,
            goal,
            fail_tools,
            on_failure,
            format,
        } => cmd_simulate(config, &plan, mode, &goal, fail_tools, on_failure, format).await?,
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}

fn load_plan(path: &Path) -> Result<Plan> {
    debug!(path = %path.display(), "load_plan: called");
    let text = fs::read_to_string(path).context(format!("Failed to read plan {}", path.display()))?;
    Plan::from_json(&text).context(format!("Failed to parse plan {}", path.display()))
}

fn load_tools(path: &Path) -> Result<Vec<ToolDescriptor>> {
    debug!(path = %path.display(), "load_tools: called");
    let text = fs::read_to_string(path).context(format!("Failed to read tools {}", path.display()))?;
    serde_json::from_str(&text).context(format!("Failed to parse tools {}", path.display()))
}

fn cmd_validate(plan_path: &Path, tools_path: Option<&Path>) -> Result<bool> {
    debug!(plan = %plan_path.display(), "cmd_validate: called");
    let plan = load_plan(plan_path)?;
    let mut validator = PlanValidator::new();
    if let Some(path) = tools_path {
        let tools = load_tools(path)?;
        validator = validator.with_known_tools(tools.into_iter().map(|t| t.name));
    }
    let report = validator.validate(&plan);
    print_report(&report);
    Ok(report.valid)
}

fn print_report(report: &ValidationReport) {
    for issue in &report.errors {
        println!("{} {}", "error:".red().bold(), issue);
    }
    for issue in &report.warnings {
        println!("{} {}", "warning:".yellow().bold(), issue);
    }
    if report.valid {
        println!("{} ({} warning(s))", "Plan is valid".green().bold(), report.warnings.len());
    } else {
        println!("{} ({} error(s))", "Plan is invalid".red().bold(), report.errors.len());
    }
}

fn cmd_order(config: &Config, plan_path: &Path, mode: Option<ExecutionMode>, format: OutputFormat) -> Result<bool> {
    let mode = mode.unwrap_or(config.engine.mode);
    debug!(plan = %plan_path.display(), %mode, "cmd_order: called");
    let plan = load_plan(plan_path)?;
    let graph = DependencyGraph::build(&plan).context("Plan cannot be scheduled")?;
    let order = graph.execution_order(mode);

    match format {
        OutputFormat::Json => {
            let json = match &order {
                ExecutionOrder::Sequential(ids) => serde_json::json!({ "mode": mode, "order": ids }),
                ExecutionOrder::Layered(layers) => serde_json::json!({ "mode": mode, "layers": layers }),
            };
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => match &order {
            ExecutionOrder::Sequential(ids) => {
                for (i, id) in ids.iter().enumerate() {
                    println!("{:>3}. {}{}", i + 1, id.bold(), describe_deps(&graph, id));
                }
            }
            ExecutionOrder::Layered(layers) => {
                for (i, layer) in layers.iter().enumerate() {
                    println!("{} {}", format!("layer {}:", i).cyan().bold(), layer.join(", "));
                }
            }
        },
    }
    Ok(true)
}

fn describe_deps(graph: &DependencyGraph, step_id: &str) -> String {
    let deps = graph.depends_on(step_id);
    if deps.is_empty() {
        String::new()
    } else {
        format!(" (after {})", deps.join(", ")).dimmed().to_string()
    }
}

async fn cmd_simulate(
    mut config: Config,
    plan_path: &Path,
    mode: Option<ExecutionMode>,
    goal: &str,
    fail_tools: Vec<String>,
    on_failure: FailurePolicy,
    format: OutputFormat,
) -> Result<bool> {
    debug!(plan = %plan_path.display(), ?mode, ?fail_tools, ?on_failure, "cmd_simulate: called");
    let plan = load_plan(plan_path)?;
    if let Some(mode) = mode {
        config.engine.mode = mode;
    }

    let mut registry = SchemaStubRegistry::from_plan(&plan);
    for tool in fail_tools {
        registry = registry.fail_tool(tool);
    }
    let sink = match on_failure.action() {
        Some(action) => FixedDecisionSink::always(action),
        None => FixedDecisionSink::reject(),
    };
    let orchestrator = Orchestrator::new(config, Arc::new(registry), Arc::new(sink));

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling run");
            ctrl_c.cancel();
        }
    });

    let outcome = orchestrator
        .execute_plan(goal, plan, &cancel)
        .await
        .context("Simulation could not start")?;
    info!(run_id = %outcome.run_id, status = %outcome.status, "Simulation finished");

    match format {
        OutputFormat::Json => {
            let json = serde_json::json!({
                "run_id": outcome.run_id,
                "status": outcome.status.to_string(),
                "results": outcome.results,
                "tasks": outcome.tasks,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => print_outcome(&outcome),
    }
    Ok(outcome.status.is_completed())
}

fn print_outcome(outcome: &RunOutcome) {
    println!("{} {}", "run".dimmed(), outcome.run_id);
    for result in &outcome.results {
        let label = if result.success {
            "ok".green().bold()
        } else if result.skipped {
            "skipped".yellow().bold()
        } else {
            "failed".red().bold()
        };
        let detail = match (&result.output, &result.error) {
            (Some(output), _) => output.to_string(),
            (None, Some(error)) => error.message.clone(),
            (None, None) => String::new(),
        };
        println!("  {:<8} {} [{}] {}", label, result.step_id.bold(), result.tool_name, detail);
    }

    let tasks = &outcome.tasks;
    println!(
        "{} {} succeeded, {} skipped, {} failed, {} aborted, {} pending",
        "tasks:".dimmed(),
        tasks.count(TaskStatus::Success),
        tasks.count(TaskStatus::Skipped),
        tasks.count(TaskStatus::Failed),
        tasks.count(TaskStatus::Aborted),
        tasks.count(TaskStatus::Pending),
    );

    let status = match &outcome.status {
        RunStatus::Completed => outcome.status.to_string().green().bold(),
        _ => outcome.status.to_string().red().bold(),
    };
    println!("{} {}", "status:".dimmed(), status);
}
