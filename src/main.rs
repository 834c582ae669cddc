//! Runbook Engine CLI Entry Point
//!
//! # Usage
//!
//! ```bash
//! # Serve the HTTP surface
//! runbook-engine serve --config engine.yaml --definitions runbooks.yaml
//!
//! # Run one submitted workflow execution to completion
//! runbook-engine run 663a8c84bbe4cf949c6e51e4
//!
//! # Check a definitions bundle without touching the store
//! runbook-engine validate runbooks.yaml
//!
//! # Render Job manifests instead of applying them
//! runbook-engine serve --dry-run
//! ```

use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use runbook_engine::api::{self, AppState};
use runbook_engine::config::{FabricBackend, StoreBackend};
use runbook_engine::workflow::validator::describe;
use runbook_engine::workflow::{seed_definitions, StepLedger, WorkflowExecution};
use runbook_engine::{
    load_bundle, validate_definition, EngineConfig, ExecutionId, FileStore, KubectlFabric,
    MemoryStore, Orchestrator, Records, APP_NAME, VERSION,
};

/// What the invocation asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Serve,
    Run(String),
    Validate(String),
}

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Cli {
    config_path: Option<String>,
    definitions_path: Option<String>,
    dry_run: bool,
    verbose: bool,
    command: Command,
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config_path: None,
            definitions_path: None,
            dry_run: false,
            verbose: false,
            command: Command::Serve,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Workflow Orchestration for Container Runbooks");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: runbook-engine [OPTIONS] [COMMAND]");
    println!();
    println!("Commands:");
    println!("  serve               Serve the HTTP surface (default)");
    println!("  run <EXECUTION_ID>  Run one submitted workflow execution");
    println!("  validate <FILE>     Check a definitions bundle and exit");
    println!();
    println!("Options:");
    println!("  --config PATH       Engine configuration file");
    println!("  --definitions PATH  Seed action and workflow definitions from a bundle");
    println!("  --dry-run           Log Job manifests instead of applying them");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  runbook-engine serve --config /etc/runbook-engine/engine.yaml");
    println!("  runbook-engine run 663a8c84bbe4cf949c6e51e4 --definitions runbooks.yaml");
    println!("  runbook-engine validate runbooks.yaml");
}

/// Parses command-line arguments into a Cli struct.
fn parse_arguments(args: &[String]) -> Result<Cli, String> {
    let mut cli = Cli::default();
    let mut positional: Vec<&str> = Vec::new();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--dry-run" => {
                cli.dry_run = true;
            }
            "--verbose" | "-v" => {
                cli.verbose = true;
            }
            "--config" => {
                i += 1;
                if i >= args.len() {
                    return Err("--config requires a path argument".to_string());
                }
                cli.config_path = Some(args[i].clone());
            }
            "--definitions" => {
                i += 1;
                if i >= args.len() {
                    return Err("--definitions requires a path argument".to_string());
                }
                cli.definitions_path = Some(args[i].clone());
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => positional.push(arg.as_str()),
        }
        i += 1;
    }

    cli.command = match positional.as_slice() {
        [] | ["serve"] => Command::Serve,
        ["run", id] => Command::Run(id.to_string()),
        ["run"] => return Err("run requires an execution id".to_string()),
        ["validate", path] => Command::Validate(path.to_string()),
        ["validate"] => return Err("validate requires a bundle path".to_string()),
        ["serve" | "run" | "validate", extra, ..] => {
            return Err(format!("Unexpected argument: {}", extra));
        }
        [other, ..] => return Err(format!("Unknown command: {}", other)),
    };

    Ok(cli)
}

/// Checks every workflow in a bundle and prints one line per workflow.
fn validate_bundle(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let bundle = load_bundle(path)?;
    info!(
        "Bundle loaded: {} actions, {} workflows",
        bundle.actions.len(),
        bundle.workflows.len()
    );

    let mut invalid = 0;
    for workflow in &bundle.workflows {
        match validate_definition(workflow) {
            Ok(chain) => {
                println!("{} {} ({})", "ok".green(), workflow.key(), chain.join(" -> "));
            }
            Err(errors) => {
                invalid += 1;
                println!("{} {}", "invalid".red(), workflow.key());
                for line in describe(&errors).lines() {
                    println!("    {}", line);
                }
            }
        }
    }

    if invalid > 0 {
        return Err(format!("{} of {} workflows are invalid", invalid, bundle.workflows.len()).into());
    }
    Ok(())
}

/// Opens the configured record store.
async fn open_records(config: &EngineConfig) -> Result<Records, Box<dyn std::error::Error>> {
    let records = match config.store.backend {
        StoreBackend::File => {
            info!("Record store: {}", config.store.path.display());
            Records::new(Arc::new(FileStore::open(&config.store.path).await?))
        }
        StoreBackend::Memory => {
            warn!("Record store: in memory, records are lost on exit");
            Records::new(Arc::new(MemoryStore::new()))
        }
    };
    Ok(records)
}

/// Prints the step ledger of a run, one dispatched step per line.
fn print_ledger(ledger: &StepLedger) {
    println!();
    for (step, execution_id) in ledger.iter() {
        println!("  {:<24} {}", step, execution_id);
    }
    println!();
}

/// Where and why a stored execution stopped.
fn failure_summary(execution: &WorkflowExecution) -> String {
    let error = execution.error.as_deref().unwrap_or("no error recorded");
    match &execution.failed_step {
        Some(step) => format!("at step '{}': {}", step, error),
        None => format!("before any step: {}", error),
    }
}

/// Cancels `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, shutting down");
            token.cancel();
        }
    });
}

/// Main application entry point.
async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let cli = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(cli.verbose);
    print_banner();

    if let Command::Validate(path) = &cli.command {
        return validate_bundle(path);
    }

    let config = EngineConfig::resolve(cli.config_path.as_deref())?;
    let records = open_records(&config).await?;

    if let Some(path) = &cli.definitions_path {
        info!("Seeding definitions from {}", path);
        let bundle = load_bundle(path)?;
        let report = seed_definitions(&records, &bundle).await?;
        info!(
            "Seeded {} actions and {} workflows ({} unchanged, {} rejected)",
            report.actions_inserted, report.workflows_inserted, report.unchanged, report.rejected
        );
    }

    let dry_run = cli.dry_run || config.fabric.backend == FabricBackend::DryRun;
    if dry_run {
        info!("Mode: DRY RUN (Job manifests are logged, not applied)");
    }
    let fabric = Arc::new(KubectlFabric::from_config(&config.fabric, dry_run));
    let orchestrator = Orchestrator::new(records, fabric, &config);

    let shutdown = CancellationToken::new();
    cancel_on_interrupt(shutdown.clone());

    match cli.command {
        Command::Serve => {
            let listener = TcpListener::bind(&config.listen_addr).await?;
            info!("Listening on {}", config.listen_addr);
            info!("Runners post results to {}", config.postback_base_url);

            let app = api::router(AppState::new(orchestrator, shutdown.clone()));
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await?;
            info!("Server stopped");
        }
        Command::Run(id) => match orchestrator.execute(&id, shutdown).await {
            Ok(outcome) => {
                print_ledger(&outcome.action_executions);
                println!("{} {}", "success".green(), id);
            }
            Err(e) => {
                error!("Workflow execution {} stopped: {}", id, e);

                // Failures after loading are already on the record
                let stored = match ExecutionId::parse(&id) {
                    Ok(execution_id) => orchestrator.records().workflow_execution(&execution_id).await.ok(),
                    Err(_) => None,
                };
                if let Some(execution) = stored.filter(|execution| execution.status.is_terminal()) {
                    if let Some(ledger) = &execution.action_executions {
                        print_ledger(ledger);
                    }
                    println!("{} {} {}", execution.status.to_string().red(), id, failure_summary(&execution));
                }
                return Err(e.into());
            }
        },
        Command::Validate(_) => {}
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("runbook-engine")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_default_command_is_serve() {
        let cli = parse_arguments(&args(&[])).unwrap();
        assert_eq!(cli.command, Command::Serve);
        assert!(!cli.dry_run);
        assert!(cli.config_path.is_none());
    }

    #[test]
    fn test_run_with_options() {
        let cli = parse_arguments(&args(&[
            "run",
            "663a8c84bbe4cf949c6e51e4",
            "--config",
            "engine.yaml",
            "--definitions",
            "runbooks.yaml",
            "--dry-run",
            "-v",
        ]))
        .unwrap();

        assert_eq!(cli.command, Command::Run("663a8c84bbe4cf949c6e51e4".to_string()));
        assert_eq!(cli.config_path.as_deref(), Some("engine.yaml"));
        assert_eq!(cli.definitions_path.as_deref(), Some("runbooks.yaml"));
        assert!(cli.dry_run);
        assert!(cli.verbose);
    }

    #[test]
    fn test_validate_command() {
        let cli = parse_arguments(&args(&["validate", "runbooks.yaml"])).unwrap();
        assert_eq!(cli.command, Command::Validate("runbooks.yaml".to_string()));
    }

    #[test]
    fn test_argument_errors() {
        assert!(parse_arguments(&args(&["--config"])).is_err());
        assert!(parse_arguments(&args(&["--bogus"])).is_err());
        assert!(parse_arguments(&args(&["run"])).is_err());
        assert!(parse_arguments(&args(&["launch"])).is_err());
        assert!(parse_arguments(&args(&["serve", "extra"])).is_err());
    }

    fn stored_execution(value: serde_json::Value) -> WorkflowExecution {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_failure_summary_names_step() {
        let execution = stored_execution(serde_json::json!({
            "_id": "663a8c84bbe4cf949c6e51e4",
            "workflow_namespace": "ops",
            "workflow_name": "w",
            "version": 1,
            "status": "failed",
            "action_executions": {"a": "663a8c84bbe4cf949c6e51e5"},
            "failed_step": "a",
            "failure_reason": "action_execution_failed",
            "error": "action execution 663a8c84bbe4cf949c6e51e5 failed"
        }));

        assert_eq!(
            failure_summary(&execution),
            "at step 'a': action execution 663a8c84bbe4cf949c6e51e5 failed"
        );
    }

    #[test]
    fn test_failure_summary_without_step() {
        let execution = stored_execution(serde_json::json!({
            "_id": "663a8c84bbe4cf949c6e51e4",
            "workflow_namespace": "ops",
            "workflow_name": "w",
            "version": 1,
            "status": "failed",
            "failure_reason": "definition_not_found"
        }));

        assert_eq!(failure_summary(&execution), "before any step: no error recorded");
    }
}
