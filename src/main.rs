use anyhow::{Context, Result};
use shipline::{
    cli::{
        commands::{HistoryCommand, ListCommand, RunCommand, ValidateCommand},
        output::*,
        Cli, Command,
    },
    core::{Environment, ExecutionStatus, PipelineContext},
    execution::{CancellationToken, ExecutionEngine},
    persistence::{create_summary, or_in_memory, ExecutionSummary, InMemoryPersistence, PersistenceBackend},
    process::{ExecutorConfig, SubprocessExecutor},
    report::{JsonFileNotifier, LogNotifier, Notifier, RunReport},
};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Exit code for configuration problems found before any step ran
const EXIT_INVALID_CONFIG: i32 = 3;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("{}", e))
        .context("Failed to set logging subscriber")?;

    let code = match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::List(cmd) => list_pipelines(cmd).await.map(|_| 0)?,
        Command::History(cmd) => show_history(cmd).await.map(|_| 0)?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn history_store() -> Result<Arc<dyn PersistenceBackend>> {
    #[cfg(feature = "sqlite")]
    {
        let store = shipline::persistence::SqliteExecutionStore::with_default_path().await?;
        Ok(Arc::new(store))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        warn!("Built without the sqlite feature; history is not kept between runs");
        Ok(Arc::new(InMemoryPersistence::new()))
    }
}

/// Cancel the token on Ctrl-C or SIGTERM
fn cancel_on_signal(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut terminate = match signal(SignalKind::terminate()) {
                Ok(terminate) => terminate,
                Err(e) => {
                    warn!("Could not listen for SIGTERM: {}", e);
                    if tokio::signal::ctrl_c().await.is_ok() {
                        cancel.cancel();
                    }
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
        }

        warn!("Interrupt received, cancelling the run");
        cancel.cancel();
    });
}

async fn run_pipeline(cmd: &RunCommand) -> Result<i32> {
    let config = match cmd.load_config() {
        Ok(config) => config,
        Err(e) => {
            println!("{}Invalid pipeline configuration:", CROSS);
            println!("  {}", style(e).red());
            return Ok(EXIT_INVALID_CONFIG);
        }
    };

    println!("{}Loaded pipeline: {}", INFO, style(&config.name).bold());

    let pipeline = config.to_pipeline();
    let trigger = PipelineContext::new(&cmd.workspace, cmd.environment(Environment::from_process()));

    // A broken history store never stops the pipeline itself
    let store: Arc<dyn PersistenceBackend> = if cmd.no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        or_in_memory(history_store().await)
    };

    let mut notifiers: Vec<Box<dyn Notifier>> = vec![Box::new(LogNotifier)];
    if let Some(path) = &cmd.report {
        notifiers.push(Box::new(JsonFileNotifier::new(path)));
    }

    let mut engine = ExecutionEngine::new(SubprocessExecutor::new(ExecutorConfig::default()));
    let progress = create_progress_bar(pipeline.steps.len());
    {
        let progress = progress.clone();
        engine.add_event_handler(move |event| render_event(&progress, &event));
    }

    let cancel = CancellationToken::new();
    cancel_on_signal(cancel.clone());

    println!();
    let mut run = pipeline.new_run();
    let state = engine.execute(&mut run, &trigger, &cancel).await;

    let report = RunReport::from_run(&run);
    for notifier in &notifiers {
        if let Err(e) = notifier.notify(&report).await {
            warn!("Notifier failed: {:#}", e);
        }
    }

    if !cmd.no_history {
        let summary = create_summary(&run);
        match store.save_execution(&summary).await {
            Ok(()) => println!(
                "\n{}Execution saved to history (ID: {})",
                INFO,
                style(summary.execution_id).dim()
            ),
            Err(e) => warn!("Could not save execution to history: {:#}", e),
        }
    }

    if let Some(output) = format_failure_output(&report, 20) {
        println!("\n{}", style("Output of the failing step:").bold());
        println!("{}", output);
    }

    let icon = match state.status() {
        ExecutionStatus::Succeeded => CHECK,
        ExecutionStatus::Cancelled => STOP,
        ExecutionStatus::Rejected => WARN,
        _ => CROSS,
    };
    println!("\n{}{}", icon, report.headline());

    Ok(state.exit_code().unwrap_or(1))
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<i32> {
    println!("{}Validating pipeline...", INFO);

    match cmd.load_config() {
        Ok(config) => {
            let pipeline = config.to_pipeline();
            println!("{}Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&pipeline.name).bold());
            println!("  Steps:");
            for (index, step) in pipeline.steps.iter().enumerate() {
                println!(
                    "    {}. {} ({} {}) timeout {}",
                    index + 1,
                    style(&step.id).cyan(),
                    step.command.program,
                    step.command.args.join(" "),
                    style(format_duration(step.timeout)).dim()
                );
            }
            println!("  Required environment: {}", pipeline.required_keys().join(", "));

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(0)
        }
        Err(e) => {
            println!("{}Validation failed:", CROSS);
            println!("  {}", style(e).red());
            Ok(EXIT_INVALID_CONFIG)
        }
    }
}

async fn list_pipelines(cmd: &ListCommand) -> Result<()> {
    let store = history_store().await?;
    let pipelines = store.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{}No pipelines found in history", INFO);
        return Ok(());
    }

    if cmd.json {
        let mut json_data = Vec::new();
        for pipeline in &pipelines {
            let executions = store.list_executions(pipeline).await?;
            json_data.push(serde_json::json!({
                "name": pipeline,
                "execution_count": executions.len(),
            }));
        }
        let data = serde_json::json!({ "pipelines": json_data });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{}Pipelines in history:", INFO);
    for pipeline_name in &pipelines {
        if cmd.with_counts {
            let executions = store.list_executions(pipeline_name).await?;
            let count = |status| executions.iter().filter(|e| e.status == status).count();
            println!(
                "  {} ({} runs: {} succeeded, {} failed, {} cancelled, {} rejected)",
                style(pipeline_name).bold(),
                style(executions.len()).cyan(),
                style(count(ExecutionStatus::Succeeded)).green(),
                style(count(ExecutionStatus::Failed)).red(),
                style(count(ExecutionStatus::Cancelled)).yellow(),
                style(count(ExecutionStatus::Rejected)).magenta()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = history_store().await?;

    if let Some(exec_id_str) = &cmd.execution_id {
        let exec_id = uuid::Uuid::parse_str(exec_id_str).context("Invalid execution ID format")?;
        match store.load_execution(exec_id).await? {
            Some(summary) => print_execution_details(&summary, cmd.details)?,
            None => println!("{}Execution not found", WARN),
        }
        return Ok(());
    }

    let mut executions = match &cmd.pipeline {
        Some(pipeline_name) => store.list_executions(pipeline_name).await?,
        None => {
            let mut all_execs = Vec::new();
            for pipeline in store.list_pipelines().await? {
                all_execs.extend(store.list_executions(&pipeline).await?);
            }
            all_execs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all_execs
        }
    };
    executions.truncate(cmd.limit);

    if executions.is_empty() {
        println!("{}No executions found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "executions": executions });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{}Execution history (showing latest {}):", INFO, executions.len());
        for summary in &executions {
            println!("  {}", format_execution_summary(summary));
        }
    }

    Ok(())
}

fn print_execution_details(summary: &ExecutionSummary, details: bool) -> Result<()> {
    println!("{}Execution Details", INFO);
    println!("  ID: {}", style(summary.execution_id).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Status: {}", format_status(summary.status));
    if let Some(step) = &summary.failing_step {
        println!("  Failing step: {}", style(step).red());
    }
    if let Some(cause) = &summary.cause {
        println!("  Cause: {}", cause);
    }
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!("  Steps: {}/{}", summary.completed_steps, summary.total_steps);

    if details {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(summary)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}
