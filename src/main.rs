use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use planex::config::Config;
use planex::orchestration::{
    Capabilities, ClaudeBackend, ClaudeHeadless, Executor, FailurePolicy, SchedulerEvent,
    SearchTool, SerperSearch,
};
use planex::{FinalAnswer, Result, RunError};

/// planex - plan a query into a task graph, solve it in parallel, merge the answer
#[derive(Parser, Debug)]
#[command(name = "planex")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    PLANEX_DEBUG=1     Enable debug logging (alternative to --debug)\n    SERPER_API_KEY     Enables web search for workers")]
pub struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Answer a query with the full plan / execute / consolidate pipeline
    Run {
        /// The query in natural language
        query: String,

        /// Maximum number of tasks solved at once
        #[arg(long, short = 'w')]
        max_workers: Option<usize>,

        /// What to do when some tasks fail
        #[arg(long, value_enum)]
        policy: Option<FailurePolicy>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Plan a query and print its task graph without running it
    Plan {
        /// The query in natural language
        query: String,
    },

    /// Show the effective configuration
    Config {
        /// Write a default config file
        #[arg(long)]
        init: bool,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    planex::log::init_with_debug(cli.debug);

    match cli.command {
        Command::Run {
            query,
            max_workers,
            policy,
            json,
        } => run_query(query, max_workers, policy, json),
        Command::Plan { query } => run_plan(query),
        Command::Config { init } => run_config(init),
    }
}

/// Wire the `claude` provider and, when a key is present, Serper search.
fn build_capabilities(config: &Config) -> Result<Capabilities> {
    let headless = ClaudeHeadless::new(config.provider.effective_command())?
        .with_timeout(config.provider.timeout());
    let backend = Arc::new(ClaudeBackend::new(headless));

    let search: Option<Arc<dyn SearchTool>> = if config.search.enabled {
        let found = SerperSearch::from_env(
            &config.search.api_key_env,
            &config.search.endpoint,
            config.search.max_results,
        )?;
        if found.is_none() {
            info!(env = %config.search.api_key_env, "web search disabled: API key not set");
        }
        found.map(|s| Arc::new(s) as Arc<dyn SearchTool>)
    } else {
        None
    };

    Ok(Capabilities {
        planner: backend.clone(),
        solver: backend.clone(),
        search,
        synthesizer: backend,
    })
}

fn run_query(
    query: String,
    max_workers: Option<usize>,
    policy: Option<FailurePolicy>,
    json: bool,
) -> Result<ExitCode> {
    let config = Config::load()?;
    let mut executor_config = config.executor_config();
    if let Some(policy) = policy {
        executor_config.failure_policy = policy;
    }
    let max_workers = max_workers.unwrap_or(executor_config.max_workers);
    let capabilities = build_capabilities(&config)?;

    let rt = tokio::runtime::Runtime::new()?;
    let executor = Executor::new(capabilities, executor_config);
    rt.block_on(execute_query(executor, &query, max_workers, json))
}

async fn execute_query(
    executor: Executor,
    query: &str,
    max_workers: usize,
    json: bool,
) -> Result<ExitCode> {
    let (event_tx, event_rx) = mpsc::channel(256);
    let executor = executor.with_events(event_tx);
    let printer = tokio::spawn(print_events(event_rx));

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted, cancelling run...");
                cancel.cancel();
            }
        })
    };

    let outcome = executor
        .run_query_with_cancel(query, max_workers, cancel)
        .await;
    interrupt.abort();
    drop(executor);
    let _ = printer.await;

    match outcome {
        Ok(answer) => {
            print_answer(&answer, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(run_error) => {
            print_run_error(&run_error, json)?;
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn print_events(mut rx: mpsc::Receiver<SchedulerEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            SchedulerEvent::TaskStarted { task_id } => eprintln!("  > {}", task_id),
            SchedulerEvent::TaskCompleted { task_id } => eprintln!("  ✓ {}", task_id),
            SchedulerEvent::TaskFailed { task_id, error } => {
                eprintln!("  ✗ {}: {}", task_id, error)
            }
            SchedulerEvent::Stalled { failed, blocked } => eprintln!(
                "  {} failed, {} skipped",
                failed.len(),
                blocked.len()
            ),
            SchedulerEvent::TaskReady { .. } | SchedulerEvent::AllTasksComplete => {}
        }
    }
}

fn print_answer(answer: &FinalAnswer, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(answer)?);
        return Ok(());
    }
    println!("{}", answer.answer.trim());
    if let Some(caveat) = &answer.caveat {
        eprintln!();
        eprintln!("Note: {}", caveat);
    }
    Ok(())
}

fn print_run_error(run_error: &RunError, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&run_error.report())?);
        return Ok(());
    }
    eprintln!("Error: {}", run_error);
    let failed = run_error.failed_tasks();
    if !failed.is_empty() {
        let ids: Vec<&str> = failed.iter().map(|id| id.as_str()).collect();
        eprintln!("Failed tasks: {}", ids.join(", "));
    }
    Ok(())
}

fn run_plan(query: String) -> Result<ExitCode> {
    let config = Config::load()?;
    let executor = Executor::new(build_capabilities(&config)?, config.executor_config());

    let rt = tokio::runtime::Runtime::new()?;
    let (graph, goal) = rt.block_on(executor.plan_only(&query))?;

    if let Some(goal) = goal {
        println!("Goal: {}", goal);
        println!();
    }
    for task in graph.topological_order()? {
        println!("{}  {}", task.id, task.description);
        if !task.dependencies.is_empty() {
            let deps: Vec<&str> = task.dependencies.iter().map(|d| d.as_str()).collect();
            println!("    needs: {}", deps.join(", "));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_config(init: bool) -> Result<ExitCode> {
    if init {
        let path = Config::default().save()?;
        println!("Wrote {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }
    let path = Config::config_path()?;
    let config = Config::load()?;
    println!("# {}", path.display());
    print!("{}", config.to_toml()?);
    Ok(ExitCode::SUCCESS)
}
