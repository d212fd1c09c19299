//! braid - Serial and parallel task composition demos.
//!
//! Usage:
//!   braid run <demo>        Run one composition demo
//!   braid list              List the available demos
//!   braid validate <file>   Validate a demo configuration file

use braid::{Demo, DemoConfig, DemoDriver, DemoOutput, EventBus, FailurePolicy, TracingHandler};
use braid::config::load_demo_config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// braid - Serial and parallel task composition demos
#[derive(Parser)]
#[command(name = "braid")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one composition demo
    Run {
        /// Demo to run (see `braid list`)
        #[arg(value_name = "DEMO")]
        demo: Demo,

        /// Path to a YAML demo configuration
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Number of composed tasks
        #[arg(short = 't', long)]
        tasks: Option<usize>,

        /// Simulated latency of each task in milliseconds
        #[arg(short = 'd', long)]
        duration_ms: Option<u64>,

        /// Input for the composition (computed by a seed task when omitted)
        #[arg(short, long, allow_negative_numbers = true)]
        input: Option<i64>,

        /// Make the task with this id fail (repeatable)
        #[arg(long = "fail-task", value_name = "ID")]
        fail_tasks: Vec<u32>,

        /// Report the first parallel failure instead of collecting all of them
        #[arg(long)]
        fail_fast: bool,
    },

    /// List the available demos
    List,

    /// Validate a demo configuration file
    Validate {
        /// Path to the YAML configuration
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            demo,
            config,
            tasks,
            duration_ms,
            input,
            fail_tasks,
            fail_fast,
        } => {
            let mut config = load_demo_config(config.as_deref())?;
            if let Some(tasks) = tasks {
                config.tasks = tasks;
            }
            if let Some(duration_ms) = duration_ms {
                config.duration_ms = duration_ms;
            }
            if input.is_some() {
                config.initial_input = input;
            }
            if !fail_tasks.is_empty() {
                config.fail_tasks = fail_tasks;
            }
            if fail_fast {
                config.failure_policy = FailurePolicy::FailFast;
            }
            run_demo(demo, config).await?;
        }
        Commands::List => {
            list_demos();
        }
        Commands::Validate { file } => {
            validate_config(file)?;
        }
    }

    Ok(())
}

/// Run a demo and print its report.
async fn run_demo(demo: Demo, config: DemoConfig) -> Result<(), Box<dyn std::error::Error>> {
    let events = Arc::new(EventBus::with_handler(Arc::new(TracingHandler)));
    let driver = DemoDriver::new(config, events)?;

    // Ctrl+C cancels pending tasks; the run then reports a stall.
    let cancel = driver.cancellation_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling pending tasks");
            cancel.cancel();
        }
    });

    match driver.run(demo).await {
        Ok(report) => {
            println!();
            println!("Demo: {}", report.demo);
            println!("  Seed: {}", report.seed);
            match &report.output {
                DemoOutput::Serial(value) => println!("  Result: {}", value),
                DemoOutput::Parallel(values) => println!("  Results: {:?}", values),
            }
            if let Some(epilogue) = report.epilogue {
                println!("  Epilogue: {}", epilogue);
            }
            println!("  Elapsed: {:?}", report.elapsed);
            Ok(())
        }
        Err(e) => {
            error!("Demo '{}' failed: {}", demo, e);
            Err(e.into())
        }
    }
}

/// List all demos.
fn list_demos() {
    println!("Demos:");
    println!();
    for demo in Demo::all() {
        println!("  {:<28} {}", demo.as_str(), demo.description());
    }
}

/// Validate a configuration file without running anything.
fn validate_config(file: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating config: {}", file.display());

    match braid::YamlLoader::load_config(&file) {
        Ok(config) => {
            let ids = config.task_ids();
            info!(
                "Config is valid: {} task(s) with ids {}..{}, {}ms each",
                config.tasks, ids.start, ids.end, config.duration_ms
            );
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}
