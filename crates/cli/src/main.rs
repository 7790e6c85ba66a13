//! benchtop CLI - laboratory orchestration driver.

mod app;
mod settings;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use benchtop_catalog::Catalog;
use benchtop_core::{ExperimentFilter, ExperimentStatus};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use app::App;
use settings::Settings;

#[derive(Parser)]
#[command(name = "benchtop")]
#[command(about = "Laboratory experiment orchestration", long_about = None)]
struct Cli {
    /// Settings file (default: ./benchtop.json if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Catalog directory
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// State snapshot file
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Log filter
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler loop
    Run {
        /// JSON file with an array of experiment definitions to submit
        #[arg(long)]
        submit: Option<PathBuf>,
        /// JSON file with an array of standalone tasks to run
        #[arg(long)]
        tasks: Option<PathBuf>,
        /// Stop once no experiments are left
        #[arg(long)]
        until_idle: bool,
        /// Milliseconds between ticks
        #[arg(long)]
        tick_ms: Option<u64>,
    },
    /// Fail experiments left running by a previous run
    Recover,
    /// List labs and experiment types in the catalog
    Catalog,
    /// Show persisted experiments
    Status {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).await?;
    if let Some(catalog) = cli.catalog {
        settings.catalog_dir = catalog;
    }
    if let Some(state) = cli.state {
        settings.state_file = Some(state);
    }
    if let Some(log) = cli.log {
        settings.log_filter = log;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run {
            submit,
            tasks,
            until_idle,
            tick_ms,
        } => {
            if let Some(ms) = tick_ms {
                settings.tick_interval_ms = ms;
            }
            let app = App::open(&settings).await?;
            app.prepare(&settings).await?;
            if let Some(path) = submit {
                let count = app.submit_file(&path).await?;
                info!("Submitted {} experiments from {}", count, path.display());
            }
            if let Some(path) = tasks {
                let count = app.submit_tasks_file(&path).await?;
                info!("Submitted {} on-demand tasks from {}", count, path.display());
            }

            let result = app
                .run(Duration::from_millis(settings.tick_interval_ms), until_idle)
                .await;
            app.save().await?;
            result?;
        }
        Commands::Recover => {
            let app = App::open(&settings).await?;
            let failed = app.scheduler.fail_all_running().await?;
            app.save().await?;
            println!("Failed {} running experiments", failed);
        }
        Commands::Catalog => {
            let catalog = Catalog::from_dir(&settings.catalog_dir)
                .await
                .with_context(|| format!("failed to read {}", settings.catalog_dir.display()))?;

            println!("Labs");
            for id in catalog.lab_ids() {
                if let Some(lab) = catalog.lab(id) {
                    println!("  {} | {} devices | {}", id, lab.devices.len(), lab.description);
                }
            }
            println!("Experiment types");
            for experiment_type in catalog.experiment_types() {
                if let Some(experiment) = catalog.experiment(experiment_type) {
                    println!(
                        "  {} | labs: {} | {} tasks",
                        experiment_type,
                        experiment.labs.join(", "),
                        experiment.tasks.len()
                    );
                }
            }
        }
        Commands::Status { status } => {
            let mut filter = ExperimentFilter::default();
            if let Some(status) = status {
                let status: ExperimentStatus = status
                    .parse()
                    .map_err(|_| anyhow::anyhow!("Invalid status: {status}"))?;
                filter.status = Some(status);
            }

            let app = App::open(&settings).await?;
            let experiments = app.scheduler.list_experiments(&filter).await?;
            println!("Experiments ({})", experiments.len());
            for experiment in experiments {
                println!(
                    "  {} | {} | {} | {} tasks done, {} running",
                    experiment.id,
                    experiment.experiment_type,
                    experiment.status,
                    experiment.completed_tasks.len(),
                    experiment.running_tasks.len(),
                );
            }
        }
    }

    Ok(())
}
