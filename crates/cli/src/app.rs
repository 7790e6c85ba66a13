//! Wiring of the scheduler and lifecycle guard, and the driver loop.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use benchtop_catalog::{Catalog, ManifestPluginRegistry, ResourceStore};
use benchtop_core::{ExperimentDefinition, TaskConfig};
use benchtop_execution::{
    ExperimentScheduler, OnDemandTasks, SchedulerConfig, SequentialExecutorFactory,
};
use benchtop_lifecycle::ResourceLifecycle;
use benchtop_storage::{
    DatabaseConfig, SessionFactory, StoreContainerManager, StoreDeviceManager,
    StoreExperimentManager, StoreTaskManager,
};
use tracing::{info, warn};

use crate::settings::Settings;

/// Every long-lived component of a running orchestrator.
pub struct App {
    pub sessions: SessionFactory,
    pub scheduler: Arc<ExperimentScheduler>,
    pub on_demand: Arc<OnDemandTasks>,
    pub lifecycle: Arc<ResourceLifecycle>,
}

impl App {
    /// Read the catalog, restore the database and build the components.
    pub async fn open(settings: &Settings) -> Result<Self> {
        let catalog = Catalog::from_dir(&settings.catalog_dir)
            .await
            .with_context(|| format!("failed to read catalog {}", settings.catalog_dir.display()))?;

        let mut db_config = DatabaseConfig::new().with_max_sessions(settings.max_sessions);
        if let Some(path) = &settings.state_file {
            db_config = db_config.with_snapshot_path(path);
        }
        let sessions = SessionFactory::open(db_config)
            .await
            .context("failed to open database")?;

        let plugins = Arc::new(ManifestPluginRegistry::from_catalog(&catalog));
        let store = Arc::new(ResourceStore::new(catalog));
        let experiments = Arc::new(StoreExperimentManager::new());
        let tasks = Arc::new(StoreTaskManager::new());

        let factory = Arc::new(SequentialExecutorFactory::new(
            store.clone(),
            experiments.clone(),
            tasks.clone(),
        ));
        let scheduler = ExperimentScheduler::new(
            store.clone(),
            sessions.clone(),
            experiments.clone(),
            tasks.clone(),
            factory,
        )
        .with_config(
            SchedulerConfig::new().with_cancellation_capacity(settings.cancellation_capacity),
        );
        let on_demand = OnDemandTasks::new(
            store.clone(),
            sessions.clone(),
            tasks.clone(),
            plugins.clone(),
        );
        let lifecycle = ResourceLifecycle::new(
            store.clone(),
            sessions.clone(),
            experiments,
            tasks,
            Arc::new(StoreDeviceManager::new()),
            Arc::new(StoreContainerManager::new()),
            plugins,
        );

        Ok(Self {
            sessions,
            scheduler: Arc::new(scheduler),
            on_demand: Arc::new(on_demand),
            lifecycle: Arc::new(lifecycle),
        })
    }

    /// Fail leftovers from a previous run, then load the configured labs and
    /// experiment types.
    pub async fn prepare(&self, settings: &Settings) -> Result<()> {
        let failed = self.scheduler.fail_all_running().await?;
        if failed > 0 {
            warn!("Recovered {} experiments left running by a previous run", failed);
        }
        if !settings.labs.is_empty() {
            self.lifecycle.load_labs(&settings.labs).await?;
        }
        if !settings.experiments.is_empty() {
            self.lifecycle.load_experiments(&settings.experiments).await?;
        }
        Ok(())
    }

    /// Submit every definition in a JSON array file.
    pub async fn submit_file(&self, path: &Path) -> Result<usize> {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let definitions: Vec<ExperimentDefinition> = serde_json::from_str(&json)
            .with_context(|| format!("invalid submissions in {}", path.display()))?;

        let count = definitions.len();
        for definition in definitions {
            let id = definition.id.clone();
            self.scheduler
                .submit(definition)
                .await
                .with_context(|| format!("failed to submit experiment '{id}'"))?;
        }
        Ok(count)
    }

    /// Submit every standalone task in a JSON array file.
    pub async fn submit_tasks_file(&self, path: &Path) -> Result<usize> {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let configs: Vec<TaskConfig> = serde_json::from_str(&json)
            .with_context(|| format!("invalid tasks in {}", path.display()))?;

        let count = configs.len();
        for config in configs {
            let id = config.id.clone();
            self.on_demand
                .submit_task(config)
                .await
                .with_context(|| format!("failed to submit task '{id}'"))?;
        }
        Ok(count)
    }

    /// Tick, process on-demand tasks and drain cancellations every `period`
    /// until ctrl-c, or until no work is left when `until_idle` is set.
    pub async fn run(&self, period: Duration, until_idle: bool) -> Result<()> {
        let mut interval = tokio::time::interval(period);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Interrupted, stopping");
                    break;
                }
                _ = interval.tick() => {
                    let tick = self.scheduler.tick().await;
                    let tasks = self.on_demand.process().await;
                    let drain = self.scheduler.drain_cancellations().await;
                    if tick.processed() > 0 || !drain.cancelled.is_empty() {
                        info!(
                            "Tick: {} progressed, {} completed, {} failed, {} cancelled",
                            tick.progressed.len(),
                            tick.completed.len(),
                            tick.failed.len(),
                            drain.cancelled.len()
                        );
                    }
                    if !tasks.completed.is_empty() || !tasks.failed.is_empty() {
                        info!(
                            "On-demand: {} completed, {} failed",
                            tasks.completed.len(),
                            tasks.failed.len()
                        );
                    }
                    if until_idle
                        && self.scheduler.submitted_count().await == 0
                        && self.on_demand.submitted_count().await == 0
                    {
                        info!("No work left");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Persist the database snapshot.
    pub async fn save(&self) -> Result<()> {
        self.sessions
            .save_snapshot()
            .await
            .context("failed to save snapshot")
    }
}
