//! On-demand tasks - standalone tasks that belong to no experiment.

use std::collections::BTreeMap;
use std::sync::Arc;

use benchtop_catalog::{PluginRegistry, ResourceStore};
use benchtop_core::{
    ExecutionError, ExperimentId, OrchestratorError, PluginKind, ResourceKind, Result, Task,
    TaskConfig, TaskId, TaskStatus, STANDALONE_EXPERIMENT_ID,
};
use benchtop_storage::{Session, SessionFactory, TaskManager};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Outcome of one pass over the on-demand tasks.
#[derive(Debug, Default)]
pub struct OnDemandReport {
    /// Tasks moved from CREATED to RUNNING
    pub started: Vec<TaskId>,
    /// Tasks that completed and were removed
    pub completed: Vec<TaskId>,
    /// Tasks that failed and were removed
    pub failed: Vec<(TaskId, ExecutionError)>,
}

/// Runs standalone tasks next to the experiment scheduler.
///
/// Each `process` call advances every tracked task by one step: a CREATED
/// task starts, a RUNNING task completes. Tasks are persisted under
/// [`STANDALONE_EXPERIMENT_ID`], which is how the usage checks find them.
pub struct OnDemandTasks {
    store: Arc<ResourceStore>,
    sessions: SessionFactory,
    tasks: Arc<dyn TaskManager>,
    plugins: Arc<dyn PluginRegistry>,
    tracked: Mutex<BTreeMap<TaskId, TaskStatus>>,
}

impl OnDemandTasks {
    /// Create an empty runner.
    pub fn new(
        store: Arc<ResourceStore>,
        sessions: SessionFactory,
        tasks: Arc<dyn TaskManager>,
        plugins: Arc<dyn PluginRegistry>,
    ) -> Self {
        Self {
            store,
            sessions,
            tasks,
            plugins,
            tracked: Mutex::new(BTreeMap::new()),
        }
    }

    fn experiment_id() -> ExperimentId {
        ExperimentId::new(STANDALONE_EXPERIMENT_ID)
    }

    /// Submit a standalone task.
    ///
    /// The task type must have a plugin and every device must belong to a
    /// loaded lab. Submitting an id that is already tracked does nothing.
    /// Admission waits for any running reconfiguration.
    pub async fn submit_task(&self, config: TaskConfig) -> Result<()> {
        let _admission = self.store.reconfiguration_lock().admit().await;
        self.validate(&config).await?;

        let id = TaskId::new(config.id.clone());
        let mut tracked = self.tracked.lock().await;
        if tracked.contains_key(&id) {
            warn!("On-demand task '{}' is already submitted", id);
            return Ok(());
        }

        let session = self.sessions.acquire().await?;
        self.tasks
            .create_task(
                &session,
                Task::standalone(id.clone(), config.task_type.clone(), config.devices),
            )
            .await?;
        tracked.insert(id.clone(), TaskStatus::Created);
        info!("Submitted on-demand task '{}' ({})", id, config.task_type);
        Ok(())
    }

    async fn validate(&self, config: &TaskConfig) -> Result<()> {
        if self
            .plugins
            .plugin_version(PluginKind::Task, &config.task_type)
            .await
            .is_none()
        {
            return Err(OrchestratorError::UnknownType {
                kind: ResourceKind::TaskType,
                name: config.task_type.clone(),
            });
        }

        for device in &config.devices {
            let lab = match self.store.lab_config(&device.lab_id).await {
                Some(lab) if self.store.is_lab_loaded(&device.lab_id).await => lab,
                _ => {
                    return Err(OrchestratorError::Configuration(format!(
                        "task '{}' uses lab '{}' which is not loaded",
                        config.id, device.lab_id
                    )))
                }
            };
            if !lab.devices.contains_key(&device.id) {
                return Err(OrchestratorError::Configuration(format!(
                    "task '{}' uses unknown device '{}' of lab '{}'",
                    config.id, device.id, device.lab_id
                )));
            }
        }
        Ok(())
    }

    /// Cancel a tracked task and stop tracking it.
    pub async fn cancel_task(&self, id: &TaskId) -> Result<()> {
        let mut tracked = self.tracked.lock().await;
        if !tracked.contains_key(id) {
            return Err(ExecutionError::new(
                Self::experiment_id(),
                format!("cannot cancel unknown on-demand task '{id}'"),
            )
            .into());
        }

        let session = self.sessions.acquire().await?;
        self.tasks
            .cancel_task(&session, &Self::experiment_id(), id)
            .await?;
        tracked.remove(id);
        info!("Cancelled on-demand task '{}'", id);
        Ok(())
    }

    /// Whether `id` is tracked.
    pub async fn is_submitted(&self, id: &TaskId) -> bool {
        self.tracked.lock().await.contains_key(id)
    }

    /// Number of tracked tasks.
    pub async fn submitted_count(&self) -> usize {
        self.tracked.lock().await.len()
    }

    /// Advance every tracked task by one step.
    pub async fn process(&self) -> OnDemandReport {
        let mut report = OnDemandReport::default();
        let mut tracked = self.tracked.lock().await;
        if tracked.is_empty() {
            return report;
        }

        let session = match self.sessions.acquire().await {
            Ok(session) => session,
            Err(e) => {
                warn!("Skipping on-demand tasks this pass: {}", e);
                return report;
            }
        };

        for (id, status) in tracked.iter_mut() {
            match self.step(&session, id, *status).await {
                Ok(TaskStatus::Running) => {
                    *status = TaskStatus::Running;
                    report.started.push(id.clone());
                }
                Ok(_) => {
                    info!("On-demand task '{}' completed", id);
                    report.completed.push(id.clone());
                }
                Err(e) => {
                    error!("Failed on-demand task '{}': {}", id, e.message);
                    if let Err(err) = self
                        .tasks
                        .fail_task(&session, &Self::experiment_id(), id)
                        .await
                    {
                        warn!("Could not mark on-demand task '{}' failed: {}", id, err);
                    }
                    report.failed.push((id.clone(), e));
                }
            }
        }

        for id in report
            .completed
            .iter()
            .chain(report.failed.iter().map(|(id, _)| id))
        {
            tracked.remove(id);
        }
        report
    }

    async fn step(
        &self,
        session: &Session,
        id: &TaskId,
        status: TaskStatus,
    ) -> std::result::Result<TaskStatus, ExecutionError> {
        let experiment_id = Self::experiment_id();
        let next = match status {
            TaskStatus::Created => TaskStatus::Running,
            _ => TaskStatus::Completed,
        };
        self.tasks
            .set_status(session, &experiment_id, id, next)
            .await
            .map_err(|e| ExecutionError::new(experiment_id.clone(), e.to_string()))?;
        Ok(next)
    }
}
