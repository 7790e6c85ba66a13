//! Sequential executor - runs an experiment's tasks one at a time.

use std::sync::Arc;

use async_trait::async_trait;
use benchtop_catalog::ResourceStore;
use benchtop_core::{
    ExecutionError, Experiment, ExperimentConfig, ExperimentDefinition, ExperimentStatus, Task,
    TaskConfig, TaskFilter, TaskId, TaskStatus,
};
use benchtop_storage::{ExperimentManager, Session, StorageError, TaskManager};
use tracing::{debug, info};

use crate::{DependencyResolver, ExecutorFactory, ExperimentExecutor, Resolution};

/// Executor that walks the task graph in dependency order.
///
/// Each `progress` call finishes the running task, if any, and starts the
/// next one. The experiment completes on the call after its last task
/// has been started.
pub struct SequentialExecutor {
    definition: ExperimentDefinition,
    config: ExperimentConfig,
    experiments: Arc<dyn ExperimentManager>,
    tasks: Arc<dyn TaskManager>,
    plan: Vec<TaskConfig>,
    running: Option<TaskId>,
}

impl SequentialExecutor {
    /// Create an executor for `definition` of the type described by `config`.
    pub fn new(
        definition: ExperimentDefinition,
        config: ExperimentConfig,
        experiments: Arc<dyn ExperimentManager>,
        tasks: Arc<dyn TaskManager>,
    ) -> Self {
        Self {
            definition,
            config,
            experiments,
            tasks,
            plan: Vec::new(),
            running: None,
        }
    }

    fn error(&self, message: impl Into<String>) -> ExecutionError {
        ExecutionError::new(self.definition.id.clone(), message)
    }

    fn storage_error(&self, err: StorageError) -> ExecutionError {
        self.error(err.to_string())
    }

    async fn create(&mut self, session: &Session) -> Result<(), ExecutionError> {
        let id = self.definition.id.clone();
        let experiment = Experiment::new(
            id.clone(),
            self.definition.experiment_type.clone(),
            self.config.labs.clone(),
            self.definition.execution.clone(),
        );
        self.experiments
            .create_experiment(session, experiment)
            .await
            .map_err(|e| self.storage_error(e))?;

        for task in &self.plan {
            let record = Task::new(
                TaskId::new(task.id.clone()),
                task.task_type.clone(),
                id.clone(),
                task.devices.clone(),
            );
            self.tasks
                .create_task(session, record)
                .await
                .map_err(|e| self.storage_error(e))?;
        }
        Ok(())
    }

    async fn resume(&mut self, session: &Session, existing: Experiment) -> Result<(), ExecutionError> {
        match existing.status {
            ExperimentStatus::Failed | ExperimentStatus::Cancelled | ExperimentStatus::Suspended => {}
            status => {
                return Err(self.error(format!("cannot resume an experiment that is {status}")));
            }
        }

        self.plan
            .retain(|task| !existing.completed_tasks.iter().any(|done| done.as_str() == task.id));

        let stored = self
            .tasks
            .get_tasks(session, &TaskFilter::default().in_experiment(existing.id.clone()))
            .await
            .map_err(|e| self.storage_error(e))?;
        for task in &self.plan {
            let task_id = TaskId::new(task.id.clone());
            if stored.iter().any(|t| t.id == task_id) {
                self.tasks
                    .set_status(session, &existing.id, &task_id, TaskStatus::Created)
                    .await
                    .map_err(|e| self.storage_error(e))?;
            } else {
                let record = Task::new(
                    task_id,
                    task.task_type.clone(),
                    existing.id.clone(),
                    task.devices.clone(),
                );
                self.tasks
                    .create_task(session, record)
                    .await
                    .map_err(|e| self.storage_error(e))?;
            }
        }

        info!(
            "Resuming experiment '{}' with {} remaining tasks",
            existing.id,
            self.plan.len()
        );
        Ok(())
    }
}

#[async_trait]
impl ExperimentExecutor for SequentialExecutor {
    fn definition(&self) -> &ExperimentDefinition {
        &self.definition
    }

    async fn start(&mut self, session: &Session) -> Result<(), ExecutionError> {
        self.plan = match DependencyResolver::new().order(&self.config.tasks) {
            Resolution::Ordered(plan) => plan,
            Resolution::Missing { task, dependency } => {
                return Err(self.error(format!(
                    "task '{task}' depends on unknown task '{dependency}'"
                )));
            }
            Resolution::Circular(tasks) => {
                return Err(self.error(format!(
                    "circular task dependencies between {}",
                    tasks.join(", ")
                )));
            }
        };

        let existing = self
            .experiments
            .get_experiment(session, &self.definition.id)
            .await
            .map_err(|e| self.storage_error(e))?;
        match existing {
            Some(existing) if self.definition.execution.resume => {
                self.resume(session, existing).await?
            }
            Some(_) => return Err(self.error("experiment already exists")),
            None => self.create(session).await?,
        }

        self.experiments
            .start_experiment(session, &self.definition.id)
            .await
            .map_err(|e| self.storage_error(e))?;
        debug!(
            "Started experiment '{}' with {} tasks",
            self.definition.id,
            self.plan.len()
        );
        Ok(())
    }

    async fn progress(&mut self, session: &Session) -> Result<bool, ExecutionError> {
        let id = self.definition.id.clone();

        if let Some(task_id) = self.running.take() {
            self.tasks
                .complete_task(session, &id, &task_id)
                .await
                .map_err(|e| self.storage_error(e))?;
            self.experiments
                .record_task_completed(session, &id, &task_id)
                .await
                .map_err(|e| self.storage_error(e))?;
            self.plan.remove(0);
        }

        let Some(next) = self.plan.first() else {
            self.experiments
                .complete_experiment(session, &id)
                .await
                .map_err(|e| self.storage_error(e))?;
            return Ok(true);
        };

        let task_id = TaskId::new(next.id.clone());
        self.tasks
            .start_task(session, &id, &task_id)
            .await
            .map_err(|e| self.storage_error(e))?;
        self.experiments
            .record_task_started(session, &id, &task_id)
            .await
            .map_err(|e| self.storage_error(e))?;
        debug!("Experiment '{}' started task '{}'", id, task_id);
        self.running = Some(task_id);
        Ok(false)
    }

    async fn cancel(&mut self, session: &Session) -> Result<(), ExecutionError> {
        let id = self.definition.id.clone();
        let pending = self
            .tasks
            .get_tasks(session, &TaskFilter::active().in_experiment(id.clone()))
            .await
            .map_err(|e| self.storage_error(e))?;
        for task in pending {
            self.tasks
                .cancel_task(session, &id, &task.id)
                .await
                .map_err(|e| self.storage_error(e))?;
        }
        self.running = None;

        self.experiments
            .cancel_experiment(session, &id)
            .await
            .map_err(|e| self.storage_error(e))?;
        info!("Cancelled experiment '{}'", id);
        Ok(())
    }
}

/// Builds [`SequentialExecutor`]s from the loaded experiment types.
pub struct SequentialExecutorFactory {
    store: Arc<ResourceStore>,
    experiments: Arc<dyn ExperimentManager>,
    tasks: Arc<dyn TaskManager>,
}

impl SequentialExecutorFactory {
    /// Create a new factory.
    pub fn new(
        store: Arc<ResourceStore>,
        experiments: Arc<dyn ExperimentManager>,
        tasks: Arc<dyn TaskManager>,
    ) -> Self {
        Self {
            store,
            experiments,
            tasks,
        }
    }
}

#[async_trait]
impl ExecutorFactory for SequentialExecutorFactory {
    async fn create(
        &self,
        definition: ExperimentDefinition,
    ) -> Result<Box<dyn ExperimentExecutor>, ExecutionError> {
        let config = self
            .store
            .experiment_config(&definition.experiment_type)
            .await
            .ok_or_else(|| {
                ExecutionError::new(
                    definition.id.clone(),
                    format!("no definition for experiment type '{}'", definition.experiment_type),
                )
            })?;
        Ok(Box::new(SequentialExecutor::new(
            definition,
            config,
            self.experiments.clone(),
            self.tasks.clone(),
        )))
    }
}
