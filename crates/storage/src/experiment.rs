//! Experiment manager - persisted experiment state.

use async_trait::async_trait;
use benchtop_core::{Experiment, ExperimentFilter, ExperimentId, ExperimentStatus, TaskId};
use tracing::debug;

use crate::{Result, Session, StorageError};

/// Query and update persisted experiments.
#[async_trait]
pub trait ExperimentManager: Send + Sync {
    /// Insert a new record. Fails if the id already exists.
    async fn create_experiment(&self, session: &Session, experiment: Experiment) -> Result<()>;

    /// Load an experiment by id.
    async fn get_experiment(&self, session: &Session, id: &ExperimentId)
        -> Result<Option<Experiment>>;

    /// List experiments matching the filter, oldest first.
    async fn get_experiments(
        &self,
        session: &Session,
        filter: &ExperimentFilter,
    ) -> Result<Vec<Experiment>>;

    /// Move an experiment to `status`, stamping start/end times.
    async fn set_status(
        &self,
        session: &Session,
        id: &ExperimentId,
        status: ExperimentStatus,
    ) -> Result<()>;

    /// Record that a task of the experiment started.
    async fn record_task_started(
        &self,
        session: &Session,
        id: &ExperimentId,
        task_id: &TaskId,
    ) -> Result<()>;

    /// Record that a task of the experiment completed.
    async fn record_task_completed(
        &self,
        session: &Session,
        id: &ExperimentId,
        task_id: &TaskId,
    ) -> Result<()>;

    /// Mark RUNNING.
    async fn start_experiment(&self, session: &Session, id: &ExperimentId) -> Result<()> {
        self.set_status(session, id, ExperimentStatus::Running).await
    }

    /// Mark COMPLETED.
    async fn complete_experiment(&self, session: &Session, id: &ExperimentId) -> Result<()> {
        self.set_status(session, id, ExperimentStatus::Completed).await
    }

    /// Mark CANCELLED.
    async fn cancel_experiment(&self, session: &Session, id: &ExperimentId) -> Result<()> {
        self.set_status(session, id, ExperimentStatus::Cancelled).await
    }

    /// Mark FAILED.
    async fn fail_experiment(&self, session: &Session, id: &ExperimentId) -> Result<()> {
        self.set_status(session, id, ExperimentStatus::Failed).await
    }
}

/// Experiment manager backed by the session's database.
#[derive(Debug, Default, Clone)]
pub struct StoreExperimentManager;

impl StoreExperimentManager {
    /// Create a new manager.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExperimentManager for StoreExperimentManager {
    async fn create_experiment(&self, session: &Session, experiment: Experiment) -> Result<()> {
        let mut experiments = session.db().experiments.lock().await;
        if experiments.contains_key(&experiment.id) {
            return Err(StorageError::Conflict(format!(
                "experiment '{}'",
                experiment.id
            )));
        }
        debug!("Created experiment '{}'", experiment.id);
        experiments.insert(experiment.id.clone(), experiment);
        Ok(())
    }

    async fn get_experiment(
        &self,
        session: &Session,
        id: &ExperimentId,
    ) -> Result<Option<Experiment>> {
        Ok(session.db().experiments.lock().await.get(id).cloned())
    }

    async fn get_experiments(
        &self,
        session: &Session,
        filter: &ExperimentFilter,
    ) -> Result<Vec<Experiment>> {
        let experiments = session.db().experiments.lock().await;
        let mut matching: Vec<Experiment> = experiments
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }

    async fn set_status(
        &self,
        session: &Session,
        id: &ExperimentId,
        status: ExperimentStatus,
    ) -> Result<()> {
        let mut experiments = session.db().experiments.lock().await;
        let experiment = experiments
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("experiment '{id}'")))?;

        let now = chrono::Utc::now();
        match status {
            ExperimentStatus::Running => experiment.start_time = Some(now),
            s if s.is_terminal() => experiment.end_time = Some(now),
            _ => {}
        }
        debug!("Experiment '{}': {} -> {}", id, experiment.status, status);
        experiment.status = status;
        Ok(())
    }

    async fn record_task_started(
        &self,
        session: &Session,
        id: &ExperimentId,
        task_id: &TaskId,
    ) -> Result<()> {
        let mut experiments = session.db().experiments.lock().await;
        let experiment = experiments
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("experiment '{id}'")))?;
        if !experiment.running_tasks.contains(task_id) {
            experiment.running_tasks.push(task_id.clone());
        }
        Ok(())
    }

    async fn record_task_completed(
        &self,
        session: &Session,
        id: &ExperimentId,
        task_id: &TaskId,
    ) -> Result<()> {
        let mut experiments = session.db().experiments.lock().await;
        let experiment = experiments
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound(format!("experiment '{id}'")))?;
        experiment.running_tasks.retain(|t| t != task_id);
        if !experiment.completed_tasks.contains(task_id) {
            experiment.completed_tasks.push(task_id.clone());
        }
        Ok(())
    }
}
