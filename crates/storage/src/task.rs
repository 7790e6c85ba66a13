//! Task manager - persisted task state.

use async_trait::async_trait;
use benchtop_core::{ExperimentId, Task, TaskFilter, TaskId, TaskStatus};
use tracing::debug;

use crate::{Result, Session, StorageError};

/// Query and update persisted tasks.
#[async_trait]
pub trait TaskManager: Send + Sync {
    /// Insert a new task. Fails if `(experiment_id, id)` already exists.
    async fn create_task(&self, session: &Session, task: Task) -> Result<()>;

    /// Load a task.
    async fn get_task(
        &self,
        session: &Session,
        experiment_id: &ExperimentId,
        task_id: &TaskId,
    ) -> Result<Option<Task>>;

    /// List tasks matching the filter, oldest first.
    async fn get_tasks(&self, session: &Session, filter: &TaskFilter) -> Result<Vec<Task>>;

    /// Move a task to `status`, stamping start/end times.
    async fn set_status(
        &self,
        session: &Session,
        experiment_id: &ExperimentId,
        task_id: &TaskId,
        status: TaskStatus,
    ) -> Result<()>;

    /// Mark RUNNING.
    async fn start_task(
        &self,
        session: &Session,
        experiment_id: &ExperimentId,
        task_id: &TaskId,
    ) -> Result<()> {
        self.set_status(session, experiment_id, task_id, TaskStatus::Running).await
    }

    /// Mark COMPLETED.
    async fn complete_task(
        &self,
        session: &Session,
        experiment_id: &ExperimentId,
        task_id: &TaskId,
    ) -> Result<()> {
        self.set_status(session, experiment_id, task_id, TaskStatus::Completed).await
    }

    /// Mark FAILED.
    async fn fail_task(
        &self,
        session: &Session,
        experiment_id: &ExperimentId,
        task_id: &TaskId,
    ) -> Result<()> {
        self.set_status(session, experiment_id, task_id, TaskStatus::Failed).await
    }

    /// Mark CANCELLED.
    async fn cancel_task(
        &self,
        session: &Session,
        experiment_id: &ExperimentId,
        task_id: &TaskId,
    ) -> Result<()> {
        self.set_status(session, experiment_id, task_id, TaskStatus::Cancelled).await
    }
}

/// Task manager backed by the session's database.
#[derive(Debug, Default, Clone)]
pub struct StoreTaskManager;

impl StoreTaskManager {
    /// Create a new manager.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TaskManager for StoreTaskManager {
    async fn create_task(&self, session: &Session, task: Task) -> Result<()> {
        let key = (task.experiment_id.clone(), task.id.clone());
        let mut tasks = session.db().tasks.lock().await;
        if tasks.contains_key(&key) {
            return Err(StorageError::Conflict(format!(
                "task '{}' in '{}'",
                task.id, task.experiment_id
            )));
        }
        tasks.insert(key, task);
        Ok(())
    }

    async fn get_task(
        &self,
        session: &Session,
        experiment_id: &ExperimentId,
        task_id: &TaskId,
    ) -> Result<Option<Task>> {
        let key = (experiment_id.clone(), task_id.clone());
        Ok(session.db().tasks.lock().await.get(&key).cloned())
    }

    async fn get_tasks(&self, session: &Session, filter: &TaskFilter) -> Result<Vec<Task>> {
        let tasks = session.db().tasks.lock().await;
        let mut matching: Vec<Task> = tasks.values().filter(|t| filter.matches(t)).cloned().collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }

    async fn set_status(
        &self,
        session: &Session,
        experiment_id: &ExperimentId,
        task_id: &TaskId,
        status: TaskStatus,
    ) -> Result<()> {
        let key = (experiment_id.clone(), task_id.clone());
        let mut tasks = session.db().tasks.lock().await;
        let task = tasks.get_mut(&key).ok_or_else(|| {
            StorageError::NotFound(format!("task '{task_id}' in '{experiment_id}'"))
        })?;

        let now = chrono::Utc::now();
        match status {
            TaskStatus::Running => task.start_time = Some(now),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => {
                task.end_time = Some(now)
            }
            TaskStatus::Created => {}
        }
        debug!("Task '{}' in '{}': {:?} -> {:?}", task_id, experiment_id, task.status, status);
        task.status = status;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DatabaseConfig, SessionFactory};
    use benchtop_core::TaskDeviceRef;

    #[tokio::test]
    async fn test_same_task_id_in_different_experiments() {
        let factory = SessionFactory::in_memory(DatabaseConfig::default());
        let session = factory.acquire().await.unwrap();
        let manager = StoreTaskManager::new();

        manager
            .create_task(&session, Task::new("dose", "dispense", "exp-1".into(), vec![]))
            .await
            .unwrap();
        manager
            .create_task(&session, Task::new("dose", "dispense", "exp-2".into(), vec![]))
            .await
            .unwrap();
        let err = manager
            .create_task(&session, Task::new("dose", "dispense", "exp-2".into(), vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_active_standalone_tasks_query() {
        let factory = SessionFactory::in_memory(DatabaseConfig::default());
        let session = factory.acquire().await.unwrap();
        let manager = StoreTaskManager::new();
        let balance = vec![TaskDeviceRef::new("wet_lab", "balance")];

        manager
            .create_task(&session, Task::standalone("t1", "weigh", balance.clone()))
            .await
            .unwrap();
        manager
            .create_task(&session, Task::standalone("t2", "weigh", balance))
            .await
            .unwrap();
        let standalone = Task::standalone("t2", "weigh", vec![]).experiment_id;
        manager
            .set_status(&session, &standalone, &"t2".into(), TaskStatus::Completed)
            .await
            .unwrap();

        let active = manager
            .get_tasks(&session, &TaskFilter::active().of_type("weigh"))
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id.as_str(), "t1");

        let finished = manager
            .get_task(&session, &standalone, &"t2".into())
            .await
            .unwrap()
            .unwrap();
        assert!(finished.end_time.is_some());
    }
}
