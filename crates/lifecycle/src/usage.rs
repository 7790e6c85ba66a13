//! Usage predicates - who depends on a resource right now.

use std::sync::Arc;

use benchtop_catalog::ResourceStore;
use benchtop_core::{
    Experiment, ExperimentFilter, ExperimentStatus, OrchestratorError, ResourceKind, Result, Task,
    TaskFilter, STANDALONE_EXPERIMENT_ID,
};
use benchtop_storage::{ExperimentManager, Session, TaskManager};
use tracing::error;

/// Finds the RUNNING experiments and active tasks that depend on a resource.
///
/// Each query returns the ids of the dependents; an empty list means the
/// resource is free. Experiments are named by id, tasks as
/// `<experiment id>/<task id>`.
pub struct UsageInspector {
    store: Arc<ResourceStore>,
    experiments: Arc<dyn ExperimentManager>,
    tasks: Arc<dyn TaskManager>,
}

impl UsageInspector {
    /// Create a new inspector.
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

    async fn running_experiments(&self, session: &Session) -> Result<Vec<Experiment>> {
        Ok(self
            .experiments
            .get_experiments(session, &ExperimentFilter::with_status(ExperimentStatus::Running))
            .await?)
    }

    async fn standalone_tasks(&self, session: &Session) -> Result<Vec<Task>> {
        let filter = TaskFilter::active().in_experiment(STANDALONE_EXPERIMENT_ID.into());
        Ok(self.tasks.get_tasks(session, &filter).await?)
    }

    /// RUNNING experiments configured with the lab, and standalone tasks
    /// using any device in it.
    pub async fn lab_users(&self, session: &Session, lab_id: &str) -> Result<Vec<String>> {
        let mut users = Vec::new();
        for experiment in self.running_experiments(session).await? {
            let configured = match self.store.experiment_config(&experiment.experiment_type).await {
                Some(config) => config.labs.iter().any(|lab| lab == lab_id),
                None => false,
            };
            if configured || experiment.labs.iter().any(|lab| lab == lab_id) {
                users.push(experiment.id.to_string());
            }
        }
        for task in self.standalone_tasks(session).await? {
            if task.uses_devices(lab_id, None) {
                users.push(task_name(&task));
            }
        }
        Ok(users)
    }

    /// RUNNING experiments whose task graph drives any of the devices, and
    /// standalone tasks using them.
    pub async fn device_users(
        &self,
        session: &Session,
        lab_id: &str,
        device_ids: &[String],
    ) -> Result<Vec<String>> {
        let mut users = Vec::new();
        for experiment in self.running_experiments(session).await? {
            let uses = self
                .store
                .experiment_config(&experiment.experiment_type)
                .await
                .is_some_and(|config| config.uses_devices(lab_id, device_ids));
            if uses {
                users.push(experiment.id.to_string());
            }
        }
        for task in self.standalone_tasks(session).await? {
            if task.uses_devices(lab_id, Some(device_ids)) {
                users.push(task_name(&task));
            }
        }
        Ok(users)
    }

    /// RUNNING experiments of the type.
    pub async fn experiment_type_users(
        &self,
        session: &Session,
        experiment_type: &str,
    ) -> Result<Vec<String>> {
        let filter =
            ExperimentFilter::with_status(ExperimentStatus::Running).of_type(experiment_type);
        Ok(self
            .experiments
            .get_experiments(session, &filter)
            .await?
            .into_iter()
            .map(|e| e.id.to_string())
            .collect())
    }

    /// RUNNING or CREATED tasks of the type, standalone or not.
    pub async fn task_type_users(&self, session: &Session, task_type: &str) -> Result<Vec<String>> {
        Ok(self
            .tasks
            .get_tasks(session, &TaskFilter::active().of_type(task_type))
            .await?
            .iter()
            .map(task_name)
            .collect())
    }
}

fn task_name(task: &Task) -> String {
    format!("{}/{}", task.experiment_id, task.id)
}

/// Fail with `ResourceInUse` if `users` is not empty.
pub fn ensure_unused(kind: ResourceKind, resource: &str, users: Vec<String>) -> Result<()> {
    if users.is_empty() {
        return Ok(());
    }
    error!(
        "Cannot change {} '{}': in use by {}",
        kind,
        resource,
        users.join(", ")
    );
    Err(OrchestratorError::ResourceInUse {
        kind,
        resource: resource.to_string(),
        users,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchtop_catalog::Catalog;
    use benchtop_core::{
        ExperimentConfig, ExperimentExecutionParameters, LabConfig, TaskConfig, TaskDeviceRef,
        TaskStatus,
    };
    use benchtop_storage::{DatabaseConfig, SessionFactory, StoreExperimentManager, StoreTaskManager};

    fn inspector() -> UsageInspector {
        let catalog = Catalog::new()
            .with_lab(LabConfig::new("wet_lab"))
            .with_experiment(
                ExperimentConfig::new("titration", vec!["wet_lab".to_string()])
                    .with_task(TaskConfig::new("weigh", "weigh").with_device("wet_lab", "balance")),
            );
        UsageInspector::new(
            Arc::new(ResourceStore::new(catalog)),
            Arc::new(StoreExperimentManager::new()),
            Arc::new(StoreTaskManager::new()),
        )
    }

    async fn running_titration(session: &Session, id: &str) {
        let manager = StoreExperimentManager::new();
        manager
            .create_experiment(
                session,
                Experiment::new(
                    id.into(),
                    "titration",
                    vec!["wet_lab".to_string()],
                    ExperimentExecutionParameters::default(),
                ),
            )
            .await
            .unwrap();
        manager.start_experiment(session, &id.into()).await.unwrap();
    }

    #[tokio::test]
    async fn test_running_experiment_uses_lab_and_devices() {
        let factory = SessionFactory::in_memory(DatabaseConfig::default());
        let session = factory.acquire().await.unwrap();
        let inspector = inspector();
        running_titration(&session, "exp-1").await;

        assert_eq!(inspector.lab_users(&session, "wet_lab").await.unwrap(), vec!["exp-1"]);
        assert!(inspector.lab_users(&session, "dry_lab").await.unwrap().is_empty());
        assert_eq!(
            inspector
                .device_users(&session, "wet_lab", &["balance".to_string()])
                .await
                .unwrap(),
            vec!["exp-1"]
        );
        assert!(inspector
            .device_users(&session, "wet_lab", &["pump".to_string()])
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            inspector.experiment_type_users(&session, "titration").await.unwrap(),
            vec!["exp-1"]
        );
    }

    #[tokio::test]
    async fn test_finished_experiments_do_not_count() {
        let factory = SessionFactory::in_memory(DatabaseConfig::default());
        let session = factory.acquire().await.unwrap();
        let inspector = inspector();
        running_titration(&session, "exp-1").await;
        StoreExperimentManager::new()
            .complete_experiment(&session, &"exp-1".into())
            .await
            .unwrap();

        assert!(inspector.lab_users(&session, "wet_lab").await.unwrap().is_empty());
        assert!(inspector
            .experiment_type_users(&session, "titration")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_standalone_tasks_block_lab_and_devices() {
        let factory = SessionFactory::in_memory(DatabaseConfig::default());
        let session = factory.acquire().await.unwrap();
        let inspector = inspector();
        StoreTaskManager::new()
            .create_task(
                &session,
                Task::standalone("t1", "weigh", vec![TaskDeviceRef::new("wet_lab", "balance")]),
            )
            .await
            .unwrap();

        let users = inspector.lab_users(&session, "wet_lab").await.unwrap();
        assert_eq!(users, vec!["on_demand/t1"]);
        assert_eq!(
            inspector
                .device_users(&session, "wet_lab", &["balance".to_string()])
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(inspector.task_type_users(&session, "weigh").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_task_type_counts_experiment_tasks() {
        let factory = SessionFactory::in_memory(DatabaseConfig::default());
        let session = factory.acquire().await.unwrap();
        let inspector = inspector();
        let tasks = StoreTaskManager::new();
        tasks
            .create_task(&session, Task::new("dose", "dispense", "exp-1".into(), vec![]))
            .await
            .unwrap();
        assert_eq!(
            inspector.task_type_users(&session, "dispense").await.unwrap(),
            vec!["exp-1/dose"]
        );

        tasks
            .set_status(&session, &"exp-1".into(), &"dose".into(), TaskStatus::Failed)
            .await
            .unwrap();
        assert!(inspector.task_type_users(&session, "dispense").await.unwrap().is_empty());
    }

    #[test]
    fn test_ensure_unused() {
        assert!(ensure_unused(ResourceKind::Lab, "wet_lab", vec![]).is_ok());
        let err = ensure_unused(ResourceKind::Lab, "wet_lab", vec!["exp-1".to_string()]).unwrap_err();
        assert!(matches!(err, OrchestratorError::ResourceInUse { .. }));
    }
}
