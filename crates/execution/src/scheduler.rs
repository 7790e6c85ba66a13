//! Experiment scheduler - admission, priority ticks and cancellation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use benchtop_catalog::ResourceStore;
use benchtop_core::{
    ExecutionError, Experiment, ExperimentDefinition, ExperimentFilter, ExperimentId,
    ExperimentStatus, OrchestratorError, ResourceKind, Result, TaskFilter,
    STANDALONE_EXPERIMENT_ID,
};
use benchtop_storage::{ExperimentManager, Session, SessionFactory, TaskManager};
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{CancellationQueue, ExecutorFactory, ExperimentExecutor, SchedulerConfig};

type SharedExecutor = Arc<Mutex<Box<dyn ExperimentExecutor>>>;

struct Entry {
    seq: u64,
    priority: i64,
    executor: SharedExecutor,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<ExperimentId, Entry>,
    next_seq: u64,
}

/// Outcome of one priority tick.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Experiments that advanced but are not done, in processing order
    pub progressed: Vec<ExperimentId>,
    /// Experiments that completed and were removed
    pub completed: Vec<ExperimentId>,
    /// Experiments that failed and were removed
    pub failed: Vec<(ExperimentId, ExecutionError)>,
    /// Experiments skipped because no session could be acquired
    pub skipped: Vec<ExperimentId>,
}

impl TickReport {
    /// Number of experiments progressed, completed or failed.
    pub fn processed(&self) -> usize {
        self.progressed.len() + self.completed.len() + self.failed.len()
    }
}

/// Outcome of draining the cancellation queue.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Experiments cancelled and removed from the registry
    pub cancelled: Vec<ExperimentId>,
    /// Experiments whose cancellation failed; they stay registered
    pub failed: Vec<(ExperimentId, OrchestratorError)>,
}

/// Admits experiments, progresses them by priority and processes
/// cancellation requests.
///
/// `tick` and `drain_cancellations` are meant to be driven by a single loop.
/// `submit`, `request_cancellation` and the queries can be called from
/// anywhere.
pub struct ExperimentScheduler {
    store: Arc<ResourceStore>,
    sessions: SessionFactory,
    experiments: Arc<dyn ExperimentManager>,
    tasks: Arc<dyn TaskManager>,
    factory: Arc<dyn ExecutorFactory>,
    submission: Mutex<()>,
    registry: Mutex<Registry>,
    cancellations: CancellationQueue,
}

impl ExperimentScheduler {
    /// Create a new scheduler with the default configuration.
    pub fn new(
        store: Arc<ResourceStore>,
        sessions: SessionFactory,
        experiments: Arc<dyn ExperimentManager>,
        tasks: Arc<dyn TaskManager>,
        factory: Arc<dyn ExecutorFactory>,
    ) -> Self {
        Self {
            store,
            sessions,
            experiments,
            tasks,
            factory,
            submission: Mutex::new(()),
            registry: Mutex::new(Registry::default()),
            cancellations: CancellationQueue::new(SchedulerConfig::default().cancellation_capacity),
        }
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.cancellations = CancellationQueue::new(config.cancellation_capacity);
        self
    }

    /// Admit an experiment.
    ///
    /// Submitting an id that is already registered does nothing. If the
    /// executor fails to start, the id is not registered. Admission waits for
    /// any running reconfiguration.
    ///
    /// Submissions are serialized among themselves. The registry is only
    /// locked for the duplicate check and the insert, so a slow `start` does
    /// not hold up ticks or cancellation requests.
    pub async fn submit(&self, definition: ExperimentDefinition) -> Result<()> {
        if definition.id.as_str() == STANDALONE_EXPERIMENT_ID {
            return Err(OrchestratorError::Configuration(format!(
                "experiment id '{STANDALONE_EXPERIMENT_ID}' is reserved for standalone tasks"
            )));
        }

        let _admission = self.store.reconfiguration_lock().admit().await;
        if !self.store.is_experiment_loaded(&definition.experiment_type).await {
            return Err(OrchestratorError::UnknownType {
                kind: ResourceKind::ExperimentType,
                name: definition.experiment_type,
            });
        }

        let _submission = self.submission.lock().await;
        if self.is_submitted(&definition.id).await {
            warn!("Experiment '{}' is already submitted", definition.id);
            return Ok(());
        }

        let id = definition.id.clone();
        let priority = definition.priority;
        let mut executor = self.factory.create(definition).await?;
        {
            let session = self.sessions.acquire().await?;
            executor.start(&session).await?;
        }

        let mut registry = self.registry.lock().await;
        let seq = registry.next_seq;
        registry.next_seq += 1;
        registry.entries.insert(
            id.clone(),
            Entry {
                seq,
                priority,
                executor: Arc::new(Mutex::new(executor)),
            },
        );
        info!("Submitted experiment '{}' (priority {})", id, priority);
        Ok(())
    }

    /// Persisted state of an experiment.
    pub async fn get_experiment(&self, id: &ExperimentId) -> Result<Option<Experiment>> {
        let session = self.sessions.acquire().await?;
        Ok(self.experiments.get_experiment(&session, id).await?)
    }

    /// Persisted experiments matching `filter`.
    pub async fn list_experiments(&self, filter: &ExperimentFilter) -> Result<Vec<Experiment>> {
        let session = self.sessions.acquire().await?;
        Ok(self.experiments.get_experiments(&session, filter).await?)
    }

    /// Whether an executor is registered for `id`.
    pub async fn is_submitted(&self, id: &ExperimentId) -> bool {
        self.registry.lock().await.entries.contains_key(id)
    }

    /// Number of registered executors.
    pub async fn submitted_count(&self) -> usize {
        self.registry.lock().await.entries.len()
    }

    /// Queue a cancellation. Waits while the queue is full.
    pub async fn request_cancellation(&self, id: &ExperimentId) {
        if !self.is_submitted(id).await {
            debug!("Ignoring cancellation of unknown experiment '{}'", id);
            return;
        }
        self.cancellations.push(id.clone()).await;
        info!(
            "Requested cancellation of experiment '{}' ({} pending)",
            id,
            self.cancellations.len()
        );
    }

    /// Progress every registered experiment once, highest priority first.
    pub async fn tick(&self) -> TickReport {
        let mut snapshot: Vec<(u64, i64, ExperimentId, SharedExecutor)> = {
            let registry = self.registry.lock().await;
            registry
                .entries
                .iter()
                .map(|(id, e)| (e.seq, e.priority, id.clone(), e.executor.clone()))
                .collect()
        };
        let mut report = TickReport::default();
        if snapshot.is_empty() {
            return report;
        }
        snapshot.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

        for (_, _, id, executor) in snapshot {
            let session = match self.sessions.acquire().await {
                Ok(session) => session,
                Err(e) => {
                    warn!("Skipping experiment '{}' this tick: {}", id, e);
                    report.skipped.push(id);
                    continue;
                }
            };

            let outcome = executor.lock().await.progress(&session).await;
            match outcome {
                Ok(true) => {
                    info!("Experiment '{}' completed", id);
                    report.completed.push(id);
                }
                Ok(false) => report.progressed.push(id),
                Err(e) => {
                    error!("Experiment '{}' failed: {}", id, e.message);
                    self.mark_failed(&session, &id).await;
                    report.failed.push((id, e));
                }
            }
        }

        let mut registry = self.registry.lock().await;
        for id in report
            .completed
            .iter()
            .chain(report.failed.iter().map(|(id, _)| id))
        {
            registry.entries.remove(id);
        }
        report
    }

    async fn mark_failed(&self, session: &Session, id: &ExperimentId) {
        match self.experiments.get_experiment(session, id).await {
            Ok(Some(experiment)) if !experiment.status.is_terminal() => {
                if let Err(e) = self.experiments.fail_experiment(session, id).await {
                    warn!("Could not mark experiment '{}' failed: {}", id, e);
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Could not load experiment '{}': {}", id, e),
        }
    }

    /// Cancel every experiment queued at the time of the call.
    ///
    /// Cancellations run concurrently, each on its own session. Experiments
    /// whose cancellation fails remain registered.
    pub async fn drain_cancellations(&self) -> DrainReport {
        let ids = self.cancellations.drain().await;
        let mut report = DrainReport::default();
        if ids.is_empty() {
            return report;
        }

        let targets: Vec<(ExperimentId, SharedExecutor)> = {
            let registry = self.registry.lock().await;
            let mut seen = HashSet::new();
            ids.into_iter()
                .filter(|id| seen.insert(id.clone()))
                .filter_map(|id| match registry.entries.get(&id) {
                    Some(entry) => Some((id, entry.executor.clone())),
                    None => {
                        debug!("Experiment '{}' finished before it could be cancelled", id);
                        None
                    }
                })
                .collect()
        };

        let outcomes = join_all(targets.into_iter().map(|(id, executor)| async move {
            let result = match self.sessions.acquire().await {
                Ok(session) => executor
                    .lock()
                    .await
                    .cancel(&session)
                    .await
                    .map_err(OrchestratorError::from),
                Err(e) => Err(OrchestratorError::from(e)),
            };
            (id, result)
        }))
        .await;

        let mut registry = self.registry.lock().await;
        for (id, result) in outcomes {
            match result {
                Ok(()) => {
                    registry.entries.remove(&id);
                    info!("Experiment '{}' cancelled", id);
                    report.cancelled.push(id);
                }
                Err(e) => {
                    error!("Failed to cancel experiment '{}': {}", id, e);
                    report.failed.push((id, e));
                }
            }
        }
        report
    }

    /// Fail persisted work that has no executor, e.g. after a restart.
    ///
    /// Active tasks are failed first, then RUNNING experiments. Returns the
    /// number of experiments failed.
    pub async fn fail_all_running(&self) -> Result<usize> {
        let registered: HashSet<ExperimentId> =
            self.registry.lock().await.entries.keys().cloned().collect();
        let session = self.sessions.acquire().await?;

        let tasks = self.tasks.get_tasks(&session, &TaskFilter::active()).await?;
        for task in tasks
            .iter()
            .filter(|t| !registered.contains(&t.experiment_id))
        {
            self.tasks
                .fail_task(&session, &task.experiment_id, &task.id)
                .await?;
            warn!("Failed task '{}' of '{}'", task.id, task.experiment_id);
        }

        let running = self
            .experiments
            .get_experiments(&session, &ExperimentFilter::with_status(ExperimentStatus::Running))
            .await?;
        let mut failed = 0;
        for experiment in running.iter().filter(|e| !registered.contains(&e.id)) {
            self.experiments.fail_experiment(&session, &experiment.id).await?;
            warn!("Failed experiment '{}'", experiment.id);
            failed += 1;
        }

        if failed > 0 {
            info!("Failed {} running experiments", failed);
        }
        Ok(failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use benchtop_catalog::Catalog;
    use benchtop_core::{ExperimentConfig, ExperimentExecutionParameters, LabConfig, Task, TaskStatus};
    use benchtop_storage::{DatabaseConfig, StoreExperimentManager, StoreTaskManager};

    /// What a scripted executor does.
    #[derive(Clone, Default)]
    struct Script {
        fail_start: bool,
        complete_after: Option<usize>,
        fail_on: Option<usize>,
        fail_cancel: bool,
        start_delay: Option<Duration>,
    }

    struct ScriptedExecutor {
        definition: ExperimentDefinition,
        script: Script,
        calls: usize,
        log: Arc<std::sync::Mutex<Vec<String>>>,
        experiments: StoreExperimentManager,
    }

    #[async_trait]
    impl ExperimentExecutor for ScriptedExecutor {
        fn definition(&self) -> &ExperimentDefinition {
            &self.definition
        }

        async fn start(&mut self, session: &Session) -> std::result::Result<(), ExecutionError> {
            if let Some(delay) = self.script.start_delay {
                tokio::time::sleep(delay).await;
            }
            if self.script.fail_start {
                return Err(ExecutionError::new(self.definition.id.clone(), "start failed"));
            }
            let experiment = Experiment::new(
                self.definition.id.clone(),
                self.definition.experiment_type.clone(),
                vec![],
                ExperimentExecutionParameters::default(),
            );
            self.experiments.create_experiment(session, experiment).await.unwrap();
            self.experiments
                .start_experiment(session, &self.definition.id)
                .await
                .unwrap();
            Ok(())
        }

        async fn progress(&mut self, _session: &Session) -> std::result::Result<bool, ExecutionError> {
            self.calls += 1;
            self.log.lock().unwrap().push(self.definition.id.to_string());
            if self.script.fail_on == Some(self.calls) {
                return Err(ExecutionError::new(self.definition.id.clone(), "task failed"));
            }
            Ok(self.script.complete_after == Some(self.calls))
        }

        async fn cancel(&mut self, session: &Session) -> std::result::Result<(), ExecutionError> {
            if self.script.fail_cancel {
                return Err(ExecutionError::new(self.definition.id.clone(), "cancel failed"));
            }
            self.experiments
                .cancel_experiment(session, &self.definition.id)
                .await
                .unwrap();
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScriptedFactory {
        scripts: std::sync::Mutex<HashMap<String, Script>>,
        created: AtomicUsize,
        log: Arc<std::sync::Mutex<Vec<String>>>,
    }

    impl ScriptedFactory {
        fn script(&self, id: &str, script: Script) {
            self.scripts.lock().unwrap().insert(id.to_string(), script);
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExecutorFactory for ScriptedFactory {
        async fn create(
            &self,
            definition: ExperimentDefinition,
        ) -> std::result::Result<Box<dyn ExperimentExecutor>, ExecutionError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            let script = self
                .scripts
                .lock()
                .unwrap()
                .get(definition.id.as_str())
                .cloned()
                .unwrap_or_default();
            Ok(Box::new(ScriptedExecutor {
                definition,
                script,
                calls: 0,
                log: self.log.clone(),
                experiments: StoreExperimentManager::new(),
            }))
        }
    }

    async fn setup(capacity: usize) -> (Arc<ExperimentScheduler>, Arc<ScriptedFactory>, SessionFactory) {
        let (scheduler, factory, sessions, _) = setup_with_store(capacity).await;
        (scheduler, factory, sessions)
    }

    async fn setup_with_store(
        capacity: usize,
    ) -> (
        Arc<ExperimentScheduler>,
        Arc<ScriptedFactory>,
        SessionFactory,
        Arc<ResourceStore>,
    ) {
        let store = Arc::new(ResourceStore::new(
            Catalog::new()
                .with_lab(LabConfig::new("wet_lab"))
                .with_experiment(ExperimentConfig::new("titration", vec!["wet_lab".to_string()])),
        ));
        store.load_labs(&["wet_lab".to_string()]).await.unwrap();
        store.load_experiments(&["titration".to_string()]).await.unwrap();

        let sessions = SessionFactory::in_memory(DatabaseConfig::default());
        let factory = Arc::new(ScriptedFactory::default());
        let scheduler = ExperimentScheduler::new(
            store.clone(),
            sessions.clone(),
            Arc::new(StoreExperimentManager::new()),
            Arc::new(StoreTaskManager::new()),
            factory.clone(),
        )
        .with_config(SchedulerConfig::new().with_cancellation_capacity(capacity));
        (Arc::new(scheduler), factory, sessions, store)
    }

    fn titration(id: &str, priority: i64) -> ExperimentDefinition {
        ExperimentDefinition::new(id, "titration").with_priority(priority)
    }

    #[tokio::test]
    async fn test_duplicate_submission_is_idempotent() {
        let (scheduler, factory, _) = setup(10).await;

        scheduler.submit(titration("exp-1", 0)).await.unwrap();
        scheduler.submit(titration("exp-1", 0)).await.unwrap();

        assert_eq!(scheduler.submitted_count().await, 1);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_type_is_never_registered() {
        let (scheduler, factory, _) = setup(10).await;

        let err = scheduler
            .submit(ExperimentDefinition::new("exp-1", "synthesis"))
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::UnknownType { .. }));
        assert!(!scheduler.is_submitted(&"exp-1".into()).await);
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reserved_id_is_rejected() {
        let (scheduler, factory, _) = setup(10).await;

        let err = scheduler
            .submit(titration(STANDALONE_EXPERIMENT_ID, 0))
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::Configuration(_)));
        assert_eq!(scheduler.submitted_count().await, 0);
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_submit_waits_for_reconfiguration() {
        let (scheduler, factory, _, store) = setup_with_store(10).await;
        let guard = store.reconfiguration_lock().acquire().await;

        let pending = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.submit(titration("exp-1", 0)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        store.unload_experiments(&["titration".to_string()]).await.unwrap();
        drop(guard);

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::UnknownType { kind: ResourceKind::ExperimentType, .. }
        ));
        assert!(!scheduler.is_submitted(&"exp-1".into()).await);
        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_slow_start_does_not_block_the_loop() {
        let (scheduler, factory, _) = setup(10).await;
        factory.script(
            "slow",
            Script {
                start_delay: Some(Duration::from_millis(500)),
                ..Script::default()
            },
        );
        scheduler.submit(titration("fast", 0)).await.unwrap();

        let starting = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.submit(titration("slow", 0)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let tick = tokio::time::timeout(Duration::from_millis(200), scheduler.tick())
            .await
            .unwrap();
        assert_eq!(tick.progressed, vec![ExperimentId::new("fast")]);
        tokio::time::timeout(
            Duration::from_millis(200),
            scheduler.request_cancellation(&"fast".into()),
        )
        .await
        .unwrap();
        assert!(!scheduler.is_submitted(&"slow".into()).await);

        starting.await.unwrap().unwrap();
        assert!(scheduler.is_submitted(&"slow".into()).await);
        assert_eq!(
            scheduler.drain_cancellations().await.cancelled,
            vec![ExperimentId::new("fast")]
        );
    }

    #[tokio::test]
    async fn test_failed_start_is_not_registered() {
        let (scheduler, factory, _) = setup(10).await;
        factory.script("exp-1", Script { fail_start: true, ..Script::default() });

        let err = scheduler.submit(titration("exp-1", 0)).await.unwrap_err();

        assert!(matches!(err, OrchestratorError::Execution(_)));
        assert_eq!(scheduler.submitted_count().await, 0);
    }

    #[tokio::test]
    async fn test_tick_orders_by_priority_then_submission() {
        let (scheduler, factory, _) = setup(10).await;
        scheduler.submit(titration("a", 5)).await.unwrap();
        scheduler.submit(titration("b", 1)).await.unwrap();
        scheduler.submit(titration("c", 5)).await.unwrap();

        let report = scheduler.tick().await;

        assert_eq!(report.processed(), 3);
        assert_eq!(factory.log(), vec!["a", "c", "b"]);
    }

    #[tokio::test]
    async fn test_empty_tick_is_noop() {
        let (scheduler, _, _) = setup(10).await;
        assert_eq!(scheduler.tick().await.processed(), 0);
    }

    #[tokio::test]
    async fn test_failure_is_isolated_across_ticks() {
        let (scheduler, factory, _) = setup(10).await;
        factory.script("A", Script { complete_after: Some(1), ..Script::default() });
        factory.script("B", Script { fail_on: Some(2), ..Script::default() });
        scheduler.submit(titration("A", 10)).await.unwrap();
        scheduler.submit(titration("B", 1)).await.unwrap();

        let first = scheduler.tick().await;
        assert_eq!(first.completed, vec![ExperimentId::new("A")]);
        assert_eq!(first.progressed, vec![ExperimentId::new("B")]);
        assert!(!scheduler.is_submitted(&"A".into()).await);
        assert!(scheduler.is_submitted(&"B".into()).await);

        let second = scheduler.tick().await;
        assert_eq!(second.failed.len(), 1);
        assert_eq!(second.failed[0].0, ExperimentId::new("B"));
        assert_eq!(scheduler.submitted_count().await, 0);

        let b = scheduler.get_experiment(&"B".into()).await.unwrap().unwrap();
        assert_eq!(b.status, ExperimentStatus::Failed);
        assert_eq!(factory.log(), vec!["A", "B", "B"]);
    }

    #[tokio::test]
    async fn test_drain_removes_only_queued_ids() {
        let (scheduler, _, _) = setup(10).await;
        for id in ["a", "b", "c"] {
            scheduler.submit(titration(id, 0)).await.unwrap();
        }
        scheduler.request_cancellation(&"a".into()).await;
        scheduler.request_cancellation(&"b".into()).await;

        let report = scheduler.drain_cancellations().await;
        scheduler.request_cancellation(&"c".into()).await;

        assert_eq!(report.cancelled.len(), 2);
        assert!(!scheduler.is_submitted(&"a".into()).await);
        assert!(scheduler.is_submitted(&"c".into()).await);

        let next = scheduler.drain_cancellations().await;
        assert_eq!(next.cancelled, vec![ExperimentId::new("c")]);
        let c = scheduler.get_experiment(&"c".into()).await.unwrap().unwrap();
        assert_eq!(c.status, ExperimentStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_failed_cancellation_stays_registered() {
        let (scheduler, factory, _) = setup(10).await;
        factory.script("a", Script { fail_cancel: true, ..Script::default() });
        scheduler.submit(titration("a", 0)).await.unwrap();
        scheduler.submit(titration("b", 0)).await.unwrap();
        scheduler.request_cancellation(&"a".into()).await;
        scheduler.request_cancellation(&"b".into()).await;

        let report = scheduler.drain_cancellations().await;

        assert_eq!(report.cancelled, vec![ExperimentId::new("b")]);
        assert_eq!(report.failed.len(), 1);
        assert!(scheduler.is_submitted(&"a".into()).await);
    }

    #[tokio::test]
    async fn test_cancellation_of_unknown_id_is_ignored() {
        let (scheduler, _, _) = setup(1).await;
        scheduler.request_cancellation(&"ghost".into()).await;
        assert!(scheduler.drain_cancellations().await.cancelled.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_suspends_requesters() {
        let (scheduler, _, _) = setup(1).await;
        scheduler.submit(titration("a", 0)).await.unwrap();
        scheduler.submit(titration("b", 0)).await.unwrap();
        scheduler.request_cancellation(&"a".into()).await;

        let waiting = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.request_cancellation(&"b".into()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiting.is_finished());

        let first = scheduler.drain_cancellations().await;
        assert_eq!(first.cancelled, vec![ExperimentId::new("a")]);
        waiting.await.unwrap();

        let second = scheduler.drain_cancellations().await;
        assert_eq!(second.cancelled, vec![ExperimentId::new("b")]);
    }

    #[tokio::test]
    async fn test_fail_all_running_is_idempotent() {
        let (scheduler, _, sessions) = setup(10).await;
        let session = sessions.acquire().await.unwrap();
        let experiments = StoreExperimentManager::new();
        let tasks = StoreTaskManager::new();
        for id in ["old-1", "old-2"] {
            experiments
                .create_experiment(
                    &session,
                    Experiment::new(id.into(), "titration", vec![], Default::default()),
                )
                .await
                .unwrap();
            experiments.start_experiment(&session, &id.into()).await.unwrap();
        }
        tasks
            .create_task(&session, Task::new("dose", "dispense", "old-1".into(), vec![]))
            .await
            .unwrap();
        tasks
            .set_status(&session, &"old-1".into(), &"dose".into(), TaskStatus::Running)
            .await
            .unwrap();
        drop(session);

        assert_eq!(scheduler.fail_all_running().await.unwrap(), 2);
        assert_eq!(scheduler.fail_all_running().await.unwrap(), 0);

        let failed = scheduler
            .list_experiments(&ExperimentFilter::with_status(ExperimentStatus::Failed))
            .await
            .unwrap();
        assert_eq!(failed.len(), 2);
        let session = sessions.acquire().await.unwrap();
        assert!(tasks.get_tasks(&session, &TaskFilter::active()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fail_all_running_skips_live_executors() {
        let (scheduler, _, _) = setup(10).await;
        scheduler.submit(titration("live", 0)).await.unwrap();

        assert_eq!(scheduler.fail_all_running().await.unwrap(), 0);
        let live = scheduler.get_experiment(&"live".into()).await.unwrap().unwrap();
        assert_eq!(live.status, ExperimentStatus::Running);
    }
}
