//! In-memory database, JSON snapshots and scoped sessions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use benchtop_core::{Container, Device, Experiment, ExperimentId, SessionId, Task, TaskId};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, trace};

use crate::{Result, StorageError};

/// Configuration for the database and its session pool.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Maximum number of concurrently open sessions
    pub max_sessions: usize,
    /// Where snapshots are read from and written to
    pub snapshot_path: Option<PathBuf>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_sessions: 16,
            snapshot_path: None,
        }
    }
}

impl DatabaseConfig {
    /// Create a new config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the session pool size.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max.max(1);
        self
    }

    /// Set the snapshot file.
    pub fn with_snapshot_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = Some(path.into());
        self
    }
}

/// Tables of persisted records.
#[derive(Debug, Default)]
pub struct Database {
    pub(crate) experiments: Mutex<BTreeMap<ExperimentId, Experiment>>,
    pub(crate) tasks: Mutex<BTreeMap<(ExperimentId, TaskId), Task>>,
    pub(crate) devices: Mutex<BTreeMap<(String, String), Device>>,
    pub(crate) containers: Mutex<BTreeMap<String, Container>>,
}

/// On-disk form of the database.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    saved_at: Option<chrono::DateTime<chrono::Utc>>,
    experiments: Vec<Experiment>,
    tasks: Vec<Task>,
    devices: Vec<Device>,
    containers: Vec<Container>,
}

impl Database {
    fn from_snapshot(snapshot: Snapshot) -> Self {
        let experiments = snapshot
            .experiments
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();
        let tasks = snapshot
            .tasks
            .into_iter()
            .map(|t| ((t.experiment_id.clone(), t.id.clone()), t))
            .collect();
        let devices = snapshot
            .devices
            .into_iter()
            .map(|d| ((d.lab_id.clone(), d.id.clone()), d))
            .collect();
        let containers = snapshot
            .containers
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect();

        Self {
            experiments: Mutex::new(experiments),
            tasks: Mutex::new(tasks),
            devices: Mutex::new(devices),
            containers: Mutex::new(containers),
        }
    }

    async fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            version: 1,
            saved_at: Some(chrono::Utc::now()),
            experiments: self.experiments.lock().await.values().cloned().collect(),
            tasks: self.tasks.lock().await.values().cloned().collect(),
            devices: self.devices.lock().await.values().cloned().collect(),
            containers: self.containers.lock().await.values().cloned().collect(),
        }
    }

    /// Load a snapshot file. A missing file yields an empty database.
    pub async fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path).await {
            Ok(json) => {
                let snapshot: Snapshot = serde_json::from_str(&json)?;
                info!(
                    "Restored {} experiments and {} tasks from {}",
                    snapshot.experiments.len(),
                    snapshot.tasks.len(),
                    path.display()
                );
                Ok(Self::from_snapshot(snapshot))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No snapshot at {}, starting empty", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write every table to `path`.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.to_snapshot().await;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(&snapshot)?;
        fs::write(path, json.as_bytes()).await?;
        debug!("Saved snapshot to {}", path.display());
        Ok(())
    }
}

/// Hands out scoped sessions over a shared database.
///
/// At most `max_sessions` sessions are open at once; `acquire` waits for a
/// free slot. A session gives its slot back when dropped.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    db: Arc<Database>,
    permits: Arc<Semaphore>,
    config: DatabaseConfig,
}

impl SessionFactory {
    /// Empty in-memory database.
    pub fn in_memory(config: DatabaseConfig) -> Self {
        Self::with_database(Database::default(), config)
    }

    /// Open the database, restoring the configured snapshot if present.
    pub async fn open(config: DatabaseConfig) -> Result<Self> {
        let db = match &config.snapshot_path {
            Some(path) => Database::load(path).await?,
            None => Database::default(),
        };
        Ok(Self::with_database(db, config))
    }

    fn with_database(db: Database, config: DatabaseConfig) -> Self {
        Self {
            db: Arc::new(db),
            permits: Arc::new(Semaphore::new(config.max_sessions.max(1))),
            config,
        }
    }

    /// Acquire a session, waiting for a free slot.
    pub async fn acquire(&self) -> Result<Session> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StorageError::PoolClosed)?;
        let session = Session {
            id: SessionId::new(),
            db: self.db.clone(),
            _permit: permit,
        };
        trace!(session = %session.id, "session acquired");
        Ok(session)
    }

    #[cfg(test)]
    fn available_sessions(&self) -> usize {
        self.permits.available_permits()
    }

    /// Refuse further acquisitions.
    pub fn close(&self) {
        self.permits.close();
    }

    /// Persist to the configured snapshot path. No-op without one.
    pub async fn save_snapshot(&self) -> Result<()> {
        match &self.config.snapshot_path {
            Some(path) => self.db.save(path).await,
            None => Ok(()),
        }
    }
}

/// A scoped unit of access to the database.
///
/// Dropping the session releases its pool slot on every exit path.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    db: Arc<Database>,
    _permit: OwnedSemaphorePermit,
}

impl Session {
    /// Session id (for logs).
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        trace!(session = %self.id, "session released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use benchtop_core::{ExperimentExecutionParameters, ExperimentStatus};

    #[tokio::test]
    async fn test_session_releases_slot_on_drop() {
        let factory = SessionFactory::in_memory(DatabaseConfig::new().with_max_sessions(2));
        assert_eq!(factory.available_sessions(), 2);

        let first = factory.acquire().await.unwrap();
        let second = factory.acquire().await.unwrap();
        assert_eq!(factory.available_sessions(), 0);
        assert_ne!(first.id(), second.id());

        drop(first);
        assert_eq!(factory.available_sessions(), 1);

        let failing: Result<()> = async {
            let _session = factory.acquire().await?;
            Err(StorageError::NotFound("x".to_string()))
        }
        .await;
        assert!(failing.is_err());
        assert_eq!(factory.available_sessions(), 1);
    }

    #[tokio::test]
    async fn test_closed_pool_refuses_sessions() {
        let factory = SessionFactory::in_memory(DatabaseConfig::default());
        factory.close();
        assert!(matches!(factory.acquire().await, Err(StorageError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("db.json");
        let config = DatabaseConfig::new().with_snapshot_path(&path);

        let factory = SessionFactory::open(config.clone()).await.unwrap();
        {
            let session = factory.acquire().await.unwrap();
            let mut experiment = Experiment::new(
                "exp-1".into(),
                "titration",
                vec![],
                ExperimentExecutionParameters::default(),
            );
            experiment.status = ExperimentStatus::Running;
            session
                .db()
                .experiments
                .lock()
                .await
                .insert(experiment.id.clone(), experiment);
        }
        factory.save_snapshot().await.unwrap();

        let reopened = SessionFactory::open(config).await.unwrap();
        let session = reopened.acquire().await.unwrap();
        let experiments = session.db().experiments.lock().await;
        assert_eq!(experiments.len(), 1);
        assert_eq!(
            experiments[&ExperimentId::new("exp-1")].status,
            ExperimentStatus::Running
        );
    }
}
