//! Load, unload and reload of labs, devices, experiment types and task plugins.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use benchtop_catalog::{CatalogError, PluginRegistry, ReconfigurationGuard, ResourceStore};
use benchtop_core::{OrchestratorError, PluginKind, ResourceKind, Result};
use benchtop_storage::{
    ContainerManager, DeviceManager, ExperimentManager, Session, SessionFactory, StorageError,
    TaskManager,
};
use tracing::{debug, info};

use crate::usage::{ensure_unused, UsageInspector};

/// Serializes and validates every change to the loaded resources.
///
/// Public operations acquire the reconfiguration lock once. The private
/// `*_locked` steps take the guard as proof the lock is held and never
/// acquire it themselves, so composite operations can chain them.
pub struct ResourceLifecycle {
    store: Arc<ResourceStore>,
    sessions: SessionFactory,
    devices: Arc<dyn DeviceManager>,
    containers: Arc<dyn ContainerManager>,
    plugins: Arc<dyn PluginRegistry>,
    usage: UsageInspector,
}

impl ResourceLifecycle {
    /// Create a new lifecycle guard.
    pub fn new(
        store: Arc<ResourceStore>,
        sessions: SessionFactory,
        experiments: Arc<dyn ExperimentManager>,
        tasks: Arc<dyn TaskManager>,
        devices: Arc<dyn DeviceManager>,
        containers: Arc<dyn ContainerManager>,
        plugins: Arc<dyn PluginRegistry>,
    ) -> Self {
        let usage = UsageInspector::new(store.clone(), experiments, tasks);
        Self {
            store,
            sessions,
            devices,
            containers,
            plugins,
            usage,
        }
    }

    /// Every known lab with its loaded flag.
    pub async fn list_labs(&self) -> BTreeMap<String, bool> {
        self.store.lab_status().await
    }

    /// Every known experiment type with its loaded flag.
    pub async fn list_experiment_types(&self) -> BTreeMap<String, bool> {
        self.store.experiment_status().await
    }

    /// Load labs and create their devices and containers.
    pub async fn load_labs(&self, ids: &[String]) -> Result<()> {
        let guard = self.store.reconfiguration_lock().acquire().await;
        let session = self.sessions.acquire().await?;
        self.load_labs_locked(&guard, &session, ids).await
    }

    /// Unload labs that no active work depends on.
    ///
    /// Experiment types requiring the labs are unloaded with them.
    pub async fn unload_labs(&self, ids: &[String]) -> Result<()> {
        let guard = self.store.reconfiguration_lock().acquire().await;
        let session = self.sessions.acquire().await?;
        self.check_labs(&session, ids).await?;
        self.unload_labs_locked(&guard, &session, ids).await?;
        Ok(())
    }

    /// Reload labs with fresh definitions and device plugins.
    ///
    /// Experiment types depending on the labs are captured before anything
    /// is unloaded and reloaded afterwards. A device plugin that fails to
    /// reload aborts the operation before any lab is touched. Failures after
    /// the labs were reloaded are returned without rollback.
    pub async fn reload_labs(&self, ids: &[String]) -> Result<()> {
        let guard = self.store.reconfiguration_lock().acquire().await;
        let session = self.sessions.acquire().await?;

        let dependents = self.store.experiments_for_labs(ids).await;

        let mut device_types = BTreeSet::new();
        for id in ids {
            let lab = self.store.fresh_lab_config(id).await?;
            device_types.extend(lab.device_types());
        }
        for device_type in &device_types {
            self.reload_plugin(PluginKind::Device, device_type).await?;
        }

        self.check_labs(&session, ids).await?;

        let mut loaded = Vec::new();
        for id in ids {
            if self.store.is_lab_loaded(id).await {
                loaded.push(id.clone());
            }
        }
        self.unload_labs_locked(&guard, &session, &loaded).await?;
        self.load_labs_locked(&guard, &session, ids).await?;

        self.reload_experiments_locked(&guard, &dependents).await?;
        info!(
            "Reloaded labs [{}] and experiment types [{}]",
            ids.join(", "),
            dependents.join(", ")
        );
        Ok(())
    }

    /// Hot-swap the drivers of devices in a loaded lab.
    pub async fn reload_devices(&self, lab_id: &str, device_ids: &[String]) -> Result<()> {
        let _guard = self.store.reconfiguration_lock().acquire().await;
        if !self.store.is_lab_loaded(lab_id).await {
            return Err(OrchestratorError::Configuration(format!(
                "cannot reload devices of lab '{lab_id}': lab is not loaded"
            )));
        }

        let session = self.sessions.acquire().await?;
        let users = self.usage.device_users(&session, lab_id, device_ids).await?;
        ensure_unused(
            ResourceKind::Device,
            &format!("{lab_id}/{}", device_ids.join(",")),
            users,
        )?;

        self.devices
            .reload_devices(&session, lab_id, device_ids)
            .await
            .map_err(|e| match e {
                StorageError::NotFound(what) => {
                    OrchestratorError::Configuration(format!("unknown {what}"))
                }
                other => other.into(),
            })?;
        info!("Reloaded devices [{}] of lab '{}'", device_ids.join(", "), lab_id);
        Ok(())
    }

    /// Load experiment types. The labs they require must be loaded.
    pub async fn load_experiments(&self, types: &[String]) -> Result<()> {
        let _guard = self.store.reconfiguration_lock().acquire().await;
        Ok(self.store.load_experiments(types).await?)
    }

    /// Unload experiment types with no RUNNING experiments.
    pub async fn unload_experiments(&self, types: &[String]) -> Result<()> {
        let _guard = self.store.reconfiguration_lock().acquire().await;
        let session = self.sessions.acquire().await?;
        self.check_experiment_types(&session, types).await?;
        Ok(self.store.unload_experiments(types).await?)
    }

    /// Reload experiment types with no RUNNING experiments.
    pub async fn reload_experiments(&self, types: &[String]) -> Result<()> {
        let guard = self.store.reconfiguration_lock().acquire().await;
        let session = self.sessions.acquire().await?;
        self.check_experiment_types(&session, types).await?;
        self.reload_experiments_locked(&guard, types).await
    }

    /// Hot-swap task plugins that have no active tasks.
    ///
    /// Types are processed in order and independently: when a later type is
    /// in use, the earlier ones stay reloaded.
    pub async fn reload_task_plugins(&self, types: &[String]) -> Result<()> {
        let _guard = self.store.reconfiguration_lock().acquire().await;
        let session = self.sessions.acquire().await?;
        for task_type in types {
            let users = self.usage.task_type_users(&session, task_type).await?;
            ensure_unused(ResourceKind::TaskType, task_type, users)?;
            self.reload_plugin(PluginKind::Task, task_type).await?;
        }
        Ok(())
    }

    async fn check_labs(&self, session: &Session, ids: &[String]) -> Result<()> {
        for id in ids {
            let users = self.usage.lab_users(session, id).await?;
            ensure_unused(ResourceKind::Lab, id, users)?;
        }
        Ok(())
    }

    async fn check_experiment_types(&self, session: &Session, types: &[String]) -> Result<()> {
        for experiment_type in types {
            let users = self.usage.experiment_type_users(session, experiment_type).await?;
            ensure_unused(ResourceKind::ExperimentType, experiment_type, users)?;
        }
        Ok(())
    }

    async fn reload_plugin(&self, kind: PluginKind, type_name: &str) -> Result<()> {
        let manifest = self
            .plugins
            .reload_plugin(kind, type_name)
            .await
            .map_err(|e| plugin_error(kind, type_name, e))?;
        debug!("{} plugin '{}' now at version {}", kind, type_name, manifest.version);
        Ok(())
    }

    async fn load_labs_locked(
        &self,
        _guard: &ReconfigurationGuard,
        session: &Session,
        ids: &[String],
    ) -> Result<()> {
        let loaded = self.store.load_labs(ids).await?;
        self.devices.update_devices(session, &loaded, &[]).await?;
        self.containers.update_containers(session, &loaded, &[]).await?;
        Ok(())
    }

    async fn unload_labs_locked(
        &self,
        _guard: &ReconfigurationGuard,
        session: &Session,
        ids: &[String],
    ) -> Result<Vec<String>> {
        let dependents = self.store.unload_labs(ids).await?;
        self.devices.update_devices(session, &[], ids).await?;
        self.containers.update_containers(session, &[], ids).await?;
        Ok(dependents)
    }

    async fn reload_experiments_locked(
        &self,
        _guard: &ReconfigurationGuard,
        types: &[String],
    ) -> Result<()> {
        let mut loaded = Vec::new();
        for experiment_type in types {
            if self.store.is_experiment_loaded(experiment_type).await {
                loaded.push(experiment_type.clone());
            }
        }
        self.store.unload_experiments(&loaded).await?;
        self.store.load_experiments(types).await?;
        Ok(())
    }
}

fn plugin_error(kind: PluginKind, type_name: &str, err: CatalogError) -> OrchestratorError {
    OrchestratorError::PluginReload {
        plugin: format!("{kind} plugin '{type_name}'"),
        reason: err.to_string(),
    }
}
