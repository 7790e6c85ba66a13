//! Resource store - which labs and experiment types are loaded.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use benchtop_core::{ExperimentConfig, LabConfig, ResourceKind};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{Catalog, CatalogError, ReconfigurationLock, Result};

#[derive(Debug, Default)]
struct State {
    catalog: Catalog,
    labs: BTreeMap<String, LabConfig>,
    experiments: BTreeMap<String, ExperimentConfig>,
    generations: HashMap<(ResourceKind, String), u64>,
}

impl State {
    fn bump(&mut self, kind: ResourceKind, name: &str) -> u64 {
        let generation = self.generations.entry((kind, name.to_string())).or_insert(0);
        *generation += 1;
        *generation
    }

    fn ensure_loaded(&self, kind: ResourceKind, names: &[String]) -> Result<()> {
        let loaded = |name: &String| match kind {
            ResourceKind::Lab => self.labs.contains_key(name),
            _ => self.experiments.contains_key(name),
        };
        match names.iter().find(|name| !loaded(name)) {
            Some(name) => Err(CatalogError::NotLoaded {
                kind,
                name: name.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Loaded state of labs and experiment types.
///
/// Every load takes a fresh copy of the definition from the [`Catalog`] and
/// bumps the resource's generation, so callers can tell a reloaded resource
/// from the instance they saw before.
#[derive(Debug, Default)]
pub struct ResourceStore {
    state: RwLock<State>,
    lock: ReconfigurationLock,
}

impl ResourceStore {
    /// Create a store over `catalog` with nothing loaded.
    pub fn new(catalog: Catalog) -> Self {
        Self {
            state: RwLock::new(State {
                catalog,
                ..State::default()
            }),
            lock: ReconfigurationLock::new(),
        }
    }

    /// Lock that every change to this store goes through.
    pub fn reconfiguration_lock(&self) -> &ReconfigurationLock {
        &self.lock
    }

    /// Load labs. Labs that are already loaded are skipped. Returns the
    /// configurations that were loaded by this call.
    ///
    /// All definitions are read before anything is marked loaded, so an
    /// unknown lab leaves the store unchanged.
    pub async fn load_labs(&self, ids: &[String]) -> Result<Vec<LabConfig>> {
        let mut state = self.state.write().await;

        let mut fresh = Vec::new();
        for id in ids {
            if state.labs.contains_key(id) {
                debug!("Lab '{}' is already loaded", id);
                continue;
            }
            fresh.push(state.catalog.read_lab(id).await?);
        }

        for lab in &fresh {
            let generation = state.bump(ResourceKind::Lab, &lab.id);
            state.labs.insert(lab.id.clone(), lab.clone());
            info!("Loaded lab '{}' (generation {})", lab.id, generation);
        }
        Ok(fresh)
    }

    /// Unload labs. Every id must be loaded.
    ///
    /// Experiment types that require any of the labs are unloaded with them
    /// and returned.
    pub async fn unload_labs(&self, ids: &[String]) -> Result<Vec<String>> {
        let mut state = self.state.write().await;
        state.ensure_loaded(ResourceKind::Lab, ids)?;

        let dependents = dependent_experiments(&state.experiments, ids);
        for experiment_type in &dependents {
            state.experiments.remove(experiment_type);
            warn!(
                "Unloaded experiment type '{}' because a lab it requires was unloaded",
                experiment_type
            );
        }
        for id in ids {
            state.labs.remove(id);
            info!("Unloaded lab '{}'", id);
        }
        Ok(dependents)
    }

    /// Load experiment types. Every lab a type requires must be loaded.
    /// Types that are already loaded are skipped.
    pub async fn load_experiments(&self, types: &[String]) -> Result<()> {
        let mut state = self.state.write().await;

        let mut fresh = Vec::new();
        for experiment_type in types {
            if state.experiments.contains_key(experiment_type) {
                debug!("Experiment type '{}' is already loaded", experiment_type);
                continue;
            }
            let config = state.catalog.read_experiment(experiment_type).await?;
            if let Some(lab) = config.labs.iter().find(|lab| !state.labs.contains_key(*lab)) {
                return Err(CatalogError::MissingLab {
                    experiment: experiment_type.clone(),
                    lab: lab.clone(),
                });
            }
            fresh.push(config);
        }

        for config in fresh {
            let generation = state.bump(ResourceKind::ExperimentType, &config.experiment_type);
            info!(
                "Loaded experiment type '{}' (generation {})",
                config.experiment_type, generation
            );
            state
                .experiments
                .insert(config.experiment_type.clone(), config);
        }
        Ok(())
    }

    /// Unload experiment types. Every type must be loaded.
    pub async fn unload_experiments(&self, types: &[String]) -> Result<()> {
        let mut state = self.state.write().await;
        state.ensure_loaded(ResourceKind::ExperimentType, types)?;
        for experiment_type in types {
            state.experiments.remove(experiment_type);
            info!("Unloaded experiment type '{}'", experiment_type);
        }
        Ok(())
    }

    /// Whether a lab is loaded.
    pub async fn is_lab_loaded(&self, id: &str) -> bool {
        self.state.read().await.labs.contains_key(id)
    }

    /// Whether an experiment type is loaded.
    pub async fn is_experiment_loaded(&self, experiment_type: &str) -> bool {
        self.state.read().await.experiments.contains_key(experiment_type)
    }

    /// Every lab in the catalog with its loaded flag.
    pub async fn lab_status(&self) -> BTreeMap<String, bool> {
        let state = self.state.read().await;
        let known: BTreeSet<&String> = state.catalog.lab_ids().chain(state.labs.keys()).collect();
        known
            .into_iter()
            .map(|id| (id.clone(), state.labs.contains_key(id)))
            .collect()
    }

    /// Every experiment type in the catalog with its loaded flag.
    pub async fn experiment_status(&self) -> BTreeMap<String, bool> {
        let state = self.state.read().await;
        let known: BTreeSet<&String> = state
            .catalog
            .experiment_types()
            .chain(state.experiments.keys())
            .collect();
        known
            .into_iter()
            .map(|t| (t.clone(), state.experiments.contains_key(t)))
            .collect()
    }

    /// Loaded experiment types that require any of `labs`.
    pub async fn experiments_for_labs(&self, labs: &[String]) -> Vec<String> {
        dependent_experiments(&self.state.read().await.experiments, labs)
    }

    /// Lab definition: the loaded copy, or the catalog's if not loaded.
    pub async fn lab_config(&self, id: &str) -> Option<LabConfig> {
        let state = self.state.read().await;
        state
            .labs
            .get(id)
            .or_else(|| state.catalog.lab(id))
            .cloned()
    }

    /// Lab definition as it is now in the catalog, re-read from disk when
    /// directory-backed. Load state is not touched.
    pub async fn fresh_lab_config(&self, id: &str) -> Result<LabConfig> {
        self.state.write().await.catalog.read_lab(id).await
    }

    /// Experiment definition: the loaded copy, or the catalog's if not loaded.
    pub async fn experiment_config(&self, experiment_type: &str) -> Option<ExperimentConfig> {
        let state = self.state.read().await;
        state
            .experiments
            .get(experiment_type)
            .or_else(|| state.catalog.experiment(experiment_type))
            .cloned()
    }

    /// How many times a resource has been loaded. Zero if never.
    pub async fn generation(&self, kind: ResourceKind, name: &str) -> u64 {
        self.state
            .read()
            .await
            .generations
            .get(&(kind, name.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

fn dependent_experiments(
    experiments: &BTreeMap<String, ExperimentConfig>,
    labs: &[String],
) -> Vec<String> {
    experiments
        .values()
        .filter(|config| config.labs.iter().any(|lab| labs.contains(lab)))
        .map(|config| config.experiment_type.clone())
        .collect()
}
