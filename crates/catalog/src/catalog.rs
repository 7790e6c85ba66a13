//! Catalog of every known definition.
//!
//! A catalog is either assembled in code or read from a directory:
//!
//! ```text
//! <root>/labs/<lab>.json
//! <root>/experiments/<type>.json
//! <root>/devices/<device type>.json
//! <root>/tasks/<task type>.json
//! ```
//!
//! When directory-backed, `read_*` re-reads the file so that a reload
//! picks up edited configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use benchtop_core::{ExperimentConfig, LabConfig, PluginKind, PluginManifest, ResourceKind};
use serde::de::DeserializeOwned;
use tokio::fs;
use tracing::{debug, warn};

use crate::{CatalogError, Result};

const LABS_DIR: &str = "labs";
const EXPERIMENTS_DIR: &str = "experiments";
const DEVICES_DIR: &str = "devices";
const TASKS_DIR: &str = "tasks";

/// Every lab, experiment type and plugin that can be loaded.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    root: Option<PathBuf>,
    labs: BTreeMap<String, LabConfig>,
    experiments: BTreeMap<String, ExperimentConfig>,
    device_plugins: BTreeMap<String, PluginManifest>,
    task_plugins: BTreeMap<String, PluginManifest>,
}

impl Catalog {
    /// Empty, in-memory catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a lab definition.
    pub fn with_lab(mut self, lab: LabConfig) -> Self {
        self.labs.insert(lab.id.clone(), lab);
        self
    }

    /// Add an experiment type definition.
    pub fn with_experiment(mut self, experiment: ExperimentConfig) -> Self {
        self.experiments
            .insert(experiment.experiment_type.clone(), experiment);
        self
    }

    /// Register a plugin implementation.
    pub fn with_plugin(mut self, kind: PluginKind, type_name: impl Into<String>) -> Self {
        let manifest = PluginManifest::new(type_name);
        self.plugins_mut(kind)
            .insert(manifest.type_name.clone(), manifest);
        self
    }

    /// Read every definition under `root`. Missing sub-directories are
    /// treated as empty.
    pub async fn from_dir(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        let labs: Vec<LabConfig> = list_dir(&root.join(LABS_DIR)).await?;
        let experiments: Vec<ExperimentConfig> = list_dir(&root.join(EXPERIMENTS_DIR)).await?;
        let devices: Vec<PluginManifest> = list_dir(&root.join(DEVICES_DIR)).await?;
        let tasks: Vec<PluginManifest> = list_dir(&root.join(TASKS_DIR)).await?;

        debug!(
            "Catalog at {}: {} labs, {} experiment types, {} device plugins, {} task plugins",
            root.display(),
            labs.len(),
            experiments.len(),
            devices.len(),
            tasks.len()
        );

        Ok(Self {
            labs: labs.into_iter().map(|l| (l.id.clone(), l)).collect(),
            experiments: experiments
                .into_iter()
                .map(|e| (e.experiment_type.clone(), e))
                .collect(),
            device_plugins: devices
                .into_iter()
                .map(|p| (p.type_name.clone(), p))
                .collect(),
            task_plugins: tasks
                .into_iter()
                .map(|p| (p.type_name.clone(), p))
                .collect(),
            root: Some(root),
        })
    }

    /// Directory the catalog was read from.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Lab definition, as last read.
    pub fn lab(&self, id: &str) -> Option<&LabConfig> {
        self.labs.get(id)
    }

    /// Experiment type definition, as last read.
    pub fn experiment(&self, experiment_type: &str) -> Option<&ExperimentConfig> {
        self.experiments.get(experiment_type)
    }

    /// Plugin manifest, as last read.
    pub fn plugin(&self, kind: PluginKind, type_name: &str) -> Option<&PluginManifest> {
        self.plugins(kind).get(type_name)
    }

    /// All lab ids.
    pub fn lab_ids(&self) -> impl Iterator<Item = &String> {
        self.labs.keys()
    }

    /// All experiment types.
    pub fn experiment_types(&self) -> impl Iterator<Item = &String> {
        self.experiments.keys()
    }

    /// All plugins of a kind.
    pub fn plugin_types(&self, kind: PluginKind) -> impl Iterator<Item = &String> {
        self.plugins(kind).keys()
    }

    /// Fresh copy of a lab definition, re-read from disk when directory-backed.
    pub async fn read_lab(&mut self, id: &str) -> Result<LabConfig> {
        if let Some(root) = &self.root {
            let path = root.join(LABS_DIR).join(format!("{id}.json"));
            if let Some(lab) = read_json::<LabConfig>(&path).await? {
                ensure_named(&path, id, &lab.id)?;
                self.labs.insert(id.to_string(), lab);
            } else if self.labs.remove(id).is_some() {
                warn!("Lab '{}' disappeared from {}", id, path.display());
            }
        }
        self.labs.get(id).cloned().ok_or_else(|| CatalogError::Unknown {
            kind: ResourceKind::Lab,
            name: id.to_string(),
        })
    }

    /// Fresh copy of an experiment type definition.
    pub async fn read_experiment(&mut self, experiment_type: &str) -> Result<ExperimentConfig> {
        if let Some(root) = &self.root {
            let path = root
                .join(EXPERIMENTS_DIR)
                .join(format!("{experiment_type}.json"));
            if let Some(experiment) = read_json::<ExperimentConfig>(&path).await? {
                ensure_named(&path, experiment_type, &experiment.experiment_type)?;
                self.experiments
                    .insert(experiment_type.to_string(), experiment);
            } else {
                self.experiments.remove(experiment_type);
            }
        }
        self.experiments
            .get(experiment_type)
            .cloned()
            .ok_or_else(|| CatalogError::Unknown {
                kind: ResourceKind::ExperimentType,
                name: experiment_type.to_string(),
            })
    }

    /// Fresh copy of a plugin manifest.
    pub async fn read_plugin(&mut self, kind: PluginKind, type_name: &str) -> Result<PluginManifest> {
        if let Some(root) = &self.root {
            let dir = match kind {
                PluginKind::Device => DEVICES_DIR,
                PluginKind::Task => TASKS_DIR,
            };
            let path = root.join(dir).join(format!("{type_name}.json"));
            match read_json::<PluginManifest>(&path).await? {
                Some(manifest) => {
                    ensure_named(&path, type_name, &manifest.type_name)?;
                    self.plugins_mut(kind)
                        .insert(type_name.to_string(), manifest);
                }
                None => {
                    self.plugins_mut(kind).remove(type_name);
                }
            }
        }
        self.plugins(kind)
            .get(type_name)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownPlugin {
                kind,
                name: type_name.to_string(),
            })
    }

    fn plugins(&self, kind: PluginKind) -> &BTreeMap<String, PluginManifest> {
        match kind {
            PluginKind::Device => &self.device_plugins,
            PluginKind::Task => &self.task_plugins,
        }
    }

    fn plugins_mut(&mut self, kind: PluginKind) -> &mut BTreeMap<String, PluginManifest> {
        match kind {
            PluginKind::Device => &mut self.device_plugins,
            PluginKind::Task => &mut self.task_plugins,
        }
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => serde_json::from_str(&json)
            .map(Some)
            .map_err(|source| CatalogError::Invalid {
                path: path.display().to_string(),
                source,
            }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn ensure_named(path: &Path, expected: &str, found: &str) -> Result<()> {
    if expected == found {
        return Ok(());
    }
    Err(CatalogError::Mismatch {
        path: path.display().to_string(),
        expected: expected.to_string(),
        found: found.to_string(),
    })
}

async fn list_dir<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = match fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(items),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        if let Some(item) = read_json(&entry.path()).await? {
            items.push(item);
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write(root: &Path, rel: &str, json: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        fs::write(path, json).await.unwrap();
    }

    #[tokio::test]
    async fn test_from_dir_reads_all_kinds() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "labs/wet_lab.json",
            r#"{"type": "wet_lab", "devices": {"pump": {"type": "syringe_pump"}}}"#,
        )
        .await;
        write(
            dir.path(),
            "experiments/titration.json",
            r#"{"type": "titration", "labs": ["wet_lab"], "tasks": [{"id": "dose", "type": "dispense"}]}"#,
        )
        .await;
        write(dir.path(), "devices/syringe_pump.json", r#"{"type": "syringe_pump"}"#).await;
        write(dir.path(), "tasks/dispense.json", r#"{"type": "dispense", "version": 3}"#).await;
        write(dir.path(), "tasks/README.md", "not a definition").await;

        let catalog = Catalog::from_dir(dir.path()).await.unwrap();
        assert!(catalog.lab("wet_lab").is_some());
        assert_eq!(catalog.experiment("titration").unwrap().tasks.len(), 1);
        assert!(catalog.plugin(PluginKind::Device, "syringe_pump").is_some());
        assert_eq!(catalog.plugin(PluginKind::Task, "dispense").unwrap().version, 3);
    }

    #[tokio::test]
    async fn test_read_lab_picks_up_edits() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "labs/wet_lab.json", r#"{"type": "wet_lab"}"#).await;
        let mut catalog = Catalog::from_dir(dir.path()).await.unwrap();
        assert!(catalog.lab("wet_lab").unwrap().devices.is_empty());

        write(
            dir.path(),
            "labs/wet_lab.json",
            r#"{"type": "wet_lab", "devices": {"pump": {"type": "syringe_pump"}}}"#,
        )
        .await;
        let lab = catalog.read_lab("wet_lab").await.unwrap();
        assert_eq!(lab.devices.len(), 1);
    }

    #[tokio::test]
    async fn test_read_rejects_renamed_definition() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "labs/wet_lab.json", r#"{"type": "wet_lab"}"#).await;
        let mut catalog = Catalog::from_dir(dir.path()).await.unwrap();

        write(dir.path(), "labs/wet_lab.json", r#"{"type": "cold_room"}"#).await;
        let err = catalog.read_lab("wet_lab").await.unwrap_err();

        assert!(matches!(
            err,
            CatalogError::Mismatch { ref expected, ref found, .. }
                if expected == "wet_lab" && found == "cold_room"
        ));
        assert_eq!(catalog.lab("wet_lab").unwrap().id, "wet_lab");
        assert!(catalog.lab("cold_room").is_none());

        write(dir.path(), "tasks/dispense.json", r#"{"type": "weigh"}"#).await;
        assert!(matches!(
            catalog.read_plugin(PluginKind::Task, "dispense").await,
            Err(CatalogError::Mismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_definition_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "labs/broken.json", "{ not json").await;
        let err = Catalog::from_dir(dir.path()).await.unwrap_err();
        assert!(matches!(err, CatalogError::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_in_memory_catalog_lookups() {
        let mut catalog = Catalog::new()
            .with_lab(LabConfig::new("wet_lab"))
            .with_plugin(PluginKind::Task, "dispense");

        assert!(catalog.read_lab("wet_lab").await.is_ok());
        assert!(matches!(
            catalog.read_lab("dry_lab").await,
            Err(CatalogError::Unknown { kind: ResourceKind::Lab, .. })
        ));
        assert!(catalog.read_plugin(PluginKind::Task, "dispense").await.is_ok());
        assert!(catalog.read_plugin(PluginKind::Device, "dispense").await.is_err());
    }
}
