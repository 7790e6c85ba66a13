//! Configuration-defined resources: labs, experiment types and plugins.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::task::TaskDeviceRef;

/// A device declared by a lab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device type (plugin name)
    #[serde(rename = "type")]
    pub device_type: String,

    /// Computer hosting the driver
    #[serde(default = "default_computer")]
    pub computer: String,
}

fn default_computer() -> String {
    "localhost".to_string()
}

impl DeviceConfig {
    /// Device hosted on the local computer.
    pub fn new(device_type: impl Into<String>) -> Self {
        Self {
            device_type: device_type.into(),
            computer: default_computer(),
        }
    }
}

/// A container declared by a lab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Container type
    #[serde(rename = "type")]
    pub container_type: String,

    /// Location within the lab
    pub location: String,

    /// Ids of the containers of this type
    pub ids: Vec<String>,
}

/// A lab: a physical location with devices, loaded and unloaded as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabConfig {
    /// Lab id
    #[serde(rename = "type")]
    pub id: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Devices keyed by device id
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceConfig>,

    /// Containers
    #[serde(default)]
    pub containers: Vec<ContainerConfig>,
}

impl LabConfig {
    /// Empty lab.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            devices: BTreeMap::new(),
            containers: Vec::new(),
        }
    }

    /// Add a device.
    pub fn with_device(mut self, id: impl Into<String>, device: DeviceConfig) -> Self {
        self.devices.insert(id.into(), device);
        self
    }

    /// Add a container group.
    pub fn with_containers(mut self, containers: ContainerConfig) -> Self {
        self.containers.push(containers);
        self
    }

    /// Distinct device types referenced by this lab.
    pub fn device_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .devices
            .values()
            .map(|device| device.device_type.clone())
            .collect();
        types.sort();
        types.dedup();
        types
    }
}

/// A task node in an experiment's task graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Task id, unique within the experiment
    pub id: String,

    /// Task type (plugin name)
    #[serde(rename = "type")]
    pub task_type: String,

    /// Devices the task drives
    #[serde(default)]
    pub devices: Vec<TaskDeviceRef>,

    /// Static parameters
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,

    /// Ids of tasks that must complete first
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl TaskConfig {
    /// Task without devices or dependencies.
    pub fn new(id: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            devices: Vec::new(),
            parameters: BTreeMap::new(),
            dependencies: Vec::new(),
        }
    }

    /// Add a device reference.
    pub fn with_device(mut self, lab_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        self.devices.push(TaskDeviceRef::new(lab_id, device_id));
        self
    }

    /// Add a dependency.
    pub fn after(mut self, task_id: impl Into<String>) -> Self {
        self.dependencies.push(task_id.into());
        self
    }
}

/// An experiment type: the labs it needs and its task graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Experiment type name
    #[serde(rename = "type")]
    pub experiment_type: String,

    /// Description
    #[serde(default)]
    pub description: String,

    /// Labs used by the experiment
    pub labs: Vec<String>,

    /// Task graph
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

impl ExperimentConfig {
    /// Experiment type over `labs` with no tasks yet.
    pub fn new(experiment_type: impl Into<String>, labs: Vec<String>) -> Self {
        Self {
            experiment_type: experiment_type.into(),
            description: String::new(),
            labs,
            tasks: Vec::new(),
        }
    }

    /// Append a task node.
    pub fn with_task(mut self, task: TaskConfig) -> Self {
        self.tasks.push(task);
        self
    }

    /// Whether any task of the graph drives one of `device_ids` in `lab_id`.
    pub fn uses_devices(&self, lab_id: &str, device_ids: &[String]) -> bool {
        self.labs.iter().any(|lab| lab == lab_id)
            && self.tasks.iter().any(|task| {
                task.devices
                    .iter()
                    .any(|device| device.lab_id == lab_id && device_ids.contains(&device.id))
            })
    }
}

/// Kind of hot-swappable plugin code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    /// Device driver
    Device,
    /// Task implementation
    Task,
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginKind::Device => write!(f, "device"),
            PluginKind::Task => write!(f, "task"),
        }
    }
}

/// Metadata describing a plugin implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Type name the plugin implements
    #[serde(rename = "type")]
    pub type_name: String,

    /// Implementation version, bumped on every hot-swap
    #[serde(default)]
    pub version: u64,

    /// Description
    #[serde(default)]
    pub description: String,
}

impl PluginManifest {
    /// Manifest at version 1.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            version: 1,
            description: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lab_device_types_are_distinct() {
        let lab = LabConfig::new("wet_lab")
            .with_device("balance_1", DeviceConfig::new("balance"))
            .with_device("balance_2", DeviceConfig::new("balance"))
            .with_device("pump", DeviceConfig::new("syringe_pump"));

        assert_eq!(lab.device_types(), vec!["balance", "syringe_pump"]);
    }

    #[test]
    fn test_experiment_uses_devices() {
        let config = ExperimentConfig::new("titration", vec!["wet_lab".to_string()])
            .with_task(TaskConfig::new("dose", "dispense").with_device("wet_lab", "pump"))
            .with_task(TaskConfig::new("weigh", "weigh").with_device("wet_lab", "balance_1").after("dose"));

        assert!(config.uses_devices("wet_lab", &["pump".to_string()]));
        assert!(!config.uses_devices("wet_lab", &["balance_2".to_string()]));
        assert!(!config.uses_devices("dry_lab", &["pump".to_string()]));
    }

    #[test]
    fn test_lab_config_from_json() {
        let json = r#"{
            "type": "wet_lab",
            "devices": { "pump": { "type": "syringe_pump" } },
            "containers": [ { "type": "vial", "location": "rack", "ids": ["v1", "v2"] } ]
        }"#;
        let lab: LabConfig = serde_json::from_str(json).unwrap();
        assert_eq!(lab.id, "wet_lab");
        assert_eq!(lab.devices["pump"].computer, "localhost");
        assert_eq!(lab.containers[0].ids.len(), 2);
    }
}
