//! Task model - the unit of device work inside (or outside) an experiment.

use serde::{Deserialize, Serialize};

use crate::id::{ExperimentId, TaskId};
use crate::Time;

/// Experiment id carried by tasks that are not owned by any experiment.
pub const STANDALONE_EXPERIMENT_ID: &str = "on_demand";

/// Task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Created, waiting for devices
    Created,
    /// Driving devices
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Stopped on request
    Cancelled,
}

impl TaskStatus {
    /// RUNNING or CREATED: the task still holds a claim on its resources.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Created)
    }
}

/// Reference to a device used by a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskDeviceRef {
    /// Lab containing the device
    pub lab_id: String,

    /// Device id within the lab
    pub id: String,
}

impl TaskDeviceRef {
    /// Create a new reference.
    pub fn new(lab_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            lab_id: lab_id.into(),
            id: id.into(),
        }
    }
}

/// A persisted task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Identifier, unique within the owning experiment
    pub id: TaskId,

    /// Task type (plugin name)
    #[serde(rename = "type")]
    pub task_type: String,

    /// Owning experiment, or [`STANDALONE_EXPERIMENT_ID`]
    pub experiment_id: ExperimentId,

    /// Devices used, in order
    pub devices: Vec<TaskDeviceRef>,

    /// Current status
    pub status: TaskStatus,

    /// When the task started running
    pub start_time: Option<Time>,

    /// When the task finished
    pub end_time: Option<Time>,

    /// Creation timestamp
    pub created_at: Time,
}

impl Task {
    /// Create a task owned by an experiment.
    pub fn new(
        id: impl Into<TaskId>,
        task_type: impl Into<String>,
        experiment_id: ExperimentId,
        devices: Vec<TaskDeviceRef>,
    ) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            experiment_id,
            devices,
            status: TaskStatus::Created,
            start_time: None,
            end_time: None,
            created_at: chrono::Utc::now(),
        }
    }

    /// Create a task not owned by any experiment.
    pub fn standalone(
        id: impl Into<TaskId>,
        task_type: impl Into<String>,
        devices: Vec<TaskDeviceRef>,
    ) -> Self {
        Self::new(
            id,
            task_type,
            ExperimentId::new(STANDALONE_EXPERIMENT_ID),
            devices,
        )
    }

    /// Whether this is an on-demand task.
    pub fn is_standalone(&self) -> bool {
        self.experiment_id.as_str() == STANDALONE_EXPERIMENT_ID
    }

    /// Whether any device of this task lives in `lab_id`, optionally
    /// restricted to `device_ids`.
    pub fn uses_devices(&self, lab_id: &str, device_ids: Option<&[String]>) -> bool {
        self.devices.iter().any(|device| {
            device.lab_id == lab_id && device_ids.map_or(true, |ids| ids.contains(&device.id))
        })
    }
}

/// Filter for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Filter by any of these statuses
    pub status: Option<Vec<TaskStatus>>,

    /// Filter by task type
    pub task_type: Option<String>,

    /// Filter by owning experiment
    pub experiment_id: Option<ExperimentId>,
}

impl TaskFilter {
    /// RUNNING or CREATED tasks.
    pub fn active() -> Self {
        Self {
            status: Some(vec![TaskStatus::Running, TaskStatus::Created]),
            ..Default::default()
        }
    }

    /// Restrict to a task type.
    pub fn of_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    /// Restrict to an owning experiment.
    pub fn in_experiment(mut self, experiment_id: ExperimentId) -> Self {
        self.experiment_id = Some(experiment_id);
        self
    }

    /// Check a record against the filter.
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(statuses) = &self.status {
            if !statuses.contains(&task.status) {
                return false;
            }
        }
        if let Some(task_type) = &self.task_type {
            if &task.task_type != task_type {
                return false;
            }
        }
        if let Some(experiment_id) = &self.experiment_id {
            if &task.experiment_id != experiment_id {
                return false;
            }
        }
        true
    }
}
