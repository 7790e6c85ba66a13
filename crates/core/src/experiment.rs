//! Experiment model - persisted execution state and submission records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::id::{ExperimentId, TaskId};
use crate::Time;

/// Lifecycle status of a persisted experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExperimentStatus {
    /// Record exists, execution not yet started
    Created,
    /// Being progressed by an executor
    Running,
    /// All tasks finished
    Completed,
    /// Parked by an operator
    Suspended,
    /// Stopped on request
    Cancelled,
    /// Stopped by an execution error or recovery
    Failed,
}

impl ExperimentStatus {
    /// Whether no further transitions are expected.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl std::fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Suspended => "SUSPENDED",
            Self::Cancelled => "CANCELLED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ExperimentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATED" => Ok(Self::Created),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "SUSPENDED" => Ok(Self::Suspended),
            "CANCELLED" => Ok(Self::Cancelled),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown experiment status '{other}'")),
        }
    }
}

/// Parameters controlling how a submission is executed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentExecutionParameters {
    /// Continue a previously failed/cancelled experiment instead of refusing it
    #[serde(default)]
    pub resume: bool,
}

/// Immutable submission record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentDefinition {
    /// Unique id
    pub id: ExperimentId,

    /// Experiment type, must reference a loaded type
    #[serde(rename = "type")]
    pub experiment_type: String,

    /// Higher runs first
    #[serde(default)]
    pub priority: i64,

    /// Type-specific parameters, keyed by task id
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,

    /// Execution parameters
    #[serde(default)]
    pub execution: ExperimentExecutionParameters,
}

impl ExperimentDefinition {
    /// Create a definition with default priority and no parameters.
    pub fn new(id: impl Into<ExperimentId>, experiment_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            experiment_type: experiment_type.into(),
            priority: 0,
            parameters: BTreeMap::new(),
            execution: ExperimentExecutionParameters::default(),
        }
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Request resumption of an existing record.
    pub fn resuming(mut self) -> Self {
        self.execution.resume = true;
        self
    }
}

/// Persisted experiment, owned by the experiment manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    /// Unique identifier
    pub id: ExperimentId,

    /// Experiment type
    #[serde(rename = "type")]
    pub experiment_type: String,

    /// Current status
    pub status: ExperimentStatus,

    /// Labs configured for the type when the record was created
    pub labs: Vec<String>,

    /// Tasks currently running
    pub running_tasks: Vec<TaskId>,

    /// Tasks already completed
    pub completed_tasks: Vec<TaskId>,

    /// Execution parameters used for the submission
    pub execution: ExperimentExecutionParameters,

    /// When execution started
    pub start_time: Option<Time>,

    /// When execution reached a terminal status
    pub end_time: Option<Time>,

    /// Creation timestamp
    pub created_at: Time,
}

impl Experiment {
    /// Create a record in CREATED status.
    pub fn new(
        id: ExperimentId,
        experiment_type: impl Into<String>,
        labs: Vec<String>,
        execution: ExperimentExecutionParameters,
    ) -> Self {
        Self {
            id,
            experiment_type: experiment_type.into(),
            status: ExperimentStatus::Created,
            labs,
            running_tasks: Vec::new(),
            completed_tasks: Vec::new(),
            execution,
            start_time: None,
            end_time: None,
            created_at: chrono::Utc::now(),
        }
    }
}

/// Filter for listing experiments.
#[derive(Debug, Clone, Default)]
pub struct ExperimentFilter {
    /// Filter by status
    pub status: Option<ExperimentStatus>,

    /// Filter by experiment type
    pub experiment_type: Option<String>,
}

impl ExperimentFilter {
    /// Only experiments with the given status.
    pub fn with_status(status: ExperimentStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Restrict to one experiment type.
    pub fn of_type(mut self, experiment_type: impl Into<String>) -> Self {
        self.experiment_type = Some(experiment_type.into());
        self
    }

    /// Check a record against the filter.
    pub fn matches(&self, experiment: &Experiment) -> bool {
        if let Some(status) = self.status {
            if experiment.status != status {
                return false;
            }
        }
        if let Some(experiment_type) = &self.experiment_type {
            if &experiment.experiment_type != experiment_type {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_deserializes_with_defaults() {
        let json = r#"{"id": "exp-1", "type": "titration"}"#;
        let definition: ExperimentDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(definition.id.as_str(), "exp-1");
        assert_eq!(definition.experiment_type, "titration");
        assert_eq!(definition.priority, 0);
        assert!(!definition.execution.resume);
    }

    #[test]
    fn test_status_round_trips_through_strings() {
        let status: ExperimentStatus = "running".parse().unwrap();
        assert_eq!(status, ExperimentStatus::Running);
        assert_eq!(status.to_string(), "RUNNING");
        assert!("paused".parse::<ExperimentStatus>().is_err());
    }

    #[test]
    fn test_filter_matches_status_and_type() {
        let mut experiment = Experiment::new(
            "exp-1".into(),
            "titration",
            vec!["wet_lab".to_string()],
            ExperimentExecutionParameters::default(),
        );
        experiment.status = ExperimentStatus::Running;

        assert!(ExperimentFilter::with_status(ExperimentStatus::Running).matches(&experiment));
        assert!(!ExperimentFilter::with_status(ExperimentStatus::Failed).matches(&experiment));
        assert!(!ExperimentFilter::default().of_type("synthesis").matches(&experiment));
        assert!(ExperimentFilter::default().matches(&experiment));
    }
}
