//! Error taxonomy shared by the scheduling core and the lifecycle guard.

use crate::id::ExperimentId;

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Kind of named resource referenced by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A lab
    Lab,
    /// Devices within a lab
    Device,
    /// An experiment type
    ExperimentType,
    /// A task type
    TaskType,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceKind::Lab => "lab",
            ResourceKind::Device => "device",
            ResourceKind::ExperimentType => "experiment type",
            ResourceKind::TaskType => "task type",
        };
        f.write_str(s)
    }
}

/// Failure raised by an experiment executor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("experiment '{experiment_id}': {message}")]
pub struct ExecutionError {
    /// Experiment the executor drives
    pub experiment_id: ExperimentId,

    /// What went wrong
    pub message: String,
}

impl ExecutionError {
    /// Create a new execution error.
    pub fn new(experiment_id: ExperimentId, message: impl Into<String>) -> Self {
        Self {
            experiment_id,
            message: message.into(),
        }
    }
}

/// Errors surfaced to callers of the scheduling core and the lifecycle guard.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Referenced lab/experiment/task type is not loaded or not known
    #[error("unknown {kind} '{name}'")]
    UnknownType {
        /// Kind of resource
        kind: ResourceKind,
        /// Requested name
        name: String,
    },

    /// A usage predicate found active dependents
    #[error("{kind} '{resource}' is in use by {}", .users.join(", "))]
    ResourceInUse {
        /// Kind of resource
        kind: ResourceKind,
        /// Resource name
        resource: String,
        /// Ids of the experiments/tasks depending on it
        users: Vec<String>,
    },

    /// Executor start/progress/cancel failure
    #[error("execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Operation invalid for the current load state
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Plugin hot-swap failure
    #[error("failed to reload {plugin}: {reason}")]
    PluginReload {
        /// Plugin that failed
        plugin: String,
        /// Why
        reason: String,
    },

    /// Persistence layer failure
    #[error("persistence error: {0}")]
    Persistence(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_in_use_lists_users() {
        let err = OrchestratorError::ResourceInUse {
            kind: ResourceKind::Lab,
            resource: "wet_lab".to_string(),
            users: vec!["exp-1".to_string(), "exp-2".to_string()],
        };
        assert_eq!(err.to_string(), "lab 'wet_lab' is in use by exp-1, exp-2");
    }

    #[test]
    fn test_execution_error_converts() {
        let err: OrchestratorError =
            ExecutionError::new(ExperimentId::new("exp-1"), "pump jammed").into();
        assert!(matches!(err, OrchestratorError::Execution(_)));
        assert_eq!(err.to_string(), "execution error: experiment 'exp-1': pump jammed");
    }
}
