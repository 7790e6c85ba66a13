//! benchtop core data models.
//!
//! This crate defines the records shared by the scheduling core, the
//! execution managers and the resource lifecycle guard.

#![warn(missing_docs)]

// Core identities
mod id;

// Persisted execution state
mod experiment;
mod task;
mod device;

// Configuration-defined resources
mod config;

// Error taxonomy
mod error;

// Re-exports
pub use id::*;

pub use experiment::{
    Experiment, ExperimentDefinition, ExperimentExecutionParameters, ExperimentFilter,
    ExperimentStatus,
};
pub use task::{Task, TaskDeviceRef, TaskFilter, TaskStatus, STANDALONE_EXPERIMENT_ID};
pub use device::{Container, Device, DeviceStatus};
pub use config::{
    ContainerConfig, DeviceConfig, ExperimentConfig, LabConfig, PluginKind, PluginManifest,
    TaskConfig,
};
pub use error::{ExecutionError, OrchestratorError, ResourceKind, Result};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
