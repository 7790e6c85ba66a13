//! Execution managers and scoped persistence sessions for benchtop.
//!
//! Experiments, tasks, devices and containers are kept in an in-memory
//! database that can be snapshotted to a JSON file. Every manager call
//! goes through a [`Session`] acquired from the [`SessionFactory`].

#![warn(missing_docs)]

pub mod error;
pub mod database;
pub mod experiment;
pub mod task;
pub mod device;
pub mod container;

pub use error::{StorageError, Result};
pub use database::{Database, DatabaseConfig, Session, SessionFactory};
pub use experiment::{ExperimentManager, StoreExperimentManager};
pub use task::{TaskManager, StoreTaskManager};
pub use device::{DeviceManager, StoreDeviceManager};
pub use container::{ContainerManager, StoreContainerManager};
