//! Experiment scheduling for benchtop.
//!
//! The [`ExperimentScheduler`] admits experiments, progresses them in
//! priority order and processes cooperative cancellation requests through a
//! bounded [`CancellationQueue`]. Experiment-specific behaviour lives behind
//! the [`ExperimentExecutor`] trait; [`SequentialExecutor`] is the built-in
//! implementation. Standalone tasks run through [`OnDemandTasks`].

#![warn(missing_docs)]

pub mod config;
pub mod executor;
pub mod queue;
pub mod dependency;
pub mod scheduler;
pub mod sequential;
pub mod on_demand;

pub use config::SchedulerConfig;
pub use executor::{ExecutorFactory, ExperimentExecutor};
pub use queue::CancellationQueue;
pub use dependency::{DependencyResolver, Resolution};
pub use scheduler::{DrainReport, ExperimentScheduler, TickReport};
pub use sequential::{SequentialExecutor, SequentialExecutorFactory};
pub use on_demand::{OnDemandReport, OnDemandTasks};
