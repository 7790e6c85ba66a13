//! Resource lifecycle guard for benchtop.
//!
//! Every load, unload and reload of labs, devices, experiment types and task
//! plugins goes through [`ResourceLifecycle`]. Each operation holds the
//! reconfiguration lock, checks that no active experiment or task depends on
//! what it is about to change, and only then mutates.

#![warn(missing_docs)]

pub mod usage;
pub mod guard;

pub use usage::UsageInspector;
pub use guard::ResourceLifecycle;
