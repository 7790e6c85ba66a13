//! Resource store for benchtop.
//!
//! The [`Catalog`] knows every lab, experiment type and plugin that could be
//! loaded. The [`ResourceStore`] tracks which labs and experiment types are
//! currently loaded, and the [`PluginRegistry`] hot-swaps device and task
//! plugin code. Changes to either go through the [`ReconfigurationLock`].

#![warn(missing_docs)]

pub mod error;
pub mod catalog;
pub mod store;
pub mod plugin;
pub mod lock;

pub use error::{CatalogError, Result};
pub use catalog::Catalog;
pub use store::ResourceStore;
pub use plugin::{ManifestPluginRegistry, PluginRegistry};
pub use lock::{AdmissionGuard, ReconfigurationGuard, ReconfigurationLock};
