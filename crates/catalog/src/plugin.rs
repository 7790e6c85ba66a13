//! Plugin registry - hot-swap of device and task plugin code.

use std::collections::HashMap;

use async_trait::async_trait;
use benchtop_core::{PluginKind, PluginManifest};
use tokio::sync::Mutex;
use tracing::info;

use crate::{Catalog, Result};

/// Replaces plugin implementations at runtime.
#[async_trait]
pub trait PluginRegistry: Send + Sync {
    /// Hot-swap the implementation of `type_name`, returning the manifest now in use.
    async fn reload_plugin(&self, kind: PluginKind, type_name: &str) -> Result<PluginManifest>;

    /// Version currently in use, if the plugin has been loaded.
    async fn plugin_version(&self, kind: PluginKind, type_name: &str) -> Option<u64>;
}

/// Registry driven by plugin manifests from a [`Catalog`].
///
/// A directory-backed catalog is re-read on every reload, so the version in
/// the manifest file wins. Otherwise the in-memory version is bumped.
#[derive(Debug)]
pub struct ManifestPluginRegistry {
    catalog: Mutex<Catalog>,
    active: Mutex<HashMap<(PluginKind, String), PluginManifest>>,
}

impl ManifestPluginRegistry {
    /// Create a registry with every catalogued plugin active.
    pub fn from_catalog(catalog: &Catalog) -> Self {
        let mut active = HashMap::new();
        for kind in [PluginKind::Device, PluginKind::Task] {
            for type_name in catalog.plugin_types(kind) {
                if let Some(manifest) = catalog.plugin(kind, type_name) {
                    active.insert((kind, type_name.clone()), manifest.clone());
                }
            }
        }
        Self {
            catalog: Mutex::new(catalog.clone()),
            active: Mutex::new(active),
        }
    }
}

#[async_trait]
impl PluginRegistry for ManifestPluginRegistry {
    async fn reload_plugin(&self, kind: PluginKind, type_name: &str) -> Result<PluginManifest> {
        let mut catalog = self.catalog.lock().await;
        let mut manifest = catalog.read_plugin(kind, type_name).await?;

        let mut active = self.active.lock().await;
        let key = (kind, type_name.to_string());
        if catalog.root().is_none() {
            let current = active.get(&key).map_or(manifest.version, |m| m.version);
            manifest.version = current + 1;
        }

        info!(
            "Reloaded {} plugin '{}' (version {})",
            kind, type_name, manifest.version
        );
        active.insert(key, manifest.clone());
        Ok(manifest)
    }

    async fn plugin_version(&self, kind: PluginKind, type_name: &str) -> Option<u64> {
        self.active
            .lock()
            .await
            .get(&(kind, type_name.to_string()))
            .map(|m| m.version)
    }
}
