//! Container manager - containers defined by loaded labs.

use async_trait::async_trait;
use benchtop_core::{Container, LabConfig};
use tracing::debug;

use crate::{Result, Session};

/// Keeps container records in step with the loaded labs.
#[async_trait]
pub trait ContainerManager: Send + Sync {
    /// Remove containers of `unloaded` labs, then create missing containers
    /// of `loaded` labs. Existing containers keep their state.
    async fn update_containers(
        &self,
        session: &Session,
        loaded: &[LabConfig],
        unloaded: &[String],
    ) -> Result<()>;

    /// Containers of a lab.
    async fn get_containers(&self, session: &Session, lab_id: &str) -> Result<Vec<Container>>;
}

/// Container manager backed by the session's database.
#[derive(Debug, Default, Clone)]
pub struct StoreContainerManager;

impl StoreContainerManager {
    /// Create a new manager.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ContainerManager for StoreContainerManager {
    async fn update_containers(
        &self,
        session: &Session,
        loaded: &[LabConfig],
        unloaded: &[String],
    ) -> Result<()> {
        let mut containers = session.db().containers.lock().await;

        for lab_id in unloaded {
            containers.retain(|_, c| &c.lab_id != lab_id);
        }

        for lab in loaded {
            for group in &lab.containers {
                for id in &group.ids {
                    containers.entry(id.clone()).or_insert_with(|| Container {
                        id: id.clone(),
                        lab_id: lab.id.clone(),
                        container_type: group.container_type.clone(),
                        location: group.location.clone(),
                    });
                }
            }
        }

        debug!("Containers have been updated.");
        Ok(())
    }

    async fn get_containers(&self, session: &Session, lab_id: &str) -> Result<Vec<Container>> {
        let containers = session.db().containers.lock().await;
        Ok(containers
            .values()
            .filter(|c| c.lab_id == lab_id)
            .cloned()
            .collect())
    }
}
