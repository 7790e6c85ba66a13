//! Device manager - device records and their live driver handles.

use std::collections::HashMap;

use async_trait::async_trait;
use benchtop_core::{Device, DeviceStatus, LabConfig, Time};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{Result, Session, StorageError};

/// Keeps device records in step with the loaded labs.
#[async_trait]
pub trait DeviceManager: Send + Sync {
    /// Remove devices of `unloaded` labs, then create devices of `loaded` labs.
    async fn update_devices(
        &self,
        session: &Session,
        loaded: &[LabConfig],
        unloaded: &[String],
    ) -> Result<()>;

    /// Replace the live driver handles of `device_ids` in `lab_id`.
    async fn reload_devices(
        &self,
        session: &Session,
        lab_id: &str,
        device_ids: &[String],
    ) -> Result<()>;

    /// Devices of a lab, ordered by id.
    async fn get_devices(&self, session: &Session, lab_id: &str) -> Result<Vec<Device>>;
}

/// Live, non-persisted handle to a device driver.
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    /// Generation of the driver instance
    pub generation: u64,
    /// When the driver instance was started
    pub started_at: Time,
}

/// Device manager storing records in the session's database and handles
/// in memory.
#[derive(Debug, Default)]
pub struct StoreDeviceManager {
    handles: Mutex<HashMap<String, DeviceHandle>>,
}

impl StoreDeviceManager {
    /// Create a new manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current handle of `lab.device`, if the driver is live.
    pub async fn handle(&self, lab_id: &str, device_id: &str) -> Option<DeviceHandle> {
        self.handles
            .lock()
            .await
            .get(&format!("{lab_id}.{device_id}"))
            .cloned()
    }

    async fn start_handle(&self, device: &mut Device) {
        device.handle_generation += 1;
        let handle = DeviceHandle {
            generation: device.handle_generation,
            started_at: chrono::Utc::now(),
        };
        self.handles.lock().await.insert(device.qualified_id(), handle);
    }
}

#[async_trait]
impl DeviceManager for StoreDeviceManager {
    async fn update_devices(
        &self,
        session: &Session,
        loaded: &[LabConfig],
        unloaded: &[String],
    ) -> Result<()> {
        let mut devices = session.db().devices.lock().await;

        for lab_id in unloaded {
            let removed: Vec<String> = devices
                .values()
                .filter(|d| &d.lab_id == lab_id)
                .map(Device::qualified_id)
                .collect();
            devices.retain(|(lab, _), _| lab != lab_id);
            let mut handles = self.handles.lock().await;
            for qualified in &removed {
                handles.remove(qualified);
            }
            debug!("Removed {} devices for lab '{}'", removed.len(), lab_id);
        }

        for lab in loaded {
            for (device_id, config) in &lab.devices {
                let key = (lab.id.clone(), device_id.clone());
                let live = self
                    .handles
                    .lock()
                    .await
                    .contains_key(&format!("{}.{}", lab.id, device_id));
                match devices.get_mut(&key) {
                    Some(device) if live => {
                        device.device_type = config.device_type.clone();
                    }
                    Some(device) => {
                        device.device_type = config.device_type.clone();
                        self.start_handle(device).await;
                    }
                    None => {
                        let mut device = Device {
                            lab_id: lab.id.clone(),
                            id: device_id.clone(),
                            device_type: config.device_type.clone(),
                            computer: config.computer.clone(),
                            status: DeviceStatus::Idle,
                            handle_generation: 0,
                        };
                        self.start_handle(&mut device).await;
                        devices.insert(key, device);
                    }
                }
            }
            debug!("Created devices for lab '{}'", lab.id);
        }

        Ok(())
    }

    async fn reload_devices(
        &self,
        session: &Session,
        lab_id: &str,
        device_ids: &[String],
    ) -> Result<()> {
        let mut devices = session.db().devices.lock().await;

        if let Some(missing) = device_ids
            .iter()
            .find(|id| !devices.contains_key(&(lab_id.to_string(), (*id).clone())))
        {
            return Err(StorageError::NotFound(format!(
                "device '{missing}' in lab '{lab_id}'"
            )));
        }

        for device_id in device_ids {
            if let Some(device) = devices.get_mut(&(lab_id.to_string(), device_id.clone())) {
                self.start_handle(device).await;
                info!(
                    "Reloaded device '{}' (generation {})",
                    device.qualified_id(),
                    device.handle_generation
                );
            }
        }
        Ok(())
    }

    async fn get_devices(&self, session: &Session, lab_id: &str) -> Result<Vec<Device>> {
        let devices = session.db().devices.lock().await;
        Ok(devices
            .values()
            .filter(|d| d.lab_id == lab_id)
            .cloned()
            .collect())
    }
}
