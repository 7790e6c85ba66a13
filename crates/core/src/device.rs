//! Device and container records kept by the execution managers.

use serde::{Deserialize, Serialize};

/// Runtime status of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    /// Available for allocation
    Idle,
    /// Allocated to a task
    Busy,
    /// Taken out of service
    Disabled,
}

/// A device instantiated from a loaded lab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Owning lab
    pub lab_id: String,

    /// Device id within the lab
    pub id: String,

    /// Device type (plugin name)
    #[serde(rename = "type")]
    pub device_type: String,

    /// Computer hosting the device driver
    pub computer: String,

    /// Current status
    pub status: DeviceStatus,

    /// Incremented every time the live driver handle is replaced
    pub handle_generation: u64,
}

impl Device {
    /// Qualified `lab.device` name.
    pub fn qualified_id(&self) -> String {
        format!("{}.{}", self.lab_id, self.id)
    }
}

/// A container (vessel, plate, vial) defined by a loaded lab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    /// Unique id
    pub id: String,

    /// Owning lab
    pub lab_id: String,

    /// Container type
    #[serde(rename = "type")]
    pub container_type: String,

    /// Physical location within the lab
    pub location: String,
}
