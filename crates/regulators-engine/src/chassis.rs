//! [`Chassis`] – an enclosure and the devices it holds.

use crate::device::Device;

/// One enclosure and its devices, in traversal order.
#[derive(Debug)]
pub struct Chassis {
    id: String,
    inventory_path: String,
    devices: Vec<Device>,
}

impl Chassis {
    pub fn new(id: impl Into<String>, inventory_path: impl Into<String>, devices: Vec<Device>) -> Self {
        Self {
            id: id.into(),
            inventory_path: inventory_path.into(),
            devices,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn inventory_path(&self) -> &str {
        &self.inventory_path
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, device_id: &str) -> Option<&Device> {
        self.devices.iter().find(|device| device.id() == device_id)
    }

    pub(crate) fn devices_mut(&mut self) -> &mut [Device] {
        &mut self.devices
    }
}
