//! [`Device`] – one regulator (or related part) and its bus interface.

use std::cell::RefCell;
use std::fmt;

use regulators_hal::bus::{BusError, BusInterface};
use regulators_types::{ErrorFrame, RegulatorError};

use crate::configuration::Configuration;
use crate::environment::ActionEnvironment;
use crate::monitoring::SensorMonitoring;
use crate::presence::PresenceDetection;
use crate::rail::Rail;

/// A physical device.
///
/// The device exclusively owns its bus interface.  Actions reach it through
/// the shared hierarchy, so it sits behind a [`RefCell`]; traversal is
/// single-threaded and borrows it for one transfer at a time.
pub struct Device {
    id: String,
    is_regulator: bool,
    inventory_path: String,
    bus: RefCell<Box<dyn BusInterface>>,
    presence_detection: Option<PresenceDetection>,
    configuration: Option<Configuration>,
    monitoring: Option<SensorMonitoring>,
    rails: Vec<Rail>,
}

impl Device {
    pub fn new(
        id: impl Into<String>,
        is_regulator: bool,
        inventory_path: impl Into<String>,
        bus: Box<dyn BusInterface>,
    ) -> Self {
        Self {
            id: id.into(),
            is_regulator,
            inventory_path: inventory_path.into(),
            bus: RefCell::new(bus),
            presence_detection: None,
            configuration: None,
            monitoring: None,
            rails: Vec::new(),
        }
    }

    pub fn with_presence_detection(mut self, detection: PresenceDetection) -> Self {
        self.presence_detection = Some(detection);
        self
    }

    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    pub fn with_monitoring(mut self, monitoring: SensorMonitoring) -> Self {
        self.monitoring = Some(monitoring);
        self
    }

    pub fn with_rail(mut self, rail: Rail) -> Self {
        self.rails.push(rail);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_regulator(&self) -> bool {
        self.is_regulator
    }

    pub fn inventory_path(&self) -> &str {
        &self.inventory_path
    }

    pub fn rails(&self) -> &[Rail] {
        &self.rails
    }

    pub fn rail(&self, rail_id: &str) -> Option<&Rail> {
        self.rails.iter().find(|rail| rail.id() == rail_id)
    }

    pub fn presence_detection(&self) -> Option<&PresenceDetection> {
        self.presence_detection.as_ref()
    }

    pub fn configuration(&self) -> Option<&Configuration> {
        self.configuration.as_ref()
    }

    pub fn monitoring(&self) -> Option<&SensorMonitoring> {
        self.monitoring.as_ref()
    }

    pub(crate) fn bus(&self) -> &RefCell<Box<dyn BusInterface>> {
        &self.bus
    }

    /// Apply the device configuration, then each rail's configuration in
    /// order.  The first failure stops the device and is returned wrapped in
    /// a device frame.
    pub fn configure(&self, env: &mut ActionEnvironment<'_>) -> Result<(), RegulatorError> {
        self.framed(|| {
            if let Some(configuration) = &self.configuration {
                configuration.execute(env)?;
            }
            self.rails.iter().try_for_each(|rail| rail.configure(env))
        })
    }

    /// Run the device sensor monitoring, then each rail's, in order.
    pub fn monitor(&self, env: &mut ActionEnvironment<'_>) -> Result<(), RegulatorError> {
        self.framed(|| {
            if let Some(monitoring) = &self.monitoring {
                monitoring.execute(env)?;
            }
            self.rails.iter().try_for_each(|rail| rail.monitor(env))
        })
    }

    /// Close the bus interface if it is open.
    pub fn close(&mut self) -> Result<(), BusError> {
        let bus = self.bus.get_mut();
        if bus.is_open() {
            bus.close()?;
        }
        Ok(())
    }

    fn framed(&self, run: impl FnOnce() -> Result<(), RegulatorError>) -> Result<(), RegulatorError> {
        run().map_err(|err| err.within(ErrorFrame::Device(self.id.clone())))
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bus = self.bus.try_borrow().map(|bus| format!("{}@{:#04x}", bus.bus(), bus.address()));
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("is_regulator", &self.is_regulator)
            .field("inventory_path", &self.inventory_path)
            .field("bus", &bus.unwrap_or_else(|_| "<in use>".to_string()))
            .field("rails", &self.rails)
            .finish_non_exhaustive()
    }
}
