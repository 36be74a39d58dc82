//! Builders shared by the unit tests.

use std::cell::RefCell;
use std::rc::Rc;

use regulators_hal::bus::InitialState;
use regulators_hal::sim::SimBus;
use regulators_types::{CycleId, SensorType};

use crate::action::Action;
use crate::chassis::Chassis;
use crate::device::Device;
use crate::environment::{ActionEnvironment, DEFAULT_MAX_RULE_DEPTH};
use crate::id_map::IdMap;
use crate::presence::PresenceCache;
use crate::register::{CompareOp, CompareRegister, Operand, RegisterFormat, WriteRegister};
use crate::rule::Rule;
use crate::services::SensorsService;
use crate::system::System;

/// Register read by [`always_true`] and [`always_false`]; never preloaded.
const SCRATCH: u8 = 0xFF;

/// A closed simulated bus at `/dev/i2c-1`, address 0x70.
pub fn sim_bus() -> SimBus {
    SimBus::new("/dev/i2c-1", 0x70, InitialState::Closed)
}

/// A regulator backed by a clone of `bus`.
pub fn sim_device(id: &str, bus: &SimBus) -> Device {
    Device::new(
        id,
        true,
        format!("/xyz/openbmc_project/inventory/system/chassis0/{id}"),
        Box::new(bus.clone()),
    )
}

/// A system with one chassis, `chassis0`, holding `devices`.
pub fn system_of(devices: Vec<Device>, rules: Vec<Rule>) -> System {
    let chassis = Chassis::new("chassis0", "/xyz/openbmc_project/inventory/system/chassis0", devices);
    System::new(rules, vec![chassis]).expect("valid test system")
}

/// Run `f` with a fresh environment scoped to `device_id`.
pub fn with_env<R>(system: &System, device_id: &str, f: impl FnOnce(&mut ActionEnvironment<'_>) -> R) -> R {
    let ids = IdMap::new(system.chassis(), system.rules());
    let mut presence = PresenceCache::default();
    let mut env = ActionEnvironment::new(&ids, &mut presence, CycleId::new(), device_id, DEFAULT_MAX_RULE_DEPTH);
    f(&mut env)
}

/// Run `f` like [`with_env`], with sensor values forwarded to `service`.
pub fn with_sensors_env<R>(
    system: &System,
    device_id: &str,
    service: &mut dyn SensorsService,
    f: impl FnOnce(&mut ActionEnvironment<'_>) -> R,
) -> R {
    let ids = IdMap::new(system.chassis(), system.rules());
    let mut presence = PresenceCache::default();
    let mut env = ActionEnvironment::new(&ids, &mut presence, CycleId::new(), device_id, DEFAULT_MAX_RULE_DEPTH)
        .with_sensors_service(service);
    f(&mut env)
}

/// Sensors service that logs each call as a line of text.
#[derive(Debug, Clone, Default)]
pub struct SensorLog(pub Rc<RefCell<Vec<String>>>);

impl SensorLog {
    pub fn lines(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

impl SensorsService for SensorLog {
    fn start_rail(&mut self, rail_id: &str, device_inventory_path: &str, chassis_inventory_path: &str) {
        self.0
            .borrow_mut()
            .push(format!("start {rail_id} {device_inventory_path} {chassis_inventory_path}"));
    }

    fn set_value(&mut self, sensor_type: SensorType, value: i64) {
        self.0.borrow_mut().push(format!("set {sensor_type} {value}"));
    }

    fn end_rail(&mut self, error_occurred: bool) {
        self.0.borrow_mut().push(format!("end {error_occurred}"));
    }
}

pub fn compare_u8(register: u8, op: CompareOp, literal: i64) -> Action {
    CompareRegister::new(register, RegisterFormat::U8, op, Operand::Literal(literal))
        .expect("valid comparison")
        .into()
}

pub fn write_u8(register: u8, value: u8) -> Action {
    WriteRegister::new(register, vec![value]).expect("valid write").into()
}

/// Reads the unset scratch register (zero) and compares it equal to zero.
pub fn always_true() -> Action {
    compare_u8(SCRATCH, CompareOp::Equal, 0)
}

pub fn always_false() -> Action {
    compare_u8(SCRATCH, CompareOp::NotEqual, 0)
}
