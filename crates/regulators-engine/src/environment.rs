//! [`ActionEnvironment`] – mutable execution context for one invocation.
//!
//! One environment is created per device per top-level call and threaded by
//! `&mut` through every action in the tree.  It holds:
//!
//! - the active device/rail **scope stack**; the bottom entry is the device
//!   being configured or monitored, `set_device`/`set_rail` push on top;
//! - the active **rule chain**, used to reject recursive rule invocation;
//! - the **volts** of the configuration currently being applied;
//! - everything the tree records without changing control flow: findings,
//!   captured register bytes and sensor readings.
//!
//! Scope changes are made through [`EnvGuard`], which restores the previous
//! scope when dropped.  Because drop runs on every exit path, including `?`
//! propagation, a nested action list can never leak its scope into its
//! caller.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use regulators_hal::bus::{BusError, BusInterface};
use regulators_types::{CycleId, Finding, RegulatorError, SensorReading, SensorType, Severity};
use tracing::warn;

use crate::device::Device;
use crate::id_map::IdMap;
use crate::presence::PresenceCache;
use crate::rule::Rule;
use crate::services::SensorsService;

/// Maximum nesting of `run_rule` invocations before the chain is rejected.
pub const DEFAULT_MAX_RULE_DEPTH: usize = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Scope {
    device_id: String,
    rail_id: Option<String>,
}

/// Everything an environment recorded, handed back when it is finished.
#[derive(Debug, Default)]
pub struct Collected {
    pub findings: Vec<Finding>,
    pub additional_data: BTreeMap<String, String>,
    pub sensors: Vec<SensorReading>,
}

/// Mutable context threaded through one top-level action invocation.
pub struct ActionEnvironment<'a> {
    ids: &'a IdMap<'a>,
    presence: &'a mut PresenceCache,
    cycle: CycleId,
    scopes: Vec<Scope>,
    rule_chain: Vec<String>,
    max_rule_depth: usize,
    resolving_presence: Vec<String>,
    volts: Option<f64>,
    earlier_captures: Option<&'a BTreeMap<String, String>>,
    sensors_service: Option<&'a mut dyn SensorsService>,
    collected: Collected,
}

impl<'a> ActionEnvironment<'a> {
    /// Create an environment whose base scope is `device_id`.
    pub fn new(
        ids: &'a IdMap<'a>,
        presence: &'a mut PresenceCache,
        cycle: CycleId,
        device_id: &str,
        max_rule_depth: usize,
    ) -> Self {
        Self {
            ids,
            presence,
            cycle,
            scopes: vec![Scope {
                device_id: device_id.to_string(),
                rail_id: None,
            }],
            rule_chain: Vec::new(),
            max_rule_depth,
            resolving_presence: Vec::new(),
            volts: None,
            earlier_captures: None,
            sensors_service: None,
            collected: Collected::default(),
        }
    }

    /// Keys already used by other environments of the same run.  Captures
    /// made here skip them when choosing a key.
    pub fn with_earlier_captures(mut self, captures: &'a BTreeMap<String, String>) -> Self {
        self.earlier_captures = Some(captures);
        self
    }

    /// Forward rail monitoring and sensor values to `service`.
    pub fn with_sensors_service(mut self, service: &'a mut dyn SensorsService) -> Self {
        self.sensors_service = Some(service);
        self
    }

    // ── Scope ────────────────────────────────────────────────────────────────

    /// ID of the device actions currently operate on.
    pub fn device_id(&self) -> &str {
        self.scope().device_id.as_str()
    }

    /// ID of the active rail, if a rail scope is active.
    pub fn rail_id(&self) -> Option<&str> {
        self.scope().rail_id.as_deref()
    }

    fn scope(&self) -> &Scope {
        // The base scope pushed in `new` is never popped.
        &self.scopes[self.scopes.len() - 1]
    }

    pub fn cycle(&self) -> CycleId {
        self.cycle
    }

    /// Rules currently executing, outermost first.
    pub fn rule_chain(&self) -> &[String] {
        &self.rule_chain
    }

    pub fn volts(&self) -> Option<f64> {
        self.volts
    }

    /// The active device.
    ///
    /// # Errors
    ///
    /// [`RegulatorError::DeviceNotFound`] if the active ID names no device.
    pub fn device(&self) -> Result<&'a Device, RegulatorError> {
        self.ids.device(self.device_id())
    }

    /// Look up a rule by ID.
    pub fn rule(&self, rule_id: &str) -> Result<&'a Rule, RegulatorError> {
        self.ids.rule(rule_id)
    }

    /// Make `device_id` (and optionally one of its rails) the active scope
    /// until the returned guard is dropped.
    ///
    /// # Errors
    ///
    /// [`RegulatorError::DeviceNotFound`] or [`RegulatorError::RailNotFound`].
    pub fn enter_device(
        &mut self,
        device_id: &str,
        rail_id: Option<&str>,
    ) -> Result<EnvGuard<'_, 'a>, RegulatorError> {
        let device = self.ids.device(device_id)?;
        if let Some(rail_id) = rail_id {
            require_rail(device, rail_id)?;
        }
        let restore = Restore::Scope(self.scopes.len());
        self.scopes.push(Scope {
            device_id: device_id.to_string(),
            rail_id: rail_id.map(str::to_string),
        });
        Ok(EnvGuard { env: self, restore })
    }

    /// Make `rail_id` of the active device the active rail until the
    /// returned guard is dropped.
    pub fn enter_rail(&mut self, rail_id: &str) -> Result<EnvGuard<'_, 'a>, RegulatorError> {
        let device = self.device()?;
        require_rail(device, rail_id)?;
        let restore = Restore::Scope(self.scopes.len());
        self.scopes.push(Scope {
            device_id: device.id().to_string(),
            rail_id: Some(rail_id.to_string()),
        });
        Ok(EnvGuard { env: self, restore })
    }

    /// Push `rule_id` onto the active rule chain until the returned guard is
    /// dropped.
    ///
    /// # Errors
    ///
    /// [`RegulatorError::RuleRecursion`] when the rule is already active in
    /// the chain or the chain would exceed the configured maximum depth.
    pub fn enter_rule(&mut self, rule_id: &str) -> Result<EnvGuard<'_, 'a>, RegulatorError> {
        let depth = self.rule_chain.len() + 1;
        let reason = if self.rule_chain.iter().any(|active| active == rule_id) {
            Some("rule is already active in the call chain".to_string())
        } else if depth > self.max_rule_depth {
            Some(format!("maximum rule depth of {} exceeded", self.max_rule_depth))
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(RegulatorError::RuleRecursion {
                rule_id: rule_id.to_string(),
                depth,
                reason,
                chain: self.rule_chain.clone(),
            });
        }

        let restore = Restore::RuleChain(self.rule_chain.len());
        self.rule_chain.push(rule_id.to_string());
        Ok(EnvGuard { env: self, restore })
    }

    /// Set the configured output voltage until the returned guard is dropped.
    pub fn with_volts(&mut self, volts: Option<f64>) -> EnvGuard<'_, 'a> {
        let restore = Restore::Volts(self.volts);
        self.volts = volts;
        EnvGuard { env: self, restore }
    }

    // ── Hardware ─────────────────────────────────────────────────────────────

    /// Run `op` against the active device's bus interface, opening it first
    /// if it is still closed.  Transport failures come back as
    /// [`RegulatorError::BusAccess`] attributed to the active device, rail
    /// and `register`.
    pub fn with_bus<T>(
        &self,
        register: u8,
        op: impl FnOnce(&mut dyn BusInterface) -> Result<T, BusError>,
    ) -> Result<T, RegulatorError> {
        let device = self.device()?;
        let rail_id = self.rail_id();
        let to_error = |err: BusError| RegulatorError::bus_access(device.id(), rail_id, register, err);

        let mut bus = device.bus().try_borrow_mut().map_err(|_| {
            RegulatorError::bus_access(device.id(), rail_id, register, "bus interface is already in use")
        })?;
        if !bus.is_open() {
            bus.open().map_err(&to_error)?;
        }
        op(&mut **bus).map_err(&to_error)
    }

    /// Whether `device_id` is present this cycle.
    ///
    /// The first query in a cycle runs the device's presence detection (in
    /// that device's scope) and caches the answer; later queries in the same
    /// cycle return the cached value without touching hardware.  A device
    /// without presence detection is present.  A failing presence detection
    /// is recorded as a warning finding and yields `false`.
    ///
    /// # Errors
    ///
    /// [`RegulatorError::DeviceNotFound`] for an unknown device, or
    /// [`RegulatorError::ActionType`] when resolving the presence of a device
    /// depends on its own presence.
    pub fn resolve_presence(&mut self, device_id: &str) -> Result<bool, RegulatorError> {
        if let Some(present) = self.presence.get(device_id, self.cycle) {
            return Ok(present);
        }
        let device = self.ids.device(device_id)?;
        if self.resolving_presence.iter().any(|id| id == device_id) {
            return Err(RegulatorError::action_type(
                "presence_detection",
                format!("presence of device \"{device_id}\" depends on itself"),
            ));
        }

        let present = match device.presence_detection() {
            None => true,
            Some(detection) => {
                // Detection runs detached from whatever rule or configuration
                // asked, so its answer does not depend on the caller.
                self.resolving_presence.push(device_id.to_string());
                let rule_chain = std::mem::take(&mut self.rule_chain);
                let volts = self.volts.take();
                let outcome = match self.enter_device(device_id, None) {
                    Ok(mut scoped) => detection.execute(&mut scoped),
                    Err(err) => Err(err),
                };
                self.rule_chain = rule_chain;
                self.volts = volts;
                self.resolving_presence.pop();
                match outcome {
                    Ok(present) => present,
                    Err(err) => {
                        warn!(device = device_id, error = %err, "presence detection failed; treating device as absent");
                        self.push_finding(
                            Finding::new(Severity::Warning, "presence_detection_failed", device_id)
                                .with_message(err.to_string()),
                        );
                        false
                    }
                }
            }
        };

        self.presence.insert(device_id, present, self.cycle);
        Ok(present)
    }

    // ── Recording ────────────────────────────────────────────────────────────

    /// Record a finding attributed to the active device and rail.
    pub fn add_finding(
        &mut self,
        severity: Severity,
        code: &str,
        captured: Option<Vec<u8>>,
        message: impl Into<String>,
    ) {
        let mut finding = Finding::new(severity, code, self.device_id())
            .with_rail(self.rail_id().map(str::to_string))
            .with_message(message);
        finding.captured = captured;
        self.push_finding(finding);
    }

    pub fn push_finding(&mut self, finding: Finding) {
        self.collected.findings.push(finding);
    }

    pub fn findings(&self) -> &[Finding] {
        &self.collected.findings
    }

    /// Store captured register bytes as additional diagnostic data under
    /// `<device>_register_0x<REG>`.  Repeat captures of the same device and
    /// register, here or in an earlier environment of the run, get `_2`,
    /// `_3`, … suffixes.  Returns the key used.
    pub fn capture(&mut self, register: u8, bytes: &[u8]) -> String {
        let base = format!("{}_register_{register:#04X}", self.device_id());
        let taken = |key: &str| {
            self.collected.additional_data.contains_key(key)
                || self.earlier_captures.is_some_and(|earlier| earlier.contains_key(key))
        };
        let mut key = base.clone();
        let mut n = 1;
        while taken(key.as_str()) {
            n += 1;
            key = format!("{base}_{n}");
        }
        self.collected
            .additional_data
            .insert(key.clone(), regulators_types::format_bytes(bytes));
        key
    }

    pub fn additional_data(&self) -> &BTreeMap<String, String> {
        &self.collected.additional_data
    }

    /// Record a named sensor value for the active device and rail, and pass
    /// it on to the sensors service.
    pub fn record_sensor(&mut self, name: &str, sensor_type: SensorType, value: i64) {
        let reading = SensorReading {
            device_id: self.device_id().to_string(),
            rail_id: self.rail_id().map(str::to_string),
            name: name.to_string(),
            sensor_type,
            value,
        };
        self.collected.sensors.push(reading);
        if let Some(service) = &mut self.sensors_service {
            service.set_value(sensor_type, value);
        }
    }

    /// Tell the sensors service that `rail_id` of the active device is about
    /// to be monitored.
    pub fn start_rail_monitoring(&mut self, rail_id: &str) -> Result<(), RegulatorError> {
        if self.sensors_service.is_none() {
            return Ok(());
        }
        let device = self.device()?;
        let chassis = self.ids.chassis_of(device.id())?;
        if let Some(service) = &mut self.sensors_service {
            service.start_rail(rail_id, device.inventory_path(), chassis.inventory_path());
        }
        Ok(())
    }

    pub fn end_rail_monitoring(&mut self, error_occurred: bool) {
        if let Some(service) = &mut self.sensors_service {
            service.end_rail(error_occurred);
        }
    }

    /// Most recent value recorded under `name`.
    pub fn sensor_value(&self, name: &str) -> Option<i64> {
        self.collected
            .sensors
            .iter()
            .rev()
            .find(|reading| reading.name == name)
            .map(|reading| reading.value)
    }

    pub fn sensors(&self) -> &[SensorReading] {
        &self.collected.sensors
    }

    /// Consume the environment, returning what it recorded.
    pub fn finish(self) -> Collected {
        self.collected
    }
}

fn require_rail(device: &Device, rail_id: &str) -> Result<(), RegulatorError> {
    match device.rail(rail_id) {
        Some(_) => Ok(()),
        None => Err(RegulatorError::RailNotFound {
            device_id: device.id().to_string(),
            rail_id: rail_id.to_string(),
        }),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scope guard
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Restore {
    Scope(usize),
    RuleChain(usize),
    Volts(Option<f64>),
}

/// Restores the environment state it was created from when dropped.
///
/// Dereferences to the environment, so nested actions execute against the
/// guard directly: `actions.execute(&mut guard)`.
pub struct EnvGuard<'e, 'a> {
    env: &'e mut ActionEnvironment<'a>,
    restore: Restore,
}

impl<'a> Deref for EnvGuard<'_, 'a> {
    type Target = ActionEnvironment<'a>;

    fn deref(&self) -> &Self::Target {
        &*self.env
    }
}

impl DerefMut for EnvGuard<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.env
    }
}

impl Drop for EnvGuard<'_, '_> {
    fn drop(&mut self) {
        match self.restore {
            Restore::Scope(len) => self.env.scopes.truncate(len),
            Restore::RuleChain(len) => self.env.rule_chain.truncate(len),
            Restore::Volts(volts) => self.env.volts = volts,
        }
    }
}
