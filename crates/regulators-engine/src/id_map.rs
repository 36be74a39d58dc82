//! [`IdMap`] – ID-based lookup over the object hierarchy.
//!
//! Actions never hold references to rules or devices; they carry IDs and
//! resolve them here at execution time.  This keeps mutually-invoking rules
//! free of reference cycles and lets a rule authored once be shared by many
//! devices and rails.

use std::collections::{HashMap, HashSet};

use regulators_types::RegulatorError;

use crate::chassis::Chassis;
use crate::device::Device;
use crate::rule::Rule;

/// Borrowed index of every device and rule in a system, keyed by ID.
pub struct IdMap<'a> {
    devices: HashMap<&'a str, &'a Device>,
    owners: HashMap<&'a str, &'a Chassis>,
    rules: HashMap<&'a str, &'a Rule>,
}

impl<'a> IdMap<'a> {
    /// Index `chassis` and `rules`.  Later duplicates shadow earlier ones;
    /// call [`IdMap::validate`] first to reject them.
    pub fn new(chassis: &'a [Chassis], rules: &'a [Rule]) -> Self {
        let devices = chassis
            .iter()
            .flat_map(|c| c.devices())
            .map(|d| (d.id(), d))
            .collect();
        let owners = chassis
            .iter()
            .flat_map(|c| c.devices().iter().map(move |d| (d.id(), c)))
            .collect();
        let rules = rules.iter().map(|r| (r.id(), r)).collect();
        Self {
            devices,
            owners,
            rules,
        }
    }

    /// Check the uniqueness invariants the lookups rely on: chassis IDs,
    /// device IDs (system-wide), rail IDs within each device, and rule IDs.
    ///
    /// # Errors
    ///
    /// Returns [`RegulatorError::DuplicateId`] naming the first repeated ID.
    pub fn validate(chassis: &[Chassis], rules: &[Rule]) -> Result<(), RegulatorError> {
        unique("chassis", chassis.iter().map(Chassis::id))?;
        unique("device", chassis.iter().flat_map(|c| c.devices()).map(Device::id))?;
        for device in chassis.iter().flat_map(|c| c.devices()) {
            unique("rail", device.rails().iter().map(|r| r.id()))?;
        }
        unique("rule", rules.iter().map(Rule::id))
    }

    /// # Errors
    ///
    /// [`RegulatorError::DeviceNotFound`] when no device has this ID.
    pub fn device(&self, device_id: &str) -> Result<&'a Device, RegulatorError> {
        self.devices
            .get(device_id)
            .copied()
            .ok_or_else(|| RegulatorError::DeviceNotFound {
                device_id: device_id.to_string(),
            })
    }

    /// The chassis holding `device_id`.
    pub fn chassis_of(&self, device_id: &str) -> Result<&'a Chassis, RegulatorError> {
        self.owners
            .get(device_id)
            .copied()
            .ok_or_else(|| RegulatorError::DeviceNotFound {
                device_id: device_id.to_string(),
            })
    }

    /// # Errors
    ///
    /// [`RegulatorError::RuleNotFound`] when no rule has this ID.
    pub fn rule(&self, rule_id: &str) -> Result<&'a Rule, RegulatorError> {
        self.rules
            .get(rule_id)
            .copied()
            .ok_or_else(|| RegulatorError::RuleNotFound {
                rule_id: rule_id.to_string(),
            })
    }
}

fn unique<'i>(kind: &str, ids: impl Iterator<Item = &'i str>) -> Result<(), RegulatorError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(RegulatorError::DuplicateId {
                kind: kind.to_string(),
                id: id.to_string(),
            });
        }
    }
    Ok(())
}
