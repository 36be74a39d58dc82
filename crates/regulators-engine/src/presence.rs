//! Presence detection and its per-cycle cache.
//!
//! A device's [`PresenceDetection`] is an action list whose final result says
//! whether the hardware is physically there.  The answer is computed at most
//! once per top-level call: [`PresenceCache`] tags every entry with the
//! [`CycleId`] of the call that produced it, and an entry from another cycle
//! is treated as a miss.

use std::collections::HashMap;

use regulators_types::{CycleId, RegulatorError};

use crate::action::{Action, ActionList};
use crate::environment::ActionEnvironment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    present: bool,
    cycle: CycleId,
}

/// Device ID → last known presence, tagged with the cycle that computed it.
#[derive(Debug, Default)]
pub struct PresenceCache {
    entries: HashMap<String, Entry>,
}

impl PresenceCache {
    /// Presence computed during `cycle`, if any.
    pub fn get(&self, device_id: &str, cycle: CycleId) -> Option<bool> {
        self.entries
            .get(device_id)
            .filter(|entry| entry.cycle == cycle)
            .map(|entry| entry.present)
    }

    /// Most recent presence result regardless of cycle.
    pub fn last_known(&self, device_id: &str) -> Option<bool> {
        self.entries.get(device_id).map(|entry| entry.present)
    }

    pub fn insert(&mut self, device_id: &str, present: bool, cycle: CycleId) {
        self.entries
            .insert(device_id.to_string(), Entry { present, cycle });
    }
}

/// Action list determining whether a device is present.
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceDetection {
    actions: ActionList,
}

impl PresenceDetection {
    /// # Errors
    ///
    /// [`RegulatorError::ActionType`] when `actions` is empty.
    pub fn new(actions: Vec<Action>) -> Result<Self, RegulatorError> {
        Ok(Self {
            actions: ActionList::for_owner("presence_detection", actions)?,
        })
    }

    pub fn actions(&self) -> &[Action] {
        self.actions.actions()
    }

    /// Run the detection actions uncached.  Callers normally go through
    /// [`ActionEnvironment::resolve_presence`].
    pub fn execute(&self, env: &mut ActionEnvironment<'_>) -> Result<bool, RegulatorError> {
        self.actions.execute(env)
    }
}
