//! Configuration attached to a device or rail.

use regulators_types::RegulatorError;

use crate::action::{Action, ActionList};
use crate::environment::ActionEnvironment;

/// Actions that configure hardware, with an optional output voltage that
/// `pmbus_write_vout_command` picks up when it has none of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    volts: Option<f64>,
    actions: ActionList,
}

impl Configuration {
    /// # Errors
    ///
    /// [`RegulatorError::ActionType`] when `actions` is empty.
    pub fn new(volts: Option<f64>, actions: Vec<Action>) -> Result<Self, RegulatorError> {
        Ok(Self {
            volts,
            actions: ActionList::for_owner("configuration", actions)?,
        })
    }

    pub fn volts(&self) -> Option<f64> {
        self.volts
    }

    pub fn actions(&self) -> &[Action] {
        self.actions.actions()
    }

    pub fn execute(&self, env: &mut ActionEnvironment<'_>) -> Result<bool, RegulatorError> {
        let mut scoped = env.with_volts(self.volts);
        self.actions.execute(&mut scoped)
    }
}
