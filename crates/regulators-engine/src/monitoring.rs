//! Sensor monitoring and consecutive-error debouncing.
//!
//! Monitoring runs repeatedly, so a flaky bus would flood the finding sinks
//! if every failure were reported.  [`ErrorHistory`] counts consecutive
//! failures of one device: failures below the maximum are reported as
//! warnings, the failure that reaches it is reported once as an error, and
//! later ones are suppressed until a clean pass clears the history.

use regulators_types::{RegulatorError, Severity};

use crate::action::{Action, ActionList};
use crate::environment::ActionEnvironment;

/// Consecutive monitoring failures tolerated before one is escalated.
pub const DEFAULT_MAX_MONITOR_ERROR_COUNT: usize = 6;

/// Actions that read sensors and log anomalies for a device or rail.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorMonitoring {
    actions: ActionList,
}

impl SensorMonitoring {
    /// # Errors
    ///
    /// [`RegulatorError::ActionType`] when `actions` is empty.
    pub fn new(actions: Vec<Action>) -> Result<Self, RegulatorError> {
        Ok(Self {
            actions: ActionList::for_owner("sensor_monitoring", actions)?,
        })
    }

    pub fn actions(&self) -> &[Action] {
        self.actions.actions()
    }

    pub fn execute(&self, env: &mut ActionEnvironment<'_>) -> Result<bool, RegulatorError> {
        self.actions.execute(env)
    }
}

/// What to do with one more monitoring failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Below the maximum: report at warning severity.
    Warn,
    /// The maximum was just reached: report once at error severity.
    Log,
    /// Already reported: record in the run report only.
    Suppress,
}

impl Escalation {
    /// Severity of the finding to emit, if any.
    pub fn severity(&self) -> Option<Severity> {
        match self {
            Escalation::Warn => Some(Severity::Warning),
            Escalation::Log => Some(Severity::Error),
            Escalation::Suppress => None,
        }
    }
}

/// Consecutive monitoring failures of one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorHistory {
    pub count: usize,
    pub was_logged: bool,
}

impl ErrorHistory {
    /// Count one more failure and decide how to report it.
    pub fn record_failure(&mut self, max: usize) -> Escalation {
        self.count = self.count.saturating_add(1);
        if self.was_logged {
            Escalation::Suppress
        } else if self.count >= max {
            self.was_logged = true;
            Escalation::Log
        } else {
            Escalation::Warn
        }
    }
}
