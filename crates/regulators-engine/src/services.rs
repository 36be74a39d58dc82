//! Collaborator interfaces the engine reports to.
//!
//! None is needed for correctness: the run report already holds
//! everything.  They let a host forward findings to a journal or error log,
//! publish presence to an inventory service, and expose monitored sensor
//! values.

use regulators_types::{Finding, SensorType, Severity};
use tracing::{error, info, warn};

/// Receives every finding as it is recorded.
pub trait FindingSink {
    fn record(&mut self, finding: &Finding);
}

/// Receives the presence result of each device after a run.
pub trait PresencePublisher {
    fn publish(&mut self, device_id: &str, inventory_path: &str, present: bool);
}

/// Receives sensor values while rails are monitored.
///
/// Each rail with sensor monitoring is bracketed by one `start_rail` and one
/// `end_rail` call, with a `set_value` for every sensor read in between.
pub trait SensorsService {
    fn start_rail(&mut self, rail_id: &str, device_inventory_path: &str, chassis_inventory_path: &str);
    fn set_value(&mut self, sensor_type: SensorType, value: i64);
    /// `error_occurred` is set when the rail's monitoring failed.
    fn end_rail(&mut self, error_occurred: bool);
}

/// Emits findings as `tracing` events at a level matching their severity.
/// Registered on every [`System`][crate::system::System] by default.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl FindingSink for TracingSink {
    fn record(&mut self, finding: &Finding) {
        let captured = finding.captured.as_deref().map(regulators_types::format_bytes);
        match finding.severity {
            Severity::Error | Severity::Critical => error!(
                severity = %finding.severity,
                code = %finding.code,
                device = %finding.device_id,
                rail = ?finding.rail_id,
                captured = ?captured,
                "{}",
                finding.message
            ),
            Severity::Warning => warn!(
                code = %finding.code,
                device = %finding.device_id,
                rail = ?finding.rail_id,
                captured = ?captured,
                "{}",
                finding.message
            ),
            Severity::Informational | Severity::Notice => info!(
                severity = %finding.severity,
                code = %finding.code,
                device = %finding.device_id,
                rail = ?finding.rail_id,
                "{}",
                finding.message
            ),
        }
    }
}
