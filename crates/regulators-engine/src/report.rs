//! Outcome of one top-level `configure()` or `monitor()` call.
//!
//! The calls themselves return nothing; callers inspect the [`RunReport`]
//! left behind to learn which devices were skipped, which failed and what
//! was recorded along the way.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use regulators_types::{CycleId, ErrorFrame, Finding, RegulatorError, SensorReading};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Configure,
    Monitor,
}

/// Per-device progress within one run.
///
/// ```text
/// NotStarted → PresenceResolved → Configuring | Monitoring → Done
///                    │                       │
///                    └──────► Errored ◄──────┘
/// ```
///
/// Absent devices go straight from `PresenceResolved` to `Done`.  `Done`
/// and `Errored` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    NotStarted,
    PresenceResolved,
    Configuring,
    Monitoring,
    Done,
    Errored,
}

impl DeviceState {
    pub fn can_advance_to(&self, next: DeviceState) -> bool {
        use DeviceState::*;
        matches!(
            (*self, next),
            (NotStarted, PresenceResolved)
                | (NotStarted, Errored)
                | (PresenceResolved, Configuring | Monitoring | Done | Errored)
                | (Configuring | Monitoring, Done | Errored)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeviceState::Done | DeviceState::Errored)
    }
}

/// One device's row in a [`RunReport`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRun {
    pub chassis_id: String,
    pub device_id: String,
    /// `None` until presence has been resolved.
    pub present: Option<bool>,
    pub state: DeviceState,
}

impl DeviceRun {
    pub fn new(chassis_id: &str, device_id: &str) -> Self {
        Self {
            chassis_id: chassis_id.to_string(),
            device_id: device_id.to_string(),
            present: None,
            state: DeviceState::NotStarted,
        }
    }

    /// Move to `next`.  Returns `false` and leaves the state unchanged when
    /// the transition is not allowed.
    pub fn advance(&mut self, next: DeviceState) -> bool {
        if self.state.can_advance_to(next) {
            self.state = next;
            true
        } else {
            false
        }
    }
}

/// An error caught at a device boundary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedError {
    pub chassis_id: String,
    pub device_id: String,
    pub rail_id: Option<String>,
    pub error: RegulatorError,
    /// Bytes the failing device captured before the error, keyed as in
    /// [`RunReport::additional_data`].
    pub additional_data: BTreeMap<String, String>,
}

impl RecordedError {
    /// The rail is taken from the outermost rail frame, or from the root
    /// error when it is a rail-scoped bus access.
    pub fn new(chassis_id: &str, device_id: &str, error: RegulatorError) -> Self {
        let framed = error.frames().into_iter().find_map(|frame| match frame {
            ErrorFrame::Rail(id) => Some(id.clone()),
            _ => None,
        });
        let rail_id = framed.or_else(|| match error.root() {
            RegulatorError::BusAccess { rail_id, .. } => rail_id.clone(),
            _ => None,
        });
        Self {
            chassis_id: chassis_id.to_string(),
            device_id: device_id.to_string(),
            rail_id,
            error,
            additional_data: BTreeMap::new(),
        }
    }

    pub fn with_additional_data(mut self, additional_data: BTreeMap<String, String>) -> Self {
        self.additional_data = additional_data;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Complete,
}

/// Everything one run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub kind: RunKind,
    pub cycle: CycleId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub devices: Vec<DeviceRun>,
    pub findings: Vec<Finding>,
    pub errors: Vec<RecordedError>,
    /// Register bytes captured by `capture_bytes`, keyed by
    /// `<device>_register_0x<REG>`.
    pub additional_data: BTreeMap<String, String>,
    pub sensors: Vec<SensorReading>,
}

impl RunReport {
    pub fn new(kind: RunKind, cycle: CycleId) -> Self {
        Self {
            kind,
            cycle,
            started_at: Utc::now(),
            finished_at: None,
            devices: Vec::new(),
            findings: Vec::new(),
            errors: Vec::new(),
            additional_data: BTreeMap::new(),
            sensors: Vec::new(),
        }
    }

    /// `Complete` once every device has reached a terminal state.
    pub fn status(&self) -> RunStatus {
        if self.devices.iter().all(|run| run.state.is_terminal()) {
            RunStatus::Complete
        } else {
            RunStatus::InProgress
        }
    }

    /// Whether the run completed without any recorded error.
    pub fn succeeded(&self) -> bool {
        self.status() == RunStatus::Complete && self.errors.is_empty()
    }

    pub fn device(&self, device_id: &str) -> Option<&DeviceRun> {
        self.devices.iter().find(|run| run.device_id == device_id)
    }

    pub fn findings_for<'r, 'd>(
        &'r self,
        device_id: &'d str,
    ) -> impl Iterator<Item = &'r Finding> + use<'r, 'd> {
        self.findings.iter().filter(move |f| f.device_id == device_id)
    }

    pub fn errors_for<'r, 'd>(
        &'r self,
        device_id: &'d str,
    ) -> impl Iterator<Item = &'r RecordedError> + use<'r, 'd> {
        self.errors.iter().filter(move |e| e.device_id == device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regulators_types::Severity;

    #[test]
    fn state_machine_transitions() {
        use DeviceState::*;
        assert!(NotStarted.can_advance_to(PresenceResolved));
        assert!(PresenceResolved.can_advance_to(Done));
        assert!(PresenceResolved.can_advance_to(Configuring));
        assert!(Monitoring.can_advance_to(Errored));
        assert!(!NotStarted.can_advance_to(Configuring));
        assert!(!Done.can_advance_to(Configuring));
        assert!(!Errored.can_advance_to(Done));
        assert!(Done.is_terminal() && Errored.is_terminal());
        assert!(!Configuring.is_terminal());
    }

    #[test]
    fn illegal_advance_is_refused() {
        let mut run = DeviceRun::new("chassis0", "vdd1");
        assert!(!run.advance(DeviceState::Done));
        assert_eq!(run.state, DeviceState::NotStarted);
        assert!(run.advance(DeviceState::PresenceResolved));
        assert!(run.advance(DeviceState::Done));
    }

    #[test]
    fn status_is_complete_only_when_all_devices_terminal() {
        let mut report = RunReport::new(RunKind::Configure, CycleId::new());
        assert_eq!(report.status(), RunStatus::Complete);

        report.devices.push(DeviceRun::new("chassis0", "vdd1"));
        assert_eq!(report.status(), RunStatus::InProgress);

        report.devices[0].advance(DeviceState::PresenceResolved);
        report.devices[0].advance(DeviceState::Errored);
        assert_eq!(report.status(), RunStatus::Complete);
        assert!(report.succeeded());

        report.errors.push(RecordedError::new(
            "chassis0",
            "vdd1",
            RegulatorError::RuleNotFound { rule_id: "r".into() },
        ));
        assert!(!report.succeeded());
    }

    #[test]
    fn recorded_error_finds_rail() {
        let err = RegulatorError::bus_access("vdd1", Some("vout"), 0x10, "NACK")
            .within(ErrorFrame::Device("vdd1".into()));
        assert_eq!(RecordedError::new("c", "vdd1", err).rail_id.as_deref(), Some("vout"));

        let err = RegulatorError::RuleNotFound { rule_id: "r".into() }
            .within(ErrorFrame::Rail("vccin".into()))
            .within(ErrorFrame::Device("vdd1".into()));
        assert_eq!(RecordedError::new("c", "vdd1", err).rail_id.as_deref(), Some("vccin"));
    }

    #[test]
    fn filtered_findings_outlive_the_queried_id() {
        let mut report = RunReport::new(RunKind::Monitor, CycleId::new());
        report.findings.push(Finding::new(Severity::Warning, "a", "vdd1"));
        let found: Vec<&Finding> = {
            let id = String::from("vdd1");
            report.findings_for(&id).collect()
        };
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn filters_by_device() {
        let mut report = RunReport::new(RunKind::Monitor, CycleId::new());
        report.findings.push(Finding::new(Severity::Warning, "a", "vdd1"));
        report.findings.push(Finding::new(Severity::Warning, "b", "vdd2"));
        let codes: Vec<_> = report.findings_for("vdd2").map(|f| f.code.as_str()).collect();
        assert_eq!(codes, ["b"]);
        assert_eq!(report.errors_for("vdd1").count(), 0);
    }

    #[test]
    fn serializes_with_snake_case_states() {
        let mut report = RunReport::new(RunKind::Configure, CycleId::new());
        report.devices.push(DeviceRun::new("chassis0", "vdd1"));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["kind"], "configure");
        assert_eq!(json["devices"][0]["state"], "not_started");
    }
}
