//! [`System`] – root of the hierarchy and the two top-level operations.
//!
//! `configure()` and `monitor()` walk every chassis and device in order.
//! For each device the walk resolves presence, skips absent hardware
//! entirely, and otherwise runs the device's configuration (or monitoring)
//! followed by each rail's.  Errors are caught at the device boundary only:
//! they are recorded in the [`RunReport`], the device is marked `Errored`,
//! and the walk moves on.  Neither call returns an error; inspect
//! [`System::last_report`] afterwards.

use std::collections::HashMap;

use chrono::Utc;
use regulators_types::{CycleId, ErrorFrame, Finding, RegulatorError, Severity};
use tracing::{debug, info, info_span, warn};

use crate::chassis::Chassis;
use crate::config::EngineConfig;
use crate::device::Device;
use crate::environment::ActionEnvironment;
use crate::id_map::IdMap;
use crate::monitoring::ErrorHistory;
use crate::presence::PresenceCache;
use crate::report::{DeviceRun, DeviceState, RecordedError, RunKind, RunReport};
use crate::rule::Rule;
use crate::services::{FindingSink, PresencePublisher, SensorsService, TracingSink};

/// The managed estate: chassis, rules, and the state carried between runs.
pub struct System {
    rules: Vec<Rule>,
    chassis: Vec<Chassis>,
    config: EngineConfig,
    presence: PresenceCache,
    error_history: HashMap<String, ErrorHistory>,
    last_report: Option<RunReport>,
    finding_sinks: Vec<Box<dyn FindingSink>>,
    presence_publishers: Vec<Box<dyn PresencePublisher>>,
    sensors_service: Option<Box<dyn SensorsService>>,
}

impl System {
    /// Build a system with default settings and a [`TracingSink`].
    ///
    /// # Errors
    ///
    /// [`RegulatorError::DuplicateId`] when chassis, device, rail or rule
    /// IDs collide.
    pub fn new(rules: Vec<Rule>, chassis: Vec<Chassis>) -> Result<Self, RegulatorError> {
        IdMap::validate(&chassis, &rules)?;
        Ok(Self {
            rules,
            chassis,
            config: EngineConfig::default(),
            presence: PresenceCache::default(),
            error_history: HashMap::new(),
            last_report: None,
            finding_sinks: vec![Box::new(TracingSink)],
            presence_publishers: Vec::new(),
            sensors_service: None,
        })
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn add_finding_sink(&mut self, sink: Box<dyn FindingSink>) {
        self.finding_sinks.push(sink);
    }

    pub fn add_presence_publisher(&mut self, publisher: Box<dyn PresencePublisher>) {
        self.presence_publishers.push(publisher);
    }

    /// Report monitored rails and their sensor values to `service`,
    /// replacing any service set before.
    pub fn set_sensors_service(&mut self, service: Box<dyn SensorsService>) {
        self.sensors_service = Some(service);
    }

    // ── Top-level operations ─────────────────────────────────────────────────

    /// Configure every present device and its rails.
    pub fn configure(&mut self) {
        self.run(RunKind::Configure);
    }

    /// Run sensor monitoring on every present device and its rails.
    pub fn monitor(&mut self) {
        self.run(RunKind::Monitor);
    }

    fn run(&mut self, kind: RunKind) {
        let cycle = CycleId::new();
        let span = info_span!("regulators_run", ?kind, %cycle);
        let _enter = span.enter();

        let mut report = RunReport::new(kind, cycle);
        let ids = IdMap::new(&self.chassis, &self.rules);

        for chassis in &self.chassis {
            for device in chassis.devices() {
                let mut run = DeviceRun::new(chassis.id(), device.id());
                let mut env = ActionEnvironment::new(
                    &ids,
                    &mut self.presence,
                    cycle,
                    device.id(),
                    self.config.max_rule_depth,
                )
                .with_earlier_captures(&report.additional_data);
                if let Some(service) = self.sensors_service.as_deref_mut() {
                    env = env.with_sensors_service(service);
                }
                let outcome = visit_device(kind, device, &mut env, &mut run);

                let collected = env.finish();
                report.findings.extend(collected.findings);
                report
                    .additional_data
                    .extend(collected.additional_data.iter().map(|(k, v)| (k.clone(), v.clone())));
                report.sensors.extend(collected.sensors);

                match outcome {
                    Ok(()) => {
                        if kind == RunKind::Monitor && run.present == Some(true) {
                            self.error_history.remove(device.id());
                        }
                    }
                    Err(err) => {
                        run.advance(DeviceState::Errored);
                        let severity = match kind {
                            RunKind::Configure => Some(Severity::Error),
                            RunKind::Monitor => self
                                .error_history
                                .entry(device.id().to_string())
                                .or_default()
                                .record_failure(self.config.max_monitor_error_count)
                                .severity(),
                        };
                        warn!(
                            chassis = chassis.id(),
                            device = device.id(),
                            code = err.code(),
                            error = %err,
                            additional_data = ?collected.additional_data,
                            "device failed; continuing with next device"
                        );
                        let recorded = RecordedError::new(chassis.id(), device.id(), err)
                            .with_additional_data(collected.additional_data);
                        if let Some(severity) = severity {
                            report.findings.push(
                                Finding::new(severity, recorded.error.code(), device.id())
                                    .with_rail(recorded.rail_id.clone())
                                    .with_message(recorded.error.to_string()),
                            );
                        }
                        report.errors.push(recorded);
                    }
                }
                report.devices.push(run);
            }
        }

        for finding in &report.findings {
            for sink in &mut self.finding_sinks {
                sink.record(finding);
            }
        }
        for device in self.chassis.iter().flat_map(Chassis::devices) {
            if let Some(present) = self.presence.get(device.id(), cycle) {
                for publisher in &mut self.presence_publishers {
                    publisher.publish(device.id(), device.inventory_path(), present);
                }
            }
        }

        report.finished_at = Some(Utc::now());
        info!(
            devices = report.devices.len(),
            errors = report.errors.len(),
            findings = report.findings.len(),
            status = ?report.status(),
            "run complete"
        );
        self.last_report = Some(report);
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn chassis(&self) -> &[Chassis] {
        &self.chassis
    }

    pub fn chassis_by_id(&self, chassis_id: &str) -> Option<&Chassis> {
        self.chassis.iter().find(|c| c.id() == chassis_id)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, rule_id: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.id() == rule_id)
    }

    pub fn device(&self, device_id: &str) -> Option<&Device> {
        self.chassis.iter().find_map(|c| c.device(device_id))
    }

    /// Presence of `device_id` as last resolved by any run.
    pub fn presence(&self, device_id: &str) -> Option<bool> {
        self.presence.last_known(device_id)
    }

    pub fn last_report(&self) -> Option<&RunReport> {
        self.last_report.as_ref()
    }

    /// Findings the last run recorded for `device_id`.
    pub fn findings_for(&self, device_id: &str) -> Vec<&Finding> {
        self.last_report
            .as_ref()
            .map(|report| report.findings_for(device_id).collect())
            .unwrap_or_default()
    }

    /// Errors the last run recorded for `device_id`.
    pub fn errors_for(&self, device_id: &str) -> Vec<&RecordedError> {
        self.last_report
            .as_ref()
            .map(|report| report.errors_for(device_id).collect())
            .unwrap_or_default()
    }

    /// Consecutive monitoring failures recorded for `device_id`.
    pub fn error_history(&self, device_id: &str) -> ErrorHistory {
        self.error_history.get(device_id).copied().unwrap_or_default()
    }

    pub fn clear_error_history(&mut self) {
        self.error_history.clear();
    }

    /// Close every device's bus interface.  Failures are logged and do not
    /// stop the remaining devices from being closed.
    pub fn close_devices(&mut self) {
        for chassis in &mut self.chassis {
            for device in chassis.devices_mut() {
                if let Err(err) = device.close() {
                    warn!(device = device.id(), error = %err, "unable to close device");
                }
            }
        }
    }
}

/// Drive one device through the per-run state machine.
fn visit_device(
    kind: RunKind,
    device: &Device,
    env: &mut ActionEnvironment<'_>,
    run: &mut DeviceRun,
) -> Result<(), RegulatorError> {
    let present = env
        .resolve_presence(device.id())
        .map_err(|err| err.within(ErrorFrame::Device(device.id().to_string())))?;
    run.present = Some(present);
    run.advance(DeviceState::PresenceResolved);

    if !present {
        debug!(device = device.id(), "device not present; skipping");
        run.advance(DeviceState::Done);
        return Ok(());
    }

    match kind {
        RunKind::Configure => {
            run.advance(DeviceState::Configuring);
            debug!(device = device.id(), "configuring device");
            device.configure(env)?;
        }
        RunKind::Monitor => {
            run.advance(DeviceState::Monitoring);
            debug!(device = device.id(), "monitoring device");
            device.monitor(env)?;
        }
    }
    run.advance(DeviceState::Done);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::action::{Action, LogFinding};
    use crate::configuration::Configuration;
    use crate::monitoring::SensorMonitoring;
    use crate::presence::PresenceDetection;
    use crate::rail::Rail;
    use crate::register::{CaptureBytes, CompareOp, CompareRegister, Operand, ReadSensor, RegisterFormat};
    use crate::report::RunStatus;
    use crate::test_utils::{SensorLog, always_false, compare_u8, sim_bus, sim_device, system_of, write_u8};
    use regulators_hal::sim::{BusOp, SimFault};
    use regulators_types::SensorType;

    fn configured(id: &str, bus: &regulators_hal::SimBus, register: u8) -> Device {
        sim_device(id, bus).with_configuration(Configuration::new(None, vec![write_u8(register, 0x80)]).unwrap())
    }

    fn monitored(id: &str, bus: &regulators_hal::SimBus) -> Device {
        let capture = CaptureBytes::new(0x79, 2).unwrap();
        sim_device(id, bus).with_monitoring(SensorMonitoring::new(vec![capture.into()]).unwrap())
    }

    #[derive(Clone, Default)]
    struct Recorder {
        findings: Rc<RefCell<Vec<Finding>>>,
        presence: Rc<RefCell<Vec<(String, String, bool)>>>,
    }

    impl FindingSink for Recorder {
        fn record(&mut self, finding: &Finding) {
            self.findings.borrow_mut().push(finding.clone());
        }
    }

    impl PresencePublisher for Recorder {
        fn publish(&mut self, device_id: &str, inventory_path: &str, present: bool) {
            self.presence
                .borrow_mut()
                .push((device_id.to_string(), inventory_path.to_string(), present));
        }
    }

    #[test]
    fn failing_device_does_not_stop_the_next() {
        let bus_a = sim_bus();
        let bus_b = sim_bus();
        bus_a.fail_register(0x01, SimFault::Nack);
        let mut system = system_of(vec![configured("vdd_a", &bus_a, 0x01), configured("vdd_b", &bus_b, 0x01)], vec![]);

        system.configure();

        assert_eq!(bus_b.register(0x01), Some(vec![0x80]));
        let report = system.last_report().unwrap();
        assert_eq!(report.status(), RunStatus::Complete);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].device_id, "vdd_a");
        assert_eq!(report.errors[0].error.device_id(), Some("vdd_a"));
        assert_eq!(report.errors[0].error.code(), "bus_access_error");
        assert_eq!(report.device("vdd_a").unwrap().state, DeviceState::Errored);
        assert_eq!(report.device("vdd_b").unwrap().state, DeviceState::Done);

        let findings = system.findings_for("vdd_a");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Error);
    }

    #[test]
    fn absent_device_receives_no_writes() {
        let bus = sim_bus();
        let absent = PresenceDetection::new(vec![always_false()]).unwrap();
        let device = configured("vdd1", &bus, 0x01)
            .with_presence_detection(absent)
            .with_rail(Rail::new("vout").with_configuration(Configuration::new(None, vec![write_u8(0x02, 1)]).unwrap()));
        let mut system = system_of(vec![device], vec![]);

        system.configure();

        assert!(bus.writes().is_empty());
        let run = system.last_report().unwrap().device("vdd1").unwrap().clone();
        assert_eq!(run.present, Some(false));
        assert_eq!(run.state, DeviceState::Done);
        assert_eq!(system.presence("vdd1"), Some(false));
    }

    #[test]
    fn device_without_presence_detection_is_present() {
        let bus = sim_bus();
        let mut system = system_of(vec![configured("vdd1", &bus, 0x01)], vec![]);
        system.configure();
        assert_eq!(system.presence("vdd1"), Some(true));
        assert_eq!(bus.writes().len(), 1);
    }

    #[test]
    fn presence_is_resolved_once_per_cycle_and_again_next_cycle() {
        let bus1 = sim_bus();
        let bus2 = sim_bus().with_register(0x00, vec![1]);
        let detection = PresenceDetection::new(vec![compare_u8(0x00, CompareOp::Equal, 1)]).unwrap();
        // vdd1's configuration asks about vdd2 before vdd2 is visited.
        let asks_for_vdd2 = Configuration::new(None, vec![Action::compare_presence("vdd2", true)]).unwrap();
        let mut system = system_of(
            vec![
                sim_device("vdd1", &bus1).with_configuration(asks_for_vdd2),
                configured("vdd2", &bus2, 0x01).with_presence_detection(detection),
            ],
            vec![],
        );

        system.configure();
        assert_eq!(bus2.read_count(0x00), 1);
        assert_eq!(bus2.register(0x01), Some(vec![0x80]));

        system.configure();
        assert_eq!(bus2.read_count(0x00), 2);
    }

    #[test]
    fn configure_is_idempotent() {
        let bus = sim_bus().with_register(0x00, vec![1]);
        let detection = PresenceDetection::new(vec![compare_u8(0x00, CompareOp::Equal, 1)]).unwrap();
        let device = sim_device("vdd1", &bus)
            .with_presence_detection(detection)
            .with_configuration(Configuration::new(None, vec![write_u8(0x01, 0x80), write_u8(0x02, 0x40)]).unwrap())
            .with_rail(Rail::new("vout").with_configuration(Configuration::new(None, vec![write_u8(0x03, 0x20)]).unwrap()));
        let mut system = system_of(vec![device], vec![]);

        system.configure();
        let first_writes = bus.writes();
        let first_presence = system.presence("vdd1");
        bus.clear_ops();

        system.configure();
        assert_eq!(bus.writes(), first_writes);
        assert_eq!(system.presence("vdd1"), first_presence);
        assert_eq!(first_writes.len(), 3);
    }

    #[test]
    fn compare_register_drives_configuration() {
        let bus = sim_bus().with_register(0x10, vec![150]);
        let check = CompareRegister::new(0x10, RegisterFormat::U8, CompareOp::Greater, Operand::Literal(100)).unwrap();
        let config = Configuration::new(
            None,
            vec![Action::if_then(check.into(), vec![write_u8(0x01, 0xAA)], vec![write_u8(0x01, 0xBB)]).unwrap()],
        )
        .unwrap();
        let mut system = system_of(vec![sim_device("vdd1", &bus).with_configuration(config)], vec![]);

        system.configure();
        assert_eq!(bus.register(0x01), Some(vec![0xAA]));

        bus.set_register(0x10, vec![50]);
        system.configure();
        assert_eq!(bus.register(0x01), Some(vec![0xBB]));

        bus.fail_register(0x10, SimFault::Nack);
        system.configure();
        let report = system.last_report().unwrap();
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(
            report.errors[0].error.root(),
            RegulatorError::BusAccess { device_id, register: 0x10, .. } if device_id == "vdd1"
        ));
    }

    #[test]
    fn rule_errors_name_the_whole_chain() {
        let bus = sim_bus();
        bus.fail_register(0x21, SimFault::Timeout);
        let rules = vec![Rule::new("set_vout", vec![write_u8(0x21, 0x00)]).unwrap()];
        let rail = Rail::new("vout").with_configuration(Configuration::new(None, vec![Action::run_rule("set_vout")]).unwrap());
        let mut system = system_of(vec![sim_device("vdd1", &bus).with_rail(rail)], rules);

        system.configure();
        let recorded = &system.last_report().unwrap().errors[0];
        assert_eq!(recorded.rail_id.as_deref(), Some("vout"));
        let frames = recorded.error.frames();
        assert_eq!(frames[0], &ErrorFrame::Device("vdd1".into()));
        assert_eq!(frames[1], &ErrorFrame::Rail("vout".into()));
        assert_eq!(frames[2], &ErrorFrame::Rule("set_vout".into()));
        assert!(matches!(frames[3], ErrorFrame::Action(desc) if desc.starts_with("write_register")));
    }

    #[test]
    fn monitoring_errors_are_debounced() {
        let bus = sim_bus();
        bus.fail_register(0x79, SimFault::Nack);
        let mut system = system_of(vec![monitored("vdd1", &bus)], vec![]);

        let mut severities = Vec::new();
        for _ in 0..7 {
            system.monitor();
            let report = system.last_report().unwrap();
            assert_eq!(report.errors.len(), 1);
            severities.push(report.findings.first().map(|f| f.severity));
        }
        assert_eq!(&severities[..5], &[Some(Severity::Warning); 5]);
        assert_eq!(severities[5], Some(Severity::Error));
        assert_eq!(severities[6], None);
        assert_eq!(system.error_history("vdd1").count, 7);
        assert!(system.error_history("vdd1").was_logged);

        bus.clear_faults();
        system.monitor();
        assert!(system.last_report().unwrap().succeeded());
        assert_eq!(system.error_history("vdd1"), ErrorHistory::default());
    }

    #[test]
    fn monitoring_collects_captures_and_sensors() {
        let bus = sim_bus()
            .with_register(0x79, vec![0x02, 0x08])
            .with_register(0x8B, vec![0x00, 0x02]);
        let read = ReadSensor::new(0x8B, RegisterFormat::U16, SensorType::Vout, "vout").unwrap();
        let rail = Rail::new("vout").with_monitoring(SensorMonitoring::new(vec![read.into()]).unwrap());
        let mut system = system_of(vec![monitored("vdd1", &bus).with_rail(rail)], vec![]);

        system.monitor();
        let report = system.last_report().unwrap();
        assert_eq!(report.additional_data["vdd1_register_0x79"], "[ 0x02, 0x08 ]");
        assert_eq!(report.sensors.len(), 1);
        assert_eq!(report.sensors[0].rail_id.as_deref(), Some("vout"));
        assert_eq!(report.sensors[0].value, 0x0200);
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn configure_records_every_failure_at_error_severity() {
        let bus = sim_bus();
        bus.fail_register(0x01, SimFault::Nack);
        let mut system = system_of(vec![configured("vdd1", &bus, 0x01)], vec![]);
        system
            .error_history
            .insert("vdd1".into(), ErrorHistory { count: 10, was_logged: true });
        for _ in 0..3 {
            system.configure();
            assert_eq!(system.findings_for("vdd1")[0].severity, Severity::Error);
        }
        system.clear_error_history();
        assert_eq!(system.error_history("vdd1").count, 0);
    }

    #[test]
    fn sinks_and_publishers_receive_results() {
        let bus1 = sim_bus();
        let bus2 = sim_bus();
        let log = LogFinding::new(Severity::Notice, "vout_trimmed", "trim applied");
        let device1 = sim_device("vdd1", &bus1).with_configuration(Configuration::new(None, vec![log.into()]).unwrap());
        let absent = PresenceDetection::new(vec![always_false()]).unwrap();
        let device2 = sim_device("vdd2", &bus2).with_presence_detection(absent);
        let mut system = system_of(vec![device1, device2], vec![]);

        let recorder = Recorder::default();
        system.add_finding_sink(Box::new(recorder.clone()));
        system.add_presence_publisher(Box::new(recorder.clone()));
        system.configure();

        let findings = recorder.findings.borrow();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].code, "vout_trimmed");

        let presence = recorder.presence.borrow();
        assert_eq!(presence.len(), 2);
        assert_eq!(presence[0].0, "vdd1");
        assert!(presence[0].2);
        assert_eq!(presence[1], ("vdd2".into(), "/xyz/openbmc_project/inventory/system/chassis0/vdd2".into(), false));
    }

    #[test]
    fn duplicate_ids_are_rejected_at_construction() {
        let bus = sim_bus();
        let chassis = vec![Chassis::new("c0", "/c0", vec![sim_device("vdd1", &bus), sim_device("vdd1", &bus)])];
        let err = System::new(vec![], chassis).err().unwrap();
        assert_eq!(err.code(), "duplicate_id_error");
    }

    #[test]
    fn rule_depth_comes_from_config() {
        let bus = sim_bus();
        let rules = vec![
            Rule::new("outer", vec![Action::run_rule("inner")]).unwrap(),
            Rule::new("inner", vec![write_u8(0x01, 0x01)]).unwrap(),
        ];
        let config = Configuration::new(None, vec![Action::run_rule("outer")]).unwrap();
        let mut system = system_of(vec![sim_device("vdd1", &bus).with_configuration(config)], rules).with_config(
            EngineConfig {
                max_rule_depth: 1,
                ..EngineConfig::default()
            },
        );
        system.configure();
        let report = system.last_report().unwrap();
        assert_eq!(report.errors[0].error.code(), "rule_recursion_error");
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn queries_by_id() {
        let bus = sim_bus();
        let rules = vec![Rule::new("r", vec![write_u8(0x01, 0x01)]).unwrap()];
        let system = system_of(vec![sim_device("vdd1", &bus)], rules);
        assert!(system.device("vdd1").is_some());
        assert!(system.device("vdd9").is_none());
        assert!(system.rule("r").is_some());
        assert_eq!(system.chassis_by_id("chassis0").unwrap().devices().len(), 1);
        assert!(system.last_report().is_none());
        assert!(system.findings_for("vdd1").is_empty());
        assert_eq!(system.presence("vdd1"), None);
    }

    #[test]
    fn close_devices_closes_opened_interfaces() {
        let bus = sim_bus();
        let mut system = system_of(vec![configured("vdd1", &bus, 0x01)], vec![]);
        system.configure();
        system.close_devices();
        assert_eq!(bus.ops().first(), Some(&BusOp::Open));
        assert_eq!(bus.ops().last(), Some(&BusOp::Close));
    }

    #[test]
    fn captures_from_different_devices_keep_distinct_keys() {
        let bus1 = sim_bus();
        let bus2 = sim_bus().with_register(0x10, vec![0xAA]);
        let capture = || Action::from(CaptureBytes::new(0x10, 1).unwrap());
        let remote = Action::set_device("vdd2", None, vec![capture()]).unwrap();
        let mut system = system_of(
            vec![
                sim_device("vdd1", &bus1).with_configuration(Configuration::new(None, vec![remote]).unwrap()),
                sim_device("vdd2", &bus2).with_configuration(Configuration::new(None, vec![capture()]).unwrap()),
            ],
            vec![],
        );

        system.configure();
        let data = &system.last_report().unwrap().additional_data;
        assert_eq!(bus2.read_count(0x10), 2);
        assert_eq!(data.len(), 2);
        assert_eq!(data["vdd2_register_0x10"], "[ 0xAA ]");
        assert_eq!(data["vdd2_register_0x10_2"], "[ 0xAA ]");
    }

    #[test]
    fn recorded_error_carries_the_device_captures() {
        let bus1 = sim_bus().with_register(0x79, vec![0x02, 0x08]);
        bus1.fail_register(0x01, SimFault::Nack);
        let bus2 = sim_bus().with_register(0x79, vec![0x00, 0x00]);
        let steps = || vec![CaptureBytes::new(0x79, 2).unwrap().into(), write_u8(0x01, 0x80)];
        let mut system = system_of(
            vec![
                sim_device("vdd1", &bus1).with_configuration(Configuration::new(None, steps()).unwrap()),
                sim_device("vdd2", &bus2).with_configuration(Configuration::new(None, steps()).unwrap()),
            ],
            vec![],
        );

        system.configure();
        let errors = system.errors_for("vdd1");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].additional_data.len(), 1);
        assert_eq!(errors[0].additional_data["vdd1_register_0x79"], "[ 0x02, 0x08 ]");
        assert!(system.errors_for("vdd2").is_empty());
        assert_eq!(system.last_report().unwrap().additional_data.len(), 2);
    }

    #[test]
    fn monitor_reports_rails_to_the_sensors_service() {
        let bus = sim_bus().with_register(0x8C, vec![0x0A, 0x00]);
        let read = ReadSensor::new(0x8C, RegisterFormat::U16, SensorType::Iout, "iout").unwrap();
        let rail = Rail::new("vdd").with_monitoring(SensorMonitoring::new(vec![read.into()]).unwrap());
        let mut system = system_of(vec![sim_device("vdd1", &bus).with_rail(rail)], vec![]);
        let log = SensorLog::default();
        system.set_sensors_service(Box::new(log.clone()));

        system.monitor();
        bus.fail_register(0x8C, SimFault::Timeout);
        system.monitor();
        system.configure();

        let start = "start vdd /xyz/openbmc_project/inventory/system/chassis0/vdd1 \
                     /xyz/openbmc_project/inventory/system/chassis0";
        assert_eq!(log.lines(), [start, "set iout 10", "end false", start, "end true"]);
        assert_eq!(system.last_report().unwrap().sensors.len(), 0);
    }

    #[test]
    fn presence_detection_ignores_the_asking_rule_chain() {
        let bus1 = sim_bus();
        let bus2 = sim_bus().with_register(0x00, vec![1]);
        let rules = vec![
            Rule::new("outer", vec![Action::run_rule("mid")]).unwrap(),
            Rule::new("mid", vec![Action::compare_presence("vdd2", true)]).unwrap(),
            Rule::new("id_check", vec![compare_u8(0x00, CompareOp::Equal, 1)]).unwrap(),
        ];
        let detection = PresenceDetection::new(vec![Action::run_rule("id_check")]).unwrap();
        let mut system = system_of(
            vec![
                sim_device("vdd1", &bus1)
                    .with_configuration(Configuration::new(None, vec![Action::run_rule("outer")]).unwrap()),
                configured("vdd2", &bus2, 0x01).with_presence_detection(detection),
            ],
            rules,
        )
        .with_config(EngineConfig {
            max_rule_depth: 2,
            ..EngineConfig::default()
        });

        system.configure();
        assert_eq!(system.presence("vdd2"), Some(true));
        assert_eq!(bus2.register(0x01), Some(vec![0x80]));
        let report = system.last_report().unwrap();
        assert!(report.succeeded());
        assert!(report.findings.is_empty());
    }
}
