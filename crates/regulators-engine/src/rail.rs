//! [`Rail`] – one voltage output of a device.
//!
//! A rail's configuration and monitoring run with the rail as the active
//! scope, and failures gain a rail frame on the way out.

use regulators_types::{ErrorFrame, RegulatorError};

use crate::configuration::Configuration;
use crate::environment::ActionEnvironment;
use crate::monitoring::SensorMonitoring;

/// One voltage output of a device.
#[derive(Debug, Clone, PartialEq)]
pub struct Rail {
    id: String,
    configuration: Option<Configuration>,
    monitoring: Option<SensorMonitoring>,
}

impl Rail {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            configuration: None,
            monitoring: None,
        }
    }

    pub fn with_configuration(mut self, configuration: Configuration) -> Self {
        self.configuration = Some(configuration);
        self
    }

    pub fn with_monitoring(mut self, monitoring: SensorMonitoring) -> Self {
        self.monitoring = Some(monitoring);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn configuration(&self) -> Option<&Configuration> {
        self.configuration.as_ref()
    }

    pub fn monitoring(&self) -> Option<&SensorMonitoring> {
        self.monitoring.as_ref()
    }

    /// Apply this rail's configuration, if any, in rail scope.
    pub fn configure(&self, env: &mut ActionEnvironment<'_>) -> Result<(), RegulatorError> {
        match &self.configuration {
            Some(configuration) => self.in_scope(env, |env| configuration.execute(env)),
            None => Ok(()),
        }
    }

    /// Run this rail's sensor monitoring, if any, in rail scope.  The
    /// sensors service sees the rail start and end whether or not the
    /// monitoring succeeds.
    pub fn monitor(&self, env: &mut ActionEnvironment<'_>) -> Result<(), RegulatorError> {
        let Some(monitoring) = &self.monitoring else {
            return Ok(());
        };
        env.start_rail_monitoring(&self.id)
            .map_err(|err| err.within(ErrorFrame::Rail(self.id.clone())))?;
        let outcome = self.in_scope(env, |env| monitoring.execute(env));
        env.end_rail_monitoring(outcome.is_err());
        outcome
    }

    fn in_scope(
        &self,
        env: &mut ActionEnvironment<'_>,
        run: impl FnOnce(&mut ActionEnvironment<'_>) -> Result<bool, RegulatorError>,
    ) -> Result<(), RegulatorError> {
        let outcome = match env.enter_rail(&self.id) {
            Ok(mut scoped) => run(&mut *scoped),
            Err(err) => Err(err),
        };
        outcome
            .map(|_| ())
            .map_err(|err| err.within(ErrorFrame::Rail(self.id.clone())))
    }
}
