//! `regulators-engine` – voltage regulator configuration and monitoring.
//!
//! A small interpreter that evaluates declarative action trees against
//! register-level hardware.  The object graph (built by an external loader)
//! is walked by [`System::configure`] and [`System::monitor`]; a failure on
//! one device never stops the rest of the walk.
//!
//! # Modules
//!
//! - [`action`] – [`Action`][action::Action]: the closed instruction set
//!   (combinators, conditionals, rule calls, scope switches, register
//!   access, findings) and its single-match interpreter.
//! - [`register`] / [`pmbus`] – typed register comparisons, masked writes,
//!   byte capture, sensor reads and PMBus VOUT_COMMAND programming.
//! - [`environment`] – [`ActionEnvironment`][environment::ActionEnvironment]:
//!   per-invocation scope stack, rule chain, findings and captured data,
//!   with guard-based scope restoration.
//! - [`rule`], [`presence`], [`configuration`], [`monitoring`] – the action
//!   lists attached to the hierarchy, plus the per-cycle
//!   [`PresenceCache`][presence::PresenceCache] and monitoring
//!   [`ErrorHistory`][monitoring::ErrorHistory].
//! - [`device`], [`rail`], [`chassis`], [`system`] – the hierarchy and its
//!   traversal; [`id_map`] resolves devices and rules by ID.
//! - [`report`] – [`RunReport`][report::RunReport]: what the last run did.
//! - [`services`] – finding sink, presence publisher and sensors service
//!   interfaces.
//! - [`config`] – [`EngineConfig`][config::EngineConfig] from TOML and
//!   `REGULATORS_*` environment variables.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing] with an
//!   optional OTLP exporter.

pub mod action;
pub mod chassis;
pub mod config;
pub mod configuration;
pub mod device;
pub mod environment;
pub mod id_map;
pub mod monitoring;
pub mod pmbus;
pub mod presence;
pub mod rail;
pub mod register;
pub mod report;
pub mod rule;
pub mod services;
pub mod system;
pub mod telemetry;

#[cfg(test)]
mod test_utils;

pub use action::{Action, ActionList, LogFinding};
pub use chassis::Chassis;
pub use config::{ConfigError, EngineConfig};
pub use configuration::Configuration;
pub use device::Device;
pub use environment::ActionEnvironment;
pub use monitoring::{ErrorHistory, SensorMonitoring};
pub use presence::PresenceDetection;
pub use rail::Rail;
pub use report::{DeviceState, RunKind, RunReport, RunStatus};
pub use rule::Rule;
pub use services::{FindingSink, PresencePublisher, SensorsService, TracingSink};
pub use system::System;
