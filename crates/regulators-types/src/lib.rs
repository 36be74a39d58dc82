//! `regulators-types` – shared vocabulary for the regulator engine.
//!
//! Everything that crosses a crate boundary lives here: the
//! [`RegulatorError`] taxonomy raised by actions, the structured [`Finding`]
//! records handed to finding sinks, sensor readings, and the [`CycleId`]
//! token that scopes cached presence results to one top-level call.

use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Findings
// ─────────────────────────────────────────────────────────────────────────────

/// Severity attached to a [`Finding`].  Ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Informational,
    Notice,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Informational => write!(f, "informational"),
            Severity::Notice => write!(f, "notice"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A structured, non-fatal observation recorded during a run.
///
/// Findings come from two places: `log_finding` actions evaluated by a
/// monitoring or configuration tree, and errors caught at a device boundary.
/// Either way they never alter control flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Finding {
    pub severity: Severity,
    /// Stable snake_case code, e.g. `"vout_ov_warning"` or `"bus_access_error"`.
    pub code: String,
    pub device_id: String,
    pub rail_id: Option<String>,
    /// Raw register bytes captured alongside the finding, if any.
    pub captured: Option<Vec<u8>>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Finding {
    /// Create a finding attributed to `device_id` with an empty message.
    pub fn new(severity: Severity, code: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            severity,
            code: code.into(),
            device_id: device_id.into(),
            rail_id: None,
            captured: None,
            message: String::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_rail(mut self, rail_id: Option<String>) -> Self {
        self.rail_id = rail_id;
        self
    }

    pub fn with_captured(mut self, bytes: Vec<u8>) -> Self {
        self.captured = Some(bytes);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} on {}", self.severity, self.code, self.device_id)?;
        if let Some(rail) = &self.rail_id {
            write!(f, "/{rail}")?;
        }
        if let Some(bytes) = &self.captured {
            write!(f, " {}", format_bytes(bytes))?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

/// Render register bytes the way diagnostic records expect them:
/// `[ 0xD7, 0x13 ]`.
pub fn format_bytes(bytes: &[u8]) -> String {
    let body = bytes
        .iter()
        .map(|b| format!("{b:#04X}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("[ {body} ]")
}

/// Kind of quantity a `read_sensor` action reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Iout,
    IoutPeak,
    IoutValley,
    Iin,
    Temperature,
    TemperaturePeak,
    Vout,
    VoutPeak,
    VoutValley,
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SensorType::Iout => "iout",
            SensorType::IoutPeak => "iout_peak",
            SensorType::IoutValley => "iout_valley",
            SensorType::Iin => "iin",
            SensorType::Temperature => "temperature",
            SensorType::TemperaturePeak => "temperature_peak",
            SensorType::Vout => "vout",
            SensorType::VoutPeak => "vout_peak",
            SensorType::VoutValley => "vout_valley",
        };
        f.write_str(name)
    }
}

/// A named value read from hardware by a `read_sensor` action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SensorReading {
    pub device_id: String,
    pub rail_id: Option<String>,
    pub name: String,
    pub sensor_type: SensorType,
    pub value: i64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Cycle token
// ─────────────────────────────────────────────────────────────────────────────

/// Identifies one top-level `configure()` or `monitor()` call.
///
/// Cached presence results are tagged with the cycle that produced them and
/// are only reused while the same cycle is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CycleId(Uuid);

impl CycleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CycleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// One level of context added to an error while it unwinds an action tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "frame", content = "id", rename_all = "snake_case")]
pub enum ErrorFrame {
    Device(String),
    Rail(String),
    Rule(String),
    /// Short description of the action variant, e.g. `"and"` or
    /// `"compare_register: { register: 0x10, ... }"`.
    Action(String),
}

impl fmt::Display for ErrorFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorFrame::Device(id) => write!(f, "device \"{id}\""),
            ErrorFrame::Rail(id) => write!(f, "rail \"{id}\""),
            ErrorFrame::Rule(id) => write!(f, "rule \"{id}\""),
            ErrorFrame::Action(desc) => write!(f, "{desc}"),
        }
    }
}

/// Every failure the engine can raise.
///
/// Leaf variants describe what went wrong; [`RegulatorError::Context`] wraps
/// a leaf once per enclosing frame so that the error surfacing at a device
/// boundary names the whole chain, e.g.
/// `device "vdd1": rule "set_voltage": write_register: {...}: BusAccessError: ...`.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegulatorError {
    #[error("BusAccessError: device \"{device_id}\", register {register:#04X}: {details}")]
    BusAccess {
        device_id: String,
        rail_id: Option<String>,
        register: u8,
        details: String,
    },

    #[error("RuleNotFoundError: unable to find rule with ID \"{rule_id}\"")]
    RuleNotFound { rule_id: String },

    #[error("RuleRecursionError: rule \"{rule_id}\" at depth {depth}: {reason} (chain: {})", .chain.join(" -> "))]
    RuleRecursion {
        rule_id: String,
        depth: usize,
        reason: String,
        chain: Vec<String>,
    },

    #[error("ActionTypeError: {action}: {details}")]
    ActionType { action: String, details: String },

    #[error("DeviceNotFoundError: unable to find device with ID \"{device_id}\"")]
    DeviceNotFound { device_id: String },

    #[error("RailNotFoundError: device \"{device_id}\" has no rail with ID \"{rail_id}\"")]
    RailNotFound { device_id: String, rail_id: String },

    #[error(
        "WriteVerificationError: device \"{device_id}\", register {register:#04X}: wrote {} but read back {}",
        format_bytes(.expected),
        format_bytes(.actual)
    )]
    WriteVerification {
        device_id: String,
        register: u8,
        expected: Vec<u8>,
        actual: Vec<u8>,
    },

    #[error("DuplicateIdError: {kind} ID \"{id}\" is defined more than once")]
    DuplicateId { kind: String, id: String },

    #[error("{frame}: {source}")]
    Context {
        frame: ErrorFrame,
        source: Box<RegulatorError>,
    },
}

impl RegulatorError {
    /// Build a [`RegulatorError::BusAccess`] from any transport error.
    pub fn bus_access(
        device_id: &str,
        rail_id: Option<&str>,
        register: u8,
        details: impl fmt::Display,
    ) -> Self {
        RegulatorError::BusAccess {
            device_id: device_id.to_string(),
            rail_id: rail_id.map(str::to_string),
            register,
            details: details.to_string(),
        }
    }

    /// Shorthand for an [`RegulatorError::ActionType`] error.
    pub fn action_type(action: impl Into<String>, details: impl Into<String>) -> Self {
        RegulatorError::ActionType {
            action: action.into(),
            details: details.into(),
        }
    }

    /// Wrap `self` in one more frame of context.
    pub fn within(self, frame: ErrorFrame) -> Self {
        RegulatorError::Context {
            frame,
            source: Box::new(self),
        }
    }

    /// The innermost (leaf) error, with all context frames peeled off.
    pub fn root(&self) -> &RegulatorError {
        let mut current = self;
        while let RegulatorError::Context { source, .. } = current {
            current = source;
        }
        current
    }

    /// Context frames from the outermost to the innermost.
    pub fn frames(&self) -> Vec<&ErrorFrame> {
        let mut frames = Vec::new();
        let mut current = self;
        while let RegulatorError::Context { frame, source } = current {
            frames.push(frame);
            current = source;
        }
        frames
    }

    /// Stable snake_case code of the root error, used as the finding code
    /// when the error is recorded.
    pub fn code(&self) -> &'static str {
        match self.root() {
            RegulatorError::BusAccess { .. } => "bus_access_error",
            RegulatorError::RuleNotFound { .. } => "rule_not_found_error",
            RegulatorError::RuleRecursion { .. } => "rule_recursion_error",
            RegulatorError::ActionType { .. } => "action_type_error",
            RegulatorError::DeviceNotFound { .. } => "device_not_found_error",
            RegulatorError::RailNotFound { .. } => "rail_not_found_error",
            RegulatorError::WriteVerification { .. } => "write_verification_error",
            RegulatorError::DuplicateId { .. } => "duplicate_id_error",
            RegulatorError::Context { source, .. } => source.code(),
        }
    }

    /// The device named by the outermost device frame, falling back to the
    /// device recorded in the root error.
    pub fn device_id(&self) -> Option<&str> {
        let framed = self.frames().into_iter().find_map(|frame| match frame {
            ErrorFrame::Device(id) => Some(id.as_str()),
            _ => None,
        });
        framed.or(match self.root() {
            RegulatorError::BusAccess { device_id, .. }
            | RegulatorError::DeviceNotFound { device_id }
            | RegulatorError::RailNotFound { device_id, .. }
            | RegulatorError::WriteVerification { device_id, .. } => Some(device_id.as_str()),
            _ => None,
        })
    }
}
