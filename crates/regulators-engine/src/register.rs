//! Register-level actions: typed comparisons, masked writes, byte capture
//! and sensor reads against the active device's bus interface.
//!
//! Multi-byte values are little-endian, matching SMBus word transfers.
//! Operands are validated against the declared [`RegisterFormat`] when the
//! action is constructed, so an out-of-range literal never reaches hardware.

use std::fmt;

use regulators_hal::bus::MAX_BLOCK_LEN;
use regulators_types::{RegulatorError, SensorType, format_bytes};

use crate::environment::ActionEnvironment;

// ─────────────────────────────────────────────────────────────────────────────
// RegisterFormat
// ─────────────────────────────────────────────────────────────────────────────

/// Bit width and signedness of a register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterFormat {
    bits: u8,
    signed: bool,
}

impl RegisterFormat {
    pub const U8: Self = Self { bits: 8, signed: false };
    pub const U16: Self = Self { bits: 16, signed: false };
    pub const U32: Self = Self { bits: 32, signed: false };
    pub const I8: Self = Self { bits: 8, signed: true };
    pub const I16: Self = Self { bits: 16, signed: true };
    pub const I32: Self = Self { bits: 32, signed: true };

    /// # Errors
    ///
    /// [`RegulatorError::ActionType`] unless `bits` is 8, 16 or 32.
    pub fn new(bits: u8, signed: bool) -> Result<Self, RegulatorError> {
        match bits {
            8 | 16 | 32 => Ok(Self { bits, signed }),
            _ => Err(RegulatorError::action_type(
                "register_format",
                format!("unsupported width of {bits} bits"),
            )),
        }
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// Number of bytes read from the bus for one value.
    pub fn byte_len(&self) -> usize {
        usize::from(self.bits / 8)
    }

    /// Mask covering every bit of the register.
    pub fn full_mask(&self) -> u64 {
        (1u64 << self.bits) - 1
    }

    pub fn min(&self) -> i64 {
        if self.signed { -(1i64 << (self.bits - 1)) } else { 0 }
    }

    pub fn max(&self) -> i64 {
        if self.signed {
            (1i64 << (self.bits - 1)) - 1
        } else {
            (1i64 << self.bits) - 1
        }
    }

    /// Whether `value` is representable in this format.
    pub fn contains(&self, value: i64) -> bool {
        (self.min()..=self.max()).contains(&value)
    }

    /// Decode little-endian `bytes`, apply `mask`, then sign-extend if the
    /// format is signed.
    pub fn decode(&self, bytes: &[u8], mask: u64) -> i64 {
        let raw = bytes
            .iter()
            .take(self.byte_len())
            .enumerate()
            .fold(0u64, |acc, (i, b)| acc | (u64::from(*b) << (8 * i)));
        let masked = raw & mask & self.full_mask();
        let sign_bit = 1u64 << (self.bits - 1);
        if self.signed && masked & sign_bit != 0 {
            masked as i64 - (1i64 << self.bits)
        } else {
            masked as i64
        }
    }
}

impl fmt::Display for RegisterFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.signed { 'i' } else { 'u' };
        write!(f, "{prefix}{}", self.bits)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Comparison
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equal,
    NotEqual,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
}

impl CompareOp {
    /// Evaluate `lhs <op> rhs`.
    pub fn apply(&self, lhs: i64, rhs: i64) -> bool {
        match self {
            CompareOp::Equal => lhs == rhs,
            CompareOp::NotEqual => lhs != rhs,
            CompareOp::Less => lhs < rhs,
            CompareOp::LessOrEqual => lhs <= rhs,
            CompareOp::Greater => lhs > rhs,
            CompareOp::GreaterOrEqual => lhs >= rhs,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompareOp::Equal => "equal",
            CompareOp::NotEqual => "not_equal",
            CompareOp::Less => "less",
            CompareOp::LessOrEqual => "less_or_equal",
            CompareOp::Greater => "greater",
            CompareOp::GreaterOrEqual => "greater_or_equal",
        };
        f.write_str(name)
    }
}

/// Right-hand side of a [`CompareRegister`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Literal(i64),
    /// Most recent value recorded under this name by a `read_sensor` action.
    Sensor(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(value) => write!(f, "{value}"),
            Operand::Sensor(name) => write!(f, "sensor {name}"),
        }
    }
}

/// Read a typed register value and compare it against an operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareRegister {
    register: u8,
    format: RegisterFormat,
    mask: u64,
    op: CompareOp,
    operand: Operand,
}

impl CompareRegister {
    /// # Errors
    ///
    /// [`RegulatorError::ActionType`] when a literal operand does not fit
    /// `format`.
    pub fn new(
        register: u8,
        format: RegisterFormat,
        op: CompareOp,
        operand: Operand,
    ) -> Result<Self, RegulatorError> {
        if let Operand::Literal(value) = operand
            && !format.contains(value)
        {
            return Err(RegulatorError::action_type(
                "compare_register",
                format!(
                    "literal {value} is outside the {format} range {}..={}",
                    format.min(),
                    format.max()
                ),
            ));
        }
        Ok(Self {
            register,
            format,
            mask: format.full_mask(),
            op,
            operand,
        })
    }

    /// Restrict the comparison to the bits set in `mask`.
    ///
    /// # Errors
    ///
    /// [`RegulatorError::ActionType`] when `mask` is zero or wider than the
    /// register.
    pub fn with_mask(mut self, mask: u64) -> Result<Self, RegulatorError> {
        if mask == 0 || mask & !self.format.full_mask() != 0 {
            return Err(RegulatorError::action_type(
                "compare_register",
                format!("mask {mask:#X} does not fit a {} register", self.format),
            ));
        }
        self.mask = mask;
        Ok(self)
    }

    pub fn register(&self) -> u8 {
        self.register
    }

    pub(crate) fn execute(&self, env: &mut ActionEnvironment<'_>) -> Result<bool, RegulatorError> {
        let len = self.format.byte_len();
        let bytes = env.with_bus(self.register, |bus| bus.read(self.register, len))?;
        let actual = self.format.decode(&bytes, self.mask);
        let expected = match &self.operand {
            Operand::Literal(value) => *value,
            Operand::Sensor(name) => env.sensor_value(name).ok_or_else(|| {
                RegulatorError::action_type(
                    "compare_register",
                    format!("no sensor value named \"{name}\" has been read"),
                )
            })?,
        };
        Ok(self.op.apply(actual, expected))
    }
}

impl fmt::Display for CompareRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "compare_register: {{ register: {:#04X}, format: {}, mask: {:#X}, op: {}, operand: {} }}",
            self.register, self.format, self.mask, self.op, self.operand
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Writes
// ─────────────────────────────────────────────────────────────────────────────

/// Write literal bytes, optionally merged into the current contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRegister {
    register: u8,
    data: Vec<u8>,
    mask: Option<Vec<u8>>,
}

impl WriteRegister {
    /// # Errors
    ///
    /// [`RegulatorError::ActionType`] when `data` is empty or longer than one
    /// bus block.
    pub fn new(register: u8, data: Vec<u8>) -> Result<Self, RegulatorError> {
        check_len("write_register", data.len())?;
        Ok(Self {
            register,
            data,
            mask: None,
        })
    }

    /// Only bits set in `mask` are changed; the rest keep their current value
    /// (read-modify-write).
    ///
    /// # Errors
    ///
    /// [`RegulatorError::ActionType`] when `mask` and data lengths differ.
    pub fn with_mask(mut self, mask: Vec<u8>) -> Result<Self, RegulatorError> {
        if mask.len() != self.data.len() {
            return Err(RegulatorError::action_type(
                "write_register",
                format!(
                    "mask has {} bytes but data has {}",
                    mask.len(),
                    self.data.len()
                ),
            ));
        }
        self.mask = Some(mask);
        Ok(self)
    }

    pub(crate) fn execute(&self, env: &mut ActionEnvironment<'_>) -> Result<bool, RegulatorError> {
        let reg = self.register;
        let bytes = match &self.mask {
            None => self.data.clone(),
            Some(mask) => {
                let current = env.with_bus(reg, |bus| bus.read(reg, self.data.len()))?;
                current
                    .iter()
                    .zip(&self.data)
                    .zip(mask)
                    .map(|((old, new), m)| (old & !m) | (new & m))
                    .collect()
            }
        };
        env.with_bus(reg, |bus| bus.write(reg, &bytes))?;
        Ok(true)
    }
}

impl fmt::Display for WriteRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = self
            .mask
            .as_deref()
            .map_or_else(|| "none".to_string(), format_bytes);
        write!(
            f,
            "write_register: {{ register: {:#04X}, data: {}, mask: {mask} }}",
            self.register,
            format_bytes(&self.data)
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Capture & sensors
// ─────────────────────────────────────────────────────────────────────────────

/// Read raw bytes and keep them as additional diagnostic data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureBytes {
    register: u8,
    count: usize,
}

impl CaptureBytes {
    /// # Errors
    ///
    /// [`RegulatorError::ActionType`] when `count` is outside
    /// `1..=MAX_BLOCK_LEN`.
    pub fn new(register: u8, count: usize) -> Result<Self, RegulatorError> {
        check_len("capture_bytes", count)?;
        Ok(Self { register, count })
    }

    pub(crate) fn execute(&self, env: &mut ActionEnvironment<'_>) -> Result<bool, RegulatorError> {
        let bytes = env.with_bus(self.register, |bus| bus.read(self.register, self.count))?;
        env.capture(self.register, &bytes);
        Ok(true)
    }
}

impl fmt::Display for CaptureBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "capture_bytes: {{ register: {:#04X}, count: {} }}",
            self.register, self.count
        )
    }
}

/// Read a typed value and record it as a named sensor reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadSensor {
    register: u8,
    format: RegisterFormat,
    sensor_type: SensorType,
    name: String,
}

impl ReadSensor {
    /// # Errors
    ///
    /// [`RegulatorError::ActionType`] when `name` is empty.
    pub fn new(
        register: u8,
        format: RegisterFormat,
        sensor_type: SensorType,
        name: impl Into<String>,
    ) -> Result<Self, RegulatorError> {
        let name = name.into();
        if name.is_empty() {
            return Err(RegulatorError::action_type("read_sensor", "sensor name is empty"));
        }
        Ok(Self {
            register,
            format,
            sensor_type,
            name,
        })
    }

    pub fn sensor_type(&self) -> SensorType {
        self.sensor_type
    }

    pub(crate) fn execute(&self, env: &mut ActionEnvironment<'_>) -> Result<bool, RegulatorError> {
        let len = self.format.byte_len();
        let bytes = env.with_bus(self.register, |bus| bus.read(self.register, len))?;
        let value = self.format.decode(&bytes, self.format.full_mask());
        env.record_sensor(&self.name, self.sensor_type, value);
        Ok(true)
    }
}

impl fmt::Display for ReadSensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "read_sensor: {{ register: {:#04X}, format: {}, type: {}, name: {} }}",
            self.register, self.format, self.sensor_type, self.name
        )
    }
}

pub(crate) fn check_len(action: &str, count: usize) -> Result<(), RegulatorError> {
    if count == 0 {
        return Err(RegulatorError::action_type(action, "invalid byte count: less than 1"));
    }
    if count > MAX_BLOCK_LEN {
        return Err(RegulatorError::action_type(
            action,
            format!("invalid byte count: greater than {MAX_BLOCK_LEN}"),
        ));
    }
    Ok(())
}
