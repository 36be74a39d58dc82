//! PMBus output-voltage programming.
//!
//! [`WriteVoutCommand`] converts a voltage to the PMBus linear16 format and
//! writes it to VOUT_COMMAND.  The exponent is either given explicitly or
//! read from VOUT_MODE, which must then report linear mode.

use std::fmt;

use regulators_types::RegulatorError;

use crate::environment::ActionEnvironment;

/// VOUT_MODE command code.
pub const VOUT_MODE: u8 = 0x20;
/// VOUT_COMMAND command code.
pub const VOUT_COMMAND: u8 = 0x21;

const ACTION: &str = "pmbus_write_vout_command";

/// Decode the linear-mode exponent from a VOUT_MODE byte.
///
/// Bits 7:5 select the data format (`000` is linear); bits 4:0 hold a
/// two's-complement exponent.
///
/// # Errors
///
/// [`RegulatorError::ActionType`] when the device is not in linear mode.
pub fn linear_exponent(vout_mode: u8) -> Result<i8, RegulatorError> {
    let mode = vout_mode >> 5;
    if mode != 0 {
        return Err(RegulatorError::action_type(
            ACTION,
            format!("VOUT_MODE {vout_mode:#04X} is not linear format"),
        ));
    }
    let exponent = (vout_mode & 0x1F) as i8;
    Ok(if exponent & 0x10 != 0 { exponent - 0x20 } else { exponent })
}

/// Encode `volts` as a linear16 mantissa for `exponent`.
///
/// # Errors
///
/// [`RegulatorError::ActionType`] when the value does not fit 16 bits.
pub fn to_linear16(volts: f64, exponent: i8) -> Result<u16, RegulatorError> {
    let raw = (volts * 2f64.powi(-i32::from(exponent))).round();
    if !(0.0..=f64::from(u16::MAX)).contains(&raw) {
        return Err(RegulatorError::action_type(
            ACTION,
            format!("{volts} V is not representable with exponent {exponent}"),
        ));
    }
    Ok(raw as u16)
}

/// Write VOUT_COMMAND, optionally reading it back.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteVoutCommand {
    volts: Option<f64>,
    exponent: Option<i8>,
    verify: bool,
}

impl WriteVoutCommand {
    /// `volts` of `None` uses the volts of the configuration being applied.
    ///
    /// # Errors
    ///
    /// [`RegulatorError::ActionType`] for a negative or non-finite voltage, or
    /// an exponent outside the 5-bit signed range.
    pub fn new(volts: Option<f64>, exponent: Option<i8>, verify: bool) -> Result<Self, RegulatorError> {
        if let Some(v) = volts
            && !(v.is_finite() && v >= 0.0)
        {
            return Err(RegulatorError::action_type(ACTION, format!("invalid voltage {v}")));
        }
        if let Some(e) = exponent
            && !(-16..=15).contains(&e)
        {
            return Err(RegulatorError::action_type(
                ACTION,
                format!("exponent {e} is outside -16..=15"),
            ));
        }
        Ok(Self {
            volts,
            exponent,
            verify,
        })
    }

    pub(crate) fn execute(&self, env: &mut ActionEnvironment<'_>) -> Result<bool, RegulatorError> {
        let volts = self.volts.or(env.volts()).ok_or_else(|| {
            RegulatorError::action_type(ACTION, "no volts value defined by the action or configuration")
        })?;
        let exponent = match self.exponent {
            Some(exponent) => exponent,
            None => linear_exponent(env.with_bus(VOUT_MODE, |bus| bus.read_byte(VOUT_MODE))?)?,
        };

        let data = to_linear16(volts, exponent)?.to_le_bytes();
        env.with_bus(VOUT_COMMAND, |bus| bus.write(VOUT_COMMAND, &data))?;

        if self.verify {
            let actual = env.with_bus(VOUT_COMMAND, |bus| bus.read(VOUT_COMMAND, data.len()))?;
            if actual != data {
                return Err(RegulatorError::WriteVerification {
                    device_id: env.device_id().to_string(),
                    register: VOUT_COMMAND,
                    expected: data.to_vec(),
                    actual,
                });
            }
        }
        Ok(true)
    }
}

impl fmt::Display for WriteVoutCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("pmbus_write_vout_command: {")?;
        if let Some(volts) = self.volts {
            write!(f, " volts: {volts},")?;
        }
        if let Some(exponent) = self.exponent {
            write!(f, " exponent: {exponent},")?;
        }
        write!(f, " format: linear, is_verified: {} }}", self.verify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use crate::test_utils::{sim_bus, sim_device, system_of, with_env};
    use regulators_hal::bus::{BusError, BusInterface};
    use regulators_hal::sim::{BusOp, SimBus};

    /// Accepts writes without storing them.
    struct DroppedWrites(SimBus);

    impl BusInterface for DroppedWrites {
        fn bus(&self) -> &str {
            self.0.bus()
        }
        fn address(&self) -> u16 {
            self.0.address()
        }
        fn is_open(&self) -> bool {
            self.0.is_open()
        }
        fn open(&mut self) -> Result<(), BusError> {
            self.0.open()
        }
        fn close(&mut self) -> Result<(), BusError> {
            self.0.close()
        }
        fn read(&mut self, register: u8, count: usize) -> Result<Vec<u8>, BusError> {
            self.0.read(register, count)
        }
        fn write(&mut self, _register: u8, _data: &[u8]) -> Result<(), BusError> {
            Ok(())
        }
    }

    #[test]
    fn vout_mode_exponent_is_sign_extended() {
        assert_eq!(linear_exponent(0x17).unwrap(), -9);
        assert_eq!(linear_exponent(0x14).unwrap(), -12);
        assert_eq!(linear_exponent(0x05).unwrap(), 5);
        assert!(linear_exponent(0x40).is_err());
    }

    #[test]
    fn linear16_encoding() {
        // 1.3 V * 2^8 = 332.8
        assert_eq!(to_linear16(1.3, -8).unwrap(), 333);
        assert_eq!(to_linear16(1.0, -9).unwrap(), 512);
        assert!(to_linear16(200.0, -9).is_err());
    }

    #[test]
    fn explicit_volts_and_exponent_write_little_endian() {
        let bus = sim_bus();
        let system = system_of(vec![sim_device("vdd1", &bus)], vec![]);
        let action = WriteVoutCommand::new(Some(1.0), Some(-9), false).unwrap();
        with_env(&system, "vdd1", |env| assert!(action.execute(env).unwrap()));
        assert_eq!(
            bus.writes(),
            vec![BusOp::Write {
                register: VOUT_COMMAND,
                data: vec![0x00, 0x02]
            }]
        );
        assert_eq!(bus.read_count(VOUT_MODE), 0);
    }

    #[test]
    fn exponent_read_from_vout_mode_and_volts_from_configuration() {
        let bus = sim_bus().with_register(VOUT_MODE, vec![0x18]);
        let system = system_of(vec![sim_device("vdd1", &bus)], vec![]);
        let action = WriteVoutCommand::new(None, None, true).unwrap();
        with_env(&system, "vdd1", |env| {
            let mut scoped = env.with_volts(Some(1.5));
            assert!(action.execute(&mut scoped).unwrap());
        });
        // 0x18 → exponent -8; 1.5 * 256 = 384 = 0x0180
        assert_eq!(bus.register(VOUT_COMMAND), Some(vec![0x80, 0x01]));
    }

    #[test]
    fn missing_volts_is_action_type_error() {
        let bus = sim_bus();
        let system = system_of(vec![sim_device("vdd1", &bus)], vec![]);
        let action = WriteVoutCommand::new(None, Some(-8), false).unwrap();
        let err = with_env(&system, "vdd1", |env| action.execute(env).unwrap_err());
        assert_eq!(err.code(), "action_type_error");
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn readback_mismatch_is_verification_error() {
        let bus = sim_bus().with_register(VOUT_COMMAND, vec![0x00, 0x01]);
        let device = Device::new("vdd1", true, "/system/chassis/motherboard/vdd1", Box::new(DroppedWrites(bus)));
        let system = system_of(vec![device], vec![]);
        let action = WriteVoutCommand::new(Some(1.0), Some(-9), true).unwrap();
        let err = with_env(&system, "vdd1", |env| action.execute(env).unwrap_err());
        assert_eq!(
            err,
            RegulatorError::WriteVerification {
                device_id: "vdd1".into(),
                register: VOUT_COMMAND,
                expected: vec![0x00, 0x02],
                actual: vec![0x00, 0x01],
            }
        );
    }

    #[test]
    fn construction_rejects_bad_operands() {
        assert!(WriteVoutCommand::new(Some(-1.0), None, false).is_err());
        assert!(WriteVoutCommand::new(Some(f64::NAN), None, false).is_err());
        assert!(WriteVoutCommand::new(Some(1.0), Some(16), false).is_err());
    }

    #[test]
    fn display_lists_set_fields() {
        let action = WriteVoutCommand::new(Some(1.03), Some(-8), true).unwrap();
        assert_eq!(
            action.to_string(),
            "pmbus_write_vout_command: { volts: 1.03, exponent: -8, format: linear, is_verified: true }"
        );
    }
}
