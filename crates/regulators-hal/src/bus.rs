//! Generic `BusInterface` trait for register-addressed devices (I2C/PMBus
//! regulators, sequencers, fan controllers, …).
//!
//! Every device owns exactly one bus interface, bound at construction to one
//! bus and one device address.  The engine only ever talks to the trait, so
//! a real transport and the in-process [`SimBus`][crate::sim::SimBus] are
//! interchangeable.

use thiserror::Error;

/// Largest block transfer a single read or write may carry (SMBus block
/// limit).
pub const MAX_BLOCK_LEN: usize = 32;

/// Whether a freshly constructed interface starts open or waits for the
/// first access to open itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialState {
    Open,
    #[default]
    Closed,
}

/// Transport-level failures reported by a [`BusInterface`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("bus {bus}, addr {address:#04X}: register {register:#04X} not acknowledged")]
    Nack {
        bus: String,
        address: u16,
        register: u8,
    },

    #[error("bus {bus}, addr {address:#04X}: register {register:#04X} timed out")]
    Timeout {
        bus: String,
        address: u16,
        register: u8,
    },

    #[error("bus {bus}, addr {address:#04X}: interface is not open")]
    Closed { bus: String, address: u16 },

    #[error("bus {bus}, addr {address:#04X}: invalid transfer length {count} (expected 1..={MAX_BLOCK_LEN})")]
    InvalidLength {
        bus: String,
        address: u16,
        count: usize,
    },

    #[error("bus {bus}, addr {address:#04X}: {details}")]
    Transport {
        bus: String,
        address: u16,
        details: String,
    },
}

/// A register-addressed hardware bus bound to one device.
///
/// Implementations are driven from a single thread; the engine never shares
/// one interface between concurrent operations.
pub trait BusInterface: Send {
    /// Bus the device sits on, e.g. `"/dev/i2c-1"`.
    fn bus(&self) -> &str;

    /// Device address on [`bus`][BusInterface::bus].
    fn address(&self) -> u16;

    fn is_open(&self) -> bool;

    /// Open the interface.  Opening an already open interface is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Transport`] if the underlying bus cannot be opened.
    fn open(&mut self) -> Result<(), BusError>;

    /// Close the interface.  Closing an already closed interface is a no-op.
    fn close(&mut self) -> Result<(), BusError>;

    /// Read `count` bytes starting at `register`.
    ///
    /// # Errors
    ///
    /// Any [`BusError`]; `count` outside `1..=MAX_BLOCK_LEN` yields
    /// [`BusError::InvalidLength`].
    fn read(&mut self, register: u8, count: usize) -> Result<Vec<u8>, BusError>;

    /// Write `data` starting at `register`.
    ///
    /// # Errors
    ///
    /// Any [`BusError`]; an empty or oversized `data` yields
    /// [`BusError::InvalidLength`].
    fn write(&mut self, register: u8, data: &[u8]) -> Result<(), BusError>;

    /// Read a single byte.
    fn read_byte(&mut self, register: u8) -> Result<u8, BusError> {
        let bytes = self.read(register, 1)?;
        bytes.first().copied().ok_or_else(|| BusError::Transport {
            bus: self.bus().to_string(),
            address: self.address(),
            details: format!("short read from register {register:#04X}"),
        })
    }

    /// Write a single byte.
    fn write_byte(&mut self, register: u8, value: u8) -> Result<(), BusError> {
        self.write(register, &[value])
    }
}
