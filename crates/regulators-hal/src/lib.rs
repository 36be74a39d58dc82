//! `regulators-hal` – register bus abstraction.
//!
//! # Modules
//!
//! - [`bus`] – [`BusInterface`][bus::BusInterface]: the addressed byte/block
//!   read and write contract every device's transport implements, plus the
//!   [`BusError`][bus::BusError] transport failures.
//! - [`sim`] – [`SimBus`][sim::SimBus]: an in-memory register file with
//!   fault injection and an operation log, used to run the engine in tests
//!   and CI without hardware.

pub mod bus;
pub mod sim;

pub use bus::{BusError, BusInterface, InitialState, MAX_BLOCK_LEN};
pub use sim::{BusOp, SimBus, SimFault};
