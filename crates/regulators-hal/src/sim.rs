//! In-process simulated bus for CI/CD testing without physical hardware.
//!
//! [`SimBus`] implements [`BusInterface`] on top of an in-memory register
//! file.  Clones share the same state, so a test can move one clone into a
//! device and keep another to preload registers, inject faults, and inspect
//! the recorded operation log afterwards.
//!
//! # Stub behaviour
//!
//! | Operation | Behaviour |
//! |---|---|
//! | `read`  | Returns the stored bytes of the register, zero-padded or truncated to `count`. Unset registers read as zeros. |
//! | `write` | Replaces the stored bytes of the register. |
//! | faults  | A faulted register (or a bus with all-fail set) returns the configured [`SimFault`] on read and write. |
//!
//! # Example
//!
//! ```rust
//! use regulators_hal::bus::{BusInterface, InitialState};
//! use regulators_hal::sim::SimBus;
//!
//! let observer = SimBus::new("/dev/i2c-1", 0x70, InitialState::Open).with_register(0x10, vec![150]);
//! let mut bus = observer.clone();
//!
//! assert_eq!(bus.read_byte(0x10).unwrap(), 150);
//! assert_eq!(observer.read_count(0x10), 1);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::bus::{BusError, BusInterface, InitialState, MAX_BLOCK_LEN};

/// One operation observed by a [`SimBus`], in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusOp {
    Open,
    Close,
    Read { register: u8, count: usize },
    Write { register: u8, data: Vec<u8> },
}

/// Failure mode injected into a simulated register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFault {
    Nack,
    Timeout,
}

#[derive(Default)]
struct SimState {
    open: bool,
    registers: HashMap<u8, Vec<u8>>,
    faults: HashMap<u8, SimFault>,
    fail_all: Option<SimFault>,
    ops: Vec<BusOp>,
}

/// A simulated register bus.  Always succeeds unless a fault is injected.
#[derive(Clone)]
pub struct SimBus {
    bus: String,
    address: u16,
    state: Arc<Mutex<SimState>>,
}

impl SimBus {
    /// Create a simulated device at `address` on `bus`.
    pub fn new(bus: impl Into<String>, address: u16, initial: InitialState) -> Self {
        let state = SimState {
            open: initial == InitialState::Open,
            ..SimState::default()
        };
        Self {
            bus: bus.into(),
            address,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Preload `register` with `bytes`.
    pub fn with_register(self, register: u8, bytes: Vec<u8>) -> Self {
        self.set_register(register, bytes);
        self
    }

    pub fn set_register(&self, register: u8, bytes: Vec<u8>) {
        self.lock().registers.insert(register, bytes);
    }

    /// Current contents of `register`, if it was ever set or written.
    pub fn register(&self, register: u8) -> Option<Vec<u8>> {
        self.lock().registers.get(&register).cloned()
    }

    /// Make every read and write of `register` fail with `fault`.
    pub fn fail_register(&self, register: u8, fault: SimFault) {
        self.lock().faults.insert(register, fault);
    }

    /// Make every read and write on this bus fail with `fault`.
    pub fn fail_all(&self, fault: SimFault) {
        self.lock().fail_all = Some(fault);
    }

    pub fn clear_faults(&self) {
        let mut state = self.lock();
        state.faults.clear();
        state.fail_all = None;
    }

    /// Every operation attempted so far, including failed ones.
    pub fn ops(&self) -> Vec<BusOp> {
        self.lock().ops.clone()
    }

    /// Only the write operations, in order.
    pub fn writes(&self) -> Vec<BusOp> {
        self.lock()
            .ops
            .iter()
            .filter(|op| matches!(op, BusOp::Write { .. }))
            .cloned()
            .collect()
    }

    /// Number of read attempts against `register`.
    pub fn read_count(&self, register: u8) -> usize {
        self.lock()
            .ops
            .iter()
            .filter(|op| matches!(op, BusOp::Read { register: r, .. } if *r == register))
            .count()
    }

    /// Total number of read attempts on this bus.
    pub fn total_reads(&self) -> usize {
        self.lock()
            .ops
            .iter()
            .filter(|op| matches!(op, BusOp::Read { .. }))
            .count()
    }

    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fault_error(&self, fault: SimFault, register: u8) -> BusError {
        match fault {
            SimFault::Nack => BusError::Nack {
                bus: self.bus.clone(),
                address: self.address,
                register,
            },
            SimFault::Timeout => BusError::Timeout {
                bus: self.bus.clone(),
                address: self.address,
                register,
            },
        }
    }

    /// Shared precondition for reads and writes: open, sane length, no fault.
    fn check_access(&self, state: &SimState, register: u8, count: usize) -> Result<(), BusError> {
        if !state.open {
            return Err(BusError::Closed {
                bus: self.bus.clone(),
                address: self.address,
            });
        }
        if count == 0 || count > MAX_BLOCK_LEN {
            return Err(BusError::InvalidLength {
                bus: self.bus.clone(),
                address: self.address,
                count,
            });
        }
        if let Some(fault) = state.fail_all.or_else(|| state.faults.get(&register).copied()) {
            return Err(self.fault_error(fault, register));
        }
        Ok(())
    }
}

impl BusInterface for SimBus {
    fn bus(&self) -> &str {
        &self.bus
    }

    fn address(&self) -> u16 {
        self.address
    }

    fn is_open(&self) -> bool {
        self.lock().open
    }

    fn open(&mut self) -> Result<(), BusError> {
        let mut state = self.lock();
        state.ops.push(BusOp::Open);
        state.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), BusError> {
        let mut state = self.lock();
        state.ops.push(BusOp::Close);
        state.open = false;
        Ok(())
    }

    fn read(&mut self, register: u8, count: usize) -> Result<Vec<u8>, BusError> {
        let mut state = self.lock();
        state.ops.push(BusOp::Read { register, count });
        self.check_access(&state, register, count)?;

        let mut bytes = state.registers.get(&register).cloned().unwrap_or_default();
        bytes.resize(count, 0);
        trace!(bus = %self.bus, address = self.address, register, ?bytes, "sim read");
        Ok(bytes)
    }

    fn write(&mut self, register: u8, data: &[u8]) -> Result<(), BusError> {
        let mut state = self.lock();
        state.ops.push(BusOp::Write {
            register,
            data: data.to_vec(),
        });
        self.check_access(&state, register, data.len())?;

        state.registers.insert(register, data.to_vec());
        trace!(bus = %self.bus, address = self.address, register, ?data, "sim write");
        Ok(())
    }
}
