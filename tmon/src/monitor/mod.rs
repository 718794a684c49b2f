//! Trap dispatch and expectation engine.
//!
//! The monitor owns the expected trap queue and, for each trap handling
//! level, a vector table, a user callback registry and the urgency stack of
//! interrupt handlers currently running in nested-vectored mode.

pub mod api;
pub mod handlers;
pub mod mmon;
pub mod privilege;
pub mod smon;
pub mod vector;

use crate::csr::Level;
use crate::queue::ExpectQueue;
use crate::Halt;

pub use vector::{CallbackRegistry, FaultKind, TrapHandler, UserCallback, VectorMode, VectorTable};

/// Environment call function ids, passed in `a0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum Fid {
    Fail = 0,
    Exit = 1,
    Csrr = 2,
    Csrw = 3,
    Csrs = 4,
    Csrc = 5,
    Icsrr = 6,
    Icsrw = 7,
    Icsrs = 8,
    Icsrc = 9,
    Priv = 10,
    Expect = 11,
    Verify = 12,
    Mswi = 13,
    Sswi = 14,
    Mmsi = 15,
    Smsi = 16,
    Cb = 17,
}

/// Number of function ids served by the machine-level dispatcher.
pub const FID_COUNT: usize = 18;

impl TryFrom<u64> for Fid {
    type Error = Halt;

    fn try_from(fid: u64) -> Result<Self, Self::Error> {
        let fid = match fid {
            0 => Fid::Fail,
            1 => Fid::Exit,
            2 => Fid::Csrr,
            3 => Fid::Csrw,
            4 => Fid::Csrs,
            5 => Fid::Csrc,
            6 => Fid::Icsrr,
            7 => Fid::Icsrw,
            8 => Fid::Icsrs,
            9 => Fid::Icsrc,
            10 => Fid::Priv,
            11 => Fid::Expect,
            12 => Fid::Verify,
            13 => Fid::Mswi,
            14 => Fid::Sswi,
            15 => Fid::Mmsi,
            16 => Fid::Smsi,
            17 => Fid::Cb,
            _ => {
                log::error!("ecall function id {} is out of range", fid);
                return Err(Halt::UnknownFid(fid));
            }
        };
        Ok(fid)
    }
}

/// Per-level dispatch state.
pub struct LevelState {
    pub table: VectorTable,
    pub callbacks: CallbackRegistry,
    /// Urgencies of the interrupt handlers running in nested mode, innermost
    /// last.
    pub nesting: Vec<u16>,
}

impl LevelState {
    pub fn new(level: Level) -> Self {
        Self {
            table: VectorTable::new(level),
            callbacks: CallbackRegistry::new(),
            nesting: Vec::new(),
        }
    }
}

pub struct Monitor {
    pub queue: ExpectQueue,
    pub m: LevelState,
    pub s: LevelState,
}

impl Monitor {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            queue: ExpectQueue::new(queue_capacity),
            m: LevelState::new(Level::Machine),
            s: LevelState::new(Level::Supervisor),
        }
    }

    pub fn level(&self, level: Level) -> &LevelState {
        match level {
            Level::Machine => &self.m,
            Level::Supervisor => &self.s,
        }
    }

    pub fn level_mut(&mut self, level: Level) -> &mut LevelState {
        match level {
            Level::Machine => &mut self.m,
            Level::Supervisor => &mut self.s,
        }
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new(crate::queue::QUEUE_CAPACITY)
    }
}
