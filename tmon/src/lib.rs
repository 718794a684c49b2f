//! Test monitor for a RISC-V hart with S-mode memory protection extensions.
//!
//! The monitor routes machine and supervisor traps through per-level vector
//! tables, serves the ecall protocol used by test programs and checks every
//! observed trap against a FIFO of expected trap identifiers. The hart, its
//! interrupt sources and the protection units are simulated so that test
//! programs run as ordinary Rust functions driving a [`machine::Machine`].

pub mod bus;
pub mod console;
pub mod csr;
pub mod demos;
pub mod devices;
pub mod frame;
pub mod hart;
pub mod layout;
pub mod machine;
pub mod monitor;
pub mod mpu;
pub mod queue;
pub mod snapshot;
pub mod sram;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::csr::Level;
use crate::sram::MemoryError;

/// Bit set in `xcause` when the trap is an interrupt.
pub const CAUSE_INTERRUPT: u64 = 1 << 63;

/// Architectural traps raised by hart operations.
///
/// These never escape the machine: they are turned into trap entries and
/// handled by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trap {
    InstructionAddressMisaligned(u64),
    InstructionAccessFault(u64),
    IllegalInstruction(u64),
    Breakpoint(u64),
    LoadAddressMisaligned(u64),
    LoadAccessFault(u64),
    StoreAddressMisaligned(u64),
    StoreAccessFault(u64),
    EnvironmentCallFromU,
    EnvironmentCallFromS,
    EnvironmentCallFromVS,
    EnvironmentCallFromM,

    // MPU/PMP protection faults
    FetchProtectionFault(u64),
    LoadProtectionFault(u64),
    RegionCrossingFault(u64),
    StoreProtectionFault(u64),

    /// Major interrupt, by interrupt id.
    Interrupt(u64),
}

impl Trap {
    /// Map the trap into `(is_interrupt, cause, tval)`.
    pub fn cause_tval(&self) -> (bool, u64, u64) {
        match *self {
            Trap::InstructionAddressMisaligned(addr) => (false, 0, addr),
            Trap::InstructionAccessFault(addr) => (false, 1, addr),
            Trap::IllegalInstruction(bits) => (false, 2, bits),
            Trap::Breakpoint(pc) => (false, 3, pc),
            Trap::LoadAddressMisaligned(addr) => (false, 4, addr),
            Trap::LoadAccessFault(addr) => (false, 5, addr),
            Trap::StoreAddressMisaligned(addr) => (false, 6, addr),
            Trap::StoreAccessFault(addr) => (false, 7, addr),
            Trap::EnvironmentCallFromU => (false, 8, 0),
            Trap::EnvironmentCallFromS => (false, 9, 0),
            Trap::EnvironmentCallFromVS => (false, 10, 0),
            Trap::EnvironmentCallFromM => (false, 11, 0),
            Trap::FetchProtectionFault(addr) => (false, 12, addr),
            Trap::LoadProtectionFault(addr) => (false, 13, addr),
            Trap::RegionCrossingFault(addr) => (false, 14, addr),
            Trap::StoreProtectionFault(addr) => (false, 15, addr),
            Trap::Interrupt(iid) => (true, iid, 0),
        }
    }

    /// Encoded `xcause` value.
    pub fn cause(&self) -> u64 {
        match self.cause_tval() {
            (true, code, _) => CAUSE_INTERRUPT | code,
            (false, code, _) => code,
        }
    }
}

impl std::fmt::Display for Trap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Terminal conditions of a test program.
///
/// Every fatal path of the monitor produces one of these; they propagate with
/// `?` up to [`machine::Machine::run`], which turns them into an exit status.
#[derive(Debug, Error)]
pub enum Halt {
    #[error("exit with status {0}")]
    Exit(i32),

    #[error("fatal error requested at pc {pc:#x} (ra {ra:#x}, status {status:#x}, error {error})")]
    Fail { pc: u64, ra: u64, status: u64, error: u64 },

    #[error("target privilege mode specification {{{0}}} is invalid")]
    InvalidMode(u64),

    #[error("trap vector mode {0} is not supported")]
    UnsupportedVectorMode(u64),

    #[error("switching privilege from delegated S-mode trap is not implemented")]
    PrivSwitchUnsupported,

    #[error("function id {0} is out of range")]
    UnknownFid(u64),

    #[error("unexpected {level} trap #{observed} @pc {epc:#x}, expected #{expected}")]
    Unexpected {
        level: Level,
        observed: u64,
        expected: u64,
        epc: u64,
    },

    #[error("expected trap queue is not empty, {0} trap(s) never occurred")]
    Pending(usize),

    #[error("expected trap queue is full")]
    QueueFull,

    #[error("trap index {0} is out of range")]
    TrapIndex(u64),

    #[error("no routine is linked at {0:#x}")]
    BadCallback(u64),

    #[error("step budget of {0} operations exhausted")]
    StepLimit(u64),

    #[error("trap nesting exceeds {0} levels")]
    TrapDepth(usize),

    #[error(transparent)]
    Memory(#[from] MemoryError),
}

impl Halt {
    /// Process exit status for this halt.
    pub fn status(&self) -> i32 {
        match self {
            Halt::Exit(code) => *code,
            _ => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_causes_carry_the_interrupt_bit() {
        assert_eq!(Trap::Interrupt(3).cause(), CAUSE_INTERRUPT | 3);
        assert_eq!(Trap::StoreProtectionFault(0x40).cause(), 15);
        assert_eq!(Trap::EnvironmentCallFromVS.cause_tval(), (false, 10, 0));
    }

    #[test]
    fn halt_status_maps_exit_code() {
        assert_eq!(Halt::Exit(0).status(), 0);
        assert_eq!(Halt::Exit(3).status(), 3);
        assert_eq!(Halt::QueueFull.status(), -1);
        assert_eq!(Halt::InvalidMode(2).to_string(), "target privilege mode specification {2} is invalid");
    }
}
