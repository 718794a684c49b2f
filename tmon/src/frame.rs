use serde::{Deserialize, Serialize};

use crate::csr::{
    Level, Mode, HSTATUS_SPV_SHIFT, MSTATUSH_MPV_SHIFT, MSTATUS_MPP, MSTATUS_MPP_SHIFT, MSTATUS_SPP,
    MSTATUS_SPP_SHIFT,
};
use crate::hart::{A0, A1, RA};
use crate::CAUSE_INTERRUPT;

/// Width of every instruction; compressed encodings are not used.
pub const INSN_WIDTH: u64 = 4;

/// Interrupted context captured on trap entry.
///
/// Handlers mutate the frame to change how the interrupted code resumes; the
/// trap return writes registers, status and resume pc back into the hart.
///
/// On the machine level `status` mirrors `mstatus` and `status_ext` mirrors
/// `mstatush`; on the supervisor level they mirror `sstatus` and `hstatus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrapFrame {
    pub level: Level,
    pub regs: [u64; 32],
    pub status: u64,
    pub cause: u64,
    pub tval: u64,
    pub epc: u64,
    pub status_ext: u64,
    /// Claimed top interrupt (`xtopei` / `xtopi` format), zero for exceptions.
    pub aux: u64,
}

impl TrapFrame {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            regs: [0; 32],
            status: 0,
            cause: 0,
            tval: 0,
            epc: 0,
            status_ext: 0,
            aux: 0,
        }
    }

    pub fn ra(&self) -> u64 {
        self.regs[RA]
    }

    pub fn a0(&self) -> u64 {
        self.regs[A0]
    }

    pub fn a1(&self) -> u64 {
        self.regs[A1]
    }

    pub fn set_a0(&mut self, val: u64) {
        self.regs[A0] = val;
    }

    pub fn epc(&self) -> u64 {
        self.epc
    }

    pub fn set_epc(&mut self, epc: u64) {
        self.epc = epc;
    }

    /// Resume after the trapping instruction.
    pub fn skip_insn(&mut self) {
        self.epc = self.epc.wrapping_add(INSN_WIDTH);
    }

    pub fn is_interrupt(&self) -> bool {
        self.cause & CAUSE_INTERRUPT != 0
    }

    /// Cause code without the interrupt bit.
    pub fn code(&self) -> u64 {
        self.cause & !CAUSE_INTERRUPT
    }

    /// Identity carried in the upper half of `aux`.
    pub fn aux_id(&self) -> u64 {
        self.aux >> 16
    }

    /// Raw previous privilege and virtualization fields as `(pp, pv)`.
    pub fn previous_fields(&self) -> (u64, u64) {
        match self.level {
            Level::Machine => (
                (self.status >> MSTATUS_MPP_SHIFT) & 0b11,
                (self.status_ext >> MSTATUSH_MPV_SHIFT) & 1,
            ),
            Level::Supervisor => (
                (self.status >> MSTATUS_SPP_SHIFT) & 1,
                (self.status_ext >> HSTATUS_SPV_SHIFT) & 1,
            ),
        }
    }

    /// Packed mode the trap will return to.
    pub fn previous_bits(&self) -> u64 {
        let (pp, pv) = self.previous_fields();
        (pv << 2) | pp
    }

    pub fn previous_mode(&self) -> Mode {
        let (pp, pv) = self.previous_fields();
        Mode::from_mpp(pp, pv)
    }

    /// Rewrite the previous privilege and virtualization fields from a packed
    /// mode value so the trap return lands in that mode.
    pub fn set_previous_bits(&mut self, bits: u64) {
        let pp = bits & 0b11;
        let pv = (bits >> 2) & 1;
        match self.level {
            Level::Machine => {
                self.status = (self.status & !MSTATUS_MPP) | (pp << MSTATUS_MPP_SHIFT);
                self.status_ext = (self.status_ext & !(1 << MSTATUSH_MPV_SHIFT)) | (pv << MSTATUSH_MPV_SHIFT);
            }
            Level::Supervisor => {
                self.status = (self.status & !MSTATUS_SPP) | ((pp & 1) << MSTATUS_SPP_SHIFT);
                self.status_ext = (self.status_ext & !(1 << HSTATUS_SPV_SHIFT)) | (pv << HSTATUS_SPV_SHIFT);
            }
        }
    }
}
