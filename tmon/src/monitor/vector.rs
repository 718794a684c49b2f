//! Trap vector tables and trap entry.
//!
//! Each level has 96 handler slots: exceptions by cause in `0..32`, major
//! interrupts at `32 + iid` and external interrupts at `64 + identity`. The
//! same numbering is used for expected trap ids and for callback slots.

use crate::csr::{Level, CSR_MSTATUS};
use crate::frame::TrapFrame;
use crate::machine::Machine;
use crate::monitor::{handlers, mmon, smon};
use crate::Halt;

pub const TRAP_SLOTS: usize = 96;
pub const MAJOR_BASE: u64 = 32;
pub const EXTERNAL_BASE: u64 = 64;

/// Routine a test program attaches to a trap id.
pub type UserCallback = fn(&mut Machine, &mut TrapFrame) -> Result<(), Halt>;

/// Exceptions with a dedicated handler that resumes past the faulting access.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FaultKind {
    IllegalInstruction,
    Fetch,
    Load,
    RegionCrossing,
    Store,
}

impl FaultKind {
    pub fn trap_id(self) -> u64 {
        match self {
            FaultKind::IllegalInstruction => 2,
            FaultKind::Fetch => 12,
            FaultKind::Load => 13,
            FaultKind::RegionCrossing => 14,
            FaultKind::Store => 15,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            FaultKind::IllegalInstruction => "illegal instruction trap",
            FaultKind::Fetch => "instruction fetch fault",
            FaultKind::Load => "data load fault",
            FaultKind::RegionCrossing => "SMPU region crossing fault",
            FaultKind::Store => "data store fault",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum TrapHandler {
    ExceptionDefault,
    MajorDefault,
    ExternalDefault,
    /// Claims the top external interrupt and re-dispatches to its slot.
    ExternalClaim,
    Ecall,
    Fault(FaultKind),
    Custom(UserCallback),
}

/// `xtvec.MODE`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum VectorMode {
    Direct,
    Vectored,
    Reserved,
    Nested,
}

impl VectorMode {
    pub fn from_tvec(tvec: u64) -> Self {
        match tvec & 0b11 {
            0 => VectorMode::Direct,
            1 => VectorMode::Vectored,
            2 => VectorMode::Reserved,
            _ => VectorMode::Nested,
        }
    }

    pub fn bits(self) -> u64 {
        match self {
            VectorMode::Direct => 0,
            VectorMode::Vectored => 1,
            VectorMode::Reserved => 2,
            VectorMode::Nested => 3,
        }
    }
}

fn default_handler(level: Level, slot: u64) -> TrapHandler {
    match slot {
        2 => TrapHandler::Fault(FaultKind::IllegalInstruction),
        8..=11 => TrapHandler::Ecall,
        12 => TrapHandler::Fault(FaultKind::Fetch),
        13 => TrapHandler::Fault(FaultKind::Load),
        14 => TrapHandler::Fault(FaultKind::RegionCrossing),
        15 => TrapHandler::Fault(FaultKind::Store),
        0..=31 => TrapHandler::ExceptionDefault,
        s if s == MAJOR_BASE + level.external_iid() => TrapHandler::ExternalClaim,
        32..=63 => TrapHandler::MajorDefault,
        _ => TrapHandler::ExternalDefault,
    }
}

pub struct VectorTable {
    slots: [TrapHandler; TRAP_SLOTS],
}

impl VectorTable {
    /// Table with the default handler in every slot.
    pub fn new(level: Level) -> Self {
        let mut slots = [TrapHandler::ExceptionDefault; TRAP_SLOTS];
        for (slot, handler) in slots.iter_mut().enumerate() {
            *handler = default_handler(level, slot as u64);
        }
        Self { slots }
    }

    pub fn get(&self, slot: u64) -> Option<TrapHandler> {
        self.slots.get(slot as usize).copied()
    }

    pub fn set(&mut self, slot: u64, handler: TrapHandler) -> Result<(), Halt> {
        let entry = self.slots.get_mut(slot as usize).ok_or(Halt::TrapIndex(slot))?;
        *entry = handler;
        Ok(())
    }
}

pub struct CallbackRegistry {
    slots: [Option<UserCallback>; TRAP_SLOTS],
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            slots: [None; TRAP_SLOTS],
        }
    }

    pub fn get(&self, id: u64) -> Option<UserCallback> {
        self.slots.get(id as usize).copied().flatten()
    }

    pub fn link(&mut self, id: u64, callback: UserCallback) -> Result<(), Halt> {
        let slot = self.slots.get_mut(id as usize).ok_or(Halt::TrapIndex(id))?;
        *slot = Some(callback);
        Ok(())
    }

    pub fn unlink(&mut self, id: u64) -> Result<(), Halt> {
        let slot = self.slots.get_mut(id as usize).ok_or(Halt::TrapIndex(id))?;
        *slot = None;
        Ok(())
    }

    pub fn is_linked(&self, id: u64) -> bool {
        self.get(id).is_some()
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Level entry point, selected by the level's `xtvec.MODE`.
pub fn trap_entry(m: &mut Machine, level: Level, frame: &mut TrapFrame) -> Result<(), Halt> {
    let mode = VectorMode::from_tvec(m.hart.csr(level.tvec()));
    match mode {
        VectorMode::Direct => {
            let slot = if frame.is_interrupt() {
                MAJOR_BASE + frame.code()
            } else {
                frame.code()
            };
            dispatch(m, level, slot, frame)
        }
        VectorMode::Nested if frame.is_interrupt() => nested_interrupt(m, level, frame),
        VectorMode::Nested => dispatch(m, level, frame.code(), frame),
        _ => {
            log::error!("{}tvec.MODE={} is not supported", level.prefix(), mode.bits());
            Err(Halt::UnsupportedVectorMode(mode.bits()))
        }
    }
}

/// Run the handler installed in `slot`.
pub fn dispatch(m: &mut Machine, level: Level, slot: u64, frame: &mut TrapFrame) -> Result<(), Halt> {
    let handler = m
        .monitor
        .level(level)
        .table
        .get(slot)
        .ok_or(Halt::TrapIndex(slot))?;
    log::trace!("{} trap #{} -> {:?}", level, slot, handler);

    match handler {
        TrapHandler::ExceptionDefault => handlers::exception_default(m, frame),
        TrapHandler::MajorDefault => handlers::major_default(m, frame),
        TrapHandler::ExternalDefault => handlers::external_default(m, frame),
        TrapHandler::ExternalClaim => handlers::external_claim(m, frame),
        TrapHandler::Ecall => match level {
            Level::Machine => mmon::ecall(m, frame),
            Level::Supervisor => smon::ecall(m, frame),
        },
        TrapHandler::Fault(kind) => handlers::fault(m, frame, kind),
        TrapHandler::Custom(routine) => routine(m, frame),
    }
}

/// Interrupt entry in nested-vectored mode.
///
/// The handler runs with the level's interrupts enabled; only strictly more
/// urgent interrupts may preempt it.
fn nested_interrupt(m: &mut Machine, level: Level, frame: &mut TrapFrame) -> Result<(), Halt> {
    let (slot, urgency) = if frame.code() == level.external_iid() {
        frame.aux = m.bus.imsic(level).claim();
        let id = frame.aux_id();
        (EXTERNAL_BASE + id, id as u16)
    } else {
        frame.aux = m.hart.topi(level, &m.bus);
        let iid = frame.aux_id();
        (MAJOR_BASE + iid, m.hart.urgency(level, iid, &m.bus))
    };

    m.monitor.level_mut(level).nesting.push(urgency);
    log::debug!(
        "{} nested handler for trap #{} (urgency {}, depth {})",
        level,
        slot,
        urgency,
        m.monitor.level(level).nesting.len()
    );

    let ie = level.ie_bit();
    m.hart.set_csr(CSR_MSTATUS, m.hart.csr(CSR_MSTATUS) | ie);
    let result = dispatch(m, level, slot, frame);
    m.hart.set_csr(CSR_MSTATUS, m.hart.csr(CSR_MSTATUS) & !ie);

    m.monitor.level_mut(level).nesting.pop();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout() {
        let m = VectorTable::new(Level::Machine);
        assert!(matches!(m.get(2), Some(TrapHandler::Fault(FaultKind::IllegalInstruction))));
        assert!(matches!(m.get(11), Some(TrapHandler::Ecall)));
        assert!(matches!(m.get(14), Some(TrapHandler::Fault(FaultKind::RegionCrossing))));
        assert!(matches!(m.get(3), Some(TrapHandler::ExceptionDefault)));
        assert!(matches!(m.get(35), Some(TrapHandler::MajorDefault)));
        assert!(matches!(m.get(43), Some(TrapHandler::ExternalClaim)));
        assert!(matches!(m.get(74), Some(TrapHandler::ExternalDefault)));
        assert!(m.get(96).is_none());

        let s = VectorTable::new(Level::Supervisor);
        assert!(matches!(s.get(41), Some(TrapHandler::ExternalClaim)));
        assert!(matches!(s.get(43), Some(TrapHandler::MajorDefault)));
    }

    #[test]
    fn slot_updates_are_bounds_checked() {
        let mut table = VectorTable::new(Level::Machine);
        table.set(35, TrapHandler::ExceptionDefault).unwrap();
        assert!(matches!(table.get(35), Some(TrapHandler::ExceptionDefault)));
        assert!(matches!(table.set(96, TrapHandler::Ecall), Err(Halt::TrapIndex(96))));
    }

    #[test]
    fn callback_registry_links_and_unlinks() {
        fn noop(_: &mut Machine, _: &mut TrapFrame) -> Result<(), Halt> {
            Ok(())
        }
        let mut reg = CallbackRegistry::new();
        assert!(!reg.is_linked(35));
        reg.link(35, noop).unwrap();
        assert!(reg.is_linked(35));
        reg.unlink(35).unwrap();
        assert!(reg.get(35).is_none());
        assert!(matches!(reg.link(200, noop), Err(Halt::TrapIndex(200))));
    }

    #[test]
    fn vector_mode_bits() {
        assert_eq!(VectorMode::from_tvec(0x203), VectorMode::Nested);
        assert_eq!(VectorMode::from_tvec(0x200), VectorMode::Direct);
        assert_eq!(VectorMode::from_tvec(0x201).bits(), 1);
    }
}
