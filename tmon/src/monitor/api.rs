//! Trap configuration API for test programs.
//!
//! Everything here runs as ordinary CSR instructions in the caller's current
//! mode, so the privilege rules of the hart apply: configuring the machine
//! level from S-mode traps like any other illegal CSR access.

use crate::csr::{Level, CSR_MEDELEG, CSR_MIDELEG, ISELECT_EIDELIVERY, ISELECT_EIE0, ISELECT_EITHRESHOLD, ISELECT_IPRIO0};
use crate::layout::{MTVEC_BASE, STVEC_BASE};
use crate::machine::Machine;
use crate::monitor::vector::{TrapHandler, VectorMode, EXTERNAL_BASE, MAJOR_BASE};
use crate::Halt;

fn vector_base(level: Level) -> u64 {
    match level {
        Level::Machine => MTVEC_BASE,
        Level::Supervisor => STVEC_BASE,
    }
}

fn set_or_clear(m: &mut Machine, csr: u16, bits: u64, set: bool) -> Result<(), Halt> {
    if set {
        m.csr_set(csr, bits)?;
    } else {
        m.csr_clear(csr, bits)?;
    }
    Ok(())
}

/// Select the addressing mode of the level's vector table.
pub fn trap_mode(m: &mut Machine, level: Level, mode: VectorMode) -> Result<(), Halt> {
    match mode {
        VectorMode::Direct | VectorMode::Nested => {
            m.csr_write(level.tvec(), vector_base(level) | mode.bits())?;
            Ok(())
        }
        _ => {
            log::error!("trap vector mode {} is not supported", mode.bits());
            Err(Halt::UnsupportedVectorMode(mode.bits()))
        }
    }
}

fn setvec(m: &mut Machine, level: Level, slot: u64, handler: TrapHandler) -> Result<(), Halt> {
    let mode = VectorMode::from_tvec(m.csr_read(level.tvec())?);
    match mode {
        VectorMode::Direct | VectorMode::Nested => m.monitor.level_mut(level).table.set(slot, handler),
        _ => {
            log::error!(
                "setting trap vector for {}tvec.MODE={} is not implemented",
                level.prefix(),
                mode.bits()
            );
            Err(Halt::UnsupportedVectorMode(mode.bits()))
        }
    }
}

fn check_index(index: u64) -> Result<u64, Halt> {
    if index < MAJOR_BASE {
        Ok(index)
    } else {
        Err(Halt::TrapIndex(index))
    }
}

/// Install `handler` for exception `eid`.
pub fn exc_setvec(m: &mut Machine, level: Level, eid: u64, handler: TrapHandler) -> Result<(), Halt> {
    let slot = check_index(eid)?;
    setvec(m, level, slot, handler)
}

/// Install `handler` for major interrupt `iid`.
pub fn maj_setvec(m: &mut Machine, level: Level, iid: u64, handler: TrapHandler) -> Result<(), Halt> {
    let slot = MAJOR_BASE + check_index(iid)?;
    setvec(m, level, slot, handler)
}

/// Install `handler` for external interrupt identity `eiid`.
pub fn ext_setvec(m: &mut Machine, level: Level, eiid: u64, handler: TrapHandler) -> Result<(), Halt> {
    let slot = EXTERNAL_BASE + check_index(eiid)?;
    setvec(m, level, slot, handler)
}

pub fn exc_delegate(m: &mut Machine, eid: u64, delegate: bool) -> Result<(), Halt> {
    set_or_clear(m, CSR_MEDELEG, 1 << check_index(eid)?, delegate)
}

pub fn maj_delegate(m: &mut Machine, iid: u64, delegate: bool) -> Result<(), Halt> {
    set_or_clear(m, CSR_MIDELEG, 1 << check_index(iid)?, delegate)
}

/// Set the priority byte of major interrupt `iid` in the level's `iprio`
/// array; four interrupts share one indirect register.
pub fn maj_priority(m: &mut Machine, level: Level, iid: u64, priority: u8) -> Result<(), Halt> {
    let shift = (iid % 4) * 8;
    m.csr_write(level.iselect(), ISELECT_IPRIO0 + (check_index(iid)? >> 2))?;
    let val = m.csr_read(level.ireg())?;
    let val = (val & !(0xFF << shift)) | ((priority as u64) << shift);
    m.csr_write(level.ireg(), val)?;
    Ok(())
}

pub fn maj_enable(m: &mut Machine, level: Level, iid: u64, enable: bool) -> Result<(), Halt> {
    set_or_clear(m, level.ie(), 1 << check_index(iid)?, enable)
}

/// Enable or disable identity `eiid` in the level's interrupt file.
pub fn ext_enable(m: &mut Machine, level: Level, eiid: u64, enable: bool) -> Result<(), Halt> {
    m.csr_write(level.iselect(), ISELECT_EIE0 + (eiid >> 5))?;
    set_or_clear(m, level.ireg(), 1 << (eiid % 32), enable)
}

pub fn ext_delivery(m: &mut Machine, level: Level, enable: bool) -> Result<(), Halt> {
    m.csr_write(level.iselect(), ISELECT_EIDELIVERY)?;
    m.csr_write(level.ireg(), enable as u64)?;
    Ok(())
}

pub fn ext_threshold(m: &mut Machine, level: Level, threshold: u64) -> Result<(), Halt> {
    m.csr_write(level.iselect(), ISELECT_EITHRESHOLD)?;
    m.csr_write(level.ireg(), threshold)?;
    Ok(())
}

/// Global interrupt enable of the level (`mstatus.MIE` / `sstatus.SIE`).
pub fn all_enable(m: &mut Machine, level: Level, enable: bool) -> Result<(), Halt> {
    set_or_clear(m, level.status(), level.ie_bit(), enable)
}
