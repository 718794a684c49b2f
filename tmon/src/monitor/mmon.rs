//! Machine-level environment call services.
//!
//! `a0` selects the service, `a1` carries its argument. Every service that
//! returns reports success with `a0 = 0`; the entry point then resumes after
//! the `ecall`.

use log::{error, info, warn};

use crate::csr::{Level, CSR_MEDELEG, CSR_MIDELEG, IRQ_SEI};
use crate::devices::aclint::{ACLINT_BASE, MSWI_OFFSET, SSWI_OFFSET};
use crate::devices::imsic::{IMSIC_M_BASE, IMSIC_S_BASE, SETEIPNUM_LE};
use crate::frame::TrapFrame;
use crate::machine::Machine;
use crate::monitor::vector::{EXTERNAL_BASE, MAJOR_BASE};
use crate::monitor::{privilege, Fid, FID_COUNT};
use crate::Halt;

type Service = fn(&mut Machine, &mut TrapFrame) -> Result<(), Halt>;

const SERVICES: [Service; FID_COUNT] = [
    fail,          // FAIL
    exit,          // EXIT
    unimplemented, // CSRR
    unimplemented, // CSRW
    unimplemented, // CSRS
    unimplemented, // CSRC
    unimplemented, // ICSRR
    unimplemented, // ICSRW
    unimplemented, // ICSRS
    unimplemented, // ICSRC
    switch_privilege,
    expect,
    verify,
    mswi,
    sswi,
    mmsi,
    smsi,
    link_callback,
];

/// Entry point for ecalls taken at the machine level.
pub fn ecall(m: &mut Machine, frame: &mut TrapFrame) -> Result<(), Halt> {
    let fid = Fid::try_from(frame.a0())?;
    SERVICES[fid as usize](m, frame)?;
    frame.skip_insn();
    Ok(())
}

pub(super) fn fail(_m: &mut Machine, frame: &mut TrapFrame) -> Result<(), Halt> {
    error!("Fatal Error");
    info!(
        "pc: {:#x}; ra: {:#x}; status: {:#x}; error: {};",
        frame.epc,
        frame.ra(),
        frame.status,
        frame.a0()
    );
    Err(Halt::Fail {
        pc: frame.epc,
        ra: frame.ra(),
        status: frame.status,
        error: frame.a0(),
    })
}

pub(super) fn exit(_m: &mut Machine, frame: &mut TrapFrame) -> Result<(), Halt> {
    Err(Halt::Exit(frame.a1() as i32))
}

fn unimplemented(_m: &mut Machine, frame: &mut TrapFrame) -> Result<(), Halt> {
    warn!("not implemented");
    frame.set_a0(0);
    Ok(())
}

fn switch_privilege(_m: &mut Machine, frame: &mut TrapFrame) -> Result<(), Halt> {
    let target = frame.a1();
    privilege::request_transition(frame, target)?;
    frame.set_a0(0);
    Ok(())
}

fn expect(m: &mut Machine, frame: &mut TrapFrame) -> Result<(), Halt> {
    let id = frame.a1();
    info!("expect trap #{}", id);
    m.monitor.queue.append(id)?;
    frame.set_a0(0);
    Ok(())
}

fn verify(m: &mut Machine, frame: &mut TrapFrame) -> Result<(), Halt> {
    if !m.monitor.queue.is_empty() {
        error!(
            "expected trap queue is not empty, pending {:?}",
            m.monitor.queue.pending()
        );
        return Err(Halt::Pending(m.monitor.queue.len()));
    }
    frame.set_a0(0);
    Ok(())
}

fn mswi(m: &mut Machine, frame: &mut TrapFrame) -> Result<(), Halt> {
    m.mmio_write32(ACLINT_BASE + MSWI_OFFSET, (frame.a1() != 0) as u32)?;
    frame.set_a0(0);
    Ok(())
}

fn sswi(m: &mut Machine, frame: &mut TrapFrame) -> Result<(), Halt> {
    m.mmio_write32(ACLINT_BASE + SSWI_OFFSET, (frame.a1() != 0) as u32)?;
    frame.set_a0(0);
    Ok(())
}

fn mmsi(m: &mut Machine, frame: &mut TrapFrame) -> Result<(), Halt> {
    m.mmio_write32(IMSIC_M_BASE + SETEIPNUM_LE, frame.a1() as u32)?;
    frame.set_a0(0);
    Ok(())
}

fn smsi(m: &mut Machine, frame: &mut TrapFrame) -> Result<(), Halt> {
    m.mmio_write32(IMSIC_S_BASE + SETEIPNUM_LE, frame.a1() as u32)?;
    frame.set_a0(0);
    Ok(())
}

/// Whether trap `id` is taken by the supervisor level under the current
/// `medeleg` / `mideleg`. External identities follow the SEI line.
fn delegated(m: &Machine, id: u64) -> bool {
    let (csr, bit) = match id {
        0..=31 => (CSR_MEDELEG, id),
        32..=63 => (CSR_MIDELEG, id - MAJOR_BASE),
        _ => (CSR_MIDELEG, IRQ_SEI),
    };
    (m.hart.csr(csr) >> bit) & 1 != 0
}

/// Registries that must hold the callback of trap `id`.
///
/// The level that takes the trap gets it. External identities also stay
/// linked at M, whose MEI line is never delegated.
fn callback_levels(m: &Machine, id: u64) -> Vec<Level> {
    match (delegated(m, id), id >= EXTERNAL_BASE) {
        (false, _) => vec![Level::Machine],
        (true, false) => vec![Level::Supervisor],
        (true, true) => vec![Level::Supervisor, Level::Machine],
    }
}

/// `a1` points at `{trap_id, routine}`; a zero routine unlinks the slot.
fn link_callback(m: &mut Machine, frame: &mut TrapFrame) -> Result<(), Halt> {
    let block = frame.a1();
    let id = m.read_word(block)?;
    let addr = m.read_word(block + 8)?;

    let routine = if addr != 0 {
        let routine = m.resolve_routine(addr).ok_or_else(|| {
            error!("no routine is linked at {:#x}", addr);
            Halt::BadCallback(addr)
        })?;
        Some(routine)
    } else {
        None
    };

    for level in callback_levels(m, id) {
        let callbacks = &mut m.monitor.level_mut(level).callbacks;
        match routine {
            Some(routine) => {
                info!("link user callback @{:#x} to {} trap #{}", addr, level, id);
                callbacks.link(id, routine)?;
            }
            None => {
                info!("unlink user callback from {} trap #{}", level, id);
                callbacks.unlink(id)?;
            }
        }
    }
    frame.set_a0(0);
    Ok(())
}
