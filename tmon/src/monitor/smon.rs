//! Supervisor-level environment call services.
//!
//! Only FAIL and EXIT are served locally. Every other service except PRIV is
//! forwarded to the machine level by issuing the same call again from
//! S-mode.

use crate::frame::TrapFrame;
use crate::machine::Machine;
use crate::monitor::{mmon, Fid};
use crate::Halt;

/// Entry point for ecalls delegated to the supervisor level.
pub fn ecall(m: &mut Machine, frame: &mut TrapFrame) -> Result<(), Halt> {
    match Fid::try_from(frame.a0())? {
        Fid::Fail => mmon::fail(m, frame)?,
        Fid::Exit => mmon::exit(m, frame)?,
        Fid::Priv => {
            log::error!("switching privilege from delegated S-mode trap is not implemented");
            return Err(Halt::PrivSwitchUnsupported);
        }
        _ => forward(m, frame)?,
    }
    frame.skip_insn();
    Ok(())
}

fn forward(m: &mut Machine, frame: &mut TrapFrame) -> Result<(), Halt> {
    let (fid, arg) = (frame.a0(), frame.a1());
    log::info!("S-mode forwards ecall({:#x}, {:#x}) to M-mode", fid, arg);
    let ret = m.ecall(fid, arg)?;
    frame.set_a0(ret);
    Ok(())
}
