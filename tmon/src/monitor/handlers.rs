//! Generic and named trap handlers shared by both levels.
//!
//! Every handler pops the head of the expected trap queue and compares it
//! with the trap actually taken. A mismatch is fatal.

use log::{error, info, warn};

use crate::frame::TrapFrame;
use crate::machine::Machine;
use crate::monitor::vector::{self, FaultKind, EXTERNAL_BASE, MAJOR_BASE};
use crate::Halt;

pub fn exception_default(m: &mut Machine, frame: &mut TrapFrame) -> Result<(), Halt> {
    let observed = frame.code();
    expect_and_call(m, frame, observed, "exception")
}

/// Major interrupt; the identity is read back from `xtopi`.
pub fn major_default(m: &mut Machine, frame: &mut TrapFrame) -> Result<(), Halt> {
    let iid = m.hart.topi(frame.level, &m.bus) >> 16;
    expect_and_call(m, frame, MAJOR_BASE + iid, "major interrupt")
}

/// External interrupt; the identity was claimed into `frame.aux` on entry.
pub fn external_default(m: &mut Machine, frame: &mut TrapFrame) -> Result<(), Halt> {
    let observed = EXTERNAL_BASE + frame.aux_id();
    expect_and_call(m, frame, observed, "external interrupt")
}

/// Direct-mode wrapper installed on the MEI/SEI slot: claim `xtopei` and
/// hand over to the external interrupt slot of the claimed identity.
pub fn external_claim(m: &mut Machine, frame: &mut TrapFrame) -> Result<(), Halt> {
    let level = frame.level;
    frame.aux = m.bus.imsic(level).claim();
    vector::dispatch(m, level, EXTERNAL_BASE + frame.aux_id(), frame)
}

fn expect_and_call(m: &mut Machine, frame: &mut TrapFrame, observed: u64, kind: &str) -> Result<(), Halt> {
    let level = frame.level;
    let expected = m.monitor.queue.pop();

    if observed != expected {
        error!(
            "unexpected {} {} trap #{} @pc {:#x}, expected #{}",
            level, kind, observed, frame.epc, expected
        );
        info!("cause: {:#x}; status: {:#x}", frame.cause, frame.status);
        return Err(Halt::Unexpected {
            level,
            observed,
            expected,
            epc: frame.epc,
        });
    }

    info!("expected {} {} trap #{}", level, kind, observed);
    match m.monitor.level(level).callbacks.get(observed) {
        Some(callback) => callback(m, frame),
        None => {
            warn!("no user callback assigned to trap #{}", observed);
            Ok(())
        }
    }
}

/// Named fault handler: resume past the faulting instruction, or at the
/// return address for a fetch fault since the faulting pc is the call target.
pub fn fault(m: &mut Machine, frame: &mut TrapFrame, kind: FaultKind) -> Result<(), Halt> {
    let tval = frame.tval;
    let expected = m.monitor.queue.pop();

    if expected != kind.trap_id() {
        error!("unexpected {} @{:#x}", kind.describe(), tval);
        return Err(Halt::Unexpected {
            level: frame.level,
            observed: kind.trap_id(),
            expected,
            epc: frame.epc,
        });
    }

    info!("expected {} @{:#x}", kind.describe(), tval);
    match kind {
        FaultKind::Fetch => {
            let ra = frame.ra();
            frame.set_epc(ra);
        }
        _ => frame.skip_insn(),
    }
    Ok(())
}
