//! Privilege switch service.
//!
//! A switch never touches the live CSRs: it rewrites the previous privilege
//! and virtualization fields captured in the trap frame, so the trap return
//! lands in the requested mode.

use crate::csr::Mode;
use crate::frame::TrapFrame;
use crate::Halt;

pub fn request_transition(frame: &mut TrapFrame, target: u64) -> Result<(), Halt> {
    if Mode::from_bits(target).is_none() {
        log::error!("target privilege mode specification {{{}}} is invalid", target);
        return Err(Halt::InvalidMode(target));
    }

    let source = frame.previous_bits();
    log::info!(
        "{} to {} privilege mode switch",
        Mode::name_of(source),
        Mode::name_of(target)
    );
    frame.set_previous_bits(target);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csr::{Level, MSTATUS_MPP, MSTATUS_MPP_SHIFT};

    #[test]
    fn rewrites_previous_mode_only() {
        let mut frame = TrapFrame::new(Level::Machine);
        frame.status = (0b11 << MSTATUS_MPP_SHIFT) | 0x8;
        frame.epc = 0x100;

        request_transition(&mut frame, Mode::VirtualSupervisor.bits()).unwrap();
        assert_eq!(frame.previous_mode(), Mode::VirtualSupervisor);
        assert_eq!(frame.status & !MSTATUS_MPP, 0x8);
        assert_eq!(frame.epc, 0x100);

        request_transition(&mut frame, Mode::Machine.bits()).unwrap();
        assert_eq!(frame.previous_mode(), Mode::Machine);
    }

    #[test]
    fn reserved_targets_are_fatal() {
        for target in [2, 6, 7, 42] {
            let mut frame = TrapFrame::new(Level::Machine);
            let before = frame.clone();
            assert!(matches!(
                request_transition(&mut frame, target),
                Err(Halt::InvalidMode(t)) if t == target
            ));
            assert_eq!(frame, before);
        }
    }
}
