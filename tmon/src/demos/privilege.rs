use crate::csr::{Level, Mode, CSR_MSTATUS, CSR_SSTATUS};
use crate::machine::Machine;
use crate::monitor::api;
use crate::monitor::VectorMode;
use crate::Halt;

const EID_ILLEGAL: u64 = 2;
const EID_UCALL: u64 = 8;
const EID_VCALL: u64 = 10;

/// Every mode reached from an M-mode ecall handler.
pub fn transitions(m: &mut Machine) -> Result<(), Halt> {
    m.print("privilege mode transitions (M-mode ecall traps)");
    api::trap_mode(m, Level::Machine, VectorMode::Direct)?;

    let targets = [
        Mode::Supervisor,
        Mode::User,
        Mode::Machine,
        Mode::User,
        Mode::VirtualUser,
        Mode::VirtualSupervisor,
    ];
    for (case, target) in (1..).zip(targets) {
        m.case(case);
        m.set_privilege(target)?;
        m.print(format!("now in {}", m.hart.mode.name()));
    }

    m.exit(0)
}

/// U-mode and VU-mode ecalls go to the S-mode dispatcher, which forwards the
/// services it does not serve itself.
pub fn delegated(m: &mut Machine) -> Result<(), Halt> {
    m.print("privilege mode transitions, M/S-mode environment calls");
    api::trap_mode(m, Level::Machine, VectorMode::Direct)?;
    api::exc_delegate(m, EID_UCALL, true)?;
    api::exc_delegate(m, EID_VCALL, true)?;

    m.set_privilege(Mode::Supervisor)?;
    api::trap_mode(m, Level::Supervisor, VectorMode::Direct)?;

    m.case(1);
    m.set_privilege(Mode::Supervisor)?;

    m.case(2);
    m.set_privilege(Mode::User)?;

    // from here on every service passes through the S-mode dispatcher
    m.case(3);
    m.expect(EID_ILLEGAL)?;
    m.illegal()?;
    m.verify()?;

    m.case(4);
    m.expect(EID_ILLEGAL)?;
    m.expect(EID_ILLEGAL)?;
    m.csr_read(CSR_SSTATUS)?;
    m.csr_write(CSR_MSTATUS, 0)?;
    m.verify()?;
    m.print(format!("still in {}", m.hart.mode.name()));

    m.exit(0)
}
