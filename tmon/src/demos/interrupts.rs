use crate::csr::{Level, CSR_MIE, CSR_MIP, IRQ_MEI, IRQ_MSI, IRQ_SSI};
use crate::frame::TrapFrame;
use crate::machine::Machine;
use crate::monitor::vector::{EXTERNAL_BASE, MAJOR_BASE};
use crate::monitor::{api, Fid, VectorMode};
use crate::Halt;

const EXT_ID: u64 = 10;

const SSI: u64 = MAJOR_BASE + IRQ_SSI;
const MSI: u64 = MAJOR_BASE + IRQ_MSI;
const EXT: u64 = EXTERNAL_BASE + EXT_ID;

fn show_lines(m: &mut Machine) -> Result<(), Halt> {
    let mip = m.csr_read(CSR_MIP)?;
    let mie = m.csr_read(CSR_MIE)?;
    m.print(format!("mip={:#x}; mie={:#x}", mip, mie));
    Ok(())
}

fn msi_callback(m: &mut Machine, _frame: &mut TrapFrame) -> Result<(), Halt> {
    m.print("M-mode MSWI callback");
    show_lines(m)?;
    m.tmon_call(Fid::Mswi, 0)?;
    Ok(())
}

fn ssi_callback(m: &mut Machine, _frame: &mut TrapFrame) -> Result<(), Halt> {
    m.print("M-mode SSWI callback");
    show_lines(m)?;
    m.tmon_call(Fid::Sswi, 0)?;
    Ok(())
}

fn ext_callback(m: &mut Machine, frame: &mut TrapFrame) -> Result<(), Halt> {
    m.print(format!(
        "M-mode external interrupt #{} callback, nesting depth {}",
        frame.aux_id(),
        m.monitor.m.nesting.len()
    ));
    Ok(())
}

/// MSWI handler that raises a more urgent external interrupt before
/// releasing its own line.
fn preempted_msi_callback(m: &mut Machine, frame: &mut TrapFrame) -> Result<(), Halt> {
    m.print("M-mode MSWI callback, raising external interrupt");
    m.tmon_call(Fid::Mmsi, EXT_ID)?;
    msi_callback(m, frame)
}

fn setup_external(m: &mut Machine) -> Result<(), Halt> {
    api::maj_enable(m, Level::Machine, IRQ_MEI, true)?;
    api::ext_enable(m, Level::Machine, EXT_ID, true)?;
    api::ext_delivery(m, Level::Machine, true)
}

/// Direct mode: one entry point, the generic handler re-reads `mtopi` to
/// find which interrupt it is serving.
pub fn direct(m: &mut Machine) -> Result<(), Halt> {
    m.print("M-mode interrupt traps, direct mode");
    api::trap_mode(m, Level::Machine, VectorMode::Direct)?;
    api::maj_enable(m, Level::Machine, IRQ_MSI, true)?;
    api::maj_enable(m, Level::Machine, IRQ_SSI, true)?;

    m.link_callback(SSI, Some(ssi_callback))?;
    m.link_callback(MSI, Some(msi_callback))?;
    m.link_callback(EXT, Some(ext_callback))?;

    m.case(1);
    api::all_enable(m, Level::Machine, false)?;
    api::maj_priority(m, Level::Machine, IRQ_SSI, 1)?;
    api::maj_priority(m, Level::Machine, IRQ_MSI, 2)?;
    m.tmon_call(Fid::Mswi, 1)?;
    m.tmon_call(Fid::Sswi, 1)?;
    m.expect(SSI)?;
    m.expect(MSI)?;
    api::all_enable(m, Level::Machine, true)?;
    m.verify()?;

    m.case(2);
    api::all_enable(m, Level::Machine, false)?;
    setup_external(m)?;
    m.tmon_call(Fid::Mmsi, EXT_ID)?;
    m.expect(EXT)?;
    api::all_enable(m, Level::Machine, true)?;
    m.verify()?;

    m.exit(0)
}

/// Nested vectored mode: handlers run with interrupts enabled and only
/// strictly more urgent interrupts preempt them.
pub fn nested(m: &mut Machine) -> Result<(), Halt> {
    m.print("M-mode interrupt traps, nested vectored mode");
    api::trap_mode(m, Level::Machine, VectorMode::Nested)?;
    api::maj_priority(m, Level::Machine, IRQ_SSI, 1)?;
    api::maj_priority(m, Level::Machine, IRQ_MSI, 20)?;

    m.link_callback(MSI, Some(msi_callback))?;
    m.link_callback(SSI, Some(ssi_callback))?;
    m.link_callback(EXT, Some(ext_callback))?;

    api::maj_enable(m, Level::Machine, IRQ_MSI, true)?;
    api::maj_enable(m, Level::Machine, IRQ_SSI, true)?;
    setup_external(m)?;

    m.case(1);
    api::all_enable(m, Level::Machine, false)?;
    m.expect(SSI)?;
    m.expect(MSI)?;
    m.tmon_call(Fid::Sswi, 1)?;
    m.tmon_call(Fid::Mswi, 1)?;
    show_lines(m)?;
    api::all_enable(m, Level::Machine, true)?;
    m.verify()?;

    m.case(2);
    api::all_enable(m, Level::Machine, false)?;
    m.expect(EXT)?;
    m.tmon_call(Fid::Mmsi, EXT_ID)?;
    api::all_enable(m, Level::Machine, true)?;
    m.verify()?;

    // taken by urgency: SSI (1), external #10 (10), MSI (20)
    m.case(3);
    api::all_enable(m, Level::Machine, false)?;
    m.expect(SSI)?;
    m.expect(EXT)?;
    m.expect(MSI)?;
    m.tmon_call(Fid::Sswi, 1)?;
    m.tmon_call(Fid::Mswi, 1)?;
    m.tmon_call(Fid::Mmsi, EXT_ID)?;
    api::all_enable(m, Level::Machine, true)?;
    m.verify()?;

    // external #10 preempts the running MSWI handler
    m.case(4);
    m.link_callback(MSI, Some(preempted_msi_callback))?;
    m.expect(MSI)?;
    m.expect(EXT)?;
    m.tmon_call(Fid::Mswi, 1)?;
    m.verify()?;

    m.exit(0)
}
