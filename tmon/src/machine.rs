//! Machine driver.
//!
//! A test program is a Rust function that drives the hart one operation at a
//! time. Each operation retires like a single instruction: it either
//! completes and advances the pc, or raises an architectural trap that is
//! handed to the monitor. Interrupts are sampled after every retired
//! operation, including the ones executed inside trap handlers.
//!
//! ```ignore
//! let mut m = Machine::new(MachineConfig::default());
//! let status = m.run(|m| {
//!     m.expect(15)?;
//!     m.store(0x100, 8, 0)?;
//!     m.verify()?;
//!     m.exit(0)
//! });
//! ```

use std::collections::HashMap;

use log::{debug, error, info};

use crate::bus::{Bus, SystemBus};
use crate::console::Console;
use crate::csr::{Level, Mode, CSR_MTVEC, CSR_STVEC};
use crate::frame::INSN_WIDTH;
use crate::hart::{Hart, A0, A1, RA, SP};
use crate::layout::{
    CALLBACK_TEXT_BASE, CALLBACK_TEXT_STRIDE, DATA_BASE, DATA_SIZE, ENTRY_PC, MTVEC_BASE, SRAM_SIZE, STACK_TOP,
    STVEC_BASE,
};
use crate::monitor::vector::{self, UserCallback};
use crate::monitor::{Fid, Monitor};
use crate::queue::QUEUE_CAPACITY;
use crate::sram::MemoryError;
use crate::{Halt, Trap};

/// Default bound on retired operations per run.
pub const DEFAULT_MAX_STEPS: u64 = 1_000_000;

/// Deepest trap nesting accepted before the run is aborted.
pub const MAX_TRAP_DEPTH: usize = 32;

/// Test program entry point.
pub type Program = fn(&mut Machine) -> Result<(), Halt>;

/// Parameter block of the callback service for one trap id.
#[derive(Debug, Clone, Copy)]
struct CallbackLink {
    block: u64,
    /// Routine address last linked through the block, 0 if none yet.
    routine: u64,
}

#[derive(Debug, Clone)]
pub struct MachineConfig {
    /// Slots of the expected trap queue. Values below
    /// [`MIN_QUEUE_CAPACITY`](crate::queue::MIN_QUEUE_CAPACITY) are raised to it.
    pub queue_capacity: usize,
    /// SRAM size in bytes.
    pub sram_size: usize,
    /// Operations a run may retire before it is stopped.
    pub max_steps: u64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: QUEUE_CAPACITY,
            sram_size: SRAM_SIZE as usize,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }
}

pub struct Machine {
    pub hart: Hart,
    pub bus: SystemBus,
    pub monitor: Monitor,
    pub console: Console,

    config: MachineConfig,
    steps: u64,
    depth: usize,
    /// Routines addressable by test programs, at `CALLBACK_TEXT_BASE + i * stride`.
    routines: Vec<UserCallback>,
    /// Next free byte of the static data area.
    data_top: u64,
    links: HashMap<u64, CallbackLink>,
    last_halt: Option<Halt>,
}

fn ecall_trap(mode: Mode) -> Trap {
    match mode {
        Mode::User | Mode::VirtualUser => Trap::EnvironmentCallFromU,
        Mode::Supervisor => Trap::EnvironmentCallFromS,
        Mode::VirtualSupervisor => Trap::EnvironmentCallFromVS,
        Mode::Machine => Trap::EnvironmentCallFromM,
    }
}

impl Machine {
    /// Reset state: M-mode at the entry point, both vector tables in direct
    /// mode, stack pointer at the top of the stack section.
    pub fn new(config: MachineConfig) -> Self {
        let mut hart = Hart::new(ENTRY_PC);
        hart.write_reg(SP, STACK_TOP);
        hart.set_csr(CSR_MTVEC, MTVEC_BASE);
        hart.set_csr(CSR_STVEC, STVEC_BASE);

        Self {
            hart,
            bus: SystemBus::new(config.sram_size),
            monitor: Monitor::new(config.queue_capacity),
            console: Console::new(),
            config,
            steps: 0,
            depth: 0,
            routines: Vec::new(),
            data_top: DATA_BASE,
            links: HashMap::new(),
            last_halt: None,
        }
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Operations retired so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Trap handlers currently running.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Condition that ended the last [`run`](Self::run).
    pub fn last_halt(&self) -> Option<&Halt> {
        self.last_halt.as_ref()
    }

    /// Run `program` to completion and return its exit status.
    ///
    /// Returning `Ok(())` without an explicit exit counts as `exit(0)`.
    pub fn run(&mut self, program: Program) -> i32 {
        let halt = match program(self) {
            Ok(()) => Halt::Exit(0),
            Err(halt) => halt,
        };
        match &halt {
            Halt::Exit(code) => info!("exit({}) after {} steps", code, self.steps),
            other => error!("halted at pc {:#x}: {}", self.hart.pc, other),
        }
        let status = halt.status();
        self.last_halt = Some(halt);
        status
    }

    // ------------------------------------------------------------------
    // Program image helpers

    /// Give `routine` an address in the text section so it can be passed to
    /// the callback service.
    pub fn link_routine(&mut self, routine: UserCallback) -> u64 {
        let addr = CALLBACK_TEXT_BASE + self.routines.len() as u64 * CALLBACK_TEXT_STRIDE;
        self.routines.push(routine);
        addr
    }

    pub fn resolve_routine(&self, addr: u64) -> Option<UserCallback> {
        let off = addr.checked_sub(CALLBACK_TEXT_BASE)?;
        if off % CALLBACK_TEXT_STRIDE != 0 {
            return None;
        }
        self.routines.get((off / CALLBACK_TEXT_STRIDE) as usize).copied()
    }

    /// Next free byte of the static data area.
    pub fn data_top(&self) -> u64 {
        self.data_top
    }

    pub(crate) fn set_data_top(&mut self, top: u64) {
        self.data_top = top;
    }

    /// Reserve `count` zeroed words in the static data area.
    pub fn alloc_words(&mut self, count: usize) -> Result<u64, Halt> {
        let bytes = count as u64 * 8;
        let end = self.data_top + bytes;
        if end > DATA_BASE + DATA_SIZE || end > self.bus.sram.size() {
            return Err(MemoryError::Exhausted(bytes).into());
        }
        let addr = self.data_top;
        self.data_top = end;
        Ok(addr)
    }

    /// Initialise memory as the program loader would, without protection
    /// checks.
    pub fn write_words(&mut self, addr: u64, words: &[u64]) -> Result<(), Halt> {
        for (i, word) in words.iter().enumerate() {
            let at = addr + i as u64 * 8;
            let off = self.bus.sram.offset(at).ok_or(MemoryError::OutOfBounds(at))?;
            self.bus.sram.store(off, 8, *word)?;
        }
        Ok(())
    }

    /// Monitor-side read of an SRAM word.
    pub fn read_word(&self, addr: u64) -> Result<u64, Halt> {
        let off = self.bus.sram.offset(addr).ok_or(MemoryError::OutOfBounds(addr))?;
        Ok(self.bus.sram.load(off, 8)?)
    }

    /// Monitor-side device register write.
    pub fn mmio_write32(&mut self, addr: u64, val: u32) -> Result<(), Halt> {
        self.bus.write32(addr, val).map_err(|trap| {
            error!("device write @{:#x} failed: {}", addr, trap);
            Halt::Memory(MemoryError::OutOfBounds(addr))
        })
    }

    // ------------------------------------------------------------------
    // Execution core

    fn tick(&mut self) -> Result<(), Halt> {
        self.steps += 1;
        if self.steps > self.config.max_steps {
            error!("step budget of {} operations exhausted", self.config.max_steps);
            return Err(Halt::StepLimit(self.config.max_steps));
        }
        Ok(())
    }

    /// Take `trap` with `epc` as the interrupted pc and run the monitor.
    fn raise(&mut self, trap: Trap, epc: u64) -> Result<(), Halt> {
        if self.depth >= MAX_TRAP_DEPTH {
            error!("trap nesting exceeds {} levels at pc {:#x}", MAX_TRAP_DEPTH, epc);
            return Err(Halt::TrapDepth(MAX_TRAP_DEPTH));
        }

        let level = self.hart.enter_trap(trap, epc);
        let mut frame = self.hart.capture_frame(level);

        self.depth += 1;
        let result = vector::trap_entry(self, level, &mut frame);
        self.depth -= 1;
        result?;

        self.hart.leave_trap(&frame);
        Ok(())
    }

    /// Instruction boundary: take every interrupt that is deliverable now.
    ///
    /// While a nested-mode handler of the same level runs, only interrupts
    /// strictly more urgent than it are taken.
    fn retire(&mut self) -> Result<(), Halt> {
        while let Some((level, iid, urgency)) = self.hart.pending_interrupt(&self.bus) {
            if self.hart.mode == level.mode() {
                if let Some(&running) = self.monitor.level(level).nesting.last() {
                    if urgency >= running {
                        break;
                    }
                }
            }
            self.tick()?;
            debug!("{} interrupt {} (urgency {}) at pc {:#x}", level, iid, urgency, self.hart.pc);
            let pc = self.hart.pc;
            self.raise(Trap::Interrupt(iid), pc)?;
        }
        Ok(())
    }

    /// Retire one operation. Returns `None` when it trapped and the handler
    /// resumed elsewhere; an operation resumed at its own pc is replayed.
    fn exec<T, F>(&mut self, mut op: F) -> Result<Option<T>, Halt>
    where
        F: FnMut(&mut Self) -> Result<T, Trap>,
    {
        loop {
            self.tick()?;
            let pc = self.hart.pc;
            match op(self) {
                Ok(val) => {
                    self.hart.pc = pc.wrapping_add(INSN_WIDTH);
                    self.retire()?;
                    return Ok(Some(val));
                }
                Err(trap) => {
                    self.raise(trap, pc)?;
                    self.retire()?;
                    if self.hart.pc != pc {
                        return Ok(None);
                    }
                    debug!("replaying operation at pc {:#x}", pc);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Operations

    pub fn nop(&mut self) -> Result<(), Halt> {
        self.exec(|_| Ok(()))?;
        Ok(())
    }

    /// `ecall` with `a0`/`a1` loaded; returns `a0` after the call.
    pub fn ecall(&mut self, a0: u64, a1: u64) -> Result<u64, Halt> {
        self.hart.write_reg(A0, a0);
        self.hart.write_reg(A1, a1);
        self.exec(|m| -> Result<(), Trap> { Err(ecall_trap(m.hart.mode)) })?;
        Ok(self.hart.read_reg(A0))
    }

    pub fn tmon_call(&mut self, fid: Fid, arg: u64) -> Result<u64, Halt> {
        self.ecall(fid as u64, arg)
    }

    pub fn load(&mut self, addr: u64, size: u64) -> Result<Option<u64>, Halt> {
        self.exec(|m| m.hart.load(&mut m.bus, addr, size))
    }

    /// Returns whether the store completed.
    pub fn store(&mut self, addr: u64, size: u64, value: u64) -> Result<bool, Halt> {
        Ok(self.exec(|m| m.hart.store(&mut m.bus, addr, size, value))?.is_some())
    }

    /// Call the leaf routine at `target`: `ra` is set to the next pc, the
    /// target is fetched, and the routine returns at once.
    pub fn call(&mut self, target: u64) -> Result<(), Halt> {
        self.tick()?;
        let ra = self.hart.pc.wrapping_add(INSN_WIDTH);
        self.hart.write_reg(RA, ra);
        self.hart.pc = target;

        loop {
            match self.hart.fetch(&mut self.bus, target) {
                Ok(()) => {
                    self.hart.pc = ra;
                    return self.retire();
                }
                Err(trap) => {
                    self.raise(trap, target)?;
                    self.retire()?;
                    if self.hart.pc != target {
                        return Ok(());
                    }
                    self.tick()?;
                }
            }
        }
    }

    /// Execute an all-zero instruction word.
    pub fn illegal(&mut self) -> Result<(), Halt> {
        self.exec(|_| -> Result<(), Trap> { Err(Trap::IllegalInstruction(0)) })?;
        Ok(())
    }

    pub fn ebreak(&mut self) -> Result<(), Halt> {
        self.exec(|m| -> Result<(), Trap> { Err(Trap::Breakpoint(m.hart.pc)) })?;
        Ok(())
    }

    /// `csrr`; reads as zero if the access trapped.
    pub fn csr_read(&mut self, csr: u16) -> Result<u64, Halt> {
        Ok(self.exec(|m| m.hart.read_csr(&m.bus, csr))?.unwrap_or(0))
    }

    pub fn csr_write(&mut self, csr: u16, val: u64) -> Result<(), Halt> {
        self.exec(|m| m.hart.write_csr(&mut m.bus, csr, val))?;
        Ok(())
    }

    /// `csrrw`; returns the old value.
    pub fn csr_swap(&mut self, csr: u16, val: u64) -> Result<u64, Halt> {
        let old = self.exec(|m| {
            let old = m.hart.read_csr(&m.bus, csr)?;
            m.hart.write_csr(&mut m.bus, csr, val)?;
            Ok(old)
        })?;
        Ok(old.unwrap_or(0))
    }

    /// `csrrs`; returns the old value.
    pub fn csr_set(&mut self, csr: u16, bits: u64) -> Result<u64, Halt> {
        let old = self.exec(|m| {
            let old = m.hart.read_csr(&m.bus, csr)?;
            m.hart.write_csr(&mut m.bus, csr, old | bits)?;
            Ok(old)
        })?;
        Ok(old.unwrap_or(0))
    }

    /// `csrrc`; returns the old value.
    pub fn csr_clear(&mut self, csr: u16, bits: u64) -> Result<u64, Halt> {
        let old = self.exec(|m| {
            let old = m.hart.read_csr(&m.bus, csr)?;
            m.hart.write_csr(&mut m.bus, csr, old & !bits)?;
            Ok(old)
        })?;
        Ok(old.unwrap_or(0))
    }

    /// Read an indirect register of `level` through `xiselect` / `xireg`.
    pub fn icsr_read(&mut self, level: Level, select: u64) -> Result<u64, Halt> {
        self.csr_write(level.iselect(), select)?;
        self.csr_read(level.ireg())
    }

    pub fn icsr_write(&mut self, level: Level, select: u64, val: u64) -> Result<(), Halt> {
        self.csr_write(level.iselect(), select)?;
        self.csr_write(level.ireg(), val)
    }

    // ------------------------------------------------------------------
    // Monitor services

    pub fn expect(&mut self, trap_id: u64) -> Result<(), Halt> {
        self.tmon_call(Fid::Expect, trap_id)?;
        Ok(())
    }

    pub fn verify(&mut self) -> Result<(), Halt> {
        self.tmon_call(Fid::Verify, 0)?;
        Ok(())
    }

    /// Switch to `mode` through the privilege service.
    pub fn set_privilege(&mut self, mode: Mode) -> Result<(), Halt> {
        self.tmon_call(Fid::Priv, mode.bits())?;
        Ok(())
    }

    pub fn exit(&mut self, code: i32) -> Result<(), Halt> {
        self.tmon_call(Fid::Exit, code as u64)?;
        Ok(())
    }

    pub fn fail(&mut self) -> Result<(), Halt> {
        self.tmon_call(Fid::Fail, 0)?;
        Ok(())
    }

    /// Link `routine` to trap `trap_id` through the callback service; `None`
    /// unlinks it. The monitor files it under the level that takes the trap.
    ///
    /// Relinking a trap id reuses its parameter block and routine slot.
    pub fn link_callback(&mut self, trap_id: u64, routine: Option<UserCallback>) -> Result<(), Halt> {
        let mut link = match self.links.get(&trap_id) {
            Some(link) => *link,
            None => CallbackLink {
                block: self.alloc_words(2)?,
                routine: 0,
            },
        };
        let addr = match routine {
            Some(r) if link.routine != 0 => {
                let index = ((link.routine - CALLBACK_TEXT_BASE) / CALLBACK_TEXT_STRIDE) as usize;
                if let Some(slot) = self.routines.get_mut(index) {
                    *slot = r;
                }
                link.routine
            }
            Some(r) => {
                link.routine = self.link_routine(r);
                link.routine
            }
            None => 0,
        };
        self.links.insert(trap_id, link);

        self.write_words(link.block, &[trap_id, addr])?;
        self.tmon_call(Fid::Cb, link.block)?;
        Ok(())
    }

    pub fn print(&mut self, line: impl Into<String>) {
        self.console.print(line);
    }

    pub fn case(&mut self, n: u32) {
        self.console.case(n);
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(MachineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csr::{CSR_MIE, CSR_MSTATUS, CSR_SMPUMASK, IRQ_MEI, IRQ_MSI, IRQ_SEI, IRQ_SSI, MSTATUS_MIE};
    use crate::frame::TrapFrame;
    use crate::layout::{RODATA_BASE, TEXT_BASE};
    use crate::monitor::api;
    use crate::monitor::vector::{TrapHandler, VectorMode};
    use crate::mpu::smpu::{Region, ATTR_U, ATTR_W, ATTR_X};

    fn machine() -> Machine {
        let _ = env_logger::builder().is_test(true).try_init();
        Machine::default()
    }

    /// Read-only text/rodata for S and U, read-write data, nothing else.
    fn protect_sections(m: &mut Machine) {
        m.hart.mpu.l1.regions[0] = Region::protected(TEXT_BASE, 0x1_0000, ATTR_W | ATTR_X);
        m.hart.mpu.l1.regions[1] = Region::protected(RODATA_BASE, 0x1_0000, ATTR_W);
        m.hart.mpu.l1.regions[2] = Region::protected(DATA_BASE, 0x7_0000, ATTR_U | ATTR_W);
        m.hart.mpu.l1.mask = 0b111;
    }

    #[test]
    fn expectations_met_in_order() {
        let mut m = machine();
        let status = m.run(|m| {
            m.expect(2)?;
            m.expect(2)?;
            m.illegal()?;
            m.illegal()?;
            m.verify()?;
            m.case(1);
            m.exit(0)
        });
        assert_eq!(status, 0);
        assert!(m.console.contains("CASE #1"));
        assert!(m.monitor.queue.is_empty());
    }

    #[test]
    fn store_fault_resumes_after_the_store() {
        let mut m = machine();
        protect_sections(&mut m);
        let status = m.run(|m| {
            m.set_privilege(Mode::Supervisor)?;
            m.expect(15)?;
            let pc = m.hart.pc;
            assert!(!m.store(RODATA_BASE + 0x40, 8, 0)?);
            assert_eq!(m.hart.pc, pc + INSN_WIDTH);
            assert_eq!(m.hart.mode, Mode::Supervisor);
            m.verify()?;
            m.exit(0)
        });
        assert_eq!(status, 0);
    }

    #[test]
    fn fetch_fault_resumes_at_return_address() {
        let mut m = machine();
        protect_sections(&mut m);
        let status = m.run(|m| {
            m.set_privilege(Mode::Supervisor)?;
            m.expect(12)?;
            let pc = m.hart.pc;
            m.call(STACK_TOP - 0x40)?;
            assert_eq!(m.hart.pc, pc + INSN_WIDTH);
            m.verify()?;
            m.exit(0)
        });
        assert_eq!(status, 0);
    }

    #[test]
    fn load_then_store_on_execute_only_region() {
        let mut m = machine();
        protect_sections(&mut m);
        let status = m.run(|m| {
            m.set_privilege(Mode::User)?;
            m.expect(13)?;
            m.expect(15)?;
            assert_eq!(m.load(TEXT_BASE + 0x20, 8)?, None);
            assert!(!m.store(TEXT_BASE + 0x20, 8, 0)?);
            m.verify()?;
            m.exit(0)
        });
        assert_eq!(status, 0);
    }

    #[test]
    fn invalid_privilege_target_is_fatal() {
        let mut m = machine();
        let status = m.run(|m| {
            m.set_privilege(Mode::Machine)?;
            m.tmon_call(Fid::Priv, 2)?;
            m.case(1);
            m.exit(0)
        });
        assert_eq!(status, -1);
        assert!(matches!(m.last_halt(), Some(Halt::InvalidMode(2))));
        assert!(!m.console.contains("CASE #1"));

        let mut m = machine();
        assert_eq!(m.run(|m| m.tmon_call(Fid::Priv, 7).map(|_| ())), -1);
        assert!(matches!(m.last_halt(), Some(Halt::InvalidMode(7))));
        assert_eq!(m.hart.mode, Mode::Machine);
    }

    #[test]
    fn mismatch_halts_before_marker() {
        let mut m = machine();
        let status = m.run(|m| {
            m.expect(13)?;
            m.illegal()?;
            m.case(1);
            m.exit(0)
        });
        assert_eq!(status, -1);
        assert!(matches!(
            m.last_halt(),
            Some(Halt::Unexpected { observed: 2, expected: 13, .. })
        ));
        assert!(!m.console.contains("CASE #1"));
    }

    #[test]
    fn verify_with_pending_expectations_is_fatal() {
        let mut m = machine();
        let status = m.run(|m| {
            m.expect(5)?;
            m.expect(9)?;
            m.verify()?;
            m.exit(0)
        });
        assert_eq!(status, -1);
        assert!(matches!(m.last_halt(), Some(Halt::Pending(2))));
    }

    #[test]
    fn exit_status_comes_from_a1() {
        let mut m = machine();
        assert_eq!(m.run(|m| m.exit(3)), 3);
        assert_eq!(m.run(|_| Ok(())), 0);
    }

    #[test]
    fn unknown_fid_is_rejected() {
        let mut m = machine();
        assert_eq!(m.run(|m| m.ecall(99, 0).map(|_| ())), -1);
        assert!(matches!(m.last_halt(), Some(Halt::UnknownFid(99))));
    }

    #[test]
    fn stub_services_warn_and_succeed() {
        let mut m = machine();
        let status = m.run(|m| {
            assert_eq!(m.ecall(Fid::Csrr as u64, 0x300)?, 0);
            assert_eq!(m.ecall(Fid::Icsrw as u64, 0)?, 0);
            m.exit(0)
        });
        assert_eq!(status, 0);
    }

    fn msi_callback(m: &mut Machine, _frame: &mut TrapFrame) -> Result<(), Halt> {
        m.print("MSI callback");
        m.tmon_call(Fid::Mswi, 0)?;
        Ok(())
    }

    #[test]
    fn software_interrupt_callback_deasserts_line() {
        let mut m = machine();
        let status = m.run(|m| {
            api::trap_mode(m, Level::Machine, VectorMode::Direct)?;
            api::maj_enable(m, Level::Machine, IRQ_MSI, true)?;
            m.link_callback(32 + IRQ_MSI, Some(msi_callback))?;
            m.expect(32 + IRQ_MSI)?;
            m.tmon_call(Fid::Mswi, 1)?;
            api::all_enable(m, Level::Machine, true)?;
            m.verify()?;
            m.exit(0)
        });
        assert_eq!(status, 0);
        assert!(m.console.contains("MSI callback"));
        assert!(!m.bus.aclint.msip(0));
    }

    #[test]
    fn interrupt_without_expectation_is_fatal() {
        let mut m = machine();
        let status = m.run(|m| {
            m.csr_set(CSR_MIE, 1 << IRQ_SSI)?;
            m.tmon_call(Fid::Sswi, 1)?;
            m.csr_set(CSR_MSTATUS, MSTATUS_MIE)?;
            m.exit(0)
        });
        assert_eq!(status, -1);
        assert!(matches!(
            m.last_halt(),
            Some(Halt::Unexpected { observed: 33, expected: 0, .. })
        ));
    }

    #[test]
    fn priorities_order_interrupts_in_direct_mode() {
        fn clear_ssi(m: &mut Machine, _: &mut TrapFrame) -> Result<(), Halt> {
            m.tmon_call(Fid::Sswi, 0).map(|_| ())
        }
        let mut m = machine();
        let status = m.run(|m| {
            api::maj_enable(m, Level::Machine, IRQ_MSI, true)?;
            api::maj_enable(m, Level::Machine, IRQ_SSI, true)?;
            api::maj_priority(m, Level::Machine, IRQ_SSI, 1)?;
            api::maj_priority(m, Level::Machine, IRQ_MSI, 2)?;
            m.link_callback(32 + IRQ_SSI, Some(clear_ssi))?;
            m.link_callback(32 + IRQ_MSI, Some(msi_callback))?;
            m.tmon_call(Fid::Mswi, 1)?;
            m.tmon_call(Fid::Sswi, 1)?;
            m.expect(32 + IRQ_SSI)?;
            m.expect(32 + IRQ_MSI)?;
            api::all_enable(m, Level::Machine, true)?;
            m.verify()?;
            m.exit(0)
        });
        assert_eq!(status, 0);
        assert!(!m.bus.aclint.msip(0));
        assert!(!m.bus.aclint.ssip(0));
    }

    #[test]
    fn external_interrupt_is_claimed_and_dispatched() {
        let mut m = machine();
        let status = m.run(|m| {
            api::maj_enable(m, Level::Machine, IRQ_MEI, true)?;
            api::ext_enable(m, Level::Machine, 10, true)?;
            api::ext_delivery(m, Level::Machine, true)?;
            m.tmon_call(Fid::Mmsi, 10)?;
            m.expect(64 + 10)?;
            api::all_enable(m, Level::Machine, true)?;
            m.verify()?;
            m.exit(0)
        });
        assert_eq!(status, 0);
        assert_eq!(m.bus.imsic_m.eip, 0);
    }

    /// MSI handler that raises a more urgent external interrupt and checks
    /// it was taken before returning.
    fn preempted_msi(m: &mut Machine, _: &mut TrapFrame) -> Result<(), Halt> {
        m.expect(64 + 4)?;
        m.tmon_call(Fid::Mmsi, 4)?;
        m.print(format!("nesting {:?}", m.monitor.m.nesting));
        m.tmon_call(Fid::Mswi, 0)?;
        Ok(())
    }

    fn inner_ext(m: &mut Machine, _: &mut TrapFrame) -> Result<(), Halt> {
        m.print(format!("inner depth {}", m.monitor.m.nesting.len()));
        Ok(())
    }

    #[test]
    fn nested_mode_lets_more_urgent_interrupts_preempt() {
        let mut m = machine();
        let status = m.run(|m| {
            api::trap_mode(m, Level::Machine, VectorMode::Nested)?;
            api::maj_priority(m, Level::Machine, IRQ_MSI, 20)?;
            api::maj_enable(m, Level::Machine, IRQ_MSI, true)?;
            api::maj_enable(m, Level::Machine, IRQ_MEI, true)?;
            api::ext_enable(m, Level::Machine, 4, true)?;
            api::ext_delivery(m, Level::Machine, true)?;
            m.link_callback(32 + IRQ_MSI, Some(preempted_msi))?;
            m.link_callback(64 + 4, Some(inner_ext))?;
            m.expect(32 + IRQ_MSI)?;
            m.tmon_call(Fid::Mswi, 1)?;
            api::all_enable(m, Level::Machine, true)?;
            m.verify()?;
            m.exit(0)
        });
        assert_eq!(status, 0);
        assert!(m.console.contains("inner depth 2"));
        assert!(m.console.contains("nesting [20]"));
        assert!(m.monitor.m.nesting.is_empty());
    }

    fn reassert_msi(m: &mut Machine, _: &mut TrapFrame) -> Result<(), Halt> {
        // same urgency: must not preempt the running handler
        m.tmon_call(Fid::Mmsi, 6)?;
        m.print(format!("pending {}", m.bus.imsic_m.eip));
        Ok(())
    }

    #[test]
    fn nested_mode_defers_equal_or_lower_urgency() {
        let mut m = machine();
        let status = m.run(|m| {
            api::trap_mode(m, Level::Machine, VectorMode::Nested)?;
            api::maj_enable(m, Level::Machine, IRQ_MEI, true)?;
            api::ext_enable(m, Level::Machine, 5, true)?;
            api::ext_enable(m, Level::Machine, 6, true)?;
            api::ext_delivery(m, Level::Machine, true)?;
            m.link_callback(64 + 5, Some(reassert_msi))?;
            m.expect(64 + 5)?;
            m.expect(64 + 6)?;
            m.tmon_call(Fid::Mmsi, 5)?;
            api::all_enable(m, Level::Machine, true)?;
            m.verify()?;
            m.exit(0)
        });
        assert_eq!(status, 0);
        assert!(m.console.contains(&format!("pending {}", 1 << 6)));
    }

    #[test]
    fn custom_vector_replaces_default_handler() {
        fn skip(m: &mut Machine, frame: &mut TrapFrame) -> Result<(), Halt> {
            m.print(format!("breakpoint @{:#x}", frame.tval));
            frame.skip_insn();
            Ok(())
        }
        let mut m = machine();
        let status = m.run(|m| {
            api::exc_setvec(m, Level::Machine, 3, TrapHandler::Custom(skip))?;
            m.ebreak()?;
            m.exit(0)
        });
        assert_eq!(status, 0);
        assert!(m.console.contains("breakpoint @0x"));
    }

    #[test]
    fn vectored_mode_is_rejected() {
        let mut m = machine();
        assert_eq!(m.run(|m| api::trap_mode(m, Level::Machine, VectorMode::Vectored)), -1);
        assert!(matches!(m.last_halt(), Some(Halt::UnsupportedVectorMode(1))));

        let mut m = machine();
        let status = m.run(|m| {
            m.csr_write(CSR_MTVEC, MTVEC_BASE | 1)?;
            m.illegal()
        });
        assert_eq!(status, -1);
    }

    #[test]
    fn supervisor_forwards_services_to_machine_level() {
        let mut m = machine();
        let status = m.run(|m| {
            api::exc_delegate(m, 8, true)?;
            api::exc_delegate(m, 2, true)?;
            m.set_privilege(Mode::User)?;
            // EXPECT from U: S-level ecall forwards to M-level
            m.expect(2)?;
            m.illegal()?;
            assert_eq!(m.hart.mode, Mode::User);
            m.verify()?;
            m.exit(4)
        });
        assert_eq!(status, 4);
        assert!(m.monitor.queue.is_empty());
    }

    #[test]
    fn supervisor_rejects_privilege_switch() {
        let mut m = machine();
        let status = m.run(|m| {
            api::exc_delegate(m, 8, true)?;
            m.set_privilege(Mode::User)?;
            m.set_privilege(Mode::Machine)?;
            m.exit(0)
        });
        assert_eq!(status, -1);
        assert!(matches!(m.last_halt(), Some(Halt::PrivSwitchUnsupported)));
    }

    #[test]
    fn machine_csr_from_supervisor_is_illegal() {
        let mut m = machine();
        let status = m.run(|m| {
            m.set_privilege(Mode::Supervisor)?;
            m.expect(2)?;
            assert_eq!(m.csr_read(CSR_MSTATUS)?, 0);
            m.csr_write(CSR_SMPUMASK, 0)?;
            m.verify()?;
            m.exit(0)
        });
        assert_eq!(status, 0);
    }

    #[test]
    fn callback_service_validates_its_block() {
        let mut m = machine();
        let status = m.run(|m| {
            let block = m.alloc_words(2)?;
            m.write_words(block, &[35, 0x1234])?;
            m.tmon_call(Fid::Cb, block)?;
            m.exit(0)
        });
        assert_eq!(status, -1);
        assert!(matches!(m.last_halt(), Some(Halt::BadCallback(0x1234))));

        let mut m = machine();
        let status = m.run(|m| m.link_callback(96, Some(msi_callback)));
        assert_eq!(status, -1);
        assert!(matches!(m.last_halt(), Some(Halt::TrapIndex(96))));
    }

    #[test]
    fn unlinked_callback_only_warns() {
        let mut m = machine();
        let status = m.run(|m| {
            m.link_callback(3, Some(msi_callback))?;
            assert!(m.monitor.m.callbacks.is_linked(3));
            m.link_callback(3, None)?;
            assert!(!m.monitor.m.callbacks.is_linked(3));
            m.expect(3)?;
            m.ebreak()?;
            m.exit(0)
        });
        // breakpoint handled by the default handler without a callback: the
        // handler resumes at the ebreak, which then traps again unexpectedly
        assert_eq!(status, -1);
        assert!(matches!(
            m.last_halt(),
            Some(Halt::Unexpected { observed: 3, expected: 0, .. })
        ));
    }

    #[test]
    fn full_queue_is_fatal() {
        let mut m = Machine::new(MachineConfig {
            queue_capacity: 4,
            ..MachineConfig::default()
        });
        let status = m.run(|m| {
            for id in 0..4 {
                m.expect(id + 2)?;
            }
            m.exit(0)
        });
        assert_eq!(status, -1);
        assert!(matches!(m.last_halt(), Some(Halt::QueueFull)));
    }

    #[test]
    fn replay_loop_hits_step_budget() {
        fn stay(_: &mut Machine, _: &mut TrapFrame) -> Result<(), Halt> {
            Ok(())
        }
        let mut m = Machine::new(MachineConfig {
            max_steps: 200,
            ..MachineConfig::default()
        });
        let status = m.run(|m| {
            api::exc_setvec(m, Level::Machine, 2, TrapHandler::Custom(stay))?;
            m.illegal()
        });
        assert_eq!(status, -1);
        assert!(matches!(m.last_halt(), Some(Halt::StepLimit(200))));
    }

    #[test]
    fn csr_address_outside_12_bits_is_illegal() {
        let mut m = machine();
        let status = m.run(|m| {
            m.expect(2)?;
            m.expect(2)?;
            assert_eq!(m.csr_read(0x1000)?, 0);
            m.csr_set(0xFFFF, 1)?;
            m.verify()?;
            m.case(1);
            m.exit(0)
        });
        assert_eq!(status, 0);
        assert!(m.console.contains("CASE #1"));
    }

    #[test]
    fn csr_swap_returns_previous_value() {
        let mut m = machine();
        let status = m.run(|m| {
            m.csr_write(CSR_SMPUMASK, 0x5)?;
            assert_eq!(m.csr_swap(CSR_SMPUMASK, 0x3)?, 0x5);
            assert_eq!(m.csr_read(CSR_SMPUMASK)?, 0x3);
            m.exit(0)
        });
        assert_eq!(status, 0);
    }

    fn s_clear_ssi(m: &mut Machine, frame: &mut TrapFrame) -> Result<(), Halt> {
        m.print(format!("{} SSWI callback", frame.level));
        m.tmon_call(Fid::Sswi, 0).map(|_| ())
    }

    fn s_external(m: &mut Machine, frame: &mut TrapFrame) -> Result<(), Halt> {
        m.print(format!(
            "{} external #{} nesting {}",
            frame.level,
            frame.aux_id(),
            m.monitor.s.nesting.len()
        ));
        Ok(())
    }

    #[test]
    fn delegated_software_interrupt_reaches_supervisor_callback() {
        let mut m = machine();
        let status = m.run(|m| {
            api::trap_mode(m, Level::Supervisor, VectorMode::Direct)?;
            api::maj_delegate(m, IRQ_SSI, true)?;
            api::maj_enable(m, Level::Supervisor, IRQ_SSI, true)?;
            m.link_callback(32 + IRQ_SSI, Some(s_clear_ssi))?;
            assert!(m.monitor.s.callbacks.is_linked(32 + IRQ_SSI));
            assert!(!m.monitor.m.callbacks.is_linked(32 + IRQ_SSI));

            m.set_privilege(Mode::Supervisor)?;
            m.expect(32 + IRQ_SSI)?;
            m.tmon_call(Fid::Sswi, 1)?;
            api::all_enable(m, Level::Supervisor, true)?;
            m.verify()?;
            m.exit(0)
        });
        assert_eq!(status, 0);
        assert!(m.console.contains(&format!("{} SSWI callback", Level::Supervisor)));
        assert!(!m.bus.aclint.ssip(0));
    }

    fn supervisor_external(m: &mut Machine, mode: VectorMode) -> Result<(), Halt> {
        api::trap_mode(m, Level::Supervisor, mode)?;
        api::maj_delegate(m, IRQ_SEI, true)?;
        api::maj_enable(m, Level::Supervisor, IRQ_SEI, true)?;
        api::ext_enable(m, Level::Supervisor, 5, true)?;
        api::ext_delivery(m, Level::Supervisor, true)?;
        m.link_callback(64 + 5, Some(s_external))?;
        assert!(m.monitor.s.callbacks.is_linked(64 + 5));

        m.set_privilege(Mode::Supervisor)?;
        m.expect(64 + 5)?;
        m.tmon_call(Fid::Smsi, 5)?;
        api::all_enable(m, Level::Supervisor, true)?;
        m.verify()?;
        m.exit(0)
    }

    #[test]
    fn delegated_external_interrupt_is_claimed_in_direct_mode() {
        let mut m = machine();
        assert_eq!(m.run(|m| supervisor_external(m, VectorMode::Direct)), 0);
        assert!(m.console.contains(&format!("{} external #5 nesting 0", Level::Supervisor)));
        assert_eq!(m.bus.imsic_s.eip, 0);
    }

    #[test]
    fn delegated_external_interrupt_in_nested_mode() {
        let mut m = machine();
        assert_eq!(m.run(|m| supervisor_external(m, VectorMode::Nested)), 0);
        assert!(m.console.contains(&format!("{} external #5 nesting 1", Level::Supervisor)));
        assert!(m.monitor.s.nesting.is_empty());
        assert_eq!(m.bus.imsic_s.eip, 0);
    }

    #[test]
    fn threshold_masks_identities_at_or_above_it() {
        let mut m = machine();
        let status = m.run(|m| {
            api::maj_enable(m, Level::Machine, IRQ_MEI, true)?;
            api::ext_enable(m, Level::Machine, 3, true)?;
            api::ext_enable(m, Level::Machine, 8, true)?;
            api::ext_delivery(m, Level::Machine, true)?;
            api::ext_threshold(m, Level::Machine, 8)?;
            api::all_enable(m, Level::Machine, true)?;

            m.case(1);
            m.tmon_call(Fid::Mmsi, 8)?;
            m.nop()?;
            m.verify()?;

            m.case(2);
            m.expect(64 + 3)?;
            m.tmon_call(Fid::Mmsi, 3)?;
            m.verify()?;

            m.case(3);
            m.expect(64 + 8)?;
            api::ext_threshold(m, Level::Machine, 0)?;
            m.verify()?;
            m.exit(0)
        });
        assert_eq!(status, 0);
        assert_eq!(m.bus.imsic_m.eip, 0);
    }

    #[test]
    fn relinking_reuses_the_callback_block() {
        let mut m = machine();
        let status = m.run(|m| {
            m.link_callback(3, Some(msi_callback))?;
            let top = m.data_top();
            for _ in 0..2000 {
                m.link_callback(3, None)?;
                m.link_callback(3, Some(msi_callback))?;
            }
            assert_eq!(m.data_top(), top);
            m.exit(0)
        });
        assert_eq!(status, 0);
        assert_eq!(m.routines.len(), 1);
        assert!(m.monitor.m.callbacks.is_linked(3));
    }
}
