use std::collections::HashMap;

use crate::bus::{Bus, SystemBus};
use crate::csr::{
    Level, Mode, CSR_HMPUMASK, CSR_HSTATUS, CSR_MCAUSE, CSR_MEDELEG, CSR_MEPC, CSR_MIDELEG, CSR_MIE, CSR_MIP,
    CSR_MIREG, CSR_MISA, CSR_MSTATUS, CSR_MSTATUSH, CSR_MTOPEI, CSR_MTOPI, CSR_MTVAL, CSR_MTVEC,
    CSR_SCAUSE, CSR_SEPC, CSR_SIE, CSR_SIP, CSR_SIREG, CSR_SMPUMASK, CSR_SPMPADDR0, CSR_SPMPCFG0,
    CSR_SPMPSWITCH0, CSR_SPMPSWITCH1, CSR_SSTATUS, CSR_STOPEI, CSR_STOPI, CSR_STVAL, CSR_STVEC,
    DEFAULT_IRQ_ORDER, HSTATUS_SPV_SHIFT, IRQ_SSI, ISELECT_EIDELIVERY, ISELECT_EIE0, ISELECT_EIP0,
    ISELECT_EITHRESHOLD, ISELECT_HMPU_BASE, ISELECT_IPRIO0, ISELECT_IPRIO15, ISELECT_SMPU_BASE, MPU_REGIONS,
    MSTATUSH_MPV_SHIFT, MSTATUS_MIE, MSTATUS_MPIE, MSTATUS_MPP, MSTATUS_MPP_SHIFT, MSTATUS_SIE, MSTATUS_SPIE,
    MSTATUS_SPP, MSTATUS_SPP_SHIFT, SIE_MASK, SPMP_ADDR_REGS, SPMP_CFG_REGS, SSTATUS_MASK,
};
use crate::devices::imsic::NUM_IDS;
use crate::frame::TrapFrame;
use crate::mpu::{AccessType, MemoryProtection};
use crate::Trap;

// ABI register numbers
pub const RA: usize = 1;
pub const SP: usize = 2;
pub const A0: usize = 10;
pub const A1: usize = 11;

/// Number of major interrupt ids with a priority field.
pub const NUM_IIDS: usize = 64;

/// Size of the CSR address space.
pub const CSR_COUNT: usize = 4096;

/// Urgency of a major interrupt whose priority field is zero.
pub const LOWEST_URGENCY: u16 = 256;

pub struct Hart {
    pub regs: [u64; 32],
    pub pc: u64,
    /// Current privilege and virtualization mode.
    pub mode: Mode,
    csrs: [u64; CSR_COUNT],
    /// `iprio` arrays of the machine and supervisor levels.
    iprio: [[u8; NUM_IIDS]; 2],
    pub mpu: MemoryProtection,
}

fn level_index(level: Level) -> usize {
    match level {
        Level::Machine => 0,
        Level::Supervisor => 1,
    }
}

/// Position of `iid` in the default priority order; unknown ids sort last.
fn default_order(iid: u64) -> usize {
    DEFAULT_IRQ_ORDER
        .iter()
        .position(|&i| i == iid)
        .unwrap_or(DEFAULT_IRQ_ORDER.len())
}

impl Hart {
    pub fn new(pc: u64) -> Self {
        let mut csrs = [0u64; CSR_COUNT];
        // misa: rv64imach
        const MISA_RV64IMACH: u64 = 0x8000_0000_0014_1185;
        csrs[CSR_MISA as usize] = MISA_RV64IMACH;

        Self {
            regs: [0; 32],
            pc,
            mode: Mode::Machine,
            csrs,
            iprio: [[0; NUM_IIDS]; 2],
            mpu: MemoryProtection::new(),
        }
    }

    /// Export the current CSR image into a compact map suitable for
    /// serialization in snapshots.
    pub fn export_csrs(&self) -> HashMap<u16, u64> {
        let mut map = HashMap::new();
        for (idx, &val) in self.csrs.iter().enumerate() {
            if val != 0 {
                map.insert(idx as u16, val);
            }
        }
        map
    }

    /// Replace the CSR image with `map`; unlisted CSRs read as zero.
    pub fn import_csrs(&mut self, map: &HashMap<u16, u64>) {
        self.csrs = [0u64; CSR_COUNT];
        for (&addr, &val) in map.iter() {
            if let Some(slot) = self.csrs.get_mut(addr as usize) {
                *slot = val;
            }
        }
    }

    /// Priority bytes of `level`, indexed by major interrupt id.
    pub fn iprio_table(&self, level: Level) -> &[u8] {
        &self.iprio[level_index(level)]
    }

    pub fn set_iprio_table(&mut self, level: Level, prio: &[u8]) {
        let table = &mut self.iprio[level_index(level)];
        let n = prio.len().min(NUM_IIDS);
        table.fill(0);
        table[..n].copy_from_slice(&prio[..n]);
    }

    pub fn read_reg(&self, reg: usize) -> u64 {
        if reg == 0 {
            0
        } else {
            self.regs[reg]
        }
    }

    pub fn write_reg(&mut self, reg: usize, val: u64) {
        if reg != 0 {
            self.regs[reg] = val;
        }
    }

    /// Raw CSR storage, bypassing views and privilege checks.
    pub fn csr(&self, addr: u16) -> u64 {
        self.csrs[addr as usize & 0xFFF]
    }

    pub fn set_csr(&mut self, addr: u16, val: u64) {
        self.csrs[addr as usize & 0xFFF] = val;
    }

    /// Effective privilege for CSR access: HS-mode may touch hypervisor CSRs,
    /// guests only reach the supervisor and user ones.
    fn csr_privilege(&self) -> u16 {
        match self.mode {
            Mode::Machine => 3,
            Mode::Supervisor => 2,
            Mode::VirtualSupervisor => 1,
            Mode::User | Mode::VirtualUser => 0,
        }
    }

    fn check_csr_access(&self, addr: u16) -> Result<(), Trap> {
        // 12-bit CSR address space
        if addr as usize >= CSR_COUNT {
            return Err(Trap::IllegalInstruction(addr as u64));
        }
        // CSR address bits [9:8] encode the lowest privilege level that can access
        let required_priv = (addr >> 8) & 0x3;
        if self.csr_privilege() < required_priv {
            return Err(Trap::IllegalInstruction(addr as u64));
        }
        Ok(())
    }

    /// `mip` as seen by software: the writable SSIP bit merged with the
    /// device-driven lines.
    pub fn mip(&self, bus: &SystemBus) -> u64 {
        (self.csrs[CSR_MIP as usize] & (1 << IRQ_SSI)) | bus.check_interrupts()
    }

    pub fn read_csr(&self, bus: &SystemBus, addr: u16) -> Result<u64, Trap> {
        self.check_csr_access(addr)?;

        let val = match addr {
            CSR_SSTATUS => self.csrs[CSR_MSTATUS as usize] & SSTATUS_MASK,
            CSR_SIE => self.csrs[CSR_MIE as usize] & SIE_MASK,
            CSR_SIP => self.mip(bus) & SIE_MASK,
            CSR_MIP => self.mip(bus),
            CSR_MTOPI => self.topi(Level::Machine, bus),
            CSR_STOPI => self.topi(Level::Supervisor, bus),
            CSR_MTOPEI => bus.imsic_m.topei(),
            CSR_STOPEI => bus.imsic_s.topei(),
            CSR_MIREG => self.read_indirect(Level::Machine, bus)?,
            CSR_SIREG => self.read_indirect(Level::Supervisor, bus)?,
            CSR_SMPUMASK => self.mpu.l1.mask,
            CSR_HMPUMASK => self.mpu.l2.mask,
            CSR_SPMPSWITCH0 => self.mpu.spmp.switch & 0xFFFF_FFFF,
            CSR_SPMPSWITCH1 => self.mpu.spmp.switch >> 32,
            a if (CSR_SPMPCFG0..CSR_SPMPCFG0 + SPMP_CFG_REGS).contains(&a) => {
                self.mpu.spmp.read_cfg((a - CSR_SPMPCFG0) as usize)
            }
            a if (CSR_SPMPADDR0..CSR_SPMPADDR0 + SPMP_ADDR_REGS).contains(&a) => {
                self.mpu.spmp.addr[(a - CSR_SPMPADDR0) as usize]
            }
            _ => self.csrs[addr as usize],
        };
        Ok(val)
    }

    pub fn write_csr(&mut self, bus: &mut SystemBus, addr: u16, val: u64) -> Result<(), Trap> {
        self.check_csr_access(addr)?;

        // Read-only CSRs have bits [11:10] == 0b11; writes are ignored
        if (addr >> 10) & 0x3 == 0x3 {
            return Ok(());
        }

        match addr {
            CSR_SSTATUS => {
                let mstatus = self.csrs[CSR_MSTATUS as usize];
                self.csrs[CSR_MSTATUS as usize] = (mstatus & !SSTATUS_MASK) | (val & SSTATUS_MASK);
            }
            CSR_SIE => {
                let mie = self.csrs[CSR_MIE as usize];
                self.csrs[CSR_MIE as usize] = (mie & !SIE_MASK) | (val & SIE_MASK);
            }
            CSR_SIP | CSR_MIP => {
                // Only SSIP is software-writable
                let mask = 1 << IRQ_SSI;
                let mip = self.csrs[CSR_MIP as usize];
                self.csrs[CSR_MIP as usize] = (mip & !mask) | (val & mask);
            }
            CSR_MEDELEG => {
                // ecall from M-mode can never be delegated
                self.csrs[CSR_MEDELEG as usize] = val & !(1 << 11) & 0xFFFF;
            }
            CSR_MIDELEG => {
                self.csrs[CSR_MIDELEG as usize] = val & SIE_MASK;
            }
            CSR_MTOPEI => {
                bus.imsic_m.claim();
            }
            CSR_STOPEI => {
                bus.imsic_s.claim();
            }
            CSR_MIREG => self.write_indirect(Level::Machine, bus, val)?,
            CSR_SIREG => self.write_indirect(Level::Supervisor, bus, val)?,
            CSR_SMPUMASK => self.mpu.l1.mask = val & 0xFFFF_FFFF,
            CSR_HMPUMASK => self.mpu.l2.mask = val & 0xFFFF_FFFF,
            CSR_SPMPSWITCH0 => {
                self.mpu.spmp.switch = (self.mpu.spmp.switch & !0xFFFF_FFFF) | (val & 0xFFFF_FFFF);
            }
            CSR_SPMPSWITCH1 => {
                self.mpu.spmp.switch = (self.mpu.spmp.switch & 0xFFFF_FFFF) | (val << 32);
            }
            a if (CSR_SPMPCFG0..CSR_SPMPCFG0 + SPMP_CFG_REGS).contains(&a) => {
                self.mpu.spmp.write_cfg((a - CSR_SPMPCFG0) as usize, val);
            }
            a if (CSR_SPMPADDR0..CSR_SPMPADDR0 + SPMP_ADDR_REGS).contains(&a) => {
                self.mpu.spmp.addr[(a - CSR_SPMPADDR0) as usize] = val & ((1 << 54) - 1);
            }
            _ => self.csrs[addr as usize] = val,
        }
        Ok(())
    }

    fn read_indirect(&self, level: Level, bus: &SystemBus) -> Result<u64, Trap> {
        let sel = self.csrs[level.iselect() as usize];
        let file = match level {
            Level::Machine => &bus.imsic_m,
            Level::Supervisor => &bus.imsic_s,
        };
        let illegal = Trap::IllegalInstruction(level.ireg() as u64);
        match sel {
            ISELECT_IPRIO0..=ISELECT_IPRIO15 => {
                let base = ((sel - ISELECT_IPRIO0) * 4) as usize;
                let prio = &self.iprio[level_index(level)];
                Ok((0..4).fold(0, |acc, i| acc | ((prio[base + i] as u64) << (8 * i))))
            }
            ISELECT_EIDELIVERY => Ok(file.eidelivery),
            ISELECT_EITHRESHOLD => Ok(file.eithreshold),
            ISELECT_EIP0 => Ok(file.eip),
            ISELECT_EIE0 => Ok(file.eie),
            s if level == Level::Supervisor && (ISELECT_SMPU_BASE..ISELECT_SMPU_BASE + 2 * MPU_REGIONS).contains(&s) => {
                self.mpu.l1.read_word(s - ISELECT_SMPU_BASE).ok_or(illegal)
            }
            s if level == Level::Supervisor && (ISELECT_HMPU_BASE..ISELECT_HMPU_BASE + 2 * MPU_REGIONS).contains(&s) => {
                self.mpu.l2.read_word(s - ISELECT_HMPU_BASE).ok_or(illegal)
            }
            _ => Err(illegal),
        }
    }

    fn write_indirect(&mut self, level: Level, bus: &mut SystemBus, val: u64) -> Result<(), Trap> {
        let sel = self.csrs[level.iselect() as usize];
        let illegal = Trap::IllegalInstruction(level.ireg() as u64);
        let ids = (1u64 << NUM_IDS) - 2;
        match sel {
            ISELECT_IPRIO0..=ISELECT_IPRIO15 => {
                let base = ((sel - ISELECT_IPRIO0) * 4) as usize;
                let prio = &mut self.iprio[level_index(level)];
                for i in 0..4 {
                    prio[base + i] = (val >> (8 * i)) as u8;
                }
            }
            ISELECT_EIDELIVERY => bus.imsic(level).eidelivery = val & 1,
            ISELECT_EITHRESHOLD => bus.imsic(level).eithreshold = val & 0x7FF,
            ISELECT_EIP0 => bus.imsic(level).eip = val & ids,
            ISELECT_EIE0 => bus.imsic(level).eie = val & ids,
            s if level == Level::Supervisor && (ISELECT_SMPU_BASE..ISELECT_SMPU_BASE + 2 * MPU_REGIONS).contains(&s) => {
                self.mpu.l1.write_word(s - ISELECT_SMPU_BASE, val);
            }
            s if level == Level::Supervisor && (ISELECT_HMPU_BASE..ISELECT_HMPU_BASE + 2 * MPU_REGIONS).contains(&s) => {
                self.mpu.l2.write_word(s - ISELECT_HMPU_BASE, val);
            }
            _ => return Err(illegal),
        }
        Ok(())
    }

    /// Priority field of a major interrupt at `level` (0 = unset).
    pub fn iprio(&self, level: Level, iid: u64) -> u8 {
        self.iprio[level_index(level)]
            .get(iid as usize)
            .copied()
            .unwrap_or(0)
    }

    /// Urgency of `iid` when taken at `level`; smaller is more urgent.
    ///
    /// The level's external interrupt inherits the identity of its top
    /// pending MSI; other interrupts use their priority field, zero meaning
    /// least urgent.
    pub fn urgency(&self, level: Level, iid: u64, bus: &SystemBus) -> u16 {
        if iid == level.external_iid() {
            let top = match level {
                Level::Machine => bus.imsic_m.top_id(),
                Level::Supervisor => bus.imsic_s.top_id(),
            };
            if top != 0 {
                return top as u16;
            }
        }
        match self.iprio(level, iid) {
            0 => LOWEST_URGENCY,
            p => p as u16,
        }
    }

    /// Interrupts pending and enabled for `level`, regardless of the global
    /// interrupt-enable bit.
    pub fn level_pending(&self, level: Level, bus: &SystemBus) -> u64 {
        let pending = self.mip(bus) & self.csrs[CSR_MIE as usize];
        let mideleg = self.csrs[CSR_MIDELEG as usize];
        match level {
            Level::Machine => pending & !mideleg,
            Level::Supervisor => pending & mideleg,
        }
    }

    /// Most urgent interrupt in `pending`, as `(iid, urgency)`.
    pub fn best_interrupt(&self, level: Level, pending: u64, bus: &SystemBus) -> Option<(u64, u16)> {
        (0..NUM_IIDS as u64)
            .filter(|iid| pending & (1 << iid) != 0)
            .map(|iid| (iid, self.urgency(level, iid, bus)))
            .min_by_key(|&(iid, urgency)| (urgency, default_order(iid), iid))
    }

    /// `xtopi` value: `iid << 16 | priority`.
    pub fn topi(&self, level: Level, bus: &SystemBus) -> u64 {
        match self.best_interrupt(level, self.level_pending(level, bus), bus) {
            Some((iid, urgency)) => (iid << 16) | (urgency.min(255) as u64),
            None => 0,
        }
    }

    /// Whether interrupts targeting `level` may be taken in the current mode.
    pub fn level_enabled(&self, level: Level) -> bool {
        let mstatus = self.csrs[CSR_MSTATUS as usize];
        match (level, self.mode) {
            (Level::Machine, Mode::Machine) => mstatus & MSTATUS_MIE != 0,
            (Level::Machine, _) => true,
            (Level::Supervisor, Mode::Machine) => false,
            (Level::Supervisor, Mode::Supervisor) => mstatus & MSTATUS_SIE != 0,
            (Level::Supervisor, _) => true,
        }
    }

    /// Interrupt the hart would take now, as `(level, iid, urgency)`.
    ///
    /// Machine-level interrupts always win over supervisor-level ones.
    pub fn pending_interrupt(&self, bus: &SystemBus) -> Option<(Level, u64, u16)> {
        [Level::Machine, Level::Supervisor]
            .into_iter()
            .filter(|&level| self.level_enabled(level))
            .find_map(|level| {
                self.best_interrupt(level, self.level_pending(level, bus), bus)
                    .map(|(iid, urgency)| (level, iid, urgency))
            })
    }

    /// Level that handles `trap` when raised in the current mode.
    pub fn target_level(&self, trap: &Trap) -> Level {
        if self.mode == Mode::Machine {
            return Level::Machine;
        }
        let (is_interrupt, code, _) = trap.cause_tval();
        let deleg = if is_interrupt {
            self.csrs[CSR_MIDELEG as usize]
        } else {
            self.csrs[CSR_MEDELEG as usize]
        };
        if code < 64 && deleg & (1 << code) != 0 {
            Level::Supervisor
        } else {
            Level::Machine
        }
    }

    /// Architectural trap entry. Returns the level now handling the trap.
    pub fn enter_trap(&mut self, trap: Trap, epc: u64) -> Level {
        let level = self.target_level(&trap);
        let (_, _, tval) = trap.cause_tval();
        let cause = trap.cause();
        let from = self.mode;
        let mut mstatus = self.csrs[CSR_MSTATUS as usize];

        match level {
            Level::Machine => {
                self.csrs[CSR_MEPC as usize] = epc;
                self.csrs[CSR_MCAUSE as usize] = cause;
                self.csrs[CSR_MTVAL as usize] = tval;

                // MPIE <= MIE, MIE <= 0
                let mie = (mstatus & MSTATUS_MIE != 0) as u64;
                mstatus = (mstatus & !MSTATUS_MPIE) | (mie << 7);
                mstatus &= !MSTATUS_MIE;
                mstatus = (mstatus & !MSTATUS_MPP) | (from.to_mpp() << MSTATUS_MPP_SHIFT);
                self.csrs[CSR_MSTATUS as usize] = mstatus;

                let mstatush = self.csrs[CSR_MSTATUSH as usize];
                self.csrs[CSR_MSTATUSH as usize] =
                    (mstatush & !(1 << MSTATUSH_MPV_SHIFT)) | (from.to_mpv() << MSTATUSH_MPV_SHIFT);

                self.mode = Mode::Machine;
                self.pc = self.csrs[CSR_MTVEC as usize] & !0b11;
            }
            Level::Supervisor => {
                self.csrs[CSR_SEPC as usize] = epc;
                self.csrs[CSR_SCAUSE as usize] = cause;
                self.csrs[CSR_STVAL as usize] = tval;

                // SPIE <= SIE, SIE <= 0
                let sie = (mstatus & MSTATUS_SIE != 0) as u64;
                mstatus = (mstatus & !MSTATUS_SPIE) | (sie << 5);
                mstatus &= !MSTATUS_SIE;
                mstatus = (mstatus & !MSTATUS_SPP) | ((from.to_mpp() & 1) << MSTATUS_SPP_SHIFT);
                self.csrs[CSR_MSTATUS as usize] = mstatus;

                let hstatus = self.csrs[CSR_HSTATUS as usize];
                self.csrs[CSR_HSTATUS as usize] =
                    (hstatus & !(1 << HSTATUS_SPV_SHIFT)) | (from.to_mpv() << HSTATUS_SPV_SHIFT);

                self.mode = Mode::Supervisor;
                self.pc = self.csrs[CSR_STVEC as usize] & !0b11;
            }
        }

        if log::log_enabled!(log::Level::Trace) {
            log::trace!(
                "trap to {}: cause={:#x} tval={:#x} epc={:#x} from {:?}",
                level,
                cause,
                tval,
                epc,
                from
            );
        }
        level
    }

    /// Snapshot of the interrupted context for a handler at `level`.
    pub fn capture_frame(&self, level: Level) -> TrapFrame {
        let mut frame = TrapFrame::new(level);
        frame.regs = self.regs;
        match level {
            Level::Machine => {
                frame.status = self.csrs[CSR_MSTATUS as usize];
                frame.cause = self.csrs[CSR_MCAUSE as usize];
                frame.tval = self.csrs[CSR_MTVAL as usize];
                frame.epc = self.csrs[CSR_MEPC as usize];
                frame.status_ext = self.csrs[CSR_MSTATUSH as usize];
            }
            Level::Supervisor => {
                frame.status = self.csrs[CSR_MSTATUS as usize] & SSTATUS_MASK;
                frame.cause = self.csrs[CSR_SCAUSE as usize];
                frame.tval = self.csrs[CSR_STVAL as usize];
                frame.epc = self.csrs[CSR_SEPC as usize];
                frame.status_ext = self.csrs[CSR_HSTATUS as usize];
            }
        }
        frame
    }

    /// Restore the context held in `frame` and execute `mret` / `sret`.
    pub fn leave_trap(&mut self, frame: &TrapFrame) {
        self.regs = frame.regs;
        self.regs[0] = 0;
        let mut mstatus = self.csrs[CSR_MSTATUS as usize];

        match frame.level {
            Level::Machine => {
                mstatus = frame.status;
                self.csrs[CSR_MSTATUSH as usize] = frame.status_ext;
                self.csrs[CSR_MEPC as usize] = frame.epc;

                let pp = (mstatus & MSTATUS_MPP) >> MSTATUS_MPP_SHIFT;
                let pv = (frame.status_ext >> MSTATUSH_MPV_SHIFT) & 1;
                self.mode = Mode::from_mpp(pp, pv);

                // MIE <= MPIE, MPIE <= 1, MPP <= U, MPV <= 0
                let mpie = (mstatus & MSTATUS_MPIE != 0) as u64;
                mstatus = (mstatus & !MSTATUS_MIE) | (mpie << 3);
                mstatus |= MSTATUS_MPIE;
                mstatus &= !MSTATUS_MPP;
                self.csrs[CSR_MSTATUSH as usize] &= !(1 << MSTATUSH_MPV_SHIFT);
            }
            Level::Supervisor => {
                mstatus = (mstatus & !SSTATUS_MASK) | (frame.status & SSTATUS_MASK);
                self.csrs[CSR_HSTATUS as usize] = frame.status_ext;
                self.csrs[CSR_SEPC as usize] = frame.epc;

                let pp = (mstatus & MSTATUS_SPP) >> MSTATUS_SPP_SHIFT;
                let pv = (frame.status_ext >> HSTATUS_SPV_SHIFT) & 1;
                self.mode = Mode::from_mpp(pp, pv);

                // SIE <= SPIE, SPIE <= 1, SPP <= U, SPV <= 0
                let spie = (mstatus & MSTATUS_SPIE != 0) as u64;
                mstatus = (mstatus & !MSTATUS_SIE) | (spie << 1);
                mstatus |= MSTATUS_SPIE;
                mstatus &= !MSTATUS_SPP;
                self.csrs[CSR_HSTATUS as usize] &= !(1 << HSTATUS_SPV_SHIFT);
            }
        }

        self.csrs[CSR_MSTATUS as usize] = mstatus;
        self.pc = frame.epc;
        log::trace!("{} trap return to {:#x} in {:?}", frame.level, self.pc, self.mode);
    }

    /// Protection-checked load.
    pub fn load(&self, bus: &mut SystemBus, addr: u64, size: u64) -> Result<u64, Trap> {
        let pa = self.mpu.check(self.mode, addr, size, AccessType::Load)?;
        bus.load(pa, size)
    }

    /// Protection-checked store.
    pub fn store(&self, bus: &mut SystemBus, addr: u64, size: u64, value: u64) -> Result<(), Trap> {
        let pa = self.mpu.check(self.mode, addr, size, AccessType::Store)?;
        bus.store(pa, size, value)
    }

    /// Check that an instruction can be fetched from `addr`.
    pub fn fetch(&self, bus: &mut SystemBus, addr: u64) -> Result<(), Trap> {
        if addr % 4 != 0 {
            return Err(Trap::InstructionAddressMisaligned(addr));
        }
        let pa = self.mpu.check(self.mode, addr, 4, AccessType::Instruction)?;
        bus.fetch_u32(pa).map(|_| ())
    }
}
