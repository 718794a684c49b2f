use crate::devices::aclint::{Aclint, ACLINT_BASE, ACLINT_SIZE};
use crate::devices::imsic::{InterruptFile, IMSIC_FILE_SIZE, IMSIC_M_BASE, IMSIC_S_BASE};
use crate::layout::SRAM_BASE;
use crate::sram::{MemoryError, Sram};
use crate::Trap;

/// Physical address space as seen by the hart after memory protection.
pub trait Bus {
    fn load(&mut self, addr: u64, size: u64) -> Result<u64, Trap>;
    fn store(&mut self, addr: u64, size: u64, value: u64) -> Result<(), Trap>;

    fn read32(&mut self, addr: u64) -> Result<u32, Trap> {
        self.load(addr, 4).map(|v| v as u32)
    }

    fn read64(&mut self, addr: u64) -> Result<u64, Trap> {
        self.load(addr, 8)
    }

    fn write32(&mut self, addr: u64, val: u32) -> Result<(), Trap> {
        self.store(addr, 4, val as u64)
    }

    fn write64(&mut self, addr: u64, val: u64) -> Result<(), Trap> {
        self.store(addr, 8, val)
    }

    /// Instruction fetch check: only the alignment and mapping of `addr` are
    /// checked, the instruction word itself is not decoded.
    fn fetch_u32(&mut self, addr: u64) -> Result<u32, Trap> {
        if addr % 4 != 0 {
            return Err(Trap::InstructionAddressMisaligned(addr));
        }
        self.read32(addr).map_err(|e| match e {
            Trap::LoadAccessFault(a) => Trap::InstructionAccessFault(a),
            Trap::LoadAddressMisaligned(a) => Trap::InstructionAddressMisaligned(a),
            _ => e,
        })
    }
}

/// SRAM plus the interrupt devices of the test platform.
pub struct SystemBus {
    pub sram: Sram,
    pub aclint: Aclint,
    pub imsic_m: InterruptFile,
    pub imsic_s: InterruptFile,
}

impl SystemBus {
    pub fn new(sram_size: usize) -> Self {
        Self {
            sram: Sram::new(SRAM_BASE, sram_size),
            aclint: Aclint::new(),
            imsic_m: InterruptFile::new(),
            imsic_s: InterruptFile::new(),
        }
    }

    pub fn sram_size(&self) -> usize {
        self.sram.data.len()
    }

    /// Interrupt lines driven by the devices, as `mip` bits.
    pub fn check_interrupts(&self) -> u64 {
        let mut mip = 0;

        if self.aclint.ssip(0) {
            mip |= 1 << crate::csr::IRQ_SSI;
        }
        if self.aclint.msip(0) {
            mip |= 1 << crate::csr::IRQ_MSI;
        }
        if self.imsic_s.interrupt_pending() {
            mip |= 1 << crate::csr::IRQ_SEI;
        }
        if self.imsic_m.interrupt_pending() {
            mip |= 1 << crate::csr::IRQ_MEI;
        }

        mip
    }

    /// Interrupt file of the given privilege level.
    pub fn imsic(&mut self, level: crate::csr::Level) -> &mut InterruptFile {
        match level {
            crate::csr::Level::Machine => &mut self.imsic_m,
            crate::csr::Level::Supervisor => &mut self.imsic_s,
        }
    }

    fn device(addr: u64, base: u64, size: u64) -> Option<u64> {
        if addr >= base && addr < base + size {
            Some(addr - base)
        } else {
            None
        }
    }
}

fn load_fault(addr: u64) -> impl Fn(MemoryError) -> Trap {
    move |e| match e {
        MemoryError::InvalidAlignment(_) => Trap::LoadAddressMisaligned(addr),
        _ => Trap::LoadAccessFault(addr),
    }
}

fn store_fault(addr: u64) -> impl Fn(MemoryError) -> Trap {
    move |e| match e {
        MemoryError::InvalidAlignment(_) => Trap::StoreAddressMisaligned(addr),
        _ => Trap::StoreAccessFault(addr),
    }
}

impl Bus for SystemBus {
    fn load(&mut self, addr: u64, size: u64) -> Result<u64, Trap> {
        if let Some(off) = self.sram.offset(addr) {
            return self.sram.load(off, size).map_err(load_fault(addr));
        }
        if addr % size.max(1) != 0 {
            return Err(Trap::LoadAddressMisaligned(addr));
        }
        if let Some(off) = Self::device(addr, ACLINT_BASE, ACLINT_SIZE) {
            return Ok(self.aclint.load(off, size));
        }
        if let Some(off) = Self::device(addr, IMSIC_M_BASE, IMSIC_FILE_SIZE) {
            return Ok(self.imsic_m.load(off, size));
        }
        if let Some(off) = Self::device(addr, IMSIC_S_BASE, IMSIC_FILE_SIZE) {
            return Ok(self.imsic_s.load(off, size));
        }
        Err(Trap::LoadAccessFault(addr))
    }

    fn store(&mut self, addr: u64, size: u64, value: u64) -> Result<(), Trap> {
        if let Some(off) = self.sram.offset(addr) {
            return self.sram.store(off, size, value).map_err(store_fault(addr));
        }
        if addr % size.max(1) != 0 {
            return Err(Trap::StoreAddressMisaligned(addr));
        }
        if let Some(off) = Self::device(addr, ACLINT_BASE, ACLINT_SIZE) {
            self.aclint.store(off, size, value);
            return Ok(());
        }
        if let Some(off) = Self::device(addr, IMSIC_M_BASE, IMSIC_FILE_SIZE) {
            self.imsic_m.store(off, size, value);
            return Ok(());
        }
        if let Some(off) = Self::device(addr, IMSIC_S_BASE, IMSIC_FILE_SIZE) {
            self.imsic_s.store(off, size, value);
            return Ok(());
        }
        Err(Trap::StoreAccessFault(addr))
    }
}
