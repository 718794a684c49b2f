//! Test-side MPU and SPMP drivers.
//!
//! These run as ordinary CSR instructions of the calling program, so they
//! must be used from M-mode or S-mode like the registers they touch.

use crate::csr::{
    Level, CSR_HMPUMASK, CSR_SMPUMASK, CSR_SPMPADDR0, CSR_SPMPCFG0, CSR_SPMPSWITCH0, CSR_SPMPSWITCH1,
    ISELECT_HMPU_BASE, ISELECT_SMPU_BASE, MPU_REGIONS, SPMP_ADDR_REGS, SPMP_CFG_REGS,
};
use crate::machine::Machine;
use crate::mpu::smpu::{Region, FIELD_MASK};
use crate::mpu::spmp::NUM_ENTRIES;
use crate::Halt;

// Shared S/U encodings (W without R)
pub const SMPU_SRO: u64 = 0x02;
pub const SMPU_SXR: u64 = 0x03;
pub const SMPU_SRW: u64 = 0x0A;
pub const SMPU_SRX: u64 = 0x0B;
// S-mode only
pub const SMPU_XO: u64 = 0x01;
pub const SMPU_RO: u64 = 0x04;
pub const SMPU_RX: u64 = 0x05;
pub const SMPU_RW: u64 = 0x06;
pub const SMPU_RWX: u64 = 0x07;
// U-mode only
pub const SMPU_UXO: u64 = 0x09;
pub const SMPU_URO: u64 = 0x0C;
pub const SMPU_URX: u64 = 0x0D;
pub const SMPU_URW: u64 = 0x0E;
pub const SMPU_URWX: u64 = 0x0F;

/// MPU stage addressed by a driver call.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MpuLevel {
    /// S-mode table, `smpumask`.
    L1,
    /// HS-mode table, `hmpumask`.
    L2,
}

impl MpuLevel {
    fn mask_csr(self) -> u16 {
        match self {
            MpuLevel::L1 => CSR_SMPUMASK,
            MpuLevel::L2 => CSR_HMPUMASK,
        }
    }

    fn select(self, id: u64) -> u64 {
        let base = match self {
            MpuLevel::L1 => ISELECT_SMPU_BASE,
            MpuLevel::L2 => ISELECT_HMPU_BASE,
        };
        base + (id << 1)
    }

    fn name(self) -> &'static str {
        match self {
            MpuLevel::L1 => "SMPU L1 (S-mode)",
            MpuLevel::L2 => "SMPU L2 (HS-mode)",
        }
    }
}

/// Load region `id` from `region`.
pub fn region_config(m: &mut Machine, mpu: MpuLevel, id: u64, region: Region) -> Result<(), Halt> {
    m.icsr_write(Level::Supervisor, mpu.select(id), region.addr)?;
    m.icsr_write(Level::Supervisor, mpu.select(id) + 1, region.conf)
}

/// Load consecutive regions starting at `start`.
pub fn group_config(m: &mut Machine, mpu: MpuLevel, start: u64, regions: &[Region]) -> Result<(), Halt> {
    for (id, region) in (start..).zip(regions) {
        region_config(m, mpu, id, *region)?;
    }
    Ok(())
}

pub fn region_enable(m: &mut Machine, mpu: MpuLevel, id: u64) -> Result<(), Halt> {
    m.csr_set(mpu.mask_csr(), 1 << id)?;
    Ok(())
}

pub fn region_disable(m: &mut Machine, mpu: MpuLevel, id: u64) -> Result<(), Halt> {
    m.csr_clear(mpu.mask_csr(), 1 << id)?;
    Ok(())
}

pub fn group_enable(m: &mut Machine, mpu: MpuLevel, enable: bool, mask: u64) -> Result<(), Halt> {
    if enable {
        m.csr_set(mpu.mask_csr(), mask)?;
    } else {
        m.csr_clear(mpu.mask_csr(), mask)?;
    }
    Ok(())
}

/// Replace the enable mask.
pub fn switch(m: &mut Machine, mpu: MpuLevel, mask: u64) -> Result<(), Halt> {
    m.csr_write(mpu.mask_csr(), mask)
}

pub fn disable(m: &mut Machine, mpu: MpuLevel) -> Result<(), Halt> {
    m.csr_write(mpu.mask_csr(), 0)
}

/// Print every configured region to the console.
pub fn config_show(m: &mut Machine, mpu: MpuLevel) -> Result<(), Halt> {
    m.print(format!("dumping {} configuration, inactive regions are hidden", mpu.name()));
    let enabled = m.csr_read(mpu.mask_csr())?;
    m.print(format!("  mask: {:#x}", enabled));

    for id in 0..MPU_REGIONS {
        let addr = m.icsr_read(Level::Supervisor, mpu.select(id))?;
        let conf = m.icsr_read(Level::Supervisor, mpu.select(id) + 1)?;
        if addr == 0 && conf == 0 {
            continue;
        }
        let state = if enabled & (1 << id) != 0 { "on " } else { "off" };
        let region = Region { addr, conf };
        let line = if region.is_translated() {
            format!(
                "  region#{}: {} {:#x}->{:#x} {}K {:#x}",
                id,
                state,
                region.base(),
                conf & !FIELD_MASK,
                (1u64 << region.psz()) >> 10,
                region.attr()
            )
        } else {
            format!(
                "  region#{}: {} {:#x}-{:#x} {:#x}",
                id,
                state,
                addr,
                region.end(),
                conf & FIELD_MASK
            )
        };
        m.print(line);
    }
    Ok(())
}

/// Shadow copy of the SPMP registers, built up by a program and loaded in
/// one go with [`SpmpConfig::apply`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpmpConfig {
    pub switch: u64,
    /// `spmpaddr` values (address >> 2).
    pub addr: [u64; NUM_ENTRIES],
    pub cfg: [u8; NUM_ENTRIES],
}

impl SpmpConfig {
    pub fn new() -> Self {
        Self {
            switch: 0,
            addr: [0; NUM_ENTRIES],
            cfg: [0; NUM_ENTRIES],
        }
    }

    /// Set entry `index` to byte address `addr` with cfg octet `attr`.
    pub fn set_entry(&mut self, index: usize, addr: u64, attr: u8) -> Result<(), Halt> {
        if index >= NUM_ENTRIES {
            return Err(Halt::TrapIndex(index as u64));
        }
        self.addr[index] = addr >> 2;
        self.cfg[index] = attr;
        Ok(())
    }

    pub fn set_switch(&mut self, switch0: u32, switch1: u32) {
        self.switch = (switch0 as u64) | ((switch1 as u64) << 32);
    }

    fn cfg_word(&self, reg: usize) -> u64 {
        (0..4).fold(0, |acc, i| acc | ((self.cfg[reg * 4 + i] as u64) << (8 * i)))
    }

    /// Load the shadow into the CSRs with every entry switched off meanwhile.
    pub fn apply(&self, m: &mut Machine) -> Result<(), Halt> {
        spmp_switch(m, 0)?;
        for i in 0..SPMP_ADDR_REGS {
            m.csr_write(CSR_SPMPADDR0 + i, self.addr[i as usize])?;
        }
        for i in 0..SPMP_CFG_REGS {
            m.csr_write(CSR_SPMPCFG0 + i, self.cfg_word(i as usize))?;
        }
        spmp_switch(m, self.switch)
    }

    /// Read the live configuration back from the CSRs.
    pub fn dump(m: &mut Machine) -> Result<Self, Halt> {
        let mut config = Self::new();
        for i in 0..SPMP_ADDR_REGS {
            config.addr[i as usize] = m.csr_read(CSR_SPMPADDR0 + i)?;
        }
        for i in 0..SPMP_CFG_REGS {
            let word = m.csr_read(CSR_SPMPCFG0 + i)?;
            for b in 0..4 {
                config.cfg[i as usize * 4 + b] = (word >> (8 * b)) as u8;
            }
        }
        let lo = m.csr_read(CSR_SPMPSWITCH0)?;
        let hi = m.csr_read(CSR_SPMPSWITCH1)?;
        config.switch = lo | (hi << 32);
        Ok(config)
    }

    /// Print the non-zero entries of the shadow.
    pub fn show(&self, m: &mut Machine) {
        m.print("SPMP configuration (zero entries are hidden)");
        for (i, addr) in self.addr.iter().enumerate().filter(|(_, a)| **a != 0) {
            m.print(format!(
                "  spmpaddr{}: {:#x}; spmpcfg{}[{}]: {:#x};",
                i,
                addr,
                i / 4,
                i % 4,
                self.cfg[i]
            ));
        }
        m.print(format!("  spmpswitch0: {:#x};", self.switch & 0xFFFF_FFFF));
        m.print(format!("  spmpswitch1: {:#x};", self.switch >> 32));
    }
}

impl Default for SpmpConfig {
    fn default() -> Self {
        Self::new()
    }
}

pub fn spmp_switch(m: &mut Machine, mask: u64) -> Result<(), Halt> {
    m.csr_write(CSR_SPMPSWITCH0, mask & 0xFFFF_FFFF)?;
    m.csr_write(CSR_SPMPSWITCH1, mask >> 32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpu::spmp::{napot, AddrMatch, CFG_R, CFG_S, CFG_W};

    #[test]
    fn regions_load_through_indirect_registers() {
        let mut m = Machine::default();
        let regions = [
            Region::protected(0x0, 0x1_0000, SMPU_SXR),
            Region::protected(0x2_0000, 0x2_0000, SMPU_SRW),
        ];
        group_config(&mut m, MpuLevel::L1, 4, &regions).unwrap();
        group_enable(&mut m, MpuLevel::L1, true, 0b11 << 4).unwrap();
        region_disable(&mut m, MpuLevel::L1, 5).unwrap();

        assert_eq!(m.hart.mpu.l1.regions[4], regions[0]);
        assert_eq!(m.hart.mpu.l1.regions[5], regions[1]);
        assert_eq!(m.hart.mpu.l1.mask, 1 << 4);

        config_show(&mut m, MpuLevel::L1).unwrap();
        assert!(m.console.contains("region#4: on  0x0-0xffff 0x3"));
        assert!(m.console.contains("region#5: off 0x20000-0x3ffff 0xa"));

        disable(&mut m, MpuLevel::L1).unwrap();
        assert!(!m.hart.mpu.l1.enabled());
    }

    #[test]
    fn l2_uses_its_own_table() {
        let mut m = Machine::default();
        region_config(&mut m, MpuLevel::L2, 0, Region::translated(0x4_0000, 0x6_0000, 12, SMPU_RW)).unwrap();
        switch(&mut m, MpuLevel::L2, 1).unwrap();
        assert_eq!(m.hart.mpu.l2.mask, 1);
        assert!(m.hart.mpu.l1.regions[0] == Region::default());

        config_show(&mut m, MpuLevel::L2).unwrap();
        assert!(m.console.contains("0x40000->0x60000 4K 0x6"));
    }

    #[test]
    fn spmp_shadow_applies_and_dumps() {
        let mut m = Machine::default();
        let mut config = SpmpConfig::new();
        config
            .set_entry(0, napot(0x2_0000, 0x2_0000) << 2, CFG_R | CFG_W | AddrMatch::Napot.bits())
            .unwrap();
        config.set_entry(33, 0x1_0000, CFG_S | CFG_R | AddrMatch::Tor.bits()).unwrap();
        config.set_switch(1, 1 << 1);
        assert!(config.set_entry(64, 0, 0).is_err());

        config.apply(&mut m).unwrap();
        assert_eq!(m.hart.mpu.spmp.switch, 1 | (1 << 33));
        assert_eq!(m.hart.mpu.spmp.addr[33], 0x1_0000 >> 2);

        let live = SpmpConfig::dump(&mut m).unwrap();
        assert_eq!(live, config);

        live.show(&mut m);
        assert!(m.console.contains("spmpcfg8[1]: 0x89;"));
        assert!(m.console.contains("spmpswitch1: 0x2;"));
    }
}
