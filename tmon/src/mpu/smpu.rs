//! S-mode MPU region table.
//!
//! Each region is a pair of words `{addr, conf}`:
//!
//! * protected region (`addr & 0x1F == 0`): covers
//!   `addr ..= addr + (conf | 0x1F)` and grants the rights in `conf & 0xF`;
//! * translated region (`psz = addr & 0x1F != 0`): maps the `2^psz` bytes at
//!   `addr & !0x1F` onto `conf & !0x1F`, with rights in `conf & 0xF`.

use super::{AccessType, Perm};
use crate::csr::MPU_REGIONS;
use crate::Trap;

pub const ATTR_X: u64 = 1;
pub const ATTR_W: u64 = 2;
pub const ATTR_R: u64 = 4;
pub const ATTR_U: u64 = 8;
pub const ATTR_MASK: u64 = 0xF;

/// Low bits of both region words that carry the marker / attributes.
pub const FIELD_MASK: u64 = 0x1F;

pub const NUM_REGIONS: usize = MPU_REGIONS as usize;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Region {
    pub addr: u64,
    pub conf: u64,
}

impl Region {
    /// Protected region of `size` bytes starting at 32-byte aligned `base`.
    pub fn protected(base: u64, size: u64, attr: u64) -> Self {
        Self {
            addr: base & !FIELD_MASK,
            conf: (size.saturating_sub(1) & !FIELD_MASK) | (attr & ATTR_MASK),
        }
    }

    /// Translated region of `2^psz` bytes mapping `va` onto `pa`.
    pub fn translated(va: u64, pa: u64, psz: u64, attr: u64) -> Self {
        Self {
            addr: (va & !FIELD_MASK) | (psz & FIELD_MASK),
            conf: (pa & !FIELD_MASK) | (attr & ATTR_MASK),
        }
    }

    pub fn psz(&self) -> u64 {
        self.addr & FIELD_MASK
    }

    pub fn is_translated(&self) -> bool {
        self.psz() != 0
    }

    pub fn base(&self) -> u64 {
        self.addr & !FIELD_MASK
    }

    /// Last byte covered by the region.
    pub fn end(&self) -> u64 {
        if self.is_translated() {
            self.base().saturating_add((1u64 << self.psz()) - 1)
        } else {
            self.base().saturating_add(self.conf | FIELD_MASK)
        }
    }

    pub fn attr(&self) -> u64 {
        self.conf & ATTR_MASK
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base() && addr <= self.end()
    }

    /// Rights granted to `(supervisor, user)` accesses.
    ///
    /// `W` without `R` selects the shared encodings.
    pub fn rights(&self) -> (Perm, Perm) {
        let attr = self.attr();
        let u = attr & ATTR_U != 0;
        if attr & ATTR_R == 0 && attr & ATTR_W != 0 {
            let x = attr & ATTR_X != 0;
            return match (u, x) {
                (false, false) => (Perm::R, Perm::R),
                (false, true) => (Perm::RX, Perm::X),
                (true, false) => (Perm::RW, Perm::RW),
                (true, true) => (Perm::R, Perm::RX),
            };
        }
        let rwx = Perm::from_rwx(attr);
        if u {
            (Perm::NONE, rwx)
        } else {
            (rwx, Perm::NONE)
        }
    }
}

pub struct Smpu {
    pub regions: [Region; NUM_REGIONS],
    /// Enable mask, one bit per region.
    pub mask: u64,
}

impl Smpu {
    pub fn new() -> Self {
        Self {
            regions: [Region::default(); NUM_REGIONS],
            mask: 0,
        }
    }

    pub fn enabled(&self) -> bool {
        self.mask != 0
    }

    fn active(&self) -> impl Iterator<Item = (usize, &Region)> {
        self.regions
            .iter()
            .enumerate()
            .filter(move |&(i, _)| self.mask & (1u64 << i) != 0)
    }

    /// Read word `index` of the region table (`2 * id` is the address word,
    /// `2 * id + 1` the configuration word).
    pub fn read_word(&self, index: u64) -> Option<u64> {
        let region = self.regions.get((index / 2) as usize)?;
        Some(if index % 2 == 0 { region.addr } else { region.conf })
    }

    pub fn write_word(&mut self, index: u64, val: u64) -> bool {
        match self.regions.get_mut((index / 2) as usize) {
            Some(region) => {
                if index % 2 == 0 {
                    region.addr = val;
                } else {
                    region.conf = val;
                }
                true
            }
            None => false,
        }
    }

    /// First-stage check; returns the physical address.
    pub fn check(&self, addr: u64, size: u64, access: AccessType, user: bool) -> Result<u64, Trap> {
        let last = addr.saturating_add(size.max(1) - 1);

        let mut translated = self.active().filter(|(_, r)| r.is_translated() && r.contains(addr));
        if let Some((id, region)) = translated.next() {
            if translated.next().is_some() {
                log::debug!("smpu: {:#x} hits more than one translated region", addr);
                return Err(Trap::RegionCrossingFault(addr));
            }
            if last > region.end() {
                return Err(Trap::RegionCrossingFault(addr));
            }
            let (s, u) = region.rights();
            let perm = if user { u } else { s };
            if !perm.allows(access) {
                log::debug!("smpu: region {} denies {:?} @{:#x}", id, access, addr);
                return Err(access.fault(addr));
            }
            // a mapping past the top of the address space reaches no memory
            return (region.conf & !FIELD_MASK)
                .checked_add(addr - region.base())
                .ok_or_else(|| access.fault(addr));
        }

        if let Some((id, region)) = self.active().find(|(_, r)| !r.is_translated() && r.contains(addr)) {
            if last > region.end() {
                return Err(Trap::RegionCrossingFault(addr));
            }
            let (s, u) = region.rights();
            let perm = if user { u } else { s };
            if !perm.allows(access) {
                log::debug!("smpu: region {} denies {:?} @{:#x}", id, access, addr);
                return Err(access.fault(addr));
            }
            return Ok(addr);
        }

        Err(access.fault(addr))
    }

    /// Second-stage check for guest accesses.
    ///
    /// A matching region must grant the access bit, and VU accesses need the
    /// `U` attribute.
    pub fn check_stage2(&self, addr: u64, size: u64, access: AccessType, vs: bool) -> Result<(), Trap> {
        if !self.enabled() {
            return Ok(());
        }
        let last = addr.saturating_add(size.max(1) - 1);
        match self.active().find(|(_, r)| r.contains(addr)) {
            Some((_, region)) => {
                if last > region.end() {
                    return Err(Trap::RegionCrossingFault(addr));
                }
                let attr = region.attr();
                if Perm::from_rwx(attr).allows(access) && (attr & ATTR_U != 0 || vs) {
                    Ok(())
                } else {
                    Err(access.fault(addr))
                }
            }
            None => Err(access.fault(addr)),
        }
    }
}

impl Default for Smpu {
    fn default() -> Self {
        Self::new()
    }
}
