//! S-mode physical memory protection.
//!
//! 64 entries, each an `spmpaddr` register (address >> 2) and one `spmpcfg`
//! octet. Only entries whose bit is set in `spmpswitch` take part in the
//! check; the lowest-numbered matching entry decides.

use super::{AccessType, Perm};
use crate::Trap;

pub const NUM_ENTRIES: usize = 64;

pub const CFG_R: u8 = 1 << 0;
pub const CFG_W: u8 = 1 << 1;
pub const CFG_X: u8 = 1 << 2;
pub const CFG_A_SHIFT: u8 = 3;
pub const CFG_A_MASK: u8 = 0b11 << CFG_A_SHIFT;
pub const CFG_S: u8 = 1 << 7;

/// Address-matching mode of an entry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AddrMatch {
    Off,
    Tor,
    Na4,
    Napot,
}

impl AddrMatch {
    pub fn from_cfg(cfg: u8) -> Self {
        match (cfg & CFG_A_MASK) >> CFG_A_SHIFT {
            0 => AddrMatch::Off,
            1 => AddrMatch::Tor,
            2 => AddrMatch::Na4,
            _ => AddrMatch::Napot,
        }
    }

    pub fn bits(self) -> u8 {
        let a = match self {
            AddrMatch::Off => 0,
            AddrMatch::Tor => 1,
            AddrMatch::Na4 => 2,
            AddrMatch::Napot => 3,
        };
        a << CFG_A_SHIFT
    }
}

/// Rights of `(supervisor, user)` for the S/R/W/X bits of a cfg octet.
pub fn rights(cfg: u8) -> (Perm, Perm) {
    match cfg & (CFG_S | CFG_R | CFG_W | CFG_X) {
        0x01 => (Perm::NONE, Perm::R),
        0x02 => (Perm::RW, Perm::R),
        0x03 => (Perm::NONE, Perm::RW),
        0x04 => (Perm::NONE, Perm::X),
        0x05 => (Perm::NONE, Perm::RX),
        0x06 => (Perm::RW, Perm::RW),
        0x07 => (Perm::NONE, Perm::RWX),
        0x81 => (Perm::R, Perm::NONE),
        0x82 => (Perm::X, Perm::X),
        0x83 => (Perm::RW, Perm::NONE),
        0x84 => (Perm::X, Perm::NONE),
        0x85 => (Perm::RX, Perm::NONE),
        0x86 => (Perm::RX, Perm::X),
        0x87 => (Perm::R, Perm::R),
        _ => (Perm::NONE, Perm::NONE),
    }
}

/// `spmpaddr` value of a naturally aligned power-of-two region.
///
/// `size` must be a power of two of at least 8 bytes.
pub fn napot(base: u64, size: u64) -> u64 {
    (base >> 2) | ((size >> 3).saturating_sub(1))
}

pub struct Spmp {
    pub cfg: [u8; NUM_ENTRIES],
    pub addr: [u64; NUM_ENTRIES],
    pub switch: u64,
}

impl Spmp {
    pub fn new() -> Self {
        Self {
            cfg: [0; NUM_ENTRIES],
            addr: [0; NUM_ENTRIES],
            switch: 0,
        }
    }

    /// Four cfg octets packed into `spmpcfg{reg}`.
    pub fn read_cfg(&self, reg: usize) -> u64 {
        (0..4).fold(0, |acc, i| acc | ((self.cfg[reg * 4 + i] as u64) << (8 * i)))
    }

    pub fn write_cfg(&mut self, reg: usize, val: u64) {
        for i in 0..4 {
            self.cfg[reg * 4 + i] = (val >> (8 * i)) as u8;
        }
    }

    /// Byte range `[lo, hi)` covered by entry `i`, if it is not off.
    pub fn range(&self, i: usize) -> Option<(u64, u64)> {
        let addr = self.addr[i];
        match AddrMatch::from_cfg(self.cfg[i]) {
            AddrMatch::Off => None,
            AddrMatch::Tor => {
                let lo = if i == 0 { 0 } else { self.addr[i - 1] << 2 };
                Some((lo, addr << 2))
            }
            AddrMatch::Na4 => Some((addr << 2, (addr << 2) + 4)),
            AddrMatch::Napot => {
                let t = addr.trailing_ones() as u64;
                if t >= 61 {
                    return Some((0, u64::MAX));
                }
                let base = (addr & !((1u64 << t) - 1)) << 2;
                Some((base, base.saturating_add(8u64 << t)))
            }
        }
    }

    pub fn check(&self, addr: u64, size: u64, access: AccessType, user: bool) -> Result<(), Trap> {
        let end = addr.saturating_add(size.max(1));
        for i in 0..NUM_ENTRIES {
            if self.switch & (1u64 << i) == 0 {
                continue;
            }
            let Some((lo, hi)) = self.range(i) else {
                continue;
            };
            if end <= lo || addr >= hi {
                continue;
            }
            // partially covered accesses fail
            if addr < lo || end > hi {
                return Err(access.fault(addr));
            }
            let (s, u) = rights(self.cfg[i]);
            let perm = if user { u } else { s };
            return if perm.allows(access) {
                Ok(())
            } else {
                log::debug!("spmp: entry {} denies {:?} @{:#x}", i, access, addr);
                Err(access.fault(addr))
            };
        }
        if user {
            Err(access.fault(addr))
        } else {
            Ok(())
        }
    }
}

impl Default for Spmp {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_table() {
        assert_eq!(rights(0x02), (Perm::RW, Perm::R));
        assert_eq!(rights(0x06), (Perm::RW, Perm::RW));
        assert_eq!(rights(0x80), (Perm::NONE, Perm::NONE));
        assert_eq!(rights(0x82), (Perm::X, Perm::X));
        assert_eq!(rights(0x86), (Perm::RX, Perm::X));
        assert_eq!(rights(0x87), (Perm::R, Perm::R));
        assert_eq!(rights(0x05 | AddrMatch::Napot.bits()), (Perm::NONE, Perm::RX));
    }

    #[test]
    fn napot_encoding_round_trips_through_range() {
        let mut spmp = Spmp::new();
        spmp.addr[0] = napot(0x2_0000, 0x1000);
        spmp.cfg[0] = AddrMatch::Napot.bits() | CFG_S | CFG_R;
        assert_eq!(spmp.range(0), Some((0x2_0000, 0x2_1000)));

        spmp.addr[1] = 0x400 >> 2;
        spmp.cfg[1] = AddrMatch::Na4.bits();
        assert_eq!(spmp.range(1), Some((0x400, 0x404)));
    }

    #[test]
    fn lowest_active_entry_wins() {
        let mut spmp = Spmp::new();
        spmp.addr[0] = napot(0x1000, 0x100);
        spmp.cfg[0] = AddrMatch::Napot.bits() | CFG_S | CFG_R;
        spmp.addr[1] = napot(0x1000, 0x1000);
        spmp.cfg[1] = AddrMatch::Napot.bits() | CFG_S | CFG_R | CFG_W;
        spmp.switch = 0b11;

        assert_eq!(spmp.check(0x1010, 8, AccessType::Store, false), Err(Trap::StoreProtectionFault(0x1010)));
        assert_eq!(spmp.check(0x1810, 8, AccessType::Store, false), Ok(()));

        spmp.switch = 0b10;
        assert_eq!(spmp.check(0x1010, 8, AccessType::Store, false), Ok(()));
    }

    #[test]
    fn tor_and_default_policy() {
        let mut spmp = Spmp::new();
        spmp.addr[0] = 0x4000 >> 2;
        spmp.addr[1] = 0x8000 >> 2;
        spmp.cfg[1] = AddrMatch::Tor.bits() | CFG_R | CFG_W;
        spmp.switch = 0b10;

        assert_eq!(spmp.check(0x4000, 8, AccessType::Store, true), Ok(()));
        assert_eq!(spmp.check(0x4000, 8, AccessType::Store, false), Err(Trap::StoreProtectionFault(0x4000)));
        assert_eq!(spmp.check(0x9000, 8, AccessType::Load, false), Ok(()));
        assert_eq!(spmp.check(0x9000, 8, AccessType::Load, true), Err(Trap::LoadProtectionFault(0x9000)));
    }

    #[test]
    fn cfg_registers_pack_four_octets() {
        let mut spmp = Spmp::new();
        spmp.write_cfg(1, 0x8719_0203);
        assert_eq!(&spmp.cfg[4..8], &[0x03, 0x02, 0x19, 0x87]);
        assert_eq!(spmp.read_cfg(1), 0x8719_0203);
    }
}
