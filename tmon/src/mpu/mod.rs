//! S-mode memory protection: the two-level MPU and the S-mode PMP.
//!
//! L1 (`smpumask`) checks S/U accesses and the first stage of VS/VU
//! accesses; L2 (`hmpumask`) checks the second stage of VS/VU accesses. SPMP
//! only takes effect while no L1 region is enabled. Machine mode accesses are
//! never checked.

pub mod driver;
pub mod smpu;
pub mod spmp;

use crate::csr::Mode;
use crate::Trap;

pub use smpu::{Region, Smpu};
pub use spmp::Spmp;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AccessType {
    Instruction,
    Load,
    Store,
}

impl AccessType {
    /// Protection fault raised when this access is denied.
    pub fn fault(self, addr: u64) -> Trap {
        match self {
            AccessType::Instruction => Trap::FetchProtectionFault(addr),
            AccessType::Load => Trap::LoadProtectionFault(addr),
            AccessType::Store => Trap::StoreProtectionFault(addr),
        }
    }
}

/// Read/write/execute rights.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Perm {
    pub r: bool,
    pub w: bool,
    pub x: bool,
}

impl Perm {
    pub const NONE: Perm = Perm::new(false, false, false);
    pub const R: Perm = Perm::new(true, false, false);
    pub const RW: Perm = Perm::new(true, true, false);
    pub const X: Perm = Perm::new(false, false, true);
    pub const RX: Perm = Perm::new(true, false, true);
    pub const RWX: Perm = Perm::new(true, true, true);

    pub const fn new(r: bool, w: bool, x: bool) -> Self {
        Self { r, w, x }
    }

    /// Decode the low three bits (R=4, W=2, X=1).
    pub fn from_rwx(bits: u64) -> Self {
        Self::new(bits & 4 != 0, bits & 2 != 0, bits & 1 != 0)
    }

    pub fn allows(self, access: AccessType) -> bool {
        match access {
            AccessType::Instruction => self.x,
            AccessType::Load => self.r,
            AccessType::Store => self.w,
        }
    }
}

/// Protection state of the hart.
pub struct MemoryProtection {
    pub l1: Smpu,
    pub l2: Smpu,
    pub spmp: Spmp,
}

impl MemoryProtection {
    pub fn new() -> Self {
        Self {
            l1: Smpu::new(),
            l2: Smpu::new(),
            spmp: Spmp::new(),
        }
    }

    /// Check an access of `size` bytes at `addr` made in `mode`.
    ///
    /// Returns the physical address the access goes to.
    pub fn check(&self, mode: Mode, addr: u64, size: u64, access: AccessType) -> Result<u64, Trap> {
        if mode == Mode::Machine {
            return Ok(addr);
        }

        let user = matches!(mode, Mode::User | Mode::VirtualUser);
        if self.l1.enabled() {
            let pa = self.l1.check(addr, size, access, user)?;
            if mode.is_virtual() {
                self.l2.check_stage2(pa, size, access, mode == Mode::VirtualSupervisor)?;
            }
            return Ok(pa);
        }

        if mode.is_virtual() {
            self.l2.check_stage2(addr, size, access, mode == Mode::VirtualSupervisor)?;
            return Ok(addr);
        }

        self.spmp.check(addr, size, access, user)?;
        Ok(addr)
    }
}

impl Default for MemoryProtection {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mpu::smpu::{ATTR_R, ATTR_U, ATTR_W, ATTR_X};

    #[test]
    fn machine_mode_bypasses_protection() {
        let mut prot = MemoryProtection::new();
        prot.l1.regions[0] = Region::protected(0x1000, 0x100, ATTR_R);
        prot.l1.mask = 1;
        assert_eq!(prot.check(Mode::Machine, 0x9000, 4, AccessType::Store), Ok(0x9000));
        assert_eq!(
            prot.check(Mode::Supervisor, 0x9000, 4, AccessType::Store),
            Err(Trap::StoreProtectionFault(0x9000))
        );
    }

    #[test]
    fn l2_applies_to_virtual_modes() {
        let mut prot = MemoryProtection::new();
        prot.l2.regions[0] = Region::protected(0x4000, 0x1000, ATTR_R | ATTR_W);
        prot.l2.regions[1] = Region::protected(0x8000, 0x1000, ATTR_U | ATTR_R | ATTR_X);
        prot.l2.mask = 0b11;

        assert_eq!(prot.check(Mode::VirtualSupervisor, 0x4010, 8, AccessType::Store), Ok(0x4010));
        assert_eq!(
            prot.check(Mode::VirtualUser, 0x4010, 8, AccessType::Load),
            Err(Trap::LoadProtectionFault(0x4010))
        );
        assert_eq!(prot.check(Mode::VirtualUser, 0x8000, 4, AccessType::Instruction), Ok(0x8000));
        // L2 is not consulted outside virtualization
        assert_eq!(prot.check(Mode::Supervisor, 0xF000, 4, AccessType::Load), Ok(0xF000));
    }

    #[test]
    fn spmp_only_without_l1() {
        let mut prot = MemoryProtection::new();
        assert_eq!(
            prot.check(Mode::User, 0x100, 4, AccessType::Load),
            Err(Trap::LoadProtectionFault(0x100))
        );
        prot.l1.regions[0] = Region::protected(0, 0xFFFF, ATTR_U | ATTR_R | ATTR_W | ATTR_X);
        prot.l1.mask = 1;
        assert_eq!(prot.check(Mode::User, 0x100, 4, AccessType::Load), Ok(0x100));
    }
}
