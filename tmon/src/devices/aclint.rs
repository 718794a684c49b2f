pub const ACLINT_BASE: u64 = 0x0200_0000;
pub const ACLINT_SIZE: u64 = 0x10000;

/// MSWI device: one `msip` word per hart.
pub const MSWI_OFFSET: u64 = 0x0000;
/// SSWI device: one `setssip` word per hart.
pub const SSWI_OFFSET: u64 = 0xC000;

/// Harts wired to the ACLINT; the monitor drives a single hart.
pub const NUM_HARTS: usize = 1;

/// Software-interrupt lines of the ACLINT.
///
/// Only the MSWI and SSWI devices are modelled; the machine timer is not
/// used by the monitor.
pub struct Aclint {
    pub msip: [u32; NUM_HARTS],
    pub ssip: [u32; NUM_HARTS],
}

impl Aclint {
    pub fn new() -> Self {
        Self {
            msip: [0; NUM_HARTS],
            ssip: [0; NUM_HARTS],
        }
    }

    pub fn msip(&self, hart: usize) -> bool {
        self.msip.get(hart).map_or(false, |v| *v != 0)
    }

    pub fn ssip(&self, hart: usize) -> bool {
        self.ssip.get(hart).map_or(false, |v| *v != 0)
    }

    fn line(offset: u64, base: u64) -> Option<usize> {
        if offset >= base && offset < base + (NUM_HARTS as u64 * 4) {
            Some(((offset - base) / 4) as usize)
        } else {
            None
        }
    }

    /// Load from the ACLINT register space.
    ///
    /// Offsets are relative to `ACLINT_BASE`. Only 4-byte accesses hit a
    /// register; everything else reads as zero.
    pub fn load(&self, offset: u64, size: u64) -> u64 {
        if size != 4 {
            return 0;
        }
        if let Some(hart) = Self::line(offset, MSWI_OFFSET) {
            return self.msip[hart] as u64;
        }
        // setssip always reads as zero
        0
    }

    /// Store into the ACLINT register space.
    ///
    /// Only the least significant bit of a line register is writable.
    pub fn store(&mut self, offset: u64, size: u64, value: u64) {
        if size != 4 {
            return;
        }
        if let Some(hart) = Self::line(offset, MSWI_OFFSET) {
            self.msip[hart] = (value & 1) as u32;
        } else if let Some(hart) = Self::line(offset, SSWI_OFFSET) {
            self.ssip[hart] = (value & 1) as u32;
        }
    }
}

impl Default for Aclint {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn software_lines_follow_lsb() {
        let mut aclint = Aclint::new();
        aclint.store(MSWI_OFFSET, 4, 0xFF);
        assert!(aclint.msip(0));
        assert_eq!(aclint.load(MSWI_OFFSET, 4), 1);

        aclint.store(SSWI_OFFSET, 4, 1);
        assert!(aclint.ssip(0));
        assert_eq!(aclint.load(SSWI_OFFSET, 4), 0);

        // no second hart behind the first line
        aclint.store(SSWI_OFFSET + 4, 4, 0);
        assert!(aclint.ssip(0));
        assert!(!aclint.ssip(1));

        aclint.store(MSWI_OFFSET, 4, 0);
        assert!(!aclint.msip(0));
    }

    #[test]
    fn odd_sizes_are_ignored() {
        let mut aclint = Aclint::new();
        aclint.store(MSWI_OFFSET, 8, 1);
        assert!(!aclint.msip(0));
        assert_eq!(aclint.load(MSWI_OFFSET, 2), 0);
    }
}
