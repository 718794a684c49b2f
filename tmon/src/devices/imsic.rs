//! Incoming message-signalled interrupt controller.
//!
//! Each privilege level owns one interrupt file. Devices (and the monitor's
//! MSI injection service) write an identity into `seteipnum`; the hart reads
//! the highest-priority pending and enabled identity through `xtopei` and
//! claims it by writing that register back.

pub const IMSIC_M_BASE: u64 = 0x2400_0000;
pub const IMSIC_S_BASE: u64 = 0x2800_0000;
pub const IMSIC_FILE_SIZE: u64 = 0x1000;

pub const SETEIPNUM_LE: u64 = 0x000;
pub const SETEIPNUM_BE: u64 = 0x004;

/// Identities 1..NUM_IDS-1 are usable; 0 means "none".
pub const NUM_IDS: u64 = 32;

/// `eidelivery` value enabling delivery from the file.
pub const EIDELIVERY_ON: u64 = 1;

pub struct InterruptFile {
    pub eip: u64,
    pub eie: u64,
    pub eidelivery: u64,
    pub eithreshold: u64,
}

impl InterruptFile {
    pub fn new() -> Self {
        Self {
            eip: 0,
            eie: 0,
            eidelivery: 0,
            eithreshold: 0,
        }
    }

    fn valid_id(id: u64) -> bool {
        id != 0 && id < NUM_IDS
    }

    /// Mark `id` pending. Out-of-range identities are dropped.
    pub fn set_pending(&mut self, id: u64) {
        if Self::valid_id(id) {
            log::trace!("imsic: seteipnum {}", id);
            self.eip |= 1 << id;
        }
    }

    /// Highest-priority deliverable identity, 0 if none.
    ///
    /// Lower identities win. A nonzero threshold masks identities at or above
    /// it.
    pub fn top_id(&self) -> u64 {
        let mut ready = self.eip & self.eie & !1;
        if self.eithreshold != 0 {
            ready &= (1u64 << self.eithreshold.min(63)) - 1;
        }
        if ready == 0 {
            0
        } else {
            ready.trailing_zeros() as u64
        }
    }

    /// `xtopei` value: identity in bits 16.., priority (equal to the
    /// identity) in the low bits.
    pub fn topei(&self) -> u64 {
        let id = self.top_id();
        (id << 16) | id
    }

    /// Acknowledge the current top identity and return its `topei` value.
    pub fn claim(&mut self) -> u64 {
        let top = self.topei();
        let id = top >> 16;
        if id != 0 {
            self.eip &= !(1 << id);
        }
        top
    }

    /// Whether the file currently asserts its external interrupt line.
    pub fn interrupt_pending(&self) -> bool {
        self.eidelivery & EIDELIVERY_ON != 0 && self.top_id() != 0
    }

    pub fn load(&self, _offset: u64, _size: u64) -> u64 {
        // seteipnum registers read as zero
        0
    }

    pub fn store(&mut self, offset: u64, size: u64, value: u64) {
        if size != 4 {
            return;
        }
        match offset {
            SETEIPNUM_LE => self.set_pending(value & 0xFFFF_FFFF),
            SETEIPNUM_BE => self.set_pending((value as u32).swap_bytes() as u64),
            _ => {}
        }
    }
}

impl Default for InterruptFile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowest_enabled_identity_wins() {
        let mut file = InterruptFile::new();
        file.eidelivery = EIDELIVERY_ON;
        file.store(SETEIPNUM_LE, 4, 10);
        file.store(SETEIPNUM_LE, 4, 3);
        assert_eq!(file.top_id(), 0);
        assert!(!file.interrupt_pending());

        file.eie = (1 << 10) | (1 << 3);
        assert_eq!(file.topei(), (3 << 16) | 3);
        assert!(file.interrupt_pending());

        assert_eq!(file.claim() >> 16, 3);
        assert_eq!(file.claim() >> 16, 10);
        assert_eq!(file.claim(), 0);
    }

    #[test]
    fn threshold_masks_higher_identities() {
        let mut file = InterruptFile::new();
        file.eie = !0;
        file.set_pending(8);
        file.eithreshold = 8;
        assert_eq!(file.top_id(), 0);
        file.eithreshold = 9;
        assert_eq!(file.top_id(), 8);
    }

    #[test]
    fn delivery_gates_the_line() {
        let mut file = InterruptFile::new();
        file.eie = !0;
        file.set_pending(5);
        assert!(!file.interrupt_pending());
        file.eidelivery = EIDELIVERY_ON;
        assert!(file.interrupt_pending());
        file.set_pending(0);
        file.set_pending(40);
        assert_eq!(file.eip, 1 << 5);
    }
}
