use thiserror::Error;

/// SRAM access errors.
///
/// These are mapped into architectural traps (`Trap`) by the system bus, or
/// into a [`crate::Halt`] when the monitor itself touches memory.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("out-of-bounds memory access at {0:#x}")]
    OutOfBounds(u64),

    #[error("invalid or misaligned access at {0:#x}")]
    InvalidAlignment(u64),

    #[error("unsupported access size {0}")]
    InvalidSize(u64),

    #[error("static data area exhausted allocating {0} bytes")]
    Exhausted(u64),
}

/// Byte-addressable on-chip SRAM.
///
/// Offsets passed to the load/store helpers are relative to `base`.
pub struct Sram {
    pub base: u64,
    pub data: Vec<u8>,
}

impl Sram {
    /// Create a zero-initialised SRAM image of `size` bytes.
    pub fn new(base: u64, size: usize) -> Self {
        Self {
            base,
            data: vec![0; size],
        }
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Offset of `addr` inside this SRAM, if it is covered.
    pub fn offset(&self, addr: u64) -> Option<u64> {
        if addr >= self.base && addr - self.base < self.size() {
            Some(addr - self.base)
        } else {
            None
        }
    }

    fn check_bounds(&self, offset: u64, size: u64) -> Result<usize, MemoryError> {
        let end = offset.checked_add(size).ok_or(MemoryError::OutOfBounds(offset))?;
        if end > self.size() {
            return Err(MemoryError::OutOfBounds(offset));
        }
        Ok(offset as usize)
    }

    /// Naturally aligned little-endian load of 1, 2, 4 or 8 bytes.
    pub fn load(&self, offset: u64, size: u64) -> Result<u64, MemoryError> {
        if !matches!(size, 1 | 2 | 4 | 8) {
            return Err(MemoryError::InvalidSize(size));
        }
        if offset % size != 0 {
            return Err(MemoryError::InvalidAlignment(offset));
        }
        let off = self.check_bounds(offset, size)?;
        let mut bytes = [0u8; 8];
        bytes[..size as usize].copy_from_slice(&self.data[off..off + size as usize]);
        Ok(u64::from_le_bytes(bytes))
    }

    /// Naturally aligned little-endian store of 1, 2, 4 or 8 bytes.
    pub fn store(&mut self, offset: u64, size: u64, value: u64) -> Result<(), MemoryError> {
        if !matches!(size, 1 | 2 | 4 | 8) {
            return Err(MemoryError::InvalidSize(size));
        }
        if offset % size != 0 {
            return Err(MemoryError::InvalidAlignment(offset));
        }
        let off = self.check_bounds(offset, size)?;
        let bytes = value.to_le_bytes();
        self.data[off..off + size as usize].copy_from_slice(&bytes[..size as usize]);
        Ok(())
    }
}
