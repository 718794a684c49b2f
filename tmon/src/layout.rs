//! Memory map of the test platform.
//!
//! Section placement mirrors what the linker script of a bare-metal test
//! image would produce; demos place their regions relative to these.

pub const SRAM_BASE: u64 = 0x0000_0000;
pub const SRAM_SIZE: u64 = 0x0010_0000;

pub const TEXT_BASE: u64 = 0x0000_0000;
pub const TEXT_SIZE: u64 = 0x0001_0000;
pub const RODATA_BASE: u64 = 0x0001_0000;
pub const RODATA_SIZE: u64 = 0x0001_0000;
pub const DATA_BASE: u64 = 0x0002_0000;
pub const DATA_SIZE: u64 = 0x0002_0000;
pub const HEAP_BASE: u64 = 0x0004_0000;
pub const HEAP_SIZE: u64 = 0x0004_0000;
pub const STACK_BASE: u64 = 0x0008_0000;
pub const STACK_SIZE: u64 = 0x0001_0000;
pub const STACK_TOP: u64 = STACK_BASE + STACK_SIZE;

pub const MMIO_BASE: u64 = crate::devices::aclint::ACLINT_BASE;

/// Program counter of the first operation of a test program.
pub const ENTRY_PC: u64 = 0x100;

/// Trap vector bases installed at reset.
pub const MTVEC_BASE: u64 = 0x200;
pub const STVEC_BASE: u64 = 0x400;

/// Text addresses handed out to routines linked through the callback table.
pub const CALLBACK_TEXT_BASE: u64 = 0x1000;
pub const CALLBACK_TEXT_STRIDE: u64 = 0x10;
