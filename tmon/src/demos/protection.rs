use crate::csr::Mode;
use crate::devices::aclint::ACLINT_SIZE;
use crate::devices::imsic::{IMSIC_FILE_SIZE, IMSIC_S_BASE};
use crate::layout::{
    DATA_BASE, HEAP_BASE, HEAP_SIZE, MMIO_BASE, RODATA_BASE, RODATA_SIZE, SRAM_BASE, SRAM_SIZE, STACK_BASE,
    STACK_SIZE, STACK_TOP, TEXT_BASE, TEXT_SIZE,
};
use crate::machine::Machine;
use crate::mpu::driver::{self, MpuLevel, SpmpConfig, SMPU_SRO, SMPU_SRW, SMPU_SXR};
use crate::mpu::smpu::Region;
use crate::mpu::spmp::{napot, AddrMatch, CFG_R, CFG_S, CFG_W, CFG_X};
use crate::Halt;

const FETCH_FAULT: u64 = 12;
const LOAD_FAULT: u64 = 13;
const STORE_FAULT: u64 = 15;

fn memory_map(m: &mut Machine) {
    let sections = [
        ("stack", STACK_BASE, STACK_SIZE),
        ("heap", HEAP_BASE, HEAP_SIZE),
        ("data", DATA_BASE, HEAP_BASE - DATA_BASE),
        ("r/o data", RODATA_BASE, RODATA_SIZE),
        ("text", TEXT_BASE, TEXT_SIZE),
    ];
    m.print(" REGION     BASE - TOP : SIZE");
    for (name, base, size) in sections {
        m.print(format!(" {:<10} {:#x} - {:#x} : {:#x}", name, base, base + size, size));
    }
    m.print(format!(" SRAM       {:#x}::{:#x}", SRAM_BASE, SRAM_SIZE));
}

/// Store, store and fetch faults expected in the current mode.
fn write_and_fetch_cases(m: &mut Machine, first: u32, read_only: u64, denied: u64, no_exec: u64) -> Result<(), Halt> {
    m.case(first);
    m.expect(STORE_FAULT)?;
    m.store(read_only, 8, 0)?;
    m.verify()?;

    m.case(first + 1);
    m.expect(STORE_FAULT)?;
    m.store(denied, 8, 0)?;
    m.verify()?;

    m.case(first + 2);
    m.expect(FETCH_FAULT)?;
    m.call(no_exec)?;
    m.verify()
}

/// SMPU L1 with shared S/U regions over the whole program image.
pub fn smpu_static_map(m: &mut Machine) -> Result<(), Halt> {
    m.print("S-mode MPU test application, static protected memory map");

    // SMPU off: S-mode has full access until the regions are loaded
    driver::disable(m, MpuLevel::L1)?;
    m.set_privilege(Mode::Supervisor)?;
    memory_map(m);

    let regions = [
        Region::protected(TEXT_BASE, TEXT_SIZE, SMPU_SXR),
        Region::protected(RODATA_BASE, RODATA_SIZE, SMPU_SRO),
        Region::protected(DATA_BASE, STACK_TOP - DATA_BASE, SMPU_SRW),
        Region::protected(MMIO_BASE, ACLINT_SIZE, SMPU_SRW),
        Region::protected(IMSIC_S_BASE, IMSIC_FILE_SIZE, SMPU_SRW),
        Region::default(),
    ];
    driver::group_config(m, MpuLevel::L1, 0, &regions)?;
    driver::group_enable(m, MpuLevel::L1, true, 0x1F)?;
    driver::config_show(m, MpuLevel::L1)?;

    let p0 = TEXT_BASE + 32; // S: read-execute, U: execute only
    let p1 = SRAM_SIZE + 32; // no region
    let f0 = STACK_BASE + 32; // read-write

    write_and_fetch_cases(m, 1, p0, p1, f0)?;

    m.set_privilege(Mode::User)?;
    write_and_fetch_cases(m, 4, p0, p1, f0)?;

    m.case(7);
    m.expect(LOAD_FAULT)?;
    m.expect(STORE_FAULT)?;
    let read = m.load(p0, 8)?.unwrap_or(0);
    m.store(p0, 8, read)?;
    m.verify()?;

    m.set_privilege(Mode::Machine)?;
    m.exit(0)
}

/// SPMP with TOR entries over the program image and NAPOT entries over the
/// device windows.
pub fn spmp_static_map(m: &mut Machine) -> Result<(), Halt> {
    m.print("S-mode PMP test application, static memory map");
    m.print(format!(" mmio       : {:#x}", MMIO_BASE + ACLINT_SIZE));
    m.print(format!(" data/stack : {:#x}", STACK_TOP));
    m.print(format!(" ro data    : {:#x}", RODATA_BASE + RODATA_SIZE));
    m.print(format!(" text       : {:#x}", TEXT_BASE + TEXT_SIZE));

    let shared_rw = CFG_W | CFG_X; // rw-rw-
    let text = CFG_S | CFG_W | CFG_X; // r-x--x
    let rodata = CFG_S | CFG_R | CFG_W | CFG_X; // r--r--
    let napot_bits = AddrMatch::Napot.bits();
    let tor_bits = AddrMatch::Tor.bits();

    let mut config = SpmpConfig::new();
    config.set_entry(0, napot(MMIO_BASE, ACLINT_SIZE) << 2, napot_bits | shared_rw)?;
    config.set_entry(1, napot(IMSIC_S_BASE, IMSIC_FILE_SIZE) << 2, napot_bits | shared_rw)?;
    config.set_entry(4, TEXT_BASE + TEXT_SIZE, tor_bits | text)?;
    config.set_entry(5, RODATA_BASE + RODATA_SIZE, tor_bits | rodata)?;
    config.set_entry(6, STACK_TOP, tor_bits | shared_rw)?;
    config.set_switch(0x73, 0);

    config.apply(m)?;
    let live = SpmpConfig::dump(m)?;
    live.show(m);

    let p0 = TEXT_BASE + TEXT_SIZE - 32; // S: read-execute, U: execute only
    let p1 = TEXT_BASE + TEXT_SIZE + 32; // read-only data
    let f0 = STACK_TOP - 32; // read-write

    m.set_privilege(Mode::User)?;

    m.case(1);
    m.expect(STORE_FAULT)?;
    m.store(p0, 8, 0)?;
    m.verify()?;

    m.case(2);
    m.expect(STORE_FAULT)?;
    m.store(p1, 8, 0)?;
    m.verify()?;

    m.case(3);
    m.expect(FETCH_FAULT)?;
    m.call(f0)?;
    m.verify()?;

    m.case(4);
    m.expect(LOAD_FAULT)?;
    m.load(p0, 8)?;
    m.verify()?;

    m.set_privilege(Mode::Supervisor)?;
    write_and_fetch_cases(m, 5, p0, p1, f0)?;

    m.set_privilege(Mode::Machine)?;
    m.exit(0)
}
