use serde::{Deserialize, Serialize};

/// Privilege and virtualization mode of the hart.
///
/// The numeric encoding packs the previous-privilege field in bits 0..1 and
/// the virtualization flag in bit 2, which is the value test programs pass to
/// the privilege switch service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    User,
    Supervisor,
    Machine,
    VirtualUser,
    VirtualSupervisor,
}

/// Diagnostic names indexed by the packed mode value.
const MODE_NAMES: [&str; 8] = [
    "USER",
    "SUPERVISOR",
    "UNKNOWN PRIVILEGE MODE",
    "MACHINE",
    "VIRTUAL USER",
    "VIRTUAL SUPERVISOR",
    "UNKNOWN PRIVILEGE MODE",
    "UNKNOWN PRIVILEGE MODE",
];

impl Mode {
    /// Encode privilege mode into the MPP/SPP field encoding.
    pub fn to_mpp(self) -> u64 {
        match self {
            Mode::User | Mode::VirtualUser => 0b00,
            Mode::Supervisor | Mode::VirtualSupervisor => 0b01,
            Mode::Machine => 0b11,
        }
    }

    /// Virtualization flag as stored in MPV/SPV.
    pub fn to_mpv(self) -> u64 {
        self.is_virtual() as u64
    }

    pub fn is_virtual(self) -> bool {
        matches!(self, Mode::VirtualUser | Mode::VirtualSupervisor)
    }

    /// Packed `pv << 2 | pp` value.
    pub fn bits(self) -> u64 {
        (self.to_mpv() << 2) | self.to_mpp()
    }

    /// Decode a packed mode value; reserved encodings yield `None`.
    pub fn from_bits(bits: u64) -> Option<Mode> {
        match bits {
            0 => Some(Mode::User),
            1 => Some(Mode::Supervisor),
            3 => Some(Mode::Machine),
            4 => Some(Mode::VirtualUser),
            5 => Some(Mode::VirtualSupervisor),
            _ => None,
        }
    }

    /// Decode MPP/MPV (or SPP/SPV) fields into a mode.
    ///
    /// Machine mode ignores the virtualization bit; the reserved privilege
    /// value 0b10 is coerced to Machine as a WARL field would be.
    pub fn from_mpp(pp: u64, pv: u64) -> Mode {
        match (pp & 0b11, pv & 1) {
            (0b00, 0) => Mode::User,
            (0b00, _) => Mode::VirtualUser,
            (0b01, 0) => Mode::Supervisor,
            (0b01, _) => Mode::VirtualSupervisor,
            _ => Mode::Machine,
        }
    }

    /// Diagnostic name of a packed mode value, including invalid ones.
    pub fn name_of(bits: u64) -> &'static str {
        MODE_NAMES[(bits & 0x7) as usize]
    }

    pub fn name(self) -> &'static str {
        Self::name_of(self.bits())
    }
}

/// Trap handling level of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    Machine,
    Supervisor,
}

impl Level {
    /// Mode the hart runs in while handling a trap at this level.
    pub fn mode(self) -> Mode {
        match self {
            Level::Machine => Mode::Machine,
            Level::Supervisor => Mode::Supervisor,
        }
    }

    pub fn tvec(self) -> u16 {
        match self {
            Level::Machine => CSR_MTVEC,
            Level::Supervisor => CSR_STVEC,
        }
    }

    pub fn status(self) -> u16 {
        match self {
            Level::Machine => CSR_MSTATUS,
            Level::Supervisor => CSR_SSTATUS,
        }
    }

    pub fn ie(self) -> u16 {
        match self {
            Level::Machine => CSR_MIE,
            Level::Supervisor => CSR_SIE,
        }
    }

    pub fn iselect(self) -> u16 {
        match self {
            Level::Machine => CSR_MISELECT,
            Level::Supervisor => CSR_SISELECT,
        }
    }

    pub fn ireg(self) -> u16 {
        match self {
            Level::Machine => CSR_MIREG,
            Level::Supervisor => CSR_SIREG,
        }
    }

    pub fn topi(self) -> u16 {
        match self {
            Level::Machine => CSR_MTOPI,
            Level::Supervisor => CSR_STOPI,
        }
    }

    pub fn topei(self) -> u16 {
        match self {
            Level::Machine => CSR_MTOPEI,
            Level::Supervisor => CSR_STOPEI,
        }
    }

    /// Global interrupt-enable bit of the level in its status register.
    pub fn ie_bit(self) -> u64 {
        match self {
            Level::Machine => MSTATUS_MIE,
            Level::Supervisor => MSTATUS_SIE,
        }
    }

    /// Major interrupt id of the level's external interrupt.
    pub fn external_iid(self) -> u64 {
        match self {
            Level::Machine => IRQ_MEI,
            Level::Supervisor => IRQ_SEI,
        }
    }

    /// Short prefix used in diagnostics.
    pub fn prefix(self) -> &'static str {
        match self {
            Level::Machine => "m",
            Level::Supervisor => "s",
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Level::Machine => f.write_str("M-mode"),
            Level::Supervisor => f.write_str("S-mode"),
        }
    }
}

// Supervisor CSRs
pub const CSR_SSTATUS: u16 = 0x100;
pub const CSR_SIE: u16 = 0x104;
pub const CSR_STVEC: u16 = 0x105;
pub const CSR_SMPUMASK: u16 = 0x128;
pub const CSR_SEPC: u16 = 0x141;
pub const CSR_SCAUSE: u16 = 0x142;
pub const CSR_STVAL: u16 = 0x143;
pub const CSR_SIP: u16 = 0x144;
pub const CSR_SISELECT: u16 = 0x150;
pub const CSR_SIREG: u16 = 0x151;
pub const CSR_STOPEI: u16 = 0x15C;
pub const CSR_STOPI: u16 = 0xDB0;

// S-mode PMP
pub const CSR_SPMPSWITCH0: u16 = 0x170;
pub const CSR_SPMPSWITCH1: u16 = 0x171;
pub const CSR_SPMPCFG0: u16 = 0x1A0;
pub const CSR_SPMPADDR0: u16 = 0x1B0;
pub const SPMP_CFG_REGS: u16 = 16;
pub const SPMP_ADDR_REGS: u16 = 64;

// Hypervisor CSRs
pub const CSR_HSTATUS: u16 = 0x600;
pub const CSR_HMPUMASK: u16 = 0x620;

// Machine CSRs
pub const CSR_MSTATUS: u16 = 0x300;
pub const CSR_MISA: u16 = 0x301;
pub const CSR_MEDELEG: u16 = 0x302;
pub const CSR_MIDELEG: u16 = 0x303;
pub const CSR_MIE: u16 = 0x304;
pub const CSR_MTVEC: u16 = 0x305;
pub const CSR_MSTATUSH: u16 = 0x310;
pub const CSR_MEPC: u16 = 0x341;
pub const CSR_MCAUSE: u16 = 0x342;
pub const CSR_MTVAL: u16 = 0x343;
pub const CSR_MIP: u16 = 0x344;
pub const CSR_MISELECT: u16 = 0x350;
pub const CSR_MIREG: u16 = 0x351;
pub const CSR_MTOPEI: u16 = 0x35C;
pub const CSR_MTOPI: u16 = 0xFB0;
pub const CSR_MHARTID: u16 = 0xF14;

// mstatus / sstatus fields
pub const MSTATUS_SIE: u64 = 1 << 1;
pub const MSTATUS_MIE: u64 = 1 << 3;
pub const MSTATUS_SPIE: u64 = 1 << 5;
pub const MSTATUS_MPIE: u64 = 1 << 7;
pub const MSTATUS_SPP_SHIFT: u64 = 8;
pub const MSTATUS_MPP_SHIFT: u64 = 11;
pub const MSTATUS_MPP: u64 = 0b11 << MSTATUS_MPP_SHIFT;
pub const MSTATUS_SPP: u64 = 1 << MSTATUS_SPP_SHIFT;

/// Bits of mstatus visible through sstatus.
pub const SSTATUS_MASK: u64 = MSTATUS_SIE | MSTATUS_SPIE | MSTATUS_SPP | (3 << 13) | (1 << 18) | (1 << 19);

// mstatush.MPV / hstatus.SPV
pub const MSTATUSH_MPV_SHIFT: u64 = 7;
pub const HSTATUS_SPV_SHIFT: u64 = 7;

// Major interrupt ids
pub const IRQ_SSI: u64 = 1;
pub const IRQ_VSSI: u64 = 2;
pub const IRQ_MSI: u64 = 3;
pub const IRQ_STI: u64 = 5;
pub const IRQ_VSTI: u64 = 6;
pub const IRQ_MTI: u64 = 7;
pub const IRQ_SEI: u64 = 9;
pub const IRQ_VSEI: u64 = 10;
pub const IRQ_MEI: u64 = 11;
pub const IRQ_SGEI: u64 = 12;
pub const IRQ_LCOFI: u64 = 13;

/// Interrupts visible through sie/sip.
pub const SIE_MASK: u64 = (1 << IRQ_SSI) | (1 << IRQ_STI) | (1 << IRQ_SEI) | (1 << IRQ_LCOFI);

/// Default priority order of major interrupts, highest first.
pub const DEFAULT_IRQ_ORDER: [u64; 11] = [
    IRQ_MEI, IRQ_MSI, IRQ_MTI, IRQ_SEI, IRQ_SSI, IRQ_STI, IRQ_SGEI, IRQ_VSEI, IRQ_VSSI, IRQ_VSTI, IRQ_LCOFI,
];

// Indirect register selectors (miselect / siselect)
pub const ISELECT_IPRIO0: u64 = 0x30;
pub const ISELECT_IPRIO15: u64 = 0x3F;
pub const ISELECT_EIDELIVERY: u64 = 0x70;
pub const ISELECT_EITHRESHOLD: u64 = 0x72;
pub const ISELECT_EIP0: u64 = 0x80;
pub const ISELECT_EIE0: u64 = 0xC0;
pub const ISELECT_SMPU_BASE: u64 = 0x100;
pub const ISELECT_HMPU_BASE: u64 = 0x180;
pub const MPU_REGIONS: u64 = 32;
