//! Demo test programs.
//!
//! Each demo drives the monitor the way a bare-metal test application would
//! and exits with status 0 when every expectation was met.

mod interrupts;
mod privilege;
mod protection;

use crate::machine::Program;

pub struct Demo {
    pub name: &'static str,
    pub about: &'static str,
    pub program: Program,
}

pub const DEMOS: &[Demo] = &[
    Demo {
        name: "priv",
        about: "privilege mode transitions through M-mode ecalls",
        program: privilege::transitions,
    },
    Demo {
        name: "priv-delegated",
        about: "U-mode ecalls delegated to S-mode and forwarded to M-mode",
        program: privilege::delegated,
    },
    Demo {
        name: "irq-direct",
        about: "M-mode software and external interrupts, direct mode",
        program: interrupts::direct,
    },
    Demo {
        name: "irq-nested",
        about: "M-mode interrupts in nested vectored mode with preemption",
        program: interrupts::nested,
    },
    Demo {
        name: "smpu",
        about: "S-mode MPU, static protected memory map",
        program: protection::smpu_static_map,
    },
    Demo {
        name: "spmp",
        about: "S-mode PMP, static memory map",
        program: protection::spmp_static_map,
    },
];

pub fn list() -> &'static [Demo] {
    DEMOS
}

pub fn find(name: &str) -> Option<&'static Demo> {
    DEMOS.iter().find(|d| d.name == name)
}
