//! Interrupt sources attached to the system bus.

pub mod aclint;
pub mod imsic;
