//! Devices.

pub mod pit;
