//! The abyss of kernel that operates hardwares.
//!
//! This crate contains collections of hardware communications. The kernel runs
//! as a host process, so the "hardware" here is a small simulated machine:
//! a single cpu with an interrupt flag, a programmable interval timer driven by
//! the cpu's cycle counter, a console, and per-thread execution contexts that
//! are backed by host threads.
//!
//! You are **not** required to understand every line of code in this crate.
//! Instead, you are supposed to see [`keos`] crate to see which modules (or
//! functions) are available for implementing the kernel.
//!
//! ## Simulated time
//!
//! The machine only advances its clock when the cpu burns cycles through
//! [`intrinsics::pause`] or sleeps through [`intrinsics::halt`]. Every
//! `cycles_per_tick` cycles, the timer raises [`interrupt::Vector::Timer`].
//! As nothing else moves the clock, every run of the kernel is deterministic.
//!
//! [`keos`]: ../keos/index.html
#![allow(clippy::missing_safety_doc)]

use core::sync::atomic::AtomicBool;

#[doc(hidden)]
#[macro_use]
pub mod kprint;
pub mod boot;
pub mod context;
pub mod dev;
pub mod interrupt;
pub mod intrinsics;
pub mod power;
pub mod spinlock;

/// Maximum number of CPU the kernel can support.
pub const MAX_CPU: usize = 1;

#[doc(hidden)]
pub static QUITE: AtomicBool = AtomicBool::new(false);
