//! # KeOS: thread scheduling and synchronization core
//!
//! This crate is the core of a small uniprocessor kernel: kernel threads, a
//! preemptive priority scheduler, and the synchronization primitives built on
//! top of it.
//!
//! - [`thread`]: thread control blocks, the scheduler and its policies. The
//!   default policy runs the highest-priority ready thread, with round-robin
//!   among equal priorities and priority donation through [`sync::Mutex`].
//!   The alternative [`thread::mlfqs::Mlfqs`] policy computes priorities from
//!   the recent cpu usage of each thread.
//! - [`timer`]: timer ticks, sleeping, and calibrated busy-waiting.
//! - [`sync`]: spinlocks, semaphores, mutexes and condition variables.
//!
//! The kernel runs on the simulated machine of the [`abyss`] crate. A kernel
//! is booted with a [`SystemConfigurationBuilder`]:
//!
//! ```no_run
//! use keos::SystemConfigurationBuilder;
//!
//! fn main() {
//!     SystemConfigurationBuilder::new()
//!         .set_time_slice(4)
//!         .start(|| {
//!             keos::println!("Hello from the main thread!");
//!             0
//!         })
//! }
//! ```
//!
//! ## Command line
//!
//! The arguments of the host process form the kernel command line:
//!
//! - `-o mlfqs`: use the MLFQS scheduler, unless one was set explicitly.
//! - `-q`: silence the kernel log. `-v` and `-vv`: more verbose kernel log.
//! - Any other argument selects a test case to run by [`TestDriver`].
//!
//! ## Implementation Notes
//!
//! Each thread is assigned a fixed execution stack of
//! [`STACK_SIZE`](thread::STACK_SIZE) bytes. Avoid declaring large data
//! structures on the stack; allocate them on the heap using `Box`.
//!
//! Time on the simulated machine only advances while the cpu burns cycles.
//! A loop that waits for another thread must call [`intrinsics::pause`], or
//! it never gets preempted.
#![cfg_attr(not(test), no_std)]
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

#[macro_use]
extern crate abyss;
#[macro_use]
extern crate log;
extern crate alloc;

mod interrupt;

pub mod fixed_point;
pub mod sync;
pub mod thread;
pub mod timer;

pub use abyss::{MAX_CPU, intrinsics, print, println};

use alloc::{boxed::Box, string::String, vec::Vec};
use bitflags::bitflags;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use sync::SpinLock;
use thread::{
    mlfqs::Mlfqs,
    priority::PriorityScheduler,
    scheduler::{self, Scheduler},
};

/// Enum representing errors that can occur during a kernel operation.
///
/// Each variant corresponds to a specific type of error that might occur
/// during a kernel operation, and maps to a negative errno value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(isize)]
pub enum KernelError {
    /// Out of memory. (ENOMEM)
    NoMemory = -12,
    /// Invalid arguement. (EINVAL)
    InvalidArgument = -22,
    /// Operation is not supported. (ENOTSUPP)
    NotSupportedOperation = -524,
}

impl KernelError {
    /// Converts the [`KernelError`] enum into a corresponding `usize` error
    /// code.
    pub fn into_usize(self) -> usize {
        isize::from(self) as usize
    }
}

impl core::fmt::Display for KernelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            KernelError::NoMemory => write!(f, "out of memory"),
            KernelError::InvalidArgument => write!(f, "invalid argument"),
            KernelError::NotSupportedOperation => write!(f, "operation is not supported"),
        }
    }
}

bitflags! {
    /// Options on the kernel command line.
    struct BootOptions: u32 {
        /// `-o mlfqs`
        const MLFQS = 1 << 0;
        /// `-q`
        const QUIET = 1 << 1;
        /// `-v`
        const VERBOSE = 1 << 2;
        /// `-vv`
        const TRACE = 1 << 3;
    }
}

/// Splits the command line into boot options and test filters.
fn parse_cmdline(args: &[String]) -> (BootOptions, Vec<String>) {
    let mut options = BootOptions::empty();
    let mut filters = Vec::new();
    let mut args = args.iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-o" => match args.next().map(String::as_str) {
                Some("mlfqs") => options |= BootOptions::MLFQS,
                Some(other) => warn!("Unknown option: -o {}", other),
                None => warn!("Missing option after -o"),
            },
            "-q" => options |= BootOptions::QUIET,
            "-v" => options |= BootOptions::VERBOSE,
            "-vv" => options |= BootOptions::VERBOSE | BootOptions::TRACE,
            _ => filters.push(arg.clone()),
        }
    }
    (options, filters)
}

static TEST_FILTERS: SpinLock<Vec<String>> = SpinLock::new(Vec::new());

/// A builder for system configuration settings.
///
/// The [`SystemConfigurationBuilder`] struct provides an interface for
/// configuring the kernel before it boots: the scheduling policy, the timer,
/// and the limits on kernel resources. The configuration is fixed once the
/// kernel started.
pub struct SystemConfigurationBuilder {
    scheduler: Option<Box<dyn Scheduler>>,
    time_slice: u64,
    timer_frequency: u64,
    cycles_per_tick: u64,
    max_threads: usize,
}

impl Default for SystemConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemConfigurationBuilder {
    /// Creates a builder with the default configuration.
    pub fn new() -> Self {
        Self {
            scheduler: None,
            time_slice: scheduler::TIME_SLICE,
            timer_frequency: timer::TIMER_FREQ,
            cycles_per_tick: abyss::dev::pit::DEFAULT_CYCLES_PER_TICK,
            max_threads: usize::MAX,
        }
    }

    /// Sets the system-wide scheduler.
    ///
    /// Defaults to the [`PriorityScheduler`], or [`Mlfqs`] if `-o mlfqs` is
    /// on the command line.
    pub fn set_scheduler(mut self, scheduler: impl Scheduler + 'static) -> Self {
        self.scheduler = Some(Box::new(scheduler));
        self
    }

    /// Sets the number of ticks a thread runs before it is preempted.
    pub fn set_time_slice(mut self, ticks: u64) -> Self {
        assert!(ticks > 0, "Time slice must be positive.");
        self.time_slice = ticks;
        self
    }

    /// Sets the number of timer interrupts per second.
    pub fn set_timer_frequency(mut self, hz: u64) -> Self {
        assert!(
            (19..=1000).contains(&hz),
            "Timer frequency must be in 19..=1000 Hz."
        );
        self.timer_frequency = hz;
        self
    }

    /// Sets the number of cpu cycles between two timer interrupts.
    pub fn set_cycles_per_tick(mut self, cycles: u64) -> Self {
        assert!(cycles > 0, "Timer period must be positive.");
        self.cycles_per_tick = cycles;
        self
    }

    /// Sets the maximum number of threads alive at the same time, including
    /// the main and the idle thread.
    pub fn set_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads;
        self
    }

    /// Boots the kernel, runs `main` as the initial thread, and powers off
    /// the machine with the exit code of `main`.
    pub fn start(self, main: impl FnOnce() -> i32) -> ! {
        abyss::power::install_panic_hook();
        let (options, filters) = parse_cmdline(&abyss::boot::cmdline());
        abyss::QUITE.store(
            options.contains(BootOptions::QUIET),
            core::sync::atomic::Ordering::SeqCst,
        );
        abyss::kprint::init_logger(if options.contains(BootOptions::TRACE) {
            log::LevelFilter::Trace
        } else if options.contains(BootOptions::VERBOSE) {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        });
        info!(
            "\n\
__  __     ___  ____  \n\
| |/ /___ / _ \\/ ___| \n\
| ' // _ \\ | | \\___ \\ \n\
| . \\  __/ |_| |___) |\n\
|_|\\_\\___|\\___/|____/ \n"
        );

        let sched: &'static dyn Scheduler = match self.scheduler {
            Some(sched) => Box::leak(sched),
            None if options.contains(BootOptions::MLFQS) => Box::leak(Box::new(Mlfqs::new())),
            None => Box::leak(Box::new(PriorityScheduler::new())),
        };
        scheduler::set_scheduler(sched);
        info!(
            "Scheduler: {}.",
            if sched.computes_priority() {
                "mlfqs"
            } else {
                "priority"
            }
        );
        let mut test_filters = TEST_FILTERS.lock();
        *test_filters = filters;
        test_filters.unlock();

        scheduler::init(self.time_slice, self.max_threads);
        timer::set_frequency(self.timer_frequency);
        abyss::dev::pit::program(self.cycles_per_tick);
        interrupt::init();
        if let Err(e) = scheduler::start_idle() {
            panic!("Failed to start the idle thread: {e}");
        }
        unsafe { abyss::interrupt::InterruptState::enable() };
        timer::calibrate();

        let mut status = 0;
        let exit_code = abyss::context::catch_exit(|| status = main());
        let status = if exit_code != 0 { exit_code } else { status };

        timer::print_stats();
        scheduler::print_stats();
        abyss::power::power_off(status)
    }
}

/// A test case run by the [`TestDriver`].
#[doc(hidden)]
pub trait TestCase
where
    Self: Sync + Send,
{
    fn name(&'static self) -> &'static str;
    fn run(&'static self) -> bool;
}

impl<T> TestCase for T
where
    T: Fn() + Send + Sync + 'static,
{
    fn name(&'static self) -> &'static str {
        core::any::type_name::<T>()
    }
    fn run(&'static self) -> bool {
        print!("test {} ... ", core::any::type_name::<T>());
        let result = thread::ThreadBuilder::new(core::any::type_name::<T>())
            .spawn(self)
            .map(|handle| handle.join());
        match result {
            Ok(0) => {
                println!("ok");
                true
            }
            Ok(code) => {
                println!("FAILED (exit code {code})");
                false
            }
            Err(e) => {
                println!("FAILED ({e})");
                false
            }
        }
    }
}

/// A driver for running tests.
pub struct TestDriver {
    _p: (),
}

impl TestDriver {
    /// Run the given tests, or the ones named on the command line.
    ///
    /// Returns 0 if all tests passed, and 1 otherwise.
    pub fn start<const TC: usize>(tests: [&'static dyn TestCase; TC]) -> i32 {
        let guard = TEST_FILTERS.lock();
        let filters = guard.clone();
        guard.unlock();

        let tests = tests
            .iter()
            .filter(|test| {
                let name = test.name();
                let r = name.split("::").next().map(|n| n.len() + 2).unwrap_or(0);
                filters.is_empty() || filters.iter().any(|f| name.get(r..) == Some(f.as_str()))
            })
            .collect::<Vec<_>>();
        let (total, mut succ) = (tests.len(), 0);
        println!(
            "Running {} test{}",
            total,
            if total == 1 { "" } else { "s" }
        );

        for test in tests {
            if test.run() {
                succ += 1;
            }
        }
        println!(
            "test result: {}. {} passed; {} failed",
            if total == succ { "ok" } else { "FAILED" },
            succ,
            total - succ
        );
        if total == succ { 0 } else { 1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    fn args(s: &[&str]) -> Vec<String> {
        s.iter().map(|a| a.to_string()).collect()
    }

    #[test]
    fn cmdline_options_and_filters() {
        let (options, filters) = parse_cmdline(&args(&["-o", "mlfqs", "-v", "alarm::single"]));
        assert_eq!(options, BootOptions::MLFQS | BootOptions::VERBOSE);
        assert_eq!(filters, ["alarm::single"]);

        let (options, filters) = parse_cmdline(&args(&["-q", "a", "b"]));
        assert_eq!(options, BootOptions::QUIET);
        assert_eq!(filters, ["a", "b"]);
    }

    #[test]
    fn cmdline_ignores_unknown_options() {
        let (options, filters) = parse_cmdline(&args(&["-o", "fifo", "-vv"]));
        assert!(!options.contains(BootOptions::MLFQS));
        assert!(options.contains(BootOptions::TRACE));
        assert!(filters.is_empty());
    }

    #[test]
    fn kernel_error_codes() {
        assert_eq!(KernelError::NoMemory.into_usize(), -12isize as usize);
        assert!(matches!(
            KernelError::try_from(-22),
            Ok(KernelError::InvalidArgument)
        ));
        assert!(KernelError::try_from(-1).is_err());
    }
}
