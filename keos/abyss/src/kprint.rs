//! Kernel print utilities.

use crate::spinlock::SpinLock;
use core::sync::atomic::Ordering;
use log::{LevelFilter, Log, Metadata, Record};
use std::io::Write;

struct Console;

impl Console {
    fn write_fmt(&mut self, fmt: core::fmt::Arguments<'_>) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_fmt(fmt);
    }
}

static CONSOLE: SpinLock<Console> = SpinLock::new(Console);

#[doc(hidden)]
pub fn _print(fmt: core::fmt::Arguments<'_>) {
    let mut guard = CONSOLE.lock();
    guard.write_fmt(fmt);
    guard.unlock();
}

/// Flushes the console.
pub fn flush() {
    let _ = std::io::stdout().flush();
}

/// Prints out the message.
///
/// Use the format! syntax to write data to the standard output.
/// This first holds the lock for console device.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::kprint::_print(format_args!($($arg)*)));
}

/// Prints out the message with a newline.
///
/// Use the format! syntax to write data to the standard output.
/// This first holds the lock for console device.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", format_args!($($arg)*)));
}

/// The console backend of the `log` facade.
struct Logger;

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level() && !crate::QUITE.load(Ordering::SeqCst)
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {
        flush();
    }
}

static LOGGER: Logger = Logger;

/// Routes the `log` macros to the console, showing records up to `level`.
pub fn init_logger(level: LevelFilter) {
    // The logger outlives a single boot, only the level is updated again.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
