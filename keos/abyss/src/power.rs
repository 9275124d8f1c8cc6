//! System power control.

use std::boxed::Box;

/// Exit status of the machine after a kernel panic.
pub const PANIC_EXIT_CODE: i32 = 101;

/// Powers off the machine, reporting `code` to the host.
pub fn power_off(code: i32) -> ! {
    crate::kprint::flush();
    std::process::exit(code)
}

/// Makes every panic fatal for the machine.
///
/// The panic message is reported first; then the machine is powered off with
/// [`PANIC_EXIT_CODE`] instead of unwinding into a kernel whose invariants are
/// no longer trustworthy.
pub fn install_panic_hook() {
    let report = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        report(info);
        std::eprintln!("Kernel panic. Powering off.");
        power_off(PANIC_EXIT_CODE);
    }));
}
