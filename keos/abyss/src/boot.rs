//! Boot parameters.

use std::{string::String, vec::Vec};

/// Returns the kernel command line.
///
/// The command line is taken from the arguments of the host process.
/// Arguments starting with `--` belong to the host test harness and are
/// skipped.
pub fn cmdline() -> Vec<String> {
    std::env::args()
        .skip(1)
        .filter(|arg| !arg.starts_with("--"))
        .collect()
}
