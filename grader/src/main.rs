//! Boots the kernel and runs the scenarios of the scheduler chosen on the
//! command line (`-o mlfqs` for the multi-level feedback queue scheduler).
//!
//! Scenarios can be selected by name: `keos-grader donation::nest`.
use keos::{SystemConfigurationBuilder, thread::scheduler};
use keos_grader::{MAX_THREADS, mlfqs_suite, priority_suite};

fn main() {
    SystemConfigurationBuilder::new()
        .set_max_threads(MAX_THREADS)
        .start(|| {
            if scheduler::scheduler().computes_priority() {
                mlfqs_suite()
            } else {
                priority_suite()
            }
        })
}
