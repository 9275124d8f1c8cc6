use keos::{SystemConfigurationBuilder, thread::mlfqs::Mlfqs};
use keos_grader::{MAX_THREADS, mlfqs_suite};

fn main() {
    SystemConfigurationBuilder::new()
        .set_scheduler(Mlfqs::new())
        .set_max_threads(MAX_THREADS)
        .start(mlfqs_suite)
}
