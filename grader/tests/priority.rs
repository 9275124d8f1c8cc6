use keos::{SystemConfigurationBuilder, thread::priority::PriorityScheduler};
use keos_grader::{MAX_THREADS, priority_suite};

fn main() {
    SystemConfigurationBuilder::new()
        .set_scheduler(PriorityScheduler::new())
        .set_max_threads(MAX_THREADS)
        .start(priority_suite)
}
