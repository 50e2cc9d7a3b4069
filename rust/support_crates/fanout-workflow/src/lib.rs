//! Worker pool building blocks for the batch runner.
//!
//! # Key Components
//!
//! - [`thread_pool::ThreadPool`] - A fixed-size pool of worker threads with FIFO
//!   task intake, explicit shutdown and a termination wait.
//! - [`mpmc`] - Blocking multi-producer, multi-consumer channels, unbounded
//!   (task intake) or bounded (completion delivery).
//!
//! Nothing here knows about units of work or callbacks; those live in
//! `fanout-executor`, which composes a pool and a bounded channel into the
//! completion-ordered runner.

pub mod mpmc;
pub mod thread_pool;

/// Returns the number of execution units the host reports as usable,
/// falling back to 1 if it cannot be determined.
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
