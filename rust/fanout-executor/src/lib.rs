//! Bounded-parallelism batch execution.
//!
//! A [`BoundedRunner`] takes a fixed list of [`UnitOfWork`] values, runs them on
//! at most N worker threads, and reports each one to a completion callback in
//! the order they finish. [`NativeProcess`] is a ready-made unit that runs an
//! external program.
//!
//! # Modules
//!
//! - [`unit_of_work`] - the `execute` capability and adapters (`Box`,
//!   `Arc<Mutex<_>>`, closure-backed [`unit_of_work::Task`])
//! - [`runner`] - [`BoundedRunner`], its options and registration results
//! - [`dispatcher`] - completion delivery and the fault record type
//! - [`native_process`] - [`NativeProcess`] and its start/finish observers

pub mod dispatcher;
pub mod native_process;
pub mod runner;
pub mod unit_of_work;

pub use dispatcher::UnitFault;
pub use native_process::NativeProcess;
pub use runner::{BoundedRunner, Registration, RunnerOptions, UnitId};
pub use unit_of_work::UnitOfWork;
