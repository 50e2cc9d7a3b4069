//! Test utilities for the fanout workspace.
//!
//! - [`units`] - configurable units of work (sleeping, panicking, concurrency-probed)
//! - [`dirs`] - scratch directories pre-populated with files and subdirectories

pub mod dirs;
pub mod units;
