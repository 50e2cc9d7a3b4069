//! Core definitions (error type, result alias, small sync helpers), relied upon by all fanout-* crates.

pub mod error;
pub mod macros;
pub mod result;
pub mod sync;

pub use result::Result;
