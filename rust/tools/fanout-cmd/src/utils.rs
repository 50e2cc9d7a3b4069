//! Common utilities for fanout-cmd

use std::time::Duration;

/// Installs the `tracing` fmt subscriber; `log` records from the library
/// crates are forwarded to it.
pub fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Formats a duration as seconds with millisecond precision, or as
/// milliseconds below one second.
pub fn format_duration(duration: Duration) -> String {
    if duration < Duration::from_secs(1) {
        format!("{} ms", duration.as_millis())
    } else {
        format!("{:.3} s", duration.as_secs_f64())
    }
}
