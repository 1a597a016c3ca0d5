//! Subscriber setup for applications and tests embedding the pipeline.
//!
//! Library code logs through the `log` macros and opens `tracing` spans;
//! both end up in the same `tracing-subscriber` formatter.

use tracing_log::LogTracer;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs a formatter filtered by `RUST_LOG` (default `info`) and routes
/// `log` records into it. Calling it again keeps the first subscriber.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        let _ = LogTracer::init();
    }
}

/// Verbose variant writing through the test harness capture.
pub fn init_test() {
    let subscriber = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        let _ = LogTracer::init();
    }
}
