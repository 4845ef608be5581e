//! Tracing initialization, matching the teacher's `main.rs` setup
//! (`tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env())`).

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber. Safe to call once at process
/// startup; a second call is a no-op error that we deliberately swallow so
/// tests that spin up multiple `Archive`s in one process don't panic.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
