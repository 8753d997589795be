//! Log output for processes that embed the client.
//!
//! The library itself only emits `tracing` events. A process that has no
//! subscriber of its own can call `init` once at startup.

use tracing_subscriber::EnvFilter;

use crate::config::Verbosity;

/// Filter for a verbosity level. `RUST_LOG` wins when it is set.
pub fn env_filter(verbosity: Verbosity) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(verbosity.level_filter().into())
        .from_env_lossy()
}

/// Install a formatted stderr subscriber for `verbosity`.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init(verbosity: Verbosity) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbosity))
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
