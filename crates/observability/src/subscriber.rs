//! JSON tracing subscriber, filtered through `RUST_LOG`.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_DIRECTIVE: &str = "info";

/// Filter from `RUST_LOG`, or `default` when it is unset or unparsable.
pub fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the JSON subscriber.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_with_default(default: &str) -> bool {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(default_directive = default, "tracing initialized");
    }
    installed
}
