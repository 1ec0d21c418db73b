//! Process-wide tracing setup shared by the circulation binaries and tests.

pub mod subscriber;

/// Initialize process-wide tracing with the `info` default.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    subscriber::init_with_default(subscriber::DEFAULT_DIRECTIVE);
}
