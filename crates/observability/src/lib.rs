//! Process-wide logging setup for repository users.

pub mod tracing;

/// Install the JSON subscriber, filtered by `RUST_LOG` (default `info`).
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    tracing::init(tracing::DEFAULT_FILTER);
}

/// Install a plain-text subscriber writing through the test harness, so
/// repository logs show up next to failing tests.
pub fn init_for_tests() {
    tracing::init_for_tests();
}
