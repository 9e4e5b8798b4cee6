//! Subscriber configuration.

use tracing_subscriber::EnvFilter;

/// Directives used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// JSON logs with timestamps; `default` applies when `RUST_LOG` is unset.
pub fn init(default: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(default))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter("repograph_infra=debug"))
        .with_test_writer()
        .try_init();
}
