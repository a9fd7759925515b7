//! Tracing setup for binaries and tests embedding the engine

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "process_engine=info";

/// Install a `fmt` subscriber filtered by `RUST_LOG`
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_tracing() -> bool {
    init_tracing_with(DEFAULT_FILTER)
}

/// Same as [`init_tracing`] with a caller-chosen fallback filter
pub fn init_tracing_with(default_filter: &str) -> bool {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_install_is_harmless() {
        init_tracing();
        assert!(!init_tracing());
    }
}
