//! Logging initialization and configuration.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Default filter used when neither `RUST_LOG` nor the config provide one.
pub const DEFAULT_FILTER: &str = "info,cadence_rhi=debug,cadence_renderer=debug";

/// Initialize the logging system with tracing.
///
/// `RUST_LOG` wins over `default_filter`; an invalid `default_filter` falls
/// back to [`DEFAULT_FILTER`].
///
/// # Example
/// ```
/// cadence_core::init_logging("info");
/// tracing::info!("Frame loop starting");
/// ```
pub fn init_logging(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .try_init();
}
