use tracing::debug;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Console logging filtered by `RUST_LOG`, defaulting to `info`.
pub fn init_logger() {
    let filter_layer = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter_layer)
        .init();

    debug!("Tracing is configured for stdout logging.");
}
