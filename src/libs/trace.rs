//! Sets up tracing for the rescheduler

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install an env filtered stdout subscriber
pub fn setup() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();
}
