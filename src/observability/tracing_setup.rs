//! Tracing Setup
//!
//! Initializes tracing-subscriber with environment-based filtering.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize logging
///
/// Sets up a fmt layer (JSON lines when `json` is set) filtered by
/// `RUST_LOG`, defaulting to `info`. Fails if a global subscriber is
/// already installed.
pub fn init(json: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }

    tracing::info!(json, "tracing initialized");
    Ok(())
}
