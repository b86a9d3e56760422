//! Tracing subscriber bootstrap for the embedding binary.
//!
//! Mirrors `main.rs`'s `tracing_subscriber::registry().with(EnvFilter...)
//! .with(fmt::layer())` setup in the teacher repo.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn init() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
