//! Tracing subscriber setup.
//!
//! Diagnostics go to stderr through `tracing`; stage summaries printed by
//! [`crate::output`] stay on stdout so they can be piped cleanly.
//!
//! The filter comes from `RUST_LOG` and defaults to `quire=info`.

use clap::ValueEnum;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

const DEFAULT_FILTER: &str = "quire=info";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Single-line human-readable events
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

/// Install the global subscriber. Returns an error if one is already set.
pub fn init(format: LogFormat) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());

    let layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
}
