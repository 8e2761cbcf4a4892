use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::Config;

/// Install the global stdout subscriber, filtered by the RUST_LOG
/// envvar with the configured level as the default directive.
/// Later calls keep the first subscriber, so tests can call freely.
pub fn setup(config: &Config) {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(config.log_level).into())
            .from_env_lossy(),
    );

    if tracing_subscriber::registry().with(log_layer).try_init().is_err() {
        tracing::debug!("global tracing subscriber already installed, keeping it");
    }
}
