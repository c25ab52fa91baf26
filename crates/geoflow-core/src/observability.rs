//! Tracing subscriber setup.
//!
//! Filter precedence: `RUST_LOG`, then `logging.filter`, then a level derived
//! from the environment name.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install the global subscriber. Safe to call more than once; a subscriber
/// installed elsewhere (tests, an embedding binary) is left in place.
pub fn init_tracing(logging: &LoggingConfig, environment: &str) {
    TRACING_INITIALIZED.get_or_init(|| {
        if install(logging, environment) {
            tracing::info!(environment, json = logging.json, "tracing initialized");
        } else {
            tracing::debug!("global tracing subscriber already set, keeping it");
        }
    });
}

/// Try to set the global subscriber. `false` when one is already set.
fn install(logging: &LoggingConfig, environment: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = logging
            .filter
            .clone()
            .unwrap_or_else(|| default_level(environment).to_string());
        EnvFilter::new(directive)
    });

    let registry = tracing_subscriber::registry().with(filter);
    let result = if logging.json {
        registry
            .with(fmt::layer().json().with_target(true).with_current_span(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .try_init()
    };
    result.is_ok()
}

/// Log level for an environment name.
pub fn default_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        // test, development and anything unknown
        _ => "debug",
    }
}
