//! Subscriber setup for the daemon.
//!
//! Library code logs through both `log` and `tracing`; `log` records are
//! bridged into the tracing subscriber installed here.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{prelude::*, EnvFilter, Layer};

use crate::error::BrokermailError;

const DEFAULT_FILTER: &str = "brokermail=info,warn";

static INITIALIZED: OnceLock<()> = OnceLock::new();

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
/// Calling it again is a no-op.
pub fn init(format: LogFormat) -> Result<(), BrokermailError> {
    if INITIALIZED.get().is_some() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let layer = match format {
        LogFormat::Text => tracing_subscriber::fmt::layer().with_target(true).boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(layer.with_filter(filter));
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| BrokermailError::Logging(e.to_string()))?;

    // `set_global_default` does not bridge `log` records.
    tracing_log::LogTracer::init().map_err(|e| BrokermailError::Logging(e.to_string()))?;

    let _ = INITIALIZED.set(());
    Ok(())
}
