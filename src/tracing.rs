//! Logging setup.
//!
//! The daemon logs flat events: dispatch handlers, the watchers and the
//! switch attach their context (plugin, method, queue) as fields on the
//! event itself rather than entering spans. A daemonized run therefore
//! emits one flat JSON object per event for the system log to ingest, and a
//! foreground run gets the compact human format. `RUST_LOG` overrides the
//! `info` default.

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

pub fn init_logging(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if config.structured_logging {
        // There is no span hierarchy to report; flattening leaves the event
        // fields at the top level of each object.
        registry
            .with(json_subscriber::fmt::layer().flatten_event(true))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact().with_target(false))
            .try_init()
    }
    .context("failed to install logging subscriber")
}
