//! Registration of per-SR data sources with the metric service.
//!
//! `SR.attach` discovers shared-memory metric endpoints in the backend's
//! `SR.stat` output and registers each as a local plugin read at a fixed
//! cadence. The metric service itself is an external collaborator; this
//! trait is its contract, and the default implementation only records
//! registrations in the log.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

/// Cadence the metric service polls registered data sources at.
pub const DATASOURCE_INTERVAL: Duration = Duration::from_secs(5);

#[async_trait]
pub trait DatasourceRegistrar: Send + Sync {
    /// Register a local metric plugin reading `uid` every `interval`.
    async fn register(&self, uid: &str, interval: Duration) -> anyhow::Result<()>;

    /// Remove a previously registered data source.
    async fn deregister(&self, uid: &str) -> anyhow::Result<()>;
}

/// Registrar used when no metric service is wired in.
pub struct LogOnlyRegistrar;

#[async_trait]
impl DatasourceRegistrar for LogOnlyRegistrar {
    async fn register(&self, uid: &str, interval: Duration) -> anyhow::Result<()> {
        info!(uid = %uid, interval_secs = interval.as_secs(), "registering data source");
        Ok(())
    }

    async fn deregister(&self, uid: &str) -> anyhow::Result<()> {
        info!(uid = %uid, "deregistering data source");
        Ok(())
    }
}
