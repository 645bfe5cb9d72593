//! Daemon supervisor: plugin watchers, restart backoff, graceful shutdown.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::datapath::DatapathRegistry;
use crate::datasources::{DatasourceRegistrar, LogOnlyRegistrar};
use crate::dispatch::VolumePlugin;
use crate::sr_index::SrIndex;
use crate::switch::Switch;
use crate::watcher::{self, PluginSet, WatchError};

const RESTART_BACKOFF: Duration = Duration::from_secs(5);

/// Volume-side registration target: binds one switch service per plugin
/// directory.
struct VolumeServices {
    switch: Arc<Switch>,
    volume_root: PathBuf,
    srs: Arc<SrIndex>,
    datapaths: Arc<DatapathRegistry>,
    datasources: Arc<dyn DatasourceRegistrar>,
}

#[async_trait]
impl PluginSet for VolumeServices {
    async fn register(&self, name: &str) {
        let handler = Arc::new(VolumePlugin::new(
            name,
            self.volume_root.clone(),
            self.srs.clone(),
            self.datapaths.clone(),
            self.datasources.clone(),
        ));
        match self.switch.bind(name, handler).await {
            Ok(()) => info!(plugin = %name, "volume plugin registered"),
            Err(e) => warn!(plugin = %name, error = %e, "failed to bind plugin service"),
        }
    }

    async fn unregister(&self, name: &str) {
        self.switch.unbind(name).await;
        info!(plugin = %name, "volume plugin unregistered");
    }

    async fn registered(&self) -> HashSet<String> {
        self.switch.bound().await
    }
}

/// Datapath-side registration target: delegates to the registry.
struct DatapathServices {
    registry: Arc<DatapathRegistry>,
}

#[async_trait]
impl PluginSet for DatapathServices {
    async fn register(&self, name: &str) {
        self.registry.register(name).await;
    }

    async fn unregister(&self, name: &str) {
        self.registry.unregister(name).await;
    }

    async fn registered(&self) -> HashSet<String> {
        self.registry.registered().await
    }
}

pub struct Daemon {
    config: Config,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until a termination signal arrives. Errors out (exit status 1)
    /// when the plugin root is missing or a watch stream reaches EOF.
    pub async fn run(&self) -> Result<()> {
        let root = &self.config.root_dir;
        let is_dir = tokio::fs::metadata(root)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if !is_dir {
            bail!("plugin root {} is not a directory", root.display());
        }

        let volume_root = self.config.volume_root();
        let datapath_root = self.config.datapath_root();
        tokio::fs::create_dir_all(&volume_root)
            .await
            .with_context(|| format!("failed to create {}", volume_root.display()))?;
        tokio::fs::create_dir_all(&datapath_root)
            .await
            .with_context(|| format!("failed to create {}", datapath_root.display()))?;

        let switch = Arc::new(Switch::new(self.config.switch_dir.clone()));
        let srs = Arc::new(SrIndex::new(&self.config.state_path).await);
        let datapaths = Arc::new(DatapathRegistry::new(datapath_root.clone()));
        let datasources: Arc<dyn DatasourceRegistrar> = Arc::new(LogOnlyRegistrar);

        let volumes = VolumeServices {
            switch: switch.clone(),
            volume_root: volume_root.clone(),
            srs,
            datapaths: datapaths.clone(),
            datasources,
        };
        let datapath_services = DatapathServices {
            registry: datapaths,
        };

        info!(
            root = %root.display(),
            switch_dir = %self.config.switch_dir.display(),
            "storage-scriptd started"
        );

        let cancel = CancellationToken::new();
        loop {
            tokio::select! {
                _ = shutdown_signal() => {
                    info!("termination signal received, shutting down");
                    cancel.cancel();
                    switch.shutdown().await;
                    return Ok(());
                }
                result = run_watchers(
                    &volume_root,
                    &volumes,
                    &datapath_root,
                    &datapath_services,
                    &cancel,
                ) => match result {
                    Ok(()) => return Ok(()),
                    Err(WatchError::Eof(path)) => {
                        error!(path = %path, "watch stream ended");
                        bail!("watch stream on {} ended", path);
                    }
                    Err(WatchError::Other(e)) => {
                        error!(error = %e, "plugin watcher failed; restarting");
                        tokio::time::sleep(RESTART_BACKOFF).await;
                    }
                },
            }
        }
    }
}

async fn run_watchers(
    volume_root: &std::path::Path,
    volumes: &dyn PluginSet,
    datapath_root: &std::path::Path,
    datapaths: &dyn PluginSet,
    cancel: &CancellationToken,
) -> Result<(), WatchError> {
    tokio::try_join!(
        watcher::watch_plugins(volume_root, volumes, cancel),
        watcher::watch_plugins(datapath_root, datapaths, cancel),
    )?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            // No signal handler; park forever rather than busy-loop the
            // supervisor.
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
