//! Plugin discovery: inotify loops over the volume and datapath roots.
//!
//! One loop per plugin kind, both driving the same state machine: an
//! initial full scan, then directory events from the watch stream. The only
//! correctness-critical logic is the reconciliation rescan (register every
//! directory that is present but unregistered, unregister every name that is
//! registered but gone), which also recovers from inotify queue overflow.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use inotify::{EventMask, Inotify, WatchMask};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Target of plugin registrations. The volume watcher binds switch services;
/// the datapath watcher feeds the datapath registry.
#[async_trait]
pub trait PluginSet: Send + Sync {
    /// Register `name`; registering a present name is a no-op.
    async fn register(&self, name: &str);
    /// Unregister `name`; unregistering an absent name is a no-op.
    async fn unregister(&self, name: &str);
    /// Names currently registered.
    async fn registered(&self) -> HashSet<String>;
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The watch stream ended. Fatal: the process must exit with status 1.
    #[error("watch stream on {0} ended")]
    Eof(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Watch `root` and keep `plugins` in sync with its subdirectories until
/// cancelled. Returns [`WatchError::Eof`] when the event stream ends.
pub async fn watch_plugins(
    root: &Path,
    plugins: &dyn PluginSet,
    cancel: &CancellationToken,
) -> Result<(), WatchError> {
    let inotify = Inotify::init().context("failed to initialise inotify")?;
    inotify
        .watches()
        .add(
            root,
            WatchMask::CREATE | WatchMask::DELETE | WatchMask::MOVED_FROM | WatchMask::MOVED_TO,
        )
        .with_context(|| format!("failed to watch {}", root.display()))?;

    // Scan after the watch is armed so directories that appear in between
    // are not lost.
    rescan(root, plugins).await?;

    let mut stream = inotify
        .into_event_stream([0u8; 4096])
        .context("failed to open inotify event stream")?;

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            event = stream.next() => event,
        };
        let event = match event {
            None => return Err(WatchError::Eof(root.display().to_string())),
            Some(Err(e)) => {
                return Err(WatchError::Other(
                    anyhow::Error::from(e).context("inotify stream read failed"),
                ))
            }
            Some(Ok(event)) => event,
        };

        if event.mask.contains(EventMask::Q_OVERFLOW) {
            warn!(root = %root.display(), "inotify queue overflowed; rescanning");
            rescan(root, plugins).await?;
            continue;
        }

        // Plugins are directories; events on stray files in the root are
        // irrelevant.
        if !event.mask.contains(EventMask::ISDIR) {
            continue;
        }
        let Some(name) = event.name.as_deref().and_then(|n| n.to_str()) else {
            continue;
        };

        if event
            .mask
            .intersects(EventMask::CREATE | EventMask::MOVED_TO)
        {
            debug!(root = %root.display(), plugin = %name, "plugin directory appeared");
            plugins.register(name).await;
        } else if event
            .mask
            .intersects(EventMask::DELETE | EventMask::MOVED_FROM)
        {
            debug!(root = %root.display(), plugin = %name, "plugin directory vanished");
            plugins.unregister(name).await;
        }
    }
}

/// Reconcile the registration set with the directory contents: the symmetric
/// set difference decides what to register and what to unregister.
pub async fn rescan(root: &Path, plugins: &dyn PluginSet) -> Result<()> {
    let mut wanted = HashSet::new();
    let mut entries = tokio::fs::read_dir(root)
        .await
        .with_context(|| format!("failed to read {}", root.display()))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .with_context(|| format!("failed to read {}", root.display()))?
    {
        let is_dir = entry
            .file_type()
            .await
            .map(|t| t.is_dir())
            .unwrap_or(false);
        if !is_dir {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            wanted.insert(name.to_string());
        }
    }

    let current = plugins.registered().await;
    for name in wanted.difference(&current) {
        plugins.register(name).await;
    }
    for name in current.difference(&wanted) {
        plugins.unregister(name).await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::Mutex;
    use tempfile::tempdir;

    use super::*;

    #[derive(Default)]
    struct MockSet {
        names: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl PluginSet for MockSet {
        async fn register(&self, name: &str) {
            self.names.lock().await.insert(name.to_string());
        }

        async fn unregister(&self, name: &str) {
            self.names.lock().await.remove(name);
        }

        async fn registered(&self) -> HashSet<String> {
            self.names.lock().await.clone()
        }
    }

    async fn wait_until<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn test_rescan_reconciles_by_set_difference() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("org.test.a")).unwrap();
        fs::create_dir(dir.path().join("org.test.b")).unwrap();
        fs::write(dir.path().join("not-a-plugin"), "").unwrap();

        let set = MockSet::default();
        set.register("org.test.stale").await;
        set.register("org.test.a").await;

        rescan(dir.path(), &set).await.unwrap();

        let names = set.registered().await;
        assert_eq!(
            names,
            ["org.test.a", "org.test.b"]
                .iter()
                .map(|s| s.to_string())
                .collect()
        );
    }

    #[tokio::test]
    async fn test_watch_registers_created_and_removed_directories() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("org.test.initial")).unwrap();

        let set = Arc::new(MockSet::default());
        let cancel = CancellationToken::new();
        let root = dir.path().to_path_buf();
        let watch_set = set.clone();
        let watch_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            watch_plugins(&root, watch_set.as_ref(), &watch_cancel).await
        });

        // Initial scan picks up the pre-existing directory.
        wait_until(|| {
            let set = set.clone();
            async move { set.registered().await.contains("org.test.initial") }
        })
        .await;

        fs::create_dir(dir.path().join("org.test.late")).unwrap();
        wait_until(|| {
            let set = set.clone();
            async move { set.registered().await.contains("org.test.late") }
        })
        .await;

        fs::remove_dir(dir.path().join("org.test.initial")).unwrap();
        wait_until(|| {
            let set = set.clone();
            async move { !set.registered().await.contains("org.test.initial") }
        })
        .await;

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_rename_moves_registration() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("org.test.old")).unwrap();

        let set = Arc::new(MockSet::default());
        let cancel = CancellationToken::new();
        let root = dir.path().to_path_buf();
        let watch_set = set.clone();
        let watch_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            watch_plugins(&root, watch_set.as_ref(), &watch_cancel).await
        });

        wait_until(|| {
            let set = set.clone();
            async move { set.registered().await.contains("org.test.old") }
        })
        .await;

        fs::rename(
            dir.path().join("org.test.old"),
            dir.path().join("org.test.new"),
        )
        .unwrap();
        wait_until(|| {
            let set = set.clone();
            async move {
                let names = set.registered().await;
                names.contains("org.test.new") && !names.contains("org.test.old")
            }
        })
        .await;

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}
