//! Daemon configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Filesystem locations and logging shape of the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the `volume/` and `datapath/` plugin roots.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,
    /// File the attached-SR index is persisted to.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    /// Directory the per-plugin switch sockets are bound in.
    #[serde(default = "default_switch_dir")]
    pub switch_dir: PathBuf,
    /// Emit structured JSON logs instead of the compact format.
    #[serde(default)]
    pub structured_logging: bool,
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("/usr/libexec/storage-scriptd")
}

fn default_state_path() -> PathBuf {
    PathBuf::from("/var/run/storage-scriptd/state.json")
}

fn default_switch_dir() -> PathBuf {
    PathBuf::from("/var/run/storage-scriptd/switch")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            state_path: default_state_path(),
            switch_dir: default_switch_dir(),
            structured_logging: false,
        }
    }
}

impl Config {
    /// Root of the volume plugins.
    pub fn volume_root(&self) -> PathBuf {
        self.root_dir.join("volume")
    }

    /// Root of the datapath plugins.
    pub fn datapath_root(&self) -> PathBuf {
        self.root_dir.join("datapath")
    }
}
