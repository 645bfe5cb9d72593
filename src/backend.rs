//! Records exchanged with plugin scripts.
//!
//! These types define the JSON a script reads on stdin and writes on stdout.
//! Sum types (health, the datapath implementation) are serde enums, so the
//! wire format stays a tagged union rather than a bag of strings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Metadata key naming the shadow volume backing a non-persistent session.
pub const CLONE_ON_BOOT_KEY: &str = "clone-on-boot";

/// Record a volume plugin returns for a single virtual disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    /// Stable per-SR identifier.
    pub key: String,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub read_write: bool,
    pub virtual_size: u64,
    #[serde(default)]
    pub physical_utilisation: u64,
    /// Candidate URIs for attaching this volume, most preferred first.
    #[serde(default)]
    pub uri: Vec<String>,
    /// Opaque per-volume metadata. The dispatch engine only interprets
    /// [`CLONE_ON_BOOT_KEY`].
    #[serde(default)]
    pub keys: BTreeMap<String, String>,
}

impl Volume {
    /// Key of the clone-on-boot shadow volume, when one exists.
    pub fn clone_on_boot(&self) -> Option<&str> {
        self.keys.get(CLONE_ON_BOOT_KEY).map(String::as_str)
    }
}

/// Backend-reported SR health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Health {
    #[default]
    Healthy,
    Recovering,
}

/// Result of an `SR.stat` script invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SrStat {
    /// Backend SR identifier.
    pub sr: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub free_space: u64,
    pub total_space: u64,
    /// Metric data-source URIs exported by this SR.
    #[serde(default)]
    pub datasources: Vec<String>,
    #[serde(default)]
    pub clustered: bool,
    #[serde(default)]
    pub health: Health,
}

/// One entry of an `SR.probe` script's result list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeResult {
    #[serde(default)]
    pub configuration: BTreeMap<String, String>,
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub sr: Option<SrStat>,
    #[serde(default)]
    pub extra_info: BTreeMap<String, String>,
}

/// Self-description returned by a plugin's `Plugin.Query` script.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginQueryResult {
    #[serde(default)]
    pub plugin: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub copyright: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub required_api_version: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub configuration: Vec<(String, String)>,
    #[serde(default)]
    pub required_cluster_stack: Vec<String>,
}

/// How a datapath plugin exposes an attached volume to the guest domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DatapathImplementation {
    Blkback(String),
    Qdisk(String),
    Tapdisk3(String),
}

/// Result of a `Datapath.attach` script invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatapathAttachResult {
    pub implementation: DatapathImplementation,
}
