//! Manager-facing wire objects.
//!
//! Request parameter objects for every recognized method, and the response
//! records the dispatch engine projects backend results into.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::backend::{Health, ProbeResult, SrStat, Volume};

/// Snapshot-time placeholder for volumes that are not snapshots.
pub const EPOCH_SNAPSHOT_TIME: &str = "19700101T00:00:00Z";

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// VDI record as the manager sees it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vdi {
    pub vdi: String,
    pub uuid: Option<String>,
    pub content_id: String,
    pub name_label: String,
    pub name_description: String,
    pub ty: String,
    pub metadata_of_pool: String,
    pub is_a_snapshot: bool,
    pub snapshot_time: String,
    pub snapshot_of: String,
    pub read_only: bool,
    pub virtual_size: u64,
    pub physical_utilisation: u64,
    pub persistent: bool,
    pub sm_config: Vec<(String, String)>,
}

/// Project a backend volume record into the manager's VDI schema.
pub fn vdi_of_volume(volume: &Volume) -> Vdi {
    Vdi {
        vdi: volume.key.clone(),
        uuid: volume.uuid.clone(),
        content_id: String::new(),
        name_label: volume.name.clone(),
        name_description: volume.description.clone(),
        ty: String::new(),
        metadata_of_pool: String::new(),
        is_a_snapshot: false,
        snapshot_time: EPOCH_SNAPSHOT_TIME.to_string(),
        snapshot_of: String::new(),
        read_only: !volume.read_write,
        virtual_size: volume.virtual_size,
        physical_utilisation: volume.physical_utilisation,
        persistent: true,
        sm_config: vec![],
    }
}

/// SR health as reported to the manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SrHealth {
    #[default]
    Healthy,
    Recovering,
}

/// SR record as the manager sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SrInfo {
    pub name_label: String,
    pub name_description: String,
    pub total_space: u64,
    pub free_space: u64,
    pub clustered: bool,
    pub health: SrHealth,
}

/// Translate a backend SR stat into the manager's SR record.
pub fn sr_info_of_stat(stat: &SrStat) -> SrInfo {
    SrInfo {
        name_label: stat.name.clone(),
        name_description: stat.description.clone(),
        total_space: stat.total_space,
        free_space: stat.free_space,
        clustered: stat.clustered,
        health: match stat.health {
            Health::Healthy => SrHealth::Healthy,
            Health::Recovering => SrHealth::Recovering,
        },
    }
}

/// One `SR.probe` result as reported to the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeRecord {
    pub configuration: BTreeMap<String, String>,
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sr: Option<SrInfo>,
    pub extra_info: BTreeMap<String, String>,
}

/// Translate one backend probe result.
pub fn probe_record_of_result(result: ProbeResult) -> ProbeRecord {
    ProbeRecord {
        configuration: result.configuration,
        complete: result.complete,
        sr: result.sr.as_ref().map(sr_info_of_stat),
        extra_info: result.extra_info,
    }
}

/// Response of `Query.query`: the composed driver description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverInfo {
    pub plugin: String,
    pub name: String,
    pub description: String,
    pub vendor: String,
    pub copyright: String,
    pub version: String,
    pub required_api_version: String,
    pub features: Vec<String>,
    pub configuration: Vec<(String, String)>,
    pub required_cluster_stack: Vec<String>,
}

/// Attachment descriptor returned by `VDI.attach`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachInfo {
    #[serde(rename = "backend-kind")]
    pub backend_kind: String,
    pub params: String,
    pub o_direct: bool,
    pub o_direct_reason: String,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct QueryArgs {
    #[serde(default)]
    pub dbg: String,
}

#[derive(Debug, Deserialize)]
pub struct SrAttachArgs {
    #[serde(default)]
    pub dbg: String,
    pub sr: String,
    #[serde(default)]
    pub device_config: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
pub struct SrProbeArgs {
    #[serde(default)]
    pub dbg: String,
    #[serde(default)]
    pub device_config: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
pub struct SrCreateArgs {
    #[serde(default)]
    pub dbg: String,
    #[serde(default)]
    pub sr: String,
    #[serde(default)]
    pub device_config: Vec<(String, String)>,
    #[serde(default)]
    pub name_label: String,
    #[serde(default)]
    pub name_description: String,
    #[serde(default)]
    pub physical_size: u64,
}

/// Operations taking only an SR handle (detach, destroy, scan, stat).
#[derive(Debug, Deserialize)]
pub struct SrArgs {
    #[serde(default)]
    pub dbg: String,
    pub sr: String,
}

#[derive(Debug, Deserialize)]
pub struct SrSetNameArgs {
    #[serde(default)]
    pub dbg: String,
    pub sr: String,
    pub new_name_label: String,
}

#[derive(Debug, Deserialize)]
pub struct SrSetDescriptionArgs {
    #[serde(default)]
    pub dbg: String,
    pub sr: String,
    pub new_name_description: String,
}

#[derive(Debug, Deserialize)]
pub struct VdiCreateArgs {
    #[serde(default)]
    pub dbg: String,
    pub sr: String,
    pub vdi_info: Vdi,
}

/// Operations taking an SR handle and a VDI key.
#[derive(Debug, Deserialize)]
pub struct VdiArgs {
    #[serde(default)]
    pub dbg: String,
    pub sr: String,
    pub vdi: String,
}

#[derive(Debug, Deserialize)]
pub struct VdiInfoArgs {
    #[serde(default)]
    pub dbg: String,
    pub sr: String,
    pub vdi_info: Vdi,
}

#[derive(Debug, Deserialize)]
pub struct VdiSetNameArgs {
    #[serde(default)]
    pub dbg: String,
    pub sr: String,
    pub vdi: String,
    pub new_name_label: String,
}

#[derive(Debug, Deserialize)]
pub struct VdiSetDescriptionArgs {
    #[serde(default)]
    pub dbg: String,
    pub sr: String,
    pub vdi: String,
    pub new_name_description: String,
}

#[derive(Debug, Deserialize)]
pub struct VdiResizeArgs {
    #[serde(default)]
    pub dbg: String,
    pub sr: String,
    pub vdi: String,
    pub new_size: u64,
}

#[derive(Debug, Deserialize)]
pub struct VdiIntroduceArgs {
    #[serde(default)]
    pub dbg: String,
    pub sr: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub sm_config: Vec<(String, String)>,
    pub location: String,
}

#[derive(Debug, Deserialize)]
pub struct VdiAttachArgs {
    #[serde(default)]
    pub dbg: String,
    #[serde(default)]
    pub dp: String,
    pub sr: String,
    pub vdi: String,
    #[serde(default)]
    pub read_write: bool,
}

#[derive(Debug, Deserialize)]
pub struct VdiEpochBeginArgs {
    #[serde(default)]
    pub dbg: String,
    pub sr: String,
    pub vdi: String,
    #[serde(default = "default_true")]
    pub persistent: bool,
}

#[derive(Debug, Deserialize)]
pub struct VdiSetPersistentArgs {
    #[serde(default)]
    pub dbg: String,
    pub sr: String,
    pub vdi: String,
    pub persistent: bool,
}
