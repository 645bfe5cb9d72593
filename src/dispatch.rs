//! Translation of manager storage operations onto plugin scripts.
//!
//! One [`VolumePlugin`] instance serves one volume plugin's queue. Each
//! recognized method maps to one or more script invocations whose results
//! are composed with the attached-SR index and the datapath registry:
//! `SR.*` and `VDI.*` metadata operations go to the volume plugin's own
//! scripts, while attach/activate/deactivate/detach and the native half of
//! the clone-on-boot protocol go to the datapath plugin chosen for the
//! volume's URI.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::api::{
    self, AttachInfo, DriverInfo, ProbeRecord, QueryArgs, SrArgs, SrAttachArgs, SrCreateArgs,
    SrInfo, SrProbeArgs, SrSetDescriptionArgs, SrSetNameArgs, Vdi, VdiArgs, VdiAttachArgs,
    VdiCreateArgs, VdiEpochBeginArgs, VdiInfoArgs, VdiIntroduceArgs, VdiResizeArgs,
    VdiSetDescriptionArgs, VdiSetNameArgs, VdiSetPersistentArgs,
};
use crate::backend::{
    DatapathAttachResult, DatapathImplementation, PluginQueryResult, ProbeResult, SrStat, Volume,
    CLONE_ON_BOOT_KEY,
};
use crate::datapath::{DatapathRegistry, FEATURE_NONPERSISTENT};
use crate::datasources::{DatasourceRegistrar, DATASOURCE_INTERVAL};
use crate::errors::{SmError, SmResult};
use crate::script;
use crate::sr_index::SrIndex;
use crate::switch::{Call, RpcHandler};

/// Scheme of data-source URIs exported through shared memory.
const SHM_SCHEME: &str = "xeno+shm";

/// Scripts probed by `Query.query` and the capability each one implies.
const PROBED_CAPABILITIES: &[(&str, &str)] = &[
    ("SR.attach", "SR_ATTACH"),
    ("SR.create", "SR_CREATE"),
    ("SR.destroy", "SR_DESTROY"),
    ("SR.detach", "SR_DETACH"),
    ("SR.ls", "SR_SCAN"),
    ("SR.stat", "SR_UPDATE"),
    ("Volume.create", "VDI_CREATE"),
    ("Volume.clone", "VDI_CLONE"),
    ("Volume.snapshot", "VDI_SNAPSHOT"),
    ("Volume.resize", "VDI_RESIZE"),
    ("Volume.destroy", "VDI_DELETE"),
    ("Volume.stat", "VDI_UPDATE"),
];

/// Features present regardless of what the backend declares; the dispatch
/// engine implements these itself.
const UNCONDITIONAL_FEATURES: &[&str] = &[
    "VDI_ATTACH",
    "VDI_DETACH",
    "VDI_ACTIVATE",
    "VDI_DEACTIVATE",
    "VDI_INTRODUCE",
];

/// Dispatch state for one volume plugin.
pub struct VolumePlugin {
    name: String,
    volume_root: PathBuf,
    srs: Arc<SrIndex>,
    datapaths: Arc<DatapathRegistry>,
    datasources: Arc<dyn DatasourceRegistrar>,
}

fn parse<T: DeserializeOwned>(method: &str, args: Value) -> SmResult<T> {
    serde_json::from_value(args).map_err(|e| SmError::InvalidParams {
        method: method.to_string(),
        reason: e.to_string(),
    })
}

fn respond<T: Serialize>(outcome: SmResult<T>) -> SmResult<Value> {
    outcome.and_then(|v| serde_json::to_value(v).map_err(|e| SmError::Internal(e.to_string())))
}

#[async_trait]
impl RpcHandler for VolumePlugin {
    async fn handle(&self, call: Call) -> SmResult<Value> {
        let method = call.method;
        let args = call.params.into_iter().next().unwrap_or(Value::Null);
        debug!(plugin = %self.name, method = %method, "dispatching");

        match method.as_str() {
            "Query.query" => respond(self.query(parse(&method, args)?).await),
            "Query.diagnostics" => respond(self.diagnostics(parse(&method, args)?).await),
            "SR.attach" => respond(self.sr_attach(parse(&method, args)?).await),
            "SR.detach" => respond(self.sr_detach(parse(&method, args)?).await),
            "SR.probe" => respond(self.sr_probe(parse(&method, args)?).await),
            "SR.create" => respond(self.sr_create(parse(&method, args)?).await),
            "SR.set_name_label" => respond(self.sr_set_name_label(parse(&method, args)?).await),
            "SR.set_name_description" => {
                respond(self.sr_set_name_description(parse(&method, args)?).await)
            }
            "SR.destroy" => respond(self.sr_destroy(parse(&method, args)?).await),
            "SR.scan" => respond(self.sr_scan(parse(&method, args)?).await),
            "SR.stat" => respond(self.sr_stat(parse(&method, args)?).await),
            "VDI.create" => respond(self.vdi_create(parse(&method, args)?).await),
            "VDI.destroy" => respond(self.vdi_destroy(parse(&method, args)?).await),
            "VDI.snapshot" => respond(self.vdi_snapshot(parse(&method, args)?).await),
            "VDI.clone" => respond(self.vdi_clone(parse(&method, args)?).await),
            "VDI.set_name_label" => respond(self.vdi_set_name_label(parse(&method, args)?).await),
            "VDI.set_name_description" => {
                respond(self.vdi_set_name_description(parse(&method, args)?).await)
            }
            "VDI.resize" => respond(self.vdi_resize(parse(&method, args)?).await),
            "VDI.stat" => respond(self.vdi_stat(parse(&method, args)?).await),
            "VDI.introduce" => respond(self.vdi_introduce(parse(&method, args)?).await),
            "VDI.attach" => respond(self.vdi_attach(parse(&method, args)?).await),
            "VDI.activate" => {
                respond(self.vdi_datapath_op("Datapath.activate", parse(&method, args)?).await)
            }
            "VDI.deactivate" => {
                respond(self.vdi_datapath_op("Datapath.deactivate", parse(&method, args)?).await)
            }
            "VDI.detach" => {
                respond(self.vdi_datapath_op("Datapath.detach", parse(&method, args)?).await)
            }
            "VDI.epoch_begin" => respond(self.vdi_epoch_begin(parse(&method, args)?).await),
            "VDI.epoch_end" => respond(self.vdi_epoch_end(parse(&method, args)?).await),
            "VDI.set_persistent" => respond(self.vdi_set_persistent(parse(&method, args)?).await),
            _ => Err(SmError::Unimplemented(method.clone())),
        }
    }
}

impl VolumePlugin {
    pub fn new(
        name: &str,
        volume_root: PathBuf,
        srs: Arc<SrIndex>,
        datapaths: Arc<DatapathRegistry>,
        datasources: Arc<dyn DatasourceRegistrar>,
    ) -> Self {
        Self {
            name: name.to_string(),
            volume_root,
            srs,
            datapaths,
            datasources,
        }
    }

    fn plugin_dir(&self) -> PathBuf {
        self.volume_root.join(&self.name)
    }

    /// Invoke one of this plugin's own scripts.
    async fn volume_call<Res: DeserializeOwned>(&self, op: &str, request: &Value) -> SmResult<Res> {
        let path = script::script_path(&self.volume_root, &self.name, op);
        script::run(&path, &self.plugin_dir(), request).await
    }

    /// Invoke a script of the named datapath plugin.
    async fn datapath_call<Res: DeserializeOwned>(
        &self,
        datapath: &str,
        op: &str,
        request: &Value,
    ) -> SmResult<Res> {
        let path = script::script_path(self.datapaths.root(), datapath, op);
        script::run(&path, &self.datapaths.root().join(datapath), request).await
    }

    // -- Query ------------------------------------------------------------

    async fn query(&self, args: QueryArgs) -> SmResult<DriverInfo> {
        let declared: PluginQueryResult = self
            .volume_call("Plugin.Query", &json!({"dbg": args.dbg}))
            .await?;

        // The manager's vocabulary uses VDI_DELETE for what backends call
        // VDI_DESTROY.
        let mut features: Vec<String> = declared
            .features
            .into_iter()
            .map(|f| {
                if f == "VDI_DESTROY" {
                    "VDI_DELETE".to_string()
                } else {
                    f
                }
            })
            .collect();

        let dir = self.plugin_dir();
        for (script_name, capability) in PROBED_CAPABILITIES {
            if script::is_executable_file(&dir.join(script_name)).await
                && !features.iter().any(|f| f == capability)
            {
                features.push(capability.to_string());
            }
        }
        for feature in UNCONDITIONAL_FEATURES {
            if !features.iter().any(|f| f == feature) {
                features.push(feature.to_string());
            }
        }
        if features.iter().any(|f| f == "VDI_CLONE") {
            features.push("VDI_RESET_ON_BOOT/2".to_string());
        }

        let mut configuration = vec![(
            "uri".to_string(),
            "URI of the storage medium".to_string(),
        )];
        configuration.extend(declared.configuration);

        Ok(DriverInfo {
            plugin: declared.plugin,
            name: declared.name,
            description: declared.description,
            vendor: declared.vendor,
            copyright: declared.copyright,
            version: declared.version,
            required_api_version: declared.required_api_version,
            features,
            configuration,
            required_cluster_stack: declared.required_cluster_stack,
        })
    }

    async fn diagnostics(&self, args: QueryArgs) -> SmResult<String> {
        self.volume_call("Plugin.diagnostics", &json!({"dbg": args.dbg}))
            .await
    }

    // -- SR ---------------------------------------------------------------

    async fn sr_attach(&self, args: SrAttachArgs) -> SmResult<()> {
        let uri = uri_of_device_config(&args.device_config)?;
        let sr_id: String = self
            .volume_call("SR.attach", &json!({"dbg": args.dbg, "uri": uri}))
            .await?;

        // The identifier returned by SR.attach, not the URI, is what the
        // backend's SR.stat must accept from here on.
        let stat: SrStat = self
            .volume_call("SR.stat", &json!({"dbg": args.dbg, "sr": sr_id}))
            .await?;

        let mut uids = Vec::new();
        for datasource in &stat.datasources {
            let Some(uid) = shm_datasource_uid(datasource) else {
                continue;
            };
            match self.datasources.register(&uid, DATASOURCE_INTERVAL).await {
                Ok(()) => uids.push(uid),
                Err(e) => warn!(
                    datasource = %datasource,
                    error = %e,
                    "failed to register data source; continuing attach"
                ),
            }
        }

        self.srs
            .add(&args.sr, &sr_id, uids)
            .await
            .map_err(|e| SmError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn sr_detach(&self, args: SrArgs) -> SmResult<()> {
        // Detach of a handle that is not attached succeeds.
        let Some(attached) = self.srs.lookup(&args.sr).await else {
            return Ok(());
        };

        let _: Value = self
            .volume_call("SR.detach", &json!({"dbg": args.dbg, "sr": attached.sr_id}))
            .await?;

        for uid in &attached.datasource_uids {
            if let Err(e) = self.datasources.deregister(uid).await {
                warn!(uid = %uid, error = %e, "failed to deregister data source");
            }
        }

        self.srs
            .remove(&args.sr)
            .await
            .map_err(|e| SmError::Internal(e.to_string()))?;
        Ok(())
    }

    async fn sr_probe(&self, args: SrProbeArgs) -> SmResult<Vec<ProbeRecord>> {
        let uri = uri_of_device_config(&args.device_config)?;
        let results: Vec<ProbeResult> = self
            .volume_call("SR.probe", &json!({"dbg": args.dbg, "uri": uri}))
            .await?;
        Ok(results.into_iter().map(api::probe_record_of_result).collect())
    }

    async fn sr_create(&self, args: SrCreateArgs) -> SmResult<()> {
        let uri = uri_of_device_config(&args.device_config)?;
        let _: Value = self
            .volume_call(
                "SR.create",
                &json!({
                    "dbg": args.dbg,
                    "uri": uri,
                    "name": args.name_label,
                    "description": args.name_description,
                }),
            )
            .await?;
        Ok(())
    }

    async fn sr_set_name_label(&self, args: SrSetNameArgs) -> SmResult<()> {
        let sr_id = self.srs.find(&args.sr).await?;
        let _: Value = self
            .volume_call(
                "SR.set_name",
                &json!({"dbg": args.dbg, "sr": sr_id, "new_name": args.new_name_label}),
            )
            .await?;
        Ok(())
    }

    async fn sr_set_name_description(&self, args: SrSetDescriptionArgs) -> SmResult<()> {
        let sr_id = self.srs.find(&args.sr).await?;
        let _: Value = self
            .volume_call(
                "SR.set_description",
                &json!({
                    "dbg": args.dbg,
                    "sr": sr_id,
                    "new_description": args.new_name_description,
                }),
            )
            .await?;
        Ok(())
    }

    async fn sr_destroy(&self, args: SrArgs) -> SmResult<()> {
        let sr_id = self.srs.find(&args.sr).await?;
        let _: Value = self
            .volume_call("SR.destroy", &json!({"dbg": args.dbg, "sr": sr_id}))
            .await?;
        Ok(())
    }

    async fn sr_scan(&self, args: SrArgs) -> SmResult<Vec<Vdi>> {
        let sr_id = self.srs.find(&args.sr).await?;
        let volumes: Vec<Volume> = self
            .volume_call("SR.ls", &json!({"dbg": args.dbg, "sr": sr_id}))
            .await?;

        // Volumes named by another volume's clone-on-boot key are transient
        // shadows and stay invisible to the manager.
        let shadows: HashSet<&str> = volumes.iter().filter_map(Volume::clone_on_boot).collect();
        Ok(volumes
            .iter()
            .filter(|v| !shadows.contains(v.key.as_str()))
            .map(api::vdi_of_volume)
            .collect())
    }

    async fn sr_stat(&self, args: SrArgs) -> SmResult<SrInfo> {
        let sr_id = self.srs.find(&args.sr).await?;
        let stat: SrStat = self
            .volume_call("SR.stat", &json!({"dbg": args.dbg, "sr": sr_id}))
            .await?;
        Ok(api::sr_info_of_stat(&stat))
    }

    // -- VDI metadata -----------------------------------------------------

    async fn stat_volume(&self, dbg: &str, sr_id: &str, key: &str) -> SmResult<Volume> {
        self.volume_call("Volume.stat", &json!({"dbg": dbg, "sr": sr_id, "key": key}))
            .await
    }

    async fn destroy_volume(&self, dbg: &str, sr_id: &str, key: &str) -> SmResult<()> {
        let _: Value = self
            .volume_call(
                "Volume.destroy",
                &json!({"dbg": dbg, "sr": sr_id, "key": key}),
            )
            .await?;
        Ok(())
    }

    async fn vdi_create(&self, args: VdiCreateArgs) -> SmResult<Vdi> {
        let sr_id = self.srs.find(&args.sr).await?;
        let volume: Volume = self
            .volume_call(
                "Volume.create",
                &json!({
                    "dbg": args.dbg,
                    "sr": sr_id,
                    "name": args.vdi_info.name_label,
                    "description": args.vdi_info.name_description,
                    "size": args.vdi_info.virtual_size,
                }),
            )
            .await?;
        Ok(api::vdi_of_volume(&volume))
    }

    async fn vdi_destroy(&self, args: VdiArgs) -> SmResult<()> {
        let sr_id = self.srs.find(&args.sr).await?;
        let volume = self.stat_volume(&args.dbg, &sr_id, &args.vdi).await?;
        // A lingering shadow would leak once its parent is gone.
        if let Some(shadow) = volume.clone_on_boot() {
            let shadow = shadow.to_string();
            self.destroy_volume(&args.dbg, &sr_id, &shadow).await?;
        }
        self.destroy_volume(&args.dbg, &sr_id, &args.vdi).await
    }

    async fn vdi_snapshot(&self, args: VdiInfoArgs) -> SmResult<Vdi> {
        let sr_id = self.srs.find(&args.sr).await?;
        let volume: Volume = self
            .volume_call(
                "Volume.snapshot",
                &json!({"dbg": args.dbg, "sr": sr_id, "key": args.vdi_info.vdi}),
            )
            .await?;
        Ok(api::vdi_of_volume(&volume))
    }

    async fn vdi_clone(&self, args: VdiInfoArgs) -> SmResult<Vdi> {
        let sr_id = self.srs.find(&args.sr).await?;
        let volume: Volume = self
            .volume_call(
                "Volume.clone",
                &json!({"dbg": args.dbg, "sr": sr_id, "key": args.vdi_info.vdi}),
            )
            .await?;
        Ok(api::vdi_of_volume(&volume))
    }

    async fn vdi_set_name_label(&self, args: VdiSetNameArgs) -> SmResult<()> {
        let sr_id = self.srs.find(&args.sr).await?;
        let _: Value = self
            .volume_call(
                "Volume.set_name",
                &json!({
                    "dbg": args.dbg,
                    "sr": sr_id,
                    "key": args.vdi,
                    "new_name": args.new_name_label,
                }),
            )
            .await?;
        Ok(())
    }

    async fn vdi_set_name_description(&self, args: VdiSetDescriptionArgs) -> SmResult<()> {
        let sr_id = self.srs.find(&args.sr).await?;
        let _: Value = self
            .volume_call(
                "Volume.set_description",
                &json!({
                    "dbg": args.dbg,
                    "sr": sr_id,
                    "key": args.vdi,
                    "new_description": args.new_name_description,
                }),
            )
            .await?;
        Ok(())
    }

    async fn vdi_resize(&self, args: VdiResizeArgs) -> SmResult<u64> {
        let sr_id = self.srs.find(&args.sr).await?;
        let _: Value = self
            .volume_call(
                "Volume.resize",
                &json!({
                    "dbg": args.dbg,
                    "sr": sr_id,
                    "key": args.vdi,
                    "new_size": args.new_size,
                }),
            )
            .await?;
        let volume = self.stat_volume(&args.dbg, &sr_id, &args.vdi).await?;
        Ok(volume.virtual_size)
    }

    async fn vdi_stat(&self, args: VdiArgs) -> SmResult<Vdi> {
        let sr_id = self.srs.find(&args.sr).await?;
        let volume = self.stat_volume(&args.dbg, &sr_id, &args.vdi).await?;
        Ok(api::vdi_of_volume(&volume))
    }

    async fn vdi_introduce(&self, args: VdiIntroduceArgs) -> SmResult<Vdi> {
        let sr_id = self.srs.find(&args.sr).await?;
        let volume = self.stat_volume(&args.dbg, &sr_id, &args.location).await?;
        Ok(api::vdi_of_volume(&volume))
    }

    // -- VDI datapath -----------------------------------------------------

    /// Stat the volume, following its clone-on-boot shadow when one exists;
    /// datapath operations act on the shadow for the duration of a
    /// non-persistent session.
    async fn effective_volume(&self, dbg: &str, sr_id: &str, key: &str) -> SmResult<Volume> {
        let volume = self.stat_volume(dbg, sr_id, key).await?;
        if let Some(shadow) = volume.clone_on_boot() {
            let shadow = shadow.to_string();
            return self.stat_volume(dbg, sr_id, &shadow).await;
        }
        Ok(volume)
    }

    async fn vdi_attach(&self, args: VdiAttachArgs) -> SmResult<AttachInfo> {
        let sr_id = self.srs.find(&args.sr).await?;
        let volume = self.effective_volume(&args.dbg, &sr_id, &args.vdi).await?;
        let choice = self.datapaths.choose(&volume, true).await?;
        let attached: DatapathAttachResult = self
            .datapath_call(
                &choice.scheme,
                "Datapath.attach",
                &json!({"dbg": args.dbg, "uri": choice.uri, "domain": choice.domain}),
            )
            .await?;
        Ok(attach_info_of_implementation(attached.implementation))
    }

    /// Shared body of `VDI.activate`, `VDI.deactivate` and `VDI.detach`.
    async fn vdi_datapath_op(&self, op: &str, args: VdiArgs) -> SmResult<()> {
        let sr_id = self.srs.find(&args.sr).await?;
        let volume = self.effective_volume(&args.dbg, &sr_id, &args.vdi).await?;
        let choice = self.datapaths.choose(&volume, true).await?;
        let _: Value = self
            .datapath_call(
                &choice.scheme,
                op,
                &json!({"dbg": args.dbg, "uri": choice.uri, "domain": choice.domain}),
            )
            .await?;
        Ok(())
    }

    // -- Clone-on-boot ----------------------------------------------------

    async fn vdi_epoch_begin(&self, args: VdiEpochBeginArgs) -> SmResult<()> {
        let sr_id = self.srs.find(&args.sr).await?;
        let volume = self.stat_volume(&args.dbg, &sr_id, &args.vdi).await?;
        let choice = self.datapaths.choose(&volume, args.persistent).await?;

        if self
            .datapaths
            .supports(&choice.scheme, FEATURE_NONPERSISTENT)
            .await
        {
            // The datapath implements non-persistent sessions itself.
            let _: Value = self
                .datapath_call(
                    &choice.scheme,
                    "Datapath.open",
                    &json!({
                        "dbg": args.dbg,
                        "uri": choice.uri,
                        "persistent": args.persistent,
                    }),
                )
                .await?;
            return Ok(());
        }

        if args.persistent {
            // The baseline volume is already persistent.
            return Ok(());
        }

        if let Some(shadow) = volume.clone_on_boot() {
            let shadow = shadow.to_string();
            self.destroy_volume(&args.dbg, &sr_id, &shadow).await?;
        }
        let shadow: Volume = self
            .volume_call(
                "Volume.clone",
                &json!({"dbg": args.dbg, "sr": sr_id, "key": args.vdi}),
            )
            .await?;
        let _: Value = self
            .volume_call(
                "Volume.set",
                &json!({
                    "dbg": args.dbg,
                    "sr": sr_id,
                    "key": args.vdi,
                    "k": CLONE_ON_BOOT_KEY,
                    "v": shadow.key,
                }),
            )
            .await?;
        Ok(())
    }

    async fn vdi_epoch_end(&self, args: VdiArgs) -> SmResult<()> {
        let sr_id = self.srs.find(&args.sr).await?;
        let volume = self.stat_volume(&args.dbg, &sr_id, &args.vdi).await?;
        let choice = self.datapaths.choose(&volume, true).await?;

        if self
            .datapaths
            .supports(&choice.scheme, FEATURE_NONPERSISTENT)
            .await
        {
            let _: Value = self
                .datapath_call(
                    &choice.scheme,
                    "Datapath.close",
                    &json!({"dbg": args.dbg, "uri": choice.uri}),
                )
                .await?;
            return Ok(());
        }

        if let Some(shadow) = volume.clone_on_boot() {
            let shadow = shadow.to_string();
            self.destroy_volume(&args.dbg, &sr_id, &shadow).await?;
            let _: Value = self
                .volume_call(
                    "Volume.unset",
                    &json!({
                        "dbg": args.dbg,
                        "sr": sr_id,
                        "key": args.vdi,
                        "k": CLONE_ON_BOOT_KEY,
                    }),
                )
                .await?;
        }
        Ok(())
    }

    async fn vdi_set_persistent(&self, _args: VdiSetPersistentArgs) -> SmResult<()> {
        // The real work happens in epoch_begin.
        Ok(())
    }
}

fn uri_of_device_config(device_config: &[(String, String)]) -> SmResult<&str> {
    device_config
        .iter()
        .find(|(key, _)| key == "uri")
        .map(|(_, value)| value.as_str())
        .ok_or(SmError::MissingUri)
}

fn attach_info_of_implementation(implementation: DatapathImplementation) -> AttachInfo {
    let (backend_kind, params) = match implementation {
        DatapathImplementation::Blkback(p) => ("vbd", p),
        DatapathImplementation::Qdisk(p) => ("qdisk", p),
        DatapathImplementation::Tapdisk3(p) => ("vbd3", p),
    };
    AttachInfo {
        backend_kind: backend_kind.to_string(),
        params,
        o_direct: true,
        o_direct_reason: String::new(),
    }
}

/// Uid of a shared-memory data source: the leading-slash-stripped path of a
/// `xeno+shm` URI. Other schemes yield None.
fn shm_datasource_uid(uri: &str) -> Option<String> {
    if crate::datapath::uri_scheme(uri) != Some(SHM_SCHEME) {
        return None;
    }
    let rest = &uri[SHM_SCHEME.len() + 1..];
    Some(rest.trim_start_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_uri_of_device_config() {
        let config = vec![
            ("other".to_string(), "x".to_string()),
            ("uri".to_string(), "loop://a".to_string()),
        ];
        assert_eq!(uri_of_device_config(&config).unwrap(), "loop://a");
        assert!(matches!(
            uri_of_device_config(&[]).unwrap_err(),
            SmError::MissingUri
        ));
    }

    #[test]
    fn test_attach_info_translation() {
        let info = attach_info_of_implementation(DatapathImplementation::Blkback("p1".into()));
        assert_eq!(info.backend_kind, "vbd");
        assert_eq!(info.params, "p1");
        assert!(info.o_direct);
        assert!(info.o_direct_reason.is_empty());

        let info = attach_info_of_implementation(DatapathImplementation::Qdisk("p2".into()));
        assert_eq!(info.backend_kind, "qdisk");

        let info = attach_info_of_implementation(DatapathImplementation::Tapdisk3("p3".into()));
        assert_eq!(info.backend_kind, "vbd3");
    }

    #[test]
    fn test_shm_datasource_uid() {
        assert_eq!(
            shm_datasource_uid("xeno+shm://sr9/metrics"),
            Some("sr9/metrics".to_string())
        );
        assert_eq!(
            shm_datasource_uid("xeno+shm:/dev/shm/sr9"),
            Some("dev/shm/sr9".to_string())
        );
        assert_eq!(shm_datasource_uid("http://other/metrics"), None);
        assert_eq!(shm_datasource_uid("not a uri"), None);
    }

    #[test]
    fn test_parse_rejects_malformed_args() {
        let err = parse::<VdiArgs>("VDI.stat", json!({"dbg": "t"})).unwrap_err();
        match err {
            SmError::InvalidParams { method, .. } => assert_eq!(method, "VDI.stat"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
