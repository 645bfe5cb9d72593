//! Datapath plugin registry and the datapath chooser.
//!
//! A datapath plugin is named after the URI scheme it serves. The registry
//! holds each plugin's advertised feature set, obtained from its
//! `Plugin.Query` script; a plugin whose query fails is simply invisible.
//! The chooser picks which (scheme, uri, domain) triple to drive for a
//! volume, honouring the `NONPERSISTENT` feature when a non-persistent
//! attachment is requested.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde_json::json;
use tokio::sync::RwLock;
use tracing::debug;

use crate::backend::{PluginQueryResult, Volume};
use crate::errors::{SmError, SmResult};
use crate::script;

/// Feature a datapath plugin advertises when it implements non-persistent
/// sessions natively.
pub const FEATURE_NONPERSISTENT: &str = "NONPERSISTENT";

/// Guest domain the daemon attaches volumes for.
pub const LOCAL_DOMAIN: &str = "0";

const PLUGIN_QUERY: &str = "Plugin.Query";

/// Chosen datapath for one volume operation.
#[derive(Debug, Clone, PartialEq)]
pub struct DatapathChoice {
    pub scheme: String,
    pub uri: String,
    pub domain: String,
}

/// Registry of datapath plugins keyed by URI scheme.
pub struct DatapathRegistry {
    root: PathBuf,
    plugins: RwLock<HashMap<String, HashSet<String>>>,
}

impl DatapathRegistry {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            plugins: RwLock::new(HashMap::new()),
        }
    }

    /// Directory the datapath plugins live under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Query a plugin's capabilities and record them. Any failure leaves the
    /// plugin unregistered; the error is deliberately not surfaced.
    pub async fn register(&self, name: &str) {
        let dir = self.root.join(name);
        let query = script::script_path(&self.root, name, PLUGIN_QUERY);
        match script::run::<_, PluginQueryResult>(&query, &dir, &json!({"dbg": "register"})).await {
            Ok(result) => {
                let features: HashSet<String> = result.features.into_iter().collect();
                debug!(plugin = %name, features = ?features, "datapath plugin registered");
                self.plugins.write().await.insert(name.to_string(), features);
            }
            Err(e) => {
                debug!(plugin = %name, error = %e, "datapath plugin query failed; not registering");
            }
        }
    }

    pub async fn unregister(&self, name: &str) {
        self.plugins.write().await.remove(name);
    }

    /// Names currently registered.
    pub async fn registered(&self) -> HashSet<String> {
        self.plugins.read().await.keys().cloned().collect()
    }

    /// False when the scheme is unknown or the feature is not advertised.
    pub async fn supports(&self, scheme: &str, feature: &str) -> bool {
        self.plugins
            .read()
            .await
            .get(scheme)
            .is_some_and(|features| features.contains(feature))
    }

    /// Pick the datapath to drive for `volume`.
    ///
    /// Candidates keep the volume's URI order; when `persistent` is false
    /// the candidates whose plugin advertises `NONPERSISTENT` are moved to
    /// the front, preserving relative order within each group.
    pub async fn choose(&self, volume: &Volume, persistent: bool) -> SmResult<DatapathChoice> {
        let plugins = self.plugins.read().await;
        let candidates: Vec<(String, String)> = volume
            .uri
            .iter()
            .filter_map(|uri| uri_scheme(uri).map(|scheme| (scheme.to_string(), uri.clone())))
            .filter(|(scheme, _)| plugins.contains_key(scheme))
            .collect();

        let candidates = if persistent {
            candidates
        } else {
            let (native, rest): (Vec<_>, Vec<_>) = candidates.into_iter().partition(|(scheme, _)| {
                plugins
                    .get(scheme)
                    .is_some_and(|features| features.contains(FEATURE_NONPERSISTENT))
            });
            native.into_iter().chain(rest).collect()
        };

        candidates
            .into_iter()
            .next()
            .map(|(scheme, uri)| DatapathChoice {
                scheme,
                uri,
                domain: LOCAL_DOMAIN.to_string(),
            })
            .ok_or(SmError::MissingUri)
    }

    #[cfg(test)]
    pub(crate) async fn insert(&self, name: &str, features: &[&str]) {
        self.plugins.write().await.insert(
            name.to_string(),
            features.iter().map(|f| f.to_string()).collect(),
        );
    }
}

/// Extract the RFC 3986 scheme of a URI: ALPHA then ALPHA / DIGIT / `+` /
/// `-` / `.`, terminated by `:`. Returns None when no such prefix exists.
pub fn uri_scheme(uri: &str) -> Option<&str> {
    let (scheme, _) = uri.split_once(':')?;
    let mut chars = scheme.chars();
    let first = chars.next()?;
    if !first.is_ascii_alphabetic() {
        return None;
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) {
        Some(scheme)
    } else {
        None
    }
}
