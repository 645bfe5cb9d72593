//! Per-plugin RPC services on the message switch.
//!
//! Each volume plugin is exposed on a queue named after the plugin. A bound
//! queue is a Unix-domain socket inside the switch directory carrying
//! newline-delimited JSON-RPC: one `{method, params, id}` object per line in,
//! one `{result}` or `{error}` object per line out. Requests on one
//! connection are handled in arrival order; distinct connections and queues
//! interleave freely.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{SmError, WireError};

/// Inbound JSON-RPC call. `name` is accepted as an alias for `method`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Call {
    #[serde(alias = "name")]
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub id: Value,
}

/// Outbound JSON-RPC reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub id: Value,
}

impl Reply {
    pub fn from_outcome(outcome: std::result::Result<Value, SmError>, id: Value) -> Self {
        match outcome {
            Ok(result) => Reply {
                result: Some(result),
                error: None,
                id,
            },
            Err(e) => Reply {
                result: None,
                error: Some(e.to_wire()),
                id,
            },
        }
    }
}

/// Handler bound to one queue.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, call: Call) -> std::result::Result<Value, SmError>;
}

struct Service {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

/// The switch endpoint: a directory of per-queue sockets and the services
/// bound to them.
pub struct Switch {
    dir: PathBuf,
    services: Mutex<HashMap<String, Service>>,
}

impl Switch {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            services: Mutex::new(HashMap::new()),
        }
    }

    pub fn socket_path(&self, queue: &str) -> PathBuf {
        self.dir.join(queue)
    }

    /// Bind a service on `queue`. Binding an already-bound queue is a no-op.
    pub async fn bind(&self, queue: &str, handler: Arc<dyn RpcHandler>) -> Result<()> {
        let mut services = self.services.lock().await;
        if services.contains_key(queue) {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create switch directory {}", self.dir.display()))?;
        let path = self.socket_path(queue);
        // A stale socket from a previous run would make the bind fail.
        let _ = tokio::fs::remove_file(&path).await;
        let listener = UnixListener::bind(&path)
            .with_context(|| format!("Failed to bind queue socket {}", path.display()))?;

        let cancel = CancellationToken::new();
        let task = tokio::spawn(serve(listener, handler, queue.to_string(), cancel.clone()));
        services.insert(queue.to_string(), Service { cancel, task });
        debug!(queue = %queue, "service bound");
        Ok(())
    }

    /// Shut the service on `queue` down. Unknown queues are a no-op.
    pub async fn unbind(&self, queue: &str) {
        let service = self.services.lock().await.remove(queue);
        if let Some(service) = service {
            service.cancel.cancel();
            let _ = service.task.await;
            let _ = tokio::fs::remove_file(self.socket_path(queue)).await;
            debug!(queue = %queue, "service unbound");
        }
    }

    /// Names of the currently bound queues.
    pub async fn bound(&self) -> HashSet<String> {
        self.services.lock().await.keys().cloned().collect()
    }

    /// Unbind every service.
    pub async fn shutdown(&self) {
        let queues: Vec<String> = self.bound().await.into_iter().collect();
        for queue in queues {
            self.unbind(&queue).await;
        }
    }
}

async fn serve(
    listener: UnixListener,
    handler: Arc<dyn RpcHandler>,
    queue: String,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    tokio::spawn(connection(
                        stream,
                        handler.clone(),
                        queue.clone(),
                        cancel.child_token(),
                    ));
                }
                Err(e) => {
                    warn!(queue = %queue, error = %e, "accept failed");
                    break;
                }
            },
        }
    }
}

async fn connection(
    stream: UnixStream,
    handler: Arc<dyn RpcHandler>,
    queue: String,
    cancel: CancellationToken,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) | Err(_) => break,
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<Call>(&line) {
            Ok(call) => {
                let id = call.id.clone();
                let method = call.method.clone();
                let outcome = handler.handle(call).await;
                if let Err(e) = &outcome {
                    warn!(queue = %queue, method = %method, code = %e.code(), "request failed");
                }
                Reply::from_outcome(outcome, id)
            }
            Err(e) => {
                warn!(queue = %queue, error = %e, "undecodable request");
                Reply {
                    result: None,
                    error: Some(WireError {
                        code: "INVALID_PARAMS".to_string(),
                        params: vec![e.to_string()],
                        backtrace: Value::Null,
                    }),
                    id: Value::Null,
                }
            }
        };

        let mut buf = match serde_json::to_vec(&reply) {
            Ok(buf) => buf,
            Err(e) => {
                warn!(queue = %queue, error = %e, "failed to encode reply");
                break;
            }
        };
        buf.push(b'\n');
        if writer.write_all(&buf).await.is_err() {
            break;
        }
    }
}
