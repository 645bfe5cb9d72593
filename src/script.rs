//! Invocation of plugin scripts: the subprocess RPC protocol.
//!
//! Every storage operation ultimately becomes one or more script runs. A
//! script is fed a single JSON request on stdin and answers with a single
//! JSON document on stdout; failures are reported as a `{code, params,
//! backtrace}` payload plus a non-zero exit status. This module classifies
//! every way such a run can go wrong into the error domain of
//! [`crate::errors::SmError`].

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::errors::{SmError, SmResult, WireError};

/// Compute the path of one operation's script inside a plugin root.
pub fn script_path(root: &Path, plugin: &str, operation: &str) -> PathBuf {
    root.join(plugin).join(operation)
}

/// True when `path` names a regular file (following symlinks) that this
/// process may execute. Used by the capability probe of `Query.query`.
pub async fn is_executable_file(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file() && has_exec_permission(path),
        Err(_) => false,
    }
}

fn has_exec_permission(path: &Path) -> bool {
    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    unsafe { libc::access(c_path.as_ptr(), libc::X_OK) == 0 }
}

/// Run a plugin script with a JSON request and parse its JSON response.
///
/// The script is invoked as `<script> --json` with `working_dir` as its
/// working directory. Concurrent invocations of the same script are not
/// serialized here; scripts are expected to be re-entrant.
pub async fn run<Req, Res>(script: &Path, working_dir: &Path, request: &Req) -> SmResult<Res>
where
    Req: Serialize + ?Sized,
    Res: DeserializeOwned,
{
    let meta = tokio::fs::metadata(script)
        .await
        .map_err(|_| SmError::ScriptMissing(script.to_path_buf()))?;
    if !meta.is_file() {
        return Err(SmError::ScriptMissing(script.to_path_buf()));
    }
    if !has_exec_permission(script) {
        return Err(SmError::ScriptNotExecutable(script.to_path_buf()));
    }

    let body = serde_json::to_vec(request).map_err(|e| SmError::ScriptFailed {
        params: vec![script.display().to_string(), e.to_string()],
    })?;

    let started = Instant::now();
    let mut child = Command::new(script)
        .arg("--json")
        .current_dir(working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SmError::ScriptFailed {
            params: vec![script.display().to_string(), e.to_string()],
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        // A script that exits before reading its stdin closes the pipe; the
        // exit status decides the outcome, not the broken write.
        if let Err(e) = stdin.write_all(&body).await {
            debug!(script = %script.display(), error = %e, "stdin write failed");
        }
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| SmError::ScriptFailed {
            params: vec![script.display().to_string(), e.to_string()],
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    debug!(
        script = %script.display(),
        status = ?output.status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        stderr = %stderr.trim(),
        "script completed"
    );

    if output.status.success() {
        return serde_json::from_str(&stdout).map_err(|_| SmError::ScriptFailed {
            params: vec![stdout.clone()],
        });
    }

    if let Some(signal) = output.status.signal() {
        return Err(SmError::ScriptFailed {
            params: vec!["signal".to_string(), signal_name(signal)],
        });
    }

    let code = output.status.code().unwrap_or(-1);
    if let Ok(err) = serde_json::from_str::<WireError>(&stdout) {
        return Err(SmError::Backend {
            code: err.code,
            params: err.params,
            backtrace: err.backtrace,
        });
    }
    Err(SmError::ScriptFailed {
        params: vec![code.to_string(), stdout],
    })
}

fn signal_name(signal: i32) -> String {
    match signal {
        libc::SIGHUP => "SIGHUP".to_string(),
        libc::SIGINT => "SIGINT".to_string(),
        libc::SIGQUIT => "SIGQUIT".to_string(),
        libc::SIGABRT => "SIGABRT".to_string(),
        libc::SIGKILL => "SIGKILL".to_string(),
        libc::SIGSEGV => "SIGSEGV".to_string(),
        libc::SIGPIPE => "SIGPIPE".to_string(),
        libc::SIGALRM => "SIGALRM".to_string(),
        libc::SIGTERM => "SIGTERM".to_string(),
        n => format!("signal {}", n),
    }
}
