//! Error domain of the dispatch engine.
//!
//! Every failure a handler can return to the manager is one of these
//! variants; [`SmError::to_wire`] produces the `{code, params, backtrace}`
//! envelope that travels back on the RPC error channel. The same envelope
//! shape is what plugin scripts write to stdout when they exit non-zero, so
//! [`WireError`] doubles as the parse target for script failures.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type SmResult<T> = std::result::Result<T, SmError>;

#[derive(Debug, thiserror::Error)]
pub enum SmError {
    /// Required `uri` key absent from device_config, or no candidate URI
    /// survived datapath filtering.
    #[error("required key 'uri' is missing from device_config")]
    MissingUri,

    /// Operation referenced an SR handle that is not in the attached-SR
    /// index.
    #[error("SR '{0}' is not attached")]
    SrNotAttached(String),

    /// Resolved script path does not name a regular file.
    #[error("script {} does not exist", .0.display())]
    ScriptMissing(PathBuf),

    /// Resolved script lacks execute permission for this process.
    #[error("script {} is not executable", .0.display())]
    ScriptNotExecutable(PathBuf),

    /// Script spawn failed, the script died on a signal, or it produced
    /// output the declared schema does not match.
    #[error("script failed: {}", .params.join("; "))]
    ScriptFailed { params: Vec<String> },

    /// Script exited non-zero with a parseable error payload; code, params
    /// and backtrace are preserved verbatim.
    #[error("backend error {code}: {}", .params.join("; "))]
    Backend {
        code: String,
        params: Vec<String>,
        backtrace: Value,
    },

    /// Method name not in the recognized set.
    #[error("unknown method '{0}'")]
    Unimplemented(String),

    /// Recognized method whose request object failed to deserialize.
    #[error("invalid parameters for '{method}': {reason}")]
    InvalidParams { method: String, reason: String },

    /// Failure inside the daemon itself (state-file write, response
    /// serialization).
    #[error("internal error: {0}")]
    Internal(String),
}

impl SmError {
    /// Wire code string for this error.
    pub fn code(&self) -> &str {
        match self {
            SmError::MissingUri => "MISSING_URI",
            SmError::SrNotAttached(_) => "SR_NOT_ATTACHED",
            SmError::ScriptMissing(_) => "SCRIPT_MISSING",
            SmError::ScriptNotExecutable(_) => "SCRIPT_NOT_EXECUTABLE",
            SmError::ScriptFailed { .. } => "SCRIPT_FAILED",
            SmError::Backend { code, .. } => code,
            SmError::Unimplemented(_) => "UNIMPLEMENTED",
            SmError::InvalidParams { .. } => "INVALID_PARAMS",
            SmError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Encode as the `{code, params, backtrace}` wire envelope.
    pub fn to_wire(&self) -> WireError {
        let (params, backtrace) = match self {
            SmError::MissingUri => (vec![], Value::Null),
            SmError::SrNotAttached(handle) => (vec![handle.clone()], Value::Null),
            SmError::ScriptMissing(path) => (vec![path.display().to_string()], Value::Null),
            SmError::ScriptNotExecutable(path) => (vec![path.display().to_string()], Value::Null),
            SmError::ScriptFailed { params } => (params.clone(), Value::Null),
            SmError::Backend {
                params, backtrace, ..
            } => (params.clone(), backtrace.clone()),
            SmError::Unimplemented(method) => (vec![method.clone()], Value::Null),
            SmError::InvalidParams { method, reason } => {
                (vec![method.clone(), reason.clone()], Value::Null)
            }
            SmError::Internal(reason) => (vec![reason.clone()], Value::Null),
        };
        WireError {
            code: self.code().to_string(),
            params,
            backtrace,
        }
    }
}

/// The error envelope as it appears on the wire and on a failing script's
/// stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    #[serde(default)]
    pub params: Vec<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub backtrace: Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_unimplemented_wire_shape() {
        let wire = SmError::Unimplemented("Nope.do".to_string()).to_wire();
        assert_eq!(
            serde_json::to_value(&wire).unwrap(),
            json!({"code": "UNIMPLEMENTED", "params": ["Nope.do"]})
        );
    }

    #[test]
    fn test_backend_error_preserves_backtrace() {
        let err = SmError::Backend {
            code: "XYZ".to_string(),
            params: vec!["a".to_string(), "b".to_string()],
            backtrace: json!({"frames": ["f1", "f2"]}),
        };
        let wire = err.to_wire();
        assert_eq!(wire.code, "XYZ");
        assert_eq!(wire.params, vec!["a", "b"]);
        assert_eq!(wire.backtrace, json!({"frames": ["f1", "f2"]}));
    }

    #[test]
    fn test_script_error_payload_parses_without_backtrace() {
        let wire: WireError =
            serde_json::from_str(r#"{"code": "ENOSPC", "params": ["/dev/sda"]}"#).unwrap();
        assert_eq!(wire.code, "ENOSPC");
        assert_eq!(wire.params, vec!["/dev/sda"]);
        assert!(wire.backtrace.is_null());
    }

    #[test]
    fn test_wire_codes() {
        assert_eq!(SmError::MissingUri.code(), "MISSING_URI");
        assert_eq!(
            SmError::SrNotAttached("sr1".to_string()).code(),
            "SR_NOT_ATTACHED"
        );
        assert_eq!(
            SmError::ScriptMissing(PathBuf::from("/p")).code(),
            "SCRIPT_MISSING"
        );
        assert_eq!(
            SmError::ScriptNotExecutable(PathBuf::from("/p")).code(),
            "SCRIPT_NOT_EXECUTABLE"
        );
        assert_eq!(
            SmError::ScriptFailed { params: vec![] }.code(),
            "SCRIPT_FAILED"
        );
    }
}
