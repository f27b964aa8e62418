//! Wire types for the LXD REST API, limited to the endpoints the bridge
//! uses: instance state, exec, background operations, and certificate trust.
//!
//! LXD wraps every response in an envelope whose `type` field distinguishes
//! synchronous results from background operations; errors come back with an
//! `error` message and HTTP-style `error_code`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Response envelope common to all LXD API endpoints.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Envelope<T> {
    /// `sync`, `async`, or `error`.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Endpoint-specific payload. Absent on error responses.
    #[serde(default)]
    pub metadata: Option<T>,
    /// Error message, empty on success.
    #[serde(default)]
    pub error: String,
    /// HTTP-style error code, 0 on success.
    #[serde(default)]
    pub error_code: u16,
}

/// Request body for `POST /1.0/instances/{name}/exec`.
///
/// Commands are wrapped in `bash -c` so that shell syntax (pipes, redirects,
/// `&&`) behaves the way it would on an interactive console.
#[derive(Debug, Serialize)]
pub struct ExecRequest {
    pub command: Vec<String>,
    #[serde(rename = "record-output")]
    pub record_output: bool,
    #[serde(rename = "wait-for-websocket")]
    pub wait_for_websocket: bool,
    pub interactive: bool,
    pub environment: BTreeMap<String, String>,
}

impl ExecRequest {
    /// Build the exec request for a single shell command.
    pub fn shell(command: &str) -> Self {
        let mut environment = BTreeMap::new();
        environment.insert("TERM".to_string(), "dumb".to_string());
        environment.insert(
            "PATH".to_string(),
            "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string(),
        );
        ExecRequest {
            command: vec![
                "bash".to_string(),
                "-c".to_string(),
                command.to_string(),
            ],
            record_output: true,
            wait_for_websocket: false,
            interactive: false,
            environment,
        }
    }
}

/// A background operation as returned by exec and polled until completion.
#[derive(Debug, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub id: String,
    /// `Running`, `Success`, or `Failure`.
    #[serde(default)]
    pub status: String,
    /// Failure detail, empty unless `status` is `Failure`.
    #[serde(default)]
    pub err: String,
    /// Exec-specific payload: exit code and recorded output locations.
    #[serde(default)]
    pub metadata: Option<ExecResult>,
}

/// The exec-operation payload present once the command has finished.
#[derive(Debug, Default, Deserialize)]
pub struct ExecResult {
    /// Exit code of the command, under LXD's `return` key.
    #[serde(rename = "return", default)]
    pub exit_code: i64,
    /// File-descriptor number (`"1"`, `"2"`) to recorded log path.
    #[serde(default)]
    pub output: BTreeMap<String, String>,
}

/// The subset of `GET /1.0/instances/{name}` the bridge inspects.
#[derive(Debug, Deserialize)]
pub struct Instance {
    /// `Running`, `Stopped`, etc.
    #[serde(default)]
    pub status: String,
}

/// Request body for `PUT /1.0/instances/{name}/state`.
#[derive(Debug, Serialize)]
pub struct StateRequest {
    /// `start`, `stop`, or `restart`.
    pub action: String,
    /// Seconds LXD waits for the action before reporting failure.
    pub timeout: u64,
    /// Kill instead of a clean shutdown. Always false here.
    pub force: bool,
}

impl StateRequest {
    pub fn new(action: &str, timeout: u64) -> Self {
        StateRequest {
            action: action.to_string(),
            timeout,
            force: false,
        }
    }
}

/// Request body for `POST /1.0/certificates` when using trust-password
/// authentication.
#[derive(Debug, Serialize)]
pub struct TrustRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub password: String,
}

impl TrustRequest {
    pub fn with_password(password: &str) -> Self {
        TrustRequest {
            kind: "client".to_string(),
            password: password.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exec_request_uses_lxd_field_names() {
        let request = ExecRequest::shell("echo hello && uname -r");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["command"], json!(["bash", "-c", "echo hello && uname -r"]));
        assert_eq!(value["record-output"], json!(true));
        assert_eq!(value["wait-for-websocket"], json!(false));
        assert_eq!(value["interactive"], json!(false));
        assert_eq!(value["environment"]["TERM"], json!("dumb"));
    }

    #[test]
    fn test_parse_async_exec_response() {
        let body = json!({
            "type": "async",
            "status": "Operation created",
            "status_code": 100,
            "operation": "/1.0/operations/33bb0e19",
            "metadata": {
                "id": "33bb0e19",
                "class": "task",
                "status": "Running",
            },
        });
        let envelope: Envelope<Operation> = serde_json::from_value(body).unwrap();
        assert_eq!(envelope.kind, "async");
        let operation = envelope.metadata.unwrap();
        assert_eq!(operation.id, "33bb0e19");
        assert_eq!(operation.status, "Running");
    }

    #[test]
    fn test_parse_finished_operation_with_recorded_output() {
        let body = json!({
            "type": "sync",
            "metadata": {
                "id": "33bb0e19",
                "status": "Success",
                "metadata": {
                    "return": 2,
                    "output": {
                        "1": "/1.0/instances/rdk/logs/exec_33bb0e19.stdout",
                        "2": "/1.0/instances/rdk/logs/exec_33bb0e19.stderr",
                    },
                },
            },
        });
        let envelope: Envelope<Operation> = serde_json::from_value(body).unwrap();
        let operation = envelope.metadata.unwrap();
        assert_eq!(operation.status, "Success");
        let result = operation.metadata.unwrap();
        assert_eq!(result.exit_code, 2);
        assert_eq!(
            result.output["1"],
            "/1.0/instances/rdk/logs/exec_33bb0e19.stdout"
        );
    }

    #[test]
    fn test_parse_failed_operation() {
        let body = json!({
            "type": "sync",
            "metadata": {
                "id": "33bb0e19",
                "status": "Failure",
                "err": "Command not found",
            },
        });
        let envelope: Envelope<Operation> = serde_json::from_value(body).unwrap();
        let operation = envelope.metadata.unwrap();
        assert_eq!(operation.status, "Failure");
        assert_eq!(operation.err, "Command not found");
        assert!(operation.metadata.is_none());
    }

    #[test]
    fn test_parse_error_envelope() {
        let body = json!({
            "type": "error",
            "error": "not authorized",
            "error_code": 403,
        });
        let envelope: Envelope<Operation> = serde_json::from_value(body).unwrap();
        assert_eq!(envelope.kind, "error");
        assert_eq!(envelope.error, "not authorized");
        assert_eq!(envelope.error_code, 403);
        assert!(envelope.metadata.is_none());
    }
}
