//! TR-181 parameter access through the `dmcli` command-line client.
//!
//! RDK-B exposes its data model via `dmcli eRT`, whose human-oriented output
//! looks like:
//!
//! ```text
//! CR component name is: eRT.com.cisco.spvtg.ccsp.CR
//! subsystem_prefix eRT.
//! getv from/to component(eRT.com.cisco.spvtg.ccsp.pam): Device.DeviceInfo.SerialNumber
//! Execution succeed.
//! Parameter    1 name: Device.DeviceInfo.SerialNumber
//!                type:     string,    value: 100000000001
//! ```
//!
//! This module turns that text into typed results. Nothing here interprets
//! TR-181 semantics; it is output parsing only.

use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use consolers::{ConsoleError, ManagedConsole};

const DEFAULT_DMCLI_TIMEOUT: Duration = Duration::from_secs(30);

/// A dmcli failure, separate from transport failures.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DmcliError {
    /// dmcli ran but reported failure (`Execution fail`, missing component).
    #[error("dmcli reported failure: {reason}")]
    ExecutionFailed {
        /// The failure line dmcli printed.
        reason: String,
    },
    /// dmcli output matched neither the success nor the failure shape.
    #[error("could not parse dmcli output: {output:?}")]
    MalformedOutput {
        /// The raw output that could not be parsed.
        output: String,
    },
    /// Running the dmcli command itself failed.
    #[error(transparent)]
    Console(#[from] ConsoleError),
}

/// One parsed dmcli result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmcliResponse {
    /// Status line, `Execution succeed` on success.
    pub status: String,
    /// TR-181 type of the returned parameter (`string`, `bool`, ...). Empty
    /// for operations that return no parameter, such as `setv`.
    pub rtype: String,
    /// Returned parameter value. Empty when `rtype` is empty.
    pub rval: String,
}

/// dmcli client over any console.
///
/// Borrows the console for the duration of a call sequence; the single-turn
/// invariant of the underlying session is untouched because every operation
/// is one complete `execute_command` round trip.
pub struct Dmcli<'a> {
    console: &'a mut dyn ManagedConsole,
    timeout: Duration,
}

impl<'a> Dmcli<'a> {
    /// Wrap a console with the default 30 second dmcli timeout.
    pub fn new(console: &'a mut dyn ManagedConsole) -> Self {
        Dmcli {
            console,
            timeout: DEFAULT_DMCLI_TIMEOUT,
        }
    }

    /// Override the per-operation timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get a parameter value (`getv`).
    pub fn gpv(&mut self, path: &str) -> Result<DmcliResponse, DmcliError> {
        self.run(&format!("dmcli eRT getv {path}"))
    }

    /// Set a parameter value (`setv`).
    pub fn spv(&mut self, path: &str, value: &str, rtype: &str) -> Result<DmcliResponse, DmcliError> {
        self.run(&format!("dmcli eRT setv {path} {rtype} \"{value}\""))
    }

    /// Add a table object (`addtable`), returning the new instance status.
    pub fn add_object(&mut self, path: &str) -> Result<DmcliResponse, DmcliError> {
        self.run(&format!("dmcli eRT addtable {path}"))
    }

    /// Delete a table object (`deltable`).
    pub fn del_object(&mut self, path: &str) -> Result<DmcliResponse, DmcliError> {
        self.run(&format!("dmcli eRT deltable {path}"))
    }

    fn run(&mut self, command: &str) -> Result<DmcliResponse, DmcliError> {
        debug!(%command, "dmcli");
        let output = self.console.execute_command(command, self.timeout)?;
        parse_response(&output)
    }
}

/// Parse one dmcli invocation's output into a [`DmcliResponse`].
pub fn parse_response(output: &str) -> Result<DmcliResponse, DmcliError> {
    for line in output.lines() {
        let line = line.trim();
        if line.contains("Execution fail") || line.contains("Can't find destination component") {
            return Err(DmcliError::ExecutionFailed {
                reason: line.to_string(),
            });
        }
    }
    if !output.contains("Execution succeed") {
        return Err(DmcliError::MalformedOutput {
            output: output.to_string(),
        });
    }
    let (rtype, rval) = match value_line_regex().captures(output) {
        Some(caps) => (caps[1].to_string(), caps[2].trim().to_string()),
        None => (String::new(), String::new()),
    };
    Ok(DmcliResponse {
        status: "Execution succeed".to_string(),
        rtype,
        rval,
    })
}

/// Parse a multi-parameter `getv` output into `(path, value)` pairs.
///
/// Values are coerced the way test fixtures expect them: `true`/`false`
/// become booleans, digit strings become integers, an empty value becomes
/// null, everything else stays a string.
pub fn parse_parameters(output: &str) -> Vec<(String, Value)> {
    let name_re = name_line_regex();
    let value_re = value_line_regex();
    let lines: Vec<&str> = output.lines().collect();
    let mut parameters = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        let Some(name_caps) = name_re.captures(line) else {
            continue;
        };
        let path = name_caps[1].trim().to_string();
        let Some(value_caps) = lines.get(i + 1).and_then(|next| value_re.captures(next)) else {
            continue;
        };
        parameters.push((path, coerce(value_caps[2].trim())));
    }
    parameters
}

fn coerce(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    match raw.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = raw.parse::<i64>() {
        if raw.chars().all(|c| c.is_ascii_digit()) {
            return Value::from(n);
        }
    }
    Value::from(raw)
}

fn name_line_regex() -> Regex {
    // The shapes are fixed dmcli output; the patterns cannot fail to compile.
    Regex::new(r"Parameter\s+\d+\s+name:\s+(.+)").unwrap()
}

fn value_line_regex() -> Regex {
    Regex::new(r"type:\s+(\w+),\s+value:\s*(.*)").unwrap()
}
