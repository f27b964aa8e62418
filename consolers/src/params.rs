//! Connection parameters as consumed from device inventory descriptors.
//!
//! Inventory files hand every device an opaque JSON map. The fields below are
//! the ones the built-in transports understand; anything else is kept in
//! `extra` untouched. There is no eager schema validation: a missing key only
//! fails at the first use that requires it.

use std::time::Duration;

use serde::Deserialize;

use crate::ConsoleError;

/// Shell prompt assumed when a descriptor does not configure one.
pub const DEFAULT_SHELL_PROMPT: &str = "root@RaspberryPi-Gateway";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Parameters for constructing a console connection.
///
/// Immutable once constructed; supplied by external configuration. Which
/// fields are required depends on the transport: ser2net needs `ip_addr` and
/// `port`, the LXD transport needs `lxd_endpoint` and `container_name`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectionParams {
    /// Connection-type tag resolved through the registry.
    pub connection_type: Option<String>,
    /// Host address of a ser2net console server.
    pub ip_addr: Option<String>,
    /// Port of a ser2net console server.
    pub port: Option<u16>,
    /// LXD REST API endpoint, e.g. `https://127.0.0.1:8443`.
    pub lxd_endpoint: Option<String>,
    /// Name of the target LXD container.
    pub container_name: Option<String>,
    /// Literal shell prompt of the target, without trailing `#`/`$`.
    pub shell_prompt: Option<String>,
    /// Path to a PEM client certificate for the LXD endpoint.
    pub cert_file: Option<String>,
    /// Path to the PEM private key belonging to `cert_file`.
    pub key_file: Option<String>,
    /// LXD trust password, used when no client certificate is configured.
    pub trust_password: Option<String>,
    /// When set, a console transcript is appended to this file.
    pub save_console_logs: Option<String>,
    /// Per-call default timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Descriptor keys this crate does not interpret, preserved for device
    /// classes.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ConnectionParams {
    /// Deserialize parameters from an opaque descriptor map.
    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// The configured shell prompt, or [`DEFAULT_SHELL_PROMPT`].
    pub fn prompt(&self) -> &str {
        self.shell_prompt.as_deref().unwrap_or(DEFAULT_SHELL_PROMPT)
    }

    /// The configured default timeout, or 30 seconds.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }
}

/// Extract a required parameter, failing with a descriptive
/// [`ConsoleError::DeviceConnection`] when it is absent.
pub fn require<'a, T>(field: &str, value: &'a Option<T>) -> Result<&'a T, ConsoleError> {
    value.as_ref().ok_or_else(|| ConsoleError::DeviceConnection {
        reason: format!("missing required connection parameter `{field}`"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_keeps_unknown_keys() {
        let params = ConnectionParams::from_value(json!({
            "connection_type": "lxd",
            "lxd_endpoint": "https://127.0.0.1:8443",
            "container_name": "rdk-container",
            "oui": "001122",
        }))
        .unwrap();
        assert_eq!(params.connection_type.as_deref(), Some("lxd"));
        assert_eq!(params.container_name.as_deref(), Some("rdk-container"));
        assert_eq!(params.extra["oui"], json!("001122"));
    }

    #[test]
    fn test_defaults() {
        let params = ConnectionParams::default();
        assert_eq!(params.prompt(), DEFAULT_SHELL_PROMPT);
        assert_eq!(params.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_require_missing_key_fails_at_first_use() {
        let params = ConnectionParams::default();
        let err = require("ip_addr", &params.ip_addr).unwrap_err();
        assert!(err.to_string().contains("ip_addr"));
    }
}
