//! LXD console transport for `consolers`.
//!
//! Runs device commands inside an LXD container through the LXD REST API
//! instead of a PTY. Every command becomes one `exec` operation: POST the
//! command, poll the background operation until it finishes, then fetch the
//! recorded stdout/stderr logs. Wrapped in a
//! [`ConsoleSession`], the container behaves like any other expect/send
//! console to the device classes on top.
//!
//! Authentication is either a PEM client certificate (`cert_file` plus
//! `key_file` in the descriptor) or the server trust password
//! (`trust_password`). LXD servers use self-signed certificates, so server
//! verification is disabled, matching `lxc`'s own remote handling.

#![warn(missing_docs)]

mod api;

use std::{collections::BTreeMap, thread, time::Duration, time::Instant};

use reqwest::{
    StatusCode,
    blocking::{Client, Response},
};
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use consolers::{
    CommandBridge, ConnectionParams, ConnectionRegistry, ConsoleError, ConsoleSession,
    ExecOutput, require,
};

/// Interval at which pending exec operations are polled.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Seconds LXD itself waits for a state-change action.
const STATE_CHANGE_SECS: u64 = 30;

/// A [`CommandBridge`] executing commands inside an LXD container.
///
/// The HTTP client is built once and reused for every request to the same
/// endpoint. `connect` makes sure the container exists and is running,
/// starting it when necessary, and confirms command execution with an echo
/// probe before the session layer takes over.
#[derive(Debug)]
pub struct LxdBridge {
    endpoint: String,
    container: String,
    client: Client,
    default_timeout: Duration,
    trust_password: Option<String>,
    has_identity: bool,
    trusted: bool,
}

impl LxdBridge {
    /// Build a bridge from descriptor parameters.
    ///
    /// Requires `lxd_endpoint` and `container_name`; reads the client
    /// certificate from `cert_file`/`key_file` when both are present. No
    /// network traffic happens here.
    pub fn from_params(params: &ConnectionParams) -> Result<Self, ConsoleError> {
        let endpoint = require("lxd_endpoint", &params.lxd_endpoint)?
            .trim_end_matches('/')
            .to_string();
        let container = require("container_name", &params.container_name)?.clone();
        let default_timeout = params.timeout();

        let mut builder = Client::builder()
            .timeout(default_timeout)
            .danger_accept_invalid_certs(true);
        let mut has_identity = false;
        if let (Some(cert_file), Some(key_file)) = (&params.cert_file, &params.key_file) {
            let mut pem = std::fs::read(cert_file)?;
            pem.extend(std::fs::read(key_file)?);
            let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
                ConsoleError::DeviceConnection {
                    reason: format!("invalid client certificate {cert_file}: {e}"),
                }
            })?;
            builder = builder.identity(identity);
            has_identity = true;
        }
        let client = builder
            .build()
            .map_err(|e| ConsoleError::DeviceConnection {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(LxdBridge {
            endpoint,
            container,
            client,
            default_timeout,
            trust_password: params.trust_password.clone(),
            has_identity,
            trusted: false,
        })
    }

    /// Register the `"lxd"` connection type on `registry`.
    ///
    /// Safe to call more than once; re-installing replaces the entry with an
    /// equivalent one.
    pub fn install(registry: &mut ConnectionRegistry) {
        registry.register(
            "lxd",
            Box::new(|name, params| {
                let bridge = LxdBridge::from_params(params)?;
                Ok(Box::new(ConsoleSession::from_params(name, bridge, params)?))
            }),
        );
    }

    /// Current LXD status string of the container, e.g. `Running`.
    pub fn status(&self) -> Result<String, ConsoleError> {
        let instance: api::Instance =
            self.get(&format!("1.0/instances/{}", self.container))?;
        Ok(instance.status)
    }

    /// Start the container and wait until it reports `Running`.
    pub fn start(&mut self) -> Result<(), ConsoleError> {
        self.change_state("start")?;
        self.wait_for_status("Running")
    }

    /// Cleanly stop the container and wait until it reports `Stopped`.
    pub fn stop(&mut self) -> Result<(), ConsoleError> {
        self.change_state("stop")?;
        self.wait_for_status("Stopped")
    }

    /// Restart the container and wait until it reports `Running` again.
    pub fn restart(&mut self) -> Result<(), ConsoleError> {
        self.change_state("restart")?;
        self.wait_for_status("Running")
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }

    fn transport_err(&self, e: reqwest::Error) -> ConsoleError {
        ConsoleError::Unreachable {
            endpoint: self.endpoint.clone(),
            reason: e.to_string(),
        }
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ConsoleError> {
        let response = self
            .client
            .get(self.url(path))
            .send()
            .map_err(|e| self.transport_err(e))?;
        self.unwrap_envelope(response)
    }

    fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ConsoleError> {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .send()
            .map_err(|e| self.transport_err(e))?;
        self.unwrap_envelope(response)
    }

    fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ConsoleError> {
        let response = self
            .client
            .put(self.url(path))
            .json(body)
            .send()
            .map_err(|e| self.transport_err(e))?;
        self.unwrap_envelope(response)
    }

    fn unwrap_envelope<T: DeserializeOwned>(
        &self,
        response: Response,
    ) -> Result<T, ConsoleError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ConsoleError::Unauthorized {
                endpoint: self.endpoint.clone(),
                reason: format!("HTTP {status}"),
            });
        }
        let envelope: api::Envelope<T> =
            response
                .json()
                .map_err(|e| ConsoleError::DeviceConnection {
                    reason: format!("invalid LXD response: {e}"),
                })?;
        if envelope.kind == "error" || !status.is_success() {
            let detail = if envelope.error.is_empty() {
                format!("HTTP {status}")
            } else {
                envelope.error
            };
            return Err(ConsoleError::DeviceConnection {
                reason: format!("LXD API error: {detail}"),
            });
        }
        envelope
            .metadata
            .ok_or_else(|| ConsoleError::DeviceConnection {
                reason: "LXD response is missing its metadata".to_string(),
            })
    }

    /// Make sure this client is trusted by the server.
    ///
    /// A server that already trusts us (or runs without authentication)
    /// answers the instance listing directly. Otherwise the trust password,
    /// when configured, registers our certificate with the server once.
    fn authenticate(&mut self) -> Result<(), ConsoleError> {
        if self.trusted {
            return Ok(());
        }
        let response = self
            .client
            .get(self.url("1.0/instances"))
            .send()
            .map_err(|e| self.transport_err(e))?;
        if response.status().is_success() {
            self.trusted = true;
            return Ok(());
        }
        let Some(password) = self.trust_password.clone() else {
            let reason = if self.has_identity {
                format!("client certificate rejected (HTTP {})", response.status())
            } else {
                "no client certificate or trust password configured".to_string()
            };
            return Err(ConsoleError::Unauthorized {
                endpoint: self.endpoint.clone(),
                reason,
            });
        };
        debug!(endpoint = %self.endpoint, "registering client certificate via trust password");
        let request = api::TrustRequest::with_password(&password);
        let response = self
            .client
            .post(self.url("1.0/certificates"))
            .json(&request)
            .send()
            .map_err(|e| self.transport_err(e))?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ConsoleError::Unauthorized {
                endpoint: self.endpoint.clone(),
                reason: "trust password rejected".to_string(),
            });
        }
        if !status.is_success() {
            return Err(ConsoleError::DeviceConnection {
                reason: format!("certificate registration failed: HTTP {status}"),
            });
        }
        self.trusted = true;
        Ok(())
    }

    fn change_state(&mut self, action: &str) -> Result<(), ConsoleError> {
        debug!(container = %self.container, %action, "changing container state");
        let request = api::StateRequest::new(action, STATE_CHANGE_SECS);
        let operation: api::Operation =
            self.put(&format!("1.0/instances/{}/state", self.container), &request)?;
        if operation.id.is_empty() {
            return Ok(());
        }
        let started = Instant::now();
        loop {
            let polled: api::Operation =
                self.get(&format!("1.0/operations/{}", operation.id))?;
            match polled.status.as_str() {
                "Success" => return Ok(()),
                "Failure" => {
                    return Err(ConsoleError::DeviceConnection {
                        reason: format!(
                            "failed to {action} container {}: {}",
                            self.container, polled.err
                        ),
                    });
                }
                _ => {}
            }
            if started.elapsed() >= self.default_timeout {
                return Err(ConsoleError::DeviceConnection {
                    reason: format!(
                        "timed out waiting for container {} to {action}",
                        self.container
                    ),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn wait_for_status(&self, wanted: &str) -> Result<(), ConsoleError> {
        let started = Instant::now();
        loop {
            let instance: api::Instance =
                self.get(&format!("1.0/instances/{}", self.container))?;
            if instance.status == wanted {
                return Ok(());
            }
            if started.elapsed() >= self.default_timeout {
                return Err(ConsoleError::DeviceConnection {
                    reason: format!(
                        "container {} did not reach {wanted} within {:?}",
                        self.container, self.default_timeout
                    ),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Fetch the recorded stdout/stderr of a finished operation.
    ///
    /// Prefers the log paths the operation recorded; older servers omit them,
    /// in which case the well-known per-operation log endpoints are tried.
    /// Fetching is best effort because log files are pruned eventually.
    fn collect_output(
        &self,
        operation_id: &str,
        recorded: &BTreeMap<String, String>,
    ) -> String {
        let stdout_path = recorded
            .get("1")
            .cloned()
            .unwrap_or_else(|| format!("/1.0/operations/{operation_id}/logs/stdout"));
        let stderr_path = recorded
            .get("2")
            .cloned()
            .unwrap_or_else(|| format!("/1.0/operations/{operation_id}/logs/stderr"));
        let mut output = self.fetch_text(&stdout_path).unwrap_or_default();
        if let Some(stderr) = self.fetch_text(&stderr_path) {
            if !stderr.is_empty() {
                if !output.is_empty() && !output.ends_with('\n') {
                    output.push('\n');
                }
                output.push_str("STDERR: ");
                output.push_str(&stderr);
            }
        }
        output
    }

    fn fetch_text(&self, path: &str) -> Option<String> {
        match self.client.get(self.url(path)).send() {
            Ok(response) if response.status().is_success() => response.text().ok(),
            Ok(response) => {
                debug!(%path, status = %response.status(), "no recorded output");
                None
            }
            Err(e) => {
                warn!(%path, error = %e, "fetching recorded output failed");
                None
            }
        }
    }
}

impl CommandBridge for LxdBridge {
    fn connect(&mut self) -> Result<String, ConsoleError> {
        self.authenticate()?;
        let instance: api::Instance =
            self.get(&format!("1.0/instances/{}", self.container))?;
        if instance.status != "Running" {
            debug!(container = %self.container, status = %instance.status, "starting container");
            self.start()?;
        }
        let probe = self.execute("echo console-ready", self.default_timeout)?;
        if !probe.output.contains("console-ready") {
            return Err(ConsoleError::DeviceConnection {
                reason: format!(
                    "container {} did not answer the readiness probe",
                    self.container
                ),
            });
        }
        // LXD exec has no login banner.
        Ok(String::new())
    }

    fn execute(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput, ConsoleError> {
        debug!(container = %self.container, %command, "exec");
        let request = api::ExecRequest::shell(command);
        let operation: api::Operation =
            self.post(&format!("1.0/instances/{}/exec", self.container), &request)?;
        if operation.id.is_empty() {
            return Err(ConsoleError::DeviceConnection {
                reason: "exec did not return an operation id".to_string(),
            });
        }
        let started = Instant::now();
        loop {
            let polled: api::Operation =
                self.get(&format!("1.0/operations/{}", operation.id))?;
            match polled.status.as_str() {
                "Success" => {
                    let result = polled.metadata.unwrap_or_default();
                    let output = self.collect_output(&operation.id, &result.output);
                    return Ok(ExecOutput {
                        output,
                        exit_code: result.exit_code,
                    });
                }
                "Failure" => {
                    return Err(ConsoleError::DeviceConnection {
                        reason: format!(
                            "command `{command}` failed on {}: {}",
                            self.container, polled.err
                        ),
                    });
                }
                _ => {}
            }
            if started.elapsed() >= timeout {
                // The remote command keeps running; only we stop waiting.
                let partial = self.collect_output(&operation.id, &BTreeMap::new());
                return Err(ConsoleError::CommandTimeout {
                    command: command.to_string(),
                    timeout,
                    partial_output: partial,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
