//! A minimal Raspberry Pi gateway device class.
//!
//! The smallest useful device built on `consolers`: one console resolved
//! through the [`ConnectionRegistry`], a boot sequence that clears the
//! initial output, and shell command execution. Serves as the template for
//! writing richer device classes such as `rdk-cpe`.

#![warn(missing_docs)]

use std::time::Duration;

use tracing::info;

use consolers::{ConnectionParams, ConnectionRegistry, ConsoleError, ManagedConsole};

/// A Raspberry Pi gateway reachable over a single shell console.
///
/// # Example
///
/// ```
/// use consolers::{ConnectionParams, ConnectionRegistry};
/// use rpi_cpe::RpiCpeDevice;
///
/// let registry = ConnectionRegistry::new();
/// let params = ConnectionParams::from_value(serde_json::json!({
///     "connection_type": "ser2net",
///     "ip_addr": "10.64.38.15",
///     "port": 4000,
/// }))
/// .unwrap();
/// let mut device = RpiCpeDevice::new("rpi.console", params);
/// // device.boot(&registry) connects and logs in; needs a live console.
/// # let _ = (&registry, &mut device);
/// ```
pub struct RpiCpeDevice {
    name: String,
    params: ConnectionParams,
    console: Option<Box<dyn ManagedConsole>>,
}

impl RpiCpeDevice {
    /// Create the device from its inventory descriptor. No connection is
    /// made until [`RpiCpeDevice::boot`].
    pub fn new(name: &str, params: ConnectionParams) -> Self {
        RpiCpeDevice {
            name: name.to_string(),
            params,
            console: None,
        }
    }

    /// Connect the console, log in, and clear any initial output so the
    /// first command starts from a clean prompt.
    pub fn boot(&mut self, registry: &ConnectionRegistry) -> Result<(), ConsoleError> {
        let mut console = registry.resolve_from(&self.name, &self.params)?;
        console.login_to_server()?;
        console.sendline("")?;
        console.expect_prompt(self.params.timeout())?;
        info!(device = %self.name, "device console ready");
        self.console = Some(console);
        Ok(())
    }

    /// Run a shell command on the device and return its output.
    pub fn command(&mut self, command: &str) -> Result<String, ConsoleError> {
        let timeout = self.params.timeout();
        self.command_with_timeout(command, timeout)
    }

    /// Like [`RpiCpeDevice::command`] with an explicit timeout.
    pub fn command_with_timeout(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ConsoleError> {
        self.console_mut()?.execute_command(command, timeout)
    }

    /// Output consumed by the most recent command.
    pub fn before(&self) -> &str {
        self.console
            .as_ref()
            .map(|c| c.before())
            .unwrap_or_default()
    }

    /// Exit code of the most recent command.
    pub fn last_exit_code(&self) -> i64 {
        self.console
            .as_ref()
            .map(|c| c.last_exit_code())
            .unwrap_or_default()
    }

    /// Close the console. Idempotent; a device that never booted is a no-op.
    pub fn close(&mut self) -> Result<(), ConsoleError> {
        if let Some(console) = &mut self.console {
            console.close()?;
        }
        Ok(())
    }

    fn console_mut(&mut self) -> Result<&mut Box<dyn ManagedConsole>, ConsoleError> {
        self.console
            .as_mut()
            .ok_or_else(|| ConsoleError::DeviceConnection {
                reason: format!("device {} has not booted yet", self.name),
            })
    }
}
