//! RDK-B gateway device class built on `consolers`.
//!
//! The device splits into a hardware and a software side, composed by
//! explicit delegation instead of inheritance:
//!
//! - [`HardwareControl`] ([`RdkCpeHw`]): console wiring through the
//!   [`ConnectionRegistry`], board identity (MAC, serial), power control.
//! - [`SoftwareControl`] ([`RdkCpeSw`]): versions, interfaces, TR-181
//!   derived values, management-server configuration. Software methods take
//!   the hardware explicitly, making the delegation visible at every call
//!   site.
//! - [`RdkCpeDevice`]: the facade the test harness drives, with `boot`,
//!   `skip_boot`, `shutdown`, and `command`.
//!
//! TR-181 access goes through the [`dmcli`] client; traffic generation
//! through the [`traffic`] helpers.

#![warn(missing_docs)]

pub mod dmcli;
mod hardware;
mod software;
pub mod traffic;

pub use hardware::RdkCpeHw;
pub use software::RdkCpeSw;

use std::{net::Ipv4Addr, time::Duration};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

use consolers::{ConnectionParams, ConnectionRegistry, ConsoleError, ManagedConsole};

use crate::dmcli::DmcliError;

/// The error enum for RDK device operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RdkError {
    /// A console operation failed.
    #[error(transparent)]
    Console(#[from] ConsoleError),
    /// A dmcli operation failed.
    #[error(transparent)]
    Dmcli(#[from] DmcliError),
    /// `ifconfig` output held no MTU for the interface.
    #[error("no MTU found in `ifconfig {interface}` output")]
    MtuUnavailable {
        /// The interface that was queried.
        interface: String,
    },
}

/// The hardware contract of a CPE: console management, board identity, and
/// power control.
pub trait HardwareControl {
    /// The inventory descriptor this hardware was configured from.
    fn config(&self) -> &ConnectionParams;

    /// MAC address of the WAN interface.
    fn mac_address(&mut self) -> String;

    /// Board serial number.
    fn serial_number(&mut self) -> String;

    /// WAN interface name.
    fn wan_iface(&self) -> String;

    /// Prompt patterns of the board shell.
    fn shell_prompt(&self) -> Vec<String>;

    /// Connect and log in the device console.
    fn connect_to_consoles(
        &mut self,
        device_name: &str,
        registry: &ConnectionRegistry,
    ) -> Result<(), ConsoleError>;

    /// Close the device console. Idempotent.
    fn disconnect_from_consoles(&mut self) -> Result<(), ConsoleError>;

    /// The connected console, or an error when not connected.
    fn console_mut(&mut self) -> Result<&mut dyn ManagedConsole, ConsoleError>;

    /// Reboot the board and reconnect the console.
    fn power_cycle(&mut self, registry: &ConnectionRegistry) -> Result<(), ConsoleError>;

    /// Wait for the board hardware to be up (WAN interface present).
    fn wait_for_hw_boot(&mut self) -> Result<(), ConsoleError>;
}

/// The software contract of a CPE. Every method takes the hardware it
/// operates through.
pub trait SoftwareControl<H: HardwareControl> {
    /// Software image version.
    fn version(&mut self, hw: &mut H) -> Result<String, RdkError>;

    /// E-Router (WAN) interface name.
    fn erouter_iface(&self, hw: &H) -> String;

    /// LAN bridge interface name.
    fn lan_iface(&self, hw: &H) -> String;

    /// Guest network interface name.
    fn guest_iface(&self) -> String;

    /// Device-specific values as a JSON map.
    fn json_values(&mut self, hw: &mut H) -> Result<Map<String, Value>, RdkError>;

    /// TR-069 CPE ID (`OUI-serial`).
    fn cpe_id(&mut self, hw: &mut H) -> String;

    /// TR-069 CPE identifier, identical to [`SoftwareControl::cpe_id`].
    fn tr69_cpe_id(&mut self, hw: &mut H) -> String;

    /// LAN gateway IPv4 address.
    fn lan_gateway_ipv4(&mut self, hw: &mut H) -> Ipv4Addr;

    /// Factory reset the device.
    fn factory_reset(&mut self, hw: &mut H, registry: &ConnectionRegistry)
    -> Result<(), RdkError>;

    /// Reboot the device.
    fn reset(&mut self, hw: &mut H, registry: &ConnectionRegistry) -> Result<(), RdkError>;

    /// Whether the WAN interface is online.
    fn is_online(&mut self, hw: &mut H) -> Result<bool, RdkError>;

    /// Wait for the device to come online, bounded.
    fn wait_device_online(&mut self, hw: &mut H) -> Result<(), RdkError>;

    /// Configure the TR-069 management server and restart the CWMP client.
    fn configure_management_server(
        &mut self,
        hw: &mut H,
        url: &str,
        username: &str,
        password: Option<&str>,
    ) -> Result<(), RdkError>;

    /// Provisioning mode of the E-Router (`ipv4`, `ipv6`, `dualstack`).
    fn get_provision_mode(&self, hw: &H) -> String;

    /// MTU of an interface in bytes.
    fn get_interface_mtu_size(&mut self, hw: &mut H, interface: &str) -> Result<u32, RdkError>;
}

/// The RDK gateway device as driven by the test harness.
///
/// # Example
///
/// ```no_run
/// use consolers::{ConnectionParams, ConnectionRegistry};
/// use rdk_cpe::RdkCpeDevice;
///
/// let registry = ConnectionRegistry::new();
/// let params = ConnectionParams::from_value(serde_json::json!({
///     "connection_type": "ser2net",
///     "ip_addr": "10.64.38.15",
///     "port": 4000,
///     "shell_prompt": "root@RaspberryPi-Gateway",
/// }))
/// .unwrap();
///
/// let mut device = RdkCpeDevice::new("board", params);
/// device.boot(&registry).unwrap();
/// let output = device.command("uname -a").unwrap();
/// device.shutdown().unwrap();
/// # let _ = output;
/// ```
pub struct RdkCpeDevice {
    name: String,
    hw: RdkCpeHw,
    sw: RdkCpeSw,
}

impl RdkCpeDevice {
    /// Create the device from its inventory descriptor.
    pub fn new(name: &str, params: ConnectionParams) -> Self {
        RdkCpeDevice {
            name: name.to_string(),
            hw: RdkCpeHw::new(params),
            sw: RdkCpeSw::new(),
        }
    }

    /// Boot the device: connect the console, wait for the hardware and for
    /// the WAN side to come online, and log the CPE ID.
    pub fn boot(&mut self, registry: &ConnectionRegistry) -> Result<(), RdkError> {
        let RdkCpeDevice { name, hw, sw } = self;
        info!(device = %name, "booting device");
        hw.connect_to_consoles(name, registry)?;
        hw.wait_for_hw_boot()?;
        sw.wait_device_online(hw)?;
        info!("TR069 CPE ID: {}", sw.cpe_id(hw));
        Ok(())
    }

    /// Attach to an already-running device: connect the console only.
    pub fn skip_boot(&mut self, registry: &ConnectionRegistry) -> Result<(), RdkError> {
        info!(device = %self.name, "initializing device with skip-boot");
        self.hw.connect_to_consoles(&self.name, registry)?;
        Ok(())
    }

    /// Shut the device down from the harness point of view: close consoles.
    pub fn shutdown(&mut self) -> Result<(), RdkError> {
        info!(device = %self.name, "shutting down device");
        self.hw.disconnect_from_consoles()?;
        Ok(())
    }

    /// Run a shell command on the device console.
    pub fn command(&mut self, command: &str) -> Result<String, RdkError> {
        self.command_with_timeout(command, self.hw.config().timeout())
    }

    /// Like [`RdkCpeDevice::command`] with an explicit timeout.
    pub fn command_with_timeout(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<String, RdkError> {
        Ok(self.hw.console_mut()?.execute_command(command, timeout)?)
    }

    /// The hardware side of the device.
    pub fn hw(&mut self) -> &mut RdkCpeHw {
        &mut self.hw
    }

    /// Both sides of the device, for software operations that delegate to
    /// the hardware.
    pub fn parts(&mut self) -> (&mut RdkCpeSw, &mut RdkCpeHw) {
        (&mut self.sw, &mut self.hw)
    }
}
