//! The hardware side of the RDK gateway: console wiring, identity read from
//! the board, power control.

use std::{thread, time::Duration};

use regex::Regex;
use tracing::{info, warn};

use consolers::{ConnectionParams, ConnectionRegistry, ConsoleError, ManagedConsole};

use crate::HardwareControl;

const DEFAULT_MAC: &str = "00:00:00:00:00:00";
const DEFAULT_SERIAL: &str = "0000000000000000";
const DEFAULT_WAN_IFACE: &str = "erouter0";
const DEFAULT_BOOT_WAIT_SECS: u64 = 30;

const HW_BOOT_ATTEMPTS: u32 = 3;
const HW_BOOT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// RDK gateway hardware: owns the console and the inventory descriptor.
pub struct RdkCpeHw {
    params: ConnectionParams,
    console: Option<Box<dyn ManagedConsole>>,
}

impl RdkCpeHw {
    /// Create the hardware object from its inventory descriptor. No
    /// connection is made until
    /// [`connect_to_consoles`](HardwareControl::connect_to_consoles).
    pub fn new(params: ConnectionParams) -> Self {
        RdkCpeHw {
            params,
            console: None,
        }
    }

    fn config_str(&self, key: &str) -> Option<&str> {
        self.params.extra.get(key).and_then(|v| v.as_str())
    }

    fn config_u64(&self, key: &str) -> Option<u64> {
        self.params.extra.get(key).and_then(|v| v.as_u64())
    }

    /// Seconds to wait after a reboot before reconnecting. Descriptor key
    /// `boot_wait_secs`, default 30.
    fn boot_wait(&self) -> Duration {
        Duration::from_secs(
            self.config_u64("boot_wait_secs")
                .unwrap_or(DEFAULT_BOOT_WAIT_SECS),
        )
    }
}

impl HardwareControl for RdkCpeHw {
    fn config(&self) -> &ConnectionParams {
        &self.params
    }

    /// MAC address of the WAN interface, read from `ifconfig` (`HWaddr` with
    /// an `ether` fallback for modern output), falling back to the `mac`
    /// descriptor key.
    fn mac_address(&mut self) -> String {
        let wan_iface = self.wan_iface();
        if let Some(console) = self.console.as_deref_mut() {
            match console.execute_command(&format!("ifconfig {wan_iface}"), Duration::from_secs(5))
            {
                Ok(output) => {
                    for pattern in [
                        r"HWaddr\s+([0-9a-fA-F:]{17})",
                        r"ether\s+([0-9a-fA-F:]{17})",
                    ] {
                        // Fixed patterns, cannot fail to compile.
                        let re = Regex::new(pattern).unwrap();
                        if let Some(caps) = re.captures(&output) {
                            return caps[1].to_lowercase();
                        }
                    }
                }
                Err(e) => warn!("Failed to read MAC address, using default: {e}"),
            }
        }
        self.config_str("mac").unwrap_or(DEFAULT_MAC).to_string()
    }

    /// Board serial number from `/proc/cpuinfo`, falling back to the
    /// `serial` descriptor key.
    fn serial_number(&mut self) -> String {
        if let Some(console) = self.console.as_deref_mut() {
            match console.execute_command(
                "cat /proc/cpuinfo | grep Serial | awk '{print $3}'",
                Duration::from_secs(5),
            ) {
                Ok(output) if !output.trim().is_empty() => return output.trim().to_string(),
                Ok(_) => {}
                Err(e) => warn!("Failed to read serial number, using default: {e}"),
            }
        }
        self.config_str("serial")
            .unwrap_or(DEFAULT_SERIAL)
            .to_string()
    }

    fn wan_iface(&self) -> String {
        self.config_str("wan_interface")
            .unwrap_or(DEFAULT_WAN_IFACE)
            .to_string()
    }

    /// Prompt patterns for the board shell: the escaped configured prompt
    /// with `#`/`$` suffix alternates, plus the BusyBox rescue prompt.
    fn shell_prompt(&self) -> Vec<String> {
        if let Some(console) = &self.console {
            return console.shell_prompt();
        }
        let escaped = regex::escape(self.params.prompt());
        vec![
            format!("{escaped}.*#\\s*"),
            format!("{escaped}.*\\$\\s*"),
            "/ #".to_string(),
        ]
    }

    /// Resolve the console through the registry using the descriptor's
    /// `connection_type` (default `ser2net`), log in, and clear any initial
    /// output so the first command starts from a clean prompt.
    fn connect_to_consoles(
        &mut self,
        device_name: &str,
        registry: &ConnectionRegistry,
    ) -> Result<(), ConsoleError> {
        let connection_type = self
            .params
            .connection_type
            .as_deref()
            .unwrap_or("ser2net");
        let name = format!("{device_name}.console");
        let mut console = registry.resolve(connection_type, &name, &self.params)?;
        console.login_to_server()?;
        console.sendline("")?;
        console.expect_prompt(Duration::from_secs(5))?;
        self.console = Some(console);
        Ok(())
    }

    fn disconnect_from_consoles(&mut self) -> Result<(), ConsoleError> {
        if let Some(console) = &mut self.console {
            console.close()?;
        }
        self.console = None;
        Ok(())
    }

    fn console_mut(&mut self) -> Result<&mut dyn ManagedConsole, ConsoleError> {
        match self.console.as_deref_mut() {
            Some(console) => Ok(console),
            None => Err(ConsoleError::DeviceConnection {
                reason: "device console is not connected".to_string(),
            }),
        }
    }

    /// Reboot the board via the shell, wait for it to come back, and
    /// reconnect the console.
    fn power_cycle(&mut self, registry: &ConnectionRegistry) -> Result<(), ConsoleError> {
        let timeout = self.params.timeout();
        self.console_mut()?.execute_command("reboot", timeout)?;
        thread::sleep(self.boot_wait());
        self.disconnect_from_consoles()?;
        self.connect_to_consoles("board", registry)
    }

    /// Wait for the WAN interface to appear in `ip a`.
    ///
    /// Bounded retries; when the interface never shows up this warns and
    /// continues instead of failing, so that partially provisioned boards
    /// still come up far enough to debug.
    fn wait_for_hw_boot(&mut self) -> Result<(), ConsoleError> {
        let wan_iface = self.wan_iface();
        let console = self.console_mut()?;
        for attempt in 1..=HW_BOOT_ATTEMPTS {
            match console.execute_command("ip a", Duration::from_secs(10)) {
                Ok(output) if output.contains(&wan_iface) => {
                    info!("WAN interface {wan_iface} found");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => warn!("Attempt {attempt}: error checking interfaces: {e}"),
            }
            if attempt < HW_BOOT_ATTEMPTS {
                thread::sleep(HW_BOOT_RETRY_DELAY);
            }
        }
        warn!("WAN interface {wan_iface} may not be ready, continuing");
        Ok(())
    }
}
