//! The software side of the RDK gateway: versions, interfaces, TR-181
//! derived values, and lifecycle operations that go through the shell.

use std::{net::Ipv4Addr, thread, time::Duration};

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::{
    HardwareControl, RdkError, SoftwareControl,
    dmcli::{Dmcli, parse_parameters},
};

use consolers::ConnectionRegistry;

const DEFAULT_LAN_IFACE: &str = "br0";
const GUEST_IFACE: &str = "br-guest";
const DEFAULT_LAN_GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 101, 1);
const DEFAULT_OUI: &str = "001122";
const DEFAULT_CPE_ID: &str = "001122-000000000000";
const DEFAULT_PROVISION_MODE: &str = "ipv4";

const ONLINE_ATTEMPTS: u32 = 5;
const ONLINE_RETRY_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_CWMP_TOGGLE_WAIT: Duration = Duration::from_secs(2);

/// RDK gateway software. Holds no console of its own; every operation
/// delegates to the hardware it is handed.
pub struct RdkCpeSw {
    cpe_id: Option<String>,
}

impl RdkCpeSw {
    /// Create the software object. The CPE ID is computed lazily and cached.
    pub fn new() -> Self {
        RdkCpeSw { cpe_id: None }
    }

    fn config_str<'a, H: HardwareControl>(hw: &'a H, key: &str) -> Option<&'a str> {
        hw.config().extra.get(key).and_then(|v| v.as_str())
    }

    fn cwmp_toggle_wait<H: HardwareControl>(hw: &H) -> Duration {
        hw.config()
            .extra
            .get("cwmp_toggle_wait_secs")
            .and_then(|v| v.as_u64())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CWMP_TOGGLE_WAIT)
    }
}

impl Default for RdkCpeSw {
    fn default() -> Self {
        RdkCpeSw::new()
    }
}

impl<H: HardwareControl> SoftwareControl<H> for RdkCpeSw {
    /// Software version from `/version.txt`, falling back to the kernel
    /// release when the image carries no version file.
    fn version(&mut self, hw: &mut H) -> Result<String, RdkError> {
        let timeout = hw.config().timeout();
        let console = hw.console_mut()?;
        let version = console.execute_command("cat /version.txt", timeout)?;
        let version = version.trim();
        if !version.is_empty() && !version.contains("No such file") {
            return Ok(version.to_string());
        }
        let release = console.execute_command("uname -r", timeout)?;
        Ok(release.trim().to_string())
    }

    fn erouter_iface(&self, hw: &H) -> String {
        hw.wan_iface()
    }

    fn lan_iface(&self, hw: &H) -> String {
        Self::config_str(hw, "lan_interface")
            .unwrap_or(DEFAULT_LAN_IFACE)
            .to_string()
    }

    fn guest_iface(&self) -> String {
        GUEST_IFACE.to_string()
    }

    /// Device-specific values derived from TR-181 parameters.
    ///
    /// Keys are the last two segments of each parameter path. When dmcli is
    /// unavailable the map falls back to plain system information
    /// (`hostname`, `kernel`, `uptime`).
    fn json_values(&mut self, hw: &mut H) -> Result<Map<String, Value>, RdkError> {
        let timeout = hw.config().timeout();
        let console = hw.console_mut()?;
        let mut values = Map::new();
        match console.execute_command("dmcli eRT getv Device.DeviceInfo.SerialNumber", timeout) {
            Ok(output) if output.contains("Execution succeed") => {
                for (path, value) in parse_parameters(&output) {
                    let segments: Vec<&str> = path.split('.').collect();
                    let key = if segments.len() > 2 {
                        segments[segments.len() - 2..].join(".")
                    } else {
                        path.clone()
                    };
                    values.insert(key, value);
                }
                return Ok(values);
            }
            Ok(_) => warn!("dmcli returned no usable device info, falling back"),
            Err(e) => warn!("Failed to get dmcli device info, falling back: {e}"),
        }
        let short = Duration::from_secs(5);
        let hostname = console.execute_command("hostname", short)?;
        values.insert("hostname".to_string(), Value::from(hostname.trim()));
        let kernel = console.execute_command("uname -r", short)?;
        values.insert("kernel".to_string(), Value::from(kernel.trim()));
        let uptime = console.execute_command("uptime", short)?;
        values.insert("uptime".to_string(), Value::from(uptime.trim()));
        Ok(values)
    }

    /// TR-069 CPE ID: `OUI-serial`, cached after the first read. Falls back
    /// to the `cpe_id` descriptor key when the serial cannot be read.
    fn cpe_id(&mut self, hw: &mut H) -> String {
        if let Some(cpe_id) = &self.cpe_id {
            return cpe_id.clone();
        }
        let serial = hw.serial_number();
        let cpe_id = if serial.trim().is_empty() {
            Self::config_str(hw, "cpe_id")
                .unwrap_or(DEFAULT_CPE_ID)
                .to_string()
        } else {
            let oui = Self::config_str(hw, "oui").unwrap_or(DEFAULT_OUI);
            format!("{oui}-{serial}")
        };
        self.cpe_id = Some(cpe_id.clone());
        cpe_id
    }

    fn tr69_cpe_id(&mut self, hw: &mut H) -> String {
        self.cpe_id(hw)
    }

    /// LAN gateway address from `ifconfig` (`inet addr:` with a modern
    /// `inet x.x.x.x/` fallback), defaulting to 192.168.101.1.
    fn lan_gateway_ipv4(&mut self, hw: &mut H) -> Ipv4Addr {
        let lan_iface = self.lan_iface(hw);
        let output = match hw
            .console_mut()
            .and_then(|c| c.execute_command(&format!("ifconfig {lan_iface}"), Duration::from_secs(10)))
        {
            Ok(output) => output,
            Err(e) => {
                warn!("Error getting LAN IP, using default: {e}");
                return DEFAULT_LAN_GATEWAY;
            }
        };
        for pattern in [
            r"inet addr:(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})",
            r"inet (\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})/",
        ] {
            // Fixed patterns, cannot fail to compile.
            let re = Regex::new(pattern).unwrap();
            if let Some(caps) = re.captures(&output) {
                if let Ok(addr) = caps[1].parse() {
                    return addr;
                }
            }
        }
        warn!("No IP found in ifconfig output, using default");
        DEFAULT_LAN_GATEWAY
    }

    /// Wipe `/nvram` and reboot, the standard RDK factory reset.
    fn factory_reset(
        &mut self,
        hw: &mut H,
        registry: &ConnectionRegistry,
    ) -> Result<(), RdkError> {
        let timeout = hw.config().timeout();
        hw.console_mut()?.execute_command("rm -rf /nvram/*", timeout)?;
        hw.console_mut()?.execute_command("sync", timeout)?;
        self.reset(hw, registry)
    }

    fn reset(&mut self, hw: &mut H, registry: &ConnectionRegistry) -> Result<(), RdkError> {
        hw.power_cycle(registry)?;
        Ok(())
    }

    /// Whether the WAN interface holds an address.
    fn is_online(&mut self, hw: &mut H) -> Result<bool, RdkError> {
        let wan_iface = hw.wan_iface();
        let output = hw
            .console_mut()?
            .execute_command(&format!("ip a show {wan_iface}"), Duration::from_secs(10))?;
        Ok(output.contains("inet "))
    }

    /// Wait for the WAN interface to come online. Bounded retries; warns and
    /// continues when the device never reports online.
    fn wait_device_online(&mut self, hw: &mut H) -> Result<(), RdkError> {
        for attempt in 1..=ONLINE_ATTEMPTS {
            match self.is_online(hw) {
                Ok(true) => {
                    info!("Device is online");
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => warn!("Attempt {attempt}: error checking online status: {e}"),
            }
            if attempt < ONLINE_ATTEMPTS {
                thread::sleep(ONLINE_RETRY_DELAY);
            }
        }
        warn!("Device may not be fully online, continuing");
        Ok(())
    }

    /// Point the CWMP client at a management server and bounce it.
    ///
    /// Sets the URL and credentials over dmcli, then toggles `EnableCWMP`
    /// off and on so the client picks up the new configuration.
    fn configure_management_server(
        &mut self,
        hw: &mut H,
        url: &str,
        username: &str,
        password: Option<&str>,
    ) -> Result<(), RdkError> {
        let toggle_wait = Self::cwmp_toggle_wait(hw);
        let console = hw.console_mut()?;
        let mut dmcli = Dmcli::new(console);
        dmcli.spv("Device.ManagementServer.URL", url, "string")?;
        dmcli.spv("Device.ManagementServer.Username", username, "string")?;
        if let Some(password) = password {
            dmcli.spv("Device.ManagementServer.Password", password, "string")?;
        }
        dmcli.spv("Device.ManagementServer.EnableCWMP", "false", "bool")?;
        thread::sleep(toggle_wait);
        dmcli.spv("Device.ManagementServer.EnableCWMP", "true", "bool")?;
        Ok(())
    }

    fn get_provision_mode(&self, hw: &H) -> String {
        Self::config_str(hw, "eRouter_Provisioning_mode")
            .unwrap_or(DEFAULT_PROVISION_MODE)
            .to_string()
    }

    /// MTU of an interface in bytes, parsed from `ifconfig` (both the
    /// `MTU:1500` and the `mtu 1500` output shapes).
    fn get_interface_mtu_size(&mut self, hw: &mut H, interface: &str) -> Result<u32, RdkError> {
        let timeout = hw.config().timeout();
        let output = hw
            .console_mut()?
            .execute_command(&format!("ifconfig {interface}"), timeout)?;
        // Fixed pattern, cannot fail to compile.
        let re = Regex::new(r"(?i)mtu[: ](\d+)").unwrap();
        if let Some(caps) = re.captures(&output) {
            if let Ok(mtu) = caps[1].parse() {
                return Ok(mtu);
            }
        }
        Err(RdkError::MtuUnavailable {
            interface: interface.to_string(),
        })
    }
}
