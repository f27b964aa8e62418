//! Device-level tests driving the RDK class over a scripted console.

use rstest::*;

use consolers::{ConnectionParams, ConnectionRegistry, ConsoleSession, LoopbackBridge};
use rdk_cpe::{
    HardwareControl, RdkCpeDevice, SoftwareControl,
    dmcli::Dmcli,
    traffic::start_traffic_receiver,
};

/// A registry whose `ser2net` entry replays the given exchange instead of
/// opening a TCP connection.
fn scripted_registry(
    from_host: Vec<&'static str>,
    from_target: Vec<&'static str>,
) -> ConnectionRegistry {
    let mut registry = ConnectionRegistry::empty();
    registry.register(
        "ser2net",
        Box::new(move |name, params| {
            let bridge = LoopbackBridge::new(from_host.clone(), from_target.clone());
            Ok(Box::new(ConsoleSession::from_params(name, bridge, params)?))
        }),
    );
    registry
}

#[fixture]
fn params() -> ConnectionParams {
    ConnectionParams::from_value(serde_json::json!({
        "connection_type": "ser2net",
        "shell_prompt": "root@RaspberryPi-Gateway",
        "oui": "44AAF5",
        "cwmp_toggle_wait_secs": 0,
    }))
    .unwrap()
}

#[rstest]
fn test_boot_sequence(params: ConnectionParams) {
    let registry = scripted_registry(
        vec![
            "ip a",
            "ip a show erouter0",
            "cat /proc/cpuinfo | grep Serial | awk '{print $3}'",
        ],
        vec![
            "1: lo: <LOOPBACK>\n2: erouter0: <BROADCAST,UP>\n",
            "2: erouter0: <BROADCAST,UP>\n    inet 10.1.1.2/24 scope global erouter0\n",
            "10000000abcdef01\n",
        ],
    );
    let mut device = RdkCpeDevice::new("board", params);
    device.boot(&registry).unwrap();
    let (sw, hw) = device.parts();
    assert_eq!(sw.cpe_id(hw), "44AAF5-10000000abcdef01");
    device.shutdown().unwrap();
}

#[rstest]
fn test_mac_address_from_hwaddr_output(params: ConnectionParams) {
    let registry = scripted_registry(
        vec!["ifconfig erouter0"],
        vec!["erouter0  Link encap:Ethernet  HWaddr DC:A6:32:0F:11:22\n"],
    );
    let mut device = RdkCpeDevice::new("board", params);
    device.skip_boot(&registry).unwrap();
    assert_eq!(device.hw().mac_address(), "dc:a6:32:0f:11:22");
    device.shutdown().unwrap();
}

#[rstest]
fn test_mac_address_from_ether_output(params: ConnectionParams) {
    let registry = scripted_registry(
        vec!["ifconfig erouter0"],
        vec!["erouter0: flags=4163<UP,BROADCAST>\n        ether dc:a6:32:0f:33:44  txqueuelen 1000\n"],
    );
    let mut device = RdkCpeDevice::new("board", params);
    device.skip_boot(&registry).unwrap();
    assert_eq!(device.hw().mac_address(), "dc:a6:32:0f:33:44");
    device.shutdown().unwrap();
}

#[rstest]
fn test_mac_address_without_console_uses_config() {
    let params = ConnectionParams::from_value(serde_json::json!({
        "mac": "aa:bb:cc:dd:ee:ff",
    }))
    .unwrap();
    let mut device = RdkCpeDevice::new("board", params);
    assert_eq!(device.hw().mac_address(), "aa:bb:cc:dd:ee:ff");
}

#[rstest]
fn test_version_falls_back_to_kernel_release(params: ConnectionParams) {
    let registry = scripted_registry(
        vec!["cat /version.txt", "uname -r"],
        vec!["cat: /version.txt: No such file or directory\n", "6.6.20+rpt-rpi-v8\n"],
    );
    let mut device = RdkCpeDevice::new("board", params);
    device.skip_boot(&registry).unwrap();
    let (sw, hw) = device.parts();
    assert_eq!(sw.version(hw).unwrap(), "6.6.20+rpt-rpi-v8");
    device.shutdown().unwrap();
}

#[rstest]
fn test_lan_gateway_ipv4_from_ifconfig(params: ConnectionParams) {
    let registry = scripted_registry(
        vec!["ifconfig br0"],
        vec!["br0       Link encap:Ethernet\n          inet addr:192.168.2.1  Bcast:192.168.2.255  Mask:255.255.255.0\n"],
    );
    let mut device = RdkCpeDevice::new("board", params);
    device.skip_boot(&registry).unwrap();
    let (sw, hw) = device.parts();
    assert_eq!(
        sw.lan_gateway_ipv4(hw),
        "192.168.2.1".parse::<std::net::Ipv4Addr>().unwrap()
    );
    device.shutdown().unwrap();
}

#[rstest]
fn test_lan_gateway_ipv4_defaults_when_absent(params: ConnectionParams) {
    let registry = scripted_registry(
        vec!["ifconfig br0"],
        vec!["br0: error fetching interface information: Device not found\n"],
    );
    let mut device = RdkCpeDevice::new("board", params);
    device.skip_boot(&registry).unwrap();
    let (sw, hw) = device.parts();
    assert_eq!(
        sw.lan_gateway_ipv4(hw),
        "192.168.101.1".parse::<std::net::Ipv4Addr>().unwrap()
    );
    device.shutdown().unwrap();
}

#[rstest]
fn test_interface_mtu_busybox_format(params: ConnectionParams) {
    let registry = scripted_registry(
        vec!["ifconfig erouter0"],
        vec!["erouter0  Link encap:Ethernet\n          UP BROADCAST RUNNING  MTU:1500  Metric:1\n"],
    );
    let mut device = RdkCpeDevice::new("board", params);
    device.skip_boot(&registry).unwrap();
    let (sw, hw) = device.parts();
    assert_eq!(sw.get_interface_mtu_size(hw, "erouter0").unwrap(), 1500);
    device.shutdown().unwrap();
}

#[rstest]
fn test_json_values_falls_back_to_system_info(params: ConnectionParams) {
    let registry = scripted_registry(
        vec![
            "dmcli eRT getv Device.DeviceInfo.SerialNumber",
            "hostname",
            "uname -r",
            "uptime",
        ],
        vec![
            "sh: dmcli: not found\n",
            "RaspberryPi-Gateway\n",
            "6.6.20\n",
            " 10:02:33 up 1 day,  3:44,  load average: 0.10, 0.12, 0.09\n",
        ],
    );
    let mut device = RdkCpeDevice::new("board", params);
    device.skip_boot(&registry).unwrap();
    let (sw, hw) = device.parts();
    let values = sw.json_values(hw).unwrap();
    assert_eq!(values["hostname"], "RaspberryPi-Gateway");
    assert_eq!(values["kernel"], "6.6.20");
    assert!(values["uptime"].as_str().unwrap().contains("load average"));
    device.shutdown().unwrap();
}

#[rstest]
fn test_json_values_from_dmcli(params: ConnectionParams) {
    let registry = scripted_registry(
        vec!["dmcli eRT getv Device.DeviceInfo.SerialNumber"],
        vec![
            "getv from/to component(eRT.com.cisco.spvtg.ccsp.pam): Device.DeviceInfo.SerialNumber\n\
             Execution succeed.\n\
             Parameter    1 name: Device.DeviceInfo.SerialNumber\n\
             \u{20}              type:     string,    value: 10000000abcdef01\n",
        ],
    );
    let mut device = RdkCpeDevice::new("board", params);
    device.skip_boot(&registry).unwrap();
    let (sw, hw) = device.parts();
    let values = sw.json_values(hw).unwrap();
    assert_eq!(values["DeviceInfo.SerialNumber"], "10000000abcdef01");
    device.shutdown().unwrap();
}

#[rstest]
fn test_configure_management_server_sequence(params: ConnectionParams) {
    let ok = "Execution succeed.\n";
    let registry = scripted_registry(
        vec![
            "dmcli eRT setv Device.ManagementServer.URL string \"http://acs.example.com:7547\"",
            "dmcli eRT setv Device.ManagementServer.Username string \"acs-user\"",
            "dmcli eRT setv Device.ManagementServer.EnableCWMP bool \"false\"",
            "dmcli eRT setv Device.ManagementServer.EnableCWMP bool \"true\"",
        ],
        vec![ok, ok, ok, ok],
    );
    let mut device = RdkCpeDevice::new("board", params);
    device.skip_boot(&registry).unwrap();
    let (sw, hw) = device.parts();
    sw.configure_management_server(hw, "http://acs.example.com:7547", "acs-user", None)
        .unwrap();
    device.shutdown().unwrap();
}

#[rstest]
fn test_dmcli_gpv_over_device_console(params: ConnectionParams) {
    let registry = scripted_registry(
        vec!["dmcli eRT getv Device.ManagementServer.EnableCWMP"],
        vec![
            "Execution succeed.\n\
             Parameter    1 name: Device.ManagementServer.EnableCWMP\n\
             \u{20}              type:     bool,    value: true\n",
        ],
    );
    let mut device = RdkCpeDevice::new("board", params);
    device.skip_boot(&registry).unwrap();
    let console = device.hw().console_mut().unwrap();
    let response = Dmcli::new(console)
        .gpv("Device.ManagementServer.EnableCWMP")
        .unwrap();
    assert_eq!(response.rtype, "bool");
    assert_eq!(response.rval, "true");
    device.shutdown().unwrap();
}

#[rstest]
fn test_start_traffic_receiver_detects_pid_column(params: ConnectionParams) {
    let registry = scripted_registry(
        vec![
            "iperf3 -s -p 5201 > /tmp/iperf_server_logs.txt 2>&1 &",
            "ps aux | head -n 1",
            "sleep 2; ps auxwwww | grep iperf3 | grep -v grep",
        ],
        vec![
            "",
            "USER         PID %CPU %MEM    VSZ   RSS TTY      STAT START   TIME COMMAND\n",
            "root       12345  0.0  0.1  10832  5204 ?        Ss   10:00   0:00 iperf3 -s -p 5201\n",
        ],
    );
    let mut device = RdkCpeDevice::new("board", params);
    device.skip_boot(&registry).unwrap();
    let console = device.hw().console_mut().unwrap();
    let process = start_traffic_receiver(console, 5201, None, false).unwrap();
    assert_eq!(process.pid, 12345);
    assert_eq!(process.log_file, "/tmp/iperf_server_logs.txt");
    device.shutdown().unwrap();
}

/// `reset` reboots the board and comes back with a freshly connected
/// console.
#[rstest]
fn test_reset_reconnects_console() {
    use std::{cell::RefCell, collections::VecDeque};

    let params = ConnectionParams::from_value(serde_json::json!({
        "connection_type": "ser2net",
        "shell_prompt": "root@RaspberryPi-Gateway",
        "boot_wait_secs": 0,
    }))
    .unwrap();

    // One script per connection: the first console sees the reboot, the
    // reconnected one serves the post-reset command.
    let scripts: RefCell<VecDeque<(Vec<&str>, Vec<&str>)>> = RefCell::new(VecDeque::from([
        (vec!["reboot"], vec![""]),
        (vec!["uname"], vec!["Linux\n"]),
    ]));
    let mut registry = ConnectionRegistry::empty();
    registry.register(
        "ser2net",
        Box::new(move |name, params| {
            let (from_host, from_target) = scripts
                .borrow_mut()
                .pop_front()
                .expect("more console connections than scripted");
            let bridge = LoopbackBridge::new(from_host, from_target);
            Ok(Box::new(ConsoleSession::from_params(name, bridge, params)?))
        }),
    );

    let mut device = RdkCpeDevice::new("board", params);
    device.skip_boot(&registry).unwrap();
    let (sw, hw) = device.parts();
    sw.reset(hw, &registry).unwrap();
    assert_eq!(device.command("uname").unwrap(), "Linux\n");
    device.shutdown().unwrap();
}

#[rstest]
fn test_provision_mode_defaults_to_ipv4(params: ConnectionParams) {
    let mut device = RdkCpeDevice::new("board", params);
    let (sw, hw) = device.parts();
    assert_eq!(sw.get_provision_mode(hw), "ipv4");
    assert_eq!(sw.erouter_iface(hw), "erouter0");
    assert_eq!(sw.lan_iface(hw), "br0");
    assert_eq!(SoftwareControl::<rdk_cpe::RdkCpeHw>::guest_iface(sw), "br-guest");
}
