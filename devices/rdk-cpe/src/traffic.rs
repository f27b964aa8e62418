//! iperf traffic generation helpers.
//!
//! Starts an iperf/iperf3 server or client in the background on the device
//! and recovers its PID from the process listing. `ps` output differs
//! between BusyBox and procps, so the PID column is detected from the header
//! instead of assumed.

use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use consolers::{ConsoleError, ManagedConsole};

const TRAFFIC_TIMEOUT: Duration = Duration::from_secs(30);

/// A traffic-helper failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TrafficError {
    /// The iperf process did not show up in the process listing.
    #[error("unable to start {program} for port {port}")]
    StartFailed {
        /// `iperf` or `iperf3`.
        program: String,
        /// The traffic port the process was started for.
        port: u16,
    },
    /// A matching process line was found but held no parsable PID.
    #[error("no PID in process line: {line:?}")]
    PidNotFound {
        /// The process line that could not be parsed.
        line: String,
    },
    /// Running a shell command failed.
    #[error(transparent)]
    Console(#[from] ConsoleError),
}

/// A started background traffic process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrafficProcess {
    /// PID of the iperf process on the device.
    pub pid: u32,
    /// Path of the log file the process writes to.
    pub log_file: String,
}

/// Start an iperf3 server (iperf 2 when `udp_only`, which has no server-side
/// UDP flag in iperf3) listening on `traffic_port`.
pub fn start_traffic_receiver(
    console: &mut dyn ManagedConsole,
    traffic_port: u16,
    bind_to_ip: Option<&str>,
    udp_only: bool,
) -> Result<TrafficProcess, TrafficError> {
    let log_file = "/tmp/iperf_server_logs.txt".to_string();
    let bind = bind_to_ip.map(|ip| format!(" -B {ip}")).unwrap_or_default();
    let (program, launch) = if udp_only {
        (
            "iperf",
            format!("iperf -s -p {traffic_port}{bind} -u > {log_file} 2>&1 &"),
        )
    } else {
        (
            "iperf3",
            format!("iperf3 -s -p {traffic_port}{bind} > {log_file} 2>&1 &"),
        )
    };
    console.execute_command(&launch, TRAFFIC_TIMEOUT)?;
    let pid = find_background_pid(console, program, &format!(" -p {traffic_port}"))?
        .ok_or_else(|| TrafficError::StartFailed {
            program: program.to_string(),
            port: traffic_port,
        })?;
    Ok(TrafficProcess { pid, log_file })
}

/// Start an iperf3 client (iperf 2 when `udp_only`) sending traffic to
/// `host:traffic_port` for `time_secs` seconds.
pub fn start_traffic_sender(
    console: &mut dyn ManagedConsole,
    host: &str,
    traffic_port: u16,
    bandwidth_mbps: Option<u32>,
    time_secs: u32,
    udp_only: bool,
) -> Result<TrafficProcess, TrafficError> {
    let log_file = "/tmp/iperf_client_logs.txt".to_string();
    let bandwidth = bandwidth_mbps
        .map(|b| format!(" -b {b}m"))
        .unwrap_or_default();
    let (program, launch) = if udp_only {
        (
            "iperf",
            format!(
                "iperf -c {host} -p {traffic_port}{bandwidth} -t {time_secs} -u > {log_file} 2>&1 &"
            ),
        )
    } else {
        (
            "iperf3",
            format!(
                "iperf3 -c {host} -p {traffic_port}{bandwidth} -t {time_secs} > {log_file} 2>&1 &"
            ),
        )
    };
    console.execute_command(&launch, TRAFFIC_TIMEOUT)?;
    let pid = find_background_pid(
        console,
        program,
        &format!(" -c {host} -p {traffic_port}"),
    )?
    .ok_or_else(|| TrafficError::StartFailed {
        program: program.to_string(),
        port: traffic_port,
    })?;
    Ok(TrafficProcess { pid, log_file })
}

/// Locate the PID of a just-launched background process.
///
/// Reads the `ps` header once to detect the PID column, then greps the
/// listing for the program and picks the line matching `needle`.
fn find_background_pid(
    console: &mut dyn ManagedConsole,
    program: &str,
    needle: &str,
) -> Result<Option<u32>, TrafficError> {
    let header = console.execute_command("ps aux | head -n 1", TRAFFIC_TIMEOUT)?;
    let column = pid_column(&header);
    let listing = console.execute_command(
        &format!("sleep 2; ps auxwwww | grep {program} | grep -v grep"),
        TRAFFIC_TIMEOUT,
    )?;
    debug!(%program, column, "searching process listing");
    if !listing.contains(program) || listing.contains("Exit 1") {
        return Ok(None);
    }
    let Some(line) = listing.lines().find(|line| line.contains(needle)) else {
        return Ok(None);
    };
    pid_at_column(line, column).map(Some)
}

/// Index of the PID column in a `ps` header line.
///
/// procps prints `USER PID %CPU ...`, BusyBox prints `PID USER TIME
/// COMMAND`. Falls back to column 1 when no `PID` header is present.
pub fn pid_column(header: &str) -> usize {
    header
        .split_whitespace()
        .position(|column| column == "PID")
        .unwrap_or(1)
}

/// Parse the PID out of one process line given the detected column.
pub fn pid_at_column(line: &str, column: usize) -> Result<u32, TrafficError> {
    line.split_whitespace()
        .nth(column)
        .and_then(|field| field.parse().ok())
        .ok_or_else(|| TrafficError::PidNotFound {
            line: line.to_string(),
        })
}
