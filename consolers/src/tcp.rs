//! Blocking TCP transport for ser2net-exported serial consoles.
//!
//! ser2net exposes a device's serial console as a raw TCP socket. A command
//! turn on such a console is: write the command line, then read the byte
//! stream until the shell prompt appears again. Exit codes are not observable
//! on a raw PTY stream and are reported as 0.

use std::{
    io::{ErrorKind, Read, Write},
    net::{Shutdown, TcpStream},
    time::{Duration, Instant},
};

use regex::Regex;

use crate::{CommandBridge, ConnectionParams, ConsoleError, ExecOutput, require};

// Poll granularity for the read loop; the wall-clock timeout is enforced on
// top of this.
const READ_POLL: Duration = Duration::from_millis(100);

// How long the connect drain waits for a greeting banner.
const BANNER_TIMEOUT: Duration = Duration::from_secs(1);

/// A blocking ser2net console transport over [`std::net::TcpStream`].
#[derive(Debug)]
pub struct TcpBridge {
    addr: String,
    prompt: Regex,
    stream: Option<TcpStream>,
}

impl TcpBridge {
    /// Create a new TCP bridge for the given address.
    ///
    /// # Arguments
    /// * `addr` - `host:port` of the ser2net listener.
    /// * `prompt_pattern` - Regex that marks the end of a command's output.
    pub fn new(addr: &str, prompt_pattern: &str) -> Result<Self, ConsoleError> {
        let prompt = Regex::new(prompt_pattern).map_err(|source| ConsoleError::BadPattern {
            pattern: prompt_pattern.to_string(),
            source,
        })?;
        Ok(TcpBridge {
            addr: addr.to_string(),
            prompt,
            stream: None,
        })
    }

    /// Build a bridge from a connection descriptor (`ip_addr`, `port`,
    /// `shell_prompt`).
    pub fn from_params(params: &ConnectionParams) -> Result<Self, ConsoleError> {
        let ip_addr = require("ip_addr", &params.ip_addr)?;
        let port = require("port", &params.port)?;
        let pattern = format!("{}.*[#$]\\s*", regex::escape(params.prompt()));
        TcpBridge::new(&format!("{ip_addr}:{port}"), &pattern)
    }

    fn stream(&mut self) -> Result<&mut TcpStream, ConsoleError> {
        self.stream.as_mut().ok_or_else(|| ConsoleError::DeviceConnection {
            reason: format!("not connected to {}", self.addr),
        })
    }

    /// Read from the socket until the prompt matches the accumulated text or
    /// the timeout expires. Returns the text (prompt stripped when matched)
    /// and whether the prompt was seen.
    fn read_until_prompt(&mut self, timeout: Duration) -> Result<(String, bool), ConsoleError> {
        let prompt = self.prompt.clone();
        let stream = self.stream()?;
        let mut raw: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 256];

        let tic = Instant::now();
        while tic.elapsed() < timeout {
            match stream.read(&mut chunk) {
                Ok(0) => break, // remote closed the stream
                Ok(n) => {
                    raw.extend_from_slice(&chunk[..n]);
                    let text = String::from_utf8_lossy(&raw);
                    if let Some(m) = prompt.find(&text) {
                        let output = text[..m.start()].to_string();
                        return Ok((output, true));
                    }
                }
                Err(e)
                    if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => return Err(ConsoleError::Io(e)),
            }
        }
        Ok((String::from_utf8_lossy(&raw).into_owned(), false))
    }
}

impl CommandBridge for TcpBridge {
    fn connect(&mut self) -> Result<String, ConsoleError> {
        let stream = TcpStream::connect(&self.addr).map_err(|e| ConsoleError::Unreachable {
            endpoint: self.addr.clone(),
            reason: e.to_string(),
        })?;
        stream.set_read_timeout(Some(READ_POLL))?;
        stream.set_write_timeout(Some(READ_POLL))?;
        self.stream = Some(stream);
        // Drain whatever greeting the console prints; a quiet console is
        // fine, so a missing prompt here is not an error.
        let (banner, _) = self.read_until_prompt(BANNER_TIMEOUT)?;
        Ok(banner)
    }

    fn execute(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput, ConsoleError> {
        let line = format!("{command}\n");
        let stream = self.stream()?;
        stream.write_all(line.as_bytes())?;
        stream.flush()?;

        let (text, matched) = self.read_until_prompt(timeout)?;
        if !matched {
            return Err(ConsoleError::CommandTimeout {
                command: command.to_string(),
                timeout,
                partial_output: text,
            });
        }
        // Strip the command echo the PTY sends back.
        let output = match text.strip_prefix(command) {
            Some(rest) => rest.trim_start_matches(['\r', '\n']),
            None => text.as_str(),
        };
        Ok(ExecOutput {
            output: output.to_string(),
            exit_code: 0,
        })
    }

    fn disconnect(&mut self) -> Result<(), ConsoleError> {
        if let Some(stream) = self.stream.take() {
            // Best effort; the peer may already be gone.
            let _ = stream.shutdown(Shutdown::Both);
        }
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.addr
    }
}
