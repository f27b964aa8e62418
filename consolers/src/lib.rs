//! ConsoleRs: console sessions for network-device test fixtures.
//!
//! The consoleRs library provides the console contract that device test
//! fixtures program against. It consists of three pieces:
//!
//! - The [`CommandBridge`] trait: executes a single command against a remote
//!   execution endpoint and captures combined output plus exit status.
//! - The [`ConsoleSession`] emulator: replays the synchronous expect/send
//!   console protocol (pattern matching against buffered output, prompt
//!   detection, timeouts) on top of any bridge, so transports without a real
//!   PTY still satisfy the console contract device classes expect.
//! - The [`ConnectionRegistry`]: an explicit mapping from connection-type tag
//!   to constructor, seeded with the built-in transports and extended by
//!   transport crates such as `lxd-console`. Unknown tags delegate to an
//!   optional fallback resolver, so a host framework's existing factory keeps
//!   working unchanged.
//!
//! # Currently implemented transports
//! - TCP (blocking) for ser2net-exported serial consoles, see [`TcpBridge`].
//! - LXD REST API, provided by the `lxd-console` crate.
//!
//! # Testing your own device
//!
//! The [`LoopbackBridge`] lets you script the exact commands your device
//! driver is expected to send and the replies it receives, without any
//! hardware or containers. All device crates in this repository are tested
//! this way.
//!
//! # Concurrency model
//!
//! Everything is single-threaded, synchronous, and blocking. A session is not
//! safe for concurrent use from multiple callers; the calling test framework
//! serializes access per device fixture. One command turn must complete
//! (output consumed by `expect`) before the next is issued.

#![warn(missing_docs)]

mod loopback;
mod params;
mod registry;
mod session;
mod tcp;

pub use loopback::LoopbackBridge;
pub use params::{ConnectionParams, DEFAULT_SHELL_PROMPT, require};
pub use registry::{ConnectionRegistry, Connector};
pub use session::{ConsoleSession, ExpectOutcome, ManagedConsole, SessionState};
pub use tcp::TcpBridge;

use std::time::Duration;

use thiserror::Error;

/// The error enum for all console operations.
///
/// Transports and device drivers return this error type everywhere so that
/// failures propagate cleanly with the `?` operator. The core performs no
/// recovery or retry on its own: every variant is surfaced to the caller
/// unmodified, and retry policy, if any, belongs to the calling device class.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConsoleError {
    /// The remote execution endpoint could not be reached at the transport
    /// level (connection refused, DNS failure, TLS handshake failure).
    #[error("Endpoint {endpoint} is unreachable: {reason}")]
    Unreachable {
        /// The endpoint that could not be reached.
        endpoint: String,
        /// The underlying transport failure.
        reason: String,
    },
    /// The remote endpoint rejected the supplied credential material.
    #[error("Endpoint {endpoint} rejected authentication: {reason}")]
    Unauthorized {
        /// The endpoint that rejected the credentials.
        endpoint: String,
        /// The rejection detail reported by the endpoint.
        reason: String,
    },
    /// A command did not complete within the configured timeout. The remote
    /// command may continue running; only the client gives up waiting.
    #[error("Command `{command}` timed out after {timeout:?}")]
    CommandTimeout {
        /// The command that timed out.
        command: String,
        /// The timeout that was exceeded.
        timeout: Duration,
        /// Whatever output had been captured before the timeout. An empty
        /// string is valid.
        partial_output: String,
    },
    /// Establishing the console connection failed. A failed connection
    /// attempt aborts the device's boot sequence.
    #[error("Failed to connect to device console: {reason}")]
    DeviceConnection {
        /// Why the connection attempt failed.
        reason: String,
    },
    /// `expect` reached the end of the buffered output without any of the
    /// supplied patterns matching.
    #[error("No pattern out of {patterns:?} matched the buffered output: {buffer:?}")]
    PatternMismatch {
        /// The patterns that were tried, in priority order.
        patterns: Vec<String>,
        /// The buffered output none of the patterns matched.
        buffer: String,
    },
    /// A new command was issued while the previous turn's output had not yet
    /// been consumed by a completed `expect`. A console session never
    /// interleaves two outstanding commands.
    #[error("Session {session} already has a command turn in progress")]
    TurnInProgress {
        /// The session on which the second command was issued.
        session: String,
    },
    /// The registry has no entry for the requested connection type and no
    /// fallback resolver is installed.
    #[error("Unknown connection type: {0}")]
    UnknownConnectionType(String),
    /// A pattern handed to `expect` is not a valid regular expression.
    #[error("Invalid expect pattern `{pattern}`: {source}")]
    BadPattern {
        /// The offending pattern.
        pattern: String,
        /// The regex compilation error.
        source: regex::Error,
    },
    /// Error when reading from/writing to a transport. See
    /// [`std::io::Error`] for more details.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Output captured from a single remote command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Combined stdout/stderr text of the command.
    pub output: String,
    /// Exit status of the command. Transports that cannot observe exit codes
    /// (raw PTY streams) report 0.
    pub exit_code: i64,
}

/// The `CommandBridge` trait defines the single-command execution contract a
/// transport must satisfy.
///
/// A bridge sends one command to the remote execution endpoint bound to its
/// target and blocks until the remote call completes or the given timeout
/// elapses. The [`ConsoleSession`] emulator turns any bridge into a full
/// expect/send console.
///
/// Timeouts are wall-clock and per call. On expiry the bridge fails with
/// [`ConsoleError::CommandTimeout`] carrying the partial output, if any was
/// captured; the remote command is not killed. Transport-level failures
/// distinguish [`ConsoleError::Unreachable`] from
/// [`ConsoleError::Unauthorized`] so callers can decide whether a retry makes
/// sense.
pub trait CommandBridge {
    /// Establish the connection to the remote endpoint and confirm the target
    /// is reachable with a no-op round trip.
    ///
    /// Returns any initial output (greeting banner) the target produced. The
    /// underlying client is reused across all subsequent `execute` calls to
    /// the same target.
    fn connect(&mut self) -> Result<String, ConsoleError>;

    /// Execute a single command and capture its combined output and exit
    /// status. Blocks until the remote call completes or `timeout` elapses.
    fn execute(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput, ConsoleError>;

    /// Tear down the connection. Calling this twice is not an error.
    fn disconnect(&mut self) -> Result<(), ConsoleError> {
        Ok(())
    }

    /// The endpoint this bridge talks to, for error reporting and logging.
    fn endpoint(&self) -> &str;
}
