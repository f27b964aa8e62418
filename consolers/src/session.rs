//! The expect-protocol emulator on top of a [`CommandBridge`].
//!
//! A [`ConsoleSession`] presents the same synchronous console contract that a
//! PTY-backed console presents — `login_to_server`, pattern-based `expect`,
//! `sendline` — without a real PTY. Since a bridge turn is one complete
//! request/response, the session maintains its own output buffer: each turn
//! appends the command echo, the captured output, and a synthetic shell
//! prompt, exactly the text a PTY would have streamed. Prompt-matching
//! `expect` calls then behave as they would against real console output.

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    time::Duration,
};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::{CommandBridge, ConnectionParams, ConsoleError, ExecOutput};

/// Lifecycle state of a console session.
///
/// Transitions are `Unconnected → Connecting → Ready → Closed`. A session
/// moves to `Closed` on explicit close or on a failed connection attempt;
/// there is no automatic reconnection, callers decide retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection attempt has been made yet.
    Unconnected,
    /// `login_to_server` is in flight.
    Connecting,
    /// The session is logged in and can execute commands.
    Ready,
    /// The session is closed and can no longer be used.
    Closed,
}

/// Result of one pattern-match attempt against the buffered output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectOutcome {
    /// A pattern matched the buffer.
    Matched {
        /// Index of the first matching pattern in the supplied list.
        pattern_index: usize,
        /// Text preceding the match, removed from the buffer.
        consumed: String,
    },
    /// The buffer holds no output to match against.
    Timeout,
    /// The buffer holds output, but none of the patterns matched it.
    EndOfStream,
}

/// The object-safe console contract device classes program against.
///
/// Implemented by [`ConsoleSession`] over any bridge; devices hold a
/// `Box<dyn ManagedConsole>` resolved through the
/// [`ConnectionRegistry`](crate::ConnectionRegistry) so they stay independent
/// of the physical transport.
pub trait ManagedConsole {
    /// Log in to the remote target. See [`ConsoleSession::login_to_server`].
    fn login_to_server(&mut self) -> Result<(), ConsoleError>;

    /// Send one command line. See [`ConsoleSession::sendline`].
    fn sendline(&mut self, line: &str) -> Result<(), ConsoleError>;

    /// Match patterns against buffered output. See [`ConsoleSession::expect`].
    fn expect(&mut self, patterns: &[&str], timeout: Duration) -> Result<usize, ConsoleError>;

    /// Wait for the shell prompt, completing the current turn.
    fn expect_prompt(&mut self, timeout: Duration) -> Result<usize, ConsoleError>;

    /// Run a command to completion and return its output.
    /// See [`ConsoleSession::run`].
    fn execute_command(&mut self, command: &str, timeout: Duration)
    -> Result<String, ConsoleError>;

    /// Output consumed by the most recent successful `expect`.
    fn before(&self) -> &str;

    /// Exit code of the most recent completed command.
    fn last_exit_code(&self) -> i64;

    /// The prompt patterns this session matches command completion with.
    fn shell_prompt(&self) -> Vec<String>;

    /// Current lifecycle state.
    fn state(&self) -> SessionState;

    /// Close the session. Idempotent.
    fn close(&mut self) -> Result<(), ConsoleError>;
}

impl std::fmt::Debug for dyn ManagedConsole + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConsole")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Append-only on-disk transcript of a console session.
///
/// Write failures are reported once per write and never fail the session:
/// losing a transcript line must not abort a device turn mid-test.
struct Transcript {
    file: File,
}

impl Transcript {
    fn open(path: &Path) -> Result<Self, ConsoleError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Transcript { file })
    }

    fn record(&mut self, text: &str) {
        if let Err(e) = writeln!(self.file, "{text}") {
            warn!("Failed to write console transcript line: {e}");
        }
    }
}

/// A logical console to one managed device, independent of the transport.
///
/// The session owns its buffering state (the unconsumed output tail) and a
/// monotonically increasing sequence of send/expect turns. It never
/// interleaves two outstanding commands: command N's output must be consumed
/// by a completed `expect` before command N+1 may be issued, because the
/// underlying bridge is a single synchronous request/response per turn.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use consolers::{ConsoleSession, LoopbackBridge};
///
/// let bridge = LoopbackBridge::new(vec!["uname -a"], vec!["Linux gateway 6.6.0"]);
/// let mut session = ConsoleSession::new("board.console", bridge, "root@gateway");
/// session.login_to_server().unwrap();
///
/// let output = session
///     .run("uname -a", Duration::from_secs(5))
///     .unwrap();
/// assert!(output.contains("Linux"));
/// session.close().unwrap();
/// ```
pub struct ConsoleSession<B: CommandBridge> {
    name: String,
    bridge: B,
    prompt_text: String,
    prompt_patterns: Vec<String>,
    state: SessionState,
    buffer: String,
    before: String,
    pending: bool,
    turns: u64,
    last_exit_code: i64,
    default_timeout: Duration,
    transcript: Option<Transcript>,
}

impl<B: CommandBridge> ConsoleSession<B> {
    /// Create a new session over the given bridge.
    ///
    /// `prompt` is the literal shell prompt of the target without the
    /// trailing `#`/`$`. The default per-call timeout is 30 seconds.
    ///
    /// # Arguments
    /// * `name` - Connection name used in logs and errors.
    /// * `bridge` - The transport this session drives.
    /// * `prompt` - Literal shell prompt of the target.
    pub fn new(name: &str, bridge: B, prompt: &str) -> Self {
        let escaped = regex::escape(prompt);
        ConsoleSession {
            name: name.to_string(),
            bridge,
            prompt_text: format!("{prompt}# "),
            // Escaped prompt with root/user suffix alternates, plus the
            // BusyBox rescue prompt.
            prompt_patterns: vec![
                format!("{escaped}.*#\\s*"),
                format!("{escaped}.*\\$\\s*"),
                "/ #".to_string(),
            ],
            state: SessionState::Unconnected,
            buffer: String::new(),
            before: String::new(),
            pending: false,
            turns: 0,
            last_exit_code: 0,
            default_timeout: Duration::from_secs(30),
            transcript: None,
        }
    }

    /// Create a session configured from a connection descriptor: prompt,
    /// default timeout, and transcript file are all taken from `params`.
    pub fn from_params(
        name: &str,
        bridge: B,
        params: &ConnectionParams,
    ) -> Result<Self, ConsoleError> {
        let mut session = ConsoleSession::new(name, bridge, params.prompt());
        session.default_timeout = params.timeout();
        if let Some(path) = &params.save_console_logs {
            session.transcript = Some(Transcript::open(Path::new(path))?);
        }
        Ok(session)
    }

    /// Override the default per-call timeout.
    pub fn set_default_timeout(&mut self, timeout: Duration) {
        self.default_timeout = timeout;
    }

    /// Confirm the target is reachable and move the session to `Ready`.
    ///
    /// Performs the bridge's initial no-op round trip. Any banner the target
    /// produces is placed in the buffer; the next turn appends a fresh
    /// prompt, so a device's usual clear-initial-output sequence
    /// (`sendline("")` then prompt `expect`) consumes the banner. On failure
    /// the session is closed and a [`ConsoleError::DeviceConnection`] is
    /// returned.
    pub fn login_to_server(&mut self) -> Result<(), ConsoleError> {
        if self.state == SessionState::Ready {
            return Ok(());
        }
        self.state = SessionState::Connecting;
        match self.bridge.connect() {
            Ok(banner) => {
                info!(session = %self.name, endpoint = %self.bridge.endpoint(), "console connected");
                self.buffer.push_str(&banner);
                self.state = SessionState::Ready;
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Closed;
                Err(ConsoleError::DeviceConnection {
                    reason: format!("{} via {}: {e}", self.name, self.bridge.endpoint()),
                })
            }
        }
    }

    /// Send one command line, starting a new turn.
    ///
    /// Returns [`ConsoleError::TurnInProgress`] when the previous turn's
    /// output has not been consumed by a completed `expect` yet. An empty
    /// line is a bare newline round trip: no remote command runs, the buffer
    /// just gains a fresh prompt.
    pub fn sendline(&mut self, line: &str) -> Result<(), ConsoleError> {
        self.sendline_with_timeout(line, self.default_timeout)
    }

    /// Like [`ConsoleSession::sendline`] with an explicit timeout.
    pub fn sendline_with_timeout(
        &mut self,
        line: &str,
        timeout: Duration,
    ) -> Result<(), ConsoleError> {
        self.ensure_ready()?;
        if self.pending {
            return Err(ConsoleError::TurnInProgress {
                session: self.name.clone(),
            });
        }
        let line = line.trim();
        self.turns += 1;
        if let Some(t) = &mut self.transcript {
            t.record(&format!("> {line}"));
        }
        if line.is_empty() {
            self.buffer.push('\n');
            self.push_prompt();
            self.pending = true;
            return Ok(());
        }
        debug!(session = %self.name, turn = self.turns, command = %line, "sendline");
        let out = self.bridge.execute(line, timeout)?;
        if let Some(t) = &mut self.transcript {
            t.record(&out.output);
        }
        self.last_exit_code = out.exit_code;
        // Reproduce what a PTY would have streamed: command echo, output,
        // then the prompt.
        self.buffer.push_str(line);
        self.buffer.push('\n');
        self.buffer.push_str(&out.output);
        if !self.buffer.ends_with('\n') {
            self.buffer.push('\n');
        }
        self.push_prompt();
        self.pending = true;
        Ok(())
    }

    /// Match the given patterns, in priority order, against the full
    /// accumulated buffer.
    ///
    /// The lowest-indexed matching pattern wins even when several match.
    /// Matching is performed against the whole buffer, never line-by-line,
    /// so interleaved command echo and prompt text cannot break a match.
    /// The consumed text (everything before the match) becomes
    /// [`ConsoleSession::before`]; the tail after the match stays buffered.
    ///
    /// The empty pattern `""` is the "no output yet" sentinel: it matches any
    /// buffer, including an empty one, and can be given a low priority slot
    /// to turn an empty buffer into a normal return instead of an error.
    ///
    /// # Errors
    /// - [`ConsoleError::CommandTimeout`] when the buffer holds no output.
    /// - [`ConsoleError::PatternMismatch`] when output is present but no
    ///   pattern matches it.
    pub fn expect(&mut self, patterns: &[&str], timeout: Duration) -> Result<usize, ConsoleError> {
        match self.poll_expect(patterns)? {
            ExpectOutcome::Matched { pattern_index, .. } => Ok(pattern_index),
            ExpectOutcome::Timeout => Err(ConsoleError::CommandTimeout {
                command: String::new(),
                timeout,
                partial_output: String::new(),
            }),
            ExpectOutcome::EndOfStream => Err(ConsoleError::PatternMismatch {
                patterns: patterns.iter().map(|p| p.to_string()).collect(),
                buffer: self.buffer.clone(),
            }),
        }
    }

    /// One pattern-match attempt, reported as an [`ExpectOutcome`] instead of
    /// an error. [`ConsoleSession::expect`] is a thin wrapper over this.
    pub fn poll_expect(&mut self, patterns: &[&str]) -> Result<ExpectOutcome, ConsoleError> {
        for (i, pattern) in patterns.iter().enumerate() {
            let re = Regex::new(pattern).map_err(|source| ConsoleError::BadPattern {
                pattern: (*pattern).to_string(),
                source,
            })?;
            if let Some(m) = re.find(&self.buffer) {
                let consumed: String = self.buffer[..m.start()].to_string();
                self.buffer.drain(..m.end());
                self.before = consumed.clone();
                self.pending = false;
                debug!(session = %self.name, pattern_index = i, "expect matched");
                return Ok(ExpectOutcome::Matched {
                    pattern_index: i,
                    consumed,
                });
            }
        }
        if self.buffer.is_empty() {
            Ok(ExpectOutcome::Timeout)
        } else {
            Ok(ExpectOutcome::EndOfStream)
        }
    }

    /// Wait for the shell prompt, completing the current turn.
    pub fn expect_prompt(&mut self, timeout: Duration) -> Result<usize, ConsoleError> {
        let prompts = self.prompt_patterns.clone();
        let refs: Vec<&str> = prompts.iter().map(String::as_str).collect();
        self.expect(&refs, timeout)
    }

    /// Run a command to completion: send it, wait for the prompt, and return
    /// the output with the command echo stripped.
    pub fn run(&mut self, command: &str, timeout: Duration) -> Result<String, ConsoleError> {
        self.sendline_with_timeout(command, timeout)?;
        self.expect_prompt(timeout)?;
        let output = match self.before.strip_prefix(command) {
            Some(rest) => rest.trim_start_matches('\n'),
            None => self.before.as_str(),
        };
        Ok(output.to_string())
    }

    /// Execute a command directly against the bridge, bypassing the buffer,
    /// and return the full [`ExecOutput`] including the exit code.
    ///
    /// The single-turn invariant still holds: this is rejected while a
    /// previous turn is unconsumed, and it completes its own turn.
    pub fn execute(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput, ConsoleError> {
        self.ensure_ready()?;
        if self.pending {
            return Err(ConsoleError::TurnInProgress {
                session: self.name.clone(),
            });
        }
        self.turns += 1;
        debug!(session = %self.name, turn = self.turns, command = %command, "execute");
        let out = self.bridge.execute(command, timeout)?;
        if let Some(t) = &mut self.transcript {
            t.record(&format!("> {command}"));
            t.record(&out.output);
        }
        self.last_exit_code = out.exit_code;
        self.before = out.output.clone();
        Ok(out)
    }

    /// Output consumed by the most recent successful `expect`.
    pub fn before(&self) -> &str {
        &self.before
    }

    /// Exit code of the most recent completed command.
    pub fn last_exit_code(&self) -> i64 {
        self.last_exit_code
    }

    /// Number of send/expect turns issued on this session so far.
    pub fn turns(&self) -> u64 {
        self.turns
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The prompt patterns this session considers a completed command.
    pub fn prompt_patterns(&self) -> &[String] {
        &self.prompt_patterns
    }

    /// Close the session and tear down the bridge. Idempotent.
    pub fn close(&mut self) -> Result<(), ConsoleError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;
        info!(session = %self.name, "console closed");
        self.bridge.disconnect()
    }

    fn ensure_ready(&self) -> Result<(), ConsoleError> {
        if self.state != SessionState::Ready {
            return Err(ConsoleError::DeviceConnection {
                reason: format!("session {} is {:?}, not ready", self.name, self.state),
            });
        }
        Ok(())
    }

    fn push_prompt(&mut self) {
        self.buffer.push_str(&self.prompt_text);
    }
}

impl<B: CommandBridge> ManagedConsole for ConsoleSession<B> {
    fn login_to_server(&mut self) -> Result<(), ConsoleError> {
        ConsoleSession::login_to_server(self)
    }

    fn sendline(&mut self, line: &str) -> Result<(), ConsoleError> {
        ConsoleSession::sendline(self, line)
    }

    fn expect(&mut self, patterns: &[&str], timeout: Duration) -> Result<usize, ConsoleError> {
        ConsoleSession::expect(self, patterns, timeout)
    }

    fn expect_prompt(&mut self, timeout: Duration) -> Result<usize, ConsoleError> {
        ConsoleSession::expect_prompt(self, timeout)
    }

    fn execute_command(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<String, ConsoleError> {
        ConsoleSession::run(self, command, timeout)
    }

    fn before(&self) -> &str {
        ConsoleSession::before(self)
    }

    fn last_exit_code(&self) -> i64 {
        ConsoleSession::last_exit_code(self)
    }

    fn shell_prompt(&self) -> Vec<String> {
        self.prompt_patterns.clone()
    }

    fn state(&self) -> SessionState {
        ConsoleSession::state(self)
    }

    fn close(&mut self) -> Result<(), ConsoleError> {
        ConsoleSession::close(self)
    }
}
