//! A scripted bridge for testing device drivers without a real target.
//!
//! The [`LoopbackBridge`] is given the exact commands the driver under test
//! is expected to execute and the replies the target would produce. Commands
//! are consumed in order; an unexpected command panics, and when the bridge
//! is dropped with scripted turns left over it panics as well. This way a
//! test asserts both that all commands were sent and that they were sent in
//! the correct order.

use crate::{CommandBridge, ConsoleError, ExecOutput};

use std::time::Duration;

/// A self-incrementing index structure that by default starts at 0 and
/// increments whenever `next` is called.
#[derive(Debug, Default)]
struct IncrIndex {
    index: usize,
}

impl IncrIndex {
    fn next(&mut self) -> usize {
        let current = self.index;
        self.index += 1;
        current
    }
}

#[derive(Debug, Clone)]
enum Mode {
    Scripted,
    Unreachable(String),
    TimingOut(String),
}

/// A bridge that replays a scripted command/reply exchange.
///
/// # Example
///
/// ```
/// use std::time::Duration;
///
/// use consolers::{CommandBridge, LoopbackBridge};
///
/// let mut bridge = LoopbackBridge::new(vec!["echo hello"], vec!["hello\n"]);
/// bridge.connect().unwrap();
/// let out = bridge.execute("echo hello", Duration::from_secs(1)).unwrap();
/// assert_eq!(out.output, "hello\n");
/// assert_eq!(out.exit_code, 0);
/// ```
pub struct LoopbackBridge {
    from_host: Vec<String>,
    from_target: Vec<String>,
    exit_codes: Vec<i64>,
    from_host_index: IncrIndex,
    from_target_index: IncrIndex,
    banner: String,
    mode: Mode,
}

impl LoopbackBridge {
    /// Create a new loopback bridge with the given commands to and replies
    /// from the target.
    ///
    /// # Arguments
    /// * `from_host` - Commands expected from the driver, in order.
    /// * `from_target` - Replies the target produces, in order.
    pub fn new<S: Into<String>, T: Into<String>>(
        from_host: Vec<S>,
        from_target: Vec<T>,
    ) -> Self {
        LoopbackBridge {
            from_host: from_host.into_iter().map(Into::into).collect(),
            from_target: from_target.into_iter().map(Into::into).collect(),
            exit_codes: Vec::new(),
            from_host_index: IncrIndex::default(),
            from_target_index: IncrIndex::default(),
            banner: String::new(),
            mode: Mode::Scripted,
        }
    }

    /// Script the greeting banner returned by `connect`.
    pub fn with_banner(mut self, banner: &str) -> Self {
        self.banner = banner.to_string();
        self
    }

    /// Script per-command exit codes, consumed in order. Commands beyond the
    /// end of the list report 0.
    pub fn with_exit_codes(mut self, exit_codes: Vec<i64>) -> Self {
        self.exit_codes = exit_codes;
        self
    }

    /// A bridge whose `connect` fails as if the endpoint were down.
    pub fn unreachable(endpoint: &str) -> Self {
        let mut bridge = LoopbackBridge::new(Vec::<String>::new(), Vec::<String>::new());
        bridge.mode = Mode::Unreachable(endpoint.to_string());
        bridge
    }

    /// A bridge whose every `execute` times out carrying `partial` as the
    /// partial output.
    pub fn timing_out(partial: &str) -> Self {
        let mut bridge = LoopbackBridge::new(Vec::<String>::new(), Vec::<String>::new());
        bridge.mode = Mode::TimingOut(partial.to_string());
        bridge
    }

    /// Panics if not all scripted turns have been used.
    ///
    /// Automatically called on drop, but can be called manually as well.
    pub fn finalize(&mut self) {
        if let Some(cmd) = self.from_host.get(self.from_host_index.next()) {
            panic!("Leftover expected commands found from host to target: {cmd}");
        }
        if let Some(reply) = self.from_target.get(self.from_target_index.next()) {
            panic!("Leftover scripted replies found from target to host: {reply}");
        }
    }

    fn next_expected_command(&mut self) -> &str {
        self.from_host
            .get(self.from_host_index.next())
            .expect("No more commands were expected from host to target.")
    }

    fn next_reply(&mut self) -> String {
        self.from_target
            .get(self.from_target_index.next())
            .expect("No more replies were scripted from target to host.")
            .clone()
    }
}

impl CommandBridge for LoopbackBridge {
    fn connect(&mut self) -> Result<String, ConsoleError> {
        match &self.mode {
            Mode::Unreachable(endpoint) => Err(ConsoleError::Unreachable {
                endpoint: endpoint.clone(),
                reason: "scripted connection failure".to_string(),
            }),
            _ => Ok(self.banner.clone()),
        }
    }

    fn execute(&mut self, command: &str, timeout: Duration) -> Result<ExecOutput, ConsoleError> {
        if let Mode::TimingOut(partial) = &self.mode {
            return Err(ConsoleError::CommandTimeout {
                command: command.to_string(),
                timeout,
                partial_output: partial.clone(),
            });
        }
        let turn = self.from_host_index.index;
        let expected = self.next_expected_command().to_string();
        assert_eq!(
            expected, command,
            "Expected command '{expected}', got '{command}'"
        );
        let exit_code = self.exit_codes.get(turn).copied().unwrap_or(0);
        Ok(ExecOutput {
            output: self.next_reply(),
            exit_code,
        })
    }

    fn endpoint(&self) -> &str {
        "loopback"
    }
}

impl Drop for LoopbackBridge {
    fn drop(&mut self) {
        // A failed assertion already unwinds through here; a second panic
        // would abort the test process instead of reporting the first.
        if std::thread::panicking() {
            return;
        }
        self.finalize();
    }
}
