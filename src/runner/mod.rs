//! Process execution seam shared by the container engine and cloud
//! providers.
//!
//! Everything that talks to an external tool goes through [`CommandRunner`]
//! so tests can script outcomes without spawning processes. Commands either
//! run to completion with captured output, or stream their output line by
//! line as [`ProcessEvent`]s for long operations such as image builds.

use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use shell_escape::unix::escape;
use thiserror::Error;
use tracing::debug;

/// Result of running an external command to completion.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Renders the exit status for error messages.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// One observation from a streamed process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProcessEvent {
    /// A line written to standard output, without its terminator.
    Stdout(String),
    /// A line written to standard error, without its terminator.
    Stderr(String),
    /// The process finished; always the last event.
    Exited(Option<i32>),
}

/// Finite sequence of events from one streamed process.
pub type ProcessEvents = Box<dyn Iterator<Item = ProcessEvent>>;

/// Errors raised while starting or talking to a process.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RunnerError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when waiting for or reading from a process fails.
    #[error("failed to collect output from {program}: {message}")]
    Io {
        /// Command being executed.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RunnerError>;

    /// Runs `program`, writing `input` to its standard input.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Spawn`] if the command cannot be started.
    fn run_with_input(
        &self,
        program: &str,
        args: &[OsString],
        input: &[u8],
    ) -> Result<CommandOutput, RunnerError>;

    /// Starts `program` and returns its output as a line stream. The stream
    /// ends with [`ProcessEvent::Exited`]; dropping it early stops the
    /// process.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Spawn`] if the command cannot be started.
    fn stream(
        &self,
        program: &str,
        args: &[OsString],
        input: Option<&[u8]>,
    ) -> Result<ProcessEvents, RunnerError>;
}

/// Renders a shell-like command line for logs and assertions.
#[must_use]
pub fn display_command(program: &str, args: &[OsString]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(escape(program.into()).into_owned());
    parts.extend(
        args.iter()
            .map(|arg| escape(arg.to_string_lossy()).into_owned()),
    );
    parts.join(" ")
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl ProcessCommandRunner {
    fn spawn(
        program: &str,
        args: &[OsString],
        with_input: bool,
    ) -> Result<Child, RunnerError> {
        debug!(command = %display_command(program, args), "running command");
        let stdin = if with_input {
            Stdio::piped()
        } else {
            Stdio::null()
        };
        Command::new(program)
            .args(args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| RunnerError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })
    }

    fn feed_input(child: &mut Child, input: &[u8]) {
        if let Some(mut stdin) = child.stdin.take() {
            let bytes = input.to_vec();
            // A child that exits before reading everything closes the pipe;
            // its exit status reports the failure.
            thread::spawn(move || stdin.write_all(&bytes).ok());
        }
    }
}

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RunnerError> {
        let child = Self::spawn(program, args, false)?;
        collect(program, child)
    }

    fn run_with_input(
        &self,
        program: &str,
        args: &[OsString],
        input: &[u8],
    ) -> Result<CommandOutput, RunnerError> {
        let mut child = Self::spawn(program, args, true)?;
        Self::feed_input(&mut child, input);
        collect(program, child)
    }

    fn stream(
        &self,
        program: &str,
        args: &[OsString],
        input: Option<&[u8]>,
    ) -> Result<ProcessEvents, RunnerError> {
        let mut child = Self::spawn(program, args, input.is_some())?;
        if let Some(bytes) = input {
            Self::feed_input(&mut child, bytes);
        }

        let (sender, receiver) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, sender.clone(), ProcessEvent::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, sender, ProcessEvent::Stderr);
        }

        Ok(Box::new(ChildEvents {
            child,
            receiver,
            finished: false,
        }))
    }
}

fn collect(program: &str, child: Child) -> Result<CommandOutput, RunnerError> {
    let output = child.wait_with_output().map_err(|err| RunnerError::Io {
        program: program.to_owned(),
        message: err.to_string(),
    })?;

    Ok(CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

fn forward_lines<R>(source: R, sender: Sender<ProcessEvent>, wrap: fn(String) -> ProcessEvent)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(source);
        let mut buffer = Vec::new();
        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buffer);
                    let trimmed = line.trim_end_matches(['\n', '\r']).to_owned();
                    if sender.send(wrap(trimmed)).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

struct ChildEvents {
    child: Child,
    receiver: Receiver<ProcessEvent>,
    finished: bool,
}

impl Iterator for ChildEvents {
    type Item = ProcessEvent;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if let Ok(event) = self.receiver.recv() {
            return Some(event);
        }
        // Both pipes are closed, so the process is done writing.
        self.finished = true;
        let code = self.child.wait().ok().and_then(|status| status.code());
        Some(ProcessEvent::Exited(code))
    }
}

impl Drop for ChildEvents {
    fn drop(&mut self) {
        if !self.finished {
            self.child.kill().ok();
            self.child.wait().ok();
        }
    }
}
