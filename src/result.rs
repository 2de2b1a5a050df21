//! Handle on a spawned command.
//!
//! A [`RunResult`] can be used to send signals to a running process, wait for
//! it to complete, and read its exit status and captured streams once it has.

use std::fmt;
use std::fs::File;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ExitStatus};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use tracing::{debug, warn};

use crate::config::ShellConfig;
use crate::drain::{self, Drain, Pipe};
use crate::error::{Result, ShellError, describe_status};
use crate::line::CommandLine;
use crate::process_group::{self, SignalOutcome};
use crate::redirect::{STDERR_FD, STDOUT_FD};
use crate::report::ReportSink;

/// One of the two captured output streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    /// File descriptor of the stream in the child.
    pub fn fd(self) -> u32 {
        match self {
            OutputStream::Stdout => STDOUT_FD,
            OutputStream::Stderr => STDERR_FD,
        }
    }
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => f.write_str("stdout"),
            OutputStream::Stderr => f.write_str("stderr"),
        }
    }
}

/// How a command was launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnMode {
    /// Waited for by the shell before being returned.
    Foreground,
    /// Started in its own session; may outlive the caller.
    Detached,
    /// Interrupted when the caller exits.
    Background,
}

/// A spawned command: its pid, pipes, and eventually its exit status and
/// output.
pub struct RunResult {
    pid: u32,
    command: CommandLine,
    mode: SpawnMode,
    child: Option<Child>,
    pipes: Vec<Pipe>,
    status: Option<ExitStatus>,
    stdout: String,
    stderr: String,
    consume_timeout: Option<Duration>,
    default_consume_timeout: Duration,
    sink: Arc<dyn ReportSink>,
}

impl fmt::Debug for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunResult")
            .field("pid", &self.pid)
            .field("command", &self.command.string_format())
            .field("mode", &self.mode)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl RunResult {
    /// Take ownership of a freshly spawned child whose stdout and stderr are
    /// piped.
    pub(crate) fn spawned(
        mut child: Child,
        command: CommandLine,
        mode: SpawnMode,
        config: &ShellConfig,
    ) -> Result<Self> {
        let pid = child.id();
        let mut pipes = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pipes.push(open_pipe(OutputStream::Stdout, stdout.into())?);
        }
        if let Some(stderr) = child.stderr.take() {
            pipes.push(open_pipe(OutputStream::Stderr, stderr.into())?);
        }

        Ok(Self {
            pid,
            command,
            mode,
            child: Some(child),
            pipes,
            status: None,
            stdout: String::new(),
            stderr: String::new(),
            consume_timeout: None,
            default_consume_timeout: config.consume_timeout,
            sink: Arc::clone(&config.sink),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The command line this process was started from.
    pub fn command(&self) -> &CommandLine {
        &self.command
    }

    pub fn mode(&self) -> SpawnMode {
        self.mode
    }

    /// True until [`wait`](Self::wait) has observed the process exit.
    pub fn is_running(&self) -> bool {
        self.status.is_none()
    }

    pub fn status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// The raw exit code; `None` while running or when the process was
    /// terminated by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.status.and_then(|status| status.code())
    }

    /// The signal that terminated the process, if any.
    pub fn signal(&self) -> Option<i32> {
        self.status.and_then(|status| status.signal())
    }

    /// Captured standard output. Empty until the process has been waited for.
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Captured standard error. Empty until the process has been waited for.
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    pub fn output(&self, stream: OutputStream) -> &str {
        match stream {
            OutputStream::Stdout => &self.stdout,
            OutputStream::Stderr => &self.stderr,
        }
    }

    pub fn consume_timeout(&self) -> Duration {
        self.consume_timeout.unwrap_or(self.default_consume_timeout)
    }

    /// Override how long output is held back before being echoed.
    pub fn set_consume_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.consume_timeout = Some(timeout);
        self
    }

    /// Wait for the process to complete, draining both streams.
    ///
    /// If this takes longer than [`consume_timeout`](Self::consume_timeout),
    /// output is echoed to the shell's report sink, which is very useful when
    /// compilation or network transfers take a long time. Calling `wait` on a
    /// finished result does nothing.
    ///
    /// A failed wait leaves the process running with its pipes still open;
    /// [`stdout`](Self::stdout) and [`stderr`](Self::stderr) show what was
    /// captured before the failure.
    pub fn wait(&mut self) -> Result<()> {
        let grace = self.consume_timeout();
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };

        let outcome = Drain::new(&mut self.pipes, grace, self.sink.as_ref()).run(child, self.pid);
        self.collect_output();

        let status = outcome?;
        debug!(
            pid = self.pid,
            status = %describe_status(&status),
            "command finished"
        );
        self.status = Some(status);
        self.child = None;
        self.pipes.clear();
        if self.mode == SpawnMode::Background {
            process_group::forget_background_child(self.pid);
        }
        Ok(())
    }

    fn collect_output(&mut self) {
        for pipe in &self.pipes {
            let text = pipe.text();
            match pipe.stream() {
                OutputStream::Stdout => self.stdout = text,
                OutputStream::Stderr => self.stderr = text,
            }
        }
    }

    /// Interrupt the process, like hitting Control-C.
    pub fn kill(&self) -> Result<()> {
        self.kill_with(Signal::SIGINT)
    }

    /// Send `signal` to the process. A process that has already exited is
    /// only worth a warning.
    pub fn kill_with(&self, signal: Signal) -> Result<()> {
        if self.status.is_some() {
            warn!(pid = self.pid, ?signal, "process already exited; not sending signal");
            return Ok(());
        }

        match process_group::send_signal(self.pid, signal) {
            Ok(SignalOutcome::Delivered) => Ok(()),
            Ok(SignalOutcome::NotFound) => {
                warn!(pid = self.pid, "couldn't find process {} to kill it", self.pid);
                Ok(())
            }
            Err(source) => Err(ShellError::Signal {
                pid: self.pid,
                source,
            }),
        }
    }

    /// True iff the process exited with code 0. Never fails: a process that
    /// is still running or was killed by a signal has not succeeded.
    pub fn succeeded(&self) -> bool {
        self.exit_code() == Some(0)
    }

    /// Demand that the process succeeded, returning its exit code.
    ///
    /// Many programs report success when they failed, so this is as reliable
    /// as the program's own exit status.
    pub fn must_succeed(&self) -> Result<i32> {
        match self.status {
            None => Err(ShellError::StillRunning {
                command: self.command.string_format(),
                pid: self.pid,
            }),
            Some(status) if status.code() == Some(0) => Ok(0),
            Some(status) => Err(ShellError::CommandFailed {
                command: self.command.string_format(),
                status,
                streams: self.format_streams(),
            }),
        }
    }

    /// Stdout and stderr formatted one after the other. They are not
    /// intermixed, which may differ from what the shell showed live.
    pub fn format_streams(&self) -> String {
        format!(
            "stdout:{}stderr:{}---",
            format_section(&self.stdout),
            format_section(&self.stderr)
        )
    }
}

impl Drop for RunResult {
    fn drop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        // Abandoned without waiting: keep reading its output so the child
        // never writes into a closed pipe, then reap it.
        let pid = self.pid;
        let mode = self.mode;
        let pipes = std::mem::take(&mut self.pipes);
        debug!(pid, ?mode, "reaping abandoned command in the background");
        let reaper = std::thread::Builder::new()
            .name(format!("reap-{pid}"))
            .spawn(move || {
                drain::discard(pipes);
                if let Err(err) = child.wait() {
                    debug!(pid, error = %err, "failed to reap abandoned command");
                }
                if mode == SpawnMode::Background {
                    process_group::forget_background_child(pid);
                }
            });
        if let Err(err) = reaper {
            warn!(pid, error = %err, "failed to start reaper thread");
        }
    }
}

fn open_pipe(stream: OutputStream, fd: OwnedFd) -> Result<Pipe> {
    let file = File::from(fd);
    process_group::set_nonblocking(file.as_raw_fd())
        .map_err(|source| ShellError::Drain { stream, source })?;
    Ok(Pipe::new(stream, file))
}

fn format_section(text: &str) -> String {
    if text.is_empty() {
        "[empty]\n".to_string()
    } else {
        format!("\n{text}")
    }
}
