//! The executor: validates command lines, spawns them, and reports progress.

use std::convert::Infallible;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command as Process, Stdio};
use std::sync::Arc;

use nix::sys::signal::Signal;
use tracing::{debug, warn};

use crate::command::Command;
use crate::config::ShellConfig;
use crate::error::{Result, ShellError, describe_status};
use crate::line::CommandLine;
use crate::process_group::{self, SignalOutcome};
use crate::report::ReportSink;
use crate::result::{RunResult, SpawnMode};

/// Runs [`CommandLine`]s as child processes of this one.
///
/// Every entry point accepts anything convertible into a command line
/// (commands, chains, escaped commands, or raw argument lists); the `*_with`
/// variants build a fresh [`Command`] through a callback instead. Invalid
/// command lines are refused with [`ShellError::IncompleteCommand`] before
/// anything is spawned.
#[derive(Debug, Clone, Default)]
pub struct Shell {
    config: ShellConfig,
}

impl Shell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ShellConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub fn set_verbose(&mut self, verbose: bool) -> &mut Self {
        self.config.verbose = verbose;
        self
    }

    pub fn set_sink(&mut self, sink: Arc<dyn ReportSink>) -> &mut Self {
        self.config.sink = sink;
        self
    }

    /// Write `message` to the report sink.
    pub fn report(&self, message: &str, newline: bool) {
        self.config.sink.report(message, newline);
    }

    /// Write `message` followed by a newline, only when verbose.
    pub fn report_verbose(&self, message: &str) {
        if self.config.verbose {
            self.report(message, true);
        }
    }

    /// Run the command, wait for termination, and collect the results.
    ///
    /// Reports the command and its exit code to the sink; in verbose mode the
    /// captured streams follow. For a quiet version use [`Shell::execute`].
    pub fn run(&self, line: impl Into<CommandLine>) -> Result<RunResult> {
        let outcome = self.run_reported(line.into());
        self.report_verbose("");
        outcome
    }

    pub fn run_with(&self, configure: impl FnOnce(&mut Command)) -> Result<RunResult> {
        self.run(CommandLine::build(configure))
    }

    fn run_reported(&self, line: CommandLine) -> Result<RunResult> {
        let line = normalize(line)?;
        self.report(&format!("{} ", line.string_format()), false);
        let result = self.execute(line)?;
        let status = result
            .status()
            .map(|status| describe_status(&status))
            .unwrap_or_default();
        self.report(&format!("=> {status}"), true);
        self.report_verbose(&result.format_streams());
        Ok(result)
    }

    /// Run the command and wait for it without reporting anything.
    pub fn execute(&self, line: impl Into<CommandLine>) -> Result<RunResult> {
        let line = normalize(line.into())?;
        let mut result = self.launch(line, SpawnMode::Foreground)?;
        result.wait()?;
        Ok(result)
    }

    /// Start the command in its own session and return without waiting. The
    /// command can survive the caller.
    ///
    /// The result may be waited on later. If it is dropped instead, the
    /// child's output is read and discarded on a background thread, which
    /// reaps it once it exits.
    pub fn run_detached(&self, line: impl Into<CommandLine>) -> Result<RunResult> {
        let line = normalize(line.into())?;
        self.launch(line, SpawnMode::Detached)
    }

    pub fn run_detached_with(&self, configure: impl FnOnce(&mut Command)) -> Result<RunResult> {
        self.run_detached(CommandLine::build(configure))
    }

    /// Start the command in parallel with this process; it is interrupted
    /// when this process exits. The calling thread exiting does not affect it.
    pub fn run_in_background(&self, line: impl Into<CommandLine>) -> Result<RunResult> {
        let line = normalize(line.into())?;
        let result = self.launch(line, SpawnMode::Background)?;
        process_group::register_background_child(result.pid());
        Ok(result)
    }

    pub fn run_in_background_with(
        &self,
        configure: impl FnOnce(&mut Command),
    ) -> Result<RunResult> {
        self.run_in_background(CommandLine::build(configure))
    }

    /// Replace this process with the command. Only returns if the
    /// replacement could not be started.
    pub fn run_as_replacement(&self, line: impl Into<CommandLine>) -> Result<Infallible> {
        let line = normalize(line.into())?;

        self.report("Ceding execution to: ", true);
        self.report(&line.string_format(), true);

        let source = self.process(&line).exec();
        Err(ShellError::Replace {
            command: line.string_format(),
            source,
        })
    }

    pub fn run_as_replacement_with(
        &self,
        configure: impl FnOnce(&mut Command),
    ) -> Result<Infallible> {
        self.run_as_replacement(CommandLine::build(configure))
    }

    /// Interrupt an arbitrary process. A missing process is only a warning.
    pub fn kill_process(&self, pid: u32) -> Result<()> {
        match process_group::send_signal(pid, Signal::SIGINT) {
            Ok(SignalOutcome::Delivered) => Ok(()),
            Ok(SignalOutcome::NotFound) => {
                warn!(pid, "couldn't find process {pid} to kill it");
                Ok(())
            }
            Err(source) => Err(ShellError::Signal { pid, source }),
        }
    }

    fn launch(&self, line: CommandLine, mode: SpawnMode) -> Result<RunResult> {
        let child = self.spawn_process(&line, mode)?;
        debug!(pid = child.id(), ?mode, command = %line, "spawned command");
        RunResult::spawned(child, line, mode, &self.config)
    }

    fn spawn_process(&self, line: &CommandLine, mode: SpawnMode) -> Result<Child> {
        let mut process = self.process(line);
        process.stdout(Stdio::piped()).stderr(Stdio::piped());

        match mode {
            SpawnMode::Foreground | SpawnMode::Background => {}
            SpawnMode::Detached => unsafe {
                process.pre_exec(process_group::detach_from_tty);
            },
        }

        process.spawn().map_err(|source| ShellError::Spawn {
            command: line.string_format(),
            source,
        })
    }

    /// `{shell} -c {command}` with the line's environment layered over ours.
    fn process(&self, line: &CommandLine) -> Process {
        let mut process = Process::new(&self.config.shell);
        process.arg("-c").arg(line.command());
        process.envs(line.environment().iter());
        process
    }
}

fn normalize(line: CommandLine) -> Result<CommandLine> {
    if line.is_valid() {
        Ok(line)
    } else {
        Err(ShellError::IncompleteCommand {
            command: line.string_format(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::CommandChain;
    use crate::report::MemorySink;
    use pretty_assertions::assert_eq;

    fn shell(verbose: bool) -> (Shell, MemorySink) {
        let sink = MemorySink::new();
        let config = ShellConfig::new().verbose(verbose).sink(sink.clone());
        (Shell::with_config(config), sink)
    }

    #[test]
    fn every_entry_point_refuses_incomplete_commands() {
        let (shell, sink) = shell(false);
        let incomplete = |err: ShellError| matches!(err, ShellError::IncompleteCommand { .. });

        assert!(shell.run_with(|_| {}).map_err(incomplete).unwrap_err());
        assert!(shell.execute(Command::default()).map_err(incomplete).unwrap_err());
        assert!(shell.run_detached_with(|_| {}).map_err(incomplete).unwrap_err());
        assert!(
            shell
                .run_in_background(CommandChain::pipeline())
                .map_err(incomplete)
                .unwrap_err()
        );
        assert!(shell.run_as_replacement_with(|_| {}).map_err(incomplete).unwrap_err());
        assert!(sink.contents().is_empty());
    }

    #[test]
    fn run_reports_command_and_exit_code() -> anyhow::Result<()> {
        let (shell, sink) = shell(false);
        let result = shell.run(["echo", "-n", "Some text"])?;
        assert_eq!(result.stdout(), "Some text");
        assert_eq!(sink.contents(), "echo -n Some text => 0\n");
        Ok(())
    }

    #[test]
    fn verbose_run_dumps_streams() -> anyhow::Result<()> {
        let (shell, sink) = shell(true);
        shell.run(["printf", "hi"])?;
        assert_eq!(
            sink.contents(),
            "printf hi => 0\nstdout:\nhistderr:[empty]\n---\n\n"
        );
        Ok(())
    }

    #[test]
    fn run_with_builds_command_inline() -> anyhow::Result<()> {
        let (shell, _) = shell(false);
        let result = shell.run_with(|cmd| {
            cmd.set_executable("printf").arg("built");
        })?;
        assert_eq!(result.stdout(), "built");
        Ok(())
    }

    #[test]
    fn execute_is_quiet() -> anyhow::Result<()> {
        let (shell, sink) = shell(true);
        let result = shell.execute(["false"])?;
        assert_eq!(result.exit_code(), Some(1));
        assert!(sink.contents().is_empty());
        Ok(())
    }

    #[test]
    fn environment_reaches_the_child() -> anyhow::Result<()> {
        let (shell, _) = shell(false);
        let result = shell.run(Command::new("env").with_env("TEST_ENV", "indubitably"))?;
        assert!(result.succeeded());
        assert!(result.stdout().contains("TEST_ENV=indubitably"));
        Ok(())
    }

    #[test]
    fn detached_command_can_be_waited_later() -> anyhow::Result<()> {
        let (shell, sink) = shell(false);
        let mut result = shell.run_detached(["printf", "detached"])?;
        assert_eq!(result.mode(), SpawnMode::Detached);
        assert!(result.is_running());
        result.wait()?;
        assert_eq!(result.stdout(), "detached");
        assert!(sink.contents().is_empty());
        Ok(())
    }

    #[test]
    fn abandoned_detached_command_is_reaped() -> anyhow::Result<()> {
        let (shell, _) = shell(false);
        let result = shell.run_detached(["true"])?;
        drop(result);
        Ok(())
    }

    #[test]
    fn background_command_is_registered_until_waited() -> anyhow::Result<()> {
        let (shell, _) = shell(false);
        let mut result = shell.run_in_background(["sleep", "0.1"])?;
        assert!(process_group::is_background_child(result.pid()));
        result.wait()?;
        assert!(result.succeeded());
        assert!(!process_group::is_background_child(result.pid()));
        Ok(())
    }

    #[test]
    fn replacement_failure_is_reported() {
        let (shell, sink) = {
            let sink = MemorySink::new();
            let config = ShellConfig::new()
                .shell("/nonexistent/shell")
                .sink(sink.clone());
            (Shell::with_config(config), sink)
        };
        let err = shell.run_as_replacement(["true"]).unwrap_err();
        assert!(matches!(err, ShellError::Replace { .. }));
        assert_eq!(sink.contents(), "Ceding execution to: \ntrue\n");
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let config = ShellConfig::new()
            .shell("/nonexistent/shell")
            .sink(MemorySink::new());
        let err = Shell::with_config(config).execute(["true"]).unwrap_err();
        assert!(matches!(err, ShellError::Spawn { .. }));
    }

    #[test]
    fn background_command_survives_its_spawning_thread() -> anyhow::Result<()> {
        let (shell, _) = shell(false);
        let spawner = std::thread::spawn(move || shell.run_in_background(["sleep", "0.5"]));
        let mut result = spawner
            .join()
            .map_err(|_| anyhow::anyhow!("spawning thread panicked"))??;

        std::thread::sleep(std::time::Duration::from_millis(200));
        result.wait()?;
        assert_eq!(result.signal(), None);
        assert_eq!(result.exit_code(), Some(0));
        Ok(())
    }

    #[test]
    fn kill_process_refuses_pid_zero() {
        let (shell, _) = shell(false);
        let err = shell.kill_process(0).unwrap_err();
        assert!(matches!(
            err,
            ShellError::Signal {
                pid: 0,
                source: nix::errno::Errno::EINVAL
            }
        ));
    }

    #[test]
    fn kill_process_tolerates_missing_pid() -> anyhow::Result<()> {
        let (shell, _) = shell(false);
        shell.kill_process(0x7fff_fff2)?;
        Ok(())
    }
}
