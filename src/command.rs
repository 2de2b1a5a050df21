//! Leaf command descriptions.
//!
//! A [`Command`] is one executable with its options, environment overrides
//! and redirections. It renders to the exact string handed to the shell and
//! can be composed into chains through [`CommandLine`](crate::CommandLine).

use indexmap::IndexMap;

use crate::line::{CommandLine, Operand};
use crate::redirect::{Redirection, STDERR_FD, STDIN_FD, STDOUT_FD};

/// Environment overrides, rendered in first-insertion order.
pub type Environment = IndexMap<String, String>;

/// A single executable invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    executable: String,
    options: Vec<String>,
    env: Environment,
    redirections: Vec<Redirection>,
    name: Option<String>,
}

impl Command {
    /// Create a command for `executable` with no options.
    pub fn new(executable: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            ..Self::default()
        }
    }

    /// Build a command through a callback that starts from an empty command.
    ///
    /// The callback is expected to set the executable; a command left without
    /// one is invalid and will be refused by [`Shell`](crate::Shell).
    pub fn build(configure: impl FnOnce(&mut Command)) -> Self {
        let mut command = Self::default();
        configure(&mut command);
        command
    }

    /// Coerce a raw argument list: the first element becomes the executable
    /// and the rest become options. An empty list yields an invalid command.
    pub fn from_args<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = args.into_iter().map(Into::into);
        let mut command = Self::new(args.next().unwrap_or_default());
        command.options.extend(args);
        command
    }

    /// Append options, consuming and returning the command.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.options.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment override, consuming and returning the command.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_env(key, value);
        self
    }

    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.options.push(arg.into());
        self
    }

    pub fn args(&mut self, args: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.options.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    pub fn set_executable(&mut self, executable: impl Into<String>) -> &mut Self {
        self.executable = executable.into();
        self
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut Vec<String> {
        &mut self.options
    }

    pub fn redirections(&self) -> &[Redirection] {
        &self.redirections
    }

    /// Environment overrides applied to this command when it is spawned.
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    /// Set one environment override. Setting an existing key replaces its
    /// value but keeps its rendering position.
    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Descriptive name; defaults to the executable.
    pub fn name(&self) -> Option<&str> {
        match &self.name {
            Some(name) => Some(name),
            None if self.executable.is_empty() => None,
            None => Some(&self.executable),
        }
    }

    pub fn set_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// A command is runnable once it has an executable.
    pub fn is_valid(&self) -> bool {
        !self.executable.is_empty()
    }

    /// The command as a string: executable, options, then redirections.
    pub fn command(&self) -> String {
        let mut parts = Vec::with_capacity(1 + self.options.len() + self.redirections.len());
        parts.push(self.executable.clone());
        parts.extend(self.options.iter().cloned());
        parts.extend(self.redirections.iter().map(ToString::to_string));
        parts.join(" ")
    }

    /// The command prefixed with its `KEY=value` environment assignments.
    pub fn string_format(&self) -> String {
        render_with_environment(&self.env, self.command())
    }

    pub fn redirect_to(&mut self, fd: u32, path: impl Into<String>) -> &mut Self {
        self.redirections.push(Redirection::Write {
            fd,
            path: path.into(),
        });
        self
    }

    pub fn redirect_from(&mut self, path: impl Into<String>, fd: u32) -> &mut Self {
        self.redirections.push(Redirection::Read {
            path: path.into(),
            fd,
        });
        self
    }

    pub fn copy_stream_to(&mut self, from: u32, to: u32) -> &mut Self {
        self.redirections.push(Redirection::Duplicate { from, to });
        self
    }

    pub fn redirect_stdout(&mut self, path: impl Into<String>) -> &mut Self {
        self.redirect_to(STDOUT_FD, path)
    }

    pub fn redirect_stderr(&mut self, path: impl Into<String>) -> &mut Self {
        self.redirect_to(STDERR_FD, path)
    }

    pub fn redirect_stdin(&mut self, path: impl Into<String>) -> &mut Self {
        self.redirect_from(path, STDIN_FD)
    }

    /// Send both stdout and stderr to `path`, stdout first.
    pub fn redirect_both(&mut self, path: impl Into<String>) -> &mut Self {
        let path = path.into();
        self.redirect_stdout(path.clone()).redirect_stderr(path)
    }

    /// Compose `self -- other`.
    pub fn wrap_with(self, other: impl Into<Operand>) -> CommandLine {
        CommandLine::from(self).wrap_with(other)
    }

    /// Compose `self && other`.
    pub fn and_then(self, other: impl Into<Operand>) -> CommandLine {
        CommandLine::from(self).and_then(other)
    }

    /// Compose `self | other`.
    pub fn pipe_to(self, other: impl Into<Operand>) -> CommandLine {
        CommandLine::from(self).pipe_to(other)
    }
}

pub(crate) fn render_with_environment(env: &Environment, command: String) -> String {
    env.iter()
        .map(|(key, value)| format!("{key}={value}"))
        .chain(std::iter::once(command))
        .collect::<Vec<_>>()
        .join(" ")
}
