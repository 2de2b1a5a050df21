//! The runnable command line sum type and chain composition.

use std::borrow::Cow;
use std::fmt;

use tracing::warn;

use crate::chain::{ChainKind, CommandChain};
use crate::command::{Command, Environment};
use crate::escaped::ShellEscaped;
use crate::redirect::{Redirection, STDERR_FD, STDIN_FD, STDOUT_FD};

/// Anything a [`Shell`](crate::Shell) can run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandLine {
    Simple(Command),
    Chain(CommandChain),
    Escaped(ShellEscaped),
}

/// The right-hand side of a compose operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Command(Command),
    Chain(CommandChain),
    Escaped(ShellEscaped),
    /// A raw argument list, coerced with [`Command::from_args`].
    Args(Vec<String>),
}

impl Operand {
    pub fn into_command_line(self) -> CommandLine {
        match self {
            Operand::Command(command) => CommandLine::Simple(command),
            Operand::Chain(chain) => CommandLine::Chain(chain),
            Operand::Escaped(escaped) => CommandLine::Escaped(escaped),
            Operand::Args(args) => CommandLine::Simple(Command::from_args(args)),
        }
    }
}

impl CommandLine {
    /// Build a simple command line through a callback over an empty command.
    pub fn build(configure: impl FnOnce(&mut Command)) -> Self {
        CommandLine::Simple(Command::build(configure))
    }

    pub fn command(&self) -> String {
        match self {
            CommandLine::Simple(command) => command.command(),
            CommandLine::Chain(chain) => chain.command(),
            CommandLine::Escaped(escaped) => escaped.command(),
        }
    }

    /// The command prefixed with its environment assignments. This is the
    /// form used in progress reports and failure messages.
    pub fn string_format(&self) -> String {
        match self {
            CommandLine::Simple(command) => command.string_format(),
            CommandLine::Chain(chain) => chain.string_format(),
            CommandLine::Escaped(escaped) => escaped.string_format(),
        }
    }

    /// Environment overrides passed to the spawned process.
    pub fn environment(&self) -> Cow<'_, Environment> {
        match self {
            CommandLine::Simple(command) => Cow::Borrowed(command.environment()),
            CommandLine::Chain(chain) => Cow::Owned(chain.environment()),
            CommandLine::Escaped(escaped) => Cow::Owned(escaped.environment()),
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            CommandLine::Simple(command) => command.name(),
            CommandLine::Chain(chain) => chain.name(),
            CommandLine::Escaped(escaped) => escaped.name(),
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            CommandLine::Simple(command) => command.is_valid(),
            CommandLine::Chain(chain) => chain.is_valid(),
            CommandLine::Escaped(escaped) => escaped.is_valid(),
        }
    }

    pub fn as_chain(&self) -> Option<&CommandChain> {
        match self {
            CommandLine::Chain(chain) => Some(chain),
            _ => None,
        }
    }

    pub fn as_command(&self) -> Option<&Command> {
        match self {
            CommandLine::Simple(command) => Some(command),
            _ => None,
        }
    }

    /// Set an environment override on the command that will receive it: the
    /// command itself, or the last child of a chain.
    pub fn set_env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        match self {
            CommandLine::Simple(command) => {
                command.set_env(key, value);
            }
            CommandLine::Chain(chain) => match chain.last_mut() {
                Some(last) => {
                    last.set_env(key, value);
                }
                None => warn!("ignoring environment override on an empty command chain"),
            },
            CommandLine::Escaped(_) => {
                warn!("ignoring environment override on a shell-escaped command line");
            }
        }
        self
    }

    /// Append a redirection. Chains delegate to their last child.
    pub fn redirect(&mut self, redirection: Redirection) -> &mut Self {
        match self {
            CommandLine::Simple(command) => push_redirection(command, redirection),
            CommandLine::Chain(chain) => match chain.last_mut() {
                Some(last) => {
                    last.redirect(redirection);
                }
                None => warn!(%redirection, "ignoring redirection on an empty command chain"),
            },
            CommandLine::Escaped(escaped) => escaped.push_redirection(redirection),
        }
        self
    }

    pub fn redirect_to(&mut self, fd: u32, path: impl Into<String>) -> &mut Self {
        self.redirect(Redirection::Write {
            fd,
            path: path.into(),
        })
    }

    pub fn redirect_from(&mut self, path: impl Into<String>, fd: u32) -> &mut Self {
        self.redirect(Redirection::Read {
            path: path.into(),
            fd,
        })
    }

    pub fn copy_stream_to(&mut self, from: u32, to: u32) -> &mut Self {
        self.redirect(Redirection::Duplicate { from, to })
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

    pub fn redirect_both(&mut self, path: impl Into<String>) -> &mut Self {
        let path = path.into();
        self.redirect_stdout(path.clone()).redirect_stderr(path)
    }

    /// Compose `self -- other`.
    pub fn wrap_with(self, other: impl Into<Operand>) -> Self {
        self.compose(ChainKind::Wrapping, other.into())
    }

    /// Compose `self && other`.
    pub fn and_then(self, other: impl Into<Operand>) -> Self {
        self.compose(ChainKind::Prerequisite, other.into())
    }

    /// Compose `self | other`.
    pub fn pipe_to(self, other: impl Into<Operand>) -> Self {
        self.compose(ChainKind::Pipeline, other.into())
    }

    /// Append `other` to `self` when `self` is already a chain of `kind`,
    /// otherwise start a new chain of `kind` holding `self` then `other`.
    pub fn compose(self, kind: ChainKind, other: Operand) -> Self {
        let other = other.into_command_line();
        match self {
            CommandLine::Chain(mut chain) if chain.kind() == kind => {
                chain.add(other);
                CommandLine::Chain(chain)
            }
            outer => CommandLine::Chain(CommandChain::new(kind).with(outer).with(other)),
        }
    }
}

fn push_redirection(command: &mut Command, redirection: Redirection) {
    match redirection {
        Redirection::Write { fd, path } => {
            command.redirect_to(fd, path);
        }
        Redirection::Read { path, fd } => {
            command.redirect_from(path, fd);
        }
        Redirection::Duplicate { from, to } => {
            command.copy_stream_to(from, to);
        }
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.string_format())
    }
}

impl From<Command> for CommandLine {
    fn from(command: Command) -> Self {
        CommandLine::Simple(command)
    }
}

impl From<CommandChain> for CommandLine {
    fn from(chain: CommandChain) -> Self {
        CommandLine::Chain(chain)
    }
}

impl From<ShellEscaped> for CommandLine {
    fn from(escaped: ShellEscaped) -> Self {
        CommandLine::Escaped(escaped)
    }
}

impl From<Operand> for CommandLine {
    fn from(operand: Operand) -> Self {
        operand.into_command_line()
    }
}

impl From<Vec<String>> for CommandLine {
    fn from(args: Vec<String>) -> Self {
        CommandLine::Simple(Command::from_args(args))
    }
}

impl From<&[&str]> for CommandLine {
    fn from(args: &[&str]) -> Self {
        CommandLine::Simple(Command::from_args(args.iter().copied()))
    }
}

impl<const N: usize> From<[&str; N]> for CommandLine {
    fn from(args: [&str; N]) -> Self {
        CommandLine::Simple(Command::from_args(args))
    }
}

impl From<CommandLine> for Operand {
    fn from(line: CommandLine) -> Self {
        match line {
            CommandLine::Simple(command) => Operand::Command(command),
            CommandLine::Chain(chain) => Operand::Chain(chain),
            CommandLine::Escaped(escaped) => Operand::Escaped(escaped),
        }
    }
}

impl From<Command> for Operand {
    fn from(command: Command) -> Self {
        Operand::Command(command)
    }
}

impl From<CommandChain> for Operand {
    fn from(chain: CommandChain) -> Self {
        Operand::Chain(chain)
    }
}

impl From<ShellEscaped> for Operand {
    fn from(escaped: ShellEscaped) -> Self {
        Operand::Escaped(escaped)
    }
}

impl From<Vec<String>> for Operand {
    fn from(args: Vec<String>) -> Self {
        Operand::Args(args)
    }
}

impl From<&[&str]> for Operand {
    fn from(args: &[&str]) -> Self {
        Operand::Args(args.iter().map(|arg| (*arg).to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Operand {
    fn from(args: [&str; N]) -> Self {
        Operand::Args(args.iter().map(|arg| (*arg).to_string()).collect())
    }
}
