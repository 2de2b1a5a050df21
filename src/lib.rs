//! Composable shell command lines and a small executor for them.
//!
//! A [`Command`] is a single executable with options, environment overrides
//! and redirections. Commands compose into [`CommandChain`]s (`--` wrapping,
//! `&&` prerequisites, `|` pipelines) and can be quoted into a single shell
//! word with [`ShellEscaped`]. Everything renders to one string that is run
//! through `sh -c`.
//!
//! ```no_run
//! use vtcode_command_line::{Command, Shell};
//!
//! # fn main() -> vtcode_command_line::Result<()> {
//! let line = Command::new("cargo")
//!     .with_args(["build", "--release"])
//!     .with_env("RUSTFLAGS", "-Dwarnings")
//!     .and_then(["ls", "target/release"]);
//!
//! let result = Shell::new().run(line)?;
//! result.must_succeed()?;
//! println!("{}", result.stdout());
//! # Ok(())
//! # }
//! ```
//!
//! [`Shell`] runs command lines in the foreground, detached from the
//! terminal, in the background, or as a replacement for the current process.
//! Foreground output is captured while the child runs; if it takes longer
//! than the configured grace period, output is echoed to the report sink as
//! it arrives.

pub mod chain;
pub mod command;
pub mod config;
mod drain;
pub mod error;
pub mod escaped;
pub mod line;
pub mod process_group;
pub mod redirect;
pub mod report;
pub mod result;
pub mod shell;

pub use chain::{ChainKind, CommandChain};
pub use command::{Command, Environment};
pub use config::{DEFAULT_CONSUME_TIMEOUT, DEFAULT_SHELL, ShellConfig};
pub use error::{Result, ShellError};
pub use escaped::ShellEscaped;
pub use line::{CommandLine, Operand};
pub use process_group::{SignalOutcome, send_signal};
pub use redirect::{Redirection, STDERR_FD, STDIN_FD, STDOUT_FD};
pub use report::{MemorySink, ReportSink, StderrSink, WriterSink};
pub use result::{OutputStream, RunResult, SpawnMode};
pub use shell::Shell;

pub use nix::sys::signal::Signal;
