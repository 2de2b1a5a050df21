use std::fmt;

/// File descriptor of the standard input stream.
pub const STDIN_FD: u32 = 0;
/// File descriptor of the standard output stream.
pub const STDOUT_FD: u32 = 1;
/// File descriptor of the standard error stream.
pub const STDERR_FD: u32 = 2;

/// A stream redirection or duplication directive appended to a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Redirection {
    /// `{fd}>{path}`
    Write { fd: u32, path: String },
    /// `{fd}<{path}`
    Read { path: String, fd: u32 },
    /// `{from}>&{to}`
    Duplicate { from: u32, to: u32 },
}

impl fmt::Display for Redirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Redirection::Write { fd, path } => write!(f, "{fd}>{path}"),
            Redirection::Read { path, fd } => write!(f, "{fd}<{path}"),
            Redirection::Duplicate { from, to } => write!(f, "{from}>&{to}"),
        }
    }
}
