use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::report::{ReportSink, StderrSink};

/// Grace period before the output of a slow command is echoed.
pub const DEFAULT_CONSUME_TIMEOUT: Duration = Duration::from_secs(3);

/// Shell used to interpret rendered command lines.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Settings a [`Shell`](crate::Shell) is constructed with.
#[derive(Clone)]
pub struct ShellConfig {
    pub verbose: bool,
    pub consume_timeout: Duration,
    pub shell: PathBuf,
    pub sink: Arc<dyn ReportSink>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            consume_timeout: DEFAULT_CONSUME_TIMEOUT,
            shell: PathBuf::from(DEFAULT_SHELL),
            sink: Arc::new(StderrSink),
        }
    }
}

impl fmt::Debug for ShellConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShellConfig")
            .field("verbose", &self.verbose)
            .field("consume_timeout", &self.consume_timeout)
            .field("shell", &self.shell)
            .finish_non_exhaustive()
    }
}

impl ShellConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also report the captured streams of every `run`.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn consume_timeout(mut self, timeout: Duration) -> Self {
        self.consume_timeout = timeout;
        self
    }

    /// Shell program invoked as `{shell} -c {command}`.
    pub fn shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn sink(mut self, sink: impl ReportSink + 'static) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn shared_sink(mut self, sink: Arc<dyn ReportSink>) -> Self {
        self.sink = sink;
        self
    }
}
