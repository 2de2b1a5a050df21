use std::io;
use std::process::ExitStatus;

use thiserror::Error;

use crate::result::OutputStream;

/// Errors produced while validating, spawning, or waiting on a command line.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("cannot run '{command}': command line has no executable")]
    IncompleteCommand { command: String },

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error while draining {stream}: {source}")]
    Drain {
        stream: OutputStream,
        #[source]
        source: io::Error,
    },

    #[error("error condition reported on {stream} while waiting for output")]
    StreamError { stream: OutputStream },

    #[error("failed to wait for command output: {source}")]
    Poll {
        #[source]
        source: io::Error,
    },

    #[error("failed to wait for process {pid}: {source}")]
    Wait {
        pid: u32,
        #[source]
        source: io::Error,
    },

    #[error("failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("Command '{command}' failed with exit status {}: \n{streams}", describe_status(.status))]
    CommandFailed {
        command: String,
        status: ExitStatus,
        streams: String,
    },

    #[error("Command '{command}' (pid {pid}) has not finished")]
    StillRunning { command: String, pid: u32 },

    #[error("failed to replace the current process with '{command}': {source}")]
    Replace {
        command: String,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ShellError>;

/// Renders an exit status the way progress lines and failures show it: the
/// bare code, or the terminating signal when there is no code.
pub(crate) fn describe_status(status: &ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => code.to_string(),
        (None, Some(signal)) => format!("signal {signal}"),
        (None, None) => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::process::ExitStatusExt;

    #[test]
    fn describe_status_prefers_exit_code() {
        assert_eq!(describe_status(&ExitStatus::from_raw(3 << 8)), "3");
        assert_eq!(describe_status(&ExitStatus::from_raw(9)), "signal 9");
    }

    #[test]
    fn command_failed_message_embeds_command_and_code() {
        let err = ShellError::CommandFailed {
            command: "FOO=1 false".into(),
            status: ExitStatus::from_raw(1 << 8),
            streams: "stdout:[empty]\nstderr:[empty]\n---".into(),
        };
        assert_eq!(
            err.to_string(),
            "Command 'FOO=1 false' failed with exit status 1: \nstdout:[empty]\nstderr:[empty]\n---"
        );
    }
}
