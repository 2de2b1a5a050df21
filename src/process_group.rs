//! OS-level helpers for spawned commands.
//!
//! This module centralizes the unsafe and platform-specific pieces:
//! - `set_nonblocking` puts a pipe read end into non-blocking mode so the
//!   drain loop can read "everything available" without stalling.
//! - `poll_readable` waits for readiness across the live pipe ends.
//! - `detach_from_tty` starts a new session for detached children so they do
//!   not receive the terminal's signals along with the caller.
//! - `send_signal` delivers a signal and tells a missing process apart from
//!   a real failure.
//! - the background registry sends `SIGINT` to background children that are
//!   still registered when the caller process exits.

use std::io;
use std::os::fd::RawFd;
use std::sync::Once;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::warn;

/// What a signal delivery attempt found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalOutcome {
    Delivered,
    /// No process with that pid exists any more.
    NotFound,
}

/// Send `signal` to `pid`.
///
/// Only single processes can be addressed: pid 0 and pids that `kill(2)`
/// would read as a process group are rejected with `EINVAL`.
pub fn send_signal(pid: u32, signal: Signal) -> Result<SignalOutcome, Errno> {
    let raw = libc::pid_t::try_from(pid)
        .ok()
        .filter(|&raw| raw > 0)
        .ok_or(Errno::EINVAL)?;
    match kill(Pid::from_raw(raw), signal) {
        Ok(()) => Ok(SignalOutcome::Delivered),
        Err(Errno::ESRCH) => Ok(SignalOutcome::NotFound),
        Err(errno) => Err(errno),
    }
}

/// Switch `fd` to non-blocking reads.
pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Readiness reported for one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
    /// Data is available, or the writer hung up and EOF can be read.
    Readable,
    /// `POLLERR` or `POLLNVAL`.
    Failed,
}

/// Wait up to `timeout` for any of `fds` to become readable.
///
/// The returned vector is aligned with `fds`; `None` means the descriptor
/// was not ready. A timeout or an interrupted wait returns all `None`.
pub(crate) fn poll_readable(fds: &[RawFd], timeout: Duration) -> io::Result<Vec<Option<Readiness>>> {
    let mut pollfds: Vec<libc::pollfd> = fds
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
    let nfds = libc::nfds_t::try_from(pollfds.len()).unwrap_or(libc::nfds_t::MAX);
    let ready = unsafe { libc::poll(pollfds.as_mut_ptr(), nfds, timeout_ms) };
    if ready == -1 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(vec![None; fds.len()]);
        }
        return Err(err);
    }

    Ok(pollfds
        .iter()
        .map(|pollfd| {
            if pollfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
                Some(Readiness::Failed)
            } else if pollfd.revents & (libc::POLLIN | libc::POLLHUP) != 0 {
                Some(Readiness::Readable)
            } else {
                None
            }
        })
        .collect())
}

/// Detach from the controlling TTY by starting a new session.
///
/// Runs in `pre_exec`; falls back to a new process group when the child is
/// already a session leader.
pub(crate) fn detach_from_tty() -> io::Result<()> {
    if unsafe { libc::setsid() } == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) {
            return set_process_group();
        }
        return Err(err);
    }
    Ok(())
}

fn set_process_group() -> io::Result<()> {
    if unsafe { libc::setpgid(0, 0) } == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

static BACKGROUND_CHILDREN: Lazy<Mutex<Vec<u32>>> = Lazy::new(|| Mutex::new(Vec::new()));
static EXIT_HOOK: Once = Once::new();

/// Track a background child so it is interrupted when this process exits.
pub(crate) fn register_background_child(pid: u32) {
    EXIT_HOOK.call_once(|| {
        if unsafe { libc::atexit(interrupt_background_children) } != 0 {
            warn!("failed to install exit hook for background commands");
        }
    });
    BACKGROUND_CHILDREN.lock().push(pid);
}

/// Stop tracking a background child, typically once it has been reaped.
pub(crate) fn forget_background_child(pid: u32) {
    BACKGROUND_CHILDREN.lock().retain(|&tracked| tracked != pid);
}

#[cfg(test)]
pub(crate) fn is_background_child(pid: u32) -> bool {
    BACKGROUND_CHILDREN.lock().contains(&pid)
}

extern "C" fn interrupt_background_children() {
    // Another thread may hold the lock while the process exits.
    let Some(mut children) = BACKGROUND_CHILDREN.try_lock() else {
        return;
    };
    for pid in children.drain(..) {
        if let Err(errno) = send_signal(pid, Signal::SIGINT) {
            warn!(pid, error = %errno, "failed to interrupt background command at exit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn poll_times_out_without_data() -> anyhow::Result<()> {
        let (reader, _writer) = UnixStream::pair()?;
        let ready = poll_readable(&[reader.as_raw_fd()], Duration::from_millis(10))?;
        assert_eq!(ready, vec![None]);
        Ok(())
    }

    #[test]
    fn poll_reports_readable_data() -> anyhow::Result<()> {
        let (reader, mut writer) = UnixStream::pair()?;
        writer.write_all(b"ping")?;
        let ready = poll_readable(&[reader.as_raw_fd()], Duration::from_millis(100))?;
        assert_eq!(ready, vec![Some(Readiness::Readable)]);
        Ok(())
    }

    #[test]
    fn nonblocking_read_would_block() -> anyhow::Result<()> {
        use std::io::Read;

        let (mut reader, _writer) = UnixStream::pair()?;
        set_nonblocking(reader.as_raw_fd())?;
        let mut buf = [0u8; 8];
        let err = reader.read(&mut buf).expect_err("no data yet");
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        Ok(())
    }

    #[test]
    fn signalling_missing_process_is_not_found() {
        // Pid numbers never reach this value on Linux (pid_max <= 2^22).
        let outcome = send_signal(0x7fff_fff0, Signal::SIGINT);
        assert_eq!(outcome, Ok(SignalOutcome::NotFound));
    }

    #[test]
    fn signalling_pid_zero_is_rejected() {
        assert_eq!(send_signal(0, Signal::SIGINT), Err(Errno::EINVAL));
        assert_eq!(send_signal(u32::MAX, Signal::SIGINT), Err(Errno::EINVAL));
    }

    #[test]
    fn background_registry_tracks_and_forgets() {
        register_background_child(0x7fff_fff1);
        assert!(is_background_child(0x7fff_fff1));
        forget_background_child(0x7fff_fff1);
        assert!(!is_background_child(0x7fff_fff1));
    }
}
