//! Readiness-driven draining of a child's stdout and stderr.
//!
//! Both pipe read ends are non-blocking and multiplexed with `poll(2)` on the
//! caller's thread. Pipes are always drained before blocking on the child's
//! exit, so a child that fills a pipe buffer never deadlocks against us.
//!
//! Output is withheld from the report sink for a grace period. If the child
//! is still running when it expires, everything captured so far is flushed
//! as a "long running command output" notice and later output is echoed as
//! it arrives.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::os::fd::{AsRawFd, RawFd};
use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{Result, ShellError};
use crate::process_group::{Readiness, poll_readable};
use crate::report::ReportSink;
use crate::result::OutputStream;

/// Upper bound on a single readiness wait, so exit status is re-checked at
/// least this often.
pub(crate) const POLL_CEILING: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 4096;

/// A pipe read end and everything read from it.
pub(crate) struct Pipe {
    stream: OutputStream,
    file: File,
    accumulated: Vec<u8>,
    /// Bytes not yet echoed because they end in an incomplete UTF-8 sequence.
    pending: Vec<u8>,
    live: bool,
}

impl Pipe {
    pub(crate) fn new(stream: OutputStream, file: File) -> Self {
        Self {
            stream,
            file,
            accumulated: Vec::new(),
            pending: Vec::new(),
            live: true,
        }
    }

    pub(crate) fn stream(&self) -> OutputStream {
        self.stream
    }

    /// Everything read so far, decoded lossily.
    pub(crate) fn text(&self) -> String {
        String::from_utf8_lossy(&self.accumulated).into_owned()
    }

    /// Take the longest prefix of `pending` that can be decoded without
    /// splitting a character. At EOF everything left is taken.
    fn take_echo(&mut self, at_eof: bool) -> String {
        let complete = if at_eof {
            self.pending.len()
        } else {
            complete_prefix_len(&self.pending)
        };
        let bytes: Vec<u8> = self.pending.drain(..complete).collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl AsRawFd for Pipe {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

enum Echo {
    /// Grace period still running; chunks are held back.
    Buffered(Vec<String>),
    /// Chunks go straight to the sink.
    Live,
}

impl Echo {
    fn push(&mut self, text: String, sink: &dyn ReportSink) {
        if text.is_empty() {
            return;
        }
        match self {
            Echo::Buffered(chunks) => chunks.push(text),
            Echo::Live => sink.report(&text, false),
        }
    }
}

pub(crate) struct Drain<'a> {
    pipes: &'a mut [Pipe],
    echo: Echo,
    deadline: Instant,
    sink: &'a dyn ReportSink,
}

impl<'a> Drain<'a> {
    pub(crate) fn new(pipes: &'a mut [Pipe], grace: Duration, sink: &'a dyn ReportSink) -> Self {
        Self {
            pipes,
            echo: Echo::Buffered(Vec::new()),
            deadline: Instant::now() + grace,
            sink,
        }
    }

    /// Drain until every pipe hits EOF or the child exits, then collect the
    /// exit status.
    ///
    /// The pipes stay with the caller. On error they are still open and
    /// hold everything read so far, so the child keeps a reader.
    pub(crate) fn run(mut self, child: &mut Child, pid: u32) -> Result<ExitStatus> {
        let mut status = None;

        while self.pipes.iter().any(|pipe| pipe.live) {
            if let Some(exited) = child
                .try_wait()
                .map_err(|source| ShellError::Wait { pid, source })?
            {
                status = Some(exited);
                self.consume_live()?;
                break;
            }

            let budget = self.poll_budget();
            let live: Vec<usize> = (0..self.pipes.len())
                .filter(|&index| self.pipes.get(index).is_some_and(|pipe| pipe.live))
                .collect();
            let fds: Vec<_> = live
                .iter()
                .filter_map(|&index| self.pipes.get(index))
                .map(AsRawFd::as_raw_fd)
                .collect();

            let readiness =
                poll_readable(&fds, budget).map_err(|source| ShellError::Poll { source })?;

            for (index, ready) in live.into_iter().zip(readiness) {
                let Some(pipe) = self.pipes.get_mut(index) else {
                    continue;
                };
                match ready {
                    None => {}
                    Some(Readiness::Failed) => {
                        return Err(ShellError::StreamError {
                            stream: pipe.stream,
                        });
                    }
                    Some(Readiness::Readable) => drain_available(pipe, &mut self.echo, self.sink)?,
                }
            }
        }

        match status {
            Some(status) => Ok(status),
            None => child.wait().map_err(|source| ShellError::Wait { pid, source }),
        }
    }

    /// How long the next readiness wait may block. Flushes the held-back
    /// output once the grace period has expired.
    fn poll_budget(&mut self) -> Duration {
        if let Echo::Live = self.echo {
            return POLL_CEILING;
        }

        let now = Instant::now();
        if now < self.deadline {
            return (self.deadline - now).min(POLL_CEILING);
        }

        if let Echo::Buffered(chunks) = std::mem::replace(&mut self.echo, Echo::Live) {
            debug!("grace period expired; echoing command output live");
            self.sink.report("", true);
            self.sink.report("Long running command output:", true);
            self.sink.report(&chunks.concat(), true);
        }
        POLL_CEILING
    }

    /// One last read of every pipe that is still open.
    fn consume_live(&mut self) -> Result<()> {
        for pipe in self.pipes.iter_mut().filter(|pipe| pipe.live) {
            drain_available(pipe, &mut self.echo, self.sink)?;
        }
        Ok(())
    }
}

/// Read everything currently available on `pipe` without blocking.
fn drain_available(pipe: &mut Pipe, echo: &mut Echo, sink: &dyn ReportSink) -> Result<()> {
    let mut buf = [0u8; READ_CHUNK];
    loop {
        match pipe.file.read(&mut buf) {
            Ok(0) => {
                pipe.live = false;
                echo.push(pipe.take_echo(true), sink);
                return Ok(());
            }
            Ok(read) => {
                let chunk = buf.get(..read).unwrap_or_default();
                pipe.accumulated.extend_from_slice(chunk);
                pipe.pending.extend_from_slice(chunk);
                echo.push(pipe.take_echo(false), sink);
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(ShellError::Drain {
                    stream: pipe.stream,
                    source,
                });
            }
        }
    }
}

/// Read `pipes` to EOF and throw the data away, so a child whose handle was
/// abandoned never writes into a closed pipe. A pipe that fails is dropped.
pub(crate) fn discard(mut pipes: Vec<Pipe>) {
    let mut buf = [0u8; READ_CHUNK];
    while !pipes.is_empty() {
        let fds: Vec<_> = pipes.iter().map(AsRawFd::as_raw_fd).collect();
        let readiness = match poll_readable(&fds, POLL_CEILING) {
            Ok(readiness) => readiness,
            Err(err) => {
                debug!(error = %err, "giving up on abandoned command output");
                return;
            }
        };

        let mut open = Vec::with_capacity(pipes.len());
        for (mut pipe, ready) in pipes.into_iter().zip(readiness) {
            let keep = match ready {
                None => true,
                Some(Readiness::Failed) => false,
                Some(Readiness::Readable) => loop {
                    match pipe.file.read(&mut buf) {
                        Ok(0) => break false,
                        Ok(_) => {}
                        Err(err) if err.kind() == ErrorKind::WouldBlock => break true,
                        Err(err) if err.kind() == ErrorKind::Interrupted => {}
                        Err(err) => {
                            debug!(stream = %pipe.stream, error = %err, "dropping abandoned pipe");
                            break false;
                        }
                    }
                },
            };
            if keep {
                open.push(pipe);
            }
        }
        pipes = open;
    }
}

/// Length of the prefix of `bytes` that ends on a character boundary.
/// Invalid sequences count as complete; only a truncated trailing sequence
/// is held back.
fn complete_prefix_len(bytes: &[u8]) -> usize {
    let mut end = 0;
    loop {
        let rest = bytes.get(end..).unwrap_or_default();
        match std::str::from_utf8(rest) {
            Ok(_) => return bytes.len(),
            Err(err) => match err.error_len() {
                Some(invalid) => end += err.valid_up_to() + invalid,
                None => return end + err.valid_up_to(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_group::set_nonblocking;
    use crate::report::MemorySink;
    use std::io::Write;
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixStream;
    use std::process::{Command, Stdio};

    fn spawn(script: &str) -> anyhow::Result<(Child, Vec<Pipe>)> {
        let mut child = Command::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdout = File::from(OwnedFd::from(child.stdout.take().expect("stdout piped")));
        let stderr = File::from(OwnedFd::from(child.stderr.take().expect("stderr piped")));
        set_nonblocking(stdout.as_raw_fd())?;
        set_nonblocking(stderr.as_raw_fd())?;
        Ok((
            child,
            vec![
                Pipe::new(OutputStream::Stdout, stdout),
                Pipe::new(OutputStream::Stderr, stderr),
            ],
        ))
    }

    fn socket_pipe() -> anyhow::Result<(Pipe, UnixStream)> {
        let (reader, writer) = UnixStream::pair()?;
        set_nonblocking(reader.as_raw_fd())?;
        let file = File::from(OwnedFd::from(reader));
        Ok((Pipe::new(OutputStream::Stdout, file), writer))
    }

    #[test]
    fn collects_both_streams_separately() -> anyhow::Result<()> {
        let (mut child, mut pipes) = spawn("printf out; printf err >&2; exit 4")?;
        let pid = child.id();
        let sink = MemorySink::new();
        let status = Drain::new(&mut pipes, Duration::from_secs(3), &sink).run(&mut child, pid)?;

        assert_eq!(pipes[0].text(), "out");
        assert_eq!(pipes[1].text(), "err");
        assert_eq!(status.code(), Some(4));
        assert!(sink.contents().is_empty(), "fast commands are not echoed");
        Ok(())
    }

    #[test]
    fn output_larger_than_pipe_buffer_does_not_deadlock() -> anyhow::Result<()> {
        // 256 KiB on each stream, well past the default 64 KiB pipe buffer.
        let (mut child, mut pipes) =
            spawn("head -c 262144 /dev/zero | tr '\\0' a; head -c 262144 /dev/zero | tr '\\0' b >&2")?;
        let pid = child.id();
        let sink = MemorySink::new();
        Drain::new(&mut pipes, Duration::from_secs(30), &sink).run(&mut child, pid)?;

        let stdout = pipes[0].text();
        assert_eq!(stdout.len(), 262_144);
        assert_eq!(pipes[1].text().len(), 262_144);
        assert!(stdout.chars().all(|c| c == 'a'));
        Ok(())
    }

    #[test]
    fn slow_output_is_flushed_after_grace_period() -> anyhow::Result<()> {
        let (mut child, mut pipes) = spawn("printf early; sleep 0.4; printf late")?;
        let pid = child.id();
        let sink = MemorySink::new();
        Drain::new(&mut pipes, Duration::from_millis(100), &sink).run(&mut child, pid)?;

        assert_eq!(pipes[0].text(), "earlylate");
        assert_eq!(
            sink.contents(),
            "\nLong running command output:\nearly\nlate"
        );
        Ok(())
    }

    #[test]
    fn live_echo_keeps_characters_split_across_reads() -> anyhow::Result<()> {
        let (mut pipe, mut writer) = socket_pipe()?;
        let sink = MemorySink::new();
        let mut echo = Echo::Live;
        let snowman = "\u{2603}".as_bytes();

        writer.write_all(&snowman[..1])?;
        drain_available(&mut pipe, &mut echo, &sink)?;
        assert_eq!(sink.contents(), "");

        writer.write_all(&snowman[1..])?;
        writer.write_all(b"!")?;
        drain_available(&mut pipe, &mut echo, &sink)?;
        assert_eq!(sink.contents(), "\u{2603}!");
        Ok(())
    }

    #[test]
    fn truncated_sequence_is_echoed_at_eof() -> anyhow::Result<()> {
        let (mut pipe, mut writer) = socket_pipe()?;
        let sink = MemorySink::new();
        let mut echo = Echo::Live;

        writer.write_all(&[b'a', 0xE2, 0x98])?;
        drop(writer);
        drain_available(&mut pipe, &mut echo, &sink)?;
        assert_eq!(sink.contents(), "a\u{FFFD}");
        Ok(())
    }

    #[test]
    fn complete_prefix_skips_only_truncated_tail() {
        assert_eq!(complete_prefix_len(b"plain"), 5);
        assert_eq!(complete_prefix_len(&[b'a', 0xE2, 0x98]), 1);
        assert_eq!(complete_prefix_len(&[0xFF, b'b']), 2);
        assert_eq!(complete_prefix_len(&[0xFF, b'b', 0xE2]), 2);
    }

    #[test]
    fn discard_reads_until_writers_close() -> anyhow::Result<()> {
        let (pipe, mut writer) = socket_pipe()?;
        let feeder = std::thread::spawn(move || -> std::io::Result<()> {
            for _ in 0..64 {
                writer.write_all(&[b'x'; READ_CHUNK])?;
            }
            Ok(())
        });

        discard(vec![pipe]);
        assert!(feeder.join().is_ok_and(|written| written.is_ok()));
        Ok(())
    }
}
