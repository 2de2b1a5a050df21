//! Destinations for progress lines and long-running command output.

use std::io::{self, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

/// Receives the text a [`Shell`](crate::Shell) reports while running
/// commands. Implementations serialise their own writes.
pub trait ReportSink: Send + Sync {
    /// Write `message`, followed by a newline when `newline` is set.
    fn write_report(&self, message: &str, newline: bool) -> io::Result<()>;

    /// Like [`write_report`](Self::write_report), but a failing sink never
    /// interrupts the command being reported on.
    fn report(&self, message: &str, newline: bool) {
        if let Err(err) = self.write_report(message, newline) {
            debug!(error = %err, "failed to write command report");
        }
    }
}

/// Reports to the process's standard error stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl ReportSink for StderrSink {
    fn write_report(&self, message: &str, newline: bool) -> io::Result<()> {
        let mut stderr = io::stderr().lock();
        write_message(&mut stderr, message, newline)
    }
}

/// Reports to any writer, e.g. a log file.
pub struct WriterSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> ReportSink for WriterSink<W> {
    fn write_report(&self, message: &str, newline: bool) -> io::Result<()> {
        let mut writer = self.writer.lock();
        write_message(&mut *writer, message, newline)
    }
}

/// Keeps everything reported in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    buffer: Arc<Mutex<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything reported so far.
    pub fn contents(&self) -> String {
        self.buffer.lock().clone()
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}

impl ReportSink for MemorySink {
    fn write_report(&self, message: &str, newline: bool) -> io::Result<()> {
        let mut buffer = self.buffer.lock();
        buffer.push_str(message);
        if newline {
            buffer.push('\n');
        }
        Ok(())
    }
}

fn write_message<W: Write + ?Sized>(writer: &mut W, message: &str, newline: bool) -> io::Result<()> {
    writer.write_all(message.as_bytes())?;
    if newline {
        writer.write_all(b"\n")?;
    }
    writer.flush()
}
