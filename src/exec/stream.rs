// src/exec/stream.rs

//! Concurrent stdout/stderr readers.
//!
//! Each pipe gets its own Tokio task so a slow consumer of one stream never
//! blocks the other. Every line is timestamped, tagged with the command name
//! and stream kind, appended to an [`OutputBuffer`] and optionally echoed to
//! the [`Reporter`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{ChildStderr, ChildStdout};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::report::Reporter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamKind::Stdout => f.write_str("stdout"),
            StreamKind::Stderr => f.write_str("stderr"),
        }
    }
}

/// One line of process output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputLine {
    pub timestamp: DateTime<Utc>,
    pub command: String,
    pub stream: StreamKind,
    pub text: String,
}

impl fmt::Display for OutputLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [{}]",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.command
        )?;
        if self.stream == StreamKind::Stderr {
            f.write_str(" [stderr]")?;
        }
        write!(f, " {}", self.text)
    }
}

/// Shared, optionally bounded, line buffer. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    lines: Arc<Mutex<VecDeque<OutputLine>>>,
    capacity: Option<usize>,
}

impl OutputBuffer {
    /// Unbounded buffer (Once commands).
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps only the most recent `capacity` lines (keepAlive processes).
    pub fn bounded(capacity: usize) -> Self {
        Self {
            lines: Arc::default(),
            capacity: Some(capacity.max(1)),
        }
    }

    pub fn push(&self, line: OutputLine) {
        let mut lines = self.lock();
        if let Some(cap) = self.capacity {
            while lines.len() >= cap {
                lines.pop_front();
            }
        }
        lines.push_back(line);
    }

    pub fn lines(&self) -> Vec<OutputLine> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// All lines in arrival order, one per line.
    pub fn render(&self) -> String {
        join_lines(self.lock().iter())
    }

    /// Lines of a single stream in arrival order.
    pub fn render_stream(&self, kind: StreamKind) -> String {
        join_lines(self.lock().iter().filter(|l| l.stream == kind))
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<OutputLine>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn join_lines<'a>(lines: impl Iterator<Item = &'a OutputLine>) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(&line.text);
        out.push('\n');
    }
    out
}

/// Spawns reader tasks for one process.
#[derive(Clone)]
pub struct OutputStreamer {
    name: String,
    buffer: OutputBuffer,
    reporter: Option<Arc<dyn Reporter>>,
    stop: CancellationToken,
}

impl fmt::Debug for OutputStreamer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputStreamer")
            .field("name", &self.name)
            .field("echo", &self.reporter.is_some())
            .finish_non_exhaustive()
    }
}

impl OutputStreamer {
    pub fn new(name: impl Into<String>, buffer: OutputBuffer, stop: CancellationToken) -> Self {
        Self {
            name: name.into(),
            buffer,
            reporter: None,
            stop,
        }
    }

    /// Also hand every line to `reporter` as it arrives.
    pub fn echo_to(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn buffer(&self) -> &OutputBuffer {
        &self.buffer
    }

    /// Spawn readers for whichever child pipes are present.
    pub fn attach(
        &self,
        stdout: Option<ChildStdout>,
        stderr: Option<ChildStderr>,
    ) -> Vec<JoinHandle<usize>> {
        let mut handles = Vec::with_capacity(2);
        if let Some(stdout) = stdout {
            handles.push(self.spawn(stdout, StreamKind::Stdout));
        }
        if let Some(stderr) = stderr {
            handles.push(self.spawn(stderr, StreamKind::Stderr));
        }
        handles
    }

    /// Read `reader` line by line until EOF, a read error, or the stop token
    /// fires. Resolves to the number of lines read.
    pub fn spawn<R>(&self, reader: R, kind: StreamKind) -> JoinHandle<usize>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move { this.read_lines(reader, kind).await })
    }

    async fn read_lines<R>(self, reader: R, kind: StreamKind) -> usize
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::with_capacity(256);
        let mut count = 0usize;

        loop {
            buf.clear();
            let read = tokio::select! {
                biased;
                _ = self.stop.cancelled() => {
                    debug!(command = %self.name, stream = %kind, "output reader stopped");
                    break;
                }
                read = reader.read_until(b'\n', &mut buf) => read,
            };

            match read {
                Ok(0) => break,
                Ok(_) => {
                    count += 1;
                    self.emit(kind, decode_line(&buf));
                }
                Err(e) => {
                    debug!(command = %self.name, stream = %kind, error = %e, "output pipe closed with error");
                    break;
                }
            }
        }

        count
    }

    fn emit(&self, stream: StreamKind, text: String) {
        let line = OutputLine {
            timestamp: Utc::now(),
            command: self.name.clone(),
            stream,
            text,
        };
        if let Some(reporter) = &self.reporter {
            reporter.on_output_line(&line);
        }
        self.buffer.push(line);
    }
}

/// Lossy UTF-8 decode without the trailing line terminator; invalid bytes
/// become U+FFFD instead of ending the reader.
fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    if end > 0 && raw[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && raw[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// Wait for reader tasks, giving up after `drain` and stopping the rest.
///
/// Background grandchildren can inherit the pipes and keep them open after
/// the direct child exits, so EOF is not guaranteed.
pub async fn join_readers(
    name: &str,
    handles: Vec<JoinHandle<usize>>,
    stop: &CancellationToken,
    drain: Duration,
) {
    let joined = tokio::time::timeout(drain, async {
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(command = %name, error = %e, "output reader task failed");
            }
        }
    })
    .await;

    if joined.is_err() {
        debug!(command = %name, "output pipes still open after drain period; stopping readers");
        stop.cancel();
    }
}
