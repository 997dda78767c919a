use std::sync::Mutex;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{trace, warn};

use crate::types::OutputStream;

const READ_CHUNK: usize = 8 * 1024;

// ---------------------------------------------------------------------------
// StreamWindow
// ---------------------------------------------------------------------------

/// The retained tail of one output stream, as raw bytes.
///
/// `dropped` counts every byte discarded from the head, so `dropped` is the
/// absolute offset of `data[0]` and [`end`](Self::end) never decreases.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamWindow {
    pub data: Vec<u8>,
    pub dropped: u64,
}

impl StreamWindow {
    /// Grow the window; past twice `max_bytes` cut it back to the most recent
    /// `max_bytes`, starting on a UTF-8 character boundary.
    fn append(&mut self, bytes: &[u8], max_bytes: usize) {
        self.data.extend_from_slice(bytes);
        if self.data.len() > max_bytes.saturating_mul(2) {
            let keep_from = self.data.len() - max_bytes;
            let cut = (keep_from..self.data.len())
                .find(|&i| is_char_start(self.data[i]))
                .unwrap_or(self.data.len());
            self.data.drain(..cut);
            self.dropped += cut as u64;
        }
    }

    /// Absolute offset one past the last retained byte.
    pub fn end(&self) -> u64 {
        self.dropped + self.data.len() as u64
    }

    pub fn is_truncated(&self) -> bool {
        self.dropped > 0
    }

    /// Whole window, decoded lossily.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Bytes from absolute `offset`, decoded lossily.
    ///
    /// An offset before the window starts at the window; one past the end
    /// yields empty data. Offsets always count raw bytes. Unless `closed`, a
    /// trailing partial character is held back until the rest of it arrives.
    pub fn read_since(&self, offset: u64, closed: bool) -> StreamRead {
        let start = offset.clamp(self.dropped, self.end());
        let tail = &self.data[(start - self.dropped) as usize..];
        let len = if closed {
            tail.len()
        } else {
            complete_prefix_len(tail)
        };
        StreamRead {
            offset: start,
            data: String::from_utf8_lossy(&tail[..len]).into_owned(),
            next_offset: start + len as u64,
            truncated: offset < self.dropped,
            closed,
        }
    }
}

/// Not a UTF-8 continuation byte (`10xxxxxx`).
fn is_char_start(b: u8) -> bool {
    (b as i8) >= -64
}

/// Length of the longest prefix that does not end inside a multi-byte
/// character. Invalid sequences in the middle are left for lossy decoding.
fn complete_prefix_len(bytes: &[u8]) -> usize {
    match std::str::from_utf8(bytes) {
        Ok(_) => bytes.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => bytes.len(),
    }
}

#[derive(Debug, Default)]
struct StreamBuffer {
    window: StreamWindow,
    closed: bool,
}

// ---------------------------------------------------------------------------
// OutputBuffer
// ---------------------------------------------------------------------------

/// Output collected from one child process: stdout and stderr, each bounded.
///
/// Written only by the launcher's pump tasks; read by anyone.
#[derive(Debug)]
pub struct OutputBuffer {
    max_bytes: usize,
    stdout: Mutex<StreamBuffer>,
    stderr: Mutex<StreamBuffer>,
}

/// Whole-buffer view, decoded lossily.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSnapshot {
    pub stdout: String,
    pub stderr: String,
    pub stdout_len: u64,
    pub stderr_len: u64,
    /// Some bytes were discarded from the head of at least one stream.
    pub truncated: bool,
}

/// Bytes read from an absolute offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRead {
    pub offset: u64,
    pub data: String,
    pub next_offset: u64,
    pub truncated: bool,
    pub closed: bool,
}

impl OutputBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            stdout: Mutex::new(StreamBuffer::default()),
            stderr: Mutex::new(StreamBuffer::default()),
        }
    }

    fn stream(&self, stream: OutputStream) -> std::sync::MutexGuard<'_, StreamBuffer> {
        let lock = match stream {
            OutputStream::Stdout => &self.stdout,
            OutputStream::Stderr => &self.stderr,
        };
        lock.lock().unwrap_or_else(|e| {
            warn!("output lock was poisoned, recovering");
            e.into_inner()
        })
    }

    pub fn append(&self, stream: OutputStream, bytes: &[u8]) {
        self.stream(stream).window.append(bytes, self.max_bytes);
    }

    /// Mark a stream as finished; no further appends are expected.
    pub fn close(&self, stream: OutputStream) {
        self.stream(stream).closed = true;
    }

    pub fn is_closed(&self, stream: OutputStream) -> bool {
        self.stream(stream).closed
    }

    pub fn snapshot(&self) -> OutputSnapshot {
        let out = self.stream(OutputStream::Stdout);
        let err = self.stream(OutputStream::Stderr);
        OutputSnapshot {
            stdout: out.window.text(),
            stderr: err.window.text(),
            stdout_len: out.window.end(),
            stderr_len: err.window.end(),
            truncated: out.window.is_truncated() || err.window.is_truncated(),
        }
    }

    /// Copy of one stream's raw window.
    pub fn window(&self, stream: OutputStream) -> StreamWindow {
        self.stream(stream).window.clone()
    }

    /// Read one stream from absolute `offset`. See [`StreamWindow::read_since`].
    pub fn read_since(&self, stream: OutputStream, offset: u64) -> StreamRead {
        let buf = self.stream(stream);
        buf.window.read_since(offset, buf.closed)
    }
}

/// Copy `reader` into `buffer` until EOF, then close the stream.
pub(crate) async fn pump<R>(mut reader: R, buffer: std::sync::Arc<OutputBuffer>, stream: OutputStream)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buffer.append(stream, &chunk[..n]),
            Err(e) => {
                warn!(stream = stream.as_str(), error = %e, "output read failed");
                break;
            }
        }
    }
    trace!(stream = stream.as_str(), "output stream closed");
    buffer.close(stream);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
