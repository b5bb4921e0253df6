//! Line codec for the provider's stdio streams.
//!
//! Providers are free to print banners, progress bars and log lines on
//! stdout.  Only lines that parse as a JSON object with a `jsonrpc` key
//! are protocol frames; everything else goes to a [`DiagnosticSink`].

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::BridgeError;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Message(Value),
    Diagnostic(String),
}

/// Classify one line of provider stdout.  `None` for blank lines.
pub fn classify_line(line: &str) -> Option<Frame> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) if value.is_object() && value.get("jsonrpc").is_some() => {
            Some(Frame::Message(value))
        }
        _ => Some(Frame::Diagnostic(trimmed.to_string())),
    }
}

/// Longest line, newline included, the reader will buffer.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Reads frames from a provider's stdout.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
    max_frame: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_max_frame(reader, MAX_FRAME_BYTES)
    }

    pub fn with_max_frame(reader: R, max_frame: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            buf: Vec::with_capacity(1024),
            max_frame: max_frame.max(1),
        }
    }

    /// Next non-blank frame, or `None` at end of stream.
    ///
    /// Invalid UTF-8 is replaced rather than treated as a stream error, so
    /// a provider printing binary junk only produces diagnostics.  A line
    /// longer than the frame limit is skipped without being buffered and
    /// reported as a diagnostic.
    pub async fn next_frame(&mut self) -> std::io::Result<Option<Frame>> {
        loop {
            self.buf.clear();
            let limit = self.max_frame as u64;
            let n = (&mut self.inner)
                .take(limit)
                .read_until(b'\n', &mut self.buf)
                .await?;
            if n == 0 {
                return Ok(None);
            }
            if n as u64 == limit && self.buf.last() != Some(&b'\n') {
                let dropped = n + self.skip_line().await?;
                return Ok(Some(Frame::Diagnostic(format!(
                    "dropped oversized line ({dropped} bytes, limit {})",
                    self.max_frame
                ))));
            }
            let line = String::from_utf8_lossy(&self.buf);
            if let Some(frame) = classify_line(&line) {
                return Ok(Some(frame));
            }
        }
    }

    /// Discard input up to and including the next newline.
    async fn skip_line(&mut self) -> std::io::Result<usize> {
        let mut skipped = 0;
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return Ok(skipped);
            }
            match available.iter().position(|b| *b == b'\n') {
                Some(i) => {
                    self.inner.consume(i + 1);
                    return Ok(skipped + i + 1);
                }
                None => {
                    let len = available.len();
                    self.inner.consume(len);
                    skipped += len;
                }
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Writes newline-terminated JSON frames to the provider's stdin.
///
/// Not internally synchronized; the correlator holds it behind a mutex.
pub struct FrameWriter {
    inner: Box<dyn AsyncWrite + Send + Unpin>,
}

impl FrameWriter {
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            inner: Box::new(writer),
        }
    }

    /// Serialize `msg` to one compact line and write it in a single call.
    pub async fn write_frame<T: Serialize>(&mut self, msg: &T) -> Result<(), BridgeError> {
        let mut line = serde_json::to_vec(msg)?;
        line.push(b'\n');
        self.inner.write_all(&line).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Close the stream (the provider sees EOF on stdin).
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.inner.shutdown().await {
            tracing::debug!(error = %e, "error closing provider stdin");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Diagnostics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Destination for non-protocol provider output.
pub trait DiagnosticSink: Send + Sync {
    /// A non-protocol line from stdout.
    fn stdout_line(&self, provider: &str, line: &str);
    /// A line from stderr.
    fn stderr_line(&self, provider: &str, line: &str);
}

/// Emits provider output as `tracing` events under the `provider` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticSink for TracingDiagnostics {
    fn stdout_line(&self, provider: &str, line: &str) {
        tracing::debug!(target: "provider", provider = %provider, stream = "stdout", "{line}");
    }

    fn stderr_line(&self, provider: &str, line: &str) {
        tracing::warn!(target: "provider", provider = %provider, stream = "stderr", "{line}");
    }
}
