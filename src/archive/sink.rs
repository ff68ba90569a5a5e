//! Bridge from the blocking tar normalizer to an HTTP response body.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;

/// One item of a streamed response body.
pub type BodyChunk = io::Result<Bytes>;

/// Blocking [`Write`] half of a bounded body channel.
///
/// Writes must happen off the async runtime (e.g. in `spawn_blocking`); a
/// full channel blocks the writer, which in turn backs up the export
/// process.  Clones share one byte counter.
#[derive(Debug, Clone)]
pub struct BodySender {
    tx: mpsc::Sender<BodyChunk>,
    sent: Arc<AtomicU64>,
}

impl BodySender {
    pub fn channel(depth: usize) -> (Self, mpsc::Receiver<BodyChunk>) {
        let (tx, rx) = mpsc::channel(depth);
        let sender = Self {
            tx,
            sent: Arc::new(AtomicU64::new(0)),
        };
        (sender, rx)
    }

    /// Bytes handed to the receiver so far, across all clones.
    pub fn bytes_sent(&self) -> u64 {
        self.sent.load(Ordering::Acquire)
    }

    /// Terminate the body with an error.  If the response has already
    /// started this truncates it; otherwise the receiver sees the error
    /// before any data.
    pub async fn abort(&self, reason: &str) {
        let err = io::Error::other(reason.to_string());
        // The receiver being gone means nobody is listening any more.
        let _ = self.tx.send(Err(err)).await;
    }
}

impl Write for BodySender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response body closed"))?;
        self.sent.fetch_add(buf.len() as u64, Ordering::AcqRel);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
