//! Output sink: a bounded byte channel between the synchronous document
//! writer and async consumers.

use std::io::{self, Write};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::OutputConfig;

/// How a compose call hands back its document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// A live [`OutputStream`], readable while pages are still being written
    Stream,
    /// One concatenated buffer once the document is complete
    #[default]
    Buffer,
}

/// Create a connected writer/stream pair sized by `config`.
pub fn channel(config: &OutputConfig) -> (ChannelWriter, OutputStream) {
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    (
        ChannelWriter {
            tx,
            buf: Vec::with_capacity(config.chunk_size),
            chunk_size: config.chunk_size.max(1),
            written: 0,
        },
        OutputStream { rx },
    )
}

/// Blocking `io::Write` adapter that forwards fixed-size chunks into the
/// channel. Must only be used from a blocking worker thread.
pub struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
    buf: Vec<u8>,
    chunk_size: usize,
    written: u64,
}

impl ChannelWriter {
    /// Whether every consumer has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&mut self, chunk: Vec<u8>) -> io::Result<()> {
        let len = chunk.len() as u64;
        self.tx
            .blocking_send(Ok(Bytes::from(chunk)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "output stream closed"))?;
        self.written += len;
        Ok(())
    }

    /// Flush the tail and close the channel. Returns the total bytes written.
    pub fn finish(mut self) -> io::Result<u64> {
        self.flush()?;
        Ok(self.written)
    }

    /// Deliver `error` to the consumer as the final item.
    pub fn fail(self, error: &crate::Error) {
        let _ = self
            .tx
            .blocking_send(Err(io::Error::other(error.to_string())));
    }

    /// Like [`fail`](Self::fail), for callers still on the async runtime.
    pub async fn abort(self, error: &crate::Error) {
        let _ = self.tx.send(Err(io::Error::other(error.to_string()))).await;
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        while self.buf.len() >= self.chunk_size {
            let rest = self.buf.split_off(self.chunk_size);
            let chunk = std::mem::replace(&mut self.buf, rest);
            self.send(chunk)?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::take(&mut self.buf);
        self.send(chunk)
    }
}

/// The composed document as a stream of byte chunks. A failed composition
/// ends the stream with an error item.
pub struct OutputStream {
    rx: mpsc::Receiver<io::Result<Bytes>>,
}

impl OutputStream {
    /// Read the stream to completion into one buffer.
    pub async fn collect(mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }
}

impl Stream for OutputStream {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
