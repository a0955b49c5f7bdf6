//! The transport contract and its hyper-backed implementation.
//!
//! # Flow control
//!
//! A [`Response`](crate::Response) never writes to a socket directly. It
//! writes into a [`Sink`], which answers every `write` with an acceptance
//! signal:
//!
//! - `true`: the chunk was taken and the consumer is keeping up.
//! - `false`: the chunk was taken too, but buffered data has reached the
//!   high-water mark. The writer must stop and await [`Sink::drained`]
//!   before writing again.
//!
//! [`pipe`] builds the sink the server uses. Body chunks travel over an
//! unbounded channel into a [`PipeBody`] that hyper polls; the number of
//! bytes sitting in the channel is the buffer that the acceptance signal
//! reports on. Every frame hyper pulls lowers that count and wakes writers
//! parked in `drained`.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use http_body_util::StreamBody;
use hyper::body::Frame;
use tokio::sync::{Notify, mpsc, oneshot};

use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::middleware::BoxFuture;

/// Bytes buffered between writer and consumer before `write` reports pressure.
pub const HIGH_WATER_MARK: usize = 16 * 1024;

/// Writable side of a connection, as seen by a response.
pub trait Sink: Send + 'static {
    /// Writes the status line and header block. Called exactly once, before
    /// any body byte.
    fn write_head(&mut self, status: u16, headers: &Headers) -> Result<()>;

    /// Queues a body chunk. `Ok(false)` asks the caller to await
    /// [`drained`](Sink::drained) before the next write.
    fn write(&mut self, chunk: Bytes) -> Result<bool>;

    /// Queues an optional final chunk and closes the body.
    fn end(&mut self, chunk: Option<Bytes>) -> Result<()>;

    /// Resolves once the consumer has caught up. Fails with
    /// [`Error::Closed`] if the consumer went away instead.
    fn drained(&mut self) -> BoxFuture<'_, Result<()>>;

    /// `false` once the body was ended or the consumer is gone.
    fn is_writable(&self) -> bool;
}

// ── Pipe ──────────────────────────────────────────────────────────────────────

/// Status and header block handed over by a [`PipeSink`].
#[derive(Debug)]
pub struct Head {
    pub status: u16,
    pub headers: Headers,
}

/// Streaming hyper body fed by a [`PipeSink`].
pub type PipeBody = StreamBody<PipeStream>;

struct Shared {
    buffered: AtomicUsize,
    closed: AtomicBool,
    drain: Notify,
    high_water: usize,
}

/// Creates a connected sink/body pair.
///
/// The head arrives on the returned receiver when the response sends its
/// headers; the body yields every chunk written afterwards and finishes when
/// the response ends. Dropping the body (client gone) makes the sink fail
/// with [`Error::Closed`].
pub fn pipe(high_water: usize) -> (PipeSink, oneshot::Receiver<Head>, PipeBody) {
    let (head_tx, head_rx) = oneshot::channel();
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared {
        buffered: AtomicUsize::new(0),
        closed: AtomicBool::new(false),
        drain: Notify::new(),
        high_water,
    });

    let sink = PipeSink { head: Some(head_tx), tx: Some(tx), shared: Arc::clone(&shared) };
    let body = StreamBody::new(PipeStream { rx, shared });
    (sink, head_rx, body)
}

/// Writer half of a [`pipe`].
pub struct PipeSink {
    head: Option<oneshot::Sender<Head>>,
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    shared: Arc<Shared>,
}

impl PipeSink {
    fn send(&self, chunk: Bytes) -> Result<bool> {
        let tx = self.tx.as_ref().ok_or(Error::Ended)?;
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        let len = chunk.len();
        let buffered = self.shared.buffered.fetch_add(len, Ordering::AcqRel) + len;
        tx.send(chunk).map_err(|_| Error::Closed)?;
        Ok(buffered < self.shared.high_water)
    }
}

impl Sink for PipeSink {
    fn write_head(&mut self, status: u16, headers: &Headers) -> Result<()> {
        let head = self.head.take().ok_or(Error::HeadersSent)?;
        head.send(Head { status, headers: headers.clone() })
            .map_err(|_| Error::Closed)
    }

    fn write(&mut self, chunk: Bytes) -> Result<bool> {
        if chunk.is_empty() {
            return Ok(self.shared.buffered.load(Ordering::Acquire) < self.shared.high_water);
        }
        self.send(chunk)
    }

    fn end(&mut self, chunk: Option<Bytes>) -> Result<()> {
        if let Some(chunk) = chunk.filter(|c| !c.is_empty()) {
            self.send(chunk)?;
        }
        // Dropping the sender finishes the body stream.
        self.tx.take().ok_or(Error::Ended)?;
        Ok(())
    }

    fn drained(&mut self) -> BoxFuture<'_, Result<()>> {
        let shared = Arc::clone(&self.shared);
        Box::pin(async move {
            loop {
                // Registered before the checks so a wakeup between check and
                // await is not lost.
                let notified = shared.drain.notified();
                if shared.closed.load(Ordering::Acquire) {
                    return Err(Error::Closed);
                }
                if shared.buffered.load(Ordering::Acquire) < shared.high_water {
                    return Ok(());
                }
                notified.await;
            }
        })
    }

    fn is_writable(&self) -> bool {
        self.tx.is_some() && !self.shared.closed.load(Ordering::Acquire)
    }
}

/// Reader half of a [`pipe`], wrapped by [`PipeBody`].
pub struct PipeStream {
    rx: mpsc::UnboundedReceiver<Bytes>,
    shared: Arc<Shared>,
}

impl Stream for PipeStream {
    type Item = std::result::Result<Frame<Bytes>, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(chunk)) => {
                let len = chunk.len();
                let before = self.shared.buffered.fetch_sub(len, Ordering::AcqRel);
                if before - len < self.shared.high_water {
                    self.shared.drain.notify_waiters();
                }
                Poll::Ready(Some(Ok(Frame::data(chunk))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PipeStream {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.drain.notify_waiters();
    }
}
