//! In-memory sink for exercising middleware without a socket.
//!
//! ```rust
//! use conduit::{Request, Response};
//! use conduit::testing::MemorySink;
//!
//! let (sink, record) = MemorySink::new();
//! let mut res = Response::new(sink);
//! res.render_text("hello", "text/plain", 200).unwrap();
//!
//! assert_eq!(record.status(), Some(200));
//! assert_eq!(record.body(), b"hello");
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use tokio::sync::Semaphore;

use crate::error::{Error, Result};
use crate::headers::Headers;
use crate::middleware::BoxFuture;
use crate::sink::Sink;

/// One observed call on a [`MemorySink`], in order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkEvent {
    Head(u16),
    Write(usize),
    Drain,
    End(usize),
}

#[derive(Default)]
struct State {
    head: Option<(u16, Headers)>,
    writes: Vec<Bytes>,
    end: Option<Option<Bytes>>,
    events: Vec<SinkEvent>,
    disconnected: bool,
}

/// Shared view of everything a [`MemorySink`] received.
#[derive(Clone)]
pub struct Record {
    state: Arc<Mutex<State>>,
    drain: Arc<Semaphore>,
}

impl Record {
    fn lock(&self) -> MutexGuard<'_, State> {
        // A test that panicked mid-write still leaves readable state behind.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn status(&self) -> Option<u16> {
        self.lock().head.as_ref().map(|(status, _)| *status)
    }

    pub fn headers(&self) -> Option<Headers> {
        self.lock().head.as_ref().map(|(_, headers)| headers.clone())
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.lock().head.as_ref()?.1.get(name).map(str::to_owned)
    }

    /// Chunks passed to `write`, excluding the final `end` chunk.
    pub fn writes(&self) -> Vec<Bytes> {
        self.lock().writes.clone()
    }

    /// `Some(chunk)` once the body was ended; the inner value is the final chunk.
    pub fn end_chunk(&self) -> Option<Option<Bytes>> {
        self.lock().end.clone()
    }

    pub fn is_ended(&self) -> bool {
        self.lock().end.is_some()
    }

    /// Every body byte received, in order.
    pub fn body(&self) -> Vec<u8> {
        let state = self.lock();
        let mut body: Vec<u8> = state.writes.iter().flat_map(|c| c.iter().copied()).collect();
        if let Some(Some(last)) = &state.end {
            body.extend_from_slice(last);
        }
        body
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.lock().events.clone()
    }

    /// Lets one pending `drained` call of a gated sink resolve.
    pub fn release_drain(&self) {
        self.drain.add_permits(1);
    }

    /// Simulates the client going away: later writes and drains fail.
    pub fn disconnect(&self) {
        self.lock().disconnected = true;
        self.drain.close();
    }
}

/// A [`Sink`] that records every call.
///
/// By default every write is accepted without pressure. Use
/// [`with_backpressure`](MemorySink::with_backpressure) to make each write
/// report a full buffer, and [`gated`](MemorySink::gated) to also hold each
/// drain until the test calls [`Record::release_drain`].
pub struct MemorySink {
    record: Record,
    backpressure: bool,
    gated: bool,
}

impl MemorySink {
    pub fn new() -> (Self, Record) {
        let record = Record {
            state: Arc::default(),
            drain: Arc::new(Semaphore::new(0)),
        };
        let sink = Self { record: record.clone(), backpressure: false, gated: false };
        (sink, record)
    }

    pub fn with_backpressure() -> (Self, Record) {
        let (mut sink, record) = Self::new();
        sink.backpressure = true;
        (sink, record)
    }

    pub fn gated() -> (Self, Record) {
        let (mut sink, record) = Self::with_backpressure();
        sink.gated = true;
        (sink, record)
    }
}

impl Sink for MemorySink {
    fn write_head(&mut self, status: u16, headers: &Headers) -> Result<()> {
        let mut state = self.record.lock();
        if state.disconnected {
            return Err(Error::Closed);
        }
        if state.head.is_some() {
            return Err(Error::HeadersSent);
        }
        state.head = Some((status, headers.clone()));
        state.events.push(SinkEvent::Head(status));
        Ok(())
    }

    fn write(&mut self, chunk: Bytes) -> Result<bool> {
        let mut state = self.record.lock();
        if state.disconnected {
            return Err(Error::Closed);
        }
        if state.end.is_some() {
            return Err(Error::Ended);
        }
        state.events.push(SinkEvent::Write(chunk.len()));
        state.writes.push(chunk);
        Ok(!self.backpressure)
    }

    fn end(&mut self, chunk: Option<Bytes>) -> Result<()> {
        let mut state = self.record.lock();
        if state.disconnected {
            return Err(Error::Closed);
        }
        if state.end.is_some() {
            return Err(Error::Ended);
        }
        state.events.push(SinkEvent::End(chunk.as_ref().map_or(0, Bytes::len)));
        state.end = Some(chunk);
        Ok(())
    }

    fn drained(&mut self) -> BoxFuture<'_, Result<()>> {
        let record = self.record.clone();
        let gated = self.gated;
        Box::pin(async move {
            if gated {
                let permit = record.drain.acquire().await.map_err(|_| Error::Closed)?;
                permit.forget();
            }
            let mut state = record.lock();
            if state.disconnected {
                return Err(Error::Closed);
            }
            state.events.push(SinkEvent::Drain);
            Ok(())
        })
    }

    fn is_writable(&self) -> bool {
        let state = self.record.lock();
        !state.disconnected && state.end.is_none()
    }
}
