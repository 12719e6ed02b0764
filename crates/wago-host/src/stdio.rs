//! Guest stdin and stdout bound to the HTTP exchange.
//!
//! - [`GuestStdout`] feeds every guest write into a shared [`Demultiplexer`]
//!   and stalls the guest while the sink's body budget is used up
//! - [`request_stdin`] exposes the request body as an async stdin stream

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::AsyncRead;
use tracing::trace;
use wasmtime_wasi::pipe::AsyncReadStream;
use wasmtime_wasi::{
    AsyncStdinStream, HostOutputStream, StdoutStream, StreamError, StreamResult, Subscribe,
};

use wago_common::ProtocolError;
use wago_core::{BodyBudget, Demultiplexer, ResponseSink};

/// Bytes the guest may write per call before checking back in.
const WRITE_BUDGET: usize = 64 * 1024;

/// Preview1 `fd_write` hands a large write over in pieces of this size.
const WASI_WRITE_PIECE: usize = 4096;

/// Guest stdout that drives a [`Demultiplexer`].
///
/// The demultiplexer is shared with the session that created it, so the
/// session can inspect the outcome once the guest has finished.
///
/// When the sink has a [`BodyBudget`], only the remaining budget is reported
/// as writable and [`Subscribe::ready`] waits for the consumer to drain.
pub struct GuestStdout<S> {
    demux: Arc<Mutex<Demultiplexer<S>>>,
    budget: Option<BodyBudget>,
}

impl<S: ResponseSink> GuestStdout<S> {
    /// Wrap a shared demultiplexer.
    pub fn new(demux: Arc<Mutex<Demultiplexer<S>>>) -> Self {
        let budget = demux.lock().sink().body_budget();
        Self { demux, budget }
    }
}

impl<S> Clone for GuestStdout<S> {
    fn clone(&self) -> Self {
        Self {
            demux: Arc::clone(&self.demux),
            budget: self.budget.clone(),
        }
    }
}

impl<S: ResponseSink + Send + 'static> StdoutStream for GuestStdout<S> {
    fn stream(&self) -> Box<dyn HostOutputStream> {
        Box::new(self.clone())
    }

    fn isatty(&self) -> bool {
        false
    }
}

#[async_trait::async_trait]
impl<S: ResponseSink + Send + 'static> Subscribe for GuestStdout<S> {
    async fn ready(&mut self) {
        if let Some(budget) = &self.budget {
            budget.wait_available().await;
        }
    }
}

#[async_trait::async_trait]
impl<S: ResponseSink + Send + 'static> HostOutputStream for GuestStdout<S> {
    fn write(&mut self, bytes: Bytes) -> StreamResult<()> {
        let mut demux = self.demux.lock();

        // A full piece may stop in the middle of a line the next piece ends
        let consumed = if bytes.len() == WASI_WRITE_PIECE {
            demux.feed_continued(&bytes)
        } else {
            demux.feed(&bytes)
        }
        .map_err(protocol_trap)?;

        trace!(written = bytes.len(), consumed, "Guest stdout write");
        Ok(())
    }

    fn flush(&mut self) -> StreamResult<()> {
        Ok(())
    }

    fn check_write(&mut self) -> StreamResult<usize> {
        if let Some(err) = self.demux.lock().failure() {
            return Err(protocol_trap(err.clone()));
        }

        match &self.budget {
            None => Ok(WRITE_BUDGET),
            Some(budget) if budget.is_closed() => Err(protocol_trap(ProtocolError::BodyClosed)),
            Some(budget) => Ok(budget.available().min(WRITE_BUDGET)),
        }
    }
}

/// A protocol violation ends the guest run.
fn protocol_trap(err: ProtocolError) -> StreamError {
    StreamError::Trap(wasmtime::Error::new(err))
}

/// Build a guest stdin stream that reads `reader` on demand.
///
/// Bytes are pulled only as the guest reads them. Must be called from
/// within a Tokio runtime.
pub fn request_stdin<R>(reader: R) -> AsyncStdinStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    AsyncStdinStream::new(AsyncReadStream::new(reader))
}
