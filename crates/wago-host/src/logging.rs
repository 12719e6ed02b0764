//! Guest stderr forwarded to `tracing`.
//!
//! Anything the guest writes to stderr is emitted as a log event tagged
//! with the request id and `guest_log = true`, one event per line.

use std::sync::Arc;

use bytes::Bytes;
use tracing::info;
use wasmtime_wasi::{HostOutputStream, StdoutStream, StreamResult, Subscribe};

/// Bytes the guest may write per call before checking back in.
const WRITE_BUDGET: usize = 64 * 1024;

/// Guest stderr that logs each line.
#[derive(Debug, Clone)]
pub struct GuestStderr {
    request_id: Arc<str>,
}

impl GuestStderr {
    /// Create a stderr stream for the given request.
    pub fn new(request_id: &str) -> Self {
        Self {
            request_id: Arc::from(request_id),
        }
    }

    /// Emit one guest write.
    pub fn log(&self, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        for line in text.lines().filter(|line| !line.is_empty()) {
            info!(request_id = %self.request_id, guest_log = true, "{}", line);
        }
    }
}

impl StdoutStream for GuestStderr {
    fn stream(&self) -> Box<dyn HostOutputStream> {
        Box::new(self.clone())
    }

    fn isatty(&self) -> bool {
        false
    }
}

#[async_trait::async_trait]
impl Subscribe for GuestStderr {
    async fn ready(&mut self) {}
}

#[async_trait::async_trait]
impl HostOutputStream for GuestStderr {
    fn write(&mut self, bytes: Bytes) -> StreamResult<()> {
        self.log(&bytes);
        Ok(())
    }

    fn flush(&mut self) -> StreamResult<()> {
        Ok(())
    }

    fn check_write(&mut self) -> StreamResult<usize> {
        Ok(WRITE_BUDGET)
    }
}
