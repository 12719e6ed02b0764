//! One guest run bound to one HTTP exchange.
//!
//! A [`Session`] owns everything a single request needs: its environment,
//! the body reader used as guest stdin, and the sink the guest's stdout
//! is decoded into. [`Session::evaluate`] consumes it, so a session runs
//! at most once.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncRead;
use tracing::{debug, instrument};

use wago_common::RuntimeError;
use wago_core::{
    Demultiplexer, ENTRY_POINT, ExecutionEnvironment, ExecutionMetrics, SessionContext,
};
use wago_host::{GuestStderr, GuestStdout, request_stdin, wasi_context};

use crate::response::StreamingSink;
use crate::state::AppState;

/// A single request waiting to be run.
pub struct Session<R> {
    request_id: String,
    environment: ExecutionEnvironment,
    stdin: R,
    sink: StreamingSink,
}

impl<R> Session<R>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    /// Create a session.
    pub fn new(
        request_id: impl Into<String>,
        environment: ExecutionEnvironment,
        stdin: R,
        sink: StreamingSink,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            environment,
            stdin,
            sink,
        }
    }

    /// Run the guest for this request to completion.
    ///
    /// Output is streamed into the sink while the guest runs. If the guest
    /// fails after the headers went out, the body is terminated with an
    /// error so the client sees a truncated response.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the run. A protocol violation takes
    /// precedence over the trap it caused.
    #[instrument(skip_all, fields(request_id = %self.request_id))]
    pub async fn evaluate(self, state: &AppState) -> Result<ExecutionMetrics, RuntimeError> {
        let demux = Arc::new(Mutex::new(Demultiplexer::new(self.sink, state.gateway_config())));

        let wasi = wasi_context(
            &self.environment,
            request_stdin(self.stdin),
            GuestStdout::new(Arc::clone(&demux)),
            GuestStderr::new(&self.request_id),
        );
        let context = SessionContext::new(self.request_id, wasi, state.exec_config());

        let run = state
            .runner()
            .run(state.module(), state.exec_config(), context, ENTRY_POINT)
            .await;

        let mut demux = demux.lock();
        let result = match (demux.failure().cloned(), run) {
            (Some(protocol), _) => Err(RuntimeError::Protocol(protocol)),
            (None, Err(e)) => Err(e),
            (None, Ok(metrics)) => demux
                .finish()
                .map(|()| metrics)
                .map_err(RuntimeError::Protocol),
        };

        if let Err(e) = &result {
            if demux.sink().headers_sent() {
                debug!(error = %e, "Aborting response body");
                demux.sink().abort("guest failed after the response headers were sent");
            }
        }

        result
    }
}

impl<R> std::fmt::Debug for Session<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("request_id", &self.request_id)
            .field("environment", &self.environment)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wago_common::{ProtocolError, RuntimeConfig};
    use wago_core::{MIN_BODY_BUFFER, ResponseSink};

    use super::*;
    use crate::response::streaming_response;

    const HELLO: &str = r#"
        (module
          (import "wasi_snapshot_preview1" "fd_write"
            (func $fd_write (param i32 i32 i32 i32) (result i32)))
          (memory (export "memory") 1)
          (data (i32.const 16) "X-Foo: bar\n\n\nHello")
          (func (export "_start")
            (i32.store (i32.const 0) (i32.const 16))
            (i32.store (i32.const 4) (i32.const 18))
            (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8)))))
    "#;

    const SILENT: &str = r#"(module (func (export "_start")))"#;

    /// Writes a header block, then 32 writes of 64 KiB each.
    const LARGE_BODY: &str = r#"
        (module
          (import "wasi_snapshot_preview1" "fd_write"
            (func $fd_write (param i32 i32 i32 i32) (result i32)))
          (memory (export "memory") 2)
          (data (i32.const 32) "X-Big: yes\n\n\n")
          (func (export "_start")
            (local $i i32)
            (i32.store (i32.const 0) (i32.const 32))
            (i32.store (i32.const 4) (i32.const 13))
            (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8)))
            (memory.fill (i32.const 65536) (i32.const 120) (i32.const 65536))
            (loop $more
              (i32.store (i32.const 0) (i32.const 65536))
              (i32.store (i32.const 4) (i32.const 65536))
              (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8)))
              (local.set $i (i32.add (local.get $i) (i32.const 1)))
              (br_if $more (i32.lt_u (local.get $i) (i32.const 32))))))
    "#;

    const TRAP_AFTER_HEADERS: &str = r#"
        (module
          (import "wasi_snapshot_preview1" "fd_write"
            (func $fd_write (param i32 i32 i32 i32) (result i32)))
          (memory (export "memory") 1)
          (data (i32.const 16) "\n\npartial")
          (func (export "_start")
            (i32.store (i32.const 0) (i32.const 16))
            (i32.store (i32.const 4) (i32.const 9))
            (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8)))
            unreachable))
    "#;

    fn test_state(wat: &str) -> AppState {
        let mut config = RuntimeConfig::default();
        config.engine.pooling_allocator = false;
        config.engine.epoch_interruption = false;
        AppState::from_wat(&config, wat).unwrap()
    }

    fn session(sink: StreamingSink) -> Session<&'static [u8]> {
        let environment =
            ExecutionEnvironment::from_request("/", None, Vec::<(&str, &str)>::new());
        Session::new("test", environment, &b""[..], sink)
    }

    #[tokio::test]
    async fn test_evaluate_streams_response() {
        let state = test_state(HELLO);
        let (sink, pending) = streaming_response(MIN_BODY_BUFFER);

        let metrics = session(sink).evaluate(&state).await.unwrap();
        assert!(metrics.fuel_consumed > 0);

        let response = pending.into_response().await.unwrap();
        assert_eq!(response.headers()["x-foo"], "bar");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"Hello");
    }

    #[tokio::test]
    async fn test_silent_guest_never_ends_headers() {
        let state = test_state(SILENT);
        let (sink, pending) = streaming_response(MIN_BODY_BUFFER);

        let err = session(sink).evaluate(&state).await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Protocol(ProtocolError::HeadersNotTerminated)
        ));
        assert!(pending.into_response().await.is_none());
    }

    #[tokio::test]
    async fn test_trap_after_headers_aborts_body() {
        let state = test_state(TRAP_AFTER_HEADERS);
        let (sink, pending) = streaming_response(MIN_BODY_BUFFER);

        let err = session(sink).evaluate(&state).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Trap { .. }));

        let response = pending.into_response().await.unwrap();
        assert!(
            axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_slow_client_stalls_guest() {
        let state = test_state(LARGE_BODY);
        let (sink, pending) = streaming_response(MIN_BODY_BUFFER);
        let budget = sink.body_budget().expect("expected Some(body budget)");

        let task = tokio::spawn({
            let state = state.clone();
            async move { session(sink).evaluate(&state).await }
        });

        // Nobody reads the body: the guest waits with the buffer full
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!task.is_finished());
        assert_eq!(budget.available(), 0);

        let response = pending.into_response().await.unwrap();
        assert_eq!(response.headers()["x-big"], "yes");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body.len(), 32 * 65_536);
        assert!(body.iter().all(|&b| b == b'x'));

        let joined = tokio_test::assert_ok!(task.await);
        tokio_test::assert_ok!(joined);
    }
}
