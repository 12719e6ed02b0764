//! HTTP responses produced by the gateway.
//!
//! - [`GatewayResponse`]: a fully buffered response, used for errors
//! - [`StreamingSink`]: the [`ResponseSink`] a session's demultiplexer writes
//!   into; headers travel over a oneshot channel and body bytes over a
//!   channel whose queued bytes are capped by a [`BodyBudget`]
//! - [`PendingResponse`]: the handler's end of those channels; bytes go back
//!   to the budget as the client takes them

use std::io;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use wago_common::ProtocolError;
use wago_core::{BodyBudget, ResponseSink};

/// Buffered HTTP response.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers as key-value pairs
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Vec<u8>,
}

impl GatewayResponse {
    /// Create a JSON response.
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.as_bytes().to_vec(),
        }
    }

    /// Create an error response with JSON body.
    pub fn error(status: u16, message: &str) -> Self {
        let body = serde_json::json!({
            "error": message
        })
        .to_string();
        Self::json(status, &body)
    }

    /// Convert to Axum response.
    pub fn into_axum_response(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                response.headers_mut().insert(name, value);
            }
        }

        response
    }
}

type BodyChunk = Result<Bytes, io::Error>;

/// Create a connected sink and pending response.
///
/// At most `max_body_buffer_bytes` body bytes (raised to
/// [`wago_core::MIN_BODY_BUFFER`]) wait for the client at any time.
pub fn streaming_response(max_body_buffer_bytes: usize) -> (StreamingSink, PendingResponse) {
    let (head_tx, head_rx) = oneshot::channel();
    let (body_tx, body_rx) = mpsc::unbounded_channel();
    let budget = BodyBudget::new(max_body_buffer_bytes);

    let sink = StreamingSink {
        headers: HeaderMap::new(),
        head_tx: Some(head_tx),
        body_tx,
        budget: budget.clone(),
    };
    let pending = PendingResponse {
        head_rx,
        body_rx,
        budget: ClosesBudget(budget),
    };

    (sink, pending)
}

/// Response sink that streams to an HTTP client.
///
/// Headers are collected until the header block ends and then handed to
/// the [`PendingResponse`] in one piece. Body bytes are queued as they
/// arrive, as long as the budget covers them.
#[derive(Debug)]
pub struct StreamingSink {
    headers: HeaderMap,
    head_tx: Option<oneshot::Sender<HeaderMap>>,
    body_tx: mpsc::UnboundedSender<BodyChunk>,
    budget: BodyBudget,
}

impl StreamingSink {
    /// Whether the headers have been handed to the client side.
    pub fn headers_sent(&self) -> bool {
        self.head_tx.is_none()
    }

    /// Terminate the body with an error so the client sees a truncated
    /// response instead of a clean end.
    pub fn abort(&self, reason: &str) {
        let _ = self.body_tx.send(Err(io::Error::other(reason.to_string())));
    }
}

impl ResponseSink for StreamingSink {
    fn set_header(&mut self, name: &str, value: &str) -> Result<(), ProtocolError> {
        let invalid = |reason: String| ProtocolError::InvalidHeader {
            name: name.to_string(),
            reason,
        };

        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;

        self.headers.insert(header_name, header_value);
        Ok(())
    }

    fn end_headers(&mut self) -> Result<(), ProtocolError> {
        let head_tx = self.head_tx.take().ok_or(ProtocolError::BodyClosed)?;
        head_tx
            .send(std::mem::take(&mut self.headers))
            .map_err(|_| ProtocolError::BodyClosed)
    }

    fn write_body(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        if bytes.is_empty() {
            return Ok(());
        }
        if self.budget.is_closed() {
            return Err(ProtocolError::BodyClosed);
        }
        if !self.budget.try_take(bytes.len()) {
            return Err(ProtocolError::BodyBufferFull {
                limit: self.budget.limit(),
            });
        }

        self.body_tx
            .send(Ok(Bytes::copy_from_slice(bytes)))
            .map_err(|_| ProtocolError::BodyClosed)
    }

    fn body_budget(&self) -> Option<BodyBudget> {
        Some(self.budget.clone())
    }
}

/// Closes the budget when the client side goes away, so a guest waiting
/// for room wakes up and fails instead of waiting for its deadline.
#[derive(Debug)]
struct ClosesBudget(BodyBudget);

impl Drop for ClosesBudget {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// The handler's view of a response still being produced by a session.
#[derive(Debug)]
pub struct PendingResponse {
    head_rx: oneshot::Receiver<HeaderMap>,
    body_rx: mpsc::UnboundedReceiver<BodyChunk>,
    budget: ClosesBudget,
}

impl PendingResponse {
    /// Wait for the header block.
    ///
    /// Returns a `200` response whose body streams the rest of the guest
    /// output, or `None` if the sink was dropped before the headers were
    /// complete.
    pub async fn into_response(self) -> Option<Response<Body>> {
        let Self {
            head_rx,
            body_rx,
            budget,
        } = self;
        let headers = head_rx.await.ok()?;

        let stream = futures::stream::unfold((body_rx, budget), |(mut rx, budget)| async move {
            let chunk = rx.recv().await?;
            if let Ok(bytes) = &chunk {
                budget.0.release(bytes.len());
            }
            Some((chunk, (rx, budget)))
        });

        let mut response = Response::new(Body::from_stream(stream));
        *response.headers_mut() = headers;
        Some(response)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;
    use wago_core::MIN_BODY_BUFFER;

    use super::*;

    const TEST_BUFFER: usize = MIN_BODY_BUFFER;

    #[test]
    fn test_json_response() {
        let resp = GatewayResponse::json(201, r#"{"id": 1}"#);
        assert_eq!(resp.status, 201);
        assert_eq!(resp.body, br#"{"id": 1}"#);
        assert_eq!(
            resp.headers[0],
            ("content-type".to_string(), "application/json".to_string())
        );
    }

    #[test]
    fn test_error_response() {
        let resp = GatewayResponse::error(502, "Bad gateway");
        assert_eq!(resp.status, 502);

        let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["error"], "Bad gateway");
    }

    #[test]
    fn test_into_axum_response() {
        let resp = GatewayResponse::error(504, "Gateway timeout").into_axum_response();

        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(resp.headers()["content-type"], "application/json");
    }

    #[tokio::test]
    async fn test_streaming_sink_delivers_response() {
        let (mut sink, pending) = streaming_response(TEST_BUFFER);

        sink.set_header("X-Foo", "bar").unwrap();
        sink.set_header("x-foo", "baz").unwrap();
        sink.end_headers().unwrap();
        assert!(sink.headers_sent());
        sink.write_body(b"Hel").unwrap();
        sink.write_body(b"lo").unwrap();
        drop(sink);

        let response = pending.into_response().await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-foo"], "baz");
        assert_eq!(response.headers().len(), 1);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"Hello");
    }

    #[tokio::test]
    async fn test_dropped_sink_means_no_response() {
        let (mut sink, pending) = streaming_response(TEST_BUFFER);
        sink.set_header("X-Foo", "bar").unwrap();
        drop(sink);

        assert!(pending.into_response().await.is_none());
    }

    #[tokio::test]
    async fn test_abort_truncates_body() {
        let (mut sink, pending) = streaming_response(TEST_BUFFER);
        sink.end_headers().unwrap();
        sink.write_body(b"partial").unwrap();
        sink.abort("guest trapped");
        drop(sink);

        let response = pending.into_response().await.unwrap();
        let result = axum::body::to_bytes(response.into_body(), usize::MAX).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_header_rejected() {
        let (mut sink, _pending) = streaming_response(TEST_BUFFER);

        let err = sink.set_header("bad name", "v").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidHeader { name, .. } if name == "bad name"));

        let err = sink.set_header("X-Ok", "line\nbreak").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidHeader { .. }));
    }

    #[tokio::test]
    async fn test_body_budget_returns_as_client_reads() {
        let (mut sink, pending) = streaming_response(TEST_BUFFER);
        let budget = sink.body_budget().expect("expected Some(body budget)");

        sink.end_headers().unwrap();
        sink.write_body(&[b'a'; 1000]).unwrap();
        sink.write_body(&vec![b'b'; TEST_BUFFER - 1000]).unwrap();
        assert_eq!(budget.available(), 0);

        // A full queue refuses more instead of growing
        assert_eq!(
            sink.write_body(b"c").unwrap_err(),
            ProtocolError::BodyBufferFull { limit: TEST_BUFFER }
        );

        let response = pending.into_response().await.unwrap();
        let mut body = response.into_body().into_data_stream();
        let first = body.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 1000);
        assert_eq!(budget.available(), 1000);

        sink.write_body(b"c").unwrap();
        assert_eq!(budget.available(), 999);
    }

    #[tokio::test]
    async fn test_dropped_client_closes_budget() {
        let (mut sink, pending) = streaming_response(TEST_BUFFER);
        let budget = sink.body_budget().expect("expected Some(body budget)");
        sink.end_headers().unwrap();
        sink.write_body(&vec![b'x'; TEST_BUFFER]).unwrap();

        let waiter = tokio::spawn({
            let budget = budget.clone();
            async move { budget.wait_available().await }
        });

        let response = pending.into_response().await.unwrap();
        drop(response);

        let joined = tokio_test::assert_ok!(
            tokio::time::timeout(Duration::from_secs(1), waiter).await
        );
        tokio_test::assert_ok!(joined);
        assert_eq!(sink.write_body(b"x").unwrap_err(), ProtocolError::BodyClosed);
    }

    #[test]
    fn test_client_gone() {
        let (mut sink, pending) = streaming_response(TEST_BUFFER);
        drop(pending);

        assert_eq!(sink.end_headers().unwrap_err(), ProtocolError::BodyClosed);
        assert_eq!(sink.write_body(b"x").unwrap_err(), ProtocolError::BodyClosed);
    }
}
