//! The gateway request handler.
//!
//! Every request, whatever its method or path, runs the guest once. The
//! guest runs in its own task so a failing or panicking guest only affects
//! its own request.

use axum::extract::{Request, State};
use axum::response::Response;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use wago_common::{ProtocolError, RuntimeError};

use crate::request::{body_reader, environment_from_parts};
use crate::response::{GatewayResponse, streaming_response};
use crate::session::Session;
use crate::state::AppState;

/// Run the guest for an HTTP request.
///
/// This handler:
/// 1. Derives the guest's arguments and environment from the request head
/// 2. Spawns a session with the request body as guest stdin
/// 3. Answers with `200` and a streamed body once the guest ends its
///    header block, or with an error response if it never does
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn handle_request(State(state): State<AppState>, request: Request) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let (parts, body) = request.into_parts();

    info!(request_id = %request_id, "Handling request");

    let environment = environment_from_parts(&parts);
    let (sink, pending) = streaming_response(state.gateway_config().max_body_buffer_bytes);
    let session = Session::new(request_id.clone(), environment, body_reader(body), sink);

    let task = tokio::spawn(async move { session.evaluate(&state).await });

    if let Some(response) = pending.into_response().await {
        return response;
    }

    // Headers never arrived, so the session has ended; find out why
    let err = match task.await {
        Ok(Err(e)) => e,
        Ok(Ok(_)) => RuntimeError::Protocol(ProtocolError::HeadersNotTerminated),
        Err(join) => RuntimeError::SessionAborted {
            reason: join.to_string(),
        },
    };

    if err.is_resource_limit() {
        warn!(request_id = %request_id, error = %err, "Request failed");
    } else {
        error!(request_id = %request_id, error = %err, "Request failed");
    }

    error_to_response(&err).into_axum_response()
}

/// Convert a session failure into the response the client sees.
///
/// Guest details stay in the logs; the client only gets a generic message.
fn error_to_response(error: &RuntimeError) -> GatewayResponse {
    match error {
        RuntimeError::ExecutionTimeout { .. } | RuntimeError::FuelExhausted => {
            GatewayResponse::error(504, "Gateway timeout")
        }
        RuntimeError::Protocol(_) => GatewayResponse::error(502, "Bad gateway"),
        _ => GatewayResponse::error(500, "Internal server error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_to_response_timeout() {
        let err = RuntimeError::ExecutionTimeout { duration_ms: 5000 };
        let resp = error_to_response(&err);
        assert_eq!(resp.status, 504);
    }

    #[test]
    fn test_error_to_response_fuel_exhausted() {
        let resp = error_to_response(&RuntimeError::FuelExhausted);
        assert_eq!(resp.status, 504);
    }

    #[test]
    fn test_error_to_response_protocol() {
        let err = RuntimeError::Protocol(ProtocolError::MalformedHeader {
            line: "secret guest output".into(),
        });
        let resp = error_to_response(&err);

        assert_eq!(resp.status, 502);
        let body = String::from_utf8(resp.body).unwrap();
        assert!(!body.contains("secret"));
    }

    #[test]
    fn test_error_to_response_internal() {
        for err in [
            RuntimeError::trap("unreachable"),
            RuntimeError::NonZeroExit { code: 1 },
            RuntimeError::instantiation_failed("unknown import"),
            RuntimeError::SessionAborted {
                reason: "panicked".into(),
            },
        ] {
            assert_eq!(error_to_response(&err).status, 500, "{err}");
        }
    }
}
