//! Inbound request extraction.
//!
//! Splits an HTTP request into what the guest sees: the argument vector
//! and environment (from the request head) and a reader over the body.

use std::io;

use axum::body::Body;
use axum::http::request::Parts;
use futures::TryStreamExt;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use wago_core::ExecutionEnvironment;

/// Build the guest environment from a request head.
///
/// The path and query are taken exactly as they appeared on the request
/// line, without percent-decoding.
pub fn environment_from_parts(parts: &Parts) -> ExecutionEnvironment {
    ExecutionEnvironment::from_request(
        parts.uri.path(),
        parts.uri.query(),
        parts
            .headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_bytes())),
    )
}

/// Expose a request body as a byte reader.
///
/// Nothing is read from the connection until the guest asks for it.
pub fn body_reader(body: Body) -> impl AsyncRead + Send + Unpin + 'static {
    StreamReader::new(body.into_data_stream().map_err(io::Error::other))
}
