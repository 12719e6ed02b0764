//! HTTP router configuration.
//!
//! The gateway has a single route: every method and path falls through to
//! [`handle_request`].

use std::time::Duration;

use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handler::handle_request;
use crate::state::AppState;

/// Build the gateway router.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .fallback(handle_request)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use tower::util::ServiceExt;
    use wago_common::RuntimeConfig;

    /// Writes `X-Path: <argv[0]>` and echoes `argv[0]` as the body.
    const ECHO_PATH: &str = r#"
        (module
          (import "wasi_snapshot_preview1" "args_sizes_get"
            (func $args_sizes_get (param i32 i32) (result i32)))
          (import "wasi_snapshot_preview1" "args_get"
            (func $args_get (param i32 i32) (result i32)))
          (import "wasi_snapshot_preview1" "fd_write"
            (func $fd_write (param i32 i32 i32 i32) (result i32)))
          (memory (export "memory") 1)
          (data (i32.const 64) "X-Path: yes\n\n\n")
          (func $strlen (param $p i32) (result i32)
            (local $n i32)
            (block $done
              (loop $scan
                (br_if $done (i32.eqz (i32.load8_u (i32.add (local.get $p) (local.get $n)))))
                (local.set $n (i32.add (local.get $n) (i32.const 1)))
                (br $scan)))
            (local.get $n))
          (func (export "_start")
            (drop (call $args_sizes_get (i32.const 0) (i32.const 4)))
            (drop (call $args_get (i32.const 256) (i32.const 512)))
            ;; header block
            (i32.store (i32.const 16) (i32.const 64))
            (i32.store (i32.const 20) (i32.const 14))
            (drop (call $fd_write (i32.const 1) (i32.const 16) (i32.const 1) (i32.const 8)))
            ;; argv[0]
            (i32.store (i32.const 16) (i32.load (i32.const 256)))
            (i32.store (i32.const 20) (call $strlen (i32.load (i32.const 256))))
            (drop (call $fd_write (i32.const 1) (i32.const 16) (i32.const 1) (i32.const 8)))))
    "#;

    const SILENT: &str = r#"(module (func (export "_start")))"#;

    fn setup_router(wat: &str) -> Router {
        let mut config = RuntimeConfig::default();
        config.engine.pooling_allocator = false;
        config.engine.epoch_interruption = false;
        let state = AppState::from_wat(&config, wat).unwrap();
        build_router(state, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn test_any_path_reaches_guest() {
        for (method, uri) in [
            (Method::GET, "/"),
            (Method::POST, "/deeply/nested/path"),
            (Method::DELETE, "/items/42?force=1"),
        ] {
            let app = setup_router(ECHO_PATH);

            let response = app
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri(uri)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()["x-path"], "yes");

            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let expected = uri.split('?').next().unwrap();
            assert_eq!(&body[..], expected.as_bytes());
        }
    }

    #[tokio::test]
    async fn test_guest_without_headers_is_bad_gateway() {
        let app = setup_router(SILENT);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()["content-type"], "application/json");
    }
}
