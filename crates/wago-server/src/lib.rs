//! HTTP gateway for wago.
//!
//! This crate exposes one compiled guest program as a web endpoint. It
//! handles:
//!
//! - Routing every request to the single gateway handler
//! - Turning the request head into guest arguments and environment
//! - Streaming the request body to guest stdin
//! - Streaming guest stdout back as response headers and body
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use wago_common::RuntimeConfig;
//! use wago_core::{CompiledModule, WasmEngine};
//! use wago_server::{AppState, GatewayServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RuntimeConfig::default();
//!     let engine = WasmEngine::new(&config.engine)?;
//!     let module = CompiledModule::from_file(engine.inner(), "guest.wasm")?;
//!
//!     let state = AppState::new(engine, Arc::new(module), &config)?;
//!     GatewayServer::new(state, ServerConfig::default()).run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod handler;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod session;
pub mod state;

pub use router::build_router;
pub use server::{GatewayServer, ServerConfig, TestHandle};
pub use session::Session;
pub use state::AppState;
