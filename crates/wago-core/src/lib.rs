//! Core Wasmtime runtime for wago.
//!
//! This crate provides the request-independent machinery of the gateway:
//! - [`WasmEngine`]: Configured Wasmtime engine with pooling allocator
//! - [`CompiledModule`]: The guest module, compiled once at startup
//! - [`SessionContext`]: Per-request store data
//! - [`GuestRunner`]: Instance lifecycle management
//! - [`ExecutionEnvironment`]: Guest argv and environ derived from a request
//! - [`Demultiplexer`]: Splits guest stdout into response headers and body
//! - [`BodyBudget`]: Bounds the body bytes queued ahead of a slow client
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmEngine                          │
//! │  (Shared across all requests, thread-safe)              │
//! │  - Pooling Allocator                                    │
//! │  - Fuel metering and epoch ticker                       │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                   CompiledModule                        │
//! │  (Compiled once, shared across sessions)                │
//! │  - Pre-compiled machine code                            │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │            Store<SessionContext> + Instance             │
//! │  (Per-request, isolated, dropped after the run)         │
//! │  - argv / environ from ExecutionEnvironment             │
//! │  - stdin from the request body                          │
//! │  - stdout into the Demultiplexer                        │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod budget;
pub mod demux;
pub mod engine;
pub mod environment;
pub mod instance;
pub mod module;
pub mod store;

pub use budget::{BodyBudget, MIN_BODY_BUFFER};
pub use demux::{BufferedResponse, Demultiplexer, Phase, ResponseSink};
pub use engine::{EPOCH_TICK, EpochTicker, WasmEngine};
pub use environment::ExecutionEnvironment;
pub use instance::{ENTRY_POINT, GuestRunner};
pub use module::CompiledModule;
pub use store::{ExecutionMetrics, SessionContext, create_store};
