//! Host-side WASI wiring for wago.
//!
//! This crate connects a guest's WASI preview1 world to one HTTP exchange.
//! Guests only ever see standard WASI imports; there are no custom host
//! functions.
//!
//! # Streams
//!
//! - [`stdio::GuestStdout`]: stdout, fed into the response demultiplexer
//! - [`stdio::request_stdin`]: stdin, read lazily from the request body
//! - [`logging::GuestStderr`]: stderr, forwarded to `tracing`
//!
//! # Registration
//!
//! [`linker::create_guest_runner`] builds a runner with preview1 registered,
//! and [`linker::wasi_context`] builds the per-session WASI context.

pub mod linker;
pub mod logging;
pub mod stdio;

pub use linker::{create_guest_runner, register_wasi, wasi_context};
pub use logging::GuestStderr;
pub use stdio::{GuestStdout, request_stdin};
