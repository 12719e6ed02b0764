//! Common types, errors, and configuration for wago.
//!
//! This crate provides shared functionality used across the wago workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for the engine, executions, and the gateway protocol
//! - TOML configuration file loading

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{EngineConfig, ExecutionConfig, GatewayConfig, LineFraming, RuntimeConfig};
pub use config_file::{ConfigFile, ConfigFileError, ServerConfigFile};
pub use error::{ProtocolError, RuntimeError, WasiError};
