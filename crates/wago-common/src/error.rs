//! Error types for wago.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`RuntimeError`]: Top-level errors for loading and running the guest
//! - [`ProtocolError`]: Violations of the stdout header/body protocol by the guest
//! - [`WasiError`]: WASI-related errors

use std::io;

use thiserror::Error;

/// Top-level runtime errors.
///
/// These errors represent failures that can occur during the lifecycle of
/// the gateway, from reading the guest bytecode to running one request.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The guest bytecode could not be read from disk.
    #[error("Failed to read module '{path}': {source}")]
    ModuleRead {
        /// Path of the module file.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },

    /// WebAssembly compilation failed.
    #[error("Compilation failed: {reason}")]
    CompilationFailed {
        /// Description of the compilation failure.
        reason: String,
    },

    /// A fresh instance could not be created from the compiled module.
    #[error("Instantiation failed: {reason}")]
    InstantiationFailed {
        /// Description of the instantiation failure.
        reason: String,
    },

    /// The module does not export the requested entry routine.
    #[error("Entry point not found: {name}")]
    EntryPointNotFound {
        /// Name of the missing export.
        name: String,
    },

    /// Execution exceeded the configured deadline.
    #[error("Execution timeout after {duration_ms}ms")]
    ExecutionTimeout {
        /// The timeout duration in milliseconds.
        duration_ms: u64,
    },

    /// Execution exhausted the configured fuel limit.
    ///
    /// This indicates the WebAssembly code consumed more CPU cycles
    /// than allowed by the fuel metering configuration.
    #[error("Fuel exhausted: CPU limit exceeded")]
    FuelExhausted,

    /// The guest terminated through `proc_exit` with a non-zero status.
    #[error("Guest exited with status {code}")]
    NonZeroExit {
        /// The exit status reported by the guest.
        code: i32,
    },

    /// A WebAssembly trap occurred during execution.
    #[error("Wasm trap: {message}")]
    Trap {
        /// Description of the trap.
        message: String,
    },

    /// The guest violated the output protocol.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The task running a session ended without reporting an outcome.
    #[error("Session aborted: {reason}")]
    SessionAborted {
        /// Why the session task ended (panic or cancellation).
        reason: String,
    },

    /// WASI operation failed.
    #[error("WASI error: {0}")]
    Wasi(#[from] WasiError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

/// Violations of the guest output protocol.
///
/// The guest writes `key: value` header lines, then two blank lines, then the
/// body. Anything else that reaches the demultiplexer is reported here. The
/// type is `Clone` because a failed demultiplexer keeps returning the first
/// error it saw.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A header-phase line had no `:` separator or an empty name.
    #[error("Malformed header line: {line:?}")]
    MalformedHeader {
        /// The offending line, lossily decoded.
        line: String,
    },

    /// The transport refused a header name or value.
    #[error("Invalid header '{name}': {reason}")]
    InvalidHeader {
        /// Header name as written by the guest.
        name: String,
        /// Why the transport rejected it.
        reason: String,
    },

    /// The header block grew past the configured limit.
    #[error("Header block exceeds {limit} bytes")]
    HeadersTooLarge {
        /// The configured limit in bytes.
        limit: usize,
    },

    /// The guest finished without ever terminating the header block.
    #[error("Guest output ended before the header block was terminated")]
    HeadersNotTerminated,

    /// The response body can no longer accept bytes (client went away).
    #[error("Response body closed")]
    BodyClosed,

    /// More body bytes were queued than the client has drained.
    #[error("Response body buffer exceeds {limit} bytes")]
    BodyBufferFull {
        /// The configured buffer size in bytes.
        limit: usize,
    },
}

/// WASI-related errors.
///
/// These errors occur when WASI (WebAssembly System Interface) operations fail.
#[derive(Error, Debug)]
pub enum WasiError {
    /// Failed to register WASI on the linker.
    #[error("WASI initialization failed: {reason}")]
    InitializationFailed {
        /// Description of the initialization failure.
        reason: String,
    },

    /// A guest stdio stream failed.
    #[error("WASI stream error: {reason}")]
    StreamError {
        /// Description of the stream failure.
        reason: String,
    },
}

impl RuntimeError {
    /// Create a new `ModuleRead` error.
    pub fn module_read(path: impl Into<String>, source: io::Error) -> Self {
        Self::ModuleRead {
            path: path.into(),
            source,
        }
    }

    /// Create a new `CompilationFailed` error.
    pub fn compilation_failed(reason: impl Into<String>) -> Self {
        Self::CompilationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `InstantiationFailed` error.
    pub fn instantiation_failed(reason: impl Into<String>) -> Self {
        Self::InstantiationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `Trap` error.
    pub fn trap(message: impl Into<String>) -> Self {
        Self::Trap {
            message: message.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error happened before any request could be served.
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            Self::ModuleRead { .. } | Self::CompilationFailed { .. } | Self::InvalidConfig { .. }
        )
    }

    /// Returns `true` if this error indicates a resource limit was exceeded.
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, Self::FuelExhausted | Self::ExecutionTimeout { .. })
    }

    /// Returns `true` if the guest broke the output protocol.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RuntimeError::compilation_failed("bad magic");
        assert_eq!(err.to_string(), "Compilation failed: bad magic");

        let err = RuntimeError::FuelExhausted;
        assert_eq!(err.to_string(), "Fuel exhausted: CPU limit exceeded");

        let err = RuntimeError::NonZeroExit { code: 3 };
        assert_eq!(err.to_string(), "Guest exited with status 3");
    }

    #[test]
    fn test_module_read_display() {
        let err = RuntimeError::module_read(
            "/tmp/missing.wasm",
            io::Error::new(io::ErrorKind::NotFound, "no such file"),
        );
        assert_eq!(
            err.to_string(),
            "Failed to read module '/tmp/missing.wasm': no such file"
        );
        assert!(err.is_startup());
    }

    #[test]
    fn test_error_from_protocol() {
        let protocol_err = ProtocolError::MalformedHeader {
            line: "no colon here".into(),
        };
        let runtime_err: RuntimeError = protocol_err.into();

        assert!(runtime_err.is_protocol());
        assert_eq!(
            runtime_err.to_string(),
            "Protocol error: Malformed header line: \"no colon here\""
        );
    }

    #[test]
    fn test_is_resource_limit() {
        assert!(RuntimeError::FuelExhausted.is_resource_limit());
        assert!(RuntimeError::ExecutionTimeout { duration_ms: 100 }.is_resource_limit());
        assert!(!RuntimeError::trap("unreachable").is_resource_limit());
    }

    #[test]
    fn test_is_startup() {
        assert!(RuntimeError::compilation_failed("x").is_startup());
        assert!(!RuntimeError::instantiation_failed("x").is_startup());
        assert!(!RuntimeError::Protocol(ProtocolError::BodyClosed).is_startup());
    }
}
