//! Configuration structures for wago.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings (pooling, caching, epochs)
//! - [`ExecutionConfig`]: Per-request execution limits (fuel, memory, timeout)
//! - [`GatewayConfig`]: Guest output protocol settings

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for the gateway runtime.
/// It is usually embedded in a [`crate::ConfigFile`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-request execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Guest output protocol configuration.
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Wasmtime engine configuration.
///
/// These settings affect the global Wasmtime engine behavior,
/// including memory allocation strategy and compilation caching.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable pooling allocator for high-performance instance creation.
    ///
    /// When enabled, memory is pre-allocated for a pool of instances,
    /// which makes the per-request instantiation cheap.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the pool.
    ///
    /// Only effective when `pooling_allocator` is enabled. This also bounds
    /// the number of requests that can run at the same time.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Enable Wasmtime's on-disk cache of compiled artifacts.
    ///
    /// Uses Wasmtime's default cache location.
    #[serde(default = "defaults::cache_compiled_modules")]
    pub cache_compiled_modules: bool,

    /// Enable epoch-based interruption.
    ///
    /// This allows interrupting long-running WebAssembly execution
    /// based on wall-clock time rather than fuel consumption.
    #[serde(default = "defaults::epoch_interruption")]
    pub epoch_interruption: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            cache_compiled_modules: defaults::cache_compiled_modules(),
            epoch_interruption: defaults::epoch_interruption(),
        }
    }
}

/// Per-request execution configuration.
///
/// These settings control resource limits for individual guest runs.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Maximum fuel (CPU instructions) per request.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,

    /// Execution deadline in milliseconds.
    ///
    /// Covers the whole run, including time the guest spends waiting
    /// for request body bytes.
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum linear memory in megabytes.
    #[serde(default = "defaults::max_memory_mb")]
    pub max_memory_mb: u32,

    /// Enable fuel metering.
    ///
    /// When enabled, CPU usage is tracked and limited by the `max_fuel` setting.
    #[serde(default = "defaults::fuel_metering")]
    pub fuel_metering: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_fuel: defaults::max_fuel(),
            timeout_ms: defaults::timeout_ms(),
            max_memory_mb: defaults::max_memory_mb(),
            fuel_metering: defaults::fuel_metering(),
        }
    }
}

impl ExecutionConfig {
    /// Get the timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Maximum linear memory in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        (self.max_memory_mb as usize) * 1024 * 1024
    }
}

/// How the output demultiplexer finds line boundaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LineFraming {
    /// Buffer partial header lines across write calls.
    ///
    /// Parsing is independent of how the guest chunks its output.
    #[default]
    Reassemble,

    /// Scan each write call on its own; a line split across two writes is
    /// seen as two lines. For guests that rely on each write being
    /// framed on its own.
    ///
    /// The WASI layer hands large writes over in 4 KiB pieces. A header line
    /// cut at such a piece boundary is rejoined before it is parsed.
    PerChunk,
}

/// Guest output protocol configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Line framing policy for the header phase.
    #[serde(default)]
    pub line_framing: LineFraming,

    /// Maximum number of bytes the guest may write before the header block ends.
    #[serde(default = "defaults::max_header_bytes")]
    pub max_header_bytes: usize,

    /// Body bytes that may wait for a slow client before guest writes stall.
    ///
    /// Values below 64 KiB are raised to 64 KiB.
    #[serde(default = "defaults::max_body_buffer_bytes")]
    pub max_body_buffer_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            line_framing: LineFraming::default(),
            max_header_bytes: defaults::max_header_bytes(),
            max_body_buffer_bytes: defaults::max_body_buffer_bytes(),
        }
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn pooling_allocator() -> bool {
        true
    }

    pub const fn max_instances() -> u32 {
        128
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn cache_compiled_modules() -> bool {
        false
    }

    pub const fn epoch_interruption() -> bool {
        true
    }

    pub const fn max_fuel() -> u64 {
        1_000_000_000
    }

    pub const fn timeout_ms() -> u64 {
        5_000
    }

    pub const fn max_memory_mb() -> u32 {
        64
    }

    pub const fn fuel_metering() -> bool {
        true
    }

    pub const fn max_header_bytes() -> usize {
        64 * 1024
    }

    pub const fn max_body_buffer_bytes() -> usize {
        1024 * 1024
    }
}
