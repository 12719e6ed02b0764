//! Per-session execution context and store management.
//!
//! This module provides:
//! - [`SessionContext`]: Per-request state owned by the Wasmtime store
//! - [`ExecutionMetrics`]: Fuel and wall-clock figures for one guest run
//! - [`create_store`]: Builds a store with the configured resource limits

use std::time::Duration;

use wasmtime::{Store, StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::WasmEngine;
use wago_common::{ExecutionConfig, RuntimeError};

/// Fuel consumed between cooperative yields back to the async executor.
const FUEL_YIELD_INTERVAL: u64 = 100_000;

/// Per-request execution context.
///
/// Holds everything one guest run needs: its WASI context (argv, environ,
/// and the three stdio streams wired to the HTTP exchange), its memory
/// limiter, and the request identifier used for tracing. It is created
/// per request and dropped, with its store, when the run ends.
pub struct SessionContext {
    /// WASI preview1 context for system interface calls.
    wasi: WasiP1Ctx,

    /// Memory limits enforced through the store limiter.
    limits: StoreLimits,

    /// Unique request identifier for tracing.
    pub request_id: String,

    /// Execution metrics.
    pub metrics: ExecutionMetrics,
}

/// Execution performance metrics.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    /// Fuel consumed during execution.
    pub fuel_consumed: u64,

    /// Total execution duration.
    pub duration: Duration,
}

impl SessionContext {
    /// Create a new session context.
    ///
    /// # Arguments
    ///
    /// * `request_id` - Unique identifier for this execution (for tracing)
    /// * `wasi` - Prepared WASI context carrying argv, environ and stdio
    /// * `config` - Execution limits applied to the store
    pub fn new(request_id: impl Into<String>, wasi: WasiP1Ctx, config: &ExecutionConfig) -> Self {
        let limits = StoreLimitsBuilder::new()
            .memory_size(config.max_memory_bytes())
            .instances(1)
            .build();

        Self {
            wasi,
            limits,
            request_id: request_id.into(),
            metrics: ExecutionMetrics::default(),
        }
    }

    /// Get the WASI context. Used by the linker registration closure.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("request_id", &self.request_id)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

/// Create a new Wasmtime store for one session.
///
/// # Arguments
///
/// * `engine` - The shared Wasmtime engine
/// * `config` - Execution configuration (fuel, deadline, memory)
/// * `context` - The session context the store will own
///
/// # Errors
///
/// Returns an error if fuel cannot be configured on the store.
pub fn create_store(
    engine: &WasmEngine,
    config: &ExecutionConfig,
    context: SessionContext,
) -> Result<Store<SessionContext>, RuntimeError> {
    let mut store = Store::new(engine.inner(), context);

    // The engine always consumes fuel; without metering the budget is unbounded
    let fuel = if config.fuel_metering {
        config.max_fuel
    } else {
        u64::MAX
    };
    store
        .set_fuel(fuel)
        .map_err(|e| RuntimeError::invalid_config(format!("Failed to set fuel: {e}")))?;

    store
        .fuel_async_yield_interval(Some(FUEL_YIELD_INTERVAL))
        .map_err(|e| RuntimeError::invalid_config(format!("Failed to set yield interval: {e}")))?;

    // One epoch tick per millisecond, see `EPOCH_TICK`
    if engine.config().epoch_interruption {
        store.set_epoch_deadline(config.timeout_ms);
    }

    store.limiter(|ctx| &mut ctx.limits);

    Ok(store)
}

/// Get remaining fuel from a store.
pub fn remaining_fuel(store: &Store<SessionContext>) -> Option<u64> {
    store.get_fuel().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wago_common::EngineConfig;
    use wasmtime_wasi::WasiCtxBuilder;

    fn test_engine() -> WasmEngine {
        let engine_config = EngineConfig {
            pooling_allocator: false,
            ..Default::default()
        };
        WasmEngine::new(&engine_config).unwrap()
    }

    fn test_context(config: &ExecutionConfig) -> SessionContext {
        let wasi = WasiCtxBuilder::new().build_p1();
        SessionContext::new("test-request-123", wasi, config)
    }

    #[test]
    fn test_session_context_creation() {
        let ctx = test_context(&ExecutionConfig::default());

        assert_eq!(ctx.request_id, "test-request-123");
        assert_eq!(ctx.metrics.fuel_consumed, 0);
        assert_eq!(ctx.metrics.duration, Duration::ZERO);
    }

    #[test]
    fn test_store_creation() {
        let engine = test_engine();
        let exec_config = ExecutionConfig::default();

        let store = create_store(&engine, &exec_config, test_context(&exec_config));
        assert!(store.is_ok());
    }

    #[test]
    fn test_store_fuel() {
        let engine = test_engine();
        let exec_config = ExecutionConfig {
            max_fuel: 1000,
            fuel_metering: true,
            ..Default::default()
        };

        let store = create_store(&engine, &exec_config, test_context(&exec_config)).unwrap();

        assert_eq!(remaining_fuel(&store), Some(1000));
    }

    #[test]
    fn test_store_fuel_unmetered() {
        let engine = test_engine();
        let exec_config = ExecutionConfig {
            max_fuel: 1000,
            fuel_metering: false,
            ..Default::default()
        };

        let store = create_store(&engine, &exec_config, test_context(&exec_config)).unwrap();

        assert_eq!(remaining_fuel(&store), Some(u64::MAX));
    }

    #[test]
    fn test_session_context_debug() {
        let ctx = test_context(&ExecutionConfig::default());

        let debug_str = format!("{ctx:?}");
        assert!(debug_str.contains("SessionContext"));
        assert!(debug_str.contains("test-request-123"));
    }
}
