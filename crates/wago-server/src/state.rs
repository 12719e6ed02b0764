//! Shared application state.
//!
//! This module provides [`AppState`], which holds shared resources
//! across all HTTP request handlers.

use std::sync::Arc;

use tracing::info;

use wago_common::{ExecutionConfig, GatewayConfig, RuntimeConfig, RuntimeError};
use wago_core::{CompiledModule, ENTRY_POINT, GuestRunner, WasmEngine};
use wago_host::create_guest_runner;

/// Shared state across all request handlers.
///
/// This struct is cloned for each request, so it uses `Arc` for shared data.
/// Nothing in it changes after startup.
#[derive(Clone)]
pub struct AppState {
    /// Guest runner with WASI registered (owns the engine).
    runner: Arc<GuestRunner>,

    /// The guest program every request runs.
    module: Arc<CompiledModule>,

    /// Per-request execution limits.
    exec_config: ExecutionConfig,

    /// Guest output protocol settings.
    gateway_config: GatewayConfig,
}

impl AppState {
    /// Create application state around an already compiled module.
    ///
    /// # Errors
    ///
    /// Returns an error if the module has no `_start` export or the runner
    /// cannot be created.
    pub fn new(
        engine: WasmEngine,
        module: Arc<CompiledModule>,
        config: &RuntimeConfig,
    ) -> Result<Self, RuntimeError> {
        if !module.exports_function(ENTRY_POINT) {
            return Err(RuntimeError::EntryPointNotFound {
                name: ENTRY_POINT.to_string(),
            });
        }

        let runner = Arc::new(create_guest_runner(engine)?);

        info!(
            content_hash = %module.content_hash(),
            line_framing = ?config.gateway.line_framing,
            "Gateway state ready"
        );

        Ok(Self {
            runner,
            module,
            exec_config: config.execution.clone(),
            gateway_config: config.gateway.clone(),
        })
    }

    /// Create a fresh engine and state for a guest given as WAT text.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot be created or the module fails
    /// to compile.
    pub fn from_wat(config: &RuntimeConfig, wat: &str) -> Result<Self, RuntimeError> {
        let engine = WasmEngine::new(&config.engine)?;
        let module = CompiledModule::from_wat(engine.inner(), wat)?;
        Self::new(engine, Arc::new(module), config)
    }

    /// Get the Wasmtime engine.
    pub fn engine(&self) -> &WasmEngine {
        self.runner.engine()
    }

    /// Get the guest runner.
    pub fn runner(&self) -> &GuestRunner {
        &self.runner
    }

    /// Get the compiled guest module.
    pub fn module(&self) -> &CompiledModule {
        &self.module
    }

    /// Get the execution configuration.
    pub fn exec_config(&self) -> &ExecutionConfig {
        &self.exec_config
    }

    /// Get the guest output protocol configuration.
    pub fn gateway_config(&self) -> &GatewayConfig {
        &self.gateway_config
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("content_hash", &self.module.content_hash())
            .field("timeout_ms", &self.exec_config.timeout_ms)
            .finish_non_exhaustive()
    }
}
