//! Guest run lifecycle management.
//!
//! This module provides [`GuestRunner`], which handles one complete guest run:
//!
//! 1. Create a fresh store owning the session context
//! 2. Instantiate the module against the shared linker
//! 3. Call the entry routine under the fuel and deadline limits
//! 4. Classify how it ended and collect metrics
//!
//! The store is created and dropped inside [`GuestRunner::run`], so every
//! instance is torn down before the caller sees the outcome.

use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};
use wasmtime::{Linker, Store, Trap};
use wasmtime_wasi::I32Exit;

use crate::store::{ExecutionMetrics, SessionContext, create_store, remaining_fuel};
use crate::{CompiledModule, WasmEngine};
use wago_common::{ExecutionConfig, ProtocolError, RuntimeError};

/// Name of the entry routine every guest must export.
pub const ENTRY_POINT: &str = "_start";

/// Guest run manager.
///
/// Owns the linker that host functions are registered on. The linker is
/// populated once at startup and then shared, read-only, by every session.
///
/// # Thread Safety
///
/// `GuestRunner` is `Send + Sync` and is shared across request tasks
/// behind an `Arc`. Each run uses its own [`Store`] for isolation.
pub struct GuestRunner {
    engine: WasmEngine,
    linker: Linker<SessionContext>,
}

impl GuestRunner {
    /// Create a new runner with an empty linker.
    pub fn new(engine: WasmEngine) -> Self {
        let linker = Linker::new(engine.inner());

        Self { engine, linker }
    }

    /// Get a mutable reference to the linker.
    ///
    /// Use this to register host functions before the runner is shared.
    pub fn linker_mut(&mut self) -> &mut Linker<SessionContext> {
        &mut self.linker
    }

    /// Get the engine this runner instantiates on.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// Run the guest once to completion.
    ///
    /// Instantiates `module` with `context` as its store data and calls
    /// `entry_point`. A `proc_exit(0)` from the guest counts as success.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Instantiation fails or the entry point is missing
    /// - Fuel is exhausted or the deadline passes
    /// - The guest traps or exits with a non-zero status
    #[instrument(skip_all, fields(request_id = %context.request_id, entry_point = %entry_point))]
    pub async fn run(
        &self,
        module: &CompiledModule,
        config: &ExecutionConfig,
        context: SessionContext,
        entry_point: &str,
    ) -> Result<ExecutionMetrics, RuntimeError> {
        let start = Instant::now();

        let mut store = create_store(&self.engine, config, context)?;
        let initial_fuel = remaining_fuel(&store).unwrap_or(0);

        let outcome =
            tokio::time::timeout(config.timeout(), self.invoke(&mut store, module, entry_point))
                .await;

        let metrics = ExecutionMetrics {
            fuel_consumed: initial_fuel.saturating_sub(remaining_fuel(&store).unwrap_or(0)),
            duration: start.elapsed(),
        };
        store.data_mut().metrics = metrics.clone();
        drop(store);

        let result = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => classify(&e, config),
            Err(_elapsed) => Err(RuntimeError::ExecutionTimeout {
                duration_ms: config.timeout_ms,
            }),
        };

        let duration_ms = metrics.duration.as_millis();
        match result {
            Ok(()) => {
                info!(
                    duration_ms,
                    fuel_consumed = metrics.fuel_consumed,
                    "Guest completed successfully"
                );
                Ok(metrics)
            }
            Err(e) if e.is_resource_limit() => {
                warn!(
                    duration_ms,
                    fuel_consumed = metrics.fuel_consumed,
                    error = %e,
                    "Guest terminated: resource limit"
                );
                Err(e)
            }
            Err(e) => {
                error!(
                    duration_ms,
                    fuel_consumed = metrics.fuel_consumed,
                    error = %e,
                    "Guest failed"
                );
                Err(e)
            }
        }
    }

    async fn invoke(
        &self,
        store: &mut Store<SessionContext>,
        module: &CompiledModule,
        entry_point: &str,
    ) -> Result<(), wasmtime::Error> {
        debug!("Instantiating module");

        let instance = self
            .linker
            .instantiate_async(&mut *store, module.inner())
            .await
            .map_err(|e| wasmtime::Error::new(RuntimeError::instantiation_failed(e.to_string())))?;

        let func = instance
            .get_typed_func::<(), ()>(&mut *store, entry_point)
            .map_err(|_| {
                wasmtime::Error::new(RuntimeError::EntryPointNotFound {
                    name: entry_point.to_string(),
                })
            })?;

        debug!("Calling entry point");

        func.call_async(&mut *store, ()).await
    }
}

/// Map an error raised by a guest run onto a [`RuntimeError`].
///
/// `Ok(())` means the guest ended through `proc_exit(0)`.
fn classify(error: &wasmtime::Error, config: &ExecutionConfig) -> Result<(), RuntimeError> {
    if let Some(exit) = error.downcast_ref::<I32Exit>() {
        return match exit.0 {
            0 => Ok(()),
            code => Err(RuntimeError::NonZeroExit { code }),
        };
    }

    if let Some(protocol) = error.downcast_ref::<ProtocolError>() {
        return Err(RuntimeError::Protocol(protocol.clone()));
    }

    if let Some(runtime) = error.downcast_ref::<RuntimeError>() {
        return Err(match runtime {
            RuntimeError::EntryPointNotFound { name } => {
                RuntimeError::EntryPointNotFound { name: name.clone() }
            }
            other => RuntimeError::instantiation_failed(other.to_string()),
        });
    }

    match error.downcast_ref::<Trap>() {
        Some(Trap::OutOfFuel) => Err(RuntimeError::FuelExhausted),
        Some(Trap::Interrupt) => Err(RuntimeError::ExecutionTimeout {
            duration_ms: config.timeout_ms,
        }),
        _ => Err(RuntimeError::trap(format!("{error:#}"))),
    }
}

impl std::fmt::Debug for GuestRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestRunner")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}
