//! WASI registration and per-session WASI contexts.
//!
//! Guests are WASI preview1 commands. The linker gets the preview1 imports
//! once at startup; each session then builds its own [`WasiP1Ctx`] carrying
//! the request's argv, environ and stdio.

use tracing::debug;
use wasmtime::Linker;
use wasmtime_wasi::preview1::{self, WasiP1Ctx};
use wasmtime_wasi::{StdinStream, StdoutStream, WasiCtxBuilder};

use wago_common::{RuntimeError, WasiError};
use wago_core::{ExecutionEnvironment, GuestRunner, SessionContext, WasmEngine};

/// Register the WASI preview1 imports on a linker.
///
/// # Errors
///
/// Returns an error if an import is already defined on the linker.
pub fn register_wasi(linker: &mut Linker<SessionContext>) -> Result<(), RuntimeError> {
    preview1::add_to_linker_async(linker, SessionContext::wasi_mut).map_err(|e| {
        WasiError::InitializationFailed {
            reason: format!("Failed to register WASI preview1: {e}"),
        }
    })?;

    debug!("WASI preview1 registered on linker");
    Ok(())
}

/// Create a [`GuestRunner`] with every host import the gateway provides.
///
/// # Errors
///
/// Returns an error if host function registration fails.
pub fn create_guest_runner(engine: WasmEngine) -> Result<GuestRunner, RuntimeError> {
    let mut runner = GuestRunner::new(engine);
    register_wasi(runner.linker_mut())?;
    Ok(runner)
}

/// Build the WASI context for one session.
///
/// The guest gets no preopened directories, no inherited host stdio, and
/// nothing from the host environment.
pub fn wasi_context(
    environment: &ExecutionEnvironment,
    stdin: impl StdinStream + 'static,
    stdout: impl StdoutStream + 'static,
    stderr: impl StdoutStream + 'static,
) -> WasiP1Ctx {
    WasiCtxBuilder::new()
        .args(environment.args())
        .envs(environment.env_pairs().as_slice())
        .stdin(stdin)
        .stdout(stdout)
        .stderr(stderr)
        .build_p1()
}
