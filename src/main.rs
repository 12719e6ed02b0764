//! wago CLI entry point.
//!
//! Serves one WebAssembly program over HTTP: every request runs the
//! program once, CGI style.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wago_common::ConfigFile;
use wago_core::{CompiledModule, WasmEngine};
use wago_server::{AppState, GatewayServer, ServerConfig};

/// CGI-style HTTP gateway for a single WebAssembly program.
#[derive(Debug, Parser)]
#[command(name = "wago", version, about)]
struct Cli {
    /// Path to the WebAssembly module to serve.
    module: PathBuf,

    /// TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the configuration file.
    #[arg(short, long, env = "BIND_ADDR", value_name = "ADDR")]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wago=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting wago");

    // Load configuration
    let config_file = match &cli.config {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ConfigFile::default(),
    };

    let mut server_config =
        ServerConfig::try_from(&config_file.server).context("Invalid [server] configuration")?;
    if let Some(bind_addr) = cli.bind {
        server_config = server_config.with_bind_addr(bind_addr);
    }

    info!(bind_addr = %server_config.bind_addr, "Configuration loaded");

    // Compile the guest before accepting any connection
    let runtime_config = &config_file.runtime;
    let engine = WasmEngine::new(&runtime_config.engine).context("Failed to create engine")?;
    let module = CompiledModule::from_file(engine.inner(), &cli.module)
        .with_context(|| format!("Failed to load module {}", cli.module.display()))?;

    info!(
        module = %cli.module.display(),
        content_hash = %module.content_hash(),
        "Module loaded"
    );

    let state = AppState::new(engine, Arc::new(module), runtime_config)
        .context("Failed to initialize gateway")?;

    GatewayServer::new(state, server_config).run().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_module_is_required() {
        assert!(Cli::try_parse_from(["wago"]).is_err());
    }

    #[test]
    fn test_parse_arguments() {
        let cli = Cli::try_parse_from([
            "wago",
            "--config",
            "wago.toml",
            "--bind",
            "127.0.0.1:3000",
            "guest.wasm",
        ])
        .unwrap();

        assert_eq!(cli.module, PathBuf::from("guest.wasm"));
        assert_eq!(cli.config, Some(PathBuf::from("wago.toml")));
        assert_eq!(cli.bind, Some("127.0.0.1:3000".parse().unwrap()));
    }
}
