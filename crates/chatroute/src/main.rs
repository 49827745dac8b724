use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chatroute::config::Config;
use chatroute::llm::ProviderRegistry;
use chatroute::model::AppContext;
use chatroute::server::{AppState, build_app};
use chatroute::stream::{InMemoryStreamManager, spawn_cleanup_task};

#[derive(Parser)]
#[command(name = "chatroute", version, about = "Provider-routing chat streaming service")]
struct Cli {
    /// Path to the YAML config file.
    #[arg(long, short, global = true, default_value = "chatroute.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server.
    Serve {
        /// Override the configured bind host.
        #[arg(long)]
        host: Option<String>,
        /// Override the configured port.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Check that the selected provider has credentials.
    Check,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .await
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let registry = config.apply_overrides(ProviderRegistry::from_env());

    match cli.command {
        Command::Serve { host, port } => {
            serve(config, registry, host, port).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Check => Ok(check(&registry)),
    }
}

fn check(registry: &ProviderRegistry) -> ExitCode {
    let status = registry.validate_provider_setup(None);
    let config = registry.provider_config(Some(status.provider));
    match status.error {
        None => {
            println!("{}: ok ({})", status.provider, config.models.primary);
            ExitCode::SUCCESS
        }
        Some(error) => {
            eprintln!("{}: {}", status.provider, error);
            ExitCode::FAILURE
        }
    }
}

async fn serve(
    config: Config,
    registry: ProviderRegistry,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let context = AppContext::from_registry(registry);
    let status = context.validate();
    if let Some(ref error) = status.error {
        warn!(provider = %status.provider, "{error}");
    }

    let streams = Arc::new(InMemoryStreamManager::new(
        config.server.idle_timeout(),
        config.server.keep_alive_interval(),
        config.streams.retention(),
    ));
    let cleanup = spawn_cleanup_task(streams.clone(), config.streams.cleanup_interval());

    let state = AppState { context, streams };
    let app = build_app(state, config.server.request_timeout_seconds);

    let host = host.unwrap_or(config.server.host);
    let port = port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid bind address {host}:{port}"))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    cleanup.abort();
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
