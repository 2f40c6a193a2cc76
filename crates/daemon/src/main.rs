//! Quill Queue - Main Entry Point
//! WebSocket gateway + dispatcher + admin JSON-RPC server

mod settings;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use quill_api_rpc::{RpcServer, RpcServerConfig};
use quill_core::application::{
    shutdown_channel, DetachedSweeper, Dispatcher, GatewayConfig, QueueGateway,
};
use quill_core::port::id_provider::UuidProvider;
use quill_core::port::time_provider::SystemTimeProvider;
use quill_core::port::{BookGenerator, IdentityProvider};
use quill_gateway_ws::hub::DEFAULT_OUTBOUND_CAPACITY;
use quill_gateway_ws::{ConnectionHub, WsServer, WsServerConfig};
use quill_infra::{CommandBookGenerator, HandshakeIdentity, HttpBookGenerator, HttpIdentityProvider};
use settings::{expand_path, GeneratorKind, IdentityKind, LogFormat, LogSettings, Settings};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "quill-queue")]
#[command(about = "Quill Queue - two-lane book generation queue", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "QUILL_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let settings = Settings::load(args.config.as_deref()).context("Failed to load configuration")?;

    // 2. Initialize logging (guard flushes the file writer on exit)
    let _log_guard = init_logging(&settings.log)?;

    info!("Quill Queue v{} starting...", VERSION);

    // 3. Setup dependencies (DI wiring)
    let hub = Arc::new(ConnectionHub::new(DEFAULT_OUTBOUND_CAPACITY));
    let gateway = Arc::new(QueueGateway::new(
        hub.clone(),
        Arc::new(UuidProvider),
        Arc::new(SystemTimeProvider),
        GatewayConfig {
            disconnect_grace_ms: settings.dispatch.disconnect_grace_ms,
        },
    ));
    let generator = build_generator(&settings)?;
    let identity = build_identity(&settings)?;

    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    // 4. Start JSON-RPC server
    info!("Starting JSON-RPC server...");
    let rpc_config = RpcServerConfig {
        host: settings.server.rpc_host.clone(),
        port: settings.server.rpc_port,
        rate_limit_burst: settings.rate_limit.rpc_burst,
        rate_limit_per_sec: settings.rate_limit.rpc_per_sec,
    };
    let (rpc_addr, rpc_handle) = RpcServer::new(rpc_config, gateway.clone(), settings.dispatch.slots)
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    // 5. Start WebSocket gateway
    let ws_config = WsServerConfig {
        bind_addr: settings.server.ws_addr.clone(),
        rate_limit_burst: settings.rate_limit.ws_burst,
        rate_limit_per_sec: settings.rate_limit.ws_per_sec,
    };
    let ws_server = WsServer::bind(ws_config, gateway.clone(), identity, hub)
        .await
        .context("WebSocket server bind failed")?;
    let ws_addr = ws_server.local_addr()?;
    let ws_shutdown = shutdown_rx.clone();
    let ws_handle = tokio::spawn(async move {
        if let Err(e) = ws_server.run(ws_shutdown).await {
            error!(error = %e, "WebSocket server failed");
        }
    });

    // 6. Start dispatcher
    info!(slots = settings.dispatch.slots, "Starting dispatcher...");
    let dispatcher = Dispatcher::new(gateway.clone(), generator, settings.dispatch.slots);
    let dispatcher_shutdown = shutdown_rx.clone();
    let dispatcher_handle = tokio::spawn(async move {
        if let Err(e) = dispatcher.run(dispatcher_shutdown).await {
            error!(error = ?e, "Dispatcher failed");
        }
    });

    // 7. Start detached-entry sweeper (only meaningful with a grace period)
    if settings.dispatch.disconnect_grace_ms > 0 {
        let sweeper = DetachedSweeper::new(
            gateway.clone(),
            Duration::from_millis(settings.dispatch.sweep_interval_ms),
        );
        tokio::spawn(sweeper.run(shutdown_rx));
    }

    info!(ws = %ws_addr, rpc = %rpc_addr, "System ready. Waiting for members...");
    info!("Press Ctrl+C to shutdown");

    // 8. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 9. Graceful shutdown: stop accepting, let running generations settle
    shutdown_tx.shutdown();
    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;
    if tokio::time::timeout(Duration::from_secs(5), ws_handle).await.is_err() {
        warn!("WebSocket server did not stop in time");
    }
    if dispatcher_handle.await.is_err() {
        warn!("Dispatcher task aborted");
    }

    info!("Shutdown complete.");

    Ok(())
}

fn init_logging(log: &LogSettings) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.filter))
        .context("Failed to create env filter")?;

    let (file_layer, guard) = match &log.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(expand_path(dir), "quill-queue.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_ansi(false).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let stdout_layer = match log.format {
        // Production: JSON structured logging
        LogFormat::Json => fmt::layer().json().boxed(),
        // Development: Pretty formatting with colors
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

fn build_generator(settings: &Settings) -> Result<Arc<dyn BookGenerator>> {
    let generator = &settings.generator;
    let timeout = Duration::from_secs(generator.timeout_secs);

    Ok(match generator.kind {
        GeneratorKind::Http => {
            info!(url = %generator.url, "Using HTTP book generator");
            Arc::new(
                HttpBookGenerator::new(generator.url.clone(), timeout)
                    .context("Failed to build HTTP generator")?,
            )
        }
        GeneratorKind::Command => {
            info!(command = %generator.command, "Using command book generator");
            let mut command = CommandBookGenerator::new(
                generator.command.clone(),
                generator.args.clone(),
                generator.env_allowlist.clone(),
                timeout,
            );
            if let Some(dir) = &generator.working_dir {
                command = command.with_working_dir(expand_path(dir));
            }
            Arc::new(command)
        }
    })
}

fn build_identity(settings: &Settings) -> Result<Arc<dyn IdentityProvider>> {
    let identity = &settings.identity;

    Ok(match identity.kind {
        IdentityKind::Handshake if identity.trust_plan_claim => {
            warn!("Identity and plan taken from handshake claims (no token validation)");
            Arc::new(HandshakeIdentity::trusting_plan())
        }
        IdentityKind::Handshake => {
            warn!("Identity taken from handshake claims (no token validation); plan claims ignored");
            Arc::new(HandshakeIdentity::new())
        }
        IdentityKind::Http => Arc::new(
            HttpIdentityProvider::new(identity.url.clone(), Duration::from_secs(identity.timeout_secs))
                .context("Failed to build identity provider")?,
        ),
    })
}
