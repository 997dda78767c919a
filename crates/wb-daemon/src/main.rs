//! workbench daemon: serves the project/execution HTTP API.

use anyhow::{Context, Result};
use tracing::{error, info};
use wb_core::config::Config;
use wb_core::shutdown::ShutdownSignal;
use wb_daemon::daemon::Daemon;
use wb_telemetry::logging::{init_logging, LogFormat};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    dotenv::dotenv().ok();

    let config = Config::load().context("failed to load configuration")?;
    init_logging(
        "wb-daemon",
        &config.general.log_level,
        LogFormat::from_json_flag(config.general.json_logs()),
    );
    info!(version = env!("CARGO_PKG_VERSION"), pid = std::process::id(), "workbench daemon starting");

    let daemon = Daemon::new(config).await?;
    tokio::spawn(forward_signals(daemon.shutdown_handle()));

    if let Err(e) = daemon.run().await {
        error!(error = %e, "daemon execution failed");
        return Err(e);
    }
    Ok(())
}

/// Trigger shutdown on ctrl-c, or SIGTERM on unix.
async fn forward_signals(shutdown: ShutdownSignal) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    res = tokio::signal::ctrl_c() => {
                        if let Err(e) = res {
                            error!(error = %e, "failed to listen for ctrl-c");
                            return;
                        }
                        info!("ctrl-c received, initiating shutdown");
                    }
                    _ = term.recv() => info!("SIGTERM received, initiating shutdown"),
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                info!("ctrl-c received, initiating shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, initiating shutdown");
    }
    shutdown.trigger();
}
