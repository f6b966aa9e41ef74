use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use lib_viewer::connections::SupabaseGateway;
use lib_viewer::core::spawn_session;

mod viewer_logic;
use viewer_logic::{config, dashboard, logger};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; the environment and CLI may carry everything.
    let _ = dotenvy::dotenv();

    let settings = config::load_config()?;
    let console = if settings.once { logger::Console::Stdout } else { logger::Console::Quiet };
    let log_path = logger::setup_logging(&settings.log_dir, &settings.log_level, console)?;
    log::info!(
        "Alpha viewer starting: table '{}', interval {}, auto-update {}, detection {:?}, log file {}",
        settings.scheduler.table,
        settings.scheduler.interval,
        settings.scheduler.auto_update,
        settings.scheduler.detection,
        log_path.display()
    );

    let gateway = Arc::new(SupabaseGateway::new(settings.gateway.clone()).context("Failed to set up the database gateway")?);

    if settings.once {
        dashboard::run_once(gateway, &settings).await?;
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let session = spawn_session(gateway, settings.scheduler.clone());

    let signals = tokio::spawn(wait_for_signal(shutdown.clone()));
    let result = dashboard::run(&session, &settings, shutdown.clone()).await;

    // Stop the scheduler whichever way the dashboard ended
    shutdown.cancel();
    signals.abort();
    session.shutdown().await;

    log::info!("Shutdown complete.");
    result
}

async fn wait_for_signal(shutdown: CancellationToken) {
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Could not install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
        _ = shutdown.cancelled() => return,
    }
    shutdown.cancel();
}
