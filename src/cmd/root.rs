//! Main command - runs the pod

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use podlike::config::Configuration;
use podlike::engine::{aggregate_exit_code, Client, EngineError, Supervisor};
use podlike::template::Session;

/// Run the supervisor over the given stack files. Returns the process
/// exit code.
pub async fn run(files: &[String], configuration: Configuration) -> Result<i32> {
    let session = Session::new(files)?;
    let components = session.components()?;
    info!("Resolved {} component(s)", components.len());

    let client = Arc::new(Client::connect().await?);
    let configuration = Arc::new(configuration);
    let supervisor = Arc::new(Supervisor::new(client, configuration.clone()));

    // An OS signal converts into a pod-wide graceful stop
    let stopper = supervisor.clone();
    let grace = configuration.stop_grace_period;
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!("Failed to install signal handlers: {}", e);
            return;
        }
        warn!("Received shutdown signal, stopping components...");
        stopper.stop(grace);
    });

    match supervisor.run(components).await {
        Ok(exits) => {
            for exit in &exits {
                info!("  {} exited with status {}", exit.name, exit.status_code);
            }
            Ok(aggregate_exit_code(&exits))
        }
        Err(EngineError::Cancelled) => {
            info!("Pod stopped");
            Ok(1)
        }
        Err(e) => {
            error!("Supervisor error: {}", e);
            Ok(1)
        }
    }
}

async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
