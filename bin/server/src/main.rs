use missionctl_server::bridge::HttpExecutionBridge;
use missionctl_server::config::ServerConfig;
use missionctl_server::routes::{AppState, router};
use missionctl_trigger::{ListenerSupervisor, TriggerRuntime, TriggerServices};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!("Loaded configuration");

    let bridge = Arc::new(HttpExecutionBridge::new(config.execution_url.clone()));
    let runtime = TriggerRuntime::new(TriggerServices::new(config.trigger.clone()));
    let supervisor = Arc::new(ListenerSupervisor::new(runtime, bridge));

    let app = router(AppState {
        supervisor: supervisor.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match tokio::time::timeout(config.shutdown_timeout(), supervisor.shutdown()).await {
        Ok(released) => tracing::info!(released, "listeners released"),
        Err(_) => tracing::warn!(
            timeout_seconds = config.shutdown_timeout_seconds,
            "listener teardown timed out"
        ),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
}
