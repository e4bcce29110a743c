use std::sync::Arc;
use std::time::Duration;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use viva_app::config::OrchConfig;
use viva_app::gateway::control_router;
use viva_app::health::{GuardArmCheck, HealthMonitor};
use viva_app::probe::probe_router;
use viva_app::sessions::spawn_idle_sweep;
use viva_app::state::AppState;
use viva_foundation::clock::real_clock;
use viva_foundation::shutdown::ShutdownHandler;

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const GUARD_ARM_GRACE: Duration = Duration::from_secs(5);
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

fn init_logging() -> anyhow::Result<()> {
    std::fs::create_dir_all("logs")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "viva-orchestrator.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    tracing_subscriber::fmt()
        .with_writer(std::io::stdout.and(non_blocking_file))
        .with_env_filter(log_level)
        .init();

    // Keep the appender guard alive for the life of the process.
    std::mem::forget(guard);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging()?;

    let config = OrchConfig::from_env()?;
    tracing::info!(
        listen = %config.listen_addr,
        probe = %config.probe_addr,
        vad_source = ?config.vad_source,
        guard_ms = config.guard_ms,
        min_rms = config.min_rms,
        "starting viva orchestrator"
    );

    let shutdown = ShutdownHandler::new().install().await;
    let state = AppState::new(config.clone(), real_clock());

    let health = Arc::new(HealthMonitor::new(HEALTH_CHECK_INTERVAL));
    health.register(Box::new(GuardArmCheck::new(
        state.registry.clone(),
        GUARD_ARM_GRACE,
    )));
    let health_handle = health.clone().start();

    let sweep_handle = spawn_idle_sweep(
        state.registry.clone(),
        IDLE_SWEEP_INTERVAL,
        config.session_idle,
    );

    let control_listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    let probe_listener = tokio::net::TcpListener::bind(&config.probe_addr).await?;
    tracing::info!(
        control = %control_listener.local_addr()?,
        probe = %probe_listener.local_addr()?,
        "listening"
    );

    let control_app = control_router(state.clone());
    let probe_app = probe_router(state.metrics.clone(), health.clone());

    let control_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(control_listener, control_app).await {
            tracing::error!("control server exited: {}", e);
        }
    });
    let probe_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(probe_listener, probe_app).await {
            tracing::error!("probe server exited: {}", e);
        }
    });

    shutdown.wait().await;
    tracing::info!("beginning graceful shutdown");

    // Connections tear their own sessions down; anything left still holding
    // an LLM stream gets cancelled here.
    for sid in state.registry.list_ids() {
        state.registry.cancel_llm(&sid);
    }

    control_server.abort();
    probe_server.abort();
    sweep_handle.abort();
    health_handle.abort();

    tracing::info!("shutdown complete");
    Ok(())
}
