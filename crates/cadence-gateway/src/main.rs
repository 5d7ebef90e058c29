use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cadence_core::config::CadenceConfig;
use cadence_scheduler::{
    types::SEND_MESSAGE_TASK, BeatEngine, FiredJob, InFlightCanceller, LocalFleet, Orchestrator,
    OrchestratorSettings,
};
use tracing::{info, warn};

mod app;
mod http;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cadence_gateway=info,cadence_scheduler=info,cadence_telegram=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    // explicit CADENCE_CONFIG path > ~/.cadence/cadence.toml, env overrides on top
    let config_path = std::env::var("CADENCE_CONFIG").ok();
    let config = CadenceConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        CadenceConfig::default()
    });

    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = open_db(&db_path)?;
    cadence_users::db::init_db(&db)?;
    cadence_scheduler::db::init_db(&db)?;
    info!("database migrations complete");
    drop(db);

    // each subsystem gets its own connection
    let orchestrator_db = Arc::new(Mutex::new(open_db(&db_path)?));
    let engine_db = Arc::new(Mutex::new(open_db(&db_path)?));
    let delivery_db = Arc::new(Mutex::new(open_db(&db_path)?));

    let sched = &config.scheduler;
    let fleet = LocalFleet::new(sched.worker_name.clone(), sched.worker_concurrency);
    match cadence_telegram::TelegramDelivery::from_config(
        config.channels.telegram.as_ref(),
        delivery_db,
    ) {
        Ok(delivery) => {
            fleet.register(SEND_MESSAGE_TASK, Arc::new(delivery));
            info!("Telegram delivery registered");
        }
        Err(e) => warn!("Telegram delivery disabled: {e}"),
    }

    let canceller = InFlightCanceller::new(
        Arc::new(fleet.clone()),
        Duration::from_millis(sched.inspect_timeout_ms),
    );
    let orchestrator = Orchestrator::new(
        orchestrator_db,
        canceller,
        OrchestratorSettings {
            default_interval_secs: sched.default_interval_secs,
            default_message_text: sched.default_message_text.clone(),
            restart_pool_on_update: sched.restart_pool_on_update,
        },
    );

    // fired-job channel: BeatEngine -> fleet router task
    let (fired_tx, mut fired_rx) = tokio::sync::mpsc::channel::<FiredJob>(256);
    let engine = BeatEngine::new(
        engine_db,
        Some(fired_tx),
        Duration::from_millis(sched.poll_interval_ms),
    );

    let router_fleet = fleet.clone();
    tokio::spawn(async move {
        while let Some(job) = fired_rx.recv().await {
            match router_fleet.submit(&job.target, job.payload, None) {
                Ok(task_id) => {
                    info!(job_id = job.job_id, name = %job.name, %task_id, "job submitted")
                }
                Err(e) => warn!(job_id = job.job_id, name = %job.name, "submit failed: {e}"),
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(async move { engine.run(shutdown_rx).await });

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(config, orchestrator));
    let router = app::build_router(state);

    info!("Cadence gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    // stop the beat loop
    let _ = shutdown_tx.send(true);
    let _ = engine_task.await;
    Ok(())
}

fn open_db(path: &str) -> anyhow::Result<rusqlite::Connection> {
    let conn = rusqlite::Connection::open(path)?;
    cadence_scheduler::db::configure(&conn)?;
    Ok(conn)
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
