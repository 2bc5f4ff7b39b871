use std::path::PathBuf;

use anyhow::{Context, Result};
use backend::config::BackendConfig;
use backend::handlers;
use backend::monitor;
use backend::state::AppState;
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "backend")]
#[command(about = "Backend de profiling continuo: reparte trabajo a los recorders e ingiere sus perfiles")]
struct Args {
    /// Archivo YAML de configuración; sin él se usan los defaults
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Filtro de logs (sintaxis de EnvFilter)
    #[arg(long, default_value = "backend=info,tower_http=info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_level).context("invalid --log-level")?)
        .init();

    let config = match &args.config {
        Some(path) => BackendConfig::load(path)?,
        None => BackendConfig::default(),
    };
    let listen_addr = config.listen_addr.clone();
    let liveness = config.recorders.clone();

    let state = AppState::new(config)?;
    let app = handlers::build_router(state.clone());

    // barrido de recorders en segundo plano
    let cancel = CancellationToken::new();
    let monitor_task = tokio::spawn(monitor::monitor_recorders(
        state.contexts.clone(),
        liveness,
        cancel.clone(),
    ));

    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("binding {listen_addr}"))?;
    info!("backend escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("apagando: expirando ventanas en curso");
    cancel.cancel();
    state.associations.shutdown_all().await;
    let _ = monitor_task.await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "no se pudo escuchar ctrl-c");
    }
}
