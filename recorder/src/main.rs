mod recorder;
mod synth;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
#[command(name = "recorder")]
#[command(about = "Recorder de referencia: pollea al backend y le manda perfiles de CPU sintéticos")]
pub struct Args {
    /// URL base del backend
    #[arg(long, env = "BACKEND_URL", default_value = "http://localhost:2491")]
    pub backend_url: String,

    #[arg(long, env = "APP_ID")]
    pub app_id: String,

    #[arg(long, env = "CLUSTER")]
    pub cluster: String,

    #[arg(long, env = "PROC_NAME")]
    pub proc_name: String,

    /// IP con la que se anuncia este recorder
    #[arg(long, env = "RECORDER_IP", default_value = "127.0.0.1")]
    pub ip: String,

    /// Segundos entre polls
    #[arg(long, default_value_t = 60)]
    pub poll_interval: u64,

    /// Cada cuántos segundos se corta una entrada del stream
    #[arg(long, default_value_t = 10)]
    pub flush_interval: u64,

    #[arg(long, default_value = "recorder=info")]
    pub log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log_level).context("invalid --log-level")?)
        .init();

    recorder::run(args).await
}
