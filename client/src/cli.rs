use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use common::{
    AssociationRequest, AssociationResponse, LeaderInfo, LeaderUpdateRequest, ProcessGroup,
    ProcessGroupStatus,
};
use reqwest::Client;

#[derive(Parser)]
#[command(name = "client")]
#[command(about = "CLI de operador para el backend de profiling")]
struct Cli {
    /// URL base del backend
    #[arg(long, env = "BACKEND_URL", default_value = "http://localhost:2491")]
    backend_url: String,

    /// Salida en JSON en vez de texto
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GroupArgs {
    #[arg(value_name = "APP_ID")]
    app_id: String,
    #[arg(value_name = "CLUSTER")]
    cluster: String,
    #[arg(value_name = "PROC_NAME")]
    proc_name: String,
}

impl GroupArgs {
    fn process_group(&self) -> ProcessGroup {
        ProcessGroup::new(&self.app_id, &self.cluster, &self.proc_name)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Asocia un process group a este backend
    Associate(GroupArgs),
    /// Deja de atender un process group
    Deassociate(GroupArgs),
    /// Lista los process groups asociados y su estado
    Groups,
    /// Muestra el líder conocido
    Leader,
    /// Cambia el líder; sin dirección lo borra
    SetLeader {
        #[arg(value_name = "ADDRESS")]
        address: Option<String>,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new();
    let base_url = cli.backend_url.trim_end_matches('/').to_string();

    match &cli.command {
        Commands::Associate(group) => {
            let url = format!("{}/api/v1/associations", base_url);
            let resp = client
                .post(&url)
                .json(&AssociationRequest {
                    process_group: group.process_group(),
                })
                .send()
                .await?
                .error_for_status()?;
            let assoc: AssociationResponse = resp.json().await?;
            println!("Process group {} asociado", assoc.process_group);
        }
        Commands::Deassociate(group) => {
            let url = format!("{}/api/v1/associations/remove", base_url);
            let resp = client
                .post(&url)
                .json(&AssociationRequest {
                    process_group: group.process_group(),
                })
                .send()
                .await?;

            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                bail!("el process group {} no estaba asociado", group.process_group());
            }
            let assoc: AssociationResponse = resp.error_for_status()?.json().await?;
            println!("Process group {} desasociado", assoc.process_group);
        }
        Commands::Groups => {
            let url = format!("{}/api/v1/process-groups", base_url);
            let groups: Vec<ProcessGroupStatus> =
                client.get(&url).send().await?.error_for_status()?.json().await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&groups)?);
                return Ok(());
            }
            if groups.is_empty() {
                println!("No hay process groups asociados");
            }
            for g in groups {
                println!("{}", g.process_group);
                println!("  recorders sanos: {}/{}", g.healthy_recorders, g.total_recorders);
                println!("  schedule activo: {}", g.has_active_schedule);
                println!("  slots ocupados: {}", g.occupied_slots);
                if let Some(w) = g.last_finalized_window {
                    println!(
                        "  última ventana: {} programados, {} completos, {} corruptos, {} incompletos, {} sin empezar, {} muestras",
                        w.scheduled, w.completed, w.corrupt, w.incomplete, w.never_started, w.samples
                    );
                }
            }
        }
        Commands::Leader => {
            let url = format!("{}/api/v1/leader", base_url);
            let info: LeaderInfo = client.get(&url).send().await?.error_for_status()?.json().await?;
            print_leader(&info, cli.json)?;
        }
        Commands::SetLeader { address } => {
            let url = format!("{}/api/v1/leader", base_url);
            let info: LeaderInfo = client
                .put(&url)
                .json(&LeaderUpdateRequest {
                    address: address.clone(),
                })
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            print_leader(&info, cli.json)?;
        }
    }

    Ok(())
}

fn print_leader(info: &LeaderInfo, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(info)?);
        return Ok(());
    }
    match &info.address {
        Some(addr) => println!("Líder: {}", addr),
        None => println!("Líder: (desconocido)"),
    }
    println!("  este backend es líder: {}", info.is_leader);
    Ok(())
}
