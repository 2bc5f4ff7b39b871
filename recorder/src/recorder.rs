use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use common::{
    PollRequest, PollResponse, ProcessGroup, ProfileIngestResponse, RecorderIdentifier,
    RecorderInfo, WorkAssignment, WorkId,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use reqwest::Client;
use sysinfo::{CpuExt, System, SystemExt};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::synth::{self, ProfileStream, ProfileSynthesizer, RECORDER_VERSION};
use crate::Args;

/// Loop principal del recorder:
/// - pollea al backend cada `poll_interval`
/// - cuando recibe una asignación nueva espera el `delay`, perfila y sube el stream
/// - hay como mucho un perfil en curso
pub async fn run(args: Args) -> Result<()> {
    let client = Client::new();

    let hostname = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();

    let identifier = RecorderIdentifier {
        ip: args.ip.clone(),
        hostname,
        instance_id: uuid::Uuid::new_v4().to_string(),
        process_group: ProcessGroup::new(&args.app_id, &args.cluster, &args.proc_name),
    };
    info!(
        "recorder {} ({}) para {} contra {}",
        identifier.hostname, identifier.instance_id, identifier.process_group, args.backend_url
    );

    let started = Instant::now();
    let busy = Arc::new(AtomicBool::new(false));
    let mut last_work_id: Option<WorkId> = None;
    let mut tick: u64 = 0;

    loop {
        tick += 1;
        let info = RecorderInfo {
            identifier: identifier.clone(),
            recorder_version: RECORDER_VERSION,
            recorder_uptime_secs: started.elapsed().as_secs(),
            recorder_tick: tick,
            is_defunct: false,
        };

        match poll(&client, &args.backend_url, info).await {
            Ok(resp) => {
                if let Some(assignment) = resp.assignment {
                    let is_new = last_work_id != Some(assignment.work_id);
                    if is_new && !busy.swap(true, Ordering::SeqCst) {
                        last_work_id = Some(assignment.work_id);
                        info!(
                            "asignación {} ({}s, delay {}s)",
                            assignment.work_id, assignment.duration, assignment.delay
                        );

                        let client = client.clone();
                        let base_url = args.backend_url.clone();
                        let flush = Duration::from_secs(args.flush_interval.max(1));
                        let busy = busy.clone();
                        tokio::spawn(async move {
                            if let Err(e) =
                                profile_and_upload(&client, &base_url, assignment, resp.controller_id, flush).await
                            {
                                warn!("error subiendo perfil: {:?}", e);
                            }
                            busy.store(false, Ordering::SeqCst);
                        });
                    }
                }
            }
            Err(e) => warn!("poll falló: {:?}", e),
        }

        sleep(Duration::from_secs(args.poll_interval.max(1))).await;
    }
}

async fn poll(client: &Client, base_url: &str, recorder: RecorderInfo) -> Result<PollResponse> {
    let url = format!("{}/api/v1/poll", base_url);
    let resp = client
        .post(&url)
        .json(&PollRequest { recorder })
        .send()
        .await?
        .error_for_status()?;
    Ok(resp.json().await?)
}

async fn profile_and_upload(
    client: &Client,
    base_url: &str,
    assignment: WorkAssignment,
    controller_id: u32,
    flush: Duration,
) -> Result<()> {
    let Some((frequency, max_frames)) = synth::cpu_sampling(&assignment) else {
        warn!("asignación {} sin trabajo de CPU, se ignora", assignment.work_id);
        return Ok(());
    };

    sleep(Duration::from_secs(assignment.delay as u64)).await;
    info!("perfilando {} por {}s", assignment.work_id, assignment.duration);

    let mut stream = ProfileStream::new(&synth::header(&assignment, controller_id));
    let mut synth = ProfileSynthesizer::new(StdRng::from_entropy(), frequency, max_frames);
    let mut sys = System::new();

    let total = Duration::from_secs(assignment.duration as u64);
    let mut done = Duration::ZERO;
    while done < total {
        let step = flush.min(total - done);
        sleep(step).await;
        done += step;

        sys.refresh_cpu();
        let cpu_fraction = sys.global_cpu_info().cpu_usage() / 100.0;
        stream.push(&synth.entry(step.as_secs().max(1), cpu_fraction));
    }

    let entries = stream.entries();
    let url = format!("{}/api/v1/profile", base_url);
    let resp = client.post(&url).body(stream.finish()).send().await?;
    if !resp.status().is_success() {
        warn!(
            "backend rechazó el perfil {}: status {}",
            assignment.work_id,
            resp.status()
        );
        return Ok(());
    }
    let ingest: ProfileIngestResponse = resp.json().await?;
    info!(
        "perfil {} subido: {} entradas, resultado {:?}",
        assignment.work_id, entries, ingest.outcome
    );
    Ok(())
}
