use axum::{
    body::Body,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use common::{
    AssociationRequest, AssociationResponse, LeaderInfo, LeaderUpdateRequest, PollRequest,
    PollResponse, ProcessGroup, ProcessGroupStatus, ProfileIngestResponse, WorkProfile,
};
use futures::StreamExt;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::ingest::ProfileIngestionProcessor;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/poll", post(poll))
        .route("/api/v1/profile", post(ingest_profile))
        .route("/api/v1/associations", post(associate))
        .route("/api/v1/associations/remove", post(deassociate))
        .route("/api/v1/process-groups", get(list_process_groups))
        .route("/api/v1/leader", get(get_leader).put(set_leader))
        .route("/leader/work", post(leader_work))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

// Poll de un recorder: se registra y, si hay schedule vigente, recibe trabajo
async fn poll(State(state): State<AppState>, Json(req): Json<PollRequest>) -> Json<PollResponse> {
    let process_group = req.recorder.identifier.process_group.clone();
    let assignment = match state.contexts.get(&process_group) {
        // el schedule espera su lock hasta 100ms: fuera de los workers async
        Some(ctx) => {
            let recorder = req.recorder;
            tokio::task::spawn_blocking(move || ctx.get_work_assignment(&recorder))
                .await
                .unwrap_or_else(|e| {
                    warn!(%process_group, error = %e, "falló la entrega de asignación");
                    None
                })
        }
        None => {
            debug!(%process_group, "poll de un process group no asociado");
            None
        }
    };

    Json(PollResponse {
        assignment,
        controller_id: state.config.controller_id,
        local_time: Utc::now(),
    })
}

// Recibe el stream binario de un perfil y lo procesa a medida que llegan los chunks
async fn ingest_profile(
    State(state): State<AppState>,
    body: Body,
) -> Result<(StatusCode, Json<ProfileIngestResponse>), (StatusCode, String)> {
    let mut processor = ProfileIngestionProcessor::new(
        state.lookup.clone(),
        state.gate.clone(),
        state.config.ingestion.clone(),
    );

    let mut failure = None;
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                if let Err(e) = processor.process(&bytes) {
                    failure = Some(e.to_string());
                    break;
                }
            }
            Err(e) => {
                // conexión cortada: queda incompleto
                warn!(error = %e, "error leyendo el stream de perfil");
                break;
            }
        }
    }

    let work_id = processor.work_id();
    let outcome = processor
        .close()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    match failure {
        Some(msg) => Err((StatusCode::BAD_REQUEST, msg)),
        None => Ok((
            StatusCode::ACCEPTED,
            Json(ProfileIngestResponse {
                outcome,
                work_id: work_id.map(|id| id.0),
            }),
        )),
    }
}

async fn associate(
    State(state): State<AppState>,
    Json(req): Json<AssociationRequest>,
) -> Json<AssociationResponse> {
    if !state.associations.associate(&req.process_group) {
        debug!(process_group = %req.process_group, "process group ya asociado");
    }
    Json(AssociationResponse {
        process_group: req.process_group,
        associated: true,
    })
}

async fn deassociate(
    State(state): State<AppState>,
    Json(req): Json<AssociationRequest>,
) -> Result<Json<AssociationResponse>, StatusCode> {
    if state.associations.deassociate(&req.process_group) {
        Ok(Json(AssociationResponse {
            process_group: req.process_group,
            associated: false,
        }))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn list_process_groups(State(state): State<AppState>) -> Json<Vec<ProcessGroupStatus>> {
    let mut statuses: Vec<ProcessGroupStatus> =
        state.contexts.all().iter().map(|ctx| ctx.status()).collect();
    statuses.sort_by(|a, b| a.process_group.cmp(&b.process_group));
    Json(statuses)
}

fn leader_info(state: &AppState) -> LeaderInfo {
    LeaderInfo {
        address: state.leader.get_leader_ip_address(),
        is_leader: state.leader.is_leader(),
    }
}

async fn get_leader(State(state): State<AppState>) -> Json<LeaderInfo> {
    Json(leader_info(&state))
}

async fn set_leader(
    State(state): State<AppState>,
    Json(req): Json<LeaderUpdateRequest>,
) -> Json<LeaderInfo> {
    state.leader.set_leader_ip_address(req.address);
    Json(leader_info(&state))
}

// Lo consultan los otros backends cuando este nodo es el líder
async fn leader_work(
    State(state): State<AppState>,
    Json(process_group): Json<ProcessGroup>,
) -> Result<Json<WorkProfile>, StatusCode> {
    if !state.leader.is_leader() {
        return Err(StatusCode::CONFLICT);
    }
    state
        .static_profiles
        .profile_for(&process_group)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
