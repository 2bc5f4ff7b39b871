use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::process_group::ProcessGroup;

/// Resultado de la ingesta de un perfil.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfileOutcome {
    Completed,
    Corrupt,
    Incomplete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileIngestResponse {
    pub outcome: ProfileOutcome,
    pub work_id: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociationRequest {
    pub process_group: ProcessGroup,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssociationResponse {
    pub process_group: ProcessGroup,
    pub associated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderInfo {
    pub address: Option<String>,
    pub is_leader: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderUpdateRequest {
    pub address: Option<String>,
}

/// Resumen de una ventana ya finalizada.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowSummary {
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub scheduled: usize,
    pub completed: usize,
    pub corrupt: usize,
    pub incomplete: usize,
    pub never_started: usize,
    pub samples: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessGroupStatus {
    pub process_group: ProcessGroup,
    pub healthy_recorders: usize,
    pub total_recorders: usize,
    pub has_active_schedule: bool,
    pub occupied_slots: u32,
    pub last_finalized_window: Option<WindowSummary>,
}
