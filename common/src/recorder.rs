use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::assignment::WorkAssignment;
use crate::process_group::ProcessGroup;

/// Identidad estable de un recorder. Clave para que el poll sea idempotente.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecorderIdentifier {
    pub ip: String,
    pub hostname: String,
    pub instance_id: String,
    pub process_group: ProcessGroup,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderInfo {
    pub identifier: RecorderIdentifier,
    pub recorder_version: u32,
    #[serde(default)]
    pub recorder_uptime_secs: u64,
    /// Contador de polls del recorder, sirve para detectar reinicios
    #[serde(default)]
    pub recorder_tick: u64,
    #[serde(default)]
    pub is_defunct: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollRequest {
    pub recorder: RecorderInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResponse {
    pub assignment: Option<WorkAssignment>,
    pub controller_id: u32,
    pub local_time: DateTime<Utc>,
}
