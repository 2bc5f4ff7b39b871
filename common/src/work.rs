use serde::{Deserialize, Serialize};

/// Tipo de trabajo que el recorder debe ejecutar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Work {
    CpuSample { frequency: u32, max_frames: u32 },
    ThreadSample { frequency: u32, max_frames: u32 },
    MonitorContention { max_monitors: u32, max_frames: u32 },
    MonitorWait { max_monitors: u32, max_frames: u32 },
}

/// Perfil de trabajo que entrega el líder para una ventana de agregación.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkProfile {
    pub work: Vec<Work>,
    /// Duración del profiling, en segundos
    pub duration: u32,
    /// Porcentaje (0..=100) de recorders sanos que deben recibir trabajo
    pub coverage_pct: u32,
    #[serde(default)]
    pub description: String,
}
