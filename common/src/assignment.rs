use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::work::Work;
use crate::work_id::WorkId;

/// Instrucción que recibe un recorder: qué perfilar, por cuánto tiempo y con qué demora.
///
/// `delay` e `issue_time` se completan recién al momento de entregarla,
/// el contenido es el mismo para todos los recorders de la ventana.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkAssignment {
    pub work_id: WorkId,
    pub work: Vec<Work>,
    #[serde(default)]
    pub description: String,
    /// Duración en segundos
    pub duration: u32,
    /// Segundos que el recorder debe esperar antes de empezar
    #[serde(default)]
    pub delay: u32,
    #[serde(default)]
    pub issue_time: Option<DateTime<Utc>>,
}

impl WorkAssignment {
    pub fn new(work_id: WorkId, work: Vec<Work>, description: String, duration: u32) -> Self {
        Self {
            work_id,
            work,
            description,
            duration,
            delay: 0,
            issue_time: None,
        }
    }

    /// Copia con los datos de entrega sellados.
    pub fn issued(&self, delay: u32, issue_time: DateTime<Utc>) -> Self {
        Self {
            delay,
            issue_time: Some(issue_time),
            ..self.clone()
        }
    }
}
