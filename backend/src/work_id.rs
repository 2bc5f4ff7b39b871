use std::sync::atomic::{AtomicU32, Ordering};

use common::WorkId;
use tracing::error;

/// Genera WorkIds únicos para esta instancia del backend.
///
/// El tag de instancia es aleatorio para que un backend reiniciado no repita
/// ids de su vida anterior; el contador arranca en 1 y nunca se reutiliza.
#[derive(Debug)]
pub struct WorkIdGenerator {
    instance: u32,
    counter: AtomicU32,
}

impl WorkIdGenerator {
    pub fn new() -> Self {
        Self::with_instance(rand::random())
    }

    pub fn with_instance(instance: u32) -> Self {
        Self {
            instance,
            counter: AtomicU32::new(1),
        }
    }

    pub fn instance(&self) -> u32 {
        self.instance
    }

    /// `None` cuando el contador se agotó; un id nunca se repite.
    pub fn next(&self) -> Option<WorkId> {
        match self
            .counter
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| c.checked_add(1))
        {
            Ok(counter) => Some(WorkId::from_parts(self.instance, counter)),
            Err(_) => {
                error!(instance = self.instance, "contador de work ids agotado");
                None
            }
        }
    }
}

impl Default for WorkIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
