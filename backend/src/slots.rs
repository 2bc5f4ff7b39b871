use parking_lot::Mutex;
use tracing::{debug, warn};

/// Cupos de asignaciones simultáneas, compartidos por todos los planners del backend.
///
/// Invariante: `acquired <= max_allowed`.
#[derive(Debug)]
pub struct SlotCounter {
    max_allowed: u32,
    acquired: Mutex<u32>,
}

impl SlotCounter {
    pub fn new(max_allowed: u32) -> Self {
        Self {
            max_allowed,
            acquired: Mutex::new(0),
        }
    }

    /// Reserva hasta `requested` cupos; devuelve cuántos se otorgaron (puede ser 0).
    pub fn acquire(&self, requested: u32) -> u32 {
        let mut acquired = self.acquired.lock();
        let granted = requested.min(self.max_allowed - *acquired);
        *acquired += granted;
        debug!(
            requested,
            granted,
            acquired = *acquired,
            max_allowed = self.max_allowed,
            "slots reservados"
        );
        granted
    }

    pub fn release(&self, count: u32) {
        if count == 0 {
            return;
        }
        let mut acquired = self.acquired.lock();
        if count > *acquired {
            // liberar de más indica un bug en el llamador, no rompemos el invariante
            warn!(
                count,
                acquired = *acquired,
                "liberando más slots de los reservados, se recorta"
            );
            *acquired = 0;
        } else {
            *acquired -= count;
        }
    }

    pub fn acquired(&self) -> u32 {
        *self.acquired.lock()
    }

    pub fn available(&self) -> u32 {
        self.max_allowed - *self.acquired.lock()
    }

    pub fn max_allowed(&self) -> u32 {
        self.max_allowed
    }
}
