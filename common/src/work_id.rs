use serde::{Deserialize, Serialize};
use std::fmt;

/// Identificador global de una asignación de trabajo.
///
/// Los 32 bits altos identifican a la instancia del backend que lo generó,
/// los 32 bajos son un contador monotónico de esa instancia.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkId(pub u64);

impl WorkId {
    pub fn from_parts(instance: u32, counter: u32) -> Self {
        Self(((instance as u64) << 32) | counter as u64)
    }

    pub fn instance(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn counter(self) -> u32 {
        self.0 as u32
    }
}

impl From<u64> for WorkId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
