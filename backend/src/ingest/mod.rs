//! Ingesta de los streams binarios de perfiles.

mod indexes;
pub mod parser;
mod processor;

pub use indexes::RecordedProfileIndexes;
pub use processor::{IngestPhase, ProfileIngestionProcessor};
