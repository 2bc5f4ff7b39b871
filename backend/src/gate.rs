use common::WorkId;
use dashmap::DashSet;

use crate::error::AggregationFailure;

/// Evita que dos streams procesen el mismo work_id a la vez.
#[derive(Debug, Default)]
pub struct SingleProcessingGate {
    in_progress: DashSet<WorkId>,
}

impl SingleProcessingGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accept(&self, work_id: WorkId) -> Result<(), AggregationFailure> {
        if self.in_progress.insert(work_id) {
            Ok(())
        } else {
            Err(AggregationFailure::ProfileAlreadyInProgress(work_id))
        }
    }

    pub fn finish(&self, work_id: WorkId) {
        self.in_progress.remove(&work_id);
    }

    pub fn is_in_progress(&self, work_id: WorkId) -> bool {
        self.in_progress.contains(&work_id)
    }
}
