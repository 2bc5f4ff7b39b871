use std::sync::Arc;

use common::WorkId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use crate::error::LookupError;
use crate::window::AggregationWindow;

/// work_id -> ventana que lo autorizó. Compartido entre planners e ingesta.
#[derive(Debug, Default)]
pub struct AggregationWindowLookupStore {
    windows: DashMap<WorkId, Arc<AggregationWindow>>,
}

impl AggregationWindowLookupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asocia todos los ids o ninguno.
    pub fn associate(
        &self,
        work_ids: &[WorkId],
        window: &Arc<AggregationWindow>,
    ) -> Result<(), LookupError> {
        let mut inserted = Vec::with_capacity(work_ids.len());
        let mut conflict = None;
        for id in work_ids {
            match self.windows.entry(*id) {
                Entry::Occupied(_) => {
                    conflict = Some(*id);
                    break;
                }
                Entry::Vacant(v) => {
                    v.insert(Arc::clone(window));
                    inserted.push(*id);
                }
            }
        }
        // el entry ya se soltó, recién ahora se puede deshacer
        if let Some(id) = conflict {
            self.unassociate(&inserted);
            return Err(LookupError::AlreadyAssociated(id));
        }
        debug!(
            process_group = %window.process_group(),
            work_ids = work_ids.len(),
            "work ids asociados"
        );
        Ok(())
    }

    pub fn get(&self, work_id: WorkId) -> Option<Arc<AggregationWindow>> {
        self.windows.get(&work_id).map(|w| Arc::clone(w.value()))
    }

    pub fn unassociate(&self, work_ids: &[WorkId]) {
        for id in work_ids {
            self.windows.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
