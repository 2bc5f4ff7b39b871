use std::collections::HashMap;
use std::sync::Arc;

use common::ProcessGroup;
use parking_lot::Mutex;
use tracing::info;

use crate::context::ProcessGroupContexts;
use crate::planner::{AggregationWindowPlanner, PlannerDeps, PlannerHandle};

/// Process groups de los que se ocupa este backend: un planner por grupo.
pub struct ProcessGroupAssociations {
    contexts: Arc<ProcessGroupContexts>,
    deps: PlannerDeps,
    planners: Mutex<HashMap<ProcessGroup, Arc<PlannerHandle>>>,
}

impl ProcessGroupAssociations {
    pub fn new(contexts: Arc<ProcessGroupContexts>, deps: PlannerDeps) -> Self {
        Self {
            contexts,
            deps,
            planners: Mutex::new(HashMap::new()),
        }
    }

    /// Arranca el planner del grupo. `false` si ya estaba asociado.
    pub fn associate(&self, process_group: &ProcessGroup) -> bool {
        let mut planners = self.planners.lock();
        if planners.contains_key(process_group) {
            return false;
        }
        let (context, _) = self.contexts.get_or_create(process_group);
        let handle = AggregationWindowPlanner::new(context, self.deps.clone()).start();
        planners.insert(process_group.clone(), Arc::new(handle));
        info!(%process_group, "process group asociado");
        true
    }

    /// Detiene el planner del grupo y olvida su contexto. `false` si no estaba asociado.
    pub fn deassociate(&self, process_group: &ProcessGroup) -> bool {
        let handle = self.planners.lock().remove(process_group);
        let Some(handle) = handle else {
            return false;
        };
        handle.shutdown();
        self.contexts.remove(process_group);
        info!(%process_group, "process group desasociado");
        true
    }

    pub fn is_associated(&self, process_group: &ProcessGroup) -> bool {
        self.planners.lock().contains_key(process_group)
    }

    pub fn associated(&self) -> Vec<ProcessGroup> {
        let mut groups: Vec<_> = self.planners.lock().keys().cloned().collect();
        groups.sort();
        groups
    }

    pub fn handle(&self, process_group: &ProcessGroup) -> Option<Arc<PlannerHandle>> {
        self.planners.lock().get(process_group).cloned()
    }

    /// Detiene todos los planners y espera a que expiren sus ventanas.
    pub async fn shutdown_all(&self) {
        let handles: Vec<_> = self.planners.lock().drain().map(|(_, h)| h).collect();
        for h in &handles {
            h.shutdown();
        }
        for h in &handles {
            h.stopped().await;
        }
    }
}
