use std::sync::Arc;

use anyhow::Result;

use crate::association::ProcessGroupAssociations;
use crate::config::BackendConfig;
use crate::context::ProcessGroupContexts;
use crate::gate::SingleProcessingGate;
use crate::leader::LeaderStore;
use crate::lookup::AggregationWindowLookupStore;
use crate::planner::{PlannerDeps, PlannerSettings};
use crate::slots::SlotCounter;
use crate::work_fetch::{LeaderWorkFetcher, StaticWorkFetcher, WorkFetcher};
use crate::work_id::WorkIdGenerator;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BackendConfig>,
    pub contexts: Arc<ProcessGroupContexts>,
    pub lookup: Arc<AggregationWindowLookupStore>,
    pub gate: Arc<SingleProcessingGate>,
    pub slots: Arc<SlotCounter>,
    pub leader: Arc<LeaderStore>,
    pub associations: Arc<ProcessGroupAssociations>,
    // lo que este nodo reparte cuando es líder
    pub static_profiles: Arc<StaticWorkFetcher>,
}

impl AppState {
    /// Con líder configurado se le pide el trabajo a él; si no, perfiles locales.
    pub fn new(config: BackendConfig) -> Result<Self> {
        let leader = Arc::new(LeaderStore::new(
            config.ip_address.clone(),
            config.leader.address.clone(),
        ));
        let fetcher: Arc<dyn WorkFetcher> = if config.leader.address.is_some() {
            Arc::new(LeaderWorkFetcher::new(
                Arc::clone(&leader),
                config.leader.port,
                config.leader.request_timeout,
            )?)
        } else {
            Arc::new(StaticWorkFetcher::new(&config.work_profiles))
        };
        Ok(Self::with_fetcher(config, leader, fetcher))
    }

    pub fn with_fetcher(
        config: BackendConfig,
        leader: Arc<LeaderStore>,
        fetcher: Arc<dyn WorkFetcher>,
    ) -> Self {
        let contexts = Arc::new(ProcessGroupContexts::new());
        let lookup = Arc::new(AggregationWindowLookupStore::new());
        let slots = Arc::new(SlotCounter::new(config.max_concurrent_slots));
        let deps = PlannerDeps {
            lookup: Arc::clone(&lookup),
            slots: Arc::clone(&slots),
            ids: Arc::new(WorkIdGenerator::new()),
            fetcher,
            settings: PlannerSettings::from_config(&config),
        };

        Self {
            static_profiles: Arc::new(StaticWorkFetcher::new(&config.work_profiles)),
            associations: Arc::new(ProcessGroupAssociations::new(Arc::clone(&contexts), deps)),
            config: Arc::new(config),
            contexts,
            lookup,
            gate: Arc::new(SingleProcessingGate::new()),
            slots,
            leader,
        }
    }
}
