//! Estado compartido por process group: recorders conocidos, schedule vigente
//! y resumen de la última ventana.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use common::{
    ProcessGroup, ProcessGroupStatus, RecorderIdentifier, RecorderInfo, WindowSummary,
    WorkAssignment,
};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::schedule::WorkAssignmentSchedule;

#[derive(Debug, Clone)]
pub struct RecorderMeta {
    pub info: RecorderInfo,
    pub last_poll: Instant,
    pub last_poll_at: DateTime<Utc>,
    // sin polls recientes
    pub dead: bool,
}

impl RecorderMeta {
    fn is_healthy(&self) -> bool {
        !self.dead && !self.info.is_defunct
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepResult {
    pub marked_dead: usize,
    pub evicted: usize,
}

#[derive(Debug)]
pub struct ProcessGroupContext {
    process_group: ProcessGroup,
    recorders: Mutex<HashMap<RecorderIdentifier, RecorderMeta>>,
    schedule: RwLock<Option<Arc<WorkAssignmentSchedule>>>,
    last_window: Mutex<Option<WindowSummary>>,
}

impl ProcessGroupContext {
    pub fn new(process_group: ProcessGroup) -> Self {
        Self {
            process_group,
            recorders: Mutex::new(HashMap::new()),
            schedule: RwLock::new(None),
            last_window: Mutex::new(None),
        }
    }

    pub fn process_group(&self) -> &ProcessGroup {
        &self.process_group
    }

    pub fn report_recorder(&self, info: &RecorderInfo, now: Instant) {
        let mut recorders = self.recorders.lock();
        let meta = RecorderMeta {
            info: info.clone(),
            last_poll: now,
            last_poll_at: Utc::now(),
            dead: false,
        };
        if recorders.insert(info.identifier.clone(), meta).is_none() {
            info!(
                process_group = %self.process_group,
                recorder = %info.identifier.hostname,
                ip = %info.identifier.ip,
                "recorder nuevo"
            );
        }
    }

    pub fn healthy_recorders(&self) -> usize {
        self.recorders.lock().values().filter(|m| m.is_healthy()).count()
    }

    pub fn total_recorders(&self) -> usize {
        self.recorders.lock().len()
    }

    /// `ceil(healthy * coverage_pct / 100)`
    pub fn recorder_target_count(&self, coverage_pct: u32) -> u32 {
        let healthy = self.healthy_recorders() as u64;
        let target = (healthy * coverage_pct as u64).div_ceil(100);
        target.min(u32::MAX as u64) as u32
    }

    /// Registra el poll y, si el recorder está sano, le pide trabajo al schedule vigente.
    pub fn get_work_assignment(&self, info: &RecorderInfo) -> Option<WorkAssignment> {
        self.report_recorder(info, Instant::now());
        if info.is_defunct {
            return None;
        }
        let schedule = self.current_schedule()?;
        schedule.get_next_work_assignment(&info.identifier)
    }

    pub fn set_schedule(&self, schedule: Option<Arc<WorkAssignmentSchedule>>) {
        *self.schedule.write() = schedule;
    }

    pub fn current_schedule(&self) -> Option<Arc<WorkAssignmentSchedule>> {
        self.schedule.read().clone()
    }

    pub fn set_last_window(&self, summary: WindowSummary) {
        *self.last_window.lock() = Some(summary);
    }

    pub fn last_window(&self) -> Option<WindowSummary> {
        self.last_window.lock().clone()
    }

    /// Marca muertos a los que no pollean hace `defunct_after` y olvida a los
    /// que no pollean hace `evict_after`.
    pub fn sweep_recorders(
        &self,
        now: Instant,
        defunct_after: Duration,
        evict_after: Duration,
    ) -> SweepResult {
        let mut result = SweepResult::default();
        let mut recorders = self.recorders.lock();
        recorders.retain(|id, meta| {
            let idle = now.saturating_duration_since(meta.last_poll);
            if idle > evict_after {
                debug!(process_group = %self.process_group, recorder = %id.hostname, "recorder olvidado");
                result.evicted += 1;
                return false;
            }
            if !meta.dead && idle > defunct_after {
                meta.dead = true;
                info!(
                    process_group = %self.process_group,
                    recorder = %id.hostname,
                    "marcando recorder como muerto"
                );
                result.marked_dead += 1;
            }
            true
        });
        result
    }

    pub fn status(&self) -> ProcessGroupStatus {
        let schedule = self.current_schedule();
        ProcessGroupStatus {
            process_group: self.process_group.clone(),
            healthy_recorders: self.healthy_recorders(),
            total_recorders: self.total_recorders(),
            has_active_schedule: schedule.is_some(),
            occupied_slots: schedule.map(|s| s.max_overlap()).unwrap_or(0),
            last_finalized_window: self.last_window(),
        }
    }
}

/// Contextos de todos los process groups asociados a este backend.
#[derive(Debug, Default)]
pub struct ProcessGroupContexts {
    contexts: DashMap<ProcessGroup, Arc<ProcessGroupContext>>,
}

impl ProcessGroupContexts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, process_group: &ProcessGroup) -> Option<Arc<ProcessGroupContext>> {
        self.contexts.get(process_group).map(|c| Arc::clone(c.value()))
    }

    /// Devuelve el contexto existente o crea uno nuevo; el bool indica si se creó.
    pub fn get_or_create(&self, process_group: &ProcessGroup) -> (Arc<ProcessGroupContext>, bool) {
        let mut created = false;
        let ctx = self
            .contexts
            .entry(process_group.clone())
            .or_insert_with(|| {
                created = true;
                Arc::new(ProcessGroupContext::new(process_group.clone()))
            })
            .value()
            .clone();
        (ctx, created)
    }

    pub fn remove(&self, process_group: &ProcessGroup) -> Option<Arc<ProcessGroupContext>> {
        self.contexts.remove(process_group).map(|(_, c)| c)
    }

    pub fn all(&self) -> Vec<Arc<ProcessGroupContext>> {
        self.contexts.iter().map(|c| Arc::clone(c.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
