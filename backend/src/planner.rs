//! Ciclo de vida de las ventanas de agregación de un process group.
//!
//! Cada planner es una task propia: pide el perfil de la próxima ventana un
//! poco antes de que termine la actual y en cada rotación expira la vieja y
//! arma la nueva (asignaciones, slots, schedule, ventana, lookup).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{ProcessGroup, WorkAssignment, WorkProfile};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{BackendConfig, ScheduleBootstrapConfig};
use crate::context::ProcessGroupContext;
use crate::error::{SetupError, WorkFetchError};
use crate::lookup::AggregationWindowLookupStore;
use crate::schedule::WorkAssignmentSchedule;
use crate::slots::SlotCounter;
use crate::window::AggregationWindow;
use crate::work_fetch::WorkFetcher;
use crate::work_id::WorkIdGenerator;

#[derive(Debug, Clone, Copy)]
pub struct PlannerSettings {
    pub window_duration: Duration,
    pub refresh_buffer: Duration,
    pub bootstrap: ScheduleBootstrapConfig,
}

impl PlannerSettings {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            window_duration: config.aggregation_window_duration,
            refresh_buffer: config.work_profile_refresh_buffer,
            bootstrap: config.schedule_bootstrap(),
        }
    }

    fn prefetch_delay(&self) -> Duration {
        self.window_duration.saturating_sub(self.refresh_buffer)
    }
}

/// Colaboradores compartidos por todos los planners del backend.
#[derive(Clone)]
pub struct PlannerDeps {
    pub lookup: Arc<AggregationWindowLookupStore>,
    pub slots: Arc<SlotCounter>,
    pub ids: Arc<WorkIdGenerator>,
    pub fetcher: Arc<dyn WorkFetcher>,
    pub settings: PlannerSettings,
}

type PrefetchResult = (u64, Result<WorkProfile, WorkFetchError>);

struct ActiveWindow {
    index: u64,
    window: Arc<AggregationWindow>,
    slots_held: u32,
}

pub struct AggregationWindowPlanner {
    context: Arc<ProcessGroupContext>,
    deps: PlannerDeps,
    window_index: u64,
    current: Option<ActiveWindow>,
    prefetched: Option<(u64, WorkProfile)>,
}

impl AggregationWindowPlanner {
    pub fn new(context: Arc<ProcessGroupContext>, deps: PlannerDeps) -> Self {
        Self {
            context,
            deps,
            window_index: 0,
            current: None,
            prefetched: None,
        }
    }

    fn process_group(&self) -> &ProcessGroup {
        self.context.process_group()
    }

    /// Lanza la task del planner.
    pub fn start(self) -> PlannerHandle {
        let cancel = CancellationToken::new();
        let process_group = self.process_group().clone();
        let task = tokio::spawn(self.run(cancel.clone()));
        PlannerHandle {
            process_group,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    async fn run(mut self, cancel: CancellationToken) {
        let (tx, mut rx) = mpsc::channel::<PrefetchResult>(4);
        info!(process_group = %self.process_group(), "planner iniciado");

        // la primera ventana espera al primer fetch, salga bien o mal
        self.spawn_prefetch(1, Duration::ZERO, tx.clone(), cancel.clone());
        tokio::select! {
            _ = cancel.cancelled() => {
                self.expire_current();
                return;
            }
            msg = rx.recv() => {
                if let Some(msg) = msg {
                    self.on_prefetch(msg);
                }
            }
        }

        let mut ticker = tokio::time::interval(self.deps.settings.window_duration);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    self.rollover();
                    let next = self.window_index + 1;
                    let delay = self.deps.settings.prefetch_delay();
                    self.spawn_prefetch(next, delay, tx.clone(), cancel.clone());
                }
                Some(msg) = rx.recv() => self.on_prefetch(msg),
            }
        }

        self.expire_current();
        info!(process_group = %self.process_group(), "planner detenido");
    }

    fn spawn_prefetch(
        &self,
        index: u64,
        delay: Duration,
        tx: mpsc::Sender<PrefetchResult>,
        cancel: CancellationToken,
    ) {
        let fetcher = Arc::clone(&self.deps.fetcher);
        let process_group = self.process_group().clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let result = fetcher.fetch_work(&process_group).await;
            // si el planner ya terminó nadie escucha
            let _ = tx.send((index, result)).await;
        });
    }

    fn on_prefetch(&mut self, (index, result): PrefetchResult) {
        match result {
            Ok(profile) if index > self.window_index => {
                debug!(process_group = %self.process_group(), window_index = index, "perfil de trabajo recibido");
                self.prefetched = Some((index, profile));
            }
            Ok(_) => {
                warn!(
                    process_group = %self.process_group(),
                    window_index = index,
                    current = self.window_index,
                    "perfil de trabajo llegó tarde, se descarta"
                );
            }
            Err(e) => {
                warn!(
                    process_group = %self.process_group(),
                    window_index = index,
                    error = %e,
                    "no se pudo obtener el perfil de trabajo"
                );
            }
        }
    }

    fn rollover(&mut self) {
        self.expire_current();
        self.window_index += 1;
        let index = self.window_index;

        match self.prefetched.take() {
            Some((target, profile)) if target == index => {
                if let Err(e) = self.setup_window(index, &profile) {
                    warn!(
                        process_group = %self.process_group(),
                        window_index = index,
                        error = %e,
                        "no se pudo armar la ventana, se saltea"
                    );
                }
            }
            Some((target, profile)) if target > index => {
                // todavía no le toca
                self.prefetched = Some((target, profile));
            }
            _ => {
                warn!(
                    process_group = %self.process_group(),
                    window_index = index,
                    "sin perfil de trabajo para la ventana, se saltea"
                );
            }
        }
    }

    fn setup_window(&mut self, index: u64, profile: &WorkProfile) -> Result<(), SetupError> {
        let target = self.context.recorder_target_count(profile.coverage_pct);
        let assignments: Vec<WorkAssignment> = (0..target)
            .map(|_| -> Result<WorkAssignment, SetupError> {
                let work_id = self.deps.ids.next().ok_or(SetupError::WorkIdsExhausted)?;
                Ok(WorkAssignment::new(
                    work_id,
                    profile.work.clone(),
                    profile.description.clone(),
                    profile.duration,
                ))
            })
            .collect::<Result<_, _>>()?;

        let granted = self.deps.slots.acquire(target);
        let schedule = match WorkAssignmentSchedule::new(
            &self.deps.settings.bootstrap,
            assignments,
            profile.duration,
            granted,
        ) {
            Ok(s) => s,
            Err(e) => {
                self.deps.slots.release(granted);
                return Err(e.into());
            }
        };

        // sólo hace falta el solapamiento máximo
        let needed = schedule.max_overlap().min(granted);
        self.deps.slots.release(granted - needed);

        let window = Arc::new(AggregationWindow::new(
            self.process_group().clone(),
            Utc::now(),
            schedule.work_ids().to_vec(),
        ));
        if let Err(e) = self.deps.lookup.associate(window.work_ids(), &window) {
            self.deps.slots.release(needed);
            return Err(e.into());
        }

        info!(
            process_group = %self.process_group(),
            window_index = index,
            target,
            scheduled = window.work_ids().len(),
            slots = needed,
            "ventana de agregación iniciada"
        );
        self.context.set_schedule(Some(Arc::new(schedule)));
        self.current = Some(ActiveWindow {
            index,
            window,
            slots_held: needed,
        });
        Ok(())
    }

    fn expire_current(&mut self) {
        self.context.set_schedule(None);
        let Some(active) = self.current.take() else {
            return;
        };
        self.deps.slots.release(active.slots_held);
        match active.window.expire_window(&self.deps.lookup) {
            Ok(finalized) => {
                let summary = finalized.summary();
                info!(
                    process_group = %self.process_group(),
                    window_index = active.index,
                    scheduled = summary.scheduled,
                    completed = summary.completed,
                    corrupt = summary.corrupt,
                    incomplete = summary.incomplete,
                    never_started = summary.never_started,
                    samples = summary.samples,
                    "ventana de agregación finalizada"
                );
                self.context.set_last_window(summary);
            }
            Err(e) => {
                warn!(process_group = %self.process_group(), error = %e, "no se pudo expirar la ventana");
            }
        }
    }
}

/// Control de un planner en ejecución.
pub struct PlannerHandle {
    process_group: ProcessGroup,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PlannerHandle {
    pub fn process_group(&self) -> &ProcessGroup {
        &self.process_group
    }

    /// Idempotente. La task expira la ventana vigente antes de salir.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            info!(process_group = %self.process_group, "deteniendo planner");
        }
        self.cancel.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Espera a que la task termine.
    pub async fn stopped(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(process_group = %self.process_group, error = %e, "task del planner terminó con error");
            }
        }
    }
}
