//! Reparto escalonado de asignaciones dentro de una ventana de agregación.
//!
//! Convención de nombres heredada del cálculo: prefijo `d` duración en segundos,
//! `n` en nanos, `c` contadores.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use common::{RecorderIdentifier, WorkAssignment, WorkId};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::config::ScheduleBootstrapConfig;
use crate::error::ScheduleError;

const NANOS_IN_SEC: i64 = 1_000_000_000;

/// Espera máxima por el lock de la cola al entregar trabajo.
pub const LOCK_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
struct ScheduleEntry {
    assignment: WorkAssignment,
    n_start_offset: i64,
    // desempate estable para offsets iguales
    seq: usize,
}

#[derive(Debug, PartialEq, Eq)]
enum EntryTiming {
    Ready(u32),
    TooEarly(i64),
    Missed(i64),
}

impl ScheduleEntry {
    /// Segundos que faltan para el inicio, truncado hacia cero.
    fn remaining_delay(&self, elapsed: Duration) -> i64 {
        let n_elapsed = i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX);
        self.n_start_offset.saturating_sub(n_elapsed) / NANOS_IN_SEC
    }

    fn timing(&self, elapsed: Duration, d_min_delay: i64, d_max_delay: i64) -> EntryTiming {
        let d_remaining = self.remaining_delay(elapsed);
        if d_remaining < d_min_delay {
            EntryTiming::Missed(d_remaining)
        } else if d_remaining > d_max_delay {
            EntryTiming::TooEarly(d_remaining)
        } else {
            EntryTiming::Ready(d_remaining as u32)
        }
    }
}

impl PartialEq for ScheduleEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScheduleEntry {}

impl PartialOrd for ScheduleEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduleEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.n_start_offset
            .cmp(&other.n_start_offset)
            .then(self.seq.cmp(&other.seq))
    }
}

#[derive(Debug, Default)]
struct ScheduleState {
    pending: BinaryHeap<Reverse<ScheduleEntry>>,
    issued: HashMap<RecorderIdentifier, ScheduleEntry>,
}

/// Cola de asignaciones ordenada por offset de inicio.
///
/// Cada recorder recibe como mucho una asignación por schedule; los polls
/// repetidos sólo recalculan el `delay` de la que ya tiene.
#[derive(Debug)]
pub struct WorkAssignmentSchedule {
    reference: Instant,
    d_min_delay: i64,
    d_max_delay: i64,
    c_max_serial: u32,
    c_max_parallel: u32,
    work_ids: Vec<WorkId>,
    state: Mutex<ScheduleState>,
}

impl WorkAssignmentSchedule {
    /// Arma el schedule. Si las asignaciones necesitan más paralelismo que los
    /// `max_concurrent_slots` otorgados, se descartan las que sobran.
    pub fn new(
        config: &ScheduleBootstrapConfig,
        mut assignments: Vec<WorkAssignment>,
        d_profile_len: u32,
        max_concurrent_slots: u32,
    ) -> Result<Self, ScheduleError> {
        // respiro al inicio de la ventana, en general menor que la tolerancia del final
        let d_win_start_pad = config.scheduling_buffer_secs as i64 * 2;
        let d_effective_win_len = config.window_duration_secs as i64
            - config.window_end_tolerance_secs as i64
            - d_win_start_pad;
        let d_effective_profile_len = d_profile_len as i64 + config.scheduling_buffer_secs as i64;

        let c_max_serial = if d_effective_profile_len > 0 {
            d_effective_win_len / d_effective_profile_len
        } else {
            0
        };
        if c_max_serial < 1 {
            return Err(ScheduleError::ProfileDoesNotFit {
                profile_secs: d_profile_len,
                buffer_secs: config.scheduling_buffer_secs,
                effective_window_secs: d_effective_win_len,
            });
        }
        let c_max_serial = c_max_serial as usize;

        let c_required = assignments.len();
        if c_required > 0 && max_concurrent_slots == 0 {
            return Err(ScheduleError::NoSlotsAvailable {
                required: c_required,
            });
        }

        let c_capacity = max_concurrent_slots as usize * c_max_serial;
        if c_required > c_capacity {
            warn!(
                required = c_required,
                capacity = c_capacity,
                slots = max_concurrent_slots,
                "no hay slots para todas las asignaciones, se recortan"
            );
            assignments.truncate(c_capacity);
        }

        let c_kept = assignments.len();
        let c_max_parallel = c_kept.div_ceil(c_max_serial) as u32;

        let work_ids = assignments.iter().map(|a| a.work_id).collect();
        let mut pending = BinaryHeap::with_capacity(c_kept);
        for (i, assignment) in assignments.into_iter().enumerate() {
            let d_offset = d_win_start_pad + (i % c_max_serial) as i64 * d_effective_profile_len;
            pending.push(Reverse(ScheduleEntry {
                assignment,
                n_start_offset: d_offset * NANOS_IN_SEC,
                seq: i,
            }));
        }

        debug!(
            c_kept,
            c_max_serial, c_max_parallel, d_effective_win_len, "schedule armado"
        );

        Ok(Self {
            reference: Instant::now(),
            d_min_delay: config.min_acceptable_delay_secs as i64,
            d_max_delay: config.max_acceptable_delay_secs as i64,
            c_max_serial: c_max_serial as u32,
            c_max_parallel,
            work_ids,
            state: Mutex::new(ScheduleState {
                pending,
                issued: HashMap::new(),
            }),
        })
    }

    /// Máximo de asignaciones en vuelo al mismo tiempo (cMaxParallel).
    pub fn max_overlap(&self) -> u32 {
        self.c_max_parallel
    }

    pub fn max_serial(&self) -> u32 {
        self.c_max_serial
    }

    pub fn work_ids(&self) -> &[WorkId] {
        &self.work_ids
    }

    /// Asignaciones que todavía no se entregaron ni se descartaron.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn get_next_work_assignment(&self, recorder: &RecorderIdentifier) -> Option<WorkAssignment> {
        self.get_next_work_assignment_at(recorder, self.reference.elapsed(), Utc::now())
    }

    /// Igual que [`Self::get_next_work_assignment`] pero con el tiempo transcurrido
    /// desde la creación del schedule provisto por el llamador.
    ///
    /// Devuelve `None` si no hay nada listo todavía, si no queda nada o si no se
    /// consiguió el lock a tiempo; el recorder vuelve a intentar en el próximo poll.
    pub fn get_next_work_assignment_at(
        &self,
        recorder: &RecorderIdentifier,
        elapsed: Duration,
        now: DateTime<Utc>,
    ) -> Option<WorkAssignment> {
        let Some(mut state) = self.state.try_lock_for(LOCK_TIMEOUT) else {
            warn!(
                recorder = %recorder.hostname,
                "timeout esperando el lock del schedule"
            );
            return None;
        };

        if let Some(entry) = state.issued.get(recorder) {
            // ya tiene asignación: misma asignación, delay recalculado
            let d_remaining = entry.remaining_delay(elapsed).max(0) as u32;
            return Some(entry.assignment.issued(d_remaining, now));
        }

        while let Some(Reverse(head)) = state.pending.peek() {
            match head.timing(elapsed, self.d_min_delay, self.d_max_delay) {
                EntryTiming::TooEarly(d_remaining) => {
                    // cola ordenada: si la primera es temprana, las demás también
                    debug!(
                        work_id = %head.assignment.work_id,
                        remaining_delay = d_remaining,
                        "muy temprano para entregar la asignación"
                    );
                    return None;
                }
                EntryTiming::Missed(d_remaining) => {
                    error!(
                        work_id = %head.assignment.work_id,
                        remaining_delay = d_remaining,
                        "scheduling miss, se descarta la asignación"
                    );
                    state.pending.pop();
                }
                EntryTiming::Ready(d_delay) => {
                    let Some(Reverse(entry)) = state.pending.pop() else {
                        break;
                    };
                    let assignment = entry.assignment.issued(d_delay, now);
                    state.issued.insert(recorder.clone(), entry);
                    return Some(assignment);
                }
            }
        }

        None
    }

    #[cfg(test)]
    fn start_offsets_secs(&self) -> Vec<i64> {
        let state = self.state.lock();
        let mut offsets: Vec<_> = state
            .pending
            .iter()
            .map(|Reverse(e)| e.n_start_offset / NANOS_IN_SEC)
            .collect();
        offsets.sort_unstable();
        offsets
    }
}
