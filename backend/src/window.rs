//! Ventana de agregación: qué work ids autorizó y en qué estado está cada perfil.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use common::proto::Wse;
use common::{ProcessGroup, WindowSummary, WorkId};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::aggregation::{AggregatedSamples, CpuSamplingAggregator, ProfileAggregator};
use crate::error::WindowError;
use crate::ingest::RecordedProfileIndexes;
use crate::lookup::AggregationWindowLookupStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProfileState {
    Scheduled,
    Started,
    Completed,
    AbandonedCorrupt,
    AbandonedIncomplete,
}

impl ProfileState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProfileState::Completed
                | ProfileState::AbandonedCorrupt
                | ProfileState::AbandonedIncomplete
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileWorkInfo {
    pub state: ProfileState,
    pub recorder_version: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub entries: u64,
    pub samples: u64,
    pub traces: BTreeSet<String>,
}

impl ProfileWorkInfo {
    fn scheduled() -> Self {
        Self {
            state: ProfileState::Scheduled,
            recorder_version: None,
            started_at: None,
            ended_at: None,
            entries: 0,
            samples: 0,
            traces: BTreeSet::new(),
        }
    }
}

struct WindowState {
    work_info: HashMap<WorkId, ProfileWorkInfo>,
    aggregator: Box<dyn ProfileAggregator>,
    expired_at: Option<DateTime<Utc>>,
}

fn started_info(
    work_info: &mut HashMap<WorkId, ProfileWorkInfo>,
    work_id: WorkId,
) -> Result<&mut ProfileWorkInfo, WindowError> {
    let info = work_info
        .get_mut(&work_id)
        .ok_or(WindowError::UnknownWorkId(work_id))?;
    if info.state != ProfileState::Started {
        return Err(WindowError::IllegalTransition {
            work_id,
            from: info.state,
            to: ProfileState::Started,
        });
    }
    Ok(info)
}

fn count_entry(info: &mut ProfileWorkInfo, entry: &Wse) {
    info.entries += 1;
    info.samples += entry.sample_count() as u64;
    if let Some(indexed) = &entry.indexed_data {
        info.traces
            .extend(indexed.trace_ctx.iter().map(|t| t.trace_name.clone()));
    }
}

/// Ventana en curso de un process group.
///
/// Los procesadores de ingesta la mutan en paralelo; cada operación toma el
/// lock interno por su cuenta.
pub struct AggregationWindow {
    process_group: ProcessGroup,
    start: DateTime<Utc>,
    work_ids: Vec<WorkId>,
    state: Mutex<WindowState>,
}

impl fmt::Debug for AggregationWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationWindow")
            .field("process_group", &self.process_group)
            .field("start", &self.start)
            .field("work_ids", &self.work_ids.len())
            .finish()
    }
}

impl AggregationWindow {
    pub fn new(process_group: ProcessGroup, start: DateTime<Utc>, work_ids: Vec<WorkId>) -> Self {
        Self::with_aggregator(
            process_group,
            start,
            work_ids,
            Box::new(CpuSamplingAggregator::new()),
        )
    }

    pub fn with_aggregator(
        process_group: ProcessGroup,
        start: DateTime<Utc>,
        work_ids: Vec<WorkId>,
        aggregator: Box<dyn ProfileAggregator>,
    ) -> Self {
        let work_info = work_ids
            .iter()
            .map(|id| (*id, ProfileWorkInfo::scheduled()))
            .collect();
        Self {
            process_group,
            start,
            work_ids,
            state: Mutex::new(WindowState {
                work_info,
                aggregator,
                expired_at: None,
            }),
        }
    }

    pub fn process_group(&self) -> &ProcessGroup {
        &self.process_group
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn work_ids(&self) -> &[WorkId] {
        &self.work_ids
    }

    pub fn profile_state(&self, work_id: WorkId) -> Option<ProfileState> {
        self.state.lock().work_info.get(&work_id).map(|w| w.state)
    }

    pub fn is_expired(&self) -> bool {
        self.state.lock().expired_at.is_some()
    }

    pub fn start_profile(
        &self,
        work_id: WorkId,
        recorder_version: u32,
        started_at: DateTime<Utc>,
    ) -> Result<(), WindowError> {
        let mut state = self.state.lock();
        let info = state
            .work_info
            .get_mut(&work_id)
            .ok_or(WindowError::UnknownWorkId(work_id))?;
        if info.state != ProfileState::Scheduled {
            return Err(WindowError::IllegalTransition {
                work_id,
                from: info.state,
                to: ProfileState::Started,
            });
        }
        info.state = ProfileState::Started;
        info.recorder_version = Some(recorder_version);
        info.started_at = Some(started_at);
        debug!(%work_id, process_group = %self.process_group, "perfil iniciado");
        Ok(())
    }

    pub fn update_work_info_with_entry(&self, work_id: WorkId, entry: &Wse) -> Result<(), WindowError> {
        let mut state = self.state.lock();
        let info = started_info(&mut state.work_info, work_id)?;
        count_entry(info, entry);
        Ok(())
    }

    pub fn aggregate(&self, entry: &Wse, indexes: &RecordedProfileIndexes) -> Result<(), WindowError> {
        let mut state = self.state.lock();
        state.aggregator.aggregate(entry, indexes)?;
        Ok(())
    }

    /// Agrega la entrada y actualiza los contadores del work id bajo un mismo lock.
    ///
    /// Si el agregador la rechaza, ni el agregado ni los contadores cambian.
    pub fn record_entry(
        &self,
        work_id: WorkId,
        entry: &Wse,
        indexes: &RecordedProfileIndexes,
    ) -> Result<(), WindowError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let info = started_info(&mut state.work_info, work_id)?;
        state.aggregator.aggregate(entry, indexes)?;
        count_entry(info, entry);
        Ok(())
    }

    pub fn complete_profile(&self, work_id: WorkId) -> Result<(), WindowError> {
        self.finish_profile(work_id, ProfileState::Completed)
    }

    pub fn abandon_profile_as_corrupt(&self, work_id: WorkId) -> Result<(), WindowError> {
        self.finish_profile(work_id, ProfileState::AbandonedCorrupt)
    }

    pub fn abandon_profile_as_incomplete(&self, work_id: WorkId) -> Result<(), WindowError> {
        self.finish_profile(work_id, ProfileState::AbandonedIncomplete)
    }

    fn finish_profile(&self, work_id: WorkId, to: ProfileState) -> Result<(), WindowError> {
        let mut state = self.state.lock();
        let info = state
            .work_info
            .get_mut(&work_id)
            .ok_or(WindowError::UnknownWorkId(work_id))?;
        if info.state != ProfileState::Started {
            return Err(WindowError::IllegalTransition {
                work_id,
                from: info.state,
                to,
            });
        }
        info.state = to;
        info.ended_at = Some(Utc::now());
        debug!(%work_id, state = ?to, "perfil terminado");
        Ok(())
    }

    /// Cierra la ventana: desasocia sus work ids y devuelve una foto inmutable.
    /// Sólo se puede hacer una vez.
    pub fn expire_window(
        &self,
        lookup: &AggregationWindowLookupStore,
    ) -> Result<FinalizedAggregationWindow, WindowError> {
        let finalized = {
            let mut state = self.state.lock();
            if state.expired_at.is_some() {
                return Err(WindowError::AlreadyExpired);
            }
            let end = Utc::now();
            state.expired_at = Some(end);
            FinalizedAggregationWindow {
                process_group: self.process_group.clone(),
                start: self.start,
                end,
                work_info: state
                    .work_info
                    .iter()
                    .map(|(id, info)| (*id, info.clone()))
                    .collect(),
                samples: state.aggregator.finalize(),
            }
        };
        lookup.unassociate(&self.work_ids);
        info!(
            process_group = %self.process_group,
            work_ids = self.work_ids.len(),
            samples = finalized.samples.samples,
            "ventana de agregación expirada"
        );
        Ok(finalized)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalizedAggregationWindow {
    pub process_group: ProcessGroup,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub work_info: BTreeMap<WorkId, ProfileWorkInfo>,
    pub samples: AggregatedSamples,
}

impl FinalizedAggregationWindow {
    fn count(&self, state: ProfileState) -> usize {
        self.work_info.values().filter(|w| w.state == state).count()
    }

    pub fn summary(&self) -> WindowSummary {
        WindowSummary {
            start: self.start,
            end: Some(self.end),
            scheduled: self.work_info.len(),
            completed: self.count(ProfileState::Completed),
            corrupt: self.count(ProfileState::AbandonedCorrupt),
            incomplete: self.count(ProfileState::AbandonedIncomplete),
            never_started: self.count(ProfileState::Scheduled),
            samples: self.samples.samples,
        }
    }
}
