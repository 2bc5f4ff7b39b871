use std::sync::Arc;

use bytes::BytesMut;
use chrono::Utc;
use common::proto::{RecordingHeader, Wse};
use common::{ProfileOutcome, WorkId};
use tracing::{debug, info, warn};

use super::parser::{self, EntryFrame};
use super::RecordedProfileIndexes;
use crate::config::IngestionConfig;
use crate::error::{AggregationFailure, ParseError};
use crate::gate::SingleProcessingGate;
use crate::lookup::AggregationWindowLookupStore;
use crate::window::AggregationWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestPhase {
    AwaitingHeader,
    Aggregating,
    EndReceived,
}

/// Procesa el stream de un perfil, de a pedazos, contra la ventana que lo autorizó.
///
/// Se cierra una sola vez; el cierre decide el resultado y libera el gate.
#[derive(Debug)]
pub struct ProfileIngestionProcessor {
    lookup: Arc<AggregationWindowLookupStore>,
    gate: Arc<SingleProcessingGate>,
    limits: IngestionConfig,
    buffer: BytesMut,
    phase: IngestPhase,
    errored: bool,
    closed: bool,
    // sólo se setea si el gate aceptó este work_id
    work_id: Option<WorkId>,
    gate_held: bool,
    window: Option<Arc<AggregationWindow>>,
    indexes: RecordedProfileIndexes,
}

impl ProfileIngestionProcessor {
    pub fn new(
        lookup: Arc<AggregationWindowLookupStore>,
        gate: Arc<SingleProcessingGate>,
        limits: IngestionConfig,
    ) -> Self {
        Self {
            lookup,
            gate,
            limits,
            buffer: BytesMut::new(),
            phase: IngestPhase::AwaitingHeader,
            errored: false,
            closed: false,
            work_id: None,
            gate_held: false,
            window: None,
            indexes: RecordedProfileIndexes::new(),
        }
    }

    pub fn phase(&self) -> IngestPhase {
        self.phase
    }

    pub fn work_id(&self) -> Option<WorkId> {
        self.work_id
    }

    pub fn is_errored(&self) -> bool {
        self.errored
    }

    /// Ventana resuelta y marcador de fin recibido.
    pub fn is_processed(&self) -> bool {
        self.window.is_some() && self.phase == IngestPhase::EndReceived
    }

    pub fn process(&mut self, chunk: &[u8]) -> Result<(), AggregationFailure> {
        if self.closed {
            return Err(AggregationFailure::AlreadyClosed);
        }
        if self.errored {
            return Err(AggregationFailure::StreamErrored);
        }
        if self.phase == IngestPhase::EndReceived {
            self.errored = true;
            return Err(AggregationFailure::DataAfterEndMarker);
        }

        self.buffer.extend_from_slice(chunk);
        let result = self.drain();
        if let Err(e) = &result {
            self.errored = true;
            warn!(work_id = ?self.work_id, error = %e, "stream de perfil inválido");
        }
        result
    }

    fn drain(&mut self) -> Result<(), AggregationFailure> {
        if self.window.is_none() {
            let Some(header) = parser::parse_header(&mut self.buffer, self.limits.max_header_bytes)?
            else {
                return Ok(());
            };
            self.on_header(header)?;
        }

        loop {
            match parser::parse_entry(&mut self.buffer, self.limits.max_entry_bytes)? {
                None => return Ok(()),
                Some(EntryFrame::EndMarker) => {
                    self.phase = IngestPhase::EndReceived;
                    if !self.buffer.is_empty() {
                        return Err(AggregationFailure::DataAfterEndMarker);
                    }
                    return Ok(());
                }
                Some(EntryFrame::Entry(entry)) => self.on_entry(entry)?,
            }
        }
    }

    fn on_header(&mut self, header: RecordingHeader) -> Result<(), AggregationFailure> {
        let work_id = header
            .work_assignment
            .as_ref()
            .map(|a| a.work_id())
            .ok_or(ParseError::MissingWorkAssignment)?;

        self.gate.accept(work_id)?;
        self.work_id = Some(work_id);
        self.gate_held = true;

        let window = self
            .lookup
            .get(work_id)
            .ok_or(AggregationFailure::WorkIdNotFound(work_id))?;
        window.start_profile(work_id, header.recorder_version, Utc::now())?;

        debug!(
            %work_id,
            process_group = %window.process_group(),
            recorder_version = header.recorder_version,
            "header de perfil recibido"
        );
        self.window = Some(window);
        self.phase = IngestPhase::Aggregating;
        Ok(())
    }

    fn on_entry(&mut self, entry: Wse) -> Result<(), AggregationFailure> {
        let (Some(window), Some(work_id)) = (&self.window, self.work_id) else {
            return Ok(());
        };
        self.indexes.update(entry.indexed_data.as_ref());
        window.record_entry(work_id, &entry, &self.indexes)?;
        Ok(())
    }

    /// Decide el resultado: errored -> corrupto, procesado -> completo, si no incompleto.
    pub fn close(&mut self) -> Result<ProfileOutcome, AggregationFailure> {
        if self.closed {
            return Err(AggregationFailure::AlreadyClosed);
        }
        self.closed = true;

        let outcome = if self.errored {
            ProfileOutcome::Corrupt
        } else if self.is_processed() {
            ProfileOutcome::Completed
        } else {
            ProfileOutcome::Incomplete
        };

        if let (Some(window), Some(work_id)) = (&self.window, self.work_id) {
            let marked = match outcome {
                ProfileOutcome::Completed => window.complete_profile(work_id),
                ProfileOutcome::Corrupt => window.abandon_profile_as_corrupt(work_id),
                ProfileOutcome::Incomplete => window.abandon_profile_as_incomplete(work_id),
            };
            if let Err(e) = marked {
                warn!(%work_id, error = %e, "no se pudo marcar el perfil en la ventana");
            }
        }

        self.release_gate();
        info!(work_id = ?self.work_id, ?outcome, "stream de perfil cerrado");
        Ok(outcome)
    }

    fn release_gate(&mut self) {
        if !self.gate_held {
            return;
        }
        self.gate_held = false;
        if let Some(work_id) = self.work_id {
            self.gate.finish(work_id);
        }
    }
}

impl Drop for ProfileIngestionProcessor {
    fn drop(&mut self) {
        if !self.closed {
            debug!(work_id = ?self.work_id, "procesador descartado sin cerrar");
            self.release_gate();
        }
    }
}
