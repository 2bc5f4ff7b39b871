use common::wire::WireError;
use common::{ProcessGroup, WorkId};
use thiserror::Error;

use crate::window::ProfileState;

/// Errores al armar el schedule de una ventana.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("profile of {profile_secs}s (+{buffer_secs}s buffer) does not fit in an effective window of {effective_window_secs}s")]
    ProfileDoesNotFit {
        profile_secs: u32,
        buffer_secs: u32,
        effective_window_secs: i64,
    },

    #[error("no work assignment slots available for {required} assignments")]
    NoSlotsAvailable { required: usize },
}

/// Errores del agregador inyectado en la ventana.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AggregateError {
    #[error("frame references method_id={0} which was never indexed")]
    UnknownMethodId(i64),

    #[error("unsupported work type {0} in entry")]
    UnsupportedWorkType(i32),

    #[error("entry carries no work type")]
    MissingWorkType,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WindowError {
    #[error("work_id={0} does not belong to this aggregation window")]
    UnknownWorkId(WorkId),

    #[error("work_id={work_id} cannot move from {from:?} to {to:?}")]
    IllegalTransition {
        work_id: WorkId,
        from: ProfileState,
        to: ProfileState,
    },

    #[error("aggregation window already expired")]
    AlreadyExpired,

    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LookupError {
    #[error("work_id={0} is already associated with an aggregation window")]
    AlreadyAssociated(WorkId),
}

/// Errores de framing / decodificación del stream.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("unsupported recording protocol version {0}")]
    UnsupportedVersion(u32),

    #[error("{frame} of {len} bytes exceeds the allowed {max} bytes")]
    FrameTooLarge {
        frame: &'static str,
        len: u32,
        max: u32,
    },

    #[error("{frame} checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch {
        frame: &'static str,
        expected: u32,
        computed: u32,
    },

    #[error("decoding {frame}: {source}")]
    Decode {
        frame: &'static str,
        #[source]
        source: prost::DecodeError,
    },

    #[error("recording header carries no work assignment")]
    MissingWorkAssignment,
}

/// Falla de ingesta de un perfil. Siempre deja al procesador en estado errored.
#[derive(Error, Debug)]
pub enum AggregationFailure {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("work_id={0} not found, cannot continue receiving associated profile")]
    WorkIdNotFound(WorkId),

    #[error("profile for work_id={0} is already being processed")]
    ProfileAlreadyInProgress(WorkId),

    #[error("cannot accept more data after receiving end marker")]
    DataAfterEndMarker,

    #[error("profile processor already closed")]
    AlreadyClosed,

    #[error("profile stream already failed, no more data accepted")]
    StreamErrored,

    #[error(transparent)]
    Window(#[from] WindowError),
}

#[derive(Error, Debug)]
pub enum WorkFetchError {
    #[error("no leader is currently known")]
    NoLeader,

    #[error("work request to leader failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("leader answered work request with status {0}")]
    Status(u16),

    #[error("no work profile configured for process_group={0}")]
    NotConfigured(ProcessGroup),
}

/// Falla al montar una ventana; la ventana se saltea en ese ciclo.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("work id counter exhausted")]
    WorkIdsExhausted,
}
