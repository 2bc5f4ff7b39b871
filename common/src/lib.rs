pub mod assignment;
pub mod process_group;
pub mod proto;
pub mod recorder;
pub mod status;
pub mod wire;
pub mod work;
pub mod work_id;

pub use assignment::WorkAssignment;
pub use process_group::ProcessGroup;
pub use recorder::{PollRequest, PollResponse, RecorderIdentifier, RecorderInfo};
pub use status::{
    AssociationRequest, AssociationResponse, LeaderInfo, LeaderUpdateRequest, ProcessGroupStatus,
    ProfileIngestResponse, ProfileOutcome, WindowSummary,
};
pub use work::{Work, WorkProfile};
pub use work_id::WorkId;
