mod diagnostics;
mod process;
mod segments;
mod supervisor;

pub use process::{authenticated_source, build_transcoder_args, find_executable};
pub use segments::{validate_camera_id, SegmentFile};
pub use supervisor::{EnsureOutcome, SessionInfo, TranscodeSupervisor};
