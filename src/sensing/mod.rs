pub mod frames;
pub mod loop_worker;
pub mod marker;
pub mod source;

pub use frames::FrameDirSource;
pub use loop_worker::{LoopExit, LoopSummary, SensingLoop};
pub use marker::{MarkerDetection, MarkerDetector};
pub use source::{PresenceSource, Reading, TraceSource};
