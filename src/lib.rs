// Library interface for f1-replay
// This allows integration tests to access internal modules

pub mod cache;
pub mod config;
pub mod errors;
pub mod events;
pub mod frames;
pub mod playback;
pub mod resample;
pub mod session;
pub mod summary;
pub mod telemetry;
pub mod track;

// Re-export commonly used types
pub use cache::{FileFrameCache, FrameCache};
pub use config::{ReplayConfig, SynthesisParams};
pub use errors::ReplayError;
pub use events::{RaceEvent, RaceEventKind, SessionEvents};
pub use frames::{DriverState, DriverStatus, Frame, FrameSequence, Gap, LeaderboardEntry};
pub use playback::{ControlEvent, Direction, PlaybackController, PlaybackSpeed, PlaybackState};
pub use session::{Session, SessionLoader};
pub use telemetry::{Driver, DriverNumber, RawSample, SampleSource, SessionKey, SessionKind};
