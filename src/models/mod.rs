pub mod playback;
pub mod session;

pub use playback::{
    DurationEstimate, HealthState, IntermissionWindow, PlaybackSample, ProgressHint,
    SemanticPosition,
};
pub use session::{LifecycleState, RoomRecord, Session, SessionId};
