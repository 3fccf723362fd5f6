pub mod event;
pub mod phase;
pub mod stimulus;
pub mod trial;

pub use event::{Envelope, Event, EventKind, FeedbackKind, Resolution, RunMilestone, Source};
pub use phase::RunPhase;
pub use stimulus::{Lifecycle, Position};
pub use trial::{Outcome, Side, Trial, TrialKind};
