//! Event vocabulary shared by the stimuli, the staircase and the orchestrator.
//!
//! Events are plain values. [`Event::kind`] maps a payload-carrying event to
//! the [`EventKind`] subscribers register for.

use crate::trial::{Outcome, Side};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    MovementChanged,
    BusyChanged,
    ResponseWindowChanged,
    AnimationChanged,
    ResponseRegistered,
    FeedbackShowing,
    TrialInitiated,
    TrialResolved,
    RunStateChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 9] = [
        EventKind::MovementChanged,
        EventKind::BusyChanged,
        EventKind::ResponseWindowChanged,
        EventKind::AnimationChanged,
        EventKind::ResponseRegistered,
        EventKind::FeedbackShowing,
        EventKind::TrialInitiated,
        EventKind::TrialResolved,
        EventKind::RunStateChanged,
    ];
}

/// Who published an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Stimulus(Side),
    Orchestrator,
    Presenter,
}

impl Source {
    pub fn side(self) -> Option<Side> {
        match self {
            Source::Stimulus(side) => Some(side),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    /// Participant tapped after the stop signal appeared.
    StopSignalIgnored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMilestone {
    Started,
    Restarted,
    Completed,
}

/// Scoring of one fall, published the moment the outcome is known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution {
    pub side: Side,
    pub stop_trial: bool,
    pub outcome: Outcome,
    /// Time from fall start to the accepted response, if any.
    pub reaction_ns: Option<u64>,
    /// Stop-signal delay armed for this fall (stop trials only).
    pub ssd_ms: Option<u64>,
    pub stop_signal_shown: bool,
    pub resolved_at: u64,
}

impl Resolution {
    pub fn responded(&self) -> bool {
        self.reaction_ns.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event {
    MovementChanged { moving: bool },
    BusyChanged { busy: bool },
    ResponseWindowChanged { in_window: bool },
    AnimationChanged { running: bool },
    ResponseRegistered,
    FeedbackShowing { showing: bool },
    TrialInitiated { index: usize },
    TrialResolved(Resolution),
    RunStateChanged(RunMilestone),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::MovementChanged { .. } => EventKind::MovementChanged,
            Event::BusyChanged { .. } => EventKind::BusyChanged,
            Event::ResponseWindowChanged { .. } => EventKind::ResponseWindowChanged,
            Event::AnimationChanged { .. } => EventKind::AnimationChanged,
            Event::ResponseRegistered => EventKind::ResponseRegistered,
            Event::FeedbackShowing { .. } => EventKind::FeedbackShowing,
            Event::TrialInitiated { .. } => EventKind::TrialInitiated,
            Event::TrialResolved(_) => EventKind::TrialResolved,
            Event::RunStateChanged(_) => EventKind::RunStateChanged,
        }
    }
}

/// An event together with its publisher, as delivered to handlers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub source: Source,
    pub event: Event,
}

impl Envelope {
    pub fn new(source: Source, event: Event) -> Self {
        Self { source, event }
    }

    pub fn kind(&self) -> EventKind {
        self.event.kind()
    }
}
