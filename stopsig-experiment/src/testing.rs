//! Helpers for exercising the engine in tests and simulations.

use crate::bus::EventBus;
use crate::presenter::{Presenter, TimedPresenter};
use parking_lot::Mutex;
use std::sync::Arc;
use stopsig_core::{Envelope, Event, EventKind, FeedbackKind, Position, Side};

/// Records every envelope published for the kinds it was attached to.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<Envelope>>>,
}

impl EventLog {
    pub fn attach(bus: &mut EventBus, kinds: &[EventKind]) -> Self {
        let log = Self::default();
        for &kind in kinds {
            let entries = Arc::clone(&log.entries);
            bus.subscribe(kind, move |envelope| entries.lock().push(*envelope));
        }
        log
    }

    pub fn attach_all(bus: &mut EventBus) -> Self {
        Self::attach(bus, &EventKind::ALL)
    }

    pub fn envelopes(&self) -> Vec<Envelope> {
        self.entries.lock().clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.entries.lock().iter().map(|e| e.event).collect()
    }

    pub fn of_kind(&self, kind: EventKind) -> Vec<Envelope> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.kind() == kind)
            .copied()
            .collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.entries.lock().iter().filter(|e| e.kind() == kind).count()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenterCall {
    StopSignal(Side),
    Slice(Side),
    Feedback(FeedbackKind),
    ResetVisual(Side),
    StartGate,
}

/// Presenter that records what it was asked to do and delegates effect
/// timing to a [`TimedPresenter`].
#[derive(Debug, Clone)]
pub struct RecordingPresenter {
    inner: TimedPresenter,
    calls: Vec<PresenterCall>,
}

impl RecordingPresenter {
    pub fn new(inner: TimedPresenter) -> Self {
        Self {
            inner,
            calls: Vec::new(),
        }
    }

    pub fn inner(&self) -> &TimedPresenter {
        &self.inner
    }

    pub fn calls(&self) -> &[PresenterCall] {
        &self.calls
    }

    pub fn count(&self, call: PresenterCall) -> usize {
        self.calls.iter().filter(|&&c| c == call).count()
    }

    pub fn slices(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, PresenterCall::Slice(_)))
            .count()
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }
}

impl Presenter for RecordingPresenter {
    fn show_stop_signal(&mut self, side: Side) {
        self.calls.push(PresenterCall::StopSignal(side));
        self.inner.show_stop_signal(side);
    }

    fn play_slice_effect(&mut self, side: Side, at: Position, now: u64, bus: &mut EventBus) {
        self.calls.push(PresenterCall::Slice(side));
        self.inner.play_slice_effect(side, at, now, bus);
    }

    fn show_feedback(&mut self, kind: FeedbackKind, now: u64, bus: &mut EventBus) {
        self.calls.push(PresenterCall::Feedback(kind));
        self.inner.show_feedback(kind, now, bus);
    }

    fn reset_visual(&mut self, side: Side, bus: &mut EventBus) {
        self.calls.push(PresenterCall::ResetVisual(side));
        self.inner.reset_visual(side, bus);
    }

    fn show_start_gate(&mut self) {
        self.calls.push(PresenterCall::StartGate);
    }

    fn update(&mut self, now: u64, bus: &mut EventBus) {
        self.inner.update(now, bus);
    }

    fn clear(&mut self, bus: &mut EventBus) {
        self.inner.clear(bus);
    }
}
