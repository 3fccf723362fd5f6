//! Visual/audio collaborator contract.
//!
//! The engine asks the presenter to show things; the presenter owns the
//! timing of its own effects and reports their lifetime back over the bus
//! (`AnimationChanged` for slice effects, `FeedbackShowing` for messages).

use crate::bus::EventBus;
use crate::config::EngineConfig;
use std::collections::BTreeMap;
use stopsig_core::{Event, FeedbackKind, Position, Side, Source};
use stopsig_timing::ms_to_ns;

pub trait Presenter {
    /// Swap the stimulus to its stop-signal appearance.
    fn show_stop_signal(&mut self, side: Side);
    fn play_slice_effect(&mut self, side: Side, at: Position, now: u64, bus: &mut EventBus);
    fn show_feedback(&mut self, kind: FeedbackKind, now: u64, bus: &mut EventBus);
    /// Restore the stimulus' normal appearance, ending any effect on it.
    fn reset_visual(&mut self, side: Side, bus: &mut EventBus);
    fn show_start_gate(&mut self) {}
    /// Advance the presenter's own timers.
    fn update(&mut self, _now: u64, _bus: &mut EventBus) {}
    /// End every pending effect now, publishing the matching end events.
    fn clear(&mut self, _bus: &mut EventBus) {}
}

/// Presenter that shows nothing and never blocks trial advancement.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn show_stop_signal(&mut self, _side: Side) {}
    fn play_slice_effect(&mut self, _side: Side, _at: Position, _now: u64, _bus: &mut EventBus) {}
    fn show_feedback(&mut self, _kind: FeedbackKind, _now: u64, _bus: &mut EventBus) {}
    fn reset_visual(&mut self, _side: Side, _bus: &mut EventBus) {}
}

/// Headless presenter that models effect lifetimes with deadlines.
#[derive(Debug, Clone)]
pub struct TimedPresenter {
    slice_lifetime_ns: u64,
    feedback_duration_ns: u64,
    slices: BTreeMap<Side, u64>,
    feedback_until: Option<u64>,
}

impl TimedPresenter {
    pub fn new(slice_lifetime_ms: u64, feedback_duration_ms: u64) -> Self {
        Self {
            slice_lifetime_ns: ms_to_ns(slice_lifetime_ms),
            feedback_duration_ns: ms_to_ns(feedback_duration_ms),
            slices: BTreeMap::new(),
            feedback_until: None,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.slice_lifetime_ms, config.feedback_duration_ms)
    }

    pub fn is_animating(&self, side: Side) -> bool {
        self.slices.contains_key(&side)
    }

    pub fn is_showing_feedback(&self) -> bool {
        self.feedback_until.is_some()
    }
}

impl Presenter for TimedPresenter {
    fn show_stop_signal(&mut self, side: Side) {
        tracing::debug!(?side, "stop signal shown");
    }

    fn play_slice_effect(&mut self, side: Side, at: Position, now: u64, bus: &mut EventBus) {
        tracing::debug!(?side, x = at.x, y = at.y, "slice effect");
        let was_running = self
            .slices
            .insert(side, now + self.slice_lifetime_ns)
            .is_some();
        if !was_running {
            bus.publish(
                Source::Stimulus(side),
                Event::AnimationChanged { running: true },
            );
        }
    }

    fn show_feedback(&mut self, kind: FeedbackKind, now: u64, bus: &mut EventBus) {
        tracing::debug!(?kind, "feedback message");
        let was_showing = self
            .feedback_until
            .replace(now + self.feedback_duration_ns)
            .is_some();
        if !was_showing {
            bus.publish(Source::Presenter, Event::FeedbackShowing { showing: true });
        }
    }

    fn reset_visual(&mut self, side: Side, bus: &mut EventBus) {
        if self.slices.remove(&side).is_some() {
            bus.publish(
                Source::Stimulus(side),
                Event::AnimationChanged { running: false },
            );
        }
    }

    fn update(&mut self, now: u64, bus: &mut EventBus) {
        let expired: Vec<Side> = self
            .slices
            .iter()
            .filter(|&(_, &until)| now >= until)
            .map(|(&side, _)| side)
            .collect();
        for side in expired {
            self.slices.remove(&side);
            bus.publish(
                Source::Stimulus(side),
                Event::AnimationChanged { running: false },
            );
        }
        if self.feedback_until.is_some_and(|until| now >= until) {
            self.feedback_until = None;
            bus.publish(Source::Presenter, Event::FeedbackShowing { showing: false });
        }
    }

    fn clear(&mut self, bus: &mut EventBus) {
        for side in std::mem::take(&mut self.slices).into_keys() {
            bus.publish(
                Source::Stimulus(side),
                Event::AnimationChanged { running: false },
            );
        }
        if self.feedback_until.take().is_some() {
            bus.publish(Source::Presenter, Event::FeedbackShowing { showing: false });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::EventLog;

    #[test]
    fn slice_animation_ends_after_its_lifetime() {
        let mut bus = EventBus::new();
        let log = EventLog::attach_all(&mut bus);
        let mut presenter = TimedPresenter::new(1000, 2000);

        presenter.play_slice_effect(Side::Left, Position::new(-1.5, 0.0), 0, &mut bus);
        assert!(presenter.is_animating(Side::Left));
        presenter.update(ms_to_ns(999), &mut bus);
        assert!(presenter.is_animating(Side::Left));
        presenter.update(ms_to_ns(1000), &mut bus);
        assert!(!presenter.is_animating(Side::Left));

        assert_eq!(
            log.events(),
            vec![
                Event::AnimationChanged { running: true },
                Event::AnimationChanged { running: false },
            ]
        );
        assert!(log
            .envelopes()
            .iter()
            .all(|e| e.source == Source::Stimulus(Side::Left)));
    }

    #[test]
    fn feedback_publishes_show_and_hide() {
        let mut bus = EventBus::new();
        let log = EventLog::attach_all(&mut bus);
        let mut presenter = TimedPresenter::new(1000, 2000);

        presenter.show_feedback(FeedbackKind::StopSignalIgnored, 0, &mut bus);
        presenter.update(ms_to_ns(1500), &mut bus);
        assert!(presenter.is_showing_feedback());
        presenter.update(ms_to_ns(2000), &mut bus);
        assert!(!presenter.is_showing_feedback());
        assert_eq!(
            log.events(),
            vec![
                Event::FeedbackShowing { showing: true },
                Event::FeedbackShowing { showing: false },
            ]
        );
    }

    #[test]
    fn clear_closes_every_open_effect() {
        let mut bus = EventBus::new();
        let log = EventLog::attach_all(&mut bus);
        let mut presenter = TimedPresenter::new(1000, 2000);

        presenter.clear(&mut bus);
        assert!(log.events().is_empty());

        presenter.play_slice_effect(Side::Left, Position::default(), 0, &mut bus);
        presenter.show_feedback(FeedbackKind::StopSignalIgnored, 0, &mut bus);
        presenter.clear(&mut bus);
        assert!(!presenter.is_animating(Side::Left));
        assert!(!presenter.is_showing_feedback());
        assert_eq!(
            log.events(),
            vec![
                Event::AnimationChanged { running: true },
                Event::FeedbackShowing { showing: true },
                Event::AnimationChanged { running: false },
                Event::FeedbackShowing { showing: false },
            ]
        );

        // Nothing left to expire later.
        presenter.update(ms_to_ns(5000), &mut bus);
        assert_eq!(log.events().len(), 4);
    }

    #[test]
    fn reset_visual_ends_a_running_slice() {
        let mut bus = EventBus::new();
        let log = EventLog::attach_all(&mut bus);
        let mut presenter = TimedPresenter::new(1000, 2000);

        presenter.reset_visual(Side::Right, &mut bus);
        assert!(log.events().is_empty());

        presenter.play_slice_effect(Side::Right, Position::default(), 0, &mut bus);
        presenter.reset_visual(Side::Right, &mut bus);
        presenter.update(ms_to_ns(5000), &mut bus);
        assert_eq!(log.events().len(), 2);
    }
}
