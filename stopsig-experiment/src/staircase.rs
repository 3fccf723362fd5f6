//! One-up/one-down stop-signal delay staircase.
//!
//! The delay is the only state shared between stimuli. Every read and write
//! goes through the same lock, so handles can be cloned freely into bus
//! handlers and stimuli.

use crate::bus::{EventBus, SubscriptionId};
use parking_lot::Mutex;
use std::sync::Arc;
use stopsig_core::{Event, EventKind};

#[derive(Debug)]
struct StaircaseState {
    current_delay_ms: u64,
    initial_delay_ms: u64,
    step_ms: u64,
}

#[derive(Debug, Clone)]
pub struct Staircase {
    inner: Arc<Mutex<StaircaseState>>,
}

impl Staircase {
    pub fn new(initial_delay_ms: u64, step_ms: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StaircaseState {
                current_delay_ms: initial_delay_ms,
                initial_delay_ms,
                step_ms,
            })),
        }
    }

    pub fn current_delay_ms(&self) -> u64 {
        self.inner.lock().current_delay_ms
    }

    pub fn step_ms(&self) -> u64 {
        self.inner.lock().step_ms
    }

    /// Applies one resolved trial. Successful stops lengthen the delay by one
    /// step, failed stops shorten it (floored at zero). Go trials are ignored.
    pub fn adjust(&self, was_stop_trial: bool, was_correct: bool) -> u64 {
        let mut state = self.inner.lock();
        if was_stop_trial {
            state.current_delay_ms = if was_correct {
                state.current_delay_ms + state.step_ms
            } else {
                state.current_delay_ms.saturating_sub(state.step_ms)
            };
            tracing::debug!(
                delay_ms = state.current_delay_ms,
                success = was_correct,
                "stop-signal delay adjusted"
            );
        }
        state.current_delay_ms
    }

    pub fn reset(&self) {
        let mut state = self.inner.lock();
        state.current_delay_ms = state.initial_delay_ms;
    }

    /// Subscribes this staircase to trial resolutions on `bus`.
    pub fn attach(&self, bus: &mut EventBus) -> SubscriptionId {
        let staircase = self.clone();
        bus.subscribe(EventKind::TrialResolved, move |envelope| {
            if let Event::TrialResolved(resolution) = envelope.event {
                if resolution.stop_trial {
                    staircase.adjust(true, resolution.outcome.is_correct());
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stopsig_core::{Outcome, Resolution, Side, Source};

    #[test]
    fn successful_stop_adds_one_step() {
        let staircase = Staircase::new(250, 50);
        assert_eq!(staircase.adjust(true, true), 300);
        assert_eq!(staircase.adjust(true, true), 350);
    }

    #[test]
    fn failed_stop_is_floored_at_zero() {
        let staircase = Staircase::new(20, 50);
        assert_eq!(staircase.adjust(true, false), 0);
        assert_eq!(staircase.adjust(true, false), 0);
        assert_eq!(staircase.adjust(true, true), 50);
    }

    #[test]
    fn go_trials_leave_the_delay_alone() {
        let staircase = Staircase::new(250, 50);
        staircase.adjust(false, true);
        staircase.adjust(false, false);
        assert_eq!(staircase.current_delay_ms(), 250);
    }

    #[test]
    fn no_upper_bound() {
        let staircase = Staircase::new(0, 100);
        for _ in 0..20 {
            staircase.adjust(true, true);
        }
        assert_eq!(staircase.current_delay_ms(), 2000);
        staircase.reset();
        assert_eq!(staircase.current_delay_ms(), 0);
    }

    #[test]
    fn clones_share_state_across_threads() {
        let staircase = Staircase::new(1000, 10);
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let s = staircase.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        s.adjust(true, i % 2 == 0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(staircase.current_delay_ms(), 1000);
    }

    #[test]
    fn attached_staircase_follows_stop_resolutions() {
        let staircase = Staircase::new(250, 50);
        let mut bus = EventBus::new();
        staircase.attach(&mut bus);
        let resolution = |stop_trial, outcome| Resolution {
            side: Side::Left,
            stop_trial,
            outcome,
            reaction_ns: None,
            ssd_ms: None,
            stop_signal_shown: false,
            resolved_at: 0,
        };
        let source = Source::Stimulus(Side::Left);
        bus.publish(source, Event::TrialResolved(resolution(true, Outcome::Correct)));
        bus.publish(source, Event::TrialResolved(resolution(false, Outcome::Incorrect)));
        assert_eq!(staircase.current_delay_ms(), 300);
        bus.publish(source, Event::TrialResolved(resolution(true, Outcome::Incorrect)));
        assert_eq!(staircase.current_delay_ms(), 250);
    }
}
