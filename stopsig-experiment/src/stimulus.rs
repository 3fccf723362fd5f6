//! Per-stimulus fall / response / reset state machine.
//!
//! A stimulus is `Idle`, `Falling`, or `Resolved` (scored, waiting for its
//! reset deadline). While falling or resolved it carries a fall cycle with
//! two concurrent timers measured from the fall start: the response window
//! and, on stop trials, the stop signal. Every timer is a deadline checked on
//! [`StimulusMachine::update`]; nothing here blocks.
//!
//! `busy` and `moving` are derived from the lifecycle and published only when
//! a transition changes them. Window open/close events come from the window
//! timer's own transitions, so a coarse tick that crosses both bounds still
//! publishes both.

use crate::bus::EventBus;
use crate::config::{EngineConfig, Lane};
use crate::presenter::Presenter;
use crate::staircase::Staircase;
use stopsig_core::{
    Event, FeedbackKind, Lifecycle, Outcome, Position, Resolution, Side, Source, TrialKind,
};
use stopsig_timing::ms_to_ns;

/// Borrowed collaborators a stimulus needs while it runs.
pub struct StimulusCtx<'a> {
    pub bus: &'a mut EventBus,
    pub staircase: &'a Staircase,
    pub presenter: &'a mut dyn Presenter,
}

impl<'a> StimulusCtx<'a> {
    pub fn new(
        bus: &'a mut EventBus,
        staircase: &'a Staircase,
        presenter: &'a mut dyn Presenter,
    ) -> Self {
        Self {
            bus,
            staircase,
            presenter,
        }
    }
}

/// Scoring of an accepted response. A tap on a stop trial counts as correct
/// as long as the stop signal had not appeared yet.
pub fn score_response(stop_trial: bool, stop_signal_shown: bool) -> Outcome {
    Outcome::from_correct(!(stop_trial && stop_signal_shown))
}

/// Scoring of a fall that reached the bottom untouched.
pub fn score_withheld(stop_trial: bool) -> Outcome {
    Outcome::from_correct(stop_trial)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowTimer {
    Pending,
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy)]
struct StopSignal {
    fires_at: u64,
    delay_ms: u64,
    fired: bool,
    shown: bool,
}

#[derive(Debug, Clone, Copy)]
struct FallCycle {
    started_at: u64,
    last_tick: u64,
    stop_trial: bool,
    responded: bool,
    window: WindowTimer,
    stop_signal: Option<StopSignal>,
}

impl FallCycle {
    fn stop_signal_shown(&self) -> bool {
        self.stop_signal.is_some_and(|s| s.shown)
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Idle,
    Falling(FallCycle),
    Resolved { cycle: FallCycle, reset_at: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Flags {
    busy: bool,
    moving: bool,
}

#[derive(Debug, Clone)]
pub struct StimulusMachine {
    side: Side,
    top: Position,
    bottom: Position,
    position: Position,
    rotation_deg: f32,
    fall_speed: f32,
    spin_deg_per_sec: f32,
    arrival_tolerance: f32,
    window_start_ns: u64,
    window_end_ns: u64,
    bottom_wait_ns: u64,
    reset_delay_ns: u64,
    next_stop_trial: bool,
    phase: Phase,
    last_outcome: Option<Outcome>,
}

impl StimulusMachine {
    pub fn new(lane: &Lane, config: &EngineConfig) -> Self {
        let top = config.top_of(lane);
        Self {
            side: lane.side,
            top,
            bottom: config.bottom_of(lane),
            position: top,
            rotation_deg: 0.0,
            fall_speed: config.fall_speed,
            spin_deg_per_sec: config.spin_deg_per_sec,
            arrival_tolerance: config.arrival_tolerance,
            window_start_ns: ms_to_ns(config.window_start_ms),
            window_end_ns: ms_to_ns(config.window_end_ms),
            bottom_wait_ns: ms_to_ns(config.bottom_wait_ms),
            reset_delay_ns: ms_to_ns(config.reset_delay_ms),
            next_stop_trial: false,
            phase: Phase::Idle,
            last_outcome: None,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn lifecycle(&self) -> Lifecycle {
        match self.phase {
            Phase::Idle => Lifecycle::Idle,
            Phase::Falling(_) => Lifecycle::Falling,
            Phase::Resolved { .. } => Lifecycle::Resolved,
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn rotation_deg(&self) -> f32 {
        self.rotation_deg
    }

    pub fn is_busy(&self) -> bool {
        self.flags().busy
    }

    pub fn is_moving(&self) -> bool {
        self.flags().moving
    }

    pub fn is_in_response_window(&self) -> bool {
        self.cycle().is_some_and(|c| c.window == WindowTimer::Open)
    }

    pub fn is_stop_trial(&self) -> bool {
        self.cycle().is_some_and(|c| c.stop_trial)
    }

    pub fn stop_signal_shown(&self) -> bool {
        self.cycle().is_some_and(|c| c.stop_signal_shown())
    }

    /// Stop-signal delay armed for the current fall.
    pub fn armed_delay_ms(&self) -> Option<u64> {
        self.cycle().and_then(|c| c.stop_signal).map(|s| s.delay_ms)
    }

    pub fn fall_started_at(&self) -> Option<u64> {
        self.cycle().map(|c| c.started_at)
    }

    pub fn last_outcome(&self) -> Option<Outcome> {
        self.last_outcome
    }

    /// Tells the stimulus what its next fall is. Ignored unless idle.
    pub fn prepare(&mut self, kind: TrialKind) -> bool {
        if !matches!(self.phase, Phase::Idle) {
            tracing::warn!(side = ?self.side, "prepare ignored: stimulus is busy");
            return false;
        }
        self.next_stop_trial = kind.is_stop();
        true
    }

    pub fn start_movement(&mut self, now: u64, ctx: &mut StimulusCtx<'_>) -> bool {
        if !matches!(self.phase, Phase::Idle) {
            tracing::warn!(
                side = ?self.side,
                lifecycle = ?self.lifecycle(),
                "start ignored: stimulus is busy"
            );
            return false;
        }
        let before = self.flags();
        let stop_trial = std::mem::take(&mut self.next_stop_trial);
        // SSD is read once, here, and kept for the whole fall.
        let stop_signal = stop_trial.then(|| {
            let delay_ms = ctx.staircase.current_delay_ms();
            StopSignal {
                fires_at: now + ms_to_ns(delay_ms),
                delay_ms,
                fired: false,
                shown: false,
            }
        });
        self.position = self.top;
        self.rotation_deg = 0.0;
        self.phase = Phase::Falling(FallCycle {
            started_at: now,
            last_tick: now,
            stop_trial,
            responded: false,
            window: WindowTimer::Pending,
            stop_signal,
        });
        tracing::info!(
            side = ?self.side,
            stop_trial,
            ssd_ms = ?stop_signal.map(|s| s.delay_ms),
            "fall started"
        );
        self.emit_changes(before, ctx);
        self.fire_due_timers(now, ctx);
        true
    }

    /// Advances timers, motion and the reset deadline to `now`.
    pub fn update(&mut self, now: u64, ctx: &mut StimulusCtx<'_>) {
        self.fire_due_timers(now, ctx);

        let mut arrived = false;
        if let Phase::Falling(cycle) = &mut self.phase {
            let dt = now.saturating_sub(cycle.last_tick) as f32 / 1e9;
            cycle.last_tick = now;
            self.position = self
                .position
                .move_towards(self.bottom, self.fall_speed * dt);
            self.rotation_deg += self.side.spin_sign() * self.spin_deg_per_sec * dt;
            if self.position.distance(self.bottom) <= self.arrival_tolerance {
                self.position = self.bottom;
                arrived = true;
            }
        }
        if arrived {
            let stop_trial = self.is_stop_trial();
            self.resolve(now, None, score_withheld(stop_trial), ctx);
            return;
        }

        if let Phase::Resolved { reset_at, .. } = self.phase {
            if now >= reset_at {
                self.reset(ctx);
            }
        }
    }

    /// Scores a tap. Only the first tap inside `[window_start, window_end)` of
    /// a fall counts; anything else returns `false` and changes nothing.
    pub fn register_response(&mut self, now: u64, ctx: &mut StimulusCtx<'_>) -> bool {
        self.fire_due_timers(now, ctx);

        let Phase::Falling(cycle) = &self.phase else {
            tracing::debug!(
                side = ?self.side,
                lifecycle = ?self.lifecycle(),
                "response ignored: not falling"
            );
            return false;
        };
        let elapsed = now.saturating_sub(cycle.started_at);
        if elapsed < self.window_start_ns || elapsed >= self.window_end_ns {
            tracing::warn!(
                side = ?self.side,
                elapsed_ms = elapsed as f64 / 1e6,
                "response missed: outside window"
            );
            return false;
        }

        let stop_trial = cycle.stop_trial;
        let outcome = score_response(stop_trial, cycle.stop_signal_shown());
        tracing::info!(
            side = ?self.side,
            stop_trial,
            ?outcome,
            rt_ms = elapsed as f64 / 1e6,
            "response registered"
        );

        let source = Source::Stimulus(self.side);
        ctx.bus.publish(source, Event::ResponseRegistered);
        if !stop_trial {
            ctx.presenter
                .play_slice_effect(self.side, self.position, now, ctx.bus);
        } else if !outcome.is_correct() {
            ctx.presenter
                .show_feedback(FeedbackKind::StopSignalIgnored, now, ctx.bus);
        }
        self.resolve(now, Some(now), outcome, ctx);
        true
    }

    /// Cancels every timer of the current fall and returns to idle in place.
    pub fn stop_movement(&mut self, ctx: &mut StimulusCtx<'_>) {
        let before = self.flags();
        self.cancel_cycle(ctx);
        self.emit_changes(before, ctx);
    }

    /// Cancels the fall and restores the start position and appearance.
    pub fn reset(&mut self, ctx: &mut StimulusCtx<'_>) {
        let before = self.flags();
        self.cancel_cycle(ctx);
        self.position = self.top;
        self.rotation_deg = 0.0;
        ctx.presenter.reset_visual(self.side, ctx.bus);
        tracing::debug!(side = ?self.side, "reset to top");
        self.emit_changes(before, ctx);
    }

    fn cycle(&self) -> Option<&FallCycle> {
        match &self.phase {
            Phase::Idle => None,
            Phase::Falling(cycle) | Phase::Resolved { cycle, .. } => Some(cycle),
        }
    }

    fn flags(&self) -> Flags {
        match self.phase {
            Phase::Idle => Flags {
                busy: false,
                moving: false,
            },
            Phase::Falling(_) => Flags {
                busy: true,
                moving: true,
            },
            Phase::Resolved { .. } => Flags {
                busy: true,
                moving: false,
            },
        }
    }

    /// Publishes busy/moving changes since `before`. Busy goes up first and
    /// down last so listeners never see a moving stimulus that is not busy.
    fn emit_changes(&self, before: Flags, ctx: &mut StimulusCtx<'_>) {
        let after = self.flags();
        let source = Source::Stimulus(self.side);
        if after.busy && !before.busy {
            ctx.bus.publish(source, Event::BusyChanged { busy: true });
        }
        if after.moving != before.moving {
            ctx.bus.publish(
                source,
                Event::MovementChanged {
                    moving: after.moving,
                },
            );
        }
        if !after.busy && before.busy {
            ctx.bus.publish(source, Event::BusyChanged { busy: false });
        }
    }

    fn fire_due_timers(&mut self, now: u64, ctx: &mut StimulusCtx<'_>) {
        let side = self.side;
        let (window_start_ns, window_end_ns) = (self.window_start_ns, self.window_end_ns);
        let cycle = match &mut self.phase {
            Phase::Idle => return,
            Phase::Falling(cycle) | Phase::Resolved { cycle, .. } => cycle,
        };
        let responded = cycle.responded;
        if let Some(signal) = cycle.stop_signal.as_mut() {
            if !signal.fired && now >= signal.fires_at {
                signal.fired = true;
                // The fall keeps going; only the appearance changes.
                if !responded {
                    signal.shown = true;
                    tracing::debug!(?side, delay_ms = signal.delay_ms, "stop signal fired");
                    ctx.presenter.show_stop_signal(side);
                }
            }
        }

        let source = Source::Stimulus(side);
        if cycle.window == WindowTimer::Pending && now >= cycle.started_at + window_start_ns {
            cycle.window = WindowTimer::Open;
            tracing::debug!(?side, "response window opened");
            ctx.bus
                .publish(source, Event::ResponseWindowChanged { in_window: true });
        }
        if cycle.window == WindowTimer::Open && now >= cycle.started_at + window_end_ns {
            cycle.window = WindowTimer::Closed;
            tracing::debug!(?side, "response window closed");
            ctx.bus
                .publish(source, Event::ResponseWindowChanged { in_window: false });
        }
    }

    fn resolve(
        &mut self,
        now: u64,
        response_at: Option<u64>,
        outcome: Outcome,
        ctx: &mut StimulusCtx<'_>,
    ) {
        let before = self.flags();
        let Phase::Falling(mut cycle) = self.phase else {
            return;
        };
        cycle.responded = response_at.is_some();
        let wait = if response_at.is_some() {
            self.reset_delay_ns
        } else {
            self.bottom_wait_ns
        };
        let resolution = Resolution {
            side: self.side,
            stop_trial: cycle.stop_trial,
            outcome,
            reaction_ns: response_at.map(|at| at - cycle.started_at),
            ssd_ms: cycle.stop_signal.map(|s| s.delay_ms),
            stop_signal_shown: cycle.stop_signal_shown(),
            resolved_at: now,
        };
        self.phase = Phase::Resolved {
            cycle,
            reset_at: now + wait,
        };
        self.last_outcome = Some(outcome);
        if response_at.is_none() {
            tracing::info!(
                side = ?self.side,
                stop_trial = cycle.stop_trial,
                ?outcome,
                "reached bottom"
            );
        }
        self.emit_changes(before, ctx);
        ctx.bus.publish(Source::Stimulus(self.side), Event::TrialResolved(resolution));
    }

    fn cancel_cycle(&mut self, ctx: &mut StimulusCtx<'_>) {
        let was_open = self.is_in_response_window();
        self.phase = Phase::Idle;
        self.next_stop_trial = false;
        if was_open {
            ctx.bus.publish(
                Source::Stimulus(self.side),
                Event::ResponseWindowChanged { in_window: false },
            );
        }
    }
}
