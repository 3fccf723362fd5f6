//! Run-level state machine: `AwaitingStart → TrialInFlight → Settling →
//! (TrialInFlight | Complete)`.
//!
//! The orchestrator owns the bus, the stimuli and the presenter, and is
//! driven by [`TrialOrchestrator::update`] once per frame. What it knows about
//! the stimuli it learns from bus events: busy and animating lanes, whether
//! feedback is on screen, and trial resolutions. Those handlers write into a
//! shared block that the orchestrator reads between publishes.

use crate::bus::EventBus;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::input::ResponseInput;
use crate::plan::TrialPlan;
use crate::presenter::Presenter;
use crate::staircase::Staircase;
use crate::stimulus::{StimulusCtx, StimulusMachine};
use crate::trial::{RunSummary, TrialRecord};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use stopsig_core::{Event, EventKind, Position, RunMilestone, RunPhase, Side, Source, Trial};
use stopsig_timing::{Timer, ms_to_ns};

/// Conditions that hold the next trial back.
#[derive(Debug, Default)]
struct Blockers {
    busy: BTreeSet<Side>,
    animating: BTreeSet<Side>,
    feedback_showing: bool,
    /// Set whenever one of the conditions is released; cleared per trial.
    released: bool,
}

impl Blockers {
    fn is_quiet(&self) -> bool {
        self.busy.is_empty() && self.animating.is_empty() && !self.feedback_showing
    }

    fn clear(&mut self) {
        self.busy.clear();
        self.animating.clear();
        self.feedback_showing = false;
        self.released = false;
    }
}

#[derive(Debug, Default)]
struct RunShared {
    blockers: Blockers,
    active: Option<Trial>,
    records: Vec<TrialRecord>,
}

#[derive(Debug, Clone, Copy)]
struct PendingFall {
    trial: Trial,
    fall_at: u64,
}

pub struct TrialOrchestrator<T, R, P>
where
    T: Timer,
    R: Rng,
    P: Presenter,
{
    pub timer: T,
    rng: R,
    config: EngineConfig,
    bus: EventBus,
    staircase: Staircase,
    presenter: P,
    stimuli: BTreeMap<Side, StimulusMachine>,
    plan: Option<TrialPlan>,
    phase: RunPhase,
    current_index: usize,
    trial_in_flight: bool,
    pending: Option<PendingFall>,
    settle_at: Option<u64>,
    shared: Arc<Mutex<RunShared>>,
}

impl<T, R, P> TrialOrchestrator<T, R, P>
where
    T: Timer,
    R: Rng,
    P: Presenter,
{
    pub fn new(config: EngineConfig, timer: T, rng: R, presenter: P) -> Result<Self> {
        config.validate()?;

        let mut bus = EventBus::new();
        let staircase = Staircase::new(config.initial_ssd_ms, config.ssd_step_ms);
        staircase.attach(&mut bus);

        let shared = Arc::new(Mutex::new(RunShared::default()));
        Self::attach_handlers(&mut bus, &shared);

        let stimuli = config
            .lanes
            .iter()
            .map(|lane| (lane.side, StimulusMachine::new(lane, &config)))
            .collect();

        Ok(Self {
            timer,
            rng,
            config,
            bus,
            staircase,
            presenter,
            stimuli,
            plan: None,
            phase: RunPhase::AwaitingStart,
            current_index: 0,
            trial_in_flight: false,
            pending: None,
            settle_at: None,
            shared,
        })
    }

    fn attach_handlers(bus: &mut EventBus, shared: &Arc<Mutex<RunShared>>) {
        let state = Arc::clone(shared);
        bus.subscribe(EventKind::BusyChanged, move |envelope| {
            let (Event::BusyChanged { busy }, Some(side)) = (envelope.event, envelope.source.side())
            else {
                return;
            };
            let mut shared = state.lock();
            let blockers = &mut shared.blockers;
            if busy {
                blockers.busy.insert(side);
            } else {
                blockers.busy.remove(&side);
                blockers.released = true;
            }
        });

        let state = Arc::clone(shared);
        bus.subscribe(EventKind::AnimationChanged, move |envelope| {
            let (Event::AnimationChanged { running }, Some(side)) =
                (envelope.event, envelope.source.side())
            else {
                return;
            };
            let mut shared = state.lock();
            let blockers = &mut shared.blockers;
            if running {
                blockers.animating.insert(side);
            } else {
                blockers.animating.remove(&side);
                blockers.released = true;
            }
        });

        let state = Arc::clone(shared);
        bus.subscribe(EventKind::FeedbackShowing, move |envelope| {
            if let Event::FeedbackShowing { showing } = envelope.event {
                let mut shared = state.lock();
                let blockers = &mut shared.blockers;
                blockers.feedback_showing = showing;
                if !showing {
                    blockers.released = true;
                }
            }
        });

        let state = Arc::clone(shared);
        bus.subscribe(EventKind::TrialResolved, move |envelope| {
            if let Event::TrialResolved(resolution) = envelope.event {
                let mut shared = state.lock();
                let active = shared.active;
                match active {
                    Some(trial) => {
                        let record = TrialRecord::new(&trial, &resolution);
                        shared.records.push(record);
                    }
                    None => tracing::debug!(side = ?resolution.side, "resolution outside a trial"),
                }
            }
        });
    }

    /// Installs the plan for the next run. Refused while a run is going.
    pub fn load_plan(&mut self, plan: TrialPlan) -> bool {
        if self.phase.is_running() {
            tracing::warn!("cannot replace the trial plan during a run");
            return false;
        }
        if let Err(err) = plan.validate() {
            tracing::error!(error = %err, "trial plan rejected");
            return false;
        }
        tracing::info!(
            trials = plan.len(),
            name = plan.experiment_name(),
            "trial plan installed"
        );
        self.plan = Some(plan);
        self.current_index = 0;
        self.phase = RunPhase::AwaitingStart;
        true
    }

    /// Leaves the start gate and starts the first trial.
    pub fn begin(&mut self) -> bool {
        if self.phase != RunPhase::AwaitingStart {
            tracing::debug!(phase = ?self.phase, "begin ignored");
            return false;
        }
        if self.plan.is_none() {
            tracing::error!("cannot begin: no trial plan loaded");
            return false;
        }
        tracing::info!("run started");
        self.bus.publish(
            Source::Orchestrator,
            Event::RunStateChanged(RunMilestone::Started),
        );
        self.start_next_trial()
    }

    pub fn start_next_trial(&mut self) -> bool {
        if self.trial_in_flight {
            tracing::warn!(
                error = %EngineError::DuplicateTrialStart,
                index = self.current_index,
                "start ignored"
            );
            return false;
        }
        let Some(plan) = self.plan.as_ref() else {
            tracing::error!("cannot start a trial: no trial plan loaded");
            return false;
        };
        let Some(trial) = plan.get(self.current_index).copied() else {
            self.complete();
            return false;
        };

        self.trial_in_flight = true;
        self.phase = RunPhase::TrialInFlight;
        self.settle_at = None;
        {
            let mut shared = self.shared.lock();
            shared.active = Some(trial);
            shared.blockers.released = false;
        }
        self.bus.publish(
            Source::Orchestrator,
            Event::TrialInitiated {
                index: self.current_index,
            },
        );

        let Some(stimulus) = self.stimuli.get_mut(&trial.target_side) else {
            tracing::error!(
                error = %EngineError::MissingCollaborator(trial.target_side),
                trial = trial.index,
                "trial skipped"
            );
            self.current_index += 1;
            self.shared.lock().blockers.released = true;
            return true;
        };
        stimulus.prepare(trial.kind);

        let wait_ms = self
            .rng
            .random_range(self.config.min_wait_ms..=self.config.max_wait_ms);
        let now = self.timer.now();
        self.pending = Some(PendingFall {
            trial,
            fall_at: now + ms_to_ns(wait_ms),
        });
        tracing::info!(
            trial = trial.index,
            kind = ?trial.kind,
            side = %trial.target_side,
            wait_ms,
            "trial initiated"
        );
        true
    }

    /// Advances every deadline to the timer's current time.
    pub fn update(&mut self) {
        if !self.phase.is_running() {
            return;
        }
        let now = self.timer.now();

        // Runs before this tick's changes so a settle always spans a tick.
        self.advance_if_settled(now);
        self.dispatch_due_fall(now);

        for stimulus in self.stimuli.values_mut() {
            let mut ctx = StimulusCtx::new(&mut self.bus, &self.staircase, &mut self.presenter);
            stimulus.update(now, &mut ctx);
        }
        self.presenter.update(now, &mut self.bus);

        self.check_settled(now);
    }

    /// Forwards a response already resolved to a lane.
    pub fn register_response(&mut self, side: Side) -> bool {
        if !self.phase.allows_input() {
            tracing::debug!(phase = ?self.phase, %side, "response outside a run");
            return false;
        }
        let now = self.timer.now();
        let Some(stimulus) = self.stimuli.get_mut(&side) else {
            tracing::warn!(error = %EngineError::MissingCollaborator(side), "response dropped");
            return false;
        };
        let mut ctx = StimulusCtx::new(&mut self.bus, &self.staircase, &mut self.presenter);
        stimulus.register_response(now, &mut ctx)
    }

    /// Resolves a raw tap through `input` and registers it.
    pub fn tap<I: ResponseInput + ?Sized>(&mut self, at: Position, input: &I) -> bool {
        match input.resolve(at) {
            Some(side) => self.register_response(side),
            None => {
                tracing::trace!(x = at.x, y = at.y, "tap hit no zone");
                false
            }
        }
    }

    /// Abandons the current trial and starts the next one right away.
    pub fn skip_to_next(&mut self) -> bool {
        if !self.phase.is_running() {
            return false;
        }
        let skipped = self.shared.lock().active.map(|t| t.index);
        if self.pending.is_some() {
            self.current_index += 1;
        }
        self.force_stop();
        tracing::info!(trial = ?skipped, "trial skipped by operator");
        self.start_next_trial()
    }

    /// Stops everything and returns to the start gate with a fresh staircase.
    pub fn restart(&mut self) {
        self.force_stop();
        self.staircase.reset();
        self.current_index = 0;
        self.shared.lock().records.clear();
        self.phase = RunPhase::AwaitingStart;
        self.presenter.show_start_gate();
        tracing::info!(ssd_ms = self.staircase.current_delay_ms(), "run restarted");
        self.bus.publish(
            Source::Orchestrator,
            Event::RunStateChanged(RunMilestone::Restarted),
        );
    }

    fn dispatch_due_fall(&mut self, now: u64) {
        let Some(pending) = self.pending else {
            return;
        };
        if now < pending.fall_at {
            return;
        }
        self.pending = None;
        // The lane was looked up when the trial was initiated.
        let mut ctx = StimulusCtx::new(&mut self.bus, &self.staircase, &mut self.presenter);
        let started = self
            .stimuli
            .get_mut(&pending.trial.target_side)
            .is_some_and(|stimulus| stimulus.start_movement(now, &mut ctx));
        if !started {
            // Nothing will release the trial if the stimulus refused to fall.
            self.shared.lock().blockers.released = true;
        }
        self.current_index += 1;
    }

    fn check_settled(&mut self, now: u64) {
        if self.phase != RunPhase::TrialInFlight || self.pending.is_some() {
            return;
        }
        let settled = {
            let shared = self.shared.lock();
            shared.blockers.released && shared.blockers.is_quiet()
        };
        if settled {
            self.phase = RunPhase::Settling;
            self.settle_at = Some(now + ms_to_ns(self.config.inter_trial_pause_ms));
            tracing::debug!(index = self.current_index, "trial settled");
        }
    }

    fn advance_if_settled(&mut self, now: u64) {
        if self.phase != RunPhase::Settling {
            return;
        }
        {
            let mut shared = self.shared.lock();
            if !shared.blockers.is_quiet() {
                // Something started again; wait for its release.
                shared.blockers.released = false;
                drop(shared);
                self.phase = RunPhase::TrialInFlight;
                self.settle_at = None;
                return;
            }
        }
        if self.settle_at.is_some_and(|at| now >= at) {
            self.settle_at = None;
            self.trial_in_flight = false;
            self.shared.lock().active = None;
            self.start_next_trial();
        }
    }

    fn complete(&mut self) {
        if self.phase == RunPhase::Complete {
            return;
        }
        self.phase = RunPhase::Complete;
        self.trial_in_flight = false;
        self.pending = None;
        self.settle_at = None;
        let summary = self.summary();
        tracing::info!(
            trials = summary.trials,
            go_correct = summary.go_correct,
            go_misses = summary.go_misses,
            stop_successes = summary.stop_successes,
            final_ssd_ms = summary.final_ssd_ms,
            "run complete"
        );
        self.bus.publish(
            Source::Orchestrator,
            Event::RunStateChanged(RunMilestone::Completed),
        );
    }

    fn force_stop(&mut self) {
        self.pending = None;
        self.settle_at = None;
        for stimulus in self.stimuli.values_mut() {
            let mut ctx = StimulusCtx::new(&mut self.bus, &self.staircase, &mut self.presenter);
            stimulus.reset(&mut ctx);
        }
        self.presenter.clear(&mut self.bus);
        self.trial_in_flight = false;
        let mut shared = self.shared.lock();
        shared.blockers.clear();
        shared.active = None;
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn trial_in_flight(&self) -> bool {
        self.trial_in_flight
    }

    pub fn plan(&self) -> Option<&TrialPlan> {
        self.plan.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn staircase(&self) -> &Staircase {
        &self.staircase
    }

    /// For subscribing extra listeners before the run begins.
    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    pub fn stimulus(&self, side: Side) -> Option<&StimulusMachine> {
        self.stimuli.get(&side)
    }

    pub fn records(&self) -> Vec<TrialRecord> {
        self.shared.lock().records.clone()
    }

    pub fn summary(&self) -> RunSummary {
        let shared = self.shared.lock();
        RunSummary::from_records(&shared.records, self.staircase.current_delay_ms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presenter::NullPresenter;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use stopsig_core::TrialKind;
    use stopsig_timing::ManualTimer;

    fn orchestrator() -> TrialOrchestrator<ManualTimer, StdRng, NullPresenter> {
        let mut orch = TrialOrchestrator::new(
            EngineConfig::default(),
            ManualTimer::new(),
            StdRng::seed_from_u64(1),
            NullPresenter,
        )
        .unwrap();
        let plan = TrialPlan::new(
            vec![
                Trial::new(1, TrialKind::Go, Side::Left),
                Trial::new(2, TrialKind::StopRight, Side::Right),
            ],
            "unit",
        );
        assert!(orch.load_plan(plan));
        orch
    }

    #[test]
    fn begins_only_from_the_start_gate() {
        let mut orch = orchestrator();
        assert!(orch.begin());
        assert_eq!(orch.phase(), RunPhase::TrialInFlight);
        assert!(!orch.begin());
    }

    #[test]
    fn start_without_plan_is_a_no_op() {
        let mut orch = TrialOrchestrator::new(
            EngineConfig::default(),
            ManualTimer::new(),
            StdRng::seed_from_u64(1),
            NullPresenter,
        )
        .unwrap();
        assert!(!orch.begin());
        assert!(!orch.start_next_trial());
        assert_eq!(orch.phase(), RunPhase::AwaitingStart);
    }

    #[test]
    fn index_moves_when_the_fall_is_dispatched() {
        let mut orch = orchestrator();
        orch.begin();
        assert_eq!(orch.current_index(), 0);
        orch.timer.advance_ms(1500);
        orch.update();
        assert_eq!(orch.current_index(), 1);
        assert!(orch.stimulus(Side::Left).is_some_and(|s| s.is_moving()));
    }

    #[test]
    fn invalid_plans_are_refused() {
        let mut orch = orchestrator();
        let broken = TrialPlan::new(vec![Trial::new(2, TrialKind::Go, Side::Left)], "bad");
        assert!(!orch.load_plan(broken));
        assert_eq!(orch.plan().map(TrialPlan::len), Some(2));
    }

    #[test]
    fn rejects_invalid_config() {
        let configs = [
            EngineConfig {
                window_start_ms: 900,
                ..EngineConfig::default()
            },
            // Would never reach the bottom and never release the trial.
            EngineConfig {
                arrival_tolerance: -0.1,
                ..EngineConfig::default()
            },
            // Lands before the window opens, so every tap would be ignored.
            EngineConfig {
                fall_speed: 100.0,
                ..EngineConfig::default()
            },
        ];
        for config in configs {
            let result = TrialOrchestrator::new(
                config,
                ManualTimer::new(),
                StdRng::seed_from_u64(1),
                NullPresenter,
            );
            assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
        }
    }
}
