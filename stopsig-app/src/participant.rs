//! Simulated participant for headless runs.
//!
//! Race model: every fall starts a go process with a uniformly drawn reaction
//! time. Once the stop signal is visible a stop process runs for `ssrt_ms`;
//! if it would finish before the pending tap, the tap is withheld.

use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use stopsig_core::{Lifecycle, Side};
use stopsig_experiment::StimulusMachine;
use stopsig_timing::ms_to_ns;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantConfig {
    pub go_rt_min_ms: u64,
    pub go_rt_max_ms: u64,
    pub ssrt_ms: u64,
    /// Chance of not reacting to a fall at all.
    pub omission_rate: f64,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            go_rt_min_ms: 520,
            go_rt_max_ms: 760,
            ssrt_ms: 220,
            omission_rate: 0.03,
        }
    }
}

impl ParticipantConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.go_rt_min_ms <= self.go_rt_max_ms,
            "go_rt_min_ms ({}) exceeds go_rt_max_ms ({})",
            self.go_rt_min_ms,
            self.go_rt_max_ms
        );
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.omission_rate),
            "omission_rate must lie in [0, 1], got {}",
            self.omission_rate
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct PlannedTap {
    fall_started_at: u64,
    tap_at: Option<u64>,
    signal_seen: bool,
}

pub struct SimulatedParticipant {
    config: ParticipantConfig,
    rng: StdRng,
    plans: BTreeMap<Side, PlannedTap>,
}

impl SimulatedParticipant {
    pub fn new(config: ParticipantConfig, rng: StdRng) -> Self {
        Self {
            config,
            rng,
            plans: BTreeMap::new(),
        }
    }

    /// Watches one stimulus; returns `true` when the participant taps it now.
    pub fn poll(&mut self, stimulus: &StimulusMachine, now: u64) -> bool {
        let side = stimulus.side();
        let (Lifecycle::Falling, Some(started)) = (stimulus.lifecycle(), stimulus.fall_started_at())
        else {
            if stimulus.lifecycle() == Lifecycle::Idle {
                self.plans.remove(&side);
            }
            return false;
        };

        let stale = self
            .plans
            .get(&side)
            .is_none_or(|plan| plan.fall_started_at != started);
        if stale {
            let plan = self.plan_fall(started);
            self.plans.insert(side, plan);
        }
        let Some(plan) = self.plans.get_mut(&side) else {
            return false;
        };

        if stimulus.stop_signal_shown() && !plan.signal_seen {
            plan.signal_seen = true;
            let stop_done = now + ms_to_ns(self.config.ssrt_ms);
            if plan.tap_at.is_some_and(|tap| stop_done < tap) {
                plan.tap_at = None;
                tracing::debug!(?side, "participant stopped in time");
            }
        }

        match plan.tap_at {
            Some(tap) if now >= tap => {
                plan.tap_at = None;
                true
            }
            _ => false,
        }
    }

    fn plan_fall(&mut self, fall_started_at: u64) -> PlannedTap {
        let tap_at = if self.rng.random_bool(self.config.omission_rate) {
            None
        } else {
            let rt_ms = self
                .rng
                .random_range(self.config.go_rt_min_ms..=self.config.go_rt_max_ms);
            Some(fall_started_at + ms_to_ns(rt_ms))
        };
        PlannedTap {
            fall_started_at,
            tap_at,
            signal_seen: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use stopsig_core::{Outcome, Trial, TrialKind};
    use stopsig_experiment::{EngineConfig, NullPresenter, TrialOrchestrator, TrialPlan};
    use stopsig_timing::{ManualTimer, Timer};

    fn run_single(trial: Trial, initial_ssd_ms: u64) -> stopsig_experiment::TrialRecord {
        let config = EngineConfig {
            min_wait_ms: 500,
            max_wait_ms: 500,
            initial_ssd_ms,
            ..EngineConfig::default()
        };
        let mut orch = TrialOrchestrator::new(
            config,
            ManualTimer::new(),
            StdRng::seed_from_u64(9),
            NullPresenter,
        )
        .unwrap();
        orch.load_plan(TrialPlan::new(vec![trial], "participant"));
        let mut participant = SimulatedParticipant::new(
            ParticipantConfig {
                go_rt_min_ms: 600,
                go_rt_max_ms: 600,
                ssrt_ms: 200,
                omission_rate: 0.0,
            },
            StdRng::seed_from_u64(1),
        );

        orch.begin();
        while !orch.phase().is_complete() {
            orch.timer.advance_ms(10);
            orch.update();
            let now = orch.timer.now();
            let side = trial.target_side;
            let tap = orch
                .stimulus(side)
                .is_some_and(|s| participant.poll(s, now));
            if tap {
                orch.register_response(side);
            }
        }
        orch.records()[0]
    }

    #[test]
    fn taps_after_the_drawn_reaction_time() {
        let record = run_single(Trial::new(1, TrialKind::Go, Side::Right), 250);
        assert_eq!(record.outcome, Outcome::Correct);
        assert_eq!(record.reaction_time_ns, Some(ms_to_ns(600)));
    }

    #[test]
    fn early_signal_wins_the_race() {
        // Signal at 250 ms, stop finishes at 450 ms, before the 600 ms tap.
        let record = run_single(Trial::new(1, TrialKind::StopLeft, Side::Left), 250);
        assert!(!record.responded);
        assert_eq!(record.outcome, Outcome::Correct);
    }

    #[test]
    fn late_signal_loses_the_race() {
        // Signal at 500 ms, stop would finish at 700 ms, after the tap.
        let record = run_single(Trial::new(1, TrialKind::StopLeft, Side::Left), 500);
        assert!(record.responded);
        assert_eq!(record.outcome, Outcome::Incorrect);
    }

    #[test]
    fn rejects_inverted_rt_range() {
        let config = ParticipantConfig {
            go_rt_min_ms: 900,
            go_rt_max_ms: 300,
            ..ParticipantConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
