//! Trial plans: generation, validation, and the JSON plan file.
//!
//! A plan is built once before the run and is read-only afterwards. Loading
//! falls back to a single generation attempt; if that also fails the caller
//! gets an error and must not start the run.

use crate::error::{EngineError, Result};
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use stopsig_core::{Side, Trial, TrialKind};
use time::OffsetDateTime;
use time::macros::format_description;

/// Parameters for generating a plan when none can be loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub total_trials: usize,
    pub stop_trial_percentage: f64,
    pub experiment_name: String,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            total_trials: 32,
            stop_trial_percentage: 0.375,
            experiment_name: "StopSignalTask".to_string(),
        }
    }
}

/// How many trials of each kind a plan of `total` trials should contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split {
    pub go: usize,
    pub stop_left: usize,
    pub stop_right: usize,
}

impl Split {
    pub fn stop(&self) -> usize {
        self.stop_left + self.stop_right
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlanSummary {
    pub go_left: usize,
    pub go_right: usize,
    pub stop_left: usize,
    pub stop_right: usize,
}

impl PlanSummary {
    pub fn go(&self) -> usize {
        self.go_left + self.go_right
    }

    pub fn stop(&self) -> usize {
        self.stop_left + self.stop_right
    }

    pub fn left(&self) -> usize {
        self.go_left + self.stop_left
    }

    pub fn right(&self) -> usize {
        self.go_right + self.stop_right
    }

    pub fn matches(&self, split: Split) -> bool {
        self.go() == split.go
            && self.stop_left == split.stop_left
            && self.stop_right == split.stop_right
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialPlan {
    trials: Vec<Trial>,
    total_trials: usize,
    stop_trial_percentage: f64,
    #[serde(default)]
    experiment_name: String,
    #[serde(default)]
    created_date: String,
}

impl TrialPlan {
    /// Wraps an explicit trial list. Indices are taken as given.
    pub fn new(trials: Vec<Trial>, experiment_name: impl Into<String>) -> Self {
        let stop = trials.iter().filter(|t| t.is_stop()).count();
        let total = trials.len();
        Self {
            stop_trial_percentage: if total == 0 {
                0.0
            } else {
                stop as f64 / total as f64
            },
            total_trials: total,
            trials,
            experiment_name: experiment_name.into(),
            created_date: timestamp_now(),
        }
    }

    pub fn expected_split(total: usize, stop_percentage: f64) -> Split {
        let stop = ((total as f64 * stop_percentage).round_ties_even() as usize).min(total);
        let stop_left = stop / 2;
        Split {
            go: total - stop,
            stop_left,
            stop_right: stop - stop_left,
        }
    }

    /// Builds a balanced, shuffled plan. Go trials alternate sides before the
    /// shuffle; trial numbers are reassigned `1..=N` afterwards.
    pub fn generate<R: Rng + ?Sized>(settings: &GenerationSettings, rng: &mut R) -> Result<Self> {
        let pct = settings.stop_trial_percentage;
        if settings.total_trials == 0 {
            return Err(EngineError::PlanInvalid(
                "cannot generate an empty plan".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&pct) {
            return Err(EngineError::PlanInvalid(format!(
                "stop trial percentage {pct} is outside [0, 1]"
            )));
        }

        let split = Self::expected_split(settings.total_trials, pct);
        tracing::info!(
            go = split.go,
            stop_left = split.stop_left,
            stop_right = split.stop_right,
            "generating trial plan"
        );

        let mut trials = Vec::with_capacity(settings.total_trials);
        for i in 0..split.go {
            let side = if i % 2 == 0 { Side::Left } else { Side::Right };
            trials.push(Trial::new(0, TrialKind::Go, side));
        }
        trials.extend((0..split.stop_left).map(|_| Trial::new(0, TrialKind::StopLeft, Side::Left)));
        trials.extend(
            (0..split.stop_right).map(|_| Trial::new(0, TrialKind::StopRight, Side::Right)),
        );

        trials.shuffle(rng);
        for (i, trial) in trials.iter_mut().enumerate() {
            trial.index = i + 1;
        }

        Ok(Self {
            trials,
            total_trials: settings.total_trials,
            stop_trial_percentage: pct,
            experiment_name: settings.experiment_name.clone(),
            created_date: timestamp_now(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(EngineError::PlanInvalid(msg));
        if self.trials.is_empty() {
            return invalid("plan has no trials".to_string());
        }
        if self.total_trials != self.trials.len() {
            return invalid(format!(
                "totalTrials is {} but the plan lists {} trials",
                self.total_trials,
                self.trials.len()
            ));
        }
        for (i, trial) in self.trials.iter().enumerate() {
            if trial.index != i + 1 {
                return invalid(format!(
                    "trial at position {} is numbered {}; numbers must run 1..={}",
                    i + 1,
                    trial.index,
                    self.trials.len()
                ));
            }
            if let Some(side) = trial.kind.stop_side() {
                if side != trial.target_side {
                    return invalid(format!(
                        "trial {} is {:?} but targets the {} side",
                        trial.index, trial.kind, trial.target_side
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for trial in &self.trials {
            match (trial.kind, trial.target_side) {
                (TrialKind::Go, Side::Left) => summary.go_left += 1,
                (TrialKind::Go, Side::Right) => summary.go_right += 1,
                (TrialKind::StopLeft, _) => summary.stop_left += 1,
                (TrialKind::StopRight, _) => summary.stop_right += 1,
            }
        }
        summary
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn get(&self, position: usize) -> Option<&Trial> {
        self.trials.get(position)
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    pub fn stop_trial_percentage(&self) -> f64 {
        self.stop_trial_percentage
    }

    pub fn experiment_name(&self) -> &str {
        &self.experiment_name
    }

    pub fn created_date(&self) -> &str {
        &self.created_date
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn timestamp_now() -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    OffsetDateTime::now_utc()
        .format(&format)
        .unwrap_or_default()
}

/// Where plans are loaded from and saved to.
pub trait PlanStore {
    fn load(&self) -> Result<TrialPlan>;
    fn persist(&self, plan: &TrialPlan) -> Result<()>;
}

/// Plan stored as a pretty-printed JSON file.
#[derive(Debug, Clone)]
pub struct JsonPlanFile {
    path: PathBuf,
}

impl JsonPlanFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PlanStore for JsonPlanFile {
    fn load(&self) -> Result<TrialPlan> {
        if !self.path.exists() {
            return Err(EngineError::PlanNotFound {
                path: self.path.clone(),
            });
        }
        let raw = std::fs::read_to_string(&self.path)?;
        TrialPlan::from_json(&raw)
    }

    fn persist(&self, plan: &TrialPlan) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        std::fs::write(&self.path, plan.to_json()?)?;
        tracing::info!(path = %self.path.display(), trials = plan.len(), "trial plan saved");
        Ok(())
    }
}

/// Loads a valid plan from `store`, or generates one from `fallback`.
///
/// A generated plan is persisted on a best-effort basis. Without a fallback,
/// or if generation fails too, the error is returned and the run must halt.
pub fn resolve_plan<S, R>(
    store: &S,
    fallback: Option<&GenerationSettings>,
    rng: &mut R,
) -> Result<TrialPlan>
where
    S: PlanStore + ?Sized,
    R: Rng + ?Sized,
{
    let loaded = store.load().and_then(|plan| {
        plan.validate()?;
        Ok(plan)
    });
    let err = match loaded {
        Ok(plan) => {
            tracing::info!(trials = plan.len(), name = plan.experiment_name(), "trial plan loaded");
            return Ok(plan);
        }
        Err(err) => err,
    };

    let Some(settings) = fallback else {
        tracing::error!(error = %err, "trial plan unavailable and fallback generation is disabled");
        return Err(err);
    };
    tracing::warn!(error = %err, "trial plan unavailable, generating a new one");

    let plan = TrialPlan::generate(settings, rng).and_then(|plan| {
        plan.validate()?;
        Ok(plan)
    });
    match plan {
        Ok(plan) => {
            if let Err(err) = store.persist(&plan) {
                tracing::warn!(error = %err, "could not save generated trial plan");
            }
            Ok(plan)
        }
        Err(err) => {
            tracing::error!(error = %err, "fallback plan generation failed, refusing to start");
            Err(err)
        }
    }
}
