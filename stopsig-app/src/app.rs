use crate::participant::{ParticipantConfig, SimulatedParticipant};
use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use stopsig_core::Side;
use stopsig_experiment::{
    EngineConfig, GenerationSettings, JsonPlanFile, ResponseZones, RunSummary, TimedPresenter,
    TrialOrchestrator, TrialRecord, resolve_plan,
};
use stopsig_timing::{HighPrecisionTimer, Timer};

/// Everything the runner reads from its JSON config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub plan_path: PathBuf,
    /// Generate (and save) a plan when `plan_path` is missing or unusable.
    pub generate_if_missing: bool,
    pub generation: GenerationSettings,
    pub results_path: PathBuf,
    pub frame_hz: f64,
    /// Hard stop for the frame loop.
    pub max_run_secs: u64,
    pub seed: Option<u64>,
    pub participant: ParticipantConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            plan_path: PathBuf::from("trial_plan.json"),
            generate_if_missing: true,
            generation: GenerationSettings::default(),
            results_path: PathBuf::from("results/trials.json"),
            frame_hz: 60.0,
            max_run_secs: 600,
            seed: None,
            participant: ParticipantConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: Option<&str>) -> Result<Self> {
        let Some(path) = path else {
            tracing::info!("no config file given, using defaults");
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {path}"))?;
        let config: Self =
            serde_json::from_str(&raw).with_context(|| format!("failed to parse {path}"))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.frame_hz > 0.0,
            "frame_hz must be positive, got {}",
            self.frame_hz
        );
        self.engine.validate()?;
        self.participant.validate()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunResults<'a> {
    experiment_name: &'a str,
    summary: RunSummary,
    trials: &'a [TrialRecord],
}

fn write_results(path: &Path, results: &RunResults<'_>) -> Result<()> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn rng_for(seed: Option<u64>, stream: u64) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(stream)),
        None => StdRng::from_os_rng(),
    }
}

pub struct App {
    config: AppConfig,
    orchestrator: TrialOrchestrator<HighPrecisionTimer, StdRng, TimedPresenter>,
    zones: ResponseZones,
    participant: SimulatedParticipant,
}

impl App {
    pub fn new(config_path: Option<&str>) -> Result<Self> {
        let config = AppConfig::load(config_path)?;
        config.validate()?;

        let mut rng = rng_for(config.seed, 0);
        let store = JsonPlanFile::new(&config.plan_path);
        let fallback = config.generate_if_missing.then_some(&config.generation);
        let plan = resolve_plan(&store, fallback, &mut rng)
            .with_context(|| format!("no usable trial plan at {}", config.plan_path.display()))?;

        let summary = plan.summary();
        tracing::info!(
            name = plan.experiment_name(),
            created = plan.created_date(),
            trials = plan.len(),
            go_left = summary.go_left,
            go_right = summary.go_right,
            stop_left = summary.stop_left,
            stop_right = summary.stop_right,
            "trial plan ready"
        );

        let presenter = TimedPresenter::from_config(&config.engine);
        let zones = ResponseZones::from_config(&config.engine);
        let mut orchestrator = TrialOrchestrator::new(
            config.engine.clone(),
            HighPrecisionTimer::new(),
            rng,
            presenter,
        )?;
        anyhow::ensure!(orchestrator.load_plan(plan), "trial plan was rejected");

        let participant =
            SimulatedParticipant::new(config.participant.clone(), rng_for(config.seed, 1));

        Ok(Self {
            config,
            orchestrator,
            zones,
            participant,
        })
    }

    pub fn run(mut self) -> Result<()> {
        tracing::info!(
            platform = std::env::consts::OS,
            arch = std::env::consts::ARCH,
            frame_hz = self.config.frame_hz,
            "stop-signal task starting"
        );

        let frame = Duration::from_secs_f64(1.0 / self.config.frame_hz);
        let limit = Duration::from_secs(self.config.max_run_secs);
        let started = self.orchestrator.timer.now();

        anyhow::ensure!(self.orchestrator.begin(), "run did not start");
        while !self.orchestrator.phase().is_complete() {
            let frame_start = self.orchestrator.timer.now();
            self.step();

            let spent = self.orchestrator.timer.elapsed(frame_start);
            if let Some(rest) = frame.checked_sub(spent) {
                self.orchestrator.timer.sleep(rest);
            }
            let total = self.orchestrator.timer.elapsed(frame_start);
            self.orchestrator.timer.record_frame(total);

            if self.orchestrator.timer.elapsed(started) > limit {
                tracing::warn!(
                    index = self.orchestrator.current_index(),
                    "run exceeded max_run_secs, stopping early"
                );
                break;
            }
        }

        self.finish()
    }

    /// One frame: advance the engine, then let the participant react.
    fn step(&mut self) {
        self.orchestrator.update();

        let now = self.orchestrator.timer.now();
        let taps: Vec<Side> = Side::ALL
            .into_iter()
            .filter(|&side| {
                self.orchestrator
                    .stimulus(side)
                    .is_some_and(|stimulus| self.participant.poll(stimulus, now))
            })
            .collect();
        for side in taps {
            let Some(zone) = self.zones.zone(side) else {
                continue;
            };
            let at = zone.center;
            self.orchestrator.tap(at, &self.zones);
        }
    }

    fn finish(&self) -> Result<()> {
        let records = self.orchestrator.records();
        let summary = self.orchestrator.summary();
        let name = self
            .orchestrator
            .plan()
            .map(|plan| plan.experiment_name())
            .unwrap_or_default();
        write_results(
            &self.config.results_path,
            &RunResults {
                experiment_name: name,
                summary,
                trials: &records,
            },
        )?;

        tracing::info!(
            path = %self.config.results_path.display(),
            trials = summary.trials,
            go_accuracy = ?summary.go_accuracy(),
            mean_go_rt_ms = ?summary.mean_go_rt_ms,
            stop_success_rate = ?summary.stop_success_rate,
            final_ssd_ms = summary.final_ssd_ms,
            "results saved"
        );

        let stats = self.orchestrator.timer.calibration_stats();
        tracing::info!(
            avg_frame_ms = stats.average_frame_time_ns / 1_000_000.0,
            fps = stats.effective_fps,
            jitter_ms = stats.jitter_ns / 1_000_000.0,
            "frame timing"
        );
        Ok(())
    }
}
