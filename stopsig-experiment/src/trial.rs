use serde::{Deserialize, Serialize};
use stopsig_core::{Outcome, Resolution, Side, Trial, TrialKind};

/// What happened on one trial, as written to the results file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialRecord {
    pub trial_number: usize,
    pub kind: TrialKind,
    pub side: Side,
    pub outcome: Outcome,
    pub responded: bool,
    pub reaction_time_ns: Option<u64>,
    pub stop_signal_delay_ms: Option<u64>,
    pub stop_signal_shown: bool,
    pub timestamp_ns: u64,
}

impl TrialRecord {
    pub fn new(trial: &Trial, resolution: &Resolution) -> Self {
        Self {
            trial_number: trial.index,
            kind: trial.kind,
            side: resolution.side,
            outcome: resolution.outcome,
            responded: resolution.responded(),
            reaction_time_ns: resolution.reaction_ns,
            stop_signal_delay_ms: resolution.ssd_ms,
            stop_signal_shown: resolution.stop_signal_shown,
            timestamp_ns: resolution.resolved_at,
        }
    }

    pub fn reaction_time_ms(&self) -> Option<f64> {
        self.reaction_time_ns.map(|ns| ns as f64 / 1_000_000.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub trials: usize,
    pub go_trials: usize,
    pub go_correct: usize,
    pub go_misses: usize,
    pub stop_trials: usize,
    pub stop_successes: usize,
    /// Mean reaction time of correct go responses.
    pub mean_go_rt_ms: Option<f64>,
    pub stop_success_rate: Option<f64>,
    pub final_ssd_ms: u64,
}

impl RunSummary {
    pub fn from_records(records: &[TrialRecord], final_ssd_ms: u64) -> Self {
        let mut summary = RunSummary {
            trials: records.len(),
            final_ssd_ms,
            ..Default::default()
        };
        let mut rt_total = 0.0;
        let mut rt_count = 0usize;

        for record in records {
            if record.kind.is_stop() {
                summary.stop_trials += 1;
                if record.outcome.is_correct() {
                    summary.stop_successes += 1;
                }
                continue;
            }
            summary.go_trials += 1;
            if !record.responded {
                summary.go_misses += 1;
            }
            if record.outcome.is_correct() {
                summary.go_correct += 1;
                if let Some(rt) = record.reaction_time_ms() {
                    rt_total += rt;
                    rt_count += 1;
                }
            }
        }

        summary.mean_go_rt_ms = (rt_count > 0).then(|| rt_total / rt_count as f64);
        summary.stop_success_rate = (summary.stop_trials > 0)
            .then(|| summary.stop_successes as f64 / summary.stop_trials as f64);
        summary
    }

    pub fn go_accuracy(&self) -> Option<f64> {
        (self.go_trials > 0).then(|| self.go_correct as f64 / self.go_trials as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(kind: TrialKind, outcome: Outcome, rt_ms: Option<u64>) -> TrialRecord {
        let side = kind.stop_side().unwrap_or(Side::Left);
        let resolution = Resolution {
            side,
            stop_trial: kind.is_stop(),
            outcome,
            reaction_ns: rt_ms.map(|ms| ms * 1_000_000),
            ssd_ms: kind.is_stop().then_some(250),
            stop_signal_shown: kind.is_stop(),
            resolved_at: 0,
        };
        TrialRecord::new(&Trial::new(1, kind, side), &resolution)
    }

    #[test]
    fn summary_counts_each_category() {
        let records = vec![
            record(TrialKind::Go, Outcome::Correct, Some(600)),
            record(TrialKind::Go, Outcome::Correct, Some(700)),
            record(TrialKind::Go, Outcome::Incorrect, None),
            record(TrialKind::StopLeft, Outcome::Correct, None),
            record(TrialKind::StopRight, Outcome::Incorrect, Some(650)),
        ];
        let summary = RunSummary::from_records(&records, 300);

        assert_eq!(summary.trials, 5);
        assert_eq!(summary.go_trials, 3);
        assert_eq!(summary.go_correct, 2);
        assert_eq!(summary.go_misses, 1);
        assert_eq!(summary.stop_trials, 2);
        assert_eq!(summary.stop_successes, 1);
        assert_eq!(summary.mean_go_rt_ms, Some(650.0));
        assert_eq!(summary.stop_success_rate, Some(0.5));
        assert_eq!(summary.final_ssd_ms, 300);
        assert_eq!(summary.go_accuracy(), Some(2.0 / 3.0));
    }

    #[test]
    fn empty_run_has_no_rates() {
        let summary = RunSummary::from_records(&[], 250);
        assert_eq!(summary.mean_go_rt_ms, None);
        assert_eq!(summary.stop_success_rate, None);
        assert_eq!(summary.go_accuracy(), None);
    }

    #[test]
    fn record_serializes_with_camel_case_fields() {
        let json =
            serde_json::to_value(record(TrialKind::StopLeft, Outcome::Correct, None)).unwrap();
        assert_eq!(json["trialNumber"], 1);
        assert_eq!(json["kind"], "stop_left");
        assert_eq!(json["stopSignalDelayMs"], 250);
        assert!(json["reactionTimeNs"].is_null());
    }
}
