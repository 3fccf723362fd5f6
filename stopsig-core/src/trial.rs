use serde::{Deserialize, Serialize};
use std::fmt;

/// Lane a stimulus falls in. Each lane owns exactly one stimulus, so the side
/// doubles as the stimulus identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::Left, Side::Right];

    /// Rotation sign while falling: left spins counter-clockwise.
    pub fn spin_sign(self) -> f32 {
        match self {
            Side::Left => 1.0,
            Side::Right => -1.0,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Left => "left",
            Side::Right => "right",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialKind {
    Go,
    StopLeft,
    StopRight,
}

impl TrialKind {
    pub fn is_stop(self) -> bool {
        !matches!(self, TrialKind::Go)
    }

    /// The lane a stop trial is bound to; go trials may target either lane.
    pub fn stop_side(self) -> Option<Side> {
        match self {
            TrialKind::Go => None,
            TrialKind::StopLeft => Some(Side::Left),
            TrialKind::StopRight => Some(Side::Right),
        }
    }

    pub fn stop_for(side: Side) -> Self {
        match side {
            Side::Left => TrialKind::StopLeft,
            Side::Right => TrialKind::StopRight,
        }
    }
}

/// One entry of a trial plan. `index` is the 1-based trial number and is the
/// trial's identity within its plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trial {
    #[serde(rename = "trialNumber")]
    pub index: usize,
    #[serde(rename = "trialType")]
    pub kind: TrialKind,
    pub target_side: Side,
}

impl Trial {
    pub fn new(index: usize, kind: TrialKind, target_side: Side) -> Self {
        Self {
            index,
            kind,
            target_side,
        }
    }

    pub fn is_stop(&self) -> bool {
        self.kind.is_stop()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Correct,
    Incorrect,
}

impl Outcome {
    pub fn from_correct(correct: bool) -> Self {
        if correct {
            Outcome::Correct
        } else {
            Outcome::Incorrect
        }
    }

    pub fn is_correct(self) -> bool {
        matches!(self, Outcome::Correct)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trial_uses_plan_file_field_names() {
        let trial = Trial::new(3, TrialKind::StopRight, Side::Right);
        let json = serde_json::to_value(trial).unwrap();
        assert_eq!(json["trialNumber"], 3);
        assert_eq!(json["trialType"], "stop_right");
        assert_eq!(json["targetSide"], "right");
    }

    #[test]
    fn stop_kinds_are_bound_to_their_side() {
        assert_eq!(TrialKind::Go.stop_side(), None);
        assert_eq!(TrialKind::StopLeft.stop_side(), Some(Side::Left));
        assert_eq!(TrialKind::stop_for(Side::Right), TrialKind::StopRight);
        assert!(!TrialKind::Go.is_stop());
        assert!(TrialKind::StopLeft.is_stop());
    }
}
