use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use stopsig_core::{Position, Side};

/// Horizontal placement of one stimulus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lane {
    pub side: Side,
    pub x: f32,
}

/// Tunables of the trial engine. Durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub min_wait_ms: u64,
    pub max_wait_ms: u64,
    pub window_start_ms: u64,
    pub window_end_ms: u64,
    pub bottom_wait_ms: u64,
    pub reset_delay_ms: u64,
    pub inter_trial_pause_ms: u64,
    pub initial_ssd_ms: u64,
    pub ssd_step_ms: u64,
    pub fall_speed: f32,
    pub top_y: f32,
    pub bottom_y: f32,
    pub spin_deg_per_sec: f32,
    pub arrival_tolerance: f32,
    pub lanes: Vec<Lane>,
    pub zone_offset: f32,
    pub zone_radius: f32,
    pub slice_lifetime_ms: u64,
    pub feedback_duration_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_wait_ms: 500,
            max_wait_ms: 1500,
            window_start_ms: 500,
            window_end_ms: 800,
            bottom_wait_ms: 1000,
            reset_delay_ms: 1000,
            inter_trial_pause_ms: 500,
            initial_ssd_ms: 250,
            ssd_step_ms: 50,
            // 4 units in ~1.3 s
            fall_speed: 3.07,
            top_y: 2.0,
            bottom_y: -2.0,
            spin_deg_per_sec: 15.0,
            arrival_tolerance: 0.01,
            lanes: vec![
                Lane {
                    side: Side::Left,
                    x: -1.5,
                },
                Lane {
                    side: Side::Right,
                    x: 1.5,
                },
            ],
            zone_offset: 1.0,
            zone_radius: 0.8,
            slice_lifetime_ms: 1000,
            feedback_duration_ms: 2000,
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(EngineError::InvalidConfig(msg));
        if self.min_wait_ms > self.max_wait_ms {
            return invalid(format!(
                "min_wait_ms ({}) exceeds max_wait_ms ({})",
                self.min_wait_ms, self.max_wait_ms
            ));
        }
        if self.window_start_ms >= self.window_end_ms {
            return invalid(format!(
                "response window [{}, {}) is empty",
                self.window_start_ms, self.window_end_ms
            ));
        }
        if !(self.fall_speed > 0.0) {
            return invalid(format!("fall_speed must be positive, got {}", self.fall_speed));
        }
        if self.top_y <= self.bottom_y {
            return invalid("top_y must lie above bottom_y".to_string());
        }
        if self.arrival_tolerance.is_nan() || self.arrival_tolerance < 0.0 {
            return invalid(format!(
                "arrival_tolerance must be zero or positive, got {}",
                self.arrival_tolerance
            ));
        }
        let fall_ms = self.fall_duration_secs() * 1000.0;
        if self.window_start_ms as f32 >= fall_ms {
            return invalid(format!(
                "response window opens at {} ms but the fall ends after {fall_ms:.0} ms",
                self.window_start_ms
            ));
        }
        let mut seen = BTreeSet::new();
        for lane in &self.lanes {
            if !seen.insert(lane.side) {
                return invalid(format!("duplicate {} lane", lane.side));
            }
        }
        Ok(())
    }

    pub fn lane(&self, side: Side) -> Option<&Lane> {
        self.lanes.iter().find(|lane| lane.side == side)
    }

    pub fn top_of(&self, lane: &Lane) -> Position {
        Position::new(lane.x, self.top_y)
    }

    pub fn bottom_of(&self, lane: &Lane) -> Position {
        Position::new(lane.x, self.bottom_y)
    }

    /// Seconds a full fall takes at `fall_speed`.
    pub fn fall_duration_secs(&self) -> f32 {
        (self.top_y - self.bottom_y) / self.fall_speed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert!((config.fall_duration_secs() - 1.303).abs() < 0.01);
    }

    #[test]
    fn rejects_inverted_wait_range() {
        let config = EngineConfig {
            min_wait_ms: 900,
            max_wait_ms: 100,
            ..EngineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_empty_window_and_duplicate_lanes() {
        let empty_window = EngineConfig {
            window_start_ms: 800,
            window_end_ms: 800,
            ..EngineConfig::default()
        };
        assert!(empty_window.validate().is_err());

        let mut dup = EngineConfig::default();
        dup.lanes[1].side = Side::Left;
        assert!(dup.validate().is_err());
    }

    #[test]
    fn rejects_negative_or_nan_arrival_tolerance() {
        for tolerance in [-0.1, f32::NAN] {
            let config = EngineConfig {
                arrival_tolerance: tolerance,
                ..EngineConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(EngineError::InvalidConfig(_))
            ));
        }
        let exact = EngineConfig {
            arrival_tolerance: 0.0,
            ..EngineConfig::default()
        };
        exact.validate().unwrap();
    }

    #[test]
    fn rejects_a_window_that_opens_after_the_fall() {
        // 4 units at 100 units/s is a 40 ms fall.
        let fast = EngineConfig {
            fall_speed: 100.0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            fast.validate(),
            Err(EngineError::InvalidConfig(_))
        ));

        let slow_enough = EngineConfig {
            fall_speed: 6.0,
            window_start_ms: 300,
            window_end_ms: 600,
            ..EngineConfig::default()
        };
        slow_enough.validate().unwrap();
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "ssd_step_ms": 25, "initial_ssd_ms": 100 }"#).unwrap();
        assert_eq!(config.ssd_step_ms, 25);
        assert_eq!(config.initial_ssd_ms, 100);
        assert_eq!(config.window_end_ms, 800);
        assert_eq!(config.lanes.len(), 2);
    }

    #[test]
    fn loads_and_validates_a_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("engine.json");
        std::fs::write(&good, r#"{ "reset_delay_ms": 750 }"#).unwrap();
        assert_eq!(EngineConfig::from_json_file(&good).unwrap().reset_delay_ms, 750);

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, r#"{ "min_wait_ms": 2000 }"#).unwrap();
        assert!(matches!(
            EngineConfig::from_json_file(&bad),
            Err(EngineError::InvalidConfig(_))
        ));
        assert!(matches!(
            EngineConfig::from_json_file(dir.path().join("absent.json")),
            Err(EngineError::Io(_))
        ));
    }
}
