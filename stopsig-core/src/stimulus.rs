use serde::{Deserialize, Serialize};

/// World-space position of a stimulus or a tap.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Position) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Moves toward `target` by at most `max_step`, never overshooting.
    pub fn move_towards(self, target: Position, max_step: f32) -> Position {
        let dist = self.distance(target);
        if dist <= max_step || dist == 0.0 {
            return target;
        }
        let t = max_step / dist;
        Position {
            x: self.x + (target.x - self.x) * t,
            y: self.y + (target.y - self.y) * t,
        }
    }
}

/// Coarse lifecycle of a stimulus. Resetting back to `Idle` happens within a
/// single call, so it never shows up here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Idle,
    Falling,
    Resolved,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_towards_does_not_overshoot() {
        let from = Position::new(0.0, 2.0);
        let to = Position::new(0.0, -2.0);
        let step = from.move_towards(to, 1.0);
        assert!((step.y - 1.0).abs() < 1e-6);
        assert_eq!(from.move_towards(to, 10.0), to);
    }
}
