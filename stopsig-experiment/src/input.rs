//! Response input contract: turning a raw tap into a target stimulus.

use crate::config::EngineConfig;
use stopsig_core::{Position, Side};

pub trait ResponseInput {
    /// The stimulus a tap at `at` responds to, if any.
    fn resolve(&self, at: Position) -> Option<Side>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResponseZone {
    pub side: Side,
    pub center: Position,
    pub radius: f32,
}

impl ResponseZone {
    pub fn contains(&self, at: Position) -> bool {
        self.center.distance(at) <= self.radius
    }
}

/// One circular tap target below each lane.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseZones {
    zones: Vec<ResponseZone>,
}

impl ResponseZones {
    pub fn new(zones: Vec<ResponseZone>) -> Self {
        Self { zones }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let zones = config
            .lanes
            .iter()
            .map(|lane| ResponseZone {
                side: lane.side,
                center: Position::new(lane.x, config.bottom_y - config.zone_offset),
                radius: config.zone_radius,
            })
            .collect();
        Self { zones }
    }

    pub fn zone(&self, side: Side) -> Option<&ResponseZone> {
        self.zones.iter().find(|zone| zone.side == side)
    }
}

impl ResponseInput for ResponseZones {
    fn resolve(&self, at: Position) -> Option<Side> {
        self.zones
            .iter()
            .find(|zone| zone.contains(at))
            .map(|zone| zone.side)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taps_resolve_to_the_zone_they_hit() {
        let zones = ResponseZones::from_config(&EngineConfig::default());
        assert_eq!(zones.resolve(Position::new(-1.5, -3.0)), Some(Side::Left));
        assert_eq!(zones.resolve(Position::new(1.2, -3.3)), Some(Side::Right));
        assert_eq!(zones.resolve(Position::new(0.0, -3.0)), None);
        assert_eq!(zones.resolve(Position::new(-1.5, 2.0)), None);
    }
}
