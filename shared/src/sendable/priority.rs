use std::time::Instant;

use crate::{config::PriorityConfig, types::Vec3};

use super::sendable::Sendable;

/// Where a sendable's object sits in the world, used for distance priority
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PositionInfo {
    pub position: Vec3,
    pub draw_distance: Option<f32>,
}

impl PositionInfo {
    pub fn new(position: Vec3, draw_distance: Option<f32>) -> Self {
        Self {
            position,
            draw_distance,
        }
    }
}

/// Strategy turning a sendable's position and a channel's witness into a
/// priority adjustment. Implementations need not be linear.
pub trait DistancePriority: Send + Sync {
    fn distance_factor(
        &self,
        position: &PositionInfo,
        witness: &Vec3,
        config: &PriorityConfig,
    ) -> f32;
}

/// Default strategy: no adjustment at the witness, approaching
/// `-distance_weight` as the distance grows past the draw distance.
#[derive(Clone, Copy, Debug, Default)]
pub struct DrawDistanceFalloff;

impl DistancePriority for DrawDistanceFalloff {
    fn distance_factor(
        &self,
        position: &PositionInfo,
        witness: &Vec3,
        config: &PriorityConfig,
    ) -> f32 {
        let reference = position
            .draw_distance
            .filter(|distance| *distance > 0.0)
            .unwrap_or(config.default_draw_distance)
            .max(f32::EPSILON);
        let ratio_squared = position.position.distance_squared(witness) / (reference * reference);
        -config.distance_weight * ratio_squared / (1.0 + ratio_squared)
    }
}

/// Everything a queue needs to rank its sendables for one drain
pub struct PriorityContext<'a> {
    pub now: Instant,
    pub witness: Option<Vec3>,
    pub config: &'a PriorityConfig,
    pub distance: &'a dyn DistancePriority,
}

impl<'a> PriorityContext<'a> {
    pub fn effective_priority(&self, sendable: &Sendable, base_priority: f32) -> f32 {
        let mut priority = base_priority + sendable.priority_delta();

        if let Some(pulses) = sendable.pulses() {
            priority += pulses.boost(self.now, self.config);
        }

        if let (Some(position), Some(witness)) = (sendable.position(), self.witness.as_ref()) {
            priority += self.distance.distance_factor(position, witness, self.config);
        }

        priority
    }
}
