//! Teleport / reachability validation.
//!
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. a stance on an agent kind without one,
//! 2. target outside the scene bounds,
//! 3. collision with scene geometry or another agent,
//! 4. vertical offset from the resting height beyond tolerance.
//!
//! Only a request that passes every check produces a new [`AgentState`].

use crate::error::ActionError;
use crate::scene::Scene;
use crate::types::{wrap_degrees, AgentState, EngineConfig, Vec3};

/// Placement request.  Absent fields keep the agent's current value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TeleportRequest {
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub z: Option<f32>,
    /// Yaw in degrees.
    pub rotation: Option<f32>,
    pub horizon: Option<f32>,
    pub standing: Option<bool>,
}

pub struct TeleportValidator<'a> {
    pub scene: &'a Scene,
    pub config: &'a EngineConfig,
    pub supports_standing: bool,
    /// Positions of every other agent.
    pub others: &'a [Vec3],
}

impl TeleportValidator<'_> {
    pub fn resting_height(&self) -> f32 {
        self.scene.interior.min.y + self.config.agent_center_height
    }

    pub fn validate(
        &self,
        current: &AgentState,
        req: &TeleportRequest,
    ) -> Result<AgentState, ActionError> {
        if req.standing.is_some() && !self.supports_standing {
            return Err(ActionError::failed(
                "this agent kind cannot stand or crouch; omit standing",
            ));
        }

        let target = Vec3::new(
            req.x.unwrap_or(current.position.x),
            req.y.unwrap_or(current.position.y),
            req.z.unwrap_or(current.position.z),
        );
        if !target.is_finite() || !self.scene.in_bounds(target, self.config.agent_radius) {
            return Err(ActionError::failed(format!(
                "teleport target {target} is outside the scene bounds"
            )));
        }

        if self.blocked(target) {
            return Err(ActionError::failed(format!(
                "teleport target {target} collides with the scene or another agent"
            )));
        }

        let rest = self.resting_height();
        if let Some(y) = req.y {
            let delta = (y - rest).abs();
            if delta > self.config.vertical_tolerance {
                return Err(ActionError::failed(format!(
                    "teleport target y={y:.4} is {delta:.4} from the resting height {rest:.4} \
                     (tolerance {})",
                    self.config.vertical_tolerance
                )));
            }
        }

        let horizon = req.horizon.unwrap_or(current.camera_horizon);
        if !horizon.is_finite() {
            return Err(ActionError::failed("horizon must be a finite number"));
        }
        let yaw = req.rotation.map(wrap_degrees).unwrap_or(current.rotation.y);

        Ok(AgentState {
            position: Vec3::new(target.x, rest, target.z),
            rotation: Vec3::new(current.rotation.x, yaw, current.rotation.z),
            camera_horizon: horizon,
            is_standing: if self.supports_standing {
                req.standing.or(current.is_standing).or(Some(true))
            } else {
                None
            },
        })
    }

    /// Whether an agent body at `p` hits geometry or another agent.
    pub fn blocked(&self, p: Vec3) -> bool {
        let r = self.config.agent_radius;
        self.scene
            .collides(p, r, self.config.agent_center_height * 2.0)
            || self
                .others
                .iter()
                .any(|o| o.horizontal_distance(p) < r * 2.0)
    }
}
