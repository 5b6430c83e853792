//! Core types shared across all modules.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Basic math
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, o: Vec3) -> Vec3 {
        Vec3::new(self.x + o.x, self.y + o.y, self.z + o.z)
    }

    pub fn sub(self, o: Vec3) -> Vec3 {
        Vec3::new(self.x - o.x, self.y - o.y, self.z - o.z)
    }

    pub fn scale(self, s: f32) -> Vec3 {
        Vec3::new(self.x * s, self.y * s, self.z * s)
    }

    pub fn dot(self, o: Vec3) -> f32 {
        self.x * o.x + self.y * o.y + self.z * o.z
    }

    pub fn cross(self, o: Vec3) -> Vec3 {
        Vec3::new(
            self.y * o.z - self.z * o.y,
            self.z * o.x - self.x * o.z,
            self.x * o.y - self.y * o.x,
        )
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn normalized(self) -> Vec3 {
        let len = self.length();
        if len <= f32::EPSILON {
            self
        } else {
            self.scale(1.0 / len)
        }
    }

    /// Distance in the horizontal (x/z) plane.
    pub fn horizontal_distance(self, o: Vec3) -> f32 {
        ((self.x - o.x).powi(2) + (self.z - o.z).powi(2)).sqrt()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl std::fmt::Display for Vec3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.3}, {:.3}, {:.3})", self.x, self.y, self.z)
    }
}

/// A vector where every component may be omitted.
///
/// Used by partial updates (`UpdateThirdPartyCamera`): only the components
/// present in the request overwrite the current value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct PartialVec3 {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f32>,
}

impl PartialVec3 {
    pub fn apply(&self, base: Vec3) -> Vec3 {
        Vec3::new(
            self.x.unwrap_or(base.x),
            self.y.unwrap_or(base.y),
            self.z.unwrap_or(base.z),
        )
    }
}

/// Normalise an angle in degrees into `[0, 360)`.
pub fn wrap_degrees(deg: f32) -> f32 {
    let wrapped = deg.rem_euclid(360.0);
    if (wrapped - 360.0).abs() < 1e-4 {
        0.0
    } else {
        wrapped
    }
}

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// Agent body kinds.  Each kind dispatches against its own handler class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    #[default]
    Default,
    Stochastic,
    Locobot,
    Drone,
}

impl AgentMode {
    /// Handler class the dispatcher resolves actions against for this kind.
    pub fn handler_class(self) -> &'static str {
        match self {
            AgentMode::Default => "PhysicsAgent",
            AgentMode::Stochastic => "StochasticAgent",
            AgentMode::Locobot => "LocobotAgent",
            AgentMode::Drone => "DroneAgent",
        }
    }

    pub fn supports_standing(self) -> bool {
        matches!(self, AgentMode::Default | AgentMode::Stochastic)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Some(AgentMode::Default),
            "stochastic" => Some(AgentMode::Stochastic),
            "locobot" | "bot" => Some(AgentMode::Locobot),
            "drone" => Some(AgentMode::Drone),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub position: Vec3,
    /// Euler rotation in degrees; only `y` is driven by the agent.
    pub rotation: Vec3,
    pub camera_horizon: f32,
    /// `None` when the agent kind cannot stand or crouch.
    pub is_standing: Option<bool>,
}

impl AgentState {
    pub fn yaw(&self) -> f32 {
        self.rotation.y
    }
}

// ---------------------------------------------------------------------------
// Third-party cameras
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ThirdPartyCamera {
    /// Stable index in creation order.
    pub third_party_camera_id: usize,
    pub position: Vec3,
    pub rotation: Vec3,
    pub field_of_view: f32,
    #[serde(default)]
    pub orthographic: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orthographic_size: Option<f32>,
}

// ---------------------------------------------------------------------------
// Poses
// ---------------------------------------------------------------------------

/// A candidate agent placement produced by the interactable pose search.
///
/// The field names match `TeleportFull` parameters so a pose can be replayed
/// directly as a teleport request.  `y` is omitted; the engine derives it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pose {
    pub x: f32,
    pub z: f32,
    /// Rotation about the vertical axis, degrees.
    pub rotation: f32,
    pub horizon: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standing: Option<bool>,
}

// ---------------------------------------------------------------------------
// Object metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Aabb {
    pub center: Vec3,
    pub size: Vec3,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMetadata {
    pub object_id: String,
    pub object_type: String,
    pub name: String,
    pub position: Vec3,
    pub rotation: Vec3,
    pub visible: bool,
    pub distance: f32,
    pub openable: bool,
    pub is_open: bool,
    pub openness: f32,
    pub toggleable: bool,
    pub is_toggled: bool,
    pub pickupable: bool,
    pub receptacle: bool,
    #[serde(default)]
    pub parent_receptacles: Vec<String>,
    pub axis_aligned_bounding_box: Aabb,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Finest reachable-position grid a session may use, metres.
pub const MIN_GRID_SIZE: f32 = 0.05;

/// Room left in a response payload for the metadata block.
pub const METADATA_HEADROOM: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Scene loaded when the engine starts.
    pub scene: String,
    /// Initial frame width in pixels.
    pub width: u32,
    /// Initial frame height in pixels.
    pub height: u32,
    /// Upper bound accepted by `ChangeResolution`.
    pub max_resolution: u32,
    /// Largest frame buffer a step may produce with every channel enabled.
    /// Layout changes that would exceed it are rejected.
    pub max_frame_bytes: usize,
    /// Spacing of the reachable-position grid in metres.
    pub grid_size: f32,
    /// Maximum distance at which an object counts as visible.
    pub visibility_distance: f32,
    /// Largest accepted difference between a requested y and the resting height.
    pub vertical_tolerance: f32,
    /// Slack subtracted from occlusion rays so a target's own surface never occludes it.
    pub occlusion_epsilon: f32,
    /// Agent body radius used for collision tests.
    pub agent_radius: f32,
    /// Height of the agent's centre above the floor.
    pub agent_center_height: f32,
    /// Camera offset above the agent centre when standing (or for agents without stance).
    pub standing_eye_offset: f32,
    /// Camera offset above the agent centre when crouching.
    pub crouching_eye_offset: f32,
    /// Vertical field of view of agent cameras, degrees.
    pub field_of_view: f32,
    /// Reuse the previous object list when nothing mutated it.
    pub fast_action_emit: bool,
    /// Horizons sampled by the interactable pose search when none are given.
    pub pose_horizons: Vec<f32>,
    /// Rotations sampled by the interactable pose search when none are given.
    pub pose_rotations: Vec<f32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scene: "Kitchen".into(),
            width: 300,
            height: 300,
            max_resolution: 4096,
            max_frame_bytes: crate::codec::DEFAULT_MAX_PAYLOAD - METADATA_HEADROOM,
            grid_size: 0.25,
            visibility_distance: 1.5,
            vertical_tolerance: 0.05,
            occlusion_epsilon: 1e-3,
            agent_radius: 0.2,
            agent_center_height: 0.900_998,
            standing_eye_offset: 0.675,
            crouching_eye_offset: 0.15,
            field_of_view: 90.0,
            fast_action_emit: true,
            pose_horizons: vec![-30.0, 0.0, 30.0, 60.0],
            pose_rotations: vec![0.0, 90.0, 180.0, 270.0],
        }
    }
}
