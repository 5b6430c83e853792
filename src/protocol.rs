//! Action / response wire protocol.
//!
//! This module owns **every message that crosses the transport boundary**
//! between a client and the engine it drives.
//!
//! ## Message shapes
//!
//! | Direction        | Shape                                                   |
//! |------------------|---------------------------------------------------------|
//! | client → engine  | `{ "action": name, "sequenceId": n, ...params }`        |
//! | engine → client  | metadata JSON + one combined frame buffer               |
//!
//! ## Design rules
//!
//! 1. Parameter names are unique within a request; duplicates are a
//!    construction-time error, never last-write-wins.
//! 2. Reserved names (see [`reserved`]) are owned by the protocol and cannot be
//!    used as action parameters.
//! 3. `sequenceId` only exists on the wire copy of a request; the caller's
//!    [`ActionRequest`] is never mutated.
//! 4. Metadata keys are camelCase.  `errorCode` is present only on failure.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ControllerError;
use crate::types::{AgentMode, AgentState, ObjectMetadata, ThirdPartyCamera};

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Action name unknown.
    InvalidAction,
    /// Action known, no signature satisfied by the supplied names.
    MissingArguments,
    /// Action known, signature resolution not unique.
    AmbiguousAction,
    /// Extra or malformed parameter on an otherwise resolved action.
    InvalidArgument,
    /// Resolved and invoked, but the simulation rejected it.
    ActionFailed,
}

impl ErrorCode {
    /// Dispatch-time failures: no simulation step occurred.
    pub fn is_dispatch_failure(self) -> bool {
        !matches!(self, ErrorCode::ActionFailed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidAction => "InvalidAction",
            ErrorCode::MissingArguments => "MissingArguments",
            ErrorCode::AmbiguousAction => "AmbiguousAction",
            ErrorCode::InvalidArgument => "InvalidArgument",
            ErrorCode::ActionFailed => "ActionFailed",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Channels
// ---------------------------------------------------------------------------

/// One image channel of a camera.  Colour is always rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Color,
    Depth,
    Instance,
    Semantic,
}

impl Channel {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Channel::Depth => 4,
            Channel::Color | Channel::Instance | Channel::Semantic => 3,
        }
    }
}

/// Optional channels enabled for a step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSet {
    #[serde(default)]
    pub depth: bool,
    #[serde(default)]
    pub instance: bool,
    #[serde(default)]
    pub semantic: bool,
}

impl ChannelSet {
    pub fn all() -> Self {
        Self {
            depth: true,
            instance: true,
            semantic: true,
        }
    }

    /// Channels in wire order: colour, depth, instance, semantic.
    pub fn channels(&self) -> Vec<Channel> {
        let mut out = vec![Channel::Color];
        if self.depth {
            out.push(Channel::Depth);
        }
        if self.instance {
            out.push(Channel::Instance);
        }
        if self.semantic {
            out.push(Channel::Semantic);
        }
        out
    }

    /// Bytes one camera contributes to the combined buffer.
    pub fn bytes_per_pixel(&self) -> usize {
        self.channels().iter().map(|c| c.bytes_per_pixel()).sum()
    }

    /// Apply per-step overrides on top of the session setting.
    pub fn with_overrides(self, o: &RenderOverrides) -> Self {
        Self {
            depth: o.depth.unwrap_or(self.depth),
            instance: o.instance.unwrap_or(self.instance),
            semantic: o.semantic.unwrap_or(self.semantic),
        }
    }
}

/// Per-step render flags carried as reserved request fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderOverrides {
    pub depth: Option<bool>,
    pub instance: Option<bool>,
    pub semantic: Option<bool>,
}

// ---------------------------------------------------------------------------
// Reserved fields and action names
// ---------------------------------------------------------------------------

/// Request fields owned by the protocol.  Stripped before dispatch.
pub mod reserved {
    pub const ACTION: &str = "action";
    pub const SEQUENCE_ID: &str = "sequenceId";
    pub const AGENT_ID: &str = "agentId";
    pub const TYPE_NAME: &str = "typeName";
    pub const RENDER_DEPTH: &str = "renderDepthImage";
    pub const RENDER_INSTANCE: &str = "renderInstanceSegmentation";
    pub const RENDER_SEMANTIC: &str = "renderSemanticSegmentation";
    /// Deprecated spelling of [`RENDER_INSTANCE`].
    pub const RENDER_OBJECT_IMAGE: &str = "renderObjectImage";
    /// Deprecated spelling of [`RENDER_SEMANTIC`].
    pub const RENDER_CLASS_IMAGE: &str = "renderClassImage";

    pub const ALL: &[&str] = &[
        ACTION,
        SEQUENCE_ID,
        AGENT_ID,
        TYPE_NAME,
        RENDER_DEPTH,
        RENDER_INSTANCE,
        RENDER_SEMANTIC,
        RENDER_OBJECT_IMAGE,
        RENDER_CLASS_IMAGE,
    ];

    /// Fields a caller may never set through [`super::ActionRequest::with`].
    pub const INTERNAL: &[&str] = &[ACTION, SEQUENCE_ID, TYPE_NAME];

    pub fn is_reserved(name: &str) -> bool {
        ALL.contains(&name)
    }
}

/// Action names understood by the reference engine, as constants.
pub mod actions {
    pub const INITIALIZE: &str = "Initialize";
    pub const PASS: &str = "Pass";
    pub const ECHO_RETURN: &str = "EchoReturn";

    pub const MOVE_AHEAD: &str = "MoveAhead";
    pub const MOVE_BACK: &str = "MoveBack";
    pub const MOVE_LEFT: &str = "MoveLeft";
    pub const MOVE_RIGHT: &str = "MoveRight";
    pub const ROTATE_LEFT: &str = "RotateLeft";
    pub const ROTATE_RIGHT: &str = "RotateRight";
    pub const LOOK_UP: &str = "LookUp";
    pub const LOOK_DOWN: &str = "LookDown";
    pub const ROTATE_LOOK: &str = "RotateLook";
    pub const TELEPORT: &str = "Teleport";
    pub const TELEPORT_FULL: &str = "TeleportFull";

    pub const OPEN_OBJECT: &str = "OpenObject";
    pub const CLOSE_OBJECT: &str = "CloseObject";
    pub const TOGGLE_OBJECT_ON: &str = "ToggleObjectOn";
    pub const TOGGLE_OBJECT_OFF: &str = "ToggleObjectOff";

    pub const CHANGE_RESOLUTION: &str = "ChangeResolution";
    pub const ADD_THIRD_PARTY_CAMERA: &str = "AddThirdPartyCamera";
    pub const UPDATE_THIRD_PARTY_CAMERA: &str = "UpdateThirdPartyCamera";
    pub const SET_OBJECT_FILTER: &str = "SetObjectFilter";
    pub const RESET_OBJECT_FILTER: &str = "ResetObjectFilter";

    pub const GET_REACHABLE_POSITIONS: &str = "GetReachablePositions";
    pub const GET_INTERACTABLE_POSES: &str = "GetInteractablePoses";
    pub const GET_SCENE_BOUNDS: &str = "GetSceneBounds";
    pub const GET_SCENES_IN_BUILD: &str = "GetScenesInBuild";
    pub const GET_OBJECT_IN_FRAME: &str = "GetObjectInFrame";
    pub const GET_COORDINATE_FROM_RAYCAST: &str = "GetCoordinateFromRaycast";

    pub const FIND_AMBIGUOUS_ACTIONS: &str = "FindAmbiguousActions";
    pub const FIND_ACTION_CONFLICTS: &str = "FindActionConflicts";
}

/// Transient top-level metadata keys injected by specific actions.
pub mod transient {
    pub const REACHABLE_POSITIONS: &str = "reachablePositions";
}

// ---------------------------------------------------------------------------
// Action request  (client → engine)
// ---------------------------------------------------------------------------

/// A named action plus its ordered, uniquely-named parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub action: String,
    params: Map<String, Value>,
    /// Handler class to resolve against instead of the agent's own.
    pub target_class: Option<String>,
}

impl ActionRequest {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params: Map::new(),
            target_class: None,
        }
    }

    /// Add a parameter.  Fails on duplicates and on internal reserved names.
    pub fn with(
        mut self,
        name: impl Into<String>,
        value: impl Serialize,
    ) -> Result<Self, ControllerError> {
        let name = name.into();
        if reserved::INTERNAL.contains(&name.as_str()) {
            return Err(ControllerError::ReservedParameter(name));
        }
        if self.params.contains_key(&name) {
            return Err(ControllerError::DuplicateParameter(name));
        }
        let value = serde_json::to_value(value).map_err(|source| ControllerError::InvalidValue {
            name: name.clone(),
            source,
        })?;
        self.params.insert(name, value);
        Ok(self)
    }

    pub fn target_class(mut self, class: impl Into<String>) -> Self {
        self.target_class = Some(class.into());
        self
    }

    /// Build a request from a `{ "action": ..., ...params }` object.
    pub fn from_value(value: Value) -> Result<Self, ControllerError> {
        let Value::Object(mut map) = value else {
            return Err(ControllerError::ReservedParameter(reserved::ACTION.into()));
        };
        let action = match map.remove(reserved::ACTION) {
            Some(Value::String(s)) => s,
            _ => return Err(ControllerError::ReservedParameter(reserved::ACTION.into())),
        };
        if map.contains_key(reserved::SEQUENCE_ID) {
            return Err(ControllerError::ReservedParameter(reserved::SEQUENCE_ID.into()));
        }
        let target_class = match map.remove(reserved::TYPE_NAME) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };
        Ok(Self {
            action,
            params: map,
            target_class,
        })
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// The wire copy of this request, stamped with `sequence_id`.
    pub fn to_wire(&self, sequence_id: u64) -> Map<String, Value> {
        let mut wire = Map::with_capacity(self.params.len() + 3);
        wire.insert(reserved::ACTION.into(), Value::String(self.action.clone()));
        wire.insert(reserved::SEQUENCE_ID.into(), Value::from(sequence_id));
        if let Some(class) = &self.target_class {
            wire.insert(reserved::TYPE_NAME.into(), Value::String(class.clone()));
        }
        for (k, v) in &self.params {
            wire.insert(k.clone(), v.clone());
        }
        wire
    }
}

/// Session set-up options sent as an `Initialize` action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitializeOptions {
    pub scene: Option<String>,
    pub agent_count: Option<usize>,
    pub agent_mode: Option<AgentMode>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub render_depth_image: Option<bool>,
    pub render_instance_segmentation: Option<bool>,
    pub render_semantic_segmentation: Option<bool>,
    pub fast_action_emit: Option<bool>,
    pub grid_size: Option<f32>,
    pub visibility_distance: Option<f32>,
    pub vertical_tolerance: Option<f32>,
}

impl InitializeOptions {
    pub fn scene(scene: impl Into<String>) -> Self {
        Self {
            scene: Some(scene.into()),
            ..Default::default()
        }
    }

    pub fn to_request(&self) -> Result<ActionRequest, ControllerError> {
        let mut req = ActionRequest::new(actions::INITIALIZE);
        macro_rules! put {
            ($field:expr, $name:expr) => {
                if let Some(v) = &$field {
                    req = req.with($name, v)?;
                }
            };
        }
        put!(self.scene, "scene");
        put!(self.agent_count, "agentCount");
        put!(self.agent_mode, "agentMode");
        put!(self.width, "width");
        put!(self.height, "height");
        put!(self.render_depth_image, reserved::RENDER_DEPTH);
        put!(self.render_instance_segmentation, reserved::RENDER_INSTANCE);
        put!(self.render_semantic_segmentation, reserved::RENDER_SEMANTIC);
        put!(self.fast_action_emit, "fastActionEmit");
        put!(self.grid_size, "gridSize");
        put!(self.visibility_distance, "visibilityDistance");
        put!(self.vertical_tolerance, "verticalTolerance");
        Ok(req)
    }
}

// ---------------------------------------------------------------------------
// Response envelope  (engine → client)
// ---------------------------------------------------------------------------

/// Segmentation colour assigned to an object id or object type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColorAssignment {
    pub name: String,
    pub color: [u8; 3],
}

/// Metadata of one step.
///
/// `objects` is carried out of band by the codec so that an unchanged list can
/// be reused instead of re-serialised (see [`crate::cache`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub last_action: String,
    pub last_action_success: bool,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default)]
    pub action_return: Value,
    pub sequence_id: u64,
    pub scene_name: String,
    pub agent_id: usize,
    pub agent: AgentState,
    pub agents: Vec<AgentState>,
    pub third_party_cameras: Vec<ThirdPartyCamera>,
    pub screen_width: u32,
    pub screen_height: u32,
    pub render_channels: ChannelSet,
    pub colors: Vec<ColorAssignment>,
    #[serde(default)]
    pub fast_emit: bool,
    #[serde(skip)]
    pub objects: Arc<Vec<ObjectMetadata>>,
    /// Transient keys such as `reachablePositions`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Metadata {
    pub fn object(&self, object_id: &str) -> Option<&ObjectMetadata> {
        self.objects.iter().find(|o| o.object_id == object_id)
    }
}

/// One complete step result as produced by the engine or decoded by a client.
#[derive(Debug, Clone)]
pub struct StepResponse {
    pub metadata: Metadata,
    pub frame_buffer: bytes::Bytes,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_parameters_are_rejected() {
        let err = ActionRequest::new("MoveAhead")
            .with("moveMagnitude", 0.5)
            .unwrap()
            .with("moveMagnitude", 0.25)
            .unwrap_err();
        assert!(matches!(err, ControllerError::DuplicateParameter(n) if n == "moveMagnitude"));
    }

    #[test]
    fn sequence_id_is_reserved() {
        let err = ActionRequest::new("Pass").with("sequenceId", 3).unwrap_err();
        assert!(matches!(err, ControllerError::ReservedParameter(_)));
    }

    #[test]
    fn wire_copy_does_not_touch_request() {
        let req = ActionRequest::new("RotateLook")
            .with("rotation", 0)
            .unwrap()
            .with("horizon", 0)
            .unwrap();
        let wire = req.to_wire(7);
        assert_eq!(wire["sequenceId"], 7);
        assert_eq!(wire["action"], "RotateLook");
        assert!(req.param("sequenceId").is_none());
        // Parameter order survives.
        let keys: Vec<_> = wire.keys().cloned().collect();
        assert_eq!(keys, ["action", "sequenceId", "rotation", "horizon"]);
    }

    #[test]
    fn from_value_extracts_type_name() {
        let req = ActionRequest::from_value(serde_json::json!({
            "action": "FindAmbiguousActions",
            "typeName": "PhysicsAgent",
        }))
        .unwrap();
        assert_eq!(req.target_class.as_deref(), Some("PhysicsAgent"));
        assert!(req.params().is_empty());
    }

    #[test]
    fn channel_order_is_fixed() {
        let set = ChannelSet {
            depth: true,
            instance: false,
            semantic: true,
        };
        assert_eq!(
            set.channels(),
            vec![Channel::Color, Channel::Depth, Channel::Semantic]
        );
        assert_eq!(set.bytes_per_pixel(), 3 + 4 + 3);
    }

    #[test]
    fn error_code_is_absent_on_success() {
        let md = Metadata {
            last_action: "Pass".into(),
            last_action_success: true,
            error_message: String::new(),
            error_code: None,
            action_return: Value::Null,
            sequence_id: 1,
            scene_name: "Kitchen".into(),
            agent_id: 0,
            agent: AgentState {
                position: Default::default(),
                rotation: Default::default(),
                camera_horizon: 0.0,
                is_standing: Some(true),
            },
            agents: vec![],
            third_party_cameras: vec![],
            screen_width: 4,
            screen_height: 4,
            render_channels: ChannelSet::default(),
            colors: vec![],
            fast_emit: false,
            objects: Arc::default(),
            extra: Map::new(),
        };
        let v = serde_json::to_value(&md).unwrap();
        assert!(v.get("errorCode").is_none());
        assert!(v.get("objects").is_none());
        assert_eq!(v["lastActionSuccess"], true);
    }
}
