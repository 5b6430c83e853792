//! Action handlers of the reference engine and the registry that declares
//! them.
//!
//! ## Handler classes
//!
//! ```text
//! BaseAgent
//!   ├── PhysicsAgent      (default mode; stance-aware)
//!   │     └── StochasticAgent
//!   ├── LocobotAgent
//!   └── DroneAgent
//! ```
//!
//! Handlers run only after dispatch has checked parameter names and types,
//! and validate everything before touching the session so a failed action
//! leaves no partial state behind.

use serde_json::{json, Map, Value};

use crate::dispatch::{whole_number, ActionRegistry, ParamSpec, ParamType};
use crate::engine::{
    check_frame_budget, color_assignments, spawn_agents, HandlerFn, Invocation, Session,
};
use crate::error::{ActionError, RegistryError};
use crate::poses::{interactable_poses, visible_from, PoseQuery};
use crate::protocol::{actions, ChannelSet, transient};
use crate::render::FAR_PLANE;
use crate::scene::Scene;
use crate::teleport::{TeleportRequest, TeleportValidator};
use crate::types::{wrap_degrees, AgentMode, PartialVec3, ThirdPartyCamera, Vec3, MIN_GRID_SIZE};

pub const BASE_AGENT: &str = "BaseAgent";
pub const PHYSICS_AGENT: &str = "PhysicsAgent";
pub const STOCHASTIC_AGENT: &str = "StochasticAgent";
pub const LOCOBOT_AGENT: &str = "LocobotAgent";
pub const DRONE_AGENT: &str = "DroneAgent";

/// Horizon limits for look actions, degrees (negative looks up).
pub const MIN_HORIZON: f32 = -30.0;
pub const MAX_HORIZON: f32 = 60.0;

/// Self-test actions covering every dispatch outcome.  Clients use them to
/// check their error mapping against a live engine.
pub mod probes {
    pub const NOOP: &str = "ProbeNoop";
    pub const DEFAULTS: &str = "ProbeDefaults";
    pub const BUNDLE: &str = "ProbeBundle";
    pub const MIXED: &str = "ProbeMixed";
    pub const SAME_CLASS: &str = "ProbeSameClass";
    pub const CONFLICT: &str = "ProbeConflict";
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub fn registry() -> Result<ActionRegistry<HandlerFn>, RegistryError> {
    let req = ParamSpec::required;
    let opt = ParamSpec::optional;

    let teleport_xyz = [
        opt("x", ParamType::Float),
        opt("y", ParamType::Float),
        opt("z", ParamType::Float),
        opt("rotation", ParamType::Rotation),
        opt("horizon", ParamType::Float),
        opt("standing", ParamType::Bool),
    ];
    let teleport_position = [
        req("position", ParamType::PartialVec3),
        opt("rotation", ParamType::Rotation),
        opt("horizon", ParamType::Float),
        opt("standing", ParamType::Bool),
    ];
    let full_xyz = |standing: ParamSpec| {
        [
            req("x", ParamType::Float),
            req("y", ParamType::Float),
            req("z", ParamType::Float),
            req("rotation", ParamType::Rotation),
            req("horizon", ParamType::Float),
            standing,
        ]
    };
    let full_position = |standing: ParamSpec| {
        [
            req("position", ParamType::Vec3),
            req("rotation", ParamType::Rotation),
            req("horizon", ParamType::Float),
            standing,
        ]
    };
    let object = [req("objectId", ParamType::String), opt("forceAction", ParamType::Bool)];
    let magnitude = [opt("moveMagnitude", ParamType::Float)];
    let degrees = [opt("degrees", ParamType::Float)];

    ActionRegistry::<HandlerFn>::builder()
        .class(BASE_AGENT, None)
        .class(PHYSICS_AGENT, Some(BASE_AGENT))
        .class(STOCHASTIC_AGENT, Some(PHYSICS_AGENT))
        .class(LOCOBOT_AGENT, Some(BASE_AGENT))
        .class(DRONE_AGENT, Some(BASE_AGENT))
        // Session
        .aggregate(
            BASE_AGENT,
            actions::INITIALIZE,
            &[
                opt("scene", ParamType::String),
                opt("agentCount", ParamType::Int),
                opt("agentMode", ParamType::String),
                opt("width", ParamType::Int),
                opt("height", ParamType::Int),
                opt("fastActionEmit", ParamType::Bool),
                opt("gridSize", ParamType::Float),
                opt("visibilityDistance", ParamType::Float),
                opt("verticalTolerance", ParamType::Float),
            ],
            true,
            initialize,
        )
        .overload(BASE_AGENT, actions::PASS, &[], false, pass)
        .overload(BASE_AGENT, actions::ECHO_RETURN, &[req("rvalue", ParamType::Any)], false, echo_return)
        // Movement
        .overload(BASE_AGENT, actions::MOVE_AHEAD, &magnitude, true, move_ahead)
        .overload(BASE_AGENT, actions::MOVE_BACK, &magnitude, true, move_back)
        .overload(BASE_AGENT, actions::MOVE_LEFT, &magnitude, true, move_left)
        .overload(BASE_AGENT, actions::MOVE_RIGHT, &magnitude, true, move_right)
        .overload(BASE_AGENT, actions::ROTATE_LEFT, &degrees, true, rotate_left)
        .overload(BASE_AGENT, actions::ROTATE_RIGHT, &degrees, true, rotate_right)
        .overload(BASE_AGENT, actions::LOOK_UP, &degrees, true, look_up)
        .overload(BASE_AGENT, actions::LOOK_DOWN, &degrees, true, look_down)
        .overload(
            BASE_AGENT,
            actions::ROTATE_LOOK,
            &[req("rotation", ParamType::Rotation), req("horizon", ParamType::Float)],
            true,
            rotate_look,
        )
        .overload(BASE_AGENT, actions::TELEPORT, &teleport_xyz, true, teleport)
        .overload(BASE_AGENT, actions::TELEPORT, &teleport_position, true, teleport)
        .overload(
            BASE_AGENT,
            actions::TELEPORT_FULL,
            &full_xyz(opt("standing", ParamType::Bool)),
            true,
            teleport,
        )
        .overload(
            BASE_AGENT,
            actions::TELEPORT_FULL,
            &full_position(opt("standing", ParamType::Bool)),
            true,
            teleport,
        )
        .overload(
            PHYSICS_AGENT,
            actions::TELEPORT_FULL,
            &full_xyz(req("standing", ParamType::Bool)),
            true,
            teleport,
        )
        .overload(
            PHYSICS_AGENT,
            actions::TELEPORT_FULL,
            &full_position(req("standing", ParamType::Bool)),
            true,
            teleport,
        )
        .overload(PHYSICS_AGENT, "Crouch", &[], true, crouch)
        .overload(PHYSICS_AGENT, "Stand", &[], true, stand)
        // Interaction
        .aggregate(
            BASE_AGENT,
            actions::OPEN_OBJECT,
            &[
                req("objectId", ParamType::String),
                opt("openness", ParamType::Float),
                opt("moveMagnitude", ParamType::Float),
                opt("forceAction", ParamType::Bool),
            ],
            true,
            open_object,
        )
        .aggregate(BASE_AGENT, actions::CLOSE_OBJECT, &object, true, close_object)
        .overload(BASE_AGENT, actions::TOGGLE_OBJECT_ON, &object, true, toggle_on)
        .overload(BASE_AGENT, actions::TOGGLE_OBJECT_OFF, &object, true, toggle_off)
        // Output control
        .overload(
            BASE_AGENT,
            actions::CHANGE_RESOLUTION,
            &[req("x", ParamType::Int), req("y", ParamType::Int)],
            true,
            change_resolution,
        )
        .overload(
            BASE_AGENT,
            actions::ADD_THIRD_PARTY_CAMERA,
            &[
                req("position", ParamType::Vec3),
                req("rotation", ParamType::Vec3),
                opt("fieldOfView", ParamType::Float),
                opt("orthographic", ParamType::Bool),
                opt("orthographicSize", ParamType::Float),
            ],
            false,
            add_camera,
        )
        .overload(
            BASE_AGENT,
            actions::UPDATE_THIRD_PARTY_CAMERA,
            &[
                req("thirdPartyCameraId", ParamType::Int),
                opt("position", ParamType::PartialVec3),
                opt("rotation", ParamType::PartialVec3),
                opt("fieldOfView", ParamType::Float),
                opt("orthographic", ParamType::Bool),
                opt("orthographicSize", ParamType::Float),
            ],
            false,
            update_camera,
        )
        .overload(
            BASE_AGENT,
            actions::SET_OBJECT_FILTER,
            &[req("objectIds", ParamType::StringList)],
            true,
            set_filter,
        )
        .overload(BASE_AGENT, actions::RESET_OBJECT_FILTER, &[], true, reset_filter)
        // Queries
        .overload(
            BASE_AGENT,
            actions::GET_REACHABLE_POSITIONS,
            &[],
            false,
            reachable_positions,
        )
        .overload(
            BASE_AGENT,
            actions::GET_INTERACTABLE_POSES,
            &[
                req("objectId", ParamType::String),
                opt("horizons", ParamType::FloatList),
                opt("rotations", ParamType::FloatList),
                opt("standings", ParamType::BoolList),
                opt("positions", ParamType::Any),
                opt("maxPoses", ParamType::Int),
                opt("maxDistance", ParamType::Float),
            ],
            false,
            interactable,
        )
        .overload(BASE_AGENT, actions::GET_SCENE_BOUNDS, &[], false, scene_bounds)
        .overload(BASE_AGENT, actions::GET_SCENES_IN_BUILD, &[], false, scenes_in_build)
        .overload(
            BASE_AGENT,
            actions::GET_OBJECT_IN_FRAME,
            &[req("x", ParamType::Float), req("y", ParamType::Float)],
            false,
            object_in_frame,
        )
        .overload(
            BASE_AGENT,
            actions::GET_COORDINATE_FROM_RAYCAST,
            &[req("x", ParamType::Float), req("y", ParamType::Float)],
            false,
            coordinate_from_raycast,
        )
        .overload(BASE_AGENT, actions::FIND_AMBIGUOUS_ACTIONS, &[], false, find_ambiguous)
        .overload(BASE_AGENT, actions::FIND_ACTION_CONFLICTS, &[], false, find_conflicts)
        // Probes
        .overload(BASE_AGENT, probes::NOOP, &[], false, probe_noop)
        .overload(BASE_AGENT, probes::NOOP, &[req("first", ParamType::Bool)], false, probe_noop)
        .overload(
            BASE_AGENT,
            probes::NOOP,
            &[req("first", ParamType::Bool), req("second", ParamType::Bool)],
            false,
            probe_noop,
        )
        .overload(
            BASE_AGENT,
            probes::DEFAULTS,
            &[req("value", ParamType::Bool), opt("label", ParamType::String)],
            false,
            probe_defaults,
        )
        .aggregate(BASE_AGENT, probes::BUNDLE, &[opt("objectId", ParamType::String)], false, probe_bundle)
        .aggregate(BASE_AGENT, probes::MIXED, &[opt("objectId", ParamType::String)], false, probe_bundle)
        .overload(PHYSICS_AGENT, probes::MIXED, &[req("first", ParamType::Bool)], false, probe_noop)
        .overload(BASE_AGENT, probes::SAME_CLASS, &[opt("count", ParamType::Int)], false, probe_noop)
        .overload(BASE_AGENT, probes::SAME_CLASS, &[opt("label", ParamType::String)], false, probe_noop)
        .overload(
            BASE_AGENT,
            probes::CONFLICT,
            &[req("scale", ParamType::Float), req("offset", ParamType::Float)],
            false,
            probe_noop,
        )
        .overload(
            PHYSICS_AGENT,
            probes::CONFLICT,
            &[req("scale", ParamType::Float), req("offset", ParamType::String)],
            false,
            probe_noop,
        )
        .build()
}

// ---------------------------------------------------------------------------
// Parameter access
// ---------------------------------------------------------------------------

fn f32_param(p: &Map<String, Value>, name: &str) -> Option<f32> {
    p.get(name).and_then(Value::as_f64).map(|v| v as f32)
}

fn uint_param(p: &Map<String, Value>, name: &str) -> Option<u64> {
    p.get(name).and_then(whole_number)
}

fn bool_param(p: &Map<String, Value>, name: &str) -> Option<bool> {
    p.get(name).and_then(Value::as_bool)
}

fn str_param<'a>(p: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    p.get(name).and_then(Value::as_str)
}

fn partial_vec(p: &Map<String, Value>, name: &str) -> Option<PartialVec3> {
    p.get(name)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

fn vec_param(p: &Map<String, Value>, name: &str) -> Option<Vec3> {
    p.get(name)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

/// Yaw from a number or from the `y` component of a rotation.
fn yaw_param(p: &Map<String, Value>, name: &str) -> Option<f32> {
    match p.get(name)? {
        Value::Object(m) => m.get("y").and_then(Value::as_f64).map(|v| v as f32),
        v => v.as_f64().map(|v| v as f32),
    }
}

fn list_param<T: serde::de::DeserializeOwned>(p: &Map<String, Value>, name: &str) -> Option<Vec<T>> {
    p.get(name)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

fn object_id<'a>(inv: &'a Invocation<'_>) -> Result<&'a str, ActionError> {
    str_param(inv.params, "objectId").ok_or_else(|| ActionError::invalid_argument(inv.action, "objectId"))
}

fn agent_supports_standing(s: &Session) -> bool {
    s.mode.supports_standing()
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

fn initialize(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    let p = inv.params;
    let scene_name = str_param(p, "scene")
        .unwrap_or(s.scene.name.as_str())
        .to_string();
    let scene = Scene::load(&scene_name)
        .ok_or_else(|| ActionError::failed(format!("unknown scene {scene_name}")))?;

    let mode = match str_param(p, "agentMode") {
        None => AgentMode::Default,
        Some(m) => AgentMode::parse(m)
            .ok_or_else(|| ActionError::failed(format!("unknown agent mode {m}")))?,
    };
    let count = uint_param(p, "agentCount").unwrap_or(1) as usize;
    if count == 0 || count > scene.spawns.len() {
        return Err(ActionError::failed(format!(
            "agentCount must be between 1 and {} for {}",
            scene.spawns.len(),
            scene.name
        )));
    }

    let mut config = s.defaults.clone();
    config.scene = scene_name;
    if let Some(g) = f32_param(p, "gridSize") {
        if !g.is_finite() || g < MIN_GRID_SIZE {
            return Err(ActionError::failed(format!(
                "gridSize must be at least {MIN_GRID_SIZE}"
            )));
        }
        config.grid_size = g;
    }
    if let Some(d) = f32_param(p, "visibilityDistance") {
        if d <= 0.0 {
            return Err(ActionError::failed("visibilityDistance must be positive"));
        }
        config.visibility_distance = d;
    }
    if let Some(t) = f32_param(p, "verticalTolerance") {
        if t < 0.0 {
            return Err(ActionError::failed("verticalTolerance must not be negative"));
        }
        config.vertical_tolerance = t;
    }
    let width = resolution(p.get("width"), config.width, config.max_resolution)?;
    let height = resolution(p.get("height"), config.height, config.max_resolution)?;
    check_frame_budget(&config, width, height, count, 0)?;
    let fast_emit = bool_param(p, "fastActionEmit").unwrap_or(config.fast_action_emit);

    s.agents = spawn_agents(&scene, &config, mode, count);
    s.colors = color_assignments(&scene);
    s.scene = scene;
    s.mode = mode;
    s.cameras.clear();
    s.filter.reset();
    s.cache.set_enabled(fast_emit);
    s.width = width;
    s.height = height;
    s.channels = ChannelSet::default();
    s.config = config;

    Ok(json!({
        "sceneName": s.scene.name,
        "agentCount": s.agents.len(),
        "handlerClass": s.mode.handler_class(),
    }))
}

fn resolution(v: Option<&Value>, default: u32, max: u32) -> Result<u32, ActionError> {
    let Some(v) = v else { return Ok(default) };
    match whole_number(v) {
        Some(n) if n >= 1 && n <= max as u64 => Ok(n as u32),
        _ => Err(ActionError::failed(format!(
            "resolution {v} must lie between 1 and {max}"
        ))),
    }
}

fn pass(_: &mut Session, _: &Invocation<'_>) -> Result<Value, ActionError> {
    Ok(Value::Null)
}

fn echo_return(_: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    Ok(inv.params.get("rvalue").cloned().unwrap_or(Value::Null))
}

// ---------------------------------------------------------------------------
// Movement
// ---------------------------------------------------------------------------

/// Step length used when sweeping a move for collisions.
const SWEEP_STEP: f32 = 0.05;

fn translate(s: &mut Session, inv: &Invocation<'_>, right: f32, ahead: f32) -> Result<Value, ActionError> {
    let magnitude = f32_param(inv.params, "moveMagnitude").unwrap_or(s.config.grid_size);
    if !magnitude.is_finite() || magnitude < 0.0 {
        return Err(ActionError::failed("moveMagnitude must be a non-negative number"));
    }
    let agent = s.agents[inv.agent_id].clone();
    let yaw = agent.rotation.y.to_radians();
    let forward = Vec3::new(yaw.sin(), 0.0, yaw.cos());
    let side = Vec3::new(yaw.cos(), 0.0, -yaw.sin());
    let delta = forward.scale(ahead * magnitude).add(side.scale(right * magnitude));
    let target = agent.position.add(delta);

    let others = s.other_agents(inv.agent_id);
    let validator = TeleportValidator {
        scene: &s.scene,
        config: &s.config,
        supports_standing: agent_supports_standing(s),
        others: &others,
    };
    let steps = (magnitude / SWEEP_STEP).ceil().max(1.0) as usize;
    for i in 1..=steps {
        let p = agent.position.add(delta.scale(i as f32 / steps as f32));
        if !s.scene.in_bounds(p, s.config.agent_radius) {
            return Err(ActionError::failed(format!("moving to {target} leaves the scene")));
        }
        if validator.blocked(p) {
            return Err(ActionError::failed(format!("path to {target} is blocked")));
        }
    }
    s.agents[inv.agent_id].position = Vec3::new(target.x, agent.position.y, target.z);
    Ok(Value::Null)
}

fn move_ahead(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    translate(s, inv, 0.0, 1.0)
}

fn move_back(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    translate(s, inv, 0.0, -1.0)
}

fn move_left(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    translate(s, inv, -1.0, 0.0)
}

fn move_right(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    translate(s, inv, 1.0, 0.0)
}

fn rotate(s: &mut Session, inv: &Invocation<'_>, sign: f32) -> Result<Value, ActionError> {
    let degrees = f32_param(inv.params, "degrees").unwrap_or(90.0);
    let agent = &mut s.agents[inv.agent_id];
    agent.rotation.y = wrap_degrees(agent.rotation.y + sign * degrees);
    Ok(Value::Null)
}

fn rotate_left(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    rotate(s, inv, -1.0)
}

fn rotate_right(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    rotate(s, inv, 1.0)
}

fn look(s: &mut Session, inv: &Invocation<'_>, sign: f32) -> Result<Value, ActionError> {
    let degrees = f32_param(inv.params, "degrees").unwrap_or(30.0);
    let agent = &mut s.agents[inv.agent_id];
    agent.camera_horizon = (agent.camera_horizon + sign * degrees).clamp(MIN_HORIZON, MAX_HORIZON);
    Ok(Value::Null)
}

fn look_up(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    look(s, inv, -1.0)
}

fn look_down(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    look(s, inv, 1.0)
}

fn rotate_look(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    let yaw = yaw_param(inv.params, "rotation")
        .ok_or_else(|| ActionError::invalid_argument(inv.action, "rotation"))?;
    let horizon = f32_param(inv.params, "horizon").unwrap_or(0.0);
    let agent = &mut s.agents[inv.agent_id];
    agent.rotation.y = wrap_degrees(yaw);
    agent.camera_horizon = horizon.clamp(MIN_HORIZON, MAX_HORIZON);
    Ok(Value::Null)
}

fn teleport(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    let p = inv.params;
    let position = partial_vec(p, "position").unwrap_or_default();
    let req = TeleportRequest {
        x: f32_param(p, "x").or(position.x),
        y: f32_param(p, "y").or(position.y),
        z: f32_param(p, "z").or(position.z),
        rotation: yaw_param(p, "rotation"),
        horizon: f32_param(p, "horizon"),
        standing: bool_param(p, "standing"),
    };
    let others = s.other_agents(inv.agent_id);
    let next = TeleportValidator {
        scene: &s.scene,
        config: &s.config,
        supports_standing: agent_supports_standing(s),
        others: &others,
    }
    .validate(&s.agents[inv.agent_id], &req)?;
    s.agents[inv.agent_id] = next;
    Ok(Value::Null)
}

fn set_stance(s: &mut Session, inv: &Invocation<'_>, standing: bool) -> Result<Value, ActionError> {
    if !agent_supports_standing(s) {
        return Err(ActionError::failed("this agent kind cannot stand or crouch"));
    }
    s.agents[inv.agent_id].is_standing = Some(standing);
    Ok(Value::Null)
}

fn crouch(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    set_stance(s, inv, false)
}

fn stand(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    set_stance(s, inv, true)
}

// ---------------------------------------------------------------------------
// Interaction
// ---------------------------------------------------------------------------

/// Look up an object and, unless forced, require that the agent sees it.
fn interactable_object(s: &Session, inv: &Invocation<'_>) -> Result<String, ActionError> {
    let id = object_id(inv)?;
    let obj = s
        .scene
        .object(id)
        .ok_or_else(|| ActionError::failed(format!("object {id} not found")))?;
    if !bool_param(inv.params, "forceAction").unwrap_or(false) {
        let visible = s
            .agent_view(inv.agent_id)
            .is_some_and(|view| visible_from(&s.scene, &view, obj, s.aspect(), &s.config));
        if !visible {
            return Err(ActionError::failed(format!("{id} is not visible")));
        }
    }
    Ok(id.to_string())
}

fn set_openness(s: &mut Session, inv: &Invocation<'_>, openness: f32) -> Result<Value, ActionError> {
    let id = interactable_object(s, inv)?;
    let obj = s
        .scene
        .object_mut(&id)
        .ok_or_else(|| ActionError::failed(format!("object {id} not found")))?;
    if !obj.openable() {
        return Err(ActionError::failed(format!("{id} is not openable")));
    }
    obj.openness = openness;
    Ok(Value::Null)
}

fn open_object(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    let openness = match (
        f32_param(inv.params, "openness"),
        f32_param(inv.params, "moveMagnitude"),
    ) {
        (Some(o), _) => o,
        // Legacy alias: a magnitude of 0 means fully open.
        (None, Some(m)) if m == 0.0 => 1.0,
        (None, Some(m)) => m,
        (None, None) => 1.0,
    };
    if !(0.0..=1.0).contains(&openness) {
        return Err(ActionError::failed(format!(
            "openness {openness} must lie in [0, 1]"
        )));
    }
    set_openness(s, inv, openness)
}

fn close_object(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    set_openness(s, inv, 0.0)
}

fn toggle(s: &mut Session, inv: &Invocation<'_>, on: bool) -> Result<Value, ActionError> {
    let id = interactable_object(s, inv)?;
    let obj = s
        .scene
        .object_mut(&id)
        .ok_or_else(|| ActionError::failed(format!("object {id} not found")))?;
    if !obj.toggleable {
        return Err(ActionError::failed(format!("{id} is not toggleable")));
    }
    obj.toggled = on;
    Ok(Value::Null)
}

fn toggle_on(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    toggle(s, inv, true)
}

fn toggle_off(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    toggle(s, inv, false)
}

// ---------------------------------------------------------------------------
// Output control
// ---------------------------------------------------------------------------

fn change_resolution(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    let max = s.config.max_resolution;
    let width = resolution(inv.params.get("x"), s.width, max)?;
    let height = resolution(inv.params.get("y"), s.height, max)?;
    check_frame_budget(&s.config, width, height, s.agents.len(), s.cameras.len())?;
    s.width = width;
    s.height = height;
    Ok(json!({ "width": width, "height": height }))
}

fn check_fov(fov: f32) -> Result<f32, ActionError> {
    if fov > 0.0 && fov < 180.0 {
        Ok(fov)
    } else {
        Err(ActionError::failed(format!(
            "fieldOfView {fov} must lie in (0, 180)"
        )))
    }
}

fn check_ortho_size(size: Option<f32>) -> Result<Option<f32>, ActionError> {
    match size {
        Some(v) if v <= 0.0 || !v.is_finite() => Err(ActionError::failed(format!(
            "orthographicSize {v} must be positive"
        ))),
        other => Ok(other),
    }
}

fn add_camera(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    let p = inv.params;
    let position = vec_param(p, "position")
        .ok_or_else(|| ActionError::invalid_argument(inv.action, "position"))?;
    let rotation = vec_param(p, "rotation")
        .ok_or_else(|| ActionError::invalid_argument(inv.action, "rotation"))?;
    let field_of_view = check_fov(f32_param(p, "fieldOfView").unwrap_or(90.0))?;
    let orthographic_size = check_ortho_size(f32_param(p, "orthographicSize"))?;
    let orthographic = bool_param(p, "orthographic").unwrap_or(false);
    if orthographic && orthographic_size.is_none() {
        return Err(ActionError::failed(
            "an orthographic camera needs orthographicSize",
        ));
    }

    check_frame_budget(&s.config, s.width, s.height, s.agents.len(), s.cameras.len() + 1)?;
    let id = s.cameras.len();
    s.cameras.push(ThirdPartyCamera {
        third_party_camera_id: id,
        position,
        rotation,
        field_of_view,
        orthographic,
        orthographic_size,
    });
    Ok(json!(id))
}

fn update_camera(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    let p = inv.params;
    let id = uint_param(p, "thirdPartyCameraId")
        .map(|v| v as usize)
        .ok_or_else(|| ActionError::invalid_argument(inv.action, "thirdPartyCameraId"))?;
    let current = s
        .cameras
        .get(id)
        .ok_or_else(|| ActionError::failed(format!("no third-party camera {id}")))?;

    let mut next = current.clone();
    if let Some(pos) = partial_vec(p, "position") {
        next.position = pos.apply(next.position);
    }
    if let Some(rot) = partial_vec(p, "rotation") {
        next.rotation = rot.apply(next.rotation);
    }
    if let Some(fov) = f32_param(p, "fieldOfView") {
        next.field_of_view = check_fov(fov)?;
    }
    if let Some(size) = check_ortho_size(f32_param(p, "orthographicSize"))? {
        next.orthographic_size = Some(size);
    }
    if let Some(ortho) = bool_param(p, "orthographic") {
        next.orthographic = ortho;
    }
    if next.orthographic && next.orthographic_size.is_none() {
        return Err(ActionError::failed(
            "an orthographic camera needs orthographicSize",
        ));
    }
    s.cameras[id] = next;
    Ok(Value::Null)
}

fn set_filter(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    let ids: Vec<String> = list_param(inv.params, "objectIds")
        .ok_or_else(|| ActionError::invalid_argument(inv.action, "objectIds"))?;
    s.filter.set(ids);
    Ok(Value::Null)
}

fn reset_filter(s: &mut Session, _: &Invocation<'_>) -> Result<Value, ActionError> {
    s.filter.reset();
    Ok(Value::Null)
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

fn reachable_positions(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    let rest = s.resting_height();
    let others = s.other_agents(inv.agent_id);
    let r = s.config.agent_radius;
    let positions: Vec<Vec3> = s
        .scene
        .reachable_positions(s.config.grid_size, r, s.config.agent_center_height * 2.0)
        .into_iter()
        .map(|(x, z)| Vec3::new(x, rest, z))
        .filter(|p| others.iter().all(|o| o.horizontal_distance(*p) >= r * 2.0))
        .collect();
    let value = serde_json::to_value(&positions)
        .map_err(|e| ActionError::failed(e.to_string()))?;
    s.transient
        .insert(transient::REACHABLE_POSITIONS.into(), value.clone());
    Ok(value)
}

fn interactable(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    let p = inv.params;
    let id = object_id(inv)?;
    let target = s
        .scene
        .object(id)
        .ok_or_else(|| ActionError::failed(format!("object {id} not found")))?;

    let positions = match p.get("positions") {
        None => None,
        Some(v) => {
            let points: Vec<PartialVec3> = serde_json::from_value(v.clone())
                .map_err(|_| ActionError::invalid_argument(inv.action, "positions"))?;
            let mut out = Vec::with_capacity(points.len());
            for pt in points {
                match (pt.x, pt.z) {
                    (Some(x), Some(z)) => out.push((x, z)),
                    _ => return Err(ActionError::invalid_argument(inv.action, "positions")),
                }
            }
            Some(out)
        }
    };
    if let Some(h) = list_param::<f32>(p, "horizons") {
        if h.iter().any(|v| !(MIN_HORIZON..=MAX_HORIZON).contains(v)) {
            return Err(ActionError::failed(format!(
                "horizons must lie in [{MIN_HORIZON}, {MAX_HORIZON}]"
            )));
        }
    }
    let standings = list_param::<bool>(p, "standings");
    if standings.is_some() && !agent_supports_standing(s) {
        return Err(ActionError::failed("this agent kind cannot stand or crouch"));
    }
    let query = PoseQuery {
        horizons: list_param(p, "horizons"),
        rotations: list_param(p, "rotations"),
        standings,
        positions,
        max_poses: uint_param(p, "maxPoses").map(|v| v as usize),
        max_distance: f32_param(p, "maxDistance"),
    };

    let poses = interactable_poses(
        &s.scene,
        target,
        &query,
        &s.config,
        agent_supports_standing(s),
        &s.other_agents(inv.agent_id),
        s.aspect(),
    );
    serde_json::to_value(&poses).map_err(|e| ActionError::failed(e.to_string()))
}

fn scene_bounds(s: &mut Session, _: &Invocation<'_>) -> Result<Value, ActionError> {
    let b = s.scene.bounds();
    let mut corners = Vec::with_capacity(8);
    for x in [b.min.x, b.max.x] {
        for y in [b.min.y, b.max.y] {
            for z in [b.min.z, b.max.z] {
                corners.push([x, y, z]);
            }
        }
    }
    Ok(json!({
        "center": b.center(),
        "size": b.size(),
        "cornerPoints": corners,
    }))
}

fn scenes_in_build(_: &mut Session, _: &Invocation<'_>) -> Result<Value, ActionError> {
    Ok(json!(Scene::names()))
}

/// Cast the acting agent's camera ray through viewport point `(x, y)`.
/// Returns the hit point and the id of the surface or object it struck.
fn viewport_hit(s: &Session, inv: &Invocation<'_>) -> Result<(Vec3, String), ActionError> {
    let x = f32_param(inv.params, "x").ok_or_else(|| ActionError::invalid_argument(inv.action, "x"))?;
    let y = f32_param(inv.params, "y").ok_or_else(|| ActionError::invalid_argument(inv.action, "y"))?;
    if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
        return Err(ActionError::failed(format!(
            "viewport point ({x}, {y}) must lie within [0, 1]"
        )));
    }
    let view = s
        .agent_view(inv.agent_id)
        .ok_or_else(|| ActionError::failed(format!("no agent {}", inv.agent_id)))?;
    let (origin, dir) = view.viewport_ray(x, y, s.aspect());
    let hit = s
        .scene
        .raycast(origin, dir, FAR_PLANE, |_| false)
        .ok_or_else(|| ActionError::failed(format!("nothing visible at ({x}, {y})")))?;
    Ok((origin.add(dir.scale(hit.t)), hit.id.to_string()))
}

fn object_in_frame(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    let (_, id) = viewport_hit(s, inv)?;
    if s.scene.object(&id).is_none() {
        return Err(ActionError::failed(format!("{id} is not an object")));
    }
    Ok(json!(id))
}

fn coordinate_from_raycast(s: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    let (point, _) = viewport_hit(s, inv)?;
    Ok(json!(point))
}

fn find_ambiguous(_: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    Ok(json!(inv.registry.find_ambiguous(inv.class)))
}

fn find_conflicts(_: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    Ok(json!(inv.registry.find_conflicts(inv.class)))
}

// ---------------------------------------------------------------------------
// Probes
// ---------------------------------------------------------------------------

/// Returns the supplied parameter names, or `emptyargs`.
fn probe_noop(_: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    if inv.params.is_empty() {
        return Ok(json!("emptyargs"));
    }
    let names: Vec<&str> = inv.params.keys().map(String::as_str).collect();
    Ok(json!(names.join(" ")))
}

fn probe_defaults(_: &mut Session, inv: &Invocation<'_>) -> Result<Value, ActionError> {
    let label = str_param(inv.params, "label").unwrap_or("default");
    Ok(json!({ "value": bool_param(inv.params, "value"), "label": label }))
}

fn probe_bundle(_: &mut Session, _: &Invocation<'_>) -> Result<Value, ActionError> {
    Ok(json!("bundle"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds() {
        let reg = registry().unwrap();
        assert!(reg.has_class(STOCHASTIC_AGENT));
        assert_eq!(
            reg.lineage(STOCHASTIC_AGENT),
            vec![STOCHASTIC_AGENT, PHYSICS_AGENT, BASE_AGENT]
        );
    }

    #[test]
    fn ambiguity_depends_on_class() {
        let reg = registry().unwrap();
        assert_eq!(
            reg.find_ambiguous(PHYSICS_AGENT),
            vec![probes::MIXED.to_string(), probes::SAME_CLASS.to_string()]
        );
        assert_eq!(
            reg.find_ambiguous(LOCOBOT_AGENT),
            vec![probes::SAME_CLASS.to_string()]
        );
    }

    #[test]
    fn conflicts_follow_lineage() {
        let reg = registry().unwrap();
        for class in [PHYSICS_AGENT, STOCHASTIC_AGENT] {
            let conflicts = reg.find_conflicts(class);
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[probes::CONFLICT], vec!["offset".to_string()]);
        }
        assert!(reg.find_conflicts(DRONE_AGENT).is_empty());
    }
}
