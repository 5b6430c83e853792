//! Reference engine: one session context, the handler registry, and the step
//! loop that turns an action into a response.
//!
//! ## Step
//!
//! 1. Strip reserved fields (`sequenceId`, `agentId`, `typeName`, render
//!    overrides) from the request.
//! 2. Resolve the action against the acting class.  A dispatch failure
//!    leaves the session untouched.
//! 3. Invoke the handler.  A resolved mutating action invalidates the
//!    fast-emit cache before the handler runs.
//! 4. Emit metadata (reusing the cached object list when allowed) and render
//!    every agent camera followed by every third-party camera.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info};
use serde_json::{Map, Value};

use crate::cache::FastEmitCache;
use crate::codec::{decode_action, encode_response};
use crate::dispatch::ActionRegistry;
use crate::error::{ActionError, CodecError, EngineError};
use crate::filter::ObjectFilter;
use crate::frames::{identity_color, FrameBufferBuilder, FrameLayout};
use crate::handlers;
use crate::poses::{eye_height, visible_from};
use crate::protocol::{
    actions, reserved, ActionRequest, ChannelSet, ColorAssignment, Metadata, RenderOverrides,
    StepResponse,
};
use crate::render::{render, CameraView};
use crate::scene::Scene;
use crate::types::{
    AgentMode, AgentState, EngineConfig, ObjectMetadata, ThirdPartyCamera, Vec3, MIN_GRID_SIZE,
};

pub type HandlerFn = fn(&mut Session, &Invocation<'_>) -> Result<Value, ActionError>;

/// Everything a handler gets besides the session.
pub struct Invocation<'a> {
    pub action: &'a str,
    /// Class the action was resolved against.
    pub class: &'a str,
    pub agent_id: usize,
    pub params: &'a Map<String, Value>,
    pub registry: &'a ActionRegistry<HandlerFn>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// State owned by one engine session.  Replaced wholesale by `Initialize`.
pub struct Session {
    /// Configuration the engine was started with.
    pub defaults: EngineConfig,
    /// Configuration in effect for this session.
    pub config: EngineConfig,
    pub scene: Scene,
    pub mode: AgentMode,
    pub agents: Vec<AgentState>,
    pub cameras: Vec<ThirdPartyCamera>,
    pub filter: ObjectFilter,
    pub cache: FastEmitCache,
    pub width: u32,
    pub height: u32,
    pub channels: ChannelSet,
    pub colors: Vec<ColorAssignment>,
    /// Top-level keys added to this step's metadata only.
    pub transient: Map<String, Value>,
}

impl Session {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let scene =
            Scene::load(&config.scene).ok_or_else(|| EngineError::UnknownScene(config.scene.clone()))?;
        if !config.grid_size.is_finite() || config.grid_size < MIN_GRID_SIZE {
            return Err(EngineError::InvalidConfig(format!(
                "grid_size must be at least {MIN_GRID_SIZE}"
            )));
        }
        check_frame_budget(&config, config.width, config.height, 1, 0)
            .map_err(|e| EngineError::InvalidConfig(e.message))?;
        let mode = AgentMode::Default;
        let agents = spawn_agents(&scene, &config, mode, 1);
        Ok(Self {
            colors: color_assignments(&scene),
            cache: FastEmitCache::new(config.fast_action_emit),
            width: config.width,
            height: config.height,
            defaults: config.clone(),
            config,
            scene,
            mode,
            agents,
            cameras: Vec::new(),
            filter: ObjectFilter::default(),
            channels: ChannelSet::default(),
            transient: Map::new(),
        })
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }

    pub fn resting_height(&self) -> f32 {
        self.scene.interior.min.y + self.config.agent_center_height
    }

    pub fn agent_view(&self, agent_id: usize) -> Option<CameraView> {
        self.agents
            .get(agent_id)
            .map(|a| agent_view(&self.config, a))
    }

    /// Positions of every agent except `agent_id`.
    pub fn other_agents(&self, agent_id: usize) -> Vec<Vec3> {
        self.agents
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != agent_id)
            .map(|(_, a)| a.position)
            .collect()
    }
}

/// Reject a layout whose frame buffer, with every channel on, would not fit
/// in one response.
pub fn check_frame_budget(
    config: &EngineConfig,
    width: u32,
    height: u32,
    agents: usize,
    cameras: usize,
) -> Result<(), ActionError> {
    let bytes = FrameLayout::with_all_channels(width, height, agents, cameras).total_bytes();
    if bytes > config.max_frame_bytes {
        return Err(ActionError::failed(format!(
            "{width}x{height} frames for {} cameras need {bytes} bytes per step, above the {} byte limit",
            agents + cameras,
            config.max_frame_bytes
        )));
    }
    Ok(())
}

pub fn agent_view(config: &EngineConfig, agent: &AgentState) -> CameraView {
    let floor = agent.position.y - config.agent_center_height;
    CameraView {
        eye: Vec3::new(
            agent.position.x,
            floor + eye_height(config, agent.is_standing),
            agent.position.z,
        ),
        yaw: agent.rotation.y,
        horizon: agent.camera_horizon,
        field_of_view: config.field_of_view,
        orthographic_size: None,
    }
}

pub fn camera_view(camera: &ThirdPartyCamera) -> CameraView {
    CameraView {
        eye: camera.position,
        yaw: camera.rotation.y,
        horizon: camera.rotation.x,
        field_of_view: camera.field_of_view,
        orthographic_size: if camera.orthographic {
            camera.orthographic_size
        } else {
            None
        },
    }
}

/// Place `count` agents at the scene's spawn points.
pub fn spawn_agents(
    scene: &Scene,
    config: &EngineConfig,
    mode: AgentMode,
    count: usize,
) -> Vec<AgentState> {
    let rest = scene.interior.min.y + config.agent_center_height;
    scene
        .spawns
        .iter()
        .take(count)
        .map(|&(x, z, yaw)| AgentState {
            position: Vec3::new(x, rest, z),
            rotation: Vec3::new(0.0, yaw, 0.0),
            camera_horizon: 0.0,
            is_standing: mode.supports_standing().then_some(true),
        })
        .collect()
}

/// Colour for every object id, object type and structure surface.
pub fn color_assignments(scene: &Scene) -> Vec<ColorAssignment> {
    let names = scene
        .objects
        .iter()
        .flat_map(|o| [o.object_id.as_str(), o.object_type.as_str()])
        .chain(
            scene
                .surfaces
                .iter()
                .flat_map(|s| [s.id.as_str(), s.kind.as_str()]),
        );
    let mut seen = HashSet::new();
    names
        .filter(|n| seen.insert(*n))
        .map(|n| ColorAssignment {
            name: n.to_string(),
            color: identity_color(n),
        })
        .collect()
}

fn object_metadata(
    scene: &Scene,
    config: &EngineConfig,
    filter: &ObjectFilter,
    agent: &AgentState,
    aspect: f32,
) -> Vec<ObjectMetadata> {
    let view = agent_view(config, agent);
    scene
        .objects
        .iter()
        .filter(|o| filter.admits(&o.object_id))
        .map(|o| {
            let bounds = o.bounds();
            ObjectMetadata {
                object_id: o.object_id.clone(),
                object_type: o.object_type.clone(),
                name: o.object_id.replace('|', "_"),
                position: o.body.center(),
                rotation: Vec3::zero(),
                visible: visible_from(scene, &view, o, aspect, config),
                distance: o.body.center().sub(view.eye).length(),
                openable: o.openable(),
                is_open: o.is_open(),
                openness: o.openness,
                toggleable: o.toggleable,
                is_toggled: o.toggled,
                pickupable: o.pickupable,
                receptacle: o.receptacle,
                parent_receptacles: scene
                    .ancestors(&o.object_id)
                    .iter()
                    .map(|p| p.object_id.clone())
                    .collect(),
                axis_aligned_bounding_box: bounds.to_aabb(),
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    session: Session,
    registry: Arc<ActionRegistry<HandlerFn>>,
    steps: u64,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let registry = Arc::new(handlers::registry()?);
        let session = Session::new(config)?;
        info!(
            "engine ready: scene {} at {}x{}",
            session.scene.name, session.width, session.height
        );
        Ok(Self {
            session,
            registry,
            steps: 0,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn registry(&self) -> &ActionRegistry<HandlerFn> {
        &self.registry
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// A new client connected; it holds no cached object list yet.
    pub fn begin_connection(&mut self) {
        self.session.cache.invalidate();
    }

    /// Run one step from a decoded wire request.
    pub fn step(&mut self, mut request: Map<String, Value>) -> StepResponse {
        self.steps += 1;
        self.session.transient.clear();

        let sequence_id = request
            .remove(reserved::SEQUENCE_ID)
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let action = match request.remove(reserved::ACTION) {
            Some(Value::String(s)) => s,
            _ => String::new(),
        };
        let agent = request.remove(reserved::AGENT_ID);
        let type_name = request.remove(reserved::TYPE_NAME);
        let (agent_id, result, overrides) = match take_overrides(&mut request) {
            Ok(ov) => {
                let (agent_id, result) = self.dispatch(&action, agent, type_name, &request, &ov);
                (agent_id, result, ov)
            }
            Err(name) => (
                0,
                Err(ActionError::invalid_argument(&action, name)),
                RenderOverrides::default(),
            ),
        };
        self.respond(action, sequence_id, agent_id, &overrides, result)
    }

    /// Run one step from a client-side request, in process.
    pub fn step_action(&mut self, request: &ActionRequest) -> StepResponse {
        let wire = request.to_wire(self.steps + 1);
        self.step(wire)
    }

    /// Decode an action payload, step, and encode the response payload.
    pub fn step_payload(&mut self, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        let request = decode_action(payload)?;
        let response = self.step(request);
        encode_response(&response)
    }

    fn dispatch(
        &mut self,
        action: &str,
        agent: Option<Value>,
        type_name: Option<Value>,
        params: &Map<String, Value>,
        overrides: &RenderOverrides,
    ) -> (usize, Result<Value, ActionError>) {
        let agent_id = match agent {
            None => 0,
            Some(v) => match v.as_u64().map(|i| i as usize) {
                Some(i) if i < self.session.agents.len() => i,
                _ => {
                    return (
                        0,
                        Err(ActionError::invalid_argument(action, reserved::AGENT_ID)),
                    )
                }
            },
        };
        let class = match type_name {
            None => self.session.mode.handler_class().to_string(),
            Some(Value::String(s)) => s,
            Some(_) => {
                return (
                    agent_id,
                    Err(ActionError::invalid_argument(action, reserved::TYPE_NAME)),
                )
            }
        };

        let descriptor = match self.registry.resolve(&class, action, params) {
            Ok(d) => d,
            Err(e) => {
                debug!("dispatch of {} rejected: {}", action, e);
                return (agent_id, Err(e));
            }
        };
        if descriptor.mutates {
            self.session.cache.invalidate();
        }
        let invocation = Invocation {
            action,
            class: &class,
            agent_id,
            params,
            registry: &self.registry,
        };
        let result = (descriptor.handler)(&mut self.session, &invocation);
        if result.is_ok() && descriptor.action == actions::INITIALIZE {
            self.session.channels = self.session.channels.with_overrides(overrides);
        }
        (agent_id, result)
    }

    fn respond(
        &mut self,
        action: String,
        sequence_id: u64,
        agent_id: usize,
        overrides: &RenderOverrides,
        result: Result<Value, ActionError>,
    ) -> StepResponse {
        let s = &mut self.session;
        let agent_id = agent_id.min(s.agents.len().saturating_sub(1));
        let channels = if action == actions::INITIALIZE {
            s.channels
        } else {
            s.channels.with_overrides(overrides)
        };

        let (success, error_message, error_code, action_return) = match result {
            Ok(v) => (true, String::new(), None, v),
            Err(e) => {
                debug!("{} failed ({}): {}", action, e.code, e.message);
                let message = if e.message.is_empty() {
                    format!("{action} failed")
                } else {
                    e.message
                };
                (false, message, Some(e.code), Value::Null)
            }
        };

        let aspect = s.aspect();
        let (objects, reused) = match s.agents.get(agent_id) {
            Some(agent) => s.cache.emit(agent_id, || {
                object_metadata(&s.scene, &s.config, &s.filter, agent, aspect)
            }),
            None => (Arc::default(), false),
        };

        let layout = FrameLayout {
            width: s.width,
            height: s.height,
            channels,
            agent_count: s.agents.len(),
            camera_count: s.cameras.len(),
        };
        let mut frames = FrameBufferBuilder::new(&layout);
        let views = s
            .agents
            .iter()
            .map(|a| agent_view(&s.config, a))
            .chain(s.cameras.iter().map(camera_view));
        for view in views {
            frames.push(&render(&s.scene, &view, s.width, s.height, channels));
        }

        let metadata = Metadata {
            last_action: action,
            last_action_success: success,
            error_message,
            error_code,
            action_return,
            sequence_id,
            scene_name: s.scene.name.clone(),
            agent_id,
            agent: s.agents.get(agent_id).cloned().unwrap_or_else(|| AgentState {
                position: Vec3::zero(),
                rotation: Vec3::zero(),
                camera_horizon: 0.0,
                is_standing: None,
            }),
            agents: s.agents.clone(),
            third_party_cameras: s.cameras.clone(),
            screen_width: s.width,
            screen_height: s.height,
            render_channels: channels,
            colors: s.colors.clone(),
            fast_emit: reused,
            objects,
            extra: std::mem::take(&mut s.transient),
        };
        StepResponse {
            metadata,
            frame_buffer: frames.finish(),
        }
    }
}

/// Remove render override fields.  Returns the offending name when one is
/// present but not a boolean.  A current flag name wins over its deprecated
/// spelling.
fn take_overrides(request: &mut Map<String, Value>) -> Result<RenderOverrides, &'static str> {
    let depth = take_flag(request, reserved::RENDER_DEPTH)?;
    let object_image = take_flag(request, reserved::RENDER_OBJECT_IMAGE)?;
    let class_image = take_flag(request, reserved::RENDER_CLASS_IMAGE)?;
    Ok(RenderOverrides {
        depth,
        instance: take_flag(request, reserved::RENDER_INSTANCE)?.or(object_image),
        semantic: take_flag(request, reserved::RENDER_SEMANTIC)?.or(class_image),
    })
}

fn take_flag(request: &mut Map<String, Value>, name: &'static str) -> Result<Option<bool>, &'static str> {
    match request.remove(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(_) => Err(name),
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("scene", &self.session.scene.name)
            .field("agents", &self.session.agents.len())
            .field("steps", &self.steps)
            .finish()
    }
}
