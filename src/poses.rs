//! Visibility tests and the interactable pose search.

use log::debug;

use crate::render::CameraView;
use crate::scene::{Scene, SceneObject};
use crate::types::{EngineConfig, Pose, Vec3};

/// Fraction of each half-extent kept when sampling box corners.
const CORNER_INSET: f32 = 0.8;

/// Eye height above the floor for a stance.
pub fn eye_height(config: &EngineConfig, standing: Option<bool>) -> f32 {
    let offset = match standing {
        Some(false) => config.crouching_eye_offset,
        _ => config.standing_eye_offset,
    };
    config.agent_center_height + offset
}

fn sample_points(obj: &SceneObject) -> Vec<Vec3> {
    let b = obj.bounds();
    let c = b.center();
    let h = b.size().scale(0.5 * CORNER_INSET);
    let mut out = vec![c];
    for sx in [-1.0, 1.0] {
        for sy in [-1.0, 1.0] {
            for sz in [-1.0, 1.0] {
                out.push(c.add(Vec3::new(sx * h.x, sy * h.y, sz * h.z)));
            }
        }
    }
    out
}

/// Whether `target` can be seen from `view`: some sample point of its bounds
/// is within `config.visibility_distance`, inside the view frustum, and not
/// occluded by other geometry.
///
/// Open containers of the target do not occlude it; closed ones do.
pub fn visible_from(
    scene: &Scene,
    view: &CameraView,
    target: &SceneObject,
    aspect: f32,
    config: &EngineConfig,
) -> bool {
    let open_ancestors: Vec<&str> = scene
        .ancestors(&target.object_id)
        .into_iter()
        .filter(|o| o.is_open())
        .map(|o| o.object_id.as_str())
        .collect();
    let skip = |id: &str| id == target.object_id || open_ancestors.iter().any(|a| *a == id);

    sample_points(target).into_iter().any(|p| {
        let to = p.sub(view.eye);
        let dist = to.length();
        if dist > config.visibility_distance || dist <= f32::EPSILON {
            return false;
        }
        match view.project(p, aspect) {
            Some((x, y)) if x.abs() <= 1.0 && y.abs() <= 1.0 => {}
            _ => return false,
        }
        let dir = to.scale(1.0 / dist);
        match scene.raycast(view.eye, dir, dist, &skip) {
            Some(hit) => hit.t >= dist - config.occlusion_epsilon,
            None => true,
        }
    })
}

// ---------------------------------------------------------------------------
// Pose search
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseQuery {
    pub horizons: Option<Vec<f32>>,
    pub rotations: Option<Vec<f32>>,
    pub standings: Option<Vec<bool>>,
    /// Candidate `(x, z)` positions instead of the reachable grid.
    pub positions: Option<Vec<(f32, f32)>>,
    pub max_poses: Option<usize>,
    /// Horizontal distance from the object's bounds; defaults to the
    /// visibility distance.
    pub max_distance: Option<f32>,
}

/// Poses from which `target` is visible, in position → rotation → horizon →
/// stance order, truncated at `max_poses`.
///
/// `blockers` are the positions of other agents; poses overlapping them are
/// skipped.  `supports_standing` is false for agent kinds without a stance,
/// whose poses carry `standing: None`.
pub fn interactable_poses(
    scene: &Scene,
    target: &SceneObject,
    query: &PoseQuery,
    config: &EngineConfig,
    supports_standing: bool,
    blockers: &[Vec3],
    aspect: f32,
) -> Vec<Pose> {
    let max_distance = query.max_distance.unwrap_or(config.visibility_distance);
    let rotations = query.rotations.as_deref().unwrap_or(&config.pose_rotations);
    let horizons = query.horizons.as_deref().unwrap_or(&config.pose_horizons);
    let standings: Vec<Option<bool>> = if supports_standing {
        query
            .standings
            .clone()
            .unwrap_or_else(|| vec![true, false])
            .into_iter()
            .map(Some)
            .collect()
    } else {
        vec![None]
    };
    let height = config.agent_center_height * 2.0;
    let positions = match &query.positions {
        Some(p) => p.clone(),
        None => scene.reachable_positions(config.grid_size, config.agent_radius, height),
    };

    let bounds = target.bounds();
    let near = |x: f32, z: f32| {
        let cx = x.clamp(bounds.min.x, bounds.max.x);
        let cz = z.clamp(bounds.min.z, bounds.max.z);
        ((x - cx).powi(2) + (z - cz).powi(2)).sqrt() <= max_distance
    };
    let blocked = |x: f32, z: f32| {
        blockers
            .iter()
            .any(|b| b.horizontal_distance(Vec3::new(x, 0.0, z)) < config.agent_radius * 2.0)
    };
    let limit = query.max_poses.unwrap_or(usize::MAX);

    let mut out = Vec::new();
    'search: for &(x, z) in positions.iter().filter(|(x, z)| near(*x, *z) && !blocked(*x, *z)) {
        for &rotation in rotations {
            for &horizon in horizons {
                for &standing in &standings {
                    if out.len() >= limit {
                        break 'search;
                    }
                    let view = CameraView {
                        eye: Vec3::new(x, eye_height(config, standing), z),
                        yaw: rotation,
                        horizon,
                        field_of_view: config.field_of_view,
                        orthographic_size: None,
                    };
                    if visible_from(scene, &view, target, aspect, config) {
                        out.push(Pose {
                            x,
                            z,
                            rotation,
                            horizon,
                            standing,
                        });
                    }
                }
            }
        }
    }
    debug!(
        "pose search for {}: {} poses (limit {:?})",
        target.object_id,
        out.len(),
        query.max_poses
    );
    out
}
