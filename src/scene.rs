//! Built-in fixture scenes.
//!
//! A scene is a room (an axis-aligned interior volume enclosed by floor, walls
//! and ceiling) holding axis-aligned box objects.  Openable objects grow a
//! door box when opened.  This is enough geometry for visibility, collision
//! and ray-cast rendering to behave deterministically.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::types::{Aabb, Vec3, MIN_GRID_SIZE};

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Box3 {
    pub min: Vec3,
    pub max: Vec3,
}

/// Result of a ray / box intersection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxHit {
    pub t: f32,
    pub normal: Vec3,
}

impl Box3 {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_center_size(center: Vec3, size: Vec3) -> Self {
        let half = size.scale(0.5);
        Self::new(center.sub(half), center.add(half))
    }

    pub fn center(&self) -> Vec3 {
        self.min.add(self.max).scale(0.5)
    }

    pub fn size(&self) -> Vec3 {
        self.max.sub(self.min)
    }

    pub fn union(&self, o: &Box3) -> Box3 {
        Box3::new(
            Vec3::new(
                self.min.x.min(o.min.x),
                self.min.y.min(o.min.y),
                self.min.z.min(o.min.z),
            ),
            Vec3::new(
                self.max.x.max(o.max.x),
                self.max.y.max(o.max.y),
                self.max.z.max(o.max.z),
            ),
        )
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    pub fn to_aabb(&self) -> Aabb {
        Aabb {
            center: self.center(),
            size: self.size(),
        }
    }

    /// Whether a vertical cylinder overlaps this box.
    pub fn intersects_cylinder(&self, center: Vec3, radius: f32, y_min: f32, y_max: f32) -> bool {
        if y_max <= self.min.y || y_min >= self.max.y {
            return false;
        }
        let cx = center.x.clamp(self.min.x, self.max.x);
        let cz = center.z.clamp(self.min.z, self.max.z);
        let dx = center.x - cx;
        let dz = center.z - cz;
        dx * dx + dz * dz < radius * radius
    }

    /// Slab test.  Returns the entry point (or exit point when the origin is
    /// inside) and the face normal.
    pub fn ray_hit(&self, origin: Vec3, dir: Vec3) -> Option<BoxHit> {
        let o = [origin.x, origin.y, origin.z];
        let d = [dir.x, dir.y, dir.z];
        let lo = [self.min.x, self.min.y, self.min.z];
        let hi = [self.max.x, self.max.y, self.max.z];

        let mut t_near = f32::NEG_INFINITY;
        let mut t_far = f32::INFINITY;
        let mut near_axis = 0;
        let mut far_axis = 0;
        for axis in 0..3 {
            if d[axis].abs() < 1e-9 {
                if o[axis] < lo[axis] || o[axis] > hi[axis] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d[axis];
            let mut t0 = (lo[axis] - o[axis]) * inv;
            let mut t1 = (hi[axis] - o[axis]) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            if t0 > t_near {
                t_near = t0;
                near_axis = axis;
            }
            if t1 < t_far {
                t_far = t1;
                far_axis = axis;
            }
            if t_near > t_far {
                return None;
            }
        }
        if t_far < 0.0 {
            return None;
        }
        let (t, axis) = if t_near >= 0.0 {
            (t_near, near_axis)
        } else {
            (t_far, far_axis)
        };
        let mut n = [0.0f32; 3];
        n[axis] = if d[axis] > 0.0 { -1.0 } else { 1.0 };
        Some(BoxHit {
            t,
            normal: Vec3::new(n[0], n[1], n[2]),
        })
    }
}

// ---------------------------------------------------------------------------
// Scene objects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SceneObject {
    pub object_id: String,
    pub object_type: String,
    pub body: Box3,
    /// Door footprint when fully open, anchored at the hinge.
    pub door: Option<DoorSwing>,
    pub openness: f32,
    pub toggleable: bool,
    pub toggled: bool,
    pub pickupable: bool,
    pub receptacle: bool,
    pub parent: Option<String>,
    /// Blocks agent movement.
    pub obstacle: bool,
}

/// A door that sweeps out from one face as openness goes from 0 to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DoorSwing {
    /// Box of the door at openness 1.
    pub open: Box3,
    /// The door extends from `hinge` along this axis (0 = x, 2 = z).
    pub axis: usize,
    pub hinge: f32,
}

impl SceneObject {
    fn new(id: &str, object_type: &str, center: Vec3, size: Vec3) -> Self {
        Self {
            object_id: id.into(),
            object_type: object_type.into(),
            body: Box3::from_center_size(center, size),
            door: None,
            openness: 0.0,
            toggleable: false,
            toggled: false,
            pickupable: false,
            receptacle: false,
            parent: None,
            obstacle: false,
        }
    }

    fn obstacle(mut self) -> Self {
        self.obstacle = true;
        self
    }

    fn receptacle(mut self) -> Self {
        self.receptacle = true;
        self
    }

    fn pickupable(mut self) -> Self {
        self.pickupable = true;
        self
    }

    fn toggleable(mut self) -> Self {
        self.toggleable = true;
        self
    }

    fn inside(mut self, parent: &str) -> Self {
        self.parent = Some(parent.into());
        self
    }

    fn door(mut self, open: Box3, axis: usize, hinge: f32) -> Self {
        self.door = Some(DoorSwing { open, axis, hinge });
        self
    }

    pub fn openable(&self) -> bool {
        self.door.is_some()
    }

    pub fn is_open(&self) -> bool {
        self.openness > 0.0
    }

    /// Current door box, scaled by openness.
    pub fn door_box(&self) -> Option<Box3> {
        let door = self.door?;
        if !self.is_open() {
            return None;
        }
        let mut b = door.open;
        let (lo, hi) = match door.axis {
            0 => (&mut b.min.x, &mut b.max.x),
            _ => (&mut b.min.z, &mut b.max.z),
        };
        // Whichever end is away from the hinge shrinks towards it.
        if (*lo - door.hinge).abs() < (*hi - door.hinge).abs() {
            *hi = door.hinge + (*hi - door.hinge) * self.openness;
        } else {
            *lo = door.hinge + (*lo - door.hinge) * self.openness;
        }
        Some(b)
    }

    /// Surfaces that take part in ray casts.
    pub fn boxes(&self) -> Vec<Box3> {
        let mut out = vec![self.body];
        out.extend(self.door_box());
        out
    }

    pub fn bounds(&self) -> Box3 {
        match self.door_box() {
            Some(d) => self.body.union(&d),
            None => self.body,
        }
    }
}

/// Fixed room geometry (floor, walls, ceiling, interior partitions).
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    pub id: String,
    pub kind: String,
    pub bounds: Box3,
    pub obstacle: bool,
}

// ---------------------------------------------------------------------------
// Scene
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Scene {
    pub name: String,
    /// Interior volume agents may occupy.
    pub interior: Box3,
    pub surfaces: Vec<Surface>,
    pub objects: Vec<SceneObject>,
    /// Spawn points `(x, z, yaw)` for agents, in order.
    pub spawns: Vec<(f32, f32, f32)>,
}

/// A ray-cast hit against scene geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneHit<'a> {
    pub t: f32,
    pub normal: Vec3,
    pub id: &'a str,
    pub kind: &'a str,
}

impl Scene {
    pub fn names() -> &'static [&'static str] {
        &["Kitchen", "Studio"]
    }

    pub fn load(name: &str) -> Option<Scene> {
        let scene = match name {
            "Kitchen" => kitchen(),
            "Studio" => studio(),
            _ => return None,
        };
        debug!(
            "loaded scene {} ({} objects, {} surfaces)",
            scene.name,
            scene.objects.len(),
            scene.surfaces.len()
        );
        Some(scene)
    }

    pub fn object(&self, id: &str) -> Option<&SceneObject> {
        self.objects.iter().find(|o| o.object_id == id)
    }

    pub fn object_mut(&mut self, id: &str) -> Option<&mut SceneObject> {
        self.objects.iter_mut().find(|o| o.object_id == id)
    }

    /// Parent chain of an object, innermost first.
    pub fn ancestors(&self, id: &str) -> Vec<&SceneObject> {
        let mut out = Vec::new();
        let mut cur = self.object(id).and_then(|o| o.parent.as_deref());
        while let Some(p) = cur {
            let Some(obj) = self.object(p) else { break };
            if out.iter().any(|o: &&SceneObject| o.object_id == obj.object_id) {
                break;
            }
            out.push(obj);
            cur = obj.parent.as_deref();
        }
        out
    }

    /// Whether an agent body centred at `pos` fits inside the room.
    pub fn in_bounds(&self, pos: Vec3, radius: f32) -> bool {
        pos.is_finite()
            && pos.x - radius >= self.interior.min.x
            && pos.x + radius <= self.interior.max.x
            && pos.z - radius >= self.interior.min.z
            && pos.z + radius <= self.interior.max.z
    }

    /// Whether an agent body of `radius` standing on the floor at `pos`
    /// overlaps any obstacle.
    pub fn collides(&self, pos: Vec3, radius: f32, height: f32) -> bool {
        let (y0, y1) = (self.interior.min.y + 0.05, self.interior.min.y + height);
        self.surfaces
            .iter()
            .filter(|s| s.obstacle)
            .any(|s| s.bounds.intersects_cylinder(pos, radius, y0, y1))
            || self
                .objects
                .iter()
                .filter(|o| o.obstacle)
                .any(|o| o.bounds().intersects_cylinder(pos, radius, y0, y1))
    }

    /// Grid points (multiples of `grid`) where an agent fits, x-major.
    pub fn reachable_positions(&self, grid: f32, radius: f32, height: f32) -> Vec<(f32, f32)> {
        if !grid.is_finite() || grid < MIN_GRID_SIZE {
            return Vec::new();
        }
        let steps = |lo: f32, hi: f32| {
            let first = (lo / grid).ceil() as i32;
            let last = (hi / grid).floor() as i32;
            first..=last
        };
        let mut out = Vec::new();
        for ix in steps(self.interior.min.x, self.interior.max.x) {
            for iz in steps(self.interior.min.z, self.interior.max.z) {
                let p = Vec3::new(ix as f32 * grid, 0.0, iz as f32 * grid);
                if self.in_bounds(p, radius) && !self.collides(p, radius, height) {
                    out.push((p.x, p.z));
                }
            }
        }
        out
    }

    /// Nearest hit along `dir` within `max_t`, ignoring objects `skip` rejects.
    pub fn raycast<F>(&self, origin: Vec3, dir: Vec3, max_t: f32, skip: F) -> Option<SceneHit<'_>>
    where
        F: Fn(&str) -> bool,
    {
        let surfaces = self
            .surfaces
            .iter()
            .map(|s| (s.bounds, s.id.as_str(), s.kind.as_str()));
        let objects = self
            .objects
            .iter()
            .filter(|o| !skip(&o.object_id))
            .flat_map(|o| {
                o.boxes()
                    .into_iter()
                    .map(move |b| (b, o.object_id.as_str(), o.object_type.as_str()))
            });

        let mut best: Option<SceneHit<'_>> = None;
        for (b, id, kind) in surfaces.chain(objects) {
            let Some(h) = b.ray_hit(origin, dir) else {
                continue;
            };
            if h.t <= max_t && best.as_ref().map_or(true, |c| h.t < c.t) {
                best = Some(SceneHit {
                    t: h.t,
                    normal: h.normal,
                    id,
                    kind,
                });
            }
        }
        best
    }

    pub fn bounds(&self) -> Box3 {
        self.interior
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const WALL: f32 = 0.1;

fn room(min: Vec3, max: Vec3) -> Vec<Surface> {
    let surface = |id: &str, kind: &str, b: Box3| Surface {
        id: id.into(),
        kind: kind.into(),
        bounds: b,
        obstacle: kind == "Wall",
    };
    let (lo, hi) = (min, max);
    vec![
        surface(
            "Floor",
            "Floor",
            Box3::new(
                Vec3::new(lo.x - WALL, lo.y - WALL, lo.z - WALL),
                Vec3::new(hi.x + WALL, lo.y, hi.z + WALL),
            ),
        ),
        surface(
            "Ceiling",
            "Ceiling",
            Box3::new(
                Vec3::new(lo.x - WALL, hi.y, lo.z - WALL),
                Vec3::new(hi.x + WALL, hi.y + WALL, hi.z + WALL),
            ),
        ),
        surface(
            "Wall|north",
            "Wall",
            Box3::new(Vec3::new(lo.x, lo.y, hi.z), Vec3::new(hi.x, hi.y, hi.z + WALL)),
        ),
        surface(
            "Wall|south",
            "Wall",
            Box3::new(Vec3::new(lo.x, lo.y, lo.z - WALL), Vec3::new(hi.x, hi.y, lo.z)),
        ),
        surface(
            "Wall|east",
            "Wall",
            Box3::new(Vec3::new(hi.x, lo.y, lo.z), Vec3::new(hi.x + WALL, hi.y, hi.z)),
        ),
        surface(
            "Wall|west",
            "Wall",
            Box3::new(Vec3::new(lo.x - WALL, lo.y, lo.z), Vec3::new(lo.x, hi.y, hi.z)),
        ),
    ]
}

fn v(x: f32, y: f32, z: f32) -> Vec3 {
    Vec3::new(x, y, z)
}

/// 5 m × 5 m kitchen: fridge (with a potato inside), counter with a mug and a
/// stove knob, a cabinet, a table with an apple, and a partition wall.
fn kitchen() -> Scene {
    let interior = Box3::new(v(-2.5, 0.0, -2.5), v(2.5, 2.6, 2.5));
    let mut surfaces = room(interior.min, interior.max);
    surfaces.push(Surface {
        id: "Wall|partition".into(),
        kind: "Wall".into(),
        bounds: Box3::new(v(1.2, 0.0, 0.45), v(2.5, 2.6, 0.55)),
        obstacle: true,
    });

    let objects = vec![
        SceneObject::new("Fridge|1", "Fridge", v(2.1, 0.9, -1.8), v(0.8, 1.8, 0.7))
            .obstacle()
            .receptacle()
            .door(Box3::new(v(1.0, 0.0, -2.15), v(1.7, 1.8, -2.1)), 0, 1.7),
        SceneObject::new("Potato|1", "Potato", v(2.1, 1.0, -1.8), v(0.1, 0.1, 0.1))
            .pickupable()
            .inside("Fridge|1"),
        SceneObject::new("CounterTop|1", "CounterTop", v(-2.2, 0.45, -1.0), v(0.6, 0.9, 3.0))
            .obstacle()
            .receptacle(),
        SceneObject::new("Mug|1", "Mug", v(-2.1, 0.95, -1.0), v(0.1, 0.1, 0.1))
            .pickupable()
            .receptacle()
            .inside("CounterTop|1"),
        SceneObject::new("StoveKnob|1", "StoveKnob", v(-1.88, 0.8, -2.0), v(0.04, 0.06, 0.06))
            .toggleable(),
        SceneObject::new("Cabinet|1", "Cabinet", v(-2.2, 0.45, 0.75), v(0.6, 0.9, 0.5))
            .obstacle()
            .receptacle()
            .door(Box3::new(v(-1.9, 0.0, 0.95), v(-1.4, 0.9, 1.0)), 0, -1.9),
        SceneObject::new("Table|1", "DiningTable", v(0.5, 0.375, 1.5), v(1.0, 0.75, 0.6))
            .obstacle()
            .receptacle(),
        SceneObject::new("Apple|1", "Apple", v(0.5, 0.8, 1.5), v(0.1, 0.1, 0.1))
            .pickupable()
            .inside("Table|1"),
    ];

    Scene {
        name: "Kitchen".into(),
        interior,
        surfaces,
        objects,
        spawns: vec![
            (0.0, 0.0, 0.0),
            (-1.0, 1.0, 90.0),
            (1.0, -0.5, 180.0),
            (-0.5, -1.5, 270.0),
        ],
    }
}

/// 4 m × 4 m studio: a lidded box holding a ball, and a chair.
fn studio() -> Scene {
    let interior = Box3::new(v(-2.0, 0.0, -2.0), v(2.0, 2.5, 2.0));
    let objects = vec![
        SceneObject::new("Box|1", "Box", v(1.2, 0.25, 1.2), v(0.5, 0.5, 0.5))
            .obstacle()
            .receptacle()
            .door(Box3::new(v(0.45, 0.0, 0.95), v(0.95, 0.5, 1.0)), 0, 0.95),
        SceneObject::new("Ball|1", "Ball", v(1.2, 0.2, 1.2), v(0.15, 0.15, 0.15))
            .pickupable()
            .inside("Box|1"),
        SceneObject::new("Chair|1", "Chair", v(-1.0, 0.45, -1.0), v(0.5, 0.9, 0.5))
            .obstacle()
            .receptacle(),
        SceneObject::new("Lamp|1", "FloorLamp", v(-1.5, 0.8, 1.5), v(0.3, 1.6, 0.3))
            .obstacle()
            .toggleable(),
    ];
    Scene {
        name: "Studio".into(),
        interior,
        surfaces: room(interior.min, interior.max),
        objects,
        spawns: vec![(0.0, 0.0, 0.0), (0.5, -1.0, 270.0)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ray_hits_near_face() {
        let b = Box3::new(v(1.0, -1.0, -1.0), v(2.0, 1.0, 1.0));
        let hit = b.ray_hit(Vec3::zero(), v(1.0, 0.0, 0.0)).unwrap();
        assert!((hit.t - 1.0).abs() < 1e-6);
        assert_eq!(hit.normal, v(-1.0, 0.0, 0.0));
        assert!(b.ray_hit(Vec3::zero(), v(-1.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn opening_grows_bounds() {
        let mut scene = Scene::load("Kitchen").unwrap();
        let closed = scene.object("Fridge|1").unwrap().bounds();
        scene.object_mut("Fridge|1").unwrap().openness = 0.5;
        let open = scene.object("Fridge|1").unwrap().bounds();
        assert!((open.min.x - 1.35).abs() < 1e-5);
        assert_eq!(closed.max, open.max);
        assert!(open.min.x < closed.min.x);
    }

    #[test]
    fn reachable_grid_avoids_obstacles() {
        let scene = Scene::load("Kitchen").unwrap();
        let grid = scene.reachable_positions(0.25, 0.2, 1.8);
        assert!(grid.contains(&(0.0, 0.0)));
        // Inside the counter.
        assert!(!grid.contains(&(-2.25, -1.0)));
        // Against the partition wall.
        assert!(!grid.contains(&(2.0, 0.5)));
        // Every point is a grid multiple.
        assert!(grid
            .iter()
            .all(|(x, z)| (x / 0.25).fract() == 0.0 && (z / 0.25).fract() == 0.0));
    }

    #[test]
    fn ancestors_walk_parents() {
        let scene = Scene::load("Kitchen").unwrap();
        let chain: Vec<_> = scene
            .ancestors("Potato|1")
            .iter()
            .map(|o| o.object_id.clone())
            .collect();
        assert_eq!(chain, ["Fridge|1"]);
    }

    #[test]
    fn unknown_scene_is_none() {
        assert!(Scene::load("Nowhere").is_none());
    }
}
