//! Deterministic ray-cast renderer for fixture scenes.
//!
//! One ray per pixel, through the pixel centre.  Colour is the type colour
//! shaded by face orientation, depth is planar distance along the view axis,
//! instance segmentation is the per-object colour and semantic segmentation
//! the per-type colour.  Because rays go through pixel centres, rendering at
//! a resolution, resizing, and resizing back reproduces the same pixels.

use crate::frames::{identity_color, RawView};
use crate::protocol::ChannelSet;
use crate::scene::Scene;
use crate::types::Vec3;

/// Farthest distance a camera ray travels.
pub const FAR_PLANE: f32 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraView {
    pub eye: Vec3,
    /// Degrees about the vertical axis; 0 looks along +z.
    pub yaw: f32,
    /// Degrees; positive looks down.
    pub horizon: f32,
    /// Vertical field of view in degrees.
    pub field_of_view: f32,
    /// Half-height of the view volume when orthographic.
    pub orthographic_size: Option<f32>,
}

impl CameraView {
    pub fn forward(&self) -> Vec3 {
        let (yaw, pitch) = (self.yaw.to_radians(), self.horizon.to_radians());
        Vec3::new(
            yaw.sin() * pitch.cos(),
            -pitch.sin(),
            yaw.cos() * pitch.cos(),
        )
    }

    pub fn right(&self) -> Vec3 {
        let yaw = self.yaw.to_radians();
        Vec3::new(yaw.cos(), 0.0, -yaw.sin())
    }

    pub fn up(&self) -> Vec3 {
        self.forward().cross(self.right())
    }

    /// Project a world point to normalised device coordinates in `[-1, 1]`,
    /// or `None` when it is behind the camera.
    pub fn project(&self, p: Vec3, aspect: f32) -> Option<(f32, f32)> {
        let rel = p.sub(self.eye);
        let depth = rel.dot(self.forward());
        if depth <= 0.0 {
            return None;
        }
        let (x, y) = (rel.dot(self.right()), rel.dot(self.up()));
        match self.orthographic_size {
            Some(size) => Some((x / (size * aspect), y / size)),
            None => {
                let tan_half = (self.field_of_view.to_radians() * 0.5).tan();
                Some((x / (depth * tan_half * aspect), y / (depth * tan_half)))
            }
        }
    }

    /// Origin and unit direction of the ray through pixel `(px, py)`.
    pub fn pixel_ray(&self, px: u32, py: u32, width: u32, height: u32) -> (Vec3, Vec3) {
        self.viewport_ray(
            (px as f32 + 0.5) / width as f32,
            (py as f32 + 0.5) / height as f32,
            width as f32 / height as f32,
        )
    }

    /// Ray through viewport point `(x, y)`, both in `[0, 1]` measured from
    /// the top-left corner.
    pub fn viewport_ray(&self, x: f32, y: f32, aspect: f32) -> (Vec3, Vec3) {
        let nx = x * 2.0 - 1.0;
        let ny = 1.0 - y * 2.0;
        let (forward, right, up) = (self.forward(), self.right(), self.up());
        match self.orthographic_size {
            Some(size) => {
                let origin = self
                    .eye
                    .add(right.scale(nx * size * aspect))
                    .add(up.scale(ny * size));
                (origin, forward)
            }
            None => {
                let tan_half = (self.field_of_view.to_radians() * 0.5).tan();
                let dir = forward
                    .add(right.scale(nx * tan_half * aspect))
                    .add(up.scale(ny * tan_half))
                    .normalized();
                (self.eye, dir)
            }
        }
    }
}

fn shade(color: [u8; 3], normal: Vec3) -> [u8; 3] {
    let factor = if normal.y > 0.5 {
        1.0
    } else if normal.y < -0.5 {
        0.5
    } else if normal.x.abs() > 0.5 {
        0.8
    } else {
        0.65
    };
    color.map(|c| (c as f32 * factor) as u8)
}

/// Render every requested channel of `view`.
pub fn render(scene: &Scene, view: &CameraView, width: u32, height: u32, channels: ChannelSet) -> RawView {
    let pixels = width as usize * height as usize;
    let mut out = RawView {
        color: Vec::with_capacity(pixels * 3),
        depth: Vec::with_capacity(if channels.depth { pixels } else { 0 }),
        instance: Vec::with_capacity(if channels.instance { pixels * 3 } else { 0 }),
        semantic: Vec::with_capacity(if channels.semantic { pixels * 3 } else { 0 }),
    };
    let forward = view.forward();

    for py in 0..height {
        for px in 0..width {
            let (origin, dir) = view.pixel_ray(px, py, width, height);
            match scene.raycast(origin, dir, FAR_PLANE, |_| false) {
                Some(hit) => {
                    out.color.extend_from_slice(&shade(identity_color(hit.kind), hit.normal));
                    if channels.depth {
                        out.depth.push(hit.t * dir.dot(forward));
                    }
                    if channels.instance {
                        out.instance.extend_from_slice(&identity_color(hit.id));
                    }
                    if channels.semantic {
                        out.semantic.extend_from_slice(&identity_color(hit.kind));
                    }
                }
                None => {
                    out.color.extend_from_slice(&[0, 0, 0]);
                    if channels.depth {
                        out.depth.push(0.0);
                    }
                    if channels.instance {
                        out.instance.extend_from_slice(&[0, 0, 0]);
                    }
                    if channels.semantic {
                        out.semantic.extend_from_slice(&[0, 0, 0]);
                    }
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(yaw: f32, horizon: f32) -> CameraView {
        CameraView {
            eye: Vec3::new(0.0, 1.5, 0.0),
            yaw,
            horizon,
            field_of_view: 90.0,
            orthographic_size: None,
        }
    }

    #[test]
    fn basis_is_orthonormal() {
        let v = view(37.0, 20.0);
        let (f, r, u) = (v.forward(), v.right(), v.up());
        assert!(f.dot(r).abs() < 1e-5);
        assert!(f.dot(u).abs() < 1e-5);
        assert!((u.length() - 1.0).abs() < 1e-5);
        assert!(u.y > 0.0);
    }

    #[test]
    fn centre_pixel_projects_to_origin() {
        let v = view(90.0, 0.0);
        let (_, dir) = v.pixel_ray(50, 50, 101, 101);
        assert!(dir.sub(v.forward()).length() < 1e-5);
        let (x, y) = v.project(Vec3::new(2.0, 1.5, 0.0), 1.0).unwrap();
        assert!(x.abs() < 1e-5 && y.abs() < 1e-5);
        assert!(v.project(Vec3::new(-2.0, 1.5, 0.0), 1.0).is_none());
    }

    #[test]
    fn looking_down_sees_the_floor() {
        let scene = Scene::load("Kitchen").unwrap();
        let v = view(0.0, 90.0);
        let raw = render(&scene, &v, 3, 3, ChannelSet::all());
        // Centre pixel, straight down from 1.5 m.
        assert!((raw.depth[4] - 1.5).abs() < 1e-4);
        assert_eq!(&raw.semantic[12..15], &identity_color("Floor"));
    }
}
