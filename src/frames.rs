//! Frame demultiplexing and segmentation colour maps.
//!
//! A response carries one combined frame buffer.  It is laid out camera by
//! camera (every agent first, then every third-party camera), and within one
//! camera channel by channel in [`ChannelSet::channels`] order.  Each RGB
//! channel of the result is a zero-copy slice of a distinct region of the
//! buffer; depth is decoded into `f32`s.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::protocol::{Channel, ChannelSet, ColorAssignment};

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// Row-major RGB8 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

impl RgbFrame {
    /// `(height, width, 3)`.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.height as usize, self.width as usize, 3)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.data[i], self.data[i + 1], self.data[i + 2]])
    }

    pub fn pixels(&self) -> impl Iterator<Item = [u8; 3]> + '_ {
        self.data.chunks_exact(3).map(|c| [c[0], c[1], c[2]])
    }

    /// Per-pixel mask of where this frame holds exactly `color`.
    pub fn mask(&self, color: [u8; 3]) -> Vec<bool> {
        self.pixels().map(|p| p == color).collect()
    }
}

/// Row-major depth image in metres.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl DepthFrame {
    pub fn shape(&self) -> (usize, usize) {
        (self.height as usize, self.width as usize)
    }

    pub fn at(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }
}

/// Every channel captured by one camera in one step.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSet {
    pub color: RgbFrame,
    pub depth: Option<DepthFrame>,
    pub instance: Option<RgbFrame>,
    pub semantic: Option<RgbFrame>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub width: u32,
    pub height: u32,
    pub channels: ChannelSet,
    pub agent_count: usize,
    pub camera_count: usize,
}

impl FrameLayout {
    /// Layout of a step that enables every optional channel.
    pub fn with_all_channels(width: u32, height: u32, agent_count: usize, camera_count: usize) -> Self {
        Self {
            width,
            height,
            channels: ChannelSet::all(),
            agent_count,
            camera_count,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn bytes_per_camera(&self) -> usize {
        self.pixel_count() * self.channels.bytes_per_pixel()
    }

    pub fn total_bytes(&self) -> usize {
        self.bytes_per_camera() * (self.agent_count + self.camera_count)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Demultiplexed {
    pub agents: Vec<FrameSet>,
    pub cameras: Vec<FrameSet>,
}

/// Split `buffer` according to `layout`.
pub fn demultiplex(buffer: &Bytes, layout: &FrameLayout) -> Result<Demultiplexed, CodecError> {
    let expected = layout.total_bytes();
    if buffer.len() != expected {
        return Err(CodecError::FrameLayout {
            expected,
            actual: buffer.len(),
        });
    }

    let per_camera = layout.bytes_per_camera();
    let mut out = Demultiplexed::default();
    for cam in 0..layout.agent_count + layout.camera_count {
        let region = buffer.slice(cam * per_camera..(cam + 1) * per_camera);
        let set = split_camera(&region, layout);
        if cam < layout.agent_count {
            out.agents.push(set);
        } else {
            out.cameras.push(set);
        }
    }
    Ok(out)
}

fn split_camera(region: &Bytes, layout: &FrameLayout) -> FrameSet {
    let (w, h) = (layout.width, layout.height);
    let pixels = layout.pixel_count();
    let rgb = |data: Bytes| RgbFrame {
        width: w,
        height: h,
        data,
    };

    let mut offset = 0;
    let mut color = None;
    let mut depth = None;
    let mut instance = None;
    let mut semantic = None;
    for channel in layout.channels.channels() {
        let len = pixels * channel.bytes_per_pixel();
        let bytes = region.slice(offset..offset + len);
        offset += len;
        match channel {
            Channel::Color => color = Some(rgb(bytes)),
            Channel::Instance => instance = Some(rgb(bytes)),
            Channel::Semantic => semantic = Some(rgb(bytes)),
            Channel::Depth => {
                depth = Some(DepthFrame {
                    width: w,
                    height: h,
                    data: bytes
                        .chunks_exact(4)
                        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                        .collect(),
                })
            }
        }
    }

    FrameSet {
        color: color.unwrap_or_else(|| rgb(Bytes::new())),
        depth,
        instance,
        semantic,
    }
}

// ---------------------------------------------------------------------------
// Encoding (engine side)
// ---------------------------------------------------------------------------

/// Raw channels of one rendered camera, before packing.
#[derive(Debug, Clone, Default)]
pub struct RawView {
    pub color: Vec<u8>,
    pub depth: Vec<f32>,
    pub instance: Vec<u8>,
    pub semantic: Vec<u8>,
}

/// Packs rendered views into the combined buffer in wire order.
pub struct FrameBufferBuilder {
    buf: BytesMut,
    channels: ChannelSet,
}

impl FrameBufferBuilder {
    pub fn new(layout: &FrameLayout) -> Self {
        Self {
            buf: BytesMut::with_capacity(layout.total_bytes()),
            channels: layout.channels,
        }
    }

    pub fn push(&mut self, view: &RawView) {
        for channel in self.channels.channels() {
            match channel {
                Channel::Color => self.buf.put_slice(&view.color),
                Channel::Depth => {
                    for d in &view.depth {
                        self.buf.put_f32_le(*d);
                    }
                }
                Channel::Instance => self.buf.put_slice(&view.instance),
                Channel::Semantic => self.buf.put_slice(&view.semantic),
            }
        }
    }

    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

// ---------------------------------------------------------------------------
// Segmentation colours
// ---------------------------------------------------------------------------

/// Stable colour for an identity (object id or object type).
pub fn identity_color(name: &str) -> [u8; 3] {
    let digest = md5::compute(name.as_bytes());
    let mut c = [digest[0], digest[1], digest[2]];
    // Pure black is the background.
    if c == [0, 0, 0] {
        c[0] = 1;
    }
    c
}

/// Bidirectional colour ↔ identity lookup built from response metadata.
#[derive(Debug, Clone, Default)]
pub struct ColorMap {
    color_to_name: HashMap<[u8; 3], String>,
    name_to_color: HashMap<String, [u8; 3]>,
}

impl ColorMap {
    pub fn from_assignments(assignments: &[ColorAssignment]) -> Self {
        let mut map = Self::default();
        for a in assignments {
            map.color_to_name.insert(a.color, a.name.clone());
            map.name_to_color.insert(a.name.clone(), a.color);
        }
        map
    }

    pub fn name(&self, color: [u8; 3]) -> Option<&str> {
        self.color_to_name.get(&color).map(String::as_str)
    }

    pub fn color(&self, name: &str) -> Option<[u8; 3]> {
        self.name_to_color.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.name_to_color.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name_to_color.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(channels: ChannelSet, agents: usize, cameras: usize) -> FrameLayout {
        FrameLayout {
            width: 2,
            height: 2,
            channels,
            agent_count: agents,
            camera_count: cameras,
        }
    }

    fn view(seed: u8) -> RawView {
        RawView {
            color: vec![seed; 12],
            depth: vec![seed as f32 * 0.5; 4],
            instance: vec![seed + 1; 12],
            semantic: vec![seed + 2; 12],
        }
    }

    #[test]
    fn splits_agents_then_cameras() {
        let l = layout(ChannelSet::all(), 2, 1);
        let mut b = FrameBufferBuilder::new(&l);
        for seed in [10, 20, 30] {
            b.push(&view(seed));
        }
        let buf = b.finish();
        assert_eq!(buf.len(), l.total_bytes());

        let out = demultiplex(&buf, &l).unwrap();
        assert_eq!(out.agents.len(), 2);
        assert_eq!(out.cameras.len(), 1);
        assert_eq!(out.agents[1].color.pixel(0, 0), Some([20, 20, 20]));
        assert_eq!(out.cameras[0].depth.as_ref().unwrap().at(1, 1), Some(15.0));
        assert_eq!(out.agents[0].semantic.as_ref().unwrap().pixel(1, 0), Some([12; 3]));
        assert_ne!(
            out.agents[0].color.data.as_ptr(),
            out.agents[1].color.data.as_ptr()
        );
    }

    #[test]
    fn disabled_channels_are_absent() {
        let l = layout(ChannelSet::default(), 1, 0);
        let mut b = FrameBufferBuilder::new(&l);
        b.push(&view(1));
        let out = demultiplex(&b.finish(), &l).unwrap();
        assert!(out.agents[0].depth.is_none());
        assert!(out.agents[0].instance.is_none());
        assert_eq!(out.agents[0].color.shape(), (2, 2, 3));
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let l = layout(ChannelSet::default(), 1, 0);
        let err = demultiplex(&Bytes::from_static(&[0; 5]), &l).unwrap_err();
        assert!(matches!(err, CodecError::FrameLayout { expected: 12, actual: 5 }));
    }

    #[test]
    fn identity_colors_are_stable() {
        assert_eq!(identity_color("Mug|1"), identity_color("Mug|1"));
        assert_ne!(identity_color("Mug|1"), identity_color("Mug|2"));
    }
}
