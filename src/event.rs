//! The client-side result of one step.
//!
//! An [`Event`] pairs the decoded metadata with the frame buffer split into
//! per-agent and per-third-party-camera frames.  The split layout is derived
//! from the metadata itself: screen size, enabled channels, agent count and
//! camera count.

use std::collections::HashMap;

use crate::cache::ObjectList;
use crate::error::CodecError;
use crate::frames::{demultiplex, ColorMap, DepthFrame, Demultiplexed, FrameLayout, FrameSet, RgbFrame};
use crate::protocol::{ErrorCode, Metadata, StepResponse};
use crate::types::ObjectMetadata;

#[derive(Debug, Clone)]
pub struct Event {
    pub metadata: Metadata,
    frames: Demultiplexed,
    colors: ColorMap,
}

impl Event {
    pub fn from_response(response: StepResponse) -> Result<Self, CodecError> {
        let m = &response.metadata;
        let layout = FrameLayout {
            width: m.screen_width,
            height: m.screen_height,
            channels: m.render_channels,
            agent_count: m.agents.len(),
            camera_count: m.third_party_cameras.len(),
        };
        let frames = demultiplex(&response.frame_buffer, &layout)?;
        let colors = ColorMap::from_assignments(&m.colors);
        Ok(Self {
            metadata: response.metadata,
            frames,
            colors,
        })
    }

    pub fn last_action_success(&self) -> bool {
        self.metadata.last_action_success
    }

    pub fn error_message(&self) -> &str {
        &self.metadata.error_message
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.metadata.error_code
    }

    pub fn action_return(&self) -> &serde_json::Value {
        &self.metadata.action_return
    }

    // -----------------------------------------------------------------------
    // Frames
    // -----------------------------------------------------------------------

    /// Frames of the agent that acted this step.
    fn acting(&self) -> Option<&FrameSet> {
        self.frames.agents.get(self.metadata.agent_id)
    }

    /// Colour frame of the acting agent.
    pub fn frame(&self) -> Option<&RgbFrame> {
        self.acting().map(|f| &f.color)
    }

    pub fn depth_frame(&self) -> Option<&DepthFrame> {
        self.acting().and_then(|f| f.depth.as_ref())
    }

    pub fn instance_segmentation_frame(&self) -> Option<&RgbFrame> {
        self.acting().and_then(|f| f.instance.as_ref())
    }

    pub fn semantic_segmentation_frame(&self) -> Option<&RgbFrame> {
        self.acting().and_then(|f| f.semantic.as_ref())
    }

    /// Frames of every agent, by agent id.
    pub fn agent_frames(&self) -> &[FrameSet] {
        &self.frames.agents
    }

    /// Frames of every third-party camera, by camera id.
    pub fn third_party_frames(&self) -> &[FrameSet] {
        &self.frames.cameras
    }

    pub fn third_party_camera_frames(&self) -> impl Iterator<Item = &RgbFrame> + '_ {
        self.frames.cameras.iter().map(|f| &f.color)
    }

    pub fn third_party_depth_frames(&self) -> impl Iterator<Item = Option<&DepthFrame>> + '_ {
        self.frames.cameras.iter().map(|f| f.depth.as_ref())
    }

    // -----------------------------------------------------------------------
    // Objects
    // -----------------------------------------------------------------------

    pub fn objects(&self) -> &ObjectList {
        &self.metadata.objects
    }

    pub fn get_object(&self, object_id: &str) -> Option<&ObjectMetadata> {
        self.metadata.object(object_id)
    }

    pub fn color_to_object_id(&self, color: [u8; 3]) -> Option<&str> {
        self.colors.name(color)
    }

    pub fn object_id_to_color(&self, object_id: &str) -> Option<[u8; 3]> {
        self.colors.color(object_id)
    }

    pub fn color_map(&self) -> &ColorMap {
        &self.colors
    }

    /// Per-object masks over the acting agent's instance segmentation, for
    /// every object that covers at least one pixel.
    pub fn instance_masks(&self) -> HashMap<String, Vec<bool>> {
        let Some(frame) = self.instance_segmentation_frame() else {
            return HashMap::new();
        };
        self.metadata
            .objects
            .iter()
            .filter_map(|o| {
                let color = self.colors.color(&o.object_id)?;
                let mask = frame.mask(color);
                mask.iter().any(|&hit| hit).then(|| (o.object_id.clone(), mask))
            })
            .collect()
    }
}
