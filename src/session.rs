//! Per-connection launch request supplied by the streaming layer

use crate::app_context::{AppContext, FrameGenProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Audio channel layout requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AudioLayout {
    #[default]
    Stereo,
    Surround51,
    Surround71,
}

/// Launch request for one streaming connection.
///
/// The orchestrator writes the resolved display identity and the effective
/// frame-generation parameters back into the session while launching.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSession {
    /// Render width after the app's scale factor is applied
    pub width: u32,
    /// Render height after the app's scale factor is applied
    pub height: u32,
    /// Width the client asked for
    pub requested_width: u32,
    /// Height the client asked for
    pub requested_height: u32,
    pub fps: f64,
    pub enable_hdr: bool,
    pub surround: AudioLayout,
    pub host_audio: bool,
    pub client_uuid: Uuid,
    pub client_name: String,
    pub device_name: String,
    /// Client asked for a virtual display
    pub virtual_display: bool,
    /// Client-side scale factor in percent
    pub scale_factor: u32,

    // Filled in during launch
    pub virtual_display_guid: Option<Uuid>,
    pub display_device_id: Option<String>,
    pub display_name: Option<String>,
    pub frame_gen: Option<FrameGenParams>,
}

/// Session handle shared between the caller and the orchestrator.
pub type SharedSession = Arc<parking_lot::Mutex<LaunchSession>>;

impl LaunchSession {
    /// Create a session for a client asking for `width`x`height`@`fps`.
    pub fn new(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            requested_width: width,
            requested_height: height,
            fps,
            enable_hdr: false,
            surround: AudioLayout::default(),
            host_audio: false,
            client_uuid: Uuid::nil(),
            client_name: String::new(),
            device_name: String::new(),
            virtual_display: false,
            scale_factor: 100,
            virtual_display_guid: None,
            display_device_id: None,
            display_name: None,
            frame_gen: None,
        }
    }

    pub fn into_shared(self) -> SharedSession {
        Arc::new(parking_lot::Mutex::new(self))
    }

    /// Forget everything the orchestrator wrote during a launch.
    pub fn clear_launch_state(&mut self) {
        self.width = self.requested_width;
        self.height = self.requested_height;
        self.virtual_display_guid = None;
        self.display_device_id = None;
        self.display_name = None;
        self.frame_gen = None;
    }
}

/// Round to the nearest even integer.
fn round_even(value: f64) -> u32 {
    ((value / 2.0).round() * 2.0).max(2.0) as u32
}

/// Apply a scale factor (percent) to a resolution, keeping both sides even.
pub fn scale_resolution(width: u32, height: u32, scale_factor: u32) -> (u32, u32) {
    if scale_factor == 100 || scale_factor == 0 {
        return (width, height);
    }
    let factor = scale_factor as f64 / 100.0;
    (
        round_even(width as f64 * factor),
        round_even(height as f64 * factor),
    )
}

/// Frame-generation settings resolved for one launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameGenParams {
    pub provider: FrameGenProvider,
    pub capture_api: String,
    pub queue_target: u32,
    pub performance_mode: bool,
    pub hdr: bool,
    pub flow_scale: f64,
    pub resolution_scale: f64,
    pub scaling_mode: String,
    pub sharpening: u32,
    pub anime4k_type: String,
    pub anime4k_vrs: bool,
    pub target_fps: u32,
    pub capture_limiter: bool,
}

impl FrameGenParams {
    /// Resolve the app's frame-generation settings against a session.
    ///
    /// Returns `None` when the app has no provider selected. The target
    /// frame rate falls back to the client's requested rate and HDR follows
    /// the session.
    pub fn resolve(app: &AppContext, session: &LaunchSession) -> Option<Self> {
        let settings = &app.frame_gen;
        if settings.provider == FrameGenProvider::None {
            return None;
        }

        let target_fps = settings
            .target_fps
            .filter(|fps| *fps > 0)
            .unwrap_or_else(|| session.fps.round().max(1.0) as u32);

        Some(Self {
            provider: settings.provider,
            capture_api: settings.capture_api.clone(),
            queue_target: settings.queue_target,
            performance_mode: settings.performance_mode,
            hdr: session.enable_hdr,
            flow_scale: settings.flow_scale.clamp(0.25, 1.0),
            resolution_scale: settings.resolution_scale.clamp(0.25, 1.0),
            scaling_mode: settings.scaling_mode.clone(),
            sharpening: settings.sharpening.min(10),
            anime4k_type: settings.anime4k_type.clone(),
            anime4k_vrs: settings.anime4k_vrs,
            target_fps,
            capture_limiter: settings.capture_limiter,
        })
    }
}
