//! Core types shared by the decode, composite and export stages.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Opaque editor instance identifier (UUID v4 string).
pub type InstanceId = String;

/// Opaque export job identifier.
pub type JobId = String;

/// A decoded video frame ready for GPU upload.
///
/// Pixel data is shared so the cache, the compositor and export can hold
/// the same frame without copying.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Frame index in the stream (0-indexed).
    pub frame_index: u64,
    /// Presentation timestamp in milliseconds.
    pub timestamp_ms: u64,
    /// RGBA pixel data (width * height * 4 bytes).
    pub data: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    /// Wall time spent decoding this frame.
    pub decode_cost: Duration,
}

impl DecodedFrame {
    pub fn new(frame_index: u64, timestamp_ms: u64, data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            frame_index,
            timestamp_ms,
            data: data.into(),
            width,
            height,
            decode_cost: Duration::ZERO,
        }
    }

    /// Create a solid color frame.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let data = rgba
            .iter()
            .copied()
            .cycle()
            .take((width * height * 4) as usize)
            .collect::<Vec<u8>>();
        Self::new(0, 0, data, width, height)
    }

    /// Expected byte length for the frame dimensions.
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// Axis-aligned rectangle in output pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width * 0.5, self.y + self.height * 0.5)
    }

    pub fn half_size(&self) -> (f32, f32) {
        (self.width * 0.5, self.height * 0.5)
    }

    pub fn as_array(&self) -> [f32; 4] {
        [self.x, self.y, self.width, self.height]
    }
}

/// Mask applied to the webcam overlay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WebcamMask {
    Circle,
    /// Superellipse with power 4.
    Squircle,
    /// Rectangle with corner radius in pixels (0 = sharp).
    RoundedRect { radius: f32 },
}

/// Webcam overlay resolved for one output frame.
#[derive(Debug, Clone)]
pub struct WebcamOverlay {
    pub frame: DecodedFrame,
    /// Placement in output pixels.
    pub rect: Rect,
    pub mask: WebcamMask,
    pub mirror: bool,
}

/// Cursor marker resolved for one output frame (output pixel space).
#[derive(Debug, Clone)]
pub struct CursorOverlay {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    /// Fill color, gamma-encoded RGBA 0-1.
    pub color: [f32; 4],
    pub border_color: [f32; 4],
    pub click: Option<ClickPulse>,
}

/// Expanding ring drawn after a mouse press.
#[derive(Debug, Clone)]
pub struct ClickPulse {
    pub x: f32,
    pub y: f32,
    /// Animation progress (0.0-1.0).
    pub progress: f32,
    pub color: [f32; 4],
    /// Ring radius at progress 1.0.
    pub radius: f32,
}

/// Overlays drawn above the base frame, in z-order.
#[derive(Debug, Clone, Default)]
pub struct FrameOverlays {
    pub webcam: Option<WebcamOverlay>,
    pub cursor: Option<CursorOverlay>,
}

/// Output of one composite, already copied back to CPU memory.
#[derive(Debug, Clone)]
pub struct CompositeOutput {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// Playback state for the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum PlaybackState {
    /// Freshly created or stopped.
    #[default]
    Idle,
    Playing,
    Paused,
    /// Waiting for the first frame after a seek.
    Seeking,
}

/// Event emitted by the playback clock.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PlaybackEvent {
    /// Current frame number.
    pub frame: u32,
    /// Current timestamp in milliseconds.
    #[ts(type = "number")]
    pub timestamp_ms: u64,
    pub state: PlaybackState,
}

/// A composited frame owned by the caller. No GPU handles escape.
#[derive(Debug, Clone)]
pub struct RenderedFrame {
    /// Timestamp of the base frame actually used.
    pub timestamp_ms: u64,
    /// Timestamp the caller asked for.
    pub requested_ms: u64,
    pub width: u32,
    pub height: u32,
    /// RGBA8 pixels, row-major, no padding.
    pub data: Vec<u8>,
}

impl RenderedFrame {
    /// Base64 payload for webview upload.
    pub fn to_payload(&self) -> RenderedFramePayload {
        RenderedFramePayload {
            timestamp_ms: self.timestamp_ms,
            requested_ms: self.requested_ms,
            data_base64: base64::engine::general_purpose::STANDARD.encode(&self.data),
            width: self.width,
            height: self.height,
        }
    }
}

/// Rendered frame as sent over IPC.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct RenderedFramePayload {
    #[ts(type = "number")]
    pub timestamp_ms: u64,
    #[ts(type = "number")]
    pub requested_ms: u64,
    /// RGBA pixel data as base64 (for WebGL upload).
    pub data_base64: String,
    pub width: u32,
    pub height: u32,
}

/// Result of creating an editor instance.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct EditorInstanceInfo {
    /// Instance ID for future commands.
    pub instance_id: String,
    /// Source video width.
    pub width: u32,
    /// Source video height.
    pub height: u32,
    /// Composited output width.
    pub output_width: u32,
    /// Composited output height.
    pub output_height: u32,
    /// Duration in milliseconds.
    #[ts(type = "number")]
    pub duration_ms: u64,
    /// Frame rate.
    pub fps: u32,
    /// Total frame count.
    pub frame_count: u32,
    /// Whether webcam track exists.
    pub has_webcam: bool,
    /// Whether cursor data exists.
    pub has_cursor: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_frame_len() {
        let frame = DecodedFrame::solid(4, 3, [1, 2, 3, 255]);
        assert_eq!(frame.data.len(), frame.expected_len());
        assert_eq!(&frame.data[4..8], &[1, 2, 3, 255]);
    }

    #[test]
    fn test_payload_base64() {
        let frame = RenderedFrame {
            timestamp_ms: 33,
            requested_ms: 40,
            width: 1,
            height: 1,
            data: vec![255, 0, 0, 255],
        };
        let payload = frame.to_payload();
        assert_eq!(payload.data_base64, "/wAA/w==");

        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("\"requestedMs\":40"));
        assert!(json.contains("dataBase64"));
    }

    #[test]
    fn test_rect_helpers() {
        let rect = Rect::new(10.0, 20.0, 100.0, 50.0);
        assert_eq!(rect.center(), (60.0, 45.0));
        assert_eq!(rect.half_size(), (50.0, 25.0));
    }
}
