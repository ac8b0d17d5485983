//! Project description consumed by the editor core.
//!
//! A `VideoProject` is produced by the project layer with fully resolved
//! paths and is never mutated here.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ============================================================================
// Video Project
// ============================================================================

/// Everything an editor instance needs to render a recording.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct VideoProject {
    /// Unique project identifier.
    pub id: String,
    /// Project name (usually derived from filename).
    pub name: String,
    /// Source files for this project.
    pub sources: VideoSources,
    /// Authored duration in milliseconds. Export renders exactly this span.
    #[ts(type = "number")]
    pub duration_ms: u64,
    /// Authored frame rate.
    pub fps: u32,
    /// Background, frame styling and overlay settings.
    #[serde(default)]
    pub compositor: CompositorSettings,
}

/// Source files for a video project.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct VideoSources {
    /// Path to main screen recording.
    pub screen_video: String,
    /// Path to separate webcam recording (optional).
    #[serde(default)]
    pub webcam_video: Option<String>,
    /// Path to cursor events JSON file.
    #[serde(default)]
    pub cursor_data: Option<String>,
    /// Audio tracks handed to the encoder untouched.
    #[serde(default)]
    pub audio_tracks: Vec<String>,
}

// ============================================================================
// Compositor Settings
// ============================================================================

/// Per-project compositing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct CompositorSettings {
    pub background: BackgroundSettings,
    /// Space around the content on every side, in output pixels.
    pub padding: u32,
    /// Corner radius of the content frame, in output pixels.
    pub corner_radius: f32,
    pub corner_style: CornerStyle,
    pub shadow: FrameShadow,
    /// Content size relative to the source frame (0.1-4.0).
    pub content_scale: f32,
    pub webcam: WebcamSettings,
    pub cursor: CursorStyle,
}

impl Default for CompositorSettings {
    fn default() -> Self {
        Self {
            background: BackgroundSettings::default(),
            padding: 0,
            corner_radius: 0.0,
            corner_style: CornerStyle::Rounded,
            shadow: FrameShadow::default(),
            content_scale: 1.0,
            webcam: WebcamSettings::default(),
            cursor: CursorStyle::default(),
        }
    }
}

impl CompositorSettings {
    /// Size of the scaled content area for a source of the given size.
    pub fn content_size(&self, source_width: u32, source_height: u32) -> (u32, u32) {
        let scale = self.content_scale.clamp(0.1, 4.0);
        let w = ((source_width as f32 * scale).round() as u32).max(1);
        let h = ((source_height as f32 * scale).round() as u32).max(1);
        (w, h)
    }

    /// Output size: content plus padding on every side.
    pub fn output_size(&self, source_width: u32, source_height: u32) -> (u32, u32) {
        let (w, h) = self.content_size(source_width, source_height);
        (w + 2 * self.padding, h + 2 * self.padding)
    }
}

/// Canvas fill behind the content frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", rename_all = "camelCase")]
#[ts(export)]
pub enum BackgroundSettings {
    /// Solid color (hex, e.g. "#1e1e2e").
    Solid { color: String },
    /// Linear gradient. `angle` in degrees, CSS convention (0 = bottom to top).
    Gradient { angle: f32, stops: Vec<GradientStop> },
    /// Image scaled to cover the canvas.
    Image { path: String },
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self::Solid {
            color: "#000000".to_string(),
        }
    }
}

/// One gradient color stop. `position` is a percentage (0-100).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct GradientStop {
    pub position: f32,
    pub color: String,
}

impl GradientStop {
    pub fn new(position: f32, color: impl Into<String>) -> Self {
        Self {
            position,
            color: color.into(),
        }
    }
}

/// Corner style for rounded shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum CornerStyle {
    /// Standard circular border-radius corners.
    #[default]
    Rounded,
    /// iOS-style superellipse corners.
    Squircle,
}

/// Drop shadow under the content frame.
///
/// `intensity` (0-100) scales blur, offset and opacity together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct FrameShadow {
    pub enabled: bool,
    pub intensity: f32,
    /// Blur radius at full intensity, in pixels.
    pub blur: f32,
    /// Vertical offset at full intensity, in pixels.
    pub offset_y: f32,
    /// Opacity at full intensity (0-100).
    pub opacity: f32,
}

impl Default for FrameShadow {
    fn default() -> Self {
        Self {
            enabled: false,
            intensity: 70.0,
            blur: 24.0,
            offset_y: 8.0,
            opacity: 60.0,
        }
    }
}

impl FrameShadow {
    /// (blur, offset_y, opacity 0-1) after applying intensity.
    pub fn effective(&self) -> (f32, f32, f32) {
        if !self.enabled {
            return (0.0, 0.0, 0.0);
        }
        let k = (self.intensity / 100.0).clamp(0.0, 1.0);
        (
            self.blur.max(0.0) * k,
            self.offset_y * k,
            (self.opacity / 100.0).clamp(0.0, 1.0) * k,
        )
    }
}

// ============================================================================
// Webcam Settings
// ============================================================================

/// Webcam overlay configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct WebcamSettings {
    /// Show webcam in output video.
    pub enabled: bool,
    /// Position preset.
    pub position: WebcamOverlayPosition,
    /// Custom center position (used when position is Custom), normalized 0-1.
    pub custom_x: f32,
    pub custom_y: f32,
    /// Width as a fraction of output width (e.g., 0.2 = 20%).
    pub size: f32,
    pub shape: WebcamOverlayShape,
    /// Corner rounding percentage (0-100) for rounded rectangles.
    pub rounding: f32,
    /// Mirror horizontally.
    pub mirror: bool,
    /// Visibility segments (for toggling on/off during video).
    pub visibility_segments: Vec<VisibilitySegment>,
}

impl Default for WebcamSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            position: WebcamOverlayPosition::BottomRight,
            custom_x: 0.95,
            custom_y: 0.95,
            size: 0.2,
            shape: WebcamOverlayShape::Circle,
            rounding: 30.0,
            mirror: false,
            visibility_segments: Vec::new(),
        }
    }
}

/// Webcam overlay position preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum WebcamOverlayPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    /// Custom position using custom_x and custom_y.
    Custom,
}

/// Webcam overlay shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum WebcamOverlayShape {
    Circle,
    Squircle,
    Rectangle,
    RoundedRectangle,
}

/// A segment defining visibility state over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct VisibilitySegment {
    #[ts(type = "number")]
    pub start_ms: u64,
    #[ts(type = "number")]
    pub end_ms: u64,
    pub visible: bool,
}

impl WebcamSettings {
    /// Whether the webcam is shown at `timestamp_ms`.
    ///
    /// Segments override the default in list order; the last matching
    /// segment wins.
    pub fn is_visible_at(&self, timestamp_ms: u64) -> bool {
        if !self.enabled {
            return false;
        }
        self.visibility_segments
            .iter()
            .filter(|s| timestamp_ms >= s.start_ms && timestamp_ms < s.end_ms)
            .last()
            .map(|s| s.visible)
            .unwrap_or(true)
    }
}

// ============================================================================
// Cursor Marker
// ============================================================================

/// Cursor marker rendering configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct CursorStyle {
    /// Show cursor marker in output video.
    pub visible: bool,
    /// Scale factor (1.0 = 12px radius).
    pub scale: f32,
    /// Fill color (hex).
    pub color: String,
    /// Ring color (hex).
    pub border_color: String,
    /// Interpolate between move events instead of holding the last one.
    pub smooth_movement: bool,
    pub click_highlight: ClickHighlightConfig,
}

impl Default for CursorStyle {
    fn default() -> Self {
        Self {
            visible: true,
            scale: 1.0,
            color: "#ffffff".to_string(),
            border_color: "#000000".to_string(),
            smooth_movement: true,
            click_highlight: ClickHighlightConfig::default(),
        }
    }
}

/// Click highlight animation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase", default)]
#[ts(export)]
pub struct ClickHighlightConfig {
    pub enabled: bool,
    /// Highlight color (hex).
    pub color: String,
    /// Final ring radius in pixels.
    pub radius: f32,
    /// Animation duration in milliseconds.
    pub duration_ms: u32,
}

impl Default for ClickHighlightConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            color: "#FF6B6B".to_string(),
            radius: 30.0,
            duration_ms: 400,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_size_adds_padding() {
        let settings = CompositorSettings {
            padding: 40,
            ..Default::default()
        };
        assert_eq!(settings.output_size(1920, 1080), (2000, 1160));

        let scaled = CompositorSettings {
            padding: 10,
            content_scale: 0.5,
            ..Default::default()
        };
        assert_eq!(scaled.content_size(1920, 1080), (960, 540));
        assert_eq!(scaled.output_size(1920, 1080), (980, 560));
    }

    #[test]
    fn test_shadow_intensity_scales_all_params() {
        let shadow = FrameShadow {
            enabled: true,
            intensity: 50.0,
            blur: 20.0,
            offset_y: 10.0,
            opacity: 80.0,
        };
        let (blur, offset, opacity) = shadow.effective();
        assert!((blur - 10.0).abs() < 1e-5);
        assert!((offset - 5.0).abs() < 1e-5);
        assert!((opacity - 0.4).abs() < 1e-5);

        let disabled = FrameShadow {
            enabled: false,
            ..shadow
        };
        assert_eq!(disabled.effective(), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_webcam_visibility_segments() {
        let mut webcam = WebcamSettings::default();
        assert!(webcam.is_visible_at(0));

        webcam.visibility_segments = vec![
            VisibilitySegment {
                start_ms: 1000,
                end_ms: 2000,
                visible: false,
            },
            VisibilitySegment {
                start_ms: 1500,
                end_ms: 1600,
                visible: true,
            },
        ];
        assert!(webcam.is_visible_at(999));
        assert!(!webcam.is_visible_at(1000));
        assert!(webcam.is_visible_at(1550));
        assert!(webcam.is_visible_at(2000));

        webcam.enabled = false;
        assert!(!webcam.is_visible_at(0));
    }

    #[test]
    fn test_background_json_shape() {
        let json = r##"{
            "type": "gradient",
            "angle": 90,
            "stops": [{"position": 0, "color": "#000000"}, {"position": 100, "color": "#ffffff"}]
        }"##;
        let bg: BackgroundSettings = serde_json::from_str(json).unwrap();
        match bg {
            BackgroundSettings::Gradient { angle, stops } => {
                assert_eq!(angle, 90.0);
                assert_eq!(stops.len(), 2);
                assert_eq!(stops[1].color, "#ffffff");
            },
            other => panic!("unexpected background {:?}", other),
        }
    }

    #[test]
    fn test_project_defaults_fill_missing_settings() {
        let json = r#"{
            "id": "p1",
            "name": "demo",
            "sources": {"screenVideo": "/tmp/screen.mp4"},
            "durationMs": 5000,
            "fps": 30
        }"#;
        let project: VideoProject = serde_json::from_str(json).unwrap();
        assert_eq!(project.compositor, CompositorSettings::default());
        assert!(project.sources.webcam_video.is_none());
        assert!(project.sources.audio_tracks.is_empty());
    }
}
