//! Webcam overlay placement.
//!
//! Positions match the editor preview so exports are WYSIWYG: 16px margin
//! from the canvas edge, sizes relative to the output width.

use crate::project::{WebcamOverlayPosition, WebcamOverlayShape, WebcamSettings};

use super::types::{DecodedFrame, Rect, WebcamMask, WebcamOverlay};

/// Distance from the canvas edge for corner presets.
pub const MARGIN_PX: f32 = 16.0;

/// Resolve the webcam rectangle and mask in output pixels.
///
/// Circle and squircle overlays are square; rectangles keep the camera's
/// aspect ratio.
pub fn layout_webcam(
    settings: &WebcamSettings,
    out_w: u32,
    out_h: u32,
    cam_w: u32,
    cam_h: u32,
) -> (Rect, WebcamMask) {
    let (out_w, out_h) = (out_w as f32, out_h as f32);
    let width = out_w * settings.size.clamp(0.05, 1.0);

    let height = match settings.shape {
        WebcamOverlayShape::Circle | WebcamOverlayShape::Squircle => width,
        WebcamOverlayShape::Rectangle | WebcamOverlayShape::RoundedRectangle => {
            if cam_w == 0 || cam_h == 0 {
                width
            } else {
                width * cam_h as f32 / cam_w as f32
            }
        },
    };

    let (left, top) = match settings.position {
        WebcamOverlayPosition::TopLeft => (MARGIN_PX, MARGIN_PX),
        WebcamOverlayPosition::TopRight => (out_w - width - MARGIN_PX, MARGIN_PX),
        WebcamOverlayPosition::BottomLeft => (MARGIN_PX, out_h - height - MARGIN_PX),
        WebcamOverlayPosition::BottomRight => {
            (out_w - width - MARGIN_PX, out_h - height - MARGIN_PX)
        },
        WebcamOverlayPosition::Custom => (
            snap_axis(settings.custom_x, out_w, width),
            snap_axis(settings.custom_y, out_h, height),
        ),
    };

    let mask = match settings.shape {
        WebcamOverlayShape::Circle => WebcamMask::Circle,
        WebcamOverlayShape::Squircle => WebcamMask::Squircle,
        WebcamOverlayShape::Rectangle => WebcamMask::RoundedRect { radius: 0.0 },
        WebcamOverlayShape::RoundedRectangle => WebcamMask::RoundedRect {
            radius: settings.rounding.clamp(0.0, 100.0) / 100.0 * width.min(height) / 2.0,
        },
    };

    (Rect::new(left, top, width, height), mask)
}

/// Custom placement: values near an edge snap to the margin, others center
/// the overlay on the normalized position.
fn snap_axis(normalized: f32, extent: f32, size: f32) -> f32 {
    if normalized <= 0.1 {
        MARGIN_PX
    } else if normalized >= 0.9 {
        extent - size - MARGIN_PX
    } else {
        normalized * extent - size / 2.0
    }
}

/// Build the overlay for one frame, or `None` when hidden at `timestamp_ms`.
pub fn build_webcam_overlay(
    settings: &WebcamSettings,
    frame: DecodedFrame,
    out_w: u32,
    out_h: u32,
    timestamp_ms: u64,
) -> Option<WebcamOverlay> {
    if !settings.is_visible_at(timestamp_ms) {
        return None;
    }
    let (rect, mask) = layout_webcam(settings, out_w, out_h, frame.width, frame.height);
    Some(WebcamOverlay {
        frame,
        rect,
        mask,
        mirror: settings.mirror,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::VisibilitySegment;

    #[test]
    fn test_bottom_right_circle() {
        let settings = WebcamSettings::default();
        let (rect, mask) = layout_webcam(&settings, 1000, 600, 640, 480);
        assert_eq!(mask, WebcamMask::Circle);
        assert_eq!(rect, Rect::new(784.0, 384.0, 200.0, 200.0));
    }

    #[test]
    fn test_rectangle_keeps_camera_aspect() {
        let settings = WebcamSettings {
            position: WebcamOverlayPosition::TopLeft,
            shape: WebcamOverlayShape::Rectangle,
            ..Default::default()
        };
        let (rect, mask) = layout_webcam(&settings, 1000, 600, 640, 480);
        assert_eq!(rect, Rect::new(16.0, 16.0, 200.0, 150.0));
        assert_eq!(mask, WebcamMask::RoundedRect { radius: 0.0 });
    }

    #[test]
    fn test_rounded_rectangle_radius() {
        let settings = WebcamSettings {
            shape: WebcamOverlayShape::RoundedRectangle,
            rounding: 50.0,
            ..Default::default()
        };
        let (rect, mask) = layout_webcam(&settings, 1000, 600, 400, 400);
        assert_eq!(rect.width, 200.0);
        assert_eq!(mask, WebcamMask::RoundedRect { radius: 50.0 });
    }

    #[test]
    fn test_custom_position_snaps_near_edges() {
        let mut settings = WebcamSettings {
            position: WebcamOverlayPosition::Custom,
            custom_x: 0.05,
            custom_y: 0.5,
            ..Default::default()
        };
        let (rect, _) = layout_webcam(&settings, 1000, 1000, 100, 100);
        assert_eq!(rect.x, MARGIN_PX);
        assert_eq!(rect.y, 400.0);

        settings.custom_x = 0.95;
        let (rect, _) = layout_webcam(&settings, 1000, 1000, 100, 100);
        assert_eq!(rect.x, 1000.0 - 200.0 - MARGIN_PX);
    }

    #[test]
    fn test_hidden_segment_skips_overlay() {
        let settings = WebcamSettings {
            visibility_segments: vec![VisibilitySegment {
                start_ms: 1000,
                end_ms: 2000,
                visible: false,
            }],
            ..Default::default()
        };
        let frame = DecodedFrame::solid(4, 4, [0, 0, 0, 255]);
        assert!(build_webcam_overlay(&settings, frame.clone(), 100, 100, 1500).is_none());

        let overlay = build_webcam_overlay(&settings, frame, 100, 100, 2500).unwrap();
        assert_eq!(overlay.rect.width, 20.0);
        assert!(!overlay.mirror);
    }
}
