//! Shading math shared by the wgpu shaders and the software compositor.
//!
//! Every function here has a WGSL twin in `compositor.rs` or `shaders/`.
//! Colors are gamma-encoded RGBA in 0-1, matching how the editor preview
//! renders CSS gradients.

use crate::project::GradientStop;

use super::types::WebcamMask;

/// Maximum gradient stops the GPU uniform block can carry.
pub const MAX_GRADIENT_STOPS: usize = 8;

/// Parse "#rgb", "#rrggbb" or "#rrggbbaa". Invalid input yields opaque black.
pub fn parse_hex_color(hex: &str) -> [f32; 4] {
    let hex = hex.trim().trim_start_matches('#');
    let expanded: String = if hex.len() == 3 {
        hex.chars().flat_map(|c| [c, c]).collect()
    } else {
        hex.to_string()
    };

    let channel = |i: usize| -> Option<u8> {
        expanded
            .get(i..i + 2)
            .and_then(|s| u8::from_str_radix(s, 16).ok())
    };

    match (channel(0), channel(2), channel(4)) {
        (Some(r), Some(g), Some(b)) => {
            let a = if expanded.len() >= 8 {
                channel(6).unwrap_or(255)
            } else {
                255
            };
            [
                r as f32 / 255.0,
                g as f32 / 255.0,
                b as f32 / 255.0,
                a as f32 / 255.0,
            ]
        },
        _ => {
            log::warn!("[SHADING] Invalid color '{}', using black", hex);
            [0.0, 0.0, 0.0, 1.0]
        },
    }
}

pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

pub fn mix(a: [f32; 4], b: [f32; 4], t: f32) -> [f32; 4] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
        a[3] + (b[3] - a[3]) * t,
    ]
}

// ============================================================================
// Gradient
// ============================================================================

/// Gradient direction for a CSS-style angle in degrees.
///
/// The angle is rotated by 270 degrees so that 0 runs bottom to top in the
/// y-down output space.
pub fn gradient_direction(angle_deg: f32) -> (f32, f32) {
    let rad = (angle_deg + 270.0).to_radians();
    (rad.cos(), rad.sin())
}

/// Projection of pixel `(px, py)` onto the gradient line, clamped to [0, 1].
///
/// The gradient line spans the canvas corner to corner along `dir`, so the
/// canvas center always maps to 0.5.
pub fn gradient_t(px: f32, py: f32, width: f32, height: f32, dir: (f32, f32)) -> f32 {
    let span = (width * dir.0).abs() + (height * dir.1).abs();
    if span <= f32::EPSILON {
        return 0.5;
    }
    let dx = px - width * 0.5;
    let dy = py - height * 0.5;
    ((dx * dir.0 + dy * dir.1) / span + 0.5).clamp(0.0, 1.0)
}

/// Gradient stops normalized for evaluation: positions in 0-1, ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedGradient {
    pub direction: (f32, f32),
    pub positions: Vec<f32>,
    pub colors: Vec<[f32; 4]>,
}

impl PreparedGradient {
    pub fn new(angle_deg: f32, stops: &[GradientStop]) -> Self {
        let mut parsed: Vec<(f32, [f32; 4])> = stops
            .iter()
            .map(|s| ((s.position / 100.0).clamp(0.0, 1.0), parse_hex_color(&s.color)))
            .collect();
        parsed.sort_by(|a, b| a.0.total_cmp(&b.0));

        if parsed.len() > MAX_GRADIENT_STOPS {
            log::warn!(
                "[SHADING] Gradient has {} stops, keeping the first {}",
                parsed.len(),
                MAX_GRADIENT_STOPS
            );
            parsed.truncate(MAX_GRADIENT_STOPS);
        }
        if parsed.is_empty() {
            parsed.push((0.0, [0.0, 0.0, 0.0, 1.0]));
        }

        Self {
            direction: gradient_direction(angle_deg),
            positions: parsed.iter().map(|(p, _)| *p).collect(),
            colors: parsed.iter().map(|(_, c)| *c).collect(),
        }
    }

    /// Single-stop gradient, i.e. a solid fill.
    pub fn solid(color: [f32; 4]) -> Self {
        Self {
            direction: gradient_direction(0.0),
            positions: vec![0.0],
            colors: vec![color],
        }
    }

    /// Color at gradient parameter `t` (linear between neighbouring stops).
    pub fn sample(&self, t: f32) -> [f32; 4] {
        let first = self.positions[0];
        if t <= first {
            return self.colors[0];
        }
        for i in 1..self.positions.len() {
            let (p0, p1) = (self.positions[i - 1], self.positions[i]);
            if t <= p1 {
                let span = (p1 - p0).max(1e-6);
                return mix(self.colors[i - 1], self.colors[i], (t - p0) / span);
            }
        }
        self.colors[self.colors.len() - 1]
    }

    pub fn color_at(&self, px: f32, py: f32, width: f32, height: f32) -> [f32; 4] {
        self.sample(gradient_t(px, py, width, height, self.direction))
    }
}

// ============================================================================
// Image fitting
// ============================================================================

/// "Cover" crop: the sub-rectangle of the image, in UV space, that fills
/// the target while preserving aspect ratio. Returns `[u0, v0, u_span, v_span]`.
pub fn cover_crop(target_w: f32, target_h: f32, image_w: f32, image_h: f32) -> [f32; 4] {
    if target_w <= 0.0 || target_h <= 0.0 || image_w <= 0.0 || image_h <= 0.0 {
        return [0.0, 0.0, 1.0, 1.0];
    }
    let target_aspect = target_w / target_h;
    let image_aspect = image_w / image_h;
    if image_aspect > target_aspect {
        // Image wider than target: crop left and right.
        let span = target_aspect / image_aspect;
        [(1.0 - span) * 0.5, 0.0, span, 1.0]
    } else {
        let span = image_aspect / target_aspect;
        [0.0, (1.0 - span) * 0.5, 1.0, span]
    }
}

// ============================================================================
// Signed distance fields
// ============================================================================

fn superellipse_norm(x: f32, y: f32, power: f32) -> f32 {
    (x.abs().powf(power) + y.abs().powf(power)).powf(1.0 / power)
}

/// Rounded rectangle SDF centered at the origin.
pub fn sdf_rounded_rect(px: f32, py: f32, half_w: f32, half_h: f32, radius: f32, squircle: bool) -> f32 {
    let radius = radius.clamp(0.0, half_w.min(half_h));
    let qx = px.abs() - half_w + radius;
    let qy = py.abs() - half_h + radius;
    let ox = qx.max(0.0);
    let oy = qy.max(0.0);
    let outside = if squircle {
        superellipse_norm(ox, oy, 4.0)
    } else {
        (ox * ox + oy * oy).sqrt()
    };
    outside + qx.max(qy).min(0.0) - radius
}

/// Webcam mask SDF in pixels, centered at the origin.
pub fn sdf_webcam(px: f32, py: f32, half_w: f32, half_h: f32, mask: WebcamMask) -> f32 {
    let r = half_w.min(half_h).max(1e-3);
    match mask {
        WebcamMask::Circle => (px * px + py * py).sqrt() - r,
        WebcamMask::Squircle => (superellipse_norm(px / r, py / r, 4.0) - 1.0) * r,
        WebcamMask::RoundedRect { radius } => sdf_rounded_rect(px, py, half_w, half_h, radius, false),
    }
}

/// Anti-aliased coverage for a signed distance (1px edge).
pub fn coverage(dist: f32) -> f32 {
    (0.5 - dist).clamp(0.0, 1.0)
}

/// Drop shadow alpha for a distance to the shadow-casting shape.
pub fn shadow_alpha(dist: f32, blur: f32) -> f32 {
    if blur < 0.5 {
        coverage(dist)
    } else {
        1.0 - smoothstep(-blur, blur, dist)
    }
}

/// Ring alpha: distance to a circle outline of radius `r` and width `w`.
pub fn ring_coverage(dist_to_center: f32, r: f32, w: f32) -> f32 {
    coverage((dist_to_center - r).abs() - w * 0.5)
}
