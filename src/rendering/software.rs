//! CPU compositor.
//!
//! Runs the same stages as the wgpu pipeline (background, shadow, content,
//! webcam, click pulse, cursor) with the math from [`super::shading`], one
//! pixel center at a time. Used when no GPU is available and by tests.

use std::num::NonZeroUsize;
use std::sync::Arc;

use image::RgbaImage;
use lru::LruCache;

use crate::config::RenderBackend;
use crate::project::{CompositorSettings, CornerStyle};

use super::background::Background;
use super::compositor::{validate_frame, FrameCompositor, FrameLayout, RenderError};
use super::shading::{
    cover_crop, coverage, ring_coverage, sdf_rounded_rect, sdf_webcam, shadow_alpha,
    PreparedGradient,
};
use super::types::{CompositeOutput, DecodedFrame, FrameOverlays};

const IMAGE_CACHE_SIZE: usize = 4;

/// Premultiplied RGBA accumulator.
type Pixel = [f32; 4];

/// Premultiplied "over" of a straight-alpha color.
#[inline]
fn over(dst: Pixel, rgb: [f32; 3], a: f32) -> Pixel {
    let inv = 1.0 - a;
    [
        rgb[0] * a + dst[0] * inv,
        rgb[1] * a + dst[1] * inv,
        rgb[2] * a + dst[2] * inv,
        a + dst[3] * inv,
    ]
}

/// Bilinear sample with clamp-to-edge, matching a linear wgpu sampler.
fn sample_bilinear(data: &[u8], width: u32, height: u32, u: f32, v: f32) -> Pixel {
    let x = (u * width as f32 - 0.5).clamp(0.0, (width - 1) as f32);
    let y = (v * height as f32 - 0.5).clamp(0.0, (height - 1) as f32);
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let texel = |tx: u32, ty: u32, c: usize| -> f32 {
        data[((ty * width + tx) * 4) as usize + c] as f32 / 255.0
    };

    let mut out = [0.0; 4];
    for (c, slot) in out.iter_mut().enumerate() {
        let top = texel(x0, y0, c) * (1.0 - fx) + texel(x1, y0, c) * fx;
        let bottom = texel(x0, y1, c) * (1.0 - fx) + texel(x1, y1, c) * fx;
        *slot = top * (1.0 - fy) + bottom * fy;
    }
    out
}

fn to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

enum ResolvedBackground {
    Gradient(PreparedGradient),
    Image {
        image: Arc<RgbaImage>,
        crop: [f32; 4],
    },
}

/// CPU implementation of [`FrameCompositor`].
pub struct SoftwareCompositor {
    images: LruCache<String, Arc<RgbaImage>>,
}

impl Default for SoftwareCompositor {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareCompositor {
    pub fn new() -> Self {
        let capacity = NonZeroUsize::new(IMAGE_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            images: LruCache::new(capacity),
        }
    }

    fn load_image(&mut self, path: &str) -> Option<Arc<RgbaImage>> {
        if let Some(img) = self.images.get(path) {
            return Some(Arc::clone(img));
        }
        match image::open(path) {
            Ok(img) => {
                let img = Arc::new(img.to_rgba8());
                self.images.put(path.to_string(), Arc::clone(&img));
                Some(img)
            },
            Err(err) => {
                log::warn!(
                    "[COMPOSITOR] Failed to load background image '{}': {}. Falling back to black.",
                    path,
                    err
                );
                None
            },
        }
    }

    fn resolve_background(
        &mut self,
        background: Background,
        width: u32,
        height: u32,
    ) -> ResolvedBackground {
        match background {
            Background::Gradient(gradient) => ResolvedBackground::Gradient(gradient),
            Background::Image { path } => match self.load_image(&path) {
                Some(image) if image.width() > 0 && image.height() > 0 => {
                    let crop = cover_crop(
                        width as f32,
                        height as f32,
                        image.width() as f32,
                        image.height() as f32,
                    );
                    ResolvedBackground::Image { image, crop }
                },
                _ => ResolvedBackground::Gradient(PreparedGradient::solid([0.0, 0.0, 0.0, 1.0])),
            },
        }
    }
}

impl FrameCompositor for SoftwareCompositor {
    fn backend(&self) -> RenderBackend {
        RenderBackend::Software
    }

    fn render(
        &mut self,
        frame: &DecodedFrame,
        overlays: &FrameOverlays,
        settings: &CompositorSettings,
    ) -> Result<CompositeOutput, RenderError> {
        validate_frame(frame, "Base")?;
        if let Some(webcam) = &overlays.webcam {
            validate_frame(&webcam.frame, "Webcam")?;
        }

        let layout = FrameLayout::new(settings, frame.width, frame.height);
        let (out_w, out_h) = (layout.output_width, layout.output_height);
        let background = self.resolve_background(
            Background::from_settings(&settings.background),
            out_w,
            out_h,
        );

        let content = layout.content;
        let (content_cx, content_cy) = content.center();
        let (half_w, half_h) = content.half_size();
        let radius = settings.corner_radius.max(0.0);
        let squircle = settings.corner_style == CornerStyle::Squircle;
        let (blur, offset_y, shadow_opacity) = settings.shadow.effective();

        let webcam = overlays.webcam.as_ref().map(|cam| {
            let crop = cover_crop(
                cam.rect.width,
                cam.rect.height,
                cam.frame.width as f32,
                cam.frame.height as f32,
            );
            (cam, crop)
        });

        let mut data = Vec::with_capacity(out_w as usize * out_h as usize * 4);
        for y in 0..out_h {
            for x in 0..out_w {
                let px = x as f32 + 0.5;
                let py = y as f32 + 0.5;

                let bg = match &background {
                    ResolvedBackground::Gradient(gradient) => {
                        gradient.color_at(px, py, out_w as f32, out_h as f32)
                    },
                    ResolvedBackground::Image { image, crop } => {
                        let u = crop[0] + px / out_w as f32 * crop[2];
                        let v = crop[1] + py / out_h as f32 * crop[3];
                        let c = sample_bilinear(image.as_raw(), image.width(), image.height(), u, v);
                        [c[0], c[1], c[2], 1.0]
                    },
                };
                let mut color = [bg[0] * bg[3], bg[1] * bg[3], bg[2] * bg[3], bg[3]];

                if shadow_opacity > 0.0 {
                    let d = sdf_rounded_rect(
                        px - content_cx,
                        py - (content_cy + offset_y),
                        half_w,
                        half_h,
                        radius,
                        squircle,
                    );
                    color = over(color, [0.0, 0.0, 0.0], shadow_alpha(d, blur) * shadow_opacity);
                }

                let frame_cov = coverage(sdf_rounded_rect(
                    px - content_cx,
                    py - content_cy,
                    half_w,
                    half_h,
                    radius,
                    squircle,
                ));
                if frame_cov > 0.0 {
                    let u = ((px - content.x) / content.width).clamp(0.0, 1.0);
                    let v = ((py - content.y) / content.height).clamp(0.0, 1.0);
                    let c = sample_bilinear(&frame.data, frame.width, frame.height, u, v);
                    color = over(color, [c[0], c[1], c[2]], c[3] * frame_cov);
                }

                if let Some((cam, crop)) = &webcam {
                    let (cx, cy) = cam.rect.center();
                    let (hw, hh) = cam.rect.half_size();
                    let cam_cov = coverage(sdf_webcam(px - cx, py - cy, hw, hh, cam.mask));
                    if cam_cov > 0.0 {
                        let mut lu = ((px - cam.rect.x) / cam.rect.width).clamp(0.0, 1.0);
                        let lv = ((py - cam.rect.y) / cam.rect.height).clamp(0.0, 1.0);
                        if cam.mirror {
                            lu = 1.0 - lu;
                        }
                        let c = sample_bilinear(
                            &cam.frame.data,
                            cam.frame.width,
                            cam.frame.height,
                            crop[0] + lu * crop[2],
                            crop[1] + lv * crop[3],
                        );
                        color = over(color, [c[0], c[1], c[2]], c[3] * cam_cov);
                    }
                }

                if let Some(cursor) = &overlays.cursor {
                    if let Some(click) = &cursor.click {
                        let ring_r = cursor.radius
                            + (click.radius - cursor.radius).max(0.0) * click.progress;
                        let alpha = (1.0 - click.progress).clamp(0.0, 1.0) * click.color[3];
                        if alpha > 0.0 {
                            let d = ((px - click.x).powi(2) + (py - click.y).powi(2)).sqrt();
                            color = over(
                                color,
                                [click.color[0], click.color[1], click.color[2]],
                                ring_coverage(d, ring_r, 3.0) * alpha,
                            );
                        }
                    }

                    let d = ((px - cursor.x).powi(2) + (py - cursor.y).powi(2)).sqrt();
                    let border = cursor.border_color;
                    let fill = cursor.color;
                    color = over(
                        color,
                        [border[0], border[1], border[2]],
                        coverage(d - cursor.radius) * border[3],
                    );
                    color = over(
                        color,
                        [fill[0], fill[1], fill[2]],
                        coverage(d - (cursor.radius - 2.0).max(0.0)) * fill[3],
                    );
                }

                data.extend_from_slice(&[
                    to_u8(color[0]),
                    to_u8(color[1]),
                    to_u8(color[2]),
                    to_u8(color[3]),
                ]);
            }
        }

        Ok(CompositeOutput {
            width: out_w,
            height: out_h,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{BackgroundSettings, FrameShadow, GradientStop};
    use crate::rendering::types::{CursorOverlay, Rect, WebcamMask, WebcamOverlay};

    fn pixel(out: &CompositeOutput, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * out.width + x) * 4) as usize;
        [out.data[i], out.data[i + 1], out.data[i + 2], out.data[i + 3]]
    }

    fn render(frame: &DecodedFrame, overlays: &FrameOverlays, settings: &CompositorSettings) -> CompositeOutput {
        SoftwareCompositor::new()
            .render(frame, overlays, settings)
            .unwrap()
    }

    #[test]
    fn test_output_size_includes_padding() {
        let settings = CompositorSettings {
            padding: 8,
            ..Default::default()
        };
        let frame = DecodedFrame::solid(16, 10, [255, 0, 0, 255]);
        let out = render(&frame, &FrameOverlays::default(), &settings);
        assert_eq!((out.width, out.height), (32, 26));
        assert_eq!(out.data.len(), 32 * 26 * 4);
    }

    #[test]
    fn test_padding_shows_background() {
        let settings = CompositorSettings {
            padding: 4,
            background: BackgroundSettings::Solid {
                color: "#0000ff".into(),
            },
            ..Default::default()
        };
        let frame = DecodedFrame::solid(8, 8, [255, 0, 0, 255]);
        let out = render(&frame, &FrameOverlays::default(), &settings);
        assert_eq!(pixel(&out, 0, 0), [0, 0, 255, 255]);
        assert_eq!(pixel(&out, 8, 8), [255, 0, 0, 255]);
    }

    #[test]
    fn test_gradient_center_is_mid_gray() {
        let settings = CompositorSettings {
            padding: 50,
            content_scale: 0.1,
            background: BackgroundSettings::Gradient {
                angle: 0.0,
                stops: vec![GradientStop::new(0.0, "#000000"), GradientStop::new(100.0, "#ffffff")],
            },
            ..Default::default()
        };
        // 10x10 content at scale 0.1 is 1x1; canvas 101x101, centered on pixel 50
        let frame = DecodedFrame::solid(10, 10, [0, 0, 0, 0]);
        let out = render(&frame, &FrameOverlays::default(), &settings);
        assert_eq!((out.width, out.height), (101, 101));

        let [r, g, b, a] = pixel(&out, 50, 50);
        assert!((r as i32 - 128).abs() <= 2, "got {}", r);
        assert_eq!(r, g);
        assert_eq!(g, b);
        assert_eq!(a, 255);

        // 0 degrees runs bottom (black) to top (white)
        assert!(pixel(&out, 0, 0)[0] > 240);
        assert!(pixel(&out, 0, 100)[0] < 15);
    }

    #[test]
    fn test_rounded_corners_reveal_background() {
        let settings = CompositorSettings {
            corner_radius: 8.0,
            background: BackgroundSettings::Solid {
                color: "#00ff00".into(),
            },
            ..Default::default()
        };
        let frame = DecodedFrame::solid(32, 32, [255, 0, 0, 255]);
        let out = render(&frame, &FrameOverlays::default(), &settings);
        assert_eq!(pixel(&out, 0, 0), [0, 255, 0, 255]);
        assert_eq!(pixel(&out, 16, 16), [255, 0, 0, 255]);
    }

    #[test]
    fn test_shadow_darkens_padding_below_frame() {
        let base = CompositorSettings {
            padding: 16,
            background: BackgroundSettings::Solid {
                color: "#ffffff".into(),
            },
            ..Default::default()
        };
        let shadowed = CompositorSettings {
            shadow: FrameShadow {
                enabled: true,
                intensity: 100.0,
                blur: 8.0,
                offset_y: 8.0,
                opacity: 80.0,
            },
            ..base.clone()
        };
        let frame = DecodedFrame::solid(16, 16, [0, 0, 255, 255]);
        let plain = render(&frame, &FrameOverlays::default(), &base);
        let shaded = render(&frame, &FrameOverlays::default(), &shadowed);
        // Just below the content
        assert_eq!(pixel(&plain, 24, 34)[0], 255);
        assert!(pixel(&shaded, 24, 34)[0] < 200);
    }

    #[test]
    fn test_webcam_circle_and_cursor() {
        let settings = CompositorSettings::default();
        let frame = DecodedFrame::solid(64, 64, [0, 0, 0, 255]);
        let overlays = FrameOverlays {
            webcam: Some(WebcamOverlay {
                frame: DecodedFrame::solid(8, 8, [0, 255, 0, 255]),
                rect: Rect::new(0.0, 0.0, 20.0, 20.0),
                mask: WebcamMask::Circle,
                mirror: false,
            }),
            cursor: Some(CursorOverlay {
                x: 48.0,
                y: 48.0,
                radius: 6.0,
                color: [1.0, 1.0, 1.0, 1.0],
                border_color: [1.0, 0.0, 0.0, 1.0],
                click: None,
            }),
        };
        let out = render(&frame, &overlays, &settings);

        assert_eq!(pixel(&out, 10, 10), [0, 255, 0, 255]);
        // Outside the circle, inside its square
        assert_eq!(pixel(&out, 0, 0), [0, 0, 0, 255]);
        // Cursor fill, then ring
        assert_eq!(pixel(&out, 48, 48), [255, 255, 255, 255]);
        assert_eq!(pixel(&out, 52, 48), [255, 0, 0, 255]);
    }

    #[test]
    fn test_missing_background_image_falls_back_to_black() {
        let settings = CompositorSettings {
            padding: 2,
            background: BackgroundSettings::Image {
                path: "/nonexistent/background.png".into(),
            },
            ..Default::default()
        };
        let frame = DecodedFrame::solid(4, 4, [255, 255, 255, 255]);
        let out = render(&frame, &FrameOverlays::default(), &settings);
        assert_eq!(pixel(&out, 0, 0), [0, 0, 0, 255]);
    }

    #[test]
    fn test_background_image_cover() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bg.png");
        // Left half red, right half blue
        let img = RgbaImage::from_fn(40, 10, |x, _| {
            if x < 20 {
                image::Rgba([255, 0, 0, 255])
            } else {
                image::Rgba([0, 0, 255, 255])
            }
        });
        img.save(&path).unwrap();

        let settings = CompositorSettings {
            padding: 5,
            content_scale: 0.1,
            background: BackgroundSettings::Image {
                path: path.to_string_lossy().into_owned(),
            },
            ..Default::default()
        };
        let frame = DecodedFrame::solid(10, 10, [0, 0, 0, 255]);
        let out = render(&frame, &FrameOverlays::default(), &settings);
        // 11x11 square canvas crops the 4:1 image to its middle quarter
        assert_eq!(pixel(&out, 0, 5), [255, 0, 0, 255]);
        assert_eq!(pixel(&out, 10, 5), [0, 0, 255, 255]);
    }

    #[test]
    fn test_rejects_bad_frame() {
        let frame = DecodedFrame::new(0, 0, vec![0; 3], 2, 2);
        let result = SoftwareCompositor::new().render(&frame, &FrameOverlays::default(), &CompositorSettings::default());
        assert!(matches!(result, Err(RenderError::InvalidInput(_))));
    }
}
