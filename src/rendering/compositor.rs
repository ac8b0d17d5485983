//! Frame compositor using wgpu shaders.
//!
//! Composites the base video frame with padding, rounded corners, a drop
//! shadow, the webcam overlay (circle/squircle/rounded mask) and the cursor
//! marker over a background drawn by [`BackgroundLayer`].

use std::sync::Arc;

use thiserror::Error;

use crate::config::RenderBackend;
use crate::error::EditorError;
use crate::project::{CompositorSettings, CornerStyle};

use super::background::{Background, BackgroundLayer};
use super::renderer::GpuContext;
use super::shading::cover_crop;
use super::types::{CompositeOutput, DecodedFrame, FrameOverlays, Rect, WebcamMask};

/// Per-frame render failure.
#[derive(Error, Debug, Clone)]
pub enum RenderError {
    /// Device must be re-initialized before the next frame.
    #[error("GPU device lost: {0}")]
    DeviceLost(String),
    /// Pipeline or shader creation failed.
    #[error("Pipeline creation failed: {0}")]
    Pipeline(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Readback failed: {0}")]
    Readback(String),
}

impl From<RenderError> for EditorError {
    fn from(err: RenderError) -> Self {
        match err {
            RenderError::DeviceLost(msg) => EditorError::DeviceLost(msg),
            other => EditorError::Render(other.to_string()),
        }
    }
}

/// Stage-ordered compositor: background, base frame, webcam, cursor.
///
/// Implementations own their GPU (or CPU) resources and are driven by one
/// editor instance at a time.
pub trait FrameCompositor: Send {
    fn backend(&self) -> RenderBackend;

    /// Composite one frame and copy the result to CPU memory.
    fn render(
        &mut self,
        frame: &DecodedFrame,
        overlays: &FrameOverlays,
        settings: &CompositorSettings,
    ) -> Result<CompositeOutput, RenderError>;
}

/// Placement of the content frame inside the output canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameLayout {
    pub output_width: u32,
    pub output_height: u32,
    pub content: Rect,
}

impl FrameLayout {
    pub fn new(settings: &CompositorSettings, source_width: u32, source_height: u32) -> Self {
        let (content_w, content_h) = settings.content_size(source_width, source_height);
        let (output_width, output_height) = settings.output_size(source_width, source_height);
        let padding = settings.padding as f32;
        Self {
            output_width,
            output_height,
            content: Rect::new(padding, padding, content_w as f32, content_h as f32),
        }
    }
}

/// Reject frames whose buffer does not match their dimensions.
pub fn validate_frame(frame: &DecodedFrame, what: &str) -> Result<(), RenderError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(RenderError::InvalidInput(format!("{} frame has zero size", what)));
    }
    if frame.data.len() != frame.expected_len() {
        return Err(RenderError::InvalidInput(format!(
            "{} frame is {} bytes, expected {} for {}x{}",
            what,
            frame.data.len(),
            frame.expected_len(),
            frame.width,
            frame.height
        )));
    }
    Ok(())
}

/// WGSL shader for frame styling and overlays.
///
/// Output is premultiplied and blended over the background pass.
/// `textureSampleLevel` keeps sampling legal inside per-pixel branches.
const COMPOSITOR_SHADER: &str = r#"
struct Uniforms {
    output_size: vec4<f32>,     // width, height, 0, 0
    content_rect: vec4<f32>,    // x, y, width, height (pixels)
    frame_style: vec4<f32>,     // corner_radius, squircle, 0, 0
    shadow: vec4<f32>,          // blur, offset_y, opacity, 0
    webcam_rect: vec4<f32>,     // x, y, width, height (pixels)
    webcam_params: vec4<f32>,   // mask (0=none,1=circle,2=squircle,3=rounded), radius, mirror, 0
    webcam_crop: vec4<f32>,     // u0, v0, u_span, v_span
    cursor: vec4<f32>,          // x, y, radius, visible
    cursor_fill: vec4<f32>,
    cursor_border: vec4<f32>,
    click: vec4<f32>,           // x, y, ring radius, alpha
    click_color: vec4<f32>,
}

@group(0) @binding(0) var<uniform> u: Uniforms;
@group(0) @binding(1) var video_texture: texture_2d<f32>;
@group(0) @binding(2) var webcam_texture: texture_2d<f32>;
@group(0) @binding(3) var linear_sampler: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
}

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var positions = array<vec2<f32>, 3>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(3.0, -1.0),
        vec2<f32>(-1.0, 3.0)
    );
    var output: VertexOutput;
    output.position = vec4<f32>(positions[vertex_index], 0.0, 1.0);
    return output;
}

fn superellipse_norm(p: vec2<f32>, power: f32) -> f32 {
    let x = pow(abs(p.x), power);
    let y = pow(abs(p.y), power);
    return pow(x + y, 1.0 / power);
}

fn sdf_rounded_rect(p: vec2<f32>, half_size: vec2<f32>, radius_in: f32, squircle: f32) -> f32 {
    let radius = clamp(radius_in, 0.0, min(half_size.x, half_size.y));
    let q = abs(p) - half_size + vec2<f32>(radius);
    let outside = max(q, vec2<f32>(0.0));
    var outside_len: f32;
    if (squircle > 0.5) {
        outside_len = superellipse_norm(outside, 4.0);
    } else {
        outside_len = length(outside);
    }
    return outside_len + min(max(q.x, q.y), 0.0) - radius;
}

fn sdf_webcam(p: vec2<f32>, half_size: vec2<f32>, mask: f32, radius: f32) -> f32 {
    let r = max(min(half_size.x, half_size.y), 0.001);
    if (mask < 1.5) {
        return length(p) - r;
    } else if (mask < 2.5) {
        return (superellipse_norm(p / r, 4.0) - 1.0) * r;
    }
    return sdf_rounded_rect(p, half_size, radius, 0.0);
}

fn coverage(d: f32) -> f32 {
    return clamp(0.5 - d, 0.0, 1.0);
}

fn shadow_alpha(d: f32, blur: f32) -> f32 {
    if (blur < 0.5) {
        return coverage(d);
    }
    return 1.0 - smoothstep(-blur, blur, d);
}

// Premultiplied "over".
fn over(dst: vec4<f32>, rgb: vec3<f32>, a: f32) -> vec4<f32> {
    return vec4<f32>(rgb * a, a) + dst * (1.0 - a);
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let p = input.position.xy;
    var color = vec4<f32>(0.0);

    // Content frame
    let content_pos = u.content_rect.xy;
    let content_size = u.content_rect.zw;
    let half_size = content_size * 0.5;
    let center = content_pos + half_size;
    let radius = u.frame_style.x;
    let squircle = u.frame_style.y;

    let shadow_opacity = u.shadow.z;
    if (shadow_opacity > 0.0) {
        let shadow_center = center + vec2<f32>(0.0, u.shadow.y);
        let sd = sdf_rounded_rect(p - shadow_center, half_size, radius, squircle);
        color = over(color, vec3<f32>(0.0), shadow_alpha(sd, u.shadow.x) * shadow_opacity);
    }

    let frame_dist = sdf_rounded_rect(p - center, half_size, radius, squircle);
    let frame_cov = coverage(frame_dist);
    if (frame_cov > 0.0) {
        let uv = clamp((p - content_pos) / content_size, vec2<f32>(0.0), vec2<f32>(1.0));
        let video = textureSampleLevel(video_texture, linear_sampler, uv, 0.0);
        color = over(color, video.rgb, video.a * frame_cov);
    }

    // Webcam overlay
    let mask = u.webcam_params.x;
    if (mask > 0.5) {
        let cam_pos = u.webcam_rect.xy;
        let cam_size = u.webcam_rect.zw;
        let cam_half = cam_size * 0.5;
        let cam_dist = sdf_webcam(p - cam_pos - cam_half, cam_half, mask, u.webcam_params.y);
        let cam_cov = coverage(cam_dist);
        if (cam_cov > 0.0) {
            var local = clamp((p - cam_pos) / cam_size, vec2<f32>(0.0), vec2<f32>(1.0));
            if (u.webcam_params.z > 0.5) {
                local.x = 1.0 - local.x;
            }
            let cam_uv = u.webcam_crop.xy + local * u.webcam_crop.zw;
            let cam = textureSampleLevel(webcam_texture, linear_sampler, cam_uv, 0.0);
            color = over(color, cam.rgb, cam.a * cam_cov);
        }
    }

    // Click pulse, then cursor marker
    if (u.click.w > 0.0) {
        let d = abs(length(p - u.click.xy) - u.click.z) - 1.5;
        color = over(color, u.click_color.rgb, coverage(d) * u.click.w * u.click_color.a);
    }

    if (u.cursor.w > 0.5) {
        let d = length(p - u.cursor.xy);
        let r = u.cursor.z;
        color = over(color, u.cursor_border.rgb, coverage(d - r) * u.cursor_border.a);
        color = over(color, u.cursor_fill.rgb, coverage(d - max(r - 2.0, 0.0)) * u.cursor_fill.a);
    }

    return color;
}
"#;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
struct CompositorUniforms {
    output_size: [f32; 4],
    content_rect: [f32; 4],
    frame_style: [f32; 4],
    shadow: [f32; 4],
    webcam_rect: [f32; 4],
    webcam_params: [f32; 4],
    webcam_crop: [f32; 4],
    cursor: [f32; 4],
    cursor_fill: [f32; 4],
    cursor_border: [f32; 4],
    click: [f32; 4],
    click_color: [f32; 4],
}

impl CompositorUniforms {
    fn new(layout: &FrameLayout, overlays: &FrameOverlays, settings: &CompositorSettings) -> Self {
        let (blur, offset_y, opacity) = settings.shadow.effective();
        let mut uniforms = Self {
            output_size: [
                layout.output_width as f32,
                layout.output_height as f32,
                0.0,
                0.0,
            ],
            content_rect: layout.content.as_array(),
            frame_style: [
                settings.corner_radius.max(0.0),
                if settings.corner_style == CornerStyle::Squircle {
                    1.0
                } else {
                    0.0
                },
                0.0,
                0.0,
            ],
            shadow: [blur, offset_y, opacity, 0.0],
            webcam_crop: [0.0, 0.0, 1.0, 1.0],
            ..Default::default()
        };

        if let Some(webcam) = &overlays.webcam {
            let (mask, radius) = match webcam.mask {
                WebcamMask::Circle => (1.0, 0.0),
                WebcamMask::Squircle => (2.0, 0.0),
                WebcamMask::RoundedRect { radius } => (3.0, radius),
            };
            uniforms.webcam_rect = webcam.rect.as_array();
            uniforms.webcam_params = [mask, radius, if webcam.mirror { 1.0 } else { 0.0 }, 0.0];
            uniforms.webcam_crop = cover_crop(
                webcam.rect.width,
                webcam.rect.height,
                webcam.frame.width as f32,
                webcam.frame.height as f32,
            );
        }

        if let Some(cursor) = &overlays.cursor {
            uniforms.cursor = [cursor.x, cursor.y, cursor.radius, 1.0];
            uniforms.cursor_fill = cursor.color;
            uniforms.cursor_border = cursor.border_color;
            if let Some(click) = &cursor.click {
                let ring = cursor.radius + (click.radius - cursor.radius).max(0.0) * click.progress;
                uniforms.click = [click.x, click.y, ring, (1.0 - click.progress).clamp(0.0, 1.0)];
                uniforms.click_color = click.color;
            }
        }

        uniforms
    }
}

/// Compositor for GPU-accelerated frame rendering.
pub struct GpuCompositor {
    ctx: Arc<GpuContext>,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    // Bound when the frame has no webcam overlay
    placeholder_view: wgpu::TextureView,
    background_layer: BackgroundLayer,
}

impl GpuCompositor {
    /// Build all pipelines. Validation errors are captured and returned.
    pub fn new(ctx: Arc<GpuContext>) -> Result<Self, RenderError> {
        let device = Arc::clone(ctx.device());
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = ctx.create_shader(COMPOSITOR_SHADER, "Compositor Shader");

        let texture_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Compositor Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                texture_entry(1),
                texture_entry(2),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Compositor Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Compositor Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: ctx.format(),
                    blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Compositor Uniforms"),
            size: std::mem::size_of::<CompositorUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Compositor Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let placeholder = ctx.create_texture_from_rgba(&[0, 0, 0, 0], 1, 1, "Placeholder Texture");
        let placeholder_view = placeholder.create_view(&wgpu::TextureViewDescriptor::default());

        let background_layer = BackgroundLayer::new(&ctx);

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(RenderError::Pipeline(err.to_string()));
        }

        log::debug!("[COMPOSITOR] Pipelines ready on {}", ctx.adapter_name());

        Ok(Self {
            ctx,
            pipeline,
            bind_group_layout,
            uniform_buffer,
            sampler,
            placeholder_view,
            background_layer,
        })
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }

    /// Composite a frame into a new output texture.
    pub fn composite(
        &mut self,
        frame: &DecodedFrame,
        overlays: &FrameOverlays,
        settings: &CompositorSettings,
    ) -> Result<(wgpu::Texture, FrameLayout), RenderError> {
        if self.ctx.is_lost() {
            return Err(RenderError::DeviceLost("device was lost before composite".into()));
        }
        validate_frame(frame, "Base")?;
        if let Some(webcam) = &overlays.webcam {
            validate_frame(&webcam.frame, "Webcam")?;
        }

        let layout = FrameLayout::new(settings, frame.width, frame.height);
        let device = Arc::clone(self.ctx.device());
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        self.background_layer.prepare(
            &self.ctx,
            layout.output_width,
            layout.output_height,
            Background::from_settings(&settings.background),
        );

        let video_texture =
            self.ctx
                .create_texture_from_rgba(&frame.data, frame.width, frame.height, "Video Frame");
        let video_view = video_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let webcam_view = overlays.webcam.as_ref().map(|webcam| {
            self.ctx
                .create_texture_from_rgba(
                    &webcam.frame.data,
                    webcam.frame.width,
                    webcam.frame.height,
                    "Webcam Frame",
                )
                .create_view(&wgpu::TextureViewDescriptor::default())
        });

        let output_texture = self
            .ctx
            .create_output_texture(layout.output_width, layout.output_height);
        let output_view = output_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let uniforms = CompositorUniforms::new(&layout, overlays, settings);
        self.ctx
            .queue()
            .write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniforms]));

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Compositor Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&video_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(
                        webcam_view.as_ref().unwrap_or(&self.placeholder_view),
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Compositor Encoder"),
        });

        {
            let mut bg_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Background Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &output_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            self.background_layer.render(&mut bg_pass);
        }

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Compositor Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &output_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, &bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }

        self.ctx.queue().submit(Some(encoder.finish()));

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            let message = err.to_string();
            return Err(match err {
                wgpu::Error::OutOfMemory { .. } => {
                    self.ctx.mark_lost();
                    RenderError::DeviceLost(message)
                },
                _ => self.ctx.classify(message),
            });
        }

        Ok((output_texture, layout))
    }
}

impl FrameCompositor for GpuCompositor {
    fn backend(&self) -> RenderBackend {
        RenderBackend::Gpu
    }

    fn render(
        &mut self,
        frame: &DecodedFrame,
        overlays: &FrameOverlays,
        settings: &CompositorSettings,
    ) -> Result<CompositeOutput, RenderError> {
        let (texture, layout) = self.composite(frame, overlays, settings)?;
        let data = self
            .ctx
            .read_texture(&texture, layout.output_width, layout.output_height)?;
        Ok(CompositeOutput {
            width: layout.output_width,
            height: layout.output_height,
            data,
        })
    }
}
