//! Background rendering layer for video compositing.
//!
//! Draws the canvas fill (solid color, multi-stop gradient or cover-fit
//! image) in its own pass before the content frame is composited on top.

use std::num::NonZeroUsize;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use lru::LruCache;
use wgpu::util::DeviceExt;

use crate::project::BackgroundSettings;

use super::renderer::GpuContext;
use super::shading::{cover_crop, parse_hex_color, PreparedGradient, MAX_GRADIENT_STOPS};

/// Decoded background images kept on the GPU.
const IMAGE_CACHE_SIZE: usize = 4;

/// Background resolved to something the GPU pipelines can draw.
#[derive(Debug, Clone, PartialEq)]
pub enum Background {
    Gradient(PreparedGradient),
    Image { path: String },
}

impl Background {
    pub fn from_settings(settings: &BackgroundSettings) -> Self {
        match settings {
            BackgroundSettings::Solid { color } => {
                Self::Gradient(PreparedGradient::solid(parse_hex_color(color)))
            },
            BackgroundSettings::Gradient { angle, stops } => {
                Self::Gradient(PreparedGradient::new(*angle, stops))
            },
            BackgroundSettings::Image { path } => Self::Image { path: path.clone() },
        }
    }
}

/// Internal state for background rendering.
enum BackgroundInner {
    Image {
        key: (String, u32, u32),
        bind_group: wgpu::BindGroup,
    },
    Gradient {
        key: (PreparedGradient, u32, u32),
        bind_group: wgpu::BindGroup,
    },
}

/// Background rendering layer.
pub struct BackgroundLayer {
    inner: Option<BackgroundInner>,
    image_pipeline: ImageBackgroundPipeline,
    gradient_pipeline: GradientOrColorPipeline,
    image_textures: LruCache<String, Arc<wgpu::Texture>>,
}

impl BackgroundLayer {
    pub fn new(ctx: &GpuContext) -> Self {
        let capacity = NonZeroUsize::new(IMAGE_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: None,
            image_pipeline: ImageBackgroundPipeline::new(ctx),
            gradient_pipeline: GradientOrColorPipeline::new(ctx),
            image_textures: LruCache::new(capacity),
        }
    }

    /// Prepare bind groups for the given background and output size.
    /// Unchanged backgrounds are reused.
    pub fn prepare(
        &mut self,
        ctx: &GpuContext,
        output_width: u32,
        output_height: u32,
        background: Background,
    ) {
        match background {
            Background::Image { path } => {
                if let Some(BackgroundInner::Image { key, .. }) = &self.inner {
                    if key.0 == path && key.1 == output_width && key.2 == output_height {
                        return;
                    }
                }

                let texture = match self.load_image(ctx, &path) {
                    Some(texture) => texture,
                    None => {
                        self.prepare_gradient(
                            ctx,
                            output_width,
                            output_height,
                            PreparedGradient::solid([0.0, 0.0, 0.0, 1.0]),
                        );
                        return;
                    },
                };

                let crop = cover_crop(
                    output_width as f32,
                    output_height as f32,
                    texture.width() as f32,
                    texture.height() as f32,
                );
                let uniforms = ImageBackgroundUniforms {
                    output_size: [output_width as f32, output_height as f32, 0.0, 0.0],
                    crop,
                };
                let buffer = ctx
                    .device()
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("Image Background Uniforms"),
                        contents: bytemuck::cast_slice(&[uniforms]),
                        usage: wgpu::BufferUsages::UNIFORM,
                    });
                let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

                self.inner = Some(BackgroundInner::Image {
                    key: (path, output_width, output_height),
                    bind_group: self.image_pipeline.bind_group(ctx.device(), &buffer, &view),
                });
            },
            Background::Gradient(gradient) => {
                self.prepare_gradient(ctx, output_width, output_height, gradient);
            },
        }
    }

    fn prepare_gradient(
        &mut self,
        ctx: &GpuContext,
        output_width: u32,
        output_height: u32,
        gradient: PreparedGradient,
    ) {
        if let Some(BackgroundInner::Gradient { key, .. }) = &self.inner {
            if key.0 == gradient && key.1 == output_width && key.2 == output_height {
                return;
            }
        }

        let buffer = GradientOrColorUniforms::new(&gradient, output_width, output_height)
            .to_buffer(ctx.device());
        self.inner = Some(BackgroundInner::Gradient {
            key: (gradient, output_width, output_height),
            bind_group: self.gradient_pipeline.bind_group(ctx.device(), &buffer),
        });
    }

    /// Load and cache an image texture. Failures fall back to black.
    fn load_image(&mut self, ctx: &GpuContext, path: &str) -> Option<Arc<wgpu::Texture>> {
        if let Some(texture) = self.image_textures.get(path) {
            return Some(Arc::clone(texture));
        }

        let img = match image::open(path) {
            Ok(img) => img.to_rgba8(),
            Err(err) => {
                log::warn!(
                    "[COMPOSITOR] Failed to load background image '{}': {}. Falling back to black.",
                    path,
                    err
                );
                return None;
            },
        };

        let texture = Arc::new(ctx.create_texture_from_rgba(
            img.as_raw(),
            img.width(),
            img.height(),
            "Background Image Texture",
        ));
        self.image_textures
            .put(path.to_string(), Arc::clone(&texture));
        Some(texture)
    }

    /// Render the background to the given render pass.
    pub fn render(&self, pass: &mut wgpu::RenderPass<'_>) {
        match &self.inner {
            Some(BackgroundInner::Image { bind_group, .. }) => {
                pass.set_pipeline(&self.image_pipeline.render_pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.draw(0..3, 0..1);
            },
            Some(BackgroundInner::Gradient { bind_group, .. }) => {
                pass.set_pipeline(&self.gradient_pipeline.render_pipeline);
                pass.set_bind_group(0, bind_group, &[]);
                pass.draw(0..3, 0..1);
            },
            None => {},
        }
    }

    pub fn has_background(&self) -> bool {
        self.inner.is_some()
    }
}

fn fullscreen_pipeline(
    ctx: &GpuContext,
    label: &str,
    shader: &wgpu::ShaderModule,
    bind_group_layout: &wgpu::BindGroupLayout,
) -> wgpu::RenderPipeline {
    let device = ctx.device();
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[bind_group_layout],
        push_constant_ranges: &[],
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: ctx.format(),
                blend: Some(wgpu::BlendState::REPLACE),
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
    })
}

// =============================================================================
// Image Background Pipeline
// =============================================================================

struct ImageBackgroundPipeline {
    bind_group_layout: wgpu::BindGroupLayout,
    render_pipeline: wgpu::RenderPipeline,
    sampler: wgpu::Sampler,
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct ImageBackgroundUniforms {
    output_size: [f32; 4],
    crop: [f32; 4],
}

impl ImageBackgroundPipeline {
    fn new(ctx: &GpuContext) -> Self {
        let device = ctx.device();
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("ImageBackgroundBindGroupLayout"),
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
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let shader = ctx.create_shader(
            include_str!("shaders/image-background.wgsl"),
            "Image Background Shader",
        );
        let render_pipeline = fullscreen_pipeline(
            ctx,
            "ImageBackgroundPipeline",
            &shader,
            &bind_group_layout,
        );

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Image Background Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            bind_group_layout,
            render_pipeline,
            sampler,
        }
    }

    fn bind_group(
        &self,
        device: &wgpu::Device,
        uniforms: &wgpu::Buffer,
        texture: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ImageBackgroundBindGroup"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(texture),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        })
    }
}

// =============================================================================
// Gradient or Color Pipeline
// =============================================================================

struct GradientOrColorPipeline {
    bind_group_layout: wgpu::BindGroupLayout,
    render_pipeline: wgpu::RenderPipeline,
}

#[derive(Debug, Clone, Copy, Pod, Zeroable, Default)]
#[repr(C)]
struct GradientOrColorUniforms {
    output_size: [f32; 4],
    direction: [f32; 4],
    positions: [[f32; 4]; 2],
    colors: [[f32; 4]; MAX_GRADIENT_STOPS],
}

impl GradientOrColorUniforms {
    fn new(gradient: &PreparedGradient, width: u32, height: u32) -> Self {
        let mut uniforms = Self {
            output_size: [width as f32, height as f32, gradient.positions.len() as f32, 0.0],
            direction: [gradient.direction.0, gradient.direction.1, 0.0, 0.0],
            ..Default::default()
        };
        for (i, (pos, color)) in gradient
            .positions
            .iter()
            .zip(gradient.colors.iter())
            .take(MAX_GRADIENT_STOPS)
            .enumerate()
        {
            uniforms.positions[i / 4][i % 4] = *pos;
            uniforms.colors[i] = *color;
        }
        uniforms
    }

    fn to_buffer(self, device: &wgpu::Device) -> wgpu::Buffer {
        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("GradientOrColorUniforms Buffer"),
            contents: bytemuck::cast_slice(&[self]),
            usage: wgpu::BufferUsages::UNIFORM,
        })
    }
}

impl GradientOrColorPipeline {
    fn new(ctx: &GpuContext) -> Self {
        let bind_group_layout =
            ctx.device()
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("GradientOrColorBindGroupLayout"),
                    entries: &[wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    }],
                });

        let shader = ctx.create_shader(
            include_str!("shaders/gradient-or-color.wgsl"),
            "Gradient or Color Shader",
        );
        let render_pipeline = fullscreen_pipeline(
            ctx,
            "GradientOrColorPipeline",
            &shader,
            &bind_group_layout,
        );

        Self {
            bind_group_layout,
            render_pipeline,
        }
    }

    fn bind_group(&self, device: &wgpu::Device, uniforms: &wgpu::Buffer) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniforms.as_entire_binding(),
            }],
            label: Some("GradientOrColorBindGroup"),
        })
    }
}
