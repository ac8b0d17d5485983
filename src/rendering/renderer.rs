//! wgpu device setup and texture helpers.
//!
//! Handles adapter/device/queue acquisition, texture upload and readback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use wgpu::{Device, Queue, TextureFormat};

use crate::config::GpuPowerPreference;
use crate::error::{EditorError, EditorResult};

use super::compositor::RenderError;

/// Options for acquiring the GPU.
#[derive(Debug, Clone, Copy, Default)]
pub struct GpuOptions {
    pub power_preference: GpuPowerPreference,
    /// Use the software adapter (e.g. lavapipe/WARP) when available.
    pub force_fallback_adapter: bool,
}

/// Shared GPU handle: one device and queue for every editor instance.
pub struct GpuContext {
    device: Arc<Device>,
    queue: Arc<Queue>,
    adapter_name: String,
    /// Output texture format. Compositing happens in gamma space.
    format: TextureFormat,
    lost: Arc<AtomicBool>,
    generation: u64,
}

impl GpuContext {
    /// Acquire an adapter and device.
    pub async fn new(options: GpuOptions, generation: u64) -> EditorResult<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: options.power_preference.into(),
                compatible_surface: None,
                force_fallback_adapter: options.force_fallback_adapter,
            })
            .await
            .map_err(|e| EditorError::Init(format!("No compatible GPU adapter: {}", e)))?;

        let adapter_name = adapter.get_info().name;
        log::info!("[GPU] Using adapter: {}", adapter_name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("SnapIt Editor Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults()
                    .using_resolution(adapter.limits()),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| EditorError::Init(format!("Failed to create GPU device: {}", e)))?;

        let lost = Arc::new(AtomicBool::new(false));
        {
            let lost = Arc::clone(&lost);
            device.set_device_lost_callback(move |reason, message| {
                log::error!("[GPU] Device lost ({:?}): {}", reason, message);
                lost.store(true, Ordering::SeqCst);
            });
        }
        device.on_uncaptured_error(Box::new(|err| {
            log::error!("[GPU] Uncaptured error: {}", err);
        }));

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_name,
            format: TextureFormat::Rgba8Unorm,
            lost,
            generation,
        })
    }

    /// Blocking variant of [`GpuContext::new`].
    pub fn new_blocking(options: GpuOptions, generation: u64) -> EditorResult<Self> {
        pollster::block_on(Self::new(options, generation))
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn queue(&self) -> &Arc<Queue> {
        &self.queue
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Incremented every time the device is recreated.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_lost(&self) {
        self.lost.store(true, Ordering::SeqCst);
    }

    /// Create a sampled texture from RGBA data.
    pub fn create_texture_from_rgba(
        &self,
        data: &[u8],
        width: u32,
        height: u32,
        label: &str,
    ) -> wgpu::Texture {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            size,
        );

        texture
    }

    /// Create an output texture for rendering.
    pub fn create_output_texture(&self, width: u32, height: u32) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Output Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        })
    }

    /// Copy a texture back to CPU memory, stripping row padding.
    pub fn read_texture(
        &self,
        texture: &wgpu::Texture,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, RenderError> {
        let bytes_per_row = 4 * width;
        let padded_bytes_per_row = padded_row_bytes(width);
        let buffer_size = (padded_bytes_per_row * height) as u64;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Texture Read Buffer"),
            size: buffer_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Texture Read Encoder"),
            });

        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );

        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = buffer.slice(..);
        let (tx, rx) = flume::bounded(1);
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        if let Err(e) = self.device.poll(wgpu::PollType::Wait) {
            return Err(self.classify(format!("Device poll failed: {}", e)));
        }

        match rx.recv() {
            Ok(Ok(())) => {},
            Ok(Err(e)) => return Err(self.classify(format!("Buffer map failed: {}", e))),
            Err(_) => return Err(self.classify("Buffer map callback dropped".to_string())),
        }

        let data = buffer_slice.get_mapped_range();
        let result = strip_row_padding(&data, bytes_per_row, padded_bytes_per_row, height);
        drop(data);
        buffer.unmap();

        Ok(result)
    }

    /// Compile a shader module.
    pub fn create_shader(&self, source: &str, label: &str) -> wgpu::ShaderModule {
        self.device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            })
    }

    /// Tag a failure as device loss when the lost callback already fired.
    pub(crate) fn classify(&self, message: String) -> RenderError {
        if self.is_lost() {
            RenderError::DeviceLost(message)
        } else {
            RenderError::Readback(message)
        }
    }
}

/// Row stride for texture-to-buffer copies (wgpu requires 256-byte alignment).
pub fn padded_row_bytes(width: u32) -> u32 {
    let unpadded = 4 * width;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

fn strip_row_padding(data: &[u8], bytes_per_row: u32, padded: u32, height: u32) -> Vec<u8> {
    if padded == bytes_per_row {
        return data[..(bytes_per_row * height) as usize].to_vec();
    }
    let mut result = Vec::with_capacity((bytes_per_row * height) as usize);
    for row in 0..height {
        let start = (row * padded) as usize;
        let end = start + bytes_per_row as usize;
        result.extend_from_slice(&data[start..end]);
    }
    result
}
