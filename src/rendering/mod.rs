//! Video compositing, playback and export for the video editor.
//!
//! Frames are composited with wgpu on one device shared by every open
//! instance; a CPU compositor with the same output serves machines without
//! a usable adapter.
//!
//! ## Components
//! - `types`: Core data structures (DecodedFrame, RenderedFrame, overlays)
//! - `decoder`: Prefetching video decoder with a bounded frame window
//! - `renderer`: wgpu device/queue management and texture readback
//! - `renderer_state`: Shared device handle and the device-lost restart path
//! - `compositor`: GPU frame compositing pipeline
//! - `software`: CPU compositor
//! - `editor_instance`: Playback state and per-frame rendering
//! - `registry`: Open editor instances by ID
//! - `exporter`: Frame-accurate export to FFmpeg

pub mod background;
pub mod compositor;
pub mod cursor;
pub mod decoder;
pub mod editor_instance;
pub mod exporter;
pub mod registry;
pub mod renderer;
pub mod renderer_state;
pub mod shading;
pub mod software;
pub mod types;
pub mod webcam;

pub use compositor::{FrameCompositor, FrameLayout, GpuCompositor, RenderError};
pub use cursor::CursorTrack;
pub use decoder::{DecodeError, Decoder, FrameResult, VideoInfo};
pub use editor_instance::{CompositorBackend, EditorInstance, ExportGuard};
pub use exporter::{
    export_instance, ExportFormat, ExportJobStatus, ExportManager, ExportOptions, ExportProgress,
    ExportResult, FfmpegEncoderFactory,
};
pub use registry::{FfmpegOpener, InstanceRegistry, SourceOpener};
pub use renderer::{GpuContext, GpuOptions};
pub use renderer_state::DeviceContext;
pub use software::SoftwareCompositor;
pub use types::*;
