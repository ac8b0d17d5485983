//! Compositing, playback and export core of the SnapIt video editor.
//!
//! The command layer creates an [`EditorInstance`] per open project through
//! the [`InstanceRegistry`], renders preview frames with
//! [`EditorInstance::render_frame`] and exports through the
//! [`ExportManager`].

pub mod config;
pub mod error;
pub mod ffmpeg;
pub mod logging;
pub mod project;
pub mod rendering;

pub use config::{get_editor_config, set_editor_config, EditorConfig, RenderBackend};
pub use error::{EditorError, EditorResult};
pub use project::{CompositorSettings, VideoProject, VideoSources};
pub use rendering::{
    EditorInstance, EditorInstanceInfo, ExportManager, ExportOptions, InstanceRegistry,
    RenderedFrame,
};
