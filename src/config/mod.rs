//! Editor core configuration.
//!
//! `EditorConfig` collects the tunables of the decode/render/export pipeline
//! behind a `parking_lot::RwLock` so the host can batch-update them in one
//! call. Instances snapshot the config when they are created.

pub mod editor;

pub use editor::{
    get_editor_config, set_editor_config, EditorConfig, GpuPowerPreference, RenderBackend,
    EDITOR_CONFIG,
};
