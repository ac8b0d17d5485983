//! Registry of open editor instances.
//!
//! Instances are looked up by ID from any thread. `destroy` releases the
//! instance's decoders and compositor before returning; callers still
//! holding an `Arc` see `NotFound` from every operation afterwards.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::config::{EditorConfig, RenderBackend};
use crate::error::{EditorError, EditorResult, LockRecover};
use crate::project::VideoProject;

use super::decoder::{DecodeError, FfmpegSource, FrameSource};
use super::editor_instance::{CompositorBackend, EditorInstance};
use super::renderer_state::DeviceContext;
use super::types::{EditorInstanceInfo, InstanceId};

/// Opens a frame source for a media path.
pub trait SourceOpener: Send + Sync {
    fn open(&self, path: &str) -> Result<Box<dyn FrameSource>, DecodeError>;
}

/// Opens sources through the FFmpeg decoder.
#[derive(Debug, Clone, Default)]
pub struct FfmpegOpener {
    ffmpeg_path: Option<PathBuf>,
}

impl FfmpegOpener {
    pub fn new(ffmpeg_path: Option<PathBuf>) -> Self {
        Self { ffmpeg_path }
    }
}

impl SourceOpener for FfmpegOpener {
    fn open(&self, path: &str) -> Result<Box<dyn FrameSource>, DecodeError> {
        let source = FfmpegSource::open(Path::new(path), self.ffmpeg_path.as_deref())?;
        Ok(Box::new(source))
    }
}

/// Thread-safe map of instance ID to editor instance.
pub struct InstanceRegistry {
    instances: RwLock<HashMap<InstanceId, Arc<EditorInstance>>>,
    opener: Arc<dyn SourceOpener>,
    backend: CompositorBackend,
    config: EditorConfig,
}

impl InstanceRegistry {
    pub fn new(opener: Arc<dyn SourceOpener>, backend: CompositorBackend, config: EditorConfig) -> Self {
        Self {
            instances: RwLock::new(HashMap::new()),
            opener,
            backend,
            config,
        }
    }

    /// Registry using FFmpeg decoding and the backend named in `config`.
    pub fn from_config(config: EditorConfig) -> Self {
        let backend = match config.backend {
            RenderBackend::Gpu => CompositorBackend::Gpu(Arc::new(DeviceContext::new(config.gpu_options()))),
            RenderBackend::Software => CompositorBackend::Software,
        };
        let opener = Arc::new(FfmpegOpener::new(config.ffmpeg_path.clone()));
        Self::new(opener, backend, config)
    }

    /// Open `project` and register the new instance.
    pub fn create(&self, project: VideoProject) -> EditorResult<EditorInstanceInfo> {
        let instance = EditorInstance::open(
            project,
            self.opener.as_ref(),
            self.backend.clone(),
            self.config.clone(),
        )?;
        let info = instance.info();

        self.instances
            .write()
            .recover("instance registry")
            .insert(instance.id.clone(), Arc::new(instance));

        log::info!(
            "[EDITOR] Registered instance {} ({}x{} -> {}x{})",
            info.instance_id,
            info.width,
            info.height,
            info.output_width,
            info.output_height
        );
        Ok(info)
    }

    pub fn get(&self, id: &str) -> EditorResult<Arc<EditorInstance>> {
        self.instances
            .read()
            .recover("instance registry")
            .get(id)
            .cloned()
            .ok_or_else(|| EditorError::NotFound(format!("Editor instance not found: {}", id)))
    }

    /// Unregister and shut down an instance.
    pub fn destroy(&self, id: &str) -> EditorResult<()> {
        let instance = self
            .instances
            .write()
            .recover("instance registry")
            .remove(id)
            .ok_or_else(|| EditorError::NotFound(format!("Editor instance not found: {}", id)))?;

        instance.shutdown();
        log::info!("[EDITOR] Destroyed instance {}", id);
        Ok(())
    }

    pub fn list(&self) -> Vec<InstanceId> {
        let mut ids: Vec<_> = self
            .instances
            .read()
            .recover("instance registry")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.instances.read().recover("instance registry").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shut down every instance.
    pub fn shutdown_all(&self) {
        let drained: Vec<_> = self
            .instances
            .write()
            .recover("instance registry")
            .drain()
            .collect();
        for (id, instance) in drained {
            instance.shutdown();
            log::debug!("[EDITOR] Shut down instance {}", id);
        }
    }
}

impl Drop for InstanceRegistry {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::SyntheticOpener;
    use super::*;
    use crate::project::VideoSources;
    use crate::rendering::decoder::source::synthetic::SyntheticSource;

    fn registry() -> InstanceRegistry {
        let opener = SyntheticOpener::new()
            .with("screen.mp4", SyntheticSource::new(16, 8, 30.0, 2000));
        let config = EditorConfig {
            backend: RenderBackend::Software,
            render_wait_ms: 2000,
            ..Default::default()
        };
        InstanceRegistry::new(Arc::new(opener), CompositorBackend::Software, config)
    }

    fn project(screen: &str) -> VideoProject {
        VideoProject {
            id: "project".into(),
            name: "Recording".into(),
            sources: VideoSources {
                screen_video: screen.into(),
                webcam_video: Some("missing-webcam.mp4".into()),
                cursor_data: Some("/nonexistent/cursor.json".into()),
                audio_tracks: vec![],
            },
            duration_ms: 0,
            fps: 0,
            compositor: Default::default(),
        }
    }

    #[test]
    fn test_create_get_destroy() {
        let registry = registry();
        let info = registry.create(project("screen.mp4")).unwrap();
        assert_eq!((info.width, info.height), (16, 8));
        // Duration and fps fall back to the source
        assert_eq!(info.duration_ms, 2000);
        assert_eq!(info.fps, 30);
        assert_eq!(info.frame_count, 60);
        // Unreadable optional tracks are dropped
        assert!(!info.has_webcam);
        assert!(!info.has_cursor);

        let instance = registry.get(&info.instance_id).unwrap();
        assert!(instance.render_frame(1000).is_ok());
        assert_eq!(registry.list(), vec![info.instance_id.clone()]);

        registry.destroy(&info.instance_id).unwrap();
        assert!(registry.is_empty());
        assert!(matches!(registry.get(&info.instance_id), Err(EditorError::NotFound(_))));
        assert!(matches!(registry.destroy(&info.instance_id), Err(EditorError::NotFound(_))));
        // A held handle is dead after destroy
        assert!(matches!(instance.render_frame(0), Err(EditorError::NotFound(_))));
    }

    #[test]
    fn test_missing_screen_video_fails() {
        let registry = registry();
        let err = registry.create(project("nope.mp4")).unwrap_err();
        assert!(matches!(err, EditorError::Io(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_instances_are_independent() {
        let registry = registry();
        let a = registry.create(project("screen.mp4")).unwrap().instance_id;
        let b = registry.create(project("screen.mp4")).unwrap().instance_id;
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);

        registry.get(&a).unwrap().play().unwrap();
        registry.destroy(&a).unwrap();
        let b = registry.get(&b).unwrap();
        assert!(b.render_frame(500).is_ok());

        registry.shutdown_all();
        assert!(registry.is_empty());
        assert!(b.is_destroyed());
    }

    #[test]
    fn test_concurrent_lookups() {
        let registry = Arc::new(registry());
        let id = registry.create(project("screen.mp4")).unwrap().instance_id;
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let registry = Arc::clone(&registry);
                let id = id.clone();
                std::thread::spawn(move || {
                    let instance = registry.get(&id).unwrap();
                    instance.render_frame(i * 400).unwrap().width
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 16);
        }
    }
}
