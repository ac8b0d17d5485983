//! Tests for the exporter module.

#![cfg(test)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::config::{EditorConfig, RenderBackend};
use crate::project::{VideoProject, VideoSources};
use crate::rendering::decoder::source::synthetic::{index_of, SyntheticSource};
use crate::rendering::editor_instance::{CompositorBackend, EditorInstance};
use crate::rendering::registry::testing::SyntheticOpener;
use crate::rendering::registry::InstanceRegistry;

/// What the mock encoder saw.
#[derive(Default)]
struct EncoderLog {
    outputs: Vec<PathBuf>,
    settings: Vec<EncodeSettings>,
    timestamps: Vec<u64>,
    frame_indices: Vec<u64>,
    finished: bool,
    aborted: bool,
}

struct MockEncoder {
    file: std::fs::File,
    log: Arc<Mutex<EncoderLog>>,
}

impl FrameEncoder for MockEncoder {
    fn write_frame(&mut self, frame: &RenderedFrame) -> EditorResult<()> {
        use std::io::Write;
        self.file.write_all(&frame.data[..4])?;
        let center = ((frame.height / 2 * frame.width + frame.width / 2) * 4) as usize;
        let mut log = self.log.lock();
        log.timestamps.push(frame.requested_ms);
        log.frame_indices.push(index_of(&frame.data[center..center + 2]));
        Ok(())
    }

    fn finish(self: Box<Self>) -> EditorResult<()> {
        self.file.sync_all()?;
        self.log.lock().finished = true;
        Ok(())
    }

    fn abort(self: Box<Self>) {
        self.log.lock().aborted = true;
    }
}

#[derive(Default)]
struct MockFactory {
    log: Arc<Mutex<EncoderLog>>,
}

impl EncoderFactory for MockFactory {
    fn create(
        &self,
        output: &Path,
        settings: &EncodeSettings,
        _options: &ExportOptions,
    ) -> EditorResult<Box<dyn FrameEncoder>> {
        let file = std::fs::File::create(output)?;
        let mut log = self.log.lock();
        log.outputs.push(output.to_path_buf());
        log.settings.push(settings.clone());
        Ok(Box::new(MockEncoder {
            file,
            log: Arc::clone(&self.log),
        }))
    }
}

fn make_project(duration_ms: u64, fps: u32) -> VideoProject {
    VideoProject {
        id: "export-test".to_string(),
        name: "export".to_string(),
        sources: VideoSources {
            screen_video: "screen".to_string(),
            webcam_video: None,
            cursor_data: None,
            audio_tracks: vec!["/tmp/system.wav".to_string()],
        },
        duration_ms,
        fps,
        compositor: Default::default(),
    }
}

fn test_config() -> EditorConfig {
    EditorConfig {
        backend: RenderBackend::Software,
        export_frame_timeout_ms: 5_000,
        ..Default::default()
    }
}

fn make_instance(source: SyntheticSource, project: VideoProject) -> Arc<EditorInstance> {
    let opener = SyntheticOpener::new().with("screen", source);
    Arc::new(EditorInstance::open(project, &opener, CompositorBackend::Software, test_config()).unwrap())
}

fn make_registry(source: SyntheticSource) -> Arc<InstanceRegistry> {
    let opener = SyntheticOpener::new().with("screen", source);
    Arc::new(InstanceRegistry::new(
        Arc::new(opener),
        CompositorBackend::Software,
        test_config(),
    ))
}

/// Files left in `dir`, sorted.
fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn test_frame_timestamps_count_and_order() {
    let cases = [(1000, 30, 30), (1001, 24, 24), (2500, 60, 150), (999, 1, 0), (10_000, 29, 290)];
    for (duration, fps, expected) in cases {
        let ts = frame_timestamps(duration, fps).unwrap();
        assert_eq!(ts.len(), expected, "{}ms @ {}fps", duration, fps);
        assert!(ts.windows(2).all(|w| w[0] < w[1]));
        assert!(ts.iter().all(|&t| t < duration));
        if let Some(&first) = ts.first() {
            assert_eq!(first, 0);
        }
    }

    let ts = frame_timestamps(1000, 30).unwrap();
    assert_eq!(&ts[..4], &[0, 33, 66, 100]);
}

#[test]
fn test_frame_timestamps_rejects_bad_fps() {
    assert!(frame_timestamps(1000, 0).is_err());
    assert!(frame_timestamps(1000, MAX_EXPORT_FPS + 1).is_err());
    assert_eq!(frame_timestamps(1000, MAX_EXPORT_FPS).unwrap().len(), 240);
}

#[test]
fn test_partial_path_is_hidden_sibling() {
    let output = Path::new("/videos/out/demo.mp4");
    let partial = partial_path(output, ExportFormat::Mp4);
    assert_eq!(partial.parent(), Some(Path::new("/videos/out")));
    let name = partial.file_name().unwrap().to_string_lossy().to_string();
    assert!(name.starts_with(".demo."));
    assert!(name.ends_with(".partial.mp4"));
    assert_ne!(partial, partial_path(output, ExportFormat::Mp4));
}

#[test]
fn test_partial_path_follows_export_format() {
    let bare = partial_path(Path::new("/videos/out/demo"), ExportFormat::Gif);
    assert!(bare.to_string_lossy().ends_with(".partial.gif"));

    let renamed = partial_path(Path::new("/videos/out/demo.mp4"), ExportFormat::Webm);
    assert!(renamed.to_string_lossy().ends_with(".partial.webm"));
}

#[test]
fn test_export_options_defaults_from_json() {
    let options: ExportOptions = serde_json::from_str(r#"{"outputPath": "/tmp/a.webm", "format": "webm"}"#).unwrap();
    assert_eq!(options.format, ExportFormat::Webm);
    assert_eq!(options.quality, 80);
    assert!(options.include_audio);
    assert!(options.codec.is_none());
}

#[test]
fn test_export_writes_every_frame_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("nested").join("out.mp4");
    let instance = make_instance(SyntheticSource::new(8, 6, 30.0, 1000), make_project(1000, 30));
    let factory = MockFactory::default();
    let progress = Arc::new(Mutex::new(Vec::new()));
    let on_progress = {
        let progress = Arc::clone(&progress);
        move |p: ExportProgress| progress.lock().push(p)
    };

    let guard = instance.begin_export().unwrap();
    let result = export_instance(
        &guard,
        &ExportOptions::new(&output),
        &factory,
        &CancellationToken::new(),
        Some(&on_progress),
    )
    .unwrap();
    drop(guard);

    assert_eq!(result.frame_count, 30);
    assert_eq!(result.duration_ms, 1000);
    assert_eq!(result.file_size_bytes, 30 * 4);
    assert!(output.exists());
    assert_eq!(dir_entries(output.parent().unwrap()), vec!["out.mp4".to_string()]);

    let log = factory.log.lock();
    assert!(log.finished);
    assert!(!log.aborted);
    assert_eq!(log.timestamps, frame_timestamps(1000, 30).unwrap());
    assert_eq!(log.frame_indices, (0..30).collect::<Vec<u64>>());
    assert_eq!(log.settings[0].width, 8);
    assert_eq!(log.settings[0].fps, 30);
    assert_eq!(log.settings[0].audio_tracks, vec![PathBuf::from("/tmp/system.wav")]);

    let progress = progress.lock();
    assert_eq!(progress.first().map(|p| p.stage), Some(ExportStage::Preparing));
    let last = progress.last().unwrap();
    assert_eq!(last.stage, ExportStage::Complete);
    assert_eq!(last.progress, 1.0);
    assert!(progress.windows(2).all(|w| w[0].progress <= w[1].progress));
}

#[test]
fn test_export_at_different_rate_than_source() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.gif");
    let instance = make_instance(SyntheticSource::new(4, 4, 30.0, 1000), make_project(1000, 10));
    let factory = MockFactory::default();

    let mut options = ExportOptions::new(&output);
    options.format = ExportFormat::Gif;
    let guard = instance.begin_export().unwrap();
    export_instance(&guard, &options, &factory, &CancellationToken::new(), None).unwrap();

    let log = factory.log.lock();
    assert_eq!(log.frame_indices, (0..10).map(|i| i * 3).collect::<Vec<u64>>());
    // Gif output carries no audio
    assert!(log.settings[0].audio_tracks.is_empty());
}

#[test]
fn test_decode_failure_aborts_without_output() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.mp4");
    let source = SyntheticSource::new(8, 6, 30.0, 1000).with_fail_at(10);
    let instance = make_instance(source, make_project(1000, 30));
    let factory = MockFactory::default();

    let guard = instance.begin_export().unwrap();
    let err = export_instance(
        &guard,
        &ExportOptions::new(&output),
        &factory,
        &CancellationToken::new(),
        None,
    )
    .unwrap_err();

    assert!(matches!(err, EditorError::ExportAborted(_)));
    assert!(!output.exists());
    assert!(dir_entries(dir.path()).is_empty());

    let log = factory.log.lock();
    assert!(log.aborted);
    assert!(!log.finished);
    assert!(log.timestamps.len() <= 10);
}

#[test]
fn test_empty_export_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let instance = make_instance(SyntheticSource::new(4, 4, 30.0, 1000), make_project(20, 30));
    let guard = instance.begin_export().unwrap();
    let err = export_instance(
        &guard,
        &ExportOptions::new(dir.path().join("out.mp4")),
        &MockFactory::default(),
        &CancellationToken::new(),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, EditorError::ExportAborted(_)));
    assert!(dir_entries(dir.path()).is_empty());
}

#[tokio::test]
async fn test_job_completes() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("job.mp4");
    let registry = make_registry(SyntheticSource::new(8, 6, 30.0, 1000));
    let id = registry.create(make_project(1000, 30)).unwrap().instance_id;
    let manager = ExportManager::new(Arc::clone(&registry), Arc::new(MockFactory::default()));

    let job = manager.start_export(&id, ExportOptions::new(&output)).unwrap();
    assert_eq!(manager.instance_of(&job).unwrap(), id);

    match manager.wait(&job).await.unwrap() {
        ExportJobStatus::Completed { result } => {
            assert_eq!(result.frame_count, 30);
            assert_eq!(PathBuf::from(result.output_path), output);
        },
        other => panic!("unexpected status {:?}", other),
    }
    assert!(output.exists());

    // The instance is usable again
    assert!(registry.get(&id).unwrap().play().is_ok());
    assert_eq!(manager.clear_finished(), 1);
    assert!(matches!(manager.status(&job), Err(EditorError::NotFound(_))));
}

#[tokio::test]
async fn test_job_failure_reports_failed() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("fail.mp4");
    let registry = make_registry(SyntheticSource::new(8, 6, 30.0, 1000).with_fail_at(7));
    let id = registry.create(make_project(1000, 30)).unwrap().instance_id;
    let manager = ExportManager::new(registry, Arc::new(MockFactory::default()));

    let job = manager.start_export(&id, ExportOptions::new(&output)).unwrap();
    let status = manager.wait(&job).await.unwrap();
    assert!(matches!(status, ExportJobStatus::Failed { .. }), "{:?}", status);
    assert!(dir_entries(dir.path()).is_empty());
}

struct PanickingFactory;

impl EncoderFactory for PanickingFactory {
    fn create(
        &self,
        _output: &Path,
        _settings: &EncodeSettings,
        _options: &ExportOptions,
    ) -> EditorResult<Box<dyn FrameEncoder>> {
        panic!("encoder exploded");
    }
}

#[tokio::test]
async fn test_job_panic_reports_failed_without_wait() {
    let dir = tempfile::tempdir().unwrap();
    let registry = make_registry(SyntheticSource::new(8, 6, 30.0, 1000));
    let id = registry.create(make_project(1000, 30)).unwrap().instance_id;
    let manager = ExportManager::new(Arc::clone(&registry), Arc::new(PanickingFactory));

    let job = manager
        .start_export(&id, ExportOptions::new(dir.path().join("panic.mp4")))
        .unwrap();

    let mut status = manager.status(&job).unwrap();
    for _ in 0..500 {
        if status.is_finished() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        status = manager.status(&job).unwrap();
    }
    match status {
        ExportJobStatus::Failed { message } => {
            assert!(message.contains("encoder exploded"), "{}", message)
        },
        other => panic!("unexpected status {:?}", other),
    }
    assert!(registry.get(&id).unwrap().play().is_ok());
    assert!(dir_entries(dir.path()).is_empty());
}

#[tokio::test]
async fn test_job_cancellation_and_busy_transport() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("cancel.mp4");
    let source = SyntheticSource::new(8, 6, 30.0, 2000).with_delay(Duration::from_millis(20));
    let registry = make_registry(source);
    let id = registry.create(make_project(2000, 30)).unwrap().instance_id;
    let manager = ExportManager::new(Arc::clone(&registry), Arc::new(MockFactory::default()));

    let job = manager.start_export(&id, ExportOptions::new(&output)).unwrap();
    let instance = registry.get(&id).unwrap();
    assert!(matches!(instance.play(), Err(EditorError::Busy(_))));
    assert!(matches!(
        manager.start_export(&id, ExportOptions::new(dir.path().join("second.mp4"))),
        Err(EditorError::Busy(_))
    ));
    assert!(!manager.status(&job).unwrap().is_finished());

    tokio::time::sleep(Duration::from_millis(60)).await;
    manager.cancel_export(&job).unwrap();
    assert_eq!(manager.wait(&job).await.unwrap(), ExportJobStatus::Cancelled);

    assert!(!output.exists());
    assert!(dir_entries(dir.path()).is_empty());
    assert!(instance.play().is_ok());
}

#[tokio::test]
async fn test_unknown_ids() {
    let registry = make_registry(SyntheticSource::new(4, 4, 30.0, 1000));
    let manager = ExportManager::new(registry, Arc::new(MockFactory::default()));
    assert!(matches!(
        manager.start_export("missing", ExportOptions::new("/tmp/x.mp4")),
        Err(EditorError::NotFound(_))
    ));
    assert!(matches!(manager.cancel_export("nope"), Err(EditorError::NotFound(_))));
    assert!(matches!(manager.wait("nope").await, Err(EditorError::NotFound(_))));
}
