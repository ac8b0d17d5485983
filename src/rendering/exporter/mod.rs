//! Frame-accurate export pipeline.
//!
//! Export reuses the instance's decoders and compositor:
//! 1. Derive the target timestamps from (duration, fps)
//! 2. Render each one through the editor instance, waiting on the decoder
//!    instead of pacing against the wall clock
//! 3. Pipe the rendered RGBA frames to the encoder in order
//!
//! The encoder writes to a hidden `.partial` file next to the destination,
//! which is renamed into place only after every frame was encoded.

pub mod encoder_selection;
pub mod ffmpeg;
pub mod job;

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use ts_rs::TS;

use crate::error::{EditorError, EditorResult, ResultExt};

use super::editor_instance::ExportGuard;
use super::types::RenderedFrame;

pub use ffmpeg::FfmpegEncoderFactory;
pub use job::{ExportJobStatus, ExportManager};

/// Frame rates accepted for export.
pub const MAX_EXPORT_FPS: u32 = 240;

/// Output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ExportFormat {
    #[default]
    Mp4,
    Webm,
    Gif,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Mp4 => "mp4",
            ExportFormat::Webm => "webm",
            ExportFormat::Gif => "gif",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ExportResolution {
    pub width: u32,
    pub height: u32,
}

fn default_quality() -> u32 {
    80
}

fn default_true() -> bool {
    true
}

/// Caller-supplied export options. Codec, bitrate, resolution and extra
/// arguments are handed to the encoder as given.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ExportOptions {
    #[ts(type = "string")]
    pub output_path: PathBuf,
    #[serde(default)]
    pub format: ExportFormat,
    /// Quality percentage (0-100), mapped to CRF/CQ.
    #[serde(default = "default_quality")]
    pub quality: u32,
    /// Video codec override, e.g. "libx265".
    #[serde(default)]
    pub codec: Option<String>,
    /// Target video bitrate, e.g. "8M".
    #[serde(default)]
    pub bitrate: Option<String>,
    #[serde(default)]
    pub resolution: Option<ExportResolution>,
    /// Extra encoder arguments inserted before the output path.
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub prefer_hardware: bool,
    #[serde(default = "default_true")]
    pub include_audio: bool,
}

impl ExportOptions {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            format: ExportFormat::default(),
            quality: default_quality(),
            codec: None,
            bitrate: None,
            resolution: None,
            extra_args: Vec::new(),
            prefer_hardware: false,
            include_audio: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum ExportStage {
    Preparing,
    Encoding,
    Finalizing,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ExportProgress {
    /// Overall progress (0.0-1.0).
    pub progress: f32,
    pub stage: ExportStage,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ExportResult {
    pub output_path: String,
    pub frame_count: u32,
    pub duration_ms: u64,
    #[ts(type = "number")]
    pub file_size_bytes: u64,
    pub format: ExportFormat,
}

pub type ProgressCallback = dyn Fn(ExportProgress) + Send + Sync;

/// Stream parameters handed to an encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub audio_tracks: Vec<PathBuf>,
}

/// Consumes rendered frames in presentation order.
pub trait FrameEncoder: Send {
    fn write_frame(&mut self, frame: &RenderedFrame) -> EditorResult<()>;

    /// Flush and close the output file.
    fn finish(self: Box<Self>) -> EditorResult<()>;

    /// Stop without finalizing. The output file may be left incomplete.
    fn abort(self: Box<Self>);
}

pub trait EncoderFactory: Send + Sync {
    fn create(
        &self,
        output: &Path,
        settings: &EncodeSettings,
        options: &ExportOptions,
    ) -> EditorResult<Box<dyn FrameEncoder>>;
}

/// Presentation timestamps of every exported frame: `floor(D * F / 1000)`
/// frames at `floor(i * 1000 / F)` ms.
pub fn frame_timestamps(duration_ms: u64, fps: u32) -> EditorResult<Vec<u64>> {
    if fps == 0 || fps > MAX_EXPORT_FPS {
        return Err(EditorError::Other(format!(
            "Export frame rate must be 1-{}, got {}",
            MAX_EXPORT_FPS, fps
        )));
    }
    let count = duration_ms * fps as u64 / 1000;
    Ok((0..count).map(|i| i * 1000 / fps as u64).collect())
}

/// Hidden sibling path the encoder writes to until the export succeeds.
///
/// FFmpeg picks the muxer from this name, so it always carries the
/// extension of `format` whatever the final output is called.
pub fn partial_path(output: &Path, format: ExportFormat) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "export".to_string());
    let tag = uuid::Uuid::new_v4().simple().to_string();
    output.with_file_name(format!(
        ".{}.{}.partial.{}",
        stem,
        &tag[..8],
        format.extension()
    ))
}

/// Partial output file, removed on drop unless persisted.
struct PartialOutput {
    path: PathBuf,
    persisted: bool,
}

impl PartialOutput {
    fn new(output: &Path, format: ExportFormat) -> Self {
        Self {
            path: partial_path(output, format),
            persisted: false,
        }
    }

    fn persist(mut self, destination: &Path) -> EditorResult<()> {
        std::fs::rename(&self.path, destination).with_context(|| {
            format!(
                "Failed to move {} to {}",
                self.path.display(),
                destination.display()
            )
        })?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for PartialOutput {
    fn drop(&mut self) {
        if self.persisted || !self.path.exists() {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("[EXPORT] Removed partial output {}", self.path.display()),
            Err(e) => log::warn!(
                "[EXPORT] Failed to remove partial output {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

fn report(progress: Option<&ProgressCallback>, value: f32, stage: ExportStage, message: &str) {
    if let Some(callback) = progress {
        callback(ExportProgress {
            progress: value,
            stage,
            message: message.to_string(),
        });
    }
}

/// Export the instance held by `guard` to `options.output_path`.
///
/// Blocking; run it on a blocking task. Cancellation is checked between
/// frames. On any failure the encoder is aborted, the partial file removed
/// and `ExportAborted` returned.
pub fn export_instance(
    guard: &ExportGuard,
    options: &ExportOptions,
    factory: &dyn EncoderFactory,
    cancel: &CancellationToken,
    progress: Option<&ProgressCallback>,
) -> EditorResult<ExportResult> {
    let start_time = Instant::now();
    let instance = guard.instance();
    let fps = instance.fps();
    let duration_ms = instance.duration_ms();
    let timestamps = frame_timestamps(duration_ms, fps)?;
    if timestamps.is_empty() {
        return Err(EditorError::ExportAborted(format!(
            "Nothing to export: {}ms at {}fps",
            duration_ms, fps
        )));
    }

    report(progress, 0.0, ExportStage::Preparing, "Preparing export...");

    if let Some(parent) = options.output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).context("Failed to create output directory")?;
    }

    let (width, height) = instance.output_size();
    let settings = EncodeSettings {
        width,
        height,
        fps,
        audio_tracks: if options.include_audio && options.format != ExportFormat::Gif {
            instance
                .project()
                .sources
                .audio_tracks
                .iter()
                .map(PathBuf::from)
                .collect()
        } else {
            Vec::new()
        },
    };

    log::info!(
        "[EXPORT] {} -> {}: {}x{} @ {}fps, {} frames",
        instance.id,
        options.output_path.display(),
        width,
        height,
        fps,
        timestamps.len()
    );

    let partial = PartialOutput::new(&options.output_path, options.format);
    let mut encoder = factory.create(&partial.path, &settings, options)?;

    let frame_timeout = Duration::from_millis(instance.config().export_frame_timeout_ms);
    let total = timestamps.len();

    for (i, &ts) in timestamps.iter().enumerate() {
        if cancel.is_cancelled() {
            log::info!("[EXPORT] Cancelled at frame {}/{}", i, total);
            encoder.abort();
            return Err(EditorError::ExportAborted("Export cancelled".to_string()));
        }

        let written = render_export_frame(guard, ts, frame_timeout)
            .and_then(|frame| encoder.write_frame(&frame));
        if let Err(e) = written {
            log::error!("[EXPORT] Frame {} at {}ms failed: {}", i, ts, e);
            encoder.abort();
            return Err(EditorError::ExportAborted(format!(
                "Frame {} at {}ms: {}",
                i, ts, e
            )));
        }

        if i % 10 == 0 || i + 1 == total {
            let fraction = (i + 1) as f32 / total as f32;
            report(
                progress,
                0.02 + fraction * 0.93,
                ExportStage::Encoding,
                &format!("Rendering: {:.0}%", fraction * 100.0),
            );
        }
    }

    report(progress, 0.95, ExportStage::Finalizing, "Finalizing...");
    encoder
        .finish()
        .map_err(|e| EditorError::ExportAborted(format!("Encoder failed: {}", e)))?;

    partial.persist(&options.output_path)?;
    let file_size_bytes = std::fs::metadata(&options.output_path)
        .map(|m| m.len())
        .context("Failed to read output file")?;

    report(progress, 1.0, ExportStage::Complete, "Export complete!");
    log::info!(
        "[EXPORT] Complete in {:.1}s: {} bytes",
        start_time.elapsed().as_secs_f32(),
        file_size_bytes
    );

    Ok(ExportResult {
        output_path: options.output_path.to_string_lossy().to_string(),
        frame_count: total as u32,
        duration_ms,
        file_size_bytes,
        format: options.format,
    })
}

/// Render one export frame, retrying once after a device loss.
fn render_export_frame(guard: &ExportGuard, ts: u64, timeout: Duration) -> EditorResult<RenderedFrame> {
    match guard.instance().render_for_export(ts, timeout) {
        Err(e) if e.needs_reinit() => {
            log::warn!("[EXPORT] Device lost at {}ms, retrying on a new device", ts);
            guard.instance().render_for_export(ts, timeout)
        },
        result => result,
    }
}
