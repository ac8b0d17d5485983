//! FFmpeg encoder fed with raw RGBA frames on stdin.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Stdio};
use std::thread::JoinHandle;

use crate::error::{EditorError, EditorResult, ResultExt};
use crate::ffmpeg::{create_hidden_command, find_ffmpeg};
use crate::rendering::types::RenderedFrame;

use super::encoder_selection::{select_encoder, EncoderConfig, EncoderType};
use super::{EncodeSettings, EncoderFactory, ExportFormat, ExportOptions, FrameEncoder};

/// Stderr kept for error messages.
const STDERR_TAIL_BYTES: usize = 4096;

/// Convert quality percentage to CRF value.
pub fn quality_to_crf(quality: u32) -> u8 {
    (35 - ((quality.min(100) as f32 / 100.0) * 20.0) as u8).clamp(15, 35)
}

fn even(value: u32) -> u32 {
    (value / 2 * 2).max(2)
}

/// Scale filter producing even output dimensions, as required by yuv420p.
fn scale_filter(settings: &EncodeSettings, options: &ExportOptions) -> Option<String> {
    match options.resolution {
        Some(res) => Some(format!("scale={}:{}", even(res.width), even(res.height))),
        None if settings.width % 2 != 0 || settings.height % 2 != 0 => Some(format!(
            "scale={}:{}",
            even(settings.width),
            even(settings.height)
        )),
        None => None,
    }
}

/// Build the ffmpeg command line for an export.
///
/// `encoder` is the selected H.264 encoder for mp4 output when no codec
/// override is given.
pub fn build_encoder_args(
    settings: &EncodeSettings,
    options: &ExportOptions,
    encoder: Option<&EncoderConfig>,
    output_path: &Path,
) -> Vec<String> {
    let fps = settings.fps;
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        "rgba".into(),
        "-s".into(),
        format!("{}x{}", settings.width, settings.height),
        "-r".into(),
        fps.to_string(),
        "-i".into(),
        "-".into(),
    ];

    // Audio inputs start at index 1, after the video pipe
    let audio_inputs: Vec<usize> = settings
        .audio_tracks
        .iter()
        .enumerate()
        .map(|(i, track)| {
            args.extend(["-i".to_string(), track.to_string_lossy().to_string()]);
            i + 1
        })
        .collect();

    match options.format {
        ExportFormat::Gif => {
            let scale = scale_filter(settings, options)
                .map(|s| format!("{},", s))
                .unwrap_or_default();
            args.extend([
                "-vf".into(),
                format!(
                    "fps={},{}split[s0][s1];[s0]palettegen[p];[s1][p]paletteuse",
                    fps.min(15),
                    scale
                ),
            ]);
        },
        ExportFormat::Mp4 | ExportFormat::Webm => {
            if let Some(filter) = scale_filter(settings, options) {
                args.extend(["-vf".into(), filter]);
            }
            video_codec_args(&mut args, options, encoder);
            args.extend(["-pix_fmt".into(), "yuv420p".into()]);
            // Keyframe every second for precise seeking
            args.extend(["-g".into(), fps.to_string()]);
            if options.format == ExportFormat::Mp4 {
                args.extend(["-movflags".into(), "+faststart".into()]);
            }

            if !audio_inputs.is_empty() {
                args.extend(["-map".into(), "0:v".into()]);
                for index in &audio_inputs {
                    args.extend(["-map".into(), format!("{}:a?", index)]);
                }
                let audio_codec = match options.format {
                    ExportFormat::Webm => ["-c:a", "libopus", "-b:a", "128k"],
                    _ => ["-c:a", "aac", "-b:a", "192k"],
                };
                args.extend(audio_codec.iter().map(|s| s.to_string()));
                args.push("-shortest".into());
            }
        },
    }

    args.extend(options.extra_args.iter().cloned());
    args.push(output_path.to_string_lossy().to_string());
    args
}

fn video_codec_args(
    args: &mut Vec<String>,
    options: &ExportOptions,
    encoder: Option<&EncoderConfig>,
) {
    if let Some(codec) = &options.codec {
        args.extend(["-c:v".into(), codec.clone()]);
        if let Some(bitrate) = &options.bitrate {
            args.extend(["-b:v".into(), bitrate.clone()]);
        }
        return;
    }

    match (options.format, encoder) {
        (ExportFormat::Webm, _) => {
            args.extend(["-c:v".into(), "libvpx-vp9".into()]);
            match &options.bitrate {
                Some(bitrate) => args.extend(["-b:v".into(), bitrate.clone()]),
                None => args.extend([
                    "-crf".into(),
                    quality_to_crf(options.quality).to_string(),
                    "-b:v".into(),
                    "0".into(),
                ]),
            }
            args.extend([
                "-deadline".into(),
                "realtime".into(),
                "-cpu-used".into(),
                "4".into(),
            ]);
        },
        (_, Some(config)) => {
            args.extend(["-c:v".into(), config.codec.clone()]);
            match &options.bitrate {
                Some(bitrate) => args.extend(["-b:v".into(), bitrate.clone()]),
                None => args.extend([
                    config.quality_param.clone(),
                    config.quality_value.to_string(),
                ]),
            }
            args.extend(["-preset".into(), config.preset.clone()]);
            if config.encoder_type == EncoderType::Nvenc {
                args.extend(["-bf".into(), "2".into(), "-rc-lookahead".into(), "20".into()]);
            } else {
                args.extend(["-threads".into(), "0".into()]);
            }
        },
        (_, None) => {
            args.extend([
                "-c:v".into(),
                "libx264".into(),
                "-crf".into(),
                quality_to_crf(options.quality).to_string(),
                "-preset".into(),
                "superfast".into(),
            ]);
        },
    }
}

/// Running ffmpeg encode process.
pub struct FfmpegEncoder {
    process: Child,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
    frame_bytes: usize,
    frames_written: u64,
}

impl FfmpegEncoder {
    pub fn spawn(ffmpeg: &Path, args: &[String], settings: &EncodeSettings) -> EditorResult<Self> {
        log::info!("[EXPORT] FFmpeg encoder: ffmpeg {}", args.join(" "));

        let mut process = create_hidden_command(ffmpeg)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to start FFmpeg")?;

        let stdin = process.stdin.take();
        // Drain stderr so a chatty encoder never blocks on a full pipe
        let stderr = process.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                let start = buf.len().saturating_sub(STDERR_TAIL_BYTES);
                String::from_utf8_lossy(&buf[start..]).trim().to_string()
            })
        });

        Ok(Self {
            process,
            stdin,
            stderr,
            frame_bytes: settings.width as usize * settings.height as usize * 4,
            frames_written: 0,
        })
    }

    fn stderr_tail(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }
}

impl FrameEncoder for FfmpegEncoder {
    fn write_frame(&mut self, frame: &RenderedFrame) -> EditorResult<()> {
        if frame.data.len() != self.frame_bytes {
            return Err(EditorError::Render(format!(
                "Frame at {}ms is {} bytes, encoder expects {}",
                frame.timestamp_ms,
                frame.data.len(),
                self.frame_bytes
            )));
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(EditorError::Other("Encoder input already closed".to_string()));
        };
        stdin
            .write_all(&frame.data)
            .with_context(|| format!("Failed to write frame {}", self.frames_written))?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> EditorResult<()> {
        // Close stdin to signal EOF
        drop(self.stdin.take());
        let status = self.process.wait().context("FFmpeg wait failed")?;
        let stderr = self.stderr_tail();
        if !status.success() {
            return Err(EditorError::Other(format!(
                "FFmpeg encoding failed with status {:?}: {}",
                status.code(),
                stderr
            )));
        }
        log::debug!("[EXPORT] Encoder finished after {} frames", self.frames_written);
        Ok(())
    }

    fn abort(mut self: Box<Self>) {
        drop(self.stdin.take());
        let _ = self.process.kill();
        let _ = self.process.wait();
        let stderr = self.stderr_tail();
        if !stderr.is_empty() {
            log::debug!("[EXPORT] Aborted encoder output: {}", stderr);
        }
    }
}

/// Creates [`FfmpegEncoder`]s, resolving the binary and H.264 encoder per export.
#[derive(Debug, Clone, Default)]
pub struct FfmpegEncoderFactory {
    ffmpeg_path: Option<PathBuf>,
}

impl FfmpegEncoderFactory {
    pub fn new(ffmpeg_path: Option<PathBuf>) -> Self {
        Self { ffmpeg_path }
    }
}

impl EncoderFactory for FfmpegEncoderFactory {
    fn create(
        &self,
        output: &Path,
        settings: &EncodeSettings,
        options: &ExportOptions,
    ) -> EditorResult<Box<dyn FrameEncoder>> {
        let ffmpeg = find_ffmpeg(self.ffmpeg_path.as_deref())?;
        let encoder = (options.format == ExportFormat::Mp4 && options.codec.is_none())
            .then(|| select_encoder(&ffmpeg, options.quality, options.prefer_hardware));
        let args = build_encoder_args(settings, options, encoder.as_ref(), output);
        Ok(Box::new(FfmpegEncoder::spawn(&ffmpeg, &args, settings)?))
    }
}
