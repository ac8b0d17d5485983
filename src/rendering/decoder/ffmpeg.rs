//! FFmpeg-backed frame source.
//!
//! Metadata comes from ffprobe's JSON output. Frames are read as raw RGBA
//! from an ffmpeg child process; seeking restarts the process with input
//! seeking (`-ss` before `-i`), which lands on the keyframe at or before the
//! target and decodes forward from there.

use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Stdio};

use crate::ffmpeg::{create_hidden_command, find_ffmpeg, find_ffprobe};

use super::source::{DecodeError, FrameSource, RawFrame, VideoInfo};

/// Video codecs the decoder accepts.
pub const SUPPORTED_CODECS: &[&str] = &[
    "h264", "hevc", "vp8", "vp9", "av1", "mpeg4", "prores", "mjpeg",
];

/// Parse a frame rate like "30/1" or "29.97".
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den <= 0.0 {
                return None;
            }
            num / den
        },
        None => rate.trim().parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// Extract [`VideoInfo`] from `ffprobe -print_format json -show_format -show_streams`.
pub fn parse_probe_output(json: &serde_json::Value) -> Result<VideoInfo, DecodeError> {
    let stream = json["streams"]
        .as_array()
        .and_then(|streams| {
            streams
                .iter()
                .find(|s| s["codec_type"].as_str().unwrap_or("video") == "video")
        })
        .ok_or_else(|| DecodeError::Unsupported("No video stream found".to_string()))?;

    let codec = stream["codec_name"].as_str().unwrap_or("unknown").to_string();
    if !SUPPORTED_CODECS.contains(&codec.as_str()) {
        return Err(DecodeError::Unsupported(format!("codec '{}'", codec)));
    }

    let width = stream["width"].as_u64().unwrap_or(0) as u32;
    let height = stream["height"].as_u64().unwrap_or(0) as u32;
    if width == 0 || height == 0 {
        return Err(DecodeError::Unsupported("Missing video dimensions".to_string()));
    }

    let fps = stream["avg_frame_rate"]
        .as_str()
        .and_then(parse_frame_rate)
        .or_else(|| stream["r_frame_rate"].as_str().and_then(parse_frame_rate))
        .unwrap_or(30.0);

    // Format duration is more reliable than the stream's
    let duration_secs = json["format"]["duration"]
        .as_str()
        .and_then(|s| s.parse::<f64>().ok())
        .or_else(|| stream["duration"].as_str().and_then(|s| s.parse::<f64>().ok()))
        .unwrap_or(0.0);

    Ok(VideoInfo {
        width,
        height,
        fps,
        duration_ms: (duration_secs * 1000.0) as u64,
        codec,
    })
}

/// Run ffprobe on `path`.
pub fn probe(path: &Path, ffmpeg_path: Option<&Path>) -> Result<VideoInfo, DecodeError> {
    if !path.exists() {
        return Err(DecodeError::Io(format!("File not found: {}", path.display())));
    }
    let ffprobe = find_ffprobe(ffmpeg_path).map_err(|e| DecodeError::Io(e.to_string()))?;

    let output = create_hidden_command(&ffprobe)
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            "-select_streams",
            "v:0",
        ])
        .arg(path)
        .output()
        .map_err(|e| DecodeError::Io(format!("Failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(DecodeError::Unsupported(format!(
            "ffprobe rejected {}: {}",
            path.display(),
            stderr.trim()
        )));
    }

    let json: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| DecodeError::Unsupported(format!("Failed to parse ffprobe output: {}", e)))?;
    parse_probe_output(&json)
}

/// Frame source reading raw RGBA from an ffmpeg process.
pub struct FfmpegSource {
    path: PathBuf,
    ffmpeg: PathBuf,
    info: VideoInfo,
    process: Option<Child>,
    stdout: Option<ChildStdout>,
    next_index: u64,
}

impl FfmpegSource {
    /// Probe and validate `path`. The decode process starts on first read.
    pub fn open(path: impl AsRef<Path>, ffmpeg_path: Option<&Path>) -> Result<Self, DecodeError> {
        let path = path.as_ref().to_path_buf();
        let info = probe(&path, ffmpeg_path)?;
        let ffmpeg = find_ffmpeg(ffmpeg_path).map_err(|e| DecodeError::Io(e.to_string()))?;

        log::info!(
            "[DECODER] Opened {}: {}x{} @ {:.2}fps, {}ms, {}",
            path.display(),
            info.width,
            info.height,
            info.fps,
            info.duration_ms,
            info.codec
        );

        Ok(Self {
            path,
            ffmpeg,
            info,
            process: None,
            stdout: None,
            next_index: 0,
        })
    }

    fn start(&mut self, start_index: u64) -> Result<(), DecodeError> {
        self.stop();

        let start_secs = self.info.pts_ms(start_index) as f64 / 1000.0;
        let mut child = create_hidden_command(&self.ffmpeg)
            .args(["-v", "error", "-ss", &format!("{:.3}", start_secs), "-i"])
            .arg(&self.path)
            .args([
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgba",
                "-s",
                &format!("{}x{}", self.info.width, self.info.height),
                "-",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| DecodeError::Fatal(format!("Failed to start FFmpeg decoder: {}", e)))?;

        self.stdout = child.stdout.take();
        self.process = Some(child);
        self.next_index = start_index;
        log::debug!("[DECODER] ffmpeg started at frame {} ({:.3}s)", start_index, start_secs);
        Ok(())
    }

    fn stop(&mut self) {
        self.stdout = None;
        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let _ = process.wait();
        }
    }
}

impl FrameSource for FfmpegSource {
    fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn seek(&mut self, timestamp_ms: u64) -> Result<(), DecodeError> {
        // ffmpeg's input seek decodes from the preceding keyframe and
        // discards up to the target itself, so start exactly at the frame.
        let index = self.info.frame_index_at(timestamp_ms);
        self.start(index)
    }

    fn next_frame(&mut self) -> Result<Option<RawFrame>, DecodeError> {
        if self.stdout.is_none() {
            self.start(self.next_index)?;
        }
        let Some(stdout) = self.stdout.as_mut() else {
            return Err(DecodeError::Fatal("Decoder has no output pipe".to_string()));
        };

        let mut data = vec![0u8; self.info.frame_bytes()];
        match stdout.read_exact(&mut data) {
            Ok(()) => {
                let index = self.next_index;
                self.next_index += 1;
                Ok(Some(RawFrame {
                    index,
                    pts_ms: self.info.pts_ms(index),
                    data,
                    width: self.info.width,
                    height: self.info.height,
                }))
            },
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(DecodeError::Fatal(format!("Read error: {}", e))),
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.stop();
    }
}
