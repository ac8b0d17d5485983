//! H.264 encoder selection and hardware acceleration detection.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use lazy_static::lazy_static;
use parking_lot::Mutex;

use crate::ffmpeg::create_hidden_command;

use super::ffmpeg::quality_to_crf;

/// Encoder type for mp4 export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderType {
    /// NVIDIA NVENC hardware encoder (h264_nvenc).
    Nvenc,
    /// Software x264 encoder (libx264).
    X264,
}

/// Encoder configuration with codec-specific parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderConfig {
    pub encoder_type: EncoderType,
    pub codec: String,
    pub preset: String,
    pub quality_param: String,
    pub quality_value: u8,
}

lazy_static! {
    /// NVENC probe results per ffmpeg binary.
    static ref NVENC_AVAILABLE: Mutex<HashMap<PathBuf, bool>> = Mutex::new(HashMap::new());
}

/// NVENC preset mapping (p1=fastest, p7=highest quality).
fn nvenc_preset_from_quality(quality: u32) -> &'static str {
    match quality {
        0..=25 => "p1",
        26..=50 => "p3",
        51..=75 => "p4",
        76..=90 => "p5",
        _ => "p7",
    }
}

/// Convert quality percentage to NVENC CQ value.
/// Quality 100% -> CQ 15, Quality 0% -> CQ 40.
fn quality_to_cq(quality: u32) -> u8 {
    let cq = 40.0 - (quality.min(100) as f32 / 100.0) * 25.0;
    (cq as u8).clamp(15, 40)
}

/// Check whether `ffmpeg` can encode with NVENC. Cached per binary.
pub fn is_nvenc_available(ffmpeg_path: &Path) -> bool {
    if let Some(&cached) = NVENC_AVAILABLE.lock().get(ffmpeg_path) {
        return cached;
    }

    // NVENC has a minimum frame size (~145x49), so test with 256x256
    let result = create_hidden_command(ffmpeg_path)
        .args([
            "-f",
            "lavfi",
            "-i",
            "testsrc=duration=0.01:size=256x256:rate=1",
            "-c:v",
            "h264_nvenc",
            "-f",
            "null",
            "-",
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    let available = match result {
        Ok(status) => status.success(),
        Err(e) => {
            log::debug!("[ENCODER] NVENC check failed: {}", e);
            false
        },
    };
    log::info!(
        "[ENCODER] NVENC {}",
        if available { "available" } else { "not available" }
    );
    NVENC_AVAILABLE.lock().insert(ffmpeg_path.to_path_buf(), available);
    available
}

/// x264 settings for `quality`.
pub fn x264_config(quality: u32) -> EncoderConfig {
    EncoderConfig {
        encoder_type: EncoderType::X264,
        codec: "libx264".to_string(),
        preset: "superfast".to_string(),
        quality_param: "-crf".to_string(),
        quality_value: quality_to_crf(quality),
    }
}

/// NVENC settings for `quality`.
pub fn nvenc_config(quality: u32) -> EncoderConfig {
    EncoderConfig {
        encoder_type: EncoderType::Nvenc,
        codec: "h264_nvenc".to_string(),
        preset: nvenc_preset_from_quality(quality).to_string(),
        quality_param: "-cq".to_string(),
        quality_value: quality_to_cq(quality),
    }
}

/// Select the best available encoder based on hardware and preferences.
pub fn select_encoder(ffmpeg_path: &Path, quality: u32, prefer_hardware: bool) -> EncoderConfig {
    if prefer_hardware && is_nvenc_available(ffmpeg_path) {
        log::info!("[ENCODER] Using NVENC hardware encoder");
        nvenc_config(quality)
    } else {
        log::info!("[ENCODER] Using x264 software encoder");
        x264_config(quality)
    }
}
