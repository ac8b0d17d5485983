//! FFmpeg binary discovery.
//!
//! Resolution order: configured path, ffmpeg-sidecar's bundled binary, then
//! the system PATH. Every candidate is checked with `-version`.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{EditorError, EditorResult};

/// Create a Command configured to hide the console window on Windows.
pub fn create_hidden_command(program: &Path) -> Command {
    #[allow(unused_mut)]
    let mut cmd = Command::new(program);

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd
}

/// Find a working ffmpeg binary.
pub fn find_ffmpeg(configured: Option<&Path>) -> EditorResult<PathBuf> {
    find_binary("ffmpeg", configured, ffmpeg_sidecar::paths::ffmpeg_path())
}

/// Find a working ffprobe binary.
///
/// A configured ffmpeg path implies ffprobe lives next to it.
pub fn find_ffprobe(configured_ffmpeg: Option<&Path>) -> EditorResult<PathBuf> {
    let sibling = configured_ffmpeg.and_then(|ffmpeg| {
        ffmpeg
            .parent()
            .map(|dir| dir.join(binary_name("ffprobe")))
    });
    find_binary(
        "ffprobe",
        sibling.as_deref(),
        ffmpeg_sidecar::ffprobe::ffprobe_path(),
    )
}

fn binary_name(name: &str) -> String {
    if cfg!(windows) {
        format!("{}.exe", name)
    } else {
        name.to_string()
    }
}

fn find_binary(name: &str, configured: Option<&Path>, sidecar_path: PathBuf) -> EditorResult<PathBuf> {
    if let Some(path) = configured {
        if test_binary(path) {
            log::debug!("[FFMPEG] Using configured {}: {}", name, path.display());
            return Ok(path.to_path_buf());
        }
        log::warn!(
            "[FFMPEG] Configured {} at {} does not run, searching",
            name,
            path.display()
        );
    }

    if test_binary(&sidecar_path) {
        log::debug!("[FFMPEG] Using sidecar {}: {}", name, sidecar_path.display());
        return Ok(sidecar_path);
    }

    if let Some(path) = find_in_system_path(&binary_name(name)) {
        if test_binary(&path) {
            log::debug!("[FFMPEG] Using system PATH {}: {}", name, path.display());
            return Ok(path);
        }
    }

    log::warn!("[FFMPEG] No working {} found", name);
    Err(EditorError::FfmpegNotFound)
}

/// Test if a binary works by running -version.
fn test_binary(path: &Path) -> bool {
    create_hidden_command(path)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Find an executable in system PATH.
fn find_in_system_path(name: &str) -> Option<PathBuf> {
    let cmd = if cfg!(windows) { "where" } else { "which" };

    create_hidden_command(Path::new(cmd))
        .arg(name)
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                let path_str = String::from_utf8_lossy(&output.stdout);
                let first_line = path_str.lines().next()?.trim();
                if !first_line.is_empty() {
                    return Some(PathBuf::from(first_line));
                }
            }
            None
        })
}
