//! Decode, render and export tunables.

use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{EditorResult, ResultExt};
use crate::logging::LogConfig;
use crate::rendering::renderer::GpuOptions;

/// Which compositor implementation new instances use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum RenderBackend {
    #[default]
    Gpu,
    /// CPU reference path, used when no adapter is available and in tests.
    Software,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum GpuPowerPreference {
    #[default]
    HighPerformance,
    LowPower,
}

impl From<GpuPowerPreference> for wgpu::PowerPreference {
    fn from(pref: GpuPowerPreference) -> Self {
        match pref {
            GpuPowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
            GpuPowerPreference::LowPower => wgpu::PowerPreference::LowPower,
        }
    }
}

/// Centralized editor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EditorConfig {
    /// Decoded frames held ahead of the playback cursor (5-10).
    pub prefetch_window: usize,

    /// How long `render_frame` re-polls a pending decode before giving up (0-5000ms).
    pub render_wait_ms: u64,

    /// Sleep between decoder re-polls (1-50ms).
    pub poll_interval_ms: u64,

    /// Per-frame decode budget during export (100-120000ms).
    pub export_frame_timeout_ms: u64,

    pub backend: RenderBackend,

    pub power_preference: GpuPowerPreference,

    /// Explicit ffmpeg binary. None = bundled sidecar, then system PATH.
    pub ffmpeg_path: Option<PathBuf>,

    pub log: LogConfig,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            prefetch_window: 8,
            render_wait_ms: 250,
            poll_interval_ms: 2,
            export_frame_timeout_ms: 10_000,
            backend: RenderBackend::Gpu,
            power_preference: GpuPowerPreference::HighPerformance,
            ffmpeg_path: None,
            log: LogConfig::default(),
        }
    }
}

impl EditorConfig {
    pub fn gpu_options(&self) -> GpuOptions {
        GpuOptions {
            power_preference: self.power_preference,
            force_fallback_adapter: false,
        }
    }

    /// Validate and clamp settings to acceptable ranges.
    pub fn validate(&mut self) {
        self.prefetch_window = self.prefetch_window.clamp(5, 10);
        self.render_wait_ms = self.render_wait_ms.min(5_000);
        self.poll_interval_ms = self.poll_interval_ms.clamp(1, 50);
        self.export_frame_timeout_ms = self.export_frame_timeout_ms.clamp(100, 120_000);
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> EditorResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let mut config: EditorConfig = serde_json::from_str(&text)?;
        config.validate();
        Ok(config)
    }

    /// Apply `SNAPIT_EDITOR_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply `SNAPIT_EDITOR_*` overrides from the given key/value pairs.
    /// Unparseable values are logged and ignored.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let value = value.as_ref();
            match key.as_ref() {
                "SNAPIT_EDITOR_BACKEND" => match value.to_ascii_lowercase().as_str() {
                    "gpu" => self.backend = RenderBackend::Gpu,
                    "software" | "cpu" => self.backend = RenderBackend::Software,
                    other => log::warn!("[CONFIG] Unknown backend '{}'", other),
                },
                "SNAPIT_EDITOR_PREFETCH" => match value.parse() {
                    Ok(n) => self.prefetch_window = n,
                    Err(_) => log::warn!("[CONFIG] Invalid prefetch window '{}'", value),
                },
                "SNAPIT_EDITOR_RENDER_WAIT_MS" => match value.parse() {
                    Ok(ms) => self.render_wait_ms = ms,
                    Err(_) => log::warn!("[CONFIG] Invalid render wait '{}'", value),
                },
                "SNAPIT_EDITOR_FFMPEG" => self.ffmpeg_path = Some(PathBuf::from(value)),
                "SNAPIT_EDITOR_LOW_POWER" => {
                    if value == "1" || value.eq_ignore_ascii_case("true") {
                        self.power_preference = GpuPowerPreference::LowPower;
                    }
                },
                _ => {},
            }
        }
        self.validate();
    }
}

lazy_static! {
    /// Global editor configuration, read when instances and exports start.
    pub static ref EDITOR_CONFIG: RwLock<EditorConfig> = RwLock::new(EditorConfig::default());
}

/// Snapshot of the current configuration.
pub fn get_editor_config() -> EditorConfig {
    EDITOR_CONFIG.read().clone()
}

/// Replace the configuration (batch update). Values are clamped.
pub fn set_editor_config(config: EditorConfig) {
    let mut current = EDITOR_CONFIG.write();
    *current = config;
    current.validate();
    log::debug!("[CONFIG] Editor config updated: {:?}", *current);
}
