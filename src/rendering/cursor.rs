//! Cursor event track and marker resolution.
//!
//! Events are recorded in normalized capture coordinates (0-1). The track
//! maps them into output pixels for a given content rectangle.

use std::fs::File;
use std::path::Path;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{EditorResult, ResultExt};
use crate::project::CursorStyle;

use super::shading::parse_hex_color;
use super::types::{ClickPulse, CursorOverlay, Rect};

/// Marker radius at scale 1.0, in output pixels.
pub const BASE_CURSOR_RADIUS: f32 = 12.0;

/// Cursor move event with timestamp and normalized position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CursorMoveEvent {
    /// Timestamp in milliseconds from recording start.
    pub time_ms: f64,
    /// Normalized X position (0.0-1.0).
    pub x: f64,
    /// Normalized Y position (0.0-1.0).
    pub y: f64,
    #[serde(default)]
    pub cursor_id: String,
}

/// Cursor click event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CursorClickEvent {
    pub time_ms: f64,
    /// True if button pressed, false if released.
    pub down: bool,
    /// Mouse button number (0=left, 1=right, 2=middle).
    #[serde(default)]
    pub cursor_num: u8,
}

/// Recorded cursor events (moves and clicks).
#[derive(Default, Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CursorEvents {
    #[serde(default)]
    pub clicks: Vec<CursorClickEvent>,
    #[serde(default)]
    pub moves: Vec<CursorMoveEvent>,
}

impl CursorEvents {
    /// Load cursor events from a JSON file.
    pub fn load_from_file(path: &Path) -> EditorResult<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open cursor file {}", path.display()))?;
        let events = serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("Failed to parse cursor data {}", path.display()))?;
        Ok(events)
    }
}

/// Time-sorted cursor events with lookup by timestamp.
#[derive(Debug, Clone)]
pub struct CursorTrack {
    moves: Vec<CursorMoveEvent>,
    presses: Vec<f64>,
}

impl CursorTrack {
    pub fn new(events: CursorEvents) -> Self {
        let mut moves = events.moves;
        moves.retain(|m| m.time_ms.is_finite() && m.x.is_finite() && m.y.is_finite());
        moves.sort_by(|a, b| a.time_ms.total_cmp(&b.time_ms));

        let mut presses: Vec<f64> = events
            .clicks
            .iter()
            .filter(|c| c.down && c.time_ms.is_finite())
            .map(|c| c.time_ms)
            .collect();
        presses.sort_by(|a, b| a.total_cmp(b));

        Self { moves, presses }
    }

    pub fn load(path: &Path) -> EditorResult<Self> {
        Ok(Self::new(CursorEvents::load_from_file(path)?))
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Normalized position at `time_ms`.
    ///
    /// Before the first event its position is held. With `smooth` the
    /// position is interpolated between neighbouring events, otherwise the
    /// latest event at or before `time_ms` is held. `None` only for a track
    /// with no moves.
    pub fn position_at(&self, time_ms: f64, smooth: bool) -> Option<(f64, f64)> {
        let idx = self.moves.partition_point(|m| m.time_ms <= time_ms);
        if idx == 0 {
            return self.moves.first().map(|m| (m.x, m.y));
        }
        let prev = &self.moves[idx - 1];
        if !smooth {
            return Some((prev.x, prev.y));
        }
        match self.moves.get(idx) {
            Some(next) if next.time_ms > prev.time_ms => {
                let t = (time_ms - prev.time_ms) / (next.time_ms - prev.time_ms);
                Some((
                    prev.x + (next.x - prev.x) * t,
                    prev.y + (next.y - prev.y) * t,
                ))
            },
            _ => Some((prev.x, prev.y)),
        }
    }

    /// Progress (0-1) of the most recent press still animating at `time_ms`.
    pub fn active_click(&self, time_ms: f64, duration_ms: f64) -> Option<f32> {
        if duration_ms <= 0.0 {
            return None;
        }
        let idx = self.presses.partition_point(|&t| t <= time_ms);
        let press = *self.presses.get(idx.checked_sub(1)?)?;
        let elapsed = time_ms - press;
        (elapsed < duration_ms).then(|| (elapsed / duration_ms) as f32)
    }

    /// Resolve the marker for one output frame.
    pub fn overlay_at(&self, time_ms: u64, style: &CursorStyle, content: Rect) -> Option<CursorOverlay> {
        if !style.visible {
            return None;
        }
        let time_ms = time_ms as f64;
        let (nx, ny) = self.position_at(time_ms, style.smooth_movement)?;
        let x = content.x + nx.clamp(0.0, 1.0) as f32 * content.width;
        let y = content.y + ny.clamp(0.0, 1.0) as f32 * content.height;
        let radius = BASE_CURSOR_RADIUS * style.scale.clamp(0.1, 10.0);

        let highlight = &style.click_highlight;
        let click = if highlight.enabled {
            self.active_click(time_ms, highlight.duration_ms as f64)
                .map(|progress| ClickPulse {
                    x,
                    y,
                    progress,
                    color: parse_hex_color(&highlight.color),
                    radius: highlight.radius.max(radius),
                })
        } else {
            None
        };

        Some(CursorOverlay {
            x,
            y,
            radius,
            color: parse_hex_color(&style.color),
            border_color: parse_hex_color(&style.border_color),
            click,
        })
    }
}
