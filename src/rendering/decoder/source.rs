//! Frame source abstraction behind the decoder worker.

use thiserror::Error;

use crate::error::EditorError;

/// Stream properties reported by a source when it is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub duration_ms: u64,
    pub codec: String,
}

impl VideoInfo {
    /// Presentation timestamp of frame `index`, in whole milliseconds.
    pub fn pts_ms(&self, index: u64) -> u64 {
        (index as f64 * 1000.0 / self.fps).floor() as u64
    }

    /// Index of the frame displayed at `timestamp_ms`.
    pub fn frame_index_at(&self, timestamp_ms: u64) -> u64 {
        let mut index = (timestamp_ms as f64 * self.fps / 1000.0).floor() as u64;
        // Undo rounding in either direction so pts(index) <= ts < pts(index + 1)
        while index > 0 && self.pts_ms(index) > timestamp_ms {
            index -= 1;
        }
        while self.pts_ms(index + 1) <= timestamp_ms {
            index += 1;
        }
        index
    }

    /// Display interval of one frame in milliseconds (at least 1).
    pub fn frame_interval_ms(&self) -> u64 {
        ((1000.0 / self.fps).ceil() as u64).max(1)
    }

    pub fn frame_count(&self) -> u64 {
        (self.duration_ms as f64 * self.fps / 1000.0).floor() as u64
    }

    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// One frame as produced by a source, before it enters the cache.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub index: u64,
    pub pts_ms: u64,
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Unsupported format: {0}")]
    Unsupported(String),
    #[error("I/O error: {0}")]
    Io(String),
    /// A single damaged frame. The stream can continue past it.
    #[error("Corrupt frame {index}: {reason}")]
    Corrupt { index: u64, reason: String },
    /// Unrecoverable stream failure.
    #[error("Decode failed: {0}")]
    Fatal(String),
    #[error("Decoder stopped")]
    Stopped,
}

impl From<DecodeError> for EditorError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Unsupported(msg) => EditorError::UnsupportedFormat(msg),
            DecodeError::Io(msg) => EditorError::Io(std::io::Error::other(msg)),
            other => EditorError::Decode(other.to_string()),
        }
    }
}

/// A seekable, forward-only producer of RGBA frames.
///
/// `seek` repositions at the nearest keyframe at or before the target, so
/// the next frames returned may precede it. The decoder discards those.
pub trait FrameSource: Send {
    fn info(&self) -> &VideoInfo;

    fn seek(&mut self, timestamp_ms: u64) -> Result<(), DecodeError>;

    /// Next frame in decode order, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<RawFrame>, DecodeError>;
}

#[cfg(test)]
pub(crate) mod synthetic {
    //! Deterministic in-memory source for tests.

    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;

    /// Generates frames whose first pixel encodes the frame index:
    /// `r = index % 256`, `g = index / 256 % 256`, `b = 0x40`.
    #[derive(Debug, Clone)]
    pub struct SyntheticSource {
        info: VideoInfo,
        next_index: u64,
        pub keyframe_interval: u64,
        /// Fatal error when this frame would be produced.
        pub fail_at: Option<u64>,
        pub corrupt: HashSet<u64>,
        pub delay: Duration,
    }

    impl SyntheticSource {
        pub fn new(width: u32, height: u32, fps: f64, duration_ms: u64) -> Self {
            Self {
                info: VideoInfo {
                    width,
                    height,
                    fps,
                    duration_ms,
                    codec: "synthetic".to_string(),
                },
                next_index: 0,
                keyframe_interval: 10,
                fail_at: None,
                corrupt: HashSet::new(),
                delay: Duration::ZERO,
            }
        }

        pub fn with_fail_at(mut self, index: u64) -> Self {
            self.fail_at = Some(index);
            self
        }

        pub fn with_corrupt(mut self, indices: impl IntoIterator<Item = u64>) -> Self {
            self.corrupt.extend(indices);
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn with_keyframe_interval(mut self, interval: u64) -> Self {
            self.keyframe_interval = interval.max(1);
            self
        }
    }

    /// Frame index encoded in the first pixel of a synthetic frame.
    pub fn index_of(data: &[u8]) -> u64 {
        data[0] as u64 + data[1] as u64 * 256
    }

    impl FrameSource for SyntheticSource {
        fn info(&self) -> &VideoInfo {
            &self.info
        }

        fn seek(&mut self, timestamp_ms: u64) -> Result<(), DecodeError> {
            let target = self.info.frame_index_at(timestamp_ms);
            self.next_index = target - target % self.keyframe_interval;
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Option<RawFrame>, DecodeError> {
            let index = self.next_index;
            if index >= self.info.frame_count() {
                return Ok(None);
            }
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            if self.fail_at == Some(index) {
                return Err(DecodeError::Fatal(format!("synthetic failure at frame {}", index)));
            }
            self.next_index += 1;
            if self.corrupt.contains(&index) {
                return Err(DecodeError::Corrupt {
                    index,
                    reason: "synthetic corruption".to_string(),
                });
            }

            let pixel = [(index % 256) as u8, (index / 256 % 256) as u8, 0x40, 0xff];
            let data = pixel
                .iter()
                .copied()
                .cycle()
                .take(self.info.frame_bytes())
                .collect();
            Ok(Some(RawFrame {
                index,
                pts_ms: self.info.pts_ms(index),
                data,
                width: self.info.width,
                height: self.info.height,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(fps: f64) -> VideoInfo {
        VideoInfo {
            width: 2,
            height: 2,
            fps,
            duration_ms: 1000,
            codec: "h264".into(),
        }
    }

    #[test]
    fn test_pts_and_index_are_consistent() {
        for fps in [24.0, 29.97, 30.0, 60.0] {
            let info = info(fps);
            for ts in 0..1000 {
                let index = info.frame_index_at(ts);
                assert!(info.pts_ms(index) <= ts);
                assert!(info.pts_ms(index + 1) > ts);
            }
        }
    }

    #[test]
    fn test_frame_count_and_interval() {
        let info = info(30.0);
        assert_eq!(info.frame_count(), 30);
        assert_eq!(info.frame_interval_ms(), 34);
        assert_eq!(info.pts_ms(1), 33);
        assert_eq!(info.frame_bytes(), 16);
    }

    #[test]
    fn test_decode_error_conversion() {
        let err: EditorError = DecodeError::Unsupported("gif".into()).into();
        assert!(matches!(err, EditorError::UnsupportedFormat(_)));
        let err: EditorError = DecodeError::Io("missing".into()).into();
        assert!(matches!(err, EditorError::Io(_)));
        let err: EditorError = DecodeError::Fatal("boom".into()).into();
        assert!(matches!(err, EditorError::Decode(_)));
    }
}
