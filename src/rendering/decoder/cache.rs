//! Bounded prefetch window of decoded frames.

use std::collections::VecDeque;

use crate::rendering::types::DecodedFrame;

/// Timestamp-ordered frame window.
///
/// Timestamps are strictly increasing and the length never exceeds the
/// capacity. Frames behind the playback cursor are evicted first.
#[derive(Debug)]
pub struct FrameCache {
    frames: VecDeque<DecodedFrame>,
    capacity: usize,
}

impl FrameCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.capacity
    }

    /// Append a frame. Rejected when full or out of order.
    pub fn push(&mut self, frame: DecodedFrame) -> bool {
        if self.is_full() {
            return false;
        }
        if let Some(last) = self.frames.back() {
            if frame.timestamp_ms <= last.timestamp_ms {
                log::warn!(
                    "[DECODER] Dropping out-of-order frame {} ({}ms <= {}ms)",
                    frame.frame_index,
                    frame.timestamp_ms,
                    last.timestamp_ms
                );
                return false;
            }
        }
        self.frames.push_back(frame);
        true
    }

    /// Index of the frame with the greatest timestamp `<= timestamp_ms`.
    fn position(&self, timestamp_ms: u64) -> Option<usize> {
        let after = self.frames.partition_point(|f| f.timestamp_ms <= timestamp_ms);
        after.checked_sub(1)
    }

    /// Frame with the greatest timestamp at or before `timestamp_ms`, and
    /// whether a later frame is also cached.
    pub fn lookup(&self, timestamp_ms: u64) -> Option<(&DecodedFrame, bool)> {
        let idx = self.position(timestamp_ms)?;
        Some((&self.frames[idx], idx + 1 < self.frames.len()))
    }

    pub fn first(&self) -> Option<&DecodedFrame> {
        self.frames.front()
    }

    pub fn last(&self) -> Option<&DecodedFrame> {
        self.frames.back()
    }

    /// Drop frames older than the one covering `timestamp_ms`.
    /// Returns the number of frames evicted.
    pub fn evict_before(&mut self, timestamp_ms: u64) -> usize {
        let keep_from = self.position(timestamp_ms).unwrap_or(0);
        self.frames.drain(..keep_from).count()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
