//! Prefetching video decoder.
//!
//! A background thread pulls frames from a [`FrameSource`] into a bounded
//! [`FrameCache`]. Requests never block on decode: `get_frame` answers from
//! the cache or returns `Pending` and points the worker at the request.
//!
//! Backpressure: the worker sleeps while the window is full and nothing
//! behind the playback cursor can be evicted. Seeks bump a generation
//! counter so frames decoded for an earlier position are discarded.

mod cache;
pub mod ffmpeg;
pub mod source;

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::types::DecodedFrame;

pub use cache::FrameCache;
pub use ffmpeg::FfmpegSource;
pub use source::{DecodeError, FrameSource, RawFrame, VideoInfo};

/// Smallest and largest prefetch windows.
pub const MIN_WINDOW: usize = 5;
pub const MAX_WINDOW: usize = 10;

/// Consecutive corrupt frames tolerated before the stream is declared dead.
const MAX_CONSECUTIVE_CORRUPT: u32 = 32;

/// Frames past the decode head still treated as "on the way" rather than
/// needing a seek.
const LOOKAHEAD_SLACK_FRAMES: u64 = 2;

/// Answer to a frame request.
#[derive(Debug, Clone)]
pub enum FrameResult {
    Ready(DecodedFrame),
    /// Not decoded yet; poll again.
    Pending,
    /// Requested timestamp is past the end of the stream.
    EndOfStream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderStatus {
    Running,
    EndOfStream,
    Failed,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub cached: usize,
    pub capacity: usize,
    /// Timestamp of the newest decoded frame in the current run.
    pub head_ms: Option<u64>,
    pub generation: u64,
    pub status: DecoderStatus,
}

struct DecoderState {
    cache: FrameCache,
    generation: u64,
    pending_seek: Option<u64>,
    /// Earliest timestamp the current run can answer.
    run_start: u64,
    /// Pre-roll frames below this index are dropped.
    skip_before_index: u64,
    /// Newest dropped pre-roll frame, shown when the frames from
    /// `run_start` onward failed to decode.
    preroll: Option<DecodedFrame>,
    head: Option<u64>,
    /// Latest requested timestamp.
    cursor_ms: u64,
    status: DecoderStatus,
    error: Option<DecodeError>,
}

struct Shared {
    state: Mutex<DecoderState>,
    cond: Condvar,
}

/// Per-source decoder with its own worker thread.
pub struct Decoder {
    label: String,
    info: VideoInfo,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Decoder {
    /// Start decoding `source` from the beginning.
    pub fn open(source: Box<dyn FrameSource>, window: usize, label: &str) -> Result<Self, DecodeError> {
        let info = source.info().clone();
        if info.width == 0 || info.height == 0 {
            return Err(DecodeError::Unsupported("Video has zero dimensions".to_string()));
        }
        if !(info.fps.is_finite() && info.fps > 0.0) {
            return Err(DecodeError::Unsupported(format!("Invalid frame rate {}", info.fps)));
        }

        let window = window.clamp(MIN_WINDOW, MAX_WINDOW);
        let shared = Arc::new(Shared {
            state: Mutex::new(DecoderState {
                cache: FrameCache::new(window),
                generation: 0,
                pending_seek: None,
                run_start: 0,
                skip_before_index: 0,
                preroll: None,
                head: None,
                cursor_ms: 0,
                status: DecoderStatus::Running,
                error: None,
            }),
            cond: Condvar::new(),
        });

        let worker = {
            let shared = Arc::clone(&shared);
            let label = label.to_string();
            std::thread::Builder::new()
                .name(format!("decoder-{}", label))
                .spawn(move || decode_loop(source, shared, &label))
                .map_err(|e| DecodeError::Io(format!("Failed to spawn decoder thread: {}", e)))?
        };

        log::debug!(
            "[DECODER] {} started: {}x{} @ {:.2}fps, window {}",
            label,
            info.width,
            info.height,
            info.fps,
            window
        );

        Ok(Self {
            label: label.to_string(),
            info,
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    /// Frame with the greatest timestamp at or before `timestamp_ms`.
    ///
    /// Returns promptly. When the frame is neither cached nor being decoded
    /// the worker is redirected to it and `Pending` is returned.
    pub fn get_frame(&self, timestamp_ms: u64) -> Result<FrameResult, DecodeError> {
        let mut state = self.shared.state.lock();
        self.get_frame_locked(&mut state, timestamp_ms)
    }

    /// Poll `get_frame` until it is no longer `Pending` or `budget` runs out.
    pub fn wait_frame(
        &self,
        timestamp_ms: u64,
        budget: Duration,
        slice: Duration,
    ) -> Result<FrameResult, DecodeError> {
        let deadline = Instant::now() + budget;
        let mut state = self.shared.state.lock();
        loop {
            match self.get_frame_locked(&mut state, timestamp_ms)? {
                FrameResult::Pending => {},
                done => return Ok(done),
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(FrameResult::Pending);
            }
            let wait = slice.min(deadline - now);
            self.shared.cond.wait_for(&mut state, wait);
        }
    }

    /// Flush the prefetch window and restart decoding at `timestamp_ms`.
    pub fn seek(&self, timestamp_ms: u64) {
        let mut state = self.shared.state.lock();
        self.seek_locked(&mut state, timestamp_ms);
    }

    pub fn stats(&self) -> DecoderStats {
        let state = self.shared.state.lock();
        DecoderStats {
            cached: state.cache.len(),
            capacity: state.cache.capacity(),
            head_ms: state.head,
            generation: state.generation,
            status: state.status,
        }
    }

    /// Stop the worker and wait for it to exit.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.status = DecoderStatus::Stopped;
            state.cache.clear();
            self.shared.cond.notify_all();
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                log::error!("[DECODER] {} worker panicked", self.label);
            } else {
                log::debug!("[DECODER] {} stopped", self.label);
            }
        }
    }

    fn get_frame_locked(
        &self,
        state: &mut MutexGuard<'_, DecoderState>,
        timestamp_ms: u64,
    ) -> Result<FrameResult, DecodeError> {
        match state.status {
            DecoderStatus::Failed => {
                return Err(state
                    .error
                    .clone()
                    .unwrap_or_else(|| DecodeError::Fatal("decoder failed".to_string())))
            },
            DecoderStatus::Stopped => return Err(DecodeError::Stopped),
            DecoderStatus::Running | DecoderStatus::EndOfStream => {},
        }

        if timestamp_ms > self.info.duration_ms {
            return Ok(FrameResult::EndOfStream);
        }

        state.cursor_ms = timestamp_ms;
        if state.cache.is_full() {
            self.shared.cond.notify_all();
        }

        let at_end = state.status == DecoderStatus::EndOfStream;
        let last_index = self.last_index();
        if let Some((frame, has_next)) = state.cache.lookup(timestamp_ms) {
            let covered = has_next
                || timestamp_ms < self.info.pts_ms(frame.frame_index + 1)
                || frame.frame_index >= last_index
                || at_end;
            if covered {
                return Ok(FrameResult::Ready(frame.clone()));
            }
        } else if state.run_start <= timestamp_ms && (at_end || !state.cache.is_empty()) {
            // Everything from the run start up to the request was lost
            return match &state.preroll {
                Some(frame) => Ok(FrameResult::Ready(frame.clone())),
                None => Err(DecodeError::Corrupt {
                    index: self.display_index(timestamp_ms),
                    reason: "no decodable frame at or before this time".to_string(),
                }),
            };
        }

        let wanted_ms = self.info.pts_ms(self.display_index(timestamp_ms));
        let reach = state.head.unwrap_or(state.run_start)
            + (state.cache.capacity() as u64 + LOOKAHEAD_SLACK_FRAMES) * self.info.frame_interval_ms();
        let in_flight = state.status == DecoderStatus::Running
            && wanted_ms >= state.run_start
            && wanted_ms <= reach;
        if !in_flight {
            self.seek_locked(state, timestamp_ms);
        }
        Ok(FrameResult::Pending)
    }

    fn last_index(&self) -> u64 {
        self.info.frame_count().saturating_sub(1)
    }

    /// Frame shown at `timestamp_ms`. The duration itself maps to the last
    /// frame.
    fn display_index(&self, timestamp_ms: u64) -> u64 {
        self.info.frame_index_at(timestamp_ms).min(self.last_index())
    }

    fn seek_locked(&self, state: &mut MutexGuard<'_, DecoderState>, timestamp_ms: u64) {
        if matches!(state.status, DecoderStatus::Failed | DecoderStatus::Stopped) {
            return;
        }
        let target = self.display_index(timestamp_ms);
        state.generation += 1;
        state.cache.clear();
        state.pending_seek = Some(self.info.pts_ms(target));
        state.run_start = self.info.pts_ms(target);
        state.skip_before_index = target;
        state.preroll = None;
        state.head = None;
        state.cursor_ms = timestamp_ms;
        state.status = DecoderStatus::Running;
        log::debug!(
            "[DECODER] {} seek to {}ms (frame {}, generation {})",
            self.label,
            timestamp_ms,
            target,
            state.generation
        );
        self.shared.cond.notify_all();
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

enum Step {
    Seek(u64),
    Decode(u64),
    Exit,
}

fn next_step(shared: &Shared) -> Step {
    let mut state = shared.state.lock();
    loop {
        if state.status == DecoderStatus::Stopped {
            return Step::Exit;
        }
        if let Some(ts) = state.pending_seek.take() {
            return Step::Seek(ts);
        }
        if state.status != DecoderStatus::Running {
            shared.cond.wait(&mut state);
            continue;
        }
        if state.cache.is_full() {
            let cursor = state.cursor_ms;
            if state.cache.evict_before(cursor) > 0 {
                if let Some(first_ms) = state.cache.first().map(|f| f.timestamp_ms) {
                    state.run_start = state.run_start.max(first_ms);
                }
                continue;
            }
            shared.cond.wait(&mut state);
            continue;
        }
        return Step::Decode(state.generation);
    }
}

fn decode_loop(mut source: Box<dyn FrameSource>, shared: Arc<Shared>, label: &str) {
    let mut consecutive_corrupt = 0u32;

    loop {
        match next_step(&shared) {
            Step::Exit => break,
            Step::Seek(ts) => {
                consecutive_corrupt = 0;
                if let Err(err) = source.seek(ts) {
                    fail(&shared, label, err);
                }
            },
            Step::Decode(generation) => {
                let started = Instant::now();
                let result = source.next_frame();
                let decode_cost = started.elapsed();

                let mut state = shared.state.lock();
                if state.generation != generation || state.status == DecoderStatus::Stopped {
                    continue;
                }

                match result {
                    Ok(Some(raw)) => {
                        if raw.data.len() != raw.width as usize * raw.height as usize * 4 {
                            consecutive_corrupt += 1;
                            log::warn!(
                                "[DECODER] {} frame {} has {} bytes, skipping",
                                label,
                                raw.index,
                                raw.data.len()
                            );
                        } else {
                            consecutive_corrupt = 0;
                            let frame = DecodedFrame {
                                frame_index: raw.index,
                                timestamp_ms: raw.pts_ms,
                                data: raw.data.into(),
                                width: raw.width,
                                height: raw.height,
                                decode_cost,
                            };
                            if raw.index < state.skip_before_index {
                                state.preroll = Some(frame);
                            } else if state.cache.push(frame) {
                                state.head = Some(raw.pts_ms);
                                shared.cond.notify_all();
                            }
                        }
                    },
                    Ok(None) => {
                        log::debug!("[DECODER] {} reached end of stream", label);
                        state.status = DecoderStatus::EndOfStream;
                        shared.cond.notify_all();
                    },
                    Err(DecodeError::Corrupt { index, reason }) => {
                        consecutive_corrupt += 1;
                        log::warn!("[DECODER] {} skipping corrupt frame {}: {}", label, index, reason);
                    },
                    Err(err) => {
                        drop(state);
                        fail(&shared, label, err);
                        continue;
                    },
                }

                if consecutive_corrupt > MAX_CONSECUTIVE_CORRUPT {
                    drop(state);
                    fail(
                        &shared,
                        label,
                        DecodeError::Fatal(format!(
                            "{} consecutive corrupt frames",
                            consecutive_corrupt
                        )),
                    );
                }
            },
        }
    }
}

fn fail(shared: &Shared, label: &str, err: DecodeError) {
    log::error!("[DECODER] {} failed: {}", label, err);
    let mut state = shared.state.lock();
    if state.status != DecoderStatus::Stopped {
        state.status = DecoderStatus::Failed;
        state.error = Some(err);
        state.cache.clear();
    }
    shared.cond.notify_all();
}
