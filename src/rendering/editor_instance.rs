//! Editor instance for managing playback state.
//!
//! Each video project gets its own EditorInstance that manages:
//! - Video decoders (screen + optional webcam)
//! - Playback state (playing, paused, current position)
//! - Frame rendering pipeline
//! - Playback events for the frontend
//!
//! Rendering is serialized by a per-instance mutex and does not depend on
//! the transport state: any timestamp can be rendered at any time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{EditorConfig, RenderBackend};
use crate::error::{EditorError, EditorResult, LockRecover};
use crate::project::VideoProject;

use super::compositor::{FrameCompositor, FrameLayout, GpuCompositor, RenderError};
use super::cursor::CursorTrack;
use super::decoder::{Decoder, FrameResult};
use super::registry::SourceOpener;
use super::renderer_state::DeviceContext;
use super::software::SoftwareCompositor;
use super::types::{
    CompositeOutput, DecodedFrame, EditorInstanceInfo, FrameOverlays, InstanceId, PlaybackEvent,
    PlaybackState, RenderedFrame,
};
use super::webcam::build_webcam_overlay;

/// Playback events buffered per instance before new ones are dropped.
const EVENT_BUFFER: usize = 64;

/// Idle tick of the playback clock while not playing.
const IDLE_TICK: Duration = Duration::from_millis(100);

/// Which compositor an instance renders with.
#[derive(Clone)]
pub enum CompositorBackend {
    Gpu(Arc<DeviceContext>),
    Software,
}

impl CompositorBackend {
    pub fn kind(&self) -> RenderBackend {
        match self {
            CompositorBackend::Gpu(_) => RenderBackend::Gpu,
            CompositorBackend::Software => RenderBackend::Software,
        }
    }
}

/// Compositor binding, rebuilt lazily after device loss.
struct RenderSlot {
    compositor: Option<Box<dyn FrameCompositor>>,
    gpu_generation: u64,
}

struct TransportInner {
    state: PlaybackState,
    position_ms: u64,
    speed: f32,
    /// State to return to once a seek completes.
    resume: PlaybackState,
}

/// Editor instance managing a video project's playback and rendering.
pub struct EditorInstance {
    /// Unique instance ID.
    pub id: InstanceId,
    project: VideoProject,
    screen: Decoder,
    webcam: Option<Decoder>,
    cursor: Option<CursorTrack>,
    backend: CompositorBackend,
    render: std::sync::Mutex<RenderSlot>,
    transport: Arc<Mutex<TransportInner>>,
    events_tx: flume::Sender<PlaybackEvent>,
    events_rx: flume::Receiver<PlaybackEvent>,
    playback: Mutex<Option<(JoinHandle<()>, CancellationToken)>>,
    exporting: AtomicBool,
    destroyed: AtomicBool,
    duration_ms: u64,
    fps: u32,
    config: EditorConfig,
}

impl EditorInstance {
    /// Open the project's sources and bind a compositor.
    ///
    /// The screen recording is required. A webcam clip or cursor track that
    /// fails to load is logged and left out.
    pub fn open(
        project: VideoProject,
        opener: &dyn SourceOpener,
        backend: CompositorBackend,
        config: EditorConfig,
    ) -> EditorResult<Self> {
        let id = uuid::Uuid::new_v4().to_string();

        log::info!(
            "[EDITOR] Creating instance {} for: {}",
            id,
            project.sources.screen_video
        );
        let screen_source = opener.open(&project.sources.screen_video)?;
        let screen = Decoder::open(screen_source, config.prefetch_window, "screen")?;

        let webcam = project.sources.webcam_video.as_ref().and_then(|path| {
            match opener
                .open(path)
                .and_then(|source| Decoder::open(source, config.prefetch_window, "webcam"))
            {
                Ok(decoder) => Some(decoder),
                Err(e) => {
                    log::warn!("[EDITOR] Webcam track {} unavailable: {}", path, e);
                    None
                },
            }
        });

        let cursor = project.sources.cursor_data.as_ref().and_then(|path| {
            match CursorTrack::load(std::path::Path::new(path)) {
                Ok(track) if !track.is_empty() => Some(track),
                Ok(_) => None,
                Err(e) => {
                    log::warn!("[EDITOR] Cursor track {} unavailable: {}", path, e);
                    None
                },
            }
        });

        let info = screen.info();
        let duration_ms = if project.duration_ms > 0 {
            project.duration_ms
        } else {
            info.duration_ms
        };
        let fps = if project.fps > 0 {
            project.fps
        } else {
            (info.fps.round() as u32).max(1)
        };

        let (events_tx, events_rx) = flume::bounded(EVENT_BUFFER);

        Ok(Self {
            id,
            project,
            screen,
            webcam,
            cursor,
            backend,
            render: std::sync::Mutex::new(RenderSlot {
                compositor: None,
                gpu_generation: 0,
            }),
            transport: Arc::new(Mutex::new(TransportInner {
                state: PlaybackState::Idle,
                position_ms: 0,
                speed: 1.0,
                resume: PlaybackState::Paused,
            })),
            events_tx,
            events_rx,
            playback: Mutex::new(None),
            exporting: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            duration_ms,
            fps,
            config,
        })
    }

    pub fn project(&self) -> &VideoProject {
        &self.project
    }

    /// Authored duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    /// Composited output size.
    pub fn output_size(&self) -> (u32, u32) {
        let info = self.screen.info();
        self.project.compositor.output_size(info.width, info.height)
    }

    /// Get instance info for the frontend.
    pub fn info(&self) -> EditorInstanceInfo {
        let info = self.screen.info();
        let (output_width, output_height) = self.output_size();
        EditorInstanceInfo {
            instance_id: self.id.clone(),
            width: info.width,
            height: info.height,
            output_width,
            output_height,
            duration_ms: self.duration_ms,
            fps: self.fps,
            frame_count: (self.duration_ms * self.fps as u64 / 1000) as u32,
            has_webcam: self.webcam.is_some(),
            has_cursor: self.cursor.is_some(),
        }
    }

    fn ensure_alive(&self) -> EditorResult<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(EditorError::NotFound(format!(
                "Editor instance {} was destroyed",
                self.id
            )));
        }
        Ok(())
    }

    fn ensure_transport(&self) -> EditorResult<()> {
        self.ensure_alive()?;
        if self.exporting.load(Ordering::SeqCst) {
            return Err(EditorError::Busy(format!(
                "Instance {} is exporting",
                self.id
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Render a single frame at the given timestamp.
    ///
    /// Waits up to the configured render budget for the decoder, then fails
    /// with the retryable `FramePending`.
    pub fn render_frame(&self, timestamp_ms: u64) -> EditorResult<RenderedFrame> {
        self.ensure_alive()?;
        let budget = Duration::from_millis(self.config.render_wait_ms);
        self.render_at(timestamp_ms, budget, false)
    }

    /// Render for export: waits up to `timeout`, and a webcam frame that
    /// should be visible but cannot be decoded fails the frame.
    pub fn render_for_export(&self, timestamp_ms: u64, timeout: Duration) -> EditorResult<RenderedFrame> {
        self.ensure_alive()?;
        self.render_at(timestamp_ms, timeout, true)
    }

    fn render_at(&self, requested_ms: u64, budget: Duration, strict: bool) -> EditorResult<RenderedFrame> {
        let deadline = Instant::now() + budget;
        let slice = Duration::from_millis(self.config.poll_interval_ms);
        let mut slot = self.render.lock().recover("editor render slot");

        let base_ms = requested_ms.min(self.screen.info().duration_ms);
        let frame = match self.screen.wait_frame(base_ms, budget, slice)? {
            FrameResult::Ready(frame) => frame,
            FrameResult::Pending => {
                return Err(EditorError::FramePending {
                    timestamp_ms: requested_ms,
                })
            },
            FrameResult::EndOfStream => {
                return Err(EditorError::Decode(format!(
                    "No screen frame at {}ms",
                    requested_ms
                )))
            },
        };

        let settings = &self.project.compositor;
        let layout = FrameLayout::new(settings, frame.width, frame.height);
        let webcam_frame = self.webcam_frame(requested_ms, deadline, slice, strict)?;
        let overlays = FrameOverlays {
            webcam: webcam_frame.and_then(|cam| {
                build_webcam_overlay(
                    &settings.webcam,
                    cam,
                    layout.output_width,
                    layout.output_height,
                    requested_ms,
                )
            }),
            cursor: self
                .cursor
                .as_ref()
                .and_then(|track| track.overlay_at(requested_ms, &settings.cursor, layout.content)),
        };

        let output = self.composite(&mut slot, &frame, &overlays)?;
        drop(slot);

        self.complete_seek(requested_ms);

        Ok(RenderedFrame {
            timestamp_ms: frame.timestamp_ms,
            requested_ms,
            width: output.width,
            height: output.height,
            data: output.data,
        })
    }

    fn webcam_frame(
        &self,
        timestamp_ms: u64,
        deadline: Instant,
        slice: Duration,
        strict: bool,
    ) -> EditorResult<Option<DecodedFrame>> {
        let Some(webcam) = &self.webcam else {
            return Ok(None);
        };
        if !self.project.compositor.webcam.is_visible_at(timestamp_ms) {
            return Ok(None);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        match webcam.wait_frame(timestamp_ms, remaining, slice) {
            Ok(FrameResult::Ready(frame)) => Ok(Some(frame)),
            // Webcam clip shorter than the screen recording
            Ok(FrameResult::EndOfStream) => Ok(None),
            Ok(FrameResult::Pending) if strict => Err(EditorError::FramePending { timestamp_ms }),
            Ok(FrameResult::Pending) => {
                log::debug!("[EDITOR] Webcam frame at {}ms not ready, skipping", timestamp_ms);
                Ok(None)
            },
            Err(e) if strict => Err(e.into()),
            Err(e) => {
                log::warn!("[EDITOR] Webcam decode failed at {}ms: {}", timestamp_ms, e);
                Ok(None)
            },
        }
    }

    fn composite(
        &self,
        slot: &mut RenderSlot,
        frame: &DecodedFrame,
        overlays: &FrameOverlays,
    ) -> EditorResult<CompositeOutput> {
        if slot.compositor.is_none() {
            let mut generation = 0;
            let compositor: Box<dyn FrameCompositor> = match &self.backend {
                CompositorBackend::Gpu(devices) => {
                    let ctx = devices.initialize()?;
                    generation = ctx.generation();
                    Box::new(GpuCompositor::new(ctx)?)
                },
                CompositorBackend::Software => Box::new(SoftwareCompositor::new()),
            };
            log::debug!(
                "[EDITOR] {} bound {:?} compositor",
                self.id,
                compositor.backend()
            );
            slot.compositor = Some(compositor);
            slot.gpu_generation = generation;
        }

        let Some(compositor) = slot.compositor.as_mut() else {
            return Err(EditorError::Render("No compositor bound".to_string()));
        };

        match compositor.render(frame, overlays, &self.project.compositor) {
            Ok(output) => Ok(output),
            Err(RenderError::DeviceLost(msg)) => {
                log::warn!("[EDITOR] {} lost its GPU device: {}", self.id, msg);
                slot.compositor = None;
                if let CompositorBackend::Gpu(devices) = &self.backend {
                    if let Err(e) = devices.reinitialize(slot.gpu_generation) {
                        log::error!("[EDITOR] GPU reinitialization failed: {}", e);
                    }
                }
                Err(EditorError::DeviceLost(msg))
            },
            Err(e) => Err(e.into()),
        }
    }

    #[cfg(test)]
    fn install_compositor(&self, compositor: Box<dyn FrameCompositor>) {
        let mut slot = self.render.lock().recover("editor render slot");
        slot.compositor = Some(compositor);
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Start the playback clock task on the current tokio runtime.
    pub fn start_playback(&self) -> EditorResult<()> {
        self.ensure_alive()?;
        let mut playback = self.playback.lock();
        if playback.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EditorError::Other(format!("No async runtime for playback: {}", e)))?;
        let cancel = CancellationToken::new();
        let handle = runtime.spawn(playback_loop(
            Arc::clone(&self.transport),
            self.events_tx.clone(),
            self.fps,
            self.duration_ms,
            cancel.clone(),
        ));
        *playback = Some((handle, cancel));
        log::debug!("[EDITOR] {} playback clock started", self.id);
        Ok(())
    }

    /// Receiver for playback events.
    pub fn subscribe(&self) -> flume::Receiver<PlaybackEvent> {
        self.events_rx.clone()
    }

    pub fn play(&self) -> EditorResult<()> {
        self.ensure_transport()?;
        let mut t = self.transport.lock();
        if t.position_ms >= self.duration_ms {
            t.position_ms = 0;
        }
        if t.state == PlaybackState::Seeking {
            t.resume = PlaybackState::Playing;
        } else {
            t.state = PlaybackState::Playing;
        }
        self.emit(&t);
        Ok(())
    }

    pub fn pause(&self) -> EditorResult<()> {
        self.ensure_transport()?;
        let mut t = self.transport.lock();
        if t.state == PlaybackState::Seeking {
            t.resume = PlaybackState::Paused;
        } else if t.state == PlaybackState::Playing {
            t.state = PlaybackState::Paused;
        }
        self.emit(&t);
        Ok(())
    }

    /// Stop playback and rewind.
    pub fn stop(&self) -> EditorResult<()> {
        self.ensure_transport()?;
        let mut t = self.transport.lock();
        t.state = PlaybackState::Idle;
        t.position_ms = 0;
        self.emit(&t);
        Ok(())
    }

    /// Move the playhead. The instance stays `Seeking` until a frame at the
    /// new position has been rendered.
    pub fn seek(&self, timestamp_ms: u64) -> EditorResult<()> {
        self.ensure_transport()?;
        let target = timestamp_ms.min(self.duration_ms);

        self.screen.seek(target.min(self.screen.info().duration_ms));
        if let Some(webcam) = &self.webcam {
            if target <= webcam.info().duration_ms {
                webcam.seek(target);
            }
        }

        let mut t = self.transport.lock();
        if t.state != PlaybackState::Seeking {
            t.resume = match t.state {
                PlaybackState::Playing => PlaybackState::Playing,
                _ => PlaybackState::Paused,
            };
        }
        t.state = PlaybackState::Seeking;
        t.position_ms = target;
        self.emit(&t);
        Ok(())
    }

    pub fn set_speed(&self, speed: f32) -> EditorResult<()> {
        self.ensure_transport()?;
        if !speed.is_finite() {
            return Err(EditorError::Other(format!("Invalid playback speed {}", speed)));
        }
        self.transport.lock().speed = speed.clamp(0.1, 4.0);
        Ok(())
    }

    pub fn speed(&self) -> f32 {
        self.transport.lock().speed
    }

    pub fn state(&self) -> PlaybackState {
        self.transport.lock().state
    }

    pub fn position_ms(&self) -> u64 {
        self.transport.lock().position_ms
    }

    fn complete_seek(&self, rendered_ms: u64) {
        let mut t = self.transport.lock();
        if t.state == PlaybackState::Seeking && t.position_ms == rendered_ms {
            t.state = t.resume;
            self.emit(&t);
        }
    }

    fn emit(&self, t: &TransportInner) {
        let _ = self.events_tx.try_send(event_for(t, self.fps));
    }

    // ========================================================================
    // Export ownership and teardown
    // ========================================================================

    /// Claim the instance for export. Transport calls fail with `Busy` until
    /// the guard is dropped.
    pub fn begin_export(self: &Arc<Self>) -> EditorResult<ExportGuard> {
        self.ensure_alive()?;
        if self
            .exporting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(EditorError::Busy(format!(
                "Instance {} is already exporting",
                self.id
            )));
        }

        let mut t = self.transport.lock();
        if t.state == PlaybackState::Playing {
            t.state = PlaybackState::Paused;
            self.emit(&t);
        }
        Ok(ExportGuard {
            instance: Arc::clone(self),
        })
    }

    pub fn is_exporting(&self) -> bool {
        self.exporting.load(Ordering::SeqCst)
    }

    /// Stop the playback task and decoder workers and release the
    /// compositor. Every later call returns `NotFound`.
    pub fn shutdown(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some((_, cancel)) = self.playback.lock().take() {
            cancel.cancel();
        }
        self.screen.shutdown();
        if let Some(webcam) = &self.webcam {
            webcam.shutdown();
        }
        self.render.lock().recover("editor render slot").compositor = None;
        log::info!("[EDITOR] Instance {} shut down", self.id);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl Drop for EditorInstance {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Export ownership of an instance, released on drop.
pub struct ExportGuard {
    instance: Arc<EditorInstance>,
}

impl ExportGuard {
    pub fn instance(&self) -> &Arc<EditorInstance> {
        &self.instance
    }
}

impl Drop for ExportGuard {
    fn drop(&mut self) {
        self.instance.exporting.store(false, Ordering::SeqCst);
    }
}

fn event_for(t: &TransportInner, fps: u32) -> PlaybackEvent {
    PlaybackEvent {
        frame: (t.position_ms * fps as u64 / 1000) as u32,
        timestamp_ms: t.position_ms,
        state: t.state,
    }
}

/// Background playback clock.
async fn playback_loop(
    transport: Arc<Mutex<TransportInner>>,
    events: flume::Sender<PlaybackEvent>,
    fps: u32,
    duration_ms: u64,
    cancel: CancellationToken,
) {
    let frame_duration = Duration::from_secs_f64(1.0 / fps.max(1) as f64);
    let mut last_tick = Instant::now();

    loop {
        let tick = {
            let t = transport.lock();
            if t.state == PlaybackState::Playing {
                frame_duration.div_f32(t.speed)
            } else {
                IDLE_TICK
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(tick) => {},
        }

        let elapsed = last_tick.elapsed();
        last_tick = Instant::now();

        let mut t = transport.lock();
        if t.state != PlaybackState::Playing {
            continue;
        }

        let advance = (elapsed.as_secs_f64() * 1000.0 * t.speed as f64) as u64;
        t.position_ms = (t.position_ms + advance).min(duration_ms);
        if t.position_ms >= duration_ms {
            t.state = PlaybackState::Paused;
        }

        let event = event_for(&t, fps);
        drop(t); // Release lock before emit
        let _ = events.try_send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{CompositorSettings, VideoSources};
    use crate::rendering::decoder::source::synthetic::{index_of, SyntheticSource};
    use crate::rendering::registry::testing::SyntheticOpener;

    fn project(webcam: bool) -> VideoProject {
        VideoProject {
            id: "p1".into(),
            name: "test".into(),
            sources: VideoSources {
                screen_video: "screen".into(),
                webcam_video: webcam.then(|| "webcam".to_string()),
                cursor_data: None,
                audio_tracks: vec![],
            },
            duration_ms: 1000,
            fps: 30,
            compositor: CompositorSettings {
                padding: 2,
                ..Default::default()
            },
        }
    }

    fn config() -> EditorConfig {
        EditorConfig {
            render_wait_ms: 2000,
            backend: RenderBackend::Software,
            ..Default::default()
        }
    }

    fn instance(webcam: bool) -> Arc<EditorInstance> {
        let opener = SyntheticOpener::new()
            .with("screen", SyntheticSource::new(8, 6, 30.0, 1000))
            .with("webcam", SyntheticSource::new(4, 4, 30.0, 500));
        Arc::new(
            EditorInstance::open(project(webcam), &opener, CompositorBackend::Software, config())
                .unwrap(),
        )
    }

    /// Frame index encoded at the centre of the content area.
    fn content_index(frame: &RenderedFrame) -> u64 {
        let i = ((frame.height / 2 * frame.width + frame.width / 2) * 4) as usize;
        index_of(&frame.data[i..i + 2])
    }

    /// Last 30fps frame whose timestamp is at or before `ts`.
    fn expected_index(ts: u64) -> u64 {
        (0..30u64).rev().find(|i| i * 1000 / 30 <= ts).unwrap_or(0)
    }

    #[test]
    fn test_render_frame_size_and_content() {
        let instance = instance(false);
        let info = instance.info();
        assert_eq!((info.output_width, info.output_height), (12, 10));
        assert_eq!(info.frame_count, 30);
        assert!(!info.has_webcam);

        let frame = instance.render_frame(500).unwrap();
        assert_eq!((frame.width, frame.height), (12, 10));
        assert_eq!(frame.data.len(), 12 * 10 * 4);
        assert_eq!(frame.requested_ms, 500);
        assert_eq!(frame.timestamp_ms, 500);
        assert_eq!(content_index(&frame), 15);
    }

    #[test]
    fn test_render_clamps_to_source_duration() {
        let instance = instance(false);
        let frame = instance.render_frame(5000).unwrap();
        assert_eq!(frame.timestamp_ms, 966);
        assert_eq!(frame.requested_ms, 5000);
    }

    #[test]
    fn test_render_at_duration_on_fresh_instance() {
        let instance = instance(false);
        let frame = instance.render_frame(1000).unwrap();
        assert_eq!(frame.timestamp_ms, 966);
        assert_eq!(content_index(&frame), 29);
    }

    #[test]
    fn test_seek_to_duration_then_render() {
        let instance = instance(false);
        instance.render_frame(0).unwrap();
        instance.seek(1000).unwrap();
        let frame = instance.render_frame(1000).unwrap();
        assert_eq!(content_index(&frame), 29);
        assert_eq!(instance.state(), PlaybackState::Paused);
    }

    #[test]
    fn test_every_frame_time_renders_its_frame() {
        let instance = instance(false);
        let times = (0..30u64).map(|i| i * 1000 / 30).chain([1000]);
        for ts in times {
            let frame = instance.render_frame(ts).unwrap();
            assert_eq!(content_index(&frame), expected_index(ts), "at {}ms", ts);
            assert!(frame.timestamp_ms <= ts);
        }
        // And backwards, forcing a seek on every step
        for ts in [1000, 700, 333, 0] {
            let frame = instance.render_frame(ts).unwrap();
            assert_eq!(content_index(&frame), expected_index(ts), "at {}ms", ts);
        }
    }

    #[test]
    fn test_webcam_missing_past_its_end() {
        let instance = instance(true);
        assert!(instance.info().has_webcam);
        assert!(instance.render_frame(100).is_ok());
        // Webcam clip ends at 500ms, the screen keeps rendering
        assert!(instance.render_frame(800).is_ok());
    }

    #[test]
    fn test_seek_then_render_completes_seek() {
        let instance = instance(false);
        instance.seek(600).unwrap();
        assert_eq!(instance.state(), PlaybackState::Seeking);
        assert_eq!(instance.position_ms(), 600);

        // Rendering another time leaves the seek pending
        instance.render_frame(0).unwrap();
        assert_eq!(instance.state(), PlaybackState::Seeking);

        let frame = instance.render_frame(600).unwrap();
        assert_eq!(content_index(&frame), 18);
        assert_eq!(instance.state(), PlaybackState::Paused);
    }

    #[test]
    fn test_transport_states() {
        let instance = instance(false);
        assert_eq!(instance.state(), PlaybackState::Idle);
        instance.play().unwrap();
        assert_eq!(instance.state(), PlaybackState::Playing);
        instance.seek(300).unwrap();
        instance.render_frame(300).unwrap();
        assert_eq!(instance.state(), PlaybackState::Playing);
        instance.pause().unwrap();
        assert_eq!(instance.state(), PlaybackState::Paused);
        instance.set_speed(10.0).unwrap();
        assert_eq!(instance.speed(), 4.0);
        instance.stop().unwrap();
        assert_eq!((instance.state(), instance.position_ms()), (PlaybackState::Idle, 0));

        let events = instance.subscribe();
        assert!(events.try_iter().count() >= 5);
    }

    #[test]
    fn test_transport_busy_while_exporting() {
        let instance = instance(false);
        instance.play().unwrap();
        let guard = instance.begin_export().unwrap();
        assert_eq!(instance.state(), PlaybackState::Paused);
        assert!(matches!(instance.play(), Err(EditorError::Busy(_))));
        assert!(matches!(instance.seek(10), Err(EditorError::Busy(_))));
        assert!(matches!(instance.begin_export(), Err(EditorError::Busy(_))));
        // Rendering is still allowed
        assert!(instance.render_for_export(100, Duration::from_secs(2)).is_ok());

        drop(guard);
        assert!(instance.play().is_ok());
    }

    #[test]
    fn test_calls_after_shutdown_are_not_found() {
        let instance = instance(true);
        instance.shutdown();
        assert!(matches!(instance.render_frame(0), Err(EditorError::NotFound(_))));
        assert!(matches!(instance.play(), Err(EditorError::NotFound(_))));
        assert!(matches!(instance.begin_export(), Err(EditorError::NotFound(_))));
    }

    #[test]
    fn test_pending_when_decode_is_slow() {
        let opener = SyntheticOpener::new().with(
            "screen",
            SyntheticSource::new(4, 4, 30.0, 1000).with_delay(Duration::from_millis(300)),
        );
        let config = EditorConfig {
            render_wait_ms: 10,
            ..config()
        };
        let instance =
            EditorInstance::open(project(false), &opener, CompositorBackend::Software, config).unwrap();
        let err = instance.render_frame(0).unwrap_err();
        assert!(err.is_retryable());
    }

    struct LosingCompositor;

    impl FrameCompositor for LosingCompositor {
        fn backend(&self) -> RenderBackend {
            RenderBackend::Gpu
        }

        fn render(
            &mut self,
            _frame: &DecodedFrame,
            _overlays: &FrameOverlays,
            _settings: &CompositorSettings,
        ) -> Result<CompositeOutput, RenderError> {
            Err(RenderError::DeviceLost("simulated".into()))
        }
    }

    #[test]
    fn test_device_loss_rebuilds_compositor() {
        let instance = instance(false);
        instance.install_compositor(Box::new(LosingCompositor));
        let err = instance.render_frame(0).unwrap_err();
        assert!(err.needs_reinit());
        // The next frame gets a fresh compositor
        assert!(instance.render_frame(0).is_ok());
    }

    #[test]
    fn test_concurrent_renders_are_consistent() {
        let instance = instance(false);
        let handles: Vec<_> = (0..6)
            .map(|worker| {
                let instance = Arc::clone(&instance);
                std::thread::spawn(move || {
                    for i in 0..15u64 {
                        let ts = (worker * 151 + i * 67) % 1000;
                        let frame = instance.render_frame(ts).unwrap();
                        assert!(frame.timestamp_ms <= ts);
                        assert_eq!(content_index(&frame), expected_index(ts));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_render_while_seeking_returns_requested_frame() {
        let instance = instance(false);
        let renderer = {
            let instance = Arc::clone(&instance);
            std::thread::spawn(move || {
                for ts in (0..1000).step_by(40) {
                    let frame = instance.render_frame(ts).unwrap();
                    assert_eq!(content_index(&frame), expected_index(ts));
                }
            })
        };
        for ts in [900, 100, 700, 300, 500] {
            instance.seek(ts).unwrap();
            std::thread::sleep(Duration::from_millis(3));
        }
        renderer.join().unwrap();
    }

    #[tokio::test]
    async fn test_playback_clock_advances() {
        let instance = instance(false);
        let events = instance.subscribe();
        instance.start_playback().unwrap();
        instance.set_speed(4.0).unwrap();
        instance.play().unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(instance.position_ms() > 0);
        assert!(events.try_iter().any(|e| e.state == PlaybackState::Playing));
        instance.shutdown();
    }
}
