//! Capture Session (spec §4.4) and the `Engine` that owns the fixed-size
//! slot array of sessions (spec §3). This module is the glue: it drives
//! mode selection (`mode_select`), the sync protocol (`sync`), the
//! post-processor (`postprocess`), and the recorder thread (`recorder`),
//! and exposes the handle-based consumer API from spec §6.
//!
//! Grounded in `PsychVideoCaptureSupportLibDC1394.c`'s `PsychDCOpenCamera`/
//! `PsychDCVideoCaptureRate`/`PsychDCGetTextureFromCapture`/
//! `PsychDCVideoCaptureRate(..., stop)` family of entry points, and in the
//! teacher's `session::Recorder` mutex/condvar handoff for the
//! producer/consumer single-slot buffer shape (spec §9 design note (b)).

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::error::{CaptureError, Result};
use crate::iidc::{CameraId, DequeueMode, IidcSurface};
use crate::mode_select;
use crate::parameter::{self, Parameter, ParameterResponse};
use crate::postprocess;
use crate::recorder::{self, RecorderConfig};
use crate::sinks::{
    select_internal_format, EncoderSink, TextureInternalFormat, TextureSink, TextureSpec,
};
use crate::sync::{self, SyncPeer, SyncRole};
use crate::types::{
    parse_movie_name, recording_flags, Counters, FrameBuffer, NegotiatedParams, RecordingState,
    RequestedParams, Roi,
};

/// Opaque session handle, an index into the engine's fixed slot array
/// (spec §3: "addressed by an integer handle 0..N-1").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Handle(pub u32);

/// `pull_frame`'s blocking behavior (spec §4.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PullMode {
    Poll,
    Wait,
}

/// `pull_frame`'s result (spec §4.4).
#[derive(Clone, Debug, PartialEq)]
pub enum PullOutcome {
    Pending,
    End,
    Frame(FrameBuffer),
}

/// The bifurcated `checkForImage` argument to `get_image` (spec §4.4):
/// `1`=poll, `2`=blocking wait, `4`=no-op, `0`=commit the last probed
/// frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckForImage {
    Poll,
    Wait,
    NoOp,
    Commit,
}

impl TryFrom<u32> for CheckForImage {
    type Error = CaptureError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(CheckForImage::Poll),
            2 => Ok(CheckForImage::Wait),
            4 => Ok(CheckForImage::NoOp),
            0 => Ok(CheckForImage::Commit),
            other => Err(CaptureError::Config(format!(
                "checkForImage value {other} is not one of {{0,1,2,4}}"
            ))),
        }
    }
}

/// Everything a `get_image` caller can additionally ask for, evaluated
/// only on a `Commit` call (spec §4.4).
#[derive(Clone, Copy, Debug, Default)]
pub struct GetImageRequest {
    pub want_summed_intensity: bool,
    pub want_raw: bool,
    pub want_texture: bool,
    pub supports_float16: bool,
    pub supports_float32: bool,
}

/// `get_image`'s result (spec §4.4). `status` is `0` (frame ready), `-1`
/// (not ready), or `-2` (stream stopped), mirroring the original's
/// integer-return convention; on a `Commit` call it instead carries the
/// cycle's dropped-frame count as specified.
#[derive(Clone, Debug, Default)]
pub struct GetImageResult {
    pub status: i32,
    pub presentation_ts: f64,
    pub dropped_this_cycle: u32,
    pub summed_intensity: Option<f64>,
    pub raw: Option<Vec<u8>>,
    pub texture: Option<TextureSpec>,
}

/// State protected by the session's one mutex (spec §5 "Mutex
/// discipline"): `frame_ready`, `frameAvail`, `current_frame_slot`,
/// `current_pts`, `current_dropped`, and `grabber_active`. Counters are
/// folded in here too since both the recorder thread and the consumer
/// thread update them and they change in lockstep with the fields above.
#[derive(Default)]
pub(crate) struct SharedState {
    grabber_active: bool,
    frame_ready: bool,
    frame_avail: u32,
    current_frame: Option<FrameBuffer>,
    current_pts: f64,
    current_dropped: u32,
    counters: Counters,
    recorder_error: Option<CaptureError>,
}

/// The mutex/condvar pair a session's consumer thread and (optional)
/// recorder thread coordinate through (spec §4.4, §5). Held behind an
/// `Arc` so the recorder thread and the cross-camera sync protocol can
/// each hold a handle to it independent of the session's own lifetime in
/// the engine's slot array.
pub struct SessionShared {
    state: Mutex<SharedState>,
    cond: Condvar,
}

impl Default for SessionShared {
    fn default() -> Self {
        SessionShared {
            state: Mutex::new(SharedState::default()),
            cond: Condvar::new(),
        }
    }
}

impl SessionShared {
    fn lock(&self) -> std::sync::MutexGuard<'_, SharedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The mutex the cross-camera sync protocol (spec §4.5) acquires
    /// around a peer's transmission-enable/disable call.
    pub(crate) fn sync_mutex(&self) -> &Mutex<SharedState> {
        &self.state
    }

    pub(crate) fn is_active(&self) -> bool {
        self.lock().grabber_active
    }

    pub(crate) fn fail(&self, err: CaptureError) {
        let mut st = self.lock();
        st.recorder_error = Some(err);
        st.grabber_active = false;
        drop(st);
        self.cond.notify_all();
    }

    /// Recorder-path produce (spec §4.4 drop policy: "`current_frame_slot`
    /// is overwritten on every produce"). `deliver` is false when
    /// `recordingflags & DELIVERY_DISABLED` is set (spec §5): the
    /// condition is not signaled and `frame_avail` does not advance, but
    /// the frame still reaches the encoder sink upstream of this call.
    pub(crate) fn produce(
        &self,
        frame: FrameBuffer,
        pts: f64,
        dropped_in_ring: u32,
        decompress_time: f64,
        deliver: bool,
    ) {
        let mut st = self.lock();
        st.current_frame = Some(frame);
        st.current_pts = pts;
        st.current_dropped = dropped_in_ring;
        st.counters.framecounter += 1 + dropped_in_ring as u64;
        st.counters.nrframes += 1;
        st.counters.nr_droppedframes += dropped_in_ring as u64;
        st.counters.record_decompress_time(decompress_time);
        st.frame_ready = true;
        if deliver {
            st.frame_avail += 1;
        }
        drop(st);
        if deliver {
            self.cond.notify_all();
        }
    }
}

/// One open camera (spec §3 `Session`). Not `Send`-shared directly;
/// consumer-thread-owned fields live here, while anything the recorder
/// thread touches lives behind `shared`.
pub struct Session {
    camera: CameraId,
    device_index: u32,
    sync_role: SyncRole,
    requested: RequestedParams,
    negotiated: Option<NegotiatedParams>,
    recording: RecordingState,
    pulled_frame: Option<FrameBuffer>,
    pulled_pts: f64,
    pulled_dropped: u32,
    scratch_needed: bool,
    dropframes: bool,
    start_at_time: f64,
    shared: Arc<SessionShared>,
    recorder_thread: Option<JoinHandle<()>>,
}

impl Session {
    fn new(camera: CameraId, device_index: u32, requested: RequestedParams) -> Self {
        Session {
            camera,
            device_index,
            sync_role: SyncRole::empty(),
            requested,
            negotiated: None,
            recording: RecordingState::default(),
            pulled_frame: None,
            pulled_pts: 0.0,
            pulled_dropped: 0,
            scratch_needed: false,
            dropframes: false,
            start_at_time: 0.0,
            shared: Arc::new(SessionShared::default()),
            recorder_thread: None,
        }
    }

    pub fn negotiated(&self) -> Option<NegotiatedParams> {
        self.negotiated
    }

    pub fn sync_role(&self) -> SyncRole {
        self.sync_role
    }

    pub fn counters(&self) -> Counters {
        self.shared.lock().counters
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_active()
    }

    fn is_async(&self) -> bool {
        self.recording.flags & recording_flags::ASYNC != 0
    }

    /// Drop-to-newest dequeue for the synchronous (non-recorder) path
    /// (spec §4.4 "Drop policy"): re-enqueues and polls again while
    /// `frames_behind > 0`, counting every skipped frame as a drop.
    fn dequeue_drop_newest(
        surface: &dyn IidcSurface,
        camera: CameraId,
        mode: DequeueMode,
    ) -> Result<Option<(crate::iidc::RawFrame, u32)>> {
        let mut drops = 0u32;
        let mut current = surface.dequeue(camera, mode)?;
        loop {
            match current {
                None => return Ok(None),
                Some(frame) if frame.frames_behind == 0 => return Ok(Some((frame, drops))),
                Some(frame) => {
                    surface.enqueue(camera, frame.ring_index)?;
                    drops += 1;
                    current = surface.dequeue(camera, DequeueMode::Poll)?;
                }
            }
        }
    }

    /// Makes sure a frame is staged in `shared.current_frame`, either by
    /// waiting on the recorder thread's condvar (async path) or by doing
    /// the dequeue inline (sync path) — spec §4.4 `pull_frame`/`get_image`
    /// poll and wait semantics.
    fn ensure_staged(
        &self,
        surface: &dyn IidcSurface,
        clock: &dyn Clock,
        debayer_method: u32,
        bayer_pattern_override: u32,
        mode: PullMode,
    ) -> Result<()> {
        if self.is_async() {
            let mut st = self.shared.lock();
            if mode == PullMode::Wait {
                while st.grabber_active && st.frame_avail == 0 {
                    st = self
                        .shared
                        .cond
                        .wait(st)
                        .unwrap_or_else(|e| e.into_inner());
                }
            }
            return Ok(());
        }

        let dequeue_mode = match mode {
            PullMode::Poll => DequeueMode::Poll,
            PullMode::Wait => DequeueMode::Wait,
        };
        let t0 = clock.monotonic_now_seconds();
        match Self::dequeue_drop_newest(surface, self.camera, dequeue_mode)? {
            None => Ok(()),
            Some((frame, drops)) => {
                let pts = clock.normalize_pts(frame.wallclock_us);
                let ring_index = frame.ring_index;
                let processed =
                    postprocess::postprocess(surface, &frame, debayer_method, bayer_pattern_override)?;
                surface.enqueue(self.camera, ring_index)?;
                let decompress_time = clock.monotonic_now_seconds() - t0;
                let deliver = self.recording.flags & recording_flags::DELIVERY_DISABLED == 0;
                self.shared.produce(processed, pts, drops, decompress_time, deliver);
                Ok(())
            }
        }
    }

    /// spec §4.4 `pull_frame`.
    pub fn pull_frame(
        &mut self,
        surface: &dyn IidcSurface,
        clock: &dyn Clock,
        mode: PullMode,
    ) -> Result<PullOutcome> {
        self.ensure_staged(
            surface,
            clock,
            self.requested.debayer_method,
            self.requested.bayer_pattern_override,
            mode,
        )?;

        let mut st = self.shared.lock();
        let frame = st.current_frame.take();
        let grabber_active = st.grabber_active;
        if let Some(frame) = frame {
            let pts = st.current_pts;
            let dropped = st.current_dropped;
            st.frame_ready = false;
            st.frame_avail = st.frame_avail.saturating_sub(1);
            drop(st);
            self.pulled_frame = Some(frame.clone());
            self.pulled_pts = pts;
            self.pulled_dropped = dropped;
            Ok(PullOutcome::Frame(frame))
        } else if !grabber_active {
            Ok(PullOutcome::End)
        } else {
            Ok(PullOutcome::Pending)
        }
    }

    /// spec §4.4 `get_image`.
    pub fn get_image(
        &mut self,
        surface: &dyn IidcSurface,
        clock: &dyn Clock,
        check: CheckForImage,
        req: GetImageRequest,
    ) -> Result<GetImageResult> {
        match check {
            CheckForImage::NoOp => Ok(GetImageResult {
                status: -1,
                ..Default::default()
            }),
            CheckForImage::Poll | CheckForImage::Wait => {
                let mode = if check == CheckForImage::Wait {
                    PullMode::Wait
                } else {
                    PullMode::Poll
                };
                self.ensure_staged(
                    surface,
                    clock,
                    self.requested.debayer_method,
                    self.requested.bayer_pattern_override,
                    mode,
                )?;
                let st = self.shared.lock();
                let status = if !st.grabber_active && !st.frame_ready {
                    -2
                } else if st.frame_ready {
                    0
                } else {
                    -1
                };
                Ok(GetImageResult {
                    status,
                    ..Default::default()
                })
            }
            CheckForImage::Commit => self.commit_image(clock, req),
        }
    }

    fn commit_image(&mut self, clock: &dyn Clock, req: GetImageRequest) -> Result<GetImageResult> {
        let t0 = clock.monotonic_now_seconds();
        let mut st = self.shared.lock();
        let frame = st.current_frame.take();
        let pts = st.current_pts;
        let dropped = st.current_dropped;
        if frame.is_some() {
            st.frame_ready = false;
            st.frame_avail = st.frame_avail.saturating_sub(1);
        }
        let grabber_active = st.grabber_active;
        drop(st);

        let Some(frame) = frame else {
            let status = if grabber_active { -1 } else { -2 };
            return Ok(GetImageResult {
                status,
                ..Default::default()
            });
        };

        self.pulled_frame = Some(frame.clone());
        self.pulled_pts = pts;
        self.pulled_dropped = dropped;

        let actual_bitdepth = self
            .negotiated
            .map(|n| n.actual_bitdepth)
            .unwrap_or(frame.bitdepth);

        let summed_intensity = req
            .want_summed_intensity
            .then(|| summed_intensity(&frame, actual_bitdepth));
        let raw = req.want_raw.then(|| build_raw_buffer(&frame, actual_bitdepth));
        let texture = req.want_texture.then(|| {
            build_texture_spec(
                &frame,
                actual_bitdepth,
                self.negotiated.map(|n| n.reqlayers).unwrap_or(frame.channels),
                req.supports_float16,
                req.supports_float32,
            )
        });

        let elapsed = clock.monotonic_now_seconds() - t0;
        {
            let mut st = self.shared.lock();
            st.counters.nrgfxframes += 1;
            st.counters.record_gfx_time(elapsed);
        }

        Ok(GetImageResult {
            status: 0,
            presentation_ts: pts,
            dropped_this_cycle: dropped,
            summed_intensity,
            raw,
            texture,
        })
    }
}

/// Builds the raw-output buffer (spec §4.4 `get_image` raw-buffer
/// branch): `w*h*channels*(bpc/8)` bytes, left-shifted for 9-15 bpc
/// payloads so black=0, white~=0xFFFF.
fn build_raw_buffer(frame: &FrameBuffer, actual_bitdepth: u32) -> Vec<u8> {
    if actual_bitdepth <= 8 {
        return frame.data.clone();
    }
    let mut samples: Vec<u16> = frame
        .data
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    postprocess::apply_bitdepth_shift(&mut samples, actual_bitdepth);
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// spec §4.4 `get_image` summed-intensity branch: mean over all channels,
/// normalized to `[0, 1]`.
fn summed_intensity(frame: &FrameBuffer, actual_bitdepth: u32) -> f64 {
    if frame.data.is_empty() {
        return 0.0;
    }
    if actual_bitdepth <= 8 {
        let sum: u64 = frame.data.iter().map(|&b| b as u64).sum();
        sum as f64 / frame.data.len() as f64 / 255.0
    } else {
        let max_val = ((1u32 << actual_bitdepth) - 1) as f64;
        let samples: Vec<u16> = frame
            .data
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        if samples.is_empty() {
            return 0.0;
        }
        let sum: u64 = samples.iter().map(|&s| s as u64).sum();
        sum as f64 / samples.len() as f64 / max_val
    }
}

/// spec §4.4 `get_image` texture branch: applies the pixel-transfer scale
/// to the uploaded data (bracketing the GL-style global scale state
/// around this one call, per spec §4.4), selects the internal format, and
/// reports `depth = reqlayers * (8|16|32)`.
fn build_texture_spec(
    frame: &FrameBuffer,
    actual_bitdepth: u32,
    reqlayers: u32,
    supports_float16: bool,
    supports_float32: bool,
) -> TextureSpec {
    let internal_format = select_internal_format(actual_bitdepth, supports_float16, supports_float32);
    let data = build_raw_buffer(frame, actual_bitdepth);
    let per_channel_bits = match internal_format {
        TextureInternalFormat::Float32 => 32,
        TextureInternalFormat::Float16 | TextureInternalFormat::NormalizedU16 => 16,
    };
    let depth = reqlayers * if actual_bitdepth <= 8 { 8 } else { per_channel_bits };
    TextureSpec {
        width: frame.width,
        height: frame.height,
        depth,
        internal_format,
        data,
    }
}

/// The library-initialized flag + fixed slot array (spec §3 "Global
/// library state"). `open` lazily initializes the underlying IIDC surface
/// on first use; `shutdown` tears everything down.
pub struct Engine {
    surface: Arc<dyn IidcSurface>,
    clock: Arc<dyn Clock>,
    encoder: Arc<dyn EncoderSink>,
    texture_sink: Arc<dyn TextureSink>,
    config: EngineConfig,
    library_initialized: Mutex<bool>,
    slots: Vec<Mutex<Option<Session>>>,
}

impl Engine {
    pub fn new(
        surface: Arc<dyn IidcSurface>,
        clock: Arc<dyn Clock>,
        encoder: Arc<dyn EncoderSink>,
        texture_sink: Arc<dyn TextureSink>,
        config: EngineConfig,
    ) -> Self {
        let mut slots = Vec::with_capacity(crate::config::MAX_CAMERAS);
        slots.resize_with(crate::config::MAX_CAMERAS, || Mutex::new(None));
        Engine {
            surface,
            clock,
            encoder,
            texture_sink,
            config,
            library_initialized: Mutex::new(false),
            slots,
        }
    }

    fn slot(&self, handle: Handle) -> Result<&Mutex<Option<Session>>> {
        self.slots
            .get(handle.0 as usize)
            .ok_or(CaptureError::BadIndex(handle.0))
    }

    fn ensure_initialized(&self) -> Result<()> {
        let mut initialized = self
            .library_initialized
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if !*initialized {
            self.surface.initialize()?;
            *initialized = true;
        }
        Ok(())
    }

    /// spec §4.4 `open`.
    pub fn open(
        &self,
        device_index: u32,
        requested: RequestedParams,
        target_movie: Option<&str>,
        recordingflags: u32,
    ) -> Result<Handle> {
        self.ensure_initialized()?;

        let ids = self.surface.enumerate()?;
        if ids.is_empty() {
            return Err(CaptureError::NoCameras);
        }

        let free_index = self
            .slots
            .iter()
            .position(|s| s.lock().unwrap_or_else(|e| e.into_inner()).is_none())
            .ok_or_else(|| CaptureError::Config("no free session slots".into()))?;

        let camera = self
            .surface
            .open_camera(device_index)
            .map_err(|_| CaptureError::BadIndex(device_index))?;
        self.surface
            .power_on(camera)
            .map_err(|e| CaptureError::CameraInitFailed(e.to_string()))?;
        self.surface
            .reset(camera)
            .map_err(|e| CaptureError::CameraInitFailed(e.to_string()))?;

        let mut session = Session::new(camera, device_index, requested);
        // Audio unsupported: bit 1 is always force-cleared (spec §6).
        session.recording.flags = recordingflags & !recording_flags::AUDIO;

        if let Some(target) = target_movie {
            let (path, codec_spec) = parse_movie_name(target);
            session.recording.active = true;
            session.recording.target_path = Some(path);
            session.recording.codec_spec = Some(codec_spec);
        }

        let mut slot = self.slots[free_index]
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *slot = Some(session);
        drop(slot);

        Ok(Handle(free_index as u32))
    }

    /// spec §4.4 `close`: stops if still running, powers the camera off,
    /// frees it, and marks the slot invalid.
    pub fn close(&self, handle: Handle) -> Result<()> {
        if self.is_running(handle)? {
            self.stop(handle)?;
        }
        let mut slot = self.slot(handle)?.lock().unwrap_or_else(|e| e.into_inner());
        let session = slot.take().ok_or(CaptureError::BadIndex(handle.0))?;
        self.surface.power_off(session.camera)?;
        self.surface.free_camera(session.camera)?;
        Ok(())
    }

    fn is_running(&self, handle: Handle) -> Result<bool> {
        let slot = self.slot(handle)?.lock().unwrap_or_else(|e| e.into_inner());
        let session = slot.as_ref().ok_or(CaptureError::BadIndex(handle.0))?;
        Ok(session.is_running())
    }

    /// Collects the other currently-open sessions participating in soft
    /// sync, for the Master's fan-out start/stop (spec §4.5). Each slot is
    /// locked only briefly to clone its `(camera, role, shared)` triple.
    fn collect_peers(&self, exclude: Handle) -> Vec<(CameraId, SyncRole, Arc<SessionShared>)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != exclude.0 as usize)
            .filter_map(|(_, slot)| {
                let guard = slot.lock().unwrap_or_else(|e| e.into_inner());
                guard
                    .as_ref()
                    .map(|s| (s.camera, s.sync_role, s.shared.clone()))
            })
            .collect()
    }

    /// spec §4.4 `start`.
    pub fn start(
        &self,
        handle: Handle,
        capturerate: f64,
        dropframes: bool,
        startattime: Option<f64>,
    ) -> Result<()> {
        let mut slot = self.slot(handle)?.lock().unwrap_or_else(|e| e.into_inner());
        let session = slot.as_mut().ok_or(CaptureError::BadIndex(handle.0))?;

        let caps = self.surface.capabilities(session.camera)?;
        let (negotiated, warnings) = mode_select::select_mode(&session.requested, &caps, capturerate)?;
        mode_select::log_warnings(&warnings, self.config.verbosity);

        self.surface.set_iso_speed(session.camera, caps.bus_speed_mbit)?;
        self.surface.set_video_mode(session.camera, negotiated.video_mode)?;
        if negotiated.video_mode.is_format7() {
            self.surface.set_format7_roi(
                session.camera,
                negotiated.video_mode,
                negotiated.x,
                negotiated.y,
                negotiated.width,
                negotiated.height,
            )?;
            self.surface
                .set_format7_packet_size(session.camera, negotiated.video_mode, negotiated.packet_size)?;
        } else {
            self.surface.set_framerate(session.camera, negotiated.framerate)?;
        }
        self.surface
            .dma_setup(session.camera, session.requested.dma_buffers)?;

        if let Some(target) = startattime {
            while self.clock.monotonic_now_seconds() < target {
                thread::sleep(Duration::from_millis(1));
            }
        }

        session.sync_role.validate()?;
        let peer_shared = self.collect_peers(handle);
        let peers: Vec<SyncPeer<'_, SharedState>> = peer_shared
            .iter()
            .map(|(camera, role, shared)| SyncPeer {
                camera: *camera,
                role: *role,
                mutex: shared.sync_mutex(),
            })
            .collect();
        if let Err(e) = sync::start_sequence(self.surface.as_ref(), session.camera, session.sync_role, &peers)
        {
            self.surface.dma_stop(session.camera).ok();
            return Err(CaptureError::TransmissionStartFailed(e.to_string()));
        }

        session.start_at_time = self.clock.monotonic_now_seconds();
        session.dropframes = dropframes;
        session.scratch_needed =
            postprocess::needs_scratch_frame(negotiated.actual_layers, negotiated.color_coding);
        session.negotiated = Some(negotiated);

        {
            let mut st = session.shared.lock();
            *st = SharedState {
                grabber_active: true,
                ..Default::default()
            };
        }

        if session.recording.active {
            let path = session
                .recording
                .target_path
                .clone()
                .ok_or_else(|| CaptureError::Recording("recording active with no target path".into()))?;
            let codec = session.recording.codec_spec.clone().unwrap_or_default();
            let bitdepth = if negotiated.actual_bitdepth <= 8 { 8 } else { 16 };
            let movie_handle = self.encoder.open(
                &path,
                negotiated.width,
                negotiated.height,
                negotiated.framerate,
                negotiated.actual_layers,
                bitdepth,
                &codec,
            )?;
            session.recording.movie_handle = Some(movie_handle);
        }

        if session.is_async() {
            let cfg = RecorderConfig {
                surface: self.surface.clone(),
                clock: self.clock.clone(),
                camera: session.camera,
                negotiated,
                debayer_method: session.requested.debayer_method,
                bayer_pattern_override: session.requested.bayer_pattern_override,
                poll_interval: if dropframes {
                    Duration::from_millis(self.config.poll_intervals.low_latency_ms)
                } else {
                    Duration::from_millis(self.config.poll_intervals.normal_ms)
                },
                encoder: session
                    .recording
                    .movie_handle
                    .map(|h| (self.encoder.clone() as Arc<dyn EncoderSink>, h)),
                delivery_disabled: session.recording.flags & recording_flags::DELIVERY_DISABLED != 0,
            };
            let shared = session.shared.clone();
            let builder = thread::Builder::new().name("iidc-recorder".into());
            session.recorder_thread = Some(
                builder
                    .spawn(move || recorder::run(shared, cfg))
                    .map_err(|e| CaptureError::TransmissionStartFailed(e.to_string()))?,
            );
        }

        info!(
            camera = ?session.camera,
            fps = negotiated.framerate,
            width = negotiated.width,
            height = negotiated.height,
            "capture started"
        );
        Ok(())
    }

    /// spec §4.4 `stop`.
    pub fn stop(&self, handle: Handle) -> Result<()> {
        let mut slot = self.slot(handle)?.lock().unwrap_or_else(|e| e.into_inner());
        let session = slot.as_mut().ok_or(CaptureError::BadIndex(handle.0))?;

        {
            let mut st = session.shared.lock();
            st.grabber_active = false;
        }
        session.shared.cond.notify_all();

        let peer_shared = self.collect_peers(handle);
        let peers: Vec<SyncPeer<'_, SharedState>> = peer_shared
            .iter()
            .map(|(camera, role, shared)| SyncPeer {
                camera: *camera,
                role: *role,
                mutex: shared.sync_mutex(),
            })
            .collect();
        sync::stop_sequence(self.surface.as_ref(), session.camera, session.sync_role, &peers)?;

        if let Some(join) = session.recorder_thread.take() {
            join.join().ok();
        }

        let recorder_error = session.shared.lock().recorder_error.take();
        if let Some(err) = recorder_error {
            warn!("recorder thread exited with an error: {err}");
        }

        if let Some(movie_handle) = session.recording.movie_handle.take() {
            self.encoder.finalize(movie_handle)?;
        }

        self.surface.dma_stop(session.camera)?;

        session.scratch_needed = false;
        session.pulled_frame = None;
        {
            let mut st = session.shared.lock();
            st.current_frame = None;
            st.counters.finalize_averages();
        }

        info!(camera = ?session.camera, "capture stopped");
        Ok(())
    }

    /// spec §4.4 `pull_frame`.
    pub fn pull_frame(&self, handle: Handle, mode: PullMode) -> Result<PullOutcome> {
        let mut slot = self.slot(handle)?.lock().unwrap_or_else(|e| e.into_inner());
        let session = slot.as_mut().ok_or(CaptureError::BadIndex(handle.0))?;
        session.pull_frame(self.surface.as_ref(), self.clock.as_ref(), mode)
    }

    /// spec §3 `counters`.
    pub fn counters(&self, handle: Handle) -> Result<Counters> {
        let slot = self.slot(handle)?.lock().unwrap_or_else(|e| e.into_inner());
        let session = slot.as_ref().ok_or(CaptureError::BadIndex(handle.0))?;
        Ok(session.counters())
    }

    /// spec §4.4 `get_image`.
    pub fn get_image(
        &self,
        handle: Handle,
        check: CheckForImage,
        req: GetImageRequest,
    ) -> Result<GetImageResult> {
        let mut slot = self.slot(handle)?.lock().unwrap_or_else(|e| e.into_inner());
        let session = slot.as_mut().ok_or(CaptureError::BadIndex(handle.0))?;
        let result = session.get_image(self.surface.as_ref(), self.clock.as_ref(), check, req)?;
        if req.want_texture {
            if let Some(spec) = &result.texture {
                self.texture_sink.create_texture(spec)?;
            }
        }
        Ok(result)
    }

    /// The typed `set_parameter` dispatch (spec §9 redesign note): parses
    /// the host-boundary `(name, value)` pair and applies it against the
    /// session and/or camera. Unsupported parameters and camera-rejected
    /// features resolve to `ParameterResponse::Unsupported` rather than an
    /// error (spec §7: "`FeatureUnsupported` — warning only").
    pub fn set_parameter(&self, handle: Handle, name: &str, value: f64) -> Result<ParameterResponse> {
        let parsed = match parameter::parse(name, value) {
            Ok(p) => p,
            Err(CaptureError::FeatureUnsupported(_)) => return Ok(ParameterResponse::Unsupported),
            Err(e) => return Err(e),
        };

        let mut slot = self.slot(handle)?.lock().unwrap_or_else(|e| e.into_inner());
        let session = slot.as_mut().ok_or(CaptureError::BadIndex(handle.0))?;

        match parsed {
            Parameter::PrintParameters => {
                info!(camera = ?session.camera, requested = ?session.requested, negotiated = ?session.negotiated, "parameters");
                Ok(ParameterResponse::Unsupported)
            }
            Parameter::GetFramerate => Ok(session
                .negotiated
                .map(|n| ParameterResponse::F64(n.framerate))
                .unwrap_or(ParameterResponse::Unsupported)),
            Parameter::GetRoi => Ok(session
                .negotiated
                .map(|n| ParameterResponse::Roi(Roi::new(0, 0, n.width, n.height)))
                .unwrap_or(ParameterResponse::Unsupported)),
            Parameter::GetVendorName => {
                let caps = self.surface.capabilities(session.camera)?;
                Ok(ParameterResponse::Text(caps.vendor))
            }
            Parameter::GetModelName => {
                let caps = self.surface.capabilities(session.camera)?;
                Ok(ParameterResponse::Text(caps.model))
            }
            Parameter::GetBandwidthUsage => {
                let raw = self.surface.bandwidth_usage(session.camera)?;
                Ok(ParameterResponse::F64(raw as f64 / 4915.0))
            }
            Parameter::PreferFormat7Modes(v) => {
                let previous = session.requested.prefer_format7;
                session.requested.prefer_format7 = v;
                Ok(ParameterResponse::F64(if previous { 1.0 } else { 0.0 }))
            }
            Parameter::DataConversionMode(v) => {
                let previous = session.requested.data_conversion_mode;
                session.requested.data_conversion_mode = v;
                Ok(ParameterResponse::F64(previous as f64))
            }
            Parameter::DebayerMethod(v) => {
                let previous = session.requested.debayer_method;
                session.requested.debayer_method = v;
                Ok(ParameterResponse::F64(previous as f64))
            }
            Parameter::OverrideBayerPattern(v) => {
                let previous = session.requested.bayer_pattern_override;
                session.requested.bayer_pattern_override = v;
                Ok(ParameterResponse::F64(previous as f64))
            }
            Parameter::SyncMode(bits) => {
                let candidate = SyncRole::from_bits_truncate(bits);
                if candidate.validate().is_err() {
                    return Err(CaptureError::Config(format!(
                        "illegal sync role bits {bits:#04x}"
                    )));
                }
                if candidate.contains(SyncRole::SLAVE | SyncRole::HW)
                    && !self.surface.capabilities(session.camera)?.has_external_trigger
                {
                    // Fails silently: keep the prior value (spec §4.4).
                    return Ok(ParameterResponse::F64(session.sync_role.bits() as f64));
                }
                let previous = session.sync_role;
                session.sync_role = candidate;
                Ok(ParameterResponse::F64(previous.bits() as f64))
            }
            Parameter::TriggerMode(v) => {
                self.surface.set_external_trigger_mode(session.camera, v)?;
                Ok(ParameterResponse::F64(v as f64))
            }
            Parameter::TriggerSource(v) => {
                self.surface.set_external_trigger_source(session.camera, v)?;
                Ok(ParameterResponse::F64(v as f64))
            }
            Parameter::GetTriggerSources => {
                let sources = self.surface.trigger_sources(session.camera)?;
                Ok(ParameterResponse::List(sources))
            }
            Parameter::TriggerPolarity(active_high) => {
                self.surface
                    .set_external_trigger_polarity(session.camera, active_high)?;
                Ok(ParameterResponse::F64(if active_high { 1.0 } else { 0.0 }))
            }
            Parameter::SetNewMovieName(path) => {
                if !session.recording.active {
                    return Err(CaptureError::Recording(
                        "cannot set a new movie name while recording is inactive".into(),
                    ));
                }
                session.recording.target_path = Some(path);
                Ok(ParameterResponse::Unsupported)
            }
            Parameter::Feature { feature, value, auto } => {
                if auto {
                    self.surface
                        .set_feature_auto(session.camera, feature.name(), true)?;
                    Ok(ParameterResponse::F64(0.0))
                } else {
                    let (lo, hi) = self
                        .surface
                        .feature_boundaries(session.camera, feature.name())?;
                    let clamped = value.clamp(lo, hi);
                    if clamped != value {
                        warn!(feature = feature.name(), value, lo, hi, "clamping out-of-range value");
                    }
                    let previous = self
                        .surface
                        .set_feature_value(session.camera, feature.name(), clamped)?;
                    Ok(ParameterResponse::F64(previous))
                }
            }
        }
    }

    /// Host-boundary `set_parameter` shim retained from the original
    /// string-keyed API (spec §9): narrows [`ParameterResponse`] to the
    /// scalar contract spec §6 describes.
    pub fn set_parameter_by_name(&self, handle: Handle, name: &str, value: f64) -> Result<f64> {
        Ok(self.set_parameter(handle, name, value)?.as_f64())
    }
}
