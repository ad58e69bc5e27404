//! In-memory [`IidcSurface`] used by this crate's own test suite (and
//! suitable as a template for a real binding's test double). No real
//! hardware or bus I/O occurs; frames are synthesized on dequeue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{
    CameraCapabilities, CameraId, ColorCoding, DequeueMode, Format7Info, IidcSurface, ModeInfo,
    RawFrame, Transmission, VideoMode,
};
use crate::error::{CaptureError, Result};

#[derive(Clone)]
struct CameraState {
    caps: CameraCapabilities,
    powered: bool,
    transmission: Transmission,
    broadcast: bool,
    trigger_power: bool,
    trigger_mode: u32,
    trigger_source: u32,
    trigger_polarity_active_high: bool,
    features: HashMap<String, f64>,
    feature_auto: HashMap<String, bool>,
    dma_buffers: u32,
    /// Frames queued for dequeue, in capture order; `pop_front` dequeues the
    /// oldest, matching a real DMA ring's FIFO order.
    pending_frames: std::collections::VecDeque<RawFrame>,
    next_ring_index: u32,
    selected_mode: Option<VideoMode>,
    selected_roi: (u32, u32, u32, u32),
    selected_packet_size: u32,
    selected_fps: f64,
}

impl CameraState {
    fn new(caps: CameraCapabilities) -> Self {
        CameraState {
            caps,
            powered: false,
            transmission: Transmission::Off,
            broadcast: false,
            trigger_power: false,
            trigger_mode: 0,
            trigger_source: 0,
            trigger_polarity_active_high: true,
            features: HashMap::new(),
            feature_auto: HashMap::new(),
            dma_buffers: 0,
            pending_frames: std::collections::VecDeque::new(),
            next_ring_index: 0,
            selected_mode: None,
            selected_roi: (0, 0, 0, 0),
            selected_packet_size: 0,
            selected_fps: 0.0,
        }
    }
}

/// Builder-configured fake camera bus.
pub struct FakeIidcSurface {
    inner: Mutex<Inner>,
}

struct Inner {
    cameras: HashMap<u32, CameraState>,
    next_id: u32,
    initialized: bool,
}

impl Default for FakeIidcSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeIidcSurface {
    pub fn new() -> Self {
        FakeIidcSurface {
            inner: Mutex::new(Inner {
                cameras: HashMap::new(),
                next_id: 0,
                initialized: false,
            }),
        }
    }

    /// Registers a camera at `device_index` with the given capabilities.
    /// Returns `self` for chaining during test setup.
    pub fn with_camera(self, device_index: u32, caps: CameraCapabilities) -> Arc<Self> {
        let arc = Arc::new(self);
        arc.add_camera(device_index, caps);
        arc
    }

    pub fn add_camera(&self, device_index: u32, caps: CameraCapabilities) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .cameras
            .insert(device_index, CameraState::new(caps));
    }

    fn camera_mut<'a>(
        inner: &'a mut std::sync::MutexGuard<'_, Inner>,
        camera: CameraId,
    ) -> Result<&'a mut CameraState> {
        inner
            .cameras
            .get_mut(&camera.0)
            .ok_or(CaptureError::BadIndex(camera.0))
    }

    /// Test hook: pushes a synthetic frame onto the DMA ring for the given
    /// camera, to be returned by the next `dequeue`.
    pub fn push_frame(
        &self,
        camera: CameraId,
        width: u32,
        height: u32,
        color_coding: ColorCoding,
        color_filter: Option<u32>,
        wallclock_us: i64,
        fill: u8,
    ) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = inner.cameras.get_mut(&camera.0) {
            let bytes_per_pixel = color_coding.bits_per_channel() as usize / 8
                * color_coding.native_layers() as usize;
            let image = vec![fill; width as usize * height as usize * bytes_per_pixel.max(1)];
            let ring_index = state.next_ring_index;
            state.next_ring_index = state.next_ring_index.wrapping_add(1);
            state.pending_frames.push_back(RawFrame {
                image,
                width,
                height,
                color_coding,
                color_filter,
                wallclock_us,
                frames_behind: 0,
                ring_index,
            });
            let behind = state.pending_frames.len() as u32 - 1;
            for (i, f) in state.pending_frames.iter_mut().enumerate() {
                f.frames_behind = behind.saturating_sub(i as u32);
            }
        }
    }

    pub fn pending_frame_count(&self, camera: CameraId) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .cameras
            .get(&camera.0)
            .map(|s| s.pending_frames.len())
            .unwrap_or(0)
    }

    pub fn is_transmitting(&self, camera: CameraId) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .cameras
            .get(&camera.0)
            .map(|s| s.transmission == Transmission::On)
            .unwrap_or(false)
    }

    pub fn is_broadcasting(&self, camera: CameraId) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .cameras
            .get(&camera.0)
            .map(|s| s.broadcast)
            .unwrap_or(false)
    }

    pub fn selected_framerate(&self, camera: CameraId) -> f64 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .cameras
            .get(&camera.0)
            .map(|s| s.selected_fps)
            .unwrap_or(0.0)
    }

    pub fn selected_packet_size(&self, camera: CameraId) -> u32 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .cameras
            .get(&camera.0)
            .map(|s| s.selected_packet_size)
            .unwrap_or(0)
    }

    /// The `(x, y, width, height)` last programmed via `set_format7_roi`.
    pub fn selected_roi(&self, camera: CameraId) -> (u32, u32, u32, u32) {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .cameras
            .get(&camera.0)
            .map(|s| s.selected_roi)
            .unwrap_or((0, 0, 0, 0))
    }
}

impl IidcSurface for FakeIidcSurface {
    fn initialize(&self) -> Result<()> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).initialized = true;
        Ok(())
    }

    fn teardown(&self) -> Result<()> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).initialized = false;
        Ok(())
    }

    fn enumerate(&self) -> Result<Vec<CameraId>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<u32> = inner.cameras.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids.into_iter().map(CameraId).collect())
    }

    fn open_camera(&self, device_index: u32) -> Result<CameraId> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.cameras.contains_key(&device_index) {
            Ok(CameraId(device_index))
        } else {
            Err(CaptureError::BadIndex(device_index))
        }
    }

    fn free_camera(&self, _camera: CameraId) -> Result<()> {
        Ok(())
    }

    fn power_on(&self, camera: CameraId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::camera_mut(&mut inner, camera)?.powered = true;
        Ok(())
    }

    fn power_off(&self, camera: CameraId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::camera_mut(&mut inner, camera)?.powered = false;
        Ok(())
    }

    fn reset(&self, _camera: CameraId) -> Result<()> {
        Ok(())
    }

    fn capabilities(&self, camera: CameraId) -> Result<CameraCapabilities> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Ok(Self::camera_mut(&mut inner, camera)?.caps.clone())
    }

    fn set_iso_speed(&self, camera: CameraId, mbit_per_sec: u32) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::camera_mut(&mut inner, camera)?.caps.bus_speed_mbit = mbit_per_sec;
        Ok(())
    }

    fn set_video_mode(&self, camera: CameraId, mode: VideoMode) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::camera_mut(&mut inner, camera)?.selected_mode = Some(mode);
        Ok(())
    }

    fn set_framerate(&self, camera: CameraId, fps: f64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::camera_mut(&mut inner, camera)?.selected_fps = fps;
        Ok(())
    }

    fn set_format7_roi(
        &self,
        camera: CameraId,
        _mode: VideoMode,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::camera_mut(&mut inner, camera)?.selected_roi = (x, y, width, height);
        Ok(())
    }

    fn set_format7_packet_size(&self, camera: CameraId, _mode: VideoMode, size: u32) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::camera_mut(&mut inner, camera)?.selected_packet_size = size;
        Ok(())
    }

    fn dma_setup(&self, camera: CameraId, dma_buffers: u32) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::camera_mut(&mut inner, camera)?.dma_buffers = dma_buffers;
        Ok(())
    }

    fn dma_stop(&self, camera: CameraId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let state = Self::camera_mut(&mut inner, camera)?;
        state.dma_buffers = 0;
        state.pending_frames.clear();
        Ok(())
    }

    fn dequeue(&self, camera: CameraId, mode: DequeueMode) -> Result<Option<RawFrame>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let state = Self::camera_mut(&mut inner, camera)?;
        match state.pending_frames.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None if mode == DequeueMode::Poll => Ok(None),
            None => Ok(None), // fake surface never blocks; tests drive frames explicitly
        }
    }

    fn enqueue(&self, _camera: CameraId, _ring_index: u32) -> Result<()> {
        Ok(())
    }

    fn set_transmission(&self, camera: CameraId, state: Transmission) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::camera_mut(&mut inner, camera)?.transmission = state;
        Ok(())
    }

    fn set_broadcast(&self, camera: CameraId, enable: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::camera_mut(&mut inner, camera)?.broadcast = enable;
        Ok(())
    }

    fn set_external_trigger_power(&self, camera: CameraId, enable: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::camera_mut(&mut inner, camera)?.trigger_power = enable;
        Ok(())
    }

    fn set_external_trigger_mode(&self, camera: CameraId, mode: u32) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::camera_mut(&mut inner, camera)?.trigger_mode = mode;
        Ok(())
    }

    fn set_external_trigger_source(&self, camera: CameraId, source: u32) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::camera_mut(&mut inner, camera)?.trigger_source = source;
        Ok(())
    }

    fn set_external_trigger_polarity(&self, camera: CameraId, active_high: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Self::camera_mut(&mut inner, camera)?.trigger_polarity_active_high = active_high;
        Ok(())
    }

    fn trigger_sources(&self, camera: CameraId) -> Result<Vec<u32>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let state = Self::camera_mut(&mut inner, camera)?;
        Ok(if state.caps.has_external_trigger {
            vec![0, 1]
        } else {
            vec![]
        })
    }

    fn feature_present(&self, camera: CameraId, feature: &str) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .cameras
            .get(&camera.0)
            .map(|s| s.features.contains_key(feature) || KNOWN_FEATURES.contains(&feature))
            .unwrap_or(false)
    }

    fn feature_value(&self, camera: CameraId, feature: &str) -> Result<f64> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let state = Self::camera_mut(&mut inner, camera)?;
        Ok(*state.features.get(feature).unwrap_or(&0.0))
    }

    fn set_feature_value(&self, camera: CameraId, feature: &str, value: f64) -> Result<f64> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let state = Self::camera_mut(&mut inner, camera)?;
        if !KNOWN_FEATURES.contains(&feature) {
            return Err(CaptureError::FeatureUnsupported(feature.to_string()));
        }
        let (lo, hi) = FEATURE_BOUNDS;
        let clamped = value.clamp(lo, hi);
        let previous = state.features.insert(feature.to_string(), clamped).unwrap_or(0.0);
        state.feature_auto.insert(feature.to_string(), false);
        Ok(previous)
    }

    fn feature_boundaries(&self, camera: CameraId, feature: &str) -> Result<(f64, f64)> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let _ = Self::camera_mut(&mut inner, camera)?;
        if KNOWN_FEATURES.contains(&feature) {
            Ok(FEATURE_BOUNDS)
        } else {
            Err(CaptureError::FeatureUnsupported(feature.to_string()))
        }
    }

    fn set_feature_auto(&self, camera: CameraId, feature: &str, auto: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let state = Self::camera_mut(&mut inner, camera)?;
        if !KNOWN_FEATURES.contains(&feature) {
            return Err(CaptureError::FeatureUnsupported(feature.to_string()));
        }
        state.feature_auto.insert(feature.to_string(), auto);
        Ok(())
    }

    fn bandwidth_usage(&self, camera: CameraId) -> Result<u32> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let state = Self::camera_mut(&mut inner, camera)?;
        let (_, _, w, h) = state.selected_roi;
        Ok(w * h)
    }

    fn debayer(
        &self,
        image: &[u8],
        width: u32,
        height: u32,
        _pattern: u32,
        _method: u32,
    ) -> Result<Vec<u8>> {
        // Deterministic stand-in: broadcast the single-channel value to RGB.
        let mut out = Vec::with_capacity(image.len() * 3);
        for &v in image.iter().take((width * height) as usize) {
            out.push(v);
            out.push(v);
            out.push(v);
        }
        Ok(out)
    }

    fn yuv_to_rgb8(
        &self,
        image: &[u8],
        width: u32,
        height: u32,
        _coding: ColorCoding,
    ) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity((width * height) as usize * 3);
        for &v in image.iter().take((width * height) as usize) {
            out.push(v);
            out.push(v);
            out.push(v);
        }
        Ok(out)
    }
}

const KNOWN_FEATURES: &[&str] = &[
    "Brightness",
    "Gain",
    "Exposure",
    "Shutter",
    "Sharpness",
    "Saturation",
    "Gamma",
];
const FEATURE_BOUNDS: (f64, f64) = (0.0, 1000.0);

/// Convenience constructors for the scenario capability sets used across
/// the mode-selector and session test suites (spec §8, E1-E6).
pub fn two_mode_camera() -> CameraCapabilities {
    CameraCapabilities {
        bus_speed_mbit: 400,
        vendor: "FakeVendor".into(),
        model: "FakeCam".into(),
        has_external_trigger: true,
        modes: vec![
            ModeInfo {
                id: VideoMode::Fixed(0),
                color_coding: ColorCoding::Rgb8,
                max_width: 640,
                max_height: 480,
                current_width: 640,
                current_height: 480,
                framerates: vec![15.0],
                format7: None,
                actual_bitdepth: 8,
            },
            ModeInfo {
                id: VideoMode::Fixed(1),
                color_coding: ColorCoding::Yuv422,
                max_width: 640,
                max_height: 480,
                current_width: 640,
                current_height: 480,
                framerates: vec![30.0],
                format7: None,
                actual_bitdepth: 8,
            },
            ModeInfo {
                id: VideoMode::Fixed(2),
                color_coding: ColorCoding::Rgb8,
                max_width: 1024,
                max_height: 768,
                current_width: 1024,
                current_height: 768,
                framerates: vec![15.0],
                format7: None,
                actual_bitdepth: 8,
            },
        ],
    }
}

pub fn format7_camera() -> CameraCapabilities {
    CameraCapabilities {
        bus_speed_mbit: 400,
        vendor: "FakeVendor".into(),
        model: "FakeCamF7".into(),
        has_external_trigger: false,
        modes: vec![ModeInfo {
            id: VideoMode::Format7(0),
            color_coding: ColorCoding::Mono8,
            max_width: 800,
            max_height: 600,
            current_width: 800,
            current_height: 600,
            framerates: vec![],
            format7: Some(Format7Info {
                pbmin: 4,
                pbmax: 8192,
                depth_bits_per_pixel: 8,
                max_width: 800,
                max_height: 600,
                actual_bitdepth: 8,
            }),
            actual_bitdepth: 8,
        }],
    }
}

pub fn mono8_camera() -> CameraCapabilities {
    CameraCapabilities {
        bus_speed_mbit: 400,
        vendor: "FakeVendor".into(),
        model: "FakeMono".into(),
        has_external_trigger: false,
        modes: vec![ModeInfo {
            id: VideoMode::Fixed(0),
            color_coding: ColorCoding::Mono8,
            max_width: 640,
            max_height: 480,
            current_width: 640,
            current_height: 480,
            framerates: vec![15.0, 30.0],
            format7: None,
            actual_bitdepth: 8,
        }],
    }
}

pub fn raw16_12bpc_camera() -> CameraCapabilities {
    CameraCapabilities {
        bus_speed_mbit: 400,
        vendor: "FakeVendor".into(),
        model: "FakeRaw16".into(),
        has_external_trigger: false,
        modes: vec![ModeInfo {
            id: VideoMode::Fixed(0),
            color_coding: ColorCoding::Raw16,
            max_width: 640,
            max_height: 480,
            current_width: 640,
            current_height: 480,
            framerates: vec![15.0],
            format7: None,
            actual_bitdepth: 12,
        }],
    }
}
