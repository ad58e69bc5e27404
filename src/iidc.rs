//! The abstract IIDC capability surface (spec §6).
//!
//! This crate treats the underlying IIDC/DC1394 library as an external
//! collaborator: [`IidcSurface`] is the trait the rest of the engine programs
//! against. A real binding (libdc1394 FFI, or a vendor SDK) lives downstream
//! and is out of scope here; [`fake::FakeIidcSurface`] is the in-memory
//! implementation this crate's own tests run against.

use crate::error::Result;

/// Opaque camera identifier handed out by [`IidcSurface::enumerate`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CameraId(pub u32);

/// Pixel encodings the capability probe and mode selector reason about.
/// Mirrors the dense IIDC `color_coding` enum, narrowed to the codings this
/// engine's admission rules (spec §4.2) and post-processor (spec §4.3)
/// actually handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColorCoding {
    Mono8,
    Mono16,
    Raw8,
    Raw16,
    Rgb8,
    Rgb16,
    Yuv422,
    Yuv411,
}

impl ColorCoding {
    /// Per-channel bit depth this coding is defined at.
    pub fn bits_per_channel(self) -> u32 {
        match self {
            ColorCoding::Mono8 | ColorCoding::Raw8 | ColorCoding::Rgb8 => 8,
            ColorCoding::Mono16 | ColorCoding::Raw16 | ColorCoding::Rgb16 => 16,
            ColorCoding::Yuv422 | ColorCoding::Yuv411 => 8,
        }
    }

    /// Whether this is one of the "mono" family codings (spec §4.2 table).
    pub fn is_mono(self) -> bool {
        matches!(self, ColorCoding::Mono8 | ColorCoding::Mono16)
    }

    /// Whether this is one of the "raw" (Bayer) family codings.
    pub fn is_raw(self) -> bool {
        matches!(self, ColorCoding::Raw8 | ColorCoding::Raw16)
    }

    /// Whether this coding is natively RGB (no debayer/colorspace conversion
    /// needed downstream).
    pub fn is_native_rgb(self) -> bool {
        matches!(self, ColorCoding::Rgb8 | ColorCoding::Rgb16)
    }

    /// Whether this is one of the YUV family codings.
    pub fn is_yuv(self) -> bool {
        matches!(self, ColorCoding::Yuv422 | ColorCoding::Yuv411)
    }

    /// Number of color layers a consumer sees for this coding: 1 for
    /// mono/raw, 3 otherwise (spec §4.2 "actual_layers derivation").
    pub fn native_layers(self) -> u32 {
        if self.is_mono() || self.is_raw() {
            1
        } else {
            3
        }
    }
}

/// Identifies one video mode advertised by a camera. Fixed modes carry a
/// dense index; Format-7 modes carry their own (disjoint) index space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VideoMode {
    Fixed(u32),
    Format7(u32),
}

impl VideoMode {
    pub fn is_format7(self) -> bool {
        matches!(self, VideoMode::Format7(_))
    }
}

/// Format-7 parameters for one programmable mode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Format7Info {
    pub pbmin: u32,
    pub pbmax: u32,
    /// Bits per pixel for the mode's data depth (used in packet-size math).
    pub depth_bits_per_pixel: u32,
    pub max_width: u32,
    pub max_height: u32,
    /// Sensor's true payload depth (spec §4.2 "Bit-depth reconciliation"),
    /// which can differ from `depth_bits_per_pixel`'s 8/16 container size
    /// for 9-15 bpc sensors packed into a 16-bit container.
    pub actual_bitdepth: u32,
}

/// One video mode's advertised capabilities.
#[derive(Clone, Debug, PartialEq)]
pub struct ModeInfo {
    pub id: VideoMode,
    pub color_coding: ColorCoding,
    pub max_width: u32,
    pub max_height: u32,
    pub current_width: u32,
    pub current_height: u32,
    /// Allowed framerates for fixed modes; empty for Format-7 modes (which
    /// instead carry `format7`).
    pub framerates: Vec<f64>,
    pub format7: Option<Format7Info>,
    /// Sensor payload depth for fixed modes (8 for 8-bit modes; may be
    /// 9-15 for a 16-bit-container fixed mode).
    pub actual_bitdepth: u32,
}

/// Everything the capability probe reports for one camera (spec §4.1).
#[derive(Clone, Debug, PartialEq)]
pub struct CameraCapabilities {
    pub modes: Vec<ModeInfo>,
    pub bus_speed_mbit: u32,
    pub vendor: String,
    pub model: String,
    pub has_external_trigger: bool,
}

/// Which ISO-transmission command to issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transmission {
    On,
    Off,
}

/// A dequeued DMA frame, as handed back by [`IidcSurface::dequeue`].
#[derive(Clone, Debug, PartialEq)]
pub struct RawFrame {
    pub image: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub color_coding: ColorCoding,
    /// Camera-reported Bayer filter layout; `None` when unknown (spec §4.3:
    /// "for non-F7 modes...typically unknown").
    pub color_filter: Option<u32>,
    /// Wall-clock microsecond timestamp as reported by the IIDC layer.
    pub wallclock_us: i64,
    /// Number of frames still queued behind this one in the DMA ring.
    pub frames_behind: u32,
    /// Opaque index into the DMA ring, required to re-enqueue this buffer.
    pub ring_index: u32,
}

/// Blocking behavior requested of [`IidcSurface::dequeue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DequeueMode {
    Poll,
    Wait,
}

/// The abstract IIDC capability surface (spec §6).
pub trait IidcSurface: Send + Sync {
    fn initialize(&self) -> Result<()>;
    fn teardown(&self) -> Result<()>;
    fn enumerate(&self) -> Result<Vec<CameraId>>;
    fn open_camera(&self, device_index: u32) -> Result<CameraId>;
    fn free_camera(&self, camera: CameraId) -> Result<()>;
    fn power_on(&self, camera: CameraId) -> Result<()>;
    fn power_off(&self, camera: CameraId) -> Result<()>;
    fn reset(&self, camera: CameraId) -> Result<()>;

    fn capabilities(&self, camera: CameraId) -> Result<CameraCapabilities>;

    fn set_iso_speed(&self, camera: CameraId, mbit_per_sec: u32) -> Result<()>;
    fn set_video_mode(&self, camera: CameraId, mode: VideoMode) -> Result<()>;
    fn set_framerate(&self, camera: CameraId, fps: f64) -> Result<()>;

    fn set_format7_roi(
        &self,
        camera: CameraId,
        mode: VideoMode,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<()>;
    fn set_format7_packet_size(&self, camera: CameraId, mode: VideoMode, size: u32) -> Result<()>;

    fn dma_setup(&self, camera: CameraId, dma_buffers: u32) -> Result<()>;
    fn dma_stop(&self, camera: CameraId) -> Result<()>;
    fn dequeue(&self, camera: CameraId, mode: DequeueMode) -> Result<Option<RawFrame>>;
    fn enqueue(&self, camera: CameraId, ring_index: u32) -> Result<()>;

    fn set_transmission(&self, camera: CameraId, state: Transmission) -> Result<()>;
    fn set_broadcast(&self, camera: CameraId, enable: bool) -> Result<()>;

    fn set_external_trigger_power(&self, camera: CameraId, enable: bool) -> Result<()>;
    fn set_external_trigger_mode(&self, camera: CameraId, mode: u32) -> Result<()>;
    fn set_external_trigger_source(&self, camera: CameraId, source: u32) -> Result<()>;
    fn set_external_trigger_polarity(&self, camera: CameraId, active_high: bool) -> Result<()>;
    fn trigger_sources(&self, camera: CameraId) -> Result<Vec<u32>>;

    fn feature_present(&self, camera: CameraId, feature: &str) -> bool;
    fn feature_value(&self, camera: CameraId, feature: &str) -> Result<f64>;
    fn set_feature_value(&self, camera: CameraId, feature: &str, value: f64) -> Result<f64>;
    fn feature_boundaries(&self, camera: CameraId, feature: &str) -> Result<(f64, f64)>;
    fn set_feature_auto(&self, camera: CameraId, feature: &str, auto: bool) -> Result<()>;

    fn bandwidth_usage(&self, camera: CameraId) -> Result<u32>;

    fn debayer(
        &self,
        image: &[u8],
        width: u32,
        height: u32,
        pattern: u32,
        method: u32,
    ) -> Result<Vec<u8>>;
    fn yuv_to_rgb8(&self, image: &[u8], width: u32, height: u32, coding: ColorCoding)
        -> Result<Vec<u8>>;
}

pub mod fake;
