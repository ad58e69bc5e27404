//! Error taxonomy for the capture engine.
//!
//! `CaptureError` consolidates every failure mode described in the engine's
//! design: mode-negotiation failures, IIDC-layer setup failures, DMA/transport
//! failures, and the ambient configuration/IO failures that come from loading
//! [`crate::config::EngineConfig`]. Using `#[from]` lets call sites use `?`
//! throughout without manual wrapping.

use thiserror::Error;

/// Convenience alias for results using the engine's error type.
pub type Result<T> = std::result::Result<T, CaptureError>;

#[derive(Error, Debug)]
pub enum CaptureError {
    /// Mode selection found no admissible mode, or an illegal sync role /
    /// layer count was requested.
    #[error("configuration error: {0}")]
    Config(String),

    /// The IIDC layer itself could not be initialized.
    #[error("IIDC library initialization failed: {0}")]
    LibraryInit(String),

    /// No cameras are attached to the bus.
    #[error("no cameras found on the bus")]
    NoCameras,

    /// The requested device index is out of range, or (more generally) the
    /// requested session handle does not name a valid, open slot.
    #[error("invalid camera/session index: {0}")]
    BadIndex(u32),

    /// Camera power-on / reset sequence failed.
    #[error("camera initialization failed: {0}")]
    CameraInitFailed(String),

    /// Could not query the camera's current iso bus speed.
    #[error("bus speed query failed: {0}")]
    BusSpeedQueryFailed(String),

    /// DMA ring allocation failed.
    #[error("DMA setup failed: {0}")]
    DmaSetupFailed(String),

    /// Isochronous transmission could not be enabled.
    #[error("transmission start failed: {0}")]
    TransmissionStartFailed(String),

    /// A Format-7 packet size fell outside `[pbmin, pbmax]`.
    #[error("packet size {size} out of range [{min}, {max}]")]
    PacketSizeOutOfRange { size: u32, min: u32, max: u32 },

    /// DMA dequeue failed (fatal inside the recorder thread; surfaced to the
    /// consumer on the synchronous path).
    #[error("frame dequeue failed: {0}")]
    DequeueFailed(String),

    /// DMA re-enqueue failed.
    #[error("frame enqueue failed: {0}")]
    EnqueueFailed(String),

    /// The Bayer pattern used for demosaicing was out of range and no
    /// override was supplied.
    #[error("invalid Bayer pattern: {0}")]
    InvalidBayerPattern(u32),

    /// The requested debayering method is not one the post-processor knows.
    #[error("invalid debayer method: {0}")]
    InvalidDebayerMethod(u32),

    /// The movie-encoder sink rejected a frame (shape/format mismatch, or
    /// could not accept the frame at all).
    #[error("recording error: {0}")]
    Recording(String),

    /// A `set_parameter` name is recognized but not supported by the
    /// attached camera. Not fatal: the caller receives `f64::MAX`.
    #[error("feature unsupported: {0}")]
    FeatureUnsupported(String),

    /// Failed to load [`crate::config::EngineConfig`] from its backing
    /// sources (ambient: not part of the in-scope capture protocol).
    #[error("engine configuration load failed: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    /// I/O failure from path handling (e.g. validating a target movie path)
    /// or from the ambient test fixtures.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
