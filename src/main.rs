//! Ambient CLI entry point.
//!
//! Process lifecycle (signal handling, daemonization) and a real
//! [`iidc_capture::iidc::IidcSurface`] binding to libdc1394 or a vendor SDK
//! are both out of scope for this crate (see `SPEC_FULL.md`). This binary
//! exists to exercise the engine end-to-end against the in-memory fake
//! surface: it opens a session, negotiates a mode, pulls a handful of
//! frames, and reports the resulting counters before shutting down.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use iidc_capture::clock::SystemClock;
use iidc_capture::config::EngineConfig;
use iidc_capture::error::Result;
use iidc_capture::iidc::fake::{two_mode_camera, FakeIidcSurface};
use iidc_capture::session::{Engine, PullMode, PullOutcome};
use iidc_capture::sinks::{EncoderSink, TextureSink, TextureSpec, WritableBuffer};
use iidc_capture::types::RequestedParams;

/// Discards every frame handed to it. Stands in for the movie-encoder
/// binding this crate delegates to downstream (spec §6).
#[derive(Default)]
struct NullEncoderSink {
    shape: Mutex<WritableBuffer>,
}

impl EncoderSink for NullEncoderSink {
    fn open(
        &self,
        _path: &str,
        width: u32,
        height: u32,
        _fps: f64,
        channels: u32,
        bitdepth: u32,
        _codec_spec: &str,
    ) -> Result<u64> {
        *self.shape.lock().unwrap_or_else(|e| e.into_inner()) = WritableBuffer {
            width,
            height,
            channels,
            bitdepth,
            data: Vec::new(),
        };
        Ok(0)
    }

    fn get_writable_buffer(&self, _handle: u64) -> Result<WritableBuffer> {
        let mut buffer = self.shape.lock().unwrap_or_else(|e| e.into_inner()).clone();
        buffer.data = vec![0u8; buffer.expected_len()];
        Ok(buffer)
    }

    fn commit_frame(&self, _handle: u64, _buffer: WritableBuffer, _duration: f64, _flip_y: bool) -> Result<()> {
        Ok(())
    }

    fn finalize(&self, _handle: u64) -> Result<()> {
        Ok(())
    }
}

/// Discards every texture upload request. Stands in for a graphics-API
/// binding this crate delegates to downstream (spec §6).
struct NullTextureSink;

impl TextureSink for NullTextureSink {
    fn create_texture(&self, _spec: &TextureSpec) -> Result<u64> {
        Ok(0)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = EngineConfig::load(std::env::var("IIDC_CAPTURE_CONFIG").ok().as_deref())?;

    let surface = Arc::new(FakeIidcSurface::new());
    surface.add_camera(0, two_mode_camera());

    let engine = Engine::new(
        surface,
        Arc::new(SystemClock::new()),
        Arc::new(NullEncoderSink::default()),
        Arc::new(NullTextureSink),
        config,
    );

    let handle = engine.open(0, RequestedParams::default(), None, 0)?;
    engine.start(handle, 30.0, true, None)?;

    for _ in 0..5 {
        match engine.pull_frame(handle, PullMode::Poll)? {
            PullOutcome::Frame(frame) => {
                tracing::info!(width = frame.width, height = frame.height, "pulled frame");
            }
            PullOutcome::Pending => thread::sleep(Duration::from_millis(5)),
            PullOutcome::End => break,
        }
    }

    engine.stop(handle)?;
    engine.close(handle)?;

    Ok(())
}
