//! Recorder Thread (spec §4.5 component 5 / spec §2 component 5): the
//! optional background loop that drives dequeue -> post-process -> sink
//! forwarding when a session is opened with `recordingflags & ASYNC`.
//!
//! Grounded in `PsychVideoCaptureSupportLibDC1394.c`'s `GrabberThreadMain`:
//! an unlocked dequeue, a locked metadata update + condition-signal, and a
//! short sleep between empty polls whose length depends on whether the
//! session is running in drop-newest ("low latency") mode (spec §5).

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::CaptureError;
use crate::iidc::{CameraId, DequeueMode, IidcSurface};
use crate::postprocess;
use crate::sinks::EncoderSink;
use crate::session::SessionShared;
use crate::types::NegotiatedParams;

/// Everything the recorder loop needs that doesn't live behind
/// [`SessionShared`]'s mutex — effectively immutable for the lifetime of
/// one `start`/`stop` cycle.
pub struct RecorderConfig {
    pub surface: Arc<dyn IidcSurface>,
    pub clock: Arc<dyn Clock>,
    pub camera: CameraId,
    pub negotiated: NegotiatedParams,
    pub debayer_method: u32,
    pub bayer_pattern_override: u32,
    pub poll_interval: Duration,
    pub encoder: Option<(Arc<dyn EncoderSink>, u64)>,
    /// Mirrors `recordingflags & DELIVERY_DISABLED` (spec §5): when set,
    /// frames still flow to the encoder sink but are not signaled to the
    /// consumer.
    pub delivery_disabled: bool,
}

/// Runs until `shared`'s `grabber_active` flag goes false or a dequeue
/// fails fatally (spec §7: "DequeueFailed ... fatal inside the recorder
/// thread: it exits").
pub fn run(shared: Arc<SessionShared>, cfg: RecorderConfig) {
    loop {
        if !shared.is_active() {
            break;
        }

        match cfg.surface.dequeue(cfg.camera, DequeueMode::Poll) {
            Ok(Some(frame)) => {
                let t0 = cfg.clock.monotonic_now_seconds();
                let pts = cfg.clock.normalize_pts(frame.wallclock_us);
                let frames_behind = frame.frames_behind;
                let ring_index = frame.ring_index;

                let processed = match postprocess::postprocess(
                    cfg.surface.as_ref(),
                    &frame,
                    cfg.debayer_method,
                    cfg.bayer_pattern_override,
                ) {
                    Ok(p) => p,
                    Err(e) => {
                        shared.fail(e);
                        break;
                    }
                };

                if let Err(e) = cfg.surface.enqueue(cfg.camera, ring_index) {
                    shared.fail(e);
                    break;
                }

                // Encoder sink: every captured frame, in capture order,
                // with no drops regardless of the consumer's policy
                // (spec §5 "Ordering guarantees").
                if let Some((encoder, handle)) = &cfg.encoder {
                    let commit = encoder.get_writable_buffer(*handle).and_then(|mut buffer| {
                        if buffer.data.len() != processed.data.len() {
                            return Err(CaptureError::Recording(
                                "encoder buffer size doesn't match post-processed frame".into(),
                            ));
                        }
                        buffer.data.copy_from_slice(&processed.data);
                        encoder.commit_frame(
                            *handle,
                            buffer,
                            1.0 / cfg.negotiated.framerate.max(1.0),
                            false,
                        )
                    });
                    if let Err(e) = commit {
                        shared.fail(e);
                        break;
                    }
                }

                let decompress_time = cfg.clock.monotonic_now_seconds() - t0;
                shared.produce(processed, pts, frames_behind, decompress_time, !cfg.delivery_disabled);
            }
            Ok(None) => {
                thread::sleep(cfg.poll_interval);
            }
            Err(e) => {
                shared.fail(e);
                break;
            }
        }
    }
}
