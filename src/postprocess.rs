//! Frame Post-Processor (spec §4.3): turns one dequeued [`RawFrame`] into
//! the consumer-visible pixel buffer — passthrough, Bayer demosaicing, or
//! YUV->RGB8 conversion — plus the 9-15 bpc left-shift used by the raw and
//! texture output paths (spec §4.4 `get_image`, spec §6).
//!
//! Grounded in `PsychVideoCaptureSupportLibDC1394.c`'s post-dequeue
//! conversion branch (debayer-or-colorconvert-or-passthrough) and the
//! `PSYCH_RAW_CONVERSION` bit-depth shift it applies before handing off to
//! a consumer or the movie encoder.

use crate::error::{CaptureError, Result};
use crate::iidc::{ColorCoding, IidcSurface, RawFrame};
use crate::types::FrameBuffer;

/// Whether `negotiated_coding` needs a scratch frame at all (spec §4.3: "A
/// scratch frame is allocated once at start iff `actual_layers == 3 AND
/// negotiated_coding` is not native RGB").
pub fn needs_scratch_frame(actual_layers: u32, negotiated_coding: ColorCoding) -> bool {
    actual_layers == 3 && !negotiated_coding.is_native_rgb()
}

/// Runs the post-processing step on one dequeued frame (spec §4.3).
///
/// `debayer_method` and `bayer_pattern_override` come from the session's
/// `requested` params (spec §3); `bayer_pattern_override` is substituted
/// whenever the frame's own `color_filter` is absent or out of the
/// `[0, 3]` filter-enum range (non-Format-7 dequeues typically don't carry
/// one).
pub fn postprocess(
    surface: &dyn IidcSurface,
    frame: &RawFrame,
    debayer_method: u32,
    bayer_pattern_override: u32,
) -> Result<FrameBuffer> {
    if frame.color_coding.is_native_rgb() {
        return Ok(FrameBuffer {
            data: frame.image.clone(),
            width: frame.width,
            height: frame.height,
            channels: 3,
            bitdepth: frame.color_coding.bits_per_channel(),
        });
    }

    if frame.color_coding.is_raw() || frame.color_coding.is_mono() {
        let pattern = match frame.color_filter {
            Some(f) if f <= 3 => f,
            _ => {
                if bayer_pattern_override > 3 {
                    return Err(CaptureError::InvalidBayerPattern(bayer_pattern_override));
                }
                bayer_pattern_override
            }
        };
        if debayer_method > 4 {
            return Err(CaptureError::InvalidDebayerMethod(debayer_method));
        }
        let data = surface.debayer(&frame.image, frame.width, frame.height, pattern, debayer_method)?;
        return Ok(FrameBuffer {
            data,
            width: frame.width,
            height: frame.height,
            channels: 3,
            bitdepth: frame.color_coding.bits_per_channel(),
        });
    }

    debug_assert!(frame.color_coding.is_yuv());
    let data = surface.yuv_to_rgb8(&frame.image, frame.width, frame.height, frame.color_coding)?;
    Ok(FrameBuffer {
        data,
        width: frame.width,
        height: frame.height,
        channels: 3,
        bitdepth: 8,
    })
}

/// Left-shift applied to 9-15 bpc payloads so black=0 and white approaches
/// `0xFFFF` (spec §4.4 `get_image` raw-buffer branch; property 6).
pub fn bitdepth_shift(actual_bitdepth: u32) -> u32 {
    16 - actual_bitdepth.clamp(1, 16)
}

/// Applies [`bitdepth_shift`] to every 16-bit sample in `samples`, in
/// place. Used for both the raw-output path and the texture
/// pixel-transfer-scale path (spec §4.4), which applies then un-applies
/// the same scale around the upload.
pub fn apply_bitdepth_shift(samples: &mut [u16], actual_bitdepth: u32) {
    if actual_bitdepth >= 16 {
        return;
    }
    let shift = bitdepth_shift(actual_bitdepth);
    for sample in samples.iter_mut() {
        *sample <<= shift;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iidc::fake::FakeIidcSurface;

    #[test]
    fn native_rgb_is_passthrough() {
        let surface = FakeIidcSurface::new();
        let frame = RawFrame {
            image: vec![1, 2, 3, 4, 5, 6],
            width: 2,
            height: 1,
            color_coding: ColorCoding::Rgb8,
            color_filter: None,
            wallclock_us: 0,
            frames_behind: 0,
            ring_index: 0,
        };
        let out = postprocess(&surface, &frame, 0, 0).unwrap();
        assert_eq!(out.data, frame.image);
        assert_eq!(out.channels, 3);
    }

    #[test]
    fn raw_frame_debayers_via_surface() {
        let surface = FakeIidcSurface::new();
        let frame = RawFrame {
            image: vec![10, 20, 30, 40],
            width: 2,
            height: 2,
            color_coding: ColorCoding::Raw8,
            color_filter: None,
            wallclock_us: 0,
            frames_behind: 0,
            ring_index: 0,
        };
        let out = postprocess(&surface, &frame, 1, 2).unwrap();
        assert_eq!(out.data.len(), frame.image.len() * 3);
        assert_eq!(out.channels, 3);
    }

    #[test]
    fn raw_frame_rejects_out_of_range_override_pattern() {
        let surface = FakeIidcSurface::new();
        let frame = RawFrame {
            image: vec![10, 20, 30, 40],
            width: 2,
            height: 2,
            color_coding: ColorCoding::Raw8,
            color_filter: None,
            wallclock_us: 0,
            frames_behind: 0,
            ring_index: 0,
        };
        let err = postprocess(&surface, &frame, 1, 9).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidBayerPattern(9)));
    }

    #[test]
    fn raw_frame_rejects_invalid_debayer_method() {
        let surface = FakeIidcSurface::new();
        let frame = RawFrame {
            image: vec![10, 20, 30, 40],
            width: 2,
            height: 2,
            color_coding: ColorCoding::Raw8,
            color_filter: Some(1),
            wallclock_us: 0,
            frames_behind: 0,
            ring_index: 0,
        };
        let err = postprocess(&surface, &frame, 9, 0).unwrap_err();
        assert!(matches!(err, CaptureError::InvalidDebayerMethod(9)));
    }

    #[test]
    fn yuv_frame_converts_to_rgb8() {
        let surface = FakeIidcSurface::new();
        let frame = RawFrame {
            image: vec![100, 150, 200, 250],
            width: 2,
            height: 2,
            color_coding: ColorCoding::Yuv422,
            color_filter: None,
            wallclock_us: 0,
            frames_behind: 0,
            ring_index: 0,
        };
        let out = postprocess(&surface, &frame, 0, 0).unwrap();
        assert_eq!(out.bitdepth, 8);
        assert_eq!(out.channels, 3);
    }

    /// Scratch-frame allocation gate (spec §4.3).
    #[test]
    fn scratch_frame_gate() {
        assert!(!needs_scratch_frame(3, ColorCoding::Rgb8));
        assert!(!needs_scratch_frame(1, ColorCoding::Mono8));
        assert!(needs_scratch_frame(3, ColorCoding::Yuv422));
        assert!(needs_scratch_frame(3, ColorCoding::Raw8));
    }

    /// Property 6: bit-depth shift round-trip for actual_bitdepth in [9,15].
    #[test]
    fn bitdepth_shift_roundtrip() {
        for bpc in 9..=15u32 {
            let shift = bitdepth_shift(bpc);
            let max_value: u16 = ((1u32 << bpc) - 1) as u16;
            let mut samples = [max_value];
            apply_bitdepth_shift(&mut samples, bpc);
            let expected = 0xFFFFu16 & !((1u16 << shift).wrapping_sub(1));
            assert_eq!(samples[0], expected, "bpc={bpc}");
        }
    }

    /// E6: a 12-bpc white raw pixel becomes 0xFFF0 after the shift.
    #[test]
    fn scenario_e6_twelve_bpc_white_pixel() {
        let mut samples = [0x0FFFu16];
        apply_bitdepth_shift(&mut samples, 12);
        assert_eq!(samples[0], 0xFFF0);
    }

    #[test]
    fn full_sixteen_bit_depth_is_unshifted() {
        let mut samples = [0x1234u16];
        apply_bitdepth_shift(&mut samples, 16);
        assert_eq!(samples[0], 0x1234);
    }
}
