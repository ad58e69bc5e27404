//! Mode Selector (spec §4.2): turns a [`RequestedParams`] plus a camera's
//! [`CameraCapabilities`] into a [`NegotiatedParams`], choosing between
//! fixed video modes and Format-7 programmable modes and, for Format-7,
//! solving the packet-size/framerate tradeoff.
//!
//! Grounded in `PsychVideoCaptureSupportLibDC1394.c`'s mode-selection and
//! `dc1394_format7_set_packet_size`/framerate-recompute sequence for the
//! Format-7 packet-size arithmetic (spec §9).

use tracing::warn;

use crate::config::{bus_period_for_speed, STANDARD_FRAMERATES, STANDARD_ROIS};
use crate::error::{CaptureError, Result};
use crate::iidc::{CameraCapabilities, ColorCoding, ModeInfo};
use crate::types::{NegotiatedParams, RequestedParams, Roi};

/// `target_fps` sentinel meaning "fastest available" (spec §4.2).
pub const FASTEST: f64 = f64::MAX;

fn is_standard_roi(roi: Roi) -> bool {
    !roi.is_dont_care() && STANDARD_ROIS.iter().any(|(w, h)| *w == roi.w && *h == roi.h)
}

fn is_standard_framerate(fps: f64) -> bool {
    STANDARD_FRAMERATES.iter().any(|r| (*r - fps).abs() < 1e-9)
}

/// Whether `coding` is admissible under spec §4.2's pixel-format admission
/// table for the given `reqlayers` (0 = "any") and `data_conversion_mode`.
fn admissible(coding: ColorCoding, reqlayers: u32, dcm: u32, bpc: u32) -> bool {
    let raw_at_bpc = coding.is_raw() && coding.bits_per_channel() == bpc;
    let mono_at_bpc = coding.is_mono() && coding.bits_per_channel() == bpc;
    let any_at_bpc = coding.bits_per_channel() == bpc;

    match reqlayers {
        0 => any_at_bpc,
        1 | 2 => match dcm {
            1 | 2 => raw_at_bpc,
            3 | 4 => mono_at_bpc,
            _ => raw_at_bpc || mono_at_bpc,
        },
        3 | 4 => match dcm {
            2 => raw_at_bpc,
            4 => mono_at_bpc,
            _ => any_at_bpc,
        },
        5 => coding.is_yuv(),
        _ => false,
    }
}

/// Derives `actual_layers` for a chosen coding given the request (spec
/// §4.2 "actual_layers derivation"): raw/mono data gets debayered into 3
/// layers only when the caller asked for >=3 layers via a debayering
/// conversion mode.
fn actual_layers_for(coding: ColorCoding, reqlayers: u32, dcm: u32) -> u32 {
    if (coding.is_raw() || coding.is_mono()) && reqlayers >= 3 && matches!(dcm, 2 | 4) {
        3
    } else {
        coding.native_layers()
    }
}

/// Reconciles the caller's requested layer count against what the chosen
/// mode actually produces, returning the resolved `reqlayers` and any
/// warning to log (spec §4.2 "layer reconciliation").
fn reconcile_layers(reqlayers: u32, actual_layers: u32) -> (u32, Option<String>) {
    match reqlayers {
        0 => (actual_layers, None),
        5 => (3, None),
        2 if actual_layers != 2 => (
            actual_layers,
            Some(format!(
                "requested 2 layers but selected mode yields {actual_layers}; downgrading"
            )),
        ),
        4 if actual_layers != 4 => (
            actual_layers,
            Some(format!(
                "requested 4 layers but selected mode yields {actual_layers}; downgrading"
            )),
        ),
        n => (n, None),
    }
}

/// Picks the smallest advertised framerate that is `>= target`, falling
/// back to the fastest available rate (with a warning) if none qualifies.
fn pick_framerate(rates: &[f64], target: f64) -> (f64, Option<String>) {
    let mut sorted = rates.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    if let Some(rate) = sorted.iter().find(|r| **r >= target) {
        (*rate, None)
    } else {
        let fastest = *sorted.last().unwrap_or(&0.0);
        let warning = if target == FASTEST {
            None
        } else {
            Some(format!(
                "no framerate >= {target} available; using fastest ({fastest})"
            ))
        };
        (fastest, warning)
    }
}

fn select_non_format7(
    modes: &[ModeInfo],
    req: &RequestedParams,
    target_fps: f64,
    bpc: u32,
) -> Option<(NegotiatedParams, Vec<String>)> {
    let mut candidates: Vec<&ModeInfo> = modes
        .iter()
        .filter(|m| !m.id.is_format7())
        .filter(|m| admissible(m.color_coding, req.layers, req.data_conversion_mode, bpc))
        .collect();

    if req.roi.is_dont_care() {
        candidates.sort_by(|a, b| {
            let area_a = a.max_width as u64 * a.max_height as u64;
            let area_b = b.max_width as u64 * b.max_height as u64;
            let bonus_a = u8::from(area_a == area_b && a.color_coding == ColorCoding::Rgb8);
            let bonus_b = u8::from(area_a == area_b && b.color_coding == ColorCoding::Rgb8);
            (area_b, bonus_b).cmp(&(area_a, bonus_a))
        });
    } else {
        candidates.retain(|m| m.current_width == req.roi.w && m.current_height == req.roi.h);
        // Among modes tying on size, prefer whichever one's own advertised
        // framerates actually reach the target, rather than the one that
        // merely appears first.
        candidates.sort_by(|a, b| {
            let (_, warn_a) = pick_framerate(&a.framerates, target_fps);
            let (_, warn_b) = pick_framerate(&b.framerates, target_fps);
            warn_a.is_some().cmp(&warn_b.is_some())
        });
    }

    let chosen = candidates.into_iter().next()?;
    let mut warnings = Vec::new();
    let (rate, rate_warning) = pick_framerate(&chosen.framerates, target_fps);
    warnings.extend(rate_warning);

    let actual_layers = actual_layers_for(chosen.color_coding, req.layers, req.data_conversion_mode);
    let (reqlayers, layer_warning) = reconcile_layers(req.layers, actual_layers);
    warnings.extend(layer_warning);

    Some((
        NegotiatedParams {
            video_mode: chosen.id,
            color_coding: chosen.color_coding,
            framerate: rate,
            packet_size: 0,
            width: chosen.current_width,
            height: chosen.current_height,
            x: 0,
            y: 0,
            actual_layers,
            actual_bitdepth: chosen.actual_bitdepth,
            reqlayers,
        },
        warnings,
    ))
}

/// Format-7 packet-size/framerate solve for one candidate mode (spec §4.2;
/// formulas confirmed against `PsychVideoCaptureSupportLibDC1394.c`).
fn solve_format7_packet_size(width: u32, height: u32, depth_bpp: u32, bus_period: f64, target_fps: f64, pbmin: u32, pbmax: u32) -> (u32, f64) {
    let total_bits = width as f64 * height as f64 * depth_bpp as f64;

    let raw_num_packets = if target_fps.is_finite() && target_fps > 0.0 {
        (1.0 / (bus_period * target_fps)).round()
    } else {
        0.0
    };
    let mut num_packets = ((raw_num_packets * 8.0) as i64).clamp(8, 32760);
    if num_packets == 0 {
        num_packets = 8;
    }

    let mut packet_size = ((total_bits + num_packets as f64 - 1.0) / num_packets as f64).ceil() as u32;
    if packet_size < pbmin {
        packet_size = pbmin;
    }
    if packet_size % pbmin != 0 {
        packet_size -= packet_size % pbmin;
    }
    while packet_size > pbmax && packet_size > pbmin {
        packet_size -= pbmin;
    }
    if packet_size == 0 {
        packet_size = pbmin.max(1);
    }

    let effective_num_packets =
        ((total_bits + (packet_size as f64 * 8.0) - 1.0) / (packet_size as f64 * 8.0)).ceil();
    let fps = 1.0 / (bus_period * effective_num_packets.max(1.0));

    (packet_size, fps)
}

fn select_format7(
    modes: &[ModeInfo],
    req: &RequestedParams,
    target_fps: f64,
    bpc: u32,
    bus_period: f64,
) -> Option<(NegotiatedParams, Vec<String>)> {
    let candidates: Vec<&ModeInfo> = modes
        .iter()
        .filter(|m| m.id.is_format7())
        .filter(|m| admissible(m.color_coding, req.layers, req.data_conversion_mode, bpc))
        .collect();

    let mut best: Option<(NegotiatedParams, Vec<String>, f64)> = None;
    for m in candidates {
        let f7 = m.format7?;
        let (width, height) = if req.roi.is_dont_care() {
            (f7.max_width, f7.max_height)
        } else {
            (req.roi.w, req.roi.h)
        };
        let (x, y) = if req.roi.is_dont_care() { (0, 0) } else { (req.roi.x, req.roi.y) };

        let (packet_size, fps) = solve_format7_packet_size(
            width,
            height,
            f7.depth_bits_per_pixel,
            bus_period,
            target_fps,
            f7.pbmin,
            f7.pbmax,
        );

        let actual_layers = actual_layers_for(m.color_coding, req.layers, req.data_conversion_mode);
        let (reqlayers, layer_warning) = reconcile_layers(req.layers, actual_layers);

        let candidate = NegotiatedParams {
            video_mode: m.id,
            color_coding: m.color_coding,
            framerate: fps,
            packet_size,
            width,
            height,
            x,
            y,
            actual_layers,
            actual_bitdepth: f7.actual_bitdepth,
            reqlayers,
        };

        let distance = if target_fps == FASTEST {
            -fps // fastest: maximize fps
        } else {
            (fps - target_fps).abs()
        };

        let keep = match &best {
            None => true,
            Some((_, _, best_distance)) => distance < *best_distance,
        };
        if keep {
            let x_warning = if x != 0 || y != 0 {
                Some(format!("Format-7 offset ({x},{y}) requested"))
            } else {
                None
            };
            let mut warnings = Vec::new();
            warnings.extend(layer_warning);
            warnings.extend(x_warning);
            best = Some((candidate, warnings, distance));
        }
    }

    best.map(|(c, w, _)| (c, w))
}

/// Runs the full mode-selection algorithm (spec §4.2): admission filtering,
/// the Format-7-vs-fixed preference gate, and (for Format-7) the
/// packet-size/framerate solve. Returns the negotiated parameters plus any
/// non-fatal warnings (spec §7, logged at verbosity >= 1 by the caller).
pub fn select_mode(
    req: &RequestedParams,
    caps: &CameraCapabilities,
    target_fps: f64,
) -> Result<(NegotiatedParams, Vec<String>)> {
    let bpc = if req.bitdepth <= 8 { 8 } else { 16 };
    let bus_period = bus_period_for_speed(caps.bus_speed_mbit).ok_or_else(|| {
        CaptureError::BusSpeedQueryFailed(format!("unknown bus speed {}", caps.bus_speed_mbit))
    })?;

    let prefer_f7 = req.prefer_format7
        || !is_standard_roi(req.roi)
        || !is_standard_framerate(target_fps);

    let result = if prefer_f7 {
        select_format7(&caps.modes, req, target_fps, bpc, bus_period)
            .or_else(|| select_non_format7(&caps.modes, req, target_fps, bpc))
    } else {
        select_non_format7(&caps.modes, req, target_fps, bpc)
    };

    result.ok_or_else(|| {
        CaptureError::Config(format!(
            "no admissible video mode for layers={} bitdepth={} roi={:?}",
            req.layers, req.bitdepth, req.roi
        ))
    })
}

/// Logs mode-selection warnings at the configured verbosity (spec §7).
pub fn log_warnings(warnings: &[String], verbosity: crate::config::Verbosity) {
    if verbosity.allows(1) {
        for w in warnings {
            warn!("{w}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iidc::fake::{format7_camera, mono8_camera, two_mode_camera, FakeIidcSurface};
    use crate::iidc::{CameraId, IidcSurface};

    fn caps_of(caps: CameraCapabilities) -> CameraCapabilities {
        let surface = FakeIidcSurface::new().with_camera(0, caps);
        surface.capabilities(CameraId(0)).unwrap()
    }

    /// E1: don't-care ROI, fastest framerate, on a camera with no
    /// Format-7 modes picks the largest-area fixed mode.
    #[test]
    fn scenario_e1_largest_area_fixed_mode() {
        let caps = caps_of(two_mode_camera());

        let req = RequestedParams {
            layers: 3,
            ..Default::default()
        };
        let (negotiated, _) = select_mode(&req, &caps, FASTEST).unwrap();

        assert_eq!(negotiated.width, 1024);
        assert_eq!(negotiated.height, 768);
        assert_eq!(negotiated.color_coding, ColorCoding::Rgb8);
        assert_eq!(negotiated.packet_size, 0);
    }

    /// E2: an exact standard ROI + standard framerate match selects the
    /// fixed mode directly, without engaging Format-7.
    #[test]
    fn scenario_e2_exact_fixed_mode_match() {
        let caps = caps_of(two_mode_camera());

        let req = RequestedParams {
            layers: 3,
            roi: Roi::new(0, 0, 640, 480),
            ..Default::default()
        };
        let (negotiated, warnings) = select_mode(&req, &caps, 30.0).unwrap();

        assert_eq!(negotiated.width, 640);
        assert_eq!(negotiated.height, 480);
        assert_eq!(negotiated.color_coding, ColorCoding::Yuv422);
        assert_eq!(negotiated.framerate, 30.0);
        assert!(warnings.is_empty());
    }

    /// E3: a non-standard ROI forces the Format-7 path and solves a
    /// packet size within the advertised [pbmin, pbmax] range.
    #[test]
    fn scenario_e3_format7_packet_size_in_range() {
        let caps = caps_of(format7_camera());

        let req = RequestedParams {
            layers: 1,
            roi: Roi::new(0, 0, 400, 300),
            ..Default::default()
        };
        let (negotiated, _) = select_mode(&req, &caps, 30.0).unwrap();

        assert!(negotiated.video_mode.is_format7());
        assert_eq!(negotiated.width, 400);
        assert_eq!(negotiated.height, 300);
        assert!(negotiated.packet_size >= 4 && negotiated.packet_size <= 8192);
        assert_eq!(negotiated.packet_size % 4, 0);
    }

    /// Property: mode selection is a deterministic function of its inputs.
    #[test]
    fn determinism() {
        let caps = caps_of(two_mode_camera());
        let req = RequestedParams {
            layers: 3,
            ..Default::default()
        };

        let (a, _) = select_mode(&req, &caps, FASTEST).unwrap();
        let (b, _) = select_mode(&req, &caps, FASTEST).unwrap();
        assert_eq!(a, b);
    }

    /// Property: a requested layer count the chosen mode can't deliver is
    /// downgraded, with a warning, rather than silently granted.
    #[test]
    fn layer_downgrade_warns() {
        let caps = caps_of(mono8_camera());

        let req = RequestedParams {
            layers: 2,
            data_conversion_mode: 3,
            ..Default::default()
        };
        let (negotiated, warnings) = select_mode(&req, &caps, FASTEST).unwrap();

        assert_eq!(negotiated.actual_layers, 1);
        assert_eq!(negotiated.reqlayers, 1);
        assert!(warnings.iter().any(|w| w.contains("downgrading")));
    }

    /// Property: when no advertised framerate meets the target, the
    /// fastest available rate is used and a warning is produced.
    #[test]
    fn framerate_fallback_warns() {
        let rates = [7.5, 15.0, 30.0];
        let (rate, warning) = pick_framerate(&rates, 1000.0);
        assert_eq!(rate, 30.0);
        assert!(warning.is_some());
    }

    /// Property: an exact target already advertised produces no warning.
    #[test]
    fn framerate_exact_no_warning() {
        let rates = [7.5, 15.0, 30.0];
        let (rate, warning) = pick_framerate(&rates, 15.0);
        assert_eq!(rate, 15.0);
        assert!(warning.is_none());
    }

    #[test]
    fn unknown_bus_speed_is_an_error() {
        let mut caps = caps_of(two_mode_camera());
        caps.bus_speed_mbit = 999;
        let req = RequestedParams::default();
        let err = select_mode(&req, &caps, FASTEST).unwrap_err();
        assert!(matches!(err, CaptureError::BusSpeedQueryFailed(_)));
    }
}
