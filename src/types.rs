//! Shared value types used across mode selection, post-processing, and the
//! capture session (spec §3).

use crate::iidc::{ColorCoding, VideoMode};

/// A region of interest, PSYX-style (position + size).
///
/// An all-zero-or-unit rectangle is the "don't care" sentinel (spec §3):
/// the caller has no size preference and the engine should pick the
/// largest admissible size on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Roi {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Roi { x, y, w, h }
    }

    /// The "don't care" sentinel: offset at the origin, size zero or one
    /// pixel in each dimension.
    pub fn dont_care() -> Self {
        Roi { x: 0, y: 0, w: 1, h: 1 }
    }

    pub fn is_dont_care(self) -> bool {
        self.x == 0 && self.y == 0 && self.w <= 1 && self.h <= 1
    }

    pub fn area(self) -> u64 {
        self.w as u64 * self.h as u64
    }
}

/// Per-session request inputs to mode negotiation (spec §3 `requested`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RequestedParams {
    /// 0 => "let the selector decide"; 1-5 per spec §4.2's admission table.
    pub layers: u32,
    pub bitdepth: u32,
    pub dma_buffers: u32,
    pub roi: Roi,
    /// 0-4, see spec §4.2's pixel-format admission table.
    pub data_conversion_mode: u32,
    pub debayer_method: u32,
    pub bayer_pattern_override: u32,
    pub prefer_format7: bool,
}

impl Default for RequestedParams {
    fn default() -> Self {
        RequestedParams {
            layers: 0,
            bitdepth: 8,
            dma_buffers: 4,
            roi: Roi::dont_care(),
            data_conversion_mode: 0,
            debayer_method: 0,
            bayer_pattern_override: 0,
            prefer_format7: false,
        }
    }
}

/// Outcome of mode negotiation (spec §3 `negotiated`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NegotiatedParams {
    pub video_mode: VideoMode,
    pub color_coding: ColorCoding,
    pub framerate: f64,
    /// 0 for non-Format-7 modes.
    pub packet_size: u32,
    pub width: u32,
    pub height: u32,
    /// Format-7 ROI offset; always `(0, 0)` for non-Format-7 modes, which
    /// have no programmable offset (spec §4.2).
    pub x: u32,
    pub y: u32,
    pub actual_layers: u32,
    pub actual_bitdepth: u32,
    pub reqlayers: u32,
}

/// Frame counters (spec §3 `counters`).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Counters {
    pub framecounter: u64,
    pub nrframes: u64,
    pub nrgfxframes: u64,
    pub nr_droppedframes: u64,
    pub current_dropped: u32,
    pub pulled_dropped: u32,
    pub avg_decompresstime: f64,
    pub avg_gfxtime: f64,
    sum_decompresstime: f64,
    sum_gfxtime: f64,
}

impl Counters {
    pub fn record_decompress_time(&mut self, seconds: f64) {
        self.sum_decompresstime += seconds;
    }

    pub fn record_gfx_time(&mut self, seconds: f64) {
        self.sum_gfxtime += seconds;
    }

    /// Finalizes the running sums into averages (called at `stop`, spec §4.4).
    pub fn finalize_averages(&mut self) {
        self.avg_decompresstime = if self.nrframes > 0 {
            self.sum_decompresstime / self.nrframes as f64
        } else {
            0.0
        };
        self.avg_gfxtime = if self.nrgfxframes > 0 {
            self.sum_gfxtime / self.nrgfxframes as f64
        } else {
            0.0
        };
    }
}

/// Recording flags (spec §6): bit 1 audio (always cleared), bit 2 disable
/// consumer delivery, bit 4 run the async recorder thread.
pub mod recording_flags {
    pub const AUDIO: u32 = 1 << 0;
    pub const DELIVERY_DISABLED: u32 = 1 << 1;
    pub const ASYNC: u32 = 1 << 2;
}

/// Recording target state (spec §3 `recording`).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordingState {
    pub active: bool,
    pub target_path: Option<String>,
    pub codec_spec: Option<String>,
    pub movie_handle: Option<u64>,
    pub flags: u32,
}

/// One dequeued-and-postprocessed frame, as exposed to the consumer.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameBuffer {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub bitdepth: u32,
}

/// Parses the `:CodecSettings=` / `:CodecType=` suffix out of a target movie
/// path (spec §4.4 `open`, spec §6 "Recording filename suffixes").
///
/// Returns `(path, codec_spec)`; `codec_spec` is `"DEFAULTenc"` when neither
/// suffix is present. A `:CodecSettings=...` suffix overrides the default
/// codec's settings without changing which codec is used, so `codec_spec`
/// stays `DEFAULTenc`-prefixed with the settings string attached; a
/// `:CodecType=...` suffix names the codec outright and `codec_spec` becomes
/// exactly that value.
pub fn parse_movie_name(raw: &str) -> (String, String) {
    const CODEC_SETTINGS: &str = ":CodecSettings=";
    const CODEC_TYPE: &str = ":CodecType=";

    if let Some(idx) = raw.find(CODEC_SETTINGS) {
        let path = &raw[..idx];
        let settings = &raw[idx + CODEC_SETTINGS.len()..];
        (path.to_string(), format!("DEFAULTenc:{settings}"))
    } else if let Some(idx) = raw.find(CODEC_TYPE) {
        let path = &raw[..idx];
        let codec = &raw[idx + CODEC_TYPE.len()..];
        (path.to_string(), codec.to_string())
    } else {
        (raw.to_string(), "DEFAULTenc".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dont_care_roi_detection() {
        assert!(Roi::dont_care().is_dont_care());
        assert!(Roi::new(0, 0, 0, 0).is_dont_care());
        assert!(!Roi::new(0, 0, 640, 480).is_dont_care());
    }

    #[test]
    fn movie_name_default_codec() {
        let (path, codec) = parse_movie_name("/tmp/movie.mov");
        assert_eq!(path, "/tmp/movie.mov");
        assert_eq!(codec, "DEFAULTenc");
    }

    #[test]
    fn movie_name_codec_type_suffix() {
        let (path, codec) = parse_movie_name("/tmp/movie.mov:CodecType=h264");
        assert_eq!(path, "/tmp/movie.mov");
        assert_eq!(codec, "h264");
    }

    #[test]
    fn movie_name_codec_settings_suffix() {
        let (path, codec) = parse_movie_name("/tmp/movie.mov:CodecSettings=bitrate=4000");
        assert_eq!(path, "/tmp/movie.mov");
        assert_eq!(codec, "DEFAULTenc:bitrate=4000");
    }
}
