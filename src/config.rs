//! Engine-wide configuration.
//!
//! Hard-coded constants in the original implementation (the bus-speed table,
//! the "standard" non-Format-7 ROI/rate tables, recorder poll intervals) are
//! exposed here as an [`EngineConfig`] loadable via the `config` crate from a
//! layered TOML file + environment source, so a deployment can retune timing
//! without recompiling. Per-session overrides still come from the
//! `RequestedParams` passed to `open`/`start`.

use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};

/// Logging verbosity gate for non-fatal `Warning`-class diagnostics (spec
/// §7: "logged at verbosity ≥ 1"). Hard errors are always logged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Verbosity(pub u8);

impl Default for Verbosity {
    fn default() -> Self {
        Verbosity(1)
    }
}

impl Verbosity {
    /// Whether a warning at or above this engine's verbosity should be emitted.
    pub fn allows(self, level: u8) -> bool {
        self.0 >= level
    }
}

/// Recorder-thread poll interval selection (spec §5: 1 ms low-latency, 4 ms
/// normal, between empty DMA polls).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PollIntervals {
    pub low_latency_ms: u64,
    pub normal_ms: u64,
}

impl Default for PollIntervals {
    fn default() -> Self {
        PollIntervals {
            low_latency_ms: 1,
            normal_ms: 4,
        }
    }
}

/// The maximum number of simultaneously open camera sessions. Small and
/// fixed, per the data model in spec §3.
pub const MAX_CAMERAS: usize = 8;

/// The "standard" non-Format-7 ROI sizes that gate the Format-7 preference
/// check in mode selection (spec §4.2).
pub const STANDARD_ROIS: &[(u32, u32)] = &[
    (320, 240),
    (640, 480),
    (800, 600),
    (1024, 768),
    (1280, 960),
    (1600, 1200),
    (160, 120),
];

/// The "standard" framerates that gate the same Format-7 preference check.
pub const STANDARD_FRAMERATES: &[f64] = &[1.875, 3.75, 7.5, 15.0, 30.0, 60.0, 120.0, 240.0];

/// Bus-speed code -> cycle period (seconds), per spec §4.1.
///
/// `(mbit_per_sec, bus_period_seconds)`.
pub const BUS_SPEED_TABLE: &[(u32, f64)] = &[
    (100, 0.000_500),
    (200, 0.000_250),
    (400, 0.000_125),
    (800, 0.000_062_5),
    (1600, 0.000_031_25),
    (3200, 0.000_015_625),
];

/// Looks up the cycle period for a given bus speed code (in Mb/s). Returns
/// `None` for a code not in the table.
pub fn bus_period_for_speed(mbit_per_sec: u32) -> Option<f64> {
    BUS_SPEED_TABLE
        .iter()
        .find(|(speed, _)| *speed == mbit_per_sec)
        .map(|(_, period)| *period)
}

/// Engine-wide configuration, loadable from a layered TOML + environment
/// source (`IIDC_CAPTURE__*` environment variables override file values).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default DMA buffer count used when `open`'s caller doesn't override it.
    pub default_dma_buffers: u32,
    /// Non-fatal diagnostic verbosity.
    pub verbosity: Verbosity,
    /// Recorder-thread poll cadence.
    pub poll_intervals: PollIntervals,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            default_dma_buffers: 4,
            verbosity: Verbosity::default(),
            poll_intervals: PollIntervals::default(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from `path` (TOML) layered over built-in
    /// defaults, then over environment variables prefixed `IIDC_CAPTURE`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let defaults = EngineConfig::default();
        let mut builder = config::Config::builder().add_source(
            config::Config::try_from(&defaults).map_err(CaptureError::ConfigLoad)?,
        );
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("IIDC_CAPTURE")
                .separator("__")
                .try_parsing(true),
        );
        let built = builder.build().map_err(CaptureError::ConfigLoad)?;
        built
            .try_deserialize()
            .map_err(CaptureError::ConfigLoad)
            .and_then(|cfg: EngineConfig| {
                cfg.validate()?;
                Ok(cfg)
            })
    }

    fn validate(&self) -> Result<()> {
        if self.default_dma_buffers == 0 {
            return Err(CaptureError::Config(
                "default_dma_buffers must be >= 1".into(),
            ));
        }
        if self.poll_intervals.low_latency_ms == 0 || self.poll_intervals.normal_ms == 0 {
            return Err(CaptureError::Config(
                "poll intervals must be positive".into(),
            ));
        }
        for w in BUS_SPEED_TABLE.windows(2) {
            if w[0].1 <= w[1].1 {
                return Err(CaptureError::Config(
                    "bus speed table must have strictly decreasing cycle periods".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn bus_period_lookup() {
        assert_eq!(bus_period_for_speed(400), Some(0.000_125));
        assert_eq!(bus_period_for_speed(12345), None);
    }

    #[test]
    fn load_with_missing_file_falls_back_to_defaults() {
        let cfg = EngineConfig::load(Some("/nonexistent/path/does-not-exist")).unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }
}
