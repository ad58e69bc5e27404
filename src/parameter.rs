//! Tagged `set_parameter` surface (spec §6, redesigned per spec §9's
//! note: "function-pointer-like string-keyed parameter dispatch should
//! become a tagged variant with compile-time-checked payload types").
//!
//! [`Parameter`] is the internal, typed representation the session
//! dispatches on. [`parse`] is the thin host-boundary shim that turns a
//! `(name, value)` pair from the string-keyed API spec §6 describes into
//! one, so callers can keep using that surface while the session itself
//! never matches on strings.

use crate::error::{CaptureError, Result};
use crate::types::Roi;

/// The seven auto-capable camera features `set_parameter` can drive (spec
/// §6: "one of Brightness|Gain|Exposure|Shutter|Sharpness|Saturation|
/// Gamma").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Feature {
    Brightness,
    Gain,
    Exposure,
    Shutter,
    Sharpness,
    Saturation,
    Gamma,
}

impl Feature {
    pub fn name(self) -> &'static str {
        match self {
            Feature::Brightness => "Brightness",
            Feature::Gain => "Gain",
            Feature::Exposure => "Exposure",
            Feature::Shutter => "Shutter",
            Feature::Sharpness => "Sharpness",
            Feature::Saturation => "Saturation",
            Feature::Gamma => "Gamma",
        }
    }

    fn from_str(name: &str) -> Option<Self> {
        match name {
            "Brightness" => Some(Feature::Brightness),
            "Gain" => Some(Feature::Gain),
            "Exposure" => Some(Feature::Exposure),
            "Shutter" => Some(Feature::Shutter),
            "Sharpness" => Some(Feature::Sharpness),
            "Saturation" => Some(Feature::Saturation),
            "Gamma" => Some(Feature::Gamma),
            _ => None,
        }
    }
}

/// One recognized `set_parameter` request, already split into a name and
/// its typed payload (spec §6's table). A `None`-valued field means "get
/// the current value instead of setting it" for parameters that support
/// both; query-only parameters take no value at all.
#[derive(Clone, Debug, PartialEq)]
pub enum Parameter {
    PrintParameters,
    GetFramerate,
    GetRoi,
    GetVendorName,
    GetModelName,
    /// Returns `raw_bandwidth / 4915` as a fraction of total bus bandwidth.
    GetBandwidthUsage,
    PreferFormat7Modes(bool),
    /// `0..=4`, spec §4.2's pixel-format admission table.
    DataConversionMode(u32),
    /// Index into the IIDC Bayer-method enum.
    DebayerMethod(u32),
    /// Index into the Bayer filter-layout enum.
    OverrideBayerPattern(u32),
    /// Raw sync-role bits (spec §4.5); validated on assignment.
    SyncMode(u8),
    TriggerMode(u32),
    TriggerSource(u32),
    GetTriggerSources,
    /// `false` = active-low, `true` = active-high.
    TriggerPolarity(bool),
    /// Only valid while recording is active; the codec may not change.
    SetNewMovieName(String),
    /// Setting a feature's value switches it to manual mode. Prefixing the
    /// name with `Auto` (`auto == true`) switches it to auto mode instead,
    /// in which case `value` is ignored.
    Feature {
        feature: Feature,
        value: f64,
        auto: bool,
    },
}

/// Parses a `(name, value)` pair from the host-boundary string API into a
/// typed [`Parameter`]. Unrecognized names return `FeatureUnsupported` so
/// the caller can map that straight onto the spec's "`DBL_MAX` ⇒
/// unsupported" contract; `SetNewMoviename=` carries its payload in the
/// name itself (there is no numeric value for a path).
pub fn parse(name: &str, value: f64) -> Result<Parameter> {
    if let Some(path) = name.strip_prefix("SetNewMoviename=") {
        return Ok(Parameter::SetNewMovieName(path.to_string()));
    }

    match name {
        "PrintParameters" => return Ok(Parameter::PrintParameters),
        "GetFramerate" => return Ok(Parameter::GetFramerate),
        "GetROI" => return Ok(Parameter::GetRoi),
        "GetVendorname" => return Ok(Parameter::GetVendorName),
        "GetModelname" => return Ok(Parameter::GetModelName),
        "GetBandwidthUsage" => return Ok(Parameter::GetBandwidthUsage),
        "PreferFormat7Modes" => return Ok(Parameter::PreferFormat7Modes(value != 0.0)),
        "DataConversionMode" => return Ok(Parameter::DataConversionMode(value as u32)),
        "DebayerMethod" => return Ok(Parameter::DebayerMethod(value as u32)),
        "OverrideBayerPattern" => return Ok(Parameter::OverrideBayerPattern(value as u32)),
        "SyncMode" => return Ok(Parameter::SyncMode(value as u8)),
        "TriggerMode" => return Ok(Parameter::TriggerMode(value as u32)),
        "TriggerSource" => return Ok(Parameter::TriggerSource(value as u32)),
        "GetTriggerSources" => return Ok(Parameter::GetTriggerSources),
        "TriggerPolarity" => return Ok(Parameter::TriggerPolarity(value != 0.0)),
        _ => {}
    }

    if let Some(feature) = Feature::from_str(name) {
        return Ok(Parameter::Feature {
            feature,
            value,
            auto: false,
        });
    }
    if let Some(rest) = name.strip_prefix("Auto") {
        if let Some(feature) = Feature::from_str(rest) {
            return Ok(Parameter::Feature {
                feature,
                value,
                auto: true,
            });
        }
    }

    Err(CaptureError::FeatureUnsupported(name.to_string()))
}

/// The result of dispatching a [`Parameter`] against a session. Most
/// parameters reduce to a single `f64` (spec §6's blanket contract:
/// "returns the previous value, `DBL_MAX` if unsupported"); a few
/// (`GetROI`, `GetTriggerSources`, the vendor/model strings) don't fit a
/// scalar and carry their own shape. [`ParameterResponse::as_f64`] is the
/// narrowing the host-boundary `set_parameter_by_name` shim uses to stay
/// on the spec's original f64-only signature.
#[derive(Clone, Debug, PartialEq)]
pub enum ParameterResponse {
    F64(f64),
    Text(String),
    List(Vec<u32>),
    Roi(Roi),
    /// The name was recognized but the attached camera (or the session's
    /// current state) doesn't support it. Not an error (spec §7
    /// `FeatureUnsupported` is a warning, never fatal).
    Unsupported,
}

impl ParameterResponse {
    /// Narrows to a scalar for the f64-only host-boundary shim described
    /// in spec §6; anything that isn't natively an `F64` reports as
    /// unsupported (`f64::MAX`), matching the spec's own note that a
    /// string/list-valued get has no scalar "previous value".
    pub fn as_f64(&self) -> f64 {
        match self {
            ParameterResponse::F64(v) => *v,
            _ => f64::MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_feature_names() {
        assert_eq!(
            parse("Gain", 5.0).unwrap(),
            Parameter::Feature {
                feature: Feature::Gain,
                value: 5.0,
                auto: false,
            }
        );
    }

    #[test]
    fn parses_auto_prefixed_feature() {
        assert_eq!(
            parse("AutoExposure", 0.0).unwrap(),
            Parameter::Feature {
                feature: Feature::Exposure,
                value: 0.0,
                auto: true,
            }
        );
    }

    #[test]
    fn parses_movie_name_suffix() {
        assert_eq!(
            parse("SetNewMoviename=/tmp/out.mov", 0.0).unwrap(),
            Parameter::SetNewMovieName("/tmp/out.mov".to_string())
        );
    }

    #[test]
    fn unknown_name_is_unsupported() {
        let err = parse("NotARealParameter", 0.0).unwrap_err();
        assert!(matches!(err, CaptureError::FeatureUnsupported(_)));
    }

    #[test]
    fn get_only_parameters_ignore_value() {
        assert_eq!(parse("GetFramerate", 42.0).unwrap(), Parameter::GetFramerate);
    }
}
