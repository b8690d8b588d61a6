//! Named camera features
//!
//! Every hardware property the driver touches is registered here once, with its SDK
//! name and its value kind. Call sites go through a `Feature` handle, so the kind is
//! resolved at registration and never inspected ad hoc.

use serde::Serialize;

use crate::error::{AppResult, NeoError};
use crate::hardware::{FeatureBackend, FeatureKind, FeatureValue};

/// Snake-case keys of the features the driver uses directly.
pub mod keys {
    /// `SensorWidth`
    pub const SENSOR_WIDTH: &str = "sensor_width";
    /// `SensorHeight`
    pub const SENSOR_HEIGHT: &str = "sensor_height";
    /// `PixelWidth`
    pub const PIXEL_WIDTH: &str = "pixel_width";
    /// `PixelHeight`
    pub const PIXEL_HEIGHT: &str = "pixel_height";
    /// `CameraModel`
    pub const CAMERA_MODEL: &str = "camera_model";
    /// `SerialNumber`
    pub const SERIAL_NUMBER: &str = "serial_number";
    /// `AOIBinning`
    pub const AOI_BINNING: &str = "aoi_binning";
    /// `AOIWidth`
    pub const AOI_WIDTH: &str = "aoi_width";
    /// `AOILeft`
    pub const AOI_LEFT: &str = "aoi_left";
    /// `AOIHeight`
    pub const AOI_HEIGHT: &str = "aoi_height";
    /// `AOITop`
    pub const AOI_TOP: &str = "aoi_top";
    /// `SpuriousNoiseFilter`
    pub const SPURIOUS_NOISE_FILTER: &str = "spurious_noise_filter";
    /// `StaticBlemishCorrection`
    pub const STATIC_BLEMISH_CORRECTION: &str = "static_blemish_correction";
    /// `ElectronicShutteringMode`
    pub const ELECTRONIC_SHUTTERING_MODE: &str = "electronic_shuttering_mode";
    /// `SimplePreAmpGainControl`
    pub const SIMPLE_PREAMP_GAIN_CONTROL: &str = "simple_preamp_gain_control";
    /// `ExposureTime`
    pub const EXPOSURE_TIME: &str = "exposure_time";
    /// `SensorCooling`
    pub const SENSOR_COOLING: &str = "sensor_cooling";
    /// `TemperatureControl`
    pub const TEMPERATURE_CONTROL: &str = "temperature_control";
    /// `SensorTemperature`
    pub const SENSOR_TEMPERATURE: &str = "sensor_temperature";
    /// `TemperatureStatus`
    pub const TEMPERATURE_STATUS: &str = "temperature_status";
}

/// Features exposed by the Neo, in registration order.
const NEO_FEATURES: &[(&str, &str, FeatureKind)] = &[
    (keys::CAMERA_MODEL, "CameraModel", FeatureKind::String),
    (keys::SERIAL_NUMBER, "SerialNumber", FeatureKind::String),
    (keys::SENSOR_WIDTH, "SensorWidth", FeatureKind::Integer),
    (keys::SENSOR_HEIGHT, "SensorHeight", FeatureKind::Integer),
    (keys::PIXEL_WIDTH, "PixelWidth", FeatureKind::Float),
    (keys::PIXEL_HEIGHT, "PixelHeight", FeatureKind::Float),
    (keys::AOI_BINNING, "AOIBinning", FeatureKind::Enumerated),
    (keys::AOI_WIDTH, "AOIWidth", FeatureKind::Integer),
    (keys::AOI_LEFT, "AOILeft", FeatureKind::Integer),
    (keys::AOI_HEIGHT, "AOIHeight", FeatureKind::Integer),
    (keys::AOI_TOP, "AOITop", FeatureKind::Integer),
    (keys::SPURIOUS_NOISE_FILTER, "SpuriousNoiseFilter", FeatureKind::Boolean),
    (keys::STATIC_BLEMISH_CORRECTION, "StaticBlemishCorrection", FeatureKind::Boolean),
    (keys::ELECTRONIC_SHUTTERING_MODE, "ElectronicShutteringMode", FeatureKind::Enumerated),
    (keys::SIMPLE_PREAMP_GAIN_CONTROL, "SimplePreAmpGainControl", FeatureKind::Enumerated),
    (keys::EXPOSURE_TIME, "ExposureTime", FeatureKind::Float),
    (keys::SENSOR_COOLING, "SensorCooling", FeatureKind::Boolean),
    (keys::TEMPERATURE_CONTROL, "TemperatureControl", FeatureKind::Enumerated),
    (keys::SENSOR_TEMPERATURE, "SensorTemperature", FeatureKind::Float),
    (keys::TEMPERATURE_STATUS, "TemperatureStatus", FeatureKind::Enumerated),
    ("fan_speed", "FanSpeed", FeatureKind::Enumerated),
    ("pixel_encoding", "PixelEncoding", FeatureKind::Enumerated),
    ("cycle_mode", "CycleMode", FeatureKind::Enumerated),
    ("trigger_mode", "TriggerMode", FeatureKind::Enumerated),
];

/// Handle to one registered feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Feature {
    /// Snake-case key, e.g. `aoi_width`
    pub key: String,
    /// Name known to the SDK, e.g. `AOIWidth`
    pub sdk_name: String,
    /// Value kind fixed at registration
    pub kind: FeatureKind,
}

impl Feature {
    /// Describe a feature; it is not registered until added to a `FeatureMap`.
    pub fn new(key: impl Into<String>, sdk_name: impl Into<String>, kind: FeatureKind) -> Self {
        Self {
            key: key.into(),
            sdk_name: sdk_name.into(),
            kind,
        }
    }

    /// Read the current value. A value of the wrong kind is a backend fault.
    pub fn get(&self, backend: &dyn FeatureBackend) -> AppResult<FeatureValue> {
        let value = backend.get(&self.sdk_name, self.kind)?;
        if !value.matches(self.kind) {
            return Err(NeoError::hardware(
                &self.sdk_name,
                format!("expected {} value, got {:?}", self.kind.as_str(), value),
            ));
        }
        Ok(value)
    }

    /// Read an integer feature.
    pub fn get_i64(&self, backend: &dyn FeatureBackend) -> AppResult<i64> {
        let value = self.get(backend)?;
        value
            .as_i64()
            .ok_or_else(|| self.not_numeric(&value))
    }

    /// Read a numeric feature; enumerated setpoints such as `"-30.00"` are parsed.
    pub fn get_f64(&self, backend: &dyn FeatureBackend) -> AppResult<f64> {
        let value = self.get(backend)?;
        value
            .as_f64()
            .ok_or_else(|| self.not_numeric(&value))
    }

    /// Write `value`, rejecting values of a different kind before touching hardware.
    pub fn set(&self, backend: &dyn FeatureBackend, value: impl Into<FeatureValue>) -> AppResult<()> {
        let value = value.into();
        if !value.matches(self.kind) || self.kind == FeatureKind::String {
            return Err(NeoError::UnsupportedOperation {
                feature: self.sdk_name.clone(),
                operation: format!("writing {:?} to a {} feature", value, self.kind.as_str()),
            });
        }
        backend.set(&self.sdk_name, &value)
    }

    /// Allowed values; only enumerated features have them.
    pub fn options(&self, backend: &dyn FeatureBackend) -> AppResult<Vec<String>> {
        if self.kind != FeatureKind::Enumerated {
            return Err(NeoError::UnsupportedOperation {
                feature: self.sdk_name.clone(),
                operation: "option listing".to_string(),
            });
        }
        backend.options(&self.sdk_name)
    }

    fn not_numeric(&self, value: &FeatureValue) -> NeoError {
        NeoError::hardware(&self.sdk_name, format!("'{}' is not numeric", value))
    }
}

/// Ordered registry of the features known to the driver.
#[derive(Debug, Clone, Default)]
pub struct FeatureMap {
    features: Vec<Feature>,
}

impl FeatureMap {
    /// The Andor Neo feature set.
    pub fn neo() -> Self {
        Self {
            features: NEO_FEATURES
                .iter()
                .map(|(key, sdk_name, kind)| Feature::new(*key, *sdk_name, *kind))
                .collect(),
        }
    }

    /// Register an additional feature. Keys and SDK names must be unique.
    pub fn register(&mut self, feature: Feature) -> AppResult<()> {
        if self.lookup(&feature.key).is_some() || self.lookup(&feature.sdk_name).is_some() {
            return Err(NeoError::Configuration(format!(
                "Duplicate feature registration: '{}' ({})",
                feature.key, feature.sdk_name
            )));
        }
        self.features.push(feature);
        Ok(())
    }

    /// Find a feature by key (`aoi_width`) or SDK name (`AOIWidth`).
    pub fn lookup(&self, name: &str) -> Option<&Feature> {
        self.features
            .iter()
            .find(|f| f.key == name || f.sdk_name == name)
    }

    /// Like `lookup`, failing with `UnknownFeature`.
    pub fn get(&self, name: &str) -> AppResult<&Feature> {
        self.lookup(name)
            .ok_or_else(|| NeoError::UnknownFeature(name.to_string()))
    }

    /// SDK names in registration order.
    pub fn sdk_names(&self) -> Vec<String> {
        self.features.iter().map(|f| f.sdk_name.clone()).collect()
    }

    /// Registered features in order.
    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    /// Number of registered features.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_key_and_sdk_name() {
        let map = FeatureMap::neo();
        let by_key = map.lookup("aoi_width").unwrap();
        let by_sdk = map.lookup("AOIWidth").unwrap();
        assert_eq!(by_key, by_sdk);
        assert_eq!(by_key.kind, FeatureKind::Integer);
        assert!(map.lookup("NoSuchFeature").is_none());
    }

    #[test]
    fn test_unknown_feature_error() {
        let map = FeatureMap::neo();
        let err = map.get("Gamma").unwrap_err();
        assert!(matches!(err, NeoError::UnknownFeature(ref n) if n == "Gamma"));
    }

    #[test]
    fn test_sdk_names_keep_registration_order() {
        let map = FeatureMap::neo();
        let names = map.sdk_names();
        assert_eq!(names.len(), map.len());
        assert_eq!(names[0], "CameraModel");
        let binning = names.iter().position(|n| n == "AOIBinning").unwrap();
        let width = names.iter().position(|n| n == "AOIWidth").unwrap();
        assert!(binning < width);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut map = FeatureMap::neo();
        let err = map
            .register(Feature::new("width_again", "AOIWidth", FeatureKind::Integer))
            .unwrap_err();
        assert!(err.to_string().contains("Duplicate feature"));

        map.register(Feature::new("frame_rate", "FrameRate", FeatureKind::Float))
            .unwrap();
        assert_eq!(map.get("FrameRate").unwrap().key, "frame_rate");
    }
}
