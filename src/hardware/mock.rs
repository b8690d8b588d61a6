//! Mock Feature Backend
//!
//! Simulated Andor Neo for testing without the vendor SDK or a camera.
//!
//! # Simulated behavior
//!
//! - 2560x2160 sensor with 6.5 um pixels (overridable with `with_sensor`)
//! - Enumerated features validate writes against their option lists
//! - AOI size/offset writes are checked against the active binning, like the SDK
//! - Scripted `SensorTemperature` readings for convergence tests
//! - Injected failures, silent clamping and a write log for ordering assertions

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use crate::error::{AppResult, NeoError};
use crate::hardware::feature_backend::{FeatureBackend, FeatureKind, FeatureValue};

const BINNING_OPTIONS: &[&str] = &["1x1", "2x2", "3x3", "4x4", "8x8"];
const SHUTTERING_OPTIONS: &[&str] = &["Rolling", "Global"];
const PREAMP_OPTIONS: &[&str] = &[
    "11-bit (high well capacity)",
    "12-bit (high well capacity)",
    "11-bit (low noise)",
    "16-bit (low noise & high well capacity)",
];
const SETPOINT_OPTIONS: &[&str] = &[
    "0.00", "-5.00", "-10.00", "-15.00", "-20.00", "-25.00", "-30.00", "-35.00", "-40.00",
];
const STATUS_OPTIONS: &[&str] = &[
    "Cooler Off",
    "Stabilised",
    "Cooling",
    "Drift",
    "Not Stabilised",
    "Fault",
];

#[derive(Debug, Clone)]
struct MockFeature {
    kind: FeatureKind,
    value: FeatureValue,
    options: Vec<String>,
    writable: bool,
}

impl MockFeature {
    fn read_only(kind: FeatureKind, value: impl Into<FeatureValue>) -> Self {
        Self {
            kind,
            value: value.into(),
            options: Vec::new(),
            writable: false,
        }
    }

    fn writable(kind: FeatureKind, value: impl Into<FeatureValue>) -> Self {
        Self {
            writable: true,
            ..Self::read_only(kind, value)
        }
    }

    fn enumerated(value: &str, options: &[&str], writable: bool) -> Self {
        Self {
            kind: FeatureKind::Enumerated,
            value: FeatureValue::from(value),
            options: options.iter().map(|o| o.to_string()).collect(),
            writable,
        }
    }
}

#[derive(Debug, Clone)]
struct InjectedFailure {
    /// Number of operations that still succeed before failing
    remaining_ok: usize,
    message: String,
}

#[derive(Debug, Default)]
struct MockState {
    features: HashMap<String, MockFeature>,
    temperatures: VecDeque<f64>,
    failures: HashMap<String, InjectedFailure>,
    clamps: HashMap<String, i64>,
    reported: HashMap<String, FeatureValue>,
    write_log: Vec<(String, FeatureValue)>,
    read_counts: HashMap<String, usize>,
    closed: bool,
}

impl MockState {
    fn check_failure(&mut self, sdk_name: &str) -> AppResult<()> {
        if self.closed {
            return Err(NeoError::hardware(sdk_name, "camera handle is closed"));
        }
        if let Some(failure) = self.failures.get_mut(sdk_name) {
            if failure.remaining_ok == 0 {
                return Err(NeoError::hardware(sdk_name, failure.message.clone()));
            }
            failure.remaining_ok -= 1;
        }
        Ok(())
    }

    fn int(&self, sdk_name: &str) -> i64 {
        self.features
            .get(sdk_name)
            .and_then(|f| f.value.as_i64())
            .unwrap_or(0)
    }

    fn binning(&self) -> i64 {
        self.features
            .get("AOIBinning")
            .and_then(|f| f.value.as_str())
            .and_then(|s| s.split('x').next())
            .and_then(|n| n.parse().ok())
            .unwrap_or(1)
    }

    /// SDK-style AOI consistency check against the active binning.
    fn check_aoi(&self, sdk_name: &str, value: i64) -> AppResult<()> {
        let bin = self.binning();
        let (extent, limit) = match sdk_name {
            "AOIWidth" => (value * bin, self.int("SensorWidth")),
            "AOIHeight" => (value * bin, self.int("SensorHeight")),
            "AOILeft" => (value + self.int("AOIWidth") * bin - 1, self.int("SensorWidth")),
            "AOITop" => (value + self.int("AOIHeight") * bin - 1, self.int("SensorHeight")),
            _ => return Ok(()),
        };
        if value < 1 || extent > limit {
            return Err(NeoError::hardware(
                sdk_name,
                format!("value {} out of range for binning {}x{}", value, bin, bin),
            ));
        }
        Ok(())
    }
}

/// In-memory stand-in for the Neo feature SDK.
pub struct MockFeatureBackend {
    state: Mutex<MockState>,
}

impl MockFeatureBackend {
    /// Neo with default feature values and no scripted behavior.
    pub fn new() -> Self {
        let mut features = HashMap::new();
        let mut add = |name: &str, feature: MockFeature| {
            features.insert(name.to_string(), feature);
        };

        add("CameraModel", MockFeature::read_only(FeatureKind::String, "DC-152Q-C00-FI"));
        add("SerialNumber", MockFeature::read_only(FeatureKind::String, "VSC-00954"));
        add("SensorWidth", MockFeature::read_only(FeatureKind::Integer, 2560i64));
        add("SensorHeight", MockFeature::read_only(FeatureKind::Integer, 2160i64));
        add("PixelWidth", MockFeature::read_only(FeatureKind::Float, 6.5));
        add("PixelHeight", MockFeature::read_only(FeatureKind::Float, 6.5));
        add("AOIBinning", MockFeature::enumerated("1x1", BINNING_OPTIONS, true));
        add("AOIWidth", MockFeature::writable(FeatureKind::Integer, 2560i64));
        add("AOILeft", MockFeature::writable(FeatureKind::Integer, 1i64));
        add("AOIHeight", MockFeature::writable(FeatureKind::Integer, 2160i64));
        add("AOITop", MockFeature::writable(FeatureKind::Integer, 1i64));
        add("SpuriousNoiseFilter", MockFeature::writable(FeatureKind::Boolean, true));
        add("StaticBlemishCorrection", MockFeature::writable(FeatureKind::Boolean, true));
        add(
            "ElectronicShutteringMode",
            MockFeature::enumerated("Rolling", SHUTTERING_OPTIONS, true),
        );
        add(
            "SimplePreAmpGainControl",
            MockFeature::enumerated("16-bit (low noise & high well capacity)", PREAMP_OPTIONS, true),
        );
        add("ExposureTime", MockFeature::writable(FeatureKind::Float, 0.01));
        add("SensorCooling", MockFeature::writable(FeatureKind::Boolean, false));
        add("TemperatureControl", MockFeature::enumerated("-30.00", SETPOINT_OPTIONS, true));
        add("SensorTemperature", MockFeature::read_only(FeatureKind::Float, 22.5));
        add("TemperatureStatus", MockFeature::enumerated("Cooler Off", STATUS_OPTIONS, false));
        add("FanSpeed", MockFeature::enumerated("On", &["Off", "Low", "On"], true));
        add(
            "PixelEncoding",
            MockFeature::enumerated("Mono16", &["Mono12", "Mono12Packed", "Mono16", "Mono32"], true),
        );
        add("CycleMode", MockFeature::enumerated("Continuous", &["Fixed", "Continuous"], true));
        add(
            "TriggerMode",
            MockFeature::enumerated("Internal", &["Internal", "External", "Software"], true),
        );

        Self {
            state: Mutex::new(MockState {
                features,
                ..Default::default()
            }),
        }
    }

    /// Override the sensor size; the AOI resets to the full sensor.
    pub fn with_sensor(self, width: i64, height: i64) -> Self {
        {
            let mut state = self.state.lock();
            for (name, value) in [
                ("SensorWidth", width),
                ("SensorHeight", height),
                ("AOIWidth", width),
                ("AOIHeight", height),
            ] {
                if let Some(f) = state.features.get_mut(name) {
                    f.value = FeatureValue::Integer(value);
                }
            }
        }
        self
    }

    /// Replace the stored value of an existing feature, bypassing write checks.
    pub fn with_value(self, sdk_name: &str, value: impl Into<FeatureValue>) -> Self {
        self.set_raw(sdk_name, value);
        self
    }

    /// Readings returned by successive `SensorTemperature` reads. The last one repeats.
    pub fn with_temperature_sequence(self, readings: impl IntoIterator<Item = f64>) -> Self {
        self.state.lock().temperatures = readings.into_iter().collect();
        self
    }

    /// Let `ok_count` operations on `sdk_name` succeed, then fail every later one.
    pub fn with_failure_after(self, sdk_name: &str, ok_count: usize, message: &str) -> Self {
        self.state.lock().failures.insert(
            sdk_name.to_string(),
            InjectedFailure {
                remaining_ok: ok_count,
                message: message.to_string(),
            },
        );
        self
    }

    /// Fail every operation on `sdk_name`. `"Handle"` targets `close`.
    pub fn with_failure(self, sdk_name: &str, message: &str) -> Self {
        self.with_failure_after(sdk_name, 0, message)
    }

    /// Make reads of `sdk_name` return `value` whatever was written (faulty firmware).
    pub fn with_reported(self, sdk_name: &str, value: impl Into<FeatureValue>) -> Self {
        self.state
            .lock()
            .reported
            .insert(sdk_name.to_string(), value.into());
        self
    }

    /// Remove an injected failure; later operations on `sdk_name` succeed again.
    pub fn clear_failure(&self, sdk_name: &str) {
        self.state.lock().failures.remove(sdk_name);
    }

    /// Silently clamp integer writes on `sdk_name` to `max`.
    pub fn with_clamp(self, sdk_name: &str, max: i64) -> Self {
        self.state.lock().clamps.insert(sdk_name.to_string(), max);
        self
    }

    /// Replace a stored value directly (simulates the device changing on its own).
    pub fn set_raw(&self, sdk_name: &str, value: impl Into<FeatureValue>) {
        if let Some(f) = self.state.lock().features.get_mut(sdk_name) {
            f.value = value.into();
        }
    }

    /// Every accepted write, in order.
    pub fn write_log(&self) -> Vec<(String, FeatureValue)> {
        self.state.lock().write_log.clone()
    }

    /// Number of accepted writes to `sdk_name`.
    pub fn write_count(&self, sdk_name: &str) -> usize {
        self.state
            .lock()
            .write_log
            .iter()
            .filter(|(name, _)| name == sdk_name)
            .count()
    }

    /// Number of successful reads of `sdk_name`.
    pub fn read_count(&self, sdk_name: &str) -> usize {
        self.state
            .lock()
            .read_counts
            .get(sdk_name)
            .copied()
            .unwrap_or(0)
    }

    /// Scripted temperature readings not consumed yet.
    pub fn remaining_temperatures(&self) -> usize {
        self.state.lock().temperatures.len()
    }

    /// True once `close` succeeded.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl Default for MockFeatureBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureBackend for MockFeatureBackend {
    fn get(&self, sdk_name: &str, kind: FeatureKind) -> AppResult<FeatureValue> {
        let mut state = self.state.lock();
        state.check_failure(sdk_name)?;

        let feature = state
            .features
            .get(sdk_name)
            .ok_or_else(|| NeoError::hardware(sdk_name, "feature not implemented"))?;
        if feature.kind != kind {
            return Err(NeoError::hardware(
                sdk_name,
                format!("feature is {}, not {}", feature.kind.as_str(), kind.as_str()),
            ));
        }
        let mut value = feature.value.clone();

        if sdk_name == "SensorTemperature" {
            let next = if state.temperatures.len() > 1 {
                state.temperatures.pop_front()
            } else {
                state.temperatures.front().copied()
            };
            if let Some(reading) = next {
                value = FeatureValue::Float(reading);
            }
        }

        if let Some(reported) = state.reported.get(sdk_name) {
            value = reported.clone();
        }

        *state.read_counts.entry(sdk_name.to_string()).or_insert(0) += 1;
        tracing::trace!("mock get {} -> {}", sdk_name, value);
        Ok(value)
    }

    fn set(&self, sdk_name: &str, value: &FeatureValue) -> AppResult<()> {
        let mut state = self.state.lock();
        state.check_failure(sdk_name)?;

        let feature = state
            .features
            .get(sdk_name)
            .ok_or_else(|| NeoError::hardware(sdk_name, "feature not implemented"))?;
        if !feature.writable {
            return Err(NeoError::hardware(sdk_name, "feature is read-only"));
        }
        if !value.matches(feature.kind) {
            return Err(NeoError::hardware(
                sdk_name,
                format!("cannot write {:?} to {} feature", value, feature.kind.as_str()),
            ));
        }
        if feature.kind == FeatureKind::Enumerated {
            let text = value.as_str().unwrap_or_default();
            if !feature.options.iter().any(|o| o == text) {
                return Err(NeoError::hardware(
                    sdk_name,
                    format!("'{}' is not an available option", text),
                ));
            }
        }

        let mut stored = value.clone();
        if let Some(v) = value.as_i64() {
            let v = match state.clamps.get(sdk_name) {
                Some(max) => v.min(*max),
                None => v,
            };
            state.check_aoi(sdk_name, v)?;
            stored = FeatureValue::Integer(v);
        }

        if sdk_name == "SensorCooling" {
            let status = if value.as_bool() == Some(true) {
                "Cooling"
            } else {
                "Cooler Off"
            };
            if let Some(f) = state.features.get_mut("TemperatureStatus") {
                f.value = FeatureValue::from(status);
            }
        }

        if let Some(f) = state.features.get_mut(sdk_name) {
            f.value = stored;
        }
        state.write_log.push((sdk_name.to_string(), value.clone()));
        tracing::debug!("mock set {} = {}", sdk_name, value);
        Ok(())
    }

    fn options(&self, sdk_name: &str) -> AppResult<Vec<String>> {
        let mut state = self.state.lock();
        state.check_failure(sdk_name)?;

        let feature = state
            .features
            .get(sdk_name)
            .ok_or_else(|| NeoError::hardware(sdk_name, "feature not implemented"))?;
        if feature.kind != FeatureKind::Enumerated {
            return Err(NeoError::hardware(sdk_name, "feature is not enumerated"));
        }
        Ok(feature.options.clone())
    }

    fn close(&self) -> AppResult<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(NeoError::hardware("Handle", "camera not open"));
        }
        state.check_failure("Handle")?;
        state.closed = true;
        tracing::info!("Mock Neo handle closed");
        Ok(())
    }
}
