//! Neo configuration using Figment
//!
//! Configuration is loaded from:
//! 1. `config/config.neo.toml` (base configuration)
//! 2. Environment variables (prefixed with `NEODAQ_`, nested keys split on `__`)
//!
//! # Environment Variable Overrides
//!
//! ```text
//! NEODAQ_APPLICATION__LOG_LEVEL=debug
//! NEODAQ_CAMERA__AOI_BINNING=2x2
//! NEODAQ_CAMERA__SENSOR_COOLING=false
//! NEODAQ_TEMPERATURE__MAX_POLLS=60
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::aoi::Binning;
use crate::error::{AppResult, NeoError};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeoConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Camera feature values applied at startup
    #[serde(default)]
    pub camera: CameraConfig,
    /// Temperature stabilization monitor settings
    #[serde(default)]
    pub temperature: TemperatureSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Camera name used in logs
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Camera options. Scalar options are forwarded to the camera verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    /// `SpuriousNoiseFilter`
    #[serde(default = "default_true")]
    pub spurious_noise_filter: bool,
    /// `StaticBlemishCorrection`
    #[serde(default = "default_true")]
    pub static_blemish_correction: bool,
    /// `Rolling` or `Global`
    #[serde(default = "default_shuttering_mode")]
    pub electronic_shuttering_mode: String,
    /// `SimplePreAmpGainControl` option text
    #[serde(default = "default_preamp_gain")]
    pub simple_preamp_gain_control: String,
    /// Exposure time in seconds
    #[serde(default = "default_exposure_time")]
    pub exposure_time: f64,
    /// Symmetric binning specifier, e.g. `"2x2"`
    #[serde(default = "default_binning")]
    pub aoi_binning: String,
    /// Physical pixels; unset fills the sensor from `aoi_left`
    #[serde(default)]
    pub aoi_width: Option<u32>,
    /// 1-based column offset; unset means 1
    #[serde(default)]
    pub aoi_left: Option<u32>,
    /// Physical pixels; unset fills the sensor from `aoi_top`
    #[serde(default)]
    pub aoi_height: Option<u32>,
    /// 1-based row offset; unset means 1
    #[serde(default)]
    pub aoi_top: Option<u32>,
    /// Turn the sensor cooler on and monitor convergence
    #[serde(default)]
    pub sensor_cooling: bool,
    /// Requested setpoint in C; the closest supported setpoint is used
    #[serde(default)]
    pub target_temperature: Option<f64>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            spurious_noise_filter: true,
            static_blemish_correction: true,
            electronic_shuttering_mode: default_shuttering_mode(),
            simple_preamp_gain_control: default_preamp_gain(),
            exposure_time: default_exposure_time(),
            aoi_binning: default_binning(),
            aoi_width: None,
            aoi_left: None,
            aoi_height: None,
            aoi_top: None,
            sensor_cooling: false,
            target_temperature: None,
        }
    }
}

/// Convergence check settings for the temperature monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureSettings {
    /// Allowed |target - current| in degrees C
    #[serde(default = "default_tolerance")]
    pub tolerance_c: f64,
    /// Wait between polls in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Give up after this many polls; `None` polls until cancelled
    #[serde(default = "default_max_polls")]
    pub max_polls: Option<u32>,
}

impl TemperatureSettings {
    /// Wait between polls.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for TemperatureSettings {
    fn default() -> Self {
        Self {
            tolerance_c: default_tolerance(),
            poll_interval_ms: default_poll_interval(),
            max_polls: default_max_polls(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    "andor-neo".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_shuttering_mode() -> String {
    "Rolling".to_string()
}

fn default_preamp_gain() -> String {
    "16-bit (low noise & high well capacity)".to_string()
}

fn default_exposure_time() -> f64 {
    0.01
}

fn default_binning() -> String {
    "1x1".to_string()
}

fn default_tolerance() -> f64 {
    1.0
}

fn default_poll_interval() -> u64 {
    5000
}

fn default_max_polls() -> Option<u32> {
    // One hour at the default interval
    Some(720)
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl NeoConfig {
    /// Load configuration from `config/config.neo.toml` and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from("config/config.neo.toml")
    }

    /// Load configuration from a specific file path
    ///
    /// Environment variables (`NEODAQ_` prefix) take precedence over the file.
    /// The result is validated before it is returned.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Self::figment(path.as_ref()).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("NEODAQ_").split("__"))
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Binning is a symmetric `NxN` specifier
    /// - AOI offsets are 1-based
    /// - Exposure time is positive
    /// - Temperature settings are usable
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(NeoError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        self.camera.validate()?;

        let temperature = &self.temperature;
        if !(temperature.tolerance_c > 0.0) {
            return Err(NeoError::Configuration(format!(
                "Invalid tolerance_c {}. Must be > 0",
                temperature.tolerance_c
            )));
        }
        if temperature.poll_interval_ms == 0 {
            return Err(NeoError::Configuration(
                "poll_interval_ms must be > 0".to_string(),
            ));
        }
        if temperature.max_polls == Some(0) {
            return Err(NeoError::Configuration(
                "max_polls must be > 0 when set".to_string(),
            ));
        }

        Ok(())
    }
}

impl CameraConfig {
    /// Check binning, AOI offsets, exposure and target before anything is written.
    pub fn validate(&self) -> AppResult<()> {
        self.aoi_binning.parse::<Binning>()?;

        for (name, offset) in [("aoi_left", self.aoi_left), ("aoi_top", self.aoi_top)] {
            if offset == Some(0) {
                return Err(NeoError::Configuration(format!(
                    "'{}' is 1-based and cannot be 0",
                    name
                )));
            }
        }

        if !(self.exposure_time > 0.0) {
            return Err(NeoError::Configuration(format!(
                "Invalid exposure_time {}. Must be > 0",
                self.exposure_time
            )));
        }

        if let Some(target) = self.target_temperature {
            if !target.is_finite() {
                return Err(NeoError::Configuration(
                    "target_temperature must be finite".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> NeoConfig {
        NeoConfig {
            application: ApplicationConfig::default(),
            camera: CameraConfig::default(),
            temperature: TemperatureSettings::default(),
        }
    }

    #[test]
    fn test_config_validation_valid() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = valid_config();
        config.application.log_level = "verbose".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid log_level"));
    }

    #[test]
    fn test_asymmetric_binning_rejected() {
        let mut config = valid_config();
        config.camera.aoi_binning = "2x4".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, NeoError::InvalidBinning(_)));
    }

    #[test]
    fn test_zero_offset_rejected() {
        let mut config = valid_config();
        config.camera.aoi_top = Some(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("aoi_top"));
    }

    #[test]
    fn test_temperature_settings_checked() {
        let mut config = valid_config();
        config.temperature.max_polls = Some(0);
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.temperature.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.temperature.tolerance_c = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_applies_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
name = "bench-neo"

[camera]
aoi_binning = "2x2"
aoi_left = 101
sensor_cooling = true
exposure_time = 0.5

[temperature]
poll_interval_ms = 250
"#
        )
        .unwrap();

        let config = NeoConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.name, "bench-neo");
        assert_eq!(config.application.log_level, "info");
        assert_eq!(config.camera.aoi_binning, "2x2");
        assert_eq!(config.camera.aoi_left, Some(101));
        assert_eq!(config.camera.aoi_width, None);
        assert!(config.camera.sensor_cooling);
        assert!(config.camera.spurious_noise_filter);
        assert_eq!(config.temperature.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.temperature.tolerance_c, 1.0);
        assert_eq!(config.temperature.max_polls, Some(720));
    }

    #[test]
    fn test_load_rejects_invalid_file_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[camera]\naoi_binning = \"3x1\"").unwrap();
        let err = NeoConfig::load_from(file.path()).unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_shipped_config_loads() {
        let config = NeoConfig::load().unwrap();
        assert_eq!(config.application.name, "andor-neo");
        assert_eq!(config.camera.aoi_binning, "1x1");
        assert!(config.camera.sensor_cooling);
        assert_eq!(config.temperature.max_polls, Some(720));
    }
}
