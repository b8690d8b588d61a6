//! Custom error types for the camera driver.
//!
//! This module defines the primary error type, `NeoError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of errors that can occur while configuring and monitoring the
//! sensor.
//!
//! ## Error Hierarchy
//!
//! - **Configuration errors** (`AoiOutOfRange`, `NonPositiveAoi`, `InvalidBinning`,
//!   `Configuration`, `Config`): the requested setup cannot be applied. These are fatal
//!   to initialization and keep the camera from reaching a ready state.
//! - **`HardwareCommunication`**: any get/set/options failure reported by the feature
//!   backend. Carries the SDK feature name so failures can be traced to a register.
//! - **`UnknownFeature`** and **`UnsupportedOperation`**: raised by introspection queries.
//!   They are recoverable and never change device state.
//! - **`StabilizationTimeout`**: the converging temperature loop reached its poll bound.
//! - **`Runtime`**: the background task could not be launched or did not finish cleanly.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, NeoError>;

/// Errors raised while configuring and monitoring the camera.
#[derive(Error, Debug)]
pub enum NeoError {
    /// Configuration could not be loaded or extracted
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// A configuration value is invalid
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// The AOI reaches past the sensor
    #[error("AOI {dimension} extends over {extent} pixels, max is {limit}")]
    AoiOutOfRange {
        /// `"width"` or `"height"`
        dimension: &'static str,
        /// Last physical pixel covered
        extent: i64,
        /// Sensor size along the axis
        limit: i64,
    },

    /// The AOI resolves to no binned pixels
    #[error("AOI {dimension} resolves to {value} binned pixels, must be at least 1")]
    NonPositiveAoi {
        /// `"width"` or `"height"`
        dimension: &'static str,
        /// Resolved binned size
        value: i64,
    },

    /// Binning specifier is not `NxN`
    #[error("Invalid binning '{0}': expected a symmetric specifier such as '2x2'")]
    InvalidBinning(String),

    /// The backend failed or reported an unusable value
    #[error("Hardware communication error on '{feature}': {message}")]
    HardwareCommunication {
        /// SDK name of the feature involved
        feature: String,
        /// Backend message
        message: String,
    },

    /// Name is not in the registry
    #[error("Unknown feature: '{0}'")]
    UnknownFeature(String),

    /// Operation does not apply to the feature's kind
    #[error("Feature '{feature}' does not support {operation}")]
    UnsupportedOperation {
        /// SDK name
        feature: String,
        /// Operation attempted, e.g. `"options"`
        operation: String,
    },

    /// Poll bound reached before convergence
    #[error("Sensor temperature did not stabilize after {polls} polls (target {target:.2} C, current {current:.2} C)")]
    StabilizationTimeout {
        /// Polls made
        polls: u32,
        /// Setpoint, Celsius
        target: f64,
        /// Last sensor reading, Celsius
        current: f64,
    },

    /// Task or runtime failure
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl NeoError {
    /// Shorthand for a backend failure on `feature`.
    pub fn hardware(feature: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HardwareCommunication {
            feature: feature.into(),
            message: message.into(),
        }
    }

    /// True for errors caused by the requested configuration rather than by the device.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Configuration(_)
                | Self::AoiOutOfRange { .. }
                | Self::NonPositiveAoi { .. }
                | Self::InvalidBinning(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NeoError::hardware("SensorTemperature", "timeout");
        assert_eq!(
            err.to_string(),
            "Hardware communication error on 'SensorTemperature': timeout"
        );
    }

    #[test]
    fn test_aoi_error_names_dimension_and_values() {
        let err = NeoError::AoiOutOfRange {
            dimension: "width",
            extent: 2999,
            limit: 2560,
        };
        let msg = err.to_string();
        assert!(msg.contains("width"));
        assert!(msg.contains("2999"));
        assert!(msg.contains("2560"));
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_introspection_errors_are_not_configuration_errors() {
        assert!(!NeoError::UnknownFeature("Foo".into()).is_configuration_error());
        assert!(!NeoError::hardware("AOIWidth", "rejected").is_configuration_error());
    }
}
