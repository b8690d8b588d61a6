//! Core library for the neo_daq camera driver.
//!
//! Configures an Andor Neo sCMOS camera through its named-feature interface: scalar
//! acquisition options, the binned area of interest, and sensor cooling with a
//! background check that the sensor reaches its setpoint. A read-only introspection
//! surface exposes every registered feature to outside callers.

pub mod aoi;
pub mod camera;
pub mod config;
pub mod error;
pub mod features;
pub mod hardware;
pub mod introspection;
pub mod logging;
pub mod temperature;

pub use aoi::{AoiConfig, AoiRequest, AxisMapping, Binning, ChannelMetadata};
pub use camera::{NeoCamera, SensorInfo};
pub use config::{CameraConfig, NeoConfig, TemperatureSettings};
pub use error::{AppResult, NeoError};
pub use temperature::{StabilizationOutcome, StabilizationTask, TemperatureState};
