//! Configuration System
//!
//! Configuration management using Figment.
//!
//! # Configuration Sources
//!
//! Configuration is loaded from (in order of precedence):
//! 1. Environment variables prefixed with `NEODAQ_`
//! 2. TOML configuration file (default: `config/config.neo.toml`)
//!
//! # Example
//!
//! ```no_run
//! use neo_daq::config::NeoConfig;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NeoConfig::load_from("custom/path.toml")?;
//!     println!("Camera: {}", config.application.name);
//!     println!("Binning: {}", config.camera.aoi_binning);
//!     Ok(())
//! }
//! ```

pub mod neo_config;

pub use neo_config::{ApplicationConfig, CameraConfig, NeoConfig, TemperatureSettings};
