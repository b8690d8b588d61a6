//! Area-of-interest configuration
//!
//! Turns the declarative AOI options (binning, optional size and offset) into a
//! validated, binned region, applies it to the camera and derives the per-axis pixel
//! index mappings consumed by data labeling and export.
//!
//! # Units
//!
//! `left`/`top` are 1-based physical pixel offsets. Requested `width`/`height` are in
//! physical pixels and are floor-divided by the binning factor; everything stored in
//! [`AoiConfig`] afterwards is in binned pixels.
//!
//! # Write order
//!
//! Binning is written before the size and offset features because the SDK validates
//! size/offset against the binning that is active at the time of the write.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn, Span};

use crate::config::CameraConfig;
use crate::error::{AppResult, NeoError};
use crate::features::{keys, FeatureMap};
use crate::hardware::FeatureBackend;

/// Name of the single image channel produced by the camera.
pub const IMAGE_CHANNEL: &str = "image";

/// Symmetric NxN binning factor.
///
/// The SDK exposes binning as a compound specifier (`"2x2"`). Both axes are physically
/// coupled on the Neo, so only symmetric specifiers are accepted; `"2x4"` is an error
/// rather than being silently reduced to one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Binning(u32);

impl Binning {
    /// Binning of `factor` x `factor`; zero is rejected.
    pub fn new(factor: u32) -> AppResult<Self> {
        if factor == 0 {
            return Err(NeoError::InvalidBinning(format!("{}x{}", factor, factor)));
        }
        Ok(Self(factor))
    }

    /// Pixels combined along each axis.
    pub fn factor(&self) -> u32 {
        self.0
    }
}

impl Default for Binning {
    fn default() -> Self {
        Self(1)
    }
}

impl FromStr for Binning {
    type Err = NeoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || NeoError::InvalidBinning(s.to_string());
        let (x, y) = s.trim().split_once(|c: char| c == 'x' || c == 'X').ok_or_else(invalid)?;
        let x: u32 = x.trim().parse().map_err(|_| invalid())?;
        let y: u32 = y.trim().parse().map_err(|_| invalid())?;
        if x != y || x == 0 {
            return Err(invalid());
        }
        Ok(Self(x))
    }
}

impl fmt::Display for Binning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.0, self.0)
    }
}

/// Requested AOI, straight from configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AoiRequest {
    /// Symmetric binning, written first
    pub binning: Binning,
    /// Physical pixels; `None` fills the sensor from `left`.
    pub width: Option<u32>,
    /// 1-based; `None` means 1.
    pub left: Option<u32>,
    /// Physical pixels; `None` fills the sensor from `top`.
    pub height: Option<u32>,
    /// 1-based; `None` means 1.
    pub top: Option<u32>,
}

impl AoiRequest {
    /// Request described by the `aoi_*` camera options.
    pub fn from_config(config: &CameraConfig) -> AppResult<Self> {
        Ok(Self {
            binning: config.aoi_binning.parse()?,
            width: config.aoi_width,
            left: config.aoi_left,
            height: config.aoi_height,
            top: config.aoi_top,
        })
    }
}

/// Validated AOI in binned pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AoiConfig {
    /// Binning factor
    pub binning: u32,
    /// 1-based first column, physical pixels
    pub left: u32,
    /// 1-based first row, physical pixels
    pub top: u32,
    /// Binned columns
    pub width: u32,
    /// Binned rows
    pub height: u32,
}

impl AoiConfig {
    /// Apply defaults and bounds checks against a `max_width` x `max_height` sensor.
    pub fn resolve(request: &AoiRequest, max_width: i64, max_height: i64) -> AppResult<Self> {
        let binning = i64::from(request.binning.factor());
        let left = request.left.map_or(1, i64::from);
        let top = request.top.map_or(1, i64::from);
        if left < 1 {
            return Err(NeoError::NonPositiveAoi {
                dimension: "left",
                value: left,
            });
        }
        if top < 1 {
            return Err(NeoError::NonPositiveAoi {
                dimension: "top",
                value: top,
            });
        }

        let width_px = request.width.map_or(max_width - left + 1, i64::from);
        let height_px = request.height.map_or(max_height - top + 1, i64::from);
        let width = width_px.div_euclid(binning);
        let height = height_px.div_euclid(binning);

        debug!(
            max_width,
            max_height, binning, width, height, left, top, "Resolving AOI"
        );

        if width < 1 {
            return Err(NeoError::NonPositiveAoi {
                dimension: "width",
                value: width,
            });
        }
        if height < 1 {
            return Err(NeoError::NonPositiveAoi {
                dimension: "height",
                value: height,
            });
        }

        let w_extent = width * binning + (left - 1);
        let h_extent = height * binning + (top - 1);
        if w_extent > max_width {
            return Err(NeoError::AoiOutOfRange {
                dimension: "width",
                extent: w_extent,
                limit: max_width,
            });
        }
        if h_extent > max_height {
            return Err(NeoError::AoiOutOfRange {
                dimension: "height",
                extent: h_extent,
                limit: max_height,
            });
        }

        // Every value is now bounded by the sensor size.
        Ok(Self {
            binning: request.binning.factor(),
            left: to_u32("left", left)?,
            top: to_u32("top", top)?,
            width: to_u32("width", width)?,
            height: to_u32("height", height)?,
        })
    }

    /// Reject a region reported by the camera that is empty or leaves the sensor.
    fn check_reported(&self, max_width: i64, max_height: i64) -> AppResult<()> {
        let outside = |extent: u64, limit: i64| i64::try_from(extent).map_or(true, |e| e > limit);
        let axes = [
            ("AOIWidth", self.width, self.left, max_width),
            ("AOIHeight", self.height, self.top, max_height),
        ];
        for (sdk_name, size, offset, limit) in axes {
            if size == 0 || offset == 0 {
                return Err(NeoError::hardware(
                    sdk_name,
                    format!("camera reports size {} at offset {}", size, offset),
                ));
            }
        }
        if outside(self.width_extent(), max_width) {
            return Err(NeoError::hardware(
                "AOIWidth",
                format!(
                    "camera reports AOI over {} pixels, sensor has {}",
                    self.width_extent(),
                    max_width
                ),
            ));
        }
        if outside(self.height_extent(), max_height) {
            return Err(NeoError::hardware(
                "AOIHeight",
                format!(
                    "camera reports AOI over {} pixels, sensor has {}",
                    self.height_extent(),
                    max_height
                ),
            ));
        }
        Ok(())
    }

    /// Physical pixels covered horizontally, counted from column 1.
    pub fn width_extent(&self) -> u64 {
        u64::from(self.width) * u64::from(self.binning) + u64::from(self.left) - 1
    }

    /// Physical pixels covered vertically, counted from row 1.
    pub fn height_extent(&self) -> u64 {
        u64::from(self.height) * u64::from(self.binning) + u64::from(self.top) - 1
    }

    /// `(height, width)` of the image channel.
    pub fn shape(&self) -> (u32, u32) {
        (self.height, self.width)
    }

    /// Physical coordinate of every binned column and row.
    pub fn axis_mapping(&self) -> AxisMapping {
        AxisMapping {
            x_index: axis_index(self.left, self.binning, self.width),
            y_index: axis_index(self.top, self.binning, self.height),
        }
    }
}

fn to_u32(dimension: &'static str, value: i64) -> AppResult<u32> {
    u32::try_from(value).map_err(|_| NeoError::NonPositiveAoi { dimension, value })
}

/// `offset + i * binning` for `i` in `0..count`.
fn axis_index(offset: u32, binning: u32, count: u32) -> Vec<u32> {
    (0..count).map(|i| offset + i * binning).collect()
}

/// Physical pixel coordinate of every binned sample along each axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AxisMapping {
    /// `left + i * binning` for each binned column
    pub x_index: Vec<u32>,
    /// `top + i * binning` for each binned row
    pub y_index: Vec<u32>,
}

/// Shape and coordinate labels of one data channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelMetadata {
    /// Channel name, always `"image"`
    pub name: String,
    /// `(height, width)` in binned pixels
    pub shape: (u32, u32),
    /// Physical pixel coordinates per axis
    pub mapping: AxisMapping,
}

/// Result of a successful AOI application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedAoi {
    /// Values as reported back by the camera
    pub config: AoiConfig,
    /// Image channel derived from `config`
    pub channel: ChannelMetadata,
}

/// Computes, validates and writes the AOI.
pub struct AoiConfigurator<'a> {
    features: &'a FeatureMap,
    backend: &'a dyn FeatureBackend,
    span: &'a Span,
}

impl<'a> AoiConfigurator<'a> {
    /// Configurator logging under `span`.
    pub fn new(features: &'a FeatureMap, backend: &'a dyn FeatureBackend, span: &'a Span) -> Self {
        Self {
            features,
            backend,
            span,
        }
    }

    /// Resolve `request` against the sensor limits, write it, and read it back.
    ///
    /// Bounds are checked before any write, so an invalid request leaves the camera
    /// untouched. If the camera rejects a write part-way, the features written before
    /// it (binning first) stay applied.
    pub fn apply(&self, request: &AoiRequest) -> AppResult<AppliedAoi> {
        let _enter = self.span.enter();

        let max_width = self.features.get(keys::SENSOR_WIDTH)?.get_i64(self.backend)?;
        let max_height = self.features.get(keys::SENSOR_HEIGHT)?.get_i64(self.backend)?;
        let computed = AoiConfig::resolve(request, max_width, max_height)?;

        let binning = Binning::new(computed.binning)?;
        self.write(keys::AOI_BINNING, binning.to_string())?;
        self.write(keys::AOI_WIDTH, i64::from(computed.width))?;
        self.write(keys::AOI_LEFT, i64::from(computed.left))?;
        self.write(keys::AOI_HEIGHT, i64::from(computed.height))?;
        self.write(keys::AOI_TOP, i64::from(computed.top))?;

        let applied = self.read_back()?;
        applied.check_reported(max_width, max_height)?;
        if applied != computed {
            warn!(
                ?computed,
                ?applied,
                "Camera adjusted the requested AOI, using the values it reports"
            );
        }

        info!(
            binning = %Binning(applied.binning),
            width = applied.width,
            height = applied.height,
            left = applied.left,
            top = applied.top,
            "AOI applied"
        );

        Ok(AppliedAoi {
            config: applied,
            channel: ChannelMetadata {
                name: IMAGE_CHANNEL.to_string(),
                shape: applied.shape(),
                mapping: applied.axis_mapping(),
            },
        })
    }

    fn write(&self, key: &str, value: impl Into<crate::hardware::FeatureValue>) -> AppResult<()> {
        self.features.get(key)?.set(self.backend, value)
    }

    fn read_back(&self) -> AppResult<AoiConfig> {
        let binning_feature = self.features.get(keys::AOI_BINNING)?;
        let binning_value = binning_feature.get(self.backend)?;
        let binning: Binning = binning_value
            .as_str()
            .unwrap_or_default()
            .parse()
            .map_err(|_| {
                NeoError::hardware(
                    &binning_feature.sdk_name,
                    format!("unexpected binning '{}'", binning_value),
                )
            })?;

        let read = |key: &str| -> AppResult<u32> {
            let feature = self.features.get(key)?;
            let value = feature.get_i64(self.backend)?;
            debug!(feature = %feature.sdk_name, value, "AOI read back");
            u32::try_from(value).map_err(|_| {
                NeoError::hardware(&feature.sdk_name, format!("invalid AOI value {}", value))
            })
        };

        Ok(AoiConfig {
            binning: binning.factor(),
            width: read(keys::AOI_WIDTH)?,
            left: read(keys::AOI_LEFT)?,
            height: read(keys::AOI_HEIGHT)?,
            top: read(keys::AOI_TOP)?,
        })
    }
}
