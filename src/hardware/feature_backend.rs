//! Feature backend contract
//!
//! Lightweight abstraction over the vendor feature-access SDK. The SDK exposes every
//! camera property as a named feature; the driver only needs get/set/options on those
//! names. The SDK binding itself lives outside this crate, the mock backend stands in
//! for it in tests and in the CLI.

use serde::Serialize;
use std::fmt;

use crate::error::AppResult;

/// Semantic value type of a feature, fixed when the feature is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FeatureKind {
    /// Signed integer (sizes, offsets)
    Integer,
    /// On/off switch
    Boolean,
    /// Floating point (exposure, temperatures)
    Float,
    /// One of a fixed, ordered set of strings
    Enumerated,
    /// Free-form read-only text (model, serial number)
    String,
}

impl FeatureKind {
    /// Lowercase name used in messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKind::Integer => "integer",
            FeatureKind::Boolean => "boolean",
            FeatureKind::Float => "float",
            FeatureKind::Enumerated => "enumerated",
            FeatureKind::String => "string",
        }
    }
}

/// A single feature value as read from or written to the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FeatureValue {
    /// Integer and size features
    Integer(i64),
    /// Switches
    Boolean(bool),
    /// Exposure, temperatures and pixel sizes
    Float(f64),
    /// Enumerated and plain string features both carry text.
    Text(String),
}

impl FeatureValue {
    /// Whether this value can be stored in a feature of `kind`.
    pub fn matches(&self, kind: FeatureKind) -> bool {
        matches!(
            (self, kind),
            (FeatureValue::Integer(_), FeatureKind::Integer)
                | (FeatureValue::Boolean(_), FeatureKind::Boolean)
                | (FeatureValue::Float(_), FeatureKind::Float)
                | (FeatureValue::Text(_), FeatureKind::Enumerated)
                | (FeatureValue::Text(_), FeatureKind::String)
        )
    }

    /// Integer view.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FeatureValue::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean view.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FeatureValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view; enumerated setpoints such as `"-30.00"` are parsed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FeatureValue::Float(v) => Some(*v),
            FeatureValue::Integer(v) => Some(*v as f64),
            FeatureValue::Text(s) => s.trim().parse().ok(),
            FeatureValue::Boolean(_) => None,
        }
    }

    /// Text of enumerated and string features.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FeatureValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Integer(v) => write!(f, "{}", v),
            FeatureValue::Boolean(v) => write!(f, "{}", v),
            FeatureValue::Float(v) => write!(f, "{}", v),
            FeatureValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for FeatureValue {
    fn from(v: i64) -> Self {
        FeatureValue::Integer(v)
    }
}

impl From<bool> for FeatureValue {
    fn from(v: bool) -> Self {
        FeatureValue::Boolean(v)
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        FeatureValue::Float(v)
    }
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        FeatureValue::Text(v.to_string())
    }
}

impl From<String> for FeatureValue {
    fn from(v: String) -> Self {
        FeatureValue::Text(v)
    }
}

/// Feature-access backend trait.
///
/// The backend is treated as externally serialized: the driver issues one call at a
/// time and never two concurrent operations on the same feature. All failures are
/// reported as `NeoError::HardwareCommunication`.
pub trait FeatureBackend: Send + Sync {
    /// Read the current value of `sdk_name`, interpreted as `kind`.
    fn get(&self, sdk_name: &str, kind: FeatureKind) -> AppResult<FeatureValue>;

    /// Write `value` to `sdk_name`. The device may reject or clamp it.
    fn set(&self, sdk_name: &str, value: &FeatureValue) -> AppResult<()>;

    /// Ordered list of allowed values of an enumerated feature.
    fn options(&self, sdk_name: &str) -> AppResult<Vec<String>>;

    /// Release the underlying device handle.
    fn close(&self) -> AppResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_kind_matching() {
        assert!(FeatureValue::Integer(4).matches(FeatureKind::Integer));
        assert!(FeatureValue::from("2x2").matches(FeatureKind::Enumerated));
        assert!(FeatureValue::from("Neo 5.5").matches(FeatureKind::String));
        assert!(!FeatureValue::Boolean(true).matches(FeatureKind::Integer));
        assert!(!FeatureValue::Float(1.0).matches(FeatureKind::Enumerated));
    }

    #[test]
    fn test_enumerated_setpoint_parses_as_float() {
        assert_eq!(FeatureValue::from("-30.00").as_f64(), Some(-30.0));
        assert_eq!(FeatureValue::from("Cooler Off").as_f64(), None);
        assert_eq!(FeatureValue::Integer(5).as_f64(), Some(5.0));
    }

    #[test]
    fn test_untagged_json() {
        let json = serde_json::to_string(&FeatureValue::Integer(1280)).unwrap();
        assert_eq!(json, "1280");
        let json = serde_json::to_string(&FeatureValue::from("Rolling")).unwrap();
        assert_eq!(json, "\"Rolling\"");
    }
}
