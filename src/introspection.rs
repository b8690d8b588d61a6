//! Read-only query surface over the feature registry.
//!
//! Used by external callers (CLI, daemon layer) to inspect the camera. Errors here are
//! reported to the caller and never change device state.

use serde::Serialize;

use crate::error::AppResult;
use crate::features::FeatureMap;
use crate::hardware::{FeatureBackend, FeatureKind, FeatureValue};

/// One row of a full feature dump.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureSnapshot {
    /// SDK name
    pub name: String,
    /// Registered kind
    pub kind: FeatureKind,
    /// Value when the read succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<FeatureValue>,
    /// Read failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Names, values and options of registered features.
pub struct FeatureIntrospection<'a> {
    features: &'a FeatureMap,
    backend: &'a dyn FeatureBackend,
}

impl<'a> FeatureIntrospection<'a> {
    /// Query `features` through `backend`.
    pub fn new(features: &'a FeatureMap, backend: &'a dyn FeatureBackend) -> Self {
        Self { features, backend }
    }

    /// SDK names of every registered feature, in registration order.
    pub fn list_feature_names(&self) -> Vec<String> {
        self.features.sdk_names()
    }

    /// Current value of `name` (key or SDK name).
    pub fn get_feature_value(&self, name: &str) -> AppResult<FeatureValue> {
        self.features.get(name)?.get(self.backend)
    }

    /// Allowed values of an enumerated feature.
    pub fn get_feature_options(&self, name: &str) -> AppResult<Vec<String>> {
        self.features.get(name)?.options(self.backend)
    }

    /// Read every feature; failures are recorded per row instead of aborting the dump.
    pub fn snapshot(&self) -> Vec<FeatureSnapshot> {
        self.features
            .iter()
            .map(|feature| {
                let (value, error) = match feature.get(self.backend) {
                    Ok(value) => (Some(value), None),
                    Err(e) => (None, Some(e.to_string())),
                };
                FeatureSnapshot {
                    name: feature.sdk_name.clone(),
                    kind: feature.kind,
                    value,
                    error,
                }
            })
            .collect()
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::error::NeoError;
    use crate::hardware::MockFeatureBackend;

    #[test]
    fn test_list_names_matches_registry() {
        let map = FeatureMap::neo();
        let mock = MockFeatureBackend::new();
        let facade = FeatureIntrospection::new(&map, &mock);

        let names = facade.list_feature_names();
        assert_eq!(names, map.sdk_names());
        assert!(names.contains(&"AOIBinning".to_string()));
        assert_eq!(mock.read_count("AOIBinning"), 0);
    }

    #[test]
    fn test_value_by_either_name() {
        let map = FeatureMap::neo();
        let mock = MockFeatureBackend::new();
        let facade = FeatureIntrospection::new(&map, &mock);

        assert_eq!(
            facade.get_feature_value("SensorWidth").unwrap(),
            FeatureValue::Integer(2560)
        );
        assert_eq!(
            facade.get_feature_value("camera_model").unwrap(),
            FeatureValue::from("DC-152Q-C00-FI")
        );
    }

    #[test]
    fn test_unknown_feature() {
        let map = FeatureMap::neo();
        let mock = MockFeatureBackend::new();
        let facade = FeatureIntrospection::new(&map, &mock);

        let err = facade.get_feature_value("Gain").unwrap_err();
        assert!(matches!(err, NeoError::UnknownFeature(_)));
        let err = facade.get_feature_options("Gain").unwrap_err();
        assert!(matches!(err, NeoError::UnknownFeature(_)));
    }

    #[test]
    fn test_options_only_for_enumerated() {
        let map = FeatureMap::neo();
        let mock = MockFeatureBackend::new();
        let facade = FeatureIntrospection::new(&map, &mock);

        let options = facade.get_feature_options("ElectronicShutteringMode").unwrap();
        assert_eq!(options, vec!["Rolling".to_string(), "Global".to_string()]);

        let err = facade.get_feature_options("AOIWidth").unwrap_err();
        assert!(matches!(err, NeoError::UnsupportedOperation { .. }));
        assert!(mock.write_log().is_empty());
    }

    #[test]
    fn test_snapshot_records_failures() {
        let map = FeatureMap::neo();
        let mock = MockFeatureBackend::new().with_failure("FanSpeed", "not available");
        let facade = FeatureIntrospection::new(&map, &mock);

        let rows = facade.snapshot();
        assert_eq!(rows.len(), map.len());
        let fan = rows.iter().find(|r| r.name == "FanSpeed").unwrap();
        assert!(fan.value.is_none());
        assert!(fan.error.as_deref().unwrap().contains("not available"));
        let width = rows.iter().find(|r| r.name == "SensorWidth").unwrap();
        assert_eq!(width.value, Some(FeatureValue::Integer(2560)));
    }
}
