//! Hardware access
//!
//! The feature backend trait the driver is written against, plus the simulated
//! Neo used by tests and the CLI.

pub mod feature_backend;
#[cfg(feature = "mock")]
pub mod mock;

pub use feature_backend::{FeatureBackend, FeatureKind, FeatureValue};
#[cfg(feature = "mock")]
pub use mock::MockFeatureBackend;
