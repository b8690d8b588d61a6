//! Andor Neo device object
//!
//! `NeoCamera::open` runs the startup sequence and only hands out a camera once every
//! step succeeded:
//!
//! 1. push the scalar options from `CameraConfig`
//! 2. read the sensor description
//! 3. resolve and apply the AOI
//! 4. apply the cooling policy, launching the converging monitor when cooling
//!
//! Any failure aborts construction and releases the backend handle.

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use crate::aoi::{AoiConfig, AoiConfigurator, AoiRequest, AppliedAoi, ChannelMetadata};
use crate::config::{CameraConfig, TemperatureSettings};
use crate::error::{AppResult, NeoError};
use crate::features::{keys, FeatureMap};
use crate::hardware::{FeatureBackend, FeatureValue};
use crate::introspection::{FeatureIntrospection, FeatureSnapshot};
use crate::temperature::{
    StabilizationOutcome, StabilizationTask, TemperaturePolicy, TemperatureState,
    TemperatureSupervisor,
};

/// Static description of the sensor, read once at open.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorInfo {
    /// `CameraModel`
    pub model: String,
    /// `SerialNumber`
    pub serial_number: String,
    /// Physical columns
    pub sensor_width: i64,
    /// Physical rows
    pub sensor_height: i64,
    /// Pixel pitch in micrometres
    pub pixel_width_um: f64,
    /// Pixel pitch in micrometres
    pub pixel_height_um: f64,
}

impl SensorInfo {
    fn read(features: &FeatureMap, backend: &dyn FeatureBackend) -> AppResult<Self> {
        let text = |key: &str| -> AppResult<String> {
            Ok(features.get(key)?.get(backend)?.to_string())
        };
        Ok(Self {
            model: text(keys::CAMERA_MODEL)?,
            serial_number: text(keys::SERIAL_NUMBER)?,
            sensor_width: features.get(keys::SENSOR_WIDTH)?.get_i64(backend)?,
            sensor_height: features.get(keys::SENSOR_HEIGHT)?.get_i64(backend)?,
            pixel_width_um: features.get(keys::PIXEL_WIDTH)?.get_f64(backend)?,
            pixel_height_um: features.get(keys::PIXEL_HEIGHT)?.get_f64(backend)?,
        })
    }
}

/// A configured Neo, ready to serve queries.
///
/// Call `close().await` to stop the temperature monitor and release the handle.
/// Dropping an open camera does the same from a spawned task.
pub struct NeoCamera {
    features: FeatureMap,
    backend: Arc<dyn FeatureBackend>,
    sensor_info: SensorInfo,
    aoi: AppliedAoi,
    supervisor: TemperatureSupervisor,
    stabilization: Option<StabilizationTask>,
    closed: bool,
    span: Span,
}

impl NeoCamera {
    /// Configure the camera behind `backend` and return it ready for use.
    ///
    /// Cooling requires a tokio runtime for the converging monitor.
    pub fn open(
        backend: Arc<dyn FeatureBackend>,
        config: &CameraConfig,
        settings: &TemperatureSettings,
    ) -> AppResult<Self> {
        let span = info_span!("camera", serial = tracing::field::Empty);
        let features = FeatureMap::neo();

        match Self::configure(&features, &backend, config, settings, &span) {
            Ok((sensor_info, aoi, supervisor, stabilization)) => {
                info!(parent: &span, model = %sensor_info.model, "Camera ready");
                Ok(Self {
                    features,
                    backend,
                    sensor_info,
                    aoi,
                    supervisor,
                    stabilization,
                    closed: false,
                    span,
                })
            }
            Err(e) => {
                warn!(parent: &span, "Camera initialization failed: {}", e);
                if let Err(close_err) = backend.close() {
                    warn!(parent: &span, "Failed to release camera handle: {}", close_err);
                }
                Err(e)
            }
        }
    }

    fn configure(
        features: &FeatureMap,
        backend: &Arc<dyn FeatureBackend>,
        config: &CameraConfig,
        settings: &TemperatureSettings,
        span: &Span,
    ) -> AppResult<(
        SensorInfo,
        AppliedAoi,
        TemperatureSupervisor,
        Option<StabilizationTask>,
    )> {
        config.validate()?;
        let device = backend.as_ref();

        {
            let _enter = span.enter();
            let scalars: [(&str, FeatureValue); 5] = [
                (keys::SPURIOUS_NOISE_FILTER, config.spurious_noise_filter.into()),
                (keys::STATIC_BLEMISH_CORRECTION, config.static_blemish_correction.into()),
                (
                    keys::ELECTRONIC_SHUTTERING_MODE,
                    config.electronic_shuttering_mode.as_str().into(),
                ),
                (
                    keys::SIMPLE_PREAMP_GAIN_CONTROL,
                    config.simple_preamp_gain_control.as_str().into(),
                ),
                (keys::EXPOSURE_TIME, config.exposure_time.into()),
            ];
            for (key, value) in scalars {
                features.get(key)?.set(device, value)?;
            }
        }

        let sensor_info = SensorInfo::read(features, device)?;
        span.record("serial", sensor_info.serial_number.as_str());

        let request = AoiRequest::from_config(config)?;
        let aoi = AoiConfigurator::new(features, device, span).apply(&request)?;

        let supervisor =
            TemperatureSupervisor::new(features, Arc::clone(backend), settings.clone(), span.clone())?;
        let stabilization = supervisor.apply(&TemperaturePolicy::from_config(config))?;

        Ok((sensor_info, aoi, supervisor, stabilization))
    }

    /// Sensor description read at open.
    pub fn get_sensor_info(&self) -> &SensorInfo {
        &self.sensor_info
    }

    /// SDK names of every registered feature.
    pub fn get_feature_names(&self) -> Vec<String> {
        self.introspection().list_feature_names()
    }

    /// Current value of a feature, by key or SDK name.
    pub fn get_feature_value(&self, name: &str) -> AppResult<FeatureValue> {
        self.ensure_open(name)?;
        self.introspection().get_feature_value(name)
    }

    /// Allowed values of an enumerated feature.
    pub fn get_feature_options(&self, name: &str) -> AppResult<Vec<String>> {
        self.ensure_open(name)?;
        self.introspection().get_feature_options(name)
    }

    /// Every feature with its current value.
    pub fn feature_snapshot(&self) -> AppResult<Vec<FeatureSnapshot>> {
        self.ensure_open("Handle")?;
        Ok(self.introspection().snapshot())
    }

    fn introspection(&self) -> FeatureIntrospection<'_> {
        FeatureIntrospection::new(&self.features, self.backend.as_ref())
    }

    /// AOI as reported back by the camera.
    pub fn aoi(&self) -> &AoiConfig {
        &self.aoi.config
    }

    /// Metadata of the `"image"` channel.
    pub fn channel(&self) -> &ChannelMetadata {
        &self.aoi.channel
    }

    /// `(height, width)` of the image channel.
    pub fn channel_shape(&self) -> (u32, u32) {
        self.aoi.channel.shape
    }

    /// Receiver for the temperature supervision state.
    pub fn temperature_state(&self) -> watch::Receiver<TemperatureState> {
        self.supervisor.subscribe()
    }

    /// Wait for the converging monitor to finish. `Ok(None)` when there is none.
    ///
    /// Cancel-safe: if this future is dropped early the monitor keeps running and
    /// `close` still stops it.
    pub async fn wait_for_stabilization(&mut self) -> AppResult<Option<StabilizationOutcome>> {
        let Some(task) = self.stabilization.as_mut() else {
            return Ok(None);
        };
        let result = task.wait().await;
        self.stabilization = None;
        result.map(Some)
    }

    /// True after a successful `close`.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop the converging monitor and release the camera handle. Safe to call twice.
    ///
    /// The monitor is awaited before the handle is released, so no poll can reach a
    /// released handle. If the release fails the camera stays open and `close` can be
    /// retried.
    pub async fn close(&mut self) -> AppResult<()> {
        if self.closed {
            return Ok(());
        }

        if let Some(mut task) = self.stabilization.take() {
            task.cancel();
            match task.wait().await {
                Ok(outcome) => debug!(parent: &self.span, ?outcome, "Temperature monitor stopped"),
                Err(e) => debug!(parent: &self.span, "Temperature monitor had already stopped: {}", e),
            }
        }

        self.backend.close()?;
        self.closed = true;
        info!(parent: &self.span, "Camera closed");
        Ok(())
    }

    fn ensure_open(&self, feature: &str) -> AppResult<()> {
        if self.closed {
            return Err(NeoError::hardware(feature, "camera is closed"));
        }
        Ok(())
    }
}

impl Drop for NeoCamera {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let Some(mut task) = self.stabilization.take() else {
            if let Err(e) = self.backend.close() {
                warn!(parent: &self.span, "Error closing camera: {}", e);
            }
            return;
        };

        // The monitor may be mid-read: release the handle only once it has stopped.
        task.cancel();
        let backend = Arc::clone(&self.backend);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let span = self.span.clone();
                runtime.spawn(
                    async move {
                        let _ = task.wait().await;
                        if let Err(e) = backend.close() {
                            warn!("Error closing camera: {}", e);
                        }
                    }
                    .instrument(span),
                );
            }
            Err(_) => warn!(
                parent: &self.span,
                "Camera dropped outside a runtime with the temperature monitor running, handle not released"
            ),
        }
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::hardware::MockFeatureBackend;

    fn uncooled() -> CameraConfig {
        CameraConfig::default()
    }

    #[test]
    fn test_open_applies_in_order() {
        let mock = Arc::new(MockFeatureBackend::new());
        let camera = NeoCamera::open(mock.clone(), &uncooled(), &TemperatureSettings::default())
            .unwrap();

        let order: Vec<String> = mock.write_log().into_iter().map(|(name, _)| name).collect();
        assert_eq!(
            order,
            vec![
                "SpuriousNoiseFilter",
                "StaticBlemishCorrection",
                "ElectronicShutteringMode",
                "SimplePreAmpGainControl",
                "ExposureTime",
                "AOIBinning",
                "AOIWidth",
                "AOILeft",
                "AOIHeight",
                "AOITop",
                "SensorCooling",
            ]
        );
        assert_eq!(camera.channel_shape(), (2160, 2560));
        assert_eq!(camera.get_sensor_info().serial_number, "VSC-00954");
        assert_eq!(camera.get_sensor_info().pixel_width_um, 6.5);
    }

    #[test]
    fn test_invalid_aoi_prevents_ready_state() {
        let mock = Arc::new(MockFeatureBackend::new());
        let config = CameraConfig {
            aoi_binning: "2x2".to_string(),
            aoi_width: Some(2000),
            aoi_left: Some(1000),
            ..CameraConfig::default()
        };

        let err = NeoCamera::open(mock.clone(), &config, &TemperatureSettings::default())
            .err()
            .unwrap();
        assert!(err.is_configuration_error());
        assert_eq!(mock.write_count("AOIBinning"), 0);
        assert_eq!(mock.write_count("SensorCooling"), 0);
        assert!(mock.is_closed());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mock = Arc::new(MockFeatureBackend::new());
        let mut camera =
            NeoCamera::open(mock.clone(), &uncooled(), &TemperatureSettings::default()).unwrap();

        camera.close().await.unwrap();
        camera.close().await.unwrap();
        assert!(mock.is_closed());
        let err = camera.get_feature_value("AOIWidth").unwrap_err();
        assert!(matches!(err, NeoError::HardwareCommunication { .. }));
    }

    #[tokio::test]
    async fn test_failed_release_can_be_retried() {
        let mock = Arc::new(MockFeatureBackend::new().with_failure("Handle", "device busy"));
        let mut camera =
            NeoCamera::open(mock.clone(), &uncooled(), &TemperatureSettings::default()).unwrap();

        let err = camera.close().await.unwrap_err();
        assert!(err.to_string().contains("device busy"));
        assert!(!camera.is_closed());
        assert!(!mock.is_closed());

        mock.clear_failure("Handle");
        camera.close().await.unwrap();
        assert!(camera.is_closed());
        assert!(mock.is_closed());
    }

    #[test]
    fn test_drop_releases_handle() {
        let mock = Arc::new(MockFeatureBackend::new());
        let camera =
            NeoCamera::open(mock.clone(), &uncooled(), &TemperatureSettings::default()).unwrap();
        drop(camera);
        assert!(mock.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_with_monitor_releases_after_it_stops() {
        let mock = Arc::new(MockFeatureBackend::new().with_temperature_sequence([0.0]));
        let config = CameraConfig {
            sensor_cooling: true,
            ..CameraConfig::default()
        };
        let camera = NeoCamera::open(mock.clone(), &config, &TemperatureSettings::default())
            .unwrap();
        let mut state = camera.temperature_state();

        tokio::time::sleep(std::time::Duration::from_secs(12)).await;
        drop(camera);

        state
            .wait_for(|s| *s == TemperatureState::Cancelled)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(mock.is_closed());
    }
}
