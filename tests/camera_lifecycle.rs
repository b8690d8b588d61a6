//! End-to-end tests for camera startup, temperature monitoring and shutdown against
//! the simulated Neo.

use neo_daq::hardware::{FeatureValue, MockFeatureBackend};
use neo_daq::{
    CameraConfig, NeoCamera, NeoError, StabilizationOutcome, TemperatureSettings,
    TemperatureState,
};
use std::sync::Arc;
use std::time::Duration;

fn cooling_config() -> CameraConfig {
    CameraConfig {
        sensor_cooling: true,
        ..CameraConfig::default()
    }
}

fn fast_settings(max_polls: Option<u32>) -> TemperatureSettings {
    TemperatureSettings {
        tolerance_c: 1.0,
        poll_interval_ms: 5000,
        max_polls,
    }
}

#[tokio::test(start_paused = true)]
async fn test_cooling_camera_reaches_setpoint() {
    let mock = Arc::new(
        MockFeatureBackend::new()
            .with_value("TemperatureControl", "20.00")
            .with_temperature_sequence([15.0, 17.5, 19.2, 19.5]),
    );
    let mut camera = NeoCamera::open(mock.clone(), &cooling_config(), &fast_settings(None))
        .expect("camera should open");

    // Initialization finished before the first poll: everything is already written.
    assert_eq!(mock.write_count("SensorCooling"), 1);
    assert_eq!(mock.write_count("AOITop"), 1);

    let outcome = camera.wait_for_stabilization().await.unwrap();
    assert_eq!(
        outcome,
        Some(StabilizationOutcome::Stabilized {
            polls: 3,
            temperature: 19.2
        })
    );
    assert!(matches!(
        *camera.temperature_state().borrow(),
        TemperatureState::Stabilized { .. }
    ));

    camera.close().await.unwrap();
    assert!(mock.is_closed());
}

#[tokio::test]
async fn test_uncooled_camera_has_nothing_to_wait_for() {
    let mock = Arc::new(MockFeatureBackend::new().with_temperature_sequence([23.0]));
    let mut camera = NeoCamera::open(
        mock.clone(),
        &CameraConfig::default(),
        &TemperatureSettings::default(),
    )
    .unwrap();

    assert_eq!(camera.wait_for_stabilization().await.unwrap(), None);
    assert_eq!(
        *camera.temperature_state().borrow(),
        TemperatureState::Uncooled { temperature: 23.0 }
    );
    assert_eq!(
        mock.write_log()
            .iter()
            .filter(|(name, value)| name == "SensorCooling" && *value == FeatureValue::Boolean(false))
            .count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_close_stops_background_polling() {
    let mock = Arc::new(MockFeatureBackend::new().with_temperature_sequence([10.0]));
    let mut camera = NeoCamera::open(mock.clone(), &cooling_config(), &fast_settings(None)).unwrap();
    let mut state = camera.temperature_state();

    tokio::time::sleep(Duration::from_secs(22)).await;
    assert!(matches!(
        *state.borrow_and_update(),
        TemperatureState::Converging { current: Some(_), .. }
    ));

    camera.close().await.unwrap();
    camera.close().await.unwrap();

    let last = state
        .wait_for(|s| *s == TemperatureState::Cancelled)
        .await
        .unwrap()
        .clone();
    assert_eq!(last, TemperatureState::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_close_on_poll_boundary_reports_cancelled() {
    for polls_before_close in 0..8u32 {
        let mock = Arc::new(MockFeatureBackend::new().with_temperature_sequence([10.0]));
        let mut camera =
            NeoCamera::open(mock.clone(), &cooling_config(), &fast_settings(None)).unwrap();
        let state = camera.temperature_state();

        for _ in 0..polls_before_close {
            tokio::time::advance(Duration::from_millis(5000)).await;
        }
        // The next wait has just expired when close arrives.
        tokio::time::advance(Duration::from_millis(5000)).await;
        camera.close().await.unwrap();

        assert_eq!(*state.borrow(), TemperatureState::Cancelled);
        assert!(mock.is_closed());
        let reads = mock.read_count("SensorTemperature");
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(mock.read_count("SensorTemperature"), reads);
    }
}

#[tokio::test(start_paused = true)]
async fn test_close_after_abandoned_wait() {
    let mock = Arc::new(MockFeatureBackend::new().with_temperature_sequence([10.0]));
    let mut camera = NeoCamera::open(mock.clone(), &cooling_config(), &fast_settings(None)).unwrap();

    let waited = tokio::time::timeout(Duration::from_secs(12), camera.wait_for_stabilization()).await;
    assert!(waited.is_err());

    camera.close().await.unwrap();
    assert_eq!(*camera.temperature_state().borrow(), TemperatureState::Cancelled);
    assert!(mock.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_monitor_failure_is_visible_to_owner() {
    let mock = Arc::new(
        MockFeatureBackend::new()
            .with_temperature_sequence([0.0])
            .with_failure_after("SensorTemperature", 3, "cable unplugged"),
    );
    let mut camera = NeoCamera::open(mock, &cooling_config(), &fast_settings(None)).unwrap();

    let err = camera.wait_for_stabilization().await.unwrap_err();
    assert!(err.to_string().contains("cable unplugged"));
    assert!(matches!(
        *camera.temperature_state().borrow(),
        TemperatureState::Failed(_)
    ));
}

#[tokio::test(start_paused = true)]
async fn test_poll_bound_reports_last_reading() {
    let mock = Arc::new(MockFeatureBackend::new().with_temperature_sequence([5.0]));
    let mut camera = NeoCamera::open(mock, &cooling_config(), &fast_settings(Some(6))).unwrap();

    match camera.wait_for_stabilization().await {
        Err(NeoError::StabilizationTimeout {
            polls,
            target,
            current,
        }) => {
            assert_eq!(polls, 6);
            assert_eq!(target, -30.0);
            assert_eq!(current, 5.0);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[test]
fn test_default_fill_with_binning() {
    let mock = Arc::new(MockFeatureBackend::new());
    let config = CameraConfig {
        aoi_binning: "2x2".to_string(),
        ..CameraConfig::default()
    };
    let camera = NeoCamera::open(mock, &config, &TemperatureSettings::default()).unwrap();

    assert_eq!(camera.aoi().width, 1280);
    assert_eq!(camera.aoi().height, 1080);
    assert_eq!(camera.channel_shape(), (1080, 1280));
    let x = &camera.channel().mapping.x_index;
    assert_eq!(x.len(), 1280);
    assert_eq!(x[..3].to_vec(), vec![1u32, 3, 5]);
    assert_eq!(camera.channel().name, "image");
}

#[test]
fn test_oversized_aoi_names_the_numbers() {
    let mock = Arc::new(MockFeatureBackend::new());
    let config = CameraConfig {
        aoi_left: Some(2000),
        aoi_width: Some(1000),
        ..CameraConfig::default()
    };

    let err = NeoCamera::open(mock.clone(), &config, &TemperatureSettings::default())
        .err()
        .unwrap();
    match err {
        NeoError::AoiOutOfRange {
            dimension,
            extent,
            limit,
        } => {
            assert_eq!(dimension, "width");
            assert_eq!(extent, 2999);
            assert_eq!(limit, 2560);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(mock.write_count("AOIWidth"), 0);
}

#[test]
fn test_bad_queries_leave_camera_usable() {
    let mock = Arc::new(MockFeatureBackend::new());
    let camera = NeoCamera::open(
        mock.clone(),
        &CameraConfig::default(),
        &TemperatureSettings::default(),
    )
    .unwrap();
    let writes = mock.write_log().len();

    assert!(matches!(
        camera.get_feature_value("NotAFeature"),
        Err(NeoError::UnknownFeature(_))
    ));
    assert!(matches!(
        camera.get_feature_options("ExposureTime"),
        Err(NeoError::UnsupportedOperation { .. })
    ));

    assert_eq!(
        camera.get_feature_value("AOIBinning").unwrap(),
        FeatureValue::from("1x1")
    );
    assert_eq!(
        camera.get_feature_options("aoi_binning").unwrap(),
        vec!["1x1", "2x2", "3x3", "4x4", "8x8"]
    );
    assert_eq!(camera.get_feature_names().len(), 24);
    assert_eq!(mock.write_log().len(), writes);
}

#[test]
fn test_sensor_info_reflects_hardware() {
    let mock = Arc::new(MockFeatureBackend::new().with_sensor(1024, 512));
    let camera = NeoCamera::open(mock, &CameraConfig::default(), &TemperatureSettings::default())
        .unwrap();

    let info = camera.get_sensor_info();
    assert_eq!(info.model, "DC-152Q-C00-FI");
    assert_eq!((info.sensor_width, info.sensor_height), (1024, 512));
    assert_eq!(camera.channel_shape(), (512, 1024));

    let json = serde_json::to_value(camera.channel()).unwrap();
    assert_eq!(json["shape"], serde_json::json!([512, 1024]));
}
