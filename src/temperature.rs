//! Sensor temperature supervision
//!
//! Applies the cooling policy at startup and, when cooling is enabled, watches the
//! sensor converge on its setpoint from a background task.
//!
//! # States
//!
//! ```text
//! Uncooled                      (cooling off, temperature reported once)
//! Cooling-Initiated -> Converging -> Stabilized
//!                                 -> Cancelled   (task cancelled or dropped)
//!                                 -> Failed      (hardware error or poll bound reached)
//! ```
//!
//! The converging loop is the only code that waits on a timer. It runs on the tokio
//! runtime, never on the caller, and its progress is published on a `watch` channel.
//! Backend reads inside the loop go through `spawn_blocking`, since SDK calls block.
//!
//! Cancellation sets a flag that the loop checks before every poll and after every
//! read, and wakes the loop out of its wait. Owners that release the backend must
//! await the task first (`StabilizationTask::wait`) so no poll races the release.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument, Span};

use crate::config::{CameraConfig, TemperatureSettings};
use crate::error::{AppResult, NeoError};
use crate::features::{keys, Feature, FeatureMap};
use crate::hardware::FeatureBackend;

/// Cooling policy, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperaturePolicy {
    /// Turn the sensor cooler on
    pub cooling_enabled: bool,
    /// Requested setpoint in C; `None` keeps the camera's current setpoint.
    pub target_temperature: Option<f64>,
}

impl TemperaturePolicy {
    /// Policy described by the camera options.
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            cooling_enabled: config.sensor_cooling,
            target_temperature: config.target_temperature,
        }
    }
}

/// Live supervision state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TemperatureState {
    /// Policy not applied yet
    Idle,
    /// Cooler off; temperature read once when the policy was applied
    Uncooled {
        /// Sensor temperature in C
        temperature: f64,
    },
    /// Cooler on, waiting for the sensor to reach the setpoint
    Converging {
        /// Setpoint in C
        target: f64,
        /// Latest reading in C, `None` before the first poll
        current: Option<f64>,
    },
    /// Within tolerance of the setpoint
    Stabilized {
        /// Setpoint in C
        target: f64,
        /// Reading that satisfied the tolerance
        temperature: f64,
    },
    /// Monitor stopped by its owner
    Cancelled,
    /// Monitor stopped on an error
    Failed(String),
}

/// How a converging task ended without error.
#[derive(Debug, Clone, PartialEq)]
pub enum StabilizationOutcome {
    /// Sensor reached the setpoint
    Stabilized {
        /// Polls taken, including the successful one
        polls: u32,
        /// Reading that satisfied the tolerance
        temperature: f64,
    },
    /// Owner cancelled the monitor
    Cancelled {
        /// Polls completed before cancellation
        polls: u32,
    },
}

/// Handle to the background converging task.
///
/// Dropping the handle cancels the task at its next check.
pub struct StabilizationTask {
    handle: Option<JoinHandle<AppResult<StabilizationOutcome>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    cancelled: Arc<AtomicBool>,
}

impl StabilizationTask {
    /// Request cancellation. The task stops before its next poll.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// True once the task has returned (or was already awaited).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the task and return how it ended.
    ///
    /// Dropping this future before it completes keeps the task awaitable.
    pub async fn wait(&mut self) -> AppResult<StabilizationOutcome> {
        let handle = self
            .handle
            .as_mut()
            .ok_or_else(|| NeoError::Runtime("stabilization task already joined".to_string()))?;
        let result = handle.await;
        self.handle = None;
        result.map_err(|e| NeoError::Runtime(format!("stabilization task failed: {}", e)))?
    }

    /// Consume the handle and wait for the task.
    pub async fn join(mut self) -> AppResult<StabilizationOutcome> {
        self.wait().await
    }
}

impl Drop for StabilizationTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Applies the cooling policy and launches the converging check.
pub struct TemperatureSupervisor {
    backend: Arc<dyn FeatureBackend>,
    sensor_cooling: Feature,
    temperature_control: Feature,
    sensor_temperature: Feature,
    temperature_status: Feature,
    settings: TemperatureSettings,
    state_tx: Arc<watch::Sender<TemperatureState>>,
    span: Span,
}

impl TemperatureSupervisor {
    /// Resolve the cooling features from `features`. Nothing is written yet.
    pub fn new(
        features: &FeatureMap,
        backend: Arc<dyn FeatureBackend>,
        settings: TemperatureSettings,
        span: Span,
    ) -> AppResult<Self> {
        let (state_tx, _) = watch::channel(TemperatureState::Idle);
        Ok(Self {
            backend,
            sensor_cooling: features.get(keys::SENSOR_COOLING)?.clone(),
            temperature_control: features.get(keys::TEMPERATURE_CONTROL)?.clone(),
            sensor_temperature: features.get(keys::SENSOR_TEMPERATURE)?.clone(),
            temperature_status: features.get(keys::TEMPERATURE_STATUS)?.clone(),
            settings,
            state_tx: Arc::new(state_tx),
            span,
        })
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<TemperatureState> {
        self.state_tx.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> TemperatureState {
        self.state_tx.borrow().clone()
    }

    /// Apply `policy`. Returns the converging task when cooling is enabled.
    ///
    /// All writes and the initial reads happen on the caller before this returns;
    /// only the polling loop runs in the background. Launching the loop requires a
    /// tokio runtime.
    pub fn apply(&self, policy: &TemperaturePolicy) -> AppResult<Option<StabilizationTask>> {
        let _enter = self.span.enter();
        let backend = self.backend.as_ref();

        self.sensor_cooling.set(backend, policy.cooling_enabled)?;

        if !policy.cooling_enabled {
            let temperature = self.sensor_temperature.get_f64(backend)?;
            info!("Sensor is not cooled.  Current temp is {:.2} C.", temperature);
            self.report_status()?;
            self.state_tx
                .send_replace(TemperatureState::Uncooled { temperature });
            return Ok(None);
        }

        if let Some(requested) = policy.target_temperature {
            self.select_setpoint(requested)?;
        }
        let target = self.temperature_control.get_f64(backend)?;
        info!("Sensor is cooling.  Target temp is {} C.", target);
        self.report_status()?;

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| NeoError::Runtime(format!("cannot start temperature monitor: {}", e)))?;

        self.state_tx.send_replace(TemperatureState::Converging {
            target,
            current: None,
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let monitor = ConvergenceMonitor {
            backend: Arc::clone(&self.backend),
            temperature_control: self.temperature_control.clone(),
            sensor_temperature: self.sensor_temperature.clone(),
            settings: self.settings.clone(),
            state_tx: Arc::clone(&self.state_tx),
            cancelled: Arc::clone(&cancelled),
        };
        let handle = runtime.spawn(monitor.run(shutdown_rx).instrument(self.span.clone()));

        Ok(Some(StabilizationTask {
            handle: Some(handle),
            shutdown_tx: Some(shutdown_tx),
            cancelled,
        }))
    }

    fn select_setpoint(&self, requested: f64) -> AppResult<()> {
        let options = self.temperature_control.options(self.backend.as_ref())?;
        let chosen = closest_setpoint(&options, requested).ok_or_else(|| {
            NeoError::Configuration(format!(
                "No numeric setpoint available for target {} C (options: {})",
                requested,
                options.join(", ")
            ))
        })?;
        if chosen.trim().parse::<f64>().ok() != Some(requested) {
            warn!(requested, chosen = %chosen, "Using closest supported setpoint");
        }
        self.temperature_control
            .set(self.backend.as_ref(), chosen.clone())
    }

    fn report_status(&self) -> AppResult<()> {
        let status = self.temperature_status.get(self.backend.as_ref())?;
        info!(status = %status, "Temperature status");
        Ok(())
    }
}

/// Option whose numeric value is closest to `target`; non-numeric options are skipped.
pub fn closest_setpoint(options: &[String], target: f64) -> Option<&String> {
    options
        .iter()
        .filter_map(|o| o.trim().parse::<f64>().ok().map(|v| (o, (v - target).abs())))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(o, _)| o)
}

/// State owned by the background loop.
struct ConvergenceMonitor {
    backend: Arc<dyn FeatureBackend>,
    temperature_control: Feature,
    sensor_temperature: Feature,
    settings: TemperatureSettings,
    state_tx: Arc<watch::Sender<TemperatureState>>,
    cancelled: Arc<AtomicBool>,
}

impl ConvergenceMonitor {
    async fn run(self, shutdown_rx: oneshot::Receiver<()>) -> AppResult<StabilizationOutcome> {
        let result = self.poll_until_stable(shutdown_rx).await;
        match &result {
            Ok(StabilizationOutcome::Cancelled { polls }) => {
                info!(polls, "Temperature monitor cancelled");
                self.state_tx.send_replace(TemperatureState::Cancelled);
            }
            Ok(StabilizationOutcome::Stabilized { .. }) => {}
            Err(e) => {
                error!("Temperature monitor stopped: {}", e);
                self.state_tx
                    .send_replace(TemperatureState::Failed(e.to_string()));
            }
        }
        result
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// One target read and one temperature read, off the runtime threads.
    async fn read_temperatures(&self) -> AppResult<(f64, f64)> {
        let backend = Arc::clone(&self.backend);
        let target_feature = self.temperature_control.clone();
        let current_feature = self.sensor_temperature.clone();

        tokio::task::spawn_blocking(move || -> AppResult<(f64, f64)> {
            let target = target_feature.get_f64(backend.as_ref())?;
            let current = current_feature.get_f64(backend.as_ref())?;
            Ok((target, current))
        })
        .await
        .map_err(|e| NeoError::Runtime(format!("temperature read failed to complete: {}", e)))?
    }

    async fn poll_until_stable(
        &self,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> AppResult<StabilizationOutcome> {
        let interval: Duration = self.settings.poll_interval();
        let mut polls: u32 = 0;

        loop {
            if self.is_cancelled() {
                return Ok(StabilizationOutcome::Cancelled { polls });
            }
            let (target, current) = self.read_temperatures().await?;
            // A reading taken while cancellation was requested is discarded.
            if self.is_cancelled() {
                return Ok(StabilizationOutcome::Cancelled { polls });
            }
            polls += 1;

            let diff = target - current;
            if diff.abs() <= self.settings.tolerance_c {
                info!("Sensor temp is stabilized.");
                self.state_tx.send_replace(TemperatureState::Stabilized {
                    target,
                    temperature: current,
                });
                return Ok(StabilizationOutcome::Stabilized {
                    polls,
                    temperature: current,
                });
            }

            self.state_tx.send_replace(TemperatureState::Converging {
                target,
                current: Some(current),
            });

            if let Some(max_polls) = self.settings.max_polls {
                if polls >= max_polls {
                    return Err(NeoError::StabilizationTimeout {
                        polls,
                        target,
                        current,
                    });
                }
            }

            info!(
                "Sensor is cooling.  Target: {} C.  Current: {:.2} C.",
                target, current
            );

            tokio::select! {
                biased;
                _ = &mut shutdown_rx => {
                    return Ok(StabilizationOutcome::Cancelled { polls });
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}
