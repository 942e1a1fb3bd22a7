//! Mock hardware implementations.
//!
//! Simulated devices for running and testing the engine without a telescope:
//! timing comes from `tokio::time::sleep`, never from blocking the thread.
//! Both mocks record what was asked of them (call counters plus a shared
//! [`OperationLog`]) and support failure injection, so tests can assert call
//! order, retry behavior and cancellation without real event wiring.

use crate::cancel::CancelToken;
use crate::error::{ObsError, ObsResult};
use crate::hardware::camera::Camera;
use crate::hardware::motor::{AxisParameter, StepMotor};
use crate::hardware::{
    AcquisitionRequest, AcquisitionSettings, CameraCapabilities, ExposureEvent, ShutterMode,
    ShutterState,
};
use async_trait::async_trait;
use rand::Rng;
use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::sleep;

// =============================================================================
// OperationLog - shared device call recorder
// =============================================================================

/// Chronological record of device operations across several mocks.
///
/// Tests hand one log to every mock device of a scenario and assert the
/// relative order of motor moves, exposures and shutter commands afterwards.
#[derive(Debug, Clone, Default)]
pub struct OperationLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry.
    pub fn record(&self, entry: impl Into<String>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry.into());
        }
    }

    /// Snapshot of all entries in insertion order.
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Number of entries whose text starts with `prefix`.
    pub fn count_with_prefix(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }
}

// =============================================================================
// MockCamera - simulated camera head
// =============================================================================

/// Simulated camera.
///
/// `start_acquisition` returns immediately and completes the exposure on a
/// background task after the requested exposure time, publishing one
/// [`ExposureEvent`] on the finished-stream. Failure injection via
/// [`MockCamera::fail_next_exposures`] makes the next events carry an error.
pub struct MockCamera {
    id: String,
    frame_counter: AtomicU64,
    exposures_started: AtomicU32,
    fail_next: AtomicU32,
    finished_tx: broadcast::Sender<ExposureEvent>,
    settings: RwLock<AcquisitionSettings>,
    shutter: RwLock<ShutterState>,
    capabilities: CameraCapabilities,
    last_request: RwLock<Option<AcquisitionRequest>>,
    log: OperationLog,
}

impl MockCamera {
    /// Create a camera with default settings and an internal shutter only.
    pub fn new(id: impl Into<String>) -> Self {
        let (finished_tx, _) = broadcast::channel(16);
        Self {
            id: id.into(),
            frame_counter: AtomicU64::new(0),
            exposures_started: AtomicU32::new(0),
            fail_next: AtomicU32::new(0),
            finished_tx,
            settings: RwLock::new(AcquisitionSettings::with_exposure(Duration::from_millis(10))),
            shutter: RwLock::new(ShutterState {
                internal: ShutterMode::Auto,
                external: None,
            }),
            capabilities: CameraCapabilities::default(),
            last_request: RwLock::new(None),
            log: OperationLog::new(),
        }
    }

    /// Record operations into a shared log.
    pub fn with_log(mut self, log: OperationLog) -> Self {
        self.log = log;
        self
    }

    /// Report external-shutter support and start with the external shutter
    /// in auto mode.
    pub fn with_external_shutter(mut self) -> Self {
        self.capabilities.has_external_shutter = true;
        self.shutter = RwLock::new(ShutterState {
            internal: ShutterMode::Auto,
            external: Some(ShutterMode::Auto),
        });
        self
    }

    /// Make the next `n` exposures complete with an error event.
    pub fn fail_next_exposures(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// How many exposures were started so far.
    pub fn exposures_started(&self) -> u32 {
        self.exposures_started.load(Ordering::SeqCst)
    }

    /// The request of the most recently started exposure.
    pub async fn last_request(&self) -> Option<AcquisitionRequest> {
        self.last_request.read().await.clone()
    }
}

#[async_trait]
impl Camera for MockCamera {
    fn camera_id(&self) -> &str {
        &self.id
    }

    async fn start_acquisition(
        &self,
        request: AcquisitionRequest,
        token: &CancelToken,
    ) -> ObsResult<()> {
        token.ensure_active()?;

        let frame = self.frame_counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.exposures_started.fetch_add(1, Ordering::SeqCst);
        self.log.record(format!("{} expose", self.id));

        let exposure = request.settings.exposure;
        *self.last_request.write().await = Some(request);

        let fail = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let id = self.id.clone();
        let tx = self.finished_tx.clone();
        let token = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(exposure) => {
                    let event = if fail {
                        ExposureEvent::failed(&id, frame, "simulated readout failure")
                    } else {
                        let mean = {
                            let mut rng = rand::thread_rng();
                            rng.gen_range(500.0..2000.0)
                        };
                        ExposureEvent::completed(&id, frame, mean)
                    };
                    // No receivers is fine; nobody was waiting for this frame.
                    let _ = tx.send(event);
                }
                // A cancelled run abandons the frame without an event.
                _ = token.cancelled() => {}
            }
        });

        Ok(())
    }

    fn subscribe_finished(&self) -> broadcast::Receiver<ExposureEvent> {
        self.finished_tx.subscribe()
    }

    async fn shutter_state(&self) -> ObsResult<ShutterState> {
        Ok(*self.shutter.read().await)
    }

    async fn set_internal_shutter(&self, mode: ShutterMode) -> ObsResult<()> {
        self.log.record(format!("{} shutter-internal {mode}", self.id));
        self.shutter.write().await.internal = mode;
        Ok(())
    }

    async fn set_external_shutter(&self, mode: ShutterMode) -> ObsResult<()> {
        if !self.capabilities.has_external_shutter {
            return Err(ObsError::Hardware(format!(
                "camera {} has no external shutter",
                self.id
            )));
        }
        self.log.record(format!("{} shutter-external {mode}", self.id));
        self.shutter.write().await.external = Some(mode);
        Ok(())
    }

    fn capabilities(&self) -> CameraCapabilities {
        self.capabilities
    }

    async fn apply_settings(&self, settings: AcquisitionSettings) -> ObsResult<()> {
        self.log.record(format!("{} apply-settings", self.id));
        *self.settings.write().await = settings;
        Ok(())
    }

    async fn current_settings(&self) -> ObsResult<AcquisitionSettings> {
        Ok(self.settings.read().await.clone())
    }
}

// =============================================================================
// MockStepMotor - simulated wave-plate rotator
// =============================================================================

/// Simulated step motor.
///
/// Moves complete during `wait_for_position` after a short simulated settle.
/// Failure injection via [`MockStepMotor::fail_next_calls`] makes the next
/// hardware calls error, which exercises the retry wrapper. The reference
/// switch trips after a configurable number of reference returns, which
/// exercises the backtracking search.
///
/// # Example
///
/// ```
/// use polar_obs::cancel::CancelToken;
/// use polar_obs::hardware::mock::MockStepMotor;
/// use polar_obs::hardware::motor::StepMotor;
///
/// # tokio_test::block_on(async {
/// let motor = MockStepMotor::new();
/// motor.move_to(3200).await.unwrap();
/// motor.wait_for_position(&CancelToken::never()).await.unwrap();
/// assert_eq!(motor.current_position(), 3200);
/// # })
/// ```
pub struct MockStepMotor {
    position: AtomicI32,
    target: AtomicI32,
    backlash: i32,
    max_speed: AtomicI32,
    move_count: AtomicU32,
    reference_returns: AtomicU32,
    switch_after_returns: AtomicU32,
    fail_next: AtomicU32,
    settle: Duration,
    log: OperationLog,
}

impl MockStepMotor {
    pub fn new() -> Self {
        Self {
            position: AtomicI32::new(0),
            target: AtomicI32::new(0),
            backlash: 0,
            max_speed: AtomicI32::new(1000),
            move_count: AtomicU32::new(0),
            reference_returns: AtomicU32::new(0),
            switch_after_returns: AtomicU32::new(1),
            fail_next: AtomicU32::new(0),
            settle: Duration::from_millis(2),
            log: OperationLog::new(),
        }
    }

    /// Record operations into a shared log.
    pub fn with_log(mut self, log: OperationLog) -> Self {
        self.log = log;
        self
    }

    /// Start at the given counter position.
    pub fn with_position(self, position: i32) -> Self {
        self.position.store(position, Ordering::SeqCst);
        self.target.store(position, Ordering::SeqCst);
        self
    }

    /// Offset reported by `true_position` relative to the raw counter.
    pub fn with_backlash(mut self, offset: i32) -> Self {
        self.backlash = offset;
        self
    }

    /// Trip the reference switch only after `n` reference returns. Use
    /// `u32::MAX` for a switch that never confirms.
    pub fn with_switch_after_returns(self, n: u32) -> Self {
        self.switch_after_returns.store(n, Ordering::SeqCst);
        self
    }

    /// Make the next `n` hardware calls fail.
    pub fn fail_next_calls(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// How many absolute moves were commanded.
    pub fn move_count(&self) -> u32 {
        self.move_count.load(Ordering::SeqCst)
    }

    /// How many reference returns were commanded.
    pub fn reference_return_count(&self) -> u32 {
        self.reference_returns.load(Ordering::SeqCst)
    }

    /// Current raw counter value.
    pub fn current_position(&self) -> i32 {
        self.position.load(Ordering::SeqCst)
    }

    fn check_injected_failure(&self, call: &str) -> ObsResult<()> {
        let had_budget = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if had_budget {
            Err(ObsError::Hardware(format!("simulated {call} failure")))
        } else {
            Ok(())
        }
    }
}

impl Default for MockStepMotor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepMotor for MockStepMotor {
    async fn actual_position(&self) -> ObsResult<i32> {
        self.check_injected_failure("actual_position")?;
        Ok(self.position.load(Ordering::SeqCst))
    }

    async fn true_position(&self) -> ObsResult<i32> {
        self.check_injected_failure("true_position")?;
        Ok(self.position.load(Ordering::SeqCst) + self.backlash)
    }

    async fn move_to(&self, position: i32) -> ObsResult<()> {
        self.check_injected_failure("move_to")?;
        self.move_count.fetch_add(1, Ordering::SeqCst);
        self.target.store(position, Ordering::SeqCst);
        self.log.record(format!("motor move-to {position}"));
        Ok(())
    }

    async fn wait_for_position(&self, token: &CancelToken) -> ObsResult<()> {
        self.check_injected_failure("wait_for_position")?;
        tokio::select! {
            _ = sleep(self.settle) => {
                let target = self.target.load(Ordering::SeqCst);
                self.position.store(target, Ordering::SeqCst);
                Ok(())
            }
            _ = token.cancelled() => Err(ObsError::Cancelled),
        }
    }

    async fn reference_return(&self, token: &CancelToken) -> ObsResult<()> {
        self.check_injected_failure("reference_return")?;
        token.ensure_active()?;
        self.reference_returns.fetch_add(1, Ordering::SeqCst);
        self.log.record("motor reference-return");
        sleep(self.settle).await;
        self.position.store(0, Ordering::SeqCst);
        self.target.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn axis_parameter(&self, param: AxisParameter) -> ObsResult<i32> {
        self.check_injected_failure("axis_parameter")?;
        let value = match param {
            AxisParameter::ActualPosition => self.position.load(Ordering::SeqCst),
            AxisParameter::TargetPosition => self.target.load(Ordering::SeqCst),
            AxisParameter::ReferenceSwitchStatus => {
                let returns = self.reference_returns.load(Ordering::SeqCst);
                i32::from(returns >= self.switch_after_returns.load(Ordering::SeqCst))
            }
            AxisParameter::MaximumSpeed => self.max_speed.load(Ordering::SeqCst),
        };
        Ok(value)
    }

    async fn set_axis_parameter(&self, param: AxisParameter, value: i32) -> ObsResult<()> {
        self.check_injected_failure("set_axis_parameter")?;
        match param {
            AxisParameter::ActualPosition => self.position.store(value, Ordering::SeqCst),
            AxisParameter::TargetPosition => self.target.store(value, Ordering::SeqCst),
            AxisParameter::MaximumSpeed => self.max_speed.store(value, Ordering::SeqCst),
            AxisParameter::ReferenceSwitchStatus => {
                return Err(ObsError::Hardware(
                    "reference switch status is read-only".into(),
                ))
            }
        }
        Ok(())
    }
}
