//! Per-run execution context.
//!
//! A [`JobContext`] bundles everything a running job needs: the attached
//! devices, the per-camera settings snapshot taken at run start, the motor
//! geometry, and the handle through which the run (the single writer)
//! publishes progress and wave-plate positions.

use crate::config::MotorConfig;
use crate::error::{ObsError, ObsResult};
use crate::hardware::camera::Camera;
use crate::hardware::motor::StepMotor;
use crate::hardware::{AcquisitionRequest, AcquisitionSettings};
use crate::manager::StateHandle;
use crate::target::JobKind;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

pub struct JobContext {
    run_id: Uuid,
    target_name: String,
    job_kind: JobKind,
    cameras: Vec<Arc<dyn Camera>>,
    motor: Option<Arc<dyn StepMotor>>,
    motor_config: MotorConfig,
    settings: HashMap<String, AcquisitionSettings>,
    state: StateHandle,
}

impl JobContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: Uuid,
        target_name: impl Into<String>,
        job_kind: JobKind,
        cameras: Vec<Arc<dyn Camera>>,
        motor: Option<Arc<dyn StepMotor>>,
        motor_config: MotorConfig,
        settings: HashMap<String, AcquisitionSettings>,
        state: StateHandle,
    ) -> Self {
        Self {
            run_id,
            target_name: target_name.into(),
            job_kind,
            cameras,
            motor,
            motor_config,
            settings,
            state,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn job_kind(&self) -> JobKind {
        self.job_kind
    }

    pub fn cameras(&self) -> &[Arc<dyn Camera>] {
        &self.cameras
    }

    /// The wave-plate motor, or a configuration error when none is attached.
    pub fn motor(&self) -> ObsResult<&Arc<dyn StepMotor>> {
        self.motor
            .as_ref()
            .ok_or_else(|| ObsError::Configuration("no motor attached".into()))
    }

    pub fn has_motor(&self) -> bool {
        self.motor.is_some()
    }

    pub fn motor_config(&self) -> &MotorConfig {
        &self.motor_config
    }

    /// Attempt budget for hardware calls.
    pub fn retries(&self) -> u32 {
        self.motor_config.n_retries
    }

    /// Build the exposure request for one camera from the settings snapshot,
    /// attaching the frame tags shared by every camera of the current step.
    ///
    /// # Errors
    ///
    /// `ObsError::Configuration` when the snapshot holds no settings for the
    /// camera. The snapshot is taken before the run starts, so this means the
    /// camera was attached after the run began.
    pub fn request_for(&self, camera_id: &str) -> ObsResult<AcquisitionRequest> {
        let settings = self.settings.get(camera_id).cloned().ok_or_else(|| {
            ObsError::Configuration(format!("camera '{camera_id}' has no acquisition settings"))
        })?;
        let mut request = AcquisitionRequest::new(settings);
        request.tags = self.shared_tags();
        Ok(request)
    }

    /// The settings snapshot entry for one camera, without building a request.
    pub fn settings_for(&self, camera_id: &str) -> ObsResult<&AcquisitionSettings> {
        self.settings.get(camera_id).ok_or_else(|| {
            ObsError::Configuration(format!("camera '{camera_id}' has no acquisition settings"))
        })
    }

    /// Frame tags shared by every camera of one step: target identity, frame
    /// kind, wave-plate angles as last published, run id and a timestamp.
    pub fn shared_tags(&self) -> BTreeMap<String, String> {
        let state = self.state.snapshot();
        let mut tags = BTreeMap::new();
        tags.insert("target".into(), self.target_name.clone());
        tags.insert("frame-kind".into(), self.job_kind.as_str().into());
        tags.insert("run-id".into(), self.run_id.to_string());
        tags.insert("timestamp".into(), Utc::now().to_rfc3339());
        tags.insert(
            "waveplate-angle".into(),
            format!("{:.3}", state.motor_position),
        );
        tags.insert(
            "waveplate-angle-actual".into(),
            format!("{:.3}", state.actual_motor_position),
        );
        tags
    }

    /// Advance the per-job and cumulative progress counters by one unit.
    pub fn advance_progress(&self) {
        self.state.update(|s| {
            s.progress += 1;
            s.cumulative_progress += 1;
        });
    }

    /// Publish the commanded and true wave-plate angles in degrees.
    pub fn publish_motor_position(&self, commanded: f64, actual: f64) {
        self.state.update(|s| {
            s.motor_position = commanded;
            s.actual_motor_position = actual;
        });
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockCamera;
    use std::time::Duration;

    fn context_with_settings(settings: HashMap<String, AcquisitionSettings>) -> JobContext {
        let (state, _rx) = StateHandle::new();
        JobContext::new(
            Uuid::new_v4(),
            "HD 204827",
            JobKind::Light,
            vec![Arc::new(MockCamera::new("cam-1"))],
            None,
            MotorConfig::default(),
            settings,
            state,
        )
    }

    #[test]
    fn request_carries_snapshot_settings_and_tags() {
        let mut settings = HashMap::new();
        settings.insert(
            "cam-1".to_string(),
            AcquisitionSettings::with_exposure(Duration::from_millis(300)),
        );
        let ctx = context_with_settings(settings);

        let request = ctx.request_for("cam-1").expect("request");
        assert_eq!(request.settings.exposure, Duration::from_millis(300));
        assert_eq!(request.tags.get("target").map(String::as_str), Some("HD 204827"));
        assert_eq!(request.tags.get("frame-kind").map(String::as_str), Some("light"));
        assert!(request.tags.contains_key("waveplate-angle"));
    }

    #[test]
    fn missing_snapshot_entry_is_a_configuration_error() {
        let ctx = context_with_settings(HashMap::new());
        assert!(matches!(
            ctx.request_for("cam-1"),
            Err(ObsError::Configuration(_))
        ));
    }

    #[test]
    fn missing_motor_is_a_configuration_error() {
        let ctx = context_with_settings(HashMap::new());
        assert!(!ctx.has_motor());
        assert!(matches!(ctx.motor(), Err(ObsError::Configuration(_))));
    }

    #[test]
    fn progress_updates_reach_observers() {
        let ctx = context_with_settings(HashMap::new());
        ctx.advance_progress();
        ctx.advance_progress();
        ctx.publish_motor_position(22.5, 22.4);

        let state = ctx.state().snapshot();
        assert_eq!(state.progress, 2);
        assert_eq!(state.cumulative_progress, 2);
        assert!((state.motor_position - 22.5).abs() < f64::EPSILON);
        assert!((state.actual_motor_position - 22.4).abs() < f64::EPSILON);
    }
}
