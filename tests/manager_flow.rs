//! Integration tests for the manager's run lifecycle.
//!
//! A full rig of mock cameras, a mock wave-plate motor and a counting
//! notifier drives the whole state machine: target submission and its
//! validation, run totals, the one-time calibration offer, cancellation and
//! failure reporting.

use polar_obs::config::{ScenarioConfig, Settings};
use polar_obs::error::ObsError;
use polar_obs::hardware::camera::Camera;
use polar_obs::hardware::mock::{MockCamera, MockStepMotor};
use polar_obs::hardware::motor::StepMotor;
use polar_obs::hardware::notifier::{AutoNotifier, Notifier};
use polar_obs::hardware::AcquisitionSettings;
use polar_obs::manager::{JobManager, RunOutcome};
use polar_obs::target::{CycleType, Target};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::time::timeout;

/// Acquisition job with one plate move per exposure: 4 camera steps a pass.
const LIGHT_SCRIPT: &str = r#"{ "Actions": [
    { "motor": "rotate" },
    { "camera": "expose" },
    { "repeat": {
        "Actions": [ { "motor": "rotate" }, { "camera": "expose" } ],
        "Repeats": 3
    } }
] }"#;

/// Acquisition job slowed down by delays: 5 camera steps a pass, roughly
/// 600 ms each, so a run can be cancelled mid-pass reliably.
const SLOW_LIGHT_SCRIPT: &str = r#"{ "Actions": [
    { "motor": "rotate" },
    { "camera": "expose" },
    { "repeat": {
        "Actions": [ { "camera": "expose" }, { "delay": "wait 150" } ],
        "Repeats": 4
    } }
] }"#;

/// Acquisition job without any plate move, invalid for polarimetric cycles.
const MOTORLESS_LIGHT_SCRIPT: &str = r#"{ "Actions": [ { "camera": "expose" } ] }"#;

/// Calibration job: 2 camera steps.
const CALIBRATION_SCRIPT: &str = r#"{ "Actions": [
    { "repeat": { "Actions": [ { "camera": "expose" } ], "Repeats": 2 } }
] }"#;

fn scenario_settings(dir: &Path, light_script: &str) -> Settings {
    let light = dir.join("linear.job");
    std::fs::write(&light, light_script).expect("write light script");
    std::fs::write(dir.join("linear.bias"), CALIBRATION_SCRIPT).expect("write bias script");
    std::fs::write(dir.join("linear.dark"), CALIBRATION_SCRIPT).expect("write dark script");

    let mut settings = Settings::default();
    settings.scenarios.insert(
        "linear".to_string(),
        ScenarioConfig {
            light,
            bias: None,
            dark: None,
        },
    );
    settings
}

struct Rig {
    manager: JobManager,
    notifier: Arc<AutoNotifier>,
    cameras: Vec<Arc<MockCamera>>,
    // Keeps the scenario scripts alive for the rig's lifetime.
    _dir: TempDir,
}

fn rig(light_script: &str, answer: bool, with_motor: bool) -> Rig {
    let dir = tempdir().expect("tempdir");
    let settings = scenario_settings(dir.path(), light_script);

    let cameras = vec![Arc::new(MockCamera::new("cam-1")), Arc::new(MockCamera::new("cam-2"))];
    let dyn_cameras: Vec<Arc<dyn Camera>> = cameras
        .iter()
        .map(|c| Arc::clone(c) as Arc<dyn Camera>)
        .collect();
    let motor: Option<Arc<dyn StepMotor>> = if with_motor {
        Some(Arc::new(MockStepMotor::new()))
    } else {
        None
    };
    let notifier = Arc::new(AutoNotifier::new(answer));

    Rig {
        manager: JobManager::new(
            settings,
            dyn_cameras,
            motor,
            Arc::clone(&notifier) as Arc<dyn Notifier>,
        ),
        notifier,
        cameras,
        _dir: dir,
    }
}

fn linear_target() -> Target {
    Target::new(
        "HD 204827",
        CycleType::LinearPolarimetry,
        AcquisitionSettings::with_exposure(Duration::from_millis(1)),
    )
}

async fn finish(manager: &JobManager) -> RunOutcome {
    timeout(Duration::from_secs(30), manager.wait_for_outcome())
        .await
        .expect("run settles well within the timeout")
        .expect("a run was in progress")
}

#[tokio::test]
async fn test_polarimetric_submission_requires_a_plate_move() {
    let rig = rig(MOTORLESS_LIGHT_SCRIPT, true, true);
    let result = rig.manager.submit_new_target(linear_target()).await;
    assert!(
        matches!(result, Err(ObsError::Configuration(_))),
        "a linear cycle without a motor action must be rejected, got {result:?}"
    );
    assert_eq!(rig.manager.state().target_name, None);
}

#[tokio::test]
async fn test_polarimetric_submission_requires_an_attached_motor() {
    let rig = rig(LIGHT_SCRIPT, true, false);
    let result = rig.manager.submit_new_target(linear_target()).await;
    assert!(matches!(result, Err(ObsError::Configuration(_))));
    assert!(!rig.manager.state().ready_to_run);
}

#[tokio::test]
async fn test_failed_submission_keeps_the_previous_target() {
    let rig = rig(LIGHT_SCRIPT, true, true);
    rig.manager
        .submit_new_target(linear_target())
        .await
        .expect("valid target");

    // No scenario is configured for a circular cycle.
    let unconfigured = Target::new(
        "HD 25443",
        CycleType::CircularPolarimetry,
        AcquisitionSettings::with_exposure(Duration::from_millis(1)),
    );
    assert!(rig.manager.submit_new_target(unconfigured).await.is_err());

    // A blank star name never gets as far as script parsing.
    let blank = Target::new(
        "   ",
        CycleType::LinearPolarimetry,
        AcquisitionSettings::with_exposure(Duration::from_millis(1)),
    );
    assert!(rig.manager.submit_new_target(blank).await.is_err());

    let state = rig.manager.state();
    assert_eq!(state.target_name.as_deref(), Some("HD 204827"));
    assert_eq!(state.cycle_type, Some(CycleType::LinearPolarimetry));
    assert!(state.ready_to_run);
}

#[tokio::test]
async fn test_run_completes_and_offers_calibration_once() {
    let rig = rig(LIGHT_SCRIPT, true, true);
    rig.manager
        .submit_new_target(linear_target())
        .await
        .expect("submit");
    assert!(rig.manager.state().needs_calibration);

    rig.manager.start_job(2).await.expect("start");
    assert!(rig.manager.is_running());
    // 4 frames × 2 passes, plus 2 bias and 2 dark frames.
    assert_eq!(rig.manager.state().total, 12);

    assert_eq!(finish(&rig.manager).await, RunOutcome::Completed);
    let state = rig.manager.state();
    assert!(!state.is_in_process);
    assert!(state.ready_to_run);
    assert!(!state.needs_calibration, "calibration completed with the run");
    assert_eq!(state.cumulative_progress, 12);
    assert_eq!(rig.notifier.question_count(), 1);

    // The second run neither asks again nor counts calibration frames.
    rig.manager.start_job(1).await.expect("restart");
    assert_eq!(rig.manager.state().total, 4);
    assert_eq!(finish(&rig.manager).await, RunOutcome::Completed);
    assert_eq!(rig.notifier.question_count(), 1);
    assert!(!rig.manager.state().needs_calibration);
}

#[tokio::test]
async fn test_declined_calibration_stays_pending() {
    let rig = rig(LIGHT_SCRIPT, false, true);
    rig.manager
        .submit_new_target(linear_target())
        .await
        .expect("submit");

    rig.manager.start_job(1).await.expect("start");
    assert_eq!(finish(&rig.manager).await, RunOutcome::Completed);

    let state = rig.manager.state();
    assert!(state.needs_calibration, "declining keeps calibration pending");
    assert_eq!(state.cumulative_progress, 4, "only light frames were taken");
    assert_eq!(rig.notifier.question_count(), 1);

    // Every later run offers it again until somebody says yes.
    rig.manager.start_job(1).await.expect("restart");
    assert_eq!(finish(&rig.manager).await, RunOutcome::Completed);
    assert_eq!(rig.notifier.question_count(), 2);
}

#[tokio::test]
async fn test_stopping_a_run_reports_cancelled_and_reflags_calibration() {
    let rig = rig(SLOW_LIGHT_SCRIPT, true, true);
    rig.manager
        .submit_new_target(linear_target())
        .await
        .expect("submit");

    // First run completes and clears the calibration flag.
    rig.manager.start_job(1).await.expect("start");
    assert_eq!(finish(&rig.manager).await, RunOutcome::Completed);
    assert!(!rig.manager.state().needs_calibration);

    // Second run is stopped mid-pass.
    rig.manager.start_job(5).await.expect("restart");
    tokio::time::sleep(Duration::from_millis(200)).await;
    rig.manager.stop_job().await;

    assert_eq!(finish(&rig.manager).await, RunOutcome::Cancelled);
    let state = rig.manager.state();
    assert!(
        state.needs_calibration,
        "an interrupted run invalidates the calibration"
    );
    assert!(state.ready_to_run);
    assert!(!state.is_in_process);
    assert_eq!(state.progress, 0);
    assert_eq!(state.total, 0);
    assert_eq!(state.run_id, None);
    assert!(state.mean_pass.is_none());
}

#[tokio::test]
async fn test_camera_fault_fails_the_run_and_reports_it() {
    let rig = rig(LIGHT_SCRIPT, true, true);
    rig.manager
        .submit_new_target(linear_target())
        .await
        .expect("submit");

    rig.cameras[1].fail_next_exposures(1);
    rig.manager.start_job(1).await.expect("start");

    let outcome = finish(&rig.manager).await;
    let RunOutcome::Failed(message) = outcome else {
        panic!("expected a failed run, got {outcome:?}");
    };
    assert!(
        message.contains("exposure failed"),
        "failure message should name the cause: {message}"
    );
    assert_eq!(rig.notifier.error_count(), 1);

    let state = rig.manager.state();
    assert!(state.needs_calibration);
    assert!(state.ready_to_run, "a failed run leaves the manager ready");
}

#[tokio::test]
async fn test_lifecycle_guards_reject_out_of_order_requests() {
    let rig = rig(SLOW_LIGHT_SCRIPT, true, true);

    // Nothing submitted yet.
    assert!(matches!(
        rig.manager.start_job(1).await,
        Err(ObsError::Configuration(_))
    ));
    assert!(rig.manager.wait_for_outcome().await.is_err());

    rig.manager
        .submit_new_target(linear_target())
        .await
        .expect("submit");
    rig.manager.start_job(1).await.expect("start");

    // While running: no second start, no target change.
    assert!(matches!(
        rig.manager.start_job(1).await,
        Err(ObsError::Configuration(_))
    ));
    assert!(rig
        .manager
        .submit_new_target(linear_target())
        .await
        .is_err());

    assert_eq!(finish(&rig.manager).await, RunOutcome::Completed);
}
