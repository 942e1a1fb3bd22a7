//! Run orchestration.
//!
//! The [`JobManager`] owns the devices and the observation state machine:
//! Idle, Ready once a target is submitted, Running while a spawned run task
//! drives the scenario's jobs, back to Idle afterwards. State is published
//! over a `tokio::sync::watch` channel; the run task is its single writer
//! while a run is in progress.

use crate::actions::ActionKind;
use crate::cancel::{CancelSource, CancelToken};
use crate::config::{MotorConfig, Settings};
use crate::context::JobContext;
use crate::error::{ObsError, ObsResult};
use crate::hardware::camera::Camera;
use crate::hardware::motor::StepMotor;
use crate::hardware::notifier::Notifier;
use crate::hardware::AcquisitionSettings;
use crate::job::Job;
use crate::target::{CycleType, JobKind, Target};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// =============================================================================
// ExecutionState - observable run state
// =============================================================================

/// Snapshot of the manager's observable state.
///
/// `is_in_process` and `ready_to_run` are never both true. `progress` counts
/// completed camera steps of the current job; `cumulative_progress` spans the
/// whole run; `total` is precomputed when a run starts.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionState {
    pub target_name: Option<String>,
    pub cycle_type: Option<CycleType>,
    pub needs_calibration: bool,
    pub progress: u32,
    pub cumulative_progress: u32,
    pub total: u32,
    /// Commanded wave-plate angle in degrees.
    pub motor_position: f64,
    /// Wave-plate angle derived from the motor's true position.
    pub actual_motor_position: f64,
    pub is_in_process: bool,
    pub ready_to_run: bool,
    pub current_job_name: Option<String>,
    /// Mean duration of one completed acquisition pass.
    pub mean_pass: Option<Duration>,
    /// Estimated time to finish the remaining acquisition passes.
    pub estimated_remaining: Option<Duration>,
    pub run_id: Option<Uuid>,
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "target={} job={} progress={}/{} angle={:.1}",
            self.target_name.as_deref().unwrap_or("-"),
            self.current_job_name.as_deref().unwrap_or("-"),
            self.cumulative_progress,
            self.total,
            self.motor_position,
        )?;
        if let Some(remaining) = self.estimated_remaining {
            write!(f, " eta={remaining:.0?}")?;
        }
        Ok(())
    }
}

/// Writer handle for [`ExecutionState`] published over a watch channel.
#[derive(Clone)]
pub struct StateHandle {
    tx: watch::Sender<ExecutionState>,
}

impl StateHandle {
    pub fn new() -> (Self, watch::Receiver<ExecutionState>) {
        let (tx, rx) = watch::channel(ExecutionState::default());
        (Self { tx }, rx)
    }

    /// Current state by value.
    pub fn snapshot(&self) -> ExecutionState {
        self.tx.borrow().clone()
    }

    /// Mutate the state in place and notify observers.
    pub fn update(&self, mutate: impl FnOnce(&mut ExecutionState)) {
        self.tx.send_modify(mutate);
    }

    pub fn subscribe(&self) -> watch::Receiver<ExecutionState> {
        self.tx.subscribe()
    }
}

// =============================================================================
// CycleTimer - per-pass ETA estimate
// =============================================================================

/// Measures acquisition pass durations and projects the remaining time.
struct CycleTimer {
    pass_durations: Vec<Duration>,
    current_pass: Option<Instant>,
}

impl CycleTimer {
    fn new() -> Self {
        Self {
            pass_durations: Vec::new(),
            current_pass: None,
        }
    }

    /// Close the previous pass measurement, if any, and start a new one.
    fn begin_pass(&mut self) {
        if let Some(started) = self.current_pass.take() {
            self.pass_durations.push(started.elapsed());
        }
        self.current_pass = Some(Instant::now());
    }

    fn mean_pass(&self) -> Option<Duration> {
        if self.pass_durations.is_empty() {
            return None;
        }
        let sum: Duration = self.pass_durations.iter().sum();
        Some(sum / self.pass_durations.len() as u32)
    }

    fn estimate_remaining(&self, passes_left: u32) -> Option<Duration> {
        self.mean_pass().map(|mean| mean * passes_left)
    }
}

// =============================================================================
// JobManager
// =============================================================================

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed(String),
}

struct ScenarioJobs {
    light: Job,
    bias: Job,
    dark: Job,
}

struct ManagerInner {
    target: Option<Target>,
    jobs: Option<ScenarioJobs>,
    cancel: Option<CancelSource>,
    run_task: Option<JoinHandle<RunOutcome>>,
}

/// Everything one run needs, cloned out of the manager so the spawned task
/// borrows nothing.
struct RunPlan {
    run_id: Uuid,
    target_name: String,
    acquisition_runs: u32,
    needs_calibration: bool,
    light: Job,
    bias: Job,
    dark: Job,
    cameras: Vec<Arc<dyn Camera>>,
    motor: Option<Arc<dyn StepMotor>>,
    motor_config: MotorConfig,
    settings_snapshot: HashMap<String, AcquisitionSettings>,
    notifier: Arc<dyn Notifier>,
    state: StateHandle,
    token: CancelToken,
}

pub struct JobManager {
    settings: Settings,
    cameras: Vec<Arc<dyn Camera>>,
    motor: Option<Arc<dyn StepMotor>>,
    notifier: Arc<dyn Notifier>,
    state: StateHandle,
    inner: Mutex<ManagerInner>,
}

impl JobManager {
    pub fn new(
        settings: Settings,
        cameras: Vec<Arc<dyn Camera>>,
        motor: Option<Arc<dyn StepMotor>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (state, _rx) = StateHandle::new();
        Self {
            settings,
            cameras,
            motor,
            notifier,
            state,
            inner: Mutex::new(ManagerInner {
                target: None,
                jobs: None,
                cancel: None,
                run_task: None,
            }),
        }
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<ExecutionState> {
        self.state.subscribe()
    }

    /// Current state snapshot.
    pub fn state(&self) -> ExecutionState {
        self.state.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.state.snapshot().is_in_process
    }

    /// Submit a new observation target, re-parsing the scenario's three job
    /// scripts for its cycle type.
    ///
    /// A polarimetric cycle requires a motor to be attached and the
    /// acquisition job to contain at least one motor action. On any failure
    /// the previous target and jobs stay in place.
    pub async fn submit_new_target(&self, target: Target) -> ObsResult<()> {
        target.validate()?;
        let mut inner = self.inner.lock().await;
        if self.state.snapshot().is_in_process {
            return Err(ObsError::Configuration(
                "cannot change target while a run is in progress".into(),
            ));
        }

        let scenario = self.settings.scenario_for(target.cycle_type)?;
        let light = Job::from_file(&scenario.light)?;
        let bias = Job::from_file(&scenario.bias)?;
        let dark = Job::from_file(&scenario.dark)?;

        if target.cycle_type.is_polarimetric() {
            if !light.contains_action(ActionKind::Motor) {
                return Err(ObsError::Configuration(format!(
                    "cycle '{}' requires a motor action in job '{}'",
                    target.cycle_type,
                    light.name()
                )));
            }
            if self.motor.is_none() {
                return Err(ObsError::Configuration(format!(
                    "cycle '{}' requires a motor, but none is attached",
                    target.cycle_type
                )));
            }
        }

        info!(
            target = %target.star_name,
            cycle = %target.cycle_type,
            light = light.name(),
            "target submitted"
        );
        let target_name = target.star_name.clone();
        let cycle_type = target.cycle_type;
        inner.jobs = Some(ScenarioJobs { light, bias, dark });
        inner.target = Some(target);

        self.state.update(|s| {
            s.target_name = Some(target_name);
            s.cycle_type = Some(cycle_type);
            // A fresh target always re-offers calibration on its first run.
            s.needs_calibration = true;
            s.ready_to_run = true;
            s.progress = 0;
            s.cumulative_progress = 0;
            s.total = 0;
            s.current_job_name = None;
        });
        Ok(())
    }

    /// Start one run of the current target's acquisition job, repeated
    /// `repeats` times (at least once), as a background task.
    pub async fn start_job(&self, repeats: u32) -> ObsResult<()> {
        let mut inner = self.inner.lock().await;
        let state = self.state.snapshot();
        if state.is_in_process || !state.ready_to_run {
            return Err(ObsError::Configuration(
                "manager is not ready to start a run".into(),
            ));
        }
        let (target, jobs) = match (&inner.target, &inner.jobs) {
            (Some(target), Some(jobs)) => (target, jobs),
            _ => {
                return Err(ObsError::Configuration(
                    "no target submitted".into(),
                ))
            }
        };

        let acquisition_runs = repeats.max(1);
        let needs_calibration = state.needs_calibration;
        let mut total = jobs.light.count_actions(ActionKind::Camera) * acquisition_runs;
        if needs_calibration {
            total += jobs.bias.count_actions(ActionKind::Camera)
                + jobs.dark.count_actions(ActionKind::Camera);
        }

        // Snapshot the effective settings per camera before anything runs.
        let mut settings_snapshot = HashMap::new();
        for camera in &self.cameras {
            let id = camera.camera_id().to_string();
            let effective = target.settings_for(&id);
            settings_snapshot.insert(id, effective);
        }

        let cancel = CancelSource::new();
        let token = cancel.token();
        let run_id = Uuid::new_v4();

        let plan = RunPlan {
            run_id,
            target_name: target.star_name.clone(),
            acquisition_runs,
            needs_calibration,
            light: jobs.light.clone(),
            bias: jobs.bias.clone(),
            dark: jobs.dark.clone(),
            cameras: self.cameras.clone(),
            motor: self.motor.clone(),
            motor_config: self.settings.motor.clone(),
            settings_snapshot,
            notifier: Arc::clone(&self.notifier),
            state: self.state.clone(),
            token,
        };

        info!(
            run = %run_id,
            runs = acquisition_runs,
            total,
            calibration_pending = needs_calibration,
            "starting run"
        );
        self.state.update(|s| {
            s.is_in_process = true;
            s.ready_to_run = false;
            s.progress = 0;
            s.cumulative_progress = 0;
            s.total = total;
            s.run_id = Some(run_id);
            s.mean_pass = None;
            s.estimated_remaining = None;
        });

        inner.cancel = Some(cancel);
        inner.run_task = Some(tokio::spawn(drive_run(plan)));
        Ok(())
    }

    /// Cancel the current run, if any.
    pub async fn stop_job(&self) {
        let inner = self.inner.lock().await;
        if let Some(cancel) = &inner.cancel {
            info!("stopping current run");
            cancel.cancel();
        }
    }

    /// Wait for the background run task to finish and return its outcome.
    pub async fn wait_for_outcome(&self) -> ObsResult<RunOutcome> {
        let task = {
            let mut inner = self.inner.lock().await;
            inner.cancel = None;
            inner.run_task.take()
        };
        let task = task.ok_or_else(|| {
            ObsError::Configuration("no run in progress".into())
        })?;
        task.await
            .map_err(|e| ObsError::Hardware(format!("run task failed: {e}")))
    }
}

// =============================================================================
// Run driver
// =============================================================================

/// Drive one full run to an outcome. Classification happens only here:
/// cancellation is reported distinctly, any other error is logged and sent to
/// the notifier, and the tail always restores the manager to ready.
async fn drive_run(plan: RunPlan) -> RunOutcome {
    let outcome = match run_sequence(&plan).await {
        Ok(()) => RunOutcome::Completed,
        Err(ObsError::Cancelled) => {
            warn!(run = %plan.run_id, "run cancelled");
            plan.notifier
                .info(
                    "Run cancelled",
                    "The observation run was stopped before completion.",
                )
                .await;
            RunOutcome::Cancelled
        }
        Err(err) => {
            error!(run = %plan.run_id, error = %err, "run failed");
            plan.notifier.error("Run failed", &err.to_string()).await;
            RunOutcome::Failed(err.to_string())
        }
    };

    // Always restore the manager to ready, whatever happened above.
    let completed = outcome == RunOutcome::Completed;
    plan.state.update(|s| {
        s.is_in_process = false;
        s.ready_to_run = true;
        s.progress = 0;
        s.total = 0;
        s.current_job_name = None;
        s.run_id = None;
        s.mean_pass = None;
        s.estimated_remaining = None;
        if !completed {
            // An interrupted run invalidates the night's calibration.
            s.needs_calibration = true;
        }
    });
    outcome
}

async fn run_sequence(plan: &RunPlan) -> ObsResult<()> {
    let token = &plan.token;

    let ctx = job_context(plan, JobKind::Light);
    plan.state.update(|s| {
        s.progress = 0;
        s.current_job_name = Some(plan.light.name().to_string());
    });
    plan.light.initialize(&ctx, token).await?;

    let mut timer = CycleTimer::new();
    for pass in 1..=plan.acquisition_runs {
        token.ensure_active()?;
        timer.begin_pass();
        let remaining = timer.estimate_remaining(plan.acquisition_runs - (pass - 1));
        plan.state.update(|s| {
            s.mean_pass = timer.mean_pass();
            s.estimated_remaining = remaining;
        });
        info!(pass, runs = plan.acquisition_runs, "acquisition pass");
        plan.light.run(&ctx, token).await?;
    }

    if plan.needs_calibration {
        let confirmed = plan
            .notifier
            .yes_no(
                "Calibration",
                "Take bias and dark frames for this target now?",
            )
            .await;
        if confirmed {
            run_calibration(plan, JobKind::Bias, &plan.bias).await?;
            run_calibration(plan, JobKind::Dark, &plan.dark).await?;
            plan.state.update(|s| s.needs_calibration = false);
        } else {
            info!("calibration declined, keeping it pending");
        }
    }

    let state = plan.state.snapshot();
    info!(
        frames = state.cumulative_progress,
        total = state.total,
        "run complete"
    );
    plan.notifier
        .info(
            "Run complete",
            &format!(
                "Acquired {} of {} camera frames.",
                state.cumulative_progress, state.total
            ),
        )
        .await;
    Ok(())
}

async fn run_calibration(plan: &RunPlan, kind: JobKind, job: &Job) -> ObsResult<()> {
    let ctx = job_context(plan, kind);
    plan.state.update(|s| {
        s.progress = 0;
        s.current_job_name = Some(job.name().to_string());
    });
    debug!(job = job.name(), kind = %kind, "running calibration job");
    job.initialize(&ctx, &plan.token).await?;
    job.run(&ctx, &plan.token).await
}

fn job_context(plan: &RunPlan, kind: JobKind) -> JobContext {
    JobContext::new(
        plan.run_id,
        plan.target_name.clone(),
        kind,
        plan.cameras.clone(),
        plan.motor.clone(),
        plan.motor_config.clone(),
        plan.settings_snapshot.clone(),
        plan.state.clone(),
    )
}
