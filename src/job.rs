//! A parsed job: an ordered action list built once from a script.

use crate::actions::{ActionKind, JobAction};
use crate::cancel::CancelToken;
use crate::context::JobContext;
use crate::error::ObsResult;
use crate::script;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use tracing::{debug, info};

/// An immutable sequence of actions. Built once from a script file or
/// stream, then shared read-only between the manager and its run task.
#[derive(Debug, Clone)]
pub struct Job {
    name: String,
    actions: Vec<JobAction>,
}

impl Job {
    pub fn new(name: impl Into<String>, actions: Vec<JobAction>) -> Self {
        Self {
            name: name.into(),
            actions,
        }
    }

    /// Parse a job from a script byte stream.
    pub fn from_reader<R: io::Read>(name: impl Into<String>, reader: R) -> ObsResult<Self> {
        Ok(Self::new(name, script::parse_script(reader)?))
    }

    /// Parse a job from a script file, named after the file stem.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ObsResult<Self> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("job")
            .to_string();
        let file = File::open(path)?;
        Self::from_reader(name, BufReader::new(file))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn actions(&self) -> &[JobAction] {
        &self.actions
    }

    /// One-time setup: every top-level action in order. Motor actions home
    /// the wave plate here; repeats set up their children.
    pub async fn initialize(&self, ctx: &JobContext, token: &CancelToken) -> ObsResult<()> {
        debug!(job = %self.name, "initializing job");
        for action in &self.actions {
            token.ensure_active()?;
            action.initialize(ctx, token).await?;
        }
        Ok(())
    }

    /// Execute every action strictly in order, each one completing before
    /// the next starts.
    pub async fn run(&self, ctx: &JobContext, token: &CancelToken) -> ObsResult<()> {
        info!(job = %self.name, actions = self.actions.len(), "running job");
        for (index, action) in self.actions.iter().enumerate() {
            token.ensure_active()?;
            debug!(job = %self.name, index, action = %action, "executing action");
            action.execute(ctx, token).await?;
        }
        Ok(())
    }

    pub fn contains_action(&self, kind: ActionKind) -> bool {
        self.actions.iter().any(|a| a.contains(kind))
    }

    /// Total number of `kind` actions one full run executes, recursing into
    /// repeat blocks.
    pub fn count_actions(&self, kind: ActionKind) -> u32 {
        self.actions.iter().map(|a| a.count(kind)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MotorConfig;
    use crate::error::ObsError;
    use crate::hardware::camera::Camera;
    use crate::hardware::mock::{MockCamera, MockStepMotor, OperationLog};
    use crate::hardware::motor::StepMotor;
    use crate::hardware::AcquisitionSettings;
    use crate::manager::StateHandle;
    use crate::target::JobKind;
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    const SCRIPT: &str = r#"{
        "Actions": [
            { "motor": "rotate" },
            { "camera": "expose" },
            { "repeat": {
                "Actions": [ { "camera": "expose" } ],
                "Repeats": 2
            } }
        ]
    }"#;

    fn context(
        cameras: Vec<Arc<dyn Camera>>,
        motor: Option<Arc<dyn StepMotor>>,
    ) -> JobContext {
        let mut settings = HashMap::new();
        for camera in &cameras {
            settings.insert(
                camera.camera_id().to_string(),
                AcquisitionSettings::with_exposure(Duration::from_millis(1)),
            );
        }
        let (state, _rx) = StateHandle::new();
        JobContext::new(
            Uuid::new_v4(),
            "test-star",
            JobKind::Light,
            cameras,
            motor,
            MotorConfig::default(),
            settings,
            state,
        )
    }

    #[test]
    fn counts_recurse_through_repeats() {
        let job = Job::from_reader("light", SCRIPT.as_bytes()).expect("parse");
        assert_eq!(job.count_actions(ActionKind::Camera), 3);
        assert_eq!(job.count_actions(ActionKind::Motor), 1);
        assert!(job.contains_action(ActionKind::Motor));
        assert!(!job.contains_action(ActionKind::Delay));
    }

    #[test]
    fn from_file_names_the_job_after_the_stem() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("linear.job");
        let mut file = File::create(&path).expect("create");
        file.write_all(SCRIPT.as_bytes()).expect("write");
        drop(file);

        let job = Job::from_file(&path).expect("parse");
        assert_eq!(job.name(), "linear");
        assert_eq!(job.actions().len(), 3);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = Job::from_file("does/not/exist.job");
        assert!(matches!(err, Err(ObsError::Io(_))));
    }

    #[test]
    fn malformed_script_is_a_parse_error() {
        let err = Job::from_reader("broken", "{ \"Actions\": [ { \"x\": 1 } ] }".as_bytes());
        assert!(matches!(err, Err(ObsError::Parse(_))));
    }

    #[tokio::test]
    async fn initialize_homes_the_motor_once() {
        let motor = Arc::new(MockStepMotor::new());
        let job = Job::from_reader("light", SCRIPT.as_bytes()).expect("parse");
        let ctx = context(Vec::new(), Some(Arc::clone(&motor) as Arc<dyn StepMotor>));

        job.initialize(&ctx, &CancelToken::never())
            .await
            .expect("initialize");
        assert_eq!(motor.reference_return_count(), 1);
        assert_eq!(motor.move_count(), 0);
    }

    #[tokio::test]
    async fn run_executes_actions_in_order() {
        let log = OperationLog::new();
        let motor = Arc::new(MockStepMotor::new().with_log(log.clone()));
        let camera = Arc::new(MockCamera::new("cam-1").with_log(log.clone()));
        let job = Job::from_reader("light", SCRIPT.as_bytes()).expect("parse");
        let ctx = context(
            vec![camera as Arc<dyn Camera>],
            Some(motor as Arc<dyn StepMotor>),
        );

        job.run(&ctx, &CancelToken::never()).await.expect("run");

        let entries = log.entries();
        assert_eq!(entries.len(), 4);
        assert!(entries[0].starts_with("motor move-to"));
        assert_eq!(entries[1], "cam-1 expose");
        assert_eq!(entries[2], "cam-1 expose");
        assert_eq!(entries[3], "cam-1 expose");
        assert_eq!(ctx.state().snapshot().progress, 3);
    }
}
