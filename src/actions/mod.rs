//! Executable job actions.
//!
//! A job script parses into a tree of [`JobAction`]s. Leaf actions perform
//! one hardware step (expose, rotate, shutter change, delay, settings push);
//! [`RepeatAction`] nests an ordered child sequence. Execution is strictly
//! sequential and cancellation-aware; the enum dispatches through boxed
//! futures because repeats recurse.

pub mod camera;
pub mod delay;
pub mod motor;
pub mod repeat;
pub mod settings;
pub mod shutter;

pub use camera::CameraAction;
pub use delay::DelayAction;
pub use motor::{MotorAction, MotorKind, MotorRecord};
pub use repeat::RepeatAction;
pub use settings::{SettingsAction, SettingsRecord};
pub use shutter::ShutterAction;

use crate::cancel::CancelToken;
use crate::context::JobContext;
use crate::error::ObsResult;
use futures::future::{BoxFuture, FutureExt};
use std::fmt;

/// Discriminant of a [`JobAction`], used for counting and validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Camera,
    Motor,
    Shutter,
    Delay,
    Settings,
    Repeat,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Camera => "camera",
            ActionKind::Motor => "motor",
            ActionKind::Shutter => "shutter",
            ActionKind::Delay => "delay",
            ActionKind::Settings => "settings",
            ActionKind::Repeat => "repeat",
        };
        f.write_str(name)
    }
}

/// One parsed step of a job script.
#[derive(Debug, Clone, PartialEq)]
pub enum JobAction {
    Camera(CameraAction),
    Motor(MotorAction),
    Shutter(ShutterAction),
    Delay(DelayAction),
    Settings(SettingsAction),
    Repeat(RepeatAction),
}

impl JobAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            JobAction::Camera(_) => ActionKind::Camera,
            JobAction::Motor(_) => ActionKind::Motor,
            JobAction::Shutter(_) => ActionKind::Shutter,
            JobAction::Delay(_) => ActionKind::Delay,
            JobAction::Settings(_) => ActionKind::Settings,
            JobAction::Repeat(_) => ActionKind::Repeat,
        }
    }

    /// One-time setup before a job runs. Only motor actions (reference
    /// search) and repeats (which set up their children) do anything here.
    pub fn initialize<'a>(
        &'a self,
        ctx: &'a JobContext,
        token: &'a CancelToken,
    ) -> BoxFuture<'a, ObsResult<()>> {
        match self {
            JobAction::Motor(action) => action.initialize(ctx, token).boxed(),
            JobAction::Repeat(action) => action.initialize(ctx, token).boxed(),
            _ => async { Ok(()) }.boxed(),
        }
    }

    /// Execute this action to completion. Boxed because repeats recurse.
    pub fn execute<'a>(
        &'a self,
        ctx: &'a JobContext,
        token: &'a CancelToken,
    ) -> BoxFuture<'a, ObsResult<()>> {
        match self {
            JobAction::Camera(action) => action.execute(ctx, token).boxed(),
            JobAction::Motor(action) => action.execute(ctx, token).boxed(),
            JobAction::Shutter(action) => action.execute(ctx, token).boxed(),
            JobAction::Delay(action) => action.execute(ctx, token).boxed(),
            JobAction::Settings(action) => action.execute(ctx, token).boxed(),
            JobAction::Repeat(action) => action.execute(ctx, token).boxed(),
        }
    }

    /// Number of actions of `kind` this step will execute, recursing into
    /// repeats and multiplying by their repeat count.
    pub fn count(&self, kind: ActionKind) -> u32 {
        match self {
            JobAction::Repeat(action) => {
                let own = u32::from(kind == ActionKind::Repeat);
                own + action.count(kind)
            }
            other => u32::from(other.kind() == kind),
        }
    }

    /// Whether this step or any nested child is of `kind`.
    pub fn contains(&self, kind: ActionKind) -> bool {
        match self {
            JobAction::Repeat(action) => kind == ActionKind::Repeat || action.contains(kind),
            other => other.kind() == kind,
        }
    }
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobAction::Camera(action) => action.fmt(f),
            JobAction::Motor(action) => action.fmt(f),
            JobAction::Shutter(action) => action.fmt(f),
            JobAction::Delay(action) => action.fmt(f),
            JobAction::Settings(action) => action.fmt(f),
            JobAction::Repeat(action) => action.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn counting_multiplies_through_nested_repeats() {
        let inner = RepeatAction::new(
            vec![
                JobAction::Camera(CameraAction::new()),
                JobAction::Delay(DelayAction::new(Duration::from_millis(10))),
            ],
            3,
        );
        let outer = JobAction::Repeat(RepeatAction::new(
            vec![
                JobAction::Camera(CameraAction::new()),
                JobAction::Repeat(inner),
            ],
            2,
        ));

        // 2 × (1 + 3 × 1) camera frames, 2 × 3 delays.
        assert_eq!(outer.count(ActionKind::Camera), 8);
        assert_eq!(outer.count(ActionKind::Delay), 6);
        assert_eq!(outer.count(ActionKind::Motor), 0);
        assert!(outer.contains(ActionKind::Delay));
        assert!(!outer.contains(ActionKind::Motor));
    }

    #[test]
    fn leaf_counting_is_exact() {
        let action = JobAction::Motor(MotorAction::rotate(2.0));
        assert_eq!(action.count(ActionKind::Motor), 1);
        assert_eq!(action.count(ActionKind::Camera), 0);
        assert!(action.contains(ActionKind::Motor));
    }
}
