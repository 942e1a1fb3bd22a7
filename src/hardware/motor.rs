//! Step-motor device contract.

use crate::cancel::CancelToken;
use crate::error::ObsResult;
use async_trait::async_trait;

/// Controller axis parameters the engine reads or writes.
///
/// The underlying controllers expose dozens of axis registers; only the ones
/// the job engine touches are modeled here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisParameter {
    /// Raw position counter.
    ActualPosition,
    /// Commanded target position.
    TargetPosition,
    /// State of the physical reference switch, used to confirm homing.
    ReferenceSwitchStatus,
    /// Peak axis speed.
    MaximumSpeed,
}

impl std::fmt::Display for AxisParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AxisParameter::ActualPosition => write!(f, "actual-position"),
            AxisParameter::TargetPosition => write!(f, "target-position"),
            AxisParameter::ReferenceSwitchStatus => write!(f, "reference-switch-status"),
            AxisParameter::MaximumSpeed => write!(f, "maximum-speed"),
        }
    }
}

/// The wave-plate rotation motor.
///
/// Positions are signed controller counts. `move_to` commands an absolute
/// move and returns immediately; `wait_for_position` suspends until the
/// controller reports the target reached. The "true" position additionally
/// corrects for mechanical backlash and may differ from the raw counter by a
/// few counts after a direction change.
#[async_trait]
pub trait StepMotor: Send + Sync {
    /// Raw position counter.
    async fn actual_position(&self) -> ObsResult<i32>;

    /// Backlash-corrected position.
    async fn true_position(&self) -> ObsResult<i32>;

    /// Command an absolute move. Returns once the command is accepted.
    async fn move_to(&self, position: i32) -> ObsResult<()>;

    /// Wait until the controller reports the commanded position reached.
    async fn wait_for_position(&self, token: &CancelToken) -> ObsResult<()>;

    /// Drive towards the reference switch to establish the absolute zero.
    async fn reference_return(&self, token: &CancelToken) -> ObsResult<()>;

    /// Read a controller axis parameter.
    async fn axis_parameter(&self, param: AxisParameter) -> ObsResult<i32>;

    /// Write a controller axis parameter.
    async fn set_axis_parameter(&self, param: AxisParameter, value: i32) -> ObsResult<()>;
}
