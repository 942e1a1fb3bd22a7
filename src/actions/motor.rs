//! Wave-plate rotation and reset.
//!
//! The plate sits on a stepper counted in controller units. A `rotate`
//! advances the counter by `step = angle_units_per_rotation × parameter`;
//! `n_steps` such steps make one full plate revolution, so the published
//! angle moves in increments of `360 / n_steps` degrees. A `reset` drives
//! the counter forward to the next full-revolution multiple, or re-homes
//! when that would bring the counter near the controller's position ceiling.
//!
//! Every hardware round-trip goes through the bounded retry helper.

use crate::cancel::CancelToken;
use crate::config::MotorConfig;
use crate::context::JobContext;
use crate::error::{ObsError, ObsResult};
use crate::hardware::motor::{AxisParameter, StepMotor};
use crate::retry::retry;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

static GRAMMAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:motor/)?(rotate|reset)(?:\s+(-?\d+(?:\.\d+)?))?$").expect("motor grammar")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorKind {
    Rotate,
    Reset,
}

/// Structured form of a motor command, an alternative to the textual
/// grammar: `{"Type": "rotate", "Parameter": 2, "NSteps": 8}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MotorRecord {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(default)]
    pub parameter: Option<f64>,
    #[serde(default)]
    pub n_steps: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MotorAction {
    pub kind: MotorKind,
    /// Step scale: counter units moved per command are
    /// `angle_units_per_rotation × parameter`, rounded.
    pub parameter: f64,
    /// Steps per full revolution override; the configured value applies
    /// when absent.
    pub n_steps: Option<i32>,
}

impl MotorAction {
    pub fn rotate(parameter: f64) -> Self {
        Self {
            kind: MotorKind::Rotate,
            parameter,
            n_steps: None,
        }
    }

    pub fn reset() -> Self {
        Self {
            kind: MotorKind::Reset,
            parameter: 0.0,
            n_steps: None,
        }
    }

    pub fn from_record(record: &MotorRecord) -> ObsResult<Self> {
        let kind = match record.kind.trim().to_ascii_lowercase().as_str() {
            "rotate" => MotorKind::Rotate,
            "reset" => MotorKind::Reset,
            other => {
                return Err(ObsError::Parse(format!(
                    "unknown motor action type '{other}'"
                )))
            }
        };
        Ok(Self {
            kind,
            parameter: record.parameter.unwrap_or_else(|| default_parameter(kind)),
            n_steps: record.n_steps,
        })
    }

    fn effective_n_steps(&self, cfg: &MotorConfig) -> i32 {
        self.n_steps.unwrap_or(cfg.n_steps)
    }

    /// Counter units one command moves. Zero for a default reset.
    fn step(&self, cfg: &MotorConfig) -> i32 {
        (cfg.angle_units_per_rotation as f64 * self.parameter).round() as i32
    }

    /// Counter units of one full plate revolution under this action's
    /// geometry. Falls back to the unit step scale when `step` is zero, so a
    /// reset still has a well-defined revolution span.
    fn rotation_modulus(&self, cfg: &MotorConfig) -> i32 {
        let unit = match self.step(cfg) {
            0 => cfg.angle_units_per_rotation,
            step => step.abs(),
        };
        unit * self.effective_n_steps(cfg)
    }

    fn one_step_angle(&self, cfg: &MotorConfig) -> f64 {
        360.0 / self.effective_n_steps(cfg) as f64
    }

    /// Plate angle in degrees for a raw counter position, normalized to
    /// `[0, 360)`.
    fn angle_of(&self, cfg: &MotorConfig, pos: i32) -> f64 {
        let unit = match self.step(cfg) {
            0 => cfg.angle_units_per_rotation,
            step => step.abs(),
        };
        let wrapped = pos.rem_euclid(self.rotation_modulus(cfg));
        self.one_step_angle(cfg) * wrapped as f64 / unit as f64
    }

    /// Reference search (homing).
    ///
    /// With backtracking enabled, the reference return is repeated up to the
    /// configured attempt budget until the reference switch confirms; a
    /// search that does not converge is logged and execution proceeds from
    /// whatever position was reached.
    pub async fn initialize(&self, ctx: &JobContext, token: &CancelToken) -> ObsResult<()> {
        let motor = ctx.motor()?;
        let cfg = ctx.motor_config();
        let retries = ctx.retries();

        if !cfg.backtracking_homing {
            debug!("homing wave plate with a single reference return");
            retry(retries, token, || motor.reference_return(token)).await?;
            ctx.publish_motor_position(0.0, 0.0);
            return Ok(());
        }

        let budget = cfg.reference_search_max_attempts.max(1);
        for attempt in 1..=budget {
            token.ensure_active()?;
            debug!(attempt, budget, "homing wave plate");
            retry(retries, token, || motor.reference_return(token)).await?;
            let status = retry(retries, token, || {
                motor.axis_parameter(AxisParameter::ReferenceSwitchStatus)
            })
            .await?;
            if status == cfg.reference_switch_expected {
                debug!(attempt, "reference switch confirmed");
                ctx.publish_motor_position(0.0, 0.0);
                return Ok(());
            }
            warn!(
                attempt,
                status,
                expected = cfg.reference_switch_expected,
                "reference switch not confirmed after return"
            );
        }

        // Fail-soft: the plate is close enough to home to be useful, and an
        // aborted night costs more than a degraded zero point.
        warn!(budget, "reference search did not converge, continuing");
        Ok(())
    }

    pub async fn execute(&self, ctx: &JobContext, token: &CancelToken) -> ObsResult<()> {
        let motor = ctx.motor()?;
        match self.kind {
            MotorKind::Rotate => self.run_rotate(ctx, motor, token).await,
            MotorKind::Reset => self.run_reset(ctx, motor, token).await,
        }
    }

    async fn run_rotate(
        &self,
        ctx: &JobContext,
        motor: &Arc<dyn StepMotor>,
        token: &CancelToken,
    ) -> ObsResult<()> {
        let cfg = ctx.motor_config();
        let retries = ctx.retries();
        let step = self.step(cfg);

        token.ensure_active()?;
        let pos = retry(retries, token, || motor.actual_position()).await?;
        let target = pos + step;
        debug!(from = pos, to = target, step, "rotating wave plate");
        retry(retries, token, || motor.move_to(target)).await?;
        retry(retries, token, || motor.wait_for_position(token)).await?;

        let actual = retry(retries, token, || motor.actual_position()).await?;
        let true_pos = retry(retries, token, || motor.true_position()).await?;
        if step != 0 {
            let commanded = self.angle_of(cfg, actual);
            let reached = self.angle_of(cfg, true_pos);
            debug!(angle = commanded, actual_angle = reached, "wave plate rotated");
            ctx.publish_motor_position(commanded, reached);
        }
        Ok(())
    }

    async fn run_reset(
        &self,
        ctx: &JobContext,
        motor: &Arc<dyn StepMotor>,
        token: &CancelToken,
    ) -> ObsResult<()> {
        let cfg = ctx.motor_config();
        let retries = ctx.retries();
        let modulus = self.rotation_modulus(cfg);

        token.ensure_active()?;
        let pos = retry(retries, token, || motor.actual_position()).await?;
        let zero_pos = next_multiple_of(pos, modulus);

        let headroom = zero_pos.unsigned_abs() as u64 + modulus.unsigned_abs() as u64;
        if headroom >= u64::from(cfg.max_position) {
            // One more revolution would approach the controller's counter
            // ceiling; re-establish zero instead of moving further out.
            debug!(position = pos, zero_pos, "counter near ceiling, re-homing");
            self.initialize(ctx, token).await?;
        } else if zero_pos != pos {
            debug!(from = pos, to = zero_pos, "resetting wave plate");
            retry(retries, token, || motor.move_to(zero_pos)).await?;
            retry(retries, token, || motor.wait_for_position(token)).await?;
        } else {
            debug!(position = pos, "wave plate already at a revolution multiple");
        }

        let actual = retry(retries, token, || motor.actual_position()).await?;
        let true_pos = retry(retries, token, || motor.true_position()).await?;
        ctx.publish_motor_position(self.angle_of(cfg, actual), self.angle_of(cfg, true_pos));
        Ok(())
    }
}

fn default_parameter(kind: MotorKind) -> f64 {
    match kind {
        MotorKind::Rotate => 1.0,
        MotorKind::Reset => 0.0,
    }
}

/// Smallest multiple of `modulus` greater than or equal to `pos`.
fn next_multiple_of(pos: i32, modulus: i32) -> i32 {
    let rem = pos.rem_euclid(modulus);
    if rem == 0 {
        pos
    } else {
        pos + (modulus - rem)
    }
}

impl FromStr for MotorAction {
    type Err = ObsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = GRAMMAR
            .captures(s.trim())
            .ok_or_else(|| ObsError::Parse(format!("invalid motor command '{s}'")))?;
        let kind = match captures[1].to_ascii_lowercase().as_str() {
            "rotate" => MotorKind::Rotate,
            _ => MotorKind::Reset,
        };
        let parameter = match captures.get(2) {
            Some(arg) => arg
                .as_str()
                .parse::<f64>()
                .map_err(|e| ObsError::Parse(format!("invalid motor parameter '{s}': {e}")))?,
            None => default_parameter(kind),
        };
        Ok(Self {
            kind,
            parameter,
            n_steps: None,
        })
    }
}

impl fmt::Display for MotorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            MotorKind::Rotate => write!(f, "motor: rotate x{}", self.parameter),
            MotorKind::Reset => f.write_str("motor: reset"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::mock::MockStepMotor;
    use crate::hardware::AcquisitionSettings;
    use crate::manager::StateHandle;
    use crate::target::JobKind;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn context(motor: Arc<MockStepMotor>, cfg: MotorConfig) -> JobContext {
        let (state, _rx) = StateHandle::new();
        JobContext::new(
            Uuid::new_v4(),
            "test-star",
            JobKind::Light,
            Vec::new(),
            Some(motor),
            cfg,
            HashMap::<String, AcquisitionSettings>::new(),
            state,
        )
    }

    #[test]
    fn grammar_parses_rotate_and_reset() {
        let rotate = "rotate".parse::<MotorAction>().expect("parse");
        assert_eq!(rotate.kind, MotorKind::Rotate);
        assert!((rotate.parameter - 1.0).abs() < f64::EPSILON);

        let scaled = "motor/Rotate 2.5".parse::<MotorAction>().expect("parse");
        assert!((scaled.parameter - 2.5).abs() < f64::EPSILON);

        let reset = "RESET".parse::<MotorAction>().expect("parse");
        assert_eq!(reset.kind, MotorKind::Reset);
        assert!((reset.parameter - 0.0).abs() < f64::EPSILON);

        assert!("rotate fast".parse::<MotorAction>().is_err());
        assert!("spin 2".parse::<MotorAction>().is_err());
    }

    #[test]
    fn record_form_matches_textual_form() {
        let record: MotorRecord = serde_json::from_str(
            r#"{"Type": "rotate", "Parameter": 2.0, "NSteps": 8}"#,
        )
        .expect("record");
        let action = MotorAction::from_record(&record).expect("action");
        assert_eq!(action.kind, MotorKind::Rotate);
        assert!((action.parameter - 2.0).abs() < f64::EPSILON);
        assert_eq!(action.n_steps, Some(8));

        let bare: MotorRecord =
            serde_json::from_str(r#"{"Type": "reset"}"#).expect("record");
        let action = MotorAction::from_record(&bare).expect("action");
        assert_eq!(action.kind, MotorKind::Reset);
        assert!((action.parameter - 0.0).abs() < f64::EPSILON);
        assert_eq!(action.n_steps, None);

        let unknown: MotorRecord =
            serde_json::from_str(r#"{"Type": "wiggle"}"#).expect("record");
        assert!(MotorAction::from_record(&unknown).is_err());
    }

    #[test]
    fn next_multiple_rounds_up() {
        assert_eq!(next_multiple_of(0, 51_200), 0);
        assert_eq!(next_multiple_of(1, 51_200), 51_200);
        assert_eq!(next_multiple_of(51_200, 51_200), 51_200);
        assert_eq!(next_multiple_of(51_201, 51_200), 102_400);
        assert_eq!(next_multiple_of(-100, 51_200), 0);
    }

    #[test]
    fn angle_wraps_every_full_revolution() {
        let cfg = MotorConfig::default();
        let action = MotorAction::rotate(1.0);
        // One unit step of 3200 counts is 360/16 = 22.5 degrees.
        assert!((action.angle_of(&cfg, 0) - 0.0).abs() < 1e-9);
        assert!((action.angle_of(&cfg, 3200) - 22.5).abs() < 1e-9);
        assert!((action.angle_of(&cfg, 6400) - 45.0).abs() < 1e-9);
        assert!((action.angle_of(&cfg, 51_200) - 0.0).abs() < 1e-9);
        assert!((action.angle_of(&cfg, 54_400) - 22.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rotate_moves_by_one_step_and_publishes_the_angle() {
        let motor = Arc::new(MockStepMotor::new());
        let ctx = context(Arc::clone(&motor), MotorConfig::default());
        let token = CancelToken::never();

        MotorAction::rotate(1.0)
            .execute(&ctx, &token)
            .await
            .expect("rotate");

        assert_eq!(motor.current_position(), 3200);
        assert_eq!(motor.move_count(), 1);
        let state = ctx.state().snapshot();
        assert!((state.motor_position - 22.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn reset_at_a_revolution_multiple_does_not_move() {
        let motor = Arc::new(MockStepMotor::new().with_position(51_200));
        let ctx = context(Arc::clone(&motor), MotorConfig::default());
        let token = CancelToken::never();

        MotorAction::reset().execute(&ctx, &token).await.expect("reset");

        assert_eq!(motor.move_count(), 0);
        assert_eq!(motor.current_position(), 51_200);
        let state = ctx.state().snapshot();
        assert!((state.motor_position - 0.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn reset_moves_forward_to_the_next_multiple() {
        let motor = Arc::new(MockStepMotor::new().with_position(3200));
        let ctx = context(Arc::clone(&motor), MotorConfig::default());
        let token = CancelToken::never();

        MotorAction::reset().execute(&ctx, &token).await.expect("reset");

        assert_eq!(motor.current_position(), 51_200);
        assert_eq!(motor.move_count(), 1);
    }

    #[tokio::test]
    async fn reset_near_the_counter_ceiling_rehomes() {
        let cfg = MotorConfig {
            max_position: 110_000,
            ..MotorConfig::default()
        };
        let motor = Arc::new(MockStepMotor::new().with_position(51_300));
        let ctx = context(Arc::clone(&motor), cfg);
        let token = CancelToken::never();

        // Next multiple is 102,400; another revolution would pass 110,000.
        MotorAction::reset().execute(&ctx, &token).await.expect("reset");

        assert_eq!(motor.reference_return_count(), 1);
        assert_eq!(motor.move_count(), 0);
        assert_eq!(motor.current_position(), 0);
    }

    #[tokio::test]
    async fn homing_repeats_until_the_switch_confirms() {
        let motor = Arc::new(MockStepMotor::new().with_switch_after_returns(3));
        let ctx = context(Arc::clone(&motor), MotorConfig::default());
        let token = CancelToken::never();

        MotorAction::rotate(1.0)
            .initialize(&ctx, &token)
            .await
            .expect("homing");

        assert_eq!(motor.reference_return_count(), 3);
    }

    #[tokio::test]
    async fn homing_that_never_converges_proceeds_after_the_budget() {
        let motor = Arc::new(MockStepMotor::new().with_switch_after_returns(u32::MAX));
        let ctx = context(Arc::clone(&motor), MotorConfig::default());
        let token = CancelToken::never();

        MotorAction::rotate(1.0)
            .initialize(&ctx, &token)
            .await
            .expect("fail-soft homing");

        assert_eq!(
            motor.reference_return_count(),
            MotorConfig::default().reference_search_max_attempts
        );
    }

    #[tokio::test]
    async fn transient_motor_faults_are_retried() {
        let motor = Arc::new(MockStepMotor::new());
        motor.fail_next_calls(2);
        let ctx = context(Arc::clone(&motor), MotorConfig::default());
        let token = CancelToken::never();

        MotorAction::rotate(1.0)
            .execute(&ctx, &token)
            .await
            .expect("rotate despite transient faults");
        assert_eq!(motor.current_position(), 3200);
    }
}
