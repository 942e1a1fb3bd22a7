//! Shutter-mode changes across all cameras.

use crate::cancel::CancelToken;
use crate::context::JobContext;
use crate::error::{ObsError, ObsResult};
use crate::hardware::ShutterMode;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

static GRAMMAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:shutter/)?(open|close|auto)(?:\s+(internal|external|all))?$")
        .expect("shutter grammar")
});

/// Set the internal and/or external shutter of every camera.
///
/// A side is only commanded when the requested mode differs from the
/// camera's current one. Addressing the external shutter of a camera that
/// has none fails the action; calibration scripts rely on that rather than
/// silently exposing to sky.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutterAction {
    pub internal: Option<ShutterMode>,
    pub external: Option<ShutterMode>,
}

impl ShutterAction {
    pub fn internal(mode: ShutterMode) -> Self {
        Self {
            internal: Some(mode),
            external: None,
        }
    }

    pub fn external(mode: ShutterMode) -> Self {
        Self {
            internal: None,
            external: Some(mode),
        }
    }

    pub fn all(mode: ShutterMode) -> Self {
        Self {
            internal: Some(mode),
            external: Some(mode),
        }
    }

    pub async fn execute(&self, ctx: &JobContext, token: &CancelToken) -> ObsResult<()> {
        for camera in ctx.cameras() {
            token.ensure_active()?;
            let state = camera.shutter_state().await?;

            if let Some(mode) = self.internal {
                if state.internal != mode {
                    debug!(camera = camera.camera_id(), %mode, "setting internal shutter");
                    camera.set_internal_shutter(mode).await?;
                }
            }

            if let Some(mode) = self.external {
                if !camera.capabilities().has_external_shutter {
                    return Err(ObsError::Hardware(format!(
                        "camera '{}' has no external shutter",
                        camera.camera_id()
                    )));
                }
                if state.external != Some(mode) {
                    debug!(camera = camera.camera_id(), %mode, "setting external shutter");
                    camera.set_external_shutter(mode).await?;
                }
            }
        }
        Ok(())
    }
}

impl FromStr for ShutterAction {
    type Err = ObsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = GRAMMAR
            .captures(s.trim())
            .ok_or_else(|| ObsError::Parse(format!("invalid shutter command '{s}'")))?;
        let mode = ShutterMode::from_verb(&captures[1])
            .ok_or_else(|| ObsError::Parse(format!("invalid shutter verb in '{s}'")))?;

        let action = match captures.get(2).map(|side| side.as_str().to_ascii_lowercase()) {
            Some(side) if side == "internal" => Self::internal(mode),
            Some(side) if side == "external" => Self::external(mode),
            // "all" and the bare verb both address every shutter.
            _ => Self::all(mode),
        };
        Ok(action)
    }
}

impl fmt::Display for ShutterAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.internal, self.external) {
            (Some(a), Some(b)) if a == b => write!(f, "shutter: {a} all"),
            (Some(a), Some(b)) => write!(f, "shutter: {a} internal, {b} external"),
            (Some(a), None) => write!(f, "shutter: {a} internal"),
            (None, Some(b)) => write!(f, "shutter: {b} external"),
            (None, None) => f.write_str("shutter: no-op"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MotorConfig;
    use crate::hardware::camera::Camera;
    use crate::hardware::mock::{MockCamera, OperationLog};
    use crate::manager::StateHandle;
    use crate::target::JobKind;
    use std::collections::HashMap;
    use std::sync::Arc;
    use uuid::Uuid;

    fn context(cameras: Vec<Arc<dyn Camera>>) -> JobContext {
        let (state, _rx) = StateHandle::new();
        JobContext::new(
            Uuid::new_v4(),
            "test-star",
            JobKind::Light,
            cameras,
            None,
            MotorConfig::default(),
            HashMap::new(),
            state,
        )
    }

    #[test]
    fn grammar_covers_verb_and_side() {
        let action = "open all".parse::<ShutterAction>().expect("parse");
        assert_eq!(action.internal, Some(ShutterMode::Open));
        assert_eq!(action.external, Some(ShutterMode::Open));

        let action = "Close internal".parse::<ShutterAction>().expect("parse");
        assert_eq!(action.internal, Some(ShutterMode::Closed));
        assert_eq!(action.external, None);

        let action = "shutter/auto external".parse::<ShutterAction>().expect("parse");
        assert_eq!(action.internal, None);
        assert_eq!(action.external, Some(ShutterMode::Auto));

        // Bare verb addresses every shutter.
        let action = "open".parse::<ShutterAction>().expect("parse");
        assert_eq!(action.internal, Some(ShutterMode::Open));
        assert_eq!(action.external, Some(ShutterMode::Open));

        assert!("open both".parse::<ShutterAction>().is_err());
        assert!("shut internal".parse::<ShutterAction>().is_err());
    }

    #[tokio::test]
    async fn commands_only_sides_whose_mode_differs() {
        let log = OperationLog::new();
        let camera = Arc::new(MockCamera::new("cam-1").with_log(log.clone()));
        let ctx = context(vec![camera]);
        let token = CancelToken::never();

        let action = ShutterAction::internal(ShutterMode::Closed);
        action.execute(&ctx, &token).await.expect("first change");
        // Already closed, so the second pass issues nothing.
        action.execute(&ctx, &token).await.expect("second change");

        assert_eq!(log.count_with_prefix("cam-1 shutter-internal"), 1);
    }

    #[tokio::test]
    async fn external_side_requires_the_capability() {
        let ctx = context(vec![Arc::new(MockCamera::new("cam-1"))]);
        let token = CancelToken::never();

        let err = ShutterAction::external(ShutterMode::Open)
            .execute(&ctx, &token)
            .await;
        assert!(matches!(err, Err(ObsError::Hardware(_))));
    }

    #[tokio::test]
    async fn external_side_is_set_when_supported() {
        let camera = Arc::new(MockCamera::new("cam-1").with_external_shutter());
        let ctx = context(vec![Arc::clone(&camera) as Arc<dyn Camera>]);
        let token = CancelToken::never();

        ShutterAction::all(ShutterMode::Closed)
            .execute(&ctx, &token)
            .await
            .expect("close all");

        let state = camera.shutter_state().await.expect("state");
        assert_eq!(state.internal, ShutterMode::Closed);
        assert_eq!(state.external, Some(ShutterMode::Closed));
    }
}
