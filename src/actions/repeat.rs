//! Ordered child sequence executed a fixed number of times.

use crate::actions::{ActionKind, JobAction};
use crate::cancel::CancelToken;
use crate::context::JobContext;
use crate::error::ObsResult;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct RepeatAction {
    pub actions: Vec<JobAction>,
    pub repeats: u32,
}

impl RepeatAction {
    /// A repeat block always runs at least once.
    pub fn new(actions: Vec<JobAction>, repeats: u32) -> Self {
        Self {
            actions,
            repeats: repeats.max(1),
        }
    }

    /// Set up every child once; nested motor actions still get their
    /// reference search even though they are not top-level.
    pub async fn initialize(&self, ctx: &JobContext, token: &CancelToken) -> ObsResult<()> {
        for child in &self.actions {
            child.initialize(ctx, token).await?;
        }
        Ok(())
    }

    /// Run the whole child sequence, in declared order, `repeats` times.
    pub async fn execute(&self, ctx: &JobContext, token: &CancelToken) -> ObsResult<()> {
        for round in 1..=self.repeats {
            token.ensure_active()?;
            debug!(round, repeats = self.repeats, "repeat round");
            for child in &self.actions {
                child.execute(ctx, token).await?;
            }
        }
        Ok(())
    }

    pub fn count(&self, kind: ActionKind) -> u32 {
        let per_round: u32 = self.actions.iter().map(|a| a.count(kind)).sum();
        self.repeats * per_round
    }

    pub fn contains(&self, kind: ActionKind) -> bool {
        self.actions.iter().any(|a| a.contains(kind))
    }
}

impl fmt::Display for RepeatAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "repeat x{} ({} actions)",
            self.repeats,
            self.actions.len()
        )
    }
}
