//! Expose-on-every-camera step.

use crate::cancel::CancelToken;
use crate::context::JobContext;
use crate::error::{ObsError, ObsResult};
use crate::hardware::ExposureEvent;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

static GRAMMAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:camera/)?expose$").expect("camera grammar"));

/// Trigger one exposure on every attached camera and wait for all of them.
///
/// The step is a barrier: each camera's finished-stream is subscribed before
/// its exposure starts (so an early completion cannot be missed), then all
/// finished events are awaited together. Any camera reporting an error fails
/// the whole step. One completed step advances progress by one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CameraAction;

impl CameraAction {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(&self, ctx: &JobContext, token: &CancelToken) -> ObsResult<()> {
        token.ensure_active()?;

        let mut waiters = Vec::with_capacity(ctx.cameras().len());
        for camera in ctx.cameras() {
            // Subscribe first; a fast camera may finish before the slowest
            // one has even started.
            let mut rx = camera.subscribe_finished();
            let request = ctx.request_for(camera.camera_id())?;
            camera.start_acquisition(request, token).await?;

            let camera_id = camera.camera_id().to_string();
            waiters.push(async move {
                match rx.recv().await {
                    Ok(event) => event_result(event),
                    Err(_) => Err(ObsError::Hardware(format!(
                        "camera '{camera_id}': finished-stream closed"
                    ))),
                }
            });
        }

        let events = tokio::select! {
            events = join_all(waiters) => events,
            _ = token.cancelled() => return Err(ObsError::Cancelled),
        };
        for event in events {
            let event = event?;
            debug!(
                camera = %event.camera_id,
                frame = event.frame_index,
                mean_counts = event.mean_counts,
                "exposure finished"
            );
        }

        ctx.advance_progress();
        Ok(())
    }
}

fn event_result(event: ExposureEvent) -> ObsResult<ExposureEvent> {
    if let Some(message) = &event.error {
        return Err(ObsError::Hardware(format!(
            "camera '{}' exposure failed: {message}",
            event.camera_id
        )));
    }
    Ok(event)
}

impl FromStr for CameraAction {
    type Err = ObsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if GRAMMAR.is_match(s.trim()) {
            Ok(CameraAction::new())
        } else {
            Err(ObsError::Parse(format!("invalid camera command '{s}'")))
        }
    }
}

impl fmt::Display for CameraAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("camera: expose")
    }
}
