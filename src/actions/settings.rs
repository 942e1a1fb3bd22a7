//! Push the cached per-camera acquisition settings to the hardware.

use crate::cancel::CancelToken;
use crate::context::JobContext;
use crate::error::{ObsError, ObsResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

static GRAMMAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(?:settings/)?apply$").expect("settings grammar"));

/// Structured form of a settings command, an alternative to the textual
/// `apply`: `{"Cameras": ["cam-1", "cam-2"]}` addresses only those cameras.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SettingsRecord {
    #[serde(default)]
    pub cameras: Option<Vec<String>>,
}

/// Apply the snapshot settings to the device, typically before the first
/// exposure of a job. Addresses every attached camera unless a subset is
/// named.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SettingsAction {
    pub cameras: Option<Vec<String>>,
}

impl SettingsAction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Address only the named cameras; `None` means all of them.
    pub fn for_cameras(cameras: Option<Vec<String>>) -> Self {
        Self { cameras }
    }

    fn addresses(&self, camera_id: &str) -> bool {
        self.cameras
            .as_ref()
            .map_or(true, |subset| subset.iter().any(|id| id == camera_id))
    }

    pub async fn execute(&self, ctx: &JobContext, token: &CancelToken) -> ObsResult<()> {
        // A named camera that is not attached is a setup bug, not something
        // to skip over silently.
        if let Some(subset) = &self.cameras {
            for name in subset {
                if !ctx.cameras().iter().any(|c| c.camera_id() == name) {
                    return Err(ObsError::Configuration(format!(
                        "camera '{name}' is not attached"
                    )));
                }
            }
        }

        for camera in ctx.cameras() {
            token.ensure_active()?;
            if !self.addresses(camera.camera_id()) {
                continue;
            }
            let settings = ctx.settings_for(camera.camera_id())?.clone();
            debug!(
                camera = camera.camera_id(),
                exposure = ?settings.exposure,
                gain = settings.gain,
                "applying acquisition settings"
            );
            camera.apply_settings(settings).await?;
        }
        Ok(())
    }
}

impl FromStr for SettingsAction {
    type Err = ObsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if GRAMMAR.is_match(s.trim()) {
            Ok(SettingsAction::new())
        } else {
            Err(ObsError::Parse(format!("invalid settings command '{s}'")))
        }
    }
}

impl fmt::Display for SettingsAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cameras {
            Some(subset) => write!(f, "settings: apply {}", subset.join(", ")),
            None => f.write_str("settings: apply"),
        }
    }
}
