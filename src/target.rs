//! Observation targets, cycle types and scenario script paths.

use crate::error::{ObsError, ObsResult};
use crate::hardware::AcquisitionSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Observation cycle of a target.
///
/// Polarimetric cycles rotate the wave plate between exposures and therefore
/// require a motor; a photometric cycle does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleType {
    Photometric,
    LinearPolarimetry,
    CircularPolarimetry,
}

impl CycleType {
    pub const ALL: [CycleType; 3] = [
        CycleType::Photometric,
        CycleType::LinearPolarimetry,
        CycleType::CircularPolarimetry,
    ];

    /// Key of this cycle in the `[scenarios]` configuration table.
    pub fn config_key(&self) -> &'static str {
        match self {
            CycleType::Photometric => "photometric",
            CycleType::LinearPolarimetry => "linear",
            CycleType::CircularPolarimetry => "circular",
        }
    }

    /// Inverse of [`CycleType::config_key`].
    pub fn from_config_key(key: &str) -> Option<Self> {
        match key {
            "photometric" => Some(CycleType::Photometric),
            "linear" => Some(CycleType::LinearPolarimetry),
            "circular" => Some(CycleType::CircularPolarimetry),
            _ => None,
        }
    }

    /// Whether this cycle needs the wave-plate motor.
    pub fn is_polarimetric(&self) -> bool {
        !matches!(self, CycleType::Photometric)
    }
}

impl fmt::Display for CycleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_key())
    }
}

impl FromStr for CycleType {
    type Err = ObsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "photometric" | "photo" => Ok(CycleType::Photometric),
            "linear" | "linear-polarimetry" => Ok(CycleType::LinearPolarimetry),
            "circular" | "circular-polarimetry" => Ok(CycleType::CircularPolarimetry),
            other => Err(ObsError::Parse(format!(
                "unknown cycle type '{other}', expected photometric, linear or circular"
            ))),
        }
    }
}

/// Which of a scenario's three jobs a run is executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    Light,
    Bias,
    Dark,
}

impl JobKind {
    /// Lowercase name used in frame tags and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Light => "light",
            JobKind::Bias => "bias",
            JobKind::Dark => "dark",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved script paths of one observation scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationScenario {
    pub light: PathBuf,
    pub bias: PathBuf,
    pub dark: PathBuf,
}

impl ObservationScenario {
    pub fn script_for(&self, kind: JobKind) -> &Path {
        match kind {
            JobKind::Light => &self.light,
            JobKind::Bias => &self.bias,
            JobKind::Dark => &self.dark,
        }
    }
}

/// An observation target: the star, its cycle, and the acquisition settings
/// used to materialize per-camera requests before a job runs.
///
/// `shared` applies to every camera; `per_camera` entries override it for a
/// specific camera identity.
#[derive(Debug, Clone)]
pub struct Target {
    pub star_name: String,
    pub cycle_type: CycleType,
    pub shared: AcquisitionSettings,
    pub per_camera: HashMap<String, AcquisitionSettings>,
}

impl Target {
    pub fn new(
        star_name: impl Into<String>,
        cycle_type: CycleType,
        shared: AcquisitionSettings,
    ) -> Self {
        Self {
            star_name: star_name.into(),
            cycle_type,
            shared,
            per_camera: HashMap::new(),
        }
    }

    /// Override the settings of one camera.
    pub fn with_camera_settings(
        mut self,
        camera_id: impl Into<String>,
        settings: AcquisitionSettings,
    ) -> Self {
        self.per_camera.insert(camera_id.into(), settings);
        self
    }

    /// Settings for a camera: its override if present, the shared settings
    /// otherwise.
    pub fn settings_for(&self, camera_id: &str) -> AcquisitionSettings {
        self.per_camera
            .get(camera_id)
            .cloned()
            .unwrap_or_else(|| self.shared.clone())
    }

    pub fn validate(&self) -> ObsResult<()> {
        if self.star_name.trim().is_empty() {
            return Err(ObsError::Configuration(
                "target star name must not be empty".into(),
            ));
        }
        Ok(())
    }
}
