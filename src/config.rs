//! Configuration system using Figment.
//!
//! Strongly-typed settings for the observation engine, loaded from:
//! 1. a TOML file (`config/config.toml` by default),
//! 2. environment variables prefixed with `POLAR_OBS_` (double underscore
//!    separates nesting levels, e.g. `POLAR_OBS_APPLICATION__LOG_LEVEL=debug`).
//!
//! Every section has serde defaults, so a minimal file only needs the
//! `[scenarios]` table mapping each observation cycle to its job scripts.
//!
//! # Example
//! ```no_run
//! use polar_obs::config::Settings;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load_from("config/config.toml")?;
//! settings.validate()?;
//! println!("Application: {}", settings.application.name);
//! # Ok(())
//! # }
//! ```

use crate::error::{ObsError, ObsResult};
use crate::target::{CycleType, ObservationScenario};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Application settings.
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Step-motor geometry and homing parameters.
    #[serde(default)]
    pub motor: MotorConfig,
    /// Camera defaults applied when a target carries no explicit settings.
    #[serde(default)]
    pub camera: CameraConfig,
    /// Observation scenarios keyed by cycle name
    /// (`photometric`, `linear`, `circular`).
    #[serde(default)]
    pub scenarios: HashMap<String, ScenarioConfig>,
}

/// Application-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name.
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Step-motor configuration.
///
/// The wave plate sits on a stepper whose controller counts positions in
/// microsteps. `angle_units_per_rotation` is the number of counter units one
/// unit-scale rotate command spans; `n_steps` such rotations make one full
/// plate revolution, so one command turns the plate by `360 / n_steps`
/// degrees at scale factor 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorConfig {
    /// Rotation steps per full plate revolution.
    #[serde(default = "default_n_steps")]
    pub n_steps: i32,
    /// Position-counter units per unit-scale rotation step.
    #[serde(default = "default_angle_units")]
    pub angle_units_per_rotation: i32,
    /// Absolute position-counter ceiling of the controller. A reset that
    /// would bring the counter within one revolution of this magnitude
    /// re-homes instead of moving, to avoid counter overflow.
    #[serde(default = "default_max_position")]
    pub max_position: u32,
    /// Attempt budget for every motor call.
    #[serde(default = "default_n_retries")]
    pub n_retries: u32,
    /// Attempt budget for the backtracking reference search.
    #[serde(default = "default_reference_attempts")]
    pub reference_search_max_attempts: u32,
    /// Reference-switch status value that confirms a successful homing.
    #[serde(default = "default_reference_switch")]
    pub reference_switch_expected: i32,
    /// Repeat the reference return until the switch status confirms, instead
    /// of trusting a single pass.
    #[serde(default = "default_backtracking")]
    pub backtracking_homing: bool,
}

/// Camera defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Exposure used when a target defines no settings of its own.
    #[serde(default = "default_exposure", with = "humantime_serde")]
    pub default_exposure: Duration,
    /// Gain used when a target defines no settings of its own.
    #[serde(default)]
    pub default_gain: i32,
    /// How many simulated cameras the mock runner attaches.
    #[serde(default = "default_mock_cameras")]
    pub mock_cameras: u32,
}

/// One entry of the `[scenarios]` table: script paths for a cycle type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Acquisition (light-frame) job script.
    pub light: PathBuf,
    /// Bias job script. Defaults to `light` with a `.bias` extension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bias: Option<PathBuf>,
    /// Dark job script. Defaults to `light` with a `.dark` extension.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dark: Option<PathBuf>,
}

impl ScenarioConfig {
    /// Resolve the three script paths, defaulting missing Bias/Dark entries
    /// to the Light path with a swapped file extension.
    pub fn resolve(&self) -> ObservationScenario {
        ObservationScenario {
            light: self.light.clone(),
            bias: self
                .bias
                .clone()
                .unwrap_or_else(|| self.light.with_extension("bias")),
            dark: self
                .dark
                .clone()
                .unwrap_or_else(|| self.light.with_extension("dark")),
        }
    }
}

// Default value functions

fn default_app_name() -> String {
    "polar-obs".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_n_steps() -> i32 {
    16
}

fn default_angle_units() -> i32 {
    3200
}

fn default_max_position() -> u32 {
    1_000_000
}

fn default_n_retries() -> u32 {
    3
}

fn default_reference_attempts() -> u32 {
    4
}

fn default_reference_switch() -> i32 {
    1
}

fn default_backtracking() -> bool {
    true
}

fn default_exposure() -> Duration {
    Duration::from_secs(1)
}

fn default_mock_cameras() -> u32 {
    3
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            n_steps: default_n_steps(),
            angle_units_per_rotation: default_angle_units(),
            max_position: default_max_position(),
            n_retries: default_n_retries(),
            reference_search_max_attempts: default_reference_attempts(),
            reference_switch_expected: default_reference_switch(),
            backtracking_homing: default_backtracking(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            default_exposure: default_exposure(),
            default_gain: 0,
            mock_cameras: default_mock_cameras(),
        }
    }
}

impl Settings {
    /// Load configuration from the default location plus environment
    /// overrides.
    pub fn load() -> ObsResult<Self> {
        Self::load_from("config/config.toml")
    }

    /// Load configuration from a specific file path plus environment
    /// overrides.
    pub fn load_from<P: AsRef<Path>>(path: P) -> ObsResult<Self> {
        let settings: Settings = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("POLAR_OBS_").split("__"))
            .extract()?;
        Ok(settings)
    }

    /// The built-in defaults with the three standard cycles wired to the
    /// shipped sample scripts. The circular cycle shares the common
    /// calibration scripts; the others default by extension swap.
    pub fn starter() -> Self {
        let mut settings = Self::default();
        for cycle in CycleType::ALL {
            let key = cycle.config_key();
            let (bias, dark) = if matches!(cycle, CycleType::CircularPolarimetry) {
                (
                    Some(PathBuf::from("scripts/common.bias")),
                    Some(PathBuf::from("scripts/common.dark")),
                )
            } else {
                (None, None)
            };
            settings.scenarios.insert(
                key.to_string(),
                ScenarioConfig {
                    light: PathBuf::from(format!("scripts/{key}.job")),
                    bias,
                    dark,
                },
            );
        }
        settings
    }

    /// Write [`Settings::starter`] to `path` so a first boot has a
    /// configuration file to edit. Creates the parent directory when missing.
    pub fn write_starter<P: AsRef<Path>>(path: P) -> ObsResult<()> {
        let text = toml::to_string_pretty(&Self::starter()).map_err(|e| {
            ObsError::Configuration(format!("serializing starter configuration: {e}"))
        })?;
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> ObsResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ObsError::Configuration(format!(
                "invalid log_level '{}', must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.motor.n_steps <= 0 {
            return Err(ObsError::Configuration(format!(
                "motor.n_steps must be positive, got {}",
                self.motor.n_steps
            )));
        }
        if self.motor.angle_units_per_rotation <= 0 {
            return Err(ObsError::Configuration(format!(
                "motor.angle_units_per_rotation must be positive, got {}",
                self.motor.angle_units_per_rotation
            )));
        }

        for key in self.scenarios.keys() {
            if CycleType::from_config_key(key).is_none() {
                return Err(ObsError::Configuration(format!(
                    "unknown scenario cycle '{key}', expected photometric, linear or circular"
                )));
            }
        }

        Ok(())
    }

    /// Resolve the observation scenario for a cycle type.
    ///
    /// # Errors
    ///
    /// `ObsError::Configuration` when the `[scenarios]` table has no entry
    /// for the cycle.
    pub fn scenario_for(&self, cycle: CycleType) -> ObsResult<ObservationScenario> {
        self.scenarios
            .get(cycle.config_key())
            .map(ScenarioConfig::resolve)
            .ok_or_else(|| {
                ObsError::Configuration(format!(
                    "no scenario configured for cycle '{}'",
                    cycle.config_key()
                ))
            })
    }
}
