//! Hardware abstractions for the polarimeter.
//!
//! The engine never talks to vendor SDKs directly. Devices are represented by
//! small async traits ([`Camera`], [`StepMotor`], [`Notifier`]) that the
//! composition root implements against real drivers, and that
//! [`mock`] implements for tests and dry runs.
//!
//! This module also holds the wire-level value types shared by the traits:
//! acquisition settings and requests, exposure completion events, and shutter
//! state.

pub mod camera;
pub mod mock;
pub mod motor;
pub mod notifier;

pub use camera::Camera;
pub use mock::{MockCamera, MockStepMotor};
pub use motor::{AxisParameter, StepMotor};
pub use notifier::{AutoNotifier, ConsoleNotifier, Notifier};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Acquisition parameters for one camera.
///
/// A target carries one shared set plus optional per-camera overrides; the
/// manager snapshots the effective settings per camera before a run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionSettings {
    /// Exposure time of a single frame.
    #[serde(with = "humantime_serde")]
    pub exposure: Duration,
    /// Detector gain setting.
    #[serde(default)]
    pub gain: i32,
}

impl AcquisitionSettings {
    /// Settings with the given exposure and zero gain.
    pub fn with_exposure(exposure: Duration) -> Self {
        Self { exposure, gain: 0 }
    }
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self::with_exposure(Duration::from_secs(1))
    }
}

/// One exposure command for one camera: the cached settings plus the frame
/// tags shared by every camera of the same step.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionRequest {
    /// Effective acquisition settings for this camera.
    pub settings: AcquisitionSettings,
    /// Key/value tags attached to the produced frame (target name, wave
    /// plate angles, frame kind, timestamps).
    pub tags: BTreeMap<String, String>,
}

impl AcquisitionRequest {
    /// A request with no tags yet.
    pub fn new(settings: AcquisitionSettings) -> Self {
        Self {
            settings,
            tags: BTreeMap::new(),
        }
    }
}

/// Event published on a camera's finished-stream once per completed exposure.
#[derive(Debug, Clone)]
pub struct ExposureEvent {
    /// Identity of the camera that produced the event.
    pub camera_id: String,
    /// Monotonic frame counter of that camera.
    pub frame_index: u64,
    /// Completion time.
    pub timestamp: DateTime<Utc>,
    /// Mean pixel value of the frame, for quick-look statistics.
    pub mean_counts: f64,
    /// Present when the exposure failed; the step consuming the event fails
    /// with this description.
    pub error: Option<String>,
}

impl ExposureEvent {
    /// A successful completion event.
    pub fn completed(camera_id: impl Into<String>, frame_index: u64, mean_counts: f64) -> Self {
        Self {
            camera_id: camera_id.into(),
            frame_index,
            timestamp: Utc::now(),
            mean_counts,
            error: None,
        }
    }

    /// A failed exposure event.
    pub fn failed(camera_id: impl Into<String>, frame_index: u64, error: impl Into<String>) -> Self {
        Self {
            camera_id: camera_id.into(),
            frame_index,
            timestamp: Utc::now(),
            mean_counts: 0.0,
            error: Some(error.into()),
        }
    }
}

/// Shutter drive mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutterMode {
    /// The camera opens and closes the shutter around each exposure.
    Auto,
    /// Permanently open.
    Open,
    /// Permanently closed.
    Closed,
}

impl ShutterMode {
    /// Map a script verb (`open`, `close`, `auto`) to a mode.
    pub fn from_verb(verb: &str) -> Option<Self> {
        match verb.to_ascii_lowercase().as_str() {
            "open" => Some(ShutterMode::Open),
            "close" => Some(ShutterMode::Closed),
            "auto" => Some(ShutterMode::Auto),
            _ => None,
        }
    }
}

impl std::fmt::Display for ShutterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutterMode::Auto => write!(f, "auto"),
            ShutterMode::Open => write!(f, "open"),
            ShutterMode::Closed => write!(f, "closed"),
        }
    }
}

/// Current shutter drive state of a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutterState {
    /// Internal (in-camera) shutter mode.
    pub internal: ShutterMode,
    /// External shutter mode, when the head drives one.
    pub external: Option<ShutterMode>,
}

/// Shutter-related capability flags reported by a camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraCapabilities {
    /// The camera has a controllable internal shutter.
    pub has_internal_shutter: bool,
    /// The camera can drive an external shutter.
    pub has_external_shutter: bool,
}

impl Default for CameraCapabilities {
    fn default() -> Self {
        Self {
            has_internal_shutter: true,
            has_external_shutter: false,
        }
    }
}
