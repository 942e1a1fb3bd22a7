//! # Polarimeter Observation Engine
//!
//! This crate is the execution core for unattended observation runs of a
//! multi-camera astronomical polarimeter. A run follows a *job script*: an
//! ordered list of steps that rotate the wave plate, drive the shutters,
//! expose every camera simultaneously and pause between frames. The engine
//! parses such scripts, validates them against a target's observation cycle,
//! and drives the attached hardware to completion, with progress and
//! wave-plate angles published to observers while the run is in flight.
//!
//! ## Crate Structure
//!
//! - **`actions`**: The executable action tree (`camera`, `motor`,
//!   `shutter`, `delay`, `settings`, `repeat`) with per-action grammars.
//! - **`cancel`**: Cooperative cancellation over a watch channel.
//! - **`config`**: Figment-backed `Settings` (motor geometry, camera
//!   defaults, scenario table) with environment overrides.
//! - **`context`**: The per-run `JobContext` handed to actions.
//! - **`error`**: The `ObsError` taxonomy shared across the crate.
//! - **`hardware`**: Device traits (`Camera`, `StepMotor`, `Notifier`),
//!   shared request/event types and the mock implementations.
//! - **`job`**: An immutable parsed job and its sequential executor.
//! - **`logging`**: Tracing subscriber setup.
//! - **`manager`**: The `JobManager` state machine orchestrating runs.
//! - **`retry`**: Bounded immediate-retry wrapper for hardware calls.
//! - **`script`**: Job script parsing (JSON records plus text grammars).
//! - **`target`**: Observation targets, cycle types and scenario paths.

pub mod actions;
pub mod cancel;
pub mod config;
pub mod context;
pub mod error;
pub mod hardware;
pub mod job;
pub mod logging;
pub mod manager;
pub mod retry;
pub mod script;
pub mod target;

pub use error::{ObsError, ObsResult};
