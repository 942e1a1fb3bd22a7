//! Camera device contract.

use crate::cancel::CancelToken;
use crate::error::ObsResult;
use crate::hardware::{
    AcquisitionRequest, AcquisitionSettings, CameraCapabilities, ExposureEvent, ShutterState,
    ShutterMode,
};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// One attached camera head.
///
/// # Contract
///
/// - `start_acquisition` initiates the exposure and returns without waiting
///   for readout; completion is announced exactly once per exposure on the
///   finished-stream.
/// - `subscribe_finished` must be called **before** `start_acquisition` by
///   anyone who intends to wait for that exposure, otherwise the completion
///   event can fire before the subscriber exists and the wait never ends.
/// - A failed exposure still produces an event, carrying the error text.
///
/// # Thread Safety
///
/// All methods take `&self`; implementations use interior mutability and are
/// safe to share behind an `Arc` across the engine and the event tasks.
#[async_trait]
pub trait Camera: Send + Sync {
    /// Stable identity of this camera, used to key per-camera settings.
    fn camera_id(&self) -> &str;

    /// Start one exposure described by `request`.
    ///
    /// Returns once the exposure is running. Observes `token` only up to the
    /// point of starting; an exposure already in flight runs to completion on
    /// the hardware.
    async fn start_acquisition(
        &self,
        request: AcquisitionRequest,
        token: &CancelToken,
    ) -> ObsResult<()>;

    /// Subscribe to this camera's acquisition-finished events.
    ///
    /// Each completed (or failed) exposure yields one [`ExposureEvent`].
    fn subscribe_finished(&self) -> broadcast::Receiver<ExposureEvent>;

    /// Current internal/external shutter drive state.
    async fn shutter_state(&self) -> ObsResult<ShutterState>;

    /// Change the internal shutter drive mode.
    async fn set_internal_shutter(&self, mode: ShutterMode) -> ObsResult<()>;

    /// Change the external shutter drive mode.
    ///
    /// Only meaningful when [`Camera::capabilities`] reports external-shutter
    /// support.
    async fn set_external_shutter(&self, mode: ShutterMode) -> ObsResult<()>;

    /// Shutter capability flags of this head.
    fn capabilities(&self) -> CameraCapabilities;

    /// Push acquisition settings to the hardware.
    async fn apply_settings(&self, settings: AcquisitionSettings) -> ObsResult<()>;

    /// Settings currently active on the hardware.
    async fn current_settings(&self) -> ObsResult<AcquisitionSettings>;
}
