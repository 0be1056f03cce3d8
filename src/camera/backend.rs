use std::time::Duration;

use crate::camera::error::Result;
use crate::camera::types::{CaptureProfile, DeviceInfo, FramePair};

/// Hardware seam for a color + depth camera.
///
/// Implemented by the simulated camera, the test mock and (out of tree)
/// vendor SDK bindings. All methods take `&self`; implementations manage
/// their own interior mutability.
pub trait DepthCamera: Send + Sync {
    /// Acquire the device and start streaming with the given profile.
    ///
    /// Fails with `DeviceUnavailable` when no device is present.
    fn open(&self, profile: &CaptureProfile) -> Result<DeviceInfo>;

    /// Stop streaming and release the device.
    fn close(&self) -> Result<()>;

    /// Wait at most `timeout` for the next synchronised frame pair.
    ///
    /// `Ok(None)` means no frame was ready in time. A lost device must be
    /// reported as `DeviceDisconnected`, never as `Ok(None)`.
    fn poll_frames(&self, timeout: Duration) -> Result<Option<FramePair>>;
}
