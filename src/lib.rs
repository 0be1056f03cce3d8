pub mod camera;
pub mod controller;
pub mod dataset;
pub mod diagnostics;
pub mod preview;
pub mod settings;

use std::sync::Arc;
use std::time::Duration;

use camera::backend::DepthCamera;
use camera::types::{CaptureProfile, DeviceInfo, FramePair};

pub use camera::error::{CaptureError, Result};
pub use controller::capture::CaptureController;
pub use controller::notifier::{Status, StatusEvent};
pub use controller::state::LifecycleState;
pub use settings::types::{CaptureSettings, FrameDrive};

/// Create the depth camera for this machine.
///
/// When `DUMMY_CAMERA=1` is set, a simulated camera is used instead.
pub fn create_camera() -> Arc<dyn DepthCamera> {
    if camera::dummy::DummyCamera::is_enabled() {
        tracing::info!("using simulated depth camera");
        return Arc::new(camera::dummy::DummyCamera::new());
    }
    Arc::new(NullCamera)
}

/// Placeholder used when no camera backend is available.
struct NullCamera;

impl DepthCamera for NullCamera {
    fn open(&self, _profile: &CaptureProfile) -> Result<DeviceInfo> {
        Err(CaptureError::DeviceUnavailable(
            "no depth camera backend (set DUMMY_CAMERA=1 to simulate one)".to_string(),
        ))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn poll_frames(&self, _timeout: Duration) -> Result<Option<FramePair>> {
        Err(CaptureError::DeviceUnavailable("no backend".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_camera_is_never_available() {
        let camera = NullCamera;
        let result = camera.open(&CaptureProfile::default());
        assert!(matches!(result, Err(CaptureError::DeviceUnavailable(_))));
        assert!(camera.close().is_ok());
    }

    #[test]
    fn controller_with_null_camera_reports_device_unavailable() {
        let controller = CaptureController::new(Arc::new(NullCamera), CaptureSettings::default());
        let (tx, rx) = std::sync::mpsc::channel();
        let tx = std::sync::Mutex::new(tx);

        controller
            .initialize(move |status, _| {
                let _ = tx.lock().unwrap().send(status);
            })
            .unwrap();

        assert_eq!(controller.state(), LifecycleState::Error);
        let timeout = Duration::from_secs(5);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), Status::Initializing);
        assert_eq!(
            rx.recv_timeout(timeout).unwrap(),
            Status::ErrorDeviceUnavailable
        );
    }
}
