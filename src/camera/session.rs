use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::camera::backend::DepthCamera;
use crate::camera::error::{CaptureError, Result};
use crate::camera::types::{CaptureProfile, DeviceInfo, FramePair};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Opaque reference to an open device.
#[derive(Debug)]
pub struct SessionHandle {
    id: u64,
    info: DeviceInfo,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }
}

/// Owns at most one open handle on a `DepthCamera`.
pub struct DeviceSession {
    camera: Arc<dyn DepthCamera>,
    profile: CaptureProfile,
    handle: Option<SessionHandle>,
    next_sequence: u64,
}

impl DeviceSession {
    pub fn new(camera: Arc<dyn DepthCamera>, profile: CaptureProfile) -> Self {
        Self {
            camera,
            profile,
            handle: None,
            next_sequence: 0,
        }
    }

    /// Open the device, or return the existing handle if already open.
    pub fn open(&mut self) -> Result<&SessionHandle> {
        if self.handle.is_none() {
            let info = self.camera.open(&self.profile)?;
            let id = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
            info!(
                "opened {} (serial {}) as session {id}",
                info.name, info.serial
            );
            self.next_sequence = 0;
            self.handle = Some(SessionHandle { id, info });
        }
        self.handle
            .as_ref()
            .ok_or_else(|| CaptureError::DeviceUnavailable("session did not open".to_string()))
    }

    /// Release the handle. Closing an already-closed session is a no-op.
    pub fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.camera.close() {
                // The device may already be gone; the handle is released regardless.
                warn!("closing session {} failed: {e}", handle.id);
            } else {
                info!("closed session {}", handle.id);
            }
        }
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn info(&self) -> Option<&DeviceInfo> {
        self.handle.as_ref().map(SessionHandle::info)
    }

    /// Pull the next frame pair, waiting at most `timeout`.
    ///
    /// Any device failure while streaming is reported as
    /// `DeviceDisconnected`; `Ok(None)` only means "not yet".
    pub fn pull_frame(&mut self, timeout: Duration) -> Result<Option<FramePair>> {
        if self.handle.is_none() {
            return Err(CaptureError::DeviceUnavailable(
                "session is not open".to_string(),
            ));
        }

        match self.camera.poll_frames(timeout) {
            Ok(Some(mut frame)) => {
                frame.sequence = self.next_sequence;
                self.next_sequence += 1;
                Ok(Some(frame))
            }
            Ok(None) => Ok(None),
            Err(CaptureError::DeviceDisconnected(msg)) => {
                debug!("device reported disconnect: {msg}");
                Err(CaptureError::DeviceDisconnected(msg))
            }
            Err(other) => Err(CaptureError::DeviceDisconnected(other.to_string())),
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}
