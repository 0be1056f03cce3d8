//! Scripted `DepthCamera` for tests.
//!
//! Poll results are taken from a script queue; once the script is drained
//! every poll returns the configured fallback. Call counters let tests
//! assert what the controller did to the device.

use std::collections::VecDeque;
use std::sync::{mpsc, Mutex};
use std::time::Duration;

use crate::camera::backend::DepthCamera;
use crate::camera::error::{CaptureError, Result};
use crate::camera::types::{
    CaptureProfile, ColorFormat, ColorFrame, DepthFrame, DeviceInfo, DeviceType, Extrinsics,
    FramePair, Intrinsics, StreamProfile,
};

/// What the next `poll_frames` call should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollScript {
    Frame,
    Empty,
    Disconnect,
}

#[derive(Debug)]
struct MockState {
    name: String,
    profile: CaptureProfile,
    connected: bool,
    streaming: bool,
    script: VecDeque<PollScript>,
    when_drained: PollScript,
    open_error: Option<CaptureError>,
    open_calls: u32,
    close_calls: u32,
    poll_calls: u32,
    frames_delivered: u64,
    open_gate: Option<mpsc::Receiver<()>>,
    close_gate: Option<mpsc::Receiver<()>>,
}

/// Mock depth camera.
///
/// All state is behind a `Mutex` so the mock satisfies `Send + Sync`.
pub struct MockCamera {
    state: Mutex<MockState>,
}

impl MockCamera {
    /// A connected 4x2 D435 that delivers a frame on every poll.
    pub fn new() -> Self {
        let tiny = StreamProfile {
            width: 4,
            height: 2,
            fps: 30,
        };
        Self {
            state: Mutex::new(MockState {
                name: "Intel RealSense D435 (mock)".to_string(),
                profile: CaptureProfile {
                    color: tiny,
                    color_format: ColorFormat::Rgb8,
                    depth: tiny,
                },
                connected: true,
                streaming: false,
                script: VecDeque::new(),
                when_drained: PollScript::Frame,
                open_error: None,
                open_calls: 0,
                close_calls: 0,
                poll_calls: 0,
                frames_delivered: 0,
                open_gate: None,
                close_gate: None,
            }),
        }
    }

    /// Set the reported product name.
    pub fn with_name(self, name: &str) -> Self {
        self.state.lock().unwrap().name = name.to_string();
        self
    }

    /// Set what polls return once the script queue is empty.
    pub fn when_drained(self, script: PollScript) -> Self {
        self.state.lock().unwrap().when_drained = script;
        self
    }

    /// Make the next `open` fail with `error`.
    pub fn fail_next_open(&self, error: CaptureError) {
        self.state.lock().unwrap().open_error = Some(error);
    }

    /// Queue poll results, consumed in order.
    pub fn push_script(&self, steps: impl IntoIterator<Item = PollScript>) {
        self.state.lock().unwrap().script.extend(steps);
    }

    /// Make the next `open` wait until the returned sender fires or drops.
    pub fn hold_next_open(&self) -> mpsc::Sender<()> {
        let (tx, rx) = mpsc::channel();
        self.state.lock().unwrap().open_gate = Some(rx);
        tx
    }

    /// Make the next `close` wait until the returned sender fires or drops.
    ///
    /// `close_calls` is counted before waiting.
    pub fn hold_next_close(&self) -> mpsc::Sender<()> {
        let (tx, rx) = mpsc::channel();
        self.state.lock().unwrap().close_gate = Some(rx);
        tx
    }

    /// Simulate plugging or unplugging the device.
    pub fn set_connected(&self, connected: bool) {
        let mut state = self.state.lock().unwrap();
        state.connected = connected;
        if !connected {
            state.streaming = false;
        }
    }

    /// The profile a session should request from this mock.
    pub fn profile(&self) -> CaptureProfile {
        self.state.lock().unwrap().profile
    }

    pub fn is_streaming(&self) -> bool {
        self.state.lock().unwrap().streaming
    }

    pub fn open_calls(&self) -> u32 {
        self.state.lock().unwrap().open_calls
    }

    pub fn close_calls(&self) -> u32 {
        self.state.lock().unwrap().close_calls
    }

    pub fn poll_calls(&self) -> u32 {
        self.state.lock().unwrap().poll_calls
    }

    pub fn frames_delivered(&self) -> u64 {
        self.state.lock().unwrap().frames_delivered
    }

    fn make_frame(profile: &CaptureProfile, n: u64) -> FramePair {
        let color_len = profile.color.pixel_count() * 3;
        FramePair {
            sequence: n,
            timestamp_us: n * 33_333,
            color: ColorFrame {
                width: profile.color.width,
                height: profile.color.height,
                format: profile.color_format,
                data: vec![(n % 256) as u8; color_len],
            },
            depth: DepthFrame {
                width: profile.depth.width,
                height: profile.depth.height,
                data: vec![1000 + (n % 1000) as u16; profile.depth.pixel_count()],
            },
        }
    }
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl DepthCamera for MockCamera {
    fn open(&self, profile: &CaptureProfile) -> Result<DeviceInfo> {
        let gate = self.state.lock().unwrap().open_gate.take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }

        let mut state = self.state.lock().unwrap();
        state.open_calls += 1;

        if let Some(err) = state.open_error.take() {
            return Err(err);
        }
        if !state.connected {
            return Err(CaptureError::DeviceUnavailable(
                "no mock device connected".to_string(),
            ));
        }

        state.profile = *profile;
        state.streaming = true;

        let intrinsics = |s: &StreamProfile| Intrinsics {
            width: s.width,
            height: s.height,
            ppx: s.width as f32 / 2.0,
            ppy: s.height as f32 / 2.0,
            fx: s.width as f32,
            fy: s.width as f32,
        };

        Ok(DeviceInfo {
            name: state.name.clone(),
            serial: "MOCK0001".to_string(),
            device_type: DeviceType::from_name(&state.name),
            depth_scale: 10.0,
            color_intrinsics: intrinsics(&profile.color),
            depth_intrinsics: intrinsics(&profile.depth),
            extrinsics: Extrinsics::default(),
        })
    }

    fn close(&self) -> Result<()> {
        let gate = {
            let mut state = self.state.lock().unwrap();
            state.close_calls += 1;
            state.streaming = false;
            state.close_gate.take()
        };
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        Ok(())
    }

    fn poll_frames(&self, _timeout: Duration) -> Result<Option<FramePair>> {
        let mut state = self.state.lock().unwrap();
        state.poll_calls += 1;

        if !state.connected {
            return Err(CaptureError::DeviceDisconnected(
                "mock device unplugged".to_string(),
            ));
        }
        if !state.streaming {
            return Err(CaptureError::DeviceUnavailable(
                "mock device is not streaming".to_string(),
            ));
        }

        let step = state.script.pop_front().unwrap_or(state.when_drained);
        match step {
            PollScript::Frame => {
                let frame = Self::make_frame(&state.profile, state.frames_delivered);
                state.frames_delivered += 1;
                Ok(Some(frame))
            }
            PollScript::Empty => Ok(None),
            PollScript::Disconnect => {
                state.connected = false;
                state.streaming = false;
                Err(CaptureError::DeviceDisconnected(
                    "mock device unplugged".to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_opens_and_streams() {
        let mock = MockCamera::new();
        let info = mock.open(&mock.profile()).unwrap();
        assert_eq!(info.device_type, DeviceType::D435);
        assert!(mock.is_streaming());

        let frame = mock.poll_frames(Duration::ZERO).unwrap().unwrap();
        assert_eq!(frame.color.data.len(), 4 * 2 * 3);
        assert_eq!(frame.depth.data.len(), 4 * 2);
    }

    #[test]
    fn mock_script_is_consumed_in_order() {
        let mock = MockCamera::new().when_drained(PollScript::Empty);
        mock.open(&mock.profile()).unwrap();
        mock.push_script([PollScript::Frame, PollScript::Empty, PollScript::Frame]);

        assert!(mock.poll_frames(Duration::ZERO).unwrap().is_some());
        assert!(mock.poll_frames(Duration::ZERO).unwrap().is_none());
        assert!(mock.poll_frames(Duration::ZERO).unwrap().is_some());
        assert!(mock.poll_frames(Duration::ZERO).unwrap().is_none());
        assert_eq!(mock.frames_delivered(), 2);
    }

    #[test]
    fn mock_disconnect_step_unplugs_device() {
        let mock = MockCamera::new();
        mock.open(&mock.profile()).unwrap();
        mock.push_script([PollScript::Disconnect]);

        let err = mock.poll_frames(Duration::ZERO).unwrap_err();
        assert!(err.is_disconnect());
        assert!(mock.open(&mock.profile()).is_err());
    }

    #[test]
    fn mock_open_error_is_one_shot() {
        let mock = MockCamera::new();
        mock.fail_next_open(CaptureError::DeviceUnavailable("busy".into()));

        assert!(mock.open(&mock.profile()).is_err());
        assert!(mock.open(&mock.profile()).is_ok());
        assert_eq!(mock.open_calls(), 2);
    }

    #[test]
    fn held_close_waits_for_release() {
        let mock = MockCamera::new();
        mock.open(&mock.profile()).unwrap();

        std::thread::scope(|s| {
            let release = mock.hold_next_close();
            let closing = s.spawn(|| mock.close());
            while mock.close_calls() == 0 {
                std::thread::sleep(Duration::from_millis(1));
            }
            assert!(!closing.is_finished());
            release.send(()).unwrap();
            closing.join().unwrap().unwrap();
        });
        assert!(!mock.is_streaming());

        // Only the next close is held.
        mock.close().unwrap();
        assert_eq!(mock.close_calls(), 2);
    }

    #[test]
    fn mock_name_drives_device_type() {
        let mock = MockCamera::new().with_name("Intel RealSense D415");
        let info = mock.open(&mock.profile()).unwrap();
        assert_eq!(info.device_type, DeviceType::D415);
    }
}
