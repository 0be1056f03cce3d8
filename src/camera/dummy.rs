use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::camera::backend::DepthCamera;
use crate::camera::error::{CaptureError, Result};
use crate::camera::types::{
    CaptureProfile, ColorFormat, ColorFrame, DepthFrame, DeviceInfo, DeviceType, Extrinsics,
    FramePair, Intrinsics, StreamProfile,
};

const DUMMY_DEVICE_NAME: &str = "Intel RealSense D435 (simulated)";
const DUMMY_SERIAL: &str = "DUMMY0001";

/// Raw depth units per metre for the simulated sensor (1 mm units).
const UNITS_PER_METRE: f32 = 1000.0;

/// Columns on the left edge that report no depth, like a real stereo sensor.
const INVALID_LEFT_BAND: u32 = 4;

struct Streaming {
    profile: CaptureProfile,
    started: Instant,
    /// Index of the next frame to emit.
    next_frame: u64,
}

/// A simulated depth camera for running without hardware.
///
/// Produces a moving color gradient and a depth ramp at the requested
/// frame rate. `unplug`/`replug` simulate losing and restoring the device.
///
/// Enable via `DUMMY_CAMERA=1` environment variable.
pub struct DummyCamera {
    connected: AtomicBool,
    streaming: Mutex<Option<Streaming>>,
}

impl DummyCamera {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            streaming: Mutex::new(None),
        }
    }

    /// Whether the dummy camera is enabled via environment variable.
    pub fn is_enabled() -> bool {
        std::env::var("DUMMY_CAMERA").is_ok_and(|v| v == "1" || v == "true")
    }

    /// Simulate the cable being pulled.
    pub fn unplug(&self) {
        self.connected.store(false, Ordering::Release);
        *self.streaming.lock() = None;
    }

    /// Simulate the device coming back.
    pub fn replug(&self) {
        self.connected.store(true, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn intrinsics(profile: &StreamProfile) -> Intrinsics {
        // Roughly a 69 degree horizontal field of view.
        let f = profile.width as f32 * 0.72;
        Intrinsics {
            width: profile.width,
            height: profile.height,
            ppx: profile.width as f32 / 2.0,
            ppy: profile.height as f32 / 2.0,
            fx: f,
            fy: f,
        }
    }

    /// Render the synthetic frame pair for frame index `n`.
    pub fn render_frame(profile: &CaptureProfile, n: u64, timestamp_us: u64) -> FramePair {
        let c = &profile.color;
        let mut color = Vec::with_capacity(c.pixel_count() * 3);
        let shift = (n % 256) as u32;
        for y in 0..c.height {
            for x in 0..c.width {
                let r = ((x + shift) % 256) as u8;
                let g = (y % 256) as u8;
                let b = 128u8;
                match profile.color_format {
                    ColorFormat::Rgb8 => color.extend_from_slice(&[r, g, b]),
                    ColorFormat::Bgr8 => color.extend_from_slice(&[b, g, r]),
                }
            }
        }

        let d = &profile.depth;
        let mut depth = Vec::with_capacity(d.pixel_count());
        let width = d.width.max(1);
        for _y in 0..d.height {
            for x in 0..d.width {
                if x < INVALID_LEFT_BAND {
                    depth.push(0);
                    continue;
                }
                // Ramp from 0.5 m to 3.5 m that drifts sideways over time.
                let phase = (x + (n as u32 % width)) % width;
                let metres = 0.5 + 3.0 * phase as f32 / width as f32;
                depth.push((metres * UNITS_PER_METRE) as u16);
            }
        }

        FramePair {
            sequence: n,
            timestamp_us,
            color: ColorFrame {
                width: c.width,
                height: c.height,
                format: profile.color_format,
                data: color,
            },
            depth: DepthFrame {
                width: d.width,
                height: d.height,
                data: depth,
            },
        }
    }
}

/// When frame `n` is due. Saturates instead of overflowing on long runs.
fn due_at(started: Instant, interval: Duration, n: u64) -> Instant {
    let interval_ns = u64::try_from(interval.as_nanos()).unwrap_or(u64::MAX);
    let offset = Duration::from_nanos(interval_ns.saturating_mul(n));
    started.checked_add(offset).unwrap_or(started)
}

impl Default for DummyCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl DepthCamera for DummyCamera {
    fn open(&self, profile: &CaptureProfile) -> Result<DeviceInfo> {
        if !self.is_connected() {
            return Err(CaptureError::DeviceUnavailable(
                "simulated camera is unplugged".to_string(),
            ));
        }

        let mut streaming = self.streaming.lock();
        if streaming.is_some() {
            return Err(CaptureError::DeviceUnavailable(
                "simulated camera is already streaming".to_string(),
            ));
        }
        *streaming = Some(Streaming {
            profile: *profile,
            started: Instant::now(),
            next_frame: 0,
        });

        Ok(DeviceInfo {
            name: DUMMY_DEVICE_NAME.to_string(),
            serial: DUMMY_SERIAL.to_string(),
            device_type: DeviceType::from_name(DUMMY_DEVICE_NAME),
            depth_scale: 10_000.0 / UNITS_PER_METRE,
            color_intrinsics: Self::intrinsics(&profile.color),
            depth_intrinsics: Self::intrinsics(&profile.depth),
            extrinsics: Extrinsics {
                translation: [0.015, 0.0, 0.0],
                ..Extrinsics::default()
            },
        })
    }

    fn close(&self) -> Result<()> {
        *self.streaming.lock() = None;
        Ok(())
    }

    fn poll_frames(&self, timeout: Duration) -> Result<Option<FramePair>> {
        let (due, interval) = {
            let streaming = self.streaming.lock();
            if !self.is_connected() {
                return Err(CaptureError::DeviceDisconnected(
                    "simulated camera unplugged".to_string(),
                ));
            }
            let s = streaming.as_ref().ok_or_else(|| {
                CaptureError::DeviceUnavailable("simulated camera is not streaming".to_string())
            })?;
            let interval = Duration::from_secs(1) / s.profile.color.fps.max(1);
            (due_at(s.started, interval, s.next_frame), interval)
        };

        let now = Instant::now();
        if due > now {
            let wait = due - now;
            if wait > timeout {
                std::thread::sleep(timeout);
                return Ok(None);
            }
            std::thread::sleep(wait);
        }

        let mut streaming = self.streaming.lock();
        if !self.is_connected() {
            return Err(CaptureError::DeviceDisconnected(
                "simulated camera unplugged".to_string(),
            ));
        }
        let s = streaming.as_mut().ok_or_else(|| {
            CaptureError::DeviceDisconnected("simulated camera stopped streaming".to_string())
        })?;

        let elapsed = s.started.elapsed();
        let n = s.next_frame;
        // Skip frames we were too slow to collect; a real sensor drops them.
        let behind = (elapsed.as_nanos() / interval.as_nanos().max(1)) as u64;
        s.next_frame = behind.max(n).saturating_add(1);

        Ok(Some(Self::render_frame(
            &s.profile,
            n,
            elapsed.as_micros() as u64,
        )))
    }
}
