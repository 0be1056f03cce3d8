use serde::Serialize;
use std::time::Instant;

/// Collects statistics for one started capture session.
pub struct CaptureStats {
    frames_acquired: u64,
    frames_rendered: u64,
    frames_written: u64,
    empty_polls: u64,
    write_stalls: u64,
    write_failures: u64,
    invalid_depth_frames: u64,
    start_time: Instant,
    last_frame_time: Option<Instant>,
}

/// Snapshot of capture stats for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSnapshot {
    pub fps: f64,
    pub frames_acquired: u64,
    pub frames_rendered: u64,
    pub frames_written: u64,
    /// Frames handed to the writer but not yet on disk.
    pub write_backlog: u64,
    pub empty_polls: u64,
    pub write_stalls: u64,
    pub write_failures: u64,
    pub invalid_depth_frames: u64,
    pub ms_since_last_frame: Option<u64>,
}

impl CaptureStats {
    /// Create new stats with zeroed counters.
    pub fn new() -> Self {
        Self {
            frames_acquired: 0,
            frames_rendered: 0,
            frames_written: 0,
            empty_polls: 0,
            write_stalls: 0,
            write_failures: 0,
            invalid_depth_frames: 0,
            start_time: Instant::now(),
            last_frame_time: None,
        }
    }

    /// Record a frame pair pulled from the device.
    pub fn record_acquired(&mut self) {
        self.frames_acquired += 1;
        self.last_frame_time = Some(Instant::now());
    }

    /// Record a poll that returned no frame.
    pub fn record_empty_poll(&mut self) {
        self.empty_polls += 1;
    }

    pub fn record_rendered(&mut self) {
        self.frames_rendered += 1;
    }

    pub fn record_written(&mut self) {
        self.frames_written += 1;
    }

    /// Record the acquisition loop having to wait on a full write queue.
    pub fn record_write_stall(&mut self) {
        self.write_stalls += 1;
    }

    pub fn record_write_failure(&mut self) {
        self.write_failures += 1;
    }

    /// Record a depth frame that failed the proximity check.
    pub fn record_invalid_depth(&mut self) {
        self.invalid_depth_frames += 1;
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Acquisition rate since the session started.
    pub fn fps(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed < 0.001 {
            return 0.0;
        }
        self.frames_acquired as f64 / elapsed
    }

    /// Reset all counters.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Take a serialisable snapshot.
    ///
    /// `queued` is the number of frames accepted by the writer so far.
    pub fn snapshot(&self, queued: u64) -> CaptureSnapshot {
        CaptureSnapshot {
            fps: self.fps(),
            frames_acquired: self.frames_acquired,
            frames_rendered: self.frames_rendered,
            frames_written: self.frames_written,
            write_backlog: queued.saturating_sub(self.frames_written + self.write_failures),
            empty_polls: self.empty_polls,
            write_stalls: self.write_stalls,
            write_failures: self.write_failures,
            invalid_depth_frames: self.invalid_depth_frames,
            ms_since_last_frame: self
                .last_frame_time
                .map(|t| t.elapsed().as_millis() as u64),
        }
    }
}

impl Default for CaptureStats {
    fn default() -> Self {
        Self::new()
    }
}
