use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::camera::types::CaptureProfile;
use crate::preview::colorize::DepthRange;
use crate::preview::render::DepthView;

/// Folder used when a capture target is blank.
pub const DEFAULT_TARGET: &str = "testdata";

/// Who runs acquisition ticks while the controller is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameDrive {
    /// A controller-owned worker thread ticks continuously.
    #[default]
    Background,
    /// The observer calls `process_frame` itself.
    Manual,
}

/// Controller configuration, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureSettings {
    pub profile: CaptureProfile,
    pub drive: FrameDrive,
    /// Upper bound for one device poll.
    pub poll_timeout_ms: u64,
    /// Worker back-off when no frame was ready.
    pub idle_interval_ms: u64,
    /// Pending frame pairs the dataset writer accepts before the
    /// acquisition loop blocks.
    pub write_queue_depth: usize,
    /// Base directory for relative capture targets.
    pub dataset_root: PathBuf,
    pub depth_range: DepthRange,
    pub depth_view: DepthView,
}

impl CaptureSettings {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            profile: CaptureProfile::default(),
            drive: FrameDrive::Background,
            poll_timeout_ms: 100,
            idle_interval_ms: 5,
            write_queue_depth: 32,
            dataset_root: PathBuf::from("."),
            depth_range: DepthRange::default(),
            depth_view: DepthView::Colorized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let settings = CaptureSettings::default();
        assert_eq!(settings.drive, FrameDrive::Background);
        assert_eq!(settings.poll_timeout(), Duration::from_millis(100));
        assert_eq!(settings.write_queue_depth, 32);
        assert_eq!(settings.profile.color.fps, 30);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let json = r#"{ "drive": "manual", "pollTimeoutMs": 20 }"#;
        let settings: CaptureSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.drive, FrameDrive::Manual);
        assert_eq!(settings.poll_timeout_ms, 20);
        assert_eq!(settings.idle_interval_ms, 5);
        assert_eq!(settings.profile.depth.width, 1280);
    }

    #[test]
    fn settings_serialise_to_camelcase() {
        let json = serde_json::to_value(CaptureSettings::default()).unwrap();
        assert_eq!(json["drive"], "background");
        assert_eq!(json["writeQueueDepth"], 32);
        assert_eq!(json["profile"]["colorFormat"], "rgb8");
        assert!(json["depthRange"]["maxMetres"].is_number());
        assert_eq!(json["depthView"], "colorized");
    }

    #[test]
    fn nested_profile_is_deserialised() {
        let json = r#"{
            "profile": {
                "color": { "width": 640, "height": 480, "fps": 15 },
                "colorFormat": "bgr8",
                "depth": { "width": 640, "height": 480, "fps": 15 }
            }
        }"#;
        let settings: CaptureSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.profile.color.width, 640);
        assert_eq!(
            settings.profile.color_format,
            crate::camera::types::ColorFormat::Bgr8
        );
    }
}
