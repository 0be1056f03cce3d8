use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Depth camera model family, derived from the reported device name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    D435,
    D415,
    Unknown,
}

impl DeviceType {
    /// Classify a device from its product name.
    pub fn from_name(name: &str) -> Self {
        if name.contains("D435") {
            Self::D435
        } else if name.contains("D415") {
            Self::D415
        } else {
            Self::Unknown
        }
    }

    /// Closest plausible raw depth reading (mm on D4xx) before it counts as
    /// a proximity violation. Measured minimums were ~255 on the D435 and
    /// ~410 on the D415.
    pub fn proximity_min(self) -> f32 {
        match self {
            Self::D435 => 270.0,
            Self::D415 | Self::Unknown => 430.0,
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::D435 => write!(f, "D435"),
            Self::D415 => write!(f, "D415"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Pinhole intrinsics of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub width: u32,
    pub height: u32,
    /// Principal point, pixels from the left edge.
    pub ppx: f32,
    /// Principal point, pixels from the top edge.
    pub ppy: f32,
    pub fx: f32,
    pub fy: f32,
}

/// Rigid transform from the depth stream to the color stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extrinsics {
    /// Column-major 3x3 rotation.
    pub rotation: [f32; 9],
    /// Translation in metres.
    pub translation: [f32; 3],
}

impl Default for Extrinsics {
    fn default() -> Self {
        Self {
            rotation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            translation: [0.0; 3],
        }
    }
}

/// Facts about an opened device, captured once per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub name: String,
    pub serial: String,
    pub device_type: DeviceType,
    /// Multiplier from raw depth units to 0.1 mm.
    pub depth_scale: f32,
    pub color_intrinsics: Intrinsics,
    pub depth_intrinsics: Intrinsics,
    pub extrinsics: Extrinsics,
}

/// Pixel layout of the color stream as delivered by the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorFormat {
    Rgb8,
    Bgr8,
}

/// Requested resolution and rate for one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamProfile {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl StreamProfile {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl Default for StreamProfile {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

/// Color and depth profiles requested when a device is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureProfile {
    pub color: StreamProfile,
    pub color_format: ColorFormat,
    pub depth: StreamProfile,
}

impl Default for CaptureProfile {
    fn default() -> Self {
        Self {
            color: StreamProfile::default(),
            color_format: ColorFormat::Rgb8,
            depth: StreamProfile::default(),
        }
    }
}

/// One color image as read from the sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorFrame {
    pub width: u32,
    pub height: u32,
    pub format: ColorFormat,
    pub data: Vec<u8>,
}

/// One Z16 depth image in raw sensor units.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u16>,
}

/// A synchronised color + depth sample from a single acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePair {
    /// Per-session counter assigned by the device session.
    pub sequence: u64,
    /// Capture timestamp in microseconds.
    pub timestamp_us: u64,
    pub color: ColorFrame,
    pub depth: DepthFrame,
}

/// Frame pairs travel between the pipeline and the dataset writer without
/// copying the pixel buffers.
pub type SharedFramePair = Arc<FramePair>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_type_from_name() {
        assert_eq!(
            DeviceType::from_name("Intel RealSense D435"),
            DeviceType::D435
        );
        assert_eq!(
            DeviceType::from_name("Intel RealSense D415"),
            DeviceType::D415
        );
        assert_eq!(DeviceType::from_name(""), DeviceType::Unknown);
        assert_eq!(
            DeviceType::from_name("Intel RealSense L515"),
            DeviceType::Unknown
        );
    }

    #[test]
    fn proximity_min_depends_on_model() {
        assert_eq!(DeviceType::D435.proximity_min(), 270.0);
        assert_eq!(DeviceType::D415.proximity_min(), 430.0);
        assert_eq!(DeviceType::Unknown.proximity_min(), 430.0);
    }

    #[test]
    fn default_profile_is_720p_at_30() {
        let profile = CaptureProfile::default();
        assert_eq!(profile.color.width, 1280);
        assert_eq!(profile.color.height, 720);
        assert_eq!(profile.depth.fps, 30);
        assert_eq!(profile.color_format, ColorFormat::Rgb8);
    }

    #[test]
    fn device_info_serialises_to_camelcase() {
        let intr = Intrinsics {
            width: 4,
            height: 2,
            ppx: 2.0,
            ppy: 1.0,
            fx: 3.0,
            fy: 3.0,
        };
        let info = DeviceInfo {
            name: "Intel RealSense D435".to_string(),
            serial: "0001".to_string(),
            device_type: DeviceType::D435,
            depth_scale: 10.0,
            color_intrinsics: intr,
            depth_intrinsics: intr,
            extrinsics: Extrinsics::default(),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["deviceType"], "D435");
        assert_eq!(json["depthScale"], 10.0);
        assert_eq!(json["colorIntrinsics"]["width"], 4);
        assert_eq!(json["extrinsics"]["rotation"][0], 1.0);
    }
}
