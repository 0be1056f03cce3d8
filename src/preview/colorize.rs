//! Depth conversions: jet colorizing for display and 0.1 mm export.

use serde::{Deserialize, Serialize};

use crate::camera::types::{DepthFrame, DeviceType};

/// Raw readings at or below this are sensor noise, not proximity hits.
const NOISE_FLOOR: f32 = 50.0;

/// A frame is only rejected when at least this many pixels sit closer
/// than the model's minimum range.
const PROXIMITY_PIXEL_LIMIT: u32 = 20_000;

/// Metre range mapped onto the colormap; readings outside are clamped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepthRange {
    pub min_metres: f32,
    pub max_metres: f32,
}

impl Default for DepthRange {
    fn default() -> Self {
        Self {
            min_metres: 0.3,
            max_metres: 4.0,
        }
    }
}

/// Map `t` in `[0, 1]` to a blue → cyan → yellow → red jet color.
pub fn jet(t: f32) -> [u8; 3] {
    let t = t.clamp(0.0, 1.0);
    let channel = |centre: f32| {
        let v = (1.5 - (4.0 * t - centre).abs()).clamp(0.0, 1.0);
        (v * 255.0).round() as u8
    };
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// Colorize a raw depth frame into packed RGB8.
///
/// `depth_scale` converts raw units to 0.1 mm. Zero (no reading) is black.
pub fn colorize(depth: &DepthFrame, depth_scale: f32, range: DepthRange) -> Vec<u8> {
    let span = (range.max_metres - range.min_metres).max(f32::EPSILON);
    let mut out = Vec::with_capacity(depth.data.len() * 3);
    for &raw in &depth.data {
        if raw == 0 {
            out.extend_from_slice(&[0, 0, 0]);
            continue;
        }
        let metres = raw as f32 * depth_scale / 10_000.0;
        out.extend_from_slice(&jet((metres - range.min_metres) / span));
    }
    out
}

/// Depth converted to 0.1 mm with the proximity verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct TenthMillimetreDepth {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u16>,
    /// Pixels closer than the model's minimum range.
    pub proximity_count: u32,
    /// False when enough pixels violate the minimum range that the frame
    /// is likely an obstruction in front of the lens.
    pub valid: bool,
}

/// Convert raw depth to 0.1 mm units, saturating at `u16::MAX`.
pub fn depth_to_tenth_mm(
    depth: &DepthFrame,
    depth_scale: f32,
    device_type: DeviceType,
) -> TenthMillimetreDepth {
    let proximity_min = device_type.proximity_min();
    let mut proximity_count = 0u32;

    let data = depth
        .data
        .iter()
        .map(|&raw| {
            let d = raw as f32;
            if d > NOISE_FLOOR && d < proximity_min {
                proximity_count += 1;
            }
            (depth_scale * d).min(u16::MAX as f32) as u16
        })
        .collect();

    TenthMillimetreDepth {
        width: depth.width,
        height: depth.height,
        data,
        proximity_count,
        valid: proximity_count < PROXIMITY_PIXEL_LIMIT,
    }
}
