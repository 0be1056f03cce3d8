use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::camera::types::{ColorFormat, ColorFrame, DepthFrame, DeviceInfo, FramePair};
use crate::preview::colorize::{colorize, depth_to_tenth_mm, DepthRange};

/// Pixel layout of a rendered image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Rgb8,
    /// Native-endian 16-bit grayscale.
    Gray16,
}

/// How the depth stream is presented to the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DepthView {
    /// Jet-colorized RGB8.
    #[default]
    Colorized,
    /// 16-bit depth in 0.1 mm units.
    TenthMillimetre,
}

/// A display-ready image.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl RenderedImage {
    pub fn rgb8(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Rgb8,
            data,
        }
    }

    pub fn gray16(width: u32, height: u32, pixels: &[u16]) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Gray16,
            data: bytemuck::cast_slice(pixels).to_vec(),
        }
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        let bpp = match self.format {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Gray16 => 2,
        };
        self.width as usize * bpp
    }
}

/// Color and depth images derived from the same frame pair.
#[derive(Debug, Clone)]
pub struct RenderedImagePair {
    /// Sequence of the source frame pair.
    pub sequence: u64,
    pub timestamp_us: u64,
    pub color: Arc<RenderedImage>,
    pub depth: Arc<RenderedImage>,
    /// Proximity verdict, only computed for the 0.1 mm depth view.
    pub depth_valid: Option<bool>,
}

/// Converts frame pairs into display images. Pure: no I/O, no state.
#[derive(Debug, Clone, Copy)]
pub struct FramePipeline {
    depth_range: DepthRange,
    depth_view: DepthView,
}

impl FramePipeline {
    pub fn new(depth_range: DepthRange, depth_view: DepthView) -> Self {
        Self {
            depth_range,
            depth_view,
        }
    }

    /// Render both streams of `frame`. The input is never modified.
    pub fn process(&self, frame: &FramePair, device: &DeviceInfo) -> RenderedImagePair {
        let color = Self::render_color(&frame.color);
        let (depth, depth_valid) = self.render_depth(&frame.depth, device);
        RenderedImagePair {
            sequence: frame.sequence,
            timestamp_us: frame.timestamp_us,
            color: Arc::new(color),
            depth: Arc::new(depth),
            depth_valid,
        }
    }

    /// Convert the sensor's channel order to RGB8.
    pub fn render_color(color: &ColorFrame) -> RenderedImage {
        let data = match color.format {
            ColorFormat::Rgb8 => color.data.clone(),
            ColorFormat::Bgr8 => color
                .data
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
        };
        RenderedImage::rgb8(color.width, color.height, data)
    }

    fn render_depth(
        &self,
        depth: &DepthFrame,
        device: &DeviceInfo,
    ) -> (RenderedImage, Option<bool>) {
        match self.depth_view {
            DepthView::Colorized => (
                RenderedImage::rgb8(
                    depth.width,
                    depth.height,
                    colorize(depth, device.depth_scale, self.depth_range),
                ),
                None,
            ),
            DepthView::TenthMillimetre => {
                let converted = depth_to_tenth_mm(depth, device.depth_scale, device.device_type);
                (
                    RenderedImage::gray16(converted.width, converted.height, &converted.data),
                    Some(converted.valid),
                )
            }
        }
    }
}

impl Default for FramePipeline {
    fn default() -> Self {
        Self::new(DepthRange::default(), DepthView::default())
    }
}
