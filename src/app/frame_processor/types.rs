// SPDX-License-Identifier: GPL-3.0-only

//! Core types for frame processing results

use serde::{Deserialize, Serialize};

/// A rectangular region within a frame
///
/// Coordinates are normalized (0.0 to 1.0) relative to the frame dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRegion {
    /// Left edge (0.0 = left of frame, 1.0 = right of frame)
    pub x: f32,
    /// Top edge (0.0 = top of frame, 1.0 = bottom of frame)
    pub y: f32,
    /// Width as fraction of frame width
    pub width: f32,
    /// Height as fraction of frame height
    pub height: f32,
}

impl FrameRegion {
    /// Create a frame region from pixel coordinates
    pub fn from_pixels(
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        Self {
            x: x as f32 / frame_width.max(1) as f32,
            y: y as f32 / frame_height.max(1) as f32,
            width: width as f32 / frame_width.max(1) as f32,
            height: height as f32 / frame_height.max(1) as f32,
        }
    }
}

/// A decoded code and where it was found
#[derive(Debug, Clone, PartialEq)]
pub struct QrDetection {
    /// Bounds in normalized coordinates of the full frame
    pub bounds: FrameRegion,
    /// Decoded text
    pub content: String,
}

impl QrDetection {
    pub fn new(bounds: FrameRegion, content: String) -> Self {
        Self { bounds, content }
    }
}

/// Centered square (or rectangle) where codes are searched for
///
/// Frames smaller than the box are used whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionBox {
    pub width: u32,
    pub height: u32,
}

impl Default for DetectionBox {
    fn default() -> Self {
        Self {
            width: crate::constants::DEFAULT_DETECTION_BOX,
            height: crate::constants::DEFAULT_DETECTION_BOX,
        }
    }
}

impl DetectionBox {
    /// Pixel rectangle `(x, y, width, height)` of the box inside a frame
    pub fn rect_in(&self, frame_width: u32, frame_height: u32) -> (u32, u32, u32, u32) {
        let width = self.width.min(frame_width);
        let height = self.height.min(frame_height);
        let x = (frame_width - width) / 2;
        let y = (frame_height - height) / 2;
        (x, y, width, height)
    }
}

/// Tightly packed 8-bit grayscale image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LumaImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl LumaImage {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize);
        Self {
            width,
            height,
            data,
        }
    }

    /// Copy out a sub-rectangle. The rectangle must lie inside the image.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for row in y..y + height {
            let start = row as usize * self.width as usize + x as usize;
            data.extend_from_slice(&self.data[start..start + width as usize]);
        }
        Self::new(width, height, data)
    }

    /// Nearest-neighbour downscale so neither side exceeds `max_dimension`
    ///
    /// Returns the image unchanged together with the applied scale factor
    /// (source pixels per output pixel).
    pub fn downscale(self, max_dimension: u32) -> (Self, f32) {
        if max_dimension == 0 || (self.width <= max_dimension && self.height <= max_dimension) {
            return (self, 1.0);
        }
        let scale = (self.width as f32 / max_dimension as f32)
            .max(self.height as f32 / max_dimension as f32);
        let new_width = ((self.width as f32 / scale) as u32).max(1);
        let new_height = ((self.height as f32 / scale) as u32).max(1);

        let mut data = Vec::with_capacity(new_width as usize * new_height as usize);
        for y in 0..new_height {
            let src_y = ((y as f32 * scale) as u32).min(self.height - 1);
            for x in 0..new_width {
                let src_x = ((x as f32 * scale) as u32).min(self.width - 1);
                data.push(self.data[src_y as usize * self.width as usize + src_x as usize]);
            }
        }
        (Self::new(new_width, new_height, data), scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_box_centered() {
        let rect = DetectionBox {
            width: 250,
            height: 250,
        }
        .rect_in(640, 480);
        assert_eq!(rect, (195, 115, 250, 250));
    }

    #[test]
    fn test_detection_box_larger_than_frame() {
        let rect = DetectionBox {
            width: 250,
            height: 250,
        }
        .rect_in(100, 80);
        assert_eq!(rect, (0, 0, 100, 80));
    }

    #[test]
    fn test_crop() {
        let img = LumaImage::new(3, 3, (0..9).collect());
        let cropped = img.crop(1, 1, 2, 2);
        assert_eq!(cropped.data, vec![4, 5, 7, 8]);
    }

    #[test]
    fn test_downscale() {
        let img = LumaImage::new(4, 2, vec![0, 10, 20, 30, 40, 50, 60, 70]);
        let (small, scale) = img.downscale(2);
        assert_eq!(scale, 2.0);
        assert_eq!((small.width, small.height), (2, 1));
        assert_eq!(small.data, vec![0, 20]);

        let img = LumaImage::new(2, 2, vec![1, 2, 3, 4]);
        let (same, scale) = img.clone().downscale(640);
        assert_eq!(scale, 1.0);
        assert_eq!(same, img);
    }

    #[test]
    fn test_region_from_pixels() {
        let region = FrameRegion::from_pixels(10, 20, 50, 40, 100, 80);
        assert_eq!(region.x, 0.1);
        assert_eq!(region.y, 0.25);
        assert_eq!(region.width, 0.5);
        assert_eq!(region.height, 0.5);
    }
}
