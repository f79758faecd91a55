//! Frame type and image processing — YUYV/GREY to RGB, dark detection,
//! centre face crop, JPEG encoding.

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, RgbImage};
use std::path::Path;

/// Side of the square face crop taken from the frame centre.
pub const FACE_CROP_SIZE: u32 = 200;
/// JPEG quality for stored face crops.
pub const PHOTO_JPEG_QUALITY: u8 = 80;

/// A captured RGB8 frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Load a still image from disk as a frame.
    pub fn load(path: &Path) -> Result<Self, FrameError> {
        let img = image::open(path)?.to_rgb8();
        Ok(Self::from_rgb_image(img, 0))
    }

    pub fn from_rgb_image(img: RgbImage, sequence: u32) -> Self {
        let (width, height) = img.dimensions();
        let data = img.into_raw();
        let is_dark = is_dark_frame(&data, 0.95);
        Self {
            data,
            width,
            height,
            timestamp: std::time::Instant::now(),
            sequence,
            is_dark,
        }
    }

    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let pixels = self.data.len() / 3;
        if pixels == 0 {
            return 0.0;
        }
        self.data.chunks_exact(3).map(luma).sum::<f32>() / pixels as f32
    }

    pub fn to_rgb_image(&self) -> Result<RgbImage, FrameError> {
        RgbImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            FrameError::InvalidLength {
                expected: (self.width * self.height * 3) as usize,
                actual: self.data.len(),
            },
        )
    }

    /// Square crop of `size` pixels centred in the frame, clamped to the
    /// frame's shorter side.
    pub fn face_crop(&self, size: u32) -> Result<RgbImage, FrameError> {
        let img = self.to_rgb_image()?;
        let side = size.min(self.width).min(self.height);
        if side == 0 {
            return Err(FrameError::Empty);
        }
        let x = (self.width - side) / 2;
        let y = (self.height - side) / 2;
        Ok(imageops::crop_imm(&img, x, y, side, side).to_image())
    }
}

fn luma(px: &[u8]) -> f32 {
    0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32
}

/// Convert packed YUYV (4:2:2) to RGB using BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V].
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for quad in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (quad[0], quad[1], quad[2], quad[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = (y as f32 - 16.0) * 1.164;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let r = c + 1.596 * e;
    let g = c - 0.392 * d - 0.813 * e;
    let b = c + 2.017 * d;
    [
        r.round().clamp(0.0, 255.0) as u8,
        g.round().clamp(0.0, 255.0) as u8,
        b.round().clamp(0.0, 255.0) as u8,
    ]
}

/// Replicate 8-bit grayscale into RGB.
pub fn grey_to_rgb(grey: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    if grey.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: grey.len(),
        });
    }
    Ok(grey[..expected].iter().flat_map(|&g| [g, g, g]).collect())
}

/// Returns true if more than `threshold_pct` of pixels have luma below 32.
pub fn is_dark_frame(rgb: &[u8], threshold_pct: f32) -> bool {
    let pixels = rgb.len() / 3;
    if pixels == 0 {
        return true;
    }
    let dark_count = rgb.chunks_exact(3).filter(|px| luma(px) < 32.0).count();
    (dark_count as f32 / pixels as f32) > threshold_pct
}

/// Encode an RGB image as JPEG.
pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, FrameError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(img)?;
    Ok(buf)
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("frame is empty")]
    Empty,
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
}
