//! V4L2 webcam capture via the `v4l` crate.

use crate::frame::{self, Frame, FrameError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const DARK_FRAME_THRESHOLD: f32 = 0.95;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel).
    Grey,
}

/// Anything that can hand out frames for capture and recognition.
pub trait FrameSource {
    /// Capture up to `count` usable (non-dark) frames, making at most
    /// `count * 3` attempts. Returns the frames and the number of dark frames
    /// skipped.
    fn capture_frames(&mut self, count: usize) -> Result<(Vec<Frame>, usize), CameraError>;

    /// Human-readable description for logs and status.
    fn describe(&self) -> String;
}

/// V4L2 camera device handle.
pub struct Camera {
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;

        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"GREY") {
            PixelFormat::Grey
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV or GREY)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    fn buf_to_rgb(&self, buf: &[u8]) -> Result<Vec<u8>, CameraError> {
        let rgb = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height)?,
            PixelFormat::Grey => frame::grey_to_rgb(buf, self.width, self.height)?,
        };
        Ok(rgb)
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl FrameSource for Camera {
    fn capture_frames(&mut self, count: usize) -> Result<(Vec<Frame>, usize), CameraError> {
        let max_attempts = count * 3;
        let mut good_frames = Vec::with_capacity(count);
        let mut dark_count = 0usize;

        let mut stream =
            MmapStream::with_buffers(&self.device, BufType::VideoCapture, 4).map_err(|e| {
                CameraError::CaptureFailed(format!("failed to create mmap stream: {e}"))
            })?;

        for _ in 0..max_attempts {
            if good_frames.len() >= count {
                break;
            }

            let (buf, meta) = stream.next().map_err(|e| {
                CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}"))
            })?;

            let rgb = self.buf_to_rgb(buf)?;
            if frame::is_dark_frame(&rgb, DARK_FRAME_THRESHOLD) {
                dark_count += 1;
                tracing::debug!(seq = meta.sequence, "skipping dark frame");
                continue;
            }

            good_frames.push(Frame {
                data: rgb,
                width: self.width,
                height: self.height,
                timestamp: std::time::Instant::now(),
                sequence: meta.sequence,
                is_dark: false,
            });
        }

        Ok((good_frames, dark_count))
    }

    fn describe(&self) -> String {
        format!("{} ({}x{} {:?})", self.device_path, self.width, self.height, self.pixel_format)
    }
}

/// Serves the same still image on every capture; stands in for a webcam
/// when the configured device is an image file.
pub struct StillImage {
    path: PathBuf,
    frame: Frame,
}

impl StillImage {
    pub fn open(path: &Path) -> Result<Self, CameraError> {
        if !path.is_file() {
            return Err(CameraError::DeviceNotFound(path.display().to_string()));
        }
        let frame = Frame::load(path)?;
        tracing::info!(
            path = %path.display(),
            width = frame.width,
            height = frame.height,
            "using still image as frame source"
        );
        Ok(Self {
            path: path.to_path_buf(),
            frame,
        })
    }
}

impl FrameSource for StillImage {
    fn capture_frames(&mut self, count: usize) -> Result<(Vec<Frame>, usize), CameraError> {
        if self.frame.is_dark {
            return Ok((Vec::new(), count * 3));
        }
        let frames = (0..count)
            .map(|i| {
                let mut f = self.frame.clone();
                f.sequence = i as u32;
                f.timestamp = std::time::Instant::now();
                f
            })
            .collect();
        Ok((frames, 0))
    }

    fn describe(&self) -> String {
        format!("still image {}", self.path.display())
    }
}

/// Open `source` as a still image when it names a regular file, otherwise
/// as a V4L2 device.
pub fn open_source(source: &str) -> Result<Box<dyn FrameSource + Send>, CameraError> {
    let path = Path::new(source);
    if path.is_file() {
        Ok(Box::new(StillImage::open(path)?))
    } else {
        Ok(Box::new(Camera::open(source)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn write_png(name: &str, value: u8) -> PathBuf {
        let path = std::env::temp_dir().join(format!("rollcall-hw-{}-{name}.png", std::process::id()));
        RgbImage::from_pixel(64, 48, image::Rgb([value; 3]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_still_image_repeats_frame() {
        let path = write_png("bright", 150);
        let mut source = StillImage::open(&path).unwrap();
        let (frames, dark) = source.capture_frames(3).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(dark, 0);
        assert_eq!((frames[0].width, frames[0].height), (64, 48));
        assert_eq!(frames[2].sequence, 2);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_still_image_dark_frames_are_skipped() {
        let path = write_png("dark", 0);
        let mut source = StillImage::open(&path).unwrap();
        let (frames, dark) = source.capture_frames(2).unwrap();
        assert!(frames.is_empty());
        assert_eq!(dark, 6);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_open_source_missing_device() {
        let err = open_source("/dev/rollcall-does-not-exist").err().unwrap();
        assert!(matches!(err, CameraError::DeviceNotFound(_)));
    }
}
