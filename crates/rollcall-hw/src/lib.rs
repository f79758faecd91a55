//! rollcall-hw — Webcam capture and frame handling.
//!
//! Provides V4L2-based camera access, a still-image stand-in, and the
//! centre face crop used for registration photos and descriptors.

pub mod camera;
pub mod frame;

pub use camera::{open_source, Camera, CameraError, FrameSource, PixelFormat, StillImage};
pub use frame::{Frame, FrameError};
