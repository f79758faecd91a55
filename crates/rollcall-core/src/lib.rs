//! rollcall-core — Face matching and attendance rules.
//!
//! Matches live face descriptors against registered students, enforces one
//! Present mark per student, day and subject, and builds reports. Descriptors
//! come from an ArcFace model via ONNX Runtime, or from a demo encoder.

pub mod attendance;
pub mod config;
pub mod encoder;
pub mod matcher;
pub mod report;
pub mod roster;
pub mod types;

pub use attendance::{RateBand, Statistics};
pub use config::{default_model_dir, Config, ConfigError};
pub use encoder::{
    is_demo, load_encoder, ArcFaceEncoder, DemoEncoder, DescriptorEncoder, EncoderError,
};
pub use matcher::{DemoMatcher, EuclideanMatcher, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use roster::{FaceCapture, Registration, RegistrationError};
pub use types::{AttendanceRecord, AttendanceStatus, Descriptor, MatchResult, Student, Subject};
