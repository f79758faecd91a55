//! Face descriptor encoders.
//!
//! [`ArcFaceEncoder`] runs the w600k_r50 ArcFace model via ONNX Runtime on a
//! face crop. [`DemoEncoder`] stands in when the model is unavailable.

use crate::config::Config;
use crate::types::Descriptor;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_DESCRIPTOR_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

pub const DEMO_DESCRIPTOR_DIM: usize = 128;
const DEMO_MODEL_VERSION: &str = "demo";

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("model file not found: {0}; download w600k_r50.onnx from insightface and place it in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Turns a face crop into a fixed-length descriptor.
pub trait DescriptorEncoder {
    fn encode(&mut self, face: &RgbImage) -> Result<Descriptor, EncoderError>;

    /// Short name logged and reported in daemon status.
    fn name(&self) -> &'static str;
}

/// ArcFace-based descriptor encoder.
pub struct ArcFaceEncoder {
    session: Session,
}

impl ArcFaceEncoder {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, EncoderError> {
        if !model_path.exists() {
            return Err(EncoderError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Resize a face crop to 112x112 and normalise it into a NCHW RGB tensor.
    fn preprocess(face: &RgbImage) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE;
        let resized = if face.dimensions() == (size, size) {
            face.clone()
        } else {
            imageops::resize(face, size, size, FilterType::Triangle)
        };

        let n = size as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, n, n));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }
        tensor
    }
}

impl DescriptorEncoder for ArcFaceEncoder {
    fn encode(&mut self, face: &RgbImage) -> Result<Descriptor, EncoderError> {
        let input = Self::preprocess(face);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EncoderError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();
        if raw.len() != ARCFACE_DESCRIPTOR_DIM {
            return Err(EncoderError::InferenceFailed(format!(
                "expected {ARCFACE_DESCRIPTOR_DIM}-dim descriptor, got {}",
                raw.len()
            )));
        }

        Ok(Descriptor {
            values: l2_normalize(raw),
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }

    fn name(&self) -> &'static str {
        ARCFACE_MODEL_VERSION
    }
}

fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.into_iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}

/// Random descriptors in `[0, 1)`, used when no model can be loaded.
pub struct DemoEncoder {
    rng: StdRng,
}

impl DemoEncoder {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for DemoEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorEncoder for DemoEncoder {
    fn encode(&mut self, _face: &RgbImage) -> Result<Descriptor, EncoderError> {
        let values = (0..DEMO_DESCRIPTOR_DIM).map(|_| self.rng.gen::<f32>()).collect();
        Ok(Descriptor {
            values,
            model_version: Some(DEMO_MODEL_VERSION.to_string()),
        })
    }

    fn name(&self) -> &'static str {
        DEMO_MODEL_VERSION
    }
}

/// Open the encoder `config` asks for.
///
/// Demo mode, or a missing ArcFace model file, yields a [`DemoEncoder`].
pub fn load_encoder(config: &Config) -> Result<Box<dyn DescriptorEncoder + Send>, EncoderError> {
    if config.demo_mode {
        tracing::warn!("demo mode enabled: descriptors are random");
        return Ok(Box::new(DemoEncoder::new()));
    }

    match ArcFaceEncoder::load(&config.arcface_model_path()) {
        Ok(encoder) => Ok(Box::new(encoder)),
        Err(EncoderError::ModelNotFound(path)) => {
            tracing::warn!(path, "face model missing, falling back to demo encoder");
            Ok(Box::new(DemoEncoder::new()))
        }
        Err(e) => Err(e),
    }
}

/// True when descriptors from `encoder` carry no identity.
pub fn is_demo(encoder: &dyn DescriptorEncoder) -> bool {
    encoder.name() == DEMO_MODEL_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_output_shape() {
        let face = RgbImage::from_pixel(200, 200, image::Rgb([128, 128, 128]));
        let tensor = ArcFaceEncoder::preprocess(&face);
        assert_eq!(tensor.shape(), &[1, 3, 112, 112]);
    }

    #[test]
    fn test_preprocess_normalization_per_channel() {
        let face = RgbImage::from_pixel(112, 112, image::Rgb([0, 255, 128]));
        let tensor = ArcFaceEncoder::preprocess(&face);
        assert!((tensor[[0, 0, 5, 5]] + 1.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 5, 5]] - 1.0).abs() < 1e-6);
        let expected = (128.0 - ARCFACE_MEAN) / ARCFACE_STD;
        assert!((tensor[[0, 2, 5, 5]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_l2_normalize_unit_length() {
        let v = l2_normalize(vec![3.0, 4.0]);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn test_load_missing_model() {
        let err = ArcFaceEncoder::load(Path::new("/nonexistent/w600k_r50.onnx"))
            .err()
            .unwrap();
        assert!(matches!(err, EncoderError::ModelNotFound(_)));
    }

    #[test]
    fn test_demo_encoder_dimension_and_range() {
        let mut encoder = DemoEncoder::with_seed(42);
        let face = RgbImage::new(1, 1);
        let d = encoder.encode(&face).unwrap();
        assert_eq!(d.len(), DEMO_DESCRIPTOR_DIM);
        assert!(d.values.iter().all(|v| (0.0..1.0).contains(v)));
        assert_eq!(d.model_version.as_deref(), Some("demo"));
    }

    #[test]
    fn test_load_encoder_falls_back_to_demo() {
        let config = Config {
            model_dir: "/nonexistent/rollcall-models".into(),
            demo_mode: false,
            ..Config::default()
        };
        let encoder = load_encoder(&config).unwrap();
        assert!(is_demo(encoder.as_ref()));

        let demo = Config {
            demo_mode: true,
            ..Config::default()
        };
        assert_eq!(load_encoder(&demo).unwrap().name(), "demo");
    }
}
