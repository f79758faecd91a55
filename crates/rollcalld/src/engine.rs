use rollcall_core::{Descriptor, DescriptorEncoder, EncoderError, FaceCapture};
use rollcall_hw::frame::{encode_jpeg, FACE_CROP_SIZE, PHOTO_JPEG_QUALITY};
use rollcall_hw::{CameraError, Frame, FrameError, FrameSource};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Usable frames requested per capture; the last one is used.
const FRAMES_PER_CAPTURE: usize = 2;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error("no usable frame captured ({dark_skipped} dark frames skipped)")]
    NoUsableFrame { dark_skipped: usize },
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from the daemon to the engine thread.
enum EngineRequest {
    /// Descriptor plus JPEG face crop, for registration.
    Capture {
        reply: oneshot::Sender<Result<FaceCapture, EngineError>>,
    },
    /// Descriptor only, for a recognition scan.
    Scan {
        reply: oneshot::Sender<Result<Descriptor, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    source: String,
    encoder: &'static str,
}

impl EngineHandle {
    /// Capture a frame, crop the face region, encode descriptor and photo.
    pub async fn capture(&self) -> Result<FaceCapture, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Capture { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Capture a frame and encode its descriptor.
    pub async fn scan(&self) -> Result<Descriptor, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Scan { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Description of the frame source, for status output.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn encoder(&self) -> &'static str {
        self.encoder
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Discards `warmup_frames` first, then serves requests one at a time.
pub fn spawn_engine(
    mut source: Box<dyn FrameSource + Send>,
    mut encoder: Box<dyn DescriptorEncoder + Send>,
    warmup_frames: usize,
) -> Result<EngineHandle, EngineError> {
    if warmup_frames > 0 {
        tracing::info!(count = warmup_frames, "discarding warmup frames");
        if let Err(e) = source.capture_frames(warmup_frames) {
            tracing::warn!(error = %e, "warmup capture failed");
        }
    }

    let handle_source = source.describe();
    let handle_encoder = encoder.name();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Capture { reply } => {
                        let result = run_capture(source.as_mut(), encoder.as_mut());
                        let _ = reply.send(result);
                    }
                    EngineRequest::Scan { reply } => {
                        let result = grab_frame(source.as_mut()).and_then(|frame| {
                            let face = frame.face_crop(FACE_CROP_SIZE)?;
                            Ok(encoder.encode(&face)?)
                        });
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        tx,
        source: handle_source,
        encoder: handle_encoder,
    })
}

fn grab_frame(source: &mut dyn FrameSource) -> Result<Frame, EngineError> {
    let (mut frames, dark_skipped) = source.capture_frames(FRAMES_PER_CAPTURE)?;
    tracing::debug!(captured = frames.len(), dark_skipped, "captured frames");
    frames.pop().ok_or(EngineError::NoUsableFrame { dark_skipped })
}

fn run_capture(
    source: &mut dyn FrameSource,
    encoder: &mut dyn DescriptorEncoder,
) -> Result<FaceCapture, EngineError> {
    let frame = grab_frame(source)?;
    let face = frame.face_crop(FACE_CROP_SIZE)?;
    let descriptor = encoder.encode(&face)?;
    let photo = encode_jpeg(&face, PHOTO_JPEG_QUALITY)?;

    tracing::info!(
        seq = frame.sequence,
        brightness = frame.avg_brightness(),
        dims = descriptor.len(),
        "face captured"
    );

    Ok(FaceCapture { descriptor, photo })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use rollcall_core::DemoEncoder;

    /// Returns bright frames, or only dark skips when `dark` is set.
    struct FakeSource {
        dark: bool,
    }

    impl FrameSource for FakeSource {
        fn capture_frames(&mut self, count: usize) -> Result<(Vec<Frame>, usize), CameraError> {
            if self.dark {
                return Ok((Vec::new(), count * 3));
            }
            let frames = (0..count)
                .map(|i| Frame::from_rgb_image(RgbImage::from_pixel(320, 240, image::Rgb([120; 3])), i as u32))
                .collect();
            Ok((frames, 0))
        }

        fn describe(&self) -> String {
            "fake".into()
        }
    }

    fn engine(dark: bool) -> EngineHandle {
        spawn_engine(
            Box::new(FakeSource { dark }),
            Box::new(DemoEncoder::with_seed(3)),
            2,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_capture_returns_descriptor_and_jpeg() {
        let engine = engine(false);
        let capture = engine.capture().await.unwrap();
        assert_eq!(capture.descriptor.len(), rollcall_core::encoder::DEMO_DESCRIPTOR_DIM);
        assert_eq!(&capture.photo[..2], &[0xFF, 0xD8]);
        assert_eq!(engine.source(), "fake");
        assert_eq!(engine.encoder(), "demo");
    }

    #[tokio::test]
    async fn test_scan_without_usable_frame() {
        let engine = engine(true);
        let err = engine.scan().await.unwrap_err();
        assert!(matches!(err, EngineError::NoUsableFrame { dark_skipped: 6 }));
    }
}
