//! The sensory boundary: camera, microphone, wake word, and voice output.
//!
//! The capture pipelines themselves (wake-word model, speech recognition,
//! camera driver, audio playback) are external blocking I/O; this crate
//! defines their trait signatures, the camera arbitration discipline, and
//! the HTTP text-to-speech client.

pub mod tts;

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use parking_lot::Mutex;

use ha_domain::error::Result;

pub use tts::{AudioPlayer, Speaker, StreamTts};

/// How long a contending worker waits for the camera before giving up.
const CAMERA_LOCK_WINDOW: Duration = Duration::from_millis(250);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frames
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One captured camera frame, already resized and JPEG-encoded.
#[derive(Debug, Clone)]
pub struct JpegFrame {
    pub bytes: Vec<u8>,
}

impl JpegFrame {
    /// Base64 encoding for inline-data LLM parts.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Blocking I/O boundary traits
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A camera producing resized JPEG frames. Capture blocks for the duration
/// of one frame read.
pub trait Camera: Send {
    fn capture_jpeg(&mut self, width: u32, height: u32) -> Result<JpegFrame>;
}

/// Blocks until the wake word is heard.
pub trait WakeWordDetector: Send {
    fn wait_for_wake(&mut self) -> Result<()>;
}

/// Records speech for a bounded window and transcribes it.
pub trait SpeechToText: Send {
    fn listen_and_transcribe(&mut self) -> Result<String>;
}

/// Locates a face in a frame and reports its horizontal offset in degrees
/// (negative = left of center). `None` when no face is visible.
pub trait FaceLocator: Send {
    fn face_offset_deg(&mut self, frame: &JpegFrame) -> Result<Option<f32>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Camera arbitration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Mutual exclusion over the single camera handle.
///
/// The dialogue loop, engine, and poller never capture concurrently: a
/// contender that cannot take the lock within a short window aborts its
/// frame use and degrades (the engine substitutes a retry verdict, the
/// dialogue apologizes).
#[derive(Clone)]
pub struct CameraArbiter {
    camera: Arc<Mutex<Box<dyn Camera>>>,
}

impl CameraArbiter {
    pub fn new(camera: Box<dyn Camera>) -> Self {
        Self {
            camera: Arc::new(Mutex::new(camera)),
        }
    }

    /// Capture one frame, or `None` if the camera is busy past the window.
    /// Errors from the capture itself pass through.
    pub fn try_capture(&self, width: u32, height: u32) -> Result<Option<JpegFrame>> {
        match self.camera.try_lock_for(CAMERA_LOCK_WINDOW) {
            Some(mut camera) => camera.capture_jpeg(width, height).map(Some),
            None => {
                tracing::debug!("camera busy past arbitration window");
                Ok(None)
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
