//! rollcall-core: face detection and recognition engine.
//!
//! Uses SCRFD for face detection (ONNX Runtime, CPU) and a local binary
//! pattern histogram (LBPH) recognizer trained from enrolled face samples.

pub mod detector;
pub mod recognizer;
pub mod sample;
pub mod screening;
pub mod types;

pub use detector::{DetectionMode, DetectionParams, Detector, ScrfdDetector};
pub use recognizer::{LbphRecognizer, Recognizer};
pub use sample::{FaceImage, SAMPLE_SIZE};
pub use screening::{find_faces, Rejection};
pub use types::{BoundingBox, Identification, LabeledFace, PersonId};

use std::path::PathBuf;

/// Default location of the ONNX models when `ROLLCALL_MODEL_DIR` is unset.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/rollcall/models")
}
