use crate::sample::FaceImage;
use serde::{Deserialize, Serialize};

/// Row id of an enrolled person.
pub type PersonId = i64;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Width over height; zero for a degenerate box.
    pub fn aspect_ratio(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            0.0
        }
    }

    /// Pixel-space `(left, top, right, bottom)`, rounded to whole pixels.
    pub fn edges(&self) -> (i32, i32, i32, i32) {
        (
            self.x.round() as i32,
            self.y.round() as i32,
            self.right().round() as i32,
            self.bottom().round() as i32,
        )
    }

    /// Eye landmarks, when the detector produced landmarks.
    pub fn eyes(&self) -> Option<[(f32, f32); 2]> {
        self.landmarks.map(|lms| [lms[0], lms[1]])
    }
}

/// A training sample: one normalized face tied to its person.
#[derive(Debug, Clone)]
pub struct LabeledFace {
    pub person_id: PersonId,
    pub image: FaceImage,
}

/// Outcome of identifying a face against the trained gallery.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Identification {
    /// Matched person, `None` when the best distance is not below the accept threshold.
    pub person_id: Option<PersonId>,
    /// Normalized score in [0, 1]; 0.0 whenever `person_id` is `None`.
    pub confidence: f32,
    /// Raw best distance on the recognizer's native scale (`f32::INFINITY` when untrained).
    pub distance: f32,
}

impl Identification {
    pub fn unknown() -> Self {
        Self {
            person_id: None,
            confidence: 0.0,
            distance: f32::INFINITY,
        }
    }

    pub fn is_known(&self) -> bool {
        self.person_id.is_some()
    }

    /// True when the match is known and strictly above the caller's confidence gate.
    pub fn passes(&self, min_confidence: f32) -> bool {
        self.is_known() && self.confidence > min_confidence
    }
}
