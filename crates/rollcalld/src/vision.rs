//! Detector and recognizer bundled for the engine thread.

use crate::store::{Database, StoreError};
use rollcall_core::detector::DetectorError;
use rollcall_core::{
    find_faces, BoundingBox, DetectionMode, Detector, FaceImage, Identification, LabeledFace,
    PersonId, Recognizer,
};
use rollcall_hw::Frame;
use serde::Serialize;
use std::collections::HashMap;

/// One screened face in a frame and who it was identified as.
#[derive(Debug, Clone, Serialize)]
pub struct FaceObservation {
    pub face: BoundingBox,
    pub identity: Identification,
    pub name: Option<String>,
}

pub struct Vision {
    detector: Box<dyn Detector + Send>,
    recognizer: Box<dyn Recognizer + Send>,
    names: HashMap<PersonId, String>,
    samples: usize,
}

impl Vision {
    pub fn new(detector: Box<dyn Detector + Send>, recognizer: Box<dyn Recognizer + Send>) -> Self {
        Self {
            detector,
            recognizer,
            names: HashMap::new(),
            samples: 0,
        }
    }

    /// Faces in `frame` under `mode`'s parameters. No frame means no faces.
    pub fn locate(
        &mut self,
        frame: Option<&Frame>,
        mode: DetectionMode,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        let Some(frame) = frame else {
            return Ok(Vec::new());
        };
        find_faces(
            self.detector.as_mut(),
            &frame.data,
            frame.width,
            frame.height,
            mode,
        )
    }

    /// Detect on the recognition path and identify every surviving face.
    pub fn analyze(&mut self, frame: Option<&Frame>) -> Result<Vec<FaceObservation>, DetectorError> {
        let faces = self.locate(frame, DetectionMode::Recognition)?;
        let Some(frame) = frame else {
            return Ok(Vec::new());
        };

        let observations = faces
            .into_iter()
            .map(|face| {
                let identity = match FaceImage::from_region(&frame.data, frame.width, frame.height, &face) {
                    Some(image) => self.recognizer.identify(&image),
                    None => Identification::unknown(),
                };
                let name = identity
                    .person_id
                    .and_then(|id| self.names.get(&id).cloned());
                FaceObservation {
                    face,
                    identity,
                    name,
                }
            })
            .collect();
        Ok(observations)
    }

    /// Retrain from every stored sample. Returns the number of samples used.
    pub fn reload(&mut self, store: &Database) -> Result<usize, StoreError> {
        let stored = store.load_all_samples()?;
        self.names = stored
            .iter()
            .map(|s| (s.person_id, s.name.clone()))
            .collect();
        let labeled: Vec<LabeledFace> = stored.into_iter().map(LabeledFace::from).collect();
        self.recognizer.train(&labeled);
        self.samples = labeled.len();
        Ok(self.samples)
    }

    pub fn is_trained(&self) -> bool {
        self.recognizer.is_trained()
    }

    pub fn sample_count(&self) -> usize {
        self.samples
    }
}
