//! Guided multi-angle enrollment.
//!
//! A session collects one face sample per required head pose (plus optional
//! full-view sweep samples), then persists the person and every sample as a
//! single transaction and retrains the recognizer.

use crate::store::{Database, StoreError};
use crate::vision::Vision;
use chrono::NaiveDateTime;
use rollcall_core::detector::DetectorError;
use rollcall_core::{DetectionMode, FaceImage, PersonId};
use rollcall_hw::{CameraError, Frame, FrameSource};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Required head poses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Angle {
    Front,
    Left,
    Right,
    Up,
    Down,
}

impl Angle {
    pub const REQUIRED: [Angle; 5] = [Angle::Front, Angle::Left, Angle::Right, Angle::Up, Angle::Down];

    pub fn tag(self) -> &'static str {
        match self {
            Angle::Front => "front",
            Angle::Left => "left",
            Angle::Right => "right",
            Angle::Up => "up",
            Angle::Down => "down",
        }
    }
}

impl fmt::Display for Angle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Angle {
    type Err = EnrollError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Angle::REQUIRED
            .into_iter()
            .find(|a| a.tag().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| EnrollError::Validation(format!("unknown angle {s:?}")))
    }
}

/// Storage tag of a captured sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SampleTag {
    Angle(Angle),
    Sweep(u16),
}

impl fmt::Display for SampleTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleTag::Angle(a) => f.write_str(a.tag()),
            SampleTag::Sweep(i) => write!(f, "full_view_{i:03}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnrollError {
    #[error("invalid enrollment input: {0}")]
    Validation(String),
    #[error("no enrollment in progress")]
    NotCollecting,
    #[error("{0} was already captured in this session")]
    DuplicateAngle(String),
    #[error("camera produced no frame; try again")]
    CameraNotReady,
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("no face detected; face the camera and try again")]
    NoFaceDetected,
    #[error("{0} faces detected; only the person enrolling may be in view")]
    MultipleFacesDetected(usize),
    #[error("{} of 5 required angles missing: {}", .missing.len(), join_angles(.missing))]
    IncompleteCapture { missing: Vec<Angle> },
    #[error("only {captured} full-view samples captured; {required} required")]
    InsufficientSweep { captured: usize, required: usize },
    #[error("already registered: {0}")]
    DuplicatePerson(String),
    #[error("storage error: {0}")]
    Storage(StoreError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
}

fn join_angles(angles: &[Angle]) -> String {
    angles.iter().map(|a| a.tag()).collect::<Vec<_>>().join(", ")
}

impl From<StoreError> for EnrollError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(what) => EnrollError::DuplicatePerson(what),
            other => EnrollError::Storage(other),
        }
    }
}

/// Frame-read retry and sweep requirements.
#[derive(Debug, Clone, Copy)]
pub struct CapturePolicy {
    pub attempts: u32,
    pub retry: Duration,
    /// Sweep samples required before finalize; 0 means none.
    pub sweep_min_samples: usize,
}

/// Result of one sweep capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SweepOutcome {
    Stored { total: usize },
    NoFace,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrollProgress {
    pub name: String,
    pub employee_id: String,
    pub captured: Vec<Angle>,
    pub missing: Vec<Angle>,
    pub sweep_samples: usize,
}

struct Candidate {
    name: String,
    employee_id: String,
    samples: BTreeMap<SampleTag, FaceImage>,
}

impl Candidate {
    fn missing(&self) -> Vec<Angle> {
        Angle::REQUIRED
            .into_iter()
            .filter(|a| !self.samples.contains_key(&SampleTag::Angle(*a)))
            .collect()
    }

    fn sweep_count(&self) -> usize {
        self.samples
            .keys()
            .filter(|t| matches!(t, SampleTag::Sweep(_)))
            .count()
    }
}

/// Idle until [`begin`](Self::begin); collecting until finalized or cancelled.
pub struct EnrollmentSession {
    policy: CapturePolicy,
    candidate: Option<Candidate>,
}

impl EnrollmentSession {
    pub fn new(policy: CapturePolicy) -> Self {
        Self {
            policy,
            candidate: None,
        }
    }

    pub fn is_collecting(&self) -> bool {
        self.candidate.is_some()
    }

    /// Sweep samples `finalize` insists on; 0 when the sweep is optional.
    pub fn sweep_required(&self) -> usize {
        self.policy.sweep_min_samples
    }

    /// Both fields must be non-blank.
    pub fn validate(name: &str, employee_id: &str) -> Result<(), EnrollError> {
        if name.trim().is_empty() || employee_id.trim().is_empty() {
            return Err(EnrollError::Validation(
                "name and employee id are both required".into(),
            ));
        }
        Ok(())
    }

    /// Start collecting for a new candidate and activate the camera.
    ///
    /// Any samples from an earlier unfinished session are discarded.
    pub fn begin(
        &mut self,
        name: &str,
        employee_id: &str,
        source: &mut dyn FrameSource,
    ) -> Result<(), EnrollError> {
        Self::validate(name, employee_id)?;
        let (name, employee_id) = (name.trim(), employee_id.trim());

        self.candidate = None;
        source.start()?;
        self.candidate = Some(Candidate {
            name: name.to_string(),
            employee_id: employee_id.to_string(),
            samples: BTreeMap::new(),
        });
        tracing::info!(name, employee_id, "enrollment started");
        Ok(())
    }

    /// Capture the single face in view as `angle`. Returns the number of samples held.
    pub fn capture_angle(
        &mut self,
        angle: Angle,
        source: &dyn FrameSource,
        vision: &mut Vision,
    ) -> Result<usize, EnrollError> {
        let policy = self.policy;
        let candidate = self.candidate.as_mut().ok_or(EnrollError::NotCollecting)?;
        let tag = SampleTag::Angle(angle);
        if candidate.samples.contains_key(&tag) {
            return Err(EnrollError::DuplicateAngle(tag.to_string()));
        }

        let frame = wait_for_frame(source, &policy)?;
        let faces = vision.locate(Some(&frame), DetectionMode::Registration)?;
        let face = match faces.as_slice() {
            [] => return Err(EnrollError::NoFaceDetected),
            [face] => face,
            many => return Err(EnrollError::MultipleFacesDetected(many.len())),
        };
        let image = FaceImage::from_region(&frame.data, frame.width, frame.height, face)
            .ok_or(EnrollError::NoFaceDetected)?;

        candidate.samples.insert(tag, image);
        tracing::info!(%angle, total = candidate.samples.len(), "angle captured");
        Ok(candidate.samples.len())
    }

    /// Capture full-view sample `index`, taking the largest face when several are visible.
    pub fn capture_sweep(
        &mut self,
        index: u16,
        source: &dyn FrameSource,
        vision: &mut Vision,
    ) -> Result<SweepOutcome, EnrollError> {
        let policy = self.policy;
        let candidate = self.candidate.as_mut().ok_or(EnrollError::NotCollecting)?;
        let tag = SampleTag::Sweep(index);
        if candidate.samples.contains_key(&tag) {
            return Err(EnrollError::DuplicateAngle(tag.to_string()));
        }

        let frame = wait_for_frame(source, &policy)?;
        let faces = vision.locate(Some(&frame), DetectionMode::Registration)?;
        let largest = faces
            .iter()
            .max_by(|a, b| a.area().total_cmp(&b.area()));
        let Some(image) = largest
            .and_then(|face| FaceImage::from_region(&frame.data, frame.width, frame.height, face))
        else {
            tracing::debug!(index, "sweep frame without a face");
            return Ok(SweepOutcome::NoFace);
        };

        candidate.samples.insert(tag, image);
        Ok(SweepOutcome::Stored {
            total: candidate.samples.len(),
        })
    }

    /// Persist the candidate with all samples and retrain.
    ///
    /// Missing angles or sweep samples keep the session open. Once
    /// persistence has been attempted the session ends either way and the
    /// camera is released.
    pub fn finalize(
        &mut self,
        store: &mut Database,
        vision: &mut Vision,
        source: &mut dyn FrameSource,
        now: NaiveDateTime,
    ) -> Result<PersonId, EnrollError> {
        let candidate = self.candidate.as_ref().ok_or(EnrollError::NotCollecting)?;

        let missing = candidate.missing();
        if !missing.is_empty() {
            return Err(EnrollError::IncompleteCapture { missing });
        }
        let sweep = candidate.sweep_count();
        if sweep < self.policy.sweep_min_samples {
            return Err(EnrollError::InsufficientSweep {
                captured: sweep,
                required: self.policy.sweep_min_samples,
            });
        }

        let Some(candidate) = self.candidate.take() else {
            return Err(EnrollError::NotCollecting);
        };
        source.stop();

        let samples: Vec<(String, FaceImage)> = candidate
            .samples
            .into_iter()
            .map(|(tag, image)| (tag.to_string(), image))
            .collect();
        let person_id =
            store.register_person(&candidate.name, &candidate.employee_id, now, &samples)?;

        if let Err(e) = vision.reload(store) {
            tracing::warn!(error = %e, person_id, "retraining after enrollment failed");
        }
        tracing::info!(person_id, name = %candidate.name, samples = samples.len(), "enrollment finalized");
        Ok(person_id)
    }

    /// Drop the session without persisting and release the camera.
    pub fn cancel(&mut self, source: &mut dyn FrameSource) -> bool {
        source.stop();
        match self.candidate.take() {
            Some(c) => {
                tracing::info!(name = %c.name, "enrollment cancelled");
                true
            }
            None => false,
        }
    }

    pub fn progress(&self) -> Option<EnrollProgress> {
        self.candidate.as_ref().map(|c| EnrollProgress {
            name: c.name.clone(),
            employee_id: c.employee_id.clone(),
            captured: Angle::REQUIRED
                .into_iter()
                .filter(|a| c.samples.contains_key(&SampleTag::Angle(*a)))
                .collect(),
            missing: c.missing(),
            sweep_samples: c.sweep_count(),
        })
    }
}

/// Poll the source a bounded number of times for a frame.
fn wait_for_frame(source: &dyn FrameSource, policy: &CapturePolicy) -> Result<Frame, EnrollError> {
    for attempt in 0..policy.attempts {
        if let Some(frame) = source.latest_frame() {
            return Ok(frame);
        }
        if attempt + 1 < policy.attempts {
            std::thread::sleep(policy.retry);
        }
    }
    Err(EnrollError::CameraNotReady)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::testing::*;
    use chrono::NaiveDate;
    use rollcall_core::SAMPLE_SIZE;

    fn policy(sweep_min_samples: usize) -> CapturePolicy {
        CapturePolicy {
            attempts: 3,
            retry: Duration::from_millis(1),
            sweep_min_samples,
        }
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    struct Rig {
        session: EnrollmentSession,
        camera: StillCamera,
        detector: FixedDetector,
        vision: Vision,
        store: Database,
    }

    fn rig(sweep_min_samples: usize) -> Rig {
        let detector = FixedDetector::default();
        detector.set(vec![face_box(60.0)]);
        Rig {
            session: EnrollmentSession::new(policy(sweep_min_samples)),
            camera: StillCamera::showing(stripes(true, 1)),
            vision: vision(&detector),
            detector,
            store: Database::open_in_memory().unwrap(),
        }
    }

    fn capture_all(r: &mut Rig) {
        for angle in Angle::REQUIRED {
            r.session.capture_angle(angle, &r.camera, &mut r.vision).unwrap();
        }
    }

    fn row_count(db: &Database, table: &str) -> i64 {
        db.connection()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_begin_requires_name_and_employee_id() {
        let mut r = rig(0);
        for (name, emp) in [("", "E100"), ("Asha", "  "), ("", "")] {
            assert!(matches!(
                r.session.begin(name, emp, &mut r.camera),
                Err(EnrollError::Validation(_))
            ));
        }
        assert!(!r.session.is_collecting());
        assert!(!r.camera.is_running());
    }

    #[test]
    fn test_happy_path_persists_five_samples() {
        let mut r = rig(0);
        r.session.begin("Asha", "E100", &mut r.camera).unwrap();
        assert!(r.camera.is_running());
        capture_all(&mut r);

        let id = r
            .session
            .finalize(&mut r.store, &mut r.vision, &mut r.camera, now())
            .unwrap();

        let samples = r.store.load_all_samples().unwrap();
        assert_eq!(samples.iter().filter(|s| s.person_id == id).count(), 5);
        assert!(r.vision.is_trained());
        assert!(!r.session.is_collecting());
        assert!(!r.camera.is_running());
    }

    #[test]
    fn test_capture_requires_session() {
        let mut r = rig(0);
        assert!(matches!(
            r.session.capture_angle(Angle::Front, &r.camera, &mut r.vision),
            Err(EnrollError::NotCollecting)
        ));
    }

    #[test]
    fn test_duplicate_angle_rejected() {
        let mut r = rig(0);
        r.session.begin("Asha", "E100", &mut r.camera).unwrap();
        assert_eq!(r.session.capture_angle(Angle::Left, &r.camera, &mut r.vision).unwrap(), 1);
        assert!(matches!(
            r.session.capture_angle(Angle::Left, &r.camera, &mut r.vision),
            Err(EnrollError::DuplicateAngle(tag)) if tag == "left"
        ));
    }

    #[test]
    fn test_two_faces_rejected_without_sample() {
        let mut r = rig(0);
        r.session.begin("Asha", "E100", &mut r.camera).unwrap();
        r.detector.set(vec![face_box(0.0), face_box(110.0)]);

        assert!(matches!(
            r.session.capture_angle(Angle::Front, &r.camera, &mut r.vision),
            Err(EnrollError::MultipleFacesDetected(2))
        ));
        assert!(r.session.progress().unwrap().captured.is_empty());
    }

    #[test]
    fn test_no_face_rejected() {
        let mut r = rig(0);
        r.session.begin("Asha", "E100", &mut r.camera).unwrap();
        r.detector.set(Vec::new());
        assert!(matches!(
            r.session.capture_angle(Angle::Front, &r.camera, &mut r.vision),
            Err(EnrollError::NoFaceDetected)
        ));
    }

    #[test]
    fn test_camera_not_ready_after_retries() {
        let mut r = rig(0);
        r.session.begin("Asha", "E100", &mut r.camera).unwrap();
        r.camera.blank();
        assert!(matches!(
            r.session.capture_angle(Angle::Front, &r.camera, &mut r.vision),
            Err(EnrollError::CameraNotReady)
        ));
    }

    #[test]
    fn test_incomplete_capture_names_missing_and_keeps_session() {
        let mut r = rig(0);
        r.session.begin("Asha", "E100", &mut r.camera).unwrap();
        r.session.capture_angle(Angle::Front, &r.camera, &mut r.vision).unwrap();
        r.session.capture_angle(Angle::Up, &r.camera, &mut r.vision).unwrap();

        let err = r
            .session
            .finalize(&mut r.store, &mut r.vision, &mut r.camera, now())
            .unwrap_err();
        match &err {
            EnrollError::IncompleteCapture { missing } => {
                assert_eq!(missing, &[Angle::Left, Angle::Right, Angle::Down]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().starts_with("3 of 5"));
        assert!(r.session.is_collecting());
        assert_eq!(row_count(&r.store, "persons"), 0);
    }

    #[test]
    fn test_duplicate_person_leaves_no_rows() {
        let mut r = rig(0);
        r.session.begin("Asha", "E100", &mut r.camera).unwrap();
        capture_all(&mut r);
        r.session
            .finalize(&mut r.store, &mut r.vision, &mut r.camera, now())
            .unwrap();

        r.session.begin("Asha B", "E100", &mut r.camera).unwrap();
        capture_all(&mut r);
        assert!(matches!(
            r.session.finalize(&mut r.store, &mut r.vision, &mut r.camera, now()),
            Err(EnrollError::DuplicatePerson(_))
        ));
        assert_eq!(row_count(&r.store, "persons"), 1);
        assert_eq!(row_count(&r.store, "face_samples"), 5);
        assert!(!r.session.is_collecting());
    }

    #[test]
    fn test_storage_fault_is_not_reported_as_duplicate() {
        let mut r = rig(0);
        r.session.begin("Asha", "E100", &mut r.camera).unwrap();
        capture_all(&mut r);
        r.store.connection().execute_batch("DROP TABLE face_samples").unwrap();

        assert!(matches!(
            r.session.finalize(&mut r.store, &mut r.vision, &mut r.camera, now()),
            Err(EnrollError::Storage(_))
        ));
        assert_eq!(row_count(&r.store, "persons"), 0);
    }

    #[test]
    fn test_cancel_discards_everything() {
        let mut r = rig(0);
        r.session.begin("Asha", "E100", &mut r.camera).unwrap();
        capture_all(&mut r);
        assert!(r.session.cancel(&mut r.camera));
        assert!(!r.session.is_collecting());
        assert!(!r.camera.is_running());
        assert_eq!(row_count(&r.store, "persons"), 0);
        assert!(!r.session.cancel(&mut r.camera));
    }

    #[test]
    fn test_sweep_takes_largest_face_and_tolerates_empty_frames() {
        let mut r = rig(2);
        r.session.begin("Asha", "E100", &mut r.camera).unwrap();
        capture_all(&mut r);

        // Bright on the left where the small box sits, dark under the large one
        let split: Vec<u8> = (0..FRAME_W * FRAME_H)
            .map(|i| if i % FRAME_W < 90 { 255 } else { 0 })
            .collect();
        r.camera.show(split);
        let mut small = face_box(0.0);
        small.width = 80.0;
        small.height = 80.0;
        r.detector.set(vec![small, face_box(100.0)]);
        assert_eq!(
            r.session.capture_sweep(0, &r.camera, &mut r.vision).unwrap(),
            SweepOutcome::Stored { total: 6 }
        );

        r.detector.set(Vec::new());
        assert_eq!(
            r.session.capture_sweep(1, &r.camera, &mut r.vision).unwrap(),
            SweepOutcome::NoFace
        );
        assert!(matches!(
            r.session.finalize(&mut r.store, &mut r.vision, &mut r.camera, now()),
            Err(EnrollError::InsufficientSweep { captured: 1, required: 2 })
        ));

        r.detector.set(vec![face_box(60.0)]);
        r.session.capture_sweep(2, &r.camera, &mut r.vision).unwrap();
        let id = r
            .session
            .finalize(&mut r.store, &mut r.vision, &mut r.camera, now())
            .unwrap();
        assert_eq!(r.store.sample_count(id).unwrap(), 7);

        let swept: Vec<u8> = r
            .store
            .connection()
            .query_row(
                "SELECT image FROM face_samples WHERE angle = 'full_view_000'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(swept.len(), SAMPLE_SIZE * SAMPLE_SIZE);
        assert!(swept.iter().all(|&p| p == 0), "sweep cropped the smaller face");
    }

    #[test]
    fn test_sample_tags() {
        assert_eq!(SampleTag::Sweep(7).to_string(), "full_view_007");
        assert_eq!(SampleTag::Angle(Angle::Down).to_string(), "down");
        assert_eq!("Front".parse::<Angle>().unwrap(), Angle::Front);
        assert!("sideways".parse::<Angle>().is_err());
    }
}
