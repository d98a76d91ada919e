//! Candidate screening for the recognition path.
//!
//! Every candidate box from the detector passes three hard checks, in order,
//! before it may reach the recognizer: face-like aspect ratio, enough pixel
//! texture, and at least one eye landmark in the upper part of the box.
//! The registration path skips screening entirely.

use crate::detector::{DetectionMode, Detector, DetectorError};
use crate::sample::clamp_region;
use crate::types::BoundingBox;

const MIN_ASPECT_RATIO: f32 = 0.7;
const MAX_ASPECT_RATIO: f32 = 1.3;
/// Population variance the cropped region's intensities must exceed.
const MIN_REGION_VARIANCE: f32 = 200.0;
/// Eyes must sit within this top fraction of the box.
const EYE_BAND: f32 = 0.6;

/// Why a candidate was screened out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    AspectRatio,
    LowVariance,
    NoEyes,
}

/// Run the three recognition-path checks against one candidate.
pub fn screen(frame: &[u8], width: u32, height: u32, face: &BoundingBox) -> Result<(), Rejection> {
    let ratio = face.aspect_ratio();
    if !(MIN_ASPECT_RATIO..=MAX_ASPECT_RATIO).contains(&ratio) {
        return Err(Rejection::AspectRatio);
    }

    if region_variance(frame, width, height, face) <= MIN_REGION_VARIANCE {
        return Err(Rejection::LowVariance);
    }

    if !has_eye_in_band(face) {
        return Err(Rejection::NoEyes);
    }

    Ok(())
}

/// Detect with the parameters for `mode`; screen candidates on the recognition path.
pub fn find_faces(
    detector: &mut dyn Detector,
    frame: &[u8],
    width: u32,
    height: u32,
    mode: DetectionMode,
) -> Result<Vec<BoundingBox>, DetectorError> {
    let candidates = detector.detect(frame, width, height, &mode.params())?;
    if mode == DetectionMode::Registration {
        return Ok(candidates);
    }

    Ok(candidates
        .into_iter()
        .filter(|face| match screen(frame, width, height, face) {
            Ok(()) => true,
            Err(reason) => {
                tracing::debug!(?reason, x = face.x, y = face.y, "candidate screened out");
                false
            }
        })
        .collect())
}

/// Intensity variance of the box clamped to the frame; zero when empty.
pub fn region_variance(frame: &[u8], width: u32, height: u32, face: &BoundingBox) -> f32 {
    let (w, h) = (width as usize, height as usize);
    if frame.len() < w * h {
        return 0.0;
    }
    let Some((x0, y0, x1, y1)) = clamp_region(face, w, h) else {
        return 0.0;
    };

    let n = ((x1 - x0) * (y1 - y0)) as f64;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in y0..y1 {
        for &p in &frame[y * w + x0..y * w + x1] {
            let v = p as f64;
            sum += v;
            sum_sq += v * v;
        }
    }
    let mean = sum / n;
    (sum_sq / n - mean * mean).max(0.0) as f32
}

fn has_eye_in_band(face: &BoundingBox) -> bool {
    let Some(eyes) = face.eyes() else {
        return false;
    };
    let band_bottom = face.y + face.height * EYE_BAND;
    eyes.iter().any(|&(ex, ey)| {
        ex >= face.x && ex <= face.right() && ey >= face.y && ey <= band_bottom
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectionParams;

    const W: u32 = 320;
    const H: u32 = 240;

    /// Alternating black/white rows: variance 16256.
    fn striped_frame() -> Vec<u8> {
        (0..(W * H) as usize)
            .map(|i| if (i / W as usize) % 2 == 0 { 0 } else { 255 })
            .collect()
    }

    fn face_at(x: f32, y: f32, w: f32, h: f32, eye_y: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
            landmarks: Some([
                (x + w * 0.3, eye_y),
                (x + w * 0.7, eye_y),
                (x + w * 0.5, y + h * 0.6),
                (x + w * 0.35, y + h * 0.8),
                (x + w * 0.65, y + h * 0.8),
            ]),
        }
    }

    struct FixedDetector(Vec<BoundingBox>);

    impl Detector for FixedDetector {
        fn detect(
            &mut self,
            _frame: &[u8],
            _width: u32,
            _height: u32,
            _params: &DetectionParams,
        ) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_screen_accepts_textured_face() {
        let frame = striped_frame();
        let face = face_at(60.0, 20.0, 150.0, 160.0, 70.0);
        assert_eq!(screen(&frame, W, H, &face), Ok(()));
    }

    #[test]
    fn test_screen_rejects_elongated_box() {
        let frame = striped_frame();
        let face = face_at(10.0, 10.0, 200.0, 100.0, 30.0);
        assert_eq!(screen(&frame, W, H, &face), Err(Rejection::AspectRatio));
    }

    #[test]
    fn test_screen_aspect_bounds_inclusive() {
        let frame = striped_frame();
        let face = face_at(10.0, 10.0, 70.0, 100.0, 40.0);
        assert_eq!(screen(&frame, W, H, &face), Ok(()));
    }

    #[test]
    fn test_screen_rejects_uniform_region() {
        let frame = vec![90u8; (W * H) as usize];
        let face = face_at(60.0, 20.0, 150.0, 150.0, 70.0);
        assert_eq!(screen(&frame, W, H, &face), Err(Rejection::LowVariance));
    }

    /// Rows cycling through `levels`.
    fn banded_frame(levels: [u8; 4]) -> Vec<u8> {
        (0..(W * H) as usize)
            .map(|i| levels[(i / W as usize) % 4])
            .collect()
    }

    #[test]
    fn test_screen_variance_must_exceed_floor() {
        let face = face_at(60.0, 0.0, 150.0, 160.0, 50.0);

        // 100/120/120/140 has a variance of exactly 200
        let at_floor = banded_frame([100, 120, 120, 140]);
        assert_eq!(region_variance(&at_floor, W, H, &face), 200.0);
        assert_eq!(screen(&at_floor, W, H, &face), Err(Rejection::LowVariance));

        let above = banded_frame([100, 120, 120, 141]);
        assert!(region_variance(&above, W, H, &face) > 200.0);
        assert_eq!(screen(&above, W, H, &face), Ok(()));
    }

    #[test]
    fn test_screen_rejects_eyes_below_band() {
        let frame = striped_frame();
        // Eyes at 80% of the box height
        let face = face_at(60.0, 20.0, 150.0, 150.0, 140.0);
        assert_eq!(screen(&frame, W, H, &face), Err(Rejection::NoEyes));
    }

    #[test]
    fn test_screen_rejects_missing_landmarks() {
        let frame = striped_frame();
        let mut face = face_at(60.0, 20.0, 150.0, 150.0, 70.0);
        face.landmarks = None;
        assert_eq!(screen(&frame, W, H, &face), Err(Rejection::NoEyes));
    }

    #[test]
    fn test_region_variance_uniform_is_zero() {
        let frame = vec![128u8; (W * H) as usize];
        let face = face_at(0.0, 0.0, 50.0, 50.0, 10.0);
        assert!(region_variance(&frame, W, H, &face).abs() < 1e-3);
    }

    #[test]
    fn test_find_faces_registration_skips_screening() {
        let frame = vec![90u8; (W * H) as usize];
        let mut detector = FixedDetector(vec![face_at(10.0, 10.0, 200.0, 100.0, 90.0)]);
        let faces = find_faces(&mut detector, &frame, W, H, DetectionMode::Registration).unwrap();
        assert_eq!(faces.len(), 1);
    }

    #[test]
    fn test_find_faces_recognition_filters() {
        let frame = striped_frame();
        let mut detector = FixedDetector(vec![
            face_at(60.0, 20.0, 150.0, 160.0, 70.0),
            face_at(0.0, 0.0, 200.0, 60.0, 10.0),
        ]);
        let faces = find_faces(&mut detector, &frame, W, H, DetectionMode::Recognition).unwrap();
        assert_eq!(faces.len(), 1);
        assert!((faces[0].x - 60.0).abs() < 1e-6);
    }
}
