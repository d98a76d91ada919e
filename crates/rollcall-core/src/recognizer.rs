//! LBPH face recognizer.
//!
//! Each normalized 200×200 face is turned into a spatial histogram of local
//! binary patterns (radius 1, 8 neighbours, 8×8 grid). Identification is a
//! nearest-neighbour search over all training histograms using the
//! symmetric chi-square distance.

use crate::sample::{FaceImage, SAMPLE_SIZE};
use crate::types::{Identification, LabeledFace, PersonId};

const LBP_BINS: usize = 256;
const GRID_X: usize = 8;
const GRID_Y: usize = 8;
/// Only distances strictly below this produce an identity.
pub const ACCEPT_DISTANCE: f32 = 50.0;
/// `confidence = 1 - distance / CONFIDENCE_SCALE`.
const CONFIDENCE_SCALE: f32 = 100.0;

/// Identifies faces against a model trained from enrolled samples.
pub trait Recognizer {
    /// Rebuild the model from scratch. An empty slice leaves the model untrained.
    fn train(&mut self, samples: &[LabeledFace]);

    /// Identify a normalized face. Untrained models always report unknown.
    fn identify(&self, face: &FaceImage) -> Identification;

    fn is_trained(&self) -> bool;
}

/// Concatenated per-cell LBP histograms, each cell normalized to sum 1.
#[derive(Debug, Clone, PartialEq)]
pub struct LbpHistogram {
    pub values: Vec<f32>,
}

impl LbpHistogram {
    pub fn from_face(face: &FaceImage) -> Self {
        let codes = lbp_codes(face);
        let side = SAMPLE_SIZE - 2;
        let cell_w = side / GRID_X;
        let cell_h = side / GRID_Y;
        let cell_pixels = (cell_w * cell_h) as f32;

        let mut values = vec![0.0f32; GRID_X * GRID_Y * LBP_BINS];
        for row in 0..GRID_Y {
            for col in 0..GRID_X {
                let base = (row * GRID_X + col) * LBP_BINS;
                for y in row * cell_h..(row + 1) * cell_h {
                    for x in col * cell_w..(col + 1) * cell_w {
                        values[base + codes[y * side + x] as usize] += 1.0;
                    }
                }
                for v in &mut values[base..base + LBP_BINS] {
                    *v /= cell_pixels;
                }
            }
        }

        Self { values }
    }

    /// Symmetric chi-square distance: `2 * Σ (a - b)² / (a + b)`.
    pub fn chi_square_distance(&self, other: &LbpHistogram) -> f32 {
        let sum: f32 = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(&a, &b)| {
                let denom = a + b;
                if denom > 0.0 {
                    (a - b) * (a - b) / denom
                } else {
                    0.0
                }
            })
            .sum();
        2.0 * sum
    }
}

/// 3×3 local binary pattern codes for the interior of a face, row-major.
///
/// Neighbours are visited clockwise from the top-left; a neighbour at least
/// as bright as the centre sets its bit.
fn lbp_codes(face: &FaceImage) -> Vec<u8> {
    const NEIGHBOURS: [(isize, isize); 8] = [
        (-1, -1),
        (0, -1),
        (1, -1),
        (1, 0),
        (1, 1),
        (0, 1),
        (-1, 1),
        (-1, 0),
    ];

    let side = SAMPLE_SIZE - 2;
    let mut codes = Vec::with_capacity(side * side);
    for y in 1..SAMPLE_SIZE - 1 {
        for x in 1..SAMPLE_SIZE - 1 {
            let center = face.pixel(x, y);
            let mut code = 0u8;
            for (bit, (dx, dy)) in NEIGHBOURS.iter().enumerate() {
                let nx = (x as isize + dx) as usize;
                let ny = (y as isize + dy) as usize;
                if face.pixel(nx, ny) >= center {
                    code |= 1 << (7 - bit);
                }
            }
            codes.push(code);
        }
    }
    codes
}

/// Local binary pattern histogram recognizer.
#[derive(Debug, Default)]
pub struct LbphRecognizer {
    gallery: Vec<(PersonId, LbpHistogram)>,
}

impl LbphRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_count(&self) -> usize {
        self.gallery.len()
    }
}

impl Recognizer for LbphRecognizer {
    fn train(&mut self, samples: &[LabeledFace]) {
        self.gallery = samples
            .iter()
            .map(|s| (s.person_id, LbpHistogram::from_face(&s.image)))
            .collect();

        let people: std::collections::HashSet<PersonId> =
            self.gallery.iter().map(|(id, _)| *id).collect();
        tracing::info!(
            samples = self.gallery.len(),
            people = people.len(),
            "trained LBPH recognizer"
        );
    }

    fn identify(&self, face: &FaceImage) -> Identification {
        if self.gallery.is_empty() {
            return Identification::unknown();
        }

        let query = LbpHistogram::from_face(face);

        // Always visit every entry; the gallery is small and order must not matter.
        let mut best_distance = f32::INFINITY;
        let mut best_id: Option<PersonId> = None;
        for (person_id, hist) in &self.gallery {
            let distance = query.chi_square_distance(hist);
            if distance < best_distance {
                best_distance = distance;
                best_id = Some(*person_id);
            }
        }

        match best_id {
            Some(person_id) if best_distance < ACCEPT_DISTANCE => Identification {
                person_id: Some(person_id),
                confidence: (1.0 - best_distance / CONFIDENCE_SCALE).clamp(0.0, 1.0),
                distance: best_distance,
            },
            _ => Identification {
                person_id: None,
                confidence: 0.0,
                distance: best_distance,
            },
        }
    }

    fn is_trained(&self) -> bool {
        !self.gallery.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stripes(horizontal: bool) -> FaceImage {
        let pixels = (0..SAMPLE_SIZE * SAMPLE_SIZE)
            .map(|i| {
                let (x, y) = (i % SAMPLE_SIZE, i / SAMPLE_SIZE);
                let k = if horizontal { y } else { x };
                if k % 2 == 0 { 0 } else { 255 }
            })
            .collect();
        FaceImage::from_pixels(pixels).unwrap()
    }

    fn uniform(value: u8) -> FaceImage {
        FaceImage::from_pixels(vec![value; SAMPLE_SIZE * SAMPLE_SIZE]).unwrap()
    }

    #[test]
    fn test_histogram_cells_normalized() {
        let hist = LbpHistogram::from_face(&stripes(true));
        assert_eq!(hist.values.len(), GRID_X * GRID_Y * LBP_BINS);
        for cell in hist.values.chunks(LBP_BINS) {
            let total: f32 = cell.iter().sum();
            assert!((total - 1.0).abs() < 1e-4, "cell sum {total}");
        }
    }

    #[test]
    fn test_uniform_face_all_ones_code() {
        let hist = LbpHistogram::from_face(&uniform(80));
        assert!((hist.values[255] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_chi_square_identical_is_zero() {
        let a = LbpHistogram::from_face(&stripes(true));
        assert_eq!(a.chi_square_distance(&a), 0.0);
    }

    #[test]
    fn test_chi_square_symmetric() {
        let a = LbpHistogram::from_face(&stripes(true));
        let b = LbpHistogram::from_face(&stripes(false));
        assert!((a.chi_square_distance(&b) - b.chi_square_distance(&a)).abs() < 1e-3);
    }

    #[test]
    fn test_untrained_reports_unknown() {
        let mut rec = LbphRecognizer::new();
        rec.train(&[]);
        assert!(!rec.is_trained());
        let id = rec.identify(&stripes(true));
        assert_eq!(id.person_id, None);
        assert_eq!(id.confidence, 0.0);
    }

    #[test]
    fn test_identify_exact_match_full_confidence() {
        let mut rec = LbphRecognizer::new();
        rec.train(&[LabeledFace { person_id: 7, image: stripes(true) }]);
        let id = rec.identify(&stripes(true));
        assert_eq!(id.person_id, Some(7));
        assert!((id.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_identify_picks_nearest_person() {
        let mut rec = LbphRecognizer::new();
        rec.train(&[
            LabeledFace { person_id: 1, image: stripes(true) },
            LabeledFace { person_id: 2, image: stripes(false) },
        ]);
        assert_eq!(rec.identify(&stripes(false)).person_id, Some(2));
        assert_eq!(rec.identify(&stripes(true)).person_id, Some(1));
    }

    #[test]
    fn test_identify_far_face_is_unknown() {
        let mut rec = LbphRecognizer::new();
        rec.train(&[LabeledFace { person_id: 1, image: stripes(true) }]);
        let id = rec.identify(&stripes(false));
        assert!(id.distance >= ACCEPT_DISTANCE, "distance {}", id.distance);
        assert_eq!(id.person_id, None);
        assert_eq!(id.confidence, 0.0);
    }

    #[test]
    fn test_retrain_replaces_gallery() {
        let mut rec = LbphRecognizer::new();
        rec.train(&[LabeledFace { person_id: 1, image: stripes(true) }]);
        rec.train(&[LabeledFace { person_id: 2, image: stripes(true) }]);
        assert_eq!(rec.sample_count(), 1);
        assert_eq!(rec.identify(&stripes(true)).person_id, Some(2));
    }
}
