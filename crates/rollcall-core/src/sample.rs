//! Face sample normalization.
//!
//! Crops a detected face region out of a grayscale frame and resizes it to
//! the fixed 200×200 grid used for enrollment storage and recognition.

use crate::types::BoundingBox;

/// Side length of a normalized face sample.
pub const SAMPLE_SIZE: usize = 200;

/// A normalized 200×200 grayscale face crop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceImage {
    pixels: Vec<u8>,
}

impl FaceImage {
    /// Wrap raw pixels; `None` unless exactly `SAMPLE_SIZE * SAMPLE_SIZE` bytes.
    pub fn from_pixels(pixels: Vec<u8>) -> Option<Self> {
        (pixels.len() == SAMPLE_SIZE * SAMPLE_SIZE).then_some(Self { pixels })
    }

    /// Crop `face` out of a `width`×`height` grayscale frame and resize it.
    ///
    /// The box is clamped to the frame first. Returns `None` when nothing of
    /// the box lies inside the frame or the frame buffer is too short.
    pub fn from_region(frame: &[u8], width: u32, height: u32, face: &BoundingBox) -> Option<Self> {
        let (w, h) = (width as usize, height as usize);
        if w == 0 || h == 0 || frame.len() < w * h {
            return None;
        }
        let (x0, y0, x1, y1) = clamp_region(face, w, h)?;
        let crop_w = x1 - x0;
        let crop_h = y1 - y0;

        let mut crop = Vec::with_capacity(crop_w * crop_h);
        for y in y0..y1 {
            crop.extend_from_slice(&frame[y * w + x0..y * w + x1]);
        }

        Some(Self {
            pixels: resize_bilinear(&crop, crop_w, crop_h, SAMPLE_SIZE, SAMPLE_SIZE),
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: usize, y: usize) -> u8 {
        self.pixels[y * SAMPLE_SIZE + x]
    }
}

/// Integer pixel bounds `(x0, y0, x1, y1)` of `face` inside a `w`×`h` frame, end-exclusive.
pub fn clamp_region(face: &BoundingBox, w: usize, h: usize) -> Option<(usize, usize, usize, usize)> {
    let x0 = face.x.floor().max(0.0) as usize;
    let y0 = face.y.floor().max(0.0) as usize;
    let x1 = (face.right().ceil().max(0.0) as usize).min(w);
    let y1 = (face.bottom().ceil().max(0.0) as usize).min(h);
    (x1 > x0 && y1 > y0).then_some((x0, y0, x1, y1))
}

/// Resize a grayscale buffer using bilinear interpolation with pixel-center alignment.
pub fn resize_bilinear(src: &[u8], width: usize, height: usize, new_w: usize, new_h: usize) -> Vec<u8> {
    let scale_x = width as f32 / new_w as f32;
    let scale_y = height as f32 / new_h as f32;

    let mut resized = vec![0u8; new_w * new_h];
    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            let tl = src[y0 * width + x0] as f32;
            let tr = src[y0 * width + x1] as f32;
            let bl = src[y1 * width + x0] as f32;
            let br = src[y1 * width + x1] as f32;

            let val = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;

            resized[y * new_w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
    resized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: 0.9, landmarks: None }
    }

    #[test]
    fn test_from_pixels_requires_exact_size() {
        assert!(FaceImage::from_pixels(vec![0u8; SAMPLE_SIZE * SAMPLE_SIZE]).is_some());
        assert!(FaceImage::from_pixels(vec![0u8; 10]).is_none());
    }

    #[test]
    fn test_bilinear_resize_uniform() {
        let frame = vec![128u8; 100 * 100];
        let resized = resize_bilinear(&frame, 100, 100, 200, 200);
        assert!(resized.iter().all(|&p| p == 128), "uniform resize should stay uniform");
    }

    #[test]
    fn test_same_size_crop_is_exact_copy() {
        // 300x240 frame with a horizontal gradient
        let (w, h) = (300usize, 240usize);
        let frame: Vec<u8> = (0..w * h).map(|i| (i % w) as u8).collect();
        let face = make_bbox(50.0, 20.0, 200.0, 200.0);

        let img = FaceImage::from_region(&frame, w as u32, h as u32, &face).unwrap();
        assert_eq!(img.pixels().len(), SAMPLE_SIZE * SAMPLE_SIZE);
        assert_eq!(img.pixel(0, 0), 50);
        assert_eq!(img.pixel(199, 199), 249);
    }

    #[test]
    fn test_region_clamped_to_frame() {
        let frame = vec![7u8; 64 * 64];
        let face = make_bbox(-10.0, -10.0, 40.0, 40.0);
        assert_eq!(clamp_region(&face, 64, 64), Some((0, 0, 30, 30)));
        let img = FaceImage::from_region(&frame, 64, 64, &face).unwrap();
        assert!(img.pixels().iter().all(|&p| p == 7));
    }

    #[test]
    fn test_region_outside_frame() {
        let frame = vec![0u8; 64 * 64];
        let face = make_bbox(100.0, 100.0, 20.0, 20.0);
        assert!(FaceImage::from_region(&frame, 64, 64, &face).is_none());
    }
}
