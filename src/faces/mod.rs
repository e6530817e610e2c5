//! The face model contract the engine renders through.
//!
//! Detection, identity swapping and restoration are provided by an external
//! model runtime; this module only fixes their shape.

use anyhow::Result;
use image::RgbImage;

/// Bounding box for a detected face, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    /// Clip to an image of `width` x `height`. `None` if nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0) as i64;
        let y0 = self.y.max(0) as i64;
        let x1 = (self.x as i64 + self.width as i64).min(width as i64);
        let y1 = (self.y as i64 + self.height as i64).min(height as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// One face found by [`FaceCapability::detect`].
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub embedding: Vec<f32>,
    pub age: f32,
    pub gender: u8,
    pub detection_score: f32,
}

pub trait FaceCapability: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<DetectedFace>>;

    /// Render `identity` onto `target_face` of `target`, returning a new image.
    fn swap(&self, target: &RgbImage, target_face: &DetectedFace, identity: &[f32]) -> Result<RgbImage>;

    fn restore(&self, image: &RgbImage) -> Result<RgbImage>;
}

/// Order faces left to right, the order template slots and `face_index` use.
pub fn sort_left_to_right(faces: &mut [DetectedFace]) {
    faces.sort_by_key(|f| (f.bbox.x, f.bbox.y));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face_at(x: i32) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox { x, y: 0, width: 10, height: 10 },
            embedding: Vec::new(),
            age: 30.0,
            gender: 0,
            detection_score: 0.9,
        }
    }

    #[test]
    fn test_sort_left_to_right() {
        let mut faces = vec![face_at(50), face_at(5), face_at(20)];
        sort_left_to_right(&mut faces);
        let xs: Vec<i32> = faces.iter().map(|f| f.bbox.x).collect();
        assert_eq!(xs, vec![5, 20, 50]);
    }

    #[test]
    fn test_clamp_to() {
        let b = BoundingBox { x: -5, y: 90, width: 20, height: 20 };
        assert_eq!(b.clamp_to(100, 100), Some((0, 90, 15, 10)));

        let outside = BoundingBox { x: 200, y: 0, width: 10, height: 10 };
        assert_eq!(outside.clamp_to(100, 100), None);
    }
}
