//! In-memory collaborators for unit tests.

use anyhow::Result;
use image::{Rgb, RgbImage};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::{ObjectError, ObjectResult};
use crate::faces::{BoundingBox, DetectedFace, FaceCapability};
use crate::storage::ObjectStore;

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), RgbImage>>,
    puts: AtomicUsize,
}

impl MemoryObjectStore {
    /// Seed an object without counting it as a write.
    pub fn insert(&self, container: &str, name: &str, image: RgbImage) {
        self.objects
            .lock()
            .unwrap()
            .insert((container.to_string(), name.to_string()), image);
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn contains(&self, container: &str, name: &str) -> bool {
        self.objects
            .lock()
            .unwrap()
            .contains_key(&(container.to_string(), name.to_string()))
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&self, container: &str, name: &str, image: &RgbImage) -> ObjectResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.insert(container, name, image.clone());
        Ok(())
    }

    fn get(&self, container: &str, name: &str) -> ObjectResult<RgbImage> {
        self.objects
            .lock()
            .unwrap()
            .get(&(container.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ObjectError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            })
    }

    fn list(&self, container: &str) -> ObjectResult<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(c, _)| c == container)
            .map(|(_, n)| n.clone())
            .collect())
    }

    /// Unlike a presigning store, fails for objects that do not exist.
    fn resolve_url(&self, container: &str, name: &str) -> ObjectResult<String> {
        if self.contains(container, name) {
            Ok(format!("mem://{container}/{name}"))
        } else {
            Err(ObjectError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            })
        }
    }
}

/// Finds `width / height` square faces side by side, reported right to left.
/// A swap paints the face box with the colour of the identity's first three
/// components; restore is the identity.
#[derive(Default)]
pub struct FakeFaces {
    swaps: AtomicUsize,
    restores: AtomicUsize,
}

impl FakeFaces {
    pub fn swap_calls(&self) -> usize {
        self.swaps.load(Ordering::SeqCst)
    }

    pub fn restore_calls(&self) -> usize {
        self.restores.load(Ordering::SeqCst)
    }
}

fn channel(v: Option<&f32>) -> u8 {
    (v.copied().unwrap_or(0.0).clamp(0.0, 1.0) * 255.0).round() as u8
}

impl FaceCapability for FakeFaces {
    fn detect(&self, image: &RgbImage) -> Result<Vec<DetectedFace>> {
        let (width, height) = image.dimensions();
        if height == 0 {
            return Ok(Vec::new());
        }
        let side = height as i32;
        Ok((0..width / height)
            .rev()
            .map(|i| DetectedFace {
                bbox: BoundingBox {
                    x: i as i32 * side,
                    y: 0,
                    width: side,
                    height: side,
                },
                embedding: Vec::new(),
                age: 30.0,
                gender: (i % 2) as u8,
                detection_score: 0.99,
            })
            .collect())
    }

    fn swap(&self, target: &RgbImage, target_face: &DetectedFace, identity: &[f32]) -> Result<RgbImage> {
        self.swaps.fetch_add(1, Ordering::SeqCst);
        let colour = Rgb([channel(identity.first()), channel(identity.get(1)), channel(identity.get(2))]);
        let mut out = target.clone();
        let (w, h) = out.dimensions();
        if let Some((x, y, bw, bh)) = target_face.bbox.clamp_to(w, h) {
            for py in y..y + bh {
                for px in x..x + bw {
                    out.put_pixel(px, py, colour);
                }
            }
        }
        Ok(out)
    }

    fn restore(&self, image: &RgbImage) -> Result<RgbImage> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        Ok(image.clone())
    }
}
