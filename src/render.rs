//! Render templates and the composite canvas.
//!
//! A composite template is a photo with at least two faces; the leftmost is
//! the female slot and the next one the male slot. Each category's mean
//! identity is swapped onto its slot in a separate render, and the face
//! regions of those renders are merged into one canvas.

use anyhow::{bail, Context, Result};
use image::{imageops, RgbImage};

use crate::config::{AggregationConfig, ObjectStoreConfig};
use crate::faces::{sort_left_to_right, BoundingBox, DetectedFace, FaceCapability};
use crate::model::Category;
use crate::storage::ObjectStore;

/// A template image with its faces, left to right.
#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    pub canvas: RgbImage,
    pub slots: Vec<DetectedFace>,
}

impl Template {
    /// Detect faces on `canvas`, requiring at least `min_faces`.
    pub fn prepare(
        name: impl Into<String>,
        canvas: RgbImage,
        faces: &dyn FaceCapability,
        min_faces: usize,
    ) -> Result<Self> {
        let name = name.into();
        let mut slots = faces
            .detect(&canvas)
            .with_context(|| format!("Face detection failed on template {name}"))?;
        if slots.len() < min_faces {
            bail!("Template {} has {} faces, needs at least {}", name, slots.len(), min_faces);
        }
        sort_left_to_right(&mut slots);
        Ok(Self { name, canvas, slots })
    }

    fn slot(&self, index: usize) -> Result<&DetectedFace> {
        self.slots
            .get(index)
            .with_context(|| format!("Template {} has no face slot {}", self.name, index))
    }
}

/// Everything the engine renders onto, loaded once at startup.
pub struct RenderAssets {
    templates: Vec<Template>,
    female_portrait: Option<Template>,
    male_portrait: Option<Template>,
}

impl RenderAssets {
    pub fn new(templates: Vec<Template>, female_portrait: Option<Template>, male_portrait: Option<Template>) -> Result<Self> {
        if templates.is_empty() {
            bail!("No composite templates available");
        }
        Ok(Self {
            templates,
            female_portrait,
            male_portrait,
        })
    }

    /// Load templates from the base container. A template with too few faces
    /// is skipped with a warning; a missing portrait disables that
    /// category's portrait.
    pub fn load(
        objects: &dyn ObjectStore,
        faces: &dyn FaceCapability,
        storage: &ObjectStoreConfig,
        aggregation: &AggregationConfig,
    ) -> Result<Self> {
        let container = &storage.base_container;
        let names = objects
            .list(container)
            .with_context(|| format!("Failed to list templates in {container}"))?;

        let mut templates = Vec::new();
        for name in names.iter().filter(|n| n.starts_with(&aggregation.template_prefix)) {
            let canvas = objects
                .get(container, name)
                .with_context(|| format!("Failed to read template {name}"))?;
            match Template::prepare(name.as_str(), canvas, faces, 2) {
                Ok(template) => templates.push(template),
                Err(e) => tracing::warn!(template = %name, error = %e, "Skipping template"),
            }
        }

        let portrait = |name: &str| -> Option<Template> {
            let canvas = match objects.get(container, name) {
                Ok(canvas) => canvas,
                Err(e) => {
                    tracing::warn!(portrait = name, error = %e, "Portrait template unavailable");
                    return None;
                }
            };
            match Template::prepare(name, canvas, faces, 1) {
                Ok(t) => Some(t),
                Err(e) => {
                    tracing::warn!(portrait = name, error = %e, "Portrait template unusable");
                    None
                }
            }
        };
        let female_portrait = portrait(&aggregation.female_portrait);
        let male_portrait = portrait(&aggregation.male_portrait);

        tracing::info!(
            templates = templates.len(),
            female_portrait = female_portrait.is_some(),
            male_portrait = male_portrait.is_some(),
            "Loaded render assets"
        );
        Self::new(templates, female_portrait, male_portrait)
    }

    pub fn template_count(&self) -> usize {
        self.templates.len()
    }

    /// The composite template for `seed`; the same seed always picks the
    /// same template.
    pub fn pick(&self, seed: u64) -> &Template {
        &self.templates[(seed % self.templates.len() as u64) as usize]
    }

    pub fn portrait(&self, category: Category) -> Option<&Template> {
        match category {
            Category::Female => self.female_portrait.as_ref(),
            Category::Male => self.male_portrait.as_ref(),
        }
    }
}

/// Copy each render's face region onto a copy of `base`.
pub fn compose(base: &RgbImage, regions: &[(BoundingBox, RgbImage)]) -> RgbImage {
    let mut canvas = base.clone();
    let (width, height) = canvas.dimensions();
    for (bbox, render) in regions {
        let (rw, rh) = render.dimensions();
        let Some((x, y, w, h)) = bbox.clamp_to(width.min(rw), height.min(rh)) else {
            continue;
        };
        let patch = imageops::crop_imm(render, x, y, w, h).to_image();
        imageops::replace(&mut canvas, &patch, x as i64, y as i64);
    }
    canvas
}

/// Swap every category's identity onto its slot of `template` and merge the
/// results, restoring the merged canvas once if `restore` is set.
pub fn render_composite(
    faces: &dyn FaceCapability,
    template: &Template,
    identities: &[(Category, &[f32])],
    restore: bool,
) -> Result<RgbImage> {
    let mut regions = Vec::with_capacity(identities.len());
    for (category, identity) in identities {
        let slot = template.slot(category.gender() as usize)?;
        let render = faces
            .swap(&template.canvas, slot, identity)
            .with_context(|| format!("Face swap failed for {} slot", category.label()))?;
        regions.push((slot.bbox, render));
    }

    let canvas = compose(&template.canvas, &regions);
    if restore {
        faces.restore(&canvas).context("Face restoration failed")
    } else {
        Ok(canvas)
    }
}

/// Swap `identity` onto the single face of a portrait template.
pub fn render_portrait(faces: &dyn FaceCapability, template: &Template, identity: &[f32], restore: bool) -> Result<RgbImage> {
    let slot = template.slot(0)?;
    let render = faces
        .swap(&template.canvas, slot, identity)
        .with_context(|| format!("Face swap failed on portrait {}", template.name))?;
    if restore {
        faces.restore(&render).context("Face restoration failed")
    } else {
        Ok(render)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeFaces, MemoryObjectStore};
    use image::Rgb;

    fn bbox(x: i32, width: i32) -> BoundingBox {
        BoundingBox { x, y: 0, width, height: 4 }
    }

    #[test]
    fn test_compose_copies_only_regions() {
        let base = RgbImage::from_pixel(8, 4, Rgb([0, 0, 0]));
        let red = RgbImage::from_pixel(8, 4, Rgb([255, 0, 0]));
        let blue = RgbImage::from_pixel(8, 4, Rgb([0, 0, 255]));

        let out = compose(&base, &[(bbox(0, 2), red), (bbox(6, 10), blue)]);

        assert_eq!(out.get_pixel(1, 2), &Rgb([255, 0, 0]));
        assert_eq!(out.get_pixel(4, 2), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(7, 3), &Rgb([0, 0, 255]));
        assert_eq!(base.get_pixel(1, 2), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_template_needs_enough_faces() {
        let faces = FakeFaces::default();
        // FakeFaces finds width / height faces
        assert!(Template::prepare("solo", RgbImage::new(10, 10), &faces, 2).is_err());

        let t = Template::prepare("pair", RgbImage::new(20, 10), &faces, 2).unwrap();
        assert_eq!(t.slots.len(), 2);
        assert!(t.slots[0].bbox.x < t.slots[1].bbox.x);
    }

    #[test]
    fn test_composite_puts_each_identity_in_its_slot() {
        let faces = FakeFaces::default();
        let template = Template::prepare("pair", RgbImage::new(20, 10), &faces, 2).unwrap();

        let female = [1.0, 0.0, 0.0];
        let male = [0.0, 0.0, 1.0];
        let out = render_composite(
            &faces,
            &template,
            &[(Category::Female, &female[..]), (Category::Male, &male[..])],
            true,
        )
        .unwrap();

        assert_eq!(out.get_pixel(5, 5), &Rgb([255, 0, 0]));
        assert_eq!(out.get_pixel(15, 5), &Rgb([0, 0, 255]));
        assert_eq!(faces.swap_calls(), 2);
        assert_eq!(faces.restore_calls(), 1);
    }

    #[test]
    fn test_composite_with_one_category_leaves_other_slot() {
        let faces = FakeFaces::default();
        let template = Template::prepare("pair", RgbImage::new(20, 10), &faces, 2).unwrap();

        let male = [0.0, 1.0, 0.0];
        let out = render_composite(&faces, &template, &[(Category::Male, &male[..])], false).unwrap();

        assert_eq!(out.get_pixel(5, 5), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(15, 5), &Rgb([0, 255, 0]));
        assert_eq!(faces.restore_calls(), 0);
    }

    #[test]
    fn test_load_assets() {
        let objects = MemoryObjectStore::default();
        let faces = FakeFaces::default();
        let storage = ObjectStoreConfig::default();
        let aggregation = AggregationConfig::default();
        let base = storage.base_container.as_str();

        objects.insert(base, "mean_face_1.jpg", RgbImage::new(20, 10));
        objects.insert(base, "mean_face_2.jpg", RgbImage::new(10, 10));
        objects.insert(base, "other.jpg", RgbImage::new(20, 10));
        objects.insert(base, "mean_f_face.jpg", RgbImage::new(10, 10));

        let assets = RenderAssets::load(&objects, &faces, &storage, &aggregation).unwrap();
        assert_eq!(assets.template_count(), 1);
        assert_eq!(assets.pick(7).name, "mean_face_1.jpg");
        assert!(assets.portrait(Category::Female).is_some());
        assert!(assets.portrait(Category::Male).is_none());
    }

    #[test]
    fn test_load_without_templates_fails() {
        let objects = MemoryObjectStore::default();
        let faces = FakeFaces::default();
        let result = RenderAssets::load(&objects, &faces, &ObjectStoreConfig::default(), &AggregationConfig::default());
        assert!(result.is_err());
    }
}
