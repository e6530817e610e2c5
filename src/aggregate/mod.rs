//! The aggregation engine.
//!
//! Each tick folds observations newer than the aggregates' watermark into
//! one running-mean record per category and renders a composite of the two
//! means. Ticks are re-entrant: the store is only written after every upload,
//! and a rerun over the same window recomputes the same values for the same
//! ids. Callers must not run two ticks at once (see [`crate::schedule`]).

pub mod mean;
pub mod summary;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::{AggregationConfig, ObjectStoreConfig};
use crate::db::VectorStore;
use crate::faces::FaceCapability;
use crate::model::{epoch_now, Category, EmbeddingRecord};
use crate::render::{render_composite, render_portrait, RenderAssets};
use crate::storage::ObjectStore;

pub use summary::{summarize, AverageSummary, CategorySummary};

/// Name prefix of composite artifacts in the output container.
pub const ARTIFACT_PREFIX: &str = "mean_face.";

/// Artifact name for a tick whose newest observation is `timestamp`.
pub fn artifact_name(timestamp: f64) -> Result<String> {
    if !timestamp.is_finite() || timestamp.abs() >= i64::MAX as f64 {
        bail!("Timestamp {timestamp} cannot name an artifact");
    }
    let stamp = DateTime::<Utc>::from_timestamp(timestamp.floor() as i64, 0)
        .with_context(|| format!("Timestamp {timestamp} is out of range"))?
        .format("%Y%m%d%H%M%S");
    Ok(format!("{ARTIFACT_PREFIX}{stamp}.jpg"))
}

#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Nothing newer than the watermark.
    Idle,
    /// New records arrived but none had both an embedding and a category.
    Unfoldable { skipped: usize },
    Folded(TickReport),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Observations folded, per category.
    pub folded: Vec<(Category, usize)>,
    pub skipped: usize,
    pub max_created_at: f64,
    pub artifact: String,
}

/// A category's state going into the render and persist steps.
struct Folded {
    category: Category,
    embedding: Vec<f32>,
    /// `None` when nothing new arrived for this category.
    update: Option<EmbeddingRecord>,
}

pub struct Aggregator {
    store: Arc<dyn VectorStore>,
    objects: Arc<dyn ObjectStore>,
    faces: Arc<dyn FaceCapability>,
    assets: RenderAssets,
    output_container: String,
    restore: bool,
    clock: Box<dyn Fn() -> f64 + Send + Sync>,
}

impl Aggregator {
    pub fn new(
        store: Arc<dyn VectorStore>,
        objects: Arc<dyn ObjectStore>,
        faces: Arc<dyn FaceCapability>,
        assets: RenderAssets,
        storage: &ObjectStoreConfig,
        aggregation: &AggregationConfig,
    ) -> Self {
        Self {
            store,
            objects,
            faces,
            assets,
            output_container: storage.output_container.clone(),
            restore: aggregation.restore,
            clock: Box::new(epoch_now),
        }
    }

    /// Replace the clock used for `updated_at`.
    pub fn with_clock(mut self, clock: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn run_tick(&self) -> Result<TickOutcome> {
        let mut priors = Vec::with_capacity(Category::ALL.len());
        for category in Category::ALL {
            let prior = self
                .store
                .get_by_id(category.aggregate_id(), true)
                .with_context(|| format!("Failed to read {} aggregate", category.label()))?;
            priors.push((category, prior));
        }

        let watermark = priors
            .iter()
            .filter_map(|(_, p)| p.as_ref().and_then(|p| p.last_processed_at))
            .fold(0.0f64, f64::max);

        let new = self
            .store
            .get_after(watermark, true)
            .context("Failed to read new observations")?;
        if new.is_empty() {
            tracing::debug!(watermark, "No new observations");
            return Ok(TickOutcome::Idle);
        }

        let max_created_at = new
            .iter()
            .filter_map(|r| r.created_at)
            .fold(watermark, f64::max);

        let mut skipped = 0;
        let mut batches: Vec<Vec<&EmbeddingRecord>> = vec![Vec::new(); Category::ALL.len()];
        for record in &new {
            match (record.category(), &record.embedding) {
                (Some(category), Some(_)) if !record.is_aggregate() => {
                    batches[category.gender() as usize].push(record)
                }
                _ => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(skipped, "Skipping records without embedding or category");
        }
        if batches.iter().all(Vec::is_empty) {
            return Ok(TickOutcome::Unfoldable { skipped });
        }

        let now = (self.clock)();
        let folded: Vec<Folded> = priors
            .into_iter()
            .zip(&batches)
            .filter_map(|((category, prior), batch)| fold_category(category, prior, batch, now))
            .collect();

        let artifact = artifact_name(max_created_at)?;
        let template = self.assets.pick(max_created_at.max(0.0) as u64);
        let identities: Vec<(Category, &[f32])> = folded
            .iter()
            .map(|f| (f.category, f.embedding.as_slice()))
            .collect();
        let composite = render_composite(self.faces.as_ref(), template, &identities, self.restore)?;

        for f in folded.iter().filter(|f| f.update.is_some()) {
            let Some(portrait) = self.assets.portrait(f.category) else {
                continue;
            };
            let image = render_portrait(self.faces.as_ref(), portrait, &f.embedding, self.restore)?;
            self.objects
                .put(&self.output_container, &f.category.portrait_name(), &image)
                .with_context(|| format!("Failed to upload {} portrait", f.category.label()))?;
        }

        // Objects before aggregates; their names are fixed by the window.
        self.objects
            .put(&self.output_container, &artifact, &composite)
            .with_context(|| format!("Failed to upload {artifact}"))?;

        let updates: Vec<EmbeddingRecord> = folded.iter().filter_map(|f| f.update.clone()).collect();
        self.store
            .save_batch(&updates)
            .context("Failed to persist aggregates")?;

        let report = TickReport {
            folded: Category::ALL
                .into_iter()
                .zip(&batches)
                .filter(|(_, b)| !b.is_empty())
                .map(|(c, b)| (c, b.len()))
                .collect(),
            skipped,
            max_created_at,
            artifact,
        };
        tracing::info!(
            folded = ?report.folded,
            skipped,
            template = %template.name,
            artifact = %report.artifact,
            "Aggregates updated"
        );
        Ok(TickOutcome::Folded(report))
    }
}

/// Fold `batch` into `prior`. `None` when the category has neither.
fn fold_category(
    category: Category,
    prior: Option<EmbeddingRecord>,
    batch: &[&EmbeddingRecord],
    now: f64,
) -> Option<Folded> {
    let prior_vector = prior.as_ref().and_then(|p| {
        p.embedding
            .as_deref()
            .map(|v| (v, p.num_people.unwrap_or(0)))
    });

    let vectors: Vec<&[f32]> = batch.iter().filter_map(|r| r.embedding.as_deref()).collect();
    let Some(batch_vector) = mean::batch_mean(&vectors) else {
        // Nothing new; render the prior unchanged.
        return prior_vector.map(|(v, _)| Folded {
            category,
            embedding: v.to_vec(),
            update: None,
        });
    };

    let k = batch.len() as u64;
    let weight = prior_vector.map(|(_, w)| w).unwrap_or(0);
    let embedding = mean::fold_mean(prior_vector, &batch_vector, k);

    // Missing ages are left out of the batch mean; with none at all the
    // prior age stands.
    let prior_age = prior.as_ref().and_then(|p| p.age);
    let ages: Vec<f64> = batch.iter().filter_map(|r| r.age).collect();
    let age = if ages.is_empty() {
        prior_age
    } else {
        let batch_age = ages.iter().sum::<f64>() / ages.len() as f64;
        Some(mean::fold_scalar(prior_age.map(|a| (a, weight)), batch_age, k))
    };

    let last_processed_at = batch.iter().filter_map(|r| r.created_at).fold(f64::MIN, f64::max);

    let update = EmbeddingRecord {
        id: category.aggregate_id().to_string(),
        photo_id: Some(category.aggregate_photo_id().to_string()),
        photo_title: Some(category.aggregate_title().to_string()),
        gender: Some(category.gender()),
        age,
        file_name: Some(category.portrait_name()),
        embedding: Some(embedding.clone()),
        num_people: Some(weight + k),
        last_processed_at: Some(last_processed_at),
        updated_at: Some(now),
        ..Default::default()
    };

    Some(Folded {
        category,
        embedding,
        update: Some(update),
    })
}
