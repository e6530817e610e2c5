//! Similarity graphs rooted at one record.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;

use crate::config::{GraphConfig, ObjectStoreConfig};
use crate::db::VectorStore;
use crate::model::{Category, EmbeddingRecord};
use crate::storage::ObjectStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub photo_id: Option<String>,
    pub photo_title: Option<String>,
    pub gender: Option<&'static str>,
    pub age: Option<f64>,
    pub face_index: Option<i64>,
    /// `None` for the root.
    pub score: Option<f32>,
    pub file_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityGraph {
    pub root_id: String,
    pub not_found: bool,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl SimilarityGraph {
    fn not_found(root_id: &str) -> Self {
        Self {
            root_id: root_id.to_string(),
            not_found: true,
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }
}

pub struct GraphBuilder {
    store: Arc<dyn VectorStore>,
    objects: Arc<dyn ObjectStore>,
    container: String,
    min_score: f32,
    batch_size: usize,
}

impl GraphBuilder {
    pub fn new(
        store: Arc<dyn VectorStore>,
        objects: Arc<dyn ObjectStore>,
        storage: &ObjectStoreConfig,
        graph: &GraphConfig,
    ) -> Self {
        Self {
            store,
            objects,
            container: storage.output_container.clone(),
            min_score: graph.min_score,
            batch_size: graph.batch_size,
        }
    }

    /// The root plus every record scoring at least `min_score` against it,
    /// each linked from the root. An unknown root gives an empty graph with
    /// `not_found` set.
    pub fn build(&self, root_id: &str) -> Result<SimilarityGraph> {
        let Some(root) = self
            .store
            .get_by_id(root_id, false)
            .with_context(|| format!("Failed to read {root_id}"))?
        else {
            tracing::debug!(root_id, "Graph root not found");
            return Ok(SimilarityGraph::not_found(root_id));
        };

        let mut similar = self
            .store
            .search_by_min_score(root_id, self.min_score, self.batch_size)
            .with_context(|| format!("Similarity search from {root_id} failed"))?;
        // Already best first; keep it that way if a store ever isn't.
        similar.sort_by(|a, b| {
            b.score
                .unwrap_or(f32::NEG_INFINITY)
                .total_cmp(&a.score.unwrap_or(f32::NEG_INFINITY))
        });

        let edges = similar
            .iter()
            .map(|r| GraphEdge {
                source: root_id.to_string(),
                target: r.id.clone(),
                score: r.score.unwrap_or_default(),
            })
            .collect();

        let mut nodes = Vec::with_capacity(similar.len() + 1);
        nodes.push(self.node(root, None));
        for record in similar {
            let score = record.score;
            nodes.push(self.node(record, score));
        }

        tracing::debug!(root_id, nodes = nodes.len(), min_score = self.min_score, "Built similarity graph");
        Ok(SimilarityGraph {
            root_id: root_id.to_string(),
            not_found: false,
            nodes,
            edges,
        })
    }

    fn node(&self, record: EmbeddingRecord, score: Option<f32>) -> GraphNode {
        let name = format!("{}.jpg", record.id);
        let file_url = match self.objects.resolve_url(&self.container, &name) {
            Ok(url) => Some(url),
            Err(e) => {
                tracing::warn!(id = %record.id, error = %e, "Could not resolve image URL");
                None
            }
        };
        GraphNode {
            gender: record.category().map(Category::label),
            id: record.id,
            photo_id: record.photo_id,
            photo_title: record.photo_title,
            age: record.age,
            face_index: record.face_index,
            score,
            file_url,
        }
    }
}
