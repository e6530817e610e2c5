//! Vector encoding and similarity scoring.

use rayon::prelude::*;
use std::cmp::Ordering;

/// Little-endian f32 blob, the on-disk vector format.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in [-1, 1]. Mismatched or zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Score every candidate against `query` and order best first.
///
/// Equal scores are ordered by id, so a given store state always pages the
/// same way.
pub fn rank_by_similarity(query: &[f32], candidates: Vec<(String, Vec<f32>)>) -> Vec<(String, f32)> {
    let mut scored: Vec<(String, f32)> = candidates
        .into_par_iter()
        .map(|(id, vector)| {
            let score = cosine_similarity(query, &vector);
            (id, score)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored
}
