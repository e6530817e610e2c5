mod schema;
pub mod embeddings;
pub mod similarity;
pub mod sqlite;

use crate::error::{StoreError, StoreResult};
use crate::model::EmbeddingRecord;

pub use embeddings::cosine_similarity;
pub use sqlite::SqliteStore;

/// Equality filter over record metadata. Set fields are AND-ed together; an
/// empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    pub photo_id: Option<String>,
    pub photo_title: Option<String>,
    pub file_name: Option<String>,
    pub gender: Option<u8>,
    pub face_index: Option<i64>,
}

impl RecordFilter {
    pub fn photo_id(photo_id: impl Into<String>) -> Self {
        Self {
            photo_id: Some(photo_id.into()),
            ..Default::default()
        }
    }

    pub fn file_name(file_name: impl Into<String>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> StoreResult<()> {
        for (field, value) in [
            ("photo_id", &self.photo_id),
            ("photo_title", &self.photo_title),
            ("file_name", &self.file_name),
        ] {
            if matches!(value, Some(v) if v.is_empty()) {
                return Err(StoreError::Validation(format!("filter on empty {field}")));
            }
        }
        if let Some(g) = self.gender {
            if g > 1 {
                return Err(StoreError::Validation(format!("gender must be 0 or 1, got {g}")));
            }
        }
        if let Some(i) = self.face_index {
            if i < 0 {
                return Err(StoreError::Validation(format!("negative face_index {i}")));
            }
        }
        Ok(())
    }
}

/// Keyed embedding storage with metadata filters and similarity search.
///
/// Plain reads (`get`, `get_after`) return one bounded page; callers that
/// need every match must page explicitly.
pub trait VectorStore: Send + Sync {
    /// Upsert one record.
    fn save(&self, record: &EmbeddingRecord) -> StoreResult<()>;

    /// Upsert many records. Not atomic across the batch; on
    /// [`StoreError::PartialBatch`] retry the whole batch.
    fn save_batch(&self, records: &[EmbeddingRecord]) -> StoreResult<()>;

    fn get(&self, filter: &RecordFilter, with_vectors: bool) -> StoreResult<Vec<EmbeddingRecord>>;

    fn get_by_id(&self, id: &str, with_vectors: bool) -> StoreResult<Option<EmbeddingRecord>>;

    /// Records created strictly after `timestamp`, oldest first, one page.
    fn get_after(&self, timestamp: f64, with_vectors: bool) -> StoreResult<Vec<EmbeddingRecord>>;

    /// One page of every record ranked against the vector of `id`, best
    /// first, with `score` set. Unknown `id` yields an empty page.
    fn search_page(&self, id: &str, limit: usize, offset: usize) -> StoreResult<Vec<EmbeddingRecord>>;

    fn count(&self) -> StoreResult<usize>;

    /// The `n` nearest records to `id`. May include `id` itself.
    fn search_top_n(&self, id: &str, n: usize) -> StoreResult<Vec<EmbeddingRecord>> {
        self.search_page(id, n, 0)
    }

    /// Every record scoring at least `min_score` against `id`, best first,
    /// never including `id`.
    fn search_by_min_score(
        &self,
        id: &str,
        min_score: f32,
        batch_size: usize,
    ) -> StoreResult<Vec<EmbeddingRecord>> {
        similarity::collect_above_threshold(id, min_score, batch_size, |offset, limit| {
            self.search_page(id, limit, offset)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_validation() {
        assert!(RecordFilter::default().validate().is_ok());
        assert!(RecordFilter::photo_id("p1").validate().is_ok());
        assert!(RecordFilter::photo_id("").validate().is_err());

        let bad_gender = RecordFilter {
            gender: Some(3),
            ..Default::default()
        };
        assert!(matches!(bad_gender.validate(), Err(StoreError::Validation(_))));
    }

    #[test]
    fn test_empty_filter() {
        assert!(RecordFilter::default().is_empty());
        assert!(!RecordFilter::file_name("a.jpg").is_empty());
    }
}
