use anyhow::{Context, Result};
use serde::Serialize;

use super::ARTIFACT_PREFIX;
use crate::db::VectorStore;
use crate::model::Category;
use crate::storage::ObjectStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySummary {
    pub category: Category,
    pub num_people: u64,
    pub age: Option<f64>,
    pub last_processed_at: Option<f64>,
    pub updated_at: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AverageSummary {
    pub categories: Vec<CategorySummary>,
    /// Newest composite in the output container, if any.
    pub latest_artifact: Option<String>,
}

/// Read both aggregates and the newest composite name.
///
/// Artifact names embed a zero-padded UTC timestamp, so the greatest name is
/// the newest.
pub fn summarize(store: &dyn VectorStore, objects: &dyn ObjectStore, container: &str) -> Result<AverageSummary> {
    let mut categories = Vec::with_capacity(Category::ALL.len());
    for category in Category::ALL {
        let aggregate = store
            .get_by_id(category.aggregate_id(), false)
            .with_context(|| format!("Failed to read {} aggregate", category.label()))?;
        categories.push(CategorySummary {
            category,
            num_people: aggregate.as_ref().and_then(|a| a.num_people).unwrap_or(0),
            age: aggregate.as_ref().and_then(|a| a.age),
            last_processed_at: aggregate.as_ref().and_then(|a| a.last_processed_at),
            updated_at: aggregate.as_ref().and_then(|a| a.updated_at),
        });
    }

    let latest_artifact = objects
        .list(container)
        .with_context(|| format!("Failed to list {container}"))?
        .into_iter()
        .filter(|name| name.starts_with(ARTIFACT_PREFIX))
        .max();

    Ok(AverageSummary {
        categories,
        latest_artifact,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::db::SqliteStore;
    use crate::model::EmbeddingRecord;
    use crate::testing::MemoryObjectStore;
    use image::RgbImage;

    #[test]
    fn test_summary_of_empty_system() {
        let store = SqliteStore::open_in_memory(&StoreConfig { dimension: 2, ..Default::default() }).unwrap();
        let objects = MemoryObjectStore::default();

        let summary = summarize(&store, &objects, "out").unwrap();
        assert_eq!(summary.categories.len(), 2);
        assert!(summary.categories.iter().all(|c| c.num_people == 0 && c.age.is_none()));
        assert_eq!(summary.latest_artifact, None);
    }

    #[test]
    fn test_summary_reports_aggregates_and_latest_artifact() {
        let store = SqliteStore::open_in_memory(&StoreConfig { dimension: 2, ..Default::default() }).unwrap();
        store
            .save(&EmbeddingRecord {
                id: Category::Male.aggregate_id().to_string(),
                gender: Some(1),
                age: Some(41.5),
                embedding: Some(vec![0.1, 0.2]),
                num_people: Some(12),
                ..Default::default()
            })
            .unwrap();

        let objects = MemoryObjectStore::default();
        for name in [
            "mean_face.20240101000000.jpg",
            "mean_face.20240301120000.jpg",
            "mean_face.20231231235959.jpg",
            "zzz.jpg",
        ] {
            objects.insert("out", name, RgbImage::new(1, 1));
        }

        let summary = summarize(&store, &objects, "out").unwrap();
        let male = &summary.categories[1];
        assert_eq!(male.category, Category::Male);
        assert_eq!(male.num_people, 12);
        assert_eq!(male.age, Some(41.5));
        assert_eq!(summary.categories[0].num_people, 0);
        assert_eq!(summary.latest_artifact.as_deref(), Some("mean_face.20240301120000.jpg"));
    }
}
