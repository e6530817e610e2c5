//! The record schema shared by observations and the two aggregates.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current time as fractional epoch seconds, the unit every timestamp field
/// uses.
pub fn epoch_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// One row of the `face_embeddings` collection.
///
/// Observations (one per detected face) are written once by ingestion.
/// Aggregates live under the two reserved ids of [`Category`] and are the
/// only records that are ever rewritten.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Epoch seconds. Stamped by the store on first write of an observation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_people: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<f64>,
    /// Only set on similarity search results; never persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl EmbeddingRecord {
    /// An observation record with the minimum a fold needs.
    pub fn observation(id: impl Into<String>, gender: Option<u8>, age: Option<f64>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            gender,
            age,
            embedding: Some(embedding),
            ..Default::default()
        }
    }

    pub fn is_aggregate(&self) -> bool {
        Category::from_aggregate_id(&self.id).is_some()
    }

    pub fn category(&self) -> Option<Category> {
        self.gender.and_then(Category::from_gender)
    }
}

/// The two fixed categories aggregates are kept for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Female,
    Male,
}

pub const FEMALE_AGGREGATE_ID: &str = "00000000-0000-0000-0000-000000000000";
pub const MALE_AGGREGATE_ID: &str = "11111111-1111-1111-1111-111111111111";

impl Category {
    pub const ALL: [Category; 2] = [Category::Female, Category::Male];

    pub fn from_gender(gender: u8) -> Option<Self> {
        match gender {
            0 => Some(Category::Female),
            1 => Some(Category::Male),
            _ => None,
        }
    }

    pub fn gender(self) -> u8 {
        match self {
            Category::Female => 0,
            Category::Male => 1,
        }
    }

    pub fn aggregate_id(self) -> &'static str {
        match self {
            Category::Female => FEMALE_AGGREGATE_ID,
            Category::Male => MALE_AGGREGATE_ID,
        }
    }

    pub fn from_aggregate_id(id: &str) -> Option<Self> {
        Category::ALL.into_iter().find(|c| c.aggregate_id() == id)
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::Female => "Female",
            Category::Male => "Male",
        }
    }

    pub(crate) fn aggregate_photo_id(self) -> &'static str {
        match self {
            Category::Female => "average_female_face",
            Category::Male => "average_male_face",
        }
    }

    pub(crate) fn aggregate_title(self) -> &'static str {
        match self {
            Category::Female => "Average Female Face",
            Category::Male => "Average Male Face",
        }
    }

    /// Name of the rendered portrait for this category's aggregate.
    pub fn portrait_name(self) -> String {
        format!("{}.jpg", self.aggregate_id())
    }
}
