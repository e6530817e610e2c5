use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub objects: ObjectStoreConfig,

    #[serde(default)]
    pub aggregation: AggregationConfig,

    #[serde(default)]
    pub graph: GraphConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,

    /// Length every stored embedding must have.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Cap on plain filtered reads (`get`, `get_after`).
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Records per transaction in a batch upsert.
    #[serde(default = "default_batch_chunk")]
    pub batch_chunk: usize,
}

fn default_sqlite_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("meanface")
        .join("meanface.db")
}

fn default_dimension() -> usize {
    512 // ArcFace embedding width
}

fn default_page_size() -> usize {
    100
}

fn default_batch_chunk() -> usize {
    64
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            dimension: default_dimension(),
            page_size: default_page_size(),
            batch_chunk: default_batch_chunk(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    #[serde(default = "default_object_root")]
    pub root: PathBuf,

    /// Container rendered faces and composites are written to.
    #[serde(default = "default_output_container")]
    pub output_container: String,

    /// Container holding the template images.
    #[serde(default = "default_base_container")]
    pub base_container: String,

    /// Public prefix for resolved URLs. Falls back to `file://` paths.
    #[serde(default)]
    pub url_base: Option<String>,

    #[serde(default = "default_url_ttl_secs")]
    pub url_ttl_secs: u64,
}

fn default_object_root() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("meanface/objects")
}

fn default_output_container() -> String {
    "processed-images".to_string()
}

fn default_base_container() -> String {
    "base-images".to_string()
}

fn default_url_ttl_secs() -> u64 {
    24 * 60 * 60
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            root: default_object_root(),
            output_container: default_output_container(),
            base_container: default_base_container(),
            url_base: None,
            url_ttl_secs: default_url_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Base-container prefix of the two-face composite templates.
    #[serde(default = "default_template_prefix")]
    pub template_prefix: String,

    #[serde(default = "default_female_portrait")]
    pub female_portrait: String,

    #[serde(default = "default_male_portrait")]
    pub male_portrait: String,

    /// Run the restoration pass over rendered images.
    #[serde(default = "default_restore")]
    pub restore: bool,
}

fn default_interval_secs() -> u64 {
    180
}

fn default_template_prefix() -> String {
    "mean_face".to_string()
}

fn default_female_portrait() -> String {
    "mean_f_face.jpg".to_string()
}

fn default_male_portrait() -> String {
    "mean_m_face.jpg".to_string()
}

fn default_restore() -> bool {
    true
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            template_prefix: default_template_prefix(),
            female_portrait: default_female_portrait(),
            male_portrait: default_male_portrait(),
            restore: default_restore(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Cosine similarity a record needs to appear in a graph.
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    #[serde(default = "default_graph_batch_size")]
    pub batch_size: usize,
}

fn default_min_score() -> f32 {
    0.3
}

fn default_graph_batch_size() -> usize {
    50
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            batch_size: default_graph_batch_size(),
        }
    }
}

impl Config {
    /// Load from `MEANFACE_CONFIG` or the default location, writing the
    /// defaults out on first run.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("meanface")
    }

    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("MEANFACE_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [store]
            dimension = 128

            [graph]
            min_score = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.store.dimension, 128);
        assert_eq!(config.store.page_size, 100);
        assert_eq!(config.graph.min_score, 0.5);
        assert_eq!(config.graph.batch_size, 50);
        assert_eq!(config.objects.output_container, "processed-images");
        assert_eq!(config.aggregation.template_prefix, "mean_face");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.aggregation.interval_secs = 30;
        config.objects.url_base = Some("http://localhost:9000".into());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.aggregation.interval_secs, 30);
        assert_eq!(loaded.objects.url_base.as_deref(), Some("http://localhost:9000"));
        assert_eq!(loaded.store.dimension, 512);
    }
}
