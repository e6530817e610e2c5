//! Image persistence by container and name.

use chrono::{Duration, Utc};
use image::RgbImage;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::ObjectStoreConfig;
use crate::error::{ObjectError, ObjectResult};

/// Longest URL lifetime handed out, matching the S3 presign limit.
const MAX_URL_TTL_SECS: u64 = 7 * 24 * 60 * 60;

pub trait ObjectStore: Send + Sync {
    fn put(&self, container: &str, name: &str, image: &RgbImage) -> ObjectResult<()>;

    fn get(&self, container: &str, name: &str) -> ObjectResult<RgbImage>;

    /// Object names in `container`, sorted. A missing container is empty.
    fn list(&self, container: &str) -> ObjectResult<Vec<String>>;

    /// A URL for `name` that stops being valid after the configured TTL.
    fn resolve_url(&self, container: &str, name: &str) -> ObjectResult<String>;
}

/// Containers are directories under `root`; the codec follows the name's
/// extension.
pub struct FsObjectStore {
    root: PathBuf,
    url_base: Option<String>,
    url_ttl: Duration,
}

impl FsObjectStore {
    pub fn new(config: &ObjectStoreConfig) -> Self {
        Self {
            root: config.root.clone(),
            url_base: config.url_base.clone(),
            url_ttl: Duration::seconds(config.url_ttl_secs.min(MAX_URL_TTL_SECS) as i64),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, container: &str, name: &str) -> ObjectResult<PathBuf> {
        check_component(container)?;
        check_component(name)?;
        Ok(self.root.join(container).join(name))
    }
}

/// Names map straight onto path components, so they must not escape `root`.
fn check_component(part: &str) -> ObjectResult<()> {
    if part.is_empty() || part == "." || part == ".." || part.contains(['/', '\\']) {
        return Err(ObjectError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid object path component {part:?}"),
        )));
    }
    Ok(())
}

impl ObjectStore for FsObjectStore {
    fn put(&self, container: &str, name: &str, image: &RgbImage) -> ObjectResult<()> {
        let path = self.object_path(container, name)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        image.save(&path)?;
        tracing::debug!(container, name, "Stored object");
        Ok(())
    }

    fn get(&self, container: &str, name: &str) -> ObjectResult<RgbImage> {
        let path = self.object_path(container, name)?;
        if !path.is_file() {
            return Err(ObjectError::NotFound {
                container: container.to_string(),
                name: name.to_string(),
            });
        }
        Ok(image::open(&path)?.to_rgb8())
    }

    fn list(&self, container: &str) -> ObjectResult<Vec<String>> {
        check_component(container)?;
        let dir = self.root.join(container);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn resolve_url(&self, container: &str, name: &str) -> ObjectResult<String> {
        let path = self.object_path(container, name)?;
        let expires = (Utc::now() + self.url_ttl).timestamp();

        Ok(match &self.url_base {
            Some(base) => format!(
                "{}/{}/{}?expires={}",
                base.trim_end_matches('/'),
                container,
                name,
                expires
            ),
            None => format!("file://{}", path.display()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn store(root: &Path, url_base: Option<&str>) -> FsObjectStore {
        FsObjectStore::new(&ObjectStoreConfig {
            root: root.to_path_buf(),
            url_base: url_base.map(str::to_string),
            ..ObjectStoreConfig::default()
        })
    }

    #[test]
    fn test_put_get_list() {
        let dir = tempfile::tempdir().unwrap();
        let objects = store(dir.path(), None);

        let image = RgbImage::from_pixel(8, 6, Rgb([10, 20, 30]));
        objects.put("out", "b.png", &image).unwrap();
        objects.put("out", "a.jpg", &image).unwrap();

        assert_eq!(objects.list("out").unwrap(), vec!["a.jpg", "b.png"]);
        assert!(objects.list("missing").unwrap().is_empty());

        let back = objects.get("out", "b.png").unwrap();
        assert_eq!(back, image);
        assert_eq!(objects.get("out", "a.jpg").unwrap().dimensions(), (8, 6));
    }

    #[test]
    fn test_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let objects = store(dir.path(), None);
        assert!(matches!(objects.get("out", "nope.jpg"), Err(ObjectError::NotFound { .. })));
    }

    #[test]
    fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let objects = store(dir.path(), None);
        let image = RgbImage::new(1, 1);
        assert!(objects.put("..", "x.png", &image).is_err());
        assert!(objects.put("out", "../x.png", &image).is_err());
    }

    #[test]
    fn test_resolve_url() {
        let dir = tempfile::tempdir().unwrap();
        let objects = store(dir.path(), Some("http://cdn.local/"));
        let url = objects.resolve_url("out", "face.jpg").unwrap();
        assert!(url.starts_with("http://cdn.local/out/face.jpg?expires="));

        let expires: i64 = url.rsplit('=').next().unwrap().parse().unwrap();
        assert!(expires > Utc::now().timestamp());

        let local = store(dir.path(), None).resolve_url("out", "face.jpg").unwrap();
        assert!(local.starts_with("file://"));
    }
}
