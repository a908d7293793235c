//! Per-store cache of materialized resources.

use crate::error::StoreError;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Locator → local path cache, backed by a private temp directory.
///
/// Lookups and inserts are individually atomic, but a fetch is not guarded as
/// a whole: two threads missing on the same locator both materialize it and
/// the last insert wins. Content is immutable, so the duplicate is wasted work
/// only.
#[derive(Debug)]
pub struct ResourceCache {
    entries: DashMap<String, PathBuf>,
    dir: TempDir,
    seq: AtomicUsize,
}

impl ResourceCache {
    /// Create a cache with a fresh temp directory.
    pub fn new() -> Result<Self, StoreError> {
        let dir = tempfile::Builder::new().prefix("assayer-").tempdir()?;
        Ok(Self {
            entries: DashMap::new(),
            dir,
            seq: AtomicUsize::new(0),
        })
    }

    pub fn get(&self, locator: &str) -> Option<PathBuf> {
        self.entries.get(locator).map(|entry| entry.value().clone())
    }

    pub fn insert(&self, locator: &str, path: PathBuf) {
        self.entries.insert(locator.to_string(), path);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Temp directory owned by this cache.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// A fresh path inside the temp directory, ending in `filename`.
    pub fn temp_path(&self, filename: &str) -> PathBuf {
        let n = self.seq.fetch_add(1, Ordering::Relaxed);
        let filename = sanitize(filename);
        self.dir.path().join(format!("{n}_{filename}"))
    }

    /// Forget every entry and delete the files materialized in the temp
    /// directory. Paths outside the temp directory are left alone.
    pub fn clear(&self) {
        let root = self.dir.path();
        for entry in self.entries.iter() {
            let path = entry.value();
            if path.starts_with(root) {
                let removed = if path.is_dir() {
                    std::fs::remove_dir_all(path)
                } else {
                    std::fs::remove_file(path)
                };
                if let Err(e) = removed {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to remove cached file"
                    );
                }
            }
        }
        self.entries.clear();
    }
}

/// Last path segment of a locator, safe to use as a filename.
pub(crate) fn file_name_of(locator: &str) -> &str {
    let trimmed = locator.split(['?', '#']).next().unwrap_or(locator);
    trimmed
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("resource")
}

fn sanitize(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_paths_are_distinct() {
        let cache = ResourceCache::new().unwrap();
        let a = cache.temp_path("data.csv");
        let b = cache.temp_path("data.csv");
        assert_ne!(a, b);
        assert!(a.starts_with(cache.dir()));
    }

    #[test]
    fn test_clear_removes_owned_files_only() {
        let outside = tempfile::tempdir().unwrap();
        let external = outside.path().join("keep.csv");
        std::fs::write(&external, "x").unwrap();

        let cache = ResourceCache::new().unwrap();
        let owned = cache.temp_path("drop.csv");
        std::fs::write(&owned, "y").unwrap();
        cache.insert("owned", owned.clone());
        cache.insert("external", external.clone());

        cache.clear();

        assert!(cache.is_empty());
        assert!(!owned.exists());
        assert!(external.exists());
    }

    #[test]
    fn test_file_name_of() {
        assert_eq!(file_name_of("https://host/data/orders.csv?x=1"), "orders.csv");
        assert_eq!(file_name_of("s3://bucket/dir/"), "dir");
        assert_eq!(file_name_of("orders"), "orders");
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("a b/c.csv"), "a_b_c.csv");
    }
}
