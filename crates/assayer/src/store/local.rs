//! Local filesystem input store.

use super::{InputStore, ResourceCache};
use crate::error::StoreError;
use crate::resource::StoreParameters;
use std::path::PathBuf;

/// Passthrough store for files already on the local filesystem.
///
/// Relative locators are resolved against the store `uri`, when set.
pub struct LocalStore {
    params: StoreParameters,
    cache: ResourceCache,
}

impl LocalStore {
    pub fn new(params: StoreParameters) -> Result<Self, StoreError> {
        Ok(Self {
            params,
            cache: ResourceCache::new()?,
        })
    }

    fn resolve(&self, locator: &str) -> PathBuf {
        let locator = locator.strip_prefix("file://").unwrap_or(locator);
        let path = PathBuf::from(locator);
        match self.params.uri.as_deref() {
            Some(base) if path.is_relative() => {
                PathBuf::from(base.strip_prefix("file://").unwrap_or(base)).join(path)
            }
            _ => path,
        }
    }
}

impl InputStore for LocalStore {
    fn params(&self) -> &StoreParameters {
        &self.params
    }

    fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    fn materialize(&self, locator: &str) -> Result<PathBuf, StoreError> {
        let path = self.resolve(locator);
        if !path.exists() {
            return Err(StoreError::ResourceNotFound {
                store: self.params.name.clone(),
                locator: locator.to_string(),
            });
        }
        Ok(path)
    }

    fn fetch_native(&self, locator: &str) -> Result<String, StoreError> {
        self.fetch_file(locator)
            .map(|path| path.to_string_lossy().into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::StoreKind;

    #[test]
    fn test_relative_locator_uses_uri() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("orders.csv"), "id\n1\n").unwrap();

        let params = StoreParameters::new("local", StoreKind::Local)
            .uri(dir.path().to_string_lossy().into_owned());
        let store = LocalStore::new(params).unwrap();

        let path = store.fetch_file("orders.csv").unwrap();
        assert_eq!(path, dir.path().join("orders.csv"));
        assert_eq!(store.cache().len(), 1);
    }

    #[test]
    fn test_missing_file() {
        let store = LocalStore::new(StoreParameters::new("local", StoreKind::Local)).unwrap();
        let err = store.fetch_file("/definitely/not/here.csv").unwrap_err();
        assert!(matches!(err, StoreError::ResourceNotFound { .. }));
        assert!(store.cache().is_empty());
    }

    #[test]
    fn test_clean_paths_keeps_source_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("orders.csv");
        std::fs::write(&file, "id\n1\n").unwrap();

        let store = LocalStore::new(StoreParameters::new("local", StoreKind::Local)).unwrap();
        store.fetch_file(&file.to_string_lossy()).unwrap();
        store.clean_paths();

        assert!(store.cache().is_empty());
        assert!(file.exists());
    }
}
