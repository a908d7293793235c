//! Store that holds nothing.

use super::{InputStore, ResourceCache};
use crate::error::StoreError;
use crate::resource::StoreParameters;
use std::path::PathBuf;

/// Placeholder input store for runs that only scaffold metadata.
pub struct DummyStore {
    params: StoreParameters,
    cache: ResourceCache,
}

impl DummyStore {
    pub fn new(params: StoreParameters) -> Result<Self, StoreError> {
        Ok(Self {
            params,
            cache: ResourceCache::new()?,
        })
    }
}

impl InputStore for DummyStore {
    fn params(&self) -> &StoreParameters {
        &self.params
    }

    fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    fn materialize(&self, _locator: &str) -> Result<PathBuf, StoreError> {
        Err(StoreError::Empty(self.params.name.clone()))
    }

    fn fetch_native(&self, _locator: &str) -> Result<String, StoreError> {
        Err(StoreError::Empty(self.params.name.clone()))
    }
}
