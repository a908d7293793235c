//! S3-compatible object store.

use super::cache::file_name_of;
use super::{InputStore, REQUEST_TIMEOUT, ResourceCache};
use crate::error::StoreError;
use crate::resource::StoreParameters;
use opendal::Operator;
use opendal::layers::TimeoutLayer;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Lifetime of presigned URLs handed out by [`InputStore::fetch_native`].
const PRESIGN_EXPIRY: Duration = Duration::from_secs(3600);

/// Store for objects in one S3 bucket.
///
/// Config keys: `bucket` (required), `endpoint`, `region`, `access_key_id`,
/// `secret_access_key`, `session_token`. The async operator runs on a small
/// private runtime; callers stay synchronous.
pub struct S3Store {
    params: StoreParameters,
    cache: ResourceCache,
    bucket: String,
    operator: Operator,
    runtime: tokio::runtime::Runtime,
    probed: AtomicBool,
}

impl S3Store {
    pub fn new(params: StoreParameters) -> Result<Self, StoreError> {
        let bucket = params
            .config_str("bucket")
            .ok_or_else(|| StoreError::access(&params.name, "missing bucket"))?
            .to_string();

        let mut builder = opendal::services::S3::default()
            .bucket(&bucket)
            .region(params.config_str("region").unwrap_or("us-east-1"));
        if let Some(endpoint) = params.config_str("endpoint") {
            builder = builder.endpoint(endpoint);
        }
        if let Some(key) = params.config_str("access_key_id") {
            builder = builder.access_key_id(key);
        }
        if let Some(secret) = params.config_str("secret_access_key") {
            builder = builder.secret_access_key(secret);
        }
        if let Some(token) = params.config_str("session_token") {
            builder = builder.session_token(token);
        }

        let operator = Operator::new(builder)
            .map_err(|e| StoreError::access(&params.name, e))?
            .finish()
            .layer(TimeoutLayer::new().with_timeout(REQUEST_TIMEOUT));

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;

        Ok(Self {
            params,
            cache: ResourceCache::new()?,
            bucket,
            operator,
            runtime,
            probed: AtomicBool::new(false),
        })
    }

    /// Bucket-access probe, once per store instance.
    fn probe(&self) -> Result<(), StoreError> {
        if self.probed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.runtime
            .block_on(self.operator.check())
            .map_err(|e| StoreError::access(&self.params.name, e))?;
        self.probed.store(true, Ordering::Release);
        Ok(())
    }

    fn key<'a>(&self, locator: &'a str) -> Result<&'a str, StoreError> {
        object_key(&self.bucket, locator).ok_or_else(|| {
            let message = format!("'{locator}' is outside bucket '{}'", self.bucket);
            StoreError::access(&self.params.name, message)
        })
    }

    fn map_err(&self, locator: &str, err: opendal::Error) -> StoreError {
        if err.kind() == opendal::ErrorKind::NotFound {
            StoreError::ResourceNotFound {
                store: self.params.name.clone(),
                locator: locator.to_string(),
            }
        } else {
            StoreError::access(&self.params.name, err)
        }
    }
}

impl InputStore for S3Store {
    fn params(&self) -> &StoreParameters {
        &self.params
    }

    fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    fn materialize(&self, locator: &str) -> Result<PathBuf, StoreError> {
        self.probe()?;
        let key = self.key(locator)?;
        let buffer = self
            .runtime
            .block_on(self.operator.read(key))
            .map_err(|e| self.map_err(locator, e))?;
        let path = self.cache.temp_path(file_name_of(key));
        std::fs::write(&path, buffer.to_vec())?;
        Ok(path)
    }

    fn fetch_native(&self, locator: &str) -> Result<String, StoreError> {
        self.probe()?;
        let key = self.key(locator)?;
        let request = self
            .runtime
            .block_on(self.operator.presign_read(key, PRESIGN_EXPIRY))
            .map_err(|e| self.map_err(locator, e))?;
        Ok(request.uri().to_string())
    }
}

/// Object key of `locator` inside `bucket`. Accepts `s3://bucket/key` and
/// bare keys.
fn object_key<'a>(bucket: &str, locator: &'a str) -> Option<&'a str> {
    match locator.strip_prefix("s3://") {
        Some(rest) => {
            let (b, key) = rest.split_once('/')?;
            (b == bucket && !key.is_empty()).then_some(key)
        }
        None => Some(locator.trim_start_matches('/')),
    }
}
