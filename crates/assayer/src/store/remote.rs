//! HTTP(S) input store.

use super::cache::file_name_of;
use super::{InputStore, REQUEST_TIMEOUT, ResourceCache};
use crate::error::StoreError;
use crate::resource::StoreParameters;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder};
use std::path::PathBuf;

/// Content types accepted when no `content_types` list is configured.
const DEFAULT_CONTENT_TYPES: &[&str] = &[
    "text/csv",
    "text/plain",
    "application/csv",
    "application/json",
    "application/octet-stream",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/x-parquet",
];

#[derive(Debug, Clone, PartialEq)]
enum Auth {
    None,
    Basic { user: String, password: String },
    Bearer { token: String },
}

/// Store for resources served over HTTP.
///
/// Config keys: `auth` (`{type: basic, user, password}` or
/// `{type: bearer, token}`), `content_types` (allow-list) and `proxy` (a proxy
/// URL, or `false` to ignore the environment's proxy settings).
pub struct RemoteStore {
    params: StoreParameters,
    cache: ResourceCache,
    client: Client,
    auth: Auth,
    allowed: Vec<String>,
}

impl RemoteStore {
    pub fn new(params: StoreParameters) -> Result<Self, StoreError> {
        let access = |e: reqwest::Error| StoreError::access(&params.name, e);
        let mut builder = Client::builder().timeout(REQUEST_TIMEOUT);
        match params.config.get("proxy") {
            Some(serde_json::Value::Bool(false)) => builder = builder.no_proxy(),
            Some(serde_json::Value::String(url)) => {
                builder = builder.proxy(reqwest::Proxy::all(url.as_str()).map_err(access)?);
            }
            _ => {}
        }
        let client = builder.build().map_err(access)?;
        let auth = parse_auth(&params)?;
        let allowed = match params.config.get("content_types").and_then(|v| v.as_array()) {
            Some(list) => list
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            None => DEFAULT_CONTENT_TYPES.iter().map(|s| s.to_string()).collect(),
        };
        Ok(Self {
            params,
            cache: ResourceCache::new()?,
            client,
            auth,
            allowed,
        })
    }

    fn url(&self, locator: &str) -> String {
        resolve_url(self.params.uri.as_deref(), locator)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Auth::None => request,
            Auth::Basic { user, password } => request.basic_auth(user, Some(password)),
            Auth::Bearer { token } => request.bearer_auth(token),
        }
    }

    /// HEAD probe: the resource must exist and be readable.
    fn probe(&self, locator: &str, url: &str) -> Result<(), StoreError> {
        let response = self
            .authorize(self.client.head(url))
            .send()
            .map_err(|e| StoreError::access(&self.params.name, e))?;
        check_status(&self.params.name, locator, response.status())
    }
}

impl InputStore for RemoteStore {
    fn params(&self) -> &StoreParameters {
        &self.params
    }

    fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    fn materialize(&self, locator: &str) -> Result<PathBuf, StoreError> {
        let url = self.url(locator);
        self.probe(locator, &url)?;

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .map_err(|e| StoreError::access(&self.params.name, e))?;
        check_status(&self.params.name, locator, response.status())?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if !content_type_allowed(&self.allowed, content_type.as_deref()) {
            return Err(StoreError::ContentType {
                locator: locator.to_string(),
                content_type: content_type.unwrap_or_default(),
            });
        }

        let body = response
            .bytes()
            .map_err(|e| StoreError::access(&self.params.name, e))?;
        let path = self.cache.temp_path(file_name_of(&url));
        std::fs::write(&path, &body)?;
        Ok(path)
    }

    fn fetch_native(&self, locator: &str) -> Result<String, StoreError> {
        let url = self.url(locator);
        self.probe(locator, &url)?;
        Ok(url)
    }
}

fn parse_auth(params: &StoreParameters) -> Result<Auth, StoreError> {
    let Some(auth) = params.config.get("auth") else {
        return Ok(Auth::None);
    };
    let field = |key: &str| {
        auth.get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| StoreError::access(&params.name, format!("auth is missing '{key}'")))
    };
    match auth.get("type").and_then(|v| v.as_str()) {
        Some("basic") => Ok(Auth::Basic {
            user: field("user")?,
            password: field("password")?,
        }),
        Some("bearer") => Ok(Auth::Bearer {
            token: field("token")?,
        }),
        other => Err(StoreError::access(
            &params.name,
            format!("unknown auth type {other:?}"),
        )),
    }
}

fn check_status(store: &str, locator: &str, status: StatusCode) -> Result<(), StoreError> {
    if status == StatusCode::NOT_FOUND {
        Err(StoreError::ResourceNotFound {
            store: store.to_string(),
            locator: locator.to_string(),
        })
    } else if !status.is_success() {
        Err(StoreError::access(store, format!("HTTP {status}")))
    } else {
        Ok(())
    }
}

/// Absolute URLs pass through; anything else is joined to the store base.
fn resolve_url(base: Option<&str>, locator: &str) -> String {
    if locator.starts_with("http://") || locator.starts_with("https://") {
        return locator.to_string();
    }
    match base {
        Some(base) => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            locator.trim_start_matches('/')
        ),
        None => locator.to_string(),
    }
}

/// Media type match, ignoring parameters such as `charset`.
fn content_type_allowed(allowed: &[String], header: Option<&str>) -> bool {
    let Some(header) = header else {
        return false;
    };
    let media = header.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    allowed.iter().any(|a| a.eq_ignore_ascii_case(&media))
}
