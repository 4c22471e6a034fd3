//! The top-level client: apidoc lifecycle, resource lookup and the HTTP call path.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::action::Action;
use crate::apidoc::ApiDoc;
use crate::cache::ApidocCache;
use crate::error::ApiError;
use crate::resource::Resource;
use crate::route::param_to_string;
use crate::transport::{
    Auth, FilePart, HttpRequest, RequestBody, ReqwestTransport, Transport, TransportSettings,
};

/// Response header carrying the checksum of the server's current apidoc.
pub const CHECKSUM_HEADER: &str = "apipie-checksum";

const USER_AGENT: &str = concat!("apipie-client/", env!("CARGO_PKG_VERSION"));

/// Connection settings for [`Api`].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ApiConfig {
    pub uri: String,
    pub api_version: u32,
    pub language: Option<String>,
    pub auth: Option<Auth>,
    /// PEM encoded client certificate and key files.
    pub client_cert: Option<(PathBuf, PathBuf)>,
    pub verify_ssl: bool,
    pub timeout: Option<Duration>,
    pub apidoc_cache_base_dir: Option<PathBuf>,
    pub apidoc_cache_dir: Option<PathBuf>,
    pub apidoc_cache_name: Option<String>,
}

impl ApiConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            api_version: 1,
            language: None,
            auth: None,
            client_cert: None,
            verify_ssl: true,
            timeout: None,
            apidoc_cache_base_dir: None,
            apidoc_cache_dir: None,
            apidoc_cache_name: None,
        }
    }

    pub fn api_version(mut self, version: u32) -> Self {
        self.api_version = version;
        self
    }

    /// Preferred language, e.g. `en_US`.
    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.auth = Some(Auth::Basic {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    pub fn bearer_auth(mut self, token: impl Into<String>) -> Self {
        self.auth = Some(Auth::Bearer(token.into()));
        self
    }

    pub fn client_cert(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.client_cert = Some((cert.into(), key.into()));
        self
    }

    pub fn verify_ssl(mut self, verify: bool) -> Self {
        self.verify_ssl = verify;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Base directory under which per-server cache directories are created.
    pub fn apidoc_cache_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.apidoc_cache_base_dir = Some(dir.into());
        self
    }

    /// Exact cache directory; overrides the one derived from the base dir.
    pub fn apidoc_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.apidoc_cache_dir = Some(dir.into());
        self
    }

    pub fn apidoc_cache_name(mut self, name: impl Into<String>) -> Self {
        self.apidoc_cache_name = Some(name.into());
        self
    }

    /// The cache directory this configuration resolves to.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        if let Some(dir) = &self.apidoc_cache_dir {
            return dir.clone();
        }
        let base = self
            .apidoc_cache_base_dir
            .clone()
            .unwrap_or_else(default_cache_base_dir);
        base.join(self.uri.replace([':', '/'], "_"))
            .join(format!("v{}", self.api_version))
    }

    fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            auth: self.auth.clone(),
            client_cert: self.client_cert.clone(),
            verify_ssl: self.verify_ssl,
            timeout: self.timeout,
        }
    }
}

/// `$XDG_CACHE_HOME/apipie-client`, or `~/.cache/apipie-client`.
fn default_cache_base_dir() -> PathBuf {
    std::env::var_os("XDG_CACHE_HOME")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|home| home.join(".cache")))
        .unwrap_or_else(std::env::temp_dir)
        .join("apipie-client")
}

/// Per-call extras: headers, validation switch and form/multipart side channels.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub headers: Vec<(String, String)>,
    pub skip_validation: bool,
    /// Sent as form fields; also count as provided params during validation.
    pub data: BTreeMap<String, String>,
    /// Sent as multipart uploads; also count as provided params during validation.
    pub files: BTreeMap<String, FilePart>,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_skip_validation(mut self, skip: bool) -> Self {
        self.skip_validation = skip;
        self
    }

    pub fn with_data(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(name.into(), value.into());
        self
    }

    pub fn with_file(mut self, name: impl Into<String>, file: FilePart) -> Self {
        self.files.insert(name.into(), file);
        self
    }

    fn side_channel_keys(&self) -> BTreeSet<String> {
        self.data.keys().chain(self.files.keys()).cloned().collect()
    }
}

struct CacheState {
    apidoc: Option<Arc<ApiDoc>>,
    cache_name: String,
}

/// Client for an Apipie-described HTTP API.
///
/// The apidoc is loaded lazily on first use, from the cache directory when
/// possible and from the server otherwise. Every response's checksum header
/// is compared with the current cache name; a mismatch wipes the cache and
/// the next access reloads under the new name.
pub struct Api {
    uri: String,
    base_url: Url,
    api_version: u32,
    language: Option<String>,
    cache: ApidocCache,
    state: Mutex<CacheState>,
    // Serializes apidoc loading; never held while `state` is locked.
    load_lock: Mutex<()>,
    transport: Box<dyn Transport>,
}

impl std::fmt::Debug for Api {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Api")
            .field("uri", &self.uri)
            .field("api_version", &self.api_version)
            .field("language", &self.language)
            .field("apidoc_cache_dir", &self.cache.dir())
            .field("apidoc_cache_name", &self.apidoc_cache_name())
            .finish_non_exhaustive()
    }
}

impl Api {
    /// Build a client talking HTTP through `reqwest`.
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let transport = ReqwestTransport::new(&config.transport_settings())?;
        Self::with_transport(config, Box::new(transport))
    }

    /// Build a client on top of a custom [`Transport`].
    pub fn with_transport(config: ApiConfig, transport: Box<dyn Transport>) -> Result<Self, ApiError> {
        let base_url = Url::parse(&config.uri).map_err(|source| ApiError::InvalidUrl {
            url: config.uri.clone(),
            source,
        })?;
        let cache = ApidocCache::new(config.resolved_cache_dir(), config.language.as_deref());
        let cache_name = config
            .apidoc_cache_name
            .clone()
            .unwrap_or_else(|| cache.find_name());
        debug!(dir = %cache.dir().display(), name = %cache_name, "apidoc cache");

        Ok(Self {
            uri: config.uri,
            base_url,
            api_version: config.api_version,
            language: config.language,
            cache,
            state: Mutex::new(CacheState {
                apidoc: None,
                cache_name,
            }),
            load_lock: Mutex::new(()),
            transport,
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    fn state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn apidoc_cache_dir(&self) -> &Path {
        self.cache.dir()
    }

    pub fn apidoc_cache_name(&self) -> String {
        self.state().cache_name.clone()
    }

    /// `.json`, or `.<language>.json` when a language is configured.
    pub fn cache_extension(&self) -> &str {
        self.cache.extension()
    }

    /// Path of the cache file for the current cache name.
    pub fn apidoc_cache_file(&self) -> PathBuf {
        self.cache.file(&self.apidoc_cache_name())
    }

    /// The API description, loading it on first access.
    pub fn apidoc(&self) -> Result<Arc<ApiDoc>, ApiError> {
        let loaded = self.state().apidoc.clone();
        if let Some(doc) = loaded {
            return Ok(doc);
        }

        let _loading = self.load_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let loaded = self.state().apidoc.clone();
        if let Some(doc) = loaded {
            return Ok(doc);
        }

        let name = self.apidoc_cache_name();
        let doc = match self.cache.load(&name) {
            Some(doc) => doc,
            None => self.retrieve_apidoc()?,
        };
        let doc = Arc::new(doc);
        self.state().apidoc = Some(Arc::clone(&doc));
        Ok(doc)
    }

    fn retrieve_apidoc(&self) -> Result<ApiDoc, ApiError> {
        self.cache.ensure_dir()?;

        let mut document = None;
        if let Some(language) = &self.language {
            document = self.retrieve_localized(language);
            let family = language.split('_').next().unwrap_or(language);
            if document.is_none() && family != language {
                document = self.retrieve_localized(family);
            }
        }

        let document = match document {
            Some(document) => document,
            None => {
                let path = format!("/apidoc/v{}.json", self.api_version);
                match self.http_call("get", &path, &Map::new(), &CallOptions::default()) {
                    Ok(Some(document)) if !is_empty_document(&document) => document,
                    Ok(_) => {
                        return Err(ApiError::DocLoading {
                            uri: self.uri.clone(),
                            reason: "empty response".to_string(),
                            source: None,
                        })
                    }
                    Err(err) => {
                        return Err(ApiError::DocLoading {
                            uri: self.uri.clone(),
                            reason: err.to_string(),
                            source: Some(Box::new(err)),
                        })
                    }
                }
            }
        };

        let doc: ApiDoc = serde_json::from_value(document.clone()).map_err(|err| {
            ApiError::DocLoading {
                uri: self.uri.clone(),
                reason: err.to_string(),
                source: Some(Box::new(ApiError::ResponseDecode(err))),
            }
        })?;
        // The checksum of the response above may have renamed the cache.
        let path = self.cache.store(&self.apidoc_cache_name(), &document)?;
        info!(path = %path.display(), "stored apidoc");
        Ok(doc)
    }

    fn retrieve_localized(&self, language: &str) -> Option<Value> {
        let path = format!("/apidoc/v{}.{language}.json", self.api_version);
        match self.http_call("get", &path, &Map::new(), &CallOptions::default()) {
            Ok(Some(document)) if !is_empty_document(&document) => Some(document),
            Ok(_) => {
                warn!(%path, "empty localized apidoc");
                None
            }
            Err(err) => {
                warn!(%path, error = %err, "localized apidoc unavailable");
                None
            }
        }
    }

    /// Sorted names of all resources.
    pub fn resources(&self) -> Result<Vec<String>, ApiError> {
        Ok(self.apidoc()?.resource_names())
    }

    pub fn has_resource(&self, name: &str) -> Result<bool, ApiError> {
        Ok(self.apidoc()?.resource(name).is_some())
    }

    pub fn resource(&self, name: &str) -> Result<Resource<'_>, ApiError> {
        let doc = self.apidoc()?;
        if doc.resource(name).is_none() {
            return Err(ApiError::UnknownResource {
                name: name.to_string(),
                available: doc.resource_names(),
            });
        }
        Ok(Resource::new(self, name))
    }

    /// Call `action` of `resource` with default options.
    pub fn call(
        &self,
        resource: &str,
        action: &str,
        params: &Map<String, Value>,
    ) -> Result<Option<Value>, ApiError> {
        self.call_with(resource, action, params, &CallOptions::default())
    }

    /// Validate `params` (unless skipped), resolve the route and perform the call.
    pub fn call_with(
        &self,
        resource: &str,
        action: &str,
        params: &Map<String, Value>,
        options: &CallOptions,
    ) -> Result<Option<Value>, ApiError> {
        let action = self.resource(resource)?.action(action)?;
        if !options.skip_validation {
            action.validate(&Value::Object(params.clone()), &options.side_channel_keys())?;
        }
        self.call_action(&action, params, options)
    }

    fn call_action(
        &self,
        action: &Action<'_>,
        params: &Map<String, Value>,
        options: &CallOptions,
    ) -> Result<Option<Value>, ApiError> {
        let route = action.find_route(params)?;
        let path = route.path_with_params(params)?;
        let in_path = route.params_in_path();
        let rest: Map<String, Value> = params
            .iter()
            .filter(|(key, _)| !in_path.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        self.http_call(&route.method, &path, &rest, options)
    }

    /// Perform one HTTP request against the server.
    ///
    /// GET and HEAD send `params` as the query string, other verbs as the JSON
    /// body. With form data or files the body is a form and `params` become
    /// extra text fields. Returns `None` for `204 No Content`.
    #[instrument(level = "debug", skip(self, params, options), fields(uri = %self.uri))]
    pub fn http_call(
        &self,
        method: &str,
        path: &str,
        params: &Map<String, Value>,
        options: &CallOptions,
    ) -> Result<Option<Value>, ApiError> {
        let method = method.to_lowercase();
        let verb = Method::from_bytes(method.to_uppercase().as_bytes()).map_err(|_| {
            ApiError::UnsupportedMethod {
                method: method.clone(),
            }
        })?;
        let url = self.base_url.join(path).map_err(|source| ApiError::InvalidUrl {
            url: path.to_string(),
            source,
        })?;

        let query_verb = matches!(method.as_str(), "get" | "head");
        let side_channel = !options.data.is_empty() || !options.files.is_empty();
        let query = if query_verb {
            query_pairs(params)
        } else {
            Vec::new()
        };
        let body = if side_channel {
            let mut fields = options.data.clone();
            if !query_verb {
                fields.extend(query_pairs(params));
            }
            if options.files.is_empty() {
                RequestBody::Form(fields)
            } else {
                RequestBody::Multipart {
                    fields,
                    files: options.files.clone(),
                }
            }
        } else if !query_verb && !params.is_empty() {
            RequestBody::Json(Value::Object(params.clone()))
        } else if matches!(method.as_str(), "post" | "put" | "patch") {
            RequestBody::Json(Value::Object(Map::new()))
        } else {
            RequestBody::None
        };

        let headers = merge_headers(self.default_headers(), &options.headers)?;

        debug!(%verb, %url, "HTTP call");
        let response = self.transport.send(HttpRequest {
            method: verb,
            url,
            query,
            headers,
            body,
        })?;
        debug!(status = response.status, "HTTP response");

        if !response.is_success() {
            return Err(ApiError::HttpError {
                status: response.status,
                body: response.body,
            });
        }
        self.validate_cache(response.header(CHECKSUM_HEADER))?;

        if response.status == 204 {
            return Ok(None);
        }
        serde_json::from_str(&response.body)
            .map(Some)
            .map_err(ApiError::ResponseDecode)
    }

    fn default_headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            (
                "Accept".to_string(),
                format!("application/json;version={}", self.api_version),
            ),
            ("User-Agent".to_string(), USER_AGENT.to_string()),
        ];
        if let Some(language) = &self.language {
            headers.push(("Accept-Language".to_string(), language.clone()));
        }
        headers
    }

    /// Compare a server checksum with the current cache name.
    ///
    /// On mismatch the cache is wiped and the checksum becomes the new cache
    /// name. Nothing is fetched until the apidoc is accessed again.
    pub fn validate_cache(&self, checksum: Option<&str>) -> Result<(), ApiError> {
        let Some(checksum) = checksum else {
            return Ok(());
        };
        let name = Path::new(checksum)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(checksum)
            .to_string();

        let mut state = self.state();
        if state.cache_name == checksum {
            return Ok(());
        }
        info!(old = %state.cache_name, new = %name, "apidoc checksum changed, cleaning cache");
        state.apidoc = None;
        state.cache_name = name;
        drop(state);
        self.cache.clean()
    }

    /// Drop the loaded apidoc and delete every cached document.
    pub fn clean_cache(&self) -> Result<(), ApiError> {
        self.state().apidoc = None;
        self.cache.clean()
    }
}

fn is_empty_document(document: &Value) -> bool {
    match document {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Lay per-call headers over the defaults. Names compare case-insensitively
/// and the later value wins.
fn merge_headers(
    mut headers: Vec<(String, String)>,
    overrides: &[(String, String)],
) -> Result<Vec<(String, String)>, ApiError> {
    for (name, value) in overrides {
        if HeaderName::from_bytes(name.as_bytes()).is_err() || HeaderValue::from_str(value).is_err() {
            return Err(ApiError::InvalidHeader { name: name.clone() });
        }
        headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        headers.push((name.clone(), value.clone()));
    }
    Ok(headers)
}

/// Render params as query pairs: arrays repeat the key, nulls are skipped.
fn query_pairs(params: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in params {
        match value {
            Value::Null => {}
            Value::Array(items) => pairs.extend(
                items
                    .iter()
                    .filter(|item| !item.is_null())
                    .map(|item| (key.clone(), param_to_string(item))),
            ),
            other => pairs.push((key.clone(), param_to_string(other))),
        }
    }
    pairs
}
