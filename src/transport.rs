//! HTTP transport capability.
//!
//! [`crate::Api`] builds fully resolved [`HttpRequest`]s and hands them to a
//! [`Transport`]. [`ReqwestTransport`] is the production implementation;
//! tests plug in their own.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::blocking::{multipart, Client, RequestBuilder};
use reqwest::Method;
use serde_json::Value;
use url::Url;

use crate::error::ApiError;

/// A file to upload as part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub file_name: String,
    pub content: Vec<u8>,
}

impl FilePart {
    pub fn new(file_name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    None,
    Json(Value),
    Form(BTreeMap<String, String>),
    Multipart {
        fields: BTreeMap<String, String>,
        files: BTreeMap<String, FilePart>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lower-cased.
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs a single HTTP round-trip.
///
/// Non-2xx statuses are returned as responses, not errors; only failures to
/// complete the exchange are errors.
pub trait Transport: Send + Sync {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError>;
}

/// Authentication applied to every request.
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    Basic { username: String, password: String },
    Bearer(String),
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Bearer(_) => f.debug_tuple("Bearer").field(&"<redacted>").finish(),
        }
    }
}

/// Settings for [`ReqwestTransport`].
#[derive(Debug, Clone, Default)]
pub struct TransportSettings {
    pub auth: Option<Auth>,
    /// PEM encoded client certificate and key files.
    pub client_cert: Option<(PathBuf, PathBuf)>,
    pub verify_ssl: bool,
    pub timeout: Option<Duration>,
}

/// [`Transport`] backed by a blocking `reqwest` client.
#[derive(Debug)]
pub struct ReqwestTransport {
    client: Client,
    auth: Option<Auth>,
}

impl ReqwestTransport {
    pub fn new(settings: &TransportSettings) -> Result<Self, ApiError> {
        let mut builder = Client::builder().danger_accept_invalid_certs(!settings.verify_ssl);
        if let Some(timeout) = settings.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some((cert, key)) = &settings.client_cert {
            let mut pem = read_pem(cert)?;
            pem.push(b'\n');
            pem.extend(read_pem(key)?);
            let identity = reqwest::Identity::from_pem(&pem).map_err(ApiError::RequestFailed)?;
            builder = builder.identity(identity);
        }
        let client = builder.build().map_err(ApiError::RequestFailed)?;
        Ok(Self {
            client,
            auth: settings.auth.clone(),
        })
    }

    fn apply_auth(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some(Auth::Basic { username, password }) => req.basic_auth(username, Some(password)),
            Some(Auth::Bearer(token)) => req.bearer_auth(token),
            None => req,
        }
    }
}

fn read_pem(path: &Path) -> Result<Vec<u8>, ApiError> {
    fs::read(path).map_err(|source| ApiError::ClientCert {
        path: path.to_path_buf(),
        source,
    })
}

impl Transport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, ApiError> {
        let mut req = self.client.request(request.method, request.url);
        req = self.apply_auth(req);

        if !request.query.is_empty() {
            req = req.query(&request.query);
        }
        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        req = match request.body {
            RequestBody::None => req,
            RequestBody::Json(body) => req.json(&body),
            RequestBody::Form(fields) => req.form(&fields),
            RequestBody::Multipart { fields, files } => {
                let mut form = multipart::Form::new();
                for (name, value) in fields {
                    form = form.text(name, value);
                }
                for (name, file) in files {
                    let part = multipart::Part::bytes(file.content).file_name(file.file_name);
                    form = form.part(name, part);
                }
                req.multipart(form)
            }
        };

        let resp = req.send().map_err(ApiError::RequestFailed)?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect();
        let body = resp.text().map_err(ApiError::RequestFailed)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
