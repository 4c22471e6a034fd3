//! Error types for the apipie-client crate.

use std::path::PathBuf;

use serde_json::Value;
use thiserror::Error;

/// Errors raised by the low-level binding layer ([`crate::Api`] and friends).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    #[error("Could not load data from {uri}: {reason} - is your server down?")]
    DocLoading {
        uri: String,
        reason: String,
        #[source]
        source: Option<Box<ApiError>>,
    },

    #[error("Resource '{name}' does not exist in the API. Existing resources: {}", .available.join(", "))]
    UnknownResource {
        name: String,
        available: Vec<String>,
    },

    #[error("Unknown action '{name}'. Supported actions: {}", .available.join(", "))]
    UnknownAction {
        name: String,
        available: Vec<String>,
    },

    #[error("The following required parameters are missing: {}", .missing.join(", "))]
    MissingArguments { missing: Vec<String> },

    #[error("invalid argument types: expected an object{}", fmt_at(.path))]
    InvalidArgumentTypes { path: String },

    #[error("{param} can't be null")]
    NullValue { param: String },

    #[error("{param} ({value}): {validator}")]
    InvalidValue {
        param: String,
        value: String,
        validator: String,
    },

    #[error("missing param '{param}' in parameters")]
    MissingPathParam { param: String },

    #[error("action '{action}' of resource '{resource}' declares no routes")]
    NoRoutes { resource: String, action: String },

    #[error("invalid example: {example}")]
    InvalidExample { example: String },

    #[error("invalid URL: {url}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported HTTP method: {method}")]
    UnsupportedMethod { method: String },

    #[error("invalid header {name}")]
    InvalidHeader { name: String },

    #[error("HTTP request failed")]
    RequestFailed(#[source] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    #[error("failed to decode JSON response")]
    ResponseDecode(#[source] serde_json::Error),

    #[error("failed to access apidoc cache at {path}")]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read client certificate {path}")]
    ClientCert {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ApiError {
    /// The structured error reported by the server for a failed HTTP call.
    ///
    /// Prefers the `error` member of a JSON body, then the whole JSON body,
    /// then the raw body text.
    pub fn server_error(&self) -> Option<String> {
        let ApiError::HttpError { body, .. } = self else {
            return None;
        };
        match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(mut obj)) => match obj.remove("error") {
                Some(Value::String(s)) => Some(s),
                Some(error) => Some(error.to_string()),
                None => Some(Value::Object(obj).to_string()),
            },
            Ok(other) => Some(other.to_string()),
            Err(_) => Some(body.clone()),
        }
    }
}

fn fmt_at(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!(" at {path}")
    }
}

/// Errors raised by [`crate::TaskAwareApi`].
///
/// Everything that goes wrong below `resource_action` is folded into
/// [`TaskApiError::Action`], keeping the original error as its source.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TaskApiError {
    #[error("{message}")]
    Action {
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("The server doesn't know about {resource}, is the right plugin installed?")]
    UnknownResource { resource: String },

    #[error("Timeout waiting for Task {id}")]
    Timeout { id: String },

    #[error("Task {action}({id}) did not succeed. Task information: {errors}")]
    TaskFailed {
        action: String,
        id: String,
        errors: String,
    },

    #[error("{0}")]
    Server(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl TaskApiError {
    /// Wrap any failure of `action` on `resource` into [`TaskApiError::Action`].
    pub(crate) fn wrap<E>(resource: &str, action: &str, err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let source = err.into();
        let server_error = source
            .downcast_ref::<ApiError>()
            .and_then(ApiError::server_error);
        let mut message = format!("Error while performing {action} on {resource}: {source}");
        if let Some(error) = server_error {
            message.push_str(" - ");
            message.push_str(&error);
        }
        TaskApiError::Action { message, source }
    }
}

/// Errors of the command-line front end.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CliError {
    #[error("invalid JSON in --json argument")]
    InvalidJsonBody(#[source] serde_json::Error),

    #[error("--json must be a JSON object")]
    JsonBodyNotObject,

    #[error("invalid --field format: {field} (expected key=value)")]
    InvalidFieldFormat { field: String },

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("missing required argument: {0}")]
    MissingArgument(&'static str),

    #[error("invalid API version: {0}")]
    InvalidApiVersion(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}
