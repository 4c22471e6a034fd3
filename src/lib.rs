//! Dynamic client for Apipie-described HTTP APIs.
//!
//! Loads the server's apidoc (cached on disk between runs), validates params
//! against the declared schema, picks the best matching route and performs
//! the call. [`TaskAwareApi`] adds CRUD helpers and waits for server-side
//! tasks; [`cli`] turns the apidoc into a clap `Command` tree.
//!
//! # Usage
//!
//! ```no_run
//! use apipie_client::{Api, ApiConfig};
//! use serde_json::{json, Map, Value};
//!
//! let config = ApiConfig::new("https://foreman.example.com")
//!     .api_version(2)
//!     .basic_auth("admin", "changeme");
//! let api = Api::new(config)?;
//!
//! let mut params = Map::new();
//! params.insert("id".to_string(), json!(42));
//! let host: Option<Value> = api.call("hosts", "show", &params)?;
//! # Ok::<(), apipie_client::ApiError>(())
//! ```

#![recursion_limit = "256"]

pub mod action;
pub mod api;
pub mod apidoc;
pub mod cache;
pub mod cli;
pub mod error;
pub mod example;
pub mod inflector;
pub mod param;
pub mod resource;
pub mod route;
pub mod task_api;
pub mod transport;

pub use action::{filter_empty_params, Action};
pub use api::{Api, ApiConfig, CallOptions, CHECKSUM_HEADER};
pub use apidoc::ApiDoc;
pub use cache::ApidocCache;
pub use error::{ApiError, CliError, TaskApiError};
pub use example::Example;
pub use inflector::{pluralize, singularize, Inflections, Inflector};
pub use param::{ExpectedType, Param};
pub use resource::Resource;
pub use route::Route;
pub use task_api::{try_as_task, Task, TaskAwareApi, PER_PAGE};
pub use transport::{
    Auth, FilePart, HttpRequest, HttpResponse, RequestBody, ReqwestTransport, Transport,
    TransportSettings,
};

// Re-export dependencies for downstream crates
pub use clap;
pub use reqwest;
