//! Apipie description document → typed IR
//!
//! The document is `{"docs": {"resources": {name: {"methods": [...]}}}}`.
//! Only the parts the client needs are modelled; everything else is ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

/// The full API description as served under `/apidoc/v{N}.json`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApiDoc {
    #[serde(default)]
    pub docs: Docs,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Docs {
    #[serde(default, deserialize_with = "nullable")]
    pub resources: BTreeMap<String, ResourceDoc>,
}

/// One resource: a named group of methods.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResourceDoc {
    #[serde(default, deserialize_with = "nullable")]
    pub methods: Vec<MethodDoc>,
}

/// One method (action) of a resource.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MethodDoc {
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub params: Vec<ParamDoc>,
    #[serde(default, deserialize_with = "nullable")]
    pub apis: Vec<RouteDoc>,
    #[serde(default, deserialize_with = "nullable")]
    pub examples: Vec<String>,
}

/// A declared parameter, possibly nesting further parameters.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ParamDoc {
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub full_name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
    #[serde(default, deserialize_with = "nullable")]
    pub expected_type: String,
    #[serde(default, deserialize_with = "nullable")]
    pub allow_nil: bool,
    #[serde(default, deserialize_with = "nullable")]
    pub required: bool,
    #[serde(default, deserialize_with = "nullable")]
    pub validator: String,
    #[serde(default, deserialize_with = "nullable")]
    pub params: Vec<ParamDoc>,
}

/// A concrete HTTP binding of a method.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RouteDoc {
    pub api_url: String,
    pub http_method: String,
    #[serde(default, deserialize_with = "nullable")]
    pub short_description: String,
}

impl ApiDoc {
    pub fn resource(&self, name: &str) -> Option<&ResourceDoc> {
        self.docs.resources.get(name)
    }

    /// Resource names in sorted order.
    pub fn resource_names(&self) -> Vec<String> {
        self.docs.resources.keys().cloned().collect()
    }
}

impl ResourceDoc {
    pub fn method(&self, name: &str) -> Option<&MethodDoc> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Method names in sorted order.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.iter().map(|m| m.name.clone()).collect();
        names.sort();
        names
    }
}

/// Treat an explicit JSON `null` like a missing field.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
