//! Resources: named collections of actions.

use serde_json::{Map, Value};

use crate::action::Action;
use crate::api::{Api, CallOptions};
use crate::error::ApiError;

#[derive(Debug, Clone)]
pub struct Resource<'a> {
    api: &'a Api,
    name: String,
}

impl<'a> Resource<'a> {
    pub(crate) fn new(api: &'a Api, name: impl Into<String>) -> Self {
        Self {
            api,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sorted names of the actions available for this resource.
    pub fn actions(&self) -> Result<Vec<String>, ApiError> {
        let doc = self.api.apidoc()?;
        let resource = doc
            .resource(&self.name)
            .ok_or_else(|| ApiError::UnknownResource {
                name: self.name.clone(),
                available: doc.resource_names(),
            })?;
        Ok(resource.method_names())
    }

    pub fn has_action(&self, name: &str) -> Result<bool, ApiError> {
        Ok(self.actions()?.iter().any(|a| a == name))
    }

    /// Build the [`Action`] `name` from the current apidoc.
    pub fn action(&self, name: &str) -> Result<Action<'a>, ApiError> {
        let doc = self.api.apidoc()?;
        let resource = doc
            .resource(&self.name)
            .ok_or_else(|| ApiError::UnknownResource {
                name: self.name.clone(),
                available: doc.resource_names(),
            })?;
        let method = resource
            .method(name)
            .ok_or_else(|| ApiError::UnknownAction {
                name: name.to_string(),
                available: resource.method_names(),
            })?;
        Ok(Action::new(self.api, &self.name, method))
    }

    /// Call `action` on this resource.
    pub fn call(
        &self,
        action: &str,
        params: &Map<String, Value>,
        options: &CallOptions,
    ) -> Result<Option<Value>, ApiError> {
        self.api.call_with(&self.name, action, params, options)
    }
}
