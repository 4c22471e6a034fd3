//! Actions: validation, route selection and parameter reshaping.
//!
//! An [`Action`] captures the schema slice of its method when it is built.
//! Ask the [`crate::Resource`] for a fresh one after the apidoc changed.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::api::{Api, CallOptions};
use crate::apidoc::MethodDoc;
use crate::error::ApiError;
use crate::example::Example;
use crate::param::{ExpectedType, Param};
use crate::route::{param_to_string, Route};

/// One callable operation of a resource.
#[derive(Debug, Clone)]
pub struct Action<'a> {
    api: &'a Api,
    resource: String,
    name: String,
    params: Vec<Param>,
    routes: Vec<Route>,
    examples: Vec<String>,
}

impl<'a> Action<'a> {
    pub(crate) fn new(api: &'a Api, resource: &str, doc: &MethodDoc) -> Self {
        Self {
            api,
            resource: resource.to_string(),
            name: doc.name.clone(),
            params: doc.params.iter().map(Param::from).collect(),
            routes: doc
                .apis
                .iter()
                .map(|r| Route::new(r.api_url.clone(), &r.http_method, r.short_description.clone()))
                .collect(),
            examples: doc.examples.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The params accepted by this action.
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// The routes this action can be invoked by.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn examples(&self) -> Result<Vec<Example>, ApiError> {
        self.examples.iter().map(|e| e.parse::<Example>()).collect()
    }

    /// Call the API to execute this action.
    pub fn call(
        &self,
        params: &Map<String, Value>,
        options: &CallOptions,
    ) -> Result<Option<Value>, ApiError> {
        self.api
            .call_with(&self.resource, &self.name, params, options)
    }

    /// Find the best matching route for a given set of params.
    ///
    /// Routes are tried most placeholders first, ties broken by path. The
    /// first route whose placeholders are all provided wins; when none
    /// qualifies the route with the fewest placeholders is returned.
    pub fn find_route(&self, params: &Map<String, Value>) -> Result<&Route, ApiError> {
        let provided: BTreeSet<&str> = params
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, _)| k.as_str())
            .collect();

        let mut sorted: Vec<&Route> = self.routes.iter().collect();
        sorted.sort_by(|a, b| {
            b.params_in_path()
                .len()
                .cmp(&a.params_in_path().len())
                .then_with(|| a.path.cmp(&b.path))
        });

        if let Some(route) = sorted
            .iter()
            .copied()
            .find(|route| route.params_in_path().iter().all(|p| provided.contains(p)))
        {
            return Ok(route);
        }
        sorted.last().copied().ok_or_else(|| ApiError::NoRoutes {
            resource: self.resource.clone(),
            action: self.name.clone(),
        })
    }

    /// Validate `values` against the declared params.
    ///
    /// Keys present in `side_channel` (form data or file uploads) count as
    /// provided for the required-params check.
    pub fn validate(
        &self,
        values: &Value,
        side_channel: &BTreeSet<String>,
    ) -> Result<(), ApiError> {
        validate_level(&self.params, values, side_channel, "")
    }

    /// Transform arbitrary input into the params accepted by this action.
    ///
    /// Keys the action does not declare are dropped. Nested hash params are
    /// filled either from a nested object under their own name or from the
    /// input itself, so `{"id": 1}` and `{"user": {"id": 1}}` both work.
    /// Placeholders of the matching route are copied from the input as is.
    pub fn prepare_params(&self, input: &Map<String, Value>) -> Result<Map<String, Value>, ApiError> {
        let mut params = prepare_level(&self.params, input);
        let route = self.find_route(input)?;
        for name in route.params_in_path() {
            if let Some(value) = input.get(name) {
                params.insert(name.to_string(), value.clone());
            }
        }
        Ok(params)
    }
}

/// Drop params whose value is `null`.
pub fn filter_empty_params(params: &Map<String, Value>) -> Map<String, Value> {
    params
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn add_to_path(path: &str, additions: &[&str]) -> String {
    let mut result = path.to_string();
    for addition in additions {
        if result.is_empty() {
            result = addition.to_string();
        } else {
            result = format!("{result}[{addition}]");
        }
    }
    result
}

/// Missing required param names under `path`.
///
/// A missing hash param with required children is reported through those
/// children, so the message points at the leaves the caller has to supply.
fn collect_missing(param: &Param, path: &str, missing: &mut Vec<String>) {
    let required_children: Vec<&Param> = if param.is_hash() {
        param.params.iter().filter(|p| p.required).collect()
    } else {
        Vec::new()
    };
    if required_children.is_empty() {
        missing.push(add_to_path(path, &[param.name.as_str()]));
    } else {
        let nested = add_to_path(path, &[param.name.as_str()]);
        for child in required_children {
            collect_missing(child, &nested, missing);
        }
    }
}

fn validate_level(
    params: &[Param],
    values: &Value,
    side_channel: &BTreeSet<String>,
    path: &str,
) -> Result<(), ApiError> {
    let values = values.as_object().ok_or_else(|| ApiError::InvalidArgumentTypes {
        path: path.to_string(),
    })?;

    let mut missing = Vec::new();
    for param in params.iter().filter(|p| p.required) {
        if !values.contains_key(&param.name) && !side_channel.contains(&param.name) {
            collect_missing(param, path, &mut missing);
        }
    }
    if !missing.is_empty() {
        missing.sort();
        return Err(ApiError::MissingArguments { missing });
    }

    let no_side_channel = BTreeSet::new();
    for (key, value) in values {
        let Some(param) = params.iter().find(|p| &p.name == key) else {
            continue;
        };

        if !param.params.is_empty() && !value.is_null() {
            if param.is_array() {
                let items = value.as_array().ok_or_else(|| ApiError::InvalidArgumentTypes {
                    path: add_to_path(path, &[param.name.as_str()]),
                })?;
                for (num, item) in items.iter().enumerate() {
                    let nested = add_to_path(path, &[param.name.as_str(), num.to_string().as_str()]);
                    validate_level(&param.params, item, &no_side_channel, &nested)?;
                }
            } else if param.is_hash() {
                let nested = add_to_path(path, &[param.name.as_str()]);
                validate_level(&param.params, value, &no_side_channel, &nested)?;
            }
        }

        check_value(param, key, value)?;
    }
    Ok(())
}

/// Nil policy and type check of a single supplied value.
///
/// Numeric params accept integer strings of any length; anything else is
/// checked (and rejected) as the original string.
fn check_value(param: &Param, key: &str, value: &Value) -> Result<(), ApiError> {
    if let (ExpectedType::Numeric, Value::String(s)) = (&param.expected_type, value) {
        if is_integer_text(s.trim()) {
            return Ok(());
        }
    }

    if value.is_null() {
        if param.allow_nil {
            return Ok(());
        }
        return Err(ApiError::NullValue {
            param: key.to_string(),
        });
    }

    let is_integer = |v: &Value| v.is_i64() || v.is_u64();
    let valid = match param.expected_type {
        ExpectedType::Boolean => {
            value.is_boolean() || (is_integer(value) && matches!(value.as_i64(), Some(0 | 1)))
        }
        ExpectedType::Numeric => is_integer(value) || value.is_boolean(),
        ExpectedType::String => value.is_string() || is_integer(value) || value.is_boolean(),
        _ => true,
    };
    if valid {
        Ok(())
    } else {
        Err(ApiError::InvalidValue {
            param: key.to_string(),
            value: param_to_string(value),
            validator: param.validator.clone(),
        })
    }
}

/// Optional sign followed by ASCII digits, without a width limit.
fn is_integer_text(text: &str) -> bool {
    let digits = text.strip_prefix(['+', '-']).unwrap_or(text);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn prepare_level(params: &[Param], input: &Map<String, Value>) -> Map<String, Value> {
    let mut result = Map::new();
    for param in params {
        if param.is_hash() && !param.params.is_empty() {
            let nested_input = match input.get(&param.name) {
                Some(Value::Object(nested)) => nested,
                _ => input,
            };
            let nested = prepare_level(&param.params, nested_input);
            if !nested.is_empty() {
                result.insert(param.name.clone(), Value::Object(nested));
            }
        } else if let Some(value) = input.get(&param.name) {
            result.insert(param.name.clone(), value.clone());
        }
    }
    result
}
