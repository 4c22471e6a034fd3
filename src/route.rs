//! Concrete HTTP bindings of an action.

use serde_json::{Map, Value};

use crate::error::ApiError;

/// One verb + path template through which an action can be invoked.
///
/// Placeholders are path segments starting with `:`, e.g. `/users/:id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub path: String,
    /// Lower-cased HTTP verb.
    pub method: String,
    pub description: String,
}

impl Route {
    pub fn new(path: impl Into<String>, method: &str, description: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.to_lowercase(),
            description: description.into(),
        }
    }

    /// Names of the placeholders in the path, in order.
    pub fn params_in_path(&self) -> Vec<&str> {
        self.path
            .split('/')
            .filter_map(|segment| segment.strip_prefix(':'))
            .collect()
    }

    /// Fill the placeholders from `params`, URL-escaping each value.
    pub fn path_with_params(&self, params: &Map<String, Value>) -> Result<String, ApiError> {
        let segments = self
            .path
            .split('/')
            .map(|segment| match segment.strip_prefix(':') {
                Some(name) => params
                    .get(name)
                    .map(|value| urlencoding::encode(&param_to_string(value)).into_owned())
                    .ok_or_else(|| ApiError::MissingPathParam {
                        param: name.to_string(),
                    }),
                None => Ok(segment.to_string()),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(segments.join("/"))
    }
}

/// String form of a parameter value as it appears in a path or query string.
pub(crate) fn param_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn new_lowercases_method() {
        let route = Route::new("/users", "GET", "");
        assert_eq!(route.method, "get");
    }

    #[test]
    fn params_in_path_in_order() {
        let route = Route::new("/users/:id/posts/:post_id", "get", "");
        assert_eq!(route.params_in_path(), vec!["id", "post_id"]);
        assert!(Route::new("/users", "get", "").params_in_path().is_empty());
    }

    #[test]
    fn path_with_params_substitutes_all_placeholders() {
        let route = Route::new("/users/:id/posts/:post_id", "get", "");
        let path = route
            .path_with_params(&params(json!({"id": 5, "post_id": 9})))
            .unwrap();
        assert_eq!(path, "/users/5/posts/9");
    }

    #[test]
    fn path_with_params_escapes_values() {
        let route = Route::new("/hosts/:id", "get", "");
        let path = route
            .path_with_params(&params(json!({"id": "web 01/eu"})))
            .unwrap();
        assert_eq!(path, "/hosts/web%2001%2Feu");
    }

    #[test]
    fn path_with_params_does_not_touch_similar_names() {
        let route = Route::new("/things/:id/:id_type", "get", "");
        let path = route
            .path_with_params(&params(json!({"id": 1, "id_type": "x"})))
            .unwrap();
        assert_eq!(path, "/things/1/x");
    }

    #[test]
    fn path_with_params_fails_on_missing_placeholder() {
        let route = Route::new("/users/:id/posts/:post_id", "get", "");
        let err = route
            .path_with_params(&params(json!({"id": 5})))
            .unwrap_err();
        assert!(matches!(err, ApiError::MissingPathParam { ref param } if param == "post_id"));
        assert_eq!(err.to_string(), "missing param 'post_id' in parameters");
    }
}
