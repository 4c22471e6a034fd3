//! Schema nodes for declared action parameters.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::apidoc::ParamDoc;

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[^>]+?>").expect("HTML tag pattern is a valid regex"));

pub(crate) fn strip_html(text: &str) -> String {
    HTML_TAG.replace_all(text, "").into_owned()
}

/// The declared type of a parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedType {
    String,
    Numeric,
    Boolean,
    Hash,
    Array,
    /// Any other declared type; values of it are not type-checked.
    Other(String),
}

impl From<&str> for ExpectedType {
    fn from(value: &str) -> Self {
        match value {
            "string" => Self::String,
            "numeric" => Self::Numeric,
            "boolean" => Self::Boolean,
            "hash" => Self::Hash,
            "array" => Self::Array,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ExpectedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Numeric => "numeric",
            Self::Boolean => "boolean",
            Self::Hash => "hash",
            Self::Array => "array",
            Self::Other(other) => other,
        };
        f.write_str(name)
    }
}

/// A declared parameter of an action.
///
/// Pure schema: validation against it lives in [`crate::Action`], which
/// tracks the nesting path for error messages.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub full_name: String,
    /// Description with HTML tags stripped.
    pub description: String,
    pub expected_type: ExpectedType,
    pub allow_nil: bool,
    pub required: bool,
    pub validator: String,
    /// Nested params, only present for `hash` and `array` types.
    pub params: Vec<Param>,
}

impl From<&ParamDoc> for Param {
    fn from(doc: &ParamDoc) -> Self {
        Self {
            name: doc.name.clone(),
            full_name: doc.full_name.clone(),
            description: strip_html(&doc.description),
            expected_type: ExpectedType::from(doc.expected_type.as_str()),
            allow_nil: doc.allow_nil,
            required: doc.required,
            validator: doc.validator.clone(),
            params: doc.params.iter().map(Param::from).collect(),
        }
    }
}

impl Param {
    pub fn is_hash(&self) -> bool {
        self.expected_type == ExpectedType::Hash
    }

    pub fn is_array(&self) -> bool {
        self.expected_type == ExpectedType::Array
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str, expected_type: &str, params: Vec<ParamDoc>) -> ParamDoc {
        ParamDoc {
            name: name.into(),
            full_name: name.into(),
            description: String::new(),
            expected_type: expected_type.into(),
            allow_nil: false,
            required: false,
            validator: String::new(),
            params,
        }
    }

    #[test]
    fn strips_html_from_description() {
        let mut d = doc("search", "string", Vec::new());
        d.description = "<p>Filter <b>results</b></p>\n".into();
        assert_eq!(Param::from(&d).description, "Filter results\n");
    }

    #[test]
    fn builds_nested_params() {
        let d = doc(
            "user",
            "hash",
            vec![doc("roles", "array", vec![doc("name", "string", Vec::new())])],
        );
        let param = Param::from(&d);
        assert!(param.is_hash());
        assert!(param.params[0].is_array());
        assert_eq!(param.params[0].params[0].expected_type, ExpectedType::String);
    }

    #[test]
    fn unknown_types_are_kept_verbatim() {
        let param = Param::from(&doc("attachment", "file", Vec::new()));
        assert_eq!(param.expected_type, ExpectedType::Other("file".into()));
        assert_eq!(param.expected_type.to_string(), "file");
    }
}
