//! Request/response examples recorded in the apidoc.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::ApiError;

static EXAMPLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^(\w+)\s+([^\n]*)\n?(.*)\n(\d+)\n(.*)")
        .expect("example pattern is a valid regex")
});

/// A parsed example: `VERB path`, optional request args, status and response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Example {
    pub http_method: String,
    pub path: String,
    pub args: String,
    pub status: u16,
    pub response: String,
}

impl FromStr for Example {
    type Err = ApiError;

    fn from_str(example: &str) -> Result<Self, Self::Err> {
        let invalid = || ApiError::InvalidExample {
            example: example.to_string(),
        };
        let caps = EXAMPLE.captures(example).ok_or_else(invalid)?;
        let status = caps[4].parse().map_err(|_| invalid())?;
        Ok(Self {
            http_method: caps[1].to_string(),
            path: caps[2].to_string(),
            args: caps[3].to_string(),
            status,
            response: caps[5].to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_example_without_args() {
        let example: Example = "GET /api/users/1\n200\n{\"id\": 1}".parse().unwrap();
        assert_eq!(example.http_method, "GET");
        assert_eq!(example.path, "/api/users/1");
        assert_eq!(example.args, "");
        assert_eq!(example.status, 200);
        assert_eq!(example.response, "{\"id\": 1}");
    }

    #[test]
    fn parses_example_with_multiline_args() {
        let example: Example = "POST /api/users\n{\n  \"login\": \"bob\"\n}\n201\n{\"id\": 2}"
            .parse()
            .unwrap();
        assert_eq!(example.http_method, "POST");
        assert_eq!(example.args, "{\n  \"login\": \"bob\"\n}");
        assert_eq!(example.status, 201);
        assert_eq!(example.response, "{\"id\": 2}");
    }

    #[test]
    fn rejects_garbage() {
        let err = "not an example".parse::<Example>().unwrap_err();
        assert!(matches!(err, ApiError::InvalidExample { .. }));
    }
}
