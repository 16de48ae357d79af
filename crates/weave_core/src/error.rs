//! The error type surfaced to callers.

use crate::path::Path;
use crate::span::Location;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A GraphQL error, located in the document and in the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct GraphQLError {
    /// The error message.
    pub message: String,
    /// Document locations of the field nodes the error belongs to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,
    /// The response path of the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Path>,
    /// Error extensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<IndexMap<String, serde_json::Value>>,
}

impl GraphQLError {
    /// Creates a new error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: None,
            extensions: None,
        }
    }

    /// Sets the document locations.
    pub fn with_locations(mut self, locations: impl IntoIterator<Item = Location>) -> Self {
        self.locations = locations.into_iter().collect();
        self
    }

    /// Sets the response path.
    pub fn with_path(mut self, path: Path) -> Self {
        self.path = Some(path);
        self
    }

    /// Adds an extension.
    pub fn with_extension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extensions
            .get_or_insert_with(IndexMap::new)
            .insert(key.into(), value);
        self
    }

    /// Sets the error code extension.
    pub fn with_code(self, code: impl Into<String>) -> Self {
        self.with_extension("code", serde_json::Value::String(code.into()))
    }

    /// Returns true if the error has already been located at a response path.
    pub fn is_located(&self) -> bool {
        self.path.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_error_serialization() {
        let error = GraphQLError::new("Something went wrong")
            .with_locations([Location::new(3, 5)])
            .with_path(Path::root().key("hero").index(0))
            .with_code("NOT_FOUND");

        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            serde_json::json!({
                "message": "Something went wrong",
                "locations": [{"line": 3, "column": 5}],
                "path": ["hero", 0],
                "extensions": {"code": "NOT_FOUND"}
            })
        );
    }

    #[test]
    fn test_error_skips_empty_fields() {
        let error = GraphQLError::new("Must provide an operation.");
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            serde_json::json!({"message": "Must provide an operation."})
        );
        assert!(!error.is_located());
    }
}
