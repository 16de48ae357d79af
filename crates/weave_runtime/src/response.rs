//! Execution results.

use crate::publisher::IncrementalStream;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use weave_core::{GraphQLError, Path};

/// A complete response: `{data, errors?}`, or `{errors}` for request errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

impl Response {
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
        }
    }

    /// A request error response, without data.
    pub fn from_errors(errors: Vec<GraphQLError>) -> Self {
        Self { data: None, errors }
    }

    /// Returns true if there are errors.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// The first payload of an incremental response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialIncrementalResult {
    pub data: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
    pub has_next: bool,
}

/// Every later payload of an incremental response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubsequentIncrementalResult {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub incremental: Vec<IncrementalResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub completed: Vec<CompletedResult>,
    pub has_next: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IncrementalResult {
    Defer(IncrementalDeferResult),
    Stream(IncrementalStreamResult),
}

/// Data of a deferred grouped field set, relative to `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementalDeferResult {
    pub data: Value,
    pub path: Path,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

/// Streamed list items starting at the index `path` ends with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementalStreamResult {
    pub items: Vec<Value>,
    pub path: Path,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

/// Announces that a deferred fragment or a stream is done.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedResult {
    pub path: Path,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQLError>,
}

/// The outcome of one execution.
#[derive(Debug)]
pub enum ExecutionResult {
    /// Everything was delivered at once.
    Single(Response),
    /// An initial payload followed by a stream of subsequent payloads.
    Incremental {
        initial: InitialIncrementalResult,
        subsequent: IncrementalStream,
    },
}

impl ExecutionResult {
    pub fn is_incremental(&self) -> bool {
        matches!(self, Self::Incremental { .. })
    }

    /// Returns the single response, or `None` for incremental results.
    pub fn into_single(self) -> Option<Response> {
        match self {
            Self::Single(response) => Some(response),
            Self::Incremental { .. } => None,
        }
    }

    /// Every payload of the result as JSON, in delivery order.
    pub fn into_stream(self) -> impl Stream<Item = Value> + Send {
        async_stream::stream! {
            match self {
                Self::Single(response) => yield to_json(&response),
                Self::Incremental { initial, mut subsequent } => {
                    yield to_json(&initial);
                    while let Some(result) = subsequent.next().await {
                        yield to_json(&result);
                    }
                }
            }
        }
    }

    /// Drains every payload.
    pub async fn collect(self) -> Vec<Value> {
        self.into_stream().collect().await
    }
}

fn to_json<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or_default()
}
