//! Built-in executable directives.
//!
//! `@skip` and `@include` decide whether a selection is collected at all,
//! `@defer` and `@stream` decide when its data is delivered.

use crate::schema::{DirectiveDefinition, DirectiveLocation, InputFieldDef, Schema, TypeRef};
use crate::values::{directive_values, ArgumentValues, Variables};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use weave_core::GraphQLError;
use weave_syntax::Directive;

// =============================================================================
// @defer directive
// =============================================================================

/// Arguments of `@defer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferDirective {
    /// Label reported with the deferred payloads.
    #[serde(default)]
    pub label: Option<String>,

    /// Whether the fragment is deferred at all.
    #[serde(rename = "if", default = "default_true")]
    pub condition: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DeferDirective {
    fn default() -> Self {
        Self {
            label: None,
            condition: true,
        }
    }
}

impl DeferDirective {
    /// Creates a labeled defer.
    pub fn labeled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Default::default()
        }
    }
}

// =============================================================================
// @stream directive
// =============================================================================

/// Arguments of `@stream`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDirective {
    /// Label reported with the streamed payloads.
    #[serde(default)]
    pub label: Option<String>,

    /// Whether the list is streamed at all.
    #[serde(rename = "if", default = "default_true")]
    pub condition: bool,

    /// Number of items delivered with the parent result.
    #[serde(default)]
    pub initial_count: i64,
}

impl Default for StreamDirective {
    fn default() -> Self {
        Self {
            label: None,
            condition: true,
            initial_count: 0,
        }
    }
}

impl StreamDirective {
    /// Creates a labeled stream.
    pub fn labeled(label: impl Into<String>, initial_count: i64) -> Self {
        Self {
            label: Some(label.into()),
            initial_count,
            ..Default::default()
        }
    }
}

// =============================================================================
// Evaluation
// =============================================================================

/// Determines whether a field, fragment spread or inline fragment should be
/// included based on `@skip` and `@include`. `@skip(if: true)` wins.
pub fn should_include_node(
    schema: &Schema,
    directives: &[Directive],
    variables: &Variables,
) -> Result<bool, GraphQLError> {
    if let Some(skip) = condition(schema, "skip", directives, variables)? {
        if skip {
            return Ok(false);
        }
    }
    if let Some(include) = condition(schema, "include", directives, variables)? {
        if !include {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Returns the `@defer` arguments of a fragment, or `None` when it is not
/// deferred (absent, or `if: false`).
pub fn defer_directive(
    schema: &Schema,
    directives: &[Directive],
    variables: &Variables,
) -> Result<Option<DeferDirective>, GraphQLError> {
    let defer: Option<DeferDirective> = typed_values(schema, "defer", directives, variables)?;
    Ok(defer.filter(|d| d.condition))
}

/// Returns the `@stream` arguments of a field, or `None` when it is not
/// streamed (absent, or `if: false`).
pub fn stream_directive(
    schema: &Schema,
    directives: &[Directive],
    variables: &Variables,
) -> Result<Option<StreamDirective>, GraphQLError> {
    let stream: Option<StreamDirective> = typed_values(schema, "stream", directives, variables)?;
    Ok(stream.filter(|s| s.condition))
}

fn condition(
    schema: &Schema,
    name: &str,
    directives: &[Directive],
    variables: &Variables,
) -> Result<Option<bool>, GraphQLError> {
    let values = raw_values(schema, name, directives, variables)?;
    Ok(values.map(|args| args.get("if").and_then(Value::as_bool).unwrap_or(false)))
}

fn raw_values(
    schema: &Schema,
    name: &str,
    directives: &[Directive],
    variables: &Variables,
) -> Result<Option<ArgumentValues>, GraphQLError> {
    match schema.directive(name) {
        Some(definition) => directive_values(schema, definition, directives, variables),
        None => Ok(None),
    }
}

fn typed_values<T: DeserializeOwned>(
    schema: &Schema,
    name: &str,
    directives: &[Directive],
    variables: &Variables,
) -> Result<Option<T>, GraphQLError> {
    let Some(values) = raw_values(schema, name, directives, variables)? else {
        return Ok(None);
    };
    let object = Value::Object(values.into_iter().collect());
    serde_json::from_value(object).map(Some).map_err(|err| {
        GraphQLError::new(format!("Invalid arguments for @{name}: {err}"))
    })
}

// =============================================================================
// Definitions
// =============================================================================

/// The executable directives every schema supports.
pub fn builtin_directives() -> Vec<DirectiveDefinition> {
    vec![
        create_skip_directive(),
        create_include_directive(),
        create_defer_directive(),
        create_stream_directive(),
    ]
}

fn argument(name: &str, description: &str, ty: TypeRef, default: Option<Value>) -> InputFieldDef {
    InputFieldDef {
        name: name.to_string(),
        description: Some(description.to_string()),
        ty,
        default_value: default,
    }
}

fn boolean_non_null() -> TypeRef {
    TypeRef::non_null(TypeRef::named("Boolean"))
}

fn arguments(list: impl IntoIterator<Item = InputFieldDef>) -> IndexMap<String, InputFieldDef> {
    list.into_iter().map(|arg| (arg.name.clone(), arg)).collect()
}

fn create_skip_directive() -> DirectiveDefinition {
    DirectiveDefinition {
        name: "skip".to_string(),
        description: Some("Directs the executor to skip this field or fragment when the `if` argument is true.".to_string()),
        arguments: arguments([argument("if", "Skipped when true.", boolean_non_null(), None)]),
        locations: vec![
            DirectiveLocation::Field,
            DirectiveLocation::FragmentSpread,
            DirectiveLocation::InlineFragment,
        ],
        repeatable: false,
    }
}

fn create_include_directive() -> DirectiveDefinition {
    DirectiveDefinition {
        name: "include".to_string(),
        description: Some("Directs the executor to include this field or fragment only when the `if` argument is true.".to_string()),
        arguments: arguments([argument("if", "Included when true.", boolean_non_null(), None)]),
        locations: vec![
            DirectiveLocation::Field,
            DirectiveLocation::FragmentSpread,
            DirectiveLocation::InlineFragment,
        ],
        repeatable: false,
    }
}

fn create_defer_directive() -> DirectiveDefinition {
    DirectiveDefinition {
        name: "defer".to_string(),
        description: Some("Directs the executor to defer this fragment when the `if` argument is true or undefined.".to_string()),
        arguments: arguments([
            argument("if", "Deferred when true or undefined.", boolean_non_null(), Some(json!(true))),
            argument("label", "Unique name", TypeRef::named("String"), None),
        ]),
        locations: vec![
            DirectiveLocation::FragmentSpread,
            DirectiveLocation::InlineFragment,
        ],
        repeatable: false,
    }
}

fn create_stream_directive() -> DirectiveDefinition {
    DirectiveDefinition {
        name: "stream".to_string(),
        description: Some("Directs the executor to stream plural fields when the `if` argument is true or undefined.".to_string()),
        arguments: arguments([
            argument("if", "Stream when true or undefined.", boolean_non_null(), Some(json!(true))),
            argument("label", "Unique name", TypeRef::named("String"), None),
            argument("initialCount", "Number of items to return immediately", TypeRef::named("Int"), Some(json!(0))),
        ]),
        locations: vec![DirectiveLocation::Field],
        repeatable: false,
    }
}
