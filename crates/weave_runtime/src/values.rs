//! Variable, argument and directive argument values.

use crate::schema::{DirectiveDefinition, InputFieldDef, Schema, TypeDef, TypeKind, TypeRef};
use indexmap::IndexMap;
use serde_json::{Map, Number, Value};
use weave_core::GraphQLError;
use weave_syntax::{ast, Argument, Directive, VariableDefinition};

/// Coerced variable values, keyed by variable name (without `$`).
pub type Variables = IndexMap<String, Value>;

/// Coerced argument values of a field or directive.
pub type ArgumentValues = IndexMap<String, Value>;

/// Coerces the raw request variables against the operation's variable
/// definitions: defaults are applied and required variables enforced.
pub fn coerce_variable_values(
    schema: &Schema,
    definitions: &[VariableDefinition],
    inputs: &Variables,
) -> Result<Variables, Vec<GraphQLError>> {
    let mut coerced = Variables::new();
    let mut errors = Vec::new();

    for definition in definitions {
        let name = definition.name.as_str();
        let ty = TypeRef::from(&definition.ty);
        let located = |message: String| {
            GraphQLError::new(message).with_locations([definition.location])
        };

        if !schema
            .type_kind(ty.named_type())
            .is_some_and(TypeKind::is_input)
        {
            errors.push(located(format!(
                "Variable \"${name}\" expected value of type \"{ty}\" which cannot be used as an input type."
            )));
            continue;
        }

        let Some(input) = inputs.get(name) else {
            if let Some(default) = &definition.default_value {
                match value_from_ast(schema, default, &ty, &Variables::new()) {
                    Some(value) => {
                        coerced.insert(name.to_string(), value);
                    }
                    None => errors.push(located(format!(
                        "Variable \"${name}\" has invalid default value."
                    ))),
                }
            } else if ty.is_non_null() {
                errors.push(located(format!(
                    "Variable \"${name}\" of required type \"{ty}\" was not provided."
                )));
            }
            continue;
        };

        if input.is_null() && ty.is_non_null() {
            errors.push(located(format!(
                "Variable \"${name}\" of non-null type \"{ty}\" must not be null."
            )));
            continue;
        }

        match coerce_input_value(schema, input, &ty) {
            Ok(value) => {
                coerced.insert(name.to_string(), value);
            }
            Err(reason) => errors.push(located(format!(
                "Variable \"${name}\" got invalid value {input}; {reason}"
            ))),
        }
    }

    if errors.is_empty() {
        Ok(coerced)
    } else {
        Err(errors)
    }
}

/// Computes argument values from the argument nodes of a field or directive.
pub fn argument_values(
    schema: &Schema,
    definitions: &IndexMap<String, InputFieldDef>,
    arguments: &[Argument],
    variables: &Variables,
) -> Result<ArgumentValues, GraphQLError> {
    let mut coerced = ArgumentValues::new();

    for definition in definitions.values() {
        let name = definition.name.as_str();
        let ty = &definition.ty;
        let node = arguments.iter().find(|arg| arg.name.as_str() == name);

        let missing_variable = match node.map(|arg| &arg.value) {
            Some(ast::Value::Variable(var)) if !variables.contains_key(var.as_str()) => {
                Some(var.as_str())
            }
            _ => None,
        };

        let Some(node) = node.filter(|_| missing_variable.is_none()) else {
            if let Some(default) = &definition.default_value {
                coerced.insert(name.to_string(), default.clone());
            } else if ty.is_non_null() {
                let message = match missing_variable {
                    Some(var) => format!(
                        "Argument \"{name}\" of required type \"{ty}\" was provided the variable \"${var}\" which was not provided a runtime value."
                    ),
                    None => format!("Argument \"{name}\" of required type \"{ty}\" was not provided."),
                };
                return Err(GraphQLError::new(message));
            }
            continue;
        };

        if let ast::Value::Variable(var) = &node.value {
            let value = variables.get(var.as_str()).cloned().unwrap_or(Value::Null);
            if value.is_null() && ty.is_non_null() {
                return Err(GraphQLError::new(format!(
                    "Argument \"{name}\" of non-null type \"{ty}\" must not be null."
                )));
            }
            coerced.insert(name.to_string(), value);
            continue;
        }

        match value_from_ast(schema, &node.value, ty, variables) {
            Some(value) => {
                coerced.insert(name.to_string(), value);
            }
            None => {
                return Err(GraphQLError::new(format!(
                    "Argument \"{name}\" has invalid value {}.",
                    display_literal(&node.value)
                )));
            }
        }
    }

    Ok(coerced)
}

/// Returns the argument values of the first directive named like
/// `definition` in `directives`, or `None` when it is not applied.
pub fn directive_values(
    schema: &Schema,
    definition: &DirectiveDefinition,
    directives: &[Directive],
    variables: &Variables,
) -> Result<Option<ArgumentValues>, GraphQLError> {
    ast::find_directive(directives, &definition.name)
        .map(|directive| {
            argument_values(schema, &definition.arguments, &directive.arguments, variables)
        })
        .transpose()
}

/// Converts a literal into a value of type `ty`, or `None` if the literal
/// is invalid for the type.
pub fn value_from_ast(
    schema: &Schema,
    value: &ast::Value,
    ty: &TypeRef,
    variables: &Variables,
) -> Option<Value> {
    if let ast::Value::Variable(var) = value {
        let found = variables.get(var.as_str())?;
        if found.is_null() && ty.is_non_null() {
            return None;
        }
        return Some(found.clone());
    }

    match ty {
        TypeRef::NonNull(inner) => {
            if matches!(value, ast::Value::Null) {
                return None;
            }
            value_from_ast(schema, value, inner, variables)
        }
        _ if matches!(value, ast::Value::Null) => Some(Value::Null),
        TypeRef::List(item_type) => match value {
            ast::Value::List(items) => items
                .iter()
                .map(|item| match item {
                    ast::Value::Variable(var) if !variables.contains_key(var.as_str()) => {
                        (!item_type.is_non_null()).then_some(Value::Null)
                    }
                    _ => value_from_ast(schema, item, item_type, variables),
                })
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            single => {
                value_from_ast(schema, single, item_type, variables).map(|v| Value::Array(vec![v]))
            }
        },
        TypeRef::Named(name) => match schema.get_type(name)? {
            TypeDef::InputObject(input) => {
                let ast::Value::Object(fields) = value else {
                    return None;
                };
                let mut object = Map::new();
                for field_def in input.fields.values() {
                    let node = fields
                        .iter()
                        .find(|(field_name, _)| field_name.as_str() == field_def.name);
                    let present = node.filter(|(_, v)| match v {
                        ast::Value::Variable(var) => variables.contains_key(var.as_str()),
                        _ => true,
                    });
                    match present {
                        Some((_, field_value)) => {
                            let coerced =
                                value_from_ast(schema, field_value, &field_def.ty, variables)?;
                            object.insert(field_def.name.clone(), coerced);
                        }
                        None => {
                            if let Some(default) = &field_def.default_value {
                                object.insert(field_def.name.clone(), default.clone());
                            } else if field_def.ty.is_non_null() {
                                return None;
                            }
                        }
                    }
                }
                Some(Value::Object(object))
            }
            TypeDef::Enum(enum_def) => match value {
                ast::Value::Enum(name) if enum_def.has_value(name) => {
                    Some(Value::String(name.clone()))
                }
                _ => None,
            },
            TypeDef::Scalar(scalar) => literal_scalar(&scalar.name, value),
            TypeDef::Object(_) | TypeDef::Interface(_) | TypeDef::Union(_) => None,
        },
    }
}

fn literal_scalar(type_name: &str, value: &ast::Value) -> Option<Value> {
    match (type_name, value) {
        ("Int", ast::Value::Int(i)) => i32::try_from(*i).ok().map(Value::from),
        ("Float", ast::Value::Int(i)) => Some(Value::from(*i as f64)),
        ("Float", ast::Value::Float(f)) => Number::from_f64(*f).map(Value::Number),
        ("String", ast::Value::String(s)) => Some(Value::String(s.clone())),
        ("Boolean", ast::Value::Boolean(b)) => Some(Value::Bool(*b)),
        ("ID", ast::Value::String(s)) => Some(Value::String(s.clone())),
        ("ID", ast::Value::Int(i)) => Some(Value::String(i.to_string())),
        ("Int" | "Float" | "String" | "Boolean" | "ID", _) => None,
        // Custom scalars accept any constant literal.
        _ => untyped_value(value),
    }
}

fn untyped_value(value: &ast::Value) -> Option<Value> {
    Some(match value {
        ast::Value::Variable(_) => return None,
        ast::Value::Int(i) => Value::from(*i),
        ast::Value::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
        ast::Value::String(s) | ast::Value::Enum(s) => Value::String(s.clone()),
        ast::Value::Boolean(b) => Value::Bool(*b),
        ast::Value::Null => Value::Null,
        ast::Value::List(items) => {
            Value::Array(items.iter().map(untyped_value).collect::<Option<_>>()?)
        }
        ast::Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, v)| Some((name.value.clone(), untyped_value(v)?)))
                .collect::<Option<_>>()?,
        ),
    })
}

/// Coerces an external (JSON) input value to `ty`.
pub fn coerce_input_value(schema: &Schema, value: &Value, ty: &TypeRef) -> Result<Value, String> {
    match ty {
        TypeRef::NonNull(inner) => {
            if value.is_null() {
                return Err(format!("Expected non-nullable type \"{ty}\" not to be null."));
            }
            coerce_input_value(schema, value, inner)
        }
        _ if value.is_null() => Ok(Value::Null),
        TypeRef::List(item_type) => match value {
            Value::Array(items) => items
                .iter()
                .map(|item| coerce_input_value(schema, item, item_type))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            single => Ok(Value::Array(vec![coerce_input_value(
                schema, single, item_type,
            )?])),
        },
        TypeRef::Named(name) => match schema.get_type(name) {
            Some(TypeDef::InputObject(input)) => {
                let Value::Object(fields) = value else {
                    return Err(format!("Expected type \"{name}\" to be an object."));
                };
                if let Some(unknown) = fields.keys().find(|key| !input.fields.contains_key(*key)) {
                    return Err(format!(
                        "Field \"{unknown}\" is not defined by type \"{name}\"."
                    ));
                }
                let mut object = Map::new();
                for field_def in input.fields.values() {
                    match fields.get(&field_def.name) {
                        Some(field_value) => {
                            let coerced = coerce_input_value(schema, field_value, &field_def.ty)?;
                            object.insert(field_def.name.clone(), coerced);
                        }
                        None => {
                            if let Some(default) = &field_def.default_value {
                                object.insert(field_def.name.clone(), default.clone());
                            } else if field_def.ty.is_non_null() {
                                return Err(format!(
                                    "Field \"{}\" of required type \"{}\" was not provided.",
                                    field_def.name, field_def.ty
                                ));
                            }
                        }
                    }
                }
                Ok(Value::Object(object))
            }
            Some(TypeDef::Enum(enum_def)) => match value {
                Value::String(s) if enum_def.has_value(s) => Ok(value.clone()),
                _ => Err(format!("Value {value} does not exist in \"{name}\" enum.")),
            },
            Some(TypeDef::Scalar(_)) => input_scalar(name, value),
            _ => Err(format!("Type \"{name}\" is not an input type.")),
        },
    }
}

fn input_scalar(type_name: &str, value: &Value) -> Result<Value, String> {
    match (type_name, value) {
        ("Int", Value::Number(n)) => n
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .map(Value::from)
            .ok_or_else(|| format!("Int cannot represent non 32-bit signed integer value: {value}")),
        ("Int", _) => Err(format!("Int cannot represent non-integer value: {value}")),
        ("Float", Value::Number(_)) => Ok(value.clone()),
        ("Float", _) => Err(format!("Float cannot represent non numeric value: {value}")),
        ("String", Value::String(_)) => Ok(value.clone()),
        ("String", _) => Err(format!("String cannot represent a non string value: {value}")),
        ("Boolean", Value::Bool(_)) => Ok(value.clone()),
        ("Boolean", _) => Err(format!("Boolean cannot represent a non boolean value: {value}")),
        ("ID", Value::String(_)) => Ok(value.clone()),
        ("ID", Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(Value::String(n.to_string())),
        ("ID", _) => Err(format!("ID cannot represent value: {value}")),
        _ => Ok(value.clone()),
    }
}

fn display_literal(value: &ast::Value) -> String {
    match value {
        ast::Value::Variable(name) => format!("${name}"),
        ast::Value::Enum(name) => name.clone(),
        other => untyped_value(other).map_or_else(String::new, |v| v.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EnumDef, FieldDef, InputObjectDef, ObjectDef, SchemaBuilder};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ty(s: &str) -> TypeRef {
        s.parse().unwrap()
    }

    fn schema() -> Schema {
        SchemaBuilder::new()
            .query_type("Query")
            .enum_type(EnumDef::new("Episode", ["NEWHOPE", "JEDI"]))
            .input_object(
                InputObjectDef::new("Filter")
                    .field(InputFieldDef::new("first", ty("Int")).with_default(json!(10)))
                    .field(InputFieldDef::new("name", ty("String!"))),
            )
            .object(
                ObjectDef::new("Query").field(
                    FieldDef::new("hero", ty("String"))
                        .argument(InputFieldDef::new("episode", ty("Episode")))
                        .argument(InputFieldDef::new("ids", ty("[ID!]")))
                        .argument(InputFieldDef::new("limit", ty("Int!")).with_default(json!(3))),
                ),
            )
            .build()
            .unwrap()
    }

    fn first_field(source: &str) -> (weave_syntax::Document, std::sync::Arc<weave_syntax::Field>) {
        let document = weave_syntax::parse(source).into_result(source).unwrap();
        let field = match &document.operations().next().unwrap().selection_set.selections[0] {
            weave_syntax::Selection::Field(field) => field.clone(),
            _ => panic!("expected field"),
        };
        (document, field)
    }

    #[test]
    fn test_variable_defaults_and_required() {
        let schema = schema();
        let source = "query Q($a: Int = 5, $b: String!, $c: Episode) { hero }";
        let document = weave_syntax::parse(source).into_result(source).unwrap();
        let op = document.operations().next().unwrap();

        let mut inputs = Variables::new();
        inputs.insert("b".to_string(), json!("x"));
        let coerced = coerce_variable_values(&schema, &op.variable_definitions, &inputs).unwrap();
        assert_eq!(coerced.get("a"), Some(&json!(5)));
        assert_eq!(coerced.get("b"), Some(&json!("x")));
        assert!(!coerced.contains_key("c"));

        let errors =
            coerce_variable_values(&schema, &op.variable_definitions, &Variables::new()).unwrap_err();
        assert_eq!(
            errors[0].message,
            "Variable \"$b\" of required type \"String!\" was not provided."
        );
        assert_eq!(errors[0].locations.len(), 1);
    }

    #[test]
    fn test_variable_invalid_value() {
        let schema = schema();
        let source = "query Q($f: Filter) { hero }";
        let document = weave_syntax::parse(source).into_result(source).unwrap();
        let op = document.operations().next().unwrap();

        let mut inputs = Variables::new();
        inputs.insert("f".to_string(), json!({"first": 1}));
        let errors = coerce_variable_values(&schema, &op.variable_definitions, &inputs).unwrap_err();
        assert_eq!(
            errors[0].message,
            "Variable \"$f\" got invalid value {\"first\":1}; Field \"name\" of required type \"String!\" was not provided."
        );

        inputs.insert("f".to_string(), json!({"name": "x"}));
        let coerced = coerce_variable_values(&schema, &op.variable_definitions, &inputs).unwrap();
        assert_eq!(coerced.get("f"), Some(&json!({"first": 10, "name": "x"})));
    }

    #[test]
    fn test_argument_values_with_literals_and_variables() {
        let schema = schema();
        let (_doc, field) = first_field("query Q($e: Episode) { hero(episode: $e, ids: 4) }");
        let definitions = &schema.field("Query", "hero").unwrap().arguments;

        let mut variables = Variables::new();
        variables.insert("e".to_string(), json!("JEDI"));
        let args = argument_values(&schema, definitions, &field.arguments, &variables).unwrap();
        assert_eq!(args.get("episode"), Some(&json!("JEDI")));
        assert_eq!(args.get("ids"), Some(&json!(["4"])));
        assert_eq!(args.get("limit"), Some(&json!(3)));

        // A variable without a runtime value falls back to the default or is omitted.
        let args = argument_values(&schema, definitions, &field.arguments, &Variables::new()).unwrap();
        assert!(!args.contains_key("episode"));
    }

    #[test]
    fn test_argument_invalid_literal() {
        let schema = schema();
        let (_doc, field) = first_field("{ hero(episode: SITH) }");
        let definitions = &schema.field("Query", "hero").unwrap().arguments;
        let err = argument_values(&schema, definitions, &field.arguments, &Variables::new())
            .unwrap_err();
        assert_eq!(err.message, "Argument \"episode\" has invalid value SITH.");
    }

    #[test]
    fn test_directive_values() {
        let schema = schema();
        let (_doc, field) = first_field("{ hero @stream(initialCount: 2) }");
        let stream = schema.directive("stream").unwrap();
        let values = directive_values(&schema, stream, &field.directives, &Variables::new())
            .unwrap()
            .unwrap();
        assert_eq!(values.get("initialCount"), Some(&json!(2)));
        assert_eq!(values.get("if"), Some(&json!(true)));
        assert!(!values.contains_key("label"));

        let defer = schema.directive("defer").unwrap();
        assert!(directive_values(&schema, defer, &field.directives, &Variables::new())
            .unwrap()
            .is_none());
    }
}
