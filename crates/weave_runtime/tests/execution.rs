//! Integration tests for single-result execution.

mod common;

use common::{executor, root, run};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use weave_runtime::{FieldValue, Request, ResolverError, ResolverMap};

#[tokio::test(start_paused = true)]
async fn test_keys_follow_selection_order() {
    let mut resolvers = ResolverMap::new();
    resolvers.register_async("Query", "slowField", |_, _, _, _| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(FieldValue::from(json!("slow")))
    });

    let payloads = run(&executor(resolvers), "{ slowField fastField hero { name id } }").await;
    assert_eq!(payloads.len(), 1);

    let data = &payloads[0]["data"];
    let keys: Vec<&String> = data.as_object().unwrap().keys().collect();
    assert_eq!(keys, ["slowField", "fastField", "hero"]);
    let hero_keys: Vec<&String> = data["hero"].as_object().unwrap().keys().collect();
    assert_eq!(hero_keys, ["name", "id"]);
    assert_eq!(data["slowField"], json!("slow"));
}

#[tokio::test]
async fn test_non_null_error_bubbles_to_nearest_nullable_field() {
    let payloads = run(
        &executor(ResolverMap::new()),
        "{ hero { id nonNullName } fastField }",
    )
    .await;
    assert_eq!(
        payloads,
        vec![json!({
            "data": {"hero": null, "fastField": "fast"},
            "errors": [{
                "message": "Cannot return null for non-nullable field Hero.nonNullName.",
                "locations": [{"line": 1, "column": 13}],
                "path": ["hero", "nonNullName"]
            }]
        })]
    );
}

#[tokio::test]
async fn test_non_null_root_error_nulls_data_with_one_error() {
    let payloads = run(
        &executor(ResolverMap::new()),
        "{ a: requiredField b: requiredField fastField }",
    )
    .await;
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["data"], Value::Null);
    let errors = payloads[0]["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["path"], json!(["a"]));
}

#[tokio::test]
async fn test_nullable_list_items_are_nulled_individually() {
    let mut resolvers = ResolverMap::new();
    resolvers.register_fn("Query", "scalarList", |_, _, _, _| {
        Ok(FieldValue::List(vec![
            FieldValue::from(json!("apple")),
            FieldValue::future(async { Err(ResolverError::custom("rotten")) }),
            FieldValue::from(json!("coconut")),
        ]))
    });

    let payloads = run(&executor(resolvers), "{ scalarList }").await;
    assert_eq!(payloads[0]["data"], json!({"scalarList": ["apple", null, "coconut"]}));
    assert_eq!(payloads[0]["errors"][0]["message"], json!("rotten"));
    assert_eq!(payloads[0]["errors"][0]["path"], json!(["scalarList", 1]));
}

#[tokio::test]
async fn test_invalid_iterable_and_leaf_values_are_field_errors() {
    let mut resolvers = ResolverMap::new();
    resolvers.register_fn("Query", "scalarList", |_, _, _, _| Ok(FieldValue::from(json!("apple"))));
    resolvers.register_fn("Query", "fastField", |_, _, _, _| Ok(FieldValue::from(json!({"a": 1}))));

    let payloads = run(&executor(resolvers), "{ scalarList fastField }").await;
    assert_eq!(payloads[0]["data"], json!({"scalarList": null, "fastField": null}));
    assert_eq!(
        payloads[0]["errors"][0]["message"],
        json!("Expected Iterable, but did not find one for field \"Query.scalarList\".")
    );
    assert_eq!(
        payloads[0]["errors"][1]["message"],
        json!("String cannot represent value: {\"a\":1}")
    );
}

#[tokio::test(start_paused = true)]
async fn test_mutation_fields_run_serially() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut resolvers = ResolverMap::new();
    for (field, delay) in [("first", 50), ("second", 10)] {
        let calls = Arc::clone(&calls);
        resolvers.register_async("Mutation", field, move |_, _, _, _| {
            let calls = Arc::clone(&calls);
            async move {
                calls.lock().unwrap().push(format!("{field}:start"));
                tokio::time::sleep(Duration::from_millis(delay)).await;
                calls.lock().unwrap().push(format!("{field}:end"));
                Ok(FieldValue::from(json!(field)))
            }
        });
    }

    let payloads = run(&executor(resolvers), "mutation { first second }").await;
    assert_eq!(payloads, vec![json!({"data": {"first": "first", "second": "second"}})]);
    assert_eq!(
        *calls.lock().unwrap(),
        vec!["first:start", "first:end", "second:start", "second:end"]
    );
}

#[test]
fn test_abstract_types_resolve_from_typename() {
    let response = executor(ResolverMap::new()).execute_sync(
        Request::parse(
            "{ character { __typename name ... on Hero { id } } search { __typename ... on Friend { name } } }",
        )
        .unwrap()
        .root_value(json!({
            "character": {"__typename": "Hero", "id": "1", "name": "Luke"},
            "search": [
                {"__typename": "Friend", "name": "Han"},
                {"__typename": "Hero", "name": "Luke"}
            ]
        })),
    );
    assert_eq!(
        serde_json::to_value(response).unwrap(),
        json!({
            "data": {
                "character": {"__typename": "Hero", "name": "Luke", "id": "1"},
                "search": [
                    {"__typename": "Friend", "name": "Han"},
                    {"__typename": "Hero"}
                ]
            }
        })
    );
}

#[test]
fn test_abstract_type_resolution_errors() {
    let mut resolvers = ResolverMap::new();
    resolvers.register_type_resolver("Character", |value, _, _| {
        value.get("kind").and_then(Value::as_str).map(str::to_string)
    });
    let executor = executor(resolvers);

    let cases = [
        (
            json!({"kind": "Droid"}),
            "Abstract type \"Character\" was resolved to a type \"Droid\" that does not exist inside the schema.",
        ),
        (
            json!({"kind": "Query"}),
            "Runtime Object type \"Query\" is not a possible type for \"Character\".",
        ),
        (
            json!({"kind": "String"}),
            "Abstract type \"Character\" was resolved to a non-object type \"String\".",
        ),
    ];
    for (character, message) in cases {
        let response = executor.execute_sync(
            Request::parse("{ character { name } }")
                .unwrap()
                .root_value(json!({ "character": character })),
        );
        assert_eq!(response.data, Some(json!({"character": null})));
        assert_eq!(response.errors[0].message, message);
    }
}

#[test]
fn test_is_type_of_guards_object_values() {
    let mut resolvers = ResolverMap::new();
    resolvers.register_is_type_of("Hero", |value, _| value.get("name").is_some());
    let response = executor(resolvers).execute_sync(
        Request::parse("{ hero { id } }")
            .unwrap()
            .root_value(json!({"hero": {"id": "1"}})),
    );
    assert_eq!(response.data, Some(json!({"hero": null})));
    assert_eq!(
        response.errors[0].message,
        "Expected value of type \"Hero\" but got: {\"id\":\"1\"}."
    );
}

#[test]
fn test_variables_are_coerced_before_execution() {
    let executor = executor(ResolverMap::new());
    let response = executor.execute_sync(
        Request::parse("query ($count: Int!) { scalarList @stream(initialCount: $count) }").unwrap(),
    );
    assert_eq!(response.data, None);
    assert_eq!(
        response.errors[0].message,
        "Variable \"$count\" of required type \"Int!\" was not provided."
    );

    let response = executor.execute_sync(
        Request::parse("query ($skip: Boolean!) { fastField @skip(if: $skip) hero { name } }")
            .unwrap()
            .variable("skip", json!(true))
            .root_value(root()),
    );
    assert_eq!(response.data, Some(json!({"hero": {"name": "Luke"}})));
}

#[test]
fn test_named_operation_is_selected() {
    let response = executor(ResolverMap::new()).execute_sync(
        Request::parse("query A { fastField } query B { hero { id } }")
            .unwrap()
            .operation_name("B")
            .root_value(root()),
    );
    assert_eq!(response.data, Some(json!({"hero": {"id": "1"}})));
}
