//! A small Star Wars schema with slow and streaming fields, for trying out
//! `@defer` and `@stream` from the command line.

use serde_json::{json, Value};
use std::time::Duration;
use weave_runtime::{
    FieldDef, FieldValue, InputFieldDef, InterfaceDef, ItemStream, ObjectDef, ResolverError,
    ResolverMap, Schema, SchemaBuilder, SchemaError, TypeRef,
};

/// Delay of the `friends` resolver.
const FRIENDS_DELAY: Duration = Duration::from_millis(50);

/// Delay between two `countdown` items.
const COUNTDOWN_TICK: Duration = Duration::from_millis(100);

fn ty(source: &str) -> Result<TypeRef, SchemaError> {
    source.parse()
}

fn character_fields() -> Result<Vec<FieldDef>, SchemaError> {
    Ok(vec![
        FieldDef::new("id", ty("ID!")?),
        FieldDef::new("name", ty("String")?),
        FieldDef::new("friends", ty("[Character]")?),
        FieldDef::new("appearsIn", ty("[String]")?),
    ])
}

/// Builds the demo schema.
pub fn schema() -> Result<Schema, SchemaError> {
    let mut human = ObjectDef::new("Human").implements("Character");
    let mut droid = ObjectDef::new("Droid").implements("Character");
    let mut character = InterfaceDef::new("Character");
    for field in character_fields()? {
        human = human.field(field.clone());
        droid = droid.field(field.clone());
        character = character.field(field);
    }
    human = human.field(FieldDef::new("homePlanet", ty("String")?));
    droid = droid.field(FieldDef::new("primaryFunction", ty("String")?));

    SchemaBuilder::new()
        .query_type("Query")
        .object(
            ObjectDef::new("Query")
                .field(FieldDef::new("hero", ty("Character")?))
                .field(FieldDef::new("characters", ty("[Character!]")?))
                .field(FieldDef::new("scalarList", ty("[String]")?))
                .field(
                    FieldDef::new("countdown", ty("[Int!]")?)
                        .argument(InputFieldDef::new("from", ty("Int")?).with_default(json!(3))),
                ),
        )
        .object(human)
        .object(droid)
        .interface(character)
        .build()
}

fn characters() -> Value {
    json!([
        {"__typename": "Human", "id": "1000", "name": "Luke Skywalker", "friends": ["1002", "2001"], "appearsIn": ["NEWHOPE", "EMPIRE", "JEDI"], "homePlanet": "Tatooine"},
        {"__typename": "Human", "id": "1002", "name": "Han Solo", "friends": ["1000", "2001"], "appearsIn": ["NEWHOPE", "EMPIRE", "JEDI"]},
        {"__typename": "Droid", "id": "2001", "name": "R2-D2", "friends": ["1000", "1002"], "appearsIn": ["NEWHOPE", "EMPIRE", "JEDI"], "primaryFunction": "Astromech"}
    ])
}

fn character(id: &str) -> Value {
    characters()
        .as_array()
        .and_then(|all| all.iter().find(|c| c["id"] == id).cloned())
        .unwrap_or(Value::Null)
}

/// The root value the demo operations run against.
pub fn root() -> Value {
    json!({
        "hero": character("1000"),
        "characters": characters(),
        "scalarList": ["apple", "banana", "coconut"]
    })
}

/// Resolvers of the demo schema. Friends are looked up after a delay and
/// `countdown` yields one number per tick.
pub fn resolvers() -> ResolverMap {
    let mut resolvers = ResolverMap::new();

    for type_name in ["Human", "Droid"] {
        resolvers.register_async(type_name, "friends", |parent, _, _, _| async move {
            tokio::time::sleep(FRIENDS_DELAY).await;
            let ids = parent["friends"].as_array().cloned().unwrap_or_default();
            Ok(FieldValue::list(
                ids.iter().map(|id| character(id.as_str().unwrap_or_default())),
            ))
        });
    }

    resolvers.register_fn("Query", "countdown", |_, args, _, _| {
        let from: i64 = args.require("from")?;
        if from < 0 {
            return Err(ResolverError::custom("countdown must start at zero or above"));
        }
        Ok(FieldValue::Stream(ItemStream::new(async_stream::stream! {
            for n in (0..=from).rev() {
                tokio::time::sleep(COUNTDOWN_TICK).await;
                yield Ok(FieldValue::from(json!(n)));
            }
        })))
    });

    resolvers
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use weave_runtime::{Executor, Request};

    #[tokio::test(start_paused = true)]
    async fn test_demo_defers_friends() {
        let executor = Executor::new(schema().unwrap(), resolvers());
        let request = Request::parse("{ hero { name ... @defer { friends { name } } } }")
            .unwrap()
            .root_value(root());
        let payloads = executor.execute(request).await.collect().await;
        assert_eq!(
            payloads,
            vec![
                json!({"data": {"hero": {"name": "Luke Skywalker"}}, "hasNext": true}),
                json!({
                    "incremental": [{
                        "data": {"friends": [{"name": "Han Solo"}, {"name": "R2-D2"}]},
                        "path": ["hero"]
                    }],
                    "completed": [{"path": ["hero"]}],
                    "hasNext": false
                }),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_demo_countdown_streams() {
        let executor = Executor::new(schema().unwrap(), resolvers());
        let request = Request::parse("{ countdown(from: 1) @stream }").unwrap();
        let payloads = executor.execute(request).await.collect().await;
        assert_eq!(payloads.len(), 4);
        assert_eq!(payloads[0], json!({"data": {"countdown": []}, "hasNext": true}));
        assert_eq!(payloads[2]["incremental"][0]["items"], json!([0]));
        assert_eq!(payloads[3], json!({"completed": [{"path": ["countdown"]}], "hasNext": false}));
    }
}
