//! Shared schema and helpers for execution tests.

#![allow(dead_code)]

use serde_json::{json, Value};
use weave_runtime::{
    Executor, FieldDef, InterfaceDef, ObjectDef, Request, ResolverMap, Schema, SchemaBuilder,
    TypeRef, UnionDef,
};

fn ty(source: &str) -> TypeRef {
    source.parse().expect("valid type reference")
}

pub fn schema() -> Schema {
    let hero = ObjectDef::new("Hero")
        .implements("Character")
        .field(FieldDef::new("id", ty("ID")))
        .field(FieldDef::new("name", ty("String")))
        .field(FieldDef::new("nonNullName", ty("String!")))
        .field(FieldDef::new("friends", ty("[Friend]")));
    let friend = ObjectDef::new("Friend")
        .implements("Character")
        .field(FieldDef::new("id", ty("ID")))
        .field(FieldDef::new("name", ty("String")))
        .field(FieldDef::new("nonNullName", ty("String!")));
    let character = InterfaceDef::new("Character")
        .field(FieldDef::new("id", ty("ID")))
        .field(FieldDef::new("name", ty("String")));

    SchemaBuilder::new()
        .query_type("Query")
        .mutation_type("Mutation")
        .object(
            ObjectDef::new("Query")
                .field(FieldDef::new("hero", ty("Hero")))
                .field(FieldDef::new("scalarList", ty("[String]")))
                .field(FieldDef::new("nonNullList", ty("[String!]")))
                .field(FieldDef::new("friendList", ty("[Friend]")))
                .field(FieldDef::new("asyncList", ty("[String]")))
                .field(FieldDef::new("slowField", ty("String")))
                .field(FieldDef::new("fastField", ty("String")))
                .field(FieldDef::new("requiredField", ty("String!")))
                .field(FieldDef::new("character", ty("Character")))
                .field(FieldDef::new("search", ty("[SearchResult]"))),
        )
        .object(
            ObjectDef::new("Mutation")
                .field(FieldDef::new("first", ty("String")))
                .field(FieldDef::new("second", ty("String"))),
        )
        .object(hero)
        .object(friend)
        .interface(character)
        .union(UnionDef::new("SearchResult", ["Hero", "Friend"]))
        .build()
        .expect("valid schema")
}

pub fn friends() -> Value {
    json!([
        {"id": "2", "name": "Han"},
        {"id": "3", "name": "Leia"},
        {"id": "4", "name": "C-3PO"}
    ])
}

pub fn root() -> Value {
    json!({
        "hero": {"id": "1", "name": "Luke", "friends": friends()},
        "scalarList": ["apple", "banana", "coconut"],
        "friendList": friends(),
        "fastField": "fast"
    })
}

pub fn executor(resolvers: ResolverMap) -> Executor {
    Executor::new(schema(), resolvers)
}

/// Executes `source` against the shared root value and collects every payload.
pub async fn run(executor: &Executor, source: &str) -> Vec<Value> {
    let request = Request::parse(source).expect("valid document").root_value(root());
    executor.execute(request).await.collect().await
}
