//! Incremental GraphQL execution for Weave.
//!
//! This crate provides the execution runtime:
//! - `schema`: Type system model and schema building
//! - `resolver`: Field resolvers, type resolvers and item streams
//! - `values`: Variable, argument and directive argument coercion
//! - `directives`: Built-in `@skip`, `@include`, `@defer` and `@stream`
//! - `collect`: Field collection with defer masking
//! - `executor`: Operation execution and value completion
//! - `records`: Incremental delivery records
//! - `publisher`: Ordering of subsequent payloads
//! - `response`: Result and payload shapes
//! - `bundler`: Size and time windowed batching

pub mod bundler;
pub mod collect;
pub mod directives;
pub mod executor;
pub mod publisher;
pub mod records;
pub mod resolver;
pub mod response;
pub mod schema;
pub mod values;

pub use bundler::{bundle, Bundle, BundlerConfig};
pub use collect::{Collector, DeferUsage, FieldGroup, GroupedFieldSet, Target, TargetSet};
pub use directives::{DeferDirective, StreamDirective};
pub use executor::{Executor, ExecutorConfig, Request};
pub use publisher::{IncrementalStream, Publisher};
pub use records::{RecordId, StreamId};
pub use resolver::{
    Context, FieldValue, ItemStream, Resolver, ResolverArgs, ResolverError, ResolverInfo,
    ResolverMap, ResolverResult,
};
pub use response::{
    CompletedResult, ExecutionResult, IncrementalDeferResult, IncrementalResult,
    IncrementalStreamResult, InitialIncrementalResult, Response, SubsequentIncrementalResult,
};
pub use schema::{
    DirectiveDefinition, DirectiveLocation, EnumDef, FieldDef, InputFieldDef, InputObjectDef,
    InterfaceDef, ObjectDef, ScalarDef, Schema, SchemaBuilder, SchemaError, TypeDef, TypeKind,
    TypeRef, UnionDef,
};
pub use values::{ArgumentValues, Variables};
