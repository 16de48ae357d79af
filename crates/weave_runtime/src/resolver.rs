//! Resolver system.
//!
//! Resolvers are called synchronously and hand back a [`FieldValue`]. A value
//! that is not ready yet is returned as [`FieldValue::Future`], a lazily
//! produced list as [`FieldValue::Stream`]; lists may mix ready and pending
//! items.

use crate::values::ArgumentValues;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context as TaskContext, Poll};
use weave_core::{GraphQLError, Path};

/// Request-scoped data shared by every resolver of one execution.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Request-scoped data.
    pub data: HashMap<String, Value>,
}

impl Context {
    /// Creates a new context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a value in the context.
    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: T) {
        if let Ok(v) = serde_json::to_value(value) {
            self.data.insert(key.into(), v);
        }
    }

    /// Gets a value from the context.
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Arguments passed to a resolver.
#[derive(Debug, Clone, Default)]
pub struct ResolverArgs {
    args: ArgumentValues,
}

impl ResolverArgs {
    /// Creates new resolver args.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets an argument by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    /// Gets an argument as a specific type.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.args
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Gets a required argument, returning an error if not found.
    pub fn require<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T, ResolverError> {
        self.args
            .get(name)
            .ok_or_else(|| ResolverError::MissingArgument(name.to_string()))
            .and_then(|v| {
                serde_json::from_value(v.clone())
                    .map_err(|e| ResolverError::ArgumentParseError(name.to_string(), e.to_string()))
            })
    }

    /// Returns all arguments in definition order.
    pub fn all(&self) -> &ArgumentValues {
        &self.args
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Sets an argument.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.args.insert(name.into(), value);
    }
}

impl From<ArgumentValues> for ResolverArgs {
    fn from(args: ArgumentValues) -> Self {
        Self { args }
    }
}

/// Info about the field being resolved.
#[derive(Debug, Clone)]
pub struct ResolverInfo {
    /// The field name being resolved.
    pub field_name: String,

    /// The parent type name.
    pub parent_type: String,

    /// The declared return type, e.g. `[String!]`.
    pub return_type: String,

    /// Response path of this field.
    pub path: Path,
}

impl ResolverInfo {
    /// Creates new resolver info.
    pub fn new(field_name: impl Into<String>, parent_type: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            parent_type: parent_type.into(),
            return_type: String::new(),
            path: Path::root(),
        }
    }

    /// Sets the return type.
    pub fn with_return_type(mut self, ty: impl Into<String>) -> Self {
        self.return_type = ty.into();
        self
    }

    /// Sets the path.
    pub fn with_path(mut self, path: Path) -> Self {
        self.path = path;
        self
    }
}

/// Error from a resolver.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResolverError {
    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    #[error("Failed to parse argument '{0}': {1}")]
    ArgumentParseError(String, String),

    #[error("{0}")]
    Custom(String),
}

impl ResolverError {
    /// Creates a custom error with the given message.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }
}

impl From<ResolverError> for GraphQLError {
    fn from(error: ResolverError) -> Self {
        GraphQLError::new(error.to_string())
    }
}

/// Result type for resolvers.
pub type ResolverResult = Result<FieldValue, ResolverError>;

/// Future type for values that are not ready yet.
pub type ResolverFuture = BoxFuture<'static, ResolverResult>;

/// A value produced by a resolver.
pub enum FieldValue {
    /// A ready value. Arrays are lists, objects are parents of sub-selections.
    Value(Value),
    /// A list whose items may themselves be pending.
    List(Vec<FieldValue>),
    /// A value that becomes available later.
    Future(ResolverFuture),
    /// A list whose items are produced one by one.
    Stream(ItemStream),
}

impl FieldValue {
    pub fn null() -> Self {
        Self::Value(Value::Null)
    }

    /// Wraps a future into a pending value.
    pub fn future<F>(future: F) -> Self
    where
        F: Future<Output = ResolverResult> + Send + 'static,
    {
        Self::Future(Box::pin(future))
    }

    /// Builds a list from any sequence of field values.
    pub fn list<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<FieldValue>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Value(Value::Null))
    }
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<ItemStream> for FieldValue {
    fn from(stream: ItemStream) -> Self {
        Self::Stream(stream)
    }
}

impl Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::List(items) => f.debug_tuple("List").field(items).finish(),
            Self::Future(_) => f.write_str("Future(..)"),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A one-shot callback run when a stream is abandoned before it finished.
#[derive(Clone, Default)]
pub struct CloseHook(Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>);

impl CloseHook {
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Arc::new(Mutex::new(Some(Box::new(f)))))
    }

    /// Runs the callback unless it already ran or was disarmed.
    pub fn fire(&self) {
        if let Some(f) = self.take() {
            f();
        }
    }

    /// Drops the callback without running it.
    pub fn disarm(&self) {
        drop(self.take());
    }

    fn take(&self) -> Option<Box<dyn FnOnce() + Send>> {
        self.0.lock().ok().and_then(|mut hook| hook.take())
    }
}

impl Debug for CloseHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let armed = self.0.lock().map(|hook| hook.is_some()).unwrap_or(false);
        f.debug_struct("CloseHook").field("armed", &armed).finish()
    }
}

/// An asynchronous source of list items.
///
/// Dropping an `ItemStream` that has neither been exhausted nor failed runs
/// its close hook, so upstream producers can release their resources.
pub struct ItemStream {
    inner: BoxStream<'static, ResolverResult>,
    close: CloseHook,
    finished: bool,
}

impl ItemStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = ResolverResult> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
            close: CloseHook::default(),
            finished: false,
        }
    }

    /// A stream over ready values.
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: Send + 'static,
    {
        Self::new(stream::iter(values.into_iter().map(|v| Ok(FieldValue::Value(v)))))
    }

    /// Registers the callback run when the stream is closed early.
    pub fn on_close(mut self, f: impl FnOnce() + Send + 'static) -> Self {
        self.close = CloseHook::new(f);
        self
    }

    pub fn close_hook(&self) -> CloseHook {
        self.close.clone()
    }

    /// Closes the stream early.
    pub fn close(&mut self) {
        self.finished = true;
        self.close.fire();
    }
}

impl Stream for ItemStream {
    type Item = ResolverResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        let polled = self.inner.poll_next_unpin(cx);
        if let Poll::Ready(None | Some(Err(_))) = &polled {
            self.finished = true;
            self.close.disarm();
        }
        polled
    }
}

impl Drop for ItemStream {
    fn drop(&mut self) {
        if !self.finished {
            self.close.fire();
        }
    }
}

impl Debug for ItemStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemStream")
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// Trait for field resolvers.
pub trait Resolver: Send + Sync {
    /// Resolves a field value.
    fn resolve(
        &self,
        parent: &Value,
        args: &ResolverArgs,
        ctx: &Context,
        info: &ResolverInfo,
    ) -> ResolverResult;
}

/// A boxed resolver.
pub type BoxedResolver = Box<dyn Resolver>;

/// A sync resolver function.
pub type SyncResolverFn =
    Arc<dyn Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult + Send + Sync>;

/// A wrapper for sync resolver functions.
pub struct FnResolver {
    func: SyncResolverFn,
}

impl FnResolver {
    /// Creates a new function resolver.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult
            + Send
            + Sync
            + 'static,
    {
        Self { func: Arc::new(f) }
    }
}

impl Resolver for FnResolver {
    fn resolve(
        &self,
        parent: &Value,
        args: &ResolverArgs,
        ctx: &Context,
        info: &ResolverInfo,
    ) -> ResolverResult {
        (self.func)(parent, args, ctx, info)
    }
}

/// An async resolver function type.
pub type AsyncResolverFn =
    Arc<dyn Fn(Value, ResolverArgs, Context, ResolverInfo) -> ResolverFuture + Send + Sync>;

/// A wrapper for async resolver functions.
pub struct AsyncFnResolver {
    func: AsyncResolverFn,
}

impl AsyncFnResolver {
    /// Creates a new async function resolver.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value, ResolverArgs, Context, ResolverInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResolverResult> + Send + 'static,
    {
        Self {
            func: Arc::new(move |parent, args, ctx, info| Box::pin(f(parent, args, ctx, info))),
        }
    }
}

impl Resolver for AsyncFnResolver {
    fn resolve(
        &self,
        parent: &Value,
        args: &ResolverArgs,
        ctx: &Context,
        info: &ResolverInfo,
    ) -> ResolverResult {
        let future = (self.func)(parent.clone(), args.clone(), ctx.clone(), info.clone());
        Ok(FieldValue::Future(future))
    }
}

/// Default resolver that reads properties from the parent object.
pub struct DefaultResolver;

impl Resolver for DefaultResolver {
    fn resolve(
        &self,
        parent: &Value,
        _args: &ResolverArgs,
        _ctx: &Context,
        info: &ResolverInfo,
    ) -> ResolverResult {
        let field_name = &info.field_name;
        match parent {
            Value::Object(map) => {
                let value = map
                    .get(field_name)
                    .or_else(|| map.get(&to_snake_case(field_name)))
                    .cloned()
                    .unwrap_or(Value::Null);
                Ok(FieldValue::Value(value))
            }
            Value::Null => Ok(FieldValue::null()),
            _ => Err(ResolverError::FieldNotFound(field_name.clone())),
        }
    }
}

/// Converts camelCase to snake_case.
fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(c.to_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}

/// Picks the concrete object type of a value of an abstract type.
pub type TypeResolverFn = Arc<dyn Fn(&Value, &Context, &ResolverInfo) -> Option<String> + Send + Sync>;

/// Decides whether a value belongs to an object type.
pub type IsTypeOfFn = Arc<dyn Fn(&Value, &Context) -> bool + Send + Sync>;

/// Storage for resolvers organized by type and field.
pub struct ResolverMap {
    /// Resolvers indexed by "TypeName.fieldName".
    resolvers: HashMap<String, BoxedResolver>,

    /// Default resolver for unregistered fields.
    default_resolver: Option<BoxedResolver>,

    /// Type resolvers indexed by abstract type name.
    type_resolvers: HashMap<String, TypeResolverFn>,

    /// `isTypeOf` predicates indexed by object type name.
    is_type_of: HashMap<String, IsTypeOfFn>,
}

impl Default for ResolverMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverMap {
    /// Creates a new resolver map.
    pub fn new() -> Self {
        Self {
            resolvers: HashMap::new(),
            default_resolver: Some(Box::new(DefaultResolver)),
            type_resolvers: HashMap::new(),
            is_type_of: HashMap::new(),
        }
    }

    /// Registers a resolver for a specific type and field.
    pub fn register<R: Resolver + 'static>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        resolver: R,
    ) {
        let key = format!("{}.{}", type_name.into(), field_name.into());
        self.resolvers.insert(key, Box::new(resolver));
    }

    /// Registers a sync function as a resolver.
    pub fn register_fn<F>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        f: F,
    ) where
        F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult
            + Send
            + Sync
            + 'static,
    {
        self.register(type_name, field_name, FnResolver::new(f));
    }

    /// Registers an async function as a resolver.
    pub fn register_async<F, Fut>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        f: F,
    ) where
        F: Fn(Value, ResolverArgs, Context, ResolverInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResolverResult> + Send + 'static,
    {
        self.register(type_name, field_name, AsyncFnResolver::new(f));
    }

    /// Registers the type resolver of an interface or union.
    pub fn register_type_resolver<F>(&mut self, abstract_type: impl Into<String>, f: F)
    where
        F: Fn(&Value, &Context, &ResolverInfo) -> Option<String> + Send + Sync + 'static,
    {
        self.type_resolvers.insert(abstract_type.into(), Arc::new(f));
    }

    /// Registers the `isTypeOf` predicate of an object type.
    pub fn register_is_type_of<F>(&mut self, object_type: impl Into<String>, f: F)
    where
        F: Fn(&Value, &Context) -> bool + Send + Sync + 'static,
    {
        self.is_type_of.insert(object_type.into(), Arc::new(f));
    }

    /// Gets a resolver for a type and field.
    pub fn get(&self, type_name: &str, field_name: &str) -> Option<&dyn Resolver> {
        let key = format!("{type_name}.{field_name}");
        self.resolvers
            .get(&key)
            .or(self.default_resolver.as_ref())
            .map(|r| r.as_ref())
    }

    pub fn type_resolver(&self, abstract_type: &str) -> Option<&TypeResolverFn> {
        self.type_resolvers.get(abstract_type)
    }

    pub fn is_type_of(&self, object_type: &str) -> Option<&IsTypeOfFn> {
        self.is_type_of.get(object_type)
    }

    /// Sets the default resolver.
    pub fn set_default<R: Resolver + 'static>(&mut self, resolver: R) {
        self.default_resolver = Some(Box::new(resolver));
    }

    /// Removes the default resolver.
    pub fn remove_default(&mut self) {
        self.default_resolver = None;
    }
}

impl Debug for ResolverMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverMap")
            .field("resolver_count", &self.resolvers.len())
            .field("type_resolver_count", &self.type_resolvers.len())
            .field("has_default", &self.default_resolver.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ready(result: ResolverResult) -> Value {
        match result.unwrap() {
            FieldValue::Value(value) => value,
            other => panic!("expected a ready value, got {other:?}"),
        }
    }

    #[test]
    fn test_resolver_args() {
        let mut args = ResolverArgs::new();
        args.set("id", json!(123));
        args.set("name", json!("test"));

        assert_eq!(args.get_as::<i64>("id"), Some(123));
        assert_eq!(args.get_as::<String>("name"), Some("test".to_string()));
        assert_eq!(args.get_as::<i64>("missing"), None);
        assert_eq!(
            args.require::<i64>("missing"),
            Err(ResolverError::MissingArgument("missing".to_string()))
        );
    }

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("firstName"), "first_name");
        assert_eq!(to_snake_case("lastName"), "last_name");
        assert_eq!(to_snake_case("id"), "id");
        assert_eq!(to_snake_case("ID"), "i_d");
    }

    #[test]
    fn test_default_resolver() {
        let resolver = DefaultResolver;
        let parent = json!({"name": "Alice", "first_name": "Al"});
        let args = ResolverArgs::new();
        let ctx = Context::new();

        let info = ResolverInfo::new("name", "User");
        assert_eq!(ready(resolver.resolve(&parent, &args, &ctx, &info)), json!("Alice"));

        let info = ResolverInfo::new("firstName", "User");
        assert_eq!(ready(resolver.resolve(&parent, &args, &ctx, &info)), json!("Al"));

        let info = ResolverInfo::new("missing", "User");
        assert_eq!(ready(resolver.resolve(&parent, &args, &ctx, &info)), Value::Null);

        let err = resolver.resolve(&json!(1), &args, &ctx, &info).unwrap_err();
        assert_eq!(err.to_string(), "Field not found: missing");
    }

    #[test]
    fn test_fn_resolver() {
        let resolver = FnResolver::new(|_parent, args, _ctx, _info| {
            let id: i64 = args.require("id")?;
            Ok(json!({"id": id, "name": "User"}).into())
        });

        let mut args = ResolverArgs::new();
        args.set("id", json!(42));
        let info = ResolverInfo::new("user", "Query");

        let value = ready(resolver.resolve(&json!({}), &args, &Context::new(), &info));
        assert_eq!(value, json!({"id": 42, "name": "User"}));
    }

    #[tokio::test]
    async fn test_async_resolver_is_pending() {
        let resolver = AsyncFnResolver::new(|_parent, _args, ctx, _info| async move {
            let greeting: String = ctx.get("greeting").unwrap_or_default();
            Ok(json!(greeting).into())
        });
        let mut ctx = Context::new();
        ctx.set("greeting", "hi");
        let info = ResolverInfo::new("hello", "Query");

        let FieldValue::Future(future) =
            resolver.resolve(&Value::Null, &ResolverArgs::new(), &ctx, &info).unwrap()
        else {
            panic!("expected a pending value");
        };
        assert_eq!(ready(future.await), json!("hi"));
    }

    #[test]
    fn test_resolver_map_default_fallback() {
        let mut map = ResolverMap::new();
        map.register_fn("Query", "hello", |_parent, _args, _ctx, _info| {
            Ok(json!("Hello, World!").into())
        });
        let args = ResolverArgs::new();
        let ctx = Context::new();

        let info = ResolverInfo::new("hello", "Query");
        let resolver = map.get("Query", "hello").unwrap();
        assert_eq!(ready(resolver.resolve(&json!({}), &args, &ctx, &info)), json!("Hello, World!"));

        let info = ResolverInfo::new("name", "User");
        let resolver = map.get("User", "name").unwrap();
        assert_eq!(ready(resolver.resolve(&json!({"name": "Bob"}), &args, &ctx, &info)), json!("Bob"));

        map.remove_default();
        assert!(map.get("User", "name").is_none());
    }

    #[tokio::test]
    async fn test_item_stream_close_hook() {
        let closed = Arc::new(AtomicUsize::new(0));

        // Dropped early: the hook runs once.
        let counter = Arc::clone(&closed);
        let mut stream = ItemStream::from_values(vec![json!(1), json!(2)])
            .on_close(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        assert!(stream.next().await.is_some());
        let hook = stream.close_hook();
        drop(stream);
        hook.fire();
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        // Exhausted: the hook never runs.
        let counter = Arc::clone(&closed);
        let mut stream = ItemStream::from_values(vec![json!(1)]).on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        while stream.next().await.is_some() {}
        drop(stream);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
