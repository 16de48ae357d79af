//! Operation execution.
//!
//! Execution walks the grouped field sets of an operation, calls resolvers
//! and completes their values against the schema. Fields masked behind
//! `@defer` and list items past a `@stream` initial count are executed as
//! separate work on the [`Publisher`], which turns them into subsequent
//! payloads.
//!
//! All completion steps return `'static` boxed futures. A value that is
//! already available completes on the first poll, which is what allows
//! [`Executor::execute_sync`] to run plain operations without a runtime.

use crate::collect::{
    CollectFieldsResult, Collector, DeferUsage, FieldDetails, FieldGroup, GroupedFieldSet,
    GroupedFieldSetDetails, Target, TargetSet,
};
use crate::directives::stream_directive;
use crate::publisher::{Publisher, Work};
use crate::records::{RecordId, StreamId};
use crate::resolver::{Context, FieldValue, ItemStream, ResolverArgs, ResolverInfo, ResolverMap};
use crate::response::{ExecutionResult, Response};
use crate::schema::{Schema, TypeKind, TypeRef};
use crate::values::{argument_values, coerce_variable_values, Variables};
use futures::future::{poll_fn, try_join_all, AbortHandle, Abortable, BoxFuture};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::Poll;
use tracing::{debug, trace, warn};
use weave_core::{GraphQLError, Path};
use weave_syntax::{Document, OperationDefinition, OperationType};

type ExecResult = Result<Value, GraphQLError>;

/// Deferred fragment records by defer usage id.
type DeferMap = Arc<FxHashMap<usize, RecordId>>;

/// Executor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Honor `@defer` and `@stream`. When disabled both directives are
    /// ignored and every operation produces a single result.
    pub incremental_delivery: bool,
    /// Emit a debug event for every resolved field.
    pub field_tracing: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            incremental_delivery: true,
            field_tracing: false,
        }
    }
}

impl ExecutorConfig {
    pub fn with_incremental_delivery(mut self, enabled: bool) -> Self {
        self.incremental_delivery = enabled;
        self
    }

    pub fn with_field_tracing(mut self, enabled: bool) -> Self {
        self.field_tracing = enabled;
        self
    }
}

/// One operation request against an executor.
#[derive(Debug, Clone)]
pub struct Request {
    pub document: Arc<Document>,
    pub operation_name: Option<String>,
    pub variables: Variables,
    pub root_value: Value,
    pub context: Context,
}

impl Request {
    pub fn new(document: impl Into<Arc<Document>>) -> Self {
        Self {
            document: document.into(),
            operation_name: None,
            variables: Variables::new(),
            root_value: Value::Object(Map::new()),
            context: Context::default(),
        }
    }

    /// Parses `source` into a request, returning syntax errors on failure.
    pub fn parse(source: &str) -> Result<Self, Vec<GraphQLError>> {
        weave_syntax::parse(source).into_result(source).map(Self::new)
    }

    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn variables(mut self, variables: Variables) -> Self {
        self.variables = variables;
        self
    }

    pub fn variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn root_value(mut self, value: Value) -> Self {
        self.root_value = value;
        self
    }

    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }
}

/// Executes requests against one schema and resolver map.
pub struct Executor {
    schema: Arc<Schema>,
    resolvers: Arc<ResolverMap>,
    config: ExecutorConfig,
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .field("resolvers", &self.resolvers)
            .finish()
    }
}

impl Executor {
    pub fn new(schema: Schema, resolvers: ResolverMap) -> Self {
        Self {
            schema: Arc::new(schema),
            resolvers: Arc::new(resolvers),
            config: ExecutorConfig::default(),
        }
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Executes a request.
    ///
    /// Request errors (no matching operation, invalid variables) produce a
    /// single response without data. Otherwise the result is either a single
    /// response, or an initial payload plus a stream of subsequent payloads
    /// when deferred or streamed work is still pending.
    pub async fn execute(&self, request: Request) -> ExecutionResult {
        let ctx = match self.build_execution_context(request) {
            Ok(ctx) => Arc::new(ctx),
            Err(errors) => {
                warn!(errors = errors.len(), "request rejected before execution");
                return ExecutionResult::Single(Response::from_errors(errors));
            }
        };
        debug!(
            operation = %ctx.operation.operation,
            name = ctx.operation.name.as_ref().map(|n| n.as_str()),
            "executing operation"
        );

        // Deferred work starts alongside the initial result.
        let mut operation = Arc::clone(&ctx).execute_operation();
        let mut work: FuturesUnordered<Work> = FuturesUnordered::new();
        let data = poll_fn(|cx| {
            work.extend(ctx.publisher.take_inbox());
            loop {
                if let Poll::Ready(data) = operation.poll_unpin(cx) {
                    return Poll::Ready(data);
                }
                while let Poll::Ready(Some(())) = work.poll_next_unpin(cx) {}
                let queued = ctx.publisher.take_inbox();
                if queued.is_empty() {
                    return Poll::Pending;
                }
                work.extend(queued);
            }
        })
        .await;
        drop(operation);

        let publisher = Arc::clone(&ctx.publisher);
        drop(ctx);
        match data {
            Ok(data) => publisher.build_data_response(data, work),
            Err(error) => {
                drop(work);
                publisher.build_error_response(error)
            }
        }
    }

    /// Executes a request that must complete without waiting.
    ///
    /// Fails when a resolver suspends, or when the operation would produce
    /// more than one payload.
    pub fn execute_sync(&self, request: Request) -> Response {
        match self.execute(request).now_or_never() {
            Some(ExecutionResult::Single(response)) => response,
            Some(ExecutionResult::Incremental { .. }) => {
                Response::from_errors(vec![GraphQLError::new(
                    "Executing this GraphQL operation would unexpectedly produce multiple payloads (due to @defer or @stream directive)",
                )])
            }
            None => Response::from_errors(vec![GraphQLError::new(
                "GraphQL execution failed to complete synchronously.",
            )]),
        }
    }

    fn build_execution_context(&self, request: Request) -> Result<ExecutionContext, Vec<GraphQLError>> {
        let Request {
            document,
            operation_name,
            variables,
            root_value,
            context,
        } = request;

        let operation = select_operation(&document, operation_name.as_deref())
            .map_err(|error| vec![error])?;
        if self.schema.root_type_name(operation.operation).is_none() {
            return Err(vec![GraphQLError::new(format!(
                "Schema is not configured to execute {} operation.",
                operation.operation
            ))]);
        }
        let variables = Arc::new(coerce_variable_values(
            &self.schema,
            &operation.variable_definitions,
            &variables,
        )?);

        let collector = Collector::new(
            Arc::clone(&self.schema),
            Arc::clone(&document),
            Arc::clone(&variables),
            operation.operation,
            self.config.incremental_delivery,
        );
        Ok(ExecutionContext {
            schema: Arc::clone(&self.schema),
            resolvers: Arc::clone(&self.resolvers),
            config: self.config.clone(),
            operation,
            root_value: Arc::new(root_value),
            context,
            variables,
            collector,
            publisher: Arc::new(Publisher::new()),
            stream_usages: Mutex::new(FxHashMap::default()),
        })
    }
}

fn select_operation(
    document: &Document,
    operation_name: Option<&str>,
) -> Result<Arc<OperationDefinition>, GraphQLError> {
    let mut selected: Option<&Arc<OperationDefinition>> = None;
    for operation in document.operations() {
        match operation_name {
            None if selected.is_some() => {
                return Err(GraphQLError::new(
                    "Must provide operation name if query contains multiple operations.",
                ));
            }
            None => selected = Some(operation),
            Some(name) => {
                if operation.name.as_ref().is_some_and(|n| n.as_str() == name) {
                    selected = Some(operation);
                }
            }
        }
    }
    match (selected, operation_name) {
        (Some(operation), _) => Ok(Arc::clone(operation)),
        (None, Some(name)) => Err(GraphQLError::new(format!("Unknown operation named \"{name}\"."))),
        (None, None) => Err(GraphQLError::new("Must provide an operation.")),
    }
}

/// Streaming arguments of one field group, computed once per group.
#[derive(Debug)]
struct StreamUsage {
    initial_count: usize,
    label: Option<String>,
    /// Field group the streamed items are completed with. Items are never
    /// deferred, so every field of the group targets the initial result.
    field_group: Arc<FieldGroup>,
}

/// A deferred grouped field set waiting to be executed.
struct DeferredGroupedFieldSet {
    id: RecordId,
    grouped_field_set: GroupedFieldSet,
    should_initiate_defer: bool,
}

/// State shared by every future of one execution.
struct ExecutionContext {
    schema: Arc<Schema>,
    resolvers: Arc<ResolverMap>,
    config: ExecutorConfig,
    operation: Arc<OperationDefinition>,
    root_value: Arc<Value>,
    context: Context,
    variables: Arc<Variables>,
    collector: Collector,
    publisher: Arc<Publisher>,
    stream_usages: Mutex<FxHashMap<usize, Option<Arc<StreamUsage>>>>,
}

impl ExecutionContext {
    fn execute_operation(self: Arc<Self>) -> BoxFuture<'static, ExecResult> {
        async move {
            let operation_type = self.operation.operation;
            let root_type = self
                .schema
                .root_type_name(operation_type)
                .ok_or_else(|| {
                    GraphQLError::new(format!(
                        "Schema is not configured to execute {operation_type} operation."
                    ))
                })?
                .to_string();

            let collected = self
                .collector
                .collect_fields(&root_type, &self.operation.selection_set)?;
            let path = Path::root();
            let defer_map = self.add_new_deferred_fragments(
                &collected.new_defer_usages,
                RecordId::INITIAL,
                &DeferMap::default(),
                &path,
            );
            let deferred = self.add_new_deferred_grouped_field_sets(
                &collected.new_grouped_field_set_details,
                &defer_map,
                &path,
            );

            let source = Arc::clone(&self.root_value);
            let data = match operation_type {
                OperationType::Mutation => self.execute_fields_serially(
                    &root_type,
                    Arc::clone(&source),
                    path.clone(),
                    collected.grouped_field_set,
                    RecordId::INITIAL,
                    Arc::clone(&defer_map),
                ),
                _ => self.execute_fields(
                    &root_type,
                    &source,
                    &path,
                    &collected.grouped_field_set,
                    RecordId::INITIAL,
                    &defer_map,
                ),
            };
            self.execute_deferred_grouped_field_sets(&root_type, source, &path, deferred, defer_map);
            data.await
        }
        .boxed()
    }

    /// Executes the fields of a grouped field set concurrently. Resolvers are
    /// called right away, in selection order; completion runs concurrently.
    fn execute_fields(
        self: &Arc<Self>,
        parent_type: &str,
        source: &Arc<Value>,
        path: &Path,
        grouped_field_set: &GroupedFieldSet,
        record: RecordId,
        defer_map: &DeferMap,
    ) -> BoxFuture<'static, ExecResult> {
        let (keys, fields): (Vec<String>, Vec<_>) = grouped_field_set
            .iter()
            .filter_map(|(key, group)| {
                self.execute_field(parent_type, source, group, path.key(key.as_str()), record, defer_map)
                    .map(|field| (key.clone(), field))
            })
            .unzip();

        async move {
            let values = try_join_all(fields).await?;
            Ok(Value::Object(keys.into_iter().zip(values).collect()))
        }
        .boxed()
    }

    /// Executes root mutation fields one after another.
    fn execute_fields_serially(
        self: &Arc<Self>,
        parent_type: &str,
        source: Arc<Value>,
        path: Path,
        grouped_field_set: GroupedFieldSet,
        record: RecordId,
        defer_map: DeferMap,
    ) -> BoxFuture<'static, ExecResult> {
        let ctx = Arc::clone(self);
        let parent_type = parent_type.to_string();
        async move {
            let mut data = Map::new();
            for (key, group) in &grouped_field_set {
                let field_path = path.key(key.as_str());
                if let Some(field) =
                    ctx.execute_field(&parent_type, &source, group, field_path, record, &defer_map)
                {
                    data.insert(key.clone(), field.await?);
                }
            }
            Ok(Value::Object(data))
        }
        .boxed()
    }

    /// Resolves one field and returns the future completing its value, or
    /// `None` when the parent type has no such field.
    fn execute_field(
        self: &Arc<Self>,
        parent_type: &str,
        source: &Value,
        group: &Arc<FieldGroup>,
        path: Path,
        record: RecordId,
        defer_map: &DeferMap,
    ) -> Option<BoxFuture<'static, ExecResult>> {
        let field = group.first();
        let field_name = field.name.as_str();
        let field_def = self.schema.field(parent_type, field_name)?;
        let return_type = field_def.ty.clone();
        let info = Arc::new(
            ResolverInfo::new(field_name, parent_type)
                .with_return_type(return_type.to_string())
                .with_path(path.clone()),
        );

        if self.config.field_tracing {
            debug!(path = %path, parent_type, field = field_name, "resolving field");
        }

        let resolved = argument_values(&self.schema, &field_def.arguments, &field.arguments, &self.variables)
            .and_then(|args| {
                if field_name == "__typename" {
                    return Ok(FieldValue::Value(Value::String(parent_type.to_string())));
                }
                let resolver = self.resolvers.get(parent_type, field_name).ok_or_else(|| {
                    GraphQLError::new(format!("No resolver for field \"{parent_type}.{field_name}\"."))
                })?;
                resolver
                    .resolve(source, &ResolverArgs::from(args), &self.context, &info)
                    .map_err(GraphQLError::from)
            });

        Some(self.complete_field_value(
            return_type,
            Arc::clone(group),
            info,
            path,
            resolved,
            record,
            Arc::clone(defer_map),
        ))
    }

    /// Completes a resolved value. Errors are located at `path`; on a
    /// nullable position they are recorded and the value becomes null.
    #[allow(clippy::too_many_arguments)]
    fn complete_field_value(
        self: &Arc<Self>,
        return_type: TypeRef,
        group: Arc<FieldGroup>,
        info: Arc<ResolverInfo>,
        path: Path,
        resolved: Result<FieldValue, GraphQLError>,
        record: RecordId,
        defer_map: DeferMap,
    ) -> BoxFuture<'static, ExecResult> {
        let ctx = Arc::clone(self);
        async move {
            let completed = match resolved {
                Ok(value) => {
                    ctx.complete_value(
                        return_type.clone(),
                        Arc::clone(&group),
                        info,
                        path.clone(),
                        value,
                        record,
                        defer_map,
                    )
                    .await
                }
                Err(error) => Err(error),
            };
            completed.or_else(|raw| {
                let error = located_error(raw, &group, &path);
                if return_type.is_non_null() {
                    return Err(error);
                }
                ctx.publisher.add_field_error(record, error);
                ctx.publisher.filter(&path, record);
                Ok(Value::Null)
            })
        }
        .boxed()
    }

    #[allow(clippy::too_many_arguments)]
    fn complete_value(
        self: &Arc<Self>,
        return_type: TypeRef,
        group: Arc<FieldGroup>,
        info: Arc<ResolverInfo>,
        path: Path,
        result: FieldValue,
        record: RecordId,
        defer_map: DeferMap,
    ) -> BoxFuture<'static, ExecResult> {
        let ctx = Arc::clone(self);
        async move {
            let mut result = result;
            while let FieldValue::Future(pending) = result {
                result = pending.await.map_err(GraphQLError::from)?;
            }

            match return_type {
                TypeRef::NonNull(inner) => {
                    let completed = ctx
                        .complete_value(*inner, group, Arc::clone(&info), path, result, record, defer_map)
                        .await?;
                    if completed.is_null() {
                        return Err(GraphQLError::new(format!(
                            "Cannot return null for non-nullable field {}.{}.",
                            info.parent_type, info.field_name
                        )));
                    }
                    Ok(completed)
                }
                _ if result.is_null() => Ok(Value::Null),
                TypeRef::List(item_type) => {
                    ctx.complete_list_value(*item_type, group, info, path, result, record, defer_map)
                        .await
                }
                TypeRef::Named(name) => match ctx.schema.type_kind(&name) {
                    Some(kind) if kind.is_leaf() => ctx.complete_leaf_value(&name, result),
                    Some(kind) if kind.is_abstract() => {
                        let value = ready_value(result, &name)?;
                        let runtime_type = ctx.resolve_runtime_type(&name, &value, &group, &info)?;
                        ctx.complete_object_value(runtime_type, group, path, value, record, defer_map)
                            .await
                    }
                    Some(TypeKind::Object) => {
                        let value = ready_value(result, &name)?;
                        ctx.complete_object_value(name, group, path, value, record, defer_map)
                            .await
                    }
                    _ => Err(GraphQLError::new(format!(
                        "Cannot complete value of unexpected output type: \"{name}\"."
                    ))),
                },
            }
        }
        .boxed()
    }

    fn complete_leaf_value(&self, type_name: &str, result: FieldValue) -> ExecResult {
        let value = ready_value(result, type_name)?;
        let serialized = self
            .schema
            .serialize_leaf(type_name, &value)
            .map_err(GraphQLError::new)?;
        if serialized.is_null() {
            return Err(GraphQLError::new(format!(
                "Expected `{type_name}.serialize({value})` to return non-nullable value, returned: null"
            )));
        }
        Ok(serialized)
    }

    #[allow(clippy::too_many_arguments)]
    async fn complete_list_value(
        self: &Arc<Self>,
        item_type: TypeRef,
        group: Arc<FieldGroup>,
        info: Arc<ResolverInfo>,
        path: Path,
        result: FieldValue,
        record: RecordId,
        defer_map: DeferMap,
    ) -> ExecResult {
        let items: Vec<FieldValue> = match result {
            FieldValue::Stream(stream) => {
                return self
                    .complete_async_iterator_value(item_type, group, info, path, stream, record, defer_map)
                    .await;
            }
            FieldValue::List(items) => items,
            FieldValue::Value(Value::Array(items)) => items.into_iter().map(FieldValue::Value).collect(),
            _ => {
                return Err(GraphQLError::new(format!(
                    "Expected Iterable, but did not find one for field \"{}.{}\".",
                    info.parent_type, info.field_name
                )));
            }
        };

        let stream_usage = self.stream_usage(&group, &path)?;
        let mut completed = Vec::with_capacity(items.len());
        let mut stream: Option<(StreamId, RecordId)> = None;

        for (index, item) in items.into_iter().enumerate() {
            let item_path = path.index(index);
            if let Some(usage) = stream_usage.as_ref().filter(|usage| index >= usage.initial_count) {
                let (stream_id, parent) = *stream.get_or_insert_with(|| {
                    let id = self.publisher.new_stream_record(path.clone(), usage.label.clone(), None, None);
                    (id, record)
                });
                let items_record = self.execute_stream_field(
                    &path, item_path, item, usage, &info, &item_type, parent, stream_id,
                );
                stream = Some((stream_id, items_record));
                continue;
            }
            completed.push(self.complete_field_value(
                item_type.clone(),
                Arc::clone(&group),
                Arc::clone(&info),
                item_path,
                Ok(item),
                record,
                Arc::clone(&defer_map),
            ));
        }
        if let Some((_, last)) = stream {
            self.publisher.set_is_final_record(last);
        }

        Ok(Value::Array(try_join_all(completed).await?))
    }

    /// Queues the completion of one streamed item of a ready list.
    #[allow(clippy::too_many_arguments)]
    fn execute_stream_field(
        self: &Arc<Self>,
        list_path: &Path,
        item_path: Path,
        item: FieldValue,
        usage: &StreamUsage,
        info: &Arc<ResolverInfo>,
        item_type: &TypeRef,
        parent: RecordId,
        stream: StreamId,
    ) -> RecordId {
        let id = self
            .publisher
            .report_new_stream_items_record(stream, item_path.clone(), parent);
        let completion = self.complete_field_value(
            item_type.clone(),
            Arc::clone(&usage.field_group),
            Arc::clone(info),
            item_path,
            Ok(item),
            id,
            DeferMap::default(),
        );
        self.publisher
            .spawn(finish_stream_item(Arc::clone(&self.publisher), list_path.clone(), id, completion));
        id
    }

    #[allow(clippy::too_many_arguments)]
    async fn complete_async_iterator_value(
        self: &Arc<Self>,
        item_type: TypeRef,
        group: Arc<FieldGroup>,
        info: Arc<ResolverInfo>,
        path: Path,
        mut stream: ItemStream,
        record: RecordId,
        defer_map: DeferMap,
    ) -> ExecResult {
        let stream_usage = self.stream_usage(&group, &path)?;
        let mut completed = Vec::new();
        let mut index = 0;

        loop {
            if let Some(usage) = stream_usage.as_ref().filter(|usage| index >= usage.initial_count) {
                self.execute_stream_async_iterator(index, stream, usage, &info, &item_type, &path, record);
                break;
            }
            match stream.next().await {
                None => break,
                Some(Err(error)) => {
                    return Err(located_error(GraphQLError::from(error), &group, &path));
                }
                Some(Ok(item)) => completed.push(self.complete_field_value(
                    item_type.clone(),
                    Arc::clone(&group),
                    Arc::clone(&info),
                    path.index(index),
                    Ok(item),
                    record,
                    Arc::clone(&defer_map),
                )),
            }
            index += 1;
        }

        Ok(Value::Array(try_join_all(completed).await?))
    }

    /// Drains the rest of an item stream into stream items records, one
    /// record per item plus a final empty record once the stream ends.
    #[allow(clippy::too_many_arguments)]
    fn execute_stream_async_iterator(
        self: &Arc<Self>,
        initial_index: usize,
        stream: ItemStream,
        usage: &StreamUsage,
        info: &Arc<ResolverInfo>,
        item_type: &TypeRef,
        path: &Path,
        parent: RecordId,
    ) {
        let (abort, registration) = AbortHandle::new_pair();
        let stream_id = self.publisher.new_stream_record(
            path.clone(),
            usage.label.clone(),
            Some(stream.close_hook()),
            Some(abort),
        );

        // The first record exists before the initial result is built.
        let mut id = self
            .publisher
            .report_new_stream_items_record(stream_id, path.index(initial_index), parent);

        let ctx = Arc::clone(self);
        let group = Arc::clone(&usage.field_group);
        let info = Arc::clone(info);
        let item_type = item_type.clone();
        let path = path.clone();
        let driver = async move {
            let mut stream = stream;
            let mut index = initial_index;
            loop {
                let next = stream.next().await;
                if ctx.publisher.stream_has_errors(stream_id) {
                    ctx.publisher.retire_stream_items_record(id);
                    return;
                }
                match next {
                    None => {
                        ctx.publisher.set_is_completed_async_iterator(id);
                        ctx.publisher.complete_stream_items_record(id, Vec::new());
                        return;
                    }
                    Some(Err(error)) => {
                        let error = located_error(GraphQLError::from(error), &group, &path);
                        ctx.publisher.filter(&path, id);
                        ctx.publisher.mark_errored_stream_items_record(id, error);
                        return;
                    }
                    Some(Ok(item)) => {
                        let completion = ctx.complete_field_value(
                            item_type.clone(),
                            Arc::clone(&group),
                            Arc::clone(&info),
                            path.index(index),
                            Ok(item),
                            id,
                            DeferMap::default(),
                        );
                        ctx.publisher.spawn(finish_stream_item(
                            Arc::clone(&ctx.publisher),
                            path.clone(),
                            id,
                            completion,
                        ));
                    }
                }
                index += 1;
                id = ctx
                    .publisher
                    .report_new_stream_items_record(stream_id, path.index(index), id);
            }
        };
        self.publisher
            .spawn(Abortable::new(driver, registration).map(|_| ()));
    }

    /// Returns how a list field is streamed, or `None` if it is not.
    fn stream_usage(&self, group: &FieldGroup, path: &Path) -> Result<Option<Arc<StreamUsage>>, GraphQLError> {
        // Inner lists of a streamed list are never streamed.
        if path.ends_with_index() {
            return Ok(None);
        }
        let mut usages = self.stream_usages.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(usage) = usages.get(&group.id) {
            return Ok(usage.clone());
        }
        if !self.config.incremental_delivery {
            usages.insert(group.id, None);
            return Ok(None);
        }

        let Some(stream) = stream_directive(&self.schema, &group.first().directives, &self.variables)? else {
            usages.insert(group.id, None);
            return Ok(None);
        };
        let initial_count = usize::try_from(stream.initial_count)
            .map_err(|_| GraphQLError::new("initialCount must be a positive integer"))?;
        if self.operation.operation == OperationType::Subscription {
            return Err(GraphQLError::new(
                "`@stream` directive not supported on subscription operations. Disable `@stream` by setting the `if` argument to `false`.",
            ));
        }

        let fields = group
            .fields
            .iter()
            .map(|details| FieldDetails {
                node: Arc::clone(&details.node),
                target: Target::Initial,
            })
            .collect();
        let usage = Arc::new(StreamUsage {
            initial_count,
            label: stream.label,
            field_group: self.collector.new_field_group(fields, TargetSet::initial()),
        });
        usages.insert(group.id, Some(Arc::clone(&usage)));
        Ok(Some(usage))
    }

    /// Picks the object type of a value of an interface or union type.
    fn resolve_runtime_type(
        &self,
        abstract_type: &str,
        value: &Value,
        group: &FieldGroup,
        info: &ResolverInfo,
    ) -> Result<String, GraphQLError> {
        let runtime_type = match self.resolvers.type_resolver(abstract_type) {
            Some(resolve) => resolve(value, &self.context, info),
            None => self.default_type_resolver(abstract_type, value),
        };
        let located = |message: String| {
            GraphQLError::new(message).with_locations(group.nodes().map(|node| node.location))
        };

        let Some(runtime_type) = runtime_type else {
            return Err(located(format!(
                "Abstract type \"{abstract_type}\" must resolve to an Object type at runtime for field \"{}.{}\". Either the \"{abstract_type}\" type should provide a \"resolveType\" function or each possible type should provide an \"isTypeOf\" function.",
                info.parent_type, info.field_name
            )));
        };
        match self.schema.type_kind(&runtime_type) {
            None => Err(located(format!(
                "Abstract type \"{abstract_type}\" was resolved to a type \"{runtime_type}\" that does not exist inside the schema."
            ))),
            Some(TypeKind::Object) if self.schema.is_sub_type(abstract_type, &runtime_type) => {
                Ok(runtime_type)
            }
            Some(TypeKind::Object) => Err(located(format!(
                "Runtime Object type \"{runtime_type}\" is not a possible type for \"{abstract_type}\"."
            ))),
            Some(_) => Err(located(format!(
                "Abstract type \"{abstract_type}\" was resolved to a non-object type \"{runtime_type}\"."
            ))),
        }
    }

    /// Uses `__typename` of the value, then the first possible type whose
    /// `isTypeOf` accepts it.
    fn default_type_resolver(&self, abstract_type: &str, value: &Value) -> Option<String> {
        if let Some(name) = value.get("__typename").and_then(Value::as_str) {
            return Some(name.to_string());
        }
        self.schema
            .possible_types(abstract_type)
            .iter()
            .find(|name| {
                self.resolvers
                    .is_type_of(name)
                    .is_some_and(|is_type_of| is_type_of(value, &self.context))
            })
            .cloned()
    }

    async fn complete_object_value(
        self: &Arc<Self>,
        type_name: String,
        group: Arc<FieldGroup>,
        path: Path,
        value: Value,
        record: RecordId,
        defer_map: DeferMap,
    ) -> ExecResult {
        if let Some(is_type_of) = self.resolvers.is_type_of(&type_name) {
            if !is_type_of(&value, &self.context) {
                return Err(GraphQLError::new(format!(
                    "Expected value of type \"{type_name}\" but got: {value}."
                ))
                .with_locations(group.nodes().map(|node| node.location)));
            }
        }

        let collected: Arc<CollectFieldsResult> = self.collector.collect_subfields(&type_name, &group)?;
        let defer_map = self.add_new_deferred_fragments(&collected.new_defer_usages, record, &defer_map, &path);
        let deferred =
            self.add_new_deferred_grouped_field_sets(&collected.new_grouped_field_set_details, &defer_map, &path);

        let source = Arc::new(value);
        let data = self.execute_fields(
            &type_name,
            &source,
            &path,
            &collected.grouped_field_set,
            record,
            &defer_map,
        );
        self.execute_deferred_grouped_field_sets(&type_name, source, &path, deferred, defer_map);
        data.await
    }

    /// Creates a deferred fragment record for every new defer usage. A
    /// fragment nested in another deferred fragment becomes its child.
    fn add_new_deferred_fragments(
        &self,
        defer_usages: &[Arc<DeferUsage>],
        record: RecordId,
        defer_map: &DeferMap,
        path: &Path,
    ) -> DeferMap {
        if defer_usages.is_empty() {
            return Arc::clone(defer_map);
        }
        let mut map = defer_map.as_ref().clone();
        for usage in defer_usages {
            let parent = match usage.ancestors.first() {
                Some(Target::Deferred(ancestor)) => map.get(&ancestor.id).copied().unwrap_or(record),
                _ => record,
            };
            let id = self
                .publisher
                .report_new_defer_fragment_record(path.clone(), usage.label.clone(), parent);
            map.insert(usage.id, id);
        }
        Arc::new(map)
    }

    fn add_new_deferred_grouped_field_sets(
        &self,
        details: &IndexMap<TargetSet, GroupedFieldSetDetails>,
        defer_map: &DeferMap,
        path: &Path,
    ) -> Vec<DeferredGroupedFieldSet> {
        details
            .iter()
            .map(|(targets, details)| {
                let fragments = targets
                    .defer_usages()
                    .filter_map(|usage| defer_map.get(&usage.id).copied())
                    .collect();
                DeferredGroupedFieldSet {
                    id: self
                        .publisher
                        .report_new_deferred_grouped_field_set_record(path.clone(), fragments),
                    grouped_field_set: details.grouped_field_set.clone(),
                    should_initiate_defer: details.should_initiate_defer,
                }
            })
            .collect()
    }

    fn execute_deferred_grouped_field_sets(
        self: &Arc<Self>,
        parent_type: &str,
        source: Arc<Value>,
        path: &Path,
        deferred: Vec<DeferredGroupedFieldSet>,
        defer_map: DeferMap,
    ) {
        for DeferredGroupedFieldSet {
            id,
            grouped_field_set,
            should_initiate_defer,
        } in deferred
        {
            trace!(
                record = id.0,
                path = %path,
                should_initiate_defer,
                "queueing deferred grouped field set"
            );
            // Sets that open a new defer start once the enclosing result was built.
            let data = if should_initiate_defer {
                let ctx = Arc::clone(self);
                let parent_type = parent_type.to_string();
                let source = Arc::clone(&source);
                let path = path.clone();
                let defer_map = Arc::clone(&defer_map);
                async move {
                    ctx.execute_fields(&parent_type, &source, &path, &grouped_field_set, id, &defer_map)
                        .await
                }
                .boxed()
            } else {
                self.execute_fields(parent_type, &source, path, &grouped_field_set, id, &defer_map)
            };
            let publisher = Arc::clone(&self.publisher);
            let path = path.clone();
            self.publisher.spawn(async move {
                match data.await {
                    Ok(data) => publisher.complete_deferred_grouped_field_set(id, data),
                    Err(error) => {
                        publisher.filter(&path, id);
                        publisher.mark_errored_deferred_grouped_field_set(id, error);
                    }
                }
            });
        }
    }
}

/// Hands the completed value of a streamed item to its record. An error
/// that reached the item itself fails the whole stream.
async fn finish_stream_item(
    publisher: Arc<Publisher>,
    list_path: Path,
    id: RecordId,
    completion: BoxFuture<'static, ExecResult>,
) {
    match completion.await {
        Ok(value) => publisher.complete_stream_items_record(id, vec![value]),
        Err(error) => {
            publisher.filter(&list_path, id);
            publisher.mark_errored_stream_items_record(id, error);
        }
    }
}

/// Attaches the field locations and `path` to errors that have no path yet.
fn located_error(error: GraphQLError, group: &FieldGroup, path: &Path) -> GraphQLError {
    if error.is_located() {
        return error;
    }
    let error = if error.locations.is_empty() {
        error.with_locations(group.nodes().map(|node| node.location))
    } else {
        error
    };
    error.with_path(path.clone())
}

/// Unwraps a single value for leaf and composite completion.
fn ready_value(result: FieldValue, type_name: &str) -> Result<Value, GraphQLError> {
    match result {
        FieldValue::Value(value) => Ok(value),
        FieldValue::List(_) | FieldValue::Stream(_) => Err(GraphQLError::new(format!(
            "Expected a single value of type \"{type_name}\" but got a list."
        ))),
        FieldValue::Future(_) => Err(GraphQLError::new(format!(
            "Expected a resolved value of type \"{type_name}\"."
        ))),
    }
}
