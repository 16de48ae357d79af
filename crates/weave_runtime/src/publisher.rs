//! Incremental publisher.
//!
//! Records are *introduced* (pending) when their parent is delivered and
//! *released* once their data is ready. Each subsequent payload takes the
//! released set, delivers it, and publishes the children of every delivered
//! record; children that are already complete land in the next payload.
//!
//! Deferred and streamed work is queued on the publisher as `'static`
//! futures and driven by whoever polls the execution: first the initial
//! result, then the [`IncrementalStream`].

use crate::records::{
    DeferredFragmentRecord, DeferredGroupedFieldSetRecord, InitialResultRecord, Record,
    RecordId, StreamId, StreamItemsRecord, StreamRecord,
};
use crate::resolver::CloseHook;
use crate::response::{
    CompletedResult, ExecutionResult, IncrementalDeferResult, IncrementalResult,
    IncrementalStreamResult, InitialIncrementalResult, Response, SubsequentIncrementalResult,
};
use futures::future::{AbortHandle, BoxFuture};
use futures::stream::FuturesUnordered;
use futures::{Future, FutureExt, Stream, StreamExt};
use indexmap::IndexSet;
use rustc_hash::FxHashSet;
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tracing::{trace, warn};
use weave_core::{GraphQLError, Path};

pub(crate) type Work = BoxFuture<'static, ()>;

struct PublisherState {
    records: Vec<Record>,
    streams: Vec<StreamRecord>,
    pending: IndexSet<RecordId>,
    released: IndexSet<RecordId>,
    inbox: Vec<Work>,
    closed: bool,
}

/// Coordinates the incremental records of one execution.
pub struct Publisher {
    state: Mutex<PublisherState>,
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("Publisher")
            .field("records", &state.records.len())
            .field("pending", &state.pending.len())
            .field("released", &state.released.len())
            .finish()
    }
}

impl Publisher {
    /// Creates a publisher holding only the initial result record.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PublisherState {
                records: vec![Record::Initial(InitialResultRecord::default())],
                streams: Vec::new(),
                pending: IndexSet::new(),
                released: IndexSet::new(),
                inbox: Vec::new(),
                closed: false,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, PublisherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues deferred work. Work queued after the response was closed is
    /// dropped.
    pub fn spawn<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut state = self.state();
        if !state.closed {
            state.inbox.push(work.boxed());
        }
    }

    pub(crate) fn take_inbox(&self) -> Vec<Work> {
        std::mem::take(&mut self.state().inbox)
    }

    // =========================================================================
    // Record creation
    // =========================================================================

    pub fn report_new_defer_fragment_record(
        &self,
        path: Path,
        label: Option<String>,
        parent: RecordId,
    ) -> RecordId {
        let mut state = self.state();
        let id = state.push_record(Record::DeferredFragment(DeferredFragmentRecord {
            path,
            label,
            children: IndexSet::new(),
            grouped_field_sets: IndexSet::new(),
            errors: Vec::new(),
            filtered: false,
            pending: FxHashSet::default(),
        }));
        state.add_child(parent, id);
        id
    }

    pub fn report_new_deferred_grouped_field_set_record(
        &self,
        path: Path,
        fragments: Vec<RecordId>,
    ) -> RecordId {
        let mut state = self.state();
        let id = state.push_record(Record::DeferredGroupedFieldSet(DeferredGroupedFieldSetRecord {
            path,
            fragments: fragments.clone(),
            errors: Vec::new(),
            data: None,
            sent: false,
        }));
        for fragment in fragments {
            if let Record::DeferredFragment(record) = &mut state.records[fragment.0] {
                record.pending.insert(id);
                record.grouped_field_sets.insert(id);
            }
        }
        id
    }

    pub fn new_stream_record(
        &self,
        path: Path,
        label: Option<String>,
        close: Option<CloseHook>,
        abort: Option<AbortHandle>,
    ) -> StreamId {
        let mut state = self.state();
        let id = StreamId(state.streams.len());
        state.streams.push(StreamRecord {
            path,
            label,
            errors: Vec::new(),
            close,
            abort,
        });
        id
    }

    pub fn report_new_stream_items_record(
        &self,
        stream: StreamId,
        path: Path,
        parent: RecordId,
    ) -> RecordId {
        let mut state = self.state();
        let id = state.push_record(Record::StreamItems(StreamItemsRecord {
            stream,
            path,
            items: Vec::new(),
            errors: Vec::new(),
            children: IndexSet::new(),
            is_completed: false,
            is_final_record: false,
            is_completed_async_iterator: false,
            filtered: false,
        }));
        state.add_child(parent, id);
        id
    }

    // =========================================================================
    // Record completion
    // =========================================================================

    pub fn complete_deferred_grouped_field_set(&self, id: RecordId, data: Value) {
        let mut state = self.state();
        let fragments = match &mut state.records[id.0] {
            Record::DeferredGroupedFieldSet(record) => {
                record.data = Some(data);
                record.fragments.clone()
            }
            _ => return,
        };
        for fragment in fragments {
            let done = match &mut state.records[fragment.0] {
                Record::DeferredFragment(record) => {
                    record.pending.remove(&id);
                    record.pending.is_empty()
                }
                _ => false,
            };
            if done {
                state.release(fragment);
            }
        }
    }

    pub fn mark_errored_deferred_grouped_field_set(&self, id: RecordId, error: GraphQLError) {
        let mut state = self.state();
        let fragments = match &state.records[id.0] {
            Record::DeferredGroupedFieldSet(record) => record.fragments.clone(),
            _ => return,
        };
        for fragment in fragments {
            if let Record::DeferredFragment(record) = &mut state.records[fragment.0] {
                record.pending.remove(&id);
                record.errors.push(error.clone());
            }
            state.release(fragment);
        }
    }

    pub fn complete_stream_items_record(&self, id: RecordId, items: Vec<Value>) {
        let mut state = self.state();
        if let Record::StreamItems(record) = &mut state.records[id.0] {
            record.items = items;
            record.is_completed = true;
        }
        state.release(id);
    }

    /// Fails the whole stream at this item: the error is reported once on
    /// the stream's `completed` entry and the source is closed.
    pub fn mark_errored_stream_items_record(&self, id: RecordId, error: GraphQLError) {
        let mut state = self.state();
        let Record::StreamItems(record) = &mut state.records[id.0] else {
            return;
        };
        record.is_final_record = true;
        record.is_completed = true;
        let stream = record.stream;
        state.streams[stream.0].errors.push(error);
        let close = state.streams[stream.0].close();
        state.release(id);
        drop(state);
        close();
    }

    /// Marks the last record of a stream; its release completes the stream.
    pub fn set_is_final_record(&self, id: RecordId) {
        if let Record::StreamItems(record) = &mut self.state().records[id.0] {
            record.is_final_record = true;
        }
    }

    /// Marks the record created for an exhausted item stream. It carries no
    /// items and only completes the stream.
    pub fn set_is_completed_async_iterator(&self, id: RecordId) {
        if let Record::StreamItems(record) = &mut self.state().records[id.0] {
            record.is_completed_async_iterator = true;
            record.is_final_record = true;
        }
    }

    /// Completes a record that turned out to be unnecessary because its
    /// stream already failed. Nothing is delivered for it.
    pub fn retire_stream_items_record(&self, id: RecordId) {
        let mut state = self.state();
        if let Record::StreamItems(record) = &mut state.records[id.0] {
            record.is_completed_async_iterator = true;
            record.is_completed = true;
        }
        state.release(id);
    }

    pub fn stream_has_errors(&self, stream: StreamId) -> bool {
        !self.state().streams[stream.0].errors.is_empty()
    }

    pub fn add_field_error(&self, id: RecordId, error: GraphQLError) {
        self.state().records[id.0].errors_mut().push(error);
    }

    /// Drops every incremental record below `null_path` that descends from
    /// `erroring`, and closes the streams feeding them.
    pub fn filter(&self, null_path: &Path, erroring: RecordId) {
        let mut state = self.state();
        let children = state.children_of(erroring);
        let descendants = state.descendants(children);

        let mut streams = IndexSet::new();
        for id in descendants {
            if !state.is_under(id, null_path) {
                continue;
            }
            trace!(record = id.0, path = %null_path, "filtered incremental record");
            state.records[id.0].set_filtered();
            if let Record::StreamItems(record) = &state.records[id.0] {
                streams.insert(record.stream);
            }
        }

        let closers: Vec<_> = streams
            .into_iter()
            .map(|stream| state.streams[stream.0].close())
            .collect();
        drop(state);
        closers.into_iter().for_each(|close| close());
    }

    // =========================================================================
    // Responses
    // =========================================================================

    /// Publishes the children of the initial result and builds the first
    /// response. Without pending records the response is a single result and
    /// leftover work is dropped.
    pub fn build_data_response(self: &Arc<Self>, data: Value, work: FuturesUnordered<Work>) -> ExecutionResult {
        let mut state = self.state();
        let children = state.unfiltered_children(RecordId::INITIAL);
        for child in children {
            state.publish(child);
        }
        let errors = std::mem::take(state.records[RecordId::INITIAL.0].errors_mut());

        if state.pending.is_empty() {
            state.closed = true;
            let inbox = std::mem::take(&mut state.inbox);
            drop(state);
            drop(inbox);
            drop(work);
            return ExecutionResult::Single(Response {
                data: Some(data),
                errors,
            });
        }
        drop(state);

        ExecutionResult::Incremental {
            initial: InitialIncrementalResult {
                data,
                errors,
                has_next: true,
            },
            subsequent: IncrementalStream {
                publisher: Arc::clone(self),
                work,
                done: false,
            },
        }
    }

    /// Builds the response of an execution whose data was nulled entirely.
    pub fn build_error_response(&self, error: GraphQLError) -> ExecutionResult {
        let mut state = self.state();
        let mut errors = std::mem::take(state.records[RecordId::INITIAL.0].errors_mut());
        errors.push(error);
        state.closed = true;
        let inbox = std::mem::take(&mut state.inbox);
        drop(state);
        drop(inbox);
        ExecutionResult::Single(Response {
            data: Some(Value::Null),
            errors,
        })
    }

    /// Stops all open streams and discards queued work.
    pub fn close(&self) {
        let mut state = self.state();
        state.closed = true;
        let inbox = std::mem::take(&mut state.inbox);
        let closers: Vec<_> = state.streams.iter().map(StreamRecord::close).collect();
        drop(state);
        closers.into_iter().for_each(|close| close());
        drop(inbox);
    }

    fn next_result(&self) -> Option<SubsequentIncrementalResult> {
        let mut state = self.state();
        if state.released.is_empty() {
            return None;
        }
        state.process_released()
    }

    fn has_pending(&self) -> bool {
        !self.state().pending.is_empty()
    }

    fn has_ready(&self) -> bool {
        let state = self.state();
        !state.released.is_empty() || !state.inbox.is_empty()
    }
}

impl PublisherState {
    fn push_record(&mut self, record: Record) -> RecordId {
        let id = RecordId(self.records.len());
        self.records.push(record);
        id
    }

    /// Attaches `child` to `parent`. Records created while executing a
    /// deferred grouped field set belong to each of its fragments.
    fn add_child(&mut self, parent: RecordId, child: RecordId) {
        let parents = match &self.records[parent.0] {
            Record::DeferredGroupedFieldSet(record) => record.fragments.clone(),
            _ => vec![parent],
        };
        for parent in parents {
            if let Some(children) = self.records[parent.0].children_mut() {
                children.insert(child);
            }
        }
    }

    fn children_of(&self, id: RecordId) -> Vec<RecordId> {
        match &self.records[id.0] {
            Record::DeferredGroupedFieldSet(record) => {
                let mut children = IndexSet::new();
                for fragment in &record.fragments {
                    if let Some(fragment_children) = self.records[fragment.0].children() {
                        children.extend(fragment_children.iter().copied());
                    }
                }
                children.into_iter().collect()
            }
            record => record
                .children()
                .map(|children| children.iter().copied().collect())
                .unwrap_or_default(),
        }
    }

    fn descendants(&self, roots: Vec<RecordId>) -> IndexSet<RecordId> {
        let mut descendants = IndexSet::new();
        let mut stack = roots;
        stack.reverse();
        while let Some(id) = stack.pop() {
            if !descendants.insert(id) {
                continue;
            }
            if let Some(children) = self.records[id.0].children() {
                stack.extend(children.iter().rev().copied());
            }
        }
        descendants
    }

    fn is_under(&self, id: RecordId, null_path: &Path) -> bool {
        match &self.records[id.0] {
            Record::StreamItems(record) => record.path.starts_with(null_path),
            Record::DeferredFragment(record) => {
                record.path.starts_with(null_path)
                    || record.grouped_field_sets.iter().any(|set| {
                        matches!(
                            &self.records[set.0],
                            Record::DeferredGroupedFieldSet(set) if set.path.starts_with(null_path)
                        )
                    })
            }
            Record::Initial(_) | Record::DeferredGroupedFieldSet(_) => false,
        }
    }

    fn unfiltered_children(&self, id: RecordId) -> Vec<RecordId> {
        self.records[id.0]
            .children()
            .into_iter()
            .flatten()
            .copied()
            .filter(|child| !self.records[child.0].is_filtered())
            .collect()
    }

    fn introduce(&mut self, id: RecordId) {
        trace!(record = id.0, "introduced incremental record");
        self.pending.insert(id);
    }

    fn release(&mut self, id: RecordId) {
        if self.pending.contains(&id) {
            trace!(record = id.0, "released incremental record");
            self.released.insert(id);
        }
    }

    fn push(&mut self, id: RecordId) {
        self.released.insert(id);
        self.pending.insert(id);
    }

    fn publish(&mut self, id: RecordId) {
        match &self.records[id.0] {
            Record::StreamItems(record) if record.is_completed => self.push(id),
            Record::StreamItems(_) => self.introduce(id),
            // Errored fragments complete without waiting for their other sets.
            Record::DeferredFragment(record)
                if record.pending.is_empty() || !record.errors.is_empty() =>
            {
                self.push(id)
            }
            Record::DeferredFragment(_) => self.introduce(id),
            Record::Initial(_) | Record::DeferredGroupedFieldSet(_) => {}
        }
    }

    fn process_released(&mut self) -> Option<SubsequentIncrementalResult> {
        let released = std::mem::take(&mut self.released);
        for id in &released {
            self.pending.shift_remove(id);
        }

        let mut incremental = Vec::new();
        let mut completed = Vec::new();

        for id in released {
            for child in self.unfiltered_children(id) {
                self.publish(child);
            }

            match &mut self.records[id.0] {
                Record::StreamItems(record) => {
                    let stream = &self.streams[record.stream.0];
                    if record.is_final_record {
                        completed.push(CompletedResult {
                            path: stream.path.clone(),
                            label: stream.label.clone(),
                            errors: stream.errors.clone(),
                        });
                    }
                    // Exhausted, retired and errored records carry no items.
                    if record.is_completed_async_iterator || record.items.is_empty() {
                        continue;
                    }
                    incremental.push(IncrementalResult::Stream(IncrementalStreamResult {
                        items: std::mem::take(&mut record.items),
                        path: record.path.clone(),
                        label: stream.label.clone(),
                        errors: std::mem::take(&mut record.errors),
                    }));
                }
                Record::DeferredFragment(record) => {
                    completed.push(CompletedResult {
                        path: record.path.clone(),
                        label: record.label.clone(),
                        errors: record.errors.clone(),
                    });
                    if !record.errors.is_empty() {
                        continue;
                    }
                    let label = record.label.clone();
                    let sets: Vec<RecordId> = record.grouped_field_sets.iter().copied().collect();
                    for set in sets {
                        if let Record::DeferredGroupedFieldSet(set) = &mut self.records[set.0] {
                            if set.sent {
                                continue;
                            }
                            set.sent = true;
                            incremental.push(IncrementalResult::Defer(IncrementalDeferResult {
                                data: set.data.take().unwrap_or(Value::Null),
                                path: set.path.clone(),
                                label: label.clone(),
                                errors: std::mem::take(&mut set.errors),
                            }));
                        }
                    }
                }
                Record::Initial(_) | Record::DeferredGroupedFieldSet(_) => {}
            }
        }

        let has_next = !self.pending.is_empty();
        if incremental.is_empty() && completed.is_empty() && has_next {
            return None;
        }
        Some(SubsequentIncrementalResult {
            incremental,
            completed,
            has_next,
        })
    }
}

/// The subsequent payloads of an incremental response.
///
/// Polling drives the deferred and streamed work of the execution. Dropping
/// the stream (or calling [`cancel`](Self::cancel)) closes every open item
/// stream exactly once.
#[must_use = "streams do nothing unless polled"]
pub struct IncrementalStream {
    publisher: Arc<Publisher>,
    work: FuturesUnordered<Work>,
    done: bool,
}

impl IncrementalStream {
    /// Stops delivery and closes every open item stream.
    pub fn cancel(&mut self) {
        if self.done {
            return;
        }
        self.finish();
        self.publisher.close();
    }

    /// Returns true once the last payload was delivered or the stream was
    /// cancelled.
    pub fn is_done(&self) -> bool {
        self.done
    }

    fn finish(&mut self) {
        self.done = true;
        // Work futures own the execution context, which owns the publisher.
        self.work = FuturesUnordered::new();
    }
}

impl Stream for IncrementalStream {
    type Item = SubsequentIncrementalResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            this.work.extend(this.publisher.take_inbox());

            if let Some(result) = this.publisher.next_result() {
                if !result.has_next {
                    this.finish();
                    this.publisher.close();
                }
                return Poll::Ready(Some(result));
            }

            if !this.publisher.has_pending() {
                this.finish();
                this.publisher.close();
                return Poll::Ready(None);
            }

            if this.work.is_empty() {
                if this.publisher.has_ready() {
                    continue;
                }
                warn!("incremental delivery stalled with pending records and no work left");
                this.finish();
                this.publisher.close();
                return Poll::Ready(None);
            }

            match this.work.poll_next_unpin(cx) {
                Poll::Ready(_) => continue,
                Poll::Pending => {
                    if this.publisher.has_ready() {
                        continue;
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}

impl Drop for IncrementalStream {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for IncrementalStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncrementalStream")
            .field("publisher", &self.publisher)
            .field("work", &self.work.len())
            .field("done", &self.done)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn subsequent(result: ExecutionResult) -> IncrementalStream {
        match result {
            ExecutionResult::Incremental { subsequent, .. } => subsequent,
            ExecutionResult::Single(response) => panic!("expected incremental result, got {response:?}"),
        }
    }

    #[test]
    fn test_single_result_without_children() {
        let publisher = Arc::new(Publisher::new());
        publisher.add_field_error(RecordId::INITIAL, GraphQLError::new("boom"));
        let result = publisher.build_data_response(json!({"a": null}), FuturesUnordered::new());
        let response = result.into_single().unwrap();
        assert_eq!(response.data, Some(json!({"a": null})));
        assert_eq!(response.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_deferred_fragment_waits_for_all_grouped_field_sets() {
        let publisher = Arc::new(Publisher::new());
        let fragment = publisher.report_new_defer_fragment_record(
            Path::root(),
            Some("later".to_string()),
            RecordId::INITIAL,
        );
        let first = publisher.report_new_deferred_grouped_field_set_record(Path::root(), vec![fragment]);
        let second = publisher.report_new_deferred_grouped_field_set_record(Path::root(), vec![fragment]);

        let p = Arc::clone(&publisher);
        publisher.spawn(async move {
            p.complete_deferred_grouped_field_set(first, json!({"a": 1}));
            tokio::task::yield_now().await;
            p.complete_deferred_grouped_field_set(second, json!({"b": 2}));
        });

        let result = publisher.build_data_response(json!({}), FuturesUnordered::new());
        let mut stream = subsequent(result);
        let payload = stream.next().await.unwrap();
        assert_eq!(
            serde_json::to_value(payload).unwrap(),
            json!({
                "incremental": [
                    {"data": {"a": 1}, "path": [], "label": "later"},
                    {"data": {"b": 2}, "path": [], "label": "later"}
                ],
                "completed": [{"path": [], "label": "later"}],
                "hasNext": false
            })
        );
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_filtered_records_are_never_published() {
        let publisher = Arc::new(Publisher::new());
        let stream = publisher.new_stream_record(Path::root().key("list"), None, None, None);
        let kept = publisher.report_new_defer_fragment_record(Path::root(), None, RecordId::INITIAL);
        let set = publisher.report_new_deferred_grouped_field_set_record(Path::root(), vec![kept]);
        let items = publisher.report_new_stream_items_record(
            stream,
            Path::root().key("list").index(0),
            RecordId::INITIAL,
        );
        publisher.filter(&Path::root().key("list"), RecordId::INITIAL);
        publisher.complete_stream_items_record(items, vec![json!(1)]);
        publisher.complete_deferred_grouped_field_set(set, json!({"a": 1}));

        let mut stream = subsequent(publisher.build_data_response(json!({}), FuturesUnordered::new()));
        let payload = stream.next().await.unwrap();
        assert_eq!(
            serde_json::to_value(payload).unwrap(),
            json!({
                "incremental": [{"data": {"a": 1}, "path": []}],
                "completed": [{"path": []}],
                "hasNext": false
            })
        );
    }

    #[tokio::test]
    async fn test_errored_set_completes_fragment_introduced_later() {
        let publisher = Arc::new(Publisher::new());
        let outer = publisher.report_new_defer_fragment_record(
            Path::root(),
            Some("outer".to_string()),
            RecordId::INITIAL,
        );
        let outer_set = publisher.report_new_deferred_grouped_field_set_record(Path::root(), vec![outer]);
        let inner = publisher.report_new_defer_fragment_record(
            Path::root().key("hero"),
            Some("inner".to_string()),
            outer,
        );
        let inner_set =
            publisher.report_new_deferred_grouped_field_set_record(Path::root().key("hero"), vec![inner]);

        // The nested set fails while its fragment is not introduced yet.
        publisher.mark_errored_deferred_grouped_field_set(inner_set, GraphQLError::new("boom"));
        publisher.complete_deferred_grouped_field_set(outer_set, json!({"a": 1}));

        let stream = subsequent(publisher.build_data_response(json!({}), FuturesUnordered::new()));
        let payloads: Vec<_> = stream
            .map(|payload| serde_json::to_value(payload).unwrap())
            .collect()
            .await;
        assert_eq!(
            payloads,
            vec![
                json!({
                    "incremental": [{"data": {"a": 1}, "path": [], "label": "outer"}],
                    "completed": [{"path": [], "label": "outer"}],
                    "hasNext": true
                }),
                json!({
                    "completed": [{"path": ["hero"], "label": "inner", "errors": [{"message": "boom"}]}],
                    "hasNext": false
                }),
            ]
        );
    }

    #[test]
    fn test_filter_drops_fragment_without_grouped_field_sets() {
        let publisher = Arc::new(Publisher::new());
        publisher.report_new_defer_fragment_record(Path::root().key("hero"), None, RecordId::INITIAL);
        publisher.filter(&Path::root().key("hero"), RecordId::INITIAL);

        let result = publisher.build_data_response(json!({"hero": null}), FuturesUnordered::new());
        assert_eq!(result.into_single().unwrap().data, Some(json!({"hero": null})));
    }

    #[tokio::test]
    async fn test_cancel_closes_open_streams_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let closed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closed);
        let hook = CloseHook::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let publisher = Arc::new(Publisher::new());
        let stream = publisher.new_stream_record(Path::root().key("list"), None, Some(hook), None);
        publisher.report_new_stream_items_record(
            stream,
            Path::root().key("list").index(0),
            RecordId::INITIAL,
        );
        publisher.spawn(futures::future::pending());

        let mut subsequent = subsequent(publisher.build_data_response(json!({}), FuturesUnordered::new()));
        subsequent.cancel();
        subsequent.cancel();
        drop(subsequent);
        publisher.close();

        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
