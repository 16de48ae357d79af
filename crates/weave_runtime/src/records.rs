//! Incremental delivery records.
//!
//! Records form a tree rooted at the initial result: deferred fragments and
//! stream items may only be delivered after their parent was. They live in
//! an arena owned by the [`Publisher`](crate::publisher::Publisher) and are
//! addressed by [`RecordId`].

use crate::resolver::CloseHook;
use futures::future::AbortHandle;
use indexmap::IndexSet;
use rustc_hash::FxHashSet;
use serde_json::Value;
use weave_core::{GraphQLError, Path};

/// Handle of a record in the publisher arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub(crate) usize);

impl RecordId {
    /// The initial result.
    pub const INITIAL: RecordId = RecordId(0);
}

/// Handle of a streamed list occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(pub(crate) usize);

#[derive(Debug, Default)]
pub(crate) struct InitialResultRecord {
    pub errors: Vec<GraphQLError>,
    pub children: IndexSet<RecordId>,
}

/// One `@defer` usage at one response path.
#[derive(Debug)]
pub(crate) struct DeferredFragmentRecord {
    pub path: Path,
    pub label: Option<String>,
    pub children: IndexSet<RecordId>,
    pub grouped_field_sets: IndexSet<RecordId>,
    pub errors: Vec<GraphQLError>,
    pub filtered: bool,
    /// Grouped field sets not completed yet.
    pub pending: FxHashSet<RecordId>,
}

/// Fields executed together for one set of deferred fragments.
#[derive(Debug)]
pub(crate) struct DeferredGroupedFieldSetRecord {
    pub path: Path,
    pub fragments: Vec<RecordId>,
    pub errors: Vec<GraphQLError>,
    pub data: Option<Value>,
    pub sent: bool,
}

/// One streamed item, or the end marker of an item stream.
#[derive(Debug)]
pub(crate) struct StreamItemsRecord {
    pub stream: StreamId,
    pub path: Path,
    pub items: Vec<Value>,
    pub errors: Vec<GraphQLError>,
    pub children: IndexSet<RecordId>,
    pub is_completed: bool,
    pub is_final_record: bool,
    pub is_completed_async_iterator: bool,
    pub filtered: bool,
}

#[derive(Debug)]
pub(crate) enum Record {
    Initial(InitialResultRecord),
    DeferredFragment(DeferredFragmentRecord),
    DeferredGroupedFieldSet(DeferredGroupedFieldSetRecord),
    StreamItems(StreamItemsRecord),
}

impl Record {
    pub fn children(&self) -> Option<&IndexSet<RecordId>> {
        match self {
            Self::Initial(record) => Some(&record.children),
            Self::DeferredFragment(record) => Some(&record.children),
            Self::StreamItems(record) => Some(&record.children),
            Self::DeferredGroupedFieldSet(_) => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut IndexSet<RecordId>> {
        match self {
            Self::Initial(record) => Some(&mut record.children),
            Self::DeferredFragment(record) => Some(&mut record.children),
            Self::StreamItems(record) => Some(&mut record.children),
            Self::DeferredGroupedFieldSet(_) => None,
        }
    }

    pub fn errors_mut(&mut self) -> &mut Vec<GraphQLError> {
        match self {
            Self::Initial(record) => &mut record.errors,
            Self::DeferredFragment(record) => &mut record.errors,
            Self::DeferredGroupedFieldSet(record) => &mut record.errors,
            Self::StreamItems(record) => &mut record.errors,
        }
    }

    pub fn is_filtered(&self) -> bool {
        match self {
            Self::DeferredFragment(record) => record.filtered,
            Self::StreamItems(record) => record.filtered,
            Self::Initial(_) | Self::DeferredGroupedFieldSet(_) => false,
        }
    }

    pub fn set_filtered(&mut self) {
        match self {
            Self::DeferredFragment(record) => record.filtered = true,
            Self::StreamItems(record) => record.filtered = true,
            Self::Initial(_) | Self::DeferredGroupedFieldSet(_) => {}
        }
    }
}

/// One streamed list occurrence.
#[derive(Debug)]
pub(crate) struct StreamRecord {
    pub path: Path,
    pub label: Option<String>,
    pub errors: Vec<GraphQLError>,
    pub close: Option<CloseHook>,
    pub abort: Option<AbortHandle>,
}

impl StreamRecord {
    /// Closes the source iterator and stops the task draining it.
    pub fn close(&self) -> impl FnOnce() + Send {
        let close = self.close.clone();
        let abort = self.abort.clone();
        move || {
            if let Some(hook) = close {
                hook.fire();
            }
            if let Some(handle) = abort {
                handle.abort();
            }
        }
    }
}
