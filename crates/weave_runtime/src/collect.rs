//! Field collection.
//!
//! Every collected field remembers the delivery target it was selected
//! under: the initial result, or the `@defer` fragment that wraps it. Fields
//! whose targets are all covered by their enclosing target stay in the
//! parent grouped field set; the rest are split into new grouped field sets,
//! one per set of masking targets, so a field shared by several deferred
//! fragments is executed once.

use crate::directives::{defer_directive, should_include_node};
use crate::schema::Schema;
use crate::values::Variables;
use indexmap::{IndexMap, IndexSet};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use weave_core::GraphQLError;
use weave_syntax::{Document, Field, Name, OperationType, Selection, SelectionSet};

/// One `@defer` application found while collecting fields.
#[derive(Debug)]
pub struct DeferUsage {
    pub id: usize,
    pub label: Option<String>,
    /// Enclosing targets, nearest first, ending at the initial result.
    pub ancestors: Vec<Target>,
}

/// Where a collected field is delivered.
#[derive(Debug, Clone)]
pub enum Target {
    Initial,
    Deferred(Arc<DeferUsage>),
}

impl Target {
    pub fn id(&self) -> usize {
        match self {
            Self::Initial => 0,
            Self::Deferred(usage) => usage.id,
        }
    }

    pub fn defer_usage(&self) -> Option<&Arc<DeferUsage>> {
        match self {
            Self::Initial => None,
            Self::Deferred(usage) => Some(usage),
        }
    }

    fn ancestors(&self) -> &[Target] {
        match self {
            Self::Initial => &[],
            Self::Deferred(usage) => &usage.ancestors,
        }
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Target {}

impl Hash for Target {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl PartialOrd for Target {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Target {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id().cmp(&other.id())
    }
}

/// A set of targets with a canonical order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetSet(Vec<Target>);

impl TargetSet {
    /// The set holding only the initial result.
    pub fn initial() -> Self {
        Self(vec![Target::Initial])
    }

    pub fn contains(&self, target: &Target) -> bool {
        self.0.binary_search(target).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.0.iter()
    }

    /// The defer usages in this set.
    pub fn defer_usages(&self) -> impl Iterator<Item = &Arc<DeferUsage>> {
        self.0.iter().filter_map(Target::defer_usage)
    }
}

impl FromIterator<Target> for TargetSet {
    fn from_iter<I: IntoIterator<Item = Target>>(iter: I) -> Self {
        let mut targets: Vec<Target> = iter.into_iter().collect();
        targets.sort();
        targets.dedup();
        Self(targets)
    }
}

/// A field node together with the target it was collected for.
#[derive(Debug, Clone)]
pub struct FieldDetails {
    pub node: Arc<Field>,
    pub target: Target,
}

/// All field nodes sharing one response key.
#[derive(Debug)]
pub struct FieldGroup {
    pub id: usize,
    pub fields: Vec<FieldDetails>,
    /// The masking targets the group is delivered with.
    pub targets: TargetSet,
}

impl FieldGroup {
    /// The first field node, which decides name and arguments.
    pub fn first(&self) -> &Field {
        &self.fields[0].node
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Arc<Field>> {
        self.fields.iter().map(|details| &details.node)
    }
}

/// Field groups by response key, in selection order.
pub type GroupedFieldSet = IndexMap<String, Arc<FieldGroup>>;

/// A grouped field set split off its parent.
#[derive(Debug)]
pub struct GroupedFieldSetDetails {
    pub grouped_field_set: GroupedFieldSet,
    /// True when the set introduces a defer its parent did not have.
    pub should_initiate_defer: bool,
}

#[derive(Debug, Default)]
pub struct CollectFieldsResult {
    pub grouped_field_set: GroupedFieldSet,
    pub new_grouped_field_set_details: IndexMap<TargetSet, GroupedFieldSetDetails>,
    pub new_defer_usages: Vec<Arc<DeferUsage>>,
}

#[derive(Default)]
struct CollectState {
    targets_by_key: IndexMap<String, IndexSet<Target>>,
    fields_by_target: IndexMap<Target, IndexMap<String, Vec<Arc<Field>>>>,
    new_defer_usages: Vec<Arc<DeferUsage>>,
    visited_fragment_names: FxHashSet<String>,
}

struct TargetSetDetails {
    keys: IndexSet<String>,
    should_initiate_defer: bool,
}

/// Collects fields of one operation.
#[derive(Debug)]
pub struct Collector {
    schema: Arc<Schema>,
    document: Arc<Document>,
    variables: Arc<Variables>,
    operation: OperationType,
    incremental: bool,
    next_defer_id: AtomicUsize,
    next_group_id: AtomicUsize,
    subfields: Mutex<FxHashMap<(String, usize), Arc<CollectFieldsResult>>>,
}

impl Collector {
    pub fn new(
        schema: Arc<Schema>,
        document: Arc<Document>,
        variables: Arc<Variables>,
        operation: OperationType,
        incremental: bool,
    ) -> Self {
        Self {
            schema,
            document,
            variables,
            operation,
            incremental,
            next_defer_id: AtomicUsize::new(1),
            next_group_id: AtomicUsize::new(0),
            subfields: Mutex::new(FxHashMap::default()),
        }
    }

    /// Collects the root selection set of an operation.
    pub fn collect_fields(
        &self,
        runtime_type: &str,
        selection_set: &SelectionSet,
    ) -> Result<CollectFieldsResult, GraphQLError> {
        let mut state = CollectState::default();
        self.collect_fields_impl(runtime_type, selection_set, &Target::Initial, None, &mut state)?;
        Ok(self.build_grouped_field_sets(state, &TargetSet::initial()))
    }

    /// Collects the sub-selections of every node in `field_group`.
    ///
    /// Results are memoized per runtime type and field group, so list items
    /// of the same type share one collection.
    pub fn collect_subfields(
        &self,
        return_type: &str,
        field_group: &FieldGroup,
    ) -> Result<Arc<CollectFieldsResult>, GraphQLError> {
        let memo_key = (return_type.to_string(), field_group.id);
        if let Some(cached) = self.cached(&memo_key) {
            return Ok(cached);
        }

        let mut state = CollectState::default();
        for details in &field_group.fields {
            if let Some(selection_set) = &details.node.selection_set {
                self.collect_fields_impl(
                    return_type,
                    selection_set,
                    &details.target,
                    None,
                    &mut state,
                )?;
            }
        }
        let result = Arc::new(self.build_grouped_field_sets(state, &field_group.targets));

        if let Ok(mut memo) = self.subfields.lock() {
            memo.insert(memo_key, Arc::clone(&result));
        }
        Ok(result)
    }

    /// Wraps one field group into a new group with its own identity, e.g. for
    /// streamed list items which are all delivered with the initial target.
    pub fn new_field_group(&self, fields: Vec<FieldDetails>, targets: TargetSet) -> Arc<FieldGroup> {
        Arc::new(FieldGroup {
            id: self.next_group_id.fetch_add(1, AtomicOrdering::Relaxed),
            fields,
            targets,
        })
    }

    fn cached(&self, key: &(String, usize)) -> Option<Arc<CollectFieldsResult>> {
        self.subfields.lock().ok()?.get(key).cloned()
    }

    fn collect_fields_impl(
        &self,
        runtime_type: &str,
        selection_set: &SelectionSet,
        parent_target: &Target,
        new_target: Option<&Target>,
        state: &mut CollectState,
    ) -> Result<(), GraphQLError> {
        for selection in &selection_set.selections {
            match selection {
                Selection::Field(field) => {
                    if !should_include_node(&self.schema, &field.directives, &self.variables)? {
                        continue;
                    }
                    let key = field.response_key().to_string();
                    let target = new_target.unwrap_or(parent_target).clone();
                    state
                        .targets_by_key
                        .entry(key.clone())
                        .or_default()
                        .insert(target.clone());
                    state
                        .fields_by_target
                        .entry(target)
                        .or_default()
                        .entry(key)
                        .or_default()
                        .push(Arc::clone(field));
                }
                Selection::InlineFragment(fragment) => {
                    if !should_include_node(&self.schema, &fragment.directives, &self.variables)?
                        || !self.does_fragment_condition_match(
                            fragment.type_condition.as_ref(),
                            runtime_type,
                        )
                    {
                        continue;
                    }
                    let defer = self.defer_values(&fragment.directives)?;
                    let target = defer.map(|label| {
                        self.new_defer_usage(label, parent_target, new_target, state)
                    });
                    self.collect_fields_impl(
                        runtime_type,
                        &fragment.selection_set,
                        parent_target,
                        target.as_ref().or(new_target),
                        state,
                    )?;
                }
                Selection::FragmentSpread(spread) => {
                    let name = spread.name.as_str();
                    if !should_include_node(&self.schema, &spread.directives, &self.variables)? {
                        continue;
                    }
                    let defer = self.defer_values(&spread.directives)?;
                    if defer.is_none() && state.visited_fragment_names.contains(name) {
                        continue;
                    }
                    let Some(fragment) = self.document.fragment(name) else {
                        continue;
                    };
                    if !self
                        .does_fragment_condition_match(Some(&fragment.type_condition), runtime_type)
                    {
                        continue;
                    }
                    let target = match defer {
                        Some(label) => {
                            Some(self.new_defer_usage(label, parent_target, new_target, state))
                        }
                        None => {
                            state.visited_fragment_names.insert(name.to_string());
                            None
                        }
                    };
                    self.collect_fields_impl(
                        runtime_type,
                        &fragment.selection_set,
                        parent_target,
                        target.as_ref().or(new_target),
                        state,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Returns `Some(label)` when the fragment is deferred.
    fn defer_values(
        &self,
        directives: &[weave_syntax::Directive],
    ) -> Result<Option<Option<String>>, GraphQLError> {
        if !self.incremental {
            return Ok(None);
        }
        let Some(defer) = defer_directive(&self.schema, directives, &self.variables)? else {
            return Ok(None);
        };
        if self.operation == OperationType::Subscription {
            return Err(GraphQLError::new(
                "`@defer` directive not supported on subscription operations. Disable `@defer` by setting the `if` argument to `false`.",
            ));
        }
        Ok(Some(defer.label))
    }

    fn new_defer_usage(
        &self,
        label: Option<String>,
        parent_target: &Target,
        new_target: Option<&Target>,
        state: &mut CollectState,
    ) -> Target {
        let ancestors = match new_target {
            Some(target) => std::iter::once(target.clone())
                .chain(target.ancestors().iter().cloned())
                .collect(),
            None => std::iter::once(parent_target.clone())
                .chain(parent_target.ancestors().iter().cloned())
                .collect(),
        };
        let usage = Arc::new(DeferUsage {
            id: self.next_defer_id.fetch_add(1, AtomicOrdering::Relaxed),
            label,
            ancestors,
        });
        state.new_defer_usages.push(Arc::clone(&usage));
        Target::Deferred(usage)
    }

    fn does_fragment_condition_match(&self, type_condition: Option<&Name>, runtime_type: &str) -> bool {
        let Some(condition) = type_condition.map(Name::as_str) else {
            return true;
        };
        if condition == runtime_type {
            return true;
        }
        self.schema
            .type_kind(condition)
            .is_some_and(|kind| kind.is_abstract())
            && self.schema.is_sub_type(condition, runtime_type)
    }

    fn build_grouped_field_sets(
        &self,
        state: CollectState,
        parent_targets: &TargetSet,
    ) -> CollectFieldsResult {
        let CollectState {
            targets_by_key,
            fields_by_target,
            new_defer_usages,
            ..
        } = state;

        let mut parent_keys = IndexSet::new();
        let mut details_by_set: IndexMap<TargetSet, TargetSetDetails> = IndexMap::new();

        for (key, targets) in &targets_by_key {
            let masking: Vec<&Target> = targets
                .iter()
                .filter(|target| match target {
                    Target::Initial => true,
                    Target::Deferred(usage) => {
                        usage.ancestors.iter().all(|ancestor| !targets.contains(ancestor))
                    }
                })
                .collect();
            let masking_set: TargetSet = masking.iter().map(|t| (*t).clone()).collect();

            if &masking_set == parent_targets {
                parent_keys.insert(key.clone());
                continue;
            }

            let details = details_by_set.entry(masking_set).or_insert_with(|| TargetSetDetails {
                keys: IndexSet::new(),
                should_initiate_defer: masking
                    .iter()
                    .any(|target| !parent_targets.contains(target)),
            });
            details.keys.insert(key.clone());
        }

        let grouped_field_set = self.ordered_grouped_field_set(
            &parent_keys,
            parent_targets,
            &targets_by_key,
            &fields_by_target,
        );

        let new_grouped_field_set_details = details_by_set
            .into_iter()
            .map(|(masking_set, details)| {
                let grouped_field_set = self.ordered_grouped_field_set(
                    &details.keys,
                    &masking_set,
                    &targets_by_key,
                    &fields_by_target,
                );
                let details = GroupedFieldSetDetails {
                    grouped_field_set,
                    should_initiate_defer: details.should_initiate_defer,
                };
                (masking_set, details)
            })
            .collect();

        CollectFieldsResult {
            grouped_field_set,
            new_grouped_field_set_details,
            new_defer_usages,
        }
    }

    /// Builds the groups of `keys` in the order the keys first appear in the
    /// selection, whichever target selected them.
    fn ordered_grouped_field_set(
        &self,
        keys: &IndexSet<String>,
        masking_targets: &TargetSet,
        targets_by_key: &IndexMap<String, IndexSet<Target>>,
        fields_by_target: &IndexMap<Target, IndexMap<String, Vec<Arc<Field>>>>,
    ) -> GroupedFieldSet {
        let mut grouped_field_set = GroupedFieldSet::new();
        for (key, targets) in targets_by_key.iter().filter(|(key, _)| keys.contains(*key)) {
            let mut fields = Vec::new();
            for target in targets {
                let nodes = fields_by_target
                    .get(target)
                    .and_then(|fields| fields.get(key))
                    .into_iter()
                    .flatten();
                fields.extend(nodes.map(|node| FieldDetails {
                    node: Arc::clone(node),
                    target: target.clone(),
                }));
            }
            grouped_field_set.insert(
                key.clone(),
                self.new_field_group(fields, masking_targets.clone()),
            );
        }
        grouped_field_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, ObjectDef, SchemaBuilder, TypeRef};
    use pretty_assertions::assert_eq;

    fn schema() -> Arc<Schema> {
        let string = || TypeRef::named("String");
        Arc::new(
            SchemaBuilder::new()
                .query_type("Query")
                .subscription_type("Query")
                .object(
                    ObjectDef::new("Query")
                        .field(FieldDef::new("a", string()))
                        .field(FieldDef::new("b", string()))
                        .field(FieldDef::new("c", string()))
                        .field(FieldDef::new("hero", TypeRef::named("Hero"))),
                )
                .object(ObjectDef::new("Hero").field(FieldDef::new("name", string())))
                .build()
                .unwrap(),
        )
    }

    fn collect(source: &str, incremental: bool) -> Result<CollectFieldsResult, GraphQLError> {
        let document = Arc::new(weave_syntax::parse(source).into_result(source).unwrap());
        let operation = Arc::clone(document.operations().next().unwrap());
        let collector = Collector::new(
            schema(),
            document,
            Arc::new(Variables::new()),
            operation.operation,
            incremental,
        );
        collector.collect_fields("Query", &operation.selection_set)
    }

    fn keys(set: &GroupedFieldSet) -> Vec<&str> {
        set.keys().map(String::as_str).collect()
    }

    #[test]
    fn test_deferred_fields_split_off() {
        let result = collect("{ a ... @defer(label: \"later\") { b } c }", true).unwrap();
        assert_eq!(keys(&result.grouped_field_set), vec!["a", "c"]);
        assert_eq!(result.new_defer_usages.len(), 1);
        assert_eq!(result.new_defer_usages[0].label.as_deref(), Some("later"));

        let (targets, details) = result.new_grouped_field_set_details.first().unwrap();
        assert_eq!(targets.defer_usages().count(), 1);
        assert!(details.should_initiate_defer);
        assert_eq!(keys(&details.grouped_field_set), vec!["b"]);
    }

    #[test]
    fn test_field_also_in_initial_is_masked() {
        let result = collect("{ ... @defer { a } a }", true).unwrap();
        assert_eq!(keys(&result.grouped_field_set), vec!["a"]);
        assert!(result.new_grouped_field_set_details.is_empty());

        let group = &result.grouped_field_set["a"];
        assert_eq!(group.fields.len(), 2);
        assert_eq!(group.targets, TargetSet::initial());
    }

    #[test]
    fn test_shared_field_across_sibling_defers() {
        let result = collect("{ ... @defer { a b } ... @defer { a } }", true).unwrap();
        assert!(result.grouped_field_set.is_empty());
        assert_eq!(result.new_defer_usages.len(), 2);
        assert_eq!(result.new_grouped_field_set_details.len(), 2);

        let shared = result
            .new_grouped_field_set_details
            .iter()
            .find(|(targets, _)| targets.defer_usages().count() == 2)
            .map(|(_, details)| details)
            .unwrap();
        assert_eq!(keys(&shared.grouped_field_set), vec!["a"]);
    }

    #[test]
    fn test_nested_defer_ancestors() {
        let result = collect("{ ... @defer { a ... @defer { b } } }", true).unwrap();
        let outer = &result.new_defer_usages[0];
        let inner = &result.new_defer_usages[1];
        assert_eq!(outer.ancestors, vec![Target::Initial]);
        assert_eq!(inner.ancestors[0], Target::Deferred(Arc::clone(outer)));
        assert_eq!(inner.ancestors[1], Target::Initial);
    }

    #[test]
    fn test_subfield_defer_under_deferred_parent_keeps_full_ancestry() {
        let source = "{ hero { name } ... @defer { hero { ... @defer { name } } } }";
        let document = Arc::new(weave_syntax::parse(source).into_result(source).unwrap());
        let operation = Arc::clone(document.operations().next().unwrap());
        let collector = Collector::new(
            schema(),
            document,
            Arc::new(Variables::new()),
            OperationType::Query,
            true,
        );
        let root = collector.collect_fields("Query", &operation.selection_set).unwrap();
        let hero = &root.grouped_field_set["hero"];
        assert_eq!(hero.targets, TargetSet::initial());

        let sub = collector.collect_subfields("Hero", hero).unwrap();
        let outer = &root.new_defer_usages[0];
        let inner = &sub.new_defer_usages[0];
        assert_eq!(
            inner.ancestors,
            vec![Target::Deferred(Arc::clone(outer)), Target::Initial]
        );
        assert_eq!(keys(&sub.grouped_field_set), vec!["name"]);
        assert!(sub.new_grouped_field_set_details.is_empty());
    }

    #[test]
    fn test_keys_follow_first_occurrence_across_targets() {
        let result = collect("{ ... @defer { c } a c ... @defer { b } }", true).unwrap();
        assert_eq!(keys(&result.grouped_field_set), vec!["c", "a"]);

        let result = collect("{ ... @defer { b a } ... @defer { a } c }", true).unwrap();
        assert_eq!(keys(&result.grouped_field_set), vec!["c"]);
        let shared = result
            .new_grouped_field_set_details
            .iter()
            .find(|(targets, _)| targets.defer_usages().count() == 2)
            .map(|(_, details)| details)
            .unwrap();
        assert_eq!(keys(&shared.grouped_field_set), vec!["a"]);
    }

    #[test]
    fn test_defer_ignored_without_incremental_delivery() {
        let result = collect("{ a ... @defer { b } }", false).unwrap();
        assert_eq!(keys(&result.grouped_field_set), vec!["a", "b"]);
        assert!(result.new_defer_usages.is_empty());
    }

    #[test]
    fn test_defer_rejected_on_subscription() {
        let err = collect("subscription { ... @defer { a } }", true).unwrap_err();
        assert_eq!(
            err.message,
            "`@defer` directive not supported on subscription operations. Disable `@defer` by setting the `if` argument to `false`."
        );
        assert!(collect("subscription { ... @defer(if: false) { a } }", true).is_ok());
    }

    #[test]
    fn test_fragments_and_skip() {
        let result = collect(
            "{ ...F ...F b @skip(if: true) ... on Hero { c } } fragment F on Query { a }",
            true,
        )
        .unwrap();
        assert_eq!(keys(&result.grouped_field_set), vec!["a"]);
        assert_eq!(result.grouped_field_set["a"].fields.len(), 1);
    }

    #[test]
    fn test_collect_subfields_is_memoized() {
        let source = "{ hero { name } hero { name } }";
        let document = Arc::new(weave_syntax::parse(source).into_result(source).unwrap());
        let operation = Arc::clone(document.operations().next().unwrap());
        let collector = Collector::new(
            schema(),
            document,
            Arc::new(Variables::new()),
            OperationType::Query,
            true,
        );
        let root = collector.collect_fields("Query", &operation.selection_set).unwrap();
        let hero = &root.grouped_field_set["hero"];
        assert_eq!(hero.fields.len(), 2);

        let first = collector.collect_subfields("Hero", hero).unwrap();
        let second = collector.collect_subfields("Hero", hero).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(keys(&first.grouped_field_set), vec!["name"]);
        assert_eq!(first.grouped_field_set["name"].fields.len(), 2);
    }
}
