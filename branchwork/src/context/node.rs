//! The context node: identity, namespaces, resolution, and fold.

use super::inputs::{InputBinding, InputMap, SourceRef};
use crate::errors::ContextError;
use crate::message::TaskMessage;
use crate::signal::CompletionSignal;
use crate::state::SharedState;
use crate::task::TaskDescriptor;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Execution scope for one node of a computation graph.
///
/// A context carries its local name, the input map fixed at creation, an
/// append-style output namespace, and a completion signal that publishes
/// the namespace to concurrent readers. Contexts form a tree: children are
/// created with [`push`](NodeContext::push) and share the tree's
/// [`SharedState`] by reference. Only the upward parent link exists; the
/// tree does not track children.
///
/// The owning worker for a context is expected to call, in order: zero or
/// more output writes, optionally
/// [`set_output_selection`](NodeContext::set_output_selection), exactly one
/// [`complete`](NodeContext::complete), then exactly one
/// [`fold`](NodeContext::fold) (roots are never folded).
#[derive(Debug)]
pub struct NodeContext {
    name: String,
    path: String,
    parent: Option<Arc<NodeContext>>,
    state: Arc<SharedState>,
    input_map: InputMap,
    output_selection: RwLock<Option<Vec<String>>>,
    outputs: RwLock<Value>,
    // Bumped on every namespace mutation so resolvers parked on this node
    // re-check without polling.
    outputs_rev: watch::Sender<u64>,
    completion: CompletionSignal,
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Inserts `value` under `key`, resetting the slot to an object first if a
/// wholesale write left something else there.
fn insert_output(slot: &mut Value, key: String, value: Value) {
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    if let Some(map) = slot.as_object_mut() {
        map.insert(key, value);
    }
}

impl NodeContext {
    fn create(
        name: String,
        parent: Option<Arc<NodeContext>>,
        state: Arc<SharedState>,
        input_map: InputMap,
    ) -> Arc<Self> {
        let path = match &parent {
            Some(parent) => join_path(&parent.path, &name),
            None => name.clone(),
        };
        let (outputs_rev, _rx) = watch::channel(0);
        Arc::new(Self {
            name,
            completion: CompletionSignal::new(path.clone()),
            path,
            parent,
            state,
            input_map,
            output_selection: RwLock::new(None),
            outputs: RwLock::new(Value::Object(Map::new())),
            outputs_rev,
        })
    }

    /// Creates a root context wrapping fresh shared state.
    ///
    /// The root has an empty name, no parent, an empty input map, and a
    /// pending completion signal. One root is created per unit of work.
    #[must_use]
    pub fn root(task: TaskDescriptor, message: Arc<TaskMessage>) -> Arc<Self> {
        Self::named_root(String::new(), task, message)
    }

    /// Creates a root context with a name, for readable diagnostic paths.
    #[must_use]
    pub fn named_root(
        name: impl Into<String>,
        task: TaskDescriptor,
        message: Arc<TaskMessage>,
    ) -> Arc<Self> {
        let state = Arc::new(SharedState::new(task, message));
        debug!(tree_id = %state.tree_id(), "created root context");
        Self::create(name.into(), None, state, InputMap::new())
    }

    /// Creates a child context sharing this tree's state.
    ///
    /// The child stores `name` and `input_map` verbatim and starts with
    /// empty outputs, no output selection, and a pending completion signal.
    /// Sibling-name uniqueness is the caller's responsibility; duplicate
    /// names surface as last-fold-wins in the parent namespace.
    #[must_use]
    pub fn push(self: &Arc<Self>, name: impl Into<String>, input_map: InputMap) -> Arc<Self> {
        let child = Self::create(
            name.into(),
            Some(Arc::clone(self)),
            Arc::clone(&self.state),
            input_map,
        );
        debug!(path = %child.path, "pushed child context");
        child
    }

    /// Returns the local name of this context.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the `/`-joined path from the root to this context.
    ///
    /// The path is fixed at creation and stable for the context's lifetime;
    /// it keys every log line and error this crate emits.
    #[must_use]
    pub fn full_path(&self) -> &str {
        &self.path
    }

    /// Returns the parent context, or `None` for roots.
    #[must_use]
    pub fn parent(&self) -> Option<Arc<NodeContext>> {
        self.parent.as_ref().map(Arc::clone)
    }

    /// Returns true for a root context.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Returns the tree's shared state.
    #[must_use]
    pub fn state(&self) -> Arc<SharedState> {
        Arc::clone(&self.state)
    }

    /// Returns the task descriptor of this tree.
    #[must_use]
    pub fn task(&self) -> &TaskDescriptor {
        self.state.task()
    }

    /// Returns a handle to the tree's current message.
    #[must_use]
    pub fn message(&self) -> Arc<TaskMessage> {
        self.state.message()
    }

    /// Returns this context's input map.
    #[must_use]
    pub fn input_map(&self) -> &InputMap {
        &self.input_map
    }

    /// Returns this context's completion signal.
    ///
    /// The scheduler may wait on it directly, or abort it to unblock
    /// waiters when the owning worker dies.
    #[must_use]
    pub fn completion(&self) -> &CompletionSignal {
        &self.completion
    }

    fn binding(&self, target: &str) -> Option<&InputBinding> {
        self.input_map.iter().find(|b| b.target == target)
    }

    fn parent_or_err(&self) -> Result<&Arc<NodeContext>, ContextError> {
        self.parent.as_ref().ok_or_else(|| ContextError::NoParent {
            path: self.path.clone(),
        })
    }

    fn lookup_output(&self, key: &str) -> Option<Value> {
        self.outputs.read().as_object().and_then(|map| map.get(key)).cloned()
    }

    /// Waits until `key` is published in the parent namespace.
    ///
    /// A key becomes available either when a sibling folds it into the
    /// parent or when the parent writes it itself; the parent's completion
    /// is the final barrier, after which a missing key is definitive.
    async fn await_parent_output(&self, key: &str) -> Result<Value, ContextError> {
        let parent = self.parent_or_err()?;
        let mut rev = parent.outputs_rev.subscribe();

        loop {
            if let Some(value) = parent.lookup_output(key) {
                return Ok(value);
            }
            if parent.completion.is_resolved() {
                // Surfaces NodeAborted when the parent aborted.
                parent.completion.wait().await?;
                return Err(ContextError::OutputKeyNotFound {
                    path: self.path.clone(),
                    name: key.to_string(),
                });
            }
            tokio::select! {
                changed = rev.changed() => {
                    if changed.is_err() {
                        // Namespace writer gone; the completion branch of
                        // the next iteration reports the terminal state.
                        parent.completion.wait().await?;
                    }
                }
                finished = parent.completion.wait() => {
                    finished?;
                }
            }
        }
    }

    async fn resolve_binding(&self, binding: &InputBinding) -> Result<Value, ContextError> {
        match &binding.source {
            SourceRef::Literal(value) => Ok(value.clone()),
            SourceRef::ParentDefault => {
                let parent = self.parent_or_err()?;
                parent.completion.wait().await?;

                let outputs = parent.outputs.read();
                match outputs.as_object() {
                    Some(map) if map.len() == 1 => {
                        Ok(map.values().next().cloned().unwrap_or(Value::Null))
                    }
                    Some(map) => Err(ContextError::AmbiguousDefaultOutput {
                        path: self.path.clone(),
                        count: map.len(),
                    }),
                    // A wholesale non-object write is the single unnamed
                    // result of the parent.
                    None => Ok(outputs.clone()),
                }
            }
            SourceRef::ParentOutput(key) => self.await_parent_output(key).await,
        }
    }

    /// Resolves the input bound under `target`.
    ///
    /// Literal sources resolve immediately. A named reference waits until
    /// the key is published in the parent namespace (typically by a sibling
    /// completing and folding); once the parent's own completion resolves,
    /// a missing key fails instead of waiting further. A default reference
    /// waits for the parent's completion outright, since "the single
    /// output" is only knowable from the sealed namespace. Resolution is
    /// lazy precisely so sibling branches can execute concurrently while
    /// depending on each other's results.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::InputNotFound`] when `target` is not in the
    /// input map, plus the per-source failures:
    /// [`ContextError::AmbiguousDefaultOutput`],
    /// [`ContextError::OutputKeyNotFound`], or
    /// [`ContextError::NodeAborted`] when the awaited parent aborts.
    pub async fn resolve_input(&self, target: &str) -> Result<Value, ContextError> {
        let binding = self
            .binding(target)
            .ok_or_else(|| ContextError::InputNotFound {
                path: self.path.clone(),
                name: target.to_string(),
            })?;
        self.resolve_binding(binding).await
    }

    /// Probe variant of [`resolve_input`](Self::resolve_input): an unmapped
    /// `target` yields `Ok(None)` instead of an error.
    pub async fn try_resolve_input(&self, target: &str) -> Result<Option<Value>, ContextError> {
        match self.binding(target) {
            Some(binding) => self.resolve_binding(binding).await.map(Some),
            None => Ok(None),
        }
    }

    /// Resolves every binding of the input map, in declaration order, into
    /// one object keyed by target name.
    ///
    /// # Errors
    ///
    /// Any single failure aborts the whole call with that failure; no
    /// partial result is returned.
    pub async fn resolve_inputs(&self) -> Result<Map<String, Value>, ContextError> {
        let mut resolved = Map::new();
        for binding in &self.input_map {
            let value = self.resolve_binding(binding).await?;
            resolved.insert(binding.target.clone(), value);
        }
        Ok(resolved)
    }

    /// Resolves the value of the sole input binding.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::AmbiguousSingleInput`] unless the input map
    /// contains exactly one binding.
    pub async fn resolve_single_input(&self) -> Result<Value, ContextError> {
        match self.input_map.as_slice() {
            [binding] => self.resolve_binding(binding).await,
            bindings => Err(ContextError::AmbiguousSingleInput {
                path: self.path.clone(),
                count: bindings.len(),
            }),
        }
    }

    fn ensure_unsealed(&self) -> Result<(), ContextError> {
        if self.completion.is_resolved() {
            return Err(ContextError::OutputsSealed {
                path: self.path.clone(),
            });
        }
        Ok(())
    }

    fn bump_outputs_rev(&self) {
        self.outputs_rev.send_modify(|rev| *rev += 1);
    }

    /// Replaces the output namespace wholesale.
    ///
    /// Used when a node produces a single unnamed result; a non-object
    /// value then folds into the parent as that bare value.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::OutputsSealed`] after completion.
    pub fn set_output(&self, value: Value) -> Result<(), ContextError> {
        self.ensure_unsealed()?;
        *self.outputs.write() = value;
        self.bump_outputs_rev();
        Ok(())
    }

    /// Inserts or overwrites one key of the output namespace.
    ///
    /// Last write wins until completion seals the namespace.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::OutputsSealed`] after completion.
    pub fn set_output_value(
        &self,
        key: impl Into<String>,
        value: Value,
    ) -> Result<(), ContextError> {
        self.ensure_unsealed()?;
        insert_output(&mut self.outputs.write(), key.into(), value);
        self.bump_outputs_rev();
        Ok(())
    }

    /// Records which output keys [`fold`](Self::fold) propagates.
    ///
    /// An empty selection means "propagate everything present at fold
    /// time".
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::OutputsSealed`] after completion.
    pub fn set_output_selection(&self, keys: Vec<String>) -> Result<(), ContextError> {
        self.ensure_unsealed()?;
        *self.output_selection.write() = Some(keys);
        Ok(())
    }

    /// Returns a copy of the output namespace.
    ///
    /// Intended for diagnostics and for the task handler once the context
    /// is complete. Cross-thread reads before completion are unreliable by
    /// contract; dependent nodes must route through the resolvers, which
    /// enforce the wait.
    #[must_use]
    pub fn view_outputs(&self) -> Value {
        self.outputs.read().clone()
    }

    /// Resolves this context's completion signal, publishing the outputs.
    ///
    /// Every waiter blocked in a resolver on this context unblocks here and
    /// observes the same finalized namespace.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::DoubleCompletion`] on a second call; treat
    /// it as fatal.
    pub fn complete(&self) -> Result<(), ContextError> {
        self.completion.resolve()
    }

    /// Finishes this context in failure, unblocking waiters with
    /// [`ContextError::NodeAborted`].
    ///
    /// Meant for the scheduler when the owning worker fails before
    /// completing; without it every dependent resolver would stall
    /// indefinitely.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::DoubleCompletion`] if the context already
    /// completed or aborted.
    pub fn abort(&self, reason: impl Into<String>) -> Result<(), ContextError> {
        self.completion.abort(reason)
    }

    /// Returns true once this context has completed (or aborted).
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completion.is_resolved()
    }

    fn folded_value(&self) -> Result<Value, ContextError> {
        let outputs = self.outputs.read();
        let selection = self.output_selection.read();

        let Some(map) = outputs.as_object() else {
            // Wholesale non-object result: selections cannot name keys in it.
            return match selection.as_deref() {
                Some([first, ..]) => Err(ContextError::OutputKeyNotFound {
                    path: self.path.clone(),
                    name: first.clone(),
                }),
                _ => Ok(outputs.clone()),
            };
        };

        let keys: Vec<&String> = match selection.as_deref() {
            Some(keys) if !keys.is_empty() => keys.iter().collect(),
            _ => map.keys().collect(),
        };

        if let [key] = keys.as_slice() {
            // A single propagated key flattens to its bare value.
            return map
                .get(*key)
                .cloned()
                .ok_or_else(|| ContextError::OutputKeyNotFound {
                    path: self.path.clone(),
                    name: (*key).clone(),
                });
        }

        let mut folded = Map::new();
        for key in keys {
            let value = map
                .get(key)
                .cloned()
                .ok_or_else(|| ContextError::OutputKeyNotFound {
                    path: self.path.clone(),
                    name: key.clone(),
                })?;
            folded.insert(key.clone(), value);
        }
        Ok(Value::Object(folded))
    }

    /// Folds the selected outputs into the parent under this context's
    /// name.
    ///
    /// The propagation set is the output selection if one was recorded,
    /// otherwise every key currently in the namespace. Exactly one
    /// propagated key writes its bare value under
    /// `parent.outputs[self.name]`; several write an object of just those
    /// pairs. The parent's completion is untouched: the parent decides
    /// independently when it is done.
    ///
    /// Folding the same child twice overwrites the previous entry; callers
    /// fold each child at most once by convention.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError::RootFold`] on a root,
    /// [`ContextError::IncompleteFold`] before completion,
    /// [`ContextError::OutputsSealed`] when the parent already completed,
    /// and [`ContextError::OutputKeyNotFound`] when the selection names a
    /// key the namespace does not hold.
    pub fn fold(&self) -> Result<(), ContextError> {
        let parent = self.parent.as_ref().ok_or_else(|| ContextError::RootFold {
            path: self.path.clone(),
        })?;
        if self.completion.is_pending() {
            return Err(ContextError::IncompleteFold {
                path: self.path.clone(),
            });
        }
        parent.ensure_unsealed()?;

        let folded = self.folded_value()?;
        insert_output(&mut parent.outputs.write(), self.name.clone(), folded);
        parent.bump_outputs_rev();
        debug!(path = %self.path, parent = %parent.path, "folded outputs into parent");
        Ok(())
    }

    /// Sets the record mask on the tree's shared state.
    ///
    /// # Errors
    ///
    /// See [`SharedState::set_record_mask`].
    pub fn set_record_mask(&self, mask: Vec<bool>) -> Result<(), ContextError> {
        self.state.set_record_mask(mask)
    }

    /// Returns the tree's record mask.
    ///
    /// # Errors
    ///
    /// See [`SharedState::record_mask`].
    pub fn record_mask(&self) -> Result<Arc<Vec<bool>>, ContextError> {
        self.state.record_mask()
    }

    /// Waits for the tree's record mask.
    ///
    /// # Errors
    ///
    /// See [`SharedState::wait_record_mask`].
    pub async fn wait_record_mask(&self) -> Result<Arc<Vec<bool>>, ContextError> {
        self.state.wait_record_mask().await
    }

    /// Returns true once any node in the tree has set the record mask.
    #[must_use]
    pub fn has_record_mask(&self) -> bool {
        self.state.has_record_mask()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestTree;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_root_shape() {
        let root = TestTree::new().build();

        assert!(root.is_root());
        assert_eq!(root.name(), "");
        assert_eq!(root.full_path(), "");
        assert!(root.input_map().is_empty());
        assert_eq!(root.view_outputs(), json!({}));
        assert!(!root.is_complete());
    }

    #[test]
    fn test_full_path_three_levels() {
        let root = TestTree::new().with_root_name("a").build();
        let b = root.push("b", InputMap::new());
        let c = b.push("c", InputMap::new());

        assert_eq!(c.full_path(), "a/b/c");
        assert_eq!(b.full_path(), "a/b");

        // Sibling count and creation order do not affect the path.
        let _sibling = b.push("other", InputMap::new());
        assert_eq!(c.full_path(), "a/b/c");
    }

    #[test]
    fn test_unnamed_root_paths_skip_empty_segment() {
        let root = TestTree::new().build();
        let child = root.push("gen", InputMap::new());

        assert_eq!(child.full_path(), "gen");
        assert_eq!(child.push("inner", InputMap::new()).full_path(), "gen/inner");
    }

    #[test]
    fn test_push_shares_state() {
        let root = TestTree::new().build();
        let child = root.push("n1", InputMap::new());

        assert!(Arc::ptr_eq(&root.state(), &child.state()));
        assert_eq!(child.task().kind(), root.task().kind());
        assert!(child.parent().is_some());
    }

    #[test]
    fn test_set_output_value_overwrites_until_complete() {
        let root = TestTree::new().build();
        root.set_output_value("x", json!(1)).unwrap();
        root.set_output_value("x", json!(2)).unwrap();

        assert_eq!(root.view_outputs(), json!({"x": 2}));
    }

    #[test]
    fn test_outputs_sealed_after_complete() {
        let root = TestTree::new().build();
        root.set_output_value("x", json!(1)).unwrap();
        root.complete().unwrap();

        let err = root.set_output_value("y", json!(2)).unwrap_err();
        assert!(matches!(err, ContextError::OutputsSealed { .. }));
        assert!(root.set_output(json!(3)).is_err());
        assert!(root.set_output_selection(vec!["x".to_string()]).is_err());
        assert_eq!(root.view_outputs(), json!({"x": 1}));
    }

    #[test]
    fn test_double_completion_fails() {
        let root = TestTree::new().build();
        root.complete().unwrap();

        let err = root.complete().unwrap_err();
        assert!(matches!(err, ContextError::DoubleCompletion { .. }));
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_fold_requires_completion() {
        let root = TestTree::new().build();
        let child = root.push("n1", InputMap::new());
        child.set_output_value("x", json!(1)).unwrap();

        let err = child.fold().unwrap_err();
        assert!(matches!(err, ContextError::IncompleteFold { .. }));
    }

    #[test]
    fn test_fold_on_root_fails() {
        let root = TestTree::new().build();
        root.complete().unwrap();

        let err = root.fold().unwrap_err();
        assert!(matches!(err, ContextError::RootFold { .. }));
    }

    #[test]
    fn test_fold_all_keys_as_object() {
        let root = TestTree::new().build();
        let child = root.push("child", InputMap::new());
        child.set_output_value("x", json!(1)).unwrap();
        child.set_output_value("y", json!(2)).unwrap();
        child.complete().unwrap();
        child.fold().unwrap();

        assert_eq!(root.view_outputs(), json!({"child": {"x": 1, "y": 2}}));
    }

    #[test]
    fn test_fold_single_selection_flattens() {
        let root = TestTree::new().build();
        let child = root.push("child", InputMap::new());
        child.set_output_value("x", json!(1)).unwrap();
        child.set_output_value("y", json!(2)).unwrap();
        child.set_output_selection(vec!["x".to_string()]).unwrap();
        child.complete().unwrap();
        child.fold().unwrap();

        assert_eq!(root.view_outputs(), json!({"child": 1}));
    }

    #[test]
    fn test_fold_multi_selection_subsets() {
        let root = TestTree::new().build();
        let child = root.push("child", InputMap::new());
        for (key, value) in [("x", 1), ("y", 2), ("z", 3)] {
            child.set_output_value(key, json!(value)).unwrap();
        }
        child
            .set_output_selection(vec!["x".to_string(), "z".to_string()])
            .unwrap();
        child.complete().unwrap();
        child.fold().unwrap();

        assert_eq!(root.view_outputs(), json!({"child": {"x": 1, "z": 3}}));
    }

    #[test]
    fn test_fold_selection_missing_key_fails() {
        let root = TestTree::new().build();
        let child = root.push("child", InputMap::new());
        child.set_output_value("x", json!(1)).unwrap();
        child
            .set_output_selection(vec!["missing".to_string()])
            .unwrap();
        child.complete().unwrap();

        let err = child.fold().unwrap_err();
        assert!(matches!(err, ContextError::OutputKeyNotFound { .. }));
    }

    #[test]
    fn test_fold_single_output_flattens_without_selection() {
        let root = TestTree::new().build();
        let child = root.push("n1", InputMap::new());
        child.set_output_value("out", json!(10)).unwrap();
        child.complete().unwrap();
        child.fold().unwrap();

        assert_eq!(root.view_outputs(), json!({"n1": 10}));
    }

    #[test]
    fn test_fold_wholesale_value_stays_bare() {
        let root = TestTree::new().build();
        let child = root.push("score", InputMap::new());
        child.set_output(json!(0.75)).unwrap();
        child.complete().unwrap();
        child.fold().unwrap();

        assert_eq!(root.view_outputs(), json!({"score": 0.75}));
    }

    #[test]
    fn test_fold_empty_outputs_writes_empty_object() {
        let root = TestTree::new().build();
        let child = root.push("noop", InputMap::new());
        child.complete().unwrap();
        child.fold().unwrap();

        assert_eq!(root.view_outputs(), json!({"noop": {}}));
    }

    #[test]
    fn test_fold_into_completed_parent_fails() {
        let root = TestTree::new().build();
        let child = root.push("late", InputMap::new());
        child.set_output_value("x", json!(1)).unwrap();
        child.complete().unwrap();
        root.complete().unwrap();

        let err = child.fold().unwrap_err();
        assert!(matches!(err, ContextError::OutputsSealed { .. }));
    }

    #[test]
    fn test_refold_overwrites_previous_entry() {
        let root = TestTree::new().build();
        let child = root.push("n1", InputMap::new());
        child.set_output_value("out", json!(1)).unwrap();
        child.complete().unwrap();
        child.fold().unwrap();
        child.fold().unwrap();

        assert_eq!(root.view_outputs(), json!({"n1": 1}));
    }
}
