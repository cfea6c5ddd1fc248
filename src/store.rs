//! The reactive store: observed nodes, write-through mutation, listener
//! dispatch and sibling propagation.

use log::{debug, error, trace, warn};
use serde_json::{Number, Value as Json};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::alias::{AliasSet, Arena, NodeId};
use crate::cache::{FlatCache, Slot};
use crate::error::{ListenerResult, StoreError, StoreResult};
use crate::path::{Path, Seg};
use crate::raw::{Raw, RawData, RawNode, Wrapper};
use crate::registry::{ListenerId, ListenerRegistry, MatchStrategy, Registry};

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

/// The synthetic key reported after every size change of a sequence.
pub const LENGTH_KEY: &str = "length";

/// A value read from the observed tree.
///
/// Maps and sequences are always returned as [`Node`] handles, never as raw data.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Node(Node),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Value::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => Json::Number(n.clone()),
            Value::String(s) => Json::String(s.clone()),
            Value::Node(n) => n.to_json(),
        }
    }
}

impl From<Value> for Raw {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Raw::Null,
            Value::Bool(b) => Raw::Bool(b),
            Value::Number(n) => Raw::Number(n),
            Value::String(s) => Raw::String(s),
            Value::Node(n) => n.raw().map_or(Raw::Null, Raw::Node),
        }
    }
}

impl From<&Node> for Raw {
    fn from(node: &Node) -> Self {
        node.raw().map_or(Raw::Null, Raw::Node)
    }
}

/// Flags carried by one write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteOptions {
    /// Dispatch listeners for this write.
    pub notify: bool,
    /// Reported as [`Change::autobind`]; a binding layer skips re-rendering
    /// when it is `false`.
    pub autobind: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            notify: true,
            autobind: true,
        }
    }
}

impl WriteOptions {
    /// Write without dispatching any listener.
    pub fn silent() -> Self {
        WriteOptions {
            notify: false,
            autobind: true,
        }
    }

    /// Dispatch with `autobind` cleared.
    pub fn no_autobind() -> Self {
        WriteOptions {
            notify: true,
            autobind: false,
        }
    }
}

/// What a listener receives for one changed path.
#[derive(Clone, Debug)]
pub struct Change {
    /// The concrete path that changed.
    pub path: Path,
    /// `None` when the key did not exist before.
    pub old_value: Option<Value>,
    /// `None` when the key was removed.
    pub new_value: Option<Value>,
    /// The node holding `key`.
    pub node: Node,
    pub key: Seg,
    pub autobind: bool,
    /// Set when the write was mirrored from a sibling store.
    pub from_sibling: bool,
}

#[derive(Debug, Default)]
struct State {
    arena: Arena,
    cache: FlatCache,
}

pub(crate) struct StoreInner {
    id: u64,
    root: NodeId,
    prune_orphans: bool,
    /// Writes and splices currently running, nested ones included.
    depth: Cell<usize>,
    state: RefCell<State>,
    registry: RefCell<Box<dyn Registry>>,
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for raw in state.arena.raws() {
            raw.remove_wrapper(self.id);
        }
    }
}

/// A write as forwarded to sibling wrappers of the same raw node.
enum SiblingEvent {
    Set {
        seg: Seg,
        old: Option<Raw>,
        new: Option<Raw>,
        len_change: Option<(usize, usize)>,
        opts: WriteOptions,
    },
    Splice {
        delta: SpliceDelta,
        opts: WriteOptions,
    },
}

/// Everything needed to redo splice bookkeeping once the raw sequence has
/// already been changed.
struct SpliceDelta {
    start: usize,
    delete_count: usize,
    inserted: usize,
    before: Vec<Raw>,
}

/// `(store id, node)` pairs already updated by one logical write.
type Visited = Vec<(u64, NodeId)>;

/// One write or splice in progress. Orphans are pruned when the outermost
/// operation of a store finishes, after all of its listeners ran.
struct Operation<'a> {
    store: &'a Store,
}

impl Drop for Operation<'_> {
    fn drop(&mut self) {
        let depth = self.store.inner.depth.get().saturating_sub(1);
        self.store.inner.depth.set(depth);
        if depth == 0 && !std::thread::panicking() {
            self.store.sweep();
        }
    }
}

/// Configures and creates a [`Store`].
///
/// # Examples
///
/// ```
/// use pathwatch::{MatchStrategy, Store};
/// use serde_json::json;
///
/// let store = Store::builder()
///     .match_strategy(MatchStrategy::Probe)
///     .prune_orphans(false)
///     .wrap_json(json!({"count": 1}))
///     .unwrap();
/// assert_eq!(store.get("count").and_then(|v| v.as_i64()), Some(1));
/// ```
pub struct StoreBuilder {
    registry: Option<Box<dyn Registry>>,
    strategy: MatchStrategy,
    prune_orphans: bool,
}

impl Default for StoreBuilder {
    fn default() -> Self {
        StoreBuilder {
            registry: None,
            strategy: MatchStrategy::Adaptive,
            prune_orphans: true,
        }
    }
}

impl StoreBuilder {
    /// Use a custom listener registry instead of [`ListenerRegistry`].
    pub fn registry(mut self, registry: Box<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Lookup strategy of the default registry. Ignored with a custom registry.
    pub fn match_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Remove nodes from the store once no path reaches them. On by default.
    pub fn prune_orphans(mut self, prune: bool) -> Self {
        self.prune_orphans = prune;
        self
    }

    /// Wrap `raw` as the root of a new store.
    ///
    /// If some other store already wraps `raw`, the two wrappers become
    /// siblings and mirror each other's writes.
    pub fn wrap(self, raw: RawNode) -> Store {
        let id = NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed);
        let registry = self
            .registry
            .unwrap_or_else(|| Box::new(ListenerRegistry::with_strategy(self.strategy)));
        let prune_orphans = self.prune_orphans;
        let inner = Rc::new_cyclic(|weak: &Weak<StoreInner>| {
            let mut state = State::default();
            let root = adopt(&mut state, id, weak, &raw, Some(Path::root()));
            StoreInner {
                id,
                root,
                prune_orphans,
                depth: Cell::new(0),
                state: RefCell::new(state),
                registry: RefCell::new(registry),
            }
        });
        debug!("store {id}: wrapped root {:?}", raw.id());
        Store { inner }
    }

    /// Wrap a JSON object or array as the root of a new store.
    pub fn wrap_json(self, json: Json) -> StoreResult<Store> {
        match Raw::from(json) {
            Raw::Node(raw) => Ok(self.wrap(raw)),
            _ => Err(StoreError::NotAContainer {
                path: String::new(),
            }),
        }
    }
}

/// Wrap `raw` depth-first, or reuse this store's wrapper and record `path`.
fn adopt(
    state: &mut State,
    store_id: u64,
    store: &Weak<StoreInner>,
    raw: &RawNode,
    path: Option<Path>,
) -> NodeId {
    if let Some(id) = state.arena.lookup(raw) {
        if let Some(path) = path {
            state.arena.attach(id, path, &mut state.cache);
        }
        return id;
    }
    let id = state.arena.insert(raw.clone());
    let siblings = raw.wrappers().len();
    raw.add_wrapper(Wrapper {
        store_id,
        store: store.clone(),
        node: id,
    });
    if siblings > 0 {
        debug!("store {store_id}: {:?} linked to {siblings} sibling wrapper(s)", raw.id());
    }
    raw.normalize_dates();
    if let Some(path) = &path {
        state.arena.add_path(id, path.clone());
    }
    for (seg, child) in raw.child_nodes() {
        let child_path = path.as_ref().map(|p| p.child(seg));
        let child_id = adopt(state, store_id, store, &child, child_path.clone());
        if let Some(child_path) = child_path {
            state.cache.set(child_path.to_string(), Slot::Node(child_id));
        }
    }
    id
}

fn same(a: Option<&Raw>, b: Option<&Raw>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.same(b),
        _ => false,
    }
}

fn seq_items(raw: &RawNode) -> Vec<Raw> {
    match &*raw.data() {
        RawData::Seq(items) => items.clone(),
        RawData::Map(_) => Vec::new(),
    }
}

/// Write one raw slot. Sequences grow with nulls up to `index`.
fn write_raw(raw: &RawNode, seg: &Seg, value: Option<Raw>) {
    match &mut *raw.data_mut() {
        RawData::Map(map) => {
            let key = seg.as_key().into_owned();
            match value {
                Some(v) => {
                    map.insert(key, v);
                }
                None => {
                    map.shift_remove(&key);
                }
            }
        }
        RawData::Seq(items) => {
            let (Some(index), Some(v)) = (seg.as_index(), value) else {
                return;
            };
            if index < items.len() {
                items[index] = v;
            } else {
                items.resize(index, Raw::Null);
                items.push(v);
            }
        }
    }
}

/// A reactive store over one raw tree.
///
/// `Store` is a cheap handle; clones share the same store. All work happens
/// synchronously on the calling thread, and listeners run before the
/// mutating call returns. A listener may write again: the nested write and
/// its own listeners complete before the remaining outer listeners run.
///
/// # Examples
///
/// ```
/// use pathwatch::Store;
/// use serde_json::json;
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// let store = Store::from_json(json!({"user": {"name": "J", "age": 1}})).unwrap();
/// let hits = Rc::new(Cell::new(0));
/// let seen = hits.clone();
/// store.add_listener("user.*", move |_change| {
///     seen.set(seen.get() + 1);
///     Ok(())
/// });
///
/// let user = store.get("user").and_then(|v| v.as_node().cloned()).unwrap();
/// user.set("name", "K").unwrap();
/// user.set("age", 2).unwrap();
/// assert_eq!(hits.get(), 2);
/// ```
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("id", &self.inner.id).finish()
    }
}

impl Default for Store {
    fn default() -> Self {
        Store::new(RawNode::map())
    }
}

impl Store {
    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    /// Wrap `raw` with default settings.
    pub fn new(raw: RawNode) -> Store {
        Store::builder().wrap(raw)
    }

    /// Wrap a JSON object or array with default settings.
    pub fn from_json(json: Json) -> StoreResult<Store> {
        Store::builder().wrap_json(json)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn root(&self) -> Node {
        self.node(self.inner.root)
    }

    /// The raw root this store was built on.
    pub fn raw_root(&self) -> RawNode {
        let state = self.inner.state.borrow();
        state
            .arena
            .raw(self.inner.root)
            .unwrap_or_else(RawNode::map)
    }

    /// This store's wrapper around `raw`.
    ///
    /// Returns the existing wrapper if this store already observes `raw`.
    /// Otherwise the raw node is wrapped without a path; it gains one once it
    /// is assigned into the tree. A raw node observed by another store gets a
    /// new wrapper linked to that store's as a sibling.
    pub fn wrap(&self, raw: RawNode) -> Node {
        let mut state = self.inner.state.borrow_mut();
        let id = adopt(&mut state, self.inner.id, &Rc::downgrade(&self.inner), &raw, None);
        drop(state);
        self.node(id)
    }

    fn node(&self, id: NodeId) -> Node {
        Node {
            store: self.clone(),
            id,
        }
    }

    fn value_of(&self, state: &State, raw: &Raw) -> Value {
        match raw {
            Raw::Null => Value::Null,
            Raw::Bool(b) => Value::Bool(*b),
            Raw::Number(n) => Value::Number(n.clone()),
            Raw::String(s) => Value::String(s.clone()),
            Raw::Date(d) => Value::String(crate::raw::date_to_string(d)),
            Raw::Node(n) => match state.arena.lookup(n) {
                Some(id) => Value::Node(self.node(id)),
                None => {
                    warn!("store {}: {:?} is not observed", self.inner.id, n.id());
                    Value::Null
                }
            },
        }
    }

    fn slot_value(&self, state: &State, slot: &Slot) -> Value {
        match slot {
            Slot::Node(id) => Value::Node(self.node(*id)),
            Slot::Scalar(raw) => self.value_of(state, raw),
        }
    }

    /// Resolve a dotted path. The empty path is the root.
    ///
    /// Returns `None` when the path does not resolve, including when a
    /// non-numeric segment is used against a sequence.
    pub fn get(&self, path: &str) -> Option<Value> {
        if path.is_empty() {
            return Some(Value::Node(self.root()));
        }
        let resolved = {
            let state = self.inner.state.borrow();
            if let Some(slot) = state.cache.get(path) {
                return Some(self.slot_value(&state, slot));
            }
            if let Some((parent, key)) = path.rsplit_once('.') {
                if let Some(Slot::Node(parent_id)) = state.cache.get(parent) {
                    let raw = state.arena.raw(*parent_id)?;
                    let seg = Seg::parse(key);
                    if raw.is_seq() && seg.as_index().is_none() {
                        return None;
                    }
                    if let Some(child) = raw.get(&seg) {
                        return Some(self.value_of(&state, &child));
                    }
                }
            }
            let mut current = state.arena.raw(self.inner.root)?;
            let segs = crate::path::parse(path);
            let mut found = None;
            for (i, seg) in segs.iter().enumerate() {
                if current.is_seq() && seg.as_index().is_none() {
                    return None;
                }
                let child = current.get(seg)?;
                if i + 1 == segs.len() {
                    found = Some(child);
                    break;
                }
                current = child.as_node()?.clone();
            }
            let child = found?;
            let slot = match &child {
                Raw::Node(n) => Slot::Node(state.arena.lookup(n)?),
                scalar => Slot::Scalar(scalar.clone()),
            };
            (self.value_of(&state, &child), slot)
        };
        let (value, slot) = resolved;
        if Path::parse(path).to_string() == path {
            self.inner.state.borrow_mut().cache.set(path.to_string(), slot);
        }
        Some(value)
    }

    /// Resolve a dotted path, creating what is missing.
    ///
    /// Missing intermediate segments become sequences when the next segment
    /// is numeric and maps otherwise; the last one is set to `default`. Each
    /// creation is an ordinary write and notifies listeners.
    ///
    /// # Errors
    ///
    /// Fails when the path runs through a scalar or uses a non-numeric
    /// segment against a sequence.
    ///
    /// # Examples
    ///
    /// ```
    /// use pathwatch::Store;
    /// use serde_json::json;
    ///
    /// let store = Store::from_json(json!({})).unwrap();
    /// store.get_or_insert("a.b.0", 5).unwrap();
    /// assert_eq!(store.to_json(), json!({"a": {"b": [5]}}));
    /// assert_eq!(store.get("a.b.0").and_then(|v| v.as_i64()), Some(5));
    /// ```
    pub fn get_or_insert(&self, path: &str, default: impl Into<Raw>) -> StoreResult<Value> {
        let default = default.into();
        let segs = crate::path::parse(path);
        let mut current = self.inner.root;
        let mut walked = Path::root();
        for (i, seg) in segs.iter().enumerate() {
            let last = i + 1 == segs.len();
            let raw = self.raw_of(current)?;
            if raw.is_seq() && seg.as_index().is_none() {
                return Err(StoreError::InvalidIndex {
                    segment: seg.to_string(),
                    path: walked.to_string(),
                });
            }
            let child = match raw.get(seg) {
                Some(child) => child,
                None => {
                    let fill = if last {
                        default.clone()
                    } else if segs[i + 1].as_index().is_some() {
                        Raw::Node(RawNode::seq())
                    } else {
                        Raw::Node(RawNode::map())
                    };
                    self.write(current, seg.clone(), Some(fill), WriteOptions::default())?;
                    raw.get(seg).ok_or(StoreError::DetachedNode)?
                }
            };
            walked = walked.child(seg.clone());
            let state = self.inner.state.borrow();
            if last {
                return Ok(self.value_of(&state, &child));
            }
            current = match &child {
                Raw::Node(n) => state.arena.lookup(n).ok_or(StoreError::DetachedNode)?,
                _ => {
                    return Err(StoreError::NotAContainer {
                        path: walked.to_string(),
                    });
                }
            };
        }
        Ok(Value::Node(self.root()))
    }

    /// Register `callback` for `pattern` (dotted, `*` matches one segment).
    pub fn add_listener(
        &self,
        pattern: &str,
        callback: impl Fn(&Change) -> ListenerResult + 'static,
    ) -> ListenerId {
        self.inner
            .registry
            .borrow_mut()
            .add(pattern, Rc::new(callback))
    }

    /// Remove a registration made with [`Store::add_listener`].
    pub fn remove_listener(&self, pattern: &str, id: ListenerId) -> bool {
        self.inner.registry.borrow_mut().remove(pattern, id)
    }

    /// Prune orphaned nodes now instead of at the end of the next write.
    ///
    /// A node no path reaches is kept while something outside the store
    /// still holds its raw data, such as the value returned by
    /// [`Node::remove`]. Pushing that value back reuses the same wrapper.
    /// Does nothing while a write of this store is dispatching.
    pub fn prune(&self) {
        if self.inner.depth.get() == 0 {
            self.sweep();
        }
    }

    /// Number of observed nodes, reachable or not yet pruned.
    pub fn node_count(&self) -> usize {
        self.inner.state.borrow().arena.len()
    }

    /// Number of entries in the flattened path cache.
    pub fn cached_paths(&self) -> usize {
        self.inner.state.borrow().cache.len()
    }

    pub fn to_json(&self) -> Json {
        self.root().to_json()
    }

    fn raw_of(&self, id: NodeId) -> StoreResult<RawNode> {
        self.inner
            .state
            .borrow()
            .arena
            .raw(id)
            .ok_or(StoreError::DetachedNode)
    }

    fn describe(&self, id: NodeId) -> String {
        self.inner
            .state
            .borrow()
            .arena
            .get(id)
            .and_then(|n| n.aliases.primary().map(Path::to_string))
            .unwrap_or_else(|| "<detached>".to_string())
    }

    /// The single write entry point for key assignment and removal.
    fn write(&self, id: NodeId, seg: Seg, new: Option<Raw>, opts: WriteOptions) -> StoreResult<()> {
        let _op = self.begin();
        let new = new.map(Raw::normalized);
        let raw = self.raw_of(id)?;
        let seg = if raw.is_seq() {
            match seg.as_index() {
                Some(index) if new.is_some() => Seg::Index(index),
                Some(_) => {
                    return Err(StoreError::NotAMap {
                        path: self.describe(id),
                    });
                }
                None => {
                    return Err(StoreError::InvalidIndex {
                        segment: seg.to_string(),
                        path: self.describe(id),
                    });
                }
            }
        } else {
            Seg::Key(seg.as_key().into_owned())
        };
        let old = raw.get(&seg);
        if same(old.as_ref(), new.as_ref()) {
            return Ok(());
        }
        let old_len = raw.len();
        write_raw(&raw, &seg, new.clone());
        let len_change = (raw.is_seq() && raw.len() != old_len).then(|| (old_len, raw.len()));

        let changes = {
            let mut state = self.inner.state.borrow_mut();
            self.record_set(&mut state, id, &raw, &seg, old.as_ref(), new.as_ref());
            if opts.notify {
                self.set_changes(&state, id, &seg, old.as_ref(), new.as_ref(), len_change, opts, false)
            } else {
                Vec::new()
            }
        };
        let event = SiblingEvent::Set {
            seg,
            old,
            new,
            len_change,
            opts,
        };
        let mut visited = vec![(self.inner.id, id)];
        self.propagate(&raw, &event, &mut visited);
        self.dispatch(changes);
        Ok(())
    }

    /// Alias and cache bookkeeping for one key whose raw slot already holds `new`.
    fn record_set(
        &self,
        state: &mut State,
        id: NodeId,
        raw: &RawNode,
        seg: &Seg,
        old: Option<&Raw>,
        new: Option<&Raw>,
    ) {
        let aliases = state.arena.aliases(id);
        if let Some(Raw::Node(old_raw)) = old {
            if let Some(old_id) = state.arena.lookup(old_raw) {
                for alias in &aliases {
                    state.arena.detach(old_id, &alias.child(seg.clone()), &mut state.cache);
                }
            }
        }
        let weak = Rc::downgrade(&self.inner);
        if aliases.is_empty() {
            if let Some(Raw::Node(n)) = new {
                adopt(state, self.inner.id, &weak, n, None);
            }
        }
        for alias in &aliases {
            let path = alias.child(seg.clone());
            match new {
                Some(Raw::Node(n)) => {
                    let child = adopt(state, self.inner.id, &weak, n, Some(path.clone()));
                    state.cache.set(path.to_string(), Slot::Node(child));
                }
                Some(scalar) => state.cache.set(path.to_string(), Slot::Scalar(scalar.clone())),
                None => state.cache.remove(&path.to_string()),
            }
        }
        if raw.is_seq() {
            for alias in &aliases {
                state.cache.remove(&alias.child(LENGTH_KEY).to_string());
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn set_changes(
        &self,
        state: &State,
        id: NodeId,
        seg: &Seg,
        old: Option<&Raw>,
        new: Option<&Raw>,
        len_change: Option<(usize, usize)>,
        opts: WriteOptions,
        from_sibling: bool,
    ) -> Vec<Change> {
        let mut changes = Vec::new();
        for alias in state.arena.aliases(id) {
            changes.push(Change {
                path: alias.child(seg.clone()),
                old_value: old.map(|v| self.value_of(state, v)),
                new_value: new.map(|v| self.value_of(state, v)),
                node: self.node(id),
                key: seg.clone(),
                autobind: opts.autobind,
                from_sibling,
            });
            if let Some((before, after)) = len_change {
                changes.push(self.length_change(&alias, id, before, after, opts, from_sibling));
            }
        }
        changes
    }

    fn length_change(
        &self,
        alias: &Path,
        id: NodeId,
        before: usize,
        after: usize,
        opts: WriteOptions,
        from_sibling: bool,
    ) -> Change {
        Change {
            path: alias.child(LENGTH_KEY),
            old_value: Some(Value::Number(before.into())),
            new_value: Some(Value::Number(after.into())),
            node: self.node(id),
            key: Seg::Key(LENGTH_KEY.to_string()),
            autobind: opts.autobind,
            from_sibling,
        }
    }

    /// Replace `delete_count` items at `start` with `items`, keeping the
    /// wrappers of shifted items and moving their aliases to the new indices.
    fn splice(
        &self,
        id: NodeId,
        start: usize,
        delete_count: usize,
        items: Vec<Raw>,
        opts: WriteOptions,
    ) -> StoreResult<Vec<Raw>> {
        let _op = self.begin();
        let raw = self.raw_of(id)?;
        if !raw.is_seq() {
            return Err(StoreError::NotASequence {
                path: self.describe(id),
            });
        }
        let items: Vec<Raw> = items.into_iter().map(Raw::normalized).collect();
        let before = seq_items(&raw);
        let start = start.min(before.len());
        let delete_count = delete_count.min(before.len() - start);
        let inserted = items.len();
        let removed: Vec<Raw> = match &mut *raw.data_mut() {
            RawData::Seq(v) => v.splice(start..start + delete_count, items).collect(),
            RawData::Map(_) => Vec::new(),
        };
        debug!(
            "store {}: splice at {} (start {start}, removed {delete_count}, inserted {inserted})",
            self.inner.id,
            self.describe(id)
        );
        let delta = SpliceDelta {
            start,
            delete_count,
            inserted,
            before,
        };
        let changes = {
            let mut state = self.inner.state.borrow_mut();
            self.record_splice(&mut state, id, &raw, &delta);
            if opts.notify {
                self.splice_changes(&state, id, &raw, &delta, opts, false)
            } else {
                Vec::new()
            }
        };
        let event = SiblingEvent::Splice { delta, opts };
        let mut visited = vec![(self.inner.id, id)];
        self.propagate(&raw, &event, &mut visited);
        self.dispatch(changes);
        Ok(removed)
    }

    /// Alias bookkeeping for a splice already applied to the raw sequence.
    fn record_splice(&self, state: &mut State, id: NodeId, raw: &RawNode, delta: &SpliceDelta) {
        let aliases = state.arena.aliases(id);
        let after = seq_items(raw);
        let removed = &delta.before[delta.start..delta.start + delta.delete_count];

        for (offset, item) in removed.iter().enumerate() {
            let Raw::Node(n) = item else { continue };
            if let Some(item_id) = state.arena.lookup(n) {
                for alias in &aliases {
                    state
                        .arena
                        .detach(item_id, &alias.child(delta.start + offset), &mut state.cache);
                }
            }
        }

        let first_moved = delta.start + delta.inserted;
        if delta.inserted != delta.delete_count {
            let mut moved: Vec<(usize, usize)> = (first_moved..after.len())
                .map(|new_index| (new_index + delta.delete_count - delta.inserted, new_index))
                .collect();
            if delta.inserted > delta.delete_count {
                moved.reverse();
            }
            for (old_index, new_index) in moved {
                let Raw::Node(n) = &after[new_index] else { continue };
                if let Some(item_id) = state.arena.lookup(n) {
                    for alias in &aliases {
                        state.arena.reindex(
                            item_id,
                            &alias.child(old_index),
                            &alias.child(new_index),
                            &mut state.cache,
                        );
                    }
                }
            }
        }

        state.cache.clear();

        let weak = Rc::downgrade(&self.inner);
        for (offset, item) in after[delta.start..first_moved].iter().enumerate() {
            let Raw::Node(n) = item else { continue };
            if aliases.is_empty() {
                adopt(state, self.inner.id, &weak, n, None);
            }
            for alias in &aliases {
                adopt(state, self.inner.id, &weak, n, Some(alias.child(delta.start + offset)));
            }
        }
    }

    fn splice_changes(
        &self,
        state: &State,
        id: NodeId,
        raw: &RawNode,
        delta: &SpliceDelta,
        opts: WriteOptions,
        from_sibling: bool,
    ) -> Vec<Change> {
        let after = seq_items(raw);
        let end = delta.before.len().max(after.len());
        let mut changes = Vec::new();
        for alias in state.arena.aliases(id) {
            for index in delta.start..end {
                let old = delta.before.get(index);
                let new = after.get(index);
                if same(old, new) {
                    continue;
                }
                changes.push(Change {
                    path: alias.child(index),
                    old_value: old.map(|v| self.value_of(state, v)),
                    new_value: new.map(|v| self.value_of(state, v)),
                    node: self.node(id),
                    key: Seg::Index(index),
                    autobind: opts.autobind,
                    from_sibling,
                });
            }
            changes.push(self.length_change(
                &alias,
                id,
                delta.before.len(),
                after.len(),
                opts,
                from_sibling,
            ));
        }
        changes
    }

    /// Forward a write to every sibling wrapper of `raw` not yet visited.
    fn propagate(&self, raw: &RawNode, event: &SiblingEvent, visited: &mut Visited) {
        for wrapper in raw.wrappers() {
            if visited.iter().any(|(store, node)| *store == wrapper.store_id && *node == wrapper.node) {
                continue;
            }
            visited.push((wrapper.store_id, wrapper.node));
            match wrapper.store.upgrade() {
                Some(inner) => Store { inner }.receive(wrapper.node, raw, event, visited),
                None => {
                    warn!("store {}: sibling store {} was dropped", self.inner.id, wrapper.store_id);
                    raw.remove_wrapper(wrapper.store_id);
                }
            }
        }
    }

    /// Apply a sibling's write. The raw tree already holds the new value, so
    /// listeners are dispatched even though nothing looks different locally.
    fn receive(&self, id: NodeId, raw: &RawNode, event: &SiblingEvent, visited: &mut Visited) {
        let _op = self.begin();
        let (changes, opts) = {
            let mut state = self.inner.state.borrow_mut();
            if state.arena.get(id).is_none() {
                return;
            }
            match event {
                SiblingEvent::Set {
                    seg,
                    old,
                    new,
                    len_change,
                    opts,
                } => {
                    self.record_set(&mut state, id, raw, seg, old.as_ref(), new.as_ref());
                    let changes =
                        self.set_changes(&state, id, seg, old.as_ref(), new.as_ref(), *len_change, *opts, true);
                    (changes, *opts)
                }
                SiblingEvent::Splice { delta, opts } => {
                    self.record_splice(&mut state, id, raw, delta);
                    (self.splice_changes(&state, id, raw, delta, *opts, true), *opts)
                }
            }
        };
        trace!("store {}: mirrored sibling write on {:?}", self.inner.id, raw.id());
        self.propagate(raw, event, visited);
        if opts.notify {
            self.dispatch(changes);
        }
    }

    fn begin(&self) -> Operation<'_> {
        self.inner.depth.set(self.inner.depth.get() + 1);
        Operation { store: self }
    }

    /// Run matching listeners for each change, in order. No store borrow is
    /// held while a callback runs. A listener that fails or panics is logged
    /// and the remaining listeners still run.
    fn dispatch(&self, changes: Vec<Change>) {
        for change in changes {
            let entries = self.inner.registry.borrow().matching(change.path.segments());
            for entry in entries {
                trace!("store {}: {} -> listener {:?}", self.inner.id, change.path, entry.id);
                match catch_unwind(AssertUnwindSafe(|| (entry.callback)(&change))) {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => error!(
                        "store {}: listener '{}' failed on {}: {err}",
                        self.inner.id, entry.pattern, change.path
                    ),
                    Err(payload) => {
                        let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                            (*s).to_string()
                        } else if let Some(s) = payload.downcast_ref::<String>() {
                            s.clone()
                        } else {
                            "unknown panic".to_string()
                        };
                        error!(
                            "store {}: listener '{}' panicked on {}: {msg}",
                            self.inner.id, entry.pattern, change.path
                        );
                    }
                }
            }
        }
    }

    /// Remove orphans until none is left that only the store arenas hold.
    /// Pruning a node can release its children, hence the loop.
    fn sweep(&self) {
        if !self.inner.prune_orphans {
            self.inner.state.borrow_mut().arena.keep_orphans();
            return;
        }
        let mut pruned = 0;
        loop {
            let removed = self.inner.state.borrow_mut().arena.sweep();
            if removed.is_empty() {
                break;
            }
            pruned += removed.len();
            for raw in removed {
                raw.remove_wrapper(self.inner.id);
            }
        }
        if pruned > 0 {
            debug!("store {}: pruned {pruned} unreachable node(s)", self.inner.id);
        }
    }
}

/// Handle to one observed map or sequence.
///
/// All mutation of the observed tree goes through these methods; each one is
/// a write-through to the raw tree followed by listener dispatch.
#[derive(Clone)]
pub struct Node {
    store: Store,
    id: NodeId,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.store.inner, &other.store.inner) && self.id == other.id
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("store", &self.store.inner.id)
            .field("id", &self.id)
            .finish()
    }
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The wrapped raw node.
    pub fn raw(&self) -> StoreResult<RawNode> {
        self.store.raw_of(self.id)
    }

    /// Every path currently reaching this node.
    pub fn aliases(&self) -> AliasSet {
        self.store
            .inner
            .state
            .borrow()
            .arena
            .get(self.id)
            .map(|n| n.aliases.clone())
            .unwrap_or_default()
    }

    /// Whether the node still belongs to its store.
    pub fn is_live(&self) -> bool {
        self.store.inner.state.borrow().arena.get(self.id).is_some()
    }

    pub fn is_seq(&self) -> bool {
        self.raw().is_ok_and(|r| r.is_seq())
    }

    pub fn len(&self) -> usize {
        self.raw().map_or(0, |r| r.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read one child.
    pub fn get(&self, key: impl Into<Seg>) -> Option<Value> {
        let raw = self.raw().ok()?;
        let child = raw.get(&key.into())?;
        let state = self.store.inner.state.borrow();
        Some(self.store.value_of(&state, &child))
    }

    /// Keys of a map, or indices of a sequence.
    pub fn keys(&self) -> Vec<Seg> {
        let Ok(raw) = self.raw() else {
            return Vec::new();
        };
        match &*raw.data() {
            RawData::Map(m) => m.keys().map(|k| Seg::Key(k.clone())).collect(),
            RawData::Seq(v) => (0..v.len()).map(Seg::Index).collect(),
        }
    }

    /// Assign `value` at `key`. Writing a value identical to the current one
    /// is a no-op.
    pub fn set(&self, key: impl Into<Seg>, value: impl Into<Raw>) -> StoreResult<()> {
        self.set_with(key, value, WriteOptions::default())
    }

    pub fn set_with(
        &self,
        key: impl Into<Seg>,
        value: impl Into<Raw>,
        opts: WriteOptions,
    ) -> StoreResult<()> {
        self.store.write(self.id, key.into(), Some(value.into()), opts)
    }

    /// Remove a map key. Returns the removed value.
    pub fn delete(&self, key: impl Into<Seg>) -> StoreResult<Option<Raw>> {
        let key = key.into();
        let old = self.raw()?.get(&key);
        self.store.write(self.id, key, None, WriteOptions::default())?;
        Ok(old)
    }

    /// Sequence splice. Returns the removed raw values.
    pub fn splice(
        &self,
        start: usize,
        delete_count: usize,
        items: Vec<Raw>,
    ) -> StoreResult<Vec<Raw>> {
        self.store
            .splice(self.id, start, delete_count, items, WriteOptions::default())
    }

    pub fn splice_with(
        &self,
        start: usize,
        delete_count: usize,
        items: Vec<Raw>,
        opts: WriteOptions,
    ) -> StoreResult<Vec<Raw>> {
        self.store.splice(self.id, start, delete_count, items, opts)
    }

    /// Append one item. Returns the new length.
    pub fn push(&self, value: impl Into<Raw>) -> StoreResult<usize> {
        let len = self.len();
        self.splice(len, 0, vec![value.into()])?;
        Ok(self.len())
    }

    pub fn pop(&self) -> StoreResult<Option<Raw>> {
        let len = self.len();
        if len == 0 {
            self.require_seq()?;
            return Ok(None);
        }
        Ok(self.splice(len - 1, 1, Vec::new())?.pop())
    }

    pub fn insert(&self, index: usize, value: impl Into<Raw>) -> StoreResult<()> {
        let len = self.len();
        if index > len {
            return Err(StoreError::IndexOutOfBounds { index, len });
        }
        self.splice(index, 0, vec![value.into()])?;
        Ok(())
    }

    pub fn remove(&self, index: usize) -> StoreResult<Raw> {
        let len = self.len();
        if index >= len {
            return Err(StoreError::IndexOutOfBounds { index, len });
        }
        self.splice(index, 1, Vec::new())?
            .pop()
            .ok_or(StoreError::IndexOutOfBounds { index, len })
    }

    /// Prepend items. Returns the new length.
    pub fn unshift(&self, items: Vec<Raw>) -> StoreResult<usize> {
        self.splice(0, 0, items)?;
        Ok(self.len())
    }

    /// Remove the first item.
    pub fn shift(&self) -> StoreResult<Option<Raw>> {
        if self.is_empty() {
            self.require_seq()?;
            return Ok(None);
        }
        Ok(self.splice(0, 1, Vec::new())?.pop())
    }

    /// Shorten the sequence to `len` items.
    pub fn truncate(&self, len: usize) -> StoreResult<Vec<Raw>> {
        self.require_seq()?;
        let current = self.len();
        if len >= current {
            return Ok(Vec::new());
        }
        self.splice(len, current - len, Vec::new())
    }

    fn require_seq(&self) -> StoreResult<()> {
        if self.raw()?.is_seq() {
            Ok(())
        } else {
            Err(StoreError::NotASequence {
                path: self.store.describe(self.id),
            })
        }
    }

    /// Register a listener relative to this node's first path.
    pub fn add_listener(
        &self,
        pattern: &str,
        callback: impl Fn(&Change) -> ListenerResult + 'static,
    ) -> StoreResult<ListenerId> {
        let full = self.absolute_pattern(pattern)?;
        Ok(self.store.add_listener(&full, callback))
    }

    pub fn remove_listener(&self, pattern: &str, id: ListenerId) -> StoreResult<bool> {
        let full = self.absolute_pattern(pattern)?;
        Ok(self.store.remove_listener(&full, id))
    }

    fn absolute_pattern(&self, pattern: &str) -> StoreResult<String> {
        let aliases = self.aliases();
        let prefix = aliases.primary().ok_or(StoreError::DetachedNode)?.to_string();
        Ok(match (prefix.is_empty(), pattern.is_empty()) {
            (true, _) => pattern.to_string(),
            (false, true) => prefix,
            (false, false) => format!("{prefix}.{pattern}"),
        })
    }

    pub fn to_json(&self) -> Json {
        self.raw().map_or(Json::Null, |r| r.to_json())
    }
}
