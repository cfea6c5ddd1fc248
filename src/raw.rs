//! The caller-owned raw tree.
//!
//! Maps and sequences live behind shared [`RawNode`] handles so the same
//! sub-object can be reachable from several places, and so several stores can
//! wrap the same data. A store mutates raw nodes in place; the caller keeps
//! whatever handles it already had and sees the writes.

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use serde_json::{Number, Value as Json};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::path::Seg;
use crate::store::StoreInner;

static NEXT_RAW_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity of a raw map or sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawId(u64);

/// A value in the raw tree.
#[derive(Clone, Debug)]
pub enum Raw {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    /// A date. Normalized to its ISO-8601 string before it is stored.
    Date(DateTime<Utc>),
    /// A shared map or sequence.
    Node(RawNode),
}

/// Contents of a raw container.
#[derive(Clone, Debug)]
pub enum RawData {
    Map(IndexMap<String, Raw>),
    Seq(Vec<Raw>),
}

/// Shared handle to a raw map or sequence.
///
/// Cloning the handle shares the node; equality is identity.
#[derive(Clone)]
pub struct RawNode(Rc<RawCell>);

struct RawCell {
    id: RawId,
    data: RefCell<RawData>,
    wrappers: RefCell<Vec<Wrapper>>,
}

/// One store's wrapper around a raw node. The wrapper list of a raw node is
/// the sibling link table: every other entry is a sibling.
#[derive(Clone)]
pub(crate) struct Wrapper {
    pub(crate) store_id: u64,
    pub(crate) store: Weak<StoreInner>,
    pub(crate) node: crate::alias::NodeId,
}

impl RawNode {
    pub fn new(data: RawData) -> Self {
        RawNode(Rc::new(RawCell {
            id: RawId(NEXT_RAW_ID.fetch_add(1, Ordering::Relaxed)),
            data: RefCell::new(data),
            wrappers: RefCell::new(Vec::new()),
        }))
    }

    pub fn map() -> Self {
        RawNode::new(RawData::Map(IndexMap::new()))
    }

    pub fn seq() -> Self {
        RawNode::new(RawData::Seq(Vec::new()))
    }

    pub fn id(&self) -> RawId {
        self.0.id
    }

    pub fn is_seq(&self) -> bool {
        matches!(*self.0.data.borrow(), RawData::Seq(_))
    }

    pub fn data(&self) -> Ref<'_, RawData> {
        self.0.data.borrow()
    }

    pub(crate) fn data_mut(&self) -> RefMut<'_, RawData> {
        self.0.data.borrow_mut()
    }

    pub fn len(&self) -> usize {
        match &*self.data() {
            RawData::Map(m) => m.len(),
            RawData::Seq(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read one child. Sequences only answer numeric segments.
    pub fn get(&self, seg: &Seg) -> Option<Raw> {
        match &*self.data() {
            RawData::Map(m) => m.get(seg.as_key().as_ref()).cloned(),
            RawData::Seq(v) => seg.as_index().and_then(|i| v.get(i).cloned()),
        }
    }

    /// Every child that is itself a container, with the segment reaching it.
    pub(crate) fn child_nodes(&self) -> Vec<(Seg, RawNode)> {
        match &*self.data() {
            RawData::Map(m) => m
                .iter()
                .filter_map(|(k, v)| v.as_node().map(|n| (Seg::Key(k.clone()), n.clone())))
                .collect(),
            RawData::Seq(v) => v
                .iter()
                .enumerate()
                .filter_map(|(i, v)| v.as_node().map(|n| (Seg::Index(i), n.clone())))
                .collect(),
        }
    }

    /// Rewrite every date child into its string form.
    pub(crate) fn normalize_dates(&self) {
        match &mut *self.data_mut() {
            RawData::Map(m) => m.values_mut().for_each(Raw::normalize),
            RawData::Seq(v) => v.iter_mut().for_each(Raw::normalize),
        }
    }

    pub(crate) fn wrappers(&self) -> Vec<Wrapper> {
        self.0.wrappers.borrow().clone()
    }

    pub(crate) fn add_wrapper(&self, wrapper: Wrapper) {
        self.0.wrappers.borrow_mut().push(wrapper);
    }

    pub(crate) fn remove_wrapper(&self, store_id: u64) {
        self.0.wrappers.borrow_mut().retain(|w| w.store_id != store_id);
    }

    /// Whether something other than the wrapping stores holds this node: a
    /// raw parent, or a caller keeping a removed value.
    pub(crate) fn is_held_elsewhere(&self) -> bool {
        Rc::strong_count(&self.0) > self.0.wrappers.borrow().len()
    }

    pub fn to_json(&self) -> Json {
        match &*self.data() {
            RawData::Map(m) => Json::Object(m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()),
            RawData::Seq(v) => Json::Array(v.iter().map(Raw::to_json).collect()),
        }
    }
}

impl PartialEq for RawNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for RawNode {}

impl fmt::Debug for RawNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.data.try_borrow() {
            Ok(data) => f.debug_tuple("RawNode").field(&self.0.id).field(&*data).finish(),
            Err(_) => f.debug_tuple("RawNode").field(&self.0.id).finish(),
        }
    }
}

/// ISO-8601 form used for every date written into a tree.
pub fn date_to_string(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl Raw {
    pub fn as_node(&self) -> Option<&RawNode> {
        match self {
            Raw::Node(n) => Some(n),
            _ => None,
        }
    }

    fn normalize(&mut self) {
        if let Raw::Date(d) = self {
            *self = Raw::String(date_to_string(d));
        }
    }

    /// This value with dates turned into strings.
    pub(crate) fn normalized(self) -> Raw {
        match self {
            Raw::Date(d) => Raw::String(date_to_string(&d)),
            other => other,
        }
    }

    /// Identity equality: scalars by value, containers by node identity.
    pub fn same(&self, other: &Raw) -> bool {
        match (self, other) {
            (Raw::Null, Raw::Null) => true,
            (Raw::Bool(a), Raw::Bool(b)) => a == b,
            (Raw::Number(a), Raw::Number(b)) => a == b,
            (Raw::String(a), Raw::String(b)) => a == b,
            (Raw::Date(a), Raw::Date(b)) => a == b,
            (Raw::Node(a), Raw::Node(b)) => a == b,
            _ => false,
        }
    }

    pub fn to_json(&self) -> Json {
        match self {
            Raw::Null => Json::Null,
            Raw::Bool(b) => Json::Bool(*b),
            Raw::Number(n) => Json::Number(n.clone()),
            Raw::String(s) => Json::String(s.clone()),
            Raw::Date(d) => Json::String(date_to_string(d)),
            Raw::Node(n) => n.to_json(),
        }
    }
}

impl From<Json> for Raw {
    fn from(value: Json) -> Self {
        match value {
            Json::Null => Raw::Null,
            Json::Bool(b) => Raw::Bool(b),
            Json::Number(n) => Raw::Number(n),
            Json::String(s) => Raw::String(s),
            Json::Array(items) => Raw::Node(RawNode::new(RawData::Seq(
                items.into_iter().map(Raw::from).collect(),
            ))),
            Json::Object(map) => Raw::Node(RawNode::new(RawData::Map(
                map.into_iter().map(|(k, v)| (k, Raw::from(v))).collect(),
            ))),
        }
    }
}

impl From<RawNode> for Raw {
    fn from(node: RawNode) -> Self {
        Raw::Node(node)
    }
}

impl From<&str> for Raw {
    fn from(s: &str) -> Self {
        Raw::String(s.to_string())
    }
}

impl From<String> for Raw {
    fn from(s: String) -> Self {
        Raw::String(s)
    }
}

impl From<bool> for Raw {
    fn from(b: bool) -> Self {
        Raw::Bool(b)
    }
}

impl From<i64> for Raw {
    fn from(n: i64) -> Self {
        Raw::Number(n.into())
    }
}

impl From<i32> for Raw {
    fn from(n: i32) -> Self {
        Raw::Number(n.into())
    }
}

impl From<u64> for Raw {
    fn from(n: u64) -> Self {
        Raw::Number(n.into())
    }
}

impl From<f64> for Raw {
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Raw::Null, Raw::Number)
    }
}

impl From<DateTime<Utc>> for Raw {
    fn from(d: DateTime<Utc>) -> Self {
        Raw::Date(d)
    }
}
