//! Per-node bookkeeping of every path through which a node is reachable.
//!
//! Observed nodes live in a slot arena keyed by [`NodeId`]. Each node owns an
//! [`AliasSet`]: the multiset of root paths that currently reach it. The same
//! raw object pushed twice into one sequence has two entries.

use slotmap::{SlotMap, new_key_type};
use std::collections::HashMap;

use crate::cache::{FlatCache, Slot};
use crate::path::Path;
use crate::raw::{RawId, RawNode};

new_key_type! {
    /// Arena key of an observed node within one store.
    pub struct NodeId;
}

/// Every path through which one node is reachable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AliasSet(Vec<Path>);

impl AliasSet {
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.0.contains(path)
    }

    /// The first path the node was reached by, if any.
    pub fn primary(&self) -> Option<&Path> {
        self.0.first()
    }

    /// Paths in sorted order, for comparisons.
    pub fn sorted(&self) -> Vec<Path> {
        let mut paths = self.0.clone();
        paths.sort();
        paths
    }

    fn push(&mut self, path: Path) {
        self.0.push(path);
    }

    fn remove_one(&mut self, path: &Path) -> bool {
        match self.0.iter().position(|p| p == path) {
            Some(i) => {
                self.0.remove(i);
                true
            }
            None => false,
        }
    }

    fn replace(&mut self, old: &Path, new: Path) -> bool {
        match self.0.iter_mut().find(|p| *p == old) {
            Some(p) => {
                *p = new;
                true
            }
            None => false,
        }
    }
}

#[derive(Debug)]
pub(crate) struct Observed {
    pub(crate) raw: RawNode,
    pub(crate) aliases: AliasSet,
}

/// Node storage plus the alias operations the store drives.
#[derive(Debug, Default)]
pub(crate) struct Arena {
    nodes: SlotMap<NodeId, Observed>,
    by_raw: HashMap<RawId, NodeId>,
    orphans: Vec<NodeId>,
}

impl Arena {
    pub(crate) fn lookup(&self, raw: &RawNode) -> Option<NodeId> {
        self.by_raw.get(&raw.id()).copied()
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Observed> {
        self.nodes.get(id)
    }

    pub(crate) fn raw(&self, id: NodeId) -> Option<RawNode> {
        self.nodes.get(id).map(|n| n.raw.clone())
    }

    pub(crate) fn aliases(&self, id: NodeId) -> Vec<Path> {
        self.nodes
            .get(id)
            .map(|n| n.aliases.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn raws(&self) -> impl Iterator<Item = &RawNode> {
        self.nodes.values().map(|n| &n.raw)
    }

    /// Register a fresh wrapper with no alias yet.
    pub(crate) fn insert(&mut self, raw: RawNode) -> NodeId {
        let raw_id = raw.id();
        let id = self.nodes.insert(Observed {
            raw,
            aliases: AliasSet::default(),
        });
        self.by_raw.insert(raw_id, id);
        id
    }

    /// Record one path on a freshly inserted node, without touching children.
    pub(crate) fn add_path(&mut self, id: NodeId, path: Path) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.aliases.push(path);
        }
    }

    /// Append `path` to the node and `path + key` to every observed
    /// descendant, transitively.
    pub(crate) fn attach(&mut self, id: NodeId, path: Path, cache: &mut FlatCache) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        node.aliases.push(path.clone());
        let raw = node.raw.clone();
        for (seg, child_raw) in raw.child_nodes() {
            if let Some(child) = self.lookup(&child_raw) {
                let child_path = path.child(seg);
                cache.set(child_path.to_string(), Slot::Node(child));
                self.attach(child, child_path, cache);
            }
        }
    }

    /// Remove `path` from the node and the matching descendant aliases,
    /// evicting the cached entries below it.
    pub(crate) fn detach(&mut self, id: NodeId, path: &Path, cache: &mut FlatCache) {
        cache.remove(&path.to_string());
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        if !node.aliases.remove_one(path) {
            return;
        }
        if node.aliases.is_empty() {
            self.orphans.push(id);
        }
        let raw = node.raw.clone();
        for (seg, child_raw) in raw.child_nodes() {
            if let Some(child) = self.lookup(&child_raw) {
                self.detach(child, &path.child(seg), cache);
            }
        }
    }

    /// Rewrite the alias `old` to `new`, and every descendant alias
    /// `old + key` to `new + key`.
    pub(crate) fn reindex(&mut self, id: NodeId, old: &Path, new: &Path, cache: &mut FlatCache) {
        cache.remove(&old.to_string());
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        if !node.aliases.replace(old, new.clone()) {
            return;
        }
        let raw = node.raw.clone();
        for (seg, child_raw) in raw.child_nodes() {
            if let Some(child) = self.lookup(&child_raw) {
                self.reindex(child, &old.child(seg.clone()), &new.child(seg), cache);
            }
        }
    }

    /// Drop every pending orphan that is still unreachable and that nothing
    /// outside the stores holds. Held orphans stay pending, so they keep
    /// their wrapper if they re-enter the tree. Returns the raw nodes whose
    /// wrappers were removed.
    pub(crate) fn sweep(&mut self) -> Vec<RawNode> {
        let mut removed = Vec::new();
        for id in std::mem::take(&mut self.orphans) {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            if !node.aliases.is_empty() {
                continue;
            }
            if node.raw.is_held_elsewhere() {
                if !self.orphans.contains(&id) {
                    self.orphans.push(id);
                }
                continue;
            }
            if let Some(node) = self.nodes.remove(id) {
                self.by_raw.remove(&node.raw.id());
                removed.push(node.raw);
            }
        }
        removed
    }

    /// Forget pending orphans without removing them.
    pub(crate) fn keep_orphans(&mut self) {
        self.orphans.clear();
    }
}
