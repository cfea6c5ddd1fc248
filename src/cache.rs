use std::collections::HashMap;

use crate::alias::NodeId;
use crate::raw::Raw;

/// A cached resolution: an observed node or a scalar.
#[derive(Clone, Debug)]
pub(crate) enum Slot {
    Node(NodeId),
    Scalar(Raw),
}

/// Dotted path → current value, used to skip root-to-leaf walks.
///
/// Replacing or evicting a path also evicts every entry below it.
#[derive(Debug, Default)]
pub(crate) struct FlatCache {
    entries: HashMap<String, Slot>,
}

fn is_below(key: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    key.len() > prefix.len() && key.starts_with(prefix) && key.as_bytes()[prefix.len()] == b'.'
}

impl FlatCache {
    pub(crate) fn get(&self, path: &str) -> Option<&Slot> {
        self.entries.get(path)
    }

    pub(crate) fn set(&mut self, path: String, slot: Slot) {
        self.evict_below(&path);
        self.entries.insert(path, slot);
    }

    /// Remove `path` and everything below it.
    pub(crate) fn remove(&mut self, path: &str) {
        self.entries.remove(path);
        self.evict_below(path);
    }

    fn evict_below(&mut self, path: &str) {
        self.entries.retain(|k, _| !is_below(k, path));
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
