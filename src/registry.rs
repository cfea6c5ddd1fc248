//! Subscription patterns and their callbacks.
//!
//! A pattern is a dotted path whose segments may be `*`, matching exactly one
//! concrete segment. Patterns only match paths of the same length.

use indexmap::IndexMap;
use std::fmt;
use std::rc::Rc;

use crate::error::ListenerResult;
use crate::path::{Seg, canonical_segment};
use crate::store::Change;

/// A change callback. Errors are logged by the store and never abort dispatch.
pub type Callback = Rc<dyn Fn(&Change) -> ListenerResult>;

/// Handle returned by registration, used to remove the listener again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// One callback matched for a concrete path.
#[derive(Clone)]
pub struct ListenerEntry {
    pub id: ListenerId,
    /// The pattern the callback was registered under.
    pub pattern: String,
    pub callback: Callback,
}

impl fmt::Debug for ListenerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerEntry")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .finish()
    }
}

/// How [`ListenerRegistry::matching`] finds patterns for a concrete path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MatchStrategy {
    /// Pick per lookup: scan when `2^n` exceeds the number of registered
    /// patterns, probe otherwise.
    #[default]
    Adaptive,
    /// Test every registered pattern of the right length.
    Scan,
    /// Materialize all `2^n` wildcard variants and look each one up.
    Probe,
}

/// The store's view of a listener registry. Injected through
/// [`StoreBuilder::registry`](crate::StoreBuilder::registry).
pub trait Registry {
    /// Register `callback` under `pattern`. Several callbacks may share a pattern.
    fn add(&mut self, pattern: &str, callback: Callback) -> ListenerId;

    /// Remove one registration. Returns `false` if it was not present.
    fn remove(&mut self, pattern: &str, id: ListenerId) -> bool;

    /// Every entry whose pattern matches `path`, grouped by pattern in
    /// pattern registration order, callbacks in registration order.
    fn matching(&self, path: &[Seg]) -> Vec<ListenerEntry>;

    /// Number of distinct patterns with at least one callback.
    fn pattern_count(&self) -> usize;
}

struct PatternEntry {
    segments: Vec<String>,
    listeners: IndexMap<ListenerId, Callback>,
}

/// Default registry: pattern string → ordered callbacks, with a
/// load-adaptive lookup.
///
/// # Examples
///
/// ```
/// use pathwatch::{Change, ListenerRegistry, ListenerResult, Registry, Seg};
/// use std::rc::Rc;
///
/// let mut registry = ListenerRegistry::new();
/// registry.add("user.*", Rc::new(|_: &Change| -> ListenerResult { Ok(()) }));
/// registry.add("user.name", Rc::new(|_: &Change| -> ListenerResult { Ok(()) }));
///
/// let path = [Seg::from("user"), Seg::from("name")];
/// assert_eq!(registry.matching(&path).len(), 2);
/// ```
#[derive(Default)]
pub struct ListenerRegistry {
    patterns: IndexMap<String, PatternEntry>,
    next_id: u64,
    strategy: MatchStrategy,
}

fn canonical_pattern(pattern: &str) -> Vec<String> {
    if pattern.is_empty() {
        return Vec::new();
    }
    pattern
        .split('.')
        .map(|s| canonical_segment(s).into_owned())
        .collect()
}

fn concrete_segments(path: &[Seg]) -> Vec<String> {
    path.iter()
        .map(|s| canonical_segment(&s.as_key()).into_owned())
        .collect()
}

impl ListenerRegistry {
    pub fn new() -> Self {
        ListenerRegistry::default()
    }

    pub fn with_strategy(strategy: MatchStrategy) -> Self {
        ListenerRegistry {
            strategy,
            ..ListenerRegistry::default()
        }
    }

    /// Whether a lookup for a path of `n` segments would scan the registry.
    fn should_scan(&self, n: usize) -> bool {
        match self.strategy {
            MatchStrategy::Scan => true,
            MatchStrategy::Probe => n >= usize::BITS as usize,
            MatchStrategy::Adaptive => match u32::try_from(n).ok().and_then(|n| 1usize.checked_shl(n)) {
                Some(total) => total > self.patterns.len(),
                None => true,
            },
        }
    }

    fn scan(&self, concrete: &[String]) -> Vec<usize> {
        self.patterns
            .values()
            .enumerate()
            .filter(|(_, entry)| {
                entry.segments.len() == concrete.len()
                    && entry
                        .segments
                        .iter()
                        .zip(concrete)
                        .all(|(p, c)| p == "*" || p == c)
            })
            .map(|(i, _)| i)
            .collect()
    }

    fn probe(&self, concrete: &[String]) -> Vec<usize> {
        let n = concrete.len();
        let mut hits = Vec::new();
        for mask in 0usize..(1usize << n) {
            let mut variant = String::new();
            for (i, seg) in concrete.iter().enumerate() {
                if i > 0 {
                    variant.push('.');
                }
                if mask & (1 << i) != 0 {
                    variant.push('*');
                } else {
                    variant.push_str(seg);
                }
            }
            if let Some(index) = self.patterns.get_index_of(&variant) {
                hits.push(index);
            }
        }
        hits.sort_unstable();
        hits
    }
}

impl Registry for ListenerRegistry {
    fn add(&mut self, pattern: &str, callback: Callback) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        let segments = canonical_pattern(pattern);
        let key = segments.join(".");
        self.patterns
            .entry(key)
            .or_insert_with(|| PatternEntry {
                segments,
                listeners: IndexMap::new(),
            })
            .listeners
            .insert(id, callback);
        id
    }

    fn remove(&mut self, pattern: &str, id: ListenerId) -> bool {
        let key = canonical_pattern(pattern).join(".");
        let Some(entry) = self.patterns.get_mut(&key) else {
            return false;
        };
        let removed = entry.listeners.shift_remove(&id).is_some();
        if entry.listeners.is_empty() {
            self.patterns.shift_remove(&key);
        }
        removed
    }

    fn matching(&self, path: &[Seg]) -> Vec<ListenerEntry> {
        let concrete = concrete_segments(path);
        let hits = if self.should_scan(concrete.len()) {
            self.scan(&concrete)
        } else {
            self.probe(&concrete)
        };
        let mut out = Vec::new();
        for index in hits {
            if let Some((pattern, entry)) = self.patterns.get_index(index) {
                out.extend(entry.listeners.iter().map(|(id, cb)| ListenerEntry {
                    id: *id,
                    pattern: pattern.clone(),
                    callback: Rc::clone(cb),
                }));
            }
        }
        out
    }

    fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}
