//! Reactive state store with path-indexed change notification.

mod alias;
mod cache;
mod error;
pub mod expr;
pub mod path;
mod raw;
mod registry;
mod store;

pub use alias::{AliasSet, NodeId};
pub use error::{ListenerResult, StoreError, StoreResult};
pub use expr::{extract_dependency_paths, extract_expressions, template_dependency_paths};
pub use path::{Path, Seg, substitute_variable};
pub use raw::{Raw, RawData, RawId, RawNode, date_to_string};
pub use registry::{Callback, ListenerEntry, ListenerId, ListenerRegistry, MatchStrategy, Registry};
pub use store::{Change, LENGTH_KEY, Node, Store, StoreBuilder, Value, WriteOptions};
