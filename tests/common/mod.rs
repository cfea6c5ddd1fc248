#![allow(dead_code)]

use pathwatch::{Callback, Change, ListenerResult, Node, Store, Value};
use serde_json::{Value as Json, json};
use std::cell::RefCell;
use std::rc::Rc;

/// One dispatched change, flattened to JSON for easy assertions.
#[derive(Clone, Debug, PartialEq)]
pub struct Seen {
    pub path: String,
    pub old: Option<Json>,
    pub new: Option<Json>,
    pub from_sibling: bool,
    pub autobind: bool,
}

/// Collects every change delivered to the listeners it registers.
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Rc<RefCell<Vec<Seen>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Recorder::default()
    }

    pub fn listen(&self, store: &Store, pattern: &str) -> pathwatch::ListenerId {
        let seen = Rc::clone(&self.seen);
        store.add_listener(pattern, move |change: &Change| {
            seen.borrow_mut().push(Seen {
                path: change.path.to_string(),
                old: change.old_value.as_ref().map(Value::to_json),
                new: change.new_value.as_ref().map(Value::to_json),
                from_sibling: change.from_sibling,
                autobind: change.autobind,
            });
            Ok(())
        })
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.borrow().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.seen.borrow().iter().map(|s| s.path.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.seen.borrow().len()
    }

    pub fn clear(&self) {
        self.seen.borrow_mut().clear();
    }
}

pub fn user_store() -> Store {
    Store::from_json(json!({"user": {"name": "J", "age": 1}})).unwrap()
}

/// `{"items": [{"id": "A"}, {"id": "B"}, {"id": "C"}, {"id": "D"}]}`
pub fn items_store() -> Store {
    Store::from_json(json!({
        "items": [{"id": "A"}, {"id": "B"}, {"id": "C"}, {"id": "D"}]
    }))
    .unwrap()
}

pub fn node(store: &Store, path: &str) -> Node {
    store
        .get(path)
        .and_then(|v| v.as_node().cloned())
        .unwrap_or_else(|| panic!("no node at {path}"))
}

pub fn aliases(node: &Node) -> Vec<String> {
    node.aliases().sorted().iter().map(|p| p.to_string()).collect()
}

pub fn noop() -> Callback {
    Rc::new(|_: &Change| -> ListenerResult { Ok(()) })
}
