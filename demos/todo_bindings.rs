//! A todo list bound the way a UI layer would bind it.
//!
//! Extracts the paths a few display expressions depend on, subscribes to
//! them, then mutates the list and shows which bindings would re-render.

use pathwatch::{Raw, Store, extract_dependency_paths};
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::from_json(json!({
        "title": "Groceries",
        "todos": [
            {"text": "milk", "done": false},
            {"text": "eggs", "done": true},
        ]
    }))?;

    let bindings = [
        "title",
        "todos.filter(t => !t.done).length",
        "todos.length",
    ];
    for expr in bindings {
        for path in extract_dependency_paths(expr) {
            let label = expr.to_string();
            store.add_listener(&path, move |change| {
                println!("[{label}] re-render: {} changed", change.path);
                Ok(())
            });
        }
    }

    let todos = store
        .get("todos")
        .and_then(|v| v.as_node().cloned())
        .ok_or("todos missing")?;

    println!("-- add bread");
    todos.push(Raw::from(json!({"text": "bread", "done": false})))?;

    println!("-- finish milk");
    let milk = todos
        .get(0)
        .and_then(|v| v.as_node().cloned())
        .ok_or("milk missing")?;
    milk.set("done", true)?;

    println!("-- drop eggs");
    todos.remove(1)?;
    println!("milk is still at {:?}", milk.aliases().primary().map(|p| p.to_string()));

    println!("-- rename");
    store.root().set("title", "Shopping")?;

    println!("{}", serde_json::to_string_pretty(&store.to_json())?);
    Ok(())
}
