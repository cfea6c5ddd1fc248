//! Two stores over the same data stay in sync.
//!
//! The settings object is wrapped by an app-wide store and by a panel-local
//! store rooted at the settings themselves. A write through either one is
//! seen by listeners on both.

use pathwatch::{Raw, Store};
use serde_json::json;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let Raw::Node(data) = Raw::from(json!({"settings": {"theme": "light", "size": 12}})) else {
        return Err("expected an object".into());
    };
    let app = Store::new(data);
    let settings = app
        .get("settings")
        .and_then(|v| v.as_node().cloned())
        .ok_or("settings missing")?;
    let panel = Store::new(settings.raw()?);

    app.add_listener("settings.*", |change| {
        let origin = if change.from_sibling { "panel" } else { "app" };
        println!("app sees {} = {:?} (written by {origin})", change.path, change.new_value);
        Ok(())
    });
    panel.add_listener("*", |change| {
        let origin = if change.from_sibling { "app" } else { "panel" };
        println!("panel sees {} = {:?} (written by {origin})", change.path, change.new_value);
        Ok(())
    });

    settings.set("theme", "dark")?;
    panel.root().set("size", 14)?;

    println!("{}", app.to_json());
    Ok(())
}
