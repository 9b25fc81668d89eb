//! In-process use of the event relay: listeners, failure handling, removal.
//!
//! Run with `cargo run --example local_relay`.

use fleetvisor::{ERROR_EVENT, EventRelay};
use serde_json::json;

fn main() {
    fleetvisor::init_tracing();

    let relay = EventRelay::local("demo");

    relay.on(ERROR_EVENT, |ev| {
        println!("[error] {} (from {})", ev.payload["error"], ev.payload["eventType"]);
        Ok(())
    });

    let greeter = relay.on("user:signup", |ev| {
        println!("[signup] welcome {}", ev.payload["name"]);
        Ok(())
    });
    relay.on("user:signup", |ev| {
        if ev.payload["name"] == "mallory" {
            anyhow::bail!("blocked user");
        }
        Ok(())
    });

    relay.emit("user:signup", json!({ "name": "alice" }));
    relay.emit("user:signup", json!({ "name": "mallory" }));

    relay.off(greeter);
    let ev = relay.emit("user:signup", json!({ "name": "bob" }));
    println!("[done] last event {}", ev.event_id);
}
