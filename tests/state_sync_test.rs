//! End-to-end state mirroring between a producer host and panel mirrors.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use panelbus::channel::memory;
use panelbus::{
    BridgeOptions, ClientBridge, Collector, ServerBridge, ServerOptions, SharedState, StateHost,
    StateMirror,
};

const WAIT: Duration = Duration::from_secs(5);

struct Producer {
    bridge: ServerBridge,
    host: std::sync::Arc<StateHost>,
    collector: Collector<()>,
}

fn producer() -> Producer {
    let collector = Collector::new(());
    let bridge = ServerBridge::new(collector.caller(), ServerOptions::default());
    let host = StateHost::new(bridge.clone());
    host.host(
        "ui",
        SharedState::with_patches(json!({"tab": "assets", "count": 0})),
    );
    Producer {
        bridge,
        host,
        collector,
    }
}

/// Connect one panel over an in-process channel pair.
async fn connect_panel(producer: &Producer) -> (std::sync::Arc<StateMirror>, SharedState<Value>) {
    let (server_side, panel_side) = memory::pair();
    let host = producer.host.clone();
    let shared = producer.collector.caller();
    producer
        .bridge
        .add_channel_with(server_side, Default::default(), |info| {
            host.caller_for(info.session, shared)
        });

    let panel_collector = Collector::new(());
    let bridge = ClientBridge::attach(
        panel_side,
        panel_collector.caller(),
        BridgeOptions::default(),
    );
    let mirror = StateMirror::new(bridge, &panel_collector);
    let state = tokio::time::timeout(WAIT, mirror.attach("ui"))
        .await
        .expect("attach timed out")
        .unwrap();
    (mirror, state)
}

fn updates_of(state: &SharedState<Value>) -> mpsc::UnboundedReceiver<Value> {
    let (tx, rx) = mpsc::unbounded_channel();
    state.on_updated(move |snapshot, _, _| {
        let _ = tx.send((**snapshot).clone());
    });
    rx
}

async fn next_update(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("no update arrived")
        .expect("update stream ended")
}

#[tokio::test]
async fn test_attach_seeds_the_full_snapshot() {
    let producer = producer();
    let (_mirror, state) = connect_panel(&producer).await;
    assert_eq!(*state.value(), json!({"tab": "assets", "count": 0}));
}

#[tokio::test]
async fn test_producer_mutation_reaches_subscribed_panels() {
    let producer = producer();
    let (_m1, panel1) = connect_panel(&producer).await;
    let (_m2, panel2) = connect_panel(&producer).await;
    let mut updates1 = updates_of(&panel1);
    let mut updates2 = updates_of(&panel2);

    let hosted = producer.host.state("ui").unwrap();
    hosted.mutate(
        |state| state["count"] = json!(7),
        Some("sync-producer-1"),
    );

    assert_eq!(next_update(&mut updates1).await["count"], json!(7));
    assert_eq!(next_update(&mut updates2).await["count"], json!(7));
}

#[tokio::test]
async fn test_panel_mutation_reaches_producer_and_other_panels() {
    let producer = producer();
    let (_m1, panel1) = connect_panel(&producer).await;
    let (_m2, panel2) = connect_panel(&producer).await;
    let mut updates2 = updates_of(&panel2);

    panel1.mutate(
        |state| state["tab"] = json!("network"),
        Some("sync-panel-1"),
    );

    assert_eq!(next_update(&mut updates2).await["tab"], json!("network"));

    let hosted = producer.host.state("ui").unwrap();
    tokio::time::timeout(WAIT, async {
        while hosted.value()["tab"] != json!("network") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("producer state did not converge");
}

#[tokio::test]
async fn test_no_echo_storm_after_round_trips() {
    let producer = producer();
    let (_m1, panel) = connect_panel(&producer).await;
    let mut panel_updates = updates_of(&panel);

    let hosted = producer.host.state("ui").unwrap();

    // Alternate mutations from both ends
    hosted.mutate(|state| state["count"] = json!(1), Some("sync-a"));
    next_update(&mut panel_updates).await;
    panel.mutate(|state| state["count"] = json!(2), Some("sync-b"));
    // The panel's own mutation fires its subscribers once
    next_update(&mut panel_updates).await;

    tokio::time::timeout(WAIT, async {
        while hosted.value()["count"] != json!(2) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("producer state did not converge");

    // Let any echo settle, then verify silence: one update per mutation,
    // nothing bouncing back and forth
    let extra = tokio::time::timeout(Duration::from_millis(300), panel_updates.recv()).await;
    assert!(extra.is_err(), "unexpected extra update: {extra:?}");
    assert_eq!(hosted.value()["count"], json!(2));
    assert_eq!(panel.value()["count"], json!(2));
}

#[tokio::test]
async fn test_attach_unknown_key_fails_loudly() {
    let producer = producer();
    let (server_side, panel_side) = memory::pair();
    let host = producer.host.clone();
    let shared = producer.collector.caller();
    producer
        .bridge
        .add_channel_with(server_side, Default::default(), |info| {
            host.caller_for(info.session, shared)
        });

    let panel_collector = Collector::new(());
    let bridge = ClientBridge::attach(
        panel_side,
        panel_collector.caller(),
        BridgeOptions::default(),
    );
    let mirror = StateMirror::new(bridge, &panel_collector);

    let err = tokio::time::timeout(WAIT, mirror.attach("missing"))
        .await
        .expect("attach timed out")
        .unwrap_err();
    assert!(err.to_string().contains("missing"));
}
