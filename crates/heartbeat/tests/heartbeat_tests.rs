//! Heartbeat service tests on a paused clock

use nodewarden_agent::WorldModel;
use nodewarden_bridge::{LocalTransport, QueryReply, TopicBridge, TopicScope};
use nodewarden_config::HeartbeatConfig;
use nodewarden_heartbeat::{HeartbeatService, AGENT_NODE};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_ready, task};
use tokio_util::sync::CancellationToken;

struct Setup {
    bridge: Arc<TopicBridge>,
    world: Arc<WorldModel>,
    node_queries: Arc<AtomicUsize>,
}

fn setup() -> Setup {
    let transport = Arc::new(LocalTransport::new());
    let node_queries = Arc::new(AtomicUsize::new(0));
    let counter = node_queries.clone();
    transport.declare_queryable("nodewarden/m1/daemon/api/nodes", move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        QueryReply::Ok(br#"[{"name": "camera", "status": 2, "health_status": 1}]"#.to_vec())
    });
    let bridge = Arc::new(TopicBridge::new(transport, TopicScope::new("local", "m1")));
    let world = Arc::new(WorldModel::new(bridge.clone()));
    Setup {
        bridge,
        world,
        node_queries,
    }
}

// ============================================================================
// Scheduling
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_beacon_and_refresh_cadence() {
    let setup = setup();
    let health_topic = format!("health/{AGENT_NODE}");
    setup.bridge.subscribe(&health_topic, None).await.unwrap();

    let service = Arc::new(HeartbeatService::new(
        setup.bridge.clone(),
        setup.world.clone(),
        &HeartbeatConfig::default(),
    ));
    let token = CancellationToken::new();
    let handle = tokio::spawn({
        let service = service.clone();
        let token = token.clone();
        async move { service.run(token).await }
    });

    // ticks at 0s, 5s and 10s; refresh only on the first
    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(service.beats(), 3);
    assert_eq!(service.refreshes(), 1);
    assert_eq!(setup.node_queries.load(Ordering::SeqCst), 1);
    assert!(setup.world.get_node("camera").is_some());

    let latest = setup.bridge.get_latest(&health_topic).unwrap();
    assert_eq!(latest.payload, AGENT_NODE.as_bytes());

    // the 30s tick refreshes again
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(service.beats(), 7);
    assert_eq!(service.refreshes(), 2);

    token.cancel();
    handle.await.unwrap();
    let beats = service.beats();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(service.beats(), beats);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_service_returns_immediately() {
    let setup = setup();
    let config = HeartbeatConfig {
        enabled: false,
        ..HeartbeatConfig::default()
    };
    let service = HeartbeatService::new(setup.bridge.clone(), setup.world.clone(), &config);

    let mut run = task::spawn(service.run(CancellationToken::new()));
    assert_ready!(run.poll());
    drop(run);
    assert_eq!(service.beats(), 0);
    assert_eq!(setup.node_queries.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_first_tick_publishes_nothing() {
    let setup = setup();
    let service = HeartbeatService::new(
        setup.bridge.clone(),
        setup.world.clone(),
        &HeartbeatConfig::default(),
    );
    let token = CancellationToken::new();
    token.cancel();

    // a cancelled token wins over the immediately-ready first tick
    let mut run = task::spawn(service.run(token));
    assert_ready!(run.poll());
    drop(run);
    assert_eq!(service.beats(), 0);
}
