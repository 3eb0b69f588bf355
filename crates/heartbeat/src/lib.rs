//! Heartbeat service: health beacon plus periodic world-model refresh

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use nodewarden_agent::WorldModel;
use nodewarden_bridge::TopicBridge;
use nodewarden_config::HeartbeatConfig;

/// Node name the agent reports health under
pub const AGENT_NODE: &str = "nodewarden-agent";

/// Publishes the agent's health beacon every `interval_secs` and refreshes
/// the world model every `refresh_secs`
pub struct HeartbeatService {
    bridge: Arc<TopicBridge>,
    world: Arc<WorldModel>,
    interval: Duration,
    refresh: Duration,
    enabled: bool,
    beats: AtomicU64,
    refreshes: AtomicU64,
}

impl HeartbeatService {
    pub fn new(bridge: Arc<TopicBridge>, world: Arc<WorldModel>, config: &HeartbeatConfig) -> Self {
        Self {
            bridge,
            world,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            refresh: Duration::from_secs(config.refresh_secs),
            enabled: config.enabled,
            beats: AtomicU64::new(0),
            refreshes: AtomicU64::new(0),
        }
    }

    /// Beacons published so far
    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::Relaxed)
    }

    /// World-model refreshes so far
    pub fn refreshes(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        if !self.enabled {
            info!("Heartbeat service disabled");
            return;
        }

        info!(
            "Heartbeat service started (beacon every {}s, refresh every {}s)",
            self.interval.as_secs(),
            self.refresh.as_secs()
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_refresh: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.bridge.publish_health(AGENT_NODE).await {
                Ok(()) => {
                    self.beats.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => warn!("Heartbeat publish failed: {}", e),
            }

            if last_refresh.map_or(true, |at| at.elapsed() >= self.refresh) {
                debug!("Heartbeat: refreshing world model");
                self.world.refresh().await;
                self.refreshes.fetch_add(1, Ordering::Relaxed);
                last_refresh = Some(Instant::now());
            }
        }

        info!("Heartbeat service stopped");
    }
}
