//! Wiring: builds every component from the loaded config

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use nodewarden_agent::{register_core_capabilities, Agent, CapabilityRegistry, ContextBuilder, ToolLoop, WorldModel};
use nodewarden_bridge::{DecoderSet, LocalTransport, TopicBridge, TopicScope};
use nodewarden_capture::{register_capture_capabilities, CaptureRouter};
use nodewarden_config::paths::{captures_path, conversations_dir, memory_path, watchers_path};
use nodewarden_config::Config;
use nodewarden_heartbeat::HeartbeatService;
use nodewarden_provider::{OpenAiCompatProvider, Provider};
use nodewarden_session::{ConversationStore, MemoryNotes};
use nodewarden_watcher::{register_watcher_capabilities, WatcherScheduler, WatcherStore};

/// Every long-lived component of a running agent
pub struct Runtime {
    pub bridge: Arc<TopicBridge>,
    pub world: Arc<WorldModel>,
    pub registry: Arc<CapabilityRegistry>,
    pub scheduler: Arc<WatcherScheduler>,
    pub captures: Arc<CaptureRouter>,
    pub agent: Agent,
    pub heartbeat: HeartbeatService,
    pub provider_ready: bool,
}

impl Runtime {
    /// Build the component graph over the in-process transport
    pub async fn build(config: &Config, agent_dir: PathBuf) -> Runtime {
        let scope = TopicScope::new(
            config.transport.resolved_scope(),
            config.transport.resolved_machine_id(),
        );
        let bridge = Arc::new(
            TopicBridge::new(Arc::new(LocalTransport::new()), scope)
                .with_decoders(DecoderSet::new(config.topics.clone()))
                .with_query_timeout(Duration::from_secs(config.transport.query_timeout_secs)),
        );
        let world = Arc::new(WorldModel::new(bridge.clone()));
        let memory = Arc::new(MemoryNotes::new(memory_path(&agent_dir)));

        let registry = Arc::new(CapabilityRegistry::new());
        register_core_capabilities(
            &registry,
            bridge.clone(),
            world.clone(),
            memory.clone(),
            &config.safety,
        );

        let context = Arc::new(
            ContextBuilder::new(&agent_dir, world.clone(), registry.clone())
                .with_memory(memory)
                .with_safety(
                    config.safety.clone(),
                    config.watchers.default_max_actions_per_hour,
                ),
        );

        let api_key = config.api_key().unwrap_or_default();
        let provider = OpenAiCompatProvider::new(
            api_key.clone(),
            config.provider.api_base.clone(),
            config.provider.model.clone(),
        );
        let provider_ready = provider.is_configured();
        let eval_provider = OpenAiCompatProvider::new(
            api_key,
            config.watcher_api_base(),
            config.watcher_model(),
        );

        let scheduler = WatcherScheduler::open(
            bridge.clone(),
            ToolLoop::new(
                Arc::new(eval_provider),
                registry.clone(),
                config.watcher_model(),
                config.watchers.max_turns,
            ),
            context.clone(),
            WatcherStore::new(watchers_path(&agent_dir)),
            &config.watchers,
        )
        .await;
        register_watcher_capabilities(&registry, &scheduler);

        let captures = CaptureRouter::open(
            bridge.clone(),
            captures_path(&agent_dir),
            &config.safety.allowed_data_paths,
        )
        .await;
        register_capture_capabilities(&registry, &captures);

        context.add_section(scheduler.clone());
        context.add_section(captures.clone());

        let tool_loop = ToolLoop::new(
            Arc::new(provider),
            registry.clone(),
            config.provider.model.clone(),
            config.agent.max_turns,
        )
        .with_sampling(config.provider.max_tokens, config.provider.temperature);
        let mut agent = Agent::new(
            tool_loop,
            context,
            ConversationStore::new(conversations_dir(&agent_dir)),
        );
        agent.set_history_messages(config.agent.history_messages);

        let heartbeat = HeartbeatService::new(bridge.clone(), world.clone(), &config.heartbeat);

        info!("Runtime ready with {} capabilities", registry.len());
        Runtime {
            bridge,
            world,
            registry,
            scheduler,
            captures,
            agent,
            heartbeat,
            provider_ready,
        }
    }
}
