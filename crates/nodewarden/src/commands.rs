//! NodeWarden command implementations

use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use nodewarden_capture::Capture;
use nodewarden_config::paths::{captures_path, memory_path, watchers_path};
use nodewarden_config::{self, Config};
use nodewarden_watcher::{NewWatcher, WatcherStore};

use crate::runtime::Runtime;

const IDENTITY_FILE: &str = "SOUL.md";

async fn load_runtime() -> Result<Runtime> {
    let config = Config::load()
        .await
        .context("Failed to load ~/.nodewarden/config.json")?;
    Ok(Runtime::build(&config, nodewarden_config::agent_dir()).await)
}

/// Initialize config and agent directory
pub async fn init_command() -> Result<()> {
    println!("◆ Initializing NodeWarden...");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = nodewarden_config::init().await?;
    let agent_dir = nodewarden_config::agent_dir();

    create_template(&agent_dir, IDENTITY_FILE, SOUL_MD).await?;
    let memory = memory_path(&agent_dir);
    if !memory.exists() {
        tokio::fs::write(&memory, MEMORY_MD).await?;
        info!("◆ Created {}", memory.display());
    }

    println!("\n◆ NodeWarden initialized");
    println!("  Config:    {}", nodewarden_config::config_path().display());
    println!("  Agent dir: {}", agent_dir.display());
    println!("  Model:     {} @ {}", config.provider.model, config.provider.api_base);
    println!("\nNext steps:");
    println!("  1. Point provider.api_base at your model server (or add an api_key)");
    println!("  2. Start chatting: warden engage -m \"What is running?\"");
    println!("  3. Run the agent:  warden deploy");

    Ok(())
}

async fn create_template(dir: &std::path::Path, filename: &str, content: &str) -> Result<()> {
    let path = dir.join(filename);
    if !path.exists() {
        tokio::fs::write(&path, content).await?;
        info!("◆ Created {}", path.display());
    }
    Ok(())
}

/// Chat with the agent
pub async fn engage_command(message: Option<String>, conversation: Option<String>) -> Result<()> {
    let runtime = load_runtime().await?;
    if !runtime.provider_ready {
        anyhow::bail!(
            "Model backend not configured. Set provider.api_key (or a local api_base) in ~/.nodewarden/config.json"
        );
    }
    runtime.world.refresh().await;

    let mut conversation = conversation;

    if let Some(msg) = message {
        let reply = runtime.agent.handle_message(&msg, conversation.as_deref()).await;
        println!("\n◆ {}", reply.text);
        println!("\n(conversation {})", reply.conversation_id);
        return Ok(());
    }

    println!(
        "◆ Interactive mode, {} capabilities (type 'exit' to quit)",
        runtime.registry.len()
    );
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    loop {
        print!("◆ ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        if std::io::stdin().read_line(&mut input)? == 0 {
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        let reply = runtime.agent.handle_message(input, conversation.as_deref()).await;
        for action in &reply.actions {
            println!("  → {}", action);
        }
        println!("\n◆ {}\n", reply.text);
        conversation = Some(reply.conversation_id);
    }

    if let Some(id) = conversation {
        println!("(conversation {})", id);
    }
    Ok(())
}

/// Run the agent until Ctrl+C
pub async fn deploy_command() -> Result<()> {
    let start_time = Instant::now();

    println!("◆ Starting NodeWarden");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let runtime = load_runtime().await?;
    if !runtime.provider_ready {
        warn!("Model backend not configured; watcher evaluations will fail");
    }

    runtime.world.refresh().await;
    let resumed = runtime.captures.resume().await;
    runtime.scheduler.start().await;

    let shutdown = CancellationToken::new();
    let heartbeat = Arc::new(runtime.heartbeat);
    let heartbeat_task = tokio::spawn({
        let heartbeat = heartbeat.clone();
        let shutdown = shutdown.clone();
        async move { heartbeat.run(shutdown).await }
    });

    info!("◆ NodeWarden active");
    println!("◆ NodeWarden active");
    println!("  Scope:     {}", runtime.bridge.scope().scope);
    println!("  Machine:   {}", runtime.bridge.scope().machine_id);
    println!("  Watchers:  {} loaded", runtime.scheduler.list().len());
    println!("  Captures:  {} resumed", resumed);
    println!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("◆ Shutdown signal received, stopping...");
    println!("\n◆ Shutting down...");

    shutdown.cancel();
    runtime.scheduler.stop();
    match tokio::time::timeout(std::time::Duration::from_secs(5), heartbeat_task).await {
        Ok(Ok(())) => info!("◆ Heartbeat stopped"),
        Ok(Err(e)) => warn!("◆ Heartbeat task panicked: {}", e),
        Err(_) => warn!("◆ Heartbeat shutdown timed out"),
    }
    runtime.bridge.shutdown().await;

    let elapsed = start_time.elapsed();
    info!(
        "◆ Ran for {:?}, {} heartbeats published",
        elapsed,
        heartbeat.beats()
    );
    println!("◆ Ran for {:?}", elapsed);
    println!("◆ Shutdown complete");

    Ok(())
}

/// Show status
pub async fn status_command() -> Result<()> {
    let config_path = nodewarden_config::config_path();
    let agent_dir = nodewarden_config::agent_dir();

    println!("◆ NodeWarden Status");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_path.exists() { "[OK]" } else { "[Missing]" }
    );
    println!(
        "Agent dir: {} {}",
        agent_dir.display(),
        if agent_dir.exists() { "[OK]" } else { "[Missing]" }
    );

    let config = Config::load().await?;
    println!("Model:     {} @ {}", config.provider.model, config.provider.api_base);
    println!("Watcher model: {}", config.watcher_model());
    println!(
        "API Key:   {}",
        if config.api_key().is_some() { "[Set]" } else { "[Not set]" }
    );
    println!("Scope:     {}", config.transport.resolved_scope());
    println!("Machine:   {}", config.transport.resolved_machine_id());

    let watchers = WatcherStore::new(watchers_path(&agent_dir))
        .load()
        .await
        .unwrap_or_default();
    let paused = watchers.iter().filter(|w| w.paused).count();
    println!("Watchers:  {} ({} paused)", watchers.len(), paused);

    let captures: Vec<Capture> = match tokio::fs::read_to_string(captures_path(&agent_dir)).await {
        Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
        Err(_) => Vec::new(),
    };
    println!("Captures:  {}", captures.len());

    println!("\n◆ Ready");
    Ok(())
}

/// List watchers
pub async fn watch_list_command() -> Result<()> {
    let runtime = load_runtime().await?;
    println!("{}", runtime.scheduler.describe_all());
    Ok(())
}

/// `watch add` arguments
pub struct WatchAddArgs {
    pub name: String,
    pub topics: Vec<String>,
    pub instruction: String,
    pub interval: Option<u64>,
    pub max_actions: Option<u32>,
}

/// Add a watcher
pub async fn watch_add_command(args: WatchAddArgs) -> Result<()> {
    let runtime = load_runtime().await?;
    let mut request = NewWatcher::new(args.name, args.topics, args.instruction);
    if let Some(secs) = args.interval {
        request = request.interval(secs);
    }
    if let Some(max) = args.max_actions {
        request = request.max_actions(max);
    }
    let message = runtime.scheduler.create(request).await?;
    println!("✓ {}", message);
    Ok(())
}

/// Remove a watcher
pub async fn watch_remove_command(name: String) -> Result<()> {
    let runtime = load_runtime().await?;
    println!("✓ {}", runtime.scheduler.remove(&name).await?);
    Ok(())
}

/// Pause or resume a watcher
pub async fn watch_pause_command(name: String, paused: bool) -> Result<()> {
    let runtime = load_runtime().await?;
    println!("✓ {}", runtime.scheduler.set_paused(&name, paused).await?);
    Ok(())
}

// Template content
const SOUL_MD: &str = r#"# NodeWarden Agent
You are an autonomous agent managing a fleet of software nodes.
Keep nodes healthy, watch the data they publish and act only when needed.

## Style

- Short answers, facts first
- Say which tool you used and what it returned
- Ask before stopping or rebuilding a node unless a watcher instruction says otherwise
"#;

const MEMORY_MD: &str = r#"# Agent Memory
"#;
