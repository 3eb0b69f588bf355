//! NodeWarden - model-driven operator for a fleet of software nodes

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

mod commands;
mod runtime;

use commands::{
    deploy_command, engage_command, init_command, status_command, watch_add_command,
    watch_list_command, watch_pause_command, watch_remove_command, WatchAddArgs,
};

/// NodeWarden - autonomous fleet operator
#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "◆ Autonomous model-driven operator for a fleet of software nodes")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config and agent directory
    Init,
    /// Chat with the agent
    Engage {
        /// Message to send (interactive mode when omitted)
        #[arg(short, long)]
        message: Option<String>,
        /// Conversation ID to continue
        #[arg(short, long)]
        conversation: Option<String>,
    },
    /// Run bridge, watchers, captures and heartbeat until Ctrl+C
    Deploy {
        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
    /// Show system status
    Status,
    /// Manage watchers
    Watch {
        #[command(subcommand)]
        command: WatchCommands,
    },
}

#[derive(Subcommand)]
enum WatchCommands {
    /// List watchers
    List,
    /// Add a watcher
    Add {
        /// Unique watcher name
        name: String,
        /// Topic to monitor (repeatable)
        #[arg(short, long = "topic", required = true)]
        topics: Vec<String>,
        /// What to watch for and what to do
        #[arg(short, long)]
        instruction: String,
        /// Seconds between evaluations
        #[arg(long)]
        interval: Option<u64>,
        /// Maximum actions per hour
        #[arg(long)]
        max_actions: Option<u32>,
    },
    /// Remove a watcher
    Remove { name: String },
    /// Pause a watcher
    Pause { name: String },
    /// Resume a paused watcher
    Resume { name: String },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(matches!(cli.command, Commands::Deploy { verbose: true }));

    let (label, result) = match cli.command {
        Commands::Init => ("Init", init_command().await),
        Commands::Engage {
            message,
            conversation,
        } => ("Engage", engage_command(message, conversation).await),
        Commands::Deploy { .. } => ("Deploy", deploy_command().await),
        Commands::Status => ("Status", status_command().await),
        Commands::Watch { command } => match command {
            WatchCommands::List => ("Watch list", watch_list_command().await),
            WatchCommands::Add {
                name,
                topics,
                instruction,
                interval,
                max_actions,
            } => (
                "Watch add",
                watch_add_command(WatchAddArgs {
                    name,
                    topics,
                    instruction,
                    interval,
                    max_actions,
                })
                .await,
            ),
            WatchCommands::Remove { name } => ("Watch remove", watch_remove_command(name).await),
            WatchCommands::Pause { name } => ("Watch pause", watch_pause_command(name, true).await),
            WatchCommands::Resume { name } => {
                ("Watch resume", watch_pause_command(name, false).await)
            }
        },
    };

    if let Err(e) = result {
        error!("{} failed: {:#}", label, e);
        eprintln!("✗ {label} failed: {e:#}");
        std::process::exit(1);
    }
}
