//! Cairn CLI — the main entry point.
//!
//! Commands:
//! - `chat`    — Interactive chat or single-message mode
//! - `serve`   — Start the HTTP gateway
//! - `config`  — Show, locate, or initialize the configuration
//! - `memory`  — Seed and inspect the agent memory
//! - `log`     — Analyze and export the query log

use clap::{Parser, Subcommand};

mod bootstrap;
mod commands;

#[derive(Parser)]
#[command(name = "cairn", about = "Cairn — agent message-processing orchestrator", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the agent
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Act as this user (e-mail), as the gateway's identity cookie would
        #[arg(short, long, env = "CAIRN_USER")]
        user: Option<String>,

        /// Continue an existing conversation
        #[arg(short, long)]
        conversation: Option<String>,
    },

    /// Start the HTTP gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },

    /// Agent memory management
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Query log analysis
    Log {
        #[command(subcommand)]
        action: LogAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration (default)
    Show,
    /// Print the config file path
    Path,
    /// Write a default config file
    Init,
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Load question/SQL pairs and notes from a JSON file
    Seed { file: String },
    /// Show memory statistics
    Stats,
}

#[derive(Subcommand)]
enum LogAction {
    /// Summarize the query log
    Stats {
        /// Log file (defaults to the configured query log)
        #[arg(short, long)]
        file: Option<String>,
    },
    /// Export successful question/SQL pairs as JSON
    Export {
        output: String,
        #[arg(short, long)]
        file: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Chat {
            message,
            user,
            conversation,
        } => commands::chat::run(message, user, conversation).await?,
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Init => commands::config_cmd::init().await?,
        },
        Commands::Memory { action } => match action {
            MemoryAction::Seed { file } => commands::memory::seed(&file).await?,
            MemoryAction::Stats => commands::memory::stats().await?,
        },
        Commands::Log { action } => match action {
            LogAction::Stats { file } => commands::log::stats(file.as_deref()).await?,
            LogAction::Export { output, file } => commands::log::export(&output, file.as_deref()).await?,
        },
    }

    Ok(())
}
