//! `cairn chat` — One-shot or interactive chat.
//!
//! Output units are rendered as they arrive. Ctrl+C while a turn is running
//! drops its stream, which cancels the turn; the REPL keeps going.

use std::io::Write;
use std::sync::Arc;

use cairn_agent::{Agent, StatusLevel, TaskState, UnitBody};
use cairn_config::AppConfig;
use cairn_core::message::ConversationId;
use cairn_core::user::RequestContext;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use super::serve::missing_key_message;
use crate::bootstrap::{self, BoxError};

/// How a turn ended, from the terminal's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnEnd {
    Completed,
    Failed,
    Cancelled,
}

pub async fn run(
    message: Option<String>,
    user: Option<String>,
    conversation: Option<String>,
) -> Result<(), BoxError> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if !config.has_api_key() && config.provider != "ollama" {
        return Err(missing_key_message().into());
    }

    let runtime = bootstrap::build_agent(&config).await?;
    let context = cli_context(&config.gateway.identity_cookie, user.as_deref());
    let conversation_id = conversation
        .as_deref()
        .map(ConversationId::from)
        .unwrap_or_default();

    if let Some(message) = message {
        return match run_turn(&runtime.agent, context, message, &conversation_id).await? {
            TurnEnd::Completed => Ok(()),
            TurnEnd::Failed => Err("turn failed".into()),
            TurnEnd::Cancelled => Err("turn cancelled".into()),
        };
    }

    println!();
    println!("  Cairn — Interactive Mode");
    println!();
    println!("  Model:         {}", config.default_model);
    println!("  Tools:         {}", runtime.agent.tools().names().join(", "));
    println!("  Conversation:  {conversation_id}");
    println!();
    println!("  Type your message and press Enter.");
    println!("  Ctrl+C cancels a running turn. Type 'exit' to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }
        let end = run_turn(&runtime.agent, context.clone(), line.to_string(), &conversation_id).await?;
        debug!(?end, "Turn ended");
        println!();
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

/// The CLI speaks as `user` through the same identity cookie the gateway
/// reads, so both transports resolve callers identically.
fn cli_context(cookie_name: &str, user: Option<&str>) -> RequestContext {
    let context = RequestContext::new().with_header("user-agent", "cairn-cli");
    match user {
        Some(email) => context.with_cookie(cookie_name, email),
        None => context,
    }
}

async fn run_turn(
    agent: &Arc<Agent>,
    context: RequestContext,
    message: String,
    conversation_id: &ConversationId,
) -> Result<TurnEnd, BoxError> {
    let mut stream = agent.process(context, message, Some(conversation_id.clone()));
    let mut end = TurnEnd::Completed;
    loop {
        tokio::select! {
            unit = stream.next() => {
                let Some(unit) = unit else {
                    return Ok(end);
                };
                if matches!(unit.body, UnitBody::Failure { .. }) {
                    end = TurnEnd::Failed;
                }
                if let Some(rendered) = render_unit(&unit.body) {
                    println!("{rendered}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("  [cancelled]");
                return Ok(TurnEnd::Cancelled);
            }
        }
    }
}

/// Terminal rendering of one unit; `None` for units with nothing to show.
fn render_unit(body: &UnitBody) -> Option<String> {
    match body {
        UnitBody::InputControl { .. } => None,
        UnitBody::Text { content } => Some(
            content
                .lines()
                .map(|line| format!("  Assistant > {line}"))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        UnitBody::Status { level, message } => Some(match level {
            StatusLevel::Info => format!("  [info] {message}"),
            StatusLevel::Warning => format!("  [warning] {message}"),
        }),
        UnitBody::TaskProgress { title, state, .. } => Some(match state {
            TaskState::Running => format!("  ... {title}"),
            TaskState::Completed => format!("  ✓ {title}"),
            TaskState::Failed => format!("  ✗ {title}"),
        }),
        UnitBody::ToolResult { tool_name, output, .. } => {
            let first = output.lines().next().unwrap_or_default();
            let preview: String = first.chars().take(120).collect();
            Some(format!("    {tool_name} → {preview}"))
        }
        UnitBody::Rejection { tool_name, reason } => Some(format!("  [blocked] {tool_name}: {reason}")),
        UnitBody::Failure { message } => Some(format!("  [error] {message}")),
    }
}
