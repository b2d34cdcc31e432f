//! `cairn serve` — Start the HTTP gateway.

use std::sync::Arc;

use cairn_config::AppConfig;
use cairn_gateway::ApiV1State;

use crate::bootstrap::{self, BoxError};

pub async fn run(port_override: Option<u16>) -> Result<(), BoxError> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    if !config.has_api_key() && config.provider != "ollama" {
        return Err(missing_key_message().into());
    }

    let runtime = bootstrap::build_agent(&config).await?;

    println!("Cairn Gateway");
    println!("   Listening: http://{}:{}", config.gateway.host, config.gateway.port);
    println!("   Model:     {}", config.default_model);
    println!("   Tools:     {}", runtime.agent.tools().names().join(", "));

    let state = Arc::new(ApiV1State {
        agent: runtime.agent,
        telemetry: Some(runtime.telemetry),
    });
    cairn_gateway::start(state, &config.gateway.host, config.gateway.port).await
}

pub(crate) fn missing_key_message() -> String {
    format!(
        "No API key configured. Set CAIRN_API_KEY (or OPENAI_API_KEY), or add api_key to {}",
        AppConfig::config_dir().join("config.toml").display()
    )
}
