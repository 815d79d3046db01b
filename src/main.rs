// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod cli;

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tracing_subscriber::filter::EnvFilter;

use cli::{Cli, Commands};
use convoy_config::{Config, ProviderConfig};
use convoy_core::{ConversationEngine, ToolBroker};
use convoy_fleet::ServerManager;
use convoy_model::{ModelClient, ModelError};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Subcommands that need no fleet or model.
    if let Some(cmd) = &cli.command {
        match cmd {
            Commands::ShowConfig => {
                let config = convoy_config::load(cli.config.as_deref())?;
                println!("{}", serde_yaml::to_string(&config)?);
                return Ok(());
            }
            Commands::ListProviders => {
                for d in convoy_model::list_drivers() {
                    println!("{:<12} {:<14} {}", d.id, d.name, d.description);
                }
                return Ok(());
            }
        }
    }

    let config = convoy_config::load(cli.config.as_deref())?;

    let provider_key = cli
        .model
        .clone()
        .unwrap_or_else(|| config.ai.default_provider.clone());
    let client = build_client(&config, &provider_key)?;

    let manager = Arc::new(ServerManager::from_config(
        &config.fleet,
        config.engine.timeouts.clone(),
    ));
    if manager.is_empty() {
        tracing::info!("no tool servers configured");
    } else {
        let connected = manager.connect_all().await;
        tracing::info!(?connected, "fleet connected");
        for (name, entry) in manager.status_snapshot() {
            if let Some(err) = entry.last_error {
                tracing::warn!(server = %name, "server unavailable: {err}");
            }
        }
    }

    let mut engine = ConversationEngine::new(
        client,
        Arc::clone(&manager) as Arc<dyn ToolBroker>,
        config.engine.clone(),
    );

    let result = repl(&mut engine, &manager, &config).await;
    manager.shutdown().await;
    result
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolve a named provider config and construct the model client.
///
/// A missing credential is an actionable user error, not a stack trace: the
/// message names the provider and the environment variable to set.
fn build_client(config: &Config, provider_key: &str) -> anyhow::Result<Arc<dyn ModelClient>> {
    let provider_cfg = provider_config(config, provider_key);
    let timeout = Duration::from_secs(config.engine.timeouts.model_call_secs);
    match convoy_model::from_config(&provider_cfg, timeout) {
        Ok(client) => Ok(client),
        Err(ModelError::MissingCredential { provider, env_var }) => anyhow::bail!(
            "provider '{provider}' needs a credential: set {env_var} and run again"
        ),
        Err(e) => Err(e).context(format!("building model client '{provider_key}'")),
    }
}

/// Look up `key` in the AI document, falling back to treating the key as a
/// bare driver id (e.g. `--model ollama` without any config file).
fn provider_config(config: &Config, key: &str) -> ProviderConfig {
    config.ai.providers.get(key).cloned().unwrap_or_else(|| ProviderConfig {
        provider: key.to_string(),
        ..ProviderConfig::default()
    })
}

/// Minimal line-oriented driver loop.  One turn at a time: input arriving
/// while a turn runs is simply read afterwards, so a conversation can never
/// process two inputs concurrently.
async fn repl(
    engine: &mut ConversationEngine,
    manager: &Arc<ServerManager>,
    config: &Config,
) -> anyhow::Result<()> {
    println!(
        "convoy {} — model {}",
        env!("CARGO_PKG_VERSION"),
        engine.model_label()
    );
    println!("commands: /status /retry /new /model <provider> /quit");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    prompt()?;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            prompt()?;
            continue;
        }

        if let Some(rest) = line.strip_prefix('/') {
            let mut parts = rest.split_whitespace();
            match parts.next() {
                Some("quit") | Some("exit") => break,
                Some("status") => {
                    for (name, entry) in manager.status_snapshot() {
                        println!("{name:<16} {}", entry.status);
                    }
                    if manager.is_empty() {
                        println!("(no servers configured)");
                    }
                }
                Some("retry") => {
                    let reconnected = manager.retry_failed().await;
                    println!("reconnected: {reconnected:?}");
                }
                Some("new") => {
                    engine.new_conversation();
                    println!("started a new conversation");
                }
                Some("model") => match parts.next() {
                    Some(key) => match build_client(config, key) {
                        Ok(client) => {
                            engine.switch_client(client);
                            println!("switched to {}", engine.model_label());
                        }
                        Err(e) => println!("{e}"),
                    },
                    None => println!("usage: /model <provider>"),
                },
                Some(other) => println!("unknown command: /{other}"),
                None => {}
            }
        } else {
            let answer = engine.process_user_message(line).await;
            println!("{answer}");
        }
        prompt()?;
    }
    Ok(())
}

fn prompt() -> anyhow::Result<()> {
    print!("> ");
    std::io::stdout().flush()?;
    Ok(())
}
