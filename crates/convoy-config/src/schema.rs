// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_model_call_secs() -> u64 {
    60
}
fn default_rpc_secs() -> u64 {
    120
}
fn default_tool_call_secs() -> u64 {
    300
}
fn default_handshake_secs() -> u64 {
    15
}
fn default_max_rounds() -> u32 {
    5
}
fn default_max_format_retries() -> u32 {
    1
}
fn default_provider() -> String {
    "openai".into()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Tool-provider subprocess fleet: server name → spawn specification.
    #[serde(default)]
    pub fleet: FleetConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// The fleet document: which subprocesses to spawn and supervise.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub servers: HashMap<String, ServerSpec>,
}

/// Spawn specification for one tool-provider subprocess.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Executable path or name resolved via PATH.
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment overrides, merged over the parent environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// The AI document: which model backend drives the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Key into `providers` used when the CLI does not override it.
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// Named backend configurations.
    ///
    /// ```yaml
    /// ai:
    ///   default_provider: openai
    ///   providers:
    ///     openai:
    ///       provider: openai
    ///       model: gpt-4o
    ///     local:
    ///       provider: ollama
    ///       model: llama3.2
    /// ```
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            providers: HashMap::new(),
        }
    }
}

/// Configuration for one model backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Driver identifier.  Run `convoy list-providers` for the full list.
    pub provider: String,
    /// Model name forwarded to the provider API.  Falls back to the driver's
    /// default when unset.
    pub model: Option<String>,
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files.
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local servers and gateways.
    pub base_url: Option<String>,
    /// Sampling temperature (0.0–2.0).
    pub temperature: Option<f32>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            // api_key_env is intentionally None here: the driver registry
            // knows the canonical env-var name for each provider, and setting
            // it here would shadow that lookup when the provider is overridden.
            api_key_env: None,
            api_key: None,
            base_url: None,
            temperature: None,
        }
    }
}

/// Conversation engine knobs.  Every timeout of the runtime is overridable
/// here; the defaults match the documented contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum generate → parse → dispatch rounds per user turn.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    /// How many times a malformed tool-call turn is sent back for correction.
    #[serde(default = "default_max_format_retries")]
    pub max_format_retries: u32,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            max_format_retries: default_max_format_retries(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// One model completion call.
    #[serde(default = "default_model_call_secs")]
    pub model_call_secs: u64,
    /// One JSON-RPC request that is not a tool call (initialize, tools/list).
    #[serde(default = "default_rpc_secs")]
    pub rpc_secs: u64,
    /// One tools/call invocation.
    #[serde(default = "default_tool_call_secs")]
    pub tool_call_secs: u64,
    /// The initialize handshake after spawning a subprocess.
    #[serde(default = "default_handshake_secs")]
    pub handshake_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            model_call_secs: default_model_call_secs(),
            rpc_secs: default_rpc_secs(),
            tool_call_secs: default_tool_call_secs(),
            handshake_secs: default_handshake_secs(),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeouts_match_contract() {
        let t = TimeoutConfig::default();
        assert_eq!(t.model_call_secs, 60);
        assert_eq!(t.rpc_secs, 120);
        assert_eq!(t.tool_call_secs, 300);
        assert_eq!(t.handshake_secs, 15);
    }

    #[test]
    fn default_engine_limits() {
        let e = EngineConfig::default();
        assert_eq!(e.max_rounds, 5);
        assert_eq!(e.max_format_retries, 1);
    }

    #[test]
    fn fleet_config_parses_server_spec() {
        let yaml = r#"
servers:
  echo:
    command: /usr/bin/echo-server
    args: ["--stdio"]
    env:
      LOG_LEVEL: debug
"#;
        let fleet: FleetConfig = serde_yaml::from_str(yaml).unwrap();
        let spec = fleet.servers.get("echo").unwrap();
        assert_eq!(spec.command, "/usr/bin/echo-server");
        assert_eq!(spec.args, vec!["--stdio"]);
        assert_eq!(spec.env.get("LOG_LEVEL").map(String::as_str), Some("debug"));
    }

    #[test]
    fn server_spec_args_and_env_default_to_empty() {
        let spec: ServerSpec = serde_yaml::from_str("command: srv").unwrap();
        assert!(spec.args.is_empty());
        assert!(spec.env.is_empty());
    }

    #[test]
    fn ai_config_parses_named_providers() {
        let yaml = r#"
default_provider: local
providers:
  local:
    provider: ollama
    model: llama3.2
    base_url: http://localhost:11434/v1
"#;
        let ai: AiConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(ai.default_provider, "local");
        let p = ai.providers.get("local").unwrap();
        assert_eq!(p.provider, "ollama");
        assert_eq!(p.model.as_deref(), Some("llama3.2"));
    }

    #[test]
    fn full_config_round_trips() {
        let cfg = Config::default();
        let text = serde_yaml::to_string(&cfg).unwrap();
        let back: Config = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back.engine.max_rounds, cfg.engine.max_rounds);
        assert_eq!(back.ai.default_provider, cfg.ai.default_provider);
    }
}
