// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod registry;
mod client;
mod mock;
mod openai_compat;
mod types;

pub use client::{ModelClient, ModelError};
pub use mock::{MockClient, ScriptStep, ScriptedClient};
pub use openai_compat::OpenAiCompatClient;
pub use registry::{get_driver, list_drivers, DriverMeta};
pub use types::{AnnouncedCall, Message, ToolSchema, Verdict};

use std::sync::Arc;
use std::time::Duration;

use convoy_config::ProviderConfig;
use registry::known_driver_ids;

/// Construct a shared [`ModelClient`] from configuration.
///
/// Selects the driver by `cfg.provider` and resolves the credential in order:
/// explicit `api_key`, then `api_key_env`, then the registry's default env
/// var.  When the driver requires a key and none is found, the distinguished
/// [`ModelError::MissingCredential`] is returned so callers can prompt the
/// user for the named variable and retry.
pub fn from_config(
    cfg: &ProviderConfig,
    timeout: Duration,
) -> Result<Arc<dyn ModelClient>, ModelError> {
    let meta = get_driver(&cfg.provider).ok_or_else(|| {
        let known: Vec<&str> = known_driver_ids().collect();
        ModelError::UnknownProvider(format!(
            "{:?} (known providers: {})",
            cfg.provider,
            known.join(", ")
        ))
    })?;

    if meta.id == "mock" {
        return Ok(Arc::new(MockClient));
    }

    let key = resolve_api_key(cfg, meta);
    if meta.requires_api_key && key.is_none() {
        let env_var = cfg
            .api_key_env
            .clone()
            .or_else(|| meta.default_api_key_env.map(String::from))
            .unwrap_or_default();
        return Err(ModelError::MissingCredential {
            provider: meta.id.to_string(),
            env_var,
        });
    }

    let base_url = cfg
        .base_url
        .clone()
        .or_else(|| meta.default_base_url.map(String::from))
        .ok_or_else(|| {
            ModelError::UnknownProvider(format!("provider {:?} requires base_url", meta.id))
        })?;
    let model = cfg
        .model
        .clone()
        .unwrap_or_else(|| meta.default_model.to_string());

    Ok(Arc::new(OpenAiCompatClient::new(
        meta.id,
        model,
        key,
        &base_url,
        cfg.temperature,
        timeout,
    )))
}

fn resolve_api_key(cfg: &ProviderConfig, meta: &DriverMeta) -> Option<String> {
    if let Some(k) = &cfg.api_key {
        return Some(k.clone());
    }
    if let Some(env) = &cfg.api_key_env {
        return std::env::var(env).ok();
    }
    // Auto-resolve from the registry default env var if neither is set.
    if let Some(env_var) = meta.default_api_key_env {
        return std::env::var(env_var).ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(provider: &str) -> ProviderConfig {
        ProviderConfig {
            provider: provider.into(),
            ..ProviderConfig::default()
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(60);

    #[test]
    fn from_config_mock_succeeds() {
        let client = from_config(&cfg("mock"), TIMEOUT).unwrap();
        assert_eq!(client.provider_name(), "mock");
    }

    #[test]
    fn from_config_ollama_requires_no_key() {
        let client = from_config(&cfg("ollama"), TIMEOUT).unwrap();
        assert_eq!(client.provider_name(), "ollama");
        assert_eq!(client.model_name(), "llama3.2");
    }

    #[test]
    fn from_config_unknown_provider_returns_error() {
        let err = from_config(&cfg("totally_unknown_provider_xyz"), TIMEOUT).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unknown model provider"));
        assert!(msg.contains("known providers"));
    }

    #[test]
    fn from_config_missing_key_is_distinguished() {
        let mut c = cfg("openai");
        // Point at an env var that cannot exist so the lookup fails
        // deterministically regardless of the test environment.
        c.api_key_env = Some("CONVOY_TEST_NO_SUCH_KEY_XYZ".into());
        let err = from_config(&c, TIMEOUT).err().expect("factory must fail");
        match err {
            ModelError::MissingCredential { provider, env_var } => {
                assert_eq!(provider, "openai");
                assert_eq!(env_var, "CONVOY_TEST_NO_SUCH_KEY_XYZ");
            }
            other => panic!("expected MissingCredential, got {other:?}"),
        }
    }

    #[test]
    fn from_config_explicit_key_wins() {
        let mut c = cfg("openai");
        c.api_key = Some("explicit-key".into());
        c.api_key_env = Some("CONVOY_TEST_NO_SUCH_KEY_XYZ".into());
        assert!(from_config(&c, TIMEOUT).is_ok());
    }

    #[test]
    fn from_config_model_override_is_used() {
        let mut c = cfg("ollama");
        c.model = Some("codellama".into());
        let client = from_config(&c, TIMEOUT).unwrap();
        assert_eq!(client.model_name(), "codellama");
    }

    #[test]
    fn missing_credential_error_names_the_env_var() {
        let mut c = cfg("groq");
        c.api_key_env = Some("CONVOY_TEST_NO_SUCH_KEY_XYZ".into());
        let msg = from_config(&c, TIMEOUT).unwrap_err().to_string();
        assert!(msg.contains("CONVOY_TEST_NO_SUCH_KEY_XYZ"));
    }
}
