// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use tracing::debug;

use crate::{Config, EngineConfig, ProviderConfig, ServerSpec};

/// One partially-specified config document.
///
/// Layers are folded section by section rather than deep-merged as YAML:
/// the fleet and provider maps are keyed collections that later layers
/// extend entry-wise (a workspace file adds its servers next to the user's),
/// while the engine section is a coherent block of knobs that a layer either
/// states in full or inherits.
#[derive(Debug, Default, Deserialize)]
struct ConfigLayer {
    fleet: Option<FleetLayer>,
    ai: Option<AiLayer>,
    engine: Option<EngineConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct FleetLayer {
    #[serde(default)]
    servers: HashMap<String, ServerSpec>,
}

#[derive(Debug, Default, Deserialize)]
struct AiLayer {
    default_provider: Option<String>,
    #[serde(default)]
    providers: HashMap<String, ProviderConfig>,
}

/// Config file locations, lowest priority first.  Convoy keeps the layering
/// shallow: one user-level file for credentials and provider defaults, one
/// workspace file for the project's fleet.
fn layer_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(cfg_dir) = dirs::config_dir() {
        paths.push(cfg_dir.join("convoy/config.yaml"));
    }
    paths.push(PathBuf::from("convoy.yaml"));
    paths
}

/// Load configuration by folding the discovered layers, then an optional
/// explicit file (e.g. the `--config` CLI flag) on top.
///
/// Discovered files may be absent; the explicit path must exist.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut config = Config::default();

    for path in layer_paths() {
        if !path.is_file() {
            continue;
        }
        debug!(path = %path.display(), "applying config layer");
        fold_layer(&mut config, read_layer(&path)?);
    }

    if let Some(path) = extra {
        debug!(path = %path.display(), "applying explicit config");
        fold_layer(&mut config, read_layer(path)?);
    }

    Ok(config)
}

fn read_layer(path: &Path) -> anyhow::Result<ConfigLayer> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Fold one layer into the accumulated config.
///
/// - `fleet.servers` and `ai.providers` extend the maps; a same-named entry
///   in a later layer replaces the earlier one whole (specs are not split
///   across files).
/// - `ai.default_provider` is overridden only when the layer states it.
/// - `engine` replaces the whole section when present.
fn fold_layer(config: &mut Config, layer: ConfigLayer) {
    if let Some(fleet) = layer.fleet {
        config.fleet.servers.extend(fleet.servers);
    }
    if let Some(ai) = layer.ai {
        if let Some(default) = ai.default_provider {
            config.ai.default_provider = default;
        }
        config.ai.providers.extend(ai.providers);
    }
    if let Some(engine) = layer.engine {
        config.engine = engine;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
