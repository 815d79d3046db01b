// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use convoy_config::{FleetConfig, TimeoutConfig};
use convoy_core::{DispatchError, DispatchOutcome, ToolBroker};
use convoy_model::ToolSchema;
use convoy_rpc::RpcError;

use crate::content::{render_fragments, RawInvocation};
use crate::server::{ManagedServer, ServerStatus};

/// How long the aggregated tool catalog stays warm without a fleet event.
pub const CATALOG_TTL: Duration = Duration::from_secs(600);

/// One row of [`ServerManager::status_snapshot`].
#[derive(Debug, Clone)]
pub struct ServerStatusEntry {
    pub status: ServerStatus,
    pub last_error: Option<String>,
}

/// Failure of a single tool execution.  Never raised as a panic; the
/// conversation engine folds these into tool-result text.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("no server found providing tool '{0}'")]
    NoProvider(String),
    #[error("unknown server '{0}'")]
    UnknownServer(String),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

struct CatalogCache {
    tools: Vec<ToolSchema>,
    generation: u64,
    built_at: Instant,
}

/// The fleet: every configured tool-provider subprocess, keyed by name.
///
/// Servers live in a `BTreeMap` so all iteration is in lexicographic name
/// order — the documented tie-break when two servers expose the same tool.
pub struct ServerManager {
    servers: BTreeMap<String, Arc<ManagedServer>>,
    timeouts: TimeoutConfig,
    generation: Arc<AtomicU64>,
    catalog_cache: StdMutex<Option<CatalogCache>>,
}

impl ServerManager {
    pub fn from_config(fleet: &FleetConfig, timeouts: TimeoutConfig) -> Self {
        let generation = Arc::new(AtomicU64::new(0));
        let servers = fleet
            .servers
            .iter()
            .map(|(name, spec)| {
                let server = ManagedServer::new(
                    name.clone(),
                    spec.clone(),
                    timeouts.clone(),
                    Arc::clone(&generation),
                );
                (name.clone(), Arc::new(server))
            })
            .collect();
        Self {
            servers,
            timeouts,
            generation,
            catalog_cache: StdMutex::new(None),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Connect every configured server concurrently.  Returns the names that
    /// came up; per-server failures are recorded in the status, not raised.
    pub async fn connect_all(&self) -> Vec<String> {
        self.connect_matching(|_| true).await
    }

    /// Re-run connect for every server that is not currently Connected.
    pub async fn retry_failed(&self) -> Vec<String> {
        self.connect_matching(|s| s.status() != ServerStatus::Connected)
            .await
    }

    async fn connect_matching(&self, filter: impl Fn(&ManagedServer) -> bool) -> Vec<String> {
        let targets: Vec<Arc<ManagedServer>> = self
            .servers
            .values()
            .filter(|s| filter(s.as_ref()))
            .cloned()
            .collect();

        let results = join_all(targets.iter().map(|server| async move {
            let outcome = Arc::clone(server).connect().await;
            (server.name().to_string(), outcome)
        }))
        .await;

        let mut connected = Vec::new();
        for (name, outcome) in results {
            match outcome {
                Ok(()) => connected.push(name),
                Err(e) => warn!(server = %name, "connect failed: {e}"),
            }
        }
        connected.sort();
        connected
    }

    /// Per-server status across the fleet.
    pub fn status_snapshot(&self) -> BTreeMap<String, ServerStatusEntry> {
        self.servers
            .iter()
            .map(|(name, server)| {
                (
                    name.clone(),
                    ServerStatusEntry {
                        status: server.status(),
                        last_error: server.last_error(),
                    },
                )
            })
            .collect()
    }

    /// Aggregated catalog across all connected servers, deduplicated by tool
    /// name with the lexicographically first server winning.
    ///
    /// Cached with a TTL; any connect/disconnect event bumps the fleet
    /// generation and invalidates the cache.
    pub fn all_tools(&self) -> Vec<ToolSchema> {
        let generation = self.generation.load(Ordering::Relaxed);
        {
            let cache = self.catalog_cache.lock().unwrap();
            if let Some(c) = cache.as_ref() {
                if c.generation == generation && c.built_at.elapsed() < CATALOG_TTL {
                    return c.tools.clone();
                }
            }
        }

        let mut seen: HashSet<String> = HashSet::new();
        let mut tools = Vec::new();
        for (name, server) in &self.servers {
            if server.status() != ServerStatus::Connected {
                continue;
            }
            for tool in server.tools() {
                if seen.insert(tool.name.clone()) {
                    tools.push(tool);
                } else {
                    // Documented ambiguity: first connected server in name
                    // order wins; the duplicate is never silently renamed.
                    warn!(
                        tool = %tool.name,
                        server = %name,
                        "duplicate tool name; dispatch resolves to the lexicographically first server"
                    );
                }
            }
        }

        *self.catalog_cache.lock().unwrap() = Some(CatalogCache {
            tools: tools.clone(),
            generation,
            built_at: Instant::now(),
        });
        tools
    }

    /// First connected server (in name order) advertising `tool`.
    /// Deterministic across runs for a fixed fleet configuration.
    pub fn find_tool_provider(&self, tool: &str) -> Option<String> {
        self.servers
            .iter()
            .find(|(_, s)| s.status() == ServerStatus::Connected && s.has_tool(tool))
            .map(|(name, _)| name.clone())
    }

    /// Execute one tool call.  When `server` is not given, the provider is
    /// resolved via [`find_tool_provider`].
    ///
    /// [`find_tool_provider`]: ServerManager::find_tool_provider
    pub async fn execute_tool(
        &self,
        server: Option<&str>,
        tool: &str,
        args: &Value,
        timeout: Option<Duration>,
    ) -> Result<RawInvocation, ExecuteError> {
        let name = match server {
            Some(n) => n.to_string(),
            None => self
                .find_tool_provider(tool)
                .ok_or_else(|| ExecuteError::NoProvider(tool.to_string()))?,
        };
        let server = self
            .servers
            .get(&name)
            .ok_or_else(|| ExecuteError::UnknownServer(name.clone()))?;

        let timeout =
            timeout.unwrap_or_else(|| Duration::from_secs(self.timeouts.tool_call_secs));
        Ok(server.invoke(tool, args, timeout).await?)
    }

    /// Close every server.  Idempotent.
    pub async fn shutdown(&self) {
        join_all(self.servers.values().map(|s| s.close())).await;
    }

    #[cfg(test)]
    fn with_stubs(stubs: Vec<ManagedServer>) -> (Self, Arc<AtomicU64>) {
        let generation = Arc::new(AtomicU64::new(0));
        let servers = stubs
            .into_iter()
            .map(|s| (s.name().to_string(), Arc::new(s)))
            .collect();
        let manager = Self {
            servers,
            timeouts: TimeoutConfig::default(),
            generation: Arc::clone(&generation),
            catalog_cache: StdMutex::new(None),
        };
        (manager, generation)
    }
}

#[async_trait]
impl ToolBroker for ServerManager {
    async fn catalog(&self) -> Vec<ToolSchema> {
        self.all_tools()
    }

    async fn dispatch(
        &self,
        name: &str,
        args: &Value,
        timeout: Duration,
    ) -> Result<DispatchOutcome, DispatchError> {
        match self.execute_tool(None, name, args, Some(timeout)).await {
            Ok(raw) => Ok(DispatchOutcome {
                content: render_fragments(&raw.content),
                is_error: raw.is_error,
            }),
            Err(ExecuteError::NoProvider(tool)) => Err(DispatchError::NotFound(tool)),
            Err(e) => Err(DispatchError::Failed(e.to_string())),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(name: &str) -> ToolSchema {
        ToolSchema {
            name: name.into(),
            description: format!("tool {name}"),
            input_schema: json!({"type": "object"}),
        }
    }

    fn stub(
        name: &str,
        tools: Vec<ToolSchema>,
        status: ServerStatus,
        generation: &Arc<AtomicU64>,
    ) -> ManagedServer {
        ManagedServer::stub(name, tools, status, Arc::clone(generation))
    }

    fn two_server_fleet() -> (ServerManager, Arc<AtomicU64>) {
        let generation = Arc::new(AtomicU64::new(0));
        let alpha = stub(
            "alpha",
            vec![tool("dup"), tool("only_alpha")],
            ServerStatus::Connected,
            &generation,
        );
        let beta = stub(
            "beta",
            vec![tool("dup"), tool("only_beta")],
            ServerStatus::Connected,
            &generation,
        );
        ServerManager::with_stubs(vec![beta, alpha])
    }

    #[test]
    fn duplicate_tool_resolves_to_lexicographically_first_server() {
        let (manager, _) = two_server_fleet();
        assert_eq!(manager.find_tool_provider("dup").as_deref(), Some("alpha"));
    }

    #[test]
    fn find_tool_provider_is_deterministic() {
        for _ in 0..10 {
            let (manager, _) = two_server_fleet();
            assert_eq!(manager.find_tool_provider("dup").as_deref(), Some("alpha"));
        }
    }

    #[test]
    fn find_tool_provider_skips_non_connected_servers() {
        let generation = Arc::new(AtomicU64::new(0));
        let alpha = stub(
            "alpha",
            vec![tool("dup")],
            ServerStatus::Disconnected,
            &generation,
        );
        let beta = stub("beta", vec![tool("dup")], ServerStatus::Connected, &generation);
        let (manager, _) = ServerManager::with_stubs(vec![alpha, beta]);
        assert_eq!(manager.find_tool_provider("dup").as_deref(), Some("beta"));
    }

    #[test]
    fn find_tool_provider_returns_none_when_absent() {
        let (manager, _) = two_server_fleet();
        assert!(manager.find_tool_provider("nonexistent").is_none());
    }

    #[test]
    fn all_tools_dedupes_by_name_keeping_first() {
        let (manager, _) = two_server_fleet();
        let tools = manager.all_tools();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["dup", "only_alpha", "only_beta"]);
    }

    #[test]
    fn all_tools_excludes_disconnected_servers() {
        let generation = Arc::new(AtomicU64::new(0));
        let alpha = stub(
            "alpha",
            vec![tool("a_tool")],
            ServerStatus::Errored("down".into()),
            &generation,
        );
        let beta = stub("beta", vec![tool("b_tool")], ServerStatus::Connected, &generation);
        let (manager, _) = ServerManager::with_stubs(vec![alpha, beta]);
        let names: Vec<String> = manager.all_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, ["b_tool"]);
    }

    #[test]
    fn catalog_cache_serves_stale_until_generation_bump() {
        let (manager, generation) = two_server_fleet();
        let before = manager.all_tools();

        // Mutate a snapshot without a fleet event: the cache hides it.
        manager.servers["alpha"].set_tools_for_test(vec![tool("brand_new")]);
        assert_eq!(manager.all_tools().len(), before.len());

        // A connect/disconnect event bumps the generation and invalidates.
        generation.fetch_add(1, Ordering::Relaxed);
        let names: Vec<String> = manager.all_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, ["brand_new", "dup", "only_beta"]);
    }

    #[test]
    fn status_snapshot_covers_every_server() {
        let generation = Arc::new(AtomicU64::new(0));
        let alpha = stub(
            "alpha",
            vec![],
            ServerStatus::Errored("spawn failed".into()),
            &generation,
        );
        let beta = stub("beta", vec![], ServerStatus::Connected, &generation);
        let (manager, _) = ServerManager::with_stubs(vec![alpha, beta]);

        let snapshot = manager.status_snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot["alpha"].status,
            ServerStatus::Errored("spawn failed".into())
        );
        assert_eq!(snapshot["alpha"].last_error.as_deref(), Some("spawn failed"));
        assert_eq!(snapshot["beta"].status, ServerStatus::Connected);
    }

    #[tokio::test]
    async fn execute_tool_with_unknown_server_errors() {
        let (manager, _) = two_server_fleet();
        let err = manager
            .execute_tool(Some("ghost"), "dup", &json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecuteError::UnknownServer(_)));
    }

    #[tokio::test]
    async fn execute_tool_without_provider_errors() {
        let (manager, _) = two_server_fleet();
        let err = manager
            .execute_tool(None, "nonexistent", &json!({}), None)
            .await
            .unwrap_err();
        match err {
            ExecuteError::NoProvider(tool) => assert_eq!(tool, "nonexistent"),
            other => panic!("expected NoProvider, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dispatch_maps_missing_provider_to_not_found() {
        let (manager, _) = two_server_fleet();
        let err = manager
            .dispatch("nonexistent", &json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));
    }

    #[test]
    fn empty_fleet_has_no_tools() {
        let manager = ServerManager::from_config(&FleetConfig::default(), TimeoutConfig::default());
        assert!(manager.is_empty());
        assert!(manager.all_tools().is_empty());
    }
}
