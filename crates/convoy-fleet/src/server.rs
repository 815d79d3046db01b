// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use convoy_config::{ServerSpec, TimeoutConfig};
use convoy_model::ToolSchema;
use convoy_rpc::{RpcError, SpawnSpec, StdioTransport};

use crate::content::RawInvocation;

/// Lifecycle state of one managed subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    Connecting,
    Connected,
    Disconnected,
    Errored(String),
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Errored(reason) => write!(f, "errored: {reason}"),
        }
    }
}

/// Fatal failure of a lifecycle call.  Transient transport errors after a
/// successful connect never surface here; they demote the status instead.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to spawn server '{server}': {reason}")]
    Spawn { server: String, reason: String },
    #[error("handshake with server '{server}' failed: {reason}")]
    Handshake { server: String, reason: String },
}

/// One configured tool-provider subprocess: process handle, RPC channel and
/// capability snapshot, with status tracked across reconnects.
pub struct ManagedServer {
    name: String,
    spec: ServerSpec,
    timeouts: TimeoutConfig,
    link: Mutex<Option<Arc<StdioTransport>>>,
    status: StdMutex<ServerStatus>,
    last_error: StdMutex<Option<String>>,
    tools: StdMutex<Vec<ToolSchema>>,
    /// Shared fleet generation counter; bumped on every connect/disconnect
    /// event so catalog caches can invalidate.
    generation: Arc<AtomicU64>,
}

impl ManagedServer {
    pub fn new(name: impl Into<String>, spec: ServerSpec, timeouts: TimeoutConfig,
               generation: Arc<AtomicU64>) -> Self {
        Self {
            name: name.into(),
            spec,
            timeouts,
            link: Mutex::new(None),
            status: StdMutex::new(ServerStatus::Disconnected),
            last_error: StdMutex::new(None),
            tools: StdMutex::new(Vec::new()),
            generation,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ServerStatus {
        self.status.lock().unwrap().clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }

    /// Capability snapshot: the tools this server advertised, sorted by name.
    pub fn tools(&self) -> Vec<ToolSchema> {
        self.tools.lock().unwrap().clone()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.lock().unwrap().iter().any(|t| t.name == name)
    }

    fn set_status(&self, status: ServerStatus) {
        if let ServerStatus::Errored(reason) = &status {
            *self.last_error.lock().unwrap() = Some(reason.clone());
        }
        *self.status.lock().unwrap() = status;
        self.generation.fetch_add(1, Ordering::Relaxed);
    }

    /// Spawn the subprocess, run the initialize handshake and snapshot its
    /// tool catalog.
    ///
    /// A `tools/list` failure is not fatal: the server stays connected with
    /// an empty tool set.  A handshake failure tears the process down and
    /// records the reason for `status_snapshot`.
    pub async fn connect(self: Arc<Self>) -> Result<(), ConnectError> {
        // Reconnects replace any previous link.
        if let Some(old) = self.link.lock().await.take() {
            old.close().await;
        }
        self.set_status(ServerStatus::Connecting);

        let spawn_spec = SpawnSpec {
            command: self.spec.command.clone(),
            args: self.spec.args.clone(),
            env: self.spec.env.clone(),
        };
        let (transport, notifications) = match StdioTransport::spawn(&spawn_spec) {
            Ok(pair) => pair,
            Err(e) => {
                let reason = e.to_string();
                self.set_status(ServerStatus::Errored(reason.clone()));
                return Err(ConnectError::Spawn {
                    server: self.name.clone(),
                    reason,
                });
            }
        };
        let transport = Arc::new(transport);

        let handshake_timeout = Duration::from_secs(self.timeouts.handshake_secs);
        let init_params = json!({
            "protocolVersion": "2024-11-05",
            "clientInfo": {
                "name": "convoy",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": { "tools": {} },
        });
        match transport
            .request("initialize", Some(init_params), handshake_timeout)
            .await
        {
            Ok(result) => {
                debug!(server = %self.name, ?result, "initialize handshake complete");
            }
            Err(e) => {
                transport.close().await;
                let reason = e.to_string();
                self.set_status(ServerStatus::Errored(reason.clone()));
                return Err(ConnectError::Handshake {
                    server: self.name.clone(),
                    reason,
                });
            }
        }
        if let Err(e) = transport.notify("initialized", None).await {
            warn!(server = %self.name, "failed to send initialized notification: {e}");
        }

        // Capability snapshot.  A failing tools/list leaves the server live
        // but toolless rather than tearing the connection down.
        let rpc_timeout = Duration::from_secs(self.timeouts.rpc_secs);
        let mut tools = match transport.request("tools/list", None, rpc_timeout).await {
            Ok(result) => match serde_json::from_value::<Vec<ToolSchema>>(
                result.get("tools").cloned().unwrap_or(Value::Null),
            ) {
                Ok(tools) => tools,
                Err(e) => {
                    warn!(server = %self.name, "unparseable tools/list result: {e}");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(server = %self.name, "tools/list failed: {e}; serving with empty tool set");
                Vec::new()
            }
        };
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        info!(server = %self.name, tool_count = tools.len(), "server connected");
        *self.tools.lock().unwrap() = tools;

        // Server-initiated notifications are logged; the supported method
        // set has no client-side behavior attached to them.
        let notify_server = self.name.clone();
        tokio::spawn(async move {
            let mut notifications = notifications;
            while let Some(n) = notifications.recv().await {
                debug!(server = %notify_server, method = %n.method, "server notification");
            }
        });

        // Demote to Disconnected when the transport dies, unless a newer
        // link has already replaced this one.
        let monitor_self = Arc::clone(&self);
        let monitor_transport = Arc::clone(&transport);
        tokio::spawn(async move {
            let mut closed = monitor_transport.closed_signal();
            if closed.wait_for(|c| *c).await.is_ok() {
                let mut link = monitor_self.link.lock().await;
                let is_current = link
                    .as_ref()
                    .map(|t| Arc::ptr_eq(t, &monitor_transport))
                    .unwrap_or(false);
                if is_current {
                    *link = None;
                    drop(link);
                    warn!(server = %monitor_self.name, "server disconnected");
                    monitor_self.set_status(ServerStatus::Disconnected);
                }
            }
        });

        *self.link.lock().await = Some(transport);
        self.set_status(ServerStatus::Connected);
        Ok(())
    }

    /// Run one `tools/call` and return the raw fragments plus error flag.
    pub async fn invoke(
        &self,
        tool: &str,
        args: &Value,
        timeout: Duration,
    ) -> Result<RawInvocation, RpcError> {
        let transport = self
            .link
            .lock()
            .await
            .clone()
            .ok_or(RpcError::TransportClosed)?;

        let params = json!({ "name": tool, "arguments": args });
        let result = transport.request("tools/call", Some(params), timeout).await?;

        let content = result
            .get("content")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let is_error = result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Ok(RawInvocation { content, is_error })
    }

    /// Idempotent shutdown: close stdin, grace-wait, terminate.
    pub async fn close(&self) {
        let link = self.link.lock().await.take();
        if let Some(transport) = link {
            transport.close().await;
        }
        self.set_status(ServerStatus::Disconnected);
    }

    #[cfg(test)]
    pub(crate) fn stub(
        name: &str,
        tools: Vec<ToolSchema>,
        status: ServerStatus,
        generation: Arc<AtomicU64>,
    ) -> Self {
        let server = Self::new(
            name,
            ServerSpec::default(),
            TimeoutConfig::default(),
            generation,
        );
        *server.tools.lock().unwrap() = tools;
        *server.status.lock().unwrap() = status;
        server
    }

    #[cfg(test)]
    pub(crate) fn set_tools_for_test(&self, tools: Vec<ToolSchema>) {
        *self.tools.lock().unwrap() = tools;
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
            description: String::new(),
            input_schema: json!({"type": "object"}),
        }
    }

    #[test]
    fn status_display_includes_error_reason() {
        let s = ServerStatus::Errored("spawn failed".into());
        assert_eq!(s.to_string(), "errored: spawn failed");
        assert_eq!(ServerStatus::Connected.to_string(), "connected");
    }

    #[test]
    fn stub_reports_tools_and_status() {
        let generation = Arc::new(AtomicU64::new(0));
        let s = ManagedServer::stub(
            "alpha",
            vec![tool("echo")],
            ServerStatus::Connected,
            generation,
        );
        assert!(s.has_tool("echo"));
        assert!(!s.has_tool("other"));
        assert_eq!(s.status(), ServerStatus::Connected);
    }

    #[test]
    fn errored_status_records_last_error() {
        let generation = Arc::new(AtomicU64::new(0));
        let s = ManagedServer::stub("a", vec![], ServerStatus::Disconnected, generation);
        s.set_status(ServerStatus::Errored("boom".into()));
        assert_eq!(s.last_error().as_deref(), Some("boom"));
    }

    #[test]
    fn set_status_bumps_generation() {
        let generation = Arc::new(AtomicU64::new(0));
        let s = ManagedServer::stub("a", vec![], ServerStatus::Disconnected, generation.clone());
        s.set_status(ServerStatus::Connected);
        assert_eq!(generation.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn invoke_without_link_reports_transport_closed() {
        let generation = Arc::new(AtomicU64::new(0));
        let s = ManagedServer::stub("a", vec![tool("echo")], ServerStatus::Connected, generation);
        let err = s
            .invoke("echo", &json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::TransportClosed));
    }
}
