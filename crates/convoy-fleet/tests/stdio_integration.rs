// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Fleet integration tests against a real subprocess.
//!
//! The fake server is a shell script that answers the deterministic id
//! sequence the transport produces (initialize = 1, tools/list = 2,
//! tools/call = 3); the `initialized` notification carries no id and is
//! consumed in between.
use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;

use convoy_config::{FleetConfig, ServerSpec, TimeoutConfig};
use convoy_core::ToolBroker;
use convoy_fleet::{ServerManager, ServerStatus};

const FAKE_SERVER_SCRIPT: &str = r#"
read _init
printf '%s\n' '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake-tools","version":"0.0.1"}}}'
read _initialized
read _tools_list
printf '%s\n' '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"echoes the message","inputSchema":{"type":"object","properties":{"message":{"type":"string"}}}}]}}'
read _tools_call
printf '%s\n' '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"hi from fake"}],"isError":false}}'
"#;

fn fleet_with(name: &str, command: &str, args: Vec<String>) -> FleetConfig {
    let mut servers = HashMap::new();
    servers.insert(
        name.to_string(),
        ServerSpec {
            command: command.to_string(),
            args,
            env: HashMap::new(),
        },
    );
    FleetConfig { servers }
}

fn fast_timeouts() -> TimeoutConfig {
    TimeoutConfig {
        model_call_secs: 5,
        rpc_secs: 5,
        tool_call_secs: 5,
        handshake_secs: 5,
    }
}

#[tokio::test]
async fn connect_discover_and_invoke_over_real_stdio() {
    let fleet = fleet_with(
        "fake",
        "sh",
        vec!["-c".into(), FAKE_SERVER_SCRIPT.into()],
    );
    let manager = ServerManager::from_config(&fleet, fast_timeouts());

    let connected = manager.connect_all().await;
    assert_eq!(connected, ["fake"]);

    let snapshot = manager.status_snapshot();
    assert_eq!(snapshot["fake"].status, ServerStatus::Connected);

    let tools = manager.all_tools();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");
    assert_eq!(manager.find_tool_provider("echo").as_deref(), Some("fake"));

    let outcome = manager
        .dispatch("echo", &json!({"message": "hello"}), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(outcome.content, "hi from fake");
    assert!(!outcome.is_error);

    manager.shutdown().await;
    assert_eq!(
        manager.status_snapshot()["fake"].status,
        ServerStatus::Disconnected
    );
}

#[tokio::test]
async fn immediate_exit_is_recorded_as_handshake_failure() {
    let fleet = fleet_with("dead", "sh", vec!["-c".into(), "exit 0".into()]);
    let manager = ServerManager::from_config(&fleet, fast_timeouts());

    let connected = manager.connect_all().await;
    assert!(connected.is_empty());

    let snapshot = manager.status_snapshot();
    assert!(
        matches!(snapshot["dead"].status, ServerStatus::Errored(_)),
        "status must record the failed handshake: {:?}",
        snapshot["dead"].status
    );
    assert!(snapshot["dead"].last_error.is_some());
}

#[tokio::test]
async fn missing_binary_is_recorded_as_spawn_failure() {
    let fleet = fleet_with(
        "ghost",
        "/nonexistent/convoy-test-binary",
        vec![],
    );
    let manager = ServerManager::from_config(&fleet, fast_timeouts());

    let connected = manager.connect_all().await;
    assert!(connected.is_empty());
    assert!(matches!(
        manager.status_snapshot()["ghost"].status,
        ServerStatus::Errored(_)
    ));
}

#[tokio::test]
async fn retry_failed_reconnects_an_errored_server() {
    // First attempt fails (the script exits immediately); the retry uses the
    // same spec, so it fails again — but the call itself must be clean and
    // leave the status errored rather than wedged in connecting.
    let fleet = fleet_with("flaky", "sh", vec!["-c".into(), "exit 1".into()]);
    let manager = ServerManager::from_config(&fleet, fast_timeouts());

    assert!(manager.connect_all().await.is_empty());
    assert!(manager.retry_failed().await.is_empty());
    assert!(matches!(
        manager.status_snapshot()["flaky"].status,
        ServerStatus::Errored(_)
    ));
}
