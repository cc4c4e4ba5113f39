//! Connection manager tests
//!
//! Uses hand-written fake providers to exercise the failure paths: crashes
//! mid-call, handshakes that never complete, and providers that hang up.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_core::{
    ConnectionManager, ConnectionTimeouts, Error, InProcessLauncher, ProviderDescriptor,
    ProviderLauncher, ProviderRegistry, RuntimeKind,
};
use conduit_core::connection::ProviderTransport;
use conduit_mcp::demo::Calculator;
use conduit_mcp::{StreamTransport, Transport};
use serde_json::{Map, Value, json};

fn registry_with(names: &[&str]) -> ProviderRegistry {
    let mut registry = ProviderRegistry::in_memory();
    let exe = std::env::current_exe().unwrap();
    for name in names {
        registry
            .add(ProviderDescriptor::new(*name, &exe, RuntimeKind::Executable))
            .unwrap();
    }
    registry
}

fn args(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

#[derive(Clone, Copy)]
enum FakeBehavior {
    /// Completes the handshake and lists one tool, then dies on the first call
    CrashOnCall,
    /// Reads requests but never answers
    Silent,
    /// Completes the handshake, then ignores every request
    MuteAfterHandshake,
    /// Hangs up before the handshake
    HangUp,
}

struct FakeLauncher(FakeBehavior);

#[async_trait]
impl ProviderLauncher for FakeLauncher {
    async fn launch(&self, _descriptor: &ProviderDescriptor) -> std::io::Result<ProviderTransport> {
        let (client_io, server_io) = tokio::io::duplex(16 * 1024);
        let (read, write) = tokio::io::split(server_io);
        let behavior = self.0;

        tokio::spawn(async move {
            let mut server = StreamTransport::new(read, write);
            if let FakeBehavior::HangUp = behavior {
                let _ = server.close().await;
                return;
            }
            while let Ok(Some(message)) = server.receive().await {
                let Some(id) = message.get("id").cloned() else {
                    continue;
                };
                let method = message["method"].as_str().unwrap_or_default().to_string();
                let result = match (behavior, method.as_str()) {
                    (FakeBehavior::Silent, _) => continue,
                    (FakeBehavior::MuteAfterHandshake, m) if m != "initialize" => continue,
                    (_, "initialize") => json!({
                        "protocolVersion": "2024-11-05",
                        "capabilities": {"tools": {}},
                        "serverInfo": {"name": "fake", "version": "0.0.1"}
                    }),
                    (_, "tools/list") => json!({
                        "tools": [{"name": "explode", "inputSchema": {"type": "object"}}]
                    }),
                    // Crash: drop the channel without answering
                    _ => return,
                };
                let response = json!({"jsonrpc": "2.0", "id": id, "result": result});
                if server.send(response).await.is_err() {
                    return;
                }
            }
        });

        let (read, write) = tokio::io::split(client_io);
        Ok(Box::new(StreamTransport::new(read, write)))
    }
}

fn fake_manager(behavior: FakeBehavior, timeouts: ConnectionTimeouts) -> ConnectionManager {
    ConnectionManager::new(Arc::new(FakeLauncher(behavior)), timeouts)
}

mod connect_tests {
    use super::*;

    #[tokio::test]
    async fn test_reconnect_reuses_live_connection() {
        let registry = registry_with(&["calc"]);
        let launcher = Arc::new(InProcessLauncher::new(Arc::new(Calculator)));
        let mut manager = ConnectionManager::new(launcher.clone(), ConnectionTimeouts::default());

        manager.connect(&registry, "calc").await.unwrap();
        manager.connect(&registry, "calc").await.unwrap();
        assert_eq!(launcher.launch_count(), 1);
        assert_eq!(manager.connected(), ["calc"]);
        assert!(manager.is_connected("calc"));
    }

    #[tokio::test]
    async fn test_hang_up_during_handshake_is_connection_error() {
        let registry = registry_with(&["fake"]);
        let mut manager = fake_manager(FakeBehavior::HangUp, ConnectionTimeouts::default());

        let err = manager.connect(&registry, "fake").await.err().unwrap();
        assert!(matches!(err, Error::Connection { ref name, .. } if name == "fake"));
        assert_eq!(manager.active_provider(), None);
        assert!(manager.connected().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_handshake_times_out() {
        let registry = registry_with(&["fake"]);
        let timeouts = ConnectionTimeouts {
            connect: Duration::from_secs(3),
            ..ConnectionTimeouts::default()
        };
        let mut manager = fake_manager(FakeBehavior::Silent, timeouts);

        let err = manager.connect(&registry, "fake").await.err().unwrap();
        assert!(err.to_string().contains("timed out"));
        assert!(!manager.is_connected("fake"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_list_tools_times_out() {
        let registry = registry_with(&["fake"]);
        let timeouts = ConnectionTimeouts {
            list_tools: Duration::from_secs(5),
            ..ConnectionTimeouts::default()
        };
        let mut manager = fake_manager(FakeBehavior::MuteAfterHandshake, timeouts);
        manager.connect(&registry, "fake").await.unwrap();

        let err = manager.list_tools().await.err().unwrap();
        assert!(matches!(err, Error::Transport(ref msg) if msg.contains("timed out")));
        // The connection itself stays in the pool
        assert_eq!(manager.active_provider(), Some("fake"));
    }

    #[tokio::test]
    async fn test_failed_switch_keeps_previous_active() {
        let registry = registry_with(&["calc"]);
        let launcher = Arc::new(InProcessLauncher::new(Arc::new(Calculator)));
        let mut manager = ConnectionManager::new(launcher, ConnectionTimeouts::default());

        manager.connect(&registry, "calc").await.unwrap();
        assert!(manager.connect(&registry, "ghost").await.is_err());
        assert_eq!(manager.active_provider(), Some("calc"));
    }
}

mod invoke_tests {
    use super::*;

    #[tokio::test]
    async fn test_invoke_success_and_provider_error() {
        let registry = registry_with(&["calc"]);
        let launcher = Arc::new(InProcessLauncher::new(Arc::new(Calculator)));
        let mut manager = ConnectionManager::new(launcher, ConnectionTimeouts::default());
        manager.connect(&registry, "calc").await.unwrap();

        let ok = manager.invoke("add", args(json!({"a": 2, "b": 3}))).await.unwrap();
        assert!(!ok.is_error);
        assert_eq!(ok.content, "5");

        let failed = manager.invoke("divide", args(json!({"a": 2, "b": 0}))).await.unwrap();
        assert!(failed.is_error);
        assert_eq!(failed.content, "Tool 'divide' failed: Division by zero");
    }

    #[tokio::test]
    async fn test_crash_mid_call_is_error_result() {
        let registry = registry_with(&["fake"]);
        let mut manager = fake_manager(FakeBehavior::CrashOnCall, ConnectionTimeouts::default());
        manager.connect(&registry, "fake").await.unwrap();

        let tools = manager.list_tools().await.unwrap();
        assert_eq!(tools[0].name, "explode");

        let result = manager.invoke("explode", Map::new()).await.unwrap();
        assert!(result.is_error);
        assert_eq!(result.tool_name, "explode");
        assert!(result.content.starts_with("Tool 'explode' failed:"));

        // The provider is gone; listing now fails as a transport error
        assert!(matches!(manager.list_tools().await, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn test_disconnected_provider_is_not_connected() {
        let registry = registry_with(&["calc"]);
        let launcher = Arc::new(InProcessLauncher::new(Arc::new(Calculator)));
        let mut manager = ConnectionManager::new(launcher, ConnectionTimeouts::default());
        manager.connect(&registry, "calc").await.unwrap();

        manager.disconnect(Some("calc")).await;
        assert!(matches!(
            manager.invoke("add", Map::new()).await,
            Err(Error::NotConnected)
        ));
    }
}
