//! Orchestrator tests
//!
//! Drive full chat calls against an in-process calculator provider and a
//! scripted model backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use conduit_core::{
    ConnectionManager, ConnectionTimeouts, ConversationMessage, Error, InProcessLauncher,
    ModelResponse, NO_TEXT_FALLBACK, Orchestrator, ProviderDescriptor, ProviderRegistry,
    RuntimeKind, ScriptedBackend, ToolCallRequest, TurnMessage,
};
use conduit_mcp::demo::Calculator;
use conduit_mcp::{McpHandler, McpTool};
use serde_json::{Value, json};
use tempfile::TempDir;

fn registry_in(dir: &TempDir, names: &[&str]) -> ProviderRegistry {
    let script = dir.path().join("provider.py");
    std::fs::write(&script, "# provider stub\n").unwrap();
    let mut registry = ProviderRegistry::load(dir.path().join("providers.json"));
    for name in names {
        registry
            .add(ProviderDescriptor::new(*name, &script, RuntimeKind::Python))
            .unwrap();
    }
    registry
}

fn orchestrator_with<H: McpHandler + 'static>(
    registry: ProviderRegistry,
    handler: H,
    backend: &ScriptedBackend,
) -> (Orchestrator, Arc<InProcessLauncher<H>>) {
    let launcher = Arc::new(InProcessLauncher::new(Arc::new(handler)));
    let connections = ConnectionManager::new(launcher.clone(), ConnectionTimeouts::default());
    let orchestrator = Orchestrator::new(registry, connections, Box::new(backend.clone()));
    (orchestrator, launcher)
}

fn calc_orchestrator(
    dir: &TempDir,
    backend: &ScriptedBackend,
) -> (Orchestrator, Arc<InProcessLauncher<Calculator>>) {
    orchestrator_with(registry_in(dir, &["calc"]), Calculator, backend)
}

fn call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest::new(id, name, arguments)
}

mod scenario_tests {
    use super::*;

    #[tokio::test]
    async fn test_what_is_two_plus_two() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new();
        backend
            .push_response(ModelResponse::tool_calls(vec![call("c1", "add", json!({"a": 2, "b": 2}))]))
            .push_response(ModelResponse::text("4"));
        let (mut orchestrator, _) = calc_orchestrator(&dir, &backend);

        orchestrator.connect("calc").await.unwrap();
        let tools = orchestrator.list_tools().await.unwrap();
        assert!(!tools.is_empty());

        let answer = orchestrator.chat("What is 2+2?").await.unwrap();
        assert_eq!(answer, "4");
        assert_eq!(
            orchestrator.history(),
            vec![
                ConversationMessage::user("What is 2+2?"),
                ConversationMessage::assistant("4"),
            ]
        );

        // Second request saw the tool call and its result
        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        match &requests[1].messages[..] {
            [TurnMessage::User(prompt), TurnMessage::ToolCalls { calls, .. }, TurnMessage::ToolResults(results)] => {
                assert_eq!(prompt, "What is 2+2?");
                assert_eq!(calls[0].name, "add");
                assert_eq!(results[0].call_id, "c1");
                assert_eq!(results[0].content, "4");
                assert!(!results[0].is_error);
            }
            other => panic!("unexpected message list: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_chat_without_provider_is_not_connected() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::repeating(ModelResponse::text("hi"));
        let (mut orchestrator, _) = calc_orchestrator(&dir, &backend);

        let err = orchestrator.chat("hello").await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
        assert!(orchestrator.history().is_empty());
        assert_eq!(backend.request_count(), 0);
    }
}

mod loop_tests {
    use super::*;

    #[tokio::test]
    async fn test_plain_answer_appends_exactly_two_entries() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new();
        backend.push_response(ModelResponse::text("Hello there"));
        let (mut orchestrator, _) = calc_orchestrator(&dir, &backend);
        orchestrator.connect("calc").await.unwrap();

        let outcome = orchestrator.chat_with_outcome("hi").await.unwrap();
        assert_eq!(outcome.answer, "Hello there");
        assert_eq!(outcome.rounds, 1);
        assert_eq!(outcome.tool_calls, 0);
        assert_eq!(orchestrator.history().len(), 2);
    }

    #[tokio::test]
    async fn test_failing_tool_still_reaches_done() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new();
        backend
            .push_response(ModelResponse::tool_calls(vec![call("c1", "divide", json!({"a": 1, "b": 0}))]))
            .push_response(ModelResponse::text("You cannot divide by zero."));
        let (mut orchestrator, _) = calc_orchestrator(&dir, &backend);
        orchestrator.connect("calc").await.unwrap();

        let answer = orchestrator.chat("What is 1/0?").await.unwrap();
        assert_eq!(answer, "You cannot divide by zero.");

        let history = orchestrator.history();
        assert_eq!(history.len(), 2);
        assert!(history.iter().all(|m| !m.content.contains("Division by zero")));

        let requests = backend.requests();
        let TurnMessage::ToolResults(results) = &requests[1].messages[2] else {
            panic!("expected tool results");
        };
        assert!(results[0].is_error);
        assert_eq!(results[0].content, "Tool 'divide' failed: Division by zero");
        assert_eq!(results[0].payload(), json!({"error": "Tool 'divide' failed: Division by zero"}));
    }

    #[tokio::test]
    async fn test_tool_calls_run_in_emitted_order() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new();
        backend
            .push_response(ModelResponse::tool_calls(vec![
                call("c1", "multiply", json!({"a": 3, "b": 4})),
                call("c2", "unknown_tool", json!({})),
                call("c3", "subtract", json!({"a": 10, "b": 1})),
            ]))
            .push_response(ModelResponse::text("done"));
        let (mut orchestrator, _) = calc_orchestrator(&dir, &backend);
        orchestrator.connect("calc").await.unwrap();

        let outcome = orchestrator.chat_with_outcome("go").await.unwrap();
        assert_eq!(outcome.tool_calls, 3);

        let requests = backend.requests();
        let TurnMessage::ToolResults(results) = &requests[1].messages[2] else {
            panic!("expected tool results");
        };
        let ids: Vec<_> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, ["c1", "c2", "c3"]);
        assert_eq!(results[0].content, "12");
        assert!(results[1].is_error);
        assert_eq!(results[2].content, "9");
    }

    #[tokio::test]
    async fn test_string_encoded_and_malformed_arguments() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new();
        backend
            .push_response(ModelResponse::tool_calls(vec![
                call("c1", "add", json!("{\"a\": 1, \"b\": 2}")),
                call("c2", "add", json!([1, 2])),
            ]))
            .push_response(ModelResponse::text("3"));
        let (mut orchestrator, _) = calc_orchestrator(&dir, &backend);
        orchestrator.connect("calc").await.unwrap();

        assert_eq!(orchestrator.chat("1+2").await.unwrap(), "3");

        let requests = backend.requests();
        let TurnMessage::ToolResults(results) = &requests[1].messages[2] else {
            panic!("expected tool results");
        };
        assert_eq!(results[0].content, "3");
        assert!(results[1].is_error);
        assert!(results[1].content.contains("JSON object"));
    }

    #[tokio::test]
    async fn test_empty_answer_uses_fallback_text() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new();
        backend
            .push_response(ModelResponse::tool_calls(vec![call("c1", "add", json!({"a": 1, "b": 1}))]))
            .push_response(ModelResponse {
                text: Some("   ".to_string()),
                tool_calls: vec![],
            });
        let (mut orchestrator, _) = calc_orchestrator(&dir, &backend);
        orchestrator.connect("calc").await.unwrap();

        let answer = orchestrator.chat("add").await.unwrap();
        assert_eq!(answer, NO_TEXT_FALLBACK);
        assert_eq!(orchestrator.history()[1].content, NO_TEXT_FALLBACK);
    }

    #[tokio::test]
    async fn test_generation_error_leaves_memory_untouched() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new();
        backend
            .push_response(ModelResponse::text("first"))
            .push_response(ModelResponse::tool_calls(vec![call("c1", "add", json!({"a": 1, "b": 1}))]))
            .push_error("connection reset");
        let (mut orchestrator, _) = calc_orchestrator(&dir, &backend);
        orchestrator.connect("calc").await.unwrap();

        orchestrator.chat("one").await.unwrap();
        let before = orchestrator.history();

        let err = orchestrator.chat("two").await.unwrap_err();
        assert!(matches!(err, Error::Generation(_)));
        assert_eq!(orchestrator.history(), before);
    }

    #[tokio::test]
    async fn test_max_rounds_terminates_runaway_loop() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::repeating(ModelResponse::tool_calls(vec![call(
            "c",
            "add",
            json!({"a": 1, "b": 1}),
        )]));
        let (orchestrator, _) = calc_orchestrator(&dir, &backend);
        let mut orchestrator = orchestrator.with_max_rounds(3);
        orchestrator.connect("calc").await.unwrap();

        let err = orchestrator.chat("loop forever").await.unwrap_err();
        assert!(matches!(err, Error::MaxRoundsExceeded(3)));
        assert_eq!(err.to_string(), "Exceeded maximum tool-call rounds (3)");
        assert_eq!(backend.request_count(), 3);
        assert!(orchestrator.history().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_replayed_and_system_names_provider() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new();
        backend
            .push_response(ModelResponse::text("a1"))
            .push_response(ModelResponse::text("a2"));
        let (mut orchestrator, _) = calc_orchestrator(&dir, &backend);
        orchestrator.connect("calc").await.unwrap();

        orchestrator.chat("q1").await.unwrap();
        orchestrator.chat("q2").await.unwrap();

        let requests = backend.requests();
        assert_eq!(
            requests[1].messages,
            vec![
                TurnMessage::User("q1".into()),
                TurnMessage::Assistant("a1".into()),
                TurnMessage::User("q2".into()),
            ]
        );
        assert!(requests[1].system.contains("'calc'"));
        assert!(requests[1].tool_names.contains(&"add".to_string()));
    }

    #[tokio::test]
    async fn test_memory_keeps_most_recent_window() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new();
        for i in 0..7 {
            backend.push_response(ModelResponse::text(format!("a{}", i)));
        }
        let (orchestrator, _) = calc_orchestrator(&dir, &backend);
        let mut orchestrator = orchestrator.with_memory_capacity(6);
        orchestrator.connect("calc").await.unwrap();

        for i in 0..7 {
            orchestrator.chat(&format!("q{}", i)).await.unwrap();
            assert!(orchestrator.history().len() <= 6);
        }

        let contents: Vec<_> = orchestrator.history().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, ["q4", "a4", "q5", "a5", "q6", "a6"]);
    }

    #[tokio::test]
    async fn test_clear_history_and_blank_prompt() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::repeating(ModelResponse::text("ok"));
        let (mut orchestrator, _) = calc_orchestrator(&dir, &backend);
        orchestrator.connect("calc").await.unwrap();

        orchestrator.chat("hi").await.unwrap();
        orchestrator.clear_history();
        assert!(orchestrator.history().is_empty());

        assert!(matches!(orchestrator.chat("   ").await, Err(Error::Validation(_))));
        assert!(orchestrator.history().is_empty());
    }
}

mod provider_lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_twice_launches_once() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new();
        let (mut orchestrator, launcher) = calc_orchestrator(&dir, &backend);

        orchestrator.connect("calc").await.unwrap();
        orchestrator.connect("calc").await.unwrap();
        assert_eq!(launcher.launch_count(), 1);
        assert_eq!(orchestrator.active_provider(), Some("calc"));
    }

    #[tokio::test]
    async fn test_switching_keeps_previous_connection_live() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new();
        let (mut orchestrator, launcher) =
            orchestrator_with(registry_in(&dir, &["one", "two"]), Calculator, &backend);

        orchestrator.connect("one").await.unwrap();
        orchestrator.connect("two").await.unwrap();
        assert_eq!(orchestrator.active_provider(), Some("two"));
        assert_eq!(orchestrator.connections().connected(), ["one", "two"]);

        // Back to the first one without a new launch
        orchestrator.connect("one").await.unwrap();
        assert_eq!(launcher.launch_count(), 2);

        // Disconnecting a non-active provider keeps the active one
        orchestrator.disconnect(Some("two")).await;
        assert_eq!(orchestrator.active_provider(), Some("one"));

        orchestrator.disconnect(Some("never-connected")).await;
        orchestrator.disconnect(None).await;
        assert_eq!(orchestrator.active_provider(), None);
        assert!(orchestrator.connections().connected().is_empty());
    }

    #[tokio::test]
    async fn test_removing_active_provider_disconnects_it() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new();
        let (mut orchestrator, _) = calc_orchestrator(&dir, &backend);
        orchestrator.connect("calc").await.unwrap();

        assert!(orchestrator.remove_provider("calc").await.unwrap());
        assert_eq!(orchestrator.active_provider(), None);
        assert!(orchestrator.list_providers().is_empty());
        assert!(matches!(orchestrator.list_tools().await, Err(Error::NotConnected)));

        // Removing again is a no-op
        assert!(!orchestrator.remove_provider("calc").await.unwrap());
    }

    #[tokio::test]
    async fn test_connect_any_falls_back_to_registered_order() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new();
        let (mut orchestrator, _) = calc_orchestrator(&dir, &backend);

        let name = orchestrator.connect_any(&["missing"]).await.unwrap();
        assert_eq!(name, "calc");
        assert_eq!(orchestrator.active_provider(), Some("calc"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::new();
        let (mut orchestrator, _) = calc_orchestrator(&dir, &backend);
        orchestrator.close().await;
        orchestrator.connect("calc").await.unwrap();
        orchestrator.close().await;
        orchestrator.close().await;
        assert_eq!(orchestrator.active_provider(), None);
    }

    #[tokio::test]
    async fn test_set_model_switches_backend_model() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::repeating(ModelResponse::text("ok"));
        let (mut orchestrator, _) = calc_orchestrator(&dir, &backend);
        orchestrator.connect("calc").await.unwrap();

        orchestrator.set_model("gemini-2.5-pro");
        assert_eq!(orchestrator.model(), "gemini-2.5-pro");
        orchestrator.chat("hi").await.unwrap();
        assert_eq!(backend.requests()[0].model, "gemini-2.5-pro");
    }
}

/// Handler whose `slow` tool never finishes within the test timeout
struct Sluggish;

#[async_trait]
impl McpHandler for Sluggish {
    async fn list_tools(&self) -> Vec<McpTool> {
        vec![McpTool::new("slow", "Takes forever", json!({"type": "object"}))]
    }

    async fn call_tool(&self, _name: &str, _arguments: Value) -> Result<Value, String> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Value::String("finally".into()))
    }
}

#[tokio::test(start_paused = true)]
async fn test_tool_timeout_is_reported_to_the_model() {
    let dir = TempDir::new().unwrap();
    let backend = ScriptedBackend::new();
    backend
        .push_response(ModelResponse::tool_calls(vec![call("c1", "slow", json!({}))]))
        .push_response(ModelResponse::text("The tool timed out."));

    let launcher = Arc::new(InProcessLauncher::new(Arc::new(Sluggish)));
    let timeouts = ConnectionTimeouts {
        invoke: Duration::from_secs(2),
        ..ConnectionTimeouts::default()
    };
    let connections = ConnectionManager::new(launcher, timeouts);
    let mut orchestrator =
        Orchestrator::new(registry_in(&dir, &["slow"]), connections, Box::new(backend.clone()));
    orchestrator.connect("slow").await.unwrap();

    let answer = orchestrator.chat("try it").await.unwrap();
    assert_eq!(answer, "The tool timed out.");

    let requests = backend.requests();
    let TurnMessage::ToolResults(results) = &requests[1].messages[2] else {
        panic!("expected tool results");
    };
    assert!(results[0].is_error);
    assert!(results[0].content.contains("timed out"));
}
