//! MCP Client implementation

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::protocol::{
    IncomingMessage, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    RequestId, methods,
};
use crate::transport::Transport;
use crate::{McpTool, PROTOCOL_VERSION, ServerCapabilities};

/// MCP Client for connecting to MCP servers
pub struct McpClient<T: Transport> {
    transport: Arc<Mutex<T>>,
    request_id: AtomicI64,
    server_info: Option<ServerInfo>,
    server_capabilities: Option<ServerCapabilities>,
}

impl<T: Transport> McpClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
            request_id: AtomicI64::new(1),
            server_info: None,
            server_capabilities: None,
        }
    }

    fn next_id(&self) -> RequestId {
        RequestId::Number(self.request_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Run the `initialize` handshake and send `notifications/initialized`.
    pub async fn initialize(&mut self, client_info: ClientInfo) -> Result<ServerInfo, McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": client_info.name,
                "version": client_info.version
            }
        });

        let request = JsonRpcRequest::new(self.next_id(), methods::INITIALIZE).with_params(params);
        let result = self.request_result(request).await?;

        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::Protocol(e.to_string()))?;

        if init.protocol_version != PROTOCOL_VERSION {
            debug!(
                server_version = %init.protocol_version,
                "server negotiated a different protocol version"
            );
        }

        let notification = serde_json::to_value(JsonRpcNotification::new(methods::INITIALIZED))
            .map_err(|e| McpError::Protocol(e.to_string()))?;
        {
            let mut transport = self.transport.lock().await;
            transport
                .send(notification)
                .await
                .map_err(|e| McpError::Transport(e.to_string()))?;
        }

        let info = ServerInfo {
            name: init.server_info.name,
            version: init.server_info.version,
        };
        self.server_capabilities = Some(init.capabilities);
        self.server_info = Some(info.clone());
        Ok(info)
    }

    /// Server identity reported during the handshake
    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn server_capabilities(&self) -> Option<&ServerCapabilities> {
        self.server_capabilities.as_ref()
    }

    /// List available tools
    pub async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        let request = JsonRpcRequest::new(self.next_id(), methods::TOOLS_LIST)
            .with_params(serde_json::json!({}));
        let result = self.request_result(request).await?;

        let tools_result: ToolsListResult =
            serde_json::from_value(result).map_err(|e| McpError::Protocol(e.to_string()))?;
        Ok(tools_result.tools)
    }

    /// Call a tool
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments
        });

        let request = JsonRpcRequest::new(self.next_id(), methods::TOOLS_CALL).with_params(params);
        let result = self.request_result(request).await?;

        serde_json::from_value(result).map_err(|e| McpError::Protocol(e.to_string()))
    }

    /// Close the underlying transport
    pub async fn close(&self) -> Result<(), McpError> {
        let mut transport = self.transport.lock().await;
        transport
            .close()
            .await
            .map_err(|e| McpError::Transport(e.to_string()))
    }

    async fn request_result(&self, request: JsonRpcRequest) -> Result<Value, McpError> {
        let response = self.send_request(request).await?;
        if let Some(error) = response.error {
            Err(McpError::Server(error.message))
        } else {
            // A bare `null` result is legal for methods with no payload.
            Ok(response.result.unwrap_or(Value::Null))
        }
    }

    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        let mut transport = self.transport.lock().await;

        let expected = request.id.clone();
        let request_value =
            serde_json::to_value(&request).map_err(|e| McpError::Protocol(e.to_string()))?;

        transport
            .send(request_value)
            .await
            .map_err(|e| McpError::Transport(e.to_string()))?;

        loop {
            let value = transport
                .receive()
                .await
                .map_err(|e| McpError::Transport(e.to_string()))?
                .ok_or_else(|| McpError::Transport("Connection closed".to_string()))?;

            match IncomingMessage::classify(value) {
                Some(IncomingMessage::Response(response)) if response.id == expected => {
                    return Ok(response);
                }
                Some(IncomingMessage::Response(response)) => {
                    warn!(id = %response.id, expected = %expected, "discarding response with unexpected id");
                }
                Some(IncomingMessage::Notification(note)) => {
                    debug!(method = %note.method, "ignoring server notification");
                }
                Some(IncomingMessage::Request(server_request)) => {
                    // Servers may ping while a call is in flight.
                    let reply = if server_request.method == methods::PING {
                        JsonRpcResponse::success(server_request.id, serde_json::json!({}))
                    } else {
                        JsonRpcResponse::error(server_request.id, JsonRpcError::method_not_found())
                    };
                    let reply =
                        serde_json::to_value(reply).map_err(|e| McpError::Protocol(e.to_string()))?;
                    transport
                        .send(reply)
                        .await
                        .map_err(|e| McpError::Transport(e.to_string()))?;
                }
                None => {
                    return Err(McpError::Protocol("Received a non JSON-RPC message".to_string()));
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl ClientInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, serde::Deserialize)]
struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    protocol_version: String,
    #[serde(default)]
    capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    server_info: ServerInfoInner,
}

#[derive(Debug, serde::Deserialize)]
struct ServerInfoInner {
    name: String,
    #[serde(default)]
    version: String,
}

#[derive(Debug, serde::Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<McpTool>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Concatenated text of all text content items
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|item| item.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content_type: "text".to_string(),
            text: Some(text.into()),
        }
    }
}

/// MCP errors
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Server error: {0}")]
    Server(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::StreamTransport;
    use serde_json::json;
    use tokio::io::{ReadHalf, WriteHalf, DuplexStream};

    type Pipe = StreamTransport<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    fn pipe_pair() -> (Pipe, Pipe) {
        let (a, b) = tokio::io::duplex(4096);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        (StreamTransport::new(ar, aw), StreamTransport::new(br, bw))
    }

    #[tokio::test]
    async fn test_skips_notifications_and_stray_responses() {
        let (client_side, mut server_side) = pipe_pair();
        let client = McpClient::new(client_side);

        let server = tokio::spawn(async move {
            let request = server_side.receive().await.unwrap().unwrap();
            let id = request["id"].clone();
            server_side
                .send(json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {}}))
                .await
                .unwrap();
            server_side
                .send(json!({"jsonrpc": "2.0", "id": 999, "result": {}}))
                .await
                .unwrap();
            server_side
                .send(json!({"jsonrpc": "2.0", "id": id, "result": {"tools": [
                    {"name": "echo", "description": "Echo", "inputSchema": {"type": "object"}}
                ]}}))
                .await
                .unwrap();
        });

        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_maps_to_server_variant() {
        let (client_side, mut server_side) = pipe_pair();
        let client = McpClient::new(client_side);

        tokio::spawn(async move {
            let request = server_side.receive().await.unwrap().unwrap();
            server_side
                .send(json!({"jsonrpc": "2.0", "id": request["id"], "error": {"code": -32602, "message": "bad args"}}))
                .await
                .unwrap();
        });

        let err = client.call_tool("echo", json!({})).await.unwrap_err();
        assert!(matches!(err, McpError::Server(ref m) if m == "bad args"));
    }

    #[tokio::test]
    async fn test_closed_stream_is_transport_error() {
        let (client_side, server_side) = pipe_pair();
        drop(server_side);
        let client = McpClient::new(client_side);

        let err = client.list_tools().await.unwrap_err();
        assert!(matches!(err, McpError::Transport(_)));
    }

    #[test]
    fn test_tool_call_result_text_joins_items() {
        let result: ToolCallResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "first"},
                {"type": "image"},
                {"type": "text", "text": "second"}
            ]
        }))
        .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.text(), "first\nsecond");
    }
}
