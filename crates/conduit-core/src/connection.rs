//! Connection Manager
//!
//! Owns the pool of live provider connections and the single "active"
//! provider whose tools the model sees. Launching is delegated to a
//! [`ProviderLauncher`] so tests and embedders can serve providers in-process.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use conduit_mcp::{
    ClientInfo, McpClient, McpHandler, McpServer, McpTool, ServerInfo, StdioTransport,
    StreamTransport, Transport,
};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::registry::{ProviderDescriptor, ProviderRegistry};

/// Boxed transport to a launched provider
pub type ProviderTransport = Box<dyn Transport>;

/// Per-operation time limits. A timeout is handled exactly like a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTimeouts {
    pub connect: Duration,
    pub list_tools: Duration,
    pub invoke: Duration,
}

impl Default for ConnectionTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            list_tools: Duration::from_secs(30),
            invoke: Duration::from_secs(120),
        }
    }
}

/// Starts a provider and hands back the byte channel to it
#[async_trait]
pub trait ProviderLauncher: Send + Sync {
    async fn launch(&self, descriptor: &ProviderDescriptor) -> std::io::Result<ProviderTransport>;
}

/// Launches providers as child processes talking over stdin/stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

#[async_trait]
impl ProviderLauncher for ProcessLauncher {
    async fn launch(&self, descriptor: &ProviderDescriptor) -> std::io::Result<ProviderTransport> {
        let (program, args) = descriptor.runtime_kind.command_for(&descriptor.executable_path);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let transport =
            StdioTransport::spawn(&program, &args, &descriptor.environment_overrides).await?;
        Ok(Box::new(transport))
    }
}

/// Serves an [`McpHandler`] on a background task over an in-memory pipe.
///
/// Every launch gets a fresh server instance sharing the same handler.
pub struct InProcessLauncher<H: McpHandler> {
    handler: Arc<H>,
    launches: AtomicUsize,
}

impl<H: McpHandler + 'static> InProcessLauncher<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            launches: AtomicUsize::new(0),
        }
    }

    /// How many providers have been started so far
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<H: McpHandler + 'static> ProviderLauncher for InProcessLauncher<H> {
    async fn launch(&self, descriptor: &ProviderDescriptor) -> std::io::Result<ProviderTransport> {
        self.launches.fetch_add(1, Ordering::SeqCst);

        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        let server = McpServer::new(self.handler.clone()).with_name(descriptor.name.clone());
        let name = descriptor.name.clone();
        tokio::spawn(async move {
            if let Err(e) = server.serve(StreamTransport::new(server_read, server_write)).await {
                debug!(provider = %name, error = %e, "in-process provider stopped");
            }
        });

        let (client_read, client_write) = tokio::io::split(client_io);
        Ok(Box::new(StreamTransport::new(client_read, client_write)))
    }
}

/// Outcome of one tool call. Failures are data, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocationResult {
    pub tool_name: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolInvocationResult {
    pub fn success(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Error result whose content is the rendered [`Error::ToolExecution`]
    pub fn failure(tool_name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        let tool_name = tool_name.into();
        let content = Error::tool_execution(tool_name.clone(), message).to_string();
        Self {
            tool_name,
            content,
            is_error: true,
        }
    }
}

/// One live, initialized provider channel
pub struct ProviderConnection {
    name: String,
    client: McpClient<ProviderTransport>,
    server_info: Option<ServerInfo>,
    initialized: bool,
}

impl ProviderConnection {
    /// Launch the provider and complete the handshake within `timeout`.
    async fn open(
        descriptor: &ProviderDescriptor,
        launcher: &dyn ProviderLauncher,
        timeout: Duration,
    ) -> Result<Self> {
        let name = descriptor.name.clone();

        let transport = tokio::time::timeout(timeout, launcher.launch(descriptor))
            .await
            .map_err(|_| Error::connection(&name, format!("launch timed out after {:?}", timeout)))?
            .map_err(|e| Error::connection(&name, e))?;

        let mut client = McpClient::new(transport);
        let handshake = tokio::time::timeout(
            timeout,
            client.initialize(ClientInfo::new("conduit", env!("CARGO_PKG_VERSION"))),
        )
        .await;

        let server_info = match handshake {
            Ok(Ok(info)) => info,
            Ok(Err(e)) => {
                let _ = client.close().await;
                return Err(Error::connection(&name, e));
            }
            Err(_) => {
                let _ = client.close().await;
                return Err(Error::connection(
                    &name,
                    format!("handshake timed out after {:?}", timeout),
                ));
            }
        };

        debug!(provider = %name, server = %server_info.name, version = %server_info.version, "handshake complete");

        Ok(Self {
            name,
            client,
            server_info: Some(server_info),
            initialized: true,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    async fn list_tools(&self, timeout: Duration) -> Result<Vec<McpTool>> {
        match tokio::time::timeout(timeout, self.client.list_tools()).await {
            Ok(Ok(tools)) => Ok(tools),
            Ok(Err(e)) => Err(Error::Transport(format!("{}: {}", self.name, e))),
            Err(_) => Err(Error::Transport(format!(
                "{}: listing tools timed out after {:?}",
                self.name, timeout
            ))),
        }
    }

    async fn invoke(
        &self,
        tool_name: &str,
        arguments: Map<String, Value>,
        timeout: Duration,
    ) -> ToolInvocationResult {
        let call = self.client.call_tool(tool_name, Value::Object(arguments));
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) if result.is_error => {
                let text = result.text();
                let message = if text.is_empty() {
                    "provider reported an error".to_string()
                } else {
                    text
                };
                ToolInvocationResult::failure(tool_name, message)
            }
            Ok(Ok(result)) => ToolInvocationResult::success(tool_name, result.text()),
            Ok(Err(e)) => ToolInvocationResult::failure(tool_name, e),
            Err(_) => ToolInvocationResult::failure(tool_name, format!("timed out after {:?}", timeout)),
        }
    }

    async fn close(&mut self) {
        self.initialized = false;
        if let Err(e) = self.client.close().await {
            warn!(provider = %self.name, error = %e, "error while closing provider");
        }
    }
}

/// Pool of live connections plus the active provider
pub struct ConnectionManager {
    launcher: Arc<dyn ProviderLauncher>,
    timeouts: ConnectionTimeouts,
    connections: HashMap<String, ProviderConnection>,
    active: Option<String>,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(Arc::new(ProcessLauncher), ConnectionTimeouts::default())
    }
}

impl ConnectionManager {
    pub fn new(launcher: Arc<dyn ProviderLauncher>, timeouts: ConnectionTimeouts) -> Self {
        Self {
            launcher,
            timeouts,
            connections: HashMap::new(),
            active: None,
        }
    }

    pub fn timeouts(&self) -> ConnectionTimeouts {
        self.timeouts
    }

    pub fn set_timeouts(&mut self, timeouts: ConnectionTimeouts) {
        self.timeouts = timeouts;
    }

    /// Connect to `name` and make it the active provider.
    ///
    /// Reuses a live connection instead of launching a second process. The
    /// previously active connection stays in the pool.
    pub async fn connect(
        &mut self,
        registry: &ProviderRegistry,
        name: &str,
    ) -> Result<&ProviderConnection> {
        if !self.connections.contains_key(name) {
            let descriptor = registry.get(name)?;
            info!(provider = %name, runtime = %descriptor.runtime_kind, "connecting to provider");
            let connection =
                ProviderConnection::open(descriptor, self.launcher.as_ref(), self.timeouts.connect).await?;
            self.connections.insert(name.to_string(), connection);
        } else {
            debug!(provider = %name, "reusing live connection");
        }

        self.active = Some(name.to_string());
        self.connections
            .get(name)
            .ok_or_else(|| Error::connection(name, "connection vanished from the pool"))
    }

    /// Tear down `name`, or every live connection when `None`.
    ///
    /// Unknown names are ignored.
    pub async fn disconnect(&mut self, name: Option<&str>) {
        match name {
            Some(name) => {
                if let Some(mut connection) = self.connections.remove(name) {
                    connection.close().await;
                    info!(provider = %name, "disconnected");
                }
                if self.active.as_deref() == Some(name) {
                    self.active = None;
                }
            }
            None => {
                for (name, mut connection) in self.connections.drain() {
                    connection.close().await;
                    info!(provider = %name, "disconnected");
                }
                self.active = None;
            }
        }
    }

    pub fn active_provider(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active_connection(&self) -> Option<&ProviderConnection> {
        self.active.as_deref().and_then(|name| self.connections.get(name))
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.connections.contains_key(name)
    }

    /// Names of all live connections, sorted
    pub fn connected(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.connections.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn require_active(&self) -> Result<&ProviderConnection> {
        self.active_connection().ok_or(Error::NotConnected)
    }

    /// Tool catalog of the active provider, verbatim
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let connection = self.require_active()?;
        connection.list_tools(self.timeouts.list_tools).await
    }

    /// Call a tool on the active provider.
    ///
    /// Only a missing active provider is an `Err`; every other failure comes
    /// back as an error-tagged result.
    pub async fn invoke(
        &self,
        tool_name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolInvocationResult> {
        let connection = self.require_active()?;
        debug!(provider = %connection.name(), tool = %tool_name, "invoking tool");
        let result = connection.invoke(tool_name, arguments, self.timeouts.invoke).await;
        if result.is_error {
            warn!(provider = %connection.name(), tool = %tool_name, error = %result.content, "tool call failed");
        }
        Ok(result)
    }

    /// Tear down everything. Safe to call repeatedly.
    pub async fn close(&mut self) {
        self.disconnect(None).await;
    }
}
