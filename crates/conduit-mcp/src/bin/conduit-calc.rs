//! Demo tool provider speaking MCP over stdin/stdout.
//!
//! Register it with the conduit shell as an `executable` provider.

use std::sync::Arc;

use conduit_mcp::demo::Calculator;
use conduit_mcp::{McpServer, StreamTransport};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let transport = StreamTransport::new(tokio::io::stdin(), tokio::io::stdout());
    McpServer::new(Arc::new(Calculator))
        .with_name("conduit-calc")
        .serve(transport)
        .await
}
