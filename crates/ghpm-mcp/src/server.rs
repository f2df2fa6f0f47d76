//! MCP server implementation.
//!
//! Lifecycle:
//! 1. `initialize` exchanges capabilities
//! 2. `tools/call` requests run concurrently, one task each
//! 3. EOF drains in-flight calls and shuts the provider down

use std::io;
use std::sync::Arc;

use ghpm_core::Provider;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::handlers::ToolHandler;
use crate::protocol::{
    IncomingMessage, InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest,
    JsonRpcResponse, RequestId, ServerCapabilities, ServerInfo, ToolCallParams, ToolsCapability,
    ToolsListResult, MCP_VERSION,
};
use crate::transport::{spawn_writer, MessageReader, ResponseSender};

/// MCP server for ghpm-tools.
pub struct McpServer {
    handler: Arc<ToolHandler>,
    initialized: bool,
}

impl McpServer {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self {
            handler: Arc::new(ToolHandler::new(provider)),
            initialized: false,
        }
    }

    /// Serve on stdin/stdout until stdin closes.
    pub async fn run_stdio(&mut self) -> io::Result<()> {
        self.serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await
    }

    /// Serve newline-delimited JSON-RPC on arbitrary streams.
    pub async fn serve<R, W>(&mut self, reader: R, writer: W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        info!(provider = self.handler.provider().name(), "Starting MCP server");

        let mut reader = MessageReader::new(reader);
        let (responses, writer_task) = spawn_writer(writer);
        let mut calls = JoinSet::new();

        loop {
            match reader.read_message().await {
                Ok(Some(IncomingMessage::Request(request))) => {
                    self.dispatch(request, &responses, &mut calls);
                }
                Ok(Some(IncomingMessage::Notification(notification))) => {
                    self.handle_notification(&notification.method);
                }
                Ok(None) => {
                    info!("EOF received, shutting down");
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    send(
                        &responses,
                        JsonRpcResponse::error(
                            RequestId::Null,
                            JsonRpcError::parse_error(&e.to_string()),
                        ),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Transport error");
                    break;
                }
            }

            while let Some(finished) = calls.try_join_next() {
                log_panic(finished);
            }
        }

        while let Some(finished) = calls.join_next().await {
            log_panic(finished);
        }
        self.handler.provider().shutdown();

        drop(responses);
        let written = writer_task
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        info!("MCP server stopped");
        written
    }

    /// Answer a request inline, or spawn it when it is a tool call.
    fn dispatch(
        &mut self,
        request: JsonRpcRequest,
        responses: &ResponseSender,
        calls: &mut JoinSet<()>,
    ) {
        debug!(method = %request.method, id = ?request.id, "Handling request");

        if request.method == "tools/call" {
            let handler = self.handler.clone();
            let responses = responses.clone();
            calls.spawn(async move {
                let response = handle_tools_call(&handler, request.id, request.params).await;
                send(&responses, response);
            });
            return;
        }

        let response = self.handle_request(request);
        send(responses, response);
    }

    fn handle_request(&mut self, request: JsonRpcRequest) -> JsonRpcResponse {
        match request.method.as_str() {
            "initialize" => self.handle_initialize(request.id, request.params),
            "tools/list" => JsonRpcResponse::from_result(
                request.id,
                &ToolsListResult {
                    tools: self.handler.available_tools(),
                },
            ),
            "ping" => JsonRpcResponse::success(request.id, serde_json::json!({})),
            method => {
                warn!(method, "Unknown method");
                JsonRpcResponse::error(request.id, JsonRpcError::method_not_found(method))
            }
        }
    }

    fn handle_notification(&mut self, method: &str) {
        match method {
            "notifications/initialized" | "initialized" => info!("Client initialized"),
            "notifications/cancelled" => debug!("Request cancelled by client"),
            _ => debug!(method, "Ignoring notification"),
        }
    }

    fn handle_initialize(&mut self, id: RequestId, params: Option<Value>) -> JsonRpcResponse {
        if self.initialized {
            return JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_request("Server already initialized"),
            );
        }

        if let Some(params) = params {
            match serde_json::from_value::<InitializeParams>(params) {
                Ok(init) => info!(
                    client = %init.client_info.name,
                    version = %init.client_info.version,
                    protocol = %init.protocol_version,
                    "Client connected"
                ),
                Err(e) => warn!(error = %e, "Failed to parse initialize params"),
            }
        }

        self.initialized = true;

        JsonRpcResponse::from_result(
            id,
            &InitializeResult {
                protocol_version: MCP_VERSION.to_string(),
                capabilities: ServerCapabilities {
                    tools: ToolsCapability {
                        list_changed: false,
                    },
                },
                server_info: ServerInfo {
                    name: "ghpm-mcp".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                },
            },
        )
    }
}

async fn handle_tools_call(
    handler: &ToolHandler,
    id: RequestId,
    params: Option<Value>,
) -> JsonRpcResponse {
    let Some(params) = params else {
        return JsonRpcResponse::error(id, JsonRpcError::invalid_params("Missing params"));
    };
    let params: ToolCallParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(e) => return JsonRpcResponse::error(id, JsonRpcError::invalid_params(&e.to_string())),
    };

    info!(tool = %params.name, "Calling tool");
    let result = handler.execute(&params.name, params.arguments).await;
    JsonRpcResponse::from_result(id, &result)
}

fn send(responses: &ResponseSender, response: JsonRpcResponse) {
    if responses.send(response).is_err() {
        warn!("Response writer is gone, dropping response");
    }
}

fn log_panic(finished: Result<(), tokio::task::JoinError>) {
    if let Err(e) = finished {
        error!(error = %e, "Tool call task failed");
    }
}
