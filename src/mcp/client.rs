//! MCP-backed provider session.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use rmcp::{
    model::{CallToolRequestParams, CallToolResult, Content, JsonObject, ResourceContents},
    service::{ClientInitializeError, DynService, Peer, RoleClient, RunningService, ServiceError},
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::RelayError;
use crate::types::{ToolContent, ToolDescriptor, ToolOutput};

use super::session::ProviderSession;

type DynClientService = Box<dyn DynService<RoleClient>>;
pub type McpRunningService = RunningService<RoleClient, DynClientService>;

/// A live MCP client session.
///
/// Requests go through a cloned [`Peer`] so concurrent tool calls never wait
/// on each other; the running service itself is only touched by `close`.
pub struct McpSession {
    label: String,
    peer: Peer<RoleClient>,
    service: Mutex<Option<McpRunningService>>,
    closed: AtomicBool,
}

impl McpSession {
    pub fn from_running_service(label: impl Into<String>, service: McpRunningService) -> Self {
        Self {
            label: label.into(),
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), RelayError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RelayError::InvalidState(format!(
                "MCP session '{}' is closed",
                self.label
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderSession for McpSession {
    fn label(&self) -> &str {
        &self.label
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, RelayError> {
        self.ensure_open()?;

        let tools = match self.peer.list_all_tools().await {
            Ok(tools) => tools,
            Err(ServiceError::UnexpectedResponse) => {
                let page = self
                    .peer
                    .list_tools(None)
                    .await
                    .map_err(|e| map_service_error("list_tools", e))?;
                page.tools
            }
            Err(e) => return Err(map_service_error("list_tools", e)),
        };

        debug!(session = %self.label, tools = tools.len(), "listed MCP tools");
        Ok(tools.into_iter().map(map_tool_descriptor).collect())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<ToolOutput, RelayError> {
        self.ensure_open()?;
        let arguments = coerce_tool_arguments(name, arguments)?;

        let request = self.peer.call_tool(CallToolRequestParams {
            meta: None,
            name: name.to_owned().into(),
            arguments,
            task: None,
        });

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(RelayError::Canceled),
            result = request => result,
        };

        match result {
            Ok(result) => map_call_result(name, result),
            Err(ServiceError::McpError(error)) => Err(RelayError::ToolExecution {
                tool_name: name.to_string(),
                message: format!("MCP error {}: {}", error.code.0, error.message),
            }),
            Err(e) => Err(map_service_error("call_tool", e)),
        }
    }

    async fn close(&self) -> Result<(), RelayError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(service) = self.service.lock().await.take() else {
            return Ok(());
        };
        service.cancel().await.map_err(|e| RelayError::Provider {
            provider: self.label.clone(),
            message: format!("MCP service task failed during shutdown: {e}"),
        })?;
        debug!(session = %self.label, "closed MCP session");
        Ok(())
    }
}

fn map_tool_descriptor(tool: rmcp::model::Tool) -> ToolDescriptor {
    ToolDescriptor {
        name: tool.name.to_string(),
        description: tool
            .description
            .map(|d| d.to_string())
            .unwrap_or_default(),
        parameters: serde_json::Value::Object((*tool.input_schema).clone()),
    }
}

fn coerce_tool_arguments(
    name: &str,
    value: serde_json::Value,
) -> Result<Option<JsonObject>, RelayError> {
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Object(map) => Ok(Some(map)),
        other => Err(RelayError::ToolExecution {
            tool_name: name.to_string(),
            message: format!("MCP tool arguments must be a JSON object; got {other}"),
        }),
    }
}

fn map_content(content: &[Content]) -> Vec<ToolContent> {
    content
        .iter()
        .map(|item| {
            if let Some(text) = item.as_text() {
                return ToolContent::Text {
                    text: text.text.clone(),
                };
            }
            if let Some(image) = item.as_image() {
                return ToolContent::Image {
                    data: image.data.clone(),
                    mime_type: image.mime_type.clone(),
                };
            }
            if let Some(resource) = item.as_resource() {
                return match &resource.resource {
                    ResourceContents::TextResourceContents { uri, text, .. } => {
                        ToolContent::Resource {
                            uri: uri.clone(),
                            text: Some(text.clone()),
                        }
                    }
                    ResourceContents::BlobResourceContents { uri, .. } => ToolContent::Resource {
                        uri: uri.clone(),
                        text: None,
                    },
                };
            }
            ToolContent::Other(serde_json::to_value(item).unwrap_or(serde_json::Value::Null))
        })
        .collect()
}

fn map_call_result(name: &str, result: CallToolResult) -> Result<ToolOutput, RelayError> {
    let content = map_content(&result.content);

    if result.is_error.unwrap_or(false) {
        let output = ToolOutput {
            content,
            is_error: true,
        };
        let message = output
            .first_text()
            .map(str::to_owned)
            .or_else(|| result.structured_content.as_ref().map(|v| v.to_string()))
            .unwrap_or_else(|| "MCP tool returned an error result".into());
        return Err(RelayError::ToolExecution {
            tool_name: name.to_string(),
            message,
        });
    }

    if content.is_empty() {
        if let Some(structured) = result.structured_content {
            return Ok(ToolOutput::text(structured.to_string()));
        }
    }

    Ok(ToolOutput {
        content,
        is_error: false,
    })
}

/// Map an initialize-handshake failure for `server`.
pub(crate) fn map_client_initialize_error(server: &str, error: ClientInitializeError) -> RelayError {
    let message = match error {
        ClientInitializeError::ConnectionClosed(context) => {
            format!("connection closed during initialize: {context}")
        }
        ClientInitializeError::TransportError { error, context } => {
            format!("transport error during initialize ({context}): {error}")
        }
        ClientInitializeError::JsonRpcError(error) => {
            format!("initialize JSON-RPC error {}: {}", error.code.0, error.message)
        }
        ClientInitializeError::Cancelled => "initialize cancelled".to_string(),
        other => format!("initialize error: {other}"),
    };
    RelayError::Connection {
        server: server.to_string(),
        message,
    }
}

/// Whether an initialize failure looks like a protocol version mismatch.
pub(crate) fn is_protocol_version_mismatch(error: &ClientInitializeError) -> bool {
    match error {
        ClientInitializeError::JsonRpcError(error) => {
            let message = error.message.to_ascii_lowercase();
            message.contains("protocol") && message.contains("version")
        }
        _ => false,
    }
}

fn map_service_error(context: &str, error: ServiceError) -> RelayError {
    match error {
        ServiceError::McpError(error) => RelayError::Provider {
            provider: "mcp".into(),
            message: format!("{context}: MCP error {}: {}", error.code.0, error.message),
        },
        ServiceError::TransportSend(error) => {
            RelayError::Stream(format!("{context}: MCP transport send failed: {error}"))
        }
        ServiceError::TransportClosed => {
            RelayError::Stream(format!("{context}: MCP transport closed"))
        }
        ServiceError::UnexpectedResponse => RelayError::Provider {
            provider: "mcp".into(),
            message: format!("{context}: unexpected MCP response"),
        },
        ServiceError::Cancelled { reason } => {
            let suffix = reason
                .as_deref()
                .map(|r| format!(" ({r})"))
                .unwrap_or_default();
            RelayError::Stream(format!("{context}: MCP request cancelled{suffix}"))
        }
        other => RelayError::Provider {
            provider: "mcp".into(),
            message: format!("{context}: MCP service error: {other}"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coerce_tool_arguments_accepts_objects_and_null() {
        let args = coerce_tool_arguments("add", json!({"a": 2}))
            .expect("object arguments should pass")
            .expect("object should be present");
        assert_eq!(args.get("a"), Some(&json!(2)));
        assert!(coerce_tool_arguments("add", serde_json::Value::Null)
            .expect("null should pass")
            .is_none());
    }

    #[test]
    fn coerce_tool_arguments_rejects_non_objects_as_tool_errors() {
        let err = coerce_tool_arguments("add", json!([1, 2]))
            .expect_err("array arguments should be rejected");
        assert!(matches!(
            err,
            RelayError::ToolExecution { tool_name, message }
                if tool_name == "add" && message.contains("JSON object")
        ));
    }

    #[test]
    fn call_result_keeps_text_blocks_in_order() {
        let output = map_call_result(
            "add",
            CallToolResult::success(vec![Content::text("4"), Content::text("done")]),
        )
        .expect("success result should map");
        assert!(!output.is_error);
        assert_eq!(output.first_text(), Some("4"));
        assert_eq!(output.content.len(), 2);
    }

    #[test]
    fn call_result_maps_images() {
        let output = map_call_result(
            "screenshot",
            CallToolResult::success(vec![Content::image("aGk=", "image/png")]),
        )
        .expect("image result should map");
        assert!(matches!(
            &output.content[0],
            ToolContent::Image { mime_type, .. } if mime_type == "image/png"
        ));
        assert_eq!(output.first_text(), None);
    }

    #[test]
    fn error_result_becomes_tool_execution_error() {
        let err = map_call_result(
            "read_file",
            CallToolResult::error(vec![Content::text("no such file")]),
        )
        .expect_err("error result should fail");
        assert!(matches!(
            err,
            RelayError::ToolExecution { tool_name, message }
                if tool_name == "read_file" && message == "no such file"
        ));
    }

    #[test]
    fn transport_closed_maps_to_stream_error() {
        let err = map_service_error("call_tool", ServiceError::TransportClosed);
        assert!(matches!(err, RelayError::Stream(message) if message.contains("transport closed")));
    }

    #[test]
    fn cancelled_reason_is_preserved() {
        let err = map_service_error(
            "list_tools",
            ServiceError::Cancelled {
                reason: Some("shutdown".into()),
            },
        );
        assert!(matches!(err, RelayError::Stream(message) if message.contains("shutdown")));
    }

    #[test]
    fn initialize_errors_name_the_server() {
        let err = map_client_initialize_error(
            "filesystem",
            ClientInitializeError::ConnectionClosed("eof".into()),
        );
        assert!(matches!(
            err,
            RelayError::Connection { server, message }
                if server == "filesystem" && message.contains("eof")
        ));
        assert!(!is_protocol_version_mismatch(&ClientInitializeError::Cancelled));
    }
}
