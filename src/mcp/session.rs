//! Tool-provider session seams.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::RelayError;
use crate::types::{ToolDescriptor, ToolOutput};

/// A connected tool-provider.
///
/// Sessions are shared: several tool names may route to the same session,
/// and calls for different tools may run concurrently.
#[async_trait]
pub trait ProviderSession: Send + Sync {
    /// Short name used in logs and error messages.
    fn label(&self) -> &str;

    /// Tools this provider advertises.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, RelayError>;

    /// Execute `name` with already-parsed `arguments`.
    ///
    /// Provider-side failures surface as `RelayError::ToolExecution`; a fired
    /// `cancel` surfaces as `RelayError::Canceled`.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<ToolOutput, RelayError>;

    /// Terminate the session. Calling it twice is a no-op.
    async fn close(&self) -> Result<(), RelayError>;
}

/// Something that can open a [`ProviderSession`].
#[async_trait]
pub trait SessionConnector: Send + Sync {
    fn label(&self) -> &str;

    async fn connect(&self) -> Result<Arc<dyn ProviderSession>, RelayError>;
}
