//! JSON-RPC stdio transport to a single Tool Provider child process.
//!
//! ```no_run
//! use mcpb_transport::{StdioTransport, McpTransport};
//! use std::collections::HashMap;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = StdioTransport::spawn(
//!     "sequential_thinking",
//!     "npx",
//!     &["-y".into(), "@modelcontextprotocol/server-sequential-thinking".into()],
//!     &HashMap::new(),
//!     Duration::from_secs(30),
//! )?;
//! let tools = transport.send_request("tools/list", None).await?;
//! println!("{tools}");
//! # Ok(())
//! # }
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::{
    initialize_params, ClientInfo, InitializeParams, JsonRpcError, JsonRpcId, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, McpToolDef, ToolCallContent, ToolCallResult, ToolsListResult,
    PROTOCOL_VERSION,
};
pub use transport::{McpTransport, StdioTransport, TransportError};
