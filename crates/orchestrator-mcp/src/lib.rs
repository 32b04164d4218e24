pub mod client;
pub mod external;
pub mod manifest;
pub mod protocol;
pub mod scanner;

pub use client::{CallOutcome, ClientState, McpClient};
pub use external::{load as load_external, to_descriptors as external_to_descriptors, Diff, ExternalEntry, ExternalMcpWatcher, ExternalSnapshot, LoadReport, WatchEvent, DEBOUNCE};
pub use manifest::{ChannelManifest, GuardianScanManifest, McpManifest, MANIFEST_FILE_NAME};
pub use protocol::{
    InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ServerCapabilities,
    ServerInfo, TextContent, ToolCallResult, ToolDefinition, ToolsCapability, ToolsListResult,
    INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
pub use scanner::scan;
