pub mod config;
pub mod descriptor;
pub mod error;
pub mod paths;
pub mod payload;

pub use config::{AgentDefinition, ChannelBindingEntry, FailMode, OrchestratorConfig};
pub use descriptor::{ChannelConfig, Entrypoint, McpDescriptor, McpRole, Origin};
pub use error::{ErrorEnvelope, OrchError};
pub use payload::{CallerMessage, ProcessingResponse};
