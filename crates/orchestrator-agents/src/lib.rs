pub mod manager;
pub mod port;
pub mod runtime;
pub mod subagent;
pub mod watchdog;

pub use manager::AgentManager;
pub use runtime::{AgentRuntime, AgentState, AgentStatus};
pub use subagent::SubagentSupervisor;
pub use watchdog::{ActivityWatchdog, TimeoutReason};
