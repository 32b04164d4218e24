pub mod guardian;
pub mod route;

pub use guardian::{Direction, GuardianFlags, GuardianPipeline};
pub use route::{collisions, is_destructive, resolve, McpToolSource, RouteTable, ToolPolicy, ToolRoute};
