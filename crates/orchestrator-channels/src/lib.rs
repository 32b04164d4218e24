pub mod bindings;
pub mod lru;
pub mod poller;

pub use bindings::ChannelBindings;
pub use lru::ProcessedLru;
pub use poller::{ChannelMessage, ChannelPoller};
