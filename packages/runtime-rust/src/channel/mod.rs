//! The bidirectional, ordered message pipe between host and worker.

pub mod config;
pub mod endpoint;

pub use config::ChannelConfig;
pub use endpoint::{pair, ChannelSender, HostEndpoint, SendError, WorkerEndpoint};
