//! Node Agent Module
//!
//! Everything a cluster node runs: directory client, admin endpoint,
//! application endpoint and the agent that wires them together.

mod admin;
mod directory_client;
mod endpoint;
mod node;
mod services;

pub use admin::AdminHandler;
pub use directory_client::DirectoryClient;
pub use endpoint::ApplicationEndpoint;
pub use node::{apply_announcement, NodeAgent};
pub use services::{ApplicationHandler, FlatFileServices};
