//! Container management module for the Berth orchestrator
//!
//! Handles all interactions with preview containers:
//! - Tracking managed containers in an in-memory registry
//! - Creating, starting, stopping and destroying them through the runtime
//! - Running shell commands inside running containers
//! - Deriving preview URLs from published ports

mod error;
mod manager;
mod preview;
pub mod registry;
pub mod runtime;

#[cfg(test)]
pub(crate) mod testing;

pub use error::ContainerError;
pub use manager::ContainerManager;
pub use preview::PreviewResolver;
pub use registry::{ContainerHandle, ContainerRegistry};
pub use runtime::{ContainerRuntime, DockerRuntime, RuntimeCommand, RuntimeContainerSpec};
