//! Harbor orchestrator library.
//!
//! The orchestrator runs outside the sandbox container and keeps exactly one
//! gateway running inside it. Every request that needs the gateway goes
//! through [`GatewayManager::ensure_gateway`], which reuses a reachable
//! process, replaces an unresponsive one, or launches the in-container
//! entrypoint and waits for the gateway port.
//!
//! ## Modules
//!
//! - `runtime`: sandbox runtime interface and mock
//! - `client`: HTTP implementation of the runtime interface
//! - `gateway`: reconciliation and transient-failure retry
//! - `cache`: short-lived discovered-process cache
//! - `env`: environment forwarded to the entrypoint
//! - `api`: HTTP surface

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod env;
pub mod error;
pub mod gateway;
pub mod runtime;

// Re-export commonly used types
pub use client::HttpRuntime;
pub use env::EnvironmentBundle;
pub use error::{OrchestratorError, RuntimeError};
pub use gateway::{GatewayManager, GatewaySettings};
pub use runtime::{ContainerRuntime, GatewayProcess, MockRuntime, ProcessStatus};
