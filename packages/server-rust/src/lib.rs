//! Bootwire Server — namespaced HTTP server instances bootstrapped from a module graph.

pub mod error;
pub mod network;
pub mod server;

pub use error::ServerError;
pub use network::{AppState, AuthProvider, Inject, Listener, ListenerState, NetworkConfig};
pub use server::{ErrorHandler, InitOptions, Middleware, PipelineStage, ServerInstance, ServerRegistry};
