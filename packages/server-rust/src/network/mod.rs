//! Networking types: configuration, transport layers, request state, static
//! file serving, and per-port listeners.

pub mod config;
pub mod listener;
pub mod middleware;
pub mod state;
pub mod static_files;

pub use config::*;
pub use listener::{Listener, ListenerState};
pub use state::{AppState, AuthProvider, Inject, InjectRejection};
pub use static_files::StaticMount;
