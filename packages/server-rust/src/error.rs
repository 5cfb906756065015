use bootwire_core::ResolveError;

/// Errors surfaced by the server registry and its instances.
///
/// `Resolve` is returned from initialization and is meant to abort
/// bootstrap. Everything else is reported through the `listen` callback.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("no server instance found for port {port}")]
    ServerNotBuilt { port: u16 },
    #[error("listener for port {port} is already started")]
    AlreadyListening { port: u16 },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("listen requires a running tokio runtime")]
    RuntimeUnavailable,
    #[error("listen on port {port} ended before reporting an outcome")]
    ListenAborted { port: u16 },
}
