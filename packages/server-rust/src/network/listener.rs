//! Per-port listener: a frozen router that can be bound and served once.
//!
//! A listener is built from the server instance's pipeline at `build` time
//! and never changes afterwards. Starting it binds the TCP socket, reports
//! the outcome, and serves connections on a spawned task for the rest of
//! the process lifetime.

use std::net::SocketAddr;

use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::error::ServerError;
use crate::server::pipeline::PipelineStage;

/// Lifecycle of one listener.
///
/// State machine: Built -> Binding -> Listening. A failed bind returns to
/// Built; nothing leaves Listening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Assembled but not started.
    Built,
    /// A bind attempt is in flight.
    Binding,
    /// Bound and serving on the given address.
    Listening(SocketAddr),
}

/// A startable HTTP endpoint for one port.
pub struct Listener {
    port: u16,
    host: String,
    router: Router,
    stages: Vec<PipelineStage>,
    state: Mutex<ListenerState>,
}

impl Listener {
    pub(crate) fn new(port: u16, host: String, router: Router, stages: Vec<PipelineStage>) -> Self {
        Self {
            port,
            host,
            router,
            stages,
            state: Mutex::new(ListenerState::Built),
        }
    }

    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Pipeline stages this listener was assembled from, in application order.
    #[must_use]
    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    /// The assembled application, for serving it in-process.
    #[must_use]
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    #[must_use]
    pub fn state(&self) -> ListenerState {
        *self.state.lock()
    }

    /// Bound address, once listening.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.state() {
            ListenerState::Listening(addr) => Some(addr),
            _ => None,
        }
    }

    /// Claims the single bind attempt.
    pub(crate) fn begin_bind(&self) -> Result<(), ServerError> {
        let mut state = self.state.lock();
        match *state {
            ListenerState::Built => {
                *state = ListenerState::Binding;
                Ok(())
            }
            ListenerState::Binding | ListenerState::Listening(_) => {
                Err(ServerError::AlreadyListening { port: self.port })
            }
        }
    }

    /// Binds the socket and spawns the accept loop.
    ///
    /// Must follow a successful [`Listener::begin_bind`].
    pub(crate) async fn bind_and_serve(&self) -> Result<SocketAddr, ServerError> {
        let addr = format!("{}:{}", self.host, self.port);
        let bound = match TcpListener::bind(&addr).await {
            Ok(listener) => listener.local_addr().map(|local| (listener, local)),
            Err(source) => Err(source),
        };

        let (listener, local) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                *self.state.lock() = ListenerState::Built;
                warn!(%addr, error = %source, "failed to bind listener");
                return Err(ServerError::Bind { addr, source });
            }
        };

        *self.state.lock() = ListenerState::Listening(local);
        info!("TCP listener bound to {}", local);

        let router = self.router.clone();
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(%local, error = %e, "listener stopped with an I/O error");
            }
        });

        Ok(local)
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("port", &self.port)
            .field("host", &self.host)
            .field("stages", &self.stages)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
