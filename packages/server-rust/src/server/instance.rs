//! One bootstrapped application: a populated container plus its pipeline
//! configuration and the listeners built from it, keyed by port.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use bootwire_core::{Container, MetadataRegistry, ModuleRef, ModuleResolver, NamespaceKey};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tracing::{debug, info};

use super::pipeline::{ErrorHandler, Middleware, Pipeline, PipelineStage};
use crate::error::ServerError;
use crate::network::middleware::build_http_layers;
use crate::network::static_files::StaticMount;
use crate::network::{normalize_root_path, AppState, AuthProvider, Listener, NetworkConfig};

// ---------------------------------------------------------------------------
// InitOptions
// ---------------------------------------------------------------------------

/// Parameters for creating a server instance.
///
/// Only consulted when the namespace has no instance yet.
#[derive(Default)]
pub struct InitOptions {
    root_path: Option<String>,
    namespace: NamespaceKey,
    auth_provider: Option<AuthProvider>,
    container: Option<Container>,
    network: NetworkConfig,
}

impl InitOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefix for every route of the application. Defaults to `/`.
    #[must_use]
    pub fn root_path(mut self, root_path: impl Into<String>) -> Self {
        self.root_path = Some(root_path.into());
        self
    }

    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<NamespaceKey>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn auth_provider(mut self, provider: AuthProvider) -> Self {
        self.auth_provider = Some(provider);
        self
    }

    /// Container to bind into. Defaults to an empty one.
    #[must_use]
    pub fn container(mut self, container: Container) -> Self {
        self.container = Some(container);
        self
    }

    #[must_use]
    pub fn network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    pub(crate) fn namespace_key(&self) -> &NamespaceKey {
        &self.namespace
    }
}

// ---------------------------------------------------------------------------
// ServerInstance
// ---------------------------------------------------------------------------

/// A bootstrapped application shared by all of its listeners.
///
/// Configuration setters affect listeners built afterwards only; a listener
/// is frozen once built for its port.
pub struct ServerInstance {
    namespace: RwLock<NamespaceKey>,
    root_path: String,
    container: Arc<Container>,
    auth: Option<AuthProvider>,
    network: NetworkConfig,
    pipeline: RwLock<Pipeline>,
    listeners: DashMap<u16, Arc<Listener>>,
}

impl ServerInstance {
    /// Resolves `root` into the options' container and wraps the result.
    pub(crate) fn bootstrap(
        root: ModuleRef,
        options: InitOptions,
        metadata: &MetadataRegistry,
    ) -> Result<Self, ServerError> {
        let InitOptions {
            root_path,
            namespace,
            auth_provider,
            container,
            network,
        } = options;

        let container = container.unwrap_or_default();
        ModuleResolver::new(metadata, &namespace).resolve_ref(root, &container)?;

        let root_path = normalize_root_path(root_path.as_deref().unwrap_or("/"));
        info!(
            namespace = %namespace,
            root = root.id().name(),
            %root_path,
            services = container.len(),
            "server instance created"
        );

        Ok(Self {
            namespace: RwLock::new(namespace),
            root_path,
            container: Arc::new(container),
            auth: auth_provider,
            network,
            pipeline: RwLock::new(Pipeline::default()),
            listeners: DashMap::new(),
        })
    }

    /// Route prefix every listener serves under.
    #[must_use]
    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    #[must_use]
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    #[must_use]
    pub fn namespace(&self) -> NamespaceKey {
        self.namespace.read().clone()
    }

    /// Relabels the instance. The registry keeps it under the key it was
    /// created with.
    pub fn set_namespace(&self, namespace: impl Into<NamespaceKey>) -> &Self {
        *self.namespace.write() = namespace.into();
        self
    }

    /// Replace the request middlewares.
    pub fn set_middlewares(&self, middlewares: Vec<Middleware>) -> &Self {
        self.pipeline.write().middlewares = middlewares;
        self
    }

    /// Serve static files from `dir`, ahead of every earlier static mount.
    ///
    /// A route that normalizes to `/` is the same as no route.
    pub fn set_static(&self, dir: impl Into<PathBuf>, route: Option<&str>) -> &Self {
        let mount = StaticMount {
            dir: dir.into(),
            route: route
                .map(normalize_root_path)
                .filter(|route| route != "/"),
        };
        self.pipeline.write().statics.insert(0, mount);
        self
    }

    /// Replace the error handlers.
    pub fn set_error_handlers(&self, handlers: Vec<ErrorHandler>) -> &Self {
        self.pipeline.write().error_handlers = handlers;
        self
    }

    /// Stages the next `build` would assemble.
    #[must_use]
    pub fn stages(&self) -> Vec<PipelineStage> {
        self.pipeline.read().stages()
    }

    /// Build the listener for `port` from the current configuration.
    ///
    /// No-op if `port` already has a listener.
    pub fn build(&self, port: u16) -> &Self {
        match self.listeners.entry(port) {
            Entry::Occupied(_) => {
                debug!(port, "listener already built, keeping existing pipeline");
            }
            Entry::Vacant(slot) => {
                let pipeline = self.pipeline.read().clone();
                let stages = pipeline.stages();
                let router = self.assemble(&pipeline);
                info!(namespace = %self.namespace(), port, stages = stages.len(), "listener built");
                slot.insert(Arc::new(Listener::new(
                    port,
                    self.network.host.clone(),
                    router,
                    stages,
                )));
            }
        }
        self
    }

    fn assemble(&self, pipeline: &Pipeline) -> Router {
        let state = AppState {
            container: Arc::clone(&self.container),
            root_path: Arc::from(self.root_path.as_str()),
            auth: self.auth.clone(),
        };

        let app = pipeline.assemble();
        let app = if self.root_path == "/" {
            app
        } else {
            Router::new().nest(&self.root_path, app)
        };

        app.layer(build_http_layers(&self.network)).with_state(state)
    }

    /// Listener built for `port`, if any.
    #[must_use]
    pub fn listener(&self, port: u16) -> Option<Arc<Listener>> {
        self.listeners.get(&port).map(|entry| Arc::clone(entry.value()))
    }

    /// Ports with a built listener, ascending.
    #[must_use]
    pub fn ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.listeners.iter().map(|entry| *entry.key()).collect();
        ports.sort_unstable();
        ports
    }

    /// Start the listener built for `port`.
    ///
    /// If `port` was never built, `callback` receives
    /// [`ServerError::ServerNotBuilt`] before this returns and nothing is
    /// bound. Otherwise the bind runs on the current tokio runtime and
    /// `callback` fires once with the bound address or the bind error.
    pub fn listen<F>(&self, port: u16, callback: F)
    where
        F: FnOnce(Result<SocketAddr, ServerError>) + Send + 'static,
    {
        let Some(listener) = self.listener(port) else {
            return callback(Err(ServerError::ServerNotBuilt { port }));
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return callback(Err(ServerError::RuntimeUnavailable));
        };
        if let Err(e) = listener.begin_bind() {
            return callback(Err(e));
        }

        let namespace = self.namespace();
        let root_path = self.root_path.clone();
        runtime.spawn(async move {
            let outcome = listener.bind_and_serve().await;
            if let Ok(addr) = &outcome {
                info!(%namespace, %root_path, "bootwire server listening on http://{}", addr);
            }
            callback(outcome);
        });
    }

    /// Awaitable form of [`ServerInstance::listen`].
    ///
    /// # Errors
    ///
    /// Returns the same errors `listen` reports through its callback.
    pub async fn listen_async(&self, port: u16) -> Result<SocketAddr, ServerError> {
        let (tx, rx) = oneshot::channel();
        self.listen(port, move |outcome| {
            let _ = tx.send(outcome);
        });
        rx.await
            .unwrap_or(Err(ServerError::ListenAborted { port }))
    }
}

impl std::fmt::Debug for ServerInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerInstance")
            .field("namespace", &self.namespace())
            .field("root_path", &self.root_path)
            .field("services", &self.container.len())
            .field("ports", &self.ports())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
