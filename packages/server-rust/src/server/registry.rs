use std::sync::Arc;

use bootwire_core::{MetadataRegistry, Module, ModuleRef, NamespaceKey};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use super::instance::{InitOptions, ServerInstance};
use crate::error::ServerError;
use crate::network::Listener;

// ---------------------------------------------------------------------------
// ServerRegistry
// ---------------------------------------------------------------------------

/// Registry of bootstrapped server instances, at most one per namespace.
///
/// Owned by the application's composition root. Initialization is
/// get-or-create: the first `init` for a namespace resolves the module graph
/// and stores the instance; every later `init` for that namespace returns the
/// stored instance and ignores its arguments. Each namespace has its own
/// init lock held for the whole get-or-create, so concurrent callers never
/// resolve twice. The instance map is only locked for the final insert.
#[derive(Debug, Default)]
pub struct ServerRegistry {
    metadata: Arc<MetadataRegistry>,
    instances: DashMap<NamespaceKey, Arc<ServerInstance>>,
    init_locks: DashMap<NamespaceKey, Arc<Mutex<()>>>,
}

impl ServerRegistry {
    /// Creates an empty registry with its own metadata registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry reading module metadata from `metadata`.
    #[must_use]
    pub fn with_metadata(metadata: Arc<MetadataRegistry>) -> Self {
        Self {
            metadata,
            instances: DashMap::new(),
            init_locks: DashMap::new(),
        }
    }

    /// Metadata registry modules are declared in.
    #[must_use]
    pub fn metadata(&self) -> &Arc<MetadataRegistry> {
        &self.metadata
    }

    /// Get or create the instance for the options' namespace, rooted at `M`.
    ///
    /// `Module::metadata` of a module in the graph may query this registry.
    /// Calling `init` for the namespace being initialized from there blocks
    /// forever.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Resolve`] if the module graph cannot be
    /// resolved. Nothing is stored in that case.
    pub fn init<M: Module>(&self, options: InitOptions) -> Result<Arc<ServerInstance>, ServerError> {
        self.init_ref(ModuleRef::of::<M>(), options)
    }

    /// Get or create the instance for the options' namespace, rooted at `root`.
    ///
    /// # Errors
    ///
    /// See [`ServerRegistry::init`].
    pub fn init_ref(
        &self,
        root: ModuleRef,
        options: InitOptions,
    ) -> Result<Arc<ServerInstance>, ServerError> {
        let namespace = options.namespace_key().clone();
        let init_lock = Arc::clone(self.init_locks.entry(namespace.clone()).or_default().value());
        let _initializing = init_lock.lock();

        if let Some(existing) = self.instance(&namespace) {
            debug!(
                %namespace,
                requested_root = root.id().name(),
                "namespace already initialized, returning existing instance"
            );
            return Ok(existing);
        }

        let instance = Arc::new(ServerInstance::bootstrap(root, options, &self.metadata)?);
        self.instances.insert(namespace, Arc::clone(&instance));
        Ok(instance)
    }

    /// Instance stored for `namespace`.
    #[must_use]
    pub fn instance(&self, namespace: &NamespaceKey) -> Option<Arc<ServerInstance>> {
        self.instances
            .get(namespace)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Listener built for `port` by the instance stored for `namespace`.
    #[must_use]
    pub fn get_instance(&self, namespace: &NamespaceKey, port: u16) -> Option<Arc<Listener>> {
        self.instance(namespace)
            .and_then(|instance| instance.listener(port))
    }

    /// Initialized namespaces, in no particular order.
    #[must_use]
    pub fn namespaces(&self) -> Vec<NamespaceKey> {
        self.instances.iter().map(|entry| entry.key().clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::OnceLock;
    use std::thread;

    use bootwire_core::{Container, Injectable, ModuleMetadata, ResolveError};

    use super::*;

    struct Billing;
    struct Audit;
    struct Reports;

    impl Injectable for Billing {
        fn construct(_container: &Container) -> anyhow::Result<Self> {
            Ok(Self)
        }
    }

    impl Injectable for Audit {
        fn construct(_container: &Container) -> anyhow::Result<Self> {
            Ok(Self)
        }
    }

    impl Injectable for Reports {
        fn construct(_container: &Container) -> anyhow::Result<Self> {
            Ok(Self)
        }
    }

    struct ShopModule;
    struct AuditModule;
    struct AdminModule;
    struct BrokenModule;

    impl Module for ShopModule {
        fn metadata() -> ModuleMetadata {
            ModuleMetadata::new().service::<Billing>().module::<AuditModule>()
        }
    }

    impl Module for AuditModule {
        fn metadata() -> ModuleMetadata {
            ModuleMetadata::new().service::<Audit>()
        }
    }

    impl Module for AdminModule {
        fn metadata() -> ModuleMetadata {
            ModuleMetadata::new().service::<Reports>()
        }
    }

    impl Module for BrokenModule {
        fn metadata() -> ModuleMetadata {
            ModuleMetadata::new().module::<AuditModule>()
        }
    }

    static COUNTED_DECLARATIONS: AtomicU32 = AtomicU32::new(0);

    struct CountedModule;

    impl Module for CountedModule {
        fn metadata() -> ModuleMetadata {
            COUNTED_DECLARATIONS.fetch_add(1, Ordering::SeqCst);
            ModuleMetadata::new().service::<Billing>()
        }
    }

    fn registry() -> ServerRegistry {
        let registry = ServerRegistry::new();
        registry.metadata().declare_tree::<ShopModule>(&NamespaceKey::DEFAULT);
        registry
    }

    #[test]
    fn init_resolves_module_graph() {
        let registry = registry();
        let server = registry.init::<ShopModule>(InitOptions::new()).unwrap();

        assert!(server.container().is_bound::<Billing>());
        assert!(server.container().is_bound::<Audit>());
    }

    #[test]
    fn repeated_init_returns_first_instance() {
        let registry = registry();
        registry.metadata().declare::<AdminModule>(&NamespaceKey::from("x"));
        registry.metadata().declare_tree::<ShopModule>(&NamespaceKey::from("x"));

        let first = registry
            .init::<ShopModule>(InitOptions::new().namespace("x").root_path("/shop"))
            .unwrap();
        let second = registry
            .init::<AdminModule>(InitOptions::new().namespace("x").root_path("/admin"))
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.root_path(), "/shop");
        assert!(!second.container().is_bound::<Reports>());
    }

    #[test]
    fn namespaces_hold_independent_instances() {
        let registry = registry();
        registry.metadata().declare::<AdminModule>(&NamespaceKey::from("admin"));

        let shop = registry.init::<ShopModule>(InitOptions::new()).unwrap();
        let admin = registry
            .init::<AdminModule>(InitOptions::new().namespace("admin"))
            .unwrap();

        assert!(!Arc::ptr_eq(&shop, &admin));
        assert!(admin.container().is_bound::<Reports>());
        assert!(!admin.container().is_bound::<Billing>());

        let mut namespaces = registry.namespaces();
        namespaces.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        assert_eq!(namespaces, vec![NamespaceKey::from("admin"), NamespaceKey::DEFAULT]);
    }

    #[test]
    fn resolution_failure_stores_nothing() {
        let registry = ServerRegistry::new();

        let err = registry.init::<BrokenModule>(InitOptions::new()).unwrap_err();

        assert!(matches!(
            err,
            ServerError::Resolve(ResolveError::MetadataMissing { .. })
        ));
        assert!(registry.instance(&NamespaceKey::DEFAULT).is_none());
    }

    #[test]
    fn failed_namespace_can_be_retried() {
        let registry = ServerRegistry::new();
        assert!(registry.init::<BrokenModule>(InitOptions::new()).is_err());

        registry.metadata().declare::<AuditModule>(&NamespaceKey::DEFAULT);
        let server = registry.init::<BrokenModule>(InitOptions::new()).unwrap();
        assert!(server.container().is_bound::<Audit>());
    }

    #[test]
    fn caller_supplied_container_is_used() {
        let registry = registry();
        let container = Container::new();
        container.bind_self::<Reports>();

        let server = registry
            .init::<ShopModule>(InitOptions::new().container(container))
            .unwrap();

        assert_eq!(server.container().len(), 3);
        assert!(server.container().is_bound::<Reports>());
    }

    #[test]
    fn get_instance_looks_up_listener_by_namespace_and_port() {
        let registry = registry();
        let server = registry.init::<ShopModule>(InitOptions::new()).unwrap();

        assert!(registry.get_instance(&NamespaceKey::DEFAULT, 8080).is_none());

        server.build(8080);
        let listener = registry.get_instance(&NamespaceKey::DEFAULT, 8080).unwrap();
        assert!(Arc::ptr_eq(&listener, &server.listener(8080).unwrap()));

        assert!(registry.get_instance(&NamespaceKey::DEFAULT, 8081).is_none());
        assert!(registry.get_instance(&NamespaceKey::from("other"), 8080).is_none());
    }

    static OUTER_REGISTRY: OnceLock<Arc<ServerRegistry>> = OnceLock::new();

    struct Inspecting;

    impl Module for Inspecting {
        fn metadata() -> ModuleMetadata {
            if let Some(registry) = OUTER_REGISTRY.get() {
                assert!(registry.instance(&NamespaceKey::from("inspecting")).is_none());
                assert!(registry.namespaces().is_empty());
            }
            ModuleMetadata::new().service::<Reports>()
        }
    }

    #[test]
    fn module_metadata_may_query_registry_during_init() {
        let registry = Arc::clone(OUTER_REGISTRY.get_or_init(|| Arc::new(ServerRegistry::new())));

        let server = registry
            .init::<Inspecting>(InitOptions::new().namespace("inspecting"))
            .unwrap();

        assert!(server.container().is_bound::<Reports>());
        assert_eq!(registry.namespaces(), vec![NamespaceKey::from("inspecting")]);
    }

    #[test]
    fn concurrent_init_resolves_once() {
        let registry = Arc::new(ServerRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.init::<CountedModule>(InitOptions::new()).unwrap())
            })
            .collect();
        let instances: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(instances.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(COUNTED_DECLARATIONS.load(Ordering::SeqCst), 1);
    }
}
