//! Module descriptors and the metadata registry.
//!
//! A module is a type implementing [`Module`]; its [`ModuleMetadata`] lists
//! the services it binds and the modules nested under it. Metadata becomes
//! visible to the resolver only once it is declared in a [`MetadataRegistry`]
//! under a [`NamespaceKey`].

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::container::{Injectable, ServiceBinding};
use crate::identity::{ModuleId, NamespaceKey};

/// A module descriptor.
pub trait Module: 'static {
    /// Services and sub-modules this module declares.
    fn metadata() -> ModuleMetadata;
}

/// Reference to a nested module, as listed in its parent's metadata.
#[derive(Debug, Clone, Copy)]
pub struct ModuleRef {
    id: ModuleId,
    metadata: fn() -> ModuleMetadata,
}

impl ModuleRef {
    #[must_use]
    pub fn of<M: Module>() -> Self {
        Self {
            id: ModuleId::of::<M>(),
            metadata: M::metadata,
        }
    }

    #[must_use]
    pub fn id(&self) -> ModuleId {
        self.id
    }
}

/// Services and sub-modules declared by one module.
#[derive(Debug, Clone, Default)]
pub struct ModuleMetadata {
    /// Services to self-bind, in declaration order.
    pub services: Vec<ServiceBinding>,
    /// Nested modules. `None` is equivalent to an empty list.
    pub modules: Option<Vec<ModuleRef>>,
}

impl ModuleMetadata {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a service to the declaration.
    #[must_use]
    pub fn service<T: Injectable>(mut self) -> Self {
        self.services.push(ServiceBinding::of::<T>());
        self
    }

    /// Append a nested module to the declaration.
    #[must_use]
    pub fn module<M: Module>(mut self) -> Self {
        self.modules.get_or_insert_with(Vec::new).push(ModuleRef::of::<M>());
        self
    }

    /// Nested modules, empty when none were declared.
    #[must_use]
    pub fn modules(&self) -> &[ModuleRef] {
        self.modules.as_deref().unwrap_or_default()
    }
}

/// Typed registry of declared module metadata, keyed by namespace and module.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    entries: DashMap<(NamespaceKey, ModuleId), Arc<ModuleMetadata>>,
}

impl MetadataRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `M` under `namespace`. Idempotent: the metadata constructor runs
    /// at most once per namespace, later calls return the stored record.
    pub fn declare<M: Module>(&self, namespace: &NamespaceKey) -> Arc<ModuleMetadata> {
        self.declare_ref(namespace, ModuleRef::of::<M>())
    }

    /// Declare a module by reference. See [`MetadataRegistry::declare`].
    pub fn declare_ref(&self, namespace: &NamespaceKey, module: ModuleRef) -> Arc<ModuleMetadata> {
        let entry = self
            .entries
            .entry((namespace.clone(), module.id))
            .or_insert_with(|| {
                debug!(module = module.id.name(), namespace = %namespace, "module declared");
                Arc::new((module.metadata)())
            });
        Arc::clone(entry.value())
    }

    /// Declare `M` and every module reachable from it.
    pub fn declare_tree<M: Module>(&self, namespace: &NamespaceKey) {
        let mut seen = HashSet::new();
        let mut pending = vec![ModuleRef::of::<M>()];
        while let Some(module) = pending.pop() {
            if !seen.insert(module.id) {
                continue;
            }
            let metadata = self.declare_ref(namespace, module);
            pending.extend(metadata.modules().iter().copied());
        }
    }

    /// Metadata of `module` under `namespace`, if declared.
    #[must_use]
    pub fn get(&self, namespace: &NamespaceKey, module: ModuleId) -> Option<Arc<ModuleMetadata>> {
        self.entries
            .get(&(namespace.clone(), module))
            .map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn contains(&self, namespace: &NamespaceKey, module: ModuleId) -> bool {
        self.entries.contains_key(&(namespace.clone(), module))
    }
}
