//! Module graph resolution: binds every service declared by a module tree.
//!
//! Traversal is depth-first and pre-order. A module's own services are bound
//! before any of its nested modules are visited, and nested modules are
//! visited in declaration order, so container binding order is deterministic.
//!
//! Activation alternates by depth. A loaded module is activated (declared on
//! demand) and its direct sub-modules are only looked up, so they must
//! already be declared in the [`MetadataRegistry`] under the same namespace,
//! typically via [`MetadataRegistry::declare_tree`]. Each sub-module's own
//! sub-modules are loaded in turn: the root and every module an even number
//! of levels below it are activated, the odd levels are not.

use std::sync::Arc;

use tracing::{debug, info};

use crate::container::Container;
use crate::identity::{ModuleId, NamespaceKey};
use crate::metadata::{MetadataRegistry, Module, ModuleMetadata, ModuleRef};

/// Errors that abort module graph resolution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("no module metadata for {module} in namespace {namespace}")]
    MetadataMissing {
        module: &'static str,
        namespace: NamespaceKey,
    },
    #[error("module graph contains a cycle: {}", path.join(" -> "))]
    CyclicModuleGraph { path: Vec<&'static str> },
}

/// Walks a module tree and binds its services into a container.
pub struct ModuleResolver<'a> {
    registry: &'a MetadataRegistry,
    namespace: &'a NamespaceKey,
}

impl<'a> ModuleResolver<'a> {
    #[must_use]
    pub fn new(registry: &'a MetadataRegistry, namespace: &'a NamespaceKey) -> Self {
        Self {
            registry,
            namespace,
        }
    }

    /// Activate `M` and bind the services of its whole tree into `container`.
    ///
    /// # Errors
    ///
    /// See [`ModuleResolver::resolve_ref`].
    pub fn resolve<M: Module>(&self, container: &Container) -> Result<(), ResolveError> {
        self.resolve_ref(ModuleRef::of::<M>(), container)
    }

    /// Activate `root` and bind the services of its whole tree into `container`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::MetadataMissing`] if a module at an odd depth
    /// below `root` was never declared, and [`ResolveError::CyclicModuleGraph`] if a module lists
    /// itself, directly or transitively, as a sub-module. Bindings made before
    /// the failure are left in place.
    pub fn resolve_ref(&self, root: ModuleRef, container: &Container) -> Result<(), ResolveError> {
        let before = container.len();
        let mut path = Vec::new();
        self.load(root, container, &mut path)?;

        info!(
            root = root.id().name(),
            namespace = %self.namespace,
            bound = container.len() - before,
            "module graph resolved"
        );
        Ok(())
    }

    /// Activates `module`, binds its services, then binds each direct
    /// sub-module and loads that sub-module's own sub-modules.
    fn load(
        &self,
        module: ModuleRef,
        container: &Container,
        path: &mut Vec<ModuleId>,
    ) -> Result<(), ResolveError> {
        check_cycle(path, module.id())?;
        self.registry.declare_ref(self.namespace, module);
        let metadata = self.lookup(module.id())?;
        self.bind_services(module.id(), &metadata, container);

        path.push(module.id());
        for child in metadata.modules() {
            check_cycle(path, child.id())?;
            let child_metadata = self.lookup(child.id())?;
            self.bind_services(child.id(), &child_metadata, container);

            path.push(child.id());
            for grandchild in child_metadata.modules() {
                self.load(*grandchild, container, path)?;
            }
            path.pop();
        }
        path.pop();

        Ok(())
    }

    fn lookup(&self, module: ModuleId) -> Result<Arc<ModuleMetadata>, ResolveError> {
        self.registry
            .get(self.namespace, module)
            .ok_or_else(|| ResolveError::MetadataMissing {
                module: module.name(),
                namespace: self.namespace.clone(),
            })
    }

    fn bind_services(&self, module: ModuleId, metadata: &ModuleMetadata, container: &Container) {
        debug!(module = module.name(), services = metadata.services.len(), "binding module services");
        for service in &metadata.services {
            container.bind(*service);
        }
    }
}

fn check_cycle(path: &[ModuleId], module: ModuleId) -> Result<(), ResolveError> {
    if path.contains(&module) {
        let mut cycle: Vec<&'static str> = path.iter().map(ModuleId::name).collect();
        cycle.push(module.name());
        return Err(ResolveError::CyclicModuleGraph { path: cycle });
    }
    Ok(())
}

/// Resolve `M` under `namespace` into `container`.
///
/// # Errors
///
/// See [`ModuleResolver::resolve_ref`].
pub fn resolve<M: Module>(
    container: &Container,
    registry: &MetadataRegistry,
    namespace: &NamespaceKey,
) -> Result<(), ResolveError> {
    ModuleResolver::new(registry, namespace).resolve::<M>(container)
}
