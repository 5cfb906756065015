use std::any::Any;
use std::cell::RefCell;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{ReentrantMutex, RwLock};
use tracing::debug;

use crate::identity::ServiceId;

// ---------------------------------------------------------------------------
// Injectable trait
// ---------------------------------------------------------------------------

/// A service that can be self-bound into a [`Container`].
///
/// The service type is both the lookup key and the implementation. It is
/// constructed lazily on first resolution and then shared as a singleton;
/// `construct` may resolve its own dependencies from the container.
pub trait Injectable: Any + Send + Sync {
    /// Build the service, pulling dependencies from `container`.
    fn construct(container: &Container) -> anyhow::Result<Self>
    where
        Self: Sized;
}

type Factory = fn(&Container) -> anyhow::Result<Arc<dyn Any + Send + Sync>>;

fn construct_erased<T: Injectable>(container: &Container) -> anyhow::Result<Arc<dyn Any + Send + Sync>> {
    Ok(Arc::new(T::construct(container)?))
}

/// Type-erased self-binding of one service, as listed in module metadata.
#[derive(Clone, Copy)]
pub struct ServiceBinding {
    id: ServiceId,
    factory: Factory,
}

impl ServiceBinding {
    /// The binding of `T` to itself.
    #[must_use]
    pub fn of<T: Injectable>() -> Self {
        Self {
            id: ServiceId::of::<T>(),
            factory: construct_erased::<T>,
        }
    }

    #[must_use]
    pub fn id(&self) -> ServiceId {
        self.id
    }
}

impl std::fmt::Debug for ServiceBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ServiceBinding").field(&self.id.name()).finish()
    }
}

// ---------------------------------------------------------------------------
// ContainerError
// ---------------------------------------------------------------------------

/// Errors from resolving a service out of a [`Container`].
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    #[error("service is not bound: {service}")]
    NotBound { service: &'static str },
    #[error("circular service dependency: {}", chain.join(" -> "))]
    CircularDependency { chain: Vec<&'static str> },
    #[error("failed to construct {service}: {source}")]
    Construction {
        service: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("bound instance of {service} has an unexpected type")]
    TypeMismatch { service: &'static str },
}

// ---------------------------------------------------------------------------
// Container
// ---------------------------------------------------------------------------

/// Dependency-injection container holding self-bound services.
///
/// Bindings are kept in insertion order. Binding an already-bound service is
/// a no-op: the first binding keeps its position and factory. Instances are
/// created on first `resolve` and cached for the container's lifetime.
pub struct Container {
    bindings: DashMap<ServiceId, ServiceBinding>,
    order: RwLock<Vec<ServiceId>>,
    instances: DashMap<ServiceId, Arc<dyn Any + Send + Sync>>,
    /// Serializes construction; the stack holds services currently being built
    /// on the owning thread.
    constructing: ReentrantMutex<RefCell<Vec<ServiceId>>>,
}

impl Container {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
            order: RwLock::new(Vec::new()),
            instances: DashMap::new(),
            constructing: ReentrantMutex::new(RefCell::new(Vec::new())),
        }
    }

    /// Bind a service. Returns `false` if it was already bound.
    pub fn bind(&self, binding: ServiceBinding) -> bool {
        match self.bindings.entry(binding.id) {
            Entry::Occupied(_) => {
                debug!(service = binding.id.name(), "service already bound, keeping first binding");
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(binding);
                self.order.write().push(binding.id);
                debug!(service = binding.id.name(), "service bound");
                true
            }
        }
    }

    /// Bind `T` to itself.
    pub fn bind_self<T: Injectable>(&self) -> bool {
        self.bind(ServiceBinding::of::<T>())
    }

    #[must_use]
    pub fn is_bound<T: 'static>(&self) -> bool {
        self.contains(ServiceId::of::<T>())
    }

    #[must_use]
    pub fn contains(&self, id: ServiceId) -> bool {
        self.bindings.contains_key(&id)
    }

    /// Bound services in binding order.
    #[must_use]
    pub fn bound_services(&self) -> Vec<ServiceId> {
        self.order.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve the singleton instance of `T`, constructing it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if `T` (or one of its dependencies) is not bound, if
    /// construction fails, or if construction re-enters a service that is
    /// still being built.
    pub fn resolve<T: Injectable>(&self) -> Result<Arc<T>, ContainerError> {
        let id = ServiceId::of::<T>();
        self.resolve_id(id)?
            .downcast::<T>()
            .map_err(|_| ContainerError::TypeMismatch { service: id.name() })
    }

    /// Resolve a service by identity without knowing its concrete type.
    ///
    /// # Errors
    ///
    /// Same as [`Container::resolve`], minus the type check.
    pub fn resolve_id(&self, id: ServiceId) -> Result<Arc<dyn Any + Send + Sync>, ContainerError> {
        if let Some(instance) = self.instances.get(&id) {
            return Ok(Arc::clone(instance.value()));
        }

        let binding = self
            .bindings
            .get(&id)
            .map(|entry| *entry.value())
            .ok_or(ContainerError::NotBound { service: id.name() })?;

        let guard = self.constructing.lock();

        // Another thread may have finished construction while we waited.
        if let Some(instance) = self.instances.get(&id) {
            return Ok(Arc::clone(instance.value()));
        }

        {
            let mut stack = guard.borrow_mut();
            if stack.contains(&id) {
                let mut chain: Vec<&'static str> = stack.iter().map(ServiceId::name).collect();
                chain.push(id.name());
                return Err(ContainerError::CircularDependency { chain });
            }
            stack.push(id);
        }

        let built = {
            let _frame = ConstructionFrame { stack: &*guard };
            (binding.factory)(self)
        };

        let instance = built.map_err(|source| ContainerError::Construction {
            service: id.name(),
            source,
        })?;
        debug!(service = id.name(), "service constructed");

        Ok(Arc::clone(self.instances.entry(id).or_insert(instance).value()))
    }
}

/// Pops the innermost construction entry on drop, including when
/// `Injectable::construct` unwinds.
struct ConstructionFrame<'a> {
    stack: &'a RefCell<Vec<ServiceId>>,
}

impl Drop for ConstructionFrame<'_> {
    fn drop(&mut self) {
        self.stack.borrow_mut().pop();
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("bindings", &*self.order.read())
            .field("instances", &self.instances.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::panic::AssertUnwindSafe;
    use std::sync::atomic::{AtomicU32, Ordering};

    use proptest::prelude::*;

    use super::*;

    static CONSTRUCTED: AtomicU32 = AtomicU32::new(0);

    #[derive(Debug)]
    struct Counter;

    impl Injectable for Counter {
        fn construct(_container: &Container) -> anyhow::Result<Self> {
            CONSTRUCTED.fetch_add(1, Ordering::SeqCst);
            Ok(Self)
        }
    }

    #[derive(Debug)]
    struct Repo {
        url: &'static str,
    }

    impl Injectable for Repo {
        fn construct(_container: &Container) -> anyhow::Result<Self> {
            Ok(Self { url: "mem://" })
        }
    }

    #[derive(Debug)]
    struct UserService {
        repo: Arc<Repo>,
    }

    impl Injectable for UserService {
        fn construct(container: &Container) -> anyhow::Result<Self> {
            Ok(Self {
                repo: container.resolve::<Repo>()?,
            })
        }
    }

    #[derive(Debug)]
    struct Broken;

    impl Injectable for Broken {
        fn construct(_container: &Container) -> anyhow::Result<Self> {
            anyhow::bail!("database unreachable")
        }
    }

    #[derive(Debug)]
    struct Ping;

    impl Injectable for Ping {
        fn construct(container: &Container) -> anyhow::Result<Self> {
            container.resolve::<Pong>()?;
            Ok(Self)
        }
    }

    #[derive(Debug)]
    struct Pong;

    impl Injectable for Pong {
        fn construct(container: &Container) -> anyhow::Result<Self> {
            container.resolve::<Ping>()?;
            Ok(Self)
        }
    }

    #[test]
    fn bind_and_resolve_self_binding() {
        let container = Container::new();
        assert!(container.bind_self::<Repo>());

        let repo = container.resolve::<Repo>().unwrap();
        assert_eq!(repo.url, "mem://");
    }

    #[test]
    fn duplicate_bind_is_noop() {
        let container = Container::new();
        assert!(container.bind_self::<Repo>());
        assert!(!container.bind_self::<Repo>());
        assert_eq!(container.len(), 1);
    }

    #[test]
    fn resolve_returns_singleton() {
        let container = Container::new();
        container.bind_self::<Counter>();

        let first = container.resolve::<Counter>().unwrap();
        let second = container.resolve::<Counter>().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(CONSTRUCTED.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn construct_resolves_dependencies() {
        let container = Container::new();
        container.bind_self::<UserService>();
        container.bind_self::<Repo>();

        let users = container.resolve::<UserService>().unwrap();
        let repo = container.resolve::<Repo>().unwrap();
        assert!(Arc::ptr_eq(&users.repo, &repo));
    }

    #[test]
    fn resolve_unbound_fails() {
        let container = Container::new();
        let err = container.resolve::<Repo>().unwrap_err();
        assert!(matches!(err, ContainerError::NotBound { .. }));
    }

    #[test]
    fn missing_dependency_surfaces_as_construction_error() {
        let container = Container::new();
        container.bind_self::<UserService>();

        let err = container.resolve::<UserService>().unwrap_err();
        assert!(matches!(err, ContainerError::Construction { .. }));
        assert!(container.resolve::<UserService>().is_err());
    }

    #[test]
    fn construction_failure_is_reported() {
        let container = Container::new();
        container.bind_self::<Broken>();

        let err = container.resolve::<Broken>().unwrap_err();
        assert!(err.to_string().contains("database unreachable"));
    }

    #[test]
    fn circular_dependency_detected() {
        let container = Container::new();
        container.bind_self::<Ping>();
        container.bind_self::<Pong>();

        let err = container.resolve::<Ping>().unwrap_err();
        // The cycle is detected inside Pong's construction and wrapped on the way out.
        let message = format!("{:#}", anyhow::Error::new(err));
        assert!(message.contains("circular service dependency"), "{message}");
    }

    static FLAKY_ATTEMPTS: AtomicU32 = AtomicU32::new(0);

    #[derive(Debug)]
    struct Flaky;

    impl Injectable for Flaky {
        fn construct(_container: &Container) -> anyhow::Result<Self> {
            if FLAKY_ATTEMPTS.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first construction blows up");
            }
            Ok(Self)
        }
    }

    #[test]
    fn panicking_construction_does_not_poison_service() {
        let container = Container::new();
        container.bind_self::<Flaky>();

        let first = std::panic::catch_unwind(AssertUnwindSafe(|| container.resolve::<Flaky>()));
        assert!(first.is_err());

        let second = container.resolve::<Flaky>();
        assert!(second.is_ok(), "{:?}", second.err());
        assert_eq!(FLAKY_ATTEMPTS.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn bound_services_keep_insertion_order() {
        let container = Container::new();
        container.bind_self::<Repo>();
        container.bind_self::<Counter>();
        container.bind_self::<Repo>();

        assert_eq!(
            container.bound_services(),
            vec![ServiceId::of::<Repo>(), ServiceId::of::<Counter>()]
        );
    }

    fn binding_for(index: u8) -> ServiceBinding {
        match index % 4 {
            0 => ServiceBinding::of::<Repo>(),
            1 => ServiceBinding::of::<Counter>(),
            2 => ServiceBinding::of::<UserService>(),
            _ => ServiceBinding::of::<Broken>(),
        }
    }

    proptest! {
        #[test]
        fn binding_order_is_first_occurrence(indices in proptest::collection::vec(0u8..4, 0..32)) {
            let container = Container::new();
            let mut expected: Vec<ServiceId> = Vec::new();
            for index in &indices {
                let binding = binding_for(*index);
                let newly = container.bind(binding);
                prop_assert_eq!(newly, !expected.contains(&binding.id()));
                if newly {
                    expected.push(binding.id());
                }
            }
            prop_assert_eq!(container.bound_services(), expected);
        }
    }
}
